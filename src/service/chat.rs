//! Chat: say, emote, whisper, and NPC dialogue
//!
//! Speech is social: it refills the speaker's socialization and that of
//! any NPC in earshot. NPC dialogue follows the two-phase shape all AI
//! calls use: a prompt is built under the world lock, the adapter runs
//! outside it, and the reply is applied back under the lock.

use itertools::Itertools;

use super::{OutboundMessage, ServiceResult};
use crate::error::ServiceError;
use crate::markup::{bold, italic};
use crate::resolve::resolve;
use crate::world::World;

/// Refill socialization on the speaker and NPC listeners in the room
fn social_refill(world: &mut World, session_id: &str, refill: f32) {
    if let Some(sheet) = world.sheet_for_session_mut(session_id) {
        sheet.needs.socialization += refill;
        sheet.needs.clamp_all();
    }
    let Some(room) = world.room_of_session(session_id) else {
        return;
    };
    let listeners: Vec<String> = room.npcs.iter().cloned().collect();
    for npc in listeners {
        if let Some(sheet) = world.npc_sheets.get_mut(&npc) {
            sheet.needs.socialization += refill;
            sheet.needs.clamp_all();
        }
    }
}

/// Say something to the room
pub fn say(
    world: &mut World,
    session_id: &str,
    text: &str,
    max_len: usize,
    refill: f32,
) -> ServiceResult {
    let text = text.trim();
    if text.is_empty() {
        return ServiceResult::err(ServiceError::validation("Say what?"));
    }
    if text.len() > max_len {
        return ServiceResult::err(ServiceError::validation(format!(
            "That's too much at once (limit {max_len})."
        )));
    }
    let Some(room_id) = world.player(session_id).map(|p| p.room_id.clone()) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let name = world
        .display_name_of_session(session_id)
        .unwrap_or("Someone")
        .to_string();

    social_refill(world, session_id, refill);

    ServiceResult::handled()
        .emit(OutboundMessage::player(&name, format!("You say: {text}")))
        .broadcast(
            room_id,
            OutboundMessage::player(&name, format!("{} says: {text}", bold(&name))),
        )
        .saving()
}

/// Emote in the third person
pub fn emote(
    world: &mut World,
    session_id: &str,
    text: &str,
    max_len: usize,
    refill: f32,
) -> ServiceResult {
    let text = text.trim();
    if text.is_empty() {
        return ServiceResult::err(ServiceError::validation("Emote what?"));
    }
    if text.len() > max_len {
        return ServiceResult::err(ServiceError::validation(format!(
            "That's too much at once (limit {max_len})."
        )));
    }
    let Some(room_id) = world.player(session_id).map(|p| p.room_id.clone()) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let name = world
        .display_name_of_session(session_id)
        .unwrap_or("Someone")
        .to_string();

    social_refill(world, session_id, refill);

    let line = italic(&format!("{} {text}", bold(&name)));
    ServiceResult::handled()
        .emit(OutboundMessage::player(&name, line.clone()))
        .broadcast(room_id, OutboundMessage::player(&name, line))
        .saving()
}

/// Whisper to one co-located player. Delivery to the target goes through
/// the result's `directs` so nobody else hears it.
pub fn whisper(
    world: &mut World,
    session_id: &str,
    target_query: &str,
    text: &str,
    max_len: usize,
) -> ServiceResult {
    let text = text.trim();
    if text.is_empty() {
        return ServiceResult::err(ServiceError::validation("Whisper what?"));
    }
    if text.len() > max_len {
        return ServiceResult::err(ServiceError::validation(format!(
            "That's too much at once (limit {max_len})."
        )));
    }
    let Some(room) = world.room_of_session(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };

    // Other players in the room, by display name
    let candidates: Vec<(String, String)> = room
        .players
        .iter()
        .filter(|s| *s != session_id)
        .filter_map(|s| {
            world
                .display_name_of_session(s)
                .map(|n| (n.to_string(), s.clone()))
        })
        .collect();
    let target_name = match resolve(target_query, candidates.iter().map(|(n, _)| n.as_str())) {
        Ok(name) => name,
        Err(err) => return ServiceResult::err(err),
    };
    let Some((_, target_session)) = candidates.iter().find(|(n, _)| *n == target_name) else {
        return ServiceResult::err(ServiceError::Integrity);
    };

    let name = world
        .display_name_of_session(session_id)
        .unwrap_or("Someone")
        .to_string();
    let mut result = ServiceResult::handled().emit(OutboundMessage::player(
        &name,
        format!("You whisper to {}: {text}", bold(&target_name)),
    ));
    result.directs.push((
        target_session.clone(),
        OutboundMessage::player(&name, format!("{} whispers: {text}", bold(&name))),
    ));
    result
}

// ---- NPC dialogue ----

/// Resolve the NPC and build the dialogue prompt (phase one, under the
/// world lock)
pub fn dialogue_prompt(
    world: &World,
    session_id: &str,
    npc_query: &str,
    text: &str,
) -> Result<(String, String), ServiceError> {
    let room = world
        .room_of_session(session_id)
        .ok_or(ServiceError::Integrity)?;
    let npc_name = resolve(npc_query, room.npcs.iter().map(String::as_str))?;
    let sheet = world
        .npc_sheets
        .get(&npc_name)
        .ok_or(ServiceError::Integrity)?;
    let speaker = world
        .display_name_of_session(session_id)
        .unwrap_or("a stranger");

    let memories = sheet.memory.iter().rev().take(5).join("; ");
    let prompt = format!(
        "You are {npc_name}, {description}, in the world '{world_name}'. \
         High concept: {concept}. Trouble: {trouble}. \
         Recent memories: {memories}. Safety level: {safety}. \
         {speaker} says to you: \"{text}\". \
         Reply with one short line of in-character speech, nothing else.",
        description = sheet.description,
        world_name = world.name,
        concept = sheet.aspects.high_concept,
        trouble = sheet.aspects.trouble,
        safety = world.safety_level,
    );
    Ok((npc_name, prompt))
}

/// Apply a dialogue reply (phase two, back under the lock): the NPC
/// speaks, remembers the exchange, and both parties get a social refill
pub fn install_dialogue(
    world: &mut World,
    session_id: &str,
    npc_name: &str,
    said: &str,
    reply: &str,
    refill: f32,
) -> ServiceResult {
    let Some(room_id) = world.player(session_id).map(|p| p.room_id.clone()) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let speaker = world
        .display_name_of_session(session_id)
        .unwrap_or("a stranger")
        .to_string();

    // The NPC may have wandered off while the adapter was thinking
    if !world.rooms[&room_id].npcs.contains(npc_name) {
        return ServiceResult::err(ServiceError::not_found(format!(
            "{npc_name} is no longer here."
        )));
    }

    if let Some(sheet) = world.npc_sheets.get_mut(npc_name) {
        sheet.remember(format!("{speaker} said: {said}"));
    }
    social_refill(world, session_id, refill);

    let reply = reply.trim();
    let line = if reply.is_empty() {
        format!("{} doesn't seem to have much to say.", bold(npc_name))
    } else {
        format!("{} says: {reply}", bold(npc_name))
    };
    ServiceResult::handled()
        .emit(OutboundMessage::npc(npc_name, line.clone()))
        .broadcast(room_id, OutboundMessage::npc(npc_name, line))
        .saving()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::world::sheet::CharacterSheet;
    use crate::world::user::{Player, User};
    use crate::world::START_ROOM_ID;

    fn world_with_two_players() -> (World, String, String) {
        let mut world = World::new_default();
        let mut add = |name: &str, world: &mut World| {
            let user = User::new(name, "x".into(), "");
            let user_id = user.id;
            world.users.insert(user_id, user);
            let session = format!("sess-{name}");
            world.players.insert(
                session.clone(),
                Player {
                    session_id: session.clone(),
                    user_id,
                    room_id: START_ROOM_ID.into(),
                },
            );
            world
                .rooms
                .get_mut(START_ROOM_ID)
                .unwrap()
                .players
                .insert(session.clone());
            session
        };
        let alice = add("Alice", &mut world);
        let bob = add("Bob", &mut world);
        (world, alice, bob)
    }

    #[test]
    fn test_say_broadcasts_and_refills_npc_listeners() {
        let (mut world, alice, _) = world_with_two_players();
        let mut sheet = CharacterSheet::new("Gareth", "");
        sheet.needs.socialization = 40.0;
        world.npc_sheets.insert("Gareth".into(), sheet);
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .npcs
            .insert("Gareth".into());

        let result = say(&mut world, &alice, "hello there", 1000, 10.0);
        assert!(!result.is_err());
        assert_eq!(result.broadcasts.len(), 1);
        assert_eq!(
            world.npc_sheets["Gareth"].needs.socialization,
            50.0
        );
    }

    #[test]
    fn test_say_rejects_oversize() {
        let (mut world, alice, _) = world_with_two_players();
        let result = say(&mut world, &alice, &"a".repeat(1001), 1000, 10.0);
        assert!(matches!(result.error, Some(ServiceError::Validation(_))));
    }

    #[test]
    fn test_whisper_goes_direct() {
        let (mut world, alice, bob) = world_with_two_players();
        let result = whisper(&mut world, &alice, "Bob", "psst", 1000);
        assert!(!result.is_err());
        assert!(result.broadcasts.is_empty());
        assert_eq!(result.directs.len(), 1);
        assert_eq!(result.directs[0].0, bob);
        assert!(result.directs[0].1.content.contains("psst"));
    }

    #[test]
    fn test_dialogue_round_trip() {
        let (mut world, alice, _) = world_with_two_players();
        world
            .npc_sheets
            .insert("Gareth".into(), CharacterSheet::new("Gareth", "a guard"));
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .npcs
            .insert("Gareth".into());

        let (npc, prompt) = dialogue_prompt(&world, &alice, "gar", "how goes it?").unwrap();
        assert_eq!(npc, "Gareth");
        assert!(prompt.contains("how goes it?"));

        let result =
            install_dialogue(&mut world, &alice, "Gareth", "how goes it?", "Quietly.", 10.0);
        assert!(!result.is_err());
        assert!(world.npc_sheets["Gareth"]
            .memory
            .iter()
            .any(|m| m.contains("how goes it?")));
    }
}
