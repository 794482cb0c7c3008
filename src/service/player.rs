//! Player-facing introspection and self-service commands

use itertools::Itertools;

use super::npc::render_sheet;
use super::{OutboundMessage, ServiceResult};
use crate::error::ServiceError;
use crate::markup::{bold, code, italic};
use crate::world::World;

/// Describe the actor's current room: description, occupants, objects,
/// exits
pub fn render_look(world: &World, session_id: &str) -> String {
    let Some(room) = world.room_of_session(session_id) else {
        return "You are nowhere in particular.".to_string();
    };

    let mut lines = vec![bold(&room.id), room.description.clone()];

    let npcs = room.npcs.iter().sorted().join(", ");
    if !npcs.is_empty() {
        lines.push(format!("Here: {npcs}."));
    }

    let others = room
        .players
        .iter()
        .filter(|s| *s != session_id)
        .filter_map(|s| world.display_name_of_session(s))
        .sorted_unstable()
        .join(", ");
    if !others.is_empty() {
        lines.push(format!("Also here: {others}."));
    }

    // Travel points show up under exits, not as clutter on the floor
    let objects = room
        .objects
        .values()
        .filter(|o| !o.is_travel_point())
        .map(|o| o.name.as_str())
        .sorted_unstable()
        .join(", ");
    if !objects.is_empty() {
        lines.push(format!("You see: {objects}."));
    }

    let exits = room
        .exits()
        .into_iter()
        .map(|(name, _)| name)
        .join(", ");
    if exits.is_empty() {
        lines.push(italic("There is no way out."));
    } else {
        lines.push(format!("Exits: {exits}."));
    }

    lines.join("\n")
}

pub fn look(world: &World, session_id: &str) -> ServiceResult {
    ServiceResult::handled().emit(OutboundMessage::system(render_look(world, session_id)))
}

/// List everyone connected
pub fn who(world: &World) -> ServiceResult {
    let names = world
        .players
        .keys()
        .sorted_unstable()
        .filter_map(|s| world.display_name_of_session(s))
        .map(bold)
        .join(", ");
    let content = if names.is_empty() {
        "Nobody is connected.".to_string()
    } else {
        format!("Connected: {names}.")
    };
    ServiceResult::handled().emit(OutboundMessage::system(content))
}

/// Show the actor's own sheet
pub fn own_sheet(world: &World, session_id: &str) -> ServiceResult {
    let Some(sheet) = world.sheet_for_session(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    ServiceResult::handled().emit(OutboundMessage::system(render_sheet(sheet)))
}

/// Show the actor's 8 inventory slots
pub fn inventory(world: &World, session_id: &str) -> ServiceResult {
    let Some(sheet) = world.sheet_for_session(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let slot_label = |i: usize| match i {
        0 => "left hand",
        1 => "right hand",
        2..=5 => "small stow",
        _ => "large stow",
    };
    let lines = (0..crate::world::sheet::SLOT_COUNT)
        .map(|i| {
            let held = sheet.inventory.0[i]
                .as_ref()
                .map(|o| o.name.as_str())
                .unwrap_or("-");
            format!("{i}. [{}] {held}", slot_label(i))
        })
        .join("\n");
    ServiceResult::handled().emit(OutboundMessage::system(code(&lines)))
}

/// Rename the actor's account (name stays unique per world)
pub fn rename(world: &mut World, session_id: &str, new_name: &str) -> ServiceResult {
    let new_name = new_name.trim();
    if new_name.is_empty() || new_name.contains('|') {
        return ServiceResult::err(ServiceError::validation("That's not a usable name."));
    }
    if world.user_by_name(new_name).is_some() {
        return ServiceResult::err(ServiceError::constraint(format!(
            "Someone is already called '{new_name}'."
        )));
    }
    let Some(user_id) = world.player(session_id).map(|p| p.user_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let Some(user) = world.users.get_mut(&user_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let old_name = user.name.clone();
    user.name = new_name.to_string();
    user.sheet.name = new_name.to_string();

    let room_id = world.player(session_id).map(|p| p.room_id.clone());
    let mut result = ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "You are now known as {}.",
            bold(new_name)
        )))
        .saving();
    if let Some(room_id) = room_id {
        result = result.broadcast(
            room_id,
            OutboundMessage::system(format!(
                "{} is now known as {}.",
                bold(&old_name),
                bold(new_name)
            )),
        );
    }
    result
}

/// Update the actor's character description
pub fn describe(world: &mut World, session_id: &str, text: &str) -> ServiceResult {
    let Some(sheet) = world.sheet_for_session_mut(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    sheet.description = text.trim().to_string();
    ServiceResult::handled()
        .emit(OutboundMessage::system("Noted. That's you now."))
        .saving()
}

/// Command summary; kept short on purpose, details live with each command
pub fn help() -> ServiceResult {
    let text = [
        "look (l), /who, /sheet, /inventory, /help, /quit",
        "say <text> (or just type), /emote <text>, /whisper <name> | <text>, /talk <npc> | <text>",
        "pick up / drop / eat / drink / wield / open / search / claim / unclaim / cut <object>",
        "craft <template>, interact <object>, go <door or stairs>",
        "/rename <name>, /describe <text>, /attack <target>, /flee",
        "/trade <player>, /trade offer <object>, /trade accept|reject|cancel",
        "Admins: /room, /npc, /template, /object, /auth, /kick, /purge, /safety, /goap, /validate, /stats",
    ]
    .join("\n");
    ServiceResult::handled().emit(OutboundMessage::system(code(&text)))
}
