//! NPC administration: CRUD, sheet edits, AI-assisted generation
//!
//! Generation is split so the AI call happens outside the world lock: the
//! dispatcher builds a prompt with `generation_prompt`, calls the adapter
//! (or its fallback), then commits the result with `install_generated`.

use itertools::Itertools;
use serde::Deserialize;
use uuid::Uuid;

use super::{OutboundMessage, ServiceResult};
use crate::error::ServiceError;
use crate::markup::{bold, code};
use crate::resolve::{resolve, resolve_room};
use crate::world::sheet::CharacterSheet;
use crate::world::World;

/// Add an NPC to a room (the `here` shorthand works for the room)
pub fn add_npc(
    world: &mut World,
    session_id: &str,
    room_query: &str,
    name: &str,
    description: &str,
) -> ServiceResult {
    let name = name.trim();
    if name.is_empty() {
        return ServiceResult::err(ServiceError::validation("An NPC needs a name."));
    }
    if world.npc_sheets.contains_key(name) {
        return ServiceResult::err(ServiceError::constraint(format!(
            "There's already an NPC called '{name}'."
        )));
    }

    let current = current_room(world, session_id);
    let room_id = match resolve_room(room_query, &current, world.rooms.keys().map(String::as_str)) {
        Ok(id) => id,
        Err(err) => return ServiceResult::err(err),
    };

    world
        .npc_sheets
        .insert(name.to_string(), CharacterSheet::new(name, description));
    world.npc_ids.insert(name.to_string(), Uuid::now_v7());
    let Some(room) = world.room_mut(&room_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    room.npcs.insert(name.to_string());

    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "{} now inhabits {}.",
            bold(name),
            bold(&room_id)
        )))
        .broadcast(
            room_id.clone(),
            OutboundMessage::system(format!("{} arrives.", bold(name))),
        )
        .saving()
}

/// Remove an NPC entirely: room presence, sheet and id
pub fn remove_npc(
    world: &mut World,
    session_id: &str,
    room_query: &str,
    name_query: &str,
) -> ServiceResult {
    let current = current_room(world, session_id);
    let room_id = match resolve_room(room_query, &current, world.rooms.keys().map(String::as_str)) {
        Ok(id) => id,
        Err(err) => return ServiceResult::err(err),
    };
    let name = {
        let room = &world.rooms[&room_id];
        match resolve(name_query, room.npcs.iter().map(String::as_str)) {
            Ok(name) => name,
            Err(err) => return ServiceResult::err(err),
        }
    };

    if let Some(room) = world.room_mut(&room_id) {
        room.npcs.remove(&name);
    }
    world.npc_sheets.remove(&name);
    world.npc_ids.remove(&name);

    ServiceResult::handled()
        .emit(OutboundMessage::system(format!("{} is gone.", bold(&name))))
        .broadcast(
            room_id,
            OutboundMessage::system(format!("{} departs.", bold(&name))),
        )
        .saving()
}

pub fn set_npc_description(world: &mut World, name_query: &str, description: &str) -> ServiceResult {
    let name = match resolve(name_query, world.npc_sheets.keys().map(String::as_str)) {
        Ok(name) => name,
        Err(err) => return ServiceResult::err(err),
    };
    let Some(sheet) = world.npc_sheets.get_mut(&name) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    sheet.description = description.trim().to_string();
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "Description of {} updated.",
            bold(&name)
        )))
        .saving()
}

/// Set a GURPS attribute on an NPC sheet
pub fn set_npc_attribute(
    world: &mut World,
    name_query: &str,
    key: &str,
    value: &str,
) -> ServiceResult {
    let name = match resolve(name_query, world.npc_sheets.keys().map(String::as_str)) {
        Ok(name) => name,
        Err(err) => return ServiceResult::err(err),
    };
    let Ok(value) = value.trim().parse::<i32>() else {
        return ServiceResult::err(ServiceError::validation("Attributes are numbers."));
    };
    let Some(sheet) = world.npc_sheets.get_mut(&name) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if !sheet.set_attribute(key.trim(), value) {
        return ServiceResult::err(ServiceError::validation(format!(
            "No attribute called '{}'. Try strength, dexterity, intelligence or health.",
            key.trim()
        )));
    }
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "{}'s {} is now {value}.",
            bold(&name),
            key.trim()
        )))
        .saving()
}

pub fn set_npc_aspect(
    world: &mut World,
    name_query: &str,
    key: &str,
    value: &str,
) -> ServiceResult {
    let name = match resolve(name_query, world.npc_sheets.keys().map(String::as_str)) {
        Ok(name) => name,
        Err(err) => return ServiceResult::err(err),
    };
    let Some(sheet) = world.npc_sheets.get_mut(&name) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if !sheet.set_aspect(key.trim(), value.trim()) {
        return ServiceResult::err(ServiceError::validation(format!(
            "No aspect called '{}'. Try high_concept, trouble, background or focus.",
            key.trim()
        )));
    }
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "{}'s {} updated.",
            bold(&name),
            key.trim()
        )))
        .saving()
}

pub fn set_npc_matrix(
    world: &mut World,
    name_query: &str,
    axis: &str,
    value: &str,
) -> ServiceResult {
    let name = match resolve(name_query, world.npc_sheets.keys().map(String::as_str)) {
        Ok(name) => name,
        Err(err) => return ServiceResult::err(err),
    };
    let Ok(value) = value.trim().parse::<i32>() else {
        return ServiceResult::err(ServiceError::validation("Matrix axes are numbers."));
    };
    let Some(sheet) = world.npc_sheets.get_mut(&name) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if !sheet.set_matrix_axis(axis.trim(), value) {
        return ServiceResult::err(ServiceError::validation(format!(
            "No matrix axis called '{}'.",
            axis.trim()
        )));
    }
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "{}'s {} set.",
            bold(&name),
            axis.trim()
        )))
        .saving()
}

/// Show an NPC's sheet
pub fn npc_sheet(world: &World, name_query: &str) -> ServiceResult {
    let name = match resolve(name_query, world.npc_sheets.keys().map(String::as_str)) {
        Ok(name) => name,
        Err(err) => return ServiceResult::err(err),
    };
    let sheet = &world.npc_sheets[&name];
    ServiceResult::handled().emit(OutboundMessage::system(render_sheet(sheet)))
}

/// Render a character sheet for players and admins alike
pub fn render_sheet(sheet: &CharacterSheet) -> String {
    let attrs = &sheet.attributes;
    let needs = &sheet.needs;
    let mut lines = vec![
        format!("{}", bold(&sheet.name)),
        sheet.description.clone(),
        format!(
            "ST {} DX {} IQ {} HT {}",
            attrs.strength, attrs.dexterity, attrs.intelligence, attrs.health
        ),
        format!(
            "HP {}/{}  FP {}/{}  Will {}  Per {}",
            sheet.derived.hp,
            sheet.derived.max_hp,
            sheet.derived.fp,
            sheet.derived.max_fp,
            sheet.derived.will,
            sheet.derived.perception
        ),
        format!(
            "Hunger {:.0}  Thirst {:.0}  Social {:.0}  Sleep {:.0}",
            needs.hunger, needs.thirst, needs.socialization, needs.sleep
        ),
    ];
    if !sheet.aspects.high_concept.is_empty() {
        lines.push(format!("High concept: {}", sheet.aspects.high_concept));
    }
    if !sheet.aspects.trouble.is_empty() {
        lines.push(format!("Trouble: {}", sheet.aspects.trouble));
    }
    if sheet.combat.is_dead {
        lines.push("(dead)".to_string());
    } else if sheet.combat.yielded {
        lines.push("(yielded)".to_string());
    }
    code(&lines.join("\n"))
}

// ---- AI generation ----

/// What we ask the model to produce for `/npc generate`
#[derive(Debug, Deserialize)]
pub struct GeneratedNpc {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub high_concept: String,
    #[serde(default)]
    pub trouble: String,
}

/// Build the generation prompt from world and room context
pub fn generation_prompt(
    world: &World,
    room_id: &str,
    name_hint: Option<&str>,
    desc_hint: Option<&str>,
) -> String {
    let room_desc = world
        .room(room_id)
        .map(|r| r.description.as_str())
        .unwrap_or("");
    let existing = world.npc_sheets.keys().sorted().join(", ");
    let mut prompt = format!(
        "You are inventing one inhabitant for the world '{}' ({}). \
         Safety level: {}. The room they stand in: {room_desc}. \
         Existing NPCs (do not reuse these names): {existing}. \
         Reply with a single JSON object with string fields \
         name, description, high_concept, trouble.",
        world.name, world.description, world.safety_level,
    );
    if let Some(name) = name_hint {
        prompt.push_str(&format!(" Their name must be '{name}'."));
    }
    if let Some(desc) = desc_hint {
        prompt.push_str(&format!(" Work from this seed description: {desc}."));
    }
    prompt
}

/// Commit a generated NPC from the adapter's (or fallback's) JSON reply.
/// On any parse problem nothing is created and the error surfaces.
pub fn install_generated(world: &mut World, room_id: &str, reply: &str) -> ServiceResult {
    let Some(parsed) = extract_json_object::<GeneratedNpc>(reply) else {
        return ServiceResult::err(ServiceError::validation(
            "Generation failed: the response wasn't usable. No NPC was created.",
        ));
    };
    let name = parsed.name.trim().to_string();
    if name.is_empty() {
        return ServiceResult::err(ServiceError::validation(
            "Generation failed: no name. No NPC was created.",
        ));
    }
    if world.npc_sheets.contains_key(&name) {
        return ServiceResult::err(ServiceError::constraint(format!(
            "Generation produced a duplicate name '{name}'. No NPC was created.",
        )));
    }
    if !world.rooms.contains_key(room_id) {
        return ServiceResult::err(ServiceError::Integrity);
    }

    let mut sheet = CharacterSheet::new(&name, parsed.description.trim());
    sheet.aspects.high_concept = parsed.high_concept.trim().to_string();
    sheet.aspects.trouble = parsed.trouble.trim().to_string();
    world.npc_sheets.insert(name.clone(), sheet);
    world.npc_ids.insert(name.clone(), Uuid::now_v7());
    if let Some(room) = world.room_mut(room_id) {
        room.npcs.insert(name.clone());
    }

    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "{} steps into the world.",
            bold(&name)
        )))
        .broadcast(
            room_id.to_string(),
            OutboundMessage::system(format!("{} arrives.", bold(&name))),
        )
        .saving()
}

/// Best-effort JSON extraction: tolerate prose or fences around the
/// object, as models are wont to produce
pub fn extract_json_object<T: serde::de::DeserializeOwned>(reply: &str) -> Option<T> {
    if let Ok(parsed) = serde_json::from_str(reply.trim()) {
        return Some(parsed);
    }
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

fn current_room(world: &World, session_id: &str) -> String {
    world
        .player(session_id)
        .map(|p| p.room_id.clone())
        .unwrap_or_else(|| crate::world::START_ROOM_ID.to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::world::user::{Player, User};
    use crate::world::START_ROOM_ID;

    fn world_with_session() -> (World, String) {
        let mut world = World::new_default();
        let user = User::new("Alice", "x".into(), "");
        let user_id = user.id;
        world.users.insert(user_id, user);
        let session = "sess".to_string();
        world.players.insert(
            session.clone(),
            Player {
                session_id: session.clone(),
                user_id,
                room_id: START_ROOM_ID.into(),
            },
        );
        (world, session)
    }

    #[test]
    fn test_add_and_remove_npc_keeps_maps_aligned() {
        let (mut world, session) = world_with_session();
        let result = add_npc(&mut world, &session, "here", "Gareth", "a tired guard");
        assert!(!result.is_err());
        assert!(world.npc_sheets.contains_key("Gareth"));
        assert!(world.npc_ids.contains_key("Gareth"));
        assert!(world.rooms[START_ROOM_ID].npcs.contains("Gareth"));

        let result = remove_npc(&mut world, &session, "here", "Gar");
        assert!(!result.is_err());
        assert!(world.npc_sheets.is_empty());
        assert!(world.npc_ids.is_empty());
        assert!(world.rooms[START_ROOM_ID].npcs.is_empty());
    }

    #[test]
    fn test_duplicate_npc_name_rejected() {
        let (mut world, session) = world_with_session();
        add_npc(&mut world, &session, "here", "Gareth", "");
        let result = add_npc(&mut world, &session, "here", "Gareth", "");
        assert!(matches!(result.error, Some(ServiceError::Constraint(_))));
    }

    #[test]
    fn test_attribute_and_matrix_edits() {
        let (mut world, session) = world_with_session();
        add_npc(&mut world, &session, "here", "Gareth", "");

        assert!(!set_npc_attribute(&mut world, "Gareth", "strength", "14").is_err());
        assert_eq!(world.npc_sheets["Gareth"].attributes.strength, 14);

        assert!(set_npc_attribute(&mut world, "Gareth", "charm", "14").is_err());

        assert!(!set_npc_matrix(&mut world, "Gareth", "humble_proud", "-3").is_err());
        assert_eq!(world.npc_sheets["Gareth"].matrix["humble_proud"], -3);
    }

    #[test]
    fn test_install_generated_happy_path() {
        let (mut world, _) = world_with_session();
        let reply = r#"Sure! Here you go:
            {"name": "Mirelle", "description": "a wary merchant",
             "high_concept": "Coin before comfort", "trouble": "Owes everyone"}"#;
        let result = install_generated(&mut world, START_ROOM_ID, reply);
        assert!(!result.is_err());
        assert!(world.npc_sheets.contains_key("Mirelle"));
        assert_eq!(
            world.npc_sheets["Mirelle"].aspects.high_concept,
            "Coin before comfort"
        );
    }

    #[test]
    fn test_install_generated_rejects_garbage() {
        let (mut world, _) = world_with_session();
        let result = install_generated(&mut world, START_ROOM_ID, "I cannot help with that");
        assert!(result.is_err());
        assert!(world.npc_sheets.is_empty());
    }
}
