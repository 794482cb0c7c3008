//! Traversal of doors and stairs, for players and NPCs alike
//!
//! Departure is always announced in the source room before arrival in the
//! destination. Locks gate players by user id and NPCs by their npc id;
//! stairs are never locked.

use super::{OutboundMessage, ServiceResult};
use crate::error::ServiceError;
use crate::locks;
use crate::markup::bold;
use crate::resolve::resolve;
use crate::world::room::{STAIRS_DOWN, STAIRS_UP};
use crate::world::World;

/// Move a player through a named exit
pub fn traverse(world: &mut World, session_id: &str, exit_query: &str) -> ServiceResult {
    let Some(player) = world.player(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let actor_id = player.user_id;
    let source_id = player.room_id.clone();
    let Some(room) = world.room(&source_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };

    let exits = room.exits();
    let exit_name = match resolve(exit_query, exits.iter().map(|(name, _)| name.as_str())) {
        Ok(name) => name,
        Err(err) => return ServiceResult::err(err),
    };
    let Some((_, target_id)) = exits.iter().find(|(name, _)| *name == exit_name) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let target_id = target_id.clone();

    // Stairs are open passage; doors may be locked
    let is_stairs = exit_name == STAIRS_UP || exit_name == STAIRS_DOWN;
    if !is_stairs && locks::door_denies(world, &source_id, &exit_name, actor_id) {
        return ServiceResult::err(ServiceError::permission(format!(
            "The {exit_name} is locked."
        )));
    }
    if !world.rooms.contains_key(&target_id) {
        return ServiceResult::err(ServiceError::Integrity);
    }

    let actor_name = world
        .display_name_of_session(session_id)
        .unwrap_or("Someone")
        .to_string();

    // The move itself: both room sets and the binding, atomically from
    // any other command's point of view
    if let Some(room) = world.room_mut(&source_id) {
        room.players.remove(session_id);
    }
    if let Some(room) = world.room_mut(&target_id) {
        room.players.insert(session_id.to_string());
    }
    if let Some(player) = world.players.get_mut(session_id) {
        player.room_id = target_id.clone();
    }

    let departure = match exit_name.as_str() {
        STAIRS_UP => format!("{} heads up the stairs.", bold(&actor_name)),
        STAIRS_DOWN => format!("{} heads down the stairs.", bold(&actor_name)),
        _ => format!("{} leaves through the {exit_name}.", bold(&actor_name)),
    };

    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "You go through the {exit_name}."
        )))
        .emit(OutboundMessage::system(super::player::render_look(
            world, session_id,
        )))
        // Source first, then destination: peers see the departure before
        // anyone sees the arrival
        .broadcast(source_id, OutboundMessage::system(departure))
        .broadcast(
            target_id,
            OutboundMessage::system(format!("{} arrives.", bold(&actor_name))),
        )
        .saving()
}

/// Move an NPC through a named exit. Same permission rules, keyed by the
/// NPC's id; used by the planner's `move_through` tool and by fleeing.
pub fn npc_traverse(world: &mut World, npc_name: &str, exit_query: &str) -> ServiceResult {
    let Some(npc_id) = world.npc_uuid(npc_name) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let Some(source_id) = world.room_of_npc(npc_name).map(str::to_string) else {
        return ServiceResult::err(ServiceError::Integrity);
    };

    let exits = world.rooms[&source_id].exits();
    let exit_name = match resolve(exit_query, exits.iter().map(|(name, _)| name.as_str())) {
        Ok(name) => name,
        Err(err) => return ServiceResult::err(err),
    };
    let Some((_, target_id)) = exits.iter().find(|(name, _)| *name == exit_name) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let target_id = target_id.clone();

    let is_stairs = exit_name == STAIRS_UP || exit_name == STAIRS_DOWN;
    if !is_stairs && locks::door_denies(world, &source_id, &exit_name, npc_id) {
        return ServiceResult::err(ServiceError::permission(format!(
            "The {exit_name} is locked."
        )));
    }
    if !world.rooms.contains_key(&target_id) {
        return ServiceResult::err(ServiceError::Integrity);
    }

    if let Some(room) = world.room_mut(&source_id) {
        room.npcs.remove(npc_name);
    }
    if let Some(room) = world.room_mut(&target_id) {
        room.npcs.insert(npc_name.to_string());
    }

    ServiceResult::handled()
        .broadcast(
            source_id,
            OutboundMessage::system(format!(
                "{} leaves through the {exit_name}.",
                bold(npc_name)
            )),
        )
        .broadcast(
            target_id,
            OutboundMessage::system(format!("{} arrives.", bold(npc_name))),
        )
        .saving()
}
