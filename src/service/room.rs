//! Room administration: create, describe, doors, stairs, locks
//!
//! Doors and stairs are kept in tri-agreement: the name->target map, the
//! name->uuid map, and the travel-point object all move together, on both
//! sides of the link. The auditor treats any disagreement as corruption.

use uuid::Uuid;

use super::{OutboundMessage, ServiceResult};
use crate::error::ServiceError;
use crate::markup::bold;
use crate::resolve::{resolve, resolve_room};
use crate::world::object::{GameObject, TAG_IMMOVABLE, TAG_TRAVEL_POINT};
use crate::world::room::{Room, STAIRS_DOWN, STAIRS_UP};
use crate::world::World;

/// Create a new empty room with a unique id
pub fn create_room(world: &mut World, id: &str, description: &str) -> ServiceResult {
    let id = id.trim();
    if id.is_empty() {
        return ServiceResult::err(ServiceError::validation("A room needs an id."));
    }
    if world.rooms.contains_key(id) {
        return ServiceResult::err(ServiceError::constraint(format!(
            "There's already a room called '{id}'."
        )));
    }

    world.rooms.insert(id.to_string(), Room::new(id, description));
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "Room {} created.",
            bold(id)
        )))
        .saving()
}

/// Change a room's description; `here` names the actor's current room
pub fn set_description(
    world: &mut World,
    session_id: &str,
    room_query: &str,
    description: &str,
) -> ServiceResult {
    let current = actor_room_id(world, session_id);
    let room_id = match resolve_room(
        room_query,
        &current,
        world.rooms.keys().map(String::as_str),
    ) {
        Ok(id) => id,
        Err(err) => return ServiceResult::err(err),
    };

    let Some(room) = world.room_mut(&room_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    room.description = description.trim().to_string();
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "Description of {} updated.",
            bold(&room_id)
        )))
        .saving()
}

/// Add a door from the actor's room to a target room, creating the
/// reciprocal door on the far side
pub fn add_door(
    world: &mut World,
    session_id: &str,
    door_name: &str,
    target_query: &str,
) -> ServiceResult {
    let source_id = actor_room_id(world, session_id);
    let door_name = door_name.trim();
    if door_name.is_empty() {
        return ServiceResult::err(ServiceError::validation("A door needs a name."));
    }

    let target_id = match resolve(target_query, world.rooms.keys().map(String::as_str)) {
        Ok(id) => id,
        Err(err) => return ServiceResult::err(err),
    };
    if target_id == source_id {
        return ServiceResult::err(ServiceError::validation(
            "A door can't lead back into its own room.",
        ));
    }
    if world.rooms[&source_id].doors.contains_key(door_name) {
        return ServiceResult::err(ServiceError::constraint(format!(
            "There's already a door called '{door_name}' here."
        )));
    }

    install_door(world, &source_id, door_name, &target_id);

    // Reciprocal side, unless one already points back
    let already_reciprocated = world.rooms[&target_id]
        .doors
        .values()
        .any(|t| t == &source_id);
    if !already_reciprocated {
        let reciprocal_name = free_door_name(&world.rooms[&target_id], door_name, &source_id);
        install_door(world, &target_id, &reciprocal_name, &source_id);
    }

    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "A door named {} now leads to {}.",
            bold(door_name),
            bold(&target_id)
        )))
        .saving()
}

/// Link two named rooms with named doors on each side
pub fn link_doors(
    world: &mut World,
    room_a_query: &str,
    door_a: &str,
    room_b_query: &str,
    door_b: &str,
) -> ServiceResult {
    let room_a = match resolve(room_a_query, world.rooms.keys().map(String::as_str)) {
        Ok(id) => id,
        Err(err) => return ServiceResult::err(err),
    };
    let room_b = match resolve(room_b_query, world.rooms.keys().map(String::as_str)) {
        Ok(id) => id,
        Err(err) => return ServiceResult::err(err),
    };
    if room_a == room_b {
        return ServiceResult::err(ServiceError::validation(
            "A room can't be linked to itself.",
        ));
    }
    let (door_a, door_b) = (door_a.trim(), door_b.trim());
    if door_a.is_empty() || door_b.is_empty() {
        return ServiceResult::err(ServiceError::validation("Both doors need names."));
    }
    if world.rooms[&room_a].doors.contains_key(door_a) {
        return ServiceResult::err(ServiceError::constraint(format!(
            "'{room_a}' already has a door called '{door_a}'."
        )));
    }
    if world.rooms[&room_b].doors.contains_key(door_b) {
        return ServiceResult::err(ServiceError::constraint(format!(
            "'{room_b}' already has a door called '{door_b}'."
        )));
    }

    install_door(world, &room_a, door_a, &room_b);
    install_door(world, &room_b, door_b, &room_a);

    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "Linked {} and {}.",
            bold(&room_a),
            bold(&room_b)
        )))
        .saving()
}

/// Remove a door from the actor's room, along with its counterpart on the
/// far side
pub fn remove_door(world: &mut World, session_id: &str, door_query: &str) -> ServiceResult {
    let source_id = actor_room_id(world, session_id);
    let door_name = {
        let room = &world.rooms[&source_id];
        match resolve(door_query, room.doors.keys().map(String::as_str)) {
            Ok(name) => name,
            Err(err) => return ServiceResult::err(err),
        }
    };

    let target_id = uninstall_door(world, &source_id, &door_name);

    // Take down the counterpart, preferring the conventional reciprocal
    // name in case several doors connect the two rooms
    if let Some(target_id) = target_id {
        if let Some(target) = world.rooms.get(&target_id) {
            let mut back_names: Vec<String> = target
                .doors
                .iter()
                .filter(|(_, t)| **t == source_id)
                .map(|(name, _)| name.clone())
                .collect();
            back_names.sort_unstable();
            let variant_prefix = format!("{door_name} (to ");
            let counterpart = back_names
                .iter()
                .find(|n| **n == door_name || n.starts_with(&variant_prefix))
                .cloned()
                .or_else(|| back_names.first().cloned());
            if let Some(counterpart) = counterpart {
                uninstall_door(world, &target_id, &counterpart);
            }
        }
    }

    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "The {} is gone.",
            bold(&door_name)
        )))
        .saving()
}

/// Set (or clear, with an empty/`none` argument) the stairs of the
/// actor's room, reciprocating on the target rooms
pub fn set_stairs(
    world: &mut World,
    session_id: &str,
    up_query: &str,
    down_query: &str,
) -> ServiceResult {
    let here = actor_room_id(world, session_id);

    let up = match parse_stairs_target(world, up_query) {
        Ok(target) => target,
        Err(err) => return ServiceResult::err(err),
    };
    let down = match parse_stairs_target(world, down_query) {
        Ok(target) => target,
        Err(err) => return ServiceResult::err(err),
    };
    if up.as_deref() == Some(here.as_str()) || down.as_deref() == Some(here.as_str()) {
        return ServiceResult::err(ServiceError::validation(
            "Stairs can't lead back into their own room.",
        ));
    }

    // Clear whatever was there before, both sides
    clear_stairs(world, &here, true);
    clear_stairs(world, &here, false);

    if let Some(up_id) = &up {
        install_stairs(world, &here, up_id, true);
        install_stairs(world, up_id, &here, false);
    }
    if let Some(down_id) = &down {
        install_stairs(world, &here, down_id, false);
        install_stairs(world, down_id, &here, true);
    }

    let describe = |target: &Option<String>| match target {
        Some(id) => bold(id),
        None => "nowhere".to_string(),
    };
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "Stairs lead up to {} and down to {}.",
            describe(&up),
            describe(&down)
        )))
        .saving()
}

/// Attach (or clear) a lock policy on a door in the actor's room
///
/// Policy terms are comma separated: a bare user name allows that user, a
/// `relation:user` pair allows anyone the world records with that
/// relationship towards the user. The word `clear` removes the lock.
pub fn lock_door(
    world: &mut World,
    session_id: &str,
    door_query: &str,
    policy_text: &str,
) -> ServiceResult {
    let room_id = actor_room_id(world, session_id);
    let door_name = {
        let room = &world.rooms[&room_id];
        match resolve(door_query, room.doors.keys().map(String::as_str)) {
            Ok(name) => name,
            Err(err) => return ServiceResult::err(err),
        }
    };

    if policy_text.trim() == "clear" {
        if let Some(room) = world.room_mut(&room_id) {
            room.door_locks.remove(&door_name);
        }
        return ServiceResult::handled()
            .emit(OutboundMessage::system(format!(
                "The {} is unlocked.",
                bold(&door_name)
            )))
            .saving();
    }

    let mut lock = crate::world::room::DoorLock::default();
    for term in policy_text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match term.split_once(':') {
            Some((rtype, user_name)) => {
                let Some(user) = world.user_by_name(user_name.trim()) else {
                    return ServiceResult::err(ServiceError::not_found(format!(
                        "No user called '{}'.",
                        user_name.trim()
                    )));
                };
                lock.allow_rel.push((rtype.trim().to_string(), user.id));
            }
            None => {
                let Some(user) = world.user_by_name(term) else {
                    return ServiceResult::err(ServiceError::not_found(format!(
                        "No user called '{term}'."
                    )));
                };
                lock.allow_ids.insert(user.id);
            }
        }
    }

    if let Some(room) = world.room_mut(&room_id) {
        room.door_locks.insert(door_name.clone(), lock);
    }
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "The {} is now locked.",
            bold(&door_name)
        )))
        .saving()
}

// ---- internals ----

fn actor_room_id(world: &World, session_id: &str) -> String {
    world
        .player(session_id)
        .map(|p| p.room_id.clone())
        .unwrap_or_else(|| crate::world::START_ROOM_ID.to_string())
}

/// Install one side of a door: map entry, id entry, travel-point object
fn install_door(world: &mut World, room_id: &str, door_name: &str, target_id: &str) -> Uuid {
    let Some(room) = world.room_mut(room_id) else {
        return Uuid::nil();
    };
    let mut object = GameObject::new(door_name, format!("A door leading to {target_id}."));
    object.add_tag(TAG_IMMOVABLE);
    object.add_tag(TAG_TRAVEL_POINT);
    object.link_target_room_id = Some(target_id.to_string());
    let uuid = object.uuid;

    room.doors
        .insert(door_name.to_string(), target_id.to_string());
    room.door_ids.insert(door_name.to_string(), uuid);
    room.objects.insert(uuid, object);
    uuid
}

/// Remove one side of a door, returning where it used to lead
fn uninstall_door(world: &mut World, room_id: &str, door_name: &str) -> Option<String> {
    let room = world.room_mut(room_id)?;
    let target = room.doors.remove(door_name);
    if let Some(uuid) = room.door_ids.remove(door_name) {
        room.objects.remove(&uuid);
    }
    room.door_locks.remove(door_name);
    target
}

/// Pick a door name that's free on the reciprocal side: the original
/// name, then `<name> (to <source>)`, then numbered variants
fn free_door_name(room: &Room, door_name: &str, source_id: &str) -> String {
    if !room.doors.contains_key(door_name) {
        return door_name.to_string();
    }
    let variant = format!("{door_name} (to {source_id})");
    if !room.doors.contains_key(&variant) {
        return variant;
    }
    let mut n = 2usize;
    loop {
        let numbered = format!("{variant} {n}");
        if !room.doors.contains_key(&numbered) {
            return numbered;
        }
        n += 1;
    }
}

fn parse_stairs_target(world: &World, query: &str) -> Result<Option<String>, ServiceError> {
    let query = query.trim();
    if query.is_empty() || query == "none" || query == "-" {
        return Ok(None);
    }
    resolve(query, world.rooms.keys().map(String::as_str)).map(Some)
}

/// Install one side of a stair link (`going_up` from this room's view)
fn install_stairs(world: &mut World, room_id: &str, target_id: &str, going_up: bool) {
    let Some(room) = world.room_mut(room_id) else {
        return;
    };
    let name = if going_up { STAIRS_UP } else { STAIRS_DOWN };
    let mut object = GameObject::new(
        format!("stairs {name}"),
        format!("Stairs leading {name} to {target_id}."),
    );
    object.add_tag(TAG_IMMOVABLE);
    object.add_tag(TAG_TRAVEL_POINT);
    object.link_target_room_id = Some(target_id.to_string());
    let uuid = object.uuid;
    room.objects.insert(uuid, object);

    if going_up {
        room.stairs_up_to = Some(target_id.to_string());
        room.stairs_up_id = Some(uuid);
    } else {
        room.stairs_down_to = Some(target_id.to_string());
        room.stairs_down_id = Some(uuid);
    }
}

/// Clear one side of a stair link and its reciprocal on the old target
fn clear_stairs(world: &mut World, room_id: &str, going_up: bool) {
    let Some(room) = world.room_mut(room_id) else {
        return;
    };
    let (target, uuid) = if going_up {
        (room.stairs_up_to.take(), room.stairs_up_id.take())
    } else {
        (room.stairs_down_to.take(), room.stairs_down_id.take())
    };
    if let Some(uuid) = uuid {
        room.objects.remove(&uuid);
    }

    // The far side pointed back the opposite way
    let Some(target_id) = target else {
        return;
    };
    let Some(target) = world.room_mut(&target_id) else {
        return;
    };
    let (back_target, back_uuid) = if going_up {
        (&mut target.stairs_down_to, &mut target.stairs_down_id)
    } else {
        (&mut target.stairs_up_to, &mut target.stairs_up_id)
    };
    if back_target.as_deref() == Some(room_id) {
        *back_target = None;
        if let Some(uuid) = back_uuid.take() {
            target.objects.remove(&uuid);
        }
    }
}
