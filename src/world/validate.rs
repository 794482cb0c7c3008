//! World integrity auditing and repair
//!
//! `audit` is read-only and produces the issue list shown to admins;
//! `cleanup` applies the safe repairs. Both run on load, and on demand via
//! `/validate`.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use uuid::Uuid;

use super::object::{TAG_IMMOVABLE, TAG_TRAVEL_POINT};
use super::sheet::{Inventory, MATRIX_MAX, MATRIX_MIN};
use super::World;
use crate::goap::actions::NpcAction;

/// Outcome of an integrity audit
#[derive(Debug, Default)]
pub struct AuditReport {
    pub issues: Vec<String>,
}

impl AuditReport {
    /// 100 for a clean world, docked 5 per issue
    pub fn health_score(&self) -> u32 {
        100u32.saturating_sub(self.issues.len() as u32 * 5)
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn flag(&mut self, issue: impl Into<String>) {
        self.issues.push(issue.into());
    }
}

/// Check every documented invariant, without mutating anything
pub fn audit(world: &World) -> AuditReport {
    let mut report = AuditReport::default();

    check_uuid_uniqueness(world, &mut report);
    check_references(world, &mut report);
    check_doors(world, &mut report);
    check_stairs(world, &mut report);
    check_travel_tags(world, &mut report);
    check_inventories(world, &mut report);
    check_needs_bounds(world, &mut report);

    report
}

fn check_uuid_uniqueness(world: &World, report: &mut AuditReport) {
    let mut seen: HashMap<Uuid, String> = HashMap::new();
    let mut claim = |uuid: Uuid, what: String, report: &mut AuditReport| {
        if uuid.is_nil() {
            report.flag(format!("{what} has a nil uuid"));
            return;
        }
        if let Some(previous) = seen.insert(uuid, what.clone()) {
            report.flag(format!("duplicate uuid {uuid} on {previous} and {what}"));
        }
    };

    for room_id in world.rooms.keys().sorted() {
        let room = &world.rooms[room_id];
        claim(room.uuid, format!("room '{room_id}'"), report);
        for object in room.objects.values().sorted_by_key(|o| o.uuid) {
            claim(
                object.uuid,
                format!("object '{}' in room '{room_id}'", object.name),
                report,
            );
        }
    }
    for name in world.npc_ids.keys().sorted() {
        claim(world.npc_ids[name], format!("npc '{name}'"), report);
    }
    for user_id in world.users.keys().sorted() {
        let user = &world.users[user_id];
        claim(user.id, format!("user '{}'", user.name), report);
        for (slot, object) in user.sheet.inventory.iter() {
            claim(
                object.uuid,
                format!("object '{}' in {}'s slot {slot}", object.name, user.name),
                report,
            );
        }
    }
    for name in world.npc_sheets.keys().sorted() {
        for (slot, object) in world.npc_sheets[name].inventory.iter() {
            claim(
                object.uuid,
                format!("object '{}' in {name}'s slot {slot}", object.name),
                report,
            );
        }
    }
}

fn check_references(world: &World, report: &mut AuditReport) {
    for session_id in world.players.keys().sorted() {
        let player = &world.players[session_id];
        if !world.rooms.contains_key(&player.room_id) {
            report.flag(format!(
                "player session '{session_id}' stands in missing room '{}'",
                player.room_id
            ));
        }
        if !world.users.contains_key(&player.user_id) {
            report.flag(format!(
                "player session '{session_id}' is bound to a missing user"
            ));
        }
    }

    for name in world.npc_sheets.keys().sorted() {
        if !world.npc_ids.contains_key(name) {
            report.flag(format!("npc '{name}' has a sheet but no id"));
        }
    }

    for room_id in world.rooms.keys().sorted() {
        for npc_name in &world.rooms[room_id].npcs {
            if !world.npc_sheets.contains_key(npc_name) {
                report.flag(format!(
                    "room '{room_id}' lists npc '{npc_name}' with no sheet"
                ));
            }
        }
    }
}

fn check_doors(world: &World, report: &mut AuditReport) {
    for room_id in world.rooms.keys().sorted() {
        let room = &world.rooms[room_id];
        for (door_name, target_id) in room.doors.iter().sorted() {
            // Target room exists and has some door back
            let Some(target) = world.rooms.get(target_id) else {
                report.flag(format!(
                    "door '{door_name}' in '{room_id}' targets missing room '{target_id}'"
                ));
                continue;
            };
            if !target.doors.values().any(|t| t == room_id) {
                report.flag(format!(
                    "door '{door_name}' in '{room_id}' has no reciprocal door in '{target_id}'"
                ));
            }

            // The door object carries the affordances
            let Some(door_uuid) = room.door_ids.get(door_name) else {
                report.flag(format!(
                    "door '{door_name}' in '{room_id}' has no entry in door_ids"
                ));
                continue;
            };
            let Some(object) = room.objects.get(door_uuid) else {
                report.flag(format!(
                    "door '{door_name}' in '{room_id}' has no travel-point object"
                ));
                continue;
            };
            if object.link_target_room_id.as_deref() != Some(target_id.as_str()) {
                report.flag(format!(
                    "door object for '{door_name}' in '{room_id}' disagrees with the door map"
                ));
            }
            if !object.has_tag(TAG_IMMOVABLE) || !object.has_tag(TAG_TRAVEL_POINT) {
                report.flag(format!(
                    "door object for '{door_name}' in '{room_id}' is missing travel tags"
                ));
            }
        }
    }
}

fn check_stairs(world: &World, report: &mut AuditReport) {
    for room_id in world.rooms.keys().sorted() {
        let room = &world.rooms[room_id];
        for going_up in [true, false] {
            let direction = if going_up { "up" } else { "down" };
            let (target_id, object_id) = if going_up {
                (room.stairs_up_to.as_ref(), room.stairs_up_id.as_ref())
            } else {
                (room.stairs_down_to.as_ref(), room.stairs_down_id.as_ref())
            };
            let Some(target_id) = target_id else {
                continue;
            };
            let Some(target) = world.rooms.get(target_id) else {
                report.flag(format!(
                    "stairs {direction} in '{room_id}' target missing room '{target_id}'"
                ));
                continue;
            };
            let reciprocal = if going_up {
                target.stairs_down_to.as_deref()
            } else {
                target.stairs_up_to.as_deref()
            };
            if reciprocal != Some(room_id.as_str()) {
                report.flag(format!(
                    "stairs {direction} in '{room_id}' are not reciprocated by '{target_id}'"
                ));
            }
            match object_id.and_then(|id| room.objects.get(id)) {
                None => report.flag(format!(
                    "stairs {direction} in '{room_id}' have no travel-point object"
                )),
                Some(object) => {
                    if object.link_target_room_id.as_deref() != Some(target_id.as_str()) {
                        report.flag(format!(
                            "stairs object {direction} in '{room_id}' disagrees with the stairs map"
                        ));
                    }
                }
            }
        }
    }
}

fn check_travel_tags(world: &World, report: &mut AuditReport) {
    for room_id in world.rooms.keys().sorted() {
        let room = &world.rooms[room_id];
        for object in room.objects.values().sorted_by_key(|o| o.uuid) {
            if !object.has_tag(TAG_TRAVEL_POINT) {
                continue;
            }
            if !object.has_tag(TAG_IMMOVABLE) {
                report.flag(format!(
                    "travel point '{}' in '{room_id}' is not Immovable",
                    object.name
                ));
            }
            match &object.link_target_room_id {
                None => report.flag(format!(
                    "travel point '{}' in '{room_id}' has no link target",
                    object.name
                )),
                Some(target) if !world.rooms.contains_key(target) => report.flag(format!(
                    "travel point '{}' in '{room_id}' links to missing room '{target}'",
                    object.name
                )),
                Some(_) => {}
            }
        }
    }
}

fn check_inventories(world: &World, report: &mut AuditReport) {
    let mut check = |owner: &str, inventory: &Inventory, report: &mut AuditReport| {
        let mut seen = HashSet::new();
        for (slot, object) in inventory.iter() {
            if !seen.insert(object.uuid) {
                report.flag(format!(
                    "object '{}' appears twice in {owner}'s inventory",
                    object.name
                ));
            }
            if !Inventory::slot_accepts(slot, object.size_class()) {
                report.flag(format!(
                    "object '{}' sits in an illegal slot {slot} of {owner}'s inventory",
                    object.name
                ));
            }
        }
    };

    for user_id in world.users.keys().sorted() {
        let user = &world.users[user_id];
        check(&user.name, &user.sheet.inventory, report);
    }
    for name in world.npc_sheets.keys().sorted() {
        check(name, &world.npc_sheets[name].inventory, report);
    }
}

fn check_needs_bounds(world: &World, report: &mut AuditReport) {
    let mut check = |who: &str, sheet: &super::sheet::CharacterSheet, report: &mut AuditReport| {
        let needs = &sheet.needs;
        for (name, value) in [
            ("hunger", needs.hunger),
            ("thirst", needs.thirst),
            ("socialization", needs.socialization),
            ("sleep", needs.sleep),
        ] {
            if !(0.0..=100.0).contains(&value) || value.is_nan() {
                report.flag(format!("{who}'s {name} is out of range ({value})"));
            }
        }
        for (axis, value) in sheet.matrix.iter().sorted() {
            if !(MATRIX_MIN..=MATRIX_MAX).contains(value) {
                report.flag(format!("{who}'s matrix axis {axis} is out of range"));
            }
        }
    };

    for user_id in world.users.keys().sorted() {
        let user = &world.users[user_id];
        check(&user.name, &user.sheet, report);
    }
    for name in world.npc_sheets.keys().sorted() {
        check(name, &world.npc_sheets[name], report);
    }
}

/// Apply the safe repairs: clamp numerics, drop malformed plan entries,
/// reset inconsistent sleep state, clear ghost sessions and orphaned user
/// references
pub fn cleanup(world: &mut World) -> usize {
    let mut repairs = 0;

    // Ghost sessions from a previous process have no live binding
    for room in world.rooms.values_mut() {
        let before = room.players.len();
        room.players.retain(|s| world.players.contains_key(s));
        repairs += before - room.players.len();
    }

    // Clamp needs and matrix axes on every sheet
    let npc_names: Vec<String> = world.npc_sheets.keys().cloned().collect();
    let user_ids: Vec<Uuid> = world.users.keys().copied().collect();
    for name in &npc_names {
        if let Some(sheet) = world.npc_sheets.get_mut(name) {
            repairs += clamp_sheet(sheet);
        }
    }
    for user_id in &user_ids {
        if let Some(user) = world.users.get_mut(user_id) {
            repairs += clamp_sheet(&mut user.sheet);
        }
    }

    // Mint ids for any sheet that lost its entry
    for name in &npc_names {
        if !world.npc_ids.contains_key(name) {
            world.npc_ids.insert(name.clone(), Uuid::now_v7());
            repairs += 1;
        }
    }

    // Sleep state must point at an owned bed in the NPC's room
    for name in npc_names {
        let npc_id = world.npc_uuid(&name);
        let room_id = world.room_of_npc(&name).map(str::to_string);
        let Some(sheet) = world.npc_sheets.get(&name) else {
            continue;
        };
        let sleeping = sheet.planner.sleeping_ticks_remaining > 0;
        let bed_valid = match (sheet.planner.sleeping_bed_uuid, npc_id, room_id) {
            (Some(bed), Some(npc_id), Some(room_id)) => world.rooms[&room_id]
                .objects
                .get(&bed)
                .is_some_and(|o| o.has_tag(super::object::TAG_BED) && o.owner == Some(npc_id)),
            _ => false,
        };
        let stale_bed = !sleeping && sheet.planner.sleeping_bed_uuid.is_some();
        if (sleeping && !bed_valid) || stale_bed {
            let Some(sheet) = world.npc_sheets.get_mut(&name) else {
                continue;
            };
            sheet.planner.sleeping_ticks_remaining = 0;
            sheet.planner.sleeping_bed_uuid = None;
            repairs += 1;
        }
    }

    // Orphaned users in the relationship graph
    let live: HashSet<Uuid> = world.users.keys().copied().collect();
    let before: usize = world.relationships.values().map(HashMap::len).sum();
    world.relationships.retain(|from, _| live.contains(from));
    for edges in world.relationships.values_mut() {
        edges.retain(|to, _| live.contains(to));
    }
    let after: usize = world.relationships.values().map(HashMap::len).sum();
    repairs += before - after;

    // Orphaned users in door locks
    for room in world.rooms.values_mut() {
        for lock in room.door_locks.values_mut() {
            let before = lock.allow_ids.len() + lock.allow_rel.len();
            lock.allow_ids.retain(|id| live.contains(id));
            lock.allow_rel.retain(|(_, id)| live.contains(id));
            repairs += before - (lock.allow_ids.len() + lock.allow_rel.len());
        }
    }

    repairs
}

/// Clamp one sheet's numerics and drop malformed plan entries
fn clamp_sheet(sheet: &mut super::sheet::CharacterSheet) -> usize {
    let mut repairs = 0;

    let needs = &mut sheet.needs;
    for value in [
        &mut needs.hunger,
        &mut needs.thirst,
        &mut needs.socialization,
        &mut needs.sleep,
    ] {
        let clamped = if value.is_nan() {
            100.0
        } else {
            value.clamp(0.0, 100.0)
        };
        if *value != clamped {
            *value = clamped;
            repairs += 1;
        }
    }

    for value in sheet.matrix.values_mut() {
        let clamped = (*value).clamp(MATRIX_MIN, MATRIX_MAX);
        if *value != clamped {
            *value = clamped;
            repairs += 1;
        }
    }

    let before = sheet.planner.plan_queue.len();
    sheet
        .planner
        .plan_queue
        .retain(|step| NpcAction::parse(step).is_some());
    repairs += before - sheet.planner.plan_queue.len();

    repairs
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::world::object::{GameObject, TAG_SMALL};
    use crate::world::room::Room;
    use crate::world::sheet::{CharacterSheet, PlanStep};
    use crate::world::START_ROOM_ID;

    #[test]
    fn test_fresh_world_is_clean() {
        let world = World::new_default();
        let report = audit(&world);
        assert!(report.is_clean(), "issues: {:?}", report.issues);
        assert_eq!(report.health_score(), 100);
    }

    #[test]
    fn test_duplicate_uuid_is_flagged() {
        let mut world = World::new_default();
        let object = GameObject::new("left sock", "");
        let mut twin = GameObject::new("right sock", "");
        twin.uuid = object.uuid;
        let room = world.rooms.get_mut(START_ROOM_ID).unwrap();
        room.objects.insert(object.uuid, object);
        // Same uuid under a different key to force the collision
        let fake_key = Uuid::now_v7();
        room.objects.insert(fake_key, twin);

        let report = audit(&world);
        assert!(report.issues.iter().any(|i| i.contains("duplicate uuid")));
    }

    #[test]
    fn test_one_sided_door_is_flagged() {
        let mut world = World::new_default();
        world.rooms.insert("attic".into(), Room::new("attic", ""));
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .doors
            .insert("hatch".into(), "attic".into());

        let report = audit(&world);
        assert!(report.issues.iter().any(|i| i.contains("no reciprocal")));
    }

    #[test]
    fn test_cleanup_clamps_needs_and_drops_bad_plans() {
        let mut world = World::new_default();
        let mut sheet = CharacterSheet::new("Gareth", "");
        sheet.needs.hunger = -20.0;
        sheet.matrix.insert("humble_proud".into(), 99);
        sheet
            .planner
            .plan_queue
            .push(PlanStep::new("summon_dragon", serde_json::json!({})));
        sheet
            .planner
            .plan_queue
            .push(PlanStep::new("do_nothing", serde_json::json!({})));
        world.npc_sheets.insert("Gareth".into(), sheet);
        world.npc_ids.insert("Gareth".into(), Uuid::now_v7());
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .npcs
            .insert("Gareth".into());

        cleanup(&mut world);

        let sheet = &world.npc_sheets["Gareth"];
        assert_eq!(sheet.needs.hunger, 0.0);
        assert_eq!(sheet.matrix["humble_proud"], MATRIX_MAX);
        assert_eq!(sheet.planner.plan_queue.len(), 1);
        assert_eq!(sheet.planner.plan_queue[0].tool, "do_nothing");
    }

    #[test]
    fn test_cleanup_resets_bedless_sleep() {
        let mut world = World::new_default();
        let mut sheet = CharacterSheet::new("Gareth", "");
        sheet.planner.sleeping_ticks_remaining = 2;
        sheet.planner.sleeping_bed_uuid = Some(Uuid::now_v7());
        world.npc_sheets.insert("Gareth".into(), sheet);
        world.npc_ids.insert("Gareth".into(), Uuid::now_v7());
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .npcs
            .insert("Gareth".into());

        cleanup(&mut world);

        let planner = &world.npc_sheets["Gareth"].planner;
        assert_eq!(planner.sleeping_ticks_remaining, 0);
        assert_eq!(planner.sleeping_bed_uuid, None);
    }

    #[test]
    fn test_cleanup_prunes_deleted_users_from_locks() {
        let mut world = World::new_default();
        let ghost = Uuid::now_v7();
        let lock = crate::world::room::DoorLock {
            allow_ids: [ghost].into_iter().collect(),
            allow_rel: vec![("friend".into(), ghost)],
        };
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .door_locks
            .insert("iron gate".into(), lock);

        cleanup(&mut world);

        let lock = &world.rooms[START_ROOM_ID].door_locks["iron gate"];
        assert!(lock.allow_ids.is_empty());
        assert!(lock.allow_rel.is_empty());
    }

    #[test]
    fn test_illegal_slot_is_flagged() {
        let mut world = World::new_default();
        let mut sheet = CharacterSheet::new("Gareth", "");
        let mut boulder = GameObject::new("boulder", "");
        boulder.add_tag(crate::world::object::TAG_LARGE);
        // Force a large object into a small stow slot
        sheet.inventory.0[2] = Some(boulder);
        let mut pebble = GameObject::new("pebble", "");
        pebble.add_tag(TAG_SMALL);
        sheet.inventory.0[6] = Some(pebble);
        world.npc_sheets.insert("Gareth".into(), sheet);
        world.npc_ids.insert("Gareth".into(), Uuid::now_v7());

        let report = audit(&world);
        let slot_issues = report
            .issues
            .iter()
            .filter(|i| i.contains("illegal slot"))
            .count();
        assert_eq!(slot_issues, 2);
    }
}
