//! Combat: attack, damage, morale, fleeing
//!
//! Damage is `max(1, strength/2 + weapon - armor)`. A hit NPC may yield
//! (low hp, or a morale roll gone bad); yielded NPCs keep taking damage
//! but stop retaliating. Death removes an NPC from its room while the
//! sheet stays for the record.

use rand::Rng;

use super::{OutboundMessage, ServiceResult};
use crate::error::ServiceError;
use crate::locks;
use crate::markup::{bold, color};
use crate::resolve::resolve;
use crate::world::object::{AFFORDANCE_DAMAGE, AFFORDANCE_DEFENSE};
use crate::world::room::{STAIRS_DOWN, STAIRS_UP};
use crate::world::sheet::CharacterSheet;
use crate::world::World;

/// Hp fraction at or under which an NPC yields outright
const YIELD_HP_FRACTION: f32 = 0.3;

fn weapon_damage(sheet: &CharacterSheet) -> i32 {
    sheet
        .combat
        .equipped_weapon
        .and_then(|uuid| sheet.inventory.get(uuid))
        .and_then(|weapon| weapon.tag_number(AFFORDANCE_DAMAGE))
        .unwrap_or(0)
}

fn armor_defense(sheet: &CharacterSheet) -> i32 {
    sheet
        .combat
        .equipped_armor
        .and_then(|uuid| sheet.inventory.get(uuid))
        .and_then(|armor| armor.tag_number(AFFORDANCE_DEFENSE))
        .unwrap_or(0)
}

fn damage_roll(attacker: &CharacterSheet, defender: &CharacterSheet) -> i32 {
    (attacker.attributes.strength / 2 + weapon_damage(attacker) - armor_defense(defender)).max(1)
}

/// Attack a named NPC or player in the actor's room
pub fn attack(
    world: &mut World,
    session_id: &str,
    target_query: &str,
    rng: &mut impl Rng,
) -> ServiceResult {
    let Some(room) = world.room_of_session(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let room_id = room.id.clone();

    // Targets: NPCs by name, plus other players by display name
    let npc_names: Vec<String> = room.npcs.iter().cloned().collect();
    let player_names: Vec<(String, String)> = room
        .players
        .iter()
        .filter(|s| *s != session_id)
        .filter_map(|s| {
            world
                .display_name_of_session(s)
                .map(|n| (n.to_string(), s.clone()))
        })
        .collect();
    let target_name = match resolve(
        target_query,
        npc_names
            .iter()
            .map(String::as_str)
            .chain(player_names.iter().map(|(n, _)| n.as_str())),
    ) {
        Ok(name) => name,
        Err(err) => return ServiceResult::err(err),
    };

    let attacker_name = world
        .display_name_of_session(session_id)
        .unwrap_or("Someone")
        .to_string();
    let Some(attacker_sheet) = world.sheet_for_session(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let attacker_sheet = attacker_sheet.clone();

    if npc_names.contains(&target_name) {
        attack_npc(
            world,
            session_id,
            &room_id,
            &attacker_name,
            &attacker_sheet,
            &target_name,
            rng,
        )
    } else {
        let Some((_, target_session)) = player_names.iter().find(|(n, _)| *n == target_name)
        else {
            return ServiceResult::err(ServiceError::Integrity);
        };
        attack_player(
            world,
            &room_id,
            &attacker_name,
            &attacker_sheet,
            &target_name,
            &target_session.clone(),
        )
    }
}

fn attack_npc(
    world: &mut World,
    session_id: &str,
    room_id: &str,
    attacker_name: &str,
    attacker_sheet: &CharacterSheet,
    target_name: &str,
    rng: &mut impl Rng,
) -> ServiceResult {
    let Some(target) = world.npc_sheets.get_mut(target_name) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if target.combat.is_dead {
        return ServiceResult::err(ServiceError::validation(format!(
            "{target_name} is past hurting."
        )));
    }

    let dmg = damage_roll(attacker_sheet, target);
    target.derived.hp -= dmg;

    let mut result = ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "You hit {} for {dmg}.",
            bold(target_name)
        )))
        .broadcast(
            room_id.to_string(),
            OutboundMessage::system(format!(
                "{} strikes {}.",
                bold(attacker_name),
                bold(target_name)
            )),
        )
        .saving();

    if target.derived.hp <= 0 {
        target.combat.is_dead = true;
        target.planner.plan_queue.clear();
        // Gone from the room, remembered in the sheets
        if let Some(room) = world.room_mut(room_id) {
            room.npcs.remove(target_name);
        }
        return result.broadcast(
            room_id.to_string(),
            OutboundMessage::system(format!("{} falls and does not get up.", bold(target_name))),
        );
    }

    // Morale check: badly hurt, or a roll against composure
    if !target.combat.yielded {
        let hp_fraction = target.derived.hp as f32 / target.derived.max_hp.max(1) as f32;
        let roll = rng.random_range(1..=100) as f32 + target.combat.morale as f32
            + target.personality.confidence
            - target.personality.aggression;
        if hp_fraction <= YIELD_HP_FRACTION || roll < 50.0 {
            target.combat.yielded = true;
            result = result.broadcast(
                room_id.to_string(),
                OutboundMessage::system(format!("{} yields!", bold(target_name))),
            );
            return result;
        }

        // Still standing and still willing: the NPC hits back
        let counter = damage_roll(target, attacker_sheet);
        let Some(attacker) = world.sheet_for_session_mut(session_id) else {
            return result;
        };
        attacker.derived.hp -= counter;
        let died = attacker.derived.hp <= 0;
        if died {
            attacker.combat.is_dead = true;
        }
        result = result
            .emit(OutboundMessage::system(format!(
                "{} hits you back for {counter}.",
                bold(target_name)
            )))
            .broadcast(
                room_id.to_string(),
                OutboundMessage::system(format!(
                    "{} strikes {} in return.",
                    bold(target_name),
                    bold(attacker_name)
                )),
            );
        if died {
            result = result
                .emit(OutboundMessage::system(color(
                    "red",
                    "Everything goes dark. You are dead.",
                )))
                .broadcast(
                    room_id.to_string(),
                    OutboundMessage::system(format!("{} collapses.", bold(attacker_name))),
                );
        }
    }

    result
}

fn attack_player(
    world: &mut World,
    room_id: &str,
    attacker_name: &str,
    attacker_sheet: &CharacterSheet,
    target_name: &str,
    target_session: &str,
) -> ServiceResult {
    let Some(target) = world.sheet_for_session_mut(target_session) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if target.combat.is_dead {
        return ServiceResult::err(ServiceError::validation(format!(
            "{target_name} is past hurting."
        )));
    }

    let dmg = damage_roll(attacker_sheet, target);
    target.derived.hp -= dmg;
    let died = target.derived.hp <= 0;
    if died {
        target.combat.is_dead = true;
    }

    let mut result = ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "You hit {} for {dmg}.",
            bold(target_name)
        )))
        .broadcast(
            room_id.to_string(),
            OutboundMessage::system(format!(
                "{} strikes {}.",
                bold(attacker_name),
                bold(target_name)
            )),
        )
        .saving();
    result.directs.push((
        target_session.to_string(),
        OutboundMessage::system(format!("{} hits you for {dmg}.", bold(attacker_name))),
    ));
    if died {
        result.directs.push((
            target_session.to_string(),
            OutboundMessage::system(color("red", "Everything goes dark. You are dead.")),
        ));
        result = result.broadcast(
            room_id.to_string(),
            OutboundMessage::system(format!("{} collapses.", bold(target_name))),
        );
    }
    result
}

/// Run for a random reachable exit: filter by lock permission, then pick
/// uniformly among what's left
pub fn flee(world: &mut World, session_id: &str, rng: &mut impl Rng) -> ServiceResult {
    let Some(player) = world.player(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let actor_id = player.user_id;
    let room_id = player.room_id.clone();
    let Some(sheet) = world.sheet_for_session(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if sheet.combat.is_dead {
        return ServiceResult::err(ServiceError::permission(
            "The dead don't run anywhere.".to_string(),
        ));
    }
    if sheet.combat.yielded {
        return ServiceResult::err(ServiceError::permission(
            "You've yielded; the fight is over for you.".to_string(),
        ));
    }

    let Some(room) = world.room(&room_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let mut reachable: Vec<String> = room
        .exits()
        .into_iter()
        .filter(|(name, _)| {
            let is_stairs = name == STAIRS_UP || name == STAIRS_DOWN;
            is_stairs || !locks::door_denies(world, &room_id, name, actor_id)
        })
        .map(|(name, _)| name)
        .collect();
    reachable.sort_unstable();

    if reachable.is_empty() {
        return ServiceResult::err(ServiceError::constraint(
            "There's nowhere to run.".to_string(),
        ));
    }
    let exit = reachable[rng.random_range(0..reachable.len())].clone();
    super::movement::traverse(world, session_id, &exit)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::room::{add_door, create_room, lock_door};
    use crate::world::user::{Player, User};
    use crate::world::START_ROOM_ID;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

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
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .players
            .insert(session.clone());
        (world, session)
    }

    fn add_npc(world: &mut World, name: &str) {
        world
            .npc_sheets
            .insert(name.into(), CharacterSheet::new(name, ""));
        world.npc_ids.insert(name.into(), uuid::Uuid::now_v7());
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .npcs
            .insert(name.into());
    }

    #[test]
    fn test_damage_floor_is_one() {
        let attacker = CharacterSheet::new("A", "");
        let mut defender = CharacterSheet::new("D", "");
        // Strength 3 -> 3/2 = 1; heavy notional armor cannot push below 1
        let mut armored = attacker.clone();
        armored.attributes.strength = 3;
        assert_eq!(damage_roll(&armored, &defender), 1);
        defender.attributes.strength = 3;
        assert_eq!(damage_roll(&attacker, &defender), 5);
    }

    #[test]
    fn test_npc_death_removes_from_room_keeps_sheet() {
        let (mut world, session) = world_with_session();
        add_npc(&mut world, "Gareth");
        world.npc_sheets.get_mut("Gareth").unwrap().derived.hp = 3;

        let mut rng = StdRng::seed_from_u64(7);
        let result = attack(&mut world, &session, "Gareth", &mut rng);
        assert!(!result.is_err());

        assert!(!world.rooms[START_ROOM_ID].npcs.contains("Gareth"));
        let sheet = &world.npc_sheets["Gareth"];
        assert!(sheet.combat.is_dead);
    }

    #[test]
    fn test_low_hp_forces_yield() {
        let (mut world, session) = world_with_session();
        add_npc(&mut world, "Gareth");
        {
            let sheet = world.npc_sheets.get_mut("Gareth").unwrap();
            sheet.derived.max_hp = 20;
            sheet.derived.hp = 9; // 5 damage lands it at 4/20 = 20%
            sheet.combat.morale = 100;
            sheet.personality.confidence = 100.0;
            sheet.personality.aggression = 0.0;
        }

        let mut rng = StdRng::seed_from_u64(7);
        let result = attack(&mut world, &session, "Gareth", &mut rng);
        assert!(!result.is_err());
        assert!(world.npc_sheets["Gareth"].combat.yielded);

        // A yielded NPC takes more damage but never hits back
        let hp_before = world.sheet_for_session(&session).unwrap().derived.hp;
        attack(&mut world, &session, "Gareth", &mut rng);
        let hp_after = world.sheet_for_session(&session).unwrap().derived.hp;
        assert_eq!(hp_before, hp_after);
    }

    #[test]
    fn test_flee_filters_locked_doors_first() {
        let (mut world, session) = world_with_session();
        create_room(&mut world, "vault", "");
        create_room(&mut world, "yard", "");
        add_door(&mut world, &session, "iron gate", "vault");
        add_door(&mut world, &session, "back door", "yard");
        // Lock the vault against everyone
        lock_door(&mut world, &session, "iron gate", "friend:Alice");
        world.relationships.clear();

        // However the dice land, the only legal flight is the back door
        for seed in 0..10 {
            let mut fresh = world.clone();
            let mut rng = StdRng::seed_from_u64(seed);
            let result = flee(&mut fresh, &session, &mut rng);
            assert!(!result.is_err(), "{:?}", result.error);
            assert_eq!(fresh.players[&session].room_id, "yard");
        }
    }

    #[test]
    fn test_dead_and_yielded_cannot_flee() {
        let (mut world, session) = world_with_session();
        let mut rng = StdRng::seed_from_u64(1);

        world
            .sheet_for_session_mut(&session)
            .unwrap()
            .combat
            .yielded = true;
        assert!(matches!(
            flee(&mut world, &session, &mut rng).error,
            Some(ServiceError::Permission(_))
        ));

        world
            .sheet_for_session_mut(&session)
            .unwrap()
            .combat
            .is_dead = true;
        assert!(matches!(
            flee(&mut world, &session, &mut rng).error,
            Some(ServiceError::Permission(_))
        ));
    }
}
