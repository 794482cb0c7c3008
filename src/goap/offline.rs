//! The deterministic offline planner
//!
//! Always available, no model required: pick the most unsatisfied need
//! and produce the shortest plan that serves it. Anything it can't serve
//! becomes a do-nothing beat so the NPC still visibly exists.

use itertools::Itertools;

use super::actions::NpcAction;
use crate::world::object::{TAG_BED, TAG_IMMOVABLE};
use crate::world::sheet::PlanStep;
use crate::world::World;

/// Plan for an NPC whose worst need is `need_name`
pub fn plan_for_need(world: &World, npc_name: &str, need_name: &str) -> Vec<PlanStep> {
    let actions = match need_name {
        "hunger" => consumable_plan(world, npc_name, |o| o.is_edible()),
        "thirst" => consumable_plan(world, npc_name, |o| o.is_drinkable()),
        "socialization" => social_plan(world, npc_name),
        "sleep" => sleep_plan(world, npc_name),
        _ => vec![NpcAction::DoNothing],
    };
    actions.iter().map(NpcAction::to_step).collect()
}

/// Eat/drink from inventory if possible, fetch from the room floor
/// otherwise
fn consumable_plan(
    world: &World,
    npc_name: &str,
    matches: impl Fn(&crate::world::object::GameObject) -> bool,
) -> Vec<NpcAction> {
    let Some(sheet) = world.npc_sheets.get(npc_name) else {
        return vec![NpcAction::DoNothing];
    };

    // Something already in hand?
    if let Some((_, object)) = sheet
        .inventory
        .iter()
        .filter(|(_, o)| matches(o))
        .sorted_by_key(|(_, o)| o.uuid)
        .next()
    {
        return vec![NpcAction::ConsumeObject {
            object_uuid: object.uuid,
        }];
    }

    // Something on the floor?
    let Some(room_id) = world.room_of_npc(npc_name) else {
        return vec![NpcAction::DoNothing];
    };
    if let Some(object) = world.rooms[room_id]
        .objects
        .values()
        .filter(|o| matches(o) && !o.has_tag(TAG_IMMOVABLE))
        .sorted_by_key(|o| o.uuid)
        .next()
    {
        return vec![
            NpcAction::GetObject {
                object_name: object.name.clone(),
            },
            NpcAction::ConsumeObject {
                object_uuid: object.uuid,
            },
        ];
    }

    vec![NpcAction::DoNothing]
}

/// Strike up something if anyone's listening, otherwise a small beat
fn social_plan(world: &World, npc_name: &str) -> Vec<NpcAction> {
    let Some(room_id) = world.room_of_npc(npc_name) else {
        return vec![NpcAction::DoNothing];
    };
    let room = &world.rooms[room_id];
    let has_listener =
        world.room_has_live_player(room_id) || room.npcs.iter().any(|n| n != npc_name);
    if has_listener {
        vec![NpcAction::Emote {
            message: Some("strikes up a bit of conversation.".to_string()),
        }]
    } else {
        vec![NpcAction::Emote { message: None }]
    }
}

/// Sleep in an owned bed; claim a free one first if need be
fn sleep_plan(world: &World, npc_name: &str) -> Vec<NpcAction> {
    let Some(npc_id) = world.npc_uuid(npc_name) else {
        return vec![NpcAction::DoNothing];
    };
    let Some(room_id) = world.room_of_npc(npc_name) else {
        return vec![NpcAction::DoNothing];
    };
    let beds = world.rooms[room_id]
        .objects
        .values()
        .filter(|o| o.has_tag(TAG_BED))
        .sorted_by_key(|o| o.uuid)
        .collect_vec();

    if let Some(own_bed) = beds.iter().find(|o| o.owner == Some(npc_id)) {
        return vec![NpcAction::Sleep {
            bed_uuid: Some(own_bed.uuid),
        }];
    }
    if let Some(free_bed) = beds.iter().find(|o| o.owner.is_none()) {
        return vec![
            NpcAction::Claim {
                object_uuid: free_bed.uuid,
            },
            NpcAction::Sleep {
                bed_uuid: Some(free_bed.uuid),
            },
        ];
    }
    vec![NpcAction::DoNothing]
}
