//! Personality-driven overrides of the regular planner
//!
//! Before an NPC plans, its personality and longer-horizon drives can
//! force a higher-priority move: stealing something shiny, bolting from a
//! threat, poking through an unexplored door. A candidate scoring 80 or
//! better pre-empts whatever the planner was going to do this tick.

use itertools::Itertools;

use super::actions::NpcAction;
use crate::world::object::{TAG_IMMOVABLE, TAG_VALUABLE};
use crate::world::World;

/// Score at or above which a candidate overrides the plan queue
pub const OVERRIDE_THRESHOLD: u32 = 80;

/// A scored impulse
#[derive(Debug, Clone, PartialEq)]
pub struct Impulse {
    pub score: u32,
    pub action: NpcAction,
    pub reason: &'static str,
}

/// Evaluate the autonomy heuristics, best candidate first. Evaluation
/// order (flee, steal, investigate) breaks score ties deterministically.
pub fn evaluate(world: &World, npc_name: &str) -> Vec<Impulse> {
    let Some(sheet) = world.npc_sheets.get(npc_name) else {
        return Vec::new();
    };
    let Some(room_id) = world.room_of_npc(npc_name) else {
        return Vec::new();
    };
    let room = &world.rooms[room_id];
    let mut impulses = Vec::new();

    // Fear first: low safety plus a perceived threat means leaving
    if sheet.extended_needs.safety < 20.0 && perceives_threat(world, npc_name) {
        if let Some((exit, _)) = room.exits().into_iter().next() {
            impulses.push(Impulse {
                score: 90,
                action: NpcAction::MoveThrough { name: exit },
                reason: "flees a threat",
            });
        }
    }

    // Greed: the irresponsible and acquisitive pocket what glitters
    if sheet.personality.responsibility < 30.0 && sheet.extended_needs.wealth_desire > 70.0 {
        let valuable = room
            .objects
            .values()
            .filter(|o| o.has_tag(TAG_VALUABLE) && !o.has_tag(TAG_IMMOVABLE))
            .sorted_by_key(|o| o.uuid)
            .next();
        if let Some(object) = valuable {
            impulses.push(Impulse {
                score: 80 + ((sheet.extended_needs.wealth_desire - 70.0) / 3.0) as u32,
                action: NpcAction::GetObject {
                    object_name: object.name.clone(),
                },
                reason: "pockets something valuable",
            });
        }
    }

    // Curiosity: an exit never taken is an invitation
    if sheet.personality.curiosity > 70.0 {
        let unexplored = room
            .exits()
            .into_iter()
            .find(|(_, target)| !sheet.remembers(&format!("visited:{target}")));
        if let Some((exit, _)) = unexplored {
            impulses.push(Impulse {
                score: 80,
                action: NpcAction::MoveThrough { name: exit },
                reason: "investigates an unexplored way",
            });
        }
    }

    // Stable by score, preserving the evaluation order on ties
    impulses.sort_by_key(|i| std::cmp::Reverse(i.score));
    impulses
}

/// A threat is any co-located character this NPC holds in deep dislike
fn perceives_threat(world: &World, npc_name: &str) -> bool {
    let Some(sheet) = world.npc_sheets.get(npc_name) else {
        return false;
    };
    let Some(room_id) = world.room_of_npc(npc_name) else {
        return false;
    };
    let room = &world.rooms[room_id];

    let disliked = |key: &str| sheet.relationships.get(key).copied().unwrap_or(0) < -50;

    let hostile_npc = room.npcs.iter().any(|other| other != npc_name && disliked(other));
    let hostile_player = room
        .players
        .iter()
        .filter_map(|s| world.display_name_of_session(s))
        .any(disliked);
    hostile_npc || hostile_player
}
