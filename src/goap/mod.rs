//! NPC autonomy: needs decay, action points, planning, execution
//!
//! Each tick runs in two phases around the (optional) AI call so the
//! world lock is never held while a model thinks:
//!
//!  - phase A (`prepare_npc`, under the lock): decay needs, regain AP,
//!    check per-tick invariants, apply autonomy overrides, and either
//!    plan offline or hand back a prompt for the AI path
//!  - the adapter runs outside the lock
//!  - phase B (`install_plan` + `execute_npc`, under the lock again):
//!    validate and install whatever came back, then spend AP on the queue

pub mod actions;
pub mod autonomy;
pub mod offline;

use itertools::Itertools;
use serde_json::json;
use tracing::debug;

use crate::config::Config;
use crate::markup::{bold, italic};
use crate::service::OutboundMessage;
use crate::world::object::TAG_BED;
use crate::world::sheet::PlanStep;
use crate::world::World;
use actions::NpcAction;

/// AI plans are capped at this many steps
pub const MAX_PLAN_STEPS: usize = 4;

/// A prompt waiting on the adapter, produced by phase A
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub npc_name: String,
    pub prompt: String,
}

/// Phase A for one NPC. Returns a request when the AI path should be
/// consulted for a fresh plan; `ai_available` is whether an adapter is
/// configured at all.
pub fn prepare_npc(
    world: &mut World,
    config: &Config,
    room_id: &str,
    npc_name: &str,
    ai_available: bool,
    out: &mut Vec<(String, OutboundMessage)>,
) -> Option<PlanRequest> {
    let alone = !world.room_has_live_player(room_id)
        && world.rooms.get(room_id).is_some_and(|r| r.npcs.len() <= 1);

    let Some(sheet) = world.npc_sheets.get_mut(npc_name) else {
        return None;
    };
    if sheet.combat.is_dead {
        return None;
    }

    // Needs decay and sleep bookkeeping
    let was_sleeping = sheet.planner.sleeping_ticks_remaining > 0;
    sheet.needs.hunger -= config.need_drop;
    sheet.needs.thirst -= config.need_drop;
    if alone {
        sheet.needs.socialization += config.social_sim_tick;
    } else {
        sheet.needs.socialization -= config.social_drop;
    }
    if was_sleeping {
        sheet.needs.sleep += config.sleep_refill;
        sheet.planner.sleeping_ticks_remaining -= 1;
        if sheet.planner.sleeping_ticks_remaining == 0 {
            sheet.planner.sleeping_bed_uuid = None;
            out.push((
                room_id.to_string(),
                OutboundMessage::npc(
                    npc_name,
                    italic(&format!("{} stirs and wakes.", bold(npc_name))),
                ),
            ));
        }
    } else {
        sheet.needs.sleep -= config.sleep_drop;
    }
    sheet.needs.clamp_all();

    // AP regeneration toward the cap
    sheet.planner.action_points = (sheet.planner.action_points + 1).min(config.ap_max);

    // Per-tick invariants: a malformed queue is dropped for a replan
    if !sheet
        .planner
        .plan_queue
        .iter()
        .all(|step| NpcAction::parse(step).is_some())
    {
        debug!("Dropping malformed plan for {npc_name}");
        sheet.planner.plan_queue.clear();
    }

    // And sleep state must point at an owned bed in this room
    if sheet.planner.sleeping_ticks_remaining > 0 {
        let npc_id = world.npc_ids.get(npc_name).copied();
        let bed_valid = {
            let sheet = &world.npc_sheets[npc_name];
            match (sheet.planner.sleeping_bed_uuid, npc_id) {
                (Some(bed), Some(npc_id)) => world.rooms[room_id]
                    .objects
                    .get(&bed)
                    .is_some_and(|o| o.has_tag(TAG_BED) && o.owner == Some(npc_id)),
                _ => false,
            }
        };
        let sheet = world.npc_sheets.get_mut(npc_name)?;
        if !bed_valid {
            sheet.planner.sleeping_ticks_remaining = 0;
            sheet.planner.sleeping_bed_uuid = None;
        } else {
            // Asleep: no overrides, no planning, no execution
            return None;
        }
    }

    // Autonomy can pre-empt whatever was queued
    let impulses = autonomy::evaluate(world, npc_name);
    if let Some(top) = impulses.first() {
        if top.score >= autonomy::OVERRIDE_THRESHOLD {
            debug!("{npc_name} {}", top.reason);
            let step = top.action.to_step();
            let sheet = world.npc_sheets.get_mut(npc_name)?;
            sheet.planner.plan_queue.insert(0, step);
        }
    }

    // Think only when idle and actually wanting for something
    let sheet = &world.npc_sheets[npc_name];
    if !sheet.planner.plan_queue.is_empty() {
        return None;
    }
    let (worst_need, worst_value) = sheet.needs.most_pressing();
    if worst_value >= config.need_threshold {
        return None;
    }

    // The AI path is gated three ways: world flag, adapter presence, and
    // a live audience
    if world.advanced_goap_enabled && ai_available && world.room_has_live_player(room_id) {
        return Some(PlanRequest {
            npc_name: npc_name.to_string(),
            prompt: build_plan_prompt(world, room_id, npc_name),
        });
    }

    let plan = offline::plan_for_need(world, npc_name, worst_need);
    let sheet = world.npc_sheets.get_mut(npc_name)?;
    sheet.planner.plan_queue = plan;
    None
}

/// Bundle world, needs, room and inventory context into the planning
/// prompt
fn build_plan_prompt(world: &World, room_id: &str, npc_name: &str) -> String {
    let sheet = &world.npc_sheets[npc_name];
    let room = &world.rooms[room_id];

    let objects = room
        .objects
        .values()
        .sorted_by_key(|o| o.uuid)
        .map(|o| {
            json!({
                "uuid": o.uuid,
                "name": o.name,
                "tags": o.tags,
            })
        })
        .collect_vec();
    let inventory = sheet
        .inventory
        .iter()
        .map(|(_, o)| json!({ "uuid": o.uuid, "name": o.name, "tags": o.tags }))
        .collect_vec();
    let exits = room.exits().into_iter().map(|(name, _)| name).collect_vec();

    format!(
        "You plan actions for {npc_name}, an inhabitant of '{world_name}' ({world_desc}). \
         Their needs (0-100, low is urgent): hunger {hunger:.0}, thirst {thirst:.0}, \
         socialization {social:.0}, sleep {sleep:.0}. \
         Personality: responsibility {resp:.0}, aggression {aggr:.0}, confidence {conf:.0}, \
         curiosity {cur:.0}. \
         Objects in the room: {objects}. Their inventory: {inventory}. Exits: {exits:?}. \
         Reply with ONLY a JSON array of at most {max} action records. Each record is \
         {{\"tool\": ..., \"args\": {{...}}}}. Tools: \
         get_object{{object_name}}, consume_object{{object_uuid}}, emote{{message?}}, \
         claim{{object_uuid}}, unclaim{{object_uuid}}, sleep{{bed_uuid?}}, do_nothing{{}}, \
         move_through{{name}}.",
        world_name = world.name,
        world_desc = world.description,
        hunger = sheet.needs.hunger,
        thirst = sheet.needs.thirst,
        social = sheet.needs.socialization,
        sleep = sheet.needs.sleep,
        resp = sheet.personality.responsibility,
        aggr = sheet.personality.aggression,
        conf = sheet.personality.confidence,
        cur = sheet.personality.curiosity,
        objects = json!(objects),
        inventory = json!(inventory),
        max = MAX_PLAN_STEPS,
    )
}

/// Install the adapter's reply for an NPC, falling back to the offline
/// planner when the reply is missing or unusable
pub fn install_plan(world: &mut World, npc_name: &str, reply: Option<&str>) {
    let parsed = reply.and_then(parse_plan_reply);
    let plan = match parsed {
        Some(plan) if !plan.is_empty() => plan,
        _ => {
            let Some(sheet) = world.npc_sheets.get(npc_name) else {
                return;
            };
            let (worst_need, _) = sheet.needs.most_pressing();
            debug!("AI plan unusable for {npc_name}, planning offline");
            offline::plan_for_need(world, npc_name, worst_need)
        }
    };
    if let Some(sheet) = world.npc_sheets.get_mut(npc_name) {
        // Only fill an idle queue; an override may have landed meanwhile
        if sheet.planner.plan_queue.is_empty() {
            sheet.planner.plan_queue = plan;
        }
    }
}

/// Best-effort extraction of a JSON action array from model output.
/// Every record must be a known tool with well-formed args, or the whole
/// reply is rejected.
fn parse_plan_reply(reply: &str) -> Option<Vec<PlanStep>> {
    let raw = reply.trim();
    let candidate = if raw.starts_with('[') {
        raw.to_string()
    } else {
        let start = raw.find('[')?;
        let end = raw.rfind(']')?;
        if end <= start {
            return None;
        }
        raw[start..=end].to_string()
    };

    let steps: Vec<PlanStep> = serde_json::from_str(&candidate).ok()?;
    let steps = steps.into_iter().take(MAX_PLAN_STEPS).collect_vec();
    if steps.iter().all(|s| NpcAction::parse(s).is_some()) {
        Some(steps)
    } else {
        None
    }
}

/// Phase B: spend action points on the plan queue. Every executed action
/// costs 1 AP, success or not.
pub fn execute_npc(
    world: &mut World,
    config: &Config,
    npc_name: &str,
    out: &mut Vec<(String, OutboundMessage)>,
) {
    loop {
        let Some(sheet) = world.npc_sheets.get_mut(npc_name) else {
            return;
        };
        if sheet.combat.is_dead
            || sheet.planner.sleeping_ticks_remaining > 0
            || sheet.planner.action_points == 0
            || sheet.planner.plan_queue.is_empty()
        {
            return;
        }

        let step = sheet.planner.plan_queue.remove(0);
        sheet.planner.action_points -= 1;

        let Some(action) = NpcAction::parse(&step) else {
            // Shouldn't happen past the invariant check; drop the rest
            sheet.planner.plan_queue.clear();
            return;
        };

        let result = actions::execute(world, config, npc_name, &action);
        if let Some(err) = result.error {
            debug!("{npc_name} action failed: {err}");
        } else {
            out.extend(result.broadcasts);
        }
    }
}

/// Mode-switch hygiene: stale plans must not outlive a change to
/// `advanced_goap_enabled`
pub fn clear_all_plans(world: &mut World) {
    for sheet in world.npc_sheets.values_mut() {
        sheet.planner.plan_queue.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::world::object::GameObject;
    use crate::world::sheet::CharacterSheet;
    use crate::world::START_ROOM_ID;
    use uuid::Uuid;

    fn world_with_npc(name: &str) -> World {
        let mut world = World::new_default();
        world
            .npc_sheets
            .insert(name.into(), CharacterSheet::new(name, ""));
        world.npc_ids.insert(name.into(), Uuid::now_v7());
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .npcs
            .insert(name.into());
        world
    }

    fn tick_once(world: &mut World, config: &Config) -> Vec<(String, OutboundMessage)> {
        let mut out = Vec::new();
        let roster = world.npc_roster();
        for (room_id, npc) in &roster {
            // ai_available=false: the offline path must carry everything
            let request = prepare_npc(world, config, room_id, npc, false, &mut out);
            assert!(request.is_none(), "no AI request expected with the gate shut");
        }
        for (_, npc) in &roster {
            execute_npc(world, config, npc, &mut out);
        }
        out
    }

    #[test]
    fn test_offline_tick_feeds_a_hungry_npc() {
        // A hungry NPC, an apple on the floor, no AI, no players
        let mut world = world_with_npc("Gareth");
        let config = Config {
            need_drop: 0.0,
            social_drop: 0.0,
            sleep_drop: 0.0,
            social_sim_tick: 0.0,
            ..Config::default()
        };
        world.npc_sheets.get_mut("Gareth").unwrap().needs.hunger = 20.0;
        world
            .npc_sheets
            .get_mut("Gareth")
            .unwrap()
            .planner
            .action_points = 3;
        let mut apple = GameObject::new("apple", "");
        apple.add_tag("small");
        apple.add_tag("Edible: 30");
        let apple_uuid = apple.uuid;
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .objects
            .insert(apple_uuid, apple);

        tick_once(&mut world, &config);

        let sheet = &world.npc_sheets["Gareth"];
        // Picked up then consumed: 20 + 30, two actions charged
        assert_eq!(sheet.needs.hunger, 50.0);
        assert_eq!(sheet.planner.action_points, 1);
        assert!(sheet.planner.plan_queue.is_empty());
        assert!(world.rooms[START_ROOM_ID].objects.is_empty());
        assert!(!sheet.inventory.contains(apple_uuid));

        // Second tick: hunger now sits at the threshold, no replanning
        tick_once(&mut world, &config);
        let sheet = &world.npc_sheets["Gareth"];
        assert_eq!(sheet.needs.hunger, 50.0);
        assert!(sheet.planner.plan_queue.is_empty());
    }

    #[test]
    fn test_needs_decay_and_clamp() {
        let mut world = world_with_npc("Gareth");
        let config = Config::default();
        world.npc_sheets.get_mut("Gareth").unwrap().needs.hunger = 0.5;

        let mut out = Vec::new();
        prepare_npc(&mut world, &config, START_ROOM_ID, "Gareth", false, &mut out);

        let needs = &world.npc_sheets["Gareth"].needs;
        assert_eq!(needs.hunger, 0.0);
        assert!((0.0..=100.0).contains(&needs.thirst));
        assert!((0.0..=100.0).contains(&needs.sleep));
    }

    #[test]
    fn test_alone_npc_self_socializes() {
        let mut world = world_with_npc("Gareth");
        let config = Config::default();
        world
            .npc_sheets
            .get_mut("Gareth")
            .unwrap()
            .needs
            .socialization = 60.0;

        let mut out = Vec::new();
        prepare_npc(&mut world, &config, START_ROOM_ID, "Gareth", false, &mut out);
        assert_eq!(
            world.npc_sheets["Gareth"].needs.socialization,
            60.0 + config.social_sim_tick
        );
    }

    #[test]
    fn test_ai_gate_requires_flag_adapter_and_audience() {
        let mut world = world_with_npc("Gareth");
        let config = Config::default();
        world.npc_sheets.get_mut("Gareth").unwrap().needs.hunger = 10.0;
        let mut out = Vec::new();

        // Flag off: no request even with an adapter and audience
        world.advanced_goap_enabled = false;
        world.players.insert(
            "sess-x".into(),
            crate::world::user::Player {
                session_id: "sess-x".into(),
                user_id: Uuid::now_v7(),
                room_id: START_ROOM_ID.into(),
            },
        );
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .players
            .insert("sess-x".into());
        let request = prepare_npc(&mut world, &config, START_ROOM_ID, "Gareth", true, &mut out);
        assert!(request.is_none());

        // Flag on, adapter present, audience present: the AI path opens
        world.advanced_goap_enabled = true;
        world.npc_sheets.get_mut("Gareth").unwrap().planner.plan_queue.clear();
        world.npc_sheets.get_mut("Gareth").unwrap().needs.hunger = 10.0;
        let request = prepare_npc(&mut world, &config, START_ROOM_ID, "Gareth", true, &mut out);
        assert!(request.is_some());
        assert!(request.unwrap().prompt.contains("Gareth"));

        // No adapter: offline even with the flag on
        world.npc_sheets.get_mut("Gareth").unwrap().planner.plan_queue.clear();
        let request = prepare_npc(&mut world, &config, START_ROOM_ID, "Gareth", false, &mut out);
        assert!(request.is_none());
    }

    #[test]
    fn test_install_plan_rejects_garbage_and_falls_back() {
        let mut world = world_with_npc("Gareth");
        world.npc_sheets.get_mut("Gareth").unwrap().needs.hunger = 10.0;

        install_plan(&mut world, "Gareth", Some("I think the NPC should fly away"));
        let plan = &world.npc_sheets["Gareth"].planner.plan_queue;
        // Fallback produced the offline do-nothing (no food around)
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].tool, "do_nothing");
    }

    #[test]
    fn test_install_plan_accepts_wrapped_json() {
        let mut world = world_with_npc("Gareth");
        let reply = r#"Here's my plan:
            [{"tool": "emote", "args": {"message": "stretches."}},
             {"tool": "do_nothing", "args": {}}]
            Hope that helps!"#;
        install_plan(&mut world, "Gareth", Some(reply));
        let plan = &world.npc_sheets["Gareth"].planner.plan_queue;
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].tool, "emote");
    }

    #[test]
    fn test_sleeping_npc_skips_planning_and_wakes() {
        let mut world = world_with_npc("Gareth");
        let config = Config::default();

        // An owned bed and an installed sleep
        let npc_id = world.npc_uuid("Gareth").unwrap();
        let mut bed = GameObject::new("cot", "");
        bed.add_tag(TAG_BED);
        bed.owner = Some(npc_id);
        let bed_uuid = bed.uuid;
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .objects
            .insert(bed_uuid, bed);
        {
            let sheet = world.npc_sheets.get_mut("Gareth").unwrap();
            sheet.planner.sleeping_ticks_remaining = 2;
            sheet.planner.sleeping_bed_uuid = Some(bed_uuid);
            sheet.needs.sleep = 10.0;
            sheet.needs.hunger = 10.0; // hungry, but asleep
        }

        let mut out = Vec::new();
        let request = prepare_npc(&mut world, &config, START_ROOM_ID, "Gareth", false, &mut out);
        assert!(request.is_none());
        {
            let sheet = &world.npc_sheets["Gareth"];
            assert!(sheet.planner.plan_queue.is_empty());
            assert_eq!(sheet.planner.sleeping_ticks_remaining, 1);
            assert!(sheet.needs.sleep > 10.0);
        }

        // Next tick wakes them
        let mut out = Vec::new();
        prepare_npc(&mut world, &config, START_ROOM_ID, "Gareth", false, &mut out);
        let sheet = &world.npc_sheets["Gareth"];
        assert_eq!(sheet.planner.sleeping_ticks_remaining, 0);
        assert_eq!(sheet.planner.sleeping_bed_uuid, None);
        assert!(out.iter().any(|(_, m)| m.content.contains("wakes")));
    }

    #[test]
    fn test_failed_actions_still_cost_ap() {
        let mut world = world_with_npc("Gareth");
        let config = Config::default();
        {
            let sheet = world.npc_sheets.get_mut("Gareth").unwrap();
            sheet.planner.action_points = 3;
            // A plan that can't succeed: no such object anywhere
            sheet.planner.plan_queue = vec![
                NpcAction::GetObject {
                    object_name: "phantom".into(),
                }
                .to_step(),
                NpcAction::DoNothing.to_step(),
            ];
        }

        let mut out = Vec::new();
        execute_npc(&mut world, &config, "Gareth", &mut out);
        let sheet = &world.npc_sheets["Gareth"];
        // Both steps charged despite the first failing
        assert_eq!(sheet.planner.action_points, 1);
        assert!(sheet.planner.plan_queue.is_empty());
    }

    #[test]
    fn test_clear_all_plans() {
        let mut world = world_with_npc("Gareth");
        world
            .npc_sheets
            .get_mut("Gareth")
            .unwrap()
            .planner
            .plan_queue = vec![NpcAction::DoNothing.to_step()];
        clear_all_plans(&mut world);
        assert!(world.npc_sheets["Gareth"].planner.plan_queue.is_empty());
    }
}
