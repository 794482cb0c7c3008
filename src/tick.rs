//! The world heartbeat
//!
//! One logical scheduler walks every NPC in deterministic order (room id,
//! then name) at `TICK_SECONDS` intervals. A tick is indivisible with
//! respect to client commands except for the AI calls, which deliberately
//! run between the two locked phases. Between ticks no locks are held.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ai::AiAdapter;
use crate::config::Config;
use crate::goap;
use crate::service::OutboundMessage;
use crate::world::World;

/// Run a single tick over every NPC, returning the room broadcasts it
/// produced in action-execution order
pub async fn run_world_tick(
    world: &Mutex<World>,
    config: &Config,
    ai: Option<&Arc<AiAdapter>>,
) -> Vec<(String, OutboundMessage)> {
    // Phase A under the lock: decay, AP, invariants, overrides, offline
    // planning, and prompt building for the AI path
    let (mut out, roster, requests) = {
        let mut world = world.lock().await;
        let roster = world.npc_roster();
        let mut out = Vec::new();
        let mut requests = Vec::new();
        for (room_id, npc_name) in &roster {
            if let Some(request) =
                goap::prepare_npc(&mut world, config, room_id, npc_name, ai.is_some(), &mut out)
            {
                requests.push(request);
            }
        }
        (out, roster, requests)
    };

    // The adapter thinks while nobody holds the world
    let mut replies: Vec<(String, Option<String>)> = Vec::new();
    for request in requests {
        let reply = match ai {
            Some(adapter) => match adapter.generate(&request.prompt, 512).await {
                Ok(reply) => Some(reply),
                Err(err) => {
                    debug!("AI planning failed for {}: {err}", request.npc_name);
                    None
                }
            },
            None => None,
        };
        replies.push((request.npc_name, reply));
    }

    // Phase B under the lock: validate + install plans, then execution in
    // the same deterministic order phase A used
    {
        let mut world = world.lock().await;
        for (npc_name, reply) in &replies {
            goap::install_plan(&mut world, npc_name, reply.as_deref());
        }
        for (_, npc_name) in &roster {
            goap::execute_npc(&mut world, config, npc_name, &mut out);
        }
    }

    out
}

/// The periodic scheduler task; holds no locks between ticks, cancels
/// cleanly
pub async fn tick_loop(ctx: crate::ServerCtx, token: CancellationToken) {
    info!(
        "World tick running every {}s",
        ctx.config.tick_seconds.max(1)
    );
    let mut interval = tokio::time::interval(ctx.config.tick_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // `interval` fires immediately on creation; skip that one so the
    // world gets a full quiet interval after startup
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = token.cancelled() => return,
        }

        let broadcasts = run_world_tick(&ctx.world, &ctx.config, ctx.ai.as_ref()).await;
        let mutated = !broadcasts.is_empty();
        ctx.deliver_broadcasts(broadcasts, None).await;

        if mutated {
            let world = ctx.world.lock().await;
            ctx.persist
                .save_world(&world, &ctx.config.world_path, true);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::world::object::GameObject;
    use crate::world::sheet::CharacterSheet;
    use crate::world::START_ROOM_ID;
    use uuid::Uuid;

    /// Scenario: offline planning feeds a hungry NPC across a tick with
    /// no adapter and no players anywhere near
    #[tokio::test]
    async fn test_tick_runs_offline_goap_end_to_end() {
        let mut world = World::new_default();
        world.advanced_goap_enabled = false;
        world
            .npc_sheets
            .insert("Gareth".into(), CharacterSheet::new("Gareth", ""));
        world.npc_ids.insert("Gareth".into(), Uuid::now_v7());
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .npcs
            .insert("Gareth".into());
        {
            let sheet = world.npc_sheets.get_mut("Gareth").unwrap();
            sheet.needs.hunger = 20.0;
            sheet.planner.action_points = 3;
        }
        let mut apple = GameObject::new("apple", "");
        apple.add_tag("small");
        apple.add_tag("Edible: 30");
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .objects
            .insert(apple.uuid, apple);

        let config = Config {
            need_drop: 0.0,
            social_drop: 0.0,
            sleep_drop: 0.0,
            social_sim_tick: 0.0,
            ..Config::default()
        };
        let world = Mutex::new(world);

        let broadcasts = run_world_tick(&world, &config, None).await;

        let world = world.lock().await;
        let sheet = &world.npc_sheets["Gareth"];
        assert_eq!(sheet.needs.hunger, 50.0);
        assert_eq!(sheet.planner.action_points, 1);
        assert!(world.rooms[START_ROOM_ID].objects.is_empty());
        // The room heard about both actions, in execution order
        assert!(broadcasts[0].1.content.contains("picks up"));
        assert!(broadcasts[1].1.content.contains("eats"));
    }

    /// Two NPCs in two rooms are always visited in (room id, name) order
    #[tokio::test]
    async fn test_tick_order_is_deterministic() {
        let mut world = World::new_default();
        world
            .rooms
            .insert("attic".into(), crate::world::room::Room::new("attic", ""));
        for (room, name) in [("attic", "Zed"), (START_ROOM_ID, "Ann")] {
            world
                .npc_sheets
                .insert(name.into(), CharacterSheet::new(name, ""));
            world.npc_ids.insert(name.into(), Uuid::now_v7());
            world.rooms.get_mut(room).unwrap().npcs.insert(name.into());
            let sheet = world.npc_sheets.get_mut(name).unwrap();
            sheet.needs.socialization = 10.0;
            sheet.planner.action_points = 1;
        }

        let config = Config::default();
        let world = Mutex::new(world);
        let broadcasts = run_world_tick(&world, &config, None).await;

        // attic/Zed acts before start/Ann
        let speakers: Vec<&str> = broadcasts
            .iter()
            .filter_map(|(_, m)| m.name.as_deref())
            .collect();
        let zed = speakers.iter().position(|s| *s == "Zed");
        let ann = speakers.iter().position(|s| *s == "Ann");
        assert!(zed.unwrap() < ann.unwrap());
    }
}
