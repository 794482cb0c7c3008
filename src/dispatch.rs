//! Command routing
//!
//! Input from a playing session walks an ordered chain of routers; the
//! first one that recognizes the verb handles it and the rest never see
//! it. Anything no router claims is treated as speech. Routing itself is
//! synchronous and runs under the world lock; commands that need the AI
//! adapter return a job description instead, so the call can happen with
//! the lock released.

use tracing::error;

use crate::config::Config;
use crate::error::ServiceError;
use crate::service::{
    chat, combat, interact, movement, npc, object, player, room, trade, OutboundMessage,
    ServiceResult,
};
use crate::world::validate;
use crate::world::{SafetyLevel, World};

/// What routing decided; most commands finish inside `route`, the rest
/// carry instructions back to the async caller
pub enum RouteOutcome {
    Done(ServiceResult),
    /// Deliver, then close this session
    Quit(ServiceResult),
    /// Deliver, then cancel the target's connection
    Kick {
        target_session: String,
        result: ServiceResult,
    },
    /// Caller renders persistence stats (they live outside the world)
    Stats,
    /// Caller runs the adapter (or fallback) and then `install_dialogue`
    AiDialogue {
        npc_name: String,
        prompt: String,
        said: String,
    },
    /// Caller runs the adapter (or fallback) and then `install_generated`
    AiGenerate { room_id: String, prompt: String },
}

/// Route one line from a playing session
pub fn route(world: &mut World, config: &Config, session_id: &str, line: &str) -> RouteOutcome {
    let line = line.trim();
    if line.is_empty() {
        return RouteOutcome::Done(ServiceResult::handled());
    }

    // Dead characters get a very short menu
    if world
        .sheet_for_session(session_id)
        .is_some_and(|s| s.combat.is_dead)
    {
        let verb = first_word(line).to_lowercase();
        if !matches!(verb.as_str(), "/help" | "/who" | "look" | "l") {
            return RouteOutcome::Done(ServiceResult::err(ServiceError::permission(
                "You are dead. /help, /who and look are all that's left to you.",
            )));
        }
    }

    if let Some(rest) = line.strip_prefix('/') {
        route_slash(world, config, session_id, rest)
    } else {
        route_bare(world, config, session_id, line)
    }
}

/// Unslashed input: introspection, interaction verbs, movement, speech
fn route_bare(world: &mut World, config: &Config, session_id: &str, line: &str) -> RouteOutcome {
    // `@Gareth how are you?` addresses an NPC directly
    if let Some(addressed) = line.strip_prefix('@') {
        let npc_query = first_word(addressed);
        let text = addressed[npc_query.len()..].trim();
        if npc_query.is_empty() || text.is_empty() {
            return RouteOutcome::Done(ServiceResult::err(ServiceError::validation(
                "Say what, and to whom? Try @name <something>.",
            )));
        }
        return match chat::dialogue_prompt(world, session_id, npc_query, text) {
            Ok((npc_name, prompt)) => RouteOutcome::AiDialogue {
                npc_name,
                prompt,
                said: text.to_string(),
            },
            Err(err) => RouteOutcome::Done(ServiceResult::err(err)),
        };
    }

    let verb = first_word(line).to_lowercase();
    let rest = line[first_word(line).len()..].trim();

    let result = match verb.as_str() {
        "look" | "l" => player::look(world, session_id),
        "pick" => match rest.strip_prefix("up ") {
            Some(target) => interact::pick_up(world, session_id, target),
            None => ServiceResult::err(ServiceError::validation("Pick up what?")),
        },
        "take" | "get" => interact::pick_up(world, session_id, rest),
        "drop" => interact::drop_object(world, session_id, rest),
        "eat" => interact::eat(world, session_id, rest),
        "drink" => interact::drink(world, session_id, rest),
        "wield" => interact::wield(world, session_id, rest),
        "open" => interact::open(world, session_id, rest),
        "search" => interact::search(world, session_id, rest),
        "claim" => interact::claim(world, session_id, rest),
        "unclaim" => interact::unclaim(world, session_id, rest),
        "cut" => interact::cut(world, session_id, rest),
        "craft" => interact::craft(world, session_id, rest),
        "interact" => interact::list_actions(world, session_id, rest),
        "go" | "enter" => movement::traverse(world, session_id, rest),
        "up" | "down" if rest.is_empty() => movement::traverse(world, session_id, &verb),
        // Anything else is the player talking
        _ => chat::say(
            world,
            session_id,
            line,
            config.max_message_len,
            config.social_refill,
        ),
    };
    RouteOutcome::Done(result)
}

/// Slash commands; player-facing first, admin surface behind the gate
fn route_slash(world: &mut World, config: &Config, session_id: &str, rest: &str) -> RouteOutcome {
    let verb = first_word(rest).to_lowercase();
    let args = rest[first_word(rest).len()..].trim();

    // Player-facing commands
    match verb.as_str() {
        "help" => return RouteOutcome::Done(player::help()),
        "who" => return RouteOutcome::Done(player::who(world)),
        "sheet" => return RouteOutcome::Done(player::own_sheet(world, session_id)),
        "inventory" | "inv" => return RouteOutcome::Done(player::inventory(world, session_id)),
        "rename" => return RouteOutcome::Done(player::rename(world, session_id, args)),
        "describe" => return RouteOutcome::Done(player::describe(world, session_id, args)),
        "say" => {
            return RouteOutcome::Done(chat::say(
                world,
                session_id,
                args,
                config.max_message_len,
                config.social_refill,
            ))
        }
        "emote" | "me" => {
            return RouteOutcome::Done(chat::emote(
                world,
                session_id,
                args,
                config.max_message_len,
                config.social_refill,
            ))
        }
        "whisper" => {
            let parts = pipes(args);
            if parts.len() != 2 {
                return RouteOutcome::Done(ServiceResult::err(ServiceError::validation(
                    "Usage: /whisper <name> | <text>",
                )));
            }
            return RouteOutcome::Done(chat::whisper(
                world,
                session_id,
                &parts[0],
                &parts[1],
                config.max_message_len,
            ));
        }
        "talk" => {
            let parts = pipes(args);
            if parts.len() != 2 {
                return RouteOutcome::Done(ServiceResult::err(ServiceError::validation(
                    "Usage: /talk <npc> | <text>",
                )));
            }
            return match chat::dialogue_prompt(world, session_id, &parts[0], &parts[1]) {
                Ok((npc_name, prompt)) => RouteOutcome::AiDialogue {
                    npc_name,
                    prompt,
                    said: parts[1].clone(),
                },
                Err(err) => RouteOutcome::Done(ServiceResult::err(err)),
            };
        }
        "attack" => {
            return RouteOutcome::Done(combat::attack(
                world,
                session_id,
                args,
                &mut rand::rng(),
            ))
        }
        "flee" => return RouteOutcome::Done(combat::flee(world, session_id, &mut rand::rng())),
        "trade" => return RouteOutcome::Done(route_trade(world, session_id, args)),
        "quit" => {
            return RouteOutcome::Quit(
                ServiceResult::handled()
                    .emit(OutboundMessage::system("Until next time."))
                    .saving_now(),
            )
        }
        "auth" if first_word(args).eq_ignore_ascii_case("list_admins") => {
            let mut admins: Vec<&str> = world
                .users
                .values()
                .filter(|u| u.is_admin)
                .map(|u| u.name.as_str())
                .collect();
            admins.sort_unstable();
            return RouteOutcome::Done(
                ServiceResult::handled().emit(OutboundMessage::system(format!(
                    "Admins: {}.",
                    admins.join(", ")
                ))),
            );
        }
        _ => {}
    }

    // Everything below is the admin surface
    if !is_admin(world, session_id) {
        return RouteOutcome::Done(ServiceResult::err(ServiceError::permission(
            "That's an admin matter.",
        )));
    }

    match verb.as_str() {
        "auth" => RouteOutcome::Done(route_auth_admin(world, args)),
        "room" => RouteOutcome::Done(route_room(world, session_id, args)),
        "npc" => route_npc(world, session_id, args),
        "template" => RouteOutcome::Done(route_template(world, args)),
        "object" => RouteOutcome::Done(route_object(world, session_id, args)),
        "kick" => route_kick(world, session_id, args),
        "purge" => RouteOutcome::Done(purge(world)),
        "safety" => RouteOutcome::Done(set_safety(world, args)),
        "goap" => RouteOutcome::Done(set_goap(world, args)),
        "validate" => RouteOutcome::Done(run_validate(world)),
        "stats" => RouteOutcome::Stats,
        _ => RouteOutcome::Done(ServiceResult::err(ServiceError::validation(format!(
            "No such command: /{verb}. Try /help."
        )))),
    }
}

fn route_trade(world: &mut World, session_id: &str, args: &str) -> ServiceResult {
    let sub = first_word(args).to_lowercase();
    let rest = args[first_word(args).len()..].trim();
    match sub.as_str() {
        "offer" => trade::offer(world, session_id, rest),
        "accept" => trade::accept(world, session_id),
        "reject" => trade::cancel(world, session_id, "reject"),
        "cancel" => trade::cancel(world, session_id, "cancel"),
        "" => ServiceResult::err(ServiceError::validation(
            "Usage: /trade <player>, then /trade offer|accept|reject|cancel.",
        )),
        _ => trade::initiate(world, session_id, args),
    }
}

fn route_auth_admin(world: &mut World, args: &str) -> ServiceResult {
    let sub = first_word(args).to_lowercase();
    let name = args[first_word(args).len()..].trim();
    let set_admin = |world: &mut World, name: &str, value: bool, verb: &str| {
        let Some(user) = world.user_by_name_mut(name) else {
            return ServiceResult::err(ServiceError::not_found(format!(
                "No user called '{name}'."
            )));
        };
        user.is_admin = value;
        ServiceResult::handled()
            .emit(OutboundMessage::system(format!("{name} {verb}.")))
            .saving()
    };
    match sub.as_str() {
        "promote" => set_admin(world, name, true, "is now an admin"),
        "demote" => set_admin(world, name, false, "is no longer an admin"),
        _ => ServiceResult::err(ServiceError::validation(
            "Usage: /auth promote|demote <name>, /auth list_admins",
        )),
    }
}

fn route_room(world: &mut World, session_id: &str, args: &str) -> ServiceResult {
    let sub = first_word(args).to_lowercase();
    let rest = args[first_word(args).len()..].trim();
    let parts = pipes(rest);
    match (sub.as_str(), parts.len()) {
        ("create", 2) => room::create_room(world, &parts[0], &parts[1]),
        ("setdesc", 2) => room::set_description(world, session_id, &parts[0], &parts[1]),
        ("adddoor", 2) => room::add_door(world, session_id, &parts[0], &parts[1]),
        ("removedoor", 1) => room::remove_door(world, session_id, &parts[0]),
        ("linkdoor", 4) => room::link_doors(world, &parts[0], &parts[1], &parts[2], &parts[3]),
        ("setstairs", 2) => room::set_stairs(world, session_id, &parts[0], &parts[1]),
        ("lockdoor", 2) => room::lock_door(world, session_id, &parts[0], &parts[1]),
        _ => ServiceResult::err(ServiceError::validation(
            "Usage: /room create <id> | <desc>; setdesc <id> | <desc>; adddoor <name> | <target>; \
             removedoor <name>; linkdoor <a> | <da> | <b> | <db>; setstairs <up> | <down>; \
             lockdoor <door> | <policy>",
        )),
    }
}

fn route_npc(world: &mut World, session_id: &str, args: &str) -> RouteOutcome {
    let sub = first_word(args).to_lowercase();
    let rest = args[first_word(args).len()..].trim();
    let parts = pipes(rest);

    if sub.as_str() == "generate" {
        // Contextual (bare) or explicit (room | name | desc)
        let (room_id, name_hint, desc_hint) = if rest.is_empty() {
            let room_id = world
                .player(session_id)
                .map(|p| p.room_id.clone())
                .unwrap_or_else(|| crate::world::START_ROOM_ID.to_string());
            (room_id, None, None)
        } else if parts.len() == 3 {
            let current = world
                .player(session_id)
                .map(|p| p.room_id.clone())
                .unwrap_or_default();
            let room_id = match crate::resolve::resolve_room(
                &parts[0],
                &current,
                world.rooms.keys().map(String::as_str),
            ) {
                Ok(id) => id,
                Err(err) => return RouteOutcome::Done(ServiceResult::err(err)),
            };
            (room_id, Some(parts[1].clone()), Some(parts[2].clone()))
        } else {
            return RouteOutcome::Done(ServiceResult::err(ServiceError::validation(
                "Usage: /npc generate, or /npc generate <room> | <name> | <desc>",
            )));
        };
        let prompt = npc::generation_prompt(
            world,
            &room_id,
            name_hint.as_deref(),
            desc_hint.as_deref(),
        );
        return RouteOutcome::AiGenerate { room_id, prompt };
    }

    // `/npc remove <room> <name>` also works without the pipe
    if sub.as_str() == "remove" && !rest.contains('|') && rest.split_whitespace().count() >= 2 {
        let room_arg = first_word(rest);
        let name_arg = rest[room_arg.len()..].trim();
        return RouteOutcome::Done(npc::remove_npc(world, session_id, room_arg, name_arg));
    }

    let result = match (sub.as_str(), parts.len()) {
        ("add", 3) => npc::add_npc(world, session_id, &parts[0], &parts[1], &parts[2]),
        ("remove", 2) => npc::remove_npc(world, session_id, &parts[0], &parts[1]),
        ("setdesc", 2) => npc::set_npc_description(world, &parts[0], &parts[1]),
        ("setattr", 3) => npc::set_npc_attribute(world, &parts[0], &parts[1], &parts[2]),
        ("setaspect", 3) => npc::set_npc_aspect(world, &parts[0], &parts[1], &parts[2]),
        ("setmatrix", 3) => npc::set_npc_matrix(world, &parts[0], &parts[1], &parts[2]),
        ("sheet", 1) => npc::npc_sheet(world, &parts[0]),
        _ => ServiceResult::err(ServiceError::validation(
            "Usage: /npc add <room> | <name> | <desc>; remove <room> | <name>; \
             setdesc <name> | <desc>; setattr|setaspect|setmatrix <name> | <key> | <value>; \
             sheet <name>; generate [...]",
        )),
    };
    RouteOutcome::Done(result)
}

fn route_template(world: &mut World, args: &str) -> ServiceResult {
    let sub = first_word(args).to_lowercase();
    let rest = args[first_word(args).len()..].trim();
    let parts = pipes(rest);
    match (sub.as_str(), parts.len()) {
        ("create", 4) => {
            object::create_template(world, &parts[0], &parts[1], &parts[2], &parts[3])
        }
        ("delete", 1) => object::delete_template(world, &parts[0]),
        ("list", _) if rest.is_empty() => object::list_templates(world),
        _ => ServiceResult::err(ServiceError::validation(
            "Usage: /template create <key> | <name> | <desc> | <tags csv>; delete <key>; list",
        )),
    }
}

fn route_object(world: &mut World, session_id: &str, args: &str) -> ServiceResult {
    let sub = first_word(args).to_lowercase();
    let rest = args[first_word(args).len()..].trim();
    match sub.as_str() {
        "spawn" if !rest.is_empty() => object::spawn_object(world, session_id, rest),
        "delete" if !rest.is_empty() => object::delete_object(world, session_id, rest),
        _ => ServiceResult::err(ServiceError::validation(
            "Usage: /object spawn <template>; /object delete <name>",
        )),
    }
}

fn route_kick(world: &mut World, session_id: &str, args: &str) -> RouteOutcome {
    let name = args.trim();
    let target = world
        .players
        .iter()
        .find(|(_, p)| {
            world
                .users
                .get(&p.user_id)
                .is_some_and(|u| u.name == name)
        })
        .map(|(s, _)| s.clone());
    let Some(target_session) = target else {
        return RouteOutcome::Done(ServiceResult::err(ServiceError::not_found(format!(
            "No connected player called '{name}'."
        ))));
    };
    if target_session == session_id {
        return RouteOutcome::Done(ServiceResult::err(ServiceError::validation(
            "Kicking yourself is just /quit.",
        )));
    }
    let mut result = ServiceResult::handled()
        .emit(OutboundMessage::system(format!("{name} has been kicked.")));
    result.directs.push((
        target_session.clone(),
        OutboundMessage::system("You have been removed from the world by an admin."),
    ));
    RouteOutcome::Kick {
        target_session,
        result,
    }
}

/// Reset the world to a fresh start room. Accounts survive; everything
/// else goes.
fn purge(world: &mut World) -> ServiceResult {
    let live_sessions: Vec<String> = world.players.keys().cloned().collect();

    let fresh = World::new_default();
    world.rooms = fresh.rooms;
    world.npc_sheets.clear();
    world.npc_ids.clear();
    world.object_templates.clear();
    world.relationships.clear();
    world.factions.clear();
    world.trades.clear();
    world.advanced_goap_enabled = false;

    // Everyone still connected stands in the new start room
    for session in &live_sessions {
        if let Some(player) = world.players.get_mut(session) {
            player.room_id = crate::world::START_ROOM_ID.to_string();
        }
    }
    if let Some(room) = world.room_mut(crate::world::START_ROOM_ID) {
        room.players = live_sessions.into_iter().collect();
    }

    ServiceResult::handled()
        .emit(OutboundMessage::system("The world has been purged."))
        .broadcast(
            crate::world::START_ROOM_ID.to_string(),
            OutboundMessage::system("The world shudders and begins again."),
        )
        .saving_now()
}

fn set_safety(world: &mut World, args: &str) -> ServiceResult {
    match args.trim().parse::<SafetyLevel>() {
        Ok(level) => {
            world.safety_level = level;
            ServiceResult::handled()
                .emit(OutboundMessage::system(format!("Safety level is {level}.")))
                .saving()
        }
        Err(_) => ServiceResult::err(ServiceError::validation(
            "Usage: /safety G|PG-13|R|OFF",
        )),
    }
}

fn set_goap(world: &mut World, args: &str) -> ServiceResult {
    let enable = match args.trim().to_lowercase().as_str() {
        "on" => true,
        "off" => false,
        _ => {
            return ServiceResult::err(ServiceError::validation("Usage: /goap on|off"));
        }
    };
    world.advanced_goap_enabled = enable;
    // Stale plans must not outlive a mode switch
    crate::goap::clear_all_plans(world);
    let state = if enable { "on" } else { "off" };
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "Advanced NPC planning is {state}. All plan queues cleared."
        )))
        .saving()
}

fn run_validate(world: &mut World) -> ServiceResult {
    let report = validate::audit(world);
    let content = if report.is_clean() {
        format!("World integrity: clean (health {}).", report.health_score())
    } else {
        format!(
            "World health {}:\n{}",
            report.health_score(),
            report.issues.join("\n")
        )
    };
    if !report.is_clean() {
        error!("Integrity audit found issues: {:?}", report.issues);
    }
    ServiceResult::handled().emit(OutboundMessage::system(crate::markup::code(&content)))
}

fn is_admin(world: &World, session_id: &str) -> bool {
    world
        .player(session_id)
        .and_then(|p| world.users.get(&p.user_id))
        .is_some_and(|u| u.is_admin)
}

/// The verb of a line, for bug-report bucketing
pub fn first_word_of(s: &str) -> &str {
    first_word(s)
}

fn first_word(s: &str) -> &str {
    s.split_whitespace().next().unwrap_or("")
}

fn pipes(rest: &str) -> Vec<String> {
    if rest.trim().is_empty() {
        return Vec::new();
    }
    rest.split('|').map(|p| p.trim().to_string()).collect()
}
