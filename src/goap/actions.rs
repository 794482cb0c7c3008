//! The NPC action vocabulary and its executors
//!
//! Plans are queues of raw `{tool, args}` records; `NpcAction::parse`
//! turns one into a typed action or rejects it (a plan with any
//! unparseable step is dropped wholesale). Execution costs 1 AP whether
//! or not the action succeeds, so a failing plan can't spin for free.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::Config;
use crate::markup::{bold, italic};
use crate::service::{movement, OutboundMessage, ServiceResult};
use crate::world::object::TAG_BED;
use crate::world::sheet::PlanStep;
use crate::world::World;

/// Everything an NPC plan is allowed to do
#[derive(Debug, Clone, PartialEq)]
pub enum NpcAction {
    /// Fuzzy-resolve an object in the current room and pick it up
    GetObject { object_name: String },

    /// Eat/drink something held, by uuid
    ConsumeObject { object_uuid: Uuid },

    /// Visible flavour beat; refills socialization
    Emote { message: Option<String> },

    Claim { object_uuid: Uuid },
    Unclaim { object_uuid: Uuid },

    /// Lie down in an owned bed in the room
    Sleep { bed_uuid: Option<Uuid> },

    DoNothing,

    /// Traverse a door or stairs by fuzzy name
    MoveThrough { name: String },
}

impl NpcAction {
    /// Parse a raw plan step; `None` marks the whole plan malformed
    pub fn parse(step: &PlanStep) -> Option<Self> {
        let args = &step.args;
        let str_arg = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);
        let uuid_arg = |key: &str| {
            args.get(key)
                .and_then(Value::as_str)
                .and_then(|raw| Uuid::parse_str(raw).ok())
        };

        match step.tool.as_str() {
            "get_object" => Some(Self::GetObject {
                object_name: str_arg("object_name")?,
            }),
            "consume_object" => Some(Self::ConsumeObject {
                object_uuid: uuid_arg("object_uuid")?,
            }),
            "emote" => Some(Self::Emote {
                message: str_arg("message"),
            }),
            "claim" => Some(Self::Claim {
                object_uuid: uuid_arg("object_uuid")?,
            }),
            "unclaim" => Some(Self::Unclaim {
                object_uuid: uuid_arg("object_uuid")?,
            }),
            "sleep" => Some(Self::Sleep {
                bed_uuid: uuid_arg("bed_uuid"),
            }),
            "do_nothing" => Some(Self::DoNothing),
            "move_through" => Some(Self::MoveThrough {
                name: str_arg("name")?,
            }),
            _ => None,
        }
    }

    /// The raw record form, for building plans
    pub fn to_step(&self) -> PlanStep {
        match self {
            Self::GetObject { object_name } => {
                PlanStep::new("get_object", json!({ "object_name": object_name }))
            }
            Self::ConsumeObject { object_uuid } => {
                PlanStep::new("consume_object", json!({ "object_uuid": object_uuid }))
            }
            Self::Emote { message } => match message {
                Some(message) => PlanStep::new("emote", json!({ "message": message })),
                None => PlanStep::new("emote", json!({})),
            },
            Self::Claim { object_uuid } => {
                PlanStep::new("claim", json!({ "object_uuid": object_uuid }))
            }
            Self::Unclaim { object_uuid } => {
                PlanStep::new("unclaim", json!({ "object_uuid": object_uuid }))
            }
            Self::Sleep { bed_uuid } => match bed_uuid {
                Some(bed_uuid) => PlanStep::new("sleep", json!({ "bed_uuid": bed_uuid })),
                None => PlanStep::new("sleep", json!({})),
            },
            Self::DoNothing => PlanStep::new("do_nothing", json!({})),
            Self::MoveThrough { name } => PlanStep::new("move_through", json!({ "name": name })),
        }
    }
}

/// Run one action for an NPC. The returned result carries the room
/// broadcasts; the caller charges the AP.
pub fn execute(world: &mut World, config: &Config, npc_name: &str, action: &NpcAction) -> ServiceResult {
    let Some(room_id) = world.room_of_npc(npc_name).map(str::to_string) else {
        return ServiceResult::err(crate::error::ServiceError::Integrity);
    };
    let Some(npc_id) = world.npc_uuid(npc_name) else {
        return ServiceResult::err(crate::error::ServiceError::Integrity);
    };

    match action {
        NpcAction::GetObject { object_name } => {
            let resolved = {
                let room = &world.rooms[&room_id];
                crate::resolve::resolve(object_name, room.object_names())
            };
            let name = match resolved {
                Ok(name) => name,
                Err(err) => return ServiceResult::err(err),
            };
            let (uuid, immovable) = {
                let Some(object) = world.rooms[&room_id].object_by_name(&name) else {
                    return ServiceResult::err(crate::error::ServiceError::Integrity);
                };
                (
                    object.uuid,
                    object.has_tag(crate::world::object::TAG_IMMOVABLE),
                )
            };
            if immovable {
                return ServiceResult::err(crate::error::ServiceError::constraint(format!(
                    "{npc_name} tugs at the {name} to no effect."
                )));
            }
            let Some(object) = world
                .room_mut(&room_id)
                .and_then(|r| r.objects.remove(&uuid))
            else {
                return ServiceResult::err(crate::error::ServiceError::Integrity);
            };
            let Some(sheet) = world.npc_sheets.get_mut(npc_name) else {
                return ServiceResult::err(crate::error::ServiceError::Integrity);
            };
            match sheet.inventory.place(object) {
                Ok(_) => ServiceResult::handled()
                    .broadcast(
                        room_id,
                        OutboundMessage::npc(
                            npc_name,
                            format!("{} picks up the {name}.", bold(npc_name)),
                        ),
                    )
                    .saving(),
                Err(object) => {
                    // No slot fits; back on the floor it goes
                    let uuid = object.uuid;
                    if let Some(room) = world.room_mut(&room_id) {
                        room.objects.insert(uuid, object);
                    }
                    ServiceResult::err(crate::error::ServiceError::constraint(format!(
                        "{npc_name} fumbles with the {name} and gives up."
                    )))
                }
            }
        }

        NpcAction::ConsumeObject { object_uuid } => {
            let Some(sheet) = world.npc_sheets.get_mut(npc_name) else {
                return ServiceResult::err(crate::error::ServiceError::Integrity);
            };
            let Some(object) = sheet.inventory.get(*object_uuid) else {
                return ServiceResult::err(crate::error::ServiceError::not_found(format!(
                    "{npc_name} pats their pockets, confused."
                )));
            };
            let edible = object.tag_number(crate::world::object::AFFORDANCE_EDIBLE);
            let drinkable = object.tag_number(crate::world::object::AFFORDANCE_DRINKABLE);
            if edible.is_none() && drinkable.is_none() {
                return ServiceResult::err(crate::error::ServiceError::validation(format!(
                    "{npc_name} considers eating something inedible, then doesn't."
                )));
            }
            let Some(object) = sheet.inventory.remove(*object_uuid) else {
                return ServiceResult::err(crate::error::ServiceError::Integrity);
            };
            if let Some(amount) = edible {
                sheet.needs.hunger += amount as f32;
            }
            if let Some(amount) = drinkable {
                sheet.needs.thirst += amount as f32;
            }
            sheet.needs.clamp_all();

            let name = object.name.clone();
            let verb = if edible.is_some() { "eats" } else { "drinks" };
            crate::service::interact::spawn_outputs(world, &room_id, &object.deconstruct_recipe);

            ServiceResult::handled()
                .broadcast(
                    room_id,
                    OutboundMessage::npc(npc_name, format!("{} {verb} the {name}.", bold(npc_name))),
                )
                .saving()
        }

        NpcAction::Emote { message } => {
            let Some(sheet) = world.npc_sheets.get_mut(npc_name) else {
                return ServiceResult::err(crate::error::ServiceError::Integrity);
            };
            sheet.needs.socialization += config.social_refill;
            sheet.needs.clamp_all();
            let line = match message {
                Some(message) => italic(&format!("{} {message}", bold(npc_name))),
                None => italic(&format!("{} hums quietly to themselves.", bold(npc_name))),
            };
            ServiceResult::handled()
                .broadcast(room_id, OutboundMessage::npc(npc_name, line))
                .saving()
        }

        NpcAction::Claim { object_uuid } => {
            let Some(object) = world
                .room_mut(&room_id)
                .and_then(|r| r.objects.get_mut(object_uuid))
            else {
                return ServiceResult::err(crate::error::ServiceError::not_found(format!(
                    "{npc_name} reaches for something that isn't there."
                )));
            };
            if object.owner.is_some() {
                return ServiceResult::err(crate::error::ServiceError::constraint(format!(
                    "{npc_name} eyes the {} but leaves it be.",
                    object.name
                )));
            }
            object.owner = Some(npc_id);
            let name = object.name.clone();
            ServiceResult::handled()
                .broadcast(
                    room_id,
                    OutboundMessage::npc(
                        npc_name,
                        format!("{} takes possession of the {name}.", bold(npc_name)),
                    ),
                )
                .saving()
        }

        NpcAction::Unclaim { object_uuid } => {
            let Some(object) = world
                .room_mut(&room_id)
                .and_then(|r| r.objects.get_mut(object_uuid))
            else {
                return ServiceResult::err(crate::error::ServiceError::Integrity);
            };
            if object.owner != Some(npc_id) {
                return ServiceResult::err(crate::error::ServiceError::Integrity);
            }
            object.owner = None;
            ServiceResult::handled().saving()
        }

        NpcAction::Sleep { bed_uuid } => {
            // The bed must be here and theirs
            let bed = {
                let room = &world.rooms[&room_id];
                match bed_uuid {
                    Some(uuid) => room
                        .objects
                        .get(uuid)
                        .filter(|o| o.has_tag(TAG_BED) && o.owner == Some(npc_id))
                        .map(|o| o.uuid),
                    None => room
                        .objects
                        .values()
                        .filter(|o| o.has_tag(TAG_BED) && o.owner == Some(npc_id))
                        .map(|o| o.uuid)
                        .min(),
                }
            };
            let Some(bed) = bed else {
                return ServiceResult::err(crate::error::ServiceError::constraint(format!(
                    "{npc_name} has no bed to call their own here."
                )));
            };
            let Some(sheet) = world.npc_sheets.get_mut(npc_name) else {
                return ServiceResult::err(crate::error::ServiceError::Integrity);
            };
            sheet.planner.sleeping_ticks_remaining = config.sleep_ticks;
            sheet.planner.sleeping_bed_uuid = Some(bed);
            sheet.planner.plan_queue.clear();
            ServiceResult::handled()
                .broadcast(
                    room_id,
                    OutboundMessage::npc(
                        npc_name,
                        italic(&format!("{} lies down and drifts off.", bold(npc_name))),
                    ),
                )
                .saving()
        }

        NpcAction::DoNothing => ServiceResult::handled().broadcast(
            room_id,
            OutboundMessage::npc(
                npc_name,
                italic(&format!("{} seems lost in thought.", bold(npc_name))),
            ),
        ),

        NpcAction::MoveThrough { name } => {
            let result = movement::npc_traverse(world, npc_name, name);
            if !result.is_err() {
                // Remember where we've been, for curiosity's sake
                if let Some(new_room) = world.room_of_npc(npc_name).map(str::to_string) {
                    if let Some(sheet) = world.npc_sheets.get_mut(npc_name) {
                        let note = format!("visited:{new_room}");
                        if !sheet.remembers(&note) {
                            sheet.remember(note);
                        }
                    }
                }
            }
            result
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::world::object::{GameObject, TAG_SMALL};
    use crate::world::sheet::CharacterSheet;
    use crate::world::START_ROOM_ID;

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

    #[test]
    fn test_parse_rejects_unknown_tools_and_bad_args() {
        assert!(NpcAction::parse(&PlanStep::new("summon_dragon", json!({}))).is_none());
        assert!(NpcAction::parse(&PlanStep::new("get_object", json!({}))).is_none());
        assert!(
            NpcAction::parse(&PlanStep::new("consume_object", json!({"object_uuid": "nope"})))
                .is_none()
        );
        assert!(NpcAction::parse(&PlanStep::new("do_nothing", json!({}))).is_some());
    }

    #[test]
    fn test_round_trip_through_step_form() {
        let actions = [
            NpcAction::GetObject {
                object_name: "apple".into(),
            },
            NpcAction::Emote { message: None },
            NpcAction::Sleep { bed_uuid: None },
            NpcAction::MoveThrough {
                name: "oak door".into(),
            },
        ];
        for action in actions {
            assert_eq!(NpcAction::parse(&action.to_step()).as_ref(), Some(&action));
        }
    }

    #[test]
    fn test_get_then_consume() {
        let mut world = world_with_npc("Gareth");
        let config = Config::default();
        let mut apple = GameObject::new("apple", "");
        apple.add_tag(TAG_SMALL);
        apple.add_tag("Edible: 30");
        let uuid = apple.uuid;
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .objects
            .insert(uuid, apple);
        world.npc_sheets.get_mut("Gareth").unwrap().needs.hunger = 20.0;

        let result = execute(
            &mut world,
            &config,
            "Gareth",
            &NpcAction::GetObject {
                object_name: "apple".into(),
            },
        );
        assert!(!result.is_err(), "{:?}", result.error);
        assert!(world.rooms[START_ROOM_ID].objects.is_empty());

        let result = execute(
            &mut world,
            &config,
            "Gareth",
            &NpcAction::ConsumeObject { object_uuid: uuid },
        );
        assert!(!result.is_err());
        let sheet = &world.npc_sheets["Gareth"];
        assert_eq!(sheet.needs.hunger, 50.0);
        assert!(!sheet.inventory.contains(uuid));
    }

    #[test]
    fn test_sleep_requires_owned_bed() {
        let mut world = world_with_npc("Gareth");
        let config = Config::default();
        let mut bed = GameObject::new("straw bed", "");
        bed.add_tag(TAG_BED);
        let bed_uuid = bed.uuid;
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .objects
            .insert(bed_uuid, bed);

        // Unowned: no sleeping
        let result = execute(&mut world, &config, "Gareth", &NpcAction::Sleep { bed_uuid: None });
        assert!(result.is_err());

        // Claim it, then sleep works
        let result = execute(
            &mut world,
            &config,
            "Gareth",
            &NpcAction::Claim {
                object_uuid: bed_uuid,
            },
        );
        assert!(!result.is_err());
        let result = execute(&mut world, &config, "Gareth", &NpcAction::Sleep { bed_uuid: None });
        assert!(!result.is_err());
        let planner = &world.npc_sheets["Gareth"].planner;
        assert_eq!(planner.sleeping_ticks_remaining, config.sleep_ticks);
        assert_eq!(planner.sleeping_bed_uuid, Some(bed_uuid));
    }

    #[test]
    fn test_move_through_records_visit() {
        let mut world = world_with_npc("Gareth");
        let config = Config::default();
        // Hand-build a door pair
        crate::service::room::create_room(&mut world, "yard", "");
        let session = "sess-x";
        world.players.insert(
            session.into(),
            crate::world::user::Player {
                session_id: session.into(),
                user_id: Uuid::now_v7(),
                room_id: START_ROOM_ID.into(),
            },
        );
        crate::service::room::add_door(&mut world, session, "gate", "yard");

        let result = execute(
            &mut world,
            &config,
            "Gareth",
            &NpcAction::MoveThrough {
                name: "gate".into(),
            },
        );
        assert!(!result.is_err());
        assert!(world.rooms["yard"].npcs.contains("Gareth"));
        assert!(world.npc_sheets["Gareth"].remembers("visited:yard"));
    }
}
