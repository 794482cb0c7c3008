//! Tag-driven object interaction
//!
//! An object's tags decide what can be done with it; every executor here
//! validates strictly before mutating. Objects live in the actor's
//! inventory, on the room floor, or inside a searched container in the
//! room; `locate` resolves a typed name across all three.

use itertools::Itertools;
use uuid::Uuid;

use super::{OutboundMessage, ServiceResult};
use crate::error::ServiceError;
use crate::markup::bold;
use crate::resolve::resolve;
use crate::world::object::{
    GameObject, SizeClass, AFFORDANCE_DRINKABLE, AFFORDANCE_EDIBLE, CONTAINER_LARGE_SLOTS,
    CONTAINER_SMALL_SLOTS, TAG_IMMOVABLE, TAG_SEARCHED, TAG_WEAPON,
};
use crate::world::World;

/// Where a located object currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Place {
    Inventory,
    Room,
    /// Inside a searched container on the floor (uuid of the container)
    Container(Uuid),
}

/// Resolve a typed object name to (place, uuid, display name)
///
/// Inventory wins over the floor, the floor over container contents, so
/// "eat apple" prefers the apple in your hand.
fn locate(
    world: &World,
    session_id: &str,
    query: &str,
) -> Result<(Place, Uuid, String), ServiceError> {
    let sheet = world
        .sheet_for_session(session_id)
        .ok_or(ServiceError::Integrity)?;
    let room = world
        .room_of_session(session_id)
        .ok_or(ServiceError::Integrity)?;

    let inventory_names = sheet.inventory.iter().map(|(_, o)| o.name.as_str());
    let room_names = room.objects.values().map(|o| o.name.as_str());
    let container_names = room
        .objects
        .values()
        .filter(|o| o.is_container() && o.has_tag(TAG_SEARCHED))
        .flat_map(|o| o.contents.iter().map(|c| c.name.as_str()));

    let name = resolve(
        query,
        inventory_names.chain(room_names).chain(container_names),
    )?;

    if let Some((_, object)) = sheet.inventory.iter().find(|(_, o)| o.name == name) {
        return Ok((Place::Inventory, object.uuid, name));
    }
    if let Some(object) = room.object_by_name(&name) {
        return Ok((Place::Room, object.uuid, name));
    }
    for container in room
        .objects
        .values()
        .filter(|o| o.is_container() && o.has_tag(TAG_SEARCHED))
        .sorted_by_key(|o| o.uuid)
    {
        if let Some(object) = container.contents.iter().find(|c| c.name == name) {
            return Ok((Place::Container(container.uuid), object.uuid, name));
        }
    }
    Err(ServiceError::not_found(format!("There's no '{name}' here.")))
}

/// Pull a located object out of wherever it sits
fn take_from_place(
    world: &mut World,
    session_id: &str,
    place: Place,
    uuid: Uuid,
) -> Option<GameObject> {
    let room_id = world.player(session_id)?.room_id.clone();
    match place {
        Place::Inventory => world
            .sheet_for_session_mut(session_id)?
            .inventory
            .remove(uuid),
        Place::Room => world.room_mut(&room_id)?.objects.remove(&uuid),
        Place::Container(container_uuid) => {
            let container = world.room_mut(&room_id)?.objects.get_mut(&container_uuid)?;
            let index = container.contents.iter().position(|c| c.uuid == uuid)?;
            Some(container.contents.remove(index))
        }
    }
}

/// The actions an object's tags afford right now, for `interact <obj>`
pub fn list_actions(world: &World, session_id: &str, query: &str) -> ServiceResult {
    let (place, uuid, name) = match locate(world, session_id, query) {
        Ok(found) => found,
        Err(err) => return ServiceResult::err(err),
    };
    let object = match object_at(world, session_id, place, uuid) {
        Some(object) => object,
        None => return ServiceResult::err(ServiceError::Integrity),
    };
    let actor_id = world.player(session_id).map(|p| p.user_id);

    let mut actions: Vec<String> = Vec::new();
    match place {
        Place::Inventory => {
            actions.push("Drop".into());
            if object.has_tag(TAG_WEAPON) {
                actions.push("Wield".into());
            }
        }
        Place::Room | Place::Container(_) => {
            if !object.has_tag(TAG_IMMOVABLE) {
                actions.push("Pick Up".into());
            }
            if object.is_travel_point() {
                actions.push("Move Through".into());
            }
            if object.is_container() {
                if object.has_tag(TAG_SEARCHED) {
                    actions.push("Open".into());
                } else {
                    actions.push("Search".into());
                }
            }
            match object.owner {
                None => actions.push("Claim".into()),
                Some(owner) if Some(owner) == actor_id => actions.push("Unclaim".into()),
                Some(_) => {}
            }
            if let Some(key) = object.craft_spot_key() {
                actions.push(format!("Craft {key}"));
            }
        }
    }
    if object.is_edible() {
        actions.push("Eat".into());
    }
    if object.is_drinkable() {
        actions.push("Drink".into());
    }
    if !object.deconstruct_recipe.is_empty() {
        actions.push("Cut".into());
    }

    ServiceResult::handled().emit(OutboundMessage::system(format!(
        "{}: {}",
        bold(&name),
        actions.join(", ")
    )))
}

fn object_at<'a>(
    world: &'a World,
    session_id: &str,
    place: Place,
    uuid: Uuid,
) -> Option<&'a GameObject> {
    match place {
        Place::Inventory => world.sheet_for_session(session_id)?.inventory.get(uuid),
        Place::Room => world.room_of_session(session_id)?.objects.get(&uuid),
        Place::Container(container_uuid) => world
            .room_of_session(session_id)?
            .objects
            .get(&container_uuid)?
            .contents
            .iter()
            .find(|c| c.uuid == uuid),
    }
}

/// Pick an object up off the floor (or out of a searched container) into
/// the slot its size class calls for
pub fn pick_up(world: &mut World, session_id: &str, query: &str) -> ServiceResult {
    let (place, uuid, name) = match locate(world, session_id, query) {
        Ok(found) => found,
        Err(err) => return ServiceResult::err(err),
    };
    if place == Place::Inventory {
        return ServiceResult::err(ServiceError::constraint(format!(
            "You're already holding the {name}."
        )));
    }
    let immovable = object_at(world, session_id, place, uuid)
        .is_some_and(|o| o.has_tag(TAG_IMMOVABLE));
    if immovable {
        return ServiceResult::err(ServiceError::constraint(format!(
            "The {name} won't budge."
        )));
    }

    let Some(object) = take_from_place(world, session_id, place, uuid) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let room_id = actor_room_id(world, session_id);
    let Some(sheet) = world.sheet_for_session_mut(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    match sheet.inventory.place(object) {
        Ok(_) => {}
        Err(object) => {
            // Nothing fit; put it back on the floor where it came from
            let uuid = object.uuid;
            if let Some(room) = world.room_mut(&room_id) {
                room.objects.insert(uuid, object);
            }
            return ServiceResult::err(ServiceError::constraint(format!(
                "You have nowhere to put the {name}."
            )));
        }
    }

    let actor = actor_name(world, session_id);
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "You pick up the {}.",
            bold(&name)
        )))
        .broadcast(
            room_id,
            OutboundMessage::system(format!("{} picks up the {name}.", bold(&actor))),
        )
        .saving()
}

/// Put a held object down on the floor
pub fn drop_object(world: &mut World, session_id: &str, query: &str) -> ServiceResult {
    let (place, uuid, name) = match locate(world, session_id, query) {
        Ok(found) => found,
        Err(err) => return ServiceResult::err(err),
    };
    if place != Place::Inventory {
        return ServiceResult::err(ServiceError::constraint(format!(
            "You're not holding the {name}."
        )));
    }

    let Some(object) = take_from_place(world, session_id, place, uuid) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let room_id = actor_room_id(world, session_id);

    // Dropping your weapon un-equips it
    if let Some(sheet) = world.sheet_for_session_mut(session_id) {
        if sheet.combat.equipped_weapon == Some(uuid) {
            sheet.combat.equipped_weapon = None;
        }
    }
    if let Some(room) = world.room_mut(&room_id) {
        room.objects.insert(object.uuid, object);
    }

    let actor = actor_name(world, session_id);
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "You drop the {}.",
            bold(&name)
        )))
        .broadcast(
            room_id,
            OutboundMessage::system(format!("{} drops the {name}.", bold(&actor))),
        )
        .saving()
}

/// Eat (or drink, per `affordance`) a consumable
fn consume(
    world: &mut World,
    session_id: &str,
    query: &str,
    affordance: &str,
    verb: &str,
) -> ServiceResult {
    let (place, uuid, name) = match locate(world, session_id, query) {
        Ok(found) => found,
        Err(err) => return ServiceResult::err(err),
    };
    let Some(object) = object_at(world, session_id, place, uuid) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let Some(amount) = object.tag_number(affordance) else {
        return ServiceResult::err(ServiceError::validation(format!(
            "You can't {verb} the {name}."
        )));
    };

    let Some(object) = take_from_place(world, session_id, place, uuid) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let outputs = object.deconstruct_recipe.clone();

    let Some(sheet) = world.sheet_for_session_mut(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if affordance == AFFORDANCE_EDIBLE {
        sheet.needs.hunger += amount as f32;
    } else {
        sheet.needs.thirst += amount as f32;
    }
    sheet.needs.clamp_all();
    if sheet.combat.equipped_weapon == Some(uuid) {
        sheet.combat.equipped_weapon = None;
    }

    // Leftovers hit the floor: cores, empty flasks, whatever the recipe says
    let room_id = actor_room_id(world, session_id);
    spawn_outputs(world, &room_id, &outputs);

    let actor = actor_name(world, session_id);
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "You {verb} the {}.",
            bold(&name)
        )))
        .broadcast(
            room_id,
            OutboundMessage::system(format!("{} {verb}s the {name}.", bold(&actor))),
        )
        .saving()
}

pub fn eat(world: &mut World, session_id: &str, query: &str) -> ServiceResult {
    consume(world, session_id, query, AFFORDANCE_EDIBLE, "eat")
}

pub fn drink(world: &mut World, session_id: &str, query: &str) -> ServiceResult {
    consume(world, session_id, query, AFFORDANCE_DRINKABLE, "drink")
}

/// Ready a held weapon in a free hand
pub fn wield(world: &mut World, session_id: &str, query: &str) -> ServiceResult {
    let (place, uuid, name) = match locate(world, session_id, query) {
        Ok(found) => found,
        Err(err) => return ServiceResult::err(err),
    };
    if place != Place::Inventory {
        return ServiceResult::err(ServiceError::constraint(format!(
            "Pick the {name} up first."
        )));
    }
    let is_weapon = object_at(world, session_id, place, uuid)
        .is_some_and(|o| o.has_tag(TAG_WEAPON));
    if !is_weapon {
        return ServiceResult::err(ServiceError::validation(format!(
            "The {name} is no weapon."
        )));
    }

    let Some(sheet) = world.sheet_for_session_mut(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if sheet.inventory.move_to_hand(uuid).is_none() {
        return ServiceResult::err(ServiceError::constraint(
            "Both your hands are full.".to_string(),
        ));
    }
    sheet.combat.equipped_weapon = Some(uuid);

    let room_id = actor_room_id(world, session_id);
    let actor = actor_name(world, session_id);
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "You wield the {}.",
            bold(&name)
        )))
        .broadcast(
            room_id,
            OutboundMessage::system(format!("{} wields the {name}.", bold(&actor))),
        )
        .saving()
}

/// First search of a container spawns its loot; afterwards it's spent
pub fn search(world: &mut World, session_id: &str, query: &str) -> ServiceResult {
    let (place, uuid, name) = match locate(world, session_id, query) {
        Ok(found) => found,
        Err(err) => return ServiceResult::err(err),
    };
    if place != Place::Room {
        return ServiceResult::err(ServiceError::validation(format!(
            "You can't search the {name} from there."
        )));
    }
    let Some(object) = object_at(world, session_id, place, uuid) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if !object.is_container() {
        return ServiceResult::err(ServiceError::validation(format!(
            "The {name} isn't something you can search."
        )));
    }
    if object.has_tag(TAG_SEARCHED) {
        return ServiceResult::err(ServiceError::constraint(format!(
            "The {name} has already been searched."
        )));
    }

    // Loot comes from every template whose hint names this container,
    // in key order; the container's four slots fill first and anything
    // beyond that lands on the floor
    let loot_keys: Vec<String> = world
        .object_templates
        .iter()
        .filter(|(_, t)| {
            t.loot_location_hint
                .as_ref()
                .is_some_and(|hint| hint.display_name == name)
        })
        .map(|(key, _)| key.clone())
        .sorted_unstable()
        .collect();

    let loot: Vec<GameObject> = loot_keys
        .iter()
        .filter_map(|key| world.object_templates.get(key))
        .map(GameObject::instantiate)
        .collect();

    let room_id = actor_room_id(world, session_id);
    let mut found: Vec<String> = Vec::new();
    let mut overflow: Vec<GameObject> = Vec::new();
    {
        let Some(room) = world.room_mut(&room_id) else {
            return ServiceResult::err(ServiceError::Integrity);
        };
        let Some(container) = room.objects.get_mut(&uuid) else {
            return ServiceResult::err(ServiceError::Integrity);
        };
        container.add_tag(TAG_SEARCHED);

        let mut small_free = CONTAINER_SMALL_SLOTS;
        let mut large_free = CONTAINER_LARGE_SLOTS;
        for instance in loot {
            found.push(instance.name.clone());
            let free = match instance.size_class() {
                SizeClass::Small => &mut small_free,
                SizeClass::Large | SizeClass::HandOnly => &mut large_free,
            };
            if *free > 0 {
                *free -= 1;
                container.contents.push(instance);
            } else {
                overflow.push(instance);
            }
        }
    }
    if let Some(room) = world.room_mut(&room_id) {
        for instance in overflow {
            room.objects.insert(instance.uuid, instance);
        }
    }

    let report = if found.is_empty() {
        format!("You search the {} and find nothing of note.", bold(&name))
    } else {
        format!(
            "You search the {} and find: {}.",
            bold(&name),
            found.iter().join(", ")
        )
    };
    let actor = actor_name(world, session_id);
    ServiceResult::handled()
        .emit(OutboundMessage::system(report))
        .broadcast(
            room_id,
            OutboundMessage::system(format!("{} rummages through the {name}.", bold(&actor))),
        )
        .saving()
}

/// Open a searched container and list what's inside by size class
pub fn open(world: &mut World, session_id: &str, query: &str) -> ServiceResult {
    let (place, uuid, name) = match locate(world, session_id, query) {
        Ok(found) => found,
        Err(err) => return ServiceResult::err(err),
    };
    if place != Place::Room {
        return ServiceResult::err(ServiceError::validation(format!(
            "You can't open the {name} from there."
        )));
    }
    let Some(object) = object_at(world, session_id, place, uuid) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if !object.is_container() {
        return ServiceResult::err(ServiceError::validation(format!(
            "The {name} doesn't open."
        )));
    }
    if !object.has_tag(TAG_SEARCHED) {
        return ServiceResult::err(ServiceError::constraint(format!(
            "You haven't searched the {name} yet."
        )));
    }

    let small = object
        .contents
        .iter()
        .filter(|c| c.size_class() == SizeClass::Small)
        .map(|c| c.name.as_str())
        .join(", ");
    let large = object
        .contents
        .iter()
        .filter(|c| c.size_class() != SizeClass::Small)
        .map(|c| c.name.as_str())
        .join(", ");
    let small = if small.is_empty() { "nothing" } else { &small };
    let large = if large.is_empty() { "nothing" } else { &large };

    ServiceResult::handled().emit(OutboundMessage::system(format!(
        "Inside the {}: small - {small}; large - {large}.",
        bold(&name)
    )))
}

/// Claim an unowned object for the actor
pub fn claim(world: &mut World, session_id: &str, query: &str) -> ServiceResult {
    let (place, uuid, name) = match locate(world, session_id, query) {
        Ok(found) => found,
        Err(err) => return ServiceResult::err(err),
    };
    if place != Place::Room {
        return ServiceResult::err(ServiceError::validation(
            "Claims are made on things where they stand.".to_string(),
        ));
    }
    let Some(actor_id) = world.player(session_id).map(|p| p.user_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let room_id = actor_room_id(world, session_id);
    let Some(object) = world
        .room_mut(&room_id)
        .and_then(|r| r.objects.get_mut(&uuid))
    else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    match object.owner {
        Some(owner) if owner == actor_id => {
            return ServiceResult::err(ServiceError::constraint(format!(
                "The {name} is already yours."
            )))
        }
        Some(_) => {
            return ServiceResult::err(ServiceError::constraint(format!(
                "The {name} already belongs to someone."
            )))
        }
        None => object.owner = Some(actor_id),
    }

    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "The {} is yours now.",
            bold(&name)
        )))
        .saving()
}

pub fn unclaim(world: &mut World, session_id: &str, query: &str) -> ServiceResult {
    let (place, uuid, name) = match locate(world, session_id, query) {
        Ok(found) => found,
        Err(err) => return ServiceResult::err(err),
    };
    if place != Place::Room {
        return ServiceResult::err(ServiceError::validation(
            "Claims are made on things where they stand.".to_string(),
        ));
    }
    let Some(actor_id) = world.player(session_id).map(|p| p.user_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let room_id = actor_room_id(world, session_id);
    let Some(object) = world
        .room_mut(&room_id)
        .and_then(|r| r.objects.get_mut(&uuid))
    else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if object.owner != Some(actor_id) {
        return ServiceResult::err(ServiceError::permission(format!(
            "The {name} isn't yours to give up."
        )));
    }
    object.owner = None;

    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "The {} is no longer yours.",
            bold(&name)
        )))
        .saving()
}

/// Cut an object apart with a wielded weapon, yielding its deconstruct
/// outputs
pub fn cut(world: &mut World, session_id: &str, query: &str) -> ServiceResult {
    let (place, uuid, name) = match locate(world, session_id, query) {
        Ok(found) => found,
        Err(err) => return ServiceResult::err(err),
    };

    let wielding = world
        .sheet_for_session(session_id)
        .and_then(|s| s.combat.equipped_weapon)
        .is_some();
    if !wielding {
        return ServiceResult::err(ServiceError::constraint(
            "You need a wielded weapon to cut anything.".to_string(),
        ));
    }
    let Some(object) = object_at(world, session_id, place, uuid) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    if object.has_tag(TAG_IMMOVABLE) {
        return ServiceResult::err(ServiceError::constraint(format!(
            "The {name} won't come apart."
        )));
    }
    if object.deconstruct_recipe.is_empty() {
        return ServiceResult::err(ServiceError::validation(format!(
            "Nothing useful would come of cutting the {name}."
        )));
    }

    let Some(object) = take_from_place(world, session_id, place, uuid) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let room_id = actor_room_id(world, session_id);
    let produced = spawn_outputs(world, &room_id, &object.deconstruct_recipe);

    let actor = actor_name(world, session_id);
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "You cut the {} apart into: {}.",
            bold(&name),
            produced.iter().join(", ")
        )))
        .broadcast(
            room_id,
            OutboundMessage::system(format!("{} cuts the {name} apart.", bold(&actor))),
        )
        .saving()
}

/// Craft at a craft spot in the room: needs the template and all of its
/// components by display-name count
pub fn craft(world: &mut World, session_id: &str, template_query: &str) -> ServiceResult {
    let Some(room) = world.room_of_session(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let spot_keys: Vec<String> = room
        .objects
        .values()
        .filter_map(|o| o.craft_spot_key())
        .map(str::to_string)
        .sorted_unstable()
        .dedup()
        .collect();
    if spot_keys.is_empty() {
        return ServiceResult::err(ServiceError::constraint(
            "There's nowhere to craft anything here.".to_string(),
        ));
    }
    let key = match resolve(template_query, spot_keys.iter().map(String::as_str)) {
        Ok(key) => key,
        Err(err) => return ServiceResult::err(err),
    };
    let Some(template) = world.object_templates.get(&key).cloned() else {
        return ServiceResult::err(ServiceError::constraint(format!(
            "Nobody remembers how to make a '{key}'."
        )));
    };

    // Count components against the recipe
    let Some(sheet) = world.sheet_for_session(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let mut needed: Vec<(String, usize)> = Vec::new();
    for component in template.crafting_recipe.iter().sorted_unstable().dedup() {
        let required = template
            .crafting_recipe
            .iter()
            .filter(|c| *c == component)
            .count();
        let held = sheet.inventory.count_named(component);
        if held < required {
            needed.push((component.clone(), required - held));
        }
    }
    if !needed.is_empty() {
        let missing = needed
            .iter()
            .map(|(name, count)| format!("{count} more {name}"))
            .join(", ");
        return ServiceResult::err(ServiceError::constraint(format!(
            "You're missing: {missing}."
        )));
    }

    // Consume the components, then hand over the result
    let Some(sheet) = world.sheet_for_session_mut(session_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    for component in &template.crafting_recipe {
        let Some(uuid) = sheet
            .inventory
            .iter()
            .find(|(_, o)| o.name == *component)
            .map(|(_, o)| o.uuid)
        else {
            return ServiceResult::err(ServiceError::Integrity);
        };
        sheet.inventory.remove(uuid);
    }

    let instance = GameObject::instantiate(&template);
    let crafted_name = instance.name.clone();
    let leftover = sheet.inventory.place(instance);
    let room_id = actor_room_id(world, session_id);
    if let Err(instance) = leftover {
        // Hands full: the fresh piece lands at your feet
        if let Some(room) = world.room_mut(&room_id) {
            room.objects.insert(instance.uuid, instance);
        }
    }

    let actor = actor_name(world, session_id);
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "You craft a {}.",
            bold(&crafted_name)
        )))
        .broadcast(
            room_id,
            OutboundMessage::system(format!("{} crafts a {crafted_name}.", bold(&actor))),
        )
        .saving()
}

// ---- helpers ----

fn actor_room_id(world: &World, session_id: &str) -> String {
    world
        .player(session_id)
        .map(|p| p.room_id.clone())
        .unwrap_or_else(|| crate::world::START_ROOM_ID.to_string())
}

fn actor_name(world: &World, session_id: &str) -> String {
    world
        .display_name_of_session(session_id)
        .unwrap_or("Someone")
        .to_string()
}

/// Spawn deconstruct/byproduct template keys into a room, skipping keys
/// nobody defined. Returns the names spawned.
pub fn spawn_outputs(world: &mut World, room_id: &str, keys: &[String]) -> Vec<String> {
    let mut produced = Vec::new();
    for key in keys {
        let Some(template) = world.object_templates.get(key) else {
            continue;
        };
        let instance = GameObject::instantiate(template);
        produced.push(instance.name.clone());
        if let Some(room) = world.room_mut(room_id) {
            room.objects.insert(instance.uuid, instance);
        }
    }
    produced
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::world::object::{LootLocationHint, TAG_CONTAINER, TAG_SMALL, TAG_STOWED};
    use crate::world::user::{Player, User};
    use crate::world::START_ROOM_ID;

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

    fn drop_in_room(world: &mut World, object: GameObject) -> Uuid {
        let uuid = object.uuid;
        world
            .rooms
            .get_mut(START_ROOM_ID)
            .unwrap()
            .objects
            .insert(uuid, object);
        uuid
    }

    fn apple() -> GameObject {
        let mut apple = GameObject::new("apple", "crisp");
        apple.add_tag(TAG_SMALL);
        apple.add_tag("Edible: 10");
        apple
    }

    #[test]
    fn test_pickup_slots_wield_rejection_then_eat() {
        // The scenario: pick up an apple, fail to wield it, eat it
        let (mut world, session) = world_with_session();
        let uuid = drop_in_room(&mut world, apple());
        world
            .sheet_for_session_mut(&session)
            .unwrap()
            .needs
            .hunger = 85.0;

        let result = pick_up(&mut world, &session, "apple");
        assert!(!result.is_err(), "{:?}", result.error);
        let sheet = world.sheet_for_session(&session).unwrap();
        // First free small-stow slot is index 2, and it's marked stowed
        assert_eq!(sheet.inventory.slot_of(uuid), Some(2));
        assert!(sheet.inventory.get(uuid).unwrap().has_tag(TAG_STOWED));
        assert_eq!(sheet.needs.hunger, 85.0);
        assert!(world.rooms[START_ROOM_ID].objects.is_empty());

        let result = wield(&mut world, &session, "apple");
        assert!(matches!(result.error, Some(ServiceError::Validation(_))));

        let result = eat(&mut world, &session, "apple");
        assert!(!result.is_err());
        let sheet = world.sheet_for_session(&session).unwrap();
        assert_eq!(sheet.needs.hunger, 95.0);
        assert!(sheet.inventory.get(uuid).is_none());
    }

    #[test]
    fn test_eat_clamps_at_hundred() {
        let (mut world, session) = world_with_session();
        drop_in_room(&mut world, apple());
        let result = eat(&mut world, &session, "apple");
        assert!(!result.is_err());
        assert_eq!(
            world.sheet_for_session(&session).unwrap().needs.hunger,
            100.0
        );
    }

    #[test]
    fn test_immovable_cannot_be_picked_up() {
        let (mut world, session) = world_with_session();
        let mut anvil = GameObject::new("anvil", "heavy");
        anvil.add_tag(TAG_IMMOVABLE);
        drop_in_room(&mut world, anvil);

        let result = pick_up(&mut world, &session, "anvil");
        assert!(matches!(result.error, Some(ServiceError::Constraint(_))));
        assert_eq!(world.rooms[START_ROOM_ID].objects.len(), 1);
    }

    #[test]
    fn test_search_spawns_hinted_loot_then_refuses() {
        let (mut world, session) = world_with_session();
        let mut chest = GameObject::new("chest", "banded");
        chest.add_tag(TAG_CONTAINER);
        drop_in_room(&mut world, chest);

        let mut coin = GameObject::new("coin", "");
        coin.add_tag(TAG_SMALL);
        coin.loot_location_hint = Some(LootLocationHint {
            display_name: "chest".into(),
        });
        world.object_templates.insert("coin".into(), coin);

        // A template hinted at some other container stays put
        let mut gem = GameObject::new("gem", "");
        gem.add_tag(TAG_SMALL);
        gem.loot_location_hint = Some(LootLocationHint {
            display_name: "urn".into(),
        });
        world.object_templates.insert("gem".into(), gem);

        let result = search(&mut world, &session, "chest");
        assert!(!result.is_err());
        assert!(result.emits[0].content.contains("coin"));
        let chest = world.rooms[START_ROOM_ID]
            .objects
            .values()
            .find(|o| o.name == "chest")
            .unwrap();
        assert_eq!(chest.contents.len(), 1);
        assert_eq!(chest.contents[0].name, "coin");

        let result = search(&mut world, &session, "chest");
        assert!(matches!(result.error, Some(ServiceError::Constraint(_))));
        assert!(result
            .error
            .unwrap()
            .to_string()
            .contains("already been searched"));
    }

    #[test]
    fn test_open_requires_search_then_lists_and_loot_is_takeable() {
        let (mut world, session) = world_with_session();
        let mut chest = GameObject::new("chest", "");
        chest.add_tag(TAG_CONTAINER);
        drop_in_room(&mut world, chest);
        let mut coin = GameObject::new("coin", "");
        coin.add_tag(TAG_SMALL);
        coin.loot_location_hint = Some(LootLocationHint {
            display_name: "chest".into(),
        });
        world.object_templates.insert("coin".into(), coin);

        let result = open(&mut world, &session, "chest");
        assert!(matches!(result.error, Some(ServiceError::Constraint(_))));

        search(&mut world, &session, "chest");
        let result = open(&mut world, &session, "chest");
        assert!(!result.is_err());
        assert!(result.emits[0].content.contains("coin"));

        // Contents of a searched container are reachable by pick up
        let result = pick_up(&mut world, &session, "coin");
        assert!(!result.is_err());
        let sheet = world.sheet_for_session(&session).unwrap();
        assert_eq!(sheet.inventory.count_named("coin"), 1);
    }

    #[test]
    fn test_claim_and_unclaim() {
        let (mut world, session) = world_with_session();
        let mut bed = GameObject::new("bed", "straw");
        bed.add_tag(crate::world::object::TAG_BED);
        let uuid = drop_in_room(&mut world, bed);
        let actor_id = world.players[&session].user_id;

        assert!(!claim(&mut world, &session, "bed").is_err());
        assert_eq!(
            world.rooms[START_ROOM_ID].objects[&uuid].owner,
            Some(actor_id)
        );

        // Claiming again is refused, unclaiming works
        assert!(claim(&mut world, &session, "bed").is_err());
        assert!(!unclaim(&mut world, &session, "bed").is_err());
        assert_eq!(world.rooms[START_ROOM_ID].objects[&uuid].owner, None);
    }

    #[test]
    fn test_craft_reports_missing_components() {
        let (mut world, session) = world_with_session();
        let mut bench = GameObject::new("workbench", "");
        bench.add_tag(TAG_IMMOVABLE);
        bench.add_tag("craft spot:torch");
        drop_in_room(&mut world, bench);

        let mut torch = GameObject::new("torch", "");
        torch.add_tag(TAG_SMALL);
        torch.crafting_recipe = vec!["stick".into(), "rag".into()];
        world.object_templates.insert("torch".into(), torch);

        // Holding just the stick
        let mut stick = GameObject::new("stick", "");
        stick.add_tag(TAG_SMALL);
        world
            .sheet_for_session_mut(&session)
            .unwrap()
            .inventory
            .place(stick)
            .unwrap();

        let result = craft(&mut world, &session, "torch");
        let err = result.error.unwrap().to_string();
        assert!(err.contains("rag"));
        assert!(!err.contains("stick"));

        // Add the rag and it works, consuming both
        let mut rag = GameObject::new("rag", "");
        rag.add_tag(TAG_SMALL);
        world
            .sheet_for_session_mut(&session)
            .unwrap()
            .inventory
            .place(rag)
            .unwrap();
        let result = craft(&mut world, &session, "torch");
        assert!(!result.is_err(), "{:?}", result.error);
        let sheet = world.sheet_for_session(&session).unwrap();
        assert_eq!(sheet.inventory.count_named("stick"), 0);
        assert_eq!(sheet.inventory.count_named("rag"), 0);
        assert_eq!(sheet.inventory.count_named("torch"), 1);
    }

    #[test]
    fn test_consume_spawns_deconstruct_outputs() {
        let (mut world, session) = world_with_session();
        let core = GameObject::new("apple core", "");
        world.object_templates.insert("apple core".into(), core);

        let mut fruit = apple();
        fruit.deconstruct_recipe = vec!["apple core".into()];
        drop_in_room(&mut world, fruit);

        assert!(!eat(&mut world, &session, "apple").is_err());
        let names: Vec<_> = world.rooms[START_ROOM_ID]
            .objects
            .values()
            .map(|o| o.name.as_str())
            .collect();
        assert_eq!(names, vec!["apple core"]);
    }
}
