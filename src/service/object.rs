//! Object template administration and spawning

use itertools::Itertools;

use super::{OutboundMessage, ServiceResult};
use crate::error::ServiceError;
use crate::markup::{bold, code};
use crate::resolve::resolve;
use crate::world::object::GameObject;
use crate::world::World;

/// Create (or replace) an object template under a key
pub fn create_template(
    world: &mut World,
    key: &str,
    name: &str,
    description: &str,
    tags_csv: &str,
) -> ServiceResult {
    let key = key.trim();
    if key.is_empty() || name.trim().is_empty() {
        return ServiceResult::err(ServiceError::validation(
            "A template needs a key and a display name.",
        ));
    }

    let mut template = GameObject::new(name.trim(), description.trim());
    for tag in tags_csv.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        template.add_tag(tag);
    }

    let replaced = world
        .object_templates
        .insert(key.to_string(), template)
        .is_some();
    let verb = if replaced { "replaced" } else { "created" };
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "Template {} {verb}.",
            code(key)
        )))
        .saving()
}

pub fn delete_template(world: &mut World, key_query: &str) -> ServiceResult {
    let key = match resolve(key_query, world.object_templates.keys().map(String::as_str)) {
        Ok(key) => key,
        Err(err) => return ServiceResult::err(err),
    };
    world.object_templates.remove(&key);
    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "Template {} deleted.",
            code(&key)
        )))
        .saving()
}

pub fn list_templates(world: &World) -> ServiceResult {
    if world.object_templates.is_empty() {
        return ServiceResult::handled()
            .emit(OutboundMessage::system("No templates defined."));
    }
    let listing = world
        .object_templates
        .iter()
        .sorted_by_key(|(key, _)| key.as_str())
        .map(|(key, template)| format!("{} - {}", code(key), template.name))
        .join("\n");
    ServiceResult::handled().emit(OutboundMessage::system(listing))
}

/// Instantiate a template into the actor's current room
pub fn spawn_object(world: &mut World, session_id: &str, key_query: &str) -> ServiceResult {
    let key = match resolve(key_query, world.object_templates.keys().map(String::as_str)) {
        Ok(key) => key,
        Err(err) => return ServiceResult::err(err),
    };
    let Some(room_id) = world.player(session_id).map(|p| p.room_id.clone()) else {
        return ServiceResult::err(ServiceError::Integrity);
    };

    let instance = GameObject::instantiate(&world.object_templates[&key]);
    let name = instance.name.clone();
    let Some(room) = world.room_mut(&room_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    room.objects.insert(instance.uuid, instance);

    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "A {} appears.",
            bold(&name)
        )))
        .broadcast(
            room_id,
            OutboundMessage::system(format!("A {} appears out of nowhere.", bold(&name))),
        )
        .saving()
}

/// Remove an object from the actor's current room
pub fn delete_object(world: &mut World, session_id: &str, name_query: &str) -> ServiceResult {
    let Some(room_id) = world.player(session_id).map(|p| p.room_id.clone()) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let name = {
        let room = &world.rooms[&room_id];
        match resolve(name_query, room.object_names()) {
            Ok(name) => name,
            Err(err) => return ServiceResult::err(err),
        }
    };

    let Some(room) = world.room_mut(&room_id) else {
        return ServiceResult::err(ServiceError::Integrity);
    };
    let Some(uuid) = room
        .objects
        .values()
        .filter(|o| o.name == name)
        .map(|o| o.uuid)
        .sorted()
        .next()
    else {
        return ServiceResult::err(ServiceError::not_found(format!("No '{name}' here.")));
    };
    room.objects.remove(&uuid);

    ServiceResult::handled()
        .emit(OutboundMessage::system(format!(
            "The {} is gone.",
            bold(&name)
        )))
        .saving()
}

#[cfg(test)]
mod test {
    use super::*;
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
        (world, session)
    }

    #[test]
    fn test_template_lifecycle() {
        let (mut world, session) = world_with_session();
        let result = create_template(&mut world, "apple", "apple", "crisp", "small, Edible: 10");
        assert!(!result.is_err());
        let template_uuid = {
            let template = &world.object_templates["apple"];
            assert!(template.has_tag("small"));
            assert_eq!(template.tag_number("Edible"), Some(10));
            template.uuid
        };

        let result = spawn_object(&mut world, &session, "apple");
        assert!(!result.is_err());
        let room = &world.rooms[START_ROOM_ID];
        assert_eq!(room.objects.len(), 1);
        let spawned = room.objects.values().next().unwrap();
        assert_ne!(spawned.uuid, template_uuid);

        let result = delete_template(&mut world, "apple");
        assert!(!result.is_err());
        assert!(world.object_templates.is_empty());

        // Spawned instance outlives its template
        assert_eq!(world.rooms[START_ROOM_ID].objects.len(), 1);
    }

    #[test]
    fn test_delete_object_from_room() {
        let (mut world, session) = world_with_session();
        create_template(&mut world, "apple", "apple", "", "small");
        spawn_object(&mut world, &session, "apple");

        let result = delete_object(&mut world, &session, "app");
        assert!(!result.is_err());
        assert!(world.rooms[START_ROOM_ID].objects.is_empty());
    }

    #[test]
    fn test_spawn_unknown_template_suggests() {
        let (mut world, session) = world_with_session();
        create_template(&mut world, "apple", "apple", "", "");
        let result = spawn_object(&mut world, &session, "aple");
        assert!(matches!(result.error, Some(ServiceError::NotFound(_))));
    }
}
