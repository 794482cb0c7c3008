//! Schema migrations for the persisted world document
//!
//! The document carries a `world_version`; on load every migration with a
//! higher version is applied in ascending order. A migration works on a
//! copy of the document (its input is never mutated), is idempotent, and
//! stamps `world_version` when it completes. A failing migration aborts
//! the load; nothing partial is ever committed.

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::World;

/// Version a fully-migrated document sits at
pub const CURRENT_WORLD_VERSION: u32 = 5;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("world document is not an object")]
    NotAnObject,

    #[error("migration v{version} ({name}) failed: {reason}")]
    Failed {
        version: u32,
        name: &'static str,
        reason: String,
    },

    #[error("migrated document does not deserialize: {0}")]
    Deserialize(#[from] serde_json::Error),
}

struct Migration {
    version: u32,
    name: &'static str,
    apply: fn(&mut Map<String, Value>),
}

/// Every known migration, ascending
fn registry() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "add version field and world metadata",
            apply: add_version_and_metadata,
        },
        Migration {
            version: 2,
            name: "consolidate needs defaults",
            apply: backfill_needs,
        },
        Migration {
            version: 3,
            name: "ensure uuids and door/stairs id maps",
            apply: ensure_uuids,
        },
        Migration {
            version: 4,
            name: "ensure travel-point objects for doors and stairs",
            apply: ensure_travel_objects,
        },
        Migration {
            version: 5,
            name: "backfill combat fields",
            apply: backfill_combat,
        },
    ]
}

/// Apply all pending migrations to a document, returning whether anything
/// ran. The input is only replaced once every pending migration has
/// succeeded.
pub fn migrate_document(doc: &mut Value) -> Result<bool, MigrateError> {
    let Some(root) = doc.as_object() else {
        return Err(MigrateError::NotAnObject);
    };

    let current = root
        .get("world_version")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    if current >= CURRENT_WORLD_VERSION {
        return Ok(false);
    }

    // Work on a copy so a failure never leaves a half-migrated document
    let mut working = root.clone();
    for migration in registry().into_iter().filter(|m| m.version > current) {
        info!(
            "Applying world migration v{}: {}",
            migration.version, migration.name
        );
        (migration.apply)(&mut working);
        working.insert("world_version".into(), json!(migration.version));
    }

    *doc = Value::Object(working);
    Ok(true)
}

/// Migrate a raw document and deserialize it into a `World`
pub fn world_from_document(mut doc: Value) -> Result<World, MigrateError> {
    migrate_document(&mut doc)?;
    Ok(serde_json::from_value(doc)?)
}

// ---- v1 ----

fn add_version_and_metadata(root: &mut Map<String, Value>) {
    for (key, default) in [
        ("name", json!("TinyMUD")),
        ("description", json!("A small shared world.")),
        ("conflict", json!("")),
        ("safety_level", json!("PG-13")),
        ("advanced_goap_enabled", json!(false)),
        ("rooms", json!({})),
        ("users", json!({})),
        ("npc_sheets", json!({})),
        ("npc_ids", json!({})),
        ("object_templates", json!({})),
        ("relationships", json!({})),
        ("factions", json!({})),
    ] {
        root.entry(key).or_insert(default);
    }
}

// ---- v2 ----

fn backfill_needs(root: &mut Map<String, Value>) {
    for_each_sheet(root, |sheet| {
        let needs = sheet
            .entry("needs")
            .or_insert_with(|| json!({}))
            .as_object_mut();
        let Some(needs) = needs else {
            return;
        };
        for key in ["hunger", "thirst", "socialization", "sleep"] {
            let entry = needs.entry(key).or_insert(json!(100.0));
            clamp_number(entry, 0.0, 100.0, 100.0);
        }

        let extended = sheet
            .entry("extended_needs")
            .or_insert_with(|| json!({}))
            .as_object_mut();
        let Some(extended) = extended else {
            return;
        };
        for (key, default) in [
            ("safety", 100.0),
            ("wealth_desire", 50.0),
            ("social_status", 50.0),
        ] {
            let entry = extended.entry(key).or_insert(json!(default));
            clamp_number(entry, 0.0, 100.0, default);
        }
    });
}

// ---- v3 ----

fn ensure_uuids(root: &mut Map<String, Value>) {
    // Rooms get a uuid, and their door/stairs id maps get entries
    if let Some(rooms) = root.get_mut("rooms").and_then(Value::as_object_mut) {
        for (room_key, room) in rooms.iter_mut() {
            let Some(room) = room.as_object_mut() else {
                continue;
            };
            ensure_uuid_field(room);

            // The map key is authoritative for the room id
            if !room.get("id").is_some_and(|v| v.is_string()) {
                room.insert("id".into(), json!(room_key));
            }

            // Objects are keyed by uuid; the object's own field must agree
            if let Some(objects) = room.get_mut("objects").and_then(Value::as_object_mut) {
                for (key, object) in objects.iter_mut() {
                    if let Some(object) = object.as_object_mut() {
                        if !has_valid_uuid(object) {
                            object.insert("uuid".into(), json!(key));
                        }
                    }
                }
            }

            // Door name -> uuid map
            let door_names: Vec<String> = room
                .get("doors")
                .and_then(Value::as_object)
                .map(|doors| doors.keys().cloned().collect())
                .unwrap_or_default();
            let door_ids = room
                .entry("door_ids")
                .or_insert_with(|| json!({}))
                .as_object_mut();
            if let Some(door_ids) = door_ids {
                for name in door_names {
                    door_ids
                        .entry(name)
                        .or_insert_with(|| json!(Uuid::now_v7()));
                }
            }

            // Stairs ids where stairs exist
            for (target_key, id_key) in [
                ("stairs_up_to", "stairs_up_id"),
                ("stairs_down_to", "stairs_down_id"),
            ] {
                let has_stairs = room.get(target_key).is_some_and(|v| v.is_string());
                if has_stairs && !room.get(id_key).is_some_and(|v| v.is_string()) {
                    room.insert(id_key.into(), json!(Uuid::now_v7()));
                }
            }
        }
    }

    // Templates get uuids
    if let Some(templates) = root
        .get_mut("object_templates")
        .and_then(Value::as_object_mut)
    {
        for template in templates.values_mut().filter_map(Value::as_object_mut) {
            ensure_uuid_field(template);
        }
    }

    // Every NPC sheet gets an id in npc_ids
    let npc_names: Vec<String> = root
        .get("npc_sheets")
        .and_then(Value::as_object)
        .map(|sheets| sheets.keys().cloned().collect())
        .unwrap_or_default();
    let npc_ids = root
        .entry("npc_ids")
        .or_insert_with(|| json!({}))
        .as_object_mut();
    if let Some(npc_ids) = npc_ids {
        for name in npc_names {
            npc_ids.entry(name).or_insert_with(|| json!(Uuid::now_v7()));
        }
    }
}

// ---- v4 ----

fn ensure_travel_objects(root: &mut Map<String, Value>) {
    let Some(rooms) = root.get_mut("rooms").and_then(Value::as_object_mut) else {
        return;
    };

    for room in rooms.values_mut().filter_map(Value::as_object_mut) {
        // Doors
        let doors: Vec<(String, String)> = room
            .get("doors")
            .and_then(Value::as_object)
            .map(|doors| {
                doors
                    .iter()
                    .filter_map(|(name, target)| {
                        target.as_str().map(|t| (name.clone(), t.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        for (name, target) in doors {
            let id = door_id_for(room, &name);
            upsert_travel_object(room, id, &name, &target);
        }

        // Stairs
        for (target_key, id_key, name) in [
            ("stairs_up_to", "stairs_up_id", "stairs up"),
            ("stairs_down_to", "stairs_down_id", "stairs down"),
        ] {
            let Some(target) = room
                .get(target_key)
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            let id = match room.get(id_key).and_then(Value::as_str) {
                Some(raw) => Uuid::parse_str(raw).unwrap_or_else(|_| Uuid::now_v7()),
                None => Uuid::now_v7(),
            };
            room.insert(id_key.into(), json!(id));
            upsert_travel_object(room, id, name, &target);
        }
    }
}

/// Look up (or mint and record) the uuid behind a door name
fn door_id_for(room: &mut Map<String, Value>, door_name: &str) -> Uuid {
    let door_ids = room
        .entry("door_ids")
        .or_insert_with(|| json!({}))
        .as_object_mut();
    let Some(door_ids) = door_ids else {
        return Uuid::now_v7();
    };
    let entry = door_ids
        .entry(door_name.to_string())
        .or_insert_with(|| json!(Uuid::now_v7()));
    entry
        .as_str()
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .unwrap_or_else(|| {
            let fresh = Uuid::now_v7();
            *entry = json!(fresh);
            fresh
        })
}

/// Create or repair the travel-point object behind a door/stair
fn upsert_travel_object(room: &mut Map<String, Value>, id: Uuid, name: &str, target: &str) {
    let objects = room
        .entry("objects")
        .or_insert_with(|| json!({}))
        .as_object_mut();
    let Some(objects) = objects else {
        return;
    };

    let object = objects
        .entry(id.to_string())
        .or_insert_with(|| {
            json!({
                "uuid": id,
                "name": name,
                "description": format!("A way through to {target}."),
            })
        })
        .as_object_mut();
    let Some(object) = object else {
        return;
    };

    object.insert("link_target_room_id".into(), json!(target));
    let tags = object
        .entry("tags")
        .or_insert_with(|| json!([]))
        .as_array_mut();
    if let Some(tags) = tags {
        for required in ["Immovable", "Travel Point"] {
            if !tags.iter().any(|t| t.as_str() == Some(required)) {
                tags.push(json!(required));
            }
        }
    }
}

// ---- v5 ----

fn backfill_combat(root: &mut Map<String, Value>) {
    for_each_sheet(root, |sheet| {
        let combat = sheet
            .entry("combat")
            .or_insert_with(|| json!({}))
            .as_object_mut();
        let Some(combat) = combat else {
            return;
        };
        // Morale stays integral so typed deserialization accepts it
        let morale = combat
            .get("morale")
            .and_then(Value::as_f64)
            .unwrap_or(50.0)
            .clamp(0.0, 100.0) as i64;
        combat.insert("morale".into(), json!(morale));
        combat.entry("yielded").or_insert(json!(false));
        combat.entry("is_dead").or_insert(json!(false));
    });
}

// ---- shared helpers ----

/// Visit every character sheet in the document: each user's nested sheet
/// and each entry of `npc_sheets`
fn for_each_sheet(root: &mut Map<String, Value>, mut visit: impl FnMut(&mut Map<String, Value>)) {
    if let Some(users) = root.get_mut("users").and_then(Value::as_object_mut) {
        for user in users.values_mut().filter_map(Value::as_object_mut) {
            let sheet = user
                .entry("sheet")
                .or_insert_with(|| json!({}))
                .as_object_mut();
            if let Some(sheet) = sheet {
                visit(sheet);
            }
        }
    }
    if let Some(sheets) = root.get_mut("npc_sheets").and_then(Value::as_object_mut) {
        for sheet in sheets.values_mut().filter_map(Value::as_object_mut) {
            visit(sheet);
        }
    }
}

fn has_valid_uuid(object: &Map<String, Value>) -> bool {
    object
        .get("uuid")
        .and_then(Value::as_str)
        .is_some_and(|raw| Uuid::parse_str(raw).is_ok())
}

fn ensure_uuid_field(object: &mut Map<String, Value>) {
    if !has_valid_uuid(object) {
        object.insert("uuid".into(), json!(Uuid::now_v7()));
    }
}

/// Clamp a numeric field in place; anything non-numeric becomes the
/// fallback
fn clamp_number(value: &mut Value, min: f64, max: f64, fallback: f64) {
    let current = value.as_f64().unwrap_or(fallback);
    *value = json!(current.clamp(min, max));
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn legacy_doc() -> Value {
        // The shape of a pre-versioning world file: no version, sparse
        // sheets, door maps without ids or objects
        json!({
            "rooms": {
                "start": {
                    "id": "start",
                    "description": "The beginning.",
                    "doors": { "oak door": "tavern" },
                },
                "tavern": {
                    "id": "tavern",
                    "description": "Warm.",
                    "doors": { "oak door": "start" },
                    "stairs_up_to": "loft",
                },
                "loft": {
                    "id": "loft",
                    "description": "Low beams.",
                    "stairs_down_to": "tavern",
                },
            },
            "npc_sheets": {
                "Gareth": { "name": "Gareth", "needs": { "hunger": 150.0 } },
            },
        })
    }

    #[test]
    fn test_full_migration_of_legacy_doc() {
        let mut doc = legacy_doc();
        let changed = migrate_document(&mut doc).unwrap();
        assert!(changed);
        assert_eq!(doc["world_version"], json!(CURRENT_WORLD_VERSION));

        // Needs clamped and defaulted
        let gareth = &doc["npc_sheets"]["Gareth"];
        assert_eq!(gareth["needs"]["hunger"], json!(100.0));
        assert_eq!(gareth["needs"]["thirst"], json!(100.0));
        assert_eq!(gareth["combat"]["morale"], json!(50));

        // Every npc got an id
        assert!(doc["npc_ids"]["Gareth"].is_string());

        // Door got an id and a travel-point object
        let start = &doc["rooms"]["start"];
        let door_id = start["door_ids"]["oak door"].as_str().unwrap();
        let door_object = &start["objects"][door_id];
        assert_eq!(door_object["link_target_room_id"], json!("tavern"));
        let tags = door_object["tags"].as_array().unwrap();
        assert!(tags.contains(&json!("Immovable")));
        assert!(tags.contains(&json!("Travel Point")));

        // Stairs too
        let tavern = &doc["rooms"]["tavern"];
        let stairs_id = tavern["stairs_up_id"].as_str().unwrap();
        assert_eq!(
            tavern["objects"][stairs_id]["link_target_room_id"],
            json!("loft")
        );
    }

    #[test]
    fn test_migrated_doc_deserializes() {
        let world = world_from_document(legacy_doc()).unwrap();
        assert_eq!(world.world_version, CURRENT_WORLD_VERSION);
        assert!(world.npc_ids.contains_key("Gareth"));
    }

    #[test]
    fn test_migration_is_idempotent() {
        let mut once = legacy_doc();
        migrate_document(&mut once).unwrap();
        let mut twice = once.clone();
        let changed = migrate_document(&mut twice).unwrap();
        assert!(!changed);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_non_object_document_fails() {
        let mut doc = json!([1, 2, 3]);
        assert!(matches!(
            migrate_document(&mut doc),
            Err(MigrateError::NotAnObject)
        ));
    }

    #[test]
    fn test_current_version_is_untouched() {
        let mut doc = json!({ "world_version": CURRENT_WORLD_VERSION, "rooms": {} });
        let before = doc.clone();
        assert!(!migrate_document(&mut doc).unwrap());
        assert_eq!(doc, before);
    }

    proptest! {
        // Whatever junk the needs fields hold, migration lands them in
        // range and a second run changes nothing
        #[test]
        fn prop_needs_backfill_clamps_and_settles(
            hunger in -500.0f64..500.0,
            thirst in -500.0f64..500.0,
        ) {
            let mut doc = json!({
                "npc_sheets": {
                    "N": { "name": "N", "needs": { "hunger": hunger, "thirst": thirst } },
                },
            });
            migrate_document(&mut doc).unwrap();

            let needs = &doc["npc_sheets"]["N"]["needs"];
            let hunger_after = needs["hunger"].as_f64().unwrap();
            let thirst_after = needs["thirst"].as_f64().unwrap();
            prop_assert!((0.0..=100.0).contains(&hunger_after));
            prop_assert!((0.0..=100.0).contains(&thirst_after));

            let settled = doc.clone();
            let mut again = doc;
            migrate_document(&mut again).unwrap();
            prop_assert_eq!(settled, again);
        }
    }
}
