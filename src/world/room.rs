use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use super::object::GameObject;

/// Names movement uses for stair traversal
pub const STAIRS_UP: &str = "up";
pub const STAIRS_DOWN: &str = "down";

/// Who may pass a locked door
///
/// Both sets empty means nobody: a lock with no rules is a sealed door,
/// not an open one. Relationship rules only count while the referenced
/// user still exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DoorLock {
    /// Users allowed through directly
    #[serde(default)]
    pub allow_ids: HashSet<Uuid>,

    /// (relationship-type, other-user) pairs: the actor passes if the
    /// world records that relationship from the actor towards that user
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_rel: Vec<(String, Uuid)>,
}

/// One room of the world
///
/// Doors and stairs are dual-represented: the name/target maps here are
/// the fast traversal lookup, and a matching `Travel Point` object in
/// `objects` carries the interactive affordances. The room service keeps
/// the two views agreeing; the auditor checks them.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Room {
    /// Short opaque key, also the key in `World::rooms`
    pub id: String,

    #[serde(default = "Uuid::now_v7")]
    pub uuid: Uuid,

    #[serde(default)]
    pub description: String,

    /// Live session ids currently present; meaningless across restarts
    /// and cleared by cleanup on load
    #[serde(default)]
    pub players: HashSet<String>,

    /// Display names of NPCs in this room
    #[serde(default)]
    pub npcs: BTreeSet<String>,

    /// Door name -> target room id
    #[serde(default)]
    pub doors: HashMap<String, String>,

    /// Door name -> UUID of the door's travel-point object
    #[serde(default)]
    pub door_ids: HashMap<String, Uuid>,

    pub stairs_up_to: Option<String>,
    pub stairs_down_to: Option<String>,
    pub stairs_up_id: Option<Uuid>,
    pub stairs_down_id: Option<Uuid>,

    /// Objects lying in the room
    #[serde(default)]
    pub objects: HashMap<Uuid, GameObject>,

    /// Room tags: `external`, `internal`, `ownable`
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Door name -> lock policy
    #[serde(default)]
    pub door_locks: HashMap<String, DoorLock>,
}

impl Room {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uuid: Uuid::now_v7(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Every traversable exit as (name, target room id). Stairs appear
    /// under the fixed names `up` and `down`.
    pub fn exits(&self) -> Vec<(String, String)> {
        let mut exits: Vec<(String, String)> = self
            .doors
            .iter()
            .map(|(name, target)| (name.clone(), target.clone()))
            .collect();
        if let Some(target) = &self.stairs_up_to {
            exits.push((STAIRS_UP.to_string(), target.clone()));
        }
        if let Some(target) = &self.stairs_down_to {
            exits.push((STAIRS_DOWN.to_string(), target.clone()));
        }
        exits.sort_unstable();
        exits
    }

    /// Find a room object by display name (first match in uuid order, for
    /// callers that already resolved the name)
    pub fn object_by_name(&self, name: &str) -> Option<&GameObject> {
        let mut candidates: Vec<&GameObject> =
            self.objects.values().filter(|o| o.name == name).collect();
        candidates.sort_unstable_by_key(|o| o.uuid);
        candidates.into_iter().next()
    }

    pub fn object_names(&self) -> Vec<&str> {
        self.objects.values().map(|o| o.name.as_str()).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_exits_include_stairs_under_fixed_names() {
        let mut room = Room::new("attic", "dusty");
        room.doors.insert("oak door".into(), "hall".into());
        room.stairs_down_to = Some("landing".into());

        let exits = room.exits();
        assert!(exits.contains(&("oak door".into(), "hall".into())));
        assert!(exits.contains(&(STAIRS_DOWN.to_string(), "landing".into())));
        assert_eq!(exits.len(), 2);
    }

    #[test]
    fn test_object_by_name_is_deterministic() {
        let mut room = Room::new("cellar", "");
        let a = GameObject::new("barrel", "one");
        let b = GameObject::new("barrel", "two");
        let first = a.uuid.min(b.uuid);
        room.objects.insert(a.uuid, a);
        room.objects.insert(b.uuid, b);

        assert_eq!(room.object_by_name("barrel").unwrap().uuid, first);
    }
}
