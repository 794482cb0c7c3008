use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

/// Size class tags; govern which inventory slots can hold an object
pub const TAG_SMALL: &str = "small";
pub const TAG_LARGE: &str = "large";

/// Doors and stairs carry both of these plus a `link_target_room_id`
pub const TAG_TRAVEL_POINT: &str = "Travel Point";
pub const TAG_IMMOVABLE: &str = "Immovable";

/// Containers can be searched once and then opened
pub const TAG_CONTAINER: &str = "Container";

/// Wieldable in a hand slot
pub const TAG_WEAPON: &str = "weapon";

/// Runtime marker set while an object sits in a stow slot
pub const TAG_STOWED: &str = "stowed";

/// Runtime marker set after a container's first search
pub const TAG_SEARCHED: &str = "searched";

/// Sleepable, when owned
pub const TAG_BED: &str = "bed";

/// Worth stealing, as far as an unscrupulous NPC is concerned
pub const TAG_VALUABLE: &str = "valuable";

/// Dynamic tag prefix adding a `Craft <template>` action
pub const TAG_CRAFT_SPOT_PREFIX: &str = "craft spot:";

/// Numeric affordance keys, matched case-insensitively when parsing
pub const AFFORDANCE_EDIBLE: &str = "Edible";
pub const AFFORDANCE_DRINKABLE: &str = "Drinkable";
pub const AFFORDANCE_DAMAGE: &str = "Damage";
pub const AFFORDANCE_DEFENSE: &str = "Defense";

/// Which inventory slots an object may occupy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Small,
    Large,
    /// No size tag; only hands can hold it
    HandOnly,
}

/// Hints templates use to decide where search-loot spawns
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LootLocationHint {
    /// Display name of the container this loot belongs in
    #[serde(default)]
    pub display_name: String,
}

/// An object in the world: anything from an apple to a door
///
/// Lives either in a room's `objects` map or in exactly one inventory
/// slot, never both. Behaviour is tag-driven; the recognized tags are the
/// constants above, everything else is flavour.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GameObject {
    /// Stable identity, preserved across saves
    #[serde(default = "Uuid::now_v7")]
    pub uuid: Uuid,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Owning user (or NPC) id, if claimed
    pub owner: Option<Uuid>,

    /// For travel points, the room this leads to
    pub link_target_room_id: Option<String>,

    /// Free-form semantic tags
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// What it's made of
    pub material: Option<String>,

    /// Component display names needed to craft one of these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub crafting_recipe: Vec<String>,

    /// Template keys spawned when this is consumed/deconstructed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deconstruct_recipe: Vec<String>,

    /// For templates: which container's first search spawns this
    pub loot_location_hint: Option<LootLocationHint>,

    /// Containers hold four internal slots: two small, two large
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<GameObject>,
}

/// Internal capacity of a container, per size class
pub const CONTAINER_SMALL_SLOTS: usize = 2;
pub const CONTAINER_LARGE_SLOTS: usize = 2;

impl GameObject {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::now_v7(),
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Deep-copy a template into a live instance with a fresh identity
    /// (nested contents get fresh identities too)
    pub fn instantiate(template: &Self) -> Self {
        let mut instance = Self {
            uuid: Uuid::now_v7(),
            owner: None,
            ..template.clone()
        };
        for held in &mut instance.contents {
            held.uuid = Uuid::now_v7();
        }
        instance
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.remove(tag);
    }

    /// Parse a numeric affordance like `Edible: 10` out of the tag set
    ///
    /// The key is matched case-insensitively; the first tag that parses
    /// wins (the tag set is ordered, so this is deterministic).
    pub fn tag_number(&self, key: &str) -> Option<i32> {
        let key_lower = key.to_lowercase();
        self.tags.iter().find_map(|tag| {
            let (tag_key, value) = tag.split_once(':')?;
            if tag_key.trim().to_lowercase() != key_lower {
                return None;
            }
            value.trim().parse().ok()
        })
    }

    /// The template key named by a `craft spot:` tag, if any
    pub fn craft_spot_key(&self) -> Option<&str> {
        self.tags
            .iter()
            .find_map(|tag| tag.strip_prefix(TAG_CRAFT_SPOT_PREFIX))
            .map(str::trim)
    }

    pub fn size_class(&self) -> SizeClass {
        if self.has_tag(TAG_SMALL) {
            SizeClass::Small
        } else if self.has_tag(TAG_LARGE) {
            SizeClass::Large
        } else {
            SizeClass::HandOnly
        }
    }

    pub fn is_travel_point(&self) -> bool {
        self.has_tag(TAG_TRAVEL_POINT)
    }

    pub fn is_container(&self) -> bool {
        self.has_tag(TAG_CONTAINER)
    }

    pub fn is_edible(&self) -> bool {
        self.tag_number(AFFORDANCE_EDIBLE).is_some()
    }

    pub fn is_drinkable(&self) -> bool {
        self.tag_number(AFFORDANCE_DRINKABLE).is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tag_number_is_case_insensitive_on_key() {
        let mut apple = GameObject::new("apple", "crisp");
        apple.add_tag("edible: 10");
        assert_eq!(apple.tag_number(AFFORDANCE_EDIBLE), Some(10));

        let mut flask = GameObject::new("flask", "full");
        flask.add_tag("Drinkable: 25");
        assert_eq!(flask.tag_number("drinkable"), Some(25));
    }

    #[test]
    fn test_tag_number_ignores_garbage() {
        let mut thing = GameObject::new("thing", "");
        thing.add_tag("Edible: lots");
        assert_eq!(thing.tag_number(AFFORDANCE_EDIBLE), None);
    }

    #[test]
    fn test_craft_spot_key() {
        let mut bench = GameObject::new("workbench", "sturdy");
        bench.add_tag("craft spot:torch");
        assert_eq!(bench.craft_spot_key(), Some("torch"));
    }

    #[test]
    fn test_instantiate_gets_fresh_uuid_and_no_owner() {
        let mut template = GameObject::new("sword", "sharp");
        template.add_tag(TAG_WEAPON);
        template.owner = Some(Uuid::now_v7());

        let instance = GameObject::instantiate(&template);
        assert_ne!(instance.uuid, template.uuid);
        assert_eq!(instance.owner, None);
        assert!(instance.has_tag(TAG_WEAPON));
    }

    #[test]
    fn test_size_class() {
        let mut pebble = GameObject::new("pebble", "");
        pebble.add_tag(TAG_SMALL);
        assert_eq!(pebble.size_class(), SizeClass::Small);

        let mut crate_obj = GameObject::new("crate", "");
        crate_obj.add_tag(TAG_LARGE);
        assert_eq!(crate_obj.size_class(), SizeClass::Large);

        let odd = GameObject::new("odd thing", "");
        assert_eq!(odd.size_class(), SizeClass::HandOnly);
    }
}
