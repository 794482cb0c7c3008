use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use super::object::{GameObject, SizeClass, TAG_STOWED};

/// Inventory layout: 8 fixed slots per character
pub const SLOT_COUNT: usize = 8;
pub const SLOT_LEFT_HAND: usize = 0;
pub const SLOT_RIGHT_HAND: usize = 1;
pub const SMALL_STOW_SLOTS: [usize; 4] = [2, 3, 4, 5];
pub const LARGE_STOW_SLOTS: [usize; 2] = [6, 7];

/// GURPS-style attribute bounds
pub const ATTR_MIN: i32 = 3;
pub const ATTR_MAX: i32 = 18;

/// The 11 opposing-trait axes of the psychosocial matrix, each -10..=10
pub const MATRIX_AXES: [&str; 11] = [
    "authoritarian_egalitarian",
    "individualist_collectivist",
    "aggressive_peaceful",
    "cautious_impulsive",
    "stoic_expressive",
    "pragmatic_idealistic",
    "traditional_progressive",
    "suspicious_trusting",
    "frugal_lavish",
    "humble_proud",
    "serious_playful",
];

pub const MATRIX_MIN: i32 = -10;
pub const MATRIX_MAX: i32 = 10;

/// Cap on remembered events so sheets don't grow without bound
const MEMORY_CAP: usize = 100;

fn default_attr() -> i32 {
    10
}

fn default_need() -> f32 {
    100.0
}

fn default_drive() -> f32 {
    50.0
}

fn default_morale() -> i32 {
    50
}

/// Core GURPS-style attributes, 3..=18
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attributes {
    #[serde(default = "default_attr")]
    pub strength: i32,
    #[serde(default = "default_attr")]
    pub dexterity: i32,
    #[serde(default = "default_attr")]
    pub intelligence: i32,
    #[serde(default = "default_attr")]
    pub health: i32,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            intelligence: 10,
            health: 10,
        }
    }
}

/// Stats derived from attributes at creation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DerivedStats {
    #[serde(default)]
    pub hp: i32,
    #[serde(default)]
    pub max_hp: i32,
    #[serde(default)]
    pub will: i32,
    #[serde(default)]
    pub perception: i32,
    #[serde(default)]
    pub fp: i32,
    #[serde(default)]
    pub max_fp: i32,
}

impl DerivedStats {
    fn from_attributes(attributes: &Attributes) -> Self {
        Self {
            hp: attributes.health,
            max_hp: attributes.health,
            will: attributes.intelligence,
            perception: attributes.intelligence,
            fp: attributes.health,
            max_fp: attributes.health,
        }
    }
}

/// Fate-style aspects
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Aspects {
    #[serde(default)]
    pub high_concept: String,
    #[serde(default)]
    pub trouble: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub focus: String,
}

/// Combat state
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CombatState {
    /// 0..=100, feeds the yield roll
    #[serde(default = "default_morale")]
    pub morale: i32,

    /// Yielded characters take damage but don't retaliate
    #[serde(default)]
    pub yielded: bool,

    #[serde(default)]
    pub is_dead: bool,

    pub equipped_weapon: Option<Uuid>,
    pub equipped_armor: Option<Uuid>,
}

impl Default for CombatState {
    fn default() -> Self {
        Self {
            morale: default_morale(),
            yielded: false,
            is_dead: false,
            equipped_weapon: None,
            equipped_armor: None,
        }
    }
}

/// Basic needs, 0..=100 where 100 is fully satisfied
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Needs {
    #[serde(default = "default_need")]
    pub hunger: f32,
    #[serde(default = "default_need")]
    pub thirst: f32,
    #[serde(default = "default_need")]
    pub socialization: f32,
    #[serde(default = "default_need")]
    pub sleep: f32,
}

impl Default for Needs {
    fn default() -> Self {
        Self {
            hunger: 100.0,
            thirst: 100.0,
            socialization: 100.0,
            sleep: 100.0,
        }
    }
}

impl Needs {
    pub fn clamp_all(&mut self) {
        self.hunger = self.hunger.clamp(0.0, 100.0);
        self.thirst = self.thirst.clamp(0.0, 100.0);
        self.socialization = self.socialization.clamp(0.0, 100.0);
        self.sleep = self.sleep.clamp(0.0, 100.0);
    }

    /// The least satisfied need, as (name, value)
    pub fn most_pressing(&self) -> (&'static str, f32) {
        // Fixed check order keeps ties deterministic
        let mut worst = ("hunger", self.hunger);
        for (name, value) in [
            ("thirst", self.thirst),
            ("socialization", self.socialization),
            ("sleep", self.sleep),
        ] {
            if value < worst.1 {
                worst = (name, value);
            }
        }
        worst
    }
}

/// Longer-horizon drives that feed the autonomy evaluator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtendedNeeds {
    #[serde(default = "default_need")]
    pub safety: f32,
    #[serde(default = "default_drive")]
    pub wealth_desire: f32,
    #[serde(default = "default_drive")]
    pub social_status: f32,
}

impl Default for ExtendedNeeds {
    fn default() -> Self {
        Self {
            safety: 100.0,
            wealth_desire: 50.0,
            social_status: 50.0,
        }
    }
}

/// Personality traits, 0..=100
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Personality {
    #[serde(default = "default_drive")]
    pub responsibility: f32,
    #[serde(default = "default_drive")]
    pub aggression: f32,
    #[serde(default = "default_drive")]
    pub confidence: f32,
    #[serde(default = "default_drive")]
    pub curiosity: f32,
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            responsibility: 50.0,
            aggression: 50.0,
            confidence: 50.0,
            curiosity: 50.0,
        }
    }
}

/// One queued step of an NPC plan, as produced by the planner (AI or
/// offline). Kept as a raw record; the executor parses it into a typed
/// action and drops the whole plan if any step doesn't parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl PlanStep {
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// Planner bookkeeping for NPCs
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlannerState {
    #[serde(default)]
    pub action_points: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan_queue: Vec<PlanStep>,

    #[serde(default)]
    pub sleeping_ticks_remaining: u32,

    pub sleeping_bed_uuid: Option<Uuid>,
}

/// The 8-slot inventory
///
/// 0 = left hand, 1 = right hand, 2-5 small stow, 6-7 large stow. Hands
/// take anything; stow slots are size-gated. Stowing tags the object
/// `stowed`, moving it to a hand clears that.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Inventory(pub [Option<GameObject>; SLOT_COUNT]);

impl Inventory {
    /// Slots a given size class may occupy, in placement-preference order
    fn placement_order(size: SizeClass) -> Vec<usize> {
        match size {
            SizeClass::Small => vec![2, 3, 4, 5, SLOT_RIGHT_HAND, SLOT_LEFT_HAND],
            SizeClass::Large => vec![6, 7, SLOT_RIGHT_HAND, SLOT_LEFT_HAND],
            SizeClass::HandOnly => vec![SLOT_RIGHT_HAND, SLOT_LEFT_HAND],
        }
    }

    /// Whether `slot` is allowed to hold an object of `size`
    pub fn slot_accepts(slot: usize, size: SizeClass) -> bool {
        match slot {
            SLOT_LEFT_HAND | SLOT_RIGHT_HAND => true,
            s if SMALL_STOW_SLOTS.contains(&s) => size == SizeClass::Small,
            s if LARGE_STOW_SLOTS.contains(&s) => size == SizeClass::Large,
            _ => false,
        }
    }

    /// Place an object into the first free legal slot, returning the slot
    /// index, or hand the object back if nothing fits
    pub fn place(&mut self, mut object: GameObject) -> Result<usize, GameObject> {
        let order = Self::placement_order(object.size_class());
        let Some(slot) = order.into_iter().find(|i| self.0[*i].is_none()) else {
            return Err(object);
        };

        if slot == SLOT_LEFT_HAND || slot == SLOT_RIGHT_HAND {
            object.remove_tag(TAG_STOWED);
        } else {
            object.add_tag(TAG_STOWED);
        }
        self.0[slot] = Some(object);
        Ok(slot)
    }

    /// Move an already-held object into a free hand (for wielding)
    pub fn move_to_hand(&mut self, uuid: Uuid) -> Option<usize> {
        let from = self.slot_of(uuid)?;
        if from == SLOT_LEFT_HAND || from == SLOT_RIGHT_HAND {
            return Some(from);
        }
        let hand = [SLOT_RIGHT_HAND, SLOT_LEFT_HAND]
            .into_iter()
            .find(|i| self.0[*i].is_none())?;
        let mut object = self.0[from].take()?;
        object.remove_tag(TAG_STOWED);
        self.0[hand] = Some(object);
        Some(hand)
    }

    pub fn slot_of(&self, uuid: Uuid) -> Option<usize> {
        self.0
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|o| o.uuid == uuid))
    }

    pub fn get(&self, uuid: Uuid) -> Option<&GameObject> {
        self.0
            .iter()
            .flatten()
            .find(|object| object.uuid == uuid)
    }

    pub fn remove(&mut self, uuid: Uuid) -> Option<GameObject> {
        let slot = self.slot_of(uuid)?;
        let mut object = self.0[slot].take()?;
        object.remove_tag(TAG_STOWED);
        Some(object)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &GameObject)> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|o| (i, o)))
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.slot_of(uuid).is_some()
    }

    /// How many held objects share a display name (crafting checks)
    pub fn count_named(&self, name: &str) -> usize {
        self.iter().filter(|(_, o)| o.name == name).count()
    }
}

/// A character sheet, shared by player characters and NPCs
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CharacterSheet {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub attributes: Attributes,

    #[serde(default)]
    pub derived: DerivedStats,

    #[serde(default)]
    pub aspects: Aspects,

    /// 11 opposing-trait axes, each clamped to -10..=10
    #[serde(default)]
    pub matrix: HashMap<String, i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advantages: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disadvantages: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quirks: Vec<String>,

    #[serde(default)]
    pub combat: CombatState,

    #[serde(default)]
    pub needs: Needs,

    #[serde(default)]
    pub extended_needs: ExtendedNeeds,

    #[serde(default)]
    pub personality: Personality,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory: Vec<String>,

    /// Opinion of other entities, -100..=100
    #[serde(default)]
    pub relationships: HashMap<String, i32>,

    #[serde(default)]
    pub planner: PlannerState,

    #[serde(default)]
    pub inventory: Inventory,
}

impl CharacterSheet {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let attributes = Attributes::default();
        let derived = DerivedStats::from_attributes(&attributes);
        let matrix = MATRIX_AXES.iter().map(|axis| (axis.to_string(), 0)).collect();
        Self {
            name: name.into(),
            description: description.into(),
            attributes,
            derived,
            matrix,
            ..Default::default()
        }
    }

    /// Set a core attribute, clamped to the GURPS band. Returns false for
    /// an unknown key.
    pub fn set_attribute(&mut self, key: &str, value: i32) -> bool {
        let value = value.clamp(ATTR_MIN, ATTR_MAX);
        match key {
            "strength" => self.attributes.strength = value,
            "dexterity" => self.attributes.dexterity = value,
            "intelligence" => self.attributes.intelligence = value,
            "health" => self.attributes.health = value,
            _ => return false,
        }
        true
    }

    pub fn set_aspect(&mut self, key: &str, value: &str) -> bool {
        match key {
            "high_concept" => self.aspects.high_concept = value.to_string(),
            "trouble" => self.aspects.trouble = value.to_string(),
            "background" => self.aspects.background = value.to_string(),
            "focus" => self.aspects.focus = value.to_string(),
            _ => return false,
        }
        true
    }

    /// Set a matrix axis, clamped. Returns false for an unknown axis.
    pub fn set_matrix_axis(&mut self, axis: &str, value: i32) -> bool {
        if !MATRIX_AXES.contains(&axis) {
            return false;
        }
        self.matrix
            .insert(axis.to_string(), value.clamp(MATRIX_MIN, MATRIX_MAX));
        true
    }

    pub fn remember(&mut self, event: impl Into<String>) {
        self.memory.push(event.into());
        if self.memory.len() > MEMORY_CAP {
            let overflow = self.memory.len() - MEMORY_CAP;
            self.memory.drain(0..overflow);
        }
    }

    pub fn remembers(&self, event: &str) -> bool {
        self.memory.iter().any(|m| m == event)
    }
}
