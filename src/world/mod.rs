//! The in-memory world model and its supporting invariants

pub mod migrate;
pub mod object;
pub mod room;
pub mod sheet;
pub mod user;
pub mod validate;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use object::GameObject;
use room::Room;
use sheet::CharacterSheet;
use user::{Player, User};

/// Id of the room new characters arrive in
pub const START_ROOM_ID: &str = "start";

/// Content band applied to AI-generated text
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
)]
pub enum SafetyLevel {
    #[serde(rename = "G")]
    #[strum(serialize = "G")]
    G,
    #[default]
    #[serde(rename = "PG-13")]
    #[strum(serialize = "PG-13")]
    Pg13,
    #[serde(rename = "R")]
    #[strum(serialize = "R")]
    R,
    #[serde(rename = "OFF")]
    #[strum(serialize = "OFF")]
    Off,
}

/// A named group of users
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Faction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Uuid>,
}

/// The whole shared world: every container the simulation mutates
///
/// `players` is the only ephemeral container; everything else round-trips
/// through the persisted document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct World {
    /// Schema version; bumped by migrations on load
    #[serde(default)]
    pub world_version: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// The world's central tension, fed into AI prompts
    #[serde(default)]
    pub conflict: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub safety_level: SafetyLevel,

    /// Gates the AI planning path for NPCs
    #[serde(default)]
    pub advanced_goap_enabled: bool,

    #[serde(default)]
    pub rooms: HashMap<String, Room>,

    /// Live session bindings; never persisted
    #[serde(skip)]
    pub players: HashMap<String, Player>,

    /// In-flight trade negotiations; session-scoped, never persisted
    #[serde(skip)]
    pub trades: Vec<crate::service::trade::TradeState>,

    #[serde(default)]
    pub users: HashMap<Uuid, User>,

    /// NPC display name -> sheet
    #[serde(default)]
    pub npc_sheets: HashMap<String, CharacterSheet>,

    /// NPC display name -> stable id
    #[serde(default)]
    pub npc_ids: HashMap<String, Uuid>,

    #[serde(default)]
    pub object_templates: HashMap<String, GameObject>,

    /// user id -> (other user id -> relationship type)
    #[serde(default)]
    pub relationships: HashMap<Uuid, HashMap<Uuid, String>>,

    #[serde(default)]
    pub factions: HashMap<String, Faction>,
}

impl Default for World {
    fn default() -> Self {
        Self {
            world_version: migrate::CURRENT_WORLD_VERSION,
            name: "TinyMUD".into(),
            description: "A small shared world.".into(),
            conflict: String::new(),
            created_at: Utc::now(),
            safety_level: SafetyLevel::default(),
            advanced_goap_enabled: false,
            rooms: HashMap::new(),
            players: HashMap::new(),
            trades: Vec::new(),
            users: HashMap::new(),
            npc_sheets: HashMap::new(),
            npc_ids: HashMap::new(),
            object_templates: HashMap::new(),
            relationships: HashMap::new(),
            factions: HashMap::new(),
        }
    }
}

impl World {
    /// A fresh world with just the start room
    pub fn new_default() -> Self {
        let mut world = Self::default();
        world.rooms.insert(
            START_ROOM_ID.to_string(),
            Room::new(
                START_ROOM_ID,
                "A quiet clearing where new arrivals find their feet.",
            ),
        );
        world
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn room_mut(&mut self, id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(id)
    }

    pub fn player(&self, session_id: &str) -> Option<&Player> {
        self.players.get(session_id)
    }

    pub fn user_by_name(&self, name: &str) -> Option<&User> {
        self.users.values().find(|u| u.name == name)
    }

    pub fn user_by_name_mut(&mut self, name: &str) -> Option<&mut User> {
        self.users.values_mut().find(|u| u.name == name)
    }

    /// Sheet of the character bound to a session
    pub fn sheet_for_session(&self, session_id: &str) -> Option<&CharacterSheet> {
        let player = self.players.get(session_id)?;
        self.users.get(&player.user_id).map(|u| &u.sheet)
    }

    pub fn sheet_for_session_mut(&mut self, session_id: &str) -> Option<&mut CharacterSheet> {
        let user_id = self.players.get(session_id)?.user_id;
        self.users.get_mut(&user_id).map(|u| &mut u.sheet)
    }

    /// Room the session's character stands in
    pub fn room_of_session(&self, session_id: &str) -> Option<&Room> {
        let player = self.players.get(session_id)?;
        self.rooms.get(&player.room_id)
    }

    pub fn display_name_of_session(&self, session_id: &str) -> Option<&str> {
        let player = self.players.get(session_id)?;
        self.users.get(&player.user_id).map(|u| u.name.as_str())
    }

    /// All live sessions standing in a room
    pub fn sessions_in_room(&self, room_id: &str) -> Vec<String> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        let mut sessions: Vec<String> = room
            .players
            .iter()
            .filter(|s| self.players.contains_key(*s))
            .cloned()
            .collect();
        sessions.sort_unstable();
        sessions
    }

    /// Whether any live player is present in a room (gates NPC AI)
    pub fn room_has_live_player(&self, room_id: &str) -> bool {
        !self.sessions_in_room(room_id).is_empty()
    }

    pub fn npc_uuid(&self, name: &str) -> Option<Uuid> {
        self.npc_ids.get(name).copied()
    }

    /// Relationship type recorded from `from` towards `to`, if any
    pub fn relationship(&self, from: Uuid, to: Uuid) -> Option<&str> {
        self.relationships
            .get(&from)
            .and_then(|edges| edges.get(&to))
            .map(String::as_str)
    }

    /// Room id each NPC stands in, in deterministic tick order (room id,
    /// then NPC name)
    pub fn npc_roster(&self) -> Vec<(String, String)> {
        let mut roster: Vec<(String, String)> = Vec::new();
        let mut room_ids: Vec<&String> = self.rooms.keys().collect();
        room_ids.sort_unstable();
        for room_id in room_ids {
            let room = &self.rooms[room_id];
            for npc_name in &room.npcs {
                if self.npc_sheets.contains_key(npc_name) {
                    roster.push((room_id.clone(), npc_name.clone()));
                }
            }
        }
        roster
    }

    /// Find which room an NPC stands in
    pub fn room_of_npc(&self, npc_name: &str) -> Option<&str> {
        let mut room_ids: Vec<&String> = self.rooms.keys().collect();
        room_ids.sort_unstable();
        room_ids
            .into_iter()
            .find(|id| self.rooms[*id].npcs.contains(npc_name))
            .map(String::as_str)
    }
}
