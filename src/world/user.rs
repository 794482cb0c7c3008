use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sheet::CharacterSheet;

/// A persistent account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,

    /// Display name, unique per world
    pub name: String,

    /// PHC-format argon2 verifier
    pub password_hash: String,

    /// The first user created is automatically admin
    #[serde(default)]
    pub is_admin: bool,

    #[serde(default)]
    pub sheet: CharacterSheet,
}

impl User {
    pub fn new(name: impl Into<String>, password_hash: String, description: &str) -> Self {
        let name = name.into();
        let sheet = CharacterSheet::new(name.clone(), description);
        Self {
            id: Uuid::now_v7(),
            name,
            password_hash,
            is_admin: false,
            sheet,
        }
    }
}

/// A live session binding: torn down on disconnect, while the underlying
/// `User` and sheet persist
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    /// Opaque transport-assigned session id
    pub session_id: String,

    pub user_id: Uuid,

    /// Room the player currently stands in
    pub room_id: String,
}
