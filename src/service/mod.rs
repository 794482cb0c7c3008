//! The uniform service contract
//!
//! Every service function returns a [`ServiceResult`]: whether it handled
//! the request, an error value if it failed, messages for the actor, and
//! messages for co-located peers. Routers treat the shape uniformly: an
//! unhandled result falls through to the next router, an error emits as
//! `type=error`, and everything else is delivered in list order.

pub mod chat;
pub mod combat;
pub mod interact;
pub mod movement;
pub mod npc;
pub mod object;
pub mod player;
pub mod room;
pub mod trade;

use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::error::ServiceError;

/// Payload type for a `message` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    System,
    Player,
    Npc,
    Error,
}

/// What a client renders: markup-tagged text, optionally attributed
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub name: Option<String>,
}

impl OutboundMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::System,
            content: content.into(),
            name: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            content: content.into(),
            name: None,
        }
    }

    pub fn player(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Player,
            content: content.into(),
            name: Some(name.into()),
        }
    }

    pub fn npc(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Npc,
            content: content.into(),
            name: Some(name.into()),
        }
    }
}

/// How a handled command wants the world persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveRequest {
    /// Nothing changed
    #[default]
    None,
    /// Coalesce within the debounce window (the usual case)
    Debounced,
    /// Write now: account creation, logout, purge
    Immediate,
}

/// The uniform 4-tuple every service returns, plus the save request the
/// dispatcher forwards to the persistence facade
#[derive(Debug, Default)]
pub struct ServiceResult {
    /// True iff this service recognized the request at all
    pub handled: bool,

    /// Handled-but-failed keeps `handled` true and sets this
    pub error: Option<ServiceError>,

    /// Messages for the acting player, in delivery order
    pub emits: Vec<OutboundMessage>,

    /// (room id, message) pairs for others in those rooms
    pub broadcasts: Vec<(String, OutboundMessage)>,

    /// (session id, message) pairs for specific other players; whispers
    /// and trade notices use this instead of a room broadcast
    pub directs: Vec<(String, OutboundMessage)>,

    pub save: SaveRequest,
}

impl ServiceResult {
    /// Not ours; the router chain moves on
    pub fn unhandled() -> Self {
        Self::default()
    }

    /// Recognized and succeeded, nothing to say yet
    pub fn handled() -> Self {
        Self {
            handled: true,
            ..Self::default()
        }
    }

    /// Recognized but failed
    pub fn err(error: ServiceError) -> Self {
        Self {
            handled: true,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn emit(mut self, message: OutboundMessage) -> Self {
        self.emits.push(message);
        self
    }

    pub fn broadcast(mut self, room_id: impl Into<String>, message: OutboundMessage) -> Self {
        self.broadcasts.push((room_id.into(), message));
        self
    }

    pub fn saving(mut self) -> Self {
        self.save = SaveRequest::Debounced;
        self
    }

    pub fn saving_now(mut self) -> Self {
        self.save = SaveRequest::Immediate;
        self
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_payload_wire_shape() {
        let message = OutboundMessage::player("Alice", "hello");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "player");
        assert_eq!(json["content"], "hello");
        assert_eq!(json["name"], "Alice");

        // No name key at all for system messages
        let system = serde_json::to_value(OutboundMessage::system("hi")).unwrap();
        assert!(system.get("name").is_none());
    }

    #[test]
    fn test_builder_shape() {
        let result = ServiceResult::handled()
            .emit(OutboundMessage::system("done"))
            .broadcast("start", OutboundMessage::system("something happened"))
            .saving();
        assert!(result.handled);
        assert!(!result.is_err());
        assert_eq!(result.emits.len(), 1);
        assert_eq!(result.broadcasts.len(), 1);
        assert_eq!(result.save, SaveRequest::Debounced);
    }
}
