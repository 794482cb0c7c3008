//! Per-connection session state: the auth wizard, the live-session
//! registry, and rate limiting
//!
//! A connection starts in the auth wizard (a small state machine bound to
//! the session) and graduates to `Playing` once a `Player` binding
//! exists. The registry maps session ids to their outbound channels so
//! services' results can be delivered; it knows nothing about sockets.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth;
use crate::error::ServiceError;
use crate::markup::bold;
use crate::service::{OutboundMessage, SaveRequest};
use crate::world::user::{Player, User};
use crate::world::{World, START_ROOM_ID};

/// Where a session stands in the login flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting on `create` or `login`
    AuthMenu,
    CreateName,
    CreatePassword { name: String },
    CreateDescription { name: String, password: String },
    LoginName,
    LoginPassword { name: String },
    /// Bound to a Player; commands route normally
    Playing,
}

/// One live connection
pub struct SessionHandle {
    pub tx: mpsc::UnboundedSender<OutboundMessage>,
    pub phase: SessionPhase,
    /// Cancelling this tears the connection down (used by /kick)
    pub shutdown: CancellationToken,
}

/// All live connections, keyed by session id
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn register(
        &mut self,
        session_id: String,
        tx: mpsc::UnboundedSender<OutboundMessage>,
        shutdown: CancellationToken,
    ) {
        self.sessions.insert(
            session_id,
            SessionHandle {
                tx,
                phase: SessionPhase::AuthMenu,
                shutdown,
            },
        );
    }

    pub fn remove(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn phase(&self, session_id: &str) -> Option<SessionPhase> {
        self.sessions.get(session_id).map(|h| h.phase.clone())
    }

    pub fn set_phase(&mut self, session_id: &str, phase: SessionPhase) {
        if let Some(handle) = self.sessions.get_mut(session_id) {
            handle.phase = phase;
        }
    }

    /// Fire a message at one session; a closed channel is a disconnect
    /// in flight and quietly ignored
    pub fn send_to(&self, session_id: &str, message: OutboundMessage) {
        if let Some(handle) = self.sessions.get(session_id) {
            let _ = handle.tx.send(message);
        }
    }

    /// Cancel a session's connection (kick)
    pub fn shutdown(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Some(handle) => {
                handle.shutdown.cancel();
                true
            }
            None => false,
        }
    }
}

// ---- the auth wizard ----

/// What one wizard step produced
pub struct AuthStep {
    pub next: SessionPhase,
    pub messages: Vec<OutboundMessage>,
    pub save: SaveRequest,
    /// Broadcast to the start room when someone arrives
    pub arrival_room: Option<String>,
}

impl AuthStep {
    fn stay(phase: SessionPhase, message: impl Into<String>) -> Self {
        Self {
            next: phase,
            messages: vec![OutboundMessage::system(message)],
            save: SaveRequest::None,
            arrival_room: None,
        }
    }
}

pub const AUTH_GREETING: &str =
    "Welcome to the world. Type [b]create[/b] to make an account or [b]login[/b] if you have one. \
     One-line forms work too: [code]/auth create <name> | <password> | <description>[/code]";

/// Advance the wizard by one line of input
pub fn auth_step(
    world: &mut World,
    session_id: &str,
    phase: &SessionPhase,
    line: &str,
) -> AuthStep {
    let line = line.trim();

    // Pipe-delimited one-line forms are accepted in any pre-auth phase
    if let Some(rest) = line.strip_prefix("/auth create") {
        let parts = split_pipes(rest);
        if parts.len() != 3 {
            return AuthStep::stay(
                phase.clone(),
                "Usage: /auth create <name> | <password> | <description>",
            );
        }
        return finish_create(world, session_id, &parts[0], &parts[1], &parts[2]);
    }
    if let Some(rest) = line.strip_prefix("/auth login") {
        let parts = split_pipes(rest);
        if parts.len() != 2 {
            return AuthStep::stay(phase.clone(), "Usage: /auth login <name> | <password>");
        }
        return finish_login(world, session_id, &parts[0], &parts[1]);
    }

    match phase {
        SessionPhase::AuthMenu => match line.to_lowercase().as_str() {
            "create" => AuthStep::stay(SessionPhase::CreateName, "A name for yourself?"),
            "login" => AuthStep::stay(SessionPhase::LoginName, "Who's returning?"),
            _ => AuthStep::stay(SessionPhase::AuthMenu, AUTH_GREETING),
        },
        SessionPhase::CreateName => {
            if line.is_empty() || line.contains('|') {
                return AuthStep::stay(SessionPhase::CreateName, "That won't do as a name.");
            }
            if world.user_by_name(line).is_some() {
                return AuthStep::stay(
                    SessionPhase::CreateName,
                    format!("Someone is already called '{line}'. Another name?"),
                );
            }
            AuthStep::stay(
                SessionPhase::CreatePassword {
                    name: line.to_string(),
                },
                "A password to keep it yours?",
            )
        }
        SessionPhase::CreatePassword { name } => {
            if line.is_empty() {
                return AuthStep::stay(
                    SessionPhase::CreatePassword { name: name.clone() },
                    "An empty password keeps nothing. Try again.",
                );
            }
            AuthStep::stay(
                SessionPhase::CreateDescription {
                    name: name.clone(),
                    password: line.to_string(),
                },
                "And a few words describing you?",
            )
        }
        SessionPhase::CreateDescription { name, password } => {
            finish_create(world, session_id, name, password, line)
        }
        SessionPhase::LoginName => {
            if line.is_empty() {
                return AuthStep::stay(SessionPhase::LoginName, "Who's returning?");
            }
            AuthStep::stay(
                SessionPhase::LoginPassword {
                    name: line.to_string(),
                },
                "Password?",
            )
        }
        SessionPhase::LoginPassword { name } => finish_login(world, session_id, name, line),
        SessionPhase::Playing => AuthStep::stay(SessionPhase::Playing, ""),
    }
}

fn finish_create(
    world: &mut World,
    session_id: &str,
    name: &str,
    password: &str,
    description: &str,
) -> AuthStep {
    let name = name.trim();
    if name.is_empty() || name.contains('|') {
        return AuthStep::stay(SessionPhase::CreateName, "That won't do as a name.");
    }
    if world.user_by_name(name).is_some() {
        return AuthStep::stay(
            SessionPhase::CreateName,
            format!("Someone is already called '{name}'. Another name?"),
        );
    }
    let Ok(password_hash) = auth::hash(password.trim()) else {
        return AuthStep::stay(SessionPhase::CreateName, "Something went wrong. Try again.");
    };

    let mut user = User::new(name, password_hash, description.trim());
    // The first account into a world runs it
    user.is_admin = world.users.is_empty();
    let user_id = user.id;
    let is_admin = user.is_admin;
    world.users.insert(user_id, user);
    bind(world, session_id, user_id);
    info!("Account created: {name} (admin: {is_admin})");

    let mut messages = vec![
        OutboundMessage::system(format!("Welcome, {}!", bold(name))),
        OutboundMessage::system("Your account is created and you are in the world."),
    ];
    if is_admin {
        messages.push(OutboundMessage::system(
            "As the first soul here, you have admin rights.",
        ));
    }
    AuthStep {
        next: SessionPhase::Playing,
        messages,
        save: SaveRequest::Immediate,
        arrival_room: Some(START_ROOM_ID.to_string()),
    }
}

fn finish_login(world: &mut World, session_id: &str, name: &str, password: &str) -> AuthStep {
    let name = name.trim();
    // One wrong-password answer and the wizard starts the login over;
    // the message never says which part was wrong
    let failed = || {
        AuthStep::stay(
            SessionPhase::LoginName,
            "That name and password don't match. Who's returning?",
        )
    };

    let Some(user) = world.user_by_name(name) else {
        return failed();
    };
    if !auth::verify(password.trim(), &user.password_hash) {
        return failed();
    }
    let user_id = user.id;
    if world.players.values().any(|p| p.user_id == user_id) {
        return AuthStep::stay(
            SessionPhase::LoginName,
            "That account is already in the world.",
        );
    }

    bind(world, session_id, user_id);
    info!("Login: {name}");
    AuthStep {
        next: SessionPhase::Playing,
        messages: vec![OutboundMessage::system(format!(
            "Welcome back, {}.",
            bold(name)
        ))],
        save: SaveRequest::None,
        arrival_room: Some(START_ROOM_ID.to_string()),
    }
}

/// Create the Player binding and stand the character in the start room
fn bind(world: &mut World, session_id: &str, user_id: uuid::Uuid) {
    world.players.insert(
        session_id.to_string(),
        Player {
            session_id: session_id.to_string(),
            user_id,
            room_id: START_ROOM_ID.to_string(),
        },
    );
    if let Some(room) = world.room_mut(START_ROOM_ID) {
        room.players.insert(session_id.to_string());
    }
}

/// Tear down a session's bindings on disconnect. The User and sheet
/// persist; in-flight trades cancel. Returns notices for other sessions.
pub fn unbind(world: &mut World, session_id: &str) -> Vec<(String, OutboundMessage)> {
    let mut notices = Vec::new();
    if let Some(notice) = crate::service::trade::cancel_for_disconnect(world, session_id) {
        notices.push(notice);
    }
    if let Some(player) = world.players.remove(session_id) {
        if let Some(room) = world.room_mut(&player.room_id) {
            room.players.remove(session_id);
        }
    }
    notices
}

fn split_pipes(rest: &str) -> Vec<String> {
    rest.split('|').map(|p| p.trim().to_string()).collect()
}

// ---- rate limiting ----

/// A rate-limited operation: (key, bucket capacity, refills per second)
pub type RateOp = (&'static str, f64, f64);

/// Auth attempts: 5 in the bucket, one back every 2 seconds
pub const OP_AUTH: RateOp = ("auth", 5.0, 0.5);
/// Chat and commands: 10 in the bucket, two back per second
pub const OP_MESSAGE: RateOp = ("message", 10.0, 2.0);
/// NPC planning triggers (per session): slow drip
pub const OP_PLAN: RateOp = ("plan", 3.0, 0.2);

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Per-session, per-operation token buckets
pub struct RateLimiter {
    enabled: bool,
    buckets: HashMap<(String, &'static str), Bucket>,
}

impl RateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            buckets: HashMap::new(),
        }
    }

    /// Take one token; `Err(RateLimit)` when the bucket is dry
    pub fn check(&mut self, session_id: &str, op: RateOp) -> Result<(), ServiceError> {
        if !self.enabled {
            return Ok(());
        }
        let (key, capacity, refill_per_sec) = op;
        let now = Instant::now();
        let bucket = self
            .buckets
            .entry((session_id.to_string(), key))
            .or_insert(Bucket {
                tokens: capacity,
                last: now,
            });

        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity);
        bucket.last = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(ServiceError::RateLimit)
        }
    }

    pub fn forget_session(&mut self, session_id: &str) {
        self.buckets.retain(|(s, _), _| s != session_id);
    }

    /// Counters don't survive a world reload
    pub fn reset(&mut self) {
        self.buckets.clear();
    }
}
