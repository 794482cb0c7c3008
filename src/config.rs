//! Server configuration, read from the environment at startup

use std::env;
use std::time::Duration;

/// Runtime configuration for the server
///
/// Every knob has a default so a bare `tinymud-server` starts a playable
/// world; ops override via environment variables of the same name.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the world document lives on disk
    pub world_path: String,

    /// Listen address for the websocket transport
    pub bind_addr: String,

    /// Master enable for the world heartbeat
    pub tick_enable: bool,

    /// Heartbeat interval
    pub tick_seconds: u64,

    /// Action point cap per NPC
    pub ap_max: u32,

    /// Hunger/thirst drain per tick
    pub need_drop: f32,

    /// Socialization drain per tick
    pub social_drop: f32,

    /// Socialization gain on chat/emote
    pub social_refill: f32,

    /// Socialization gain per tick when alone
    pub social_sim_tick: f32,

    /// Sleep drain per tick
    pub sleep_drop: f32,

    /// Sleep gain per tick while sleeping
    pub sleep_refill: f32,

    /// How many ticks a sleep action lasts
    pub sleep_ticks: u32,

    /// NPCs start planning when a need falls below this
    pub need_threshold: f32,

    /// Persistence coalescing window
    pub save_debounce_ms: u64,

    /// Reject client messages longer than this
    pub max_message_len: usize,

    /// Master enable for rate limiting
    pub rate_enable: bool,

    /// Hard timeout on AI adapter calls
    pub ai_timeout_seconds: u64,

    /// Truncate AI responses beyond this many characters
    pub ai_max_response_length: usize,

    /// Optional AI endpoint url; absent means offline fallback only
    pub ai_endpoint: Option<String>,

    /// Optional model name passed through to the AI endpoint
    pub ai_model: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            world_path: "world.json".into(),
            bind_addr: "0.0.0.0:9944".into(),
            tick_enable: false,
            tick_seconds: 60,
            ap_max: 3,
            need_drop: 1.0,
            social_drop: 0.5,
            social_refill: 10.0,
            social_sim_tick: 5.0,
            sleep_drop: 0.75,
            sleep_refill: 10.0,
            sleep_ticks: 3,
            need_threshold: 50.0,
            save_debounce_ms: 5_000,
            max_message_len: 1_000,
            rate_enable: false,
            ai_timeout_seconds: 30,
            ai_max_response_length: 10_000,
            ai_endpoint: None,
            ai_model: None,
        }
    }
}

impl Config {
    /// Build a config from the environment, falling back to defaults
    /// for anything unset or unparseable
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            world_path: env_or("WORLD_PATH", defaults.world_path),
            bind_addr: env_or("BIND_ADDR", defaults.bind_addr),
            tick_enable: env_or("TICK_ENABLE", defaults.tick_enable),
            tick_seconds: env_or("TICK_SECONDS", defaults.tick_seconds),
            ap_max: env_or("AP_MAX", defaults.ap_max),
            need_drop: env_or("NEED_DROP", defaults.need_drop),
            social_drop: env_or("SOCIAL_DROP", defaults.social_drop),
            social_refill: env_or("SOCIAL_REFILL", defaults.social_refill),
            social_sim_tick: env_or("SOCIAL_SIM_TICK", defaults.social_sim_tick),
            sleep_drop: env_or("SLEEP_DROP", defaults.sleep_drop),
            sleep_refill: env_or("SLEEP_REFILL", defaults.sleep_refill),
            sleep_ticks: env_or("SLEEP_TICKS", defaults.sleep_ticks),
            need_threshold: env_or("NEED_THRESHOLD", defaults.need_threshold),
            save_debounce_ms: env_or("SAVE_DEBOUNCE_MS", defaults.save_debounce_ms),
            max_message_len: env_or("MAX_MESSAGE_LEN", defaults.max_message_len),
            rate_enable: env_or("RATE_ENABLE", defaults.rate_enable),
            ai_timeout_seconds: env_or("AI_TIMEOUT_SECONDS", defaults.ai_timeout_seconds),
            ai_max_response_length: env_or(
                "AI_MAX_RESPONSE_LENGTH",
                defaults.ai_max_response_length,
            ),
            ai_endpoint: env::var("AI_ENDPOINT").ok().filter(|s| !s.is_empty()),
            ai_model: env::var("AI_MODEL").ok().filter(|s| !s.is_empty()),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.max(1))
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_seconds)
    }
}

/// Parse an env var, keeping the default when missing or malformed
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}
