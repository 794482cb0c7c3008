//! The AI adapter: one HTTP endpoint, a timeout, a size cap, and a
//! deterministic fallback
//!
//! The core only ever asks for `generate(prompt) -> text`. Everything
//! else (dialogue lines, NPC JSON, plan JSON) is prompt shaping by the
//! callers. When no endpoint is configured, or the call fails or times
//! out, callers use the seeded fallback generator so the world keeps
//! moving without a model.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("AI call timed out")]
    Timeout,

    #[error("AI endpoint error: {0}")]
    Http(String),

    #[error("AI reply was empty or unreadable")]
    Empty,
}

pub struct AiAdapter {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
    timeout: Duration,
    max_response_length: usize,
}

impl AiAdapter {
    /// Build the adapter if an endpoint is configured; `None` means the
    /// fallback path handles everything
    pub fn from_config(config: &Config) -> Option<Arc<Self>> {
        let endpoint = config.ai_endpoint.clone()?;
        Some(Arc::new(Self {
            client: reqwest::Client::new(),
            endpoint,
            model: config.ai_model.clone(),
            timeout: config.ai_timeout(),
            max_response_length: config.ai_max_response_length,
        }))
    }

    /// One completion call: hard timeout, reply truncated at the cap.
    /// The wire shape is the common chat-completion one.
    pub async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, AdapterError> {
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let request = self.client.post(&self.endpoint).json(&body).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| AdapterError::Timeout)?
            .map_err(|err| AdapterError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(AdapterError::Http(format!("status {}", response.status())));
        }

        let reply: serde_json::Value = tokio::time::timeout(self.timeout, response.json())
            .await
            .map_err(|_| AdapterError::Timeout)?
            .map_err(|err| AdapterError::Http(err.to_string()))?;

        // Tolerate both chat and plain completion shapes
        let text = reply["choices"][0]["message"]["content"]
            .as_str()
            .or_else(|| reply["choices"][0]["text"].as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(AdapterError::Empty);
        }

        let mut text = text;
        if text.len() > self.max_response_length {
            warn!(
                "Truncating AI reply from {} to {} chars",
                text.len(),
                self.max_response_length
            );
            // Truncate on a char boundary; the parsers do best-effort
            // extraction from cut-off output
            let mut cut = self.max_response_length;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        Ok(text)
    }
}

/// Seed for the fallback generators: a stable hash of world name + prompt
fn fallback_seed(world_name: &str, prompt: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    world_name.hash(&mut hasher);
    prompt.hash(&mut hasher);
    hasher.finish()
}

const FALLBACK_FIRST_NAMES: &[&str] = &[
    "Brann", "Ceres", "Dovra", "Edric", "Fenn", "Greta", "Halvar", "Isolde", "Joren", "Kessa",
    "Lorn", "Maeve", "Nils", "Orla", "Pell", "Quinna", "Rurik", "Sela", "Tam", "Una",
];

const FALLBACK_EPITHETS: &[&str] = &[
    "a weathered ferrier",
    "a soft-spoken herbalist",
    "a retired caravan guard",
    "a debt-chased tinker",
    "an overconfident cartographer",
    "a stubborn well-digger",
    "a superstitious fishmonger",
    "a sharp-eyed rat catcher",
];

const FALLBACK_CONCEPTS: &[&str] = &[
    "Keeps every promise, remembers every slight",
    "Would rather be anywhere else",
    "Knows more than they let on",
    "One bad season from ruin",
    "Trades gossip like coin",
];

const FALLBACK_TROUBLES: &[&str] = &[
    "Owes money to the wrong people",
    "Can't resist a wager",
    "Trusts no one after dark",
    "Haunted by an old failure",
];

const FALLBACK_LINES: &[&str] = &[
    "Hm. Strange weather for it.",
    "I keep to my own business, friend.",
    "Ask me another day, maybe.",
    "That so? Can't say I'd know.",
    "You're not from around here.",
    "Long roads make short tempers.",
];

/// Deterministic NPC sheet JSON, shaped like what we ask the model for
pub fn fallback_npc_json(world_name: &str, prompt: &str) -> String {
    let mut rng = StdRng::seed_from_u64(fallback_seed(world_name, prompt));
    let name = FALLBACK_FIRST_NAMES[rng.random_range(0..FALLBACK_FIRST_NAMES.len())];
    let epithet = FALLBACK_EPITHETS[rng.random_range(0..FALLBACK_EPITHETS.len())];
    let concept = FALLBACK_CONCEPTS[rng.random_range(0..FALLBACK_CONCEPTS.len())];
    let trouble = FALLBACK_TROUBLES[rng.random_range(0..FALLBACK_TROUBLES.len())];
    json!({
        "name": name,
        "description": epithet,
        "high_concept": concept,
        "trouble": trouble,
    })
    .to_string()
}

/// Deterministic one-liner for NPC dialogue when no model is reachable
pub fn fallback_dialogue(world_name: &str, prompt: &str) -> String {
    let mut rng = StdRng::seed_from_u64(fallback_seed(world_name, prompt));
    FALLBACK_LINES[rng.random_range(0..FALLBACK_LINES.len())].to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fallback_is_deterministic_per_seed() {
        let a = fallback_npc_json("World", "prompt one");
        let b = fallback_npc_json("World", "prompt one");
        assert_eq!(a, b);

        // Different prompt, (almost certainly) different content; at
        // minimum it stays valid JSON with the right fields
        let c = fallback_npc_json("World", "prompt two");
        let parsed: serde_json::Value = serde_json::from_str(&c).unwrap();
        assert!(parsed["name"].is_string());
        assert!(parsed["high_concept"].is_string());
    }

    #[test]
    fn test_fallback_npc_parses_through_the_installer() {
        let reply = fallback_npc_json("World", "make me someone");
        let parsed =
            crate::service::npc::extract_json_object::<crate::service::npc::GeneratedNpc>(&reply);
        assert!(parsed.is_some());
    }

    #[test]
    fn test_fallback_dialogue_is_stable() {
        assert_eq!(
            fallback_dialogue("World", "hello"),
            fallback_dialogue("World", "hello")
        );
    }

    #[test]
    fn test_no_endpoint_means_no_adapter() {
        let config = Config::default();
        assert!(AiAdapter::from_config(&config).is_none());
    }
}
