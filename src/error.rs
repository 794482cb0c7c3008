//! Error taxonomy for the command/service pipeline
//!
//! Errors are values inside a service result, never control flow. The
//! `Display` text of each variant is the user-facing message; the variants
//! that must not reach the actor (`Adapter`, `Persistence`) are filtered at
//! the point they occur and logged instead.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Malformed input, unknown verbs, bad argument shapes
    #[error("{0}")]
    Validation(String),

    /// A name didn't resolve; message carries suggestions
    #[error("{0}")]
    NotFound(String),

    /// Admin gating, locked doors, dead players acting
    #[error("{0}")]
    Permission(String),

    /// Inventory full, already searched, missing components etc
    #[error("{0}")]
    Constraint(String),

    /// Token bucket exhausted
    #[error("You're doing that too fast. Wait a moment and try again.")]
    RateLimit,

    /// AI endpoint unavailable/timeout/oversize. Never surfaced; the caller
    /// substitutes the offline path and logs.
    #[error("AI adapter error: {0}")]
    Adapter(String),

    /// Validation found a corrupted subgraph this command touched
    #[error("Internal inconsistency, an admin has been notified.")]
    Integrity,

    /// A save failed. Never surfaced; counted and logged by the facade.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<crate::ai::AdapterError> for ServiceError {
    fn from(err: crate::ai::AdapterError) -> Self {
        Self::Adapter(err.to_string())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Log a bug report the first time a given error location fires; repeats
/// stay quiet so one broken subgraph can't flood the log
pub fn report_bug(location: &str, detail: &str) {
    use std::collections::HashSet;
    use std::sync::{Mutex, OnceLock};

    static REPORTED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    let reported = REPORTED.get_or_init(|| Mutex::new(HashSet::new()));
    let Ok(mut reported) = reported.lock() else {
        return;
    };
    if reported.insert(location.to_string()) {
        tracing::error!("Bug report at '{location}': {detail}");
    }
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }
}
