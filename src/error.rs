//! Error types for discovery, classification and liveness tracking
//!
//! `Error` covers invocation-level failures that are returned to the caller.
//! `ProbeError` covers per-host outcomes that are recorded, never propagated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Invocation-level errors
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed IP/CIDR or argument; rejected before any network I/O.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested range expands past the configured host ceiling.
    #[error("range too large: {requested} hosts requested, limit is {limit}")]
    RangeTooLarge { requested: u64, limit: usize },

    /// Concurrent write on the same staging key could not be resolved.
    #[error("persistence conflict on {key}: {reason}")]
    PersistenceConflict { key: String, reason: String },

    /// A single rule table entry is malformed. The rule is skipped.
    #[error("classification rule '{rule}' rejected: {reason}")]
    ClassificationRule { rule: String, reason: String },

    /// The rule table as a whole cannot be read or parsed.
    #[error("rule table unreadable: {0}")]
    RuleTable(String),

    /// Another auto-assignment run holds the lease.
    #[error("auto-assignment already running (lease held by {owner} until {expires_at})")]
    AssignmentInProgress { owner: String, expires_at: String },

    /// A reserved "Unknown" classification row is missing.
    #[error("missing sentinel {kind} '{name}'")]
    MissingSentinel { kind: &'static str, name: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Status change that the record's current status does not allow.
    #[error("discovery record {id} is {current}, cannot move to {target}")]
    InvalidTransition {
        id: i64,
        current: String,
        target: String,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database connection lock poisoned")]
    LockPoisoned,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

/// Non-fatal per-host probe outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("snmp unavailable: {0}")]
    SnmpUnavailable(String),
}
