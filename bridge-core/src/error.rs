use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Unified error type for bridge operations.
///
/// Error groups mirror the error taxonomy: transient fetch and parse
/// failures are retried or skipped by the scheduler, not propagated as
/// fatal; only startup-time errors are meant to reach `main` and exit the
/// process. "Not found" and "duplicate insert" are never represented
/// here — absence is `Option::None`, and a duplicate insert is success.
#[derive(Debug, Error)]
pub enum BridgeError {
    // --- Persistence ---
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    // --- Foreign-record parsing ---
    #[error("parse error for {foreign_id}: {reason}")]
    Parse { foreign_id: String, reason: String },

    // --- Threading resolution ---
    #[error("thread resolution failed for {foreign_id}: {reason}")]
    Resolution { foreign_id: String, reason: String },

    // --- Foreign network fetch (transient) ---
    #[error("foreign fetch failed: {0}")]
    Fetch(String),

    #[error("foreign fetch timed out")]
    FetchTimeout,

    // --- Publish (relay) ---
    #[error("relay publish failed: {0}")]
    Publish(String),

    // --- Identity / signing ---
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid bridge secret: {0}")]
    InvalidSecret(String),

    // --- Startup (fatal) ---
    #[error("fatal startup error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    NostrEventBuilder(#[from] nostr::event::builder::Error),

    #[error(transparent)]
    NostrKey(#[from] nostr::key::Error),
}
