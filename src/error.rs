// ABOUTME: Engine error taxonomy — typed failures with wire-visible categories.
// ABOUTME: Only auth and vendor errors abort a session; the rest recover locally.

use thiserror::Error;

/// Failures the engine distinguishes. Individual unparseable stream frames
/// are not errors at all; they are dropped at the adapter boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No API credential could be resolved. Terminal, no network I/O attempted.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Non-2xx vendor response, connection failure, or malformed vendor body.
    #[error("vendor error: {0}")]
    Vendor(String),

    /// A post-stream persistence write failed. Logged, never surfaced.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The client went away mid-session; remaining work is abandoned.
    #[error("session cancelled")]
    Cancelled,
}

impl EngineError {
    /// Category string carried in the wire-visible `error` event.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth_error",
            Self::Vendor(_) => "vendor_error",
            Self::Persistence(_) => "persistence_error",
            Self::Cancelled => "cancelled",
        }
    }
}
