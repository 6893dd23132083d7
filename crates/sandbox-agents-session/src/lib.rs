//! Agent conversation persistence.
//!
//! The agent runtime hands back an opaque session id; persisting it per
//! logical project lets a later invocation resume the same conversation.
//! This crate is the seam to the external database collaborator, plus an
//! in-memory implementation for development and tests.

pub mod store;

pub use store::{MemoryStore, SessionStore, StoreError};

use serde::{Deserialize, Serialize};

/// One agent conversation, keyed externally by project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSession {
    /// Opaque session id returned by the agent runtime.
    pub session_id: String,
    /// Whether a later invocation may resume this conversation.
    pub resumable: bool,
    /// Accumulated cost in USD, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    /// Accumulated duration in milliseconds, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionSession {
    /// New resumable session with no cost data yet.
    ///
    /// Created when the executor's first init message is observed.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            resumable: true,
            total_cost_usd: None,
            duration_ms: None,
        }
    }

    /// Record final cost and duration from the result message.
    #[must_use]
    pub const fn with_totals(mut self, total_cost_usd: Option<f64>, duration_ms: Option<u64>) -> Self {
        self.total_cost_usd = total_cost_usd;
        self.duration_ms = duration_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_attach_to_session() {
        let session = ExecutionSession::new("s-1").with_totals(Some(0.42), Some(9000));
        assert!(session.resumable);
        assert_eq!(session.total_cost_usd, Some(0.42));
        assert_eq!(session.duration_ms, Some(9000));
    }
}
