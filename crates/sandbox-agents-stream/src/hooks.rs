//! Built-in post-completion hooks.

use std::sync::Arc;

use async_trait::async_trait;
use sandbox_agents_session::{ExecutionSession, SessionStore};

use crate::controller::{CompletionHook, CompletionOutcome};

/// Persists the captured session id after a completed invocation so the
/// next one can resume the conversation.
pub struct SessionRecordingHook {
    store: Arc<dyn SessionStore>,
    project_id: String,
}

impl SessionRecordingHook {
    /// Hook writing into `store` under `project_id`.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, project_id: impl Into<String>) -> Self {
        Self {
            store,
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl CompletionHook for SessionRecordingHook {
    async fn after_complete(&self, outcome: CompletionOutcome) -> anyhow::Result<()> {
        let Some(session_id) = outcome.session_id else {
            tracing::debug!(project_id = %self.project_id, "no session id captured, nothing to persist");
            return Ok(());
        };
        let session = ExecutionSession::new(session_id)
            .with_totals(outcome.total_cost_usd, outcome.duration_ms);
        self.store.put(&self.project_id, session).await?;
        Ok(())
    }
}
