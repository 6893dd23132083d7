//! Session storage backends.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::ExecutionSession;

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no session stored for project {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Internal(String),
}

/// Trait for session persistence backends.
///
/// Keyed by an opaque project identifier so one project maps to at most one
/// resumable conversation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist (or replace) the session for a project.
    async fn put(&self, project_id: &str, session: ExecutionSession) -> Result<(), StoreError>;

    /// Fetch the session for a project, if one was captured before.
    async fn get(&self, project_id: &str) -> Result<Option<ExecutionSession>, StoreError>;

    /// Forget the session for a project.
    async fn remove(&self, project_id: &str) -> Result<(), StoreError>;
}
