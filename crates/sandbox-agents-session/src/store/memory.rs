//! In-memory session storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;

use crate::ExecutionSession;

use super::{SessionStore, StoreError};

/// In-memory storage implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, ExecutionSession>>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn put(&self, project_id: &str, session: ExecutionSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .insert(project_id.to_owned(), session);
        Ok(())
    }

    async fn get(&self, project_id: &str) -> Result<Option<ExecutionSession>, StoreError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(project_id)
            .cloned())
    }

    async fn remove(&self, project_id: &str) -> Result<(), StoreError> {
        self.sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .remove(project_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_remove_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("proj-1").await.unwrap().is_none());

        store
            .put("proj-1", ExecutionSession::new("s-1"))
            .await
            .unwrap();
        let session = store.get("proj-1").await.unwrap().unwrap();
        assert_eq!(session.session_id, "s-1");

        // A second capture for the same project replaces the first.
        store
            .put("proj-1", ExecutionSession::new("s-2"))
            .await
            .unwrap();
        assert_eq!(
            store.get("proj-1").await.unwrap().unwrap().session_id,
            "s-2"
        );

        store.remove("proj-1").await.unwrap();
        assert!(store.get("proj-1").await.unwrap().is_none());
    }
}
