//! Storage of backends and session affinities.
//!
//! The gateway only needs a handful of operations from its state store: point
//! lookups of sessions and backends, a conditional session write, deletes, an
//! ordered backend listing and an atomic load counter. Anything that can offer
//! these per-key guarantees (a key/value server, a relational table) can sit
//! behind [`AffinityStore`]; [`InMemoryAffinityStore`] is the single-process
//! implementation.

use crate::types::{Backend, BackendId, SessionRecord};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("unknown backend: {0}")]
    UnknownBackend(BackendId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AffinityStore: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Writes `record` unless the session identifier already has an affinity.
    ///
    /// Returns the record that is stored once the call completes: `record` itself
    /// when it was written, or the pre-existing affinity otherwise.
    async fn put_session(&self, record: SessionRecord) -> Result<SessionRecord, StoreError>;

    /// Returns true if a record was removed.
    async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError>;

    async fn get_backend(&self, backend_id: &str) -> Result<Option<Backend>, StoreError>;

    /// All known backends in insertion order, regardless of availability.
    async fn list_backends(&self) -> Result<Vec<Backend>, StoreError>;

    /// Adds `delta` to the backend's load counter, saturating at zero.
    /// Returns the new load.
    async fn increment_load(&self, backend_id: &str, delta: i64) -> Result<u64, StoreError>;
}

#[derive(Default)]
pub struct InMemoryAffinityStore {
    backends: RwLock<IndexMap<BackendId, Backend>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemoryAffinityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backends(backends: impl IntoIterator<Item = Backend>) -> Self {
        let store = Self::new();
        for backend in backends {
            store.add_backend(backend);
        }
        store
    }

    /// Registers a backend, replacing any existing entry with the same id while
    /// keeping its position.
    pub fn add_backend(&self, backend: Backend) {
        self.backends.write().insert(backend.id.clone(), backend);
    }

    pub fn remove_backend(&self, backend_id: &str) -> Option<Backend> {
        self.backends.write().shift_remove(backend_id)
    }

    pub fn set_available(&self, backend_id: &str, available: bool) -> Result<(), StoreError> {
        let mut backends = self.backends.write();
        let backend = backends
            .get_mut(backend_id)
            .ok_or_else(|| StoreError::UnknownBackend(backend_id.to_string()))?;
        backend.available = available;
        Ok(())
    }

    pub fn backend_count(&self) -> usize {
        self.backends.read().len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

#[async_trait]
impl AffinityStore for InMemoryAffinityStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn put_session(&self, record: SessionRecord) -> Result<SessionRecord, StoreError> {
        let mut sessions = self.sessions.write();
        match sessions.entry(record.session_id.clone()) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => Ok(slot.insert(record).clone()),
        }
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.write().remove(session_id).is_some())
    }

    async fn get_backend(&self, backend_id: &str) -> Result<Option<Backend>, StoreError> {
        Ok(self.backends.read().get(backend_id).cloned())
    }

    async fn list_backends(&self) -> Result<Vec<Backend>, StoreError> {
        Ok(self.backends.read().values().cloned().collect())
    }

    async fn increment_load(&self, backend_id: &str, delta: i64) -> Result<u64, StoreError> {
        let mut backends = self.backends.write();
        let backend = backends
            .get_mut(backend_id)
            .ok_or_else(|| StoreError::UnknownBackend(backend_id.to_string()))?;

        backend.load = if delta.is_negative() {
            backend.load.saturating_sub(delta.unsigned_abs())
        } else {
            backend.load.saturating_add(delta.unsigned_abs())
        };
        Ok(backend.load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn backend(id: &str) -> Backend {
        Backend::new(
            id,
            Url::parse(&format!("http://{id}.example.com/bigbluebutton/api/")).unwrap(),
            "secret",
        )
    }

    #[tokio::test]
    async fn test_put_session_is_conditional() {
        let store = InMemoryAffinityStore::new();

        let first = store
            .put_session(SessionRecord::new("m1", "bbb1"))
            .await
            .unwrap();
        assert_eq!(first.backend_id, "bbb1");

        // A second write for the same identifier keeps the original affinity
        let second = store
            .put_session(SessionRecord::new("m1", "bbb2"))
            .await
            .unwrap();
        assert_eq!(second.backend_id, "bbb1");
        assert_eq!(
            store.get_session("m1").await.unwrap(),
            Some(SessionRecord::new("m1", "bbb1"))
        );

        assert!(store.delete_session("m1").await.unwrap());
        assert!(!store.delete_session("m1").await.unwrap());
        assert_eq!(store.get_session("m1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_backends_keep_insertion_order() {
        let store =
            InMemoryAffinityStore::with_backends([backend("c"), backend("a"), backend("b")]);
        store.set_available("a", false).unwrap();

        let ids: Vec<_> = store
            .list_backends()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        store.remove_backend("a");
        assert_eq!(store.backend_count(), 2);
        assert_eq!(store.get_backend("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_load_never_negative() {
        let store = InMemoryAffinityStore::with_backends([backend("bbb1")]);

        assert_eq!(store.increment_load("bbb1", 2).await.unwrap(), 2);
        assert_eq!(store.increment_load("bbb1", -5).await.unwrap(), 0);
        assert_eq!(
            store.increment_load("missing", 1).await,
            Err(StoreError::UnknownBackend("missing".into()))
        );
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(InMemoryAffinityStore::with_backends([backend("bbb1")]));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..64 {
            let store = store.clone();
            tasks.spawn(async move { store.increment_load("bbb1", 1).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(store.get_backend("bbb1").await.unwrap().unwrap().load, 64);
    }
}
