//! Session affinity for the gateway.
//!
//! Every session identifier is owned by exactly one backend for its lifetime.
//! [`Affinity`] answers "which backend owns this session" and, for new
//! sessions, picks the least loaded available backend and records the choice.
//!
//! Resolution is an explicit two-step protocol:
//!
//! 1. Look the identifier up in the [`AffinityStore`].
//! 2. On a miss (and only for operations allowed to create sessions), reserve
//!    capacity on a backend through the [`BackendSelector`] and write the
//!    affinity with a conditional put. Concurrent assignments of the same
//!    identifier converge on whichever write landed first.

pub mod config;
pub mod metrics_defs;
pub mod selector;
pub mod store;
pub mod types;

pub use selector::{BackendSelector, select_least_loaded};
pub use store::{AffinityStore, InMemoryAffinityStore, StoreError};
pub use types::{Backend, BackendId, SessionRecord};

use metrics_defs::SESSIONS_RELEASED;
use shared::counter;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum AffinityError {
    #[error("no session with this identifier")]
    SessionNotFound,

    #[error("no backend available")]
    NoBackendAvailable,

    #[error("session {session_id} references unknown backend {backend_id}")]
    DanglingBackend {
        session_id: String,
        backend_id: BackendId,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A session resolved to its owning backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub session: SessionRecord,
    pub backend: Backend,
    /// True if the affinity was written while resolving
    pub created: bool,
}

#[derive(Clone)]
pub struct Affinity {
    store: Arc<dyn AffinityStore>,
    selector: Arc<BackendSelector>,
}

impl Affinity {
    pub fn new(store: Arc<dyn AffinityStore>) -> Self {
        let selector = Arc::new(BackendSelector::new(store.clone()));
        Affinity { store, selector }
    }

    /// Resolves an existing session. Never creates one.
    pub async fn resolve(&self, session_id: &str) -> Result<Resolved, AffinityError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or(AffinityError::SessionNotFound)?;

        self.attach_backend(session, false).await
    }

    /// Resolves a session, assigning a backend if the identifier is unknown.
    ///
    /// Idempotent: an identifier that already has an affinity keeps it, and no
    /// backend load is charged.
    pub async fn resolve_or_assign(&self, session_id: &str) -> Result<Resolved, AffinityError> {
        if let Some(session) = self.store.get_session(session_id).await? {
            return self.attach_backend(session, false).await;
        }

        let (session, created) = self.selector.reserve(session_id).await?;
        self.attach_backend(session, created).await
    }

    /// Drops the affinity for `session_id`. Returns true if one existed.
    pub async fn release(&self, session_id: &str) -> Result<bool, AffinityError> {
        let removed = self.store.delete_session(session_id).await?;
        if removed {
            counter!(SESSIONS_RELEASED).increment(1);
            tracing::info!(session_id, "Released session affinity");
        }
        Ok(removed)
    }

    /// Undoes an assignment made by [`Affinity::resolve_or_assign`] whose
    /// session never came to exist on the backend. Pre-existing affinities are
    /// left alone.
    pub async fn abandon(&self, resolved: &Resolved) -> Result<(), AffinityError> {
        if !resolved.created {
            return Ok(());
        }
        let session_id = resolved.session.session_id.as_str();
        self.store.delete_session(session_id).await?;
        self.selector.rollback(&resolved.backend.id).await;
        tracing::info!(
            session_id,
            backend = %resolved.backend.id,
            "Abandoned assignment"
        );
        Ok(())
    }

    /// Every known backend, available or not, in store order.
    pub async fn backends(&self) -> Result<Vec<Backend>, AffinityError> {
        Ok(self.store.list_backends().await?)
    }

    async fn attach_backend(
        &self,
        session: SessionRecord,
        created: bool,
    ) -> Result<Resolved, AffinityError> {
        match self.store.get_backend(&session.backend_id).await? {
            Some(backend) => Ok(Resolved {
                session,
                backend,
                created,
            }),
            None => Err(AffinityError::DanglingBackend {
                session_id: session.session_id,
                backend_id: session.backend_id,
            }),
        }
    }
}
