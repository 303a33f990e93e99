use crate::AffinityError;
use crate::metrics_defs::{NO_BACKEND_AVAILABLE, SESSION_ASSIGNMENTS};
use crate::store::AffinityStore;
use crate::types::{Backend, SessionRecord};
use shared::counter;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Picks the available backend with the lowest load.
///
/// Ties resolve to the backend listed first, so selection is deterministic for
/// a given store state.
pub fn select_least_loaded(backends: &[Backend]) -> Option<&Backend> {
    backends
        .iter()
        .filter(|backend| backend.available)
        .min_by_key(|backend| backend.load)
}

/// Chooses backends for new sessions and reserves capacity on them.
pub struct BackendSelector {
    store: Arc<dyn AffinityStore>,
    // Serializes select + increment + affinity write so that concurrent
    // assignments observe each other's load reservations.
    reservation: Mutex<()>,
}

impl BackendSelector {
    pub fn new(store: Arc<dyn AffinityStore>) -> Self {
        BackendSelector {
            store,
            reservation: Mutex::new(()),
        }
    }

    pub async fn select_available(&self) -> Result<Backend, AffinityError> {
        let backends = self.store.list_backends().await?;
        match select_least_loaded(&backends) {
            Some(backend) => Ok(backend.clone()),
            None => {
                counter!(NO_BACKEND_AVAILABLE).increment(1);
                Err(AffinityError::NoBackendAvailable)
            }
        }
    }

    /// Returns the affinity for `session_id`, assigning the least loaded backend
    /// if the identifier has none yet. The boolean is true when a new affinity
    /// was written by this call.
    pub async fn reserve(&self, session_id: &str) -> Result<(SessionRecord, bool), AffinityError> {
        let _guard = self.reservation.lock().await;

        // Another request may have assigned this identifier while we waited
        if let Some(existing) = self.store.get_session(session_id).await? {
            return Ok((existing, false));
        }

        let backend = self.select_available().await?;
        self.store.increment_load(&backend.id, 1).await?;

        let stored = match self
            .store
            .put_session(SessionRecord::new(session_id, backend.id.clone()))
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                self.rollback(&backend.id).await;
                return Err(e.into());
            }
        };

        if stored.backend_id != backend.id {
            // Lost the conditional write to a writer outside this process
            tracing::info!(
                session_id,
                selected = %backend.id,
                winner = %stored.backend_id,
                "Affinity already written elsewhere, releasing reservation"
            );
            self.rollback(&backend.id).await;
            return Ok((stored, false));
        }

        counter!(SESSION_ASSIGNMENTS).increment(1);
        tracing::info!(
            session_id,
            backend = %backend.id,
            load = backend.load + 1,
            "Assigned session to backend"
        );
        Ok((stored, true))
    }

    /// Returns a reservation taken on `backend_id`. Failures are logged, the
    /// caller's original error takes precedence.
    pub(crate) async fn rollback(&self, backend_id: &str) {
        if let Err(e) = self.store.increment_load(backend_id, -1).await {
            tracing::error!(
                backend = backend_id,
                error = %e,
                "Could not release load reservation"
            );
        }
    }
}
