use crate::calls::{
    CREATE, DURATION, END, GET_MEETING_INFO, IS_MEETING_RUNNING, JOIN, MEETING_ID,
};
use crate::document::Element;
use crate::errors::ApiError;
use crate::metrics_defs::SESSIONS_SELF_HEALED;
use crate::params::{CHECKSUM, Params};
use crate::proxy::ProtocolProxy;
use affinity::{Affinity, AffinityError};
use bytes::Bytes;
use shared::counter;
use std::sync::Arc;
use url::Url;

#[derive(Clone, Debug, Default)]
pub struct SessionSettings {
    /// Ceiling for the requested `duration`, in minutes
    pub duration_ceiling: Option<u64>,
}

/// Routes single-session calls to the backend owning the session.
pub struct SessionRouter {
    affinity: Affinity,
    proxy: Arc<ProtocolProxy>,
    settings: SessionSettings,
}

impl SessionRouter {
    pub fn new(affinity: Affinity, proxy: Arc<ProtocolProxy>, settings: SessionSettings) -> Self {
        SessionRouter {
            affinity,
            proxy,
            settings,
        }
    }

    pub async fn info(&self, params: &Params) -> Result<Element, ApiError> {
        let session_id = session_id(params)?;
        let resolved = self.affinity.resolve(session_id).await?;
        Ok(self
            .proxy
            .call(&resolved.backend, GET_MEETING_INFO, params, None)
            .await?)
    }

    /// Never fails for sessions the gateway or the backend does not know.
    pub async fn is_running(&self, params: &Params) -> Result<Element, ApiError> {
        let session_id = session_id(params)?;
        let resolved = match self.affinity.resolve(session_id).await {
            Ok(resolved) => resolved,
            Err(AffinityError::SessionNotFound) => return Ok(not_running()),
            Err(e) => return Err(e.into()),
        };

        match self
            .proxy
            .call(&resolved.backend, IS_MEETING_RUNNING, params, None)
            .await
        {
            Ok(document) => Ok(document),
            Err(e) if e.is_not_found() => Ok(not_running()),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates the session on its backend, assigning one if the identifier is new.
    pub async fn create(&self, params: &Params, body: Option<Bytes>) -> Result<Element, ApiError> {
        let session_id = session_id(params)?;
        let resolved = self.affinity.resolve_or_assign(session_id).await?;

        let mut forwarded = params.without(&[CHECKSUM]);
        if let Some(ceiling) = self.settings.duration_ceiling
            && let Some(duration) = clamp_duration(params.get(DURATION), ceiling)
        {
            forwarded.set(DURATION, duration.to_string());
        }

        match self
            .proxy
            .call(&resolved.backend, CREATE, &forwarded, body)
            .await
        {
            Ok(document) => Ok(document),
            Err(e) => {
                // A fresh assignment has no session behind it
                if let Err(abandon) = self.affinity.abandon(&resolved).await {
                    tracing::error!(session_id, error = %abandon, "Could not undo assignment");
                }
                Err(e.into())
            }
        }
    }

    /// Ends the session. If the backend no longer knows it, the local
    /// affinity is dropped before the not-found failure is returned.
    pub async fn end(&self, params: &Params) -> Result<Element, ApiError> {
        let session_id = session_id(params)?;
        let resolved = self.affinity.resolve(session_id).await?;

        match self.proxy.call(&resolved.backend, END, params, None).await {
            Ok(document) => Ok(document),
            Err(e) if e.is_not_found() => {
                if self.affinity.release(session_id).await? {
                    counter!(SESSIONS_SELF_HEALED).increment(1);
                    tracing::info!(
                        session_id,
                        backend = %resolved.backend.id,
                        "Backend no longer knows session, removed affinity"
                    );
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Signed join URI on the owning backend. The call itself is made by the
    /// client following the redirect.
    pub async fn join(&self, params: &Params) -> Result<Url, ApiError> {
        let session_id = session_id(params)?;
        let resolved = self.affinity.resolve(session_id).await?;
        let call = self.proxy.build_call(&resolved.backend, JOIN, params, None)?;
        Ok(call.uri)
    }
}

fn session_id(params: &Params) -> Result<&str, ApiError> {
    params
        .get_nonblank(MEETING_ID)
        .ok_or(ApiError::MissingParameter(MEETING_ID))
}

fn not_running() -> Element {
    Element::success().child_element(Element::with_text("running", "false"))
}

/// Duration to forward in place of `requested`, or `None` to keep it.
///
/// Absent, zero, unparsable and over-the-ceiling durations are all replaced
/// by the ceiling.
fn clamp_duration(requested: Option<&str>, ceiling: u64) -> Option<u64> {
    let requested = requested
        .and_then(|d| d.trim().parse::<u64>().ok())
        .unwrap_or(0);
    if requested == 0 || requested > ceiling {
        Some(ceiling)
    } else {
        None
    }
}
