use std::sync::Arc;
use url::Url;

pub type BackendId = String;

/// A remote node able to host sessions.
#[derive(Clone, Debug, PartialEq)]
pub struct Backend {
    pub id: BackendId,
    /// API root of the backend, e.g. `https://bbb1.example.com/bigbluebutton/api/`
    pub url: Url,
    /// Secret used to sign outbound calls to this backend
    pub secret: Arc<str>,
    pub load: u64,
    /// Only available backends are eligible for new sessions
    pub available: bool,
}

impl Backend {
    pub fn new<I, S>(id: I, url: Url, secret: S) -> Self
    where
        I: Into<String>,
        S: Into<Arc<str>>,
    {
        Backend {
            id: id.into(),
            url,
            secret: secret.into(),
            load: 0,
            available: true,
        }
    }

    pub fn with_load(mut self, load: u64) -> Self {
        self.load = load;
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }
}

/// Durable association between a session identifier and its owning backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub backend_id: BackendId,
}

impl SessionRecord {
    pub fn new<S, B>(session_id: S, backend_id: B) -> Self
    where
        S: Into<String>,
        B: Into<String>,
    {
        SessionRecord {
            session_id: session_id.into(),
            backend_id: backend_id.into(),
        }
    }
}
