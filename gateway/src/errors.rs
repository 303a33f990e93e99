use crate::document::Element;
use crate::proxy::ProxyError;
use affinity::AffinityError;
use thiserror::Error;

/// Errors returned to API callers.
///
/// Every variant renders as a `FAILED` response document. Internal failures
/// carry detail for the server log only; callers see a generic message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("checksum did not match")]
    SignatureInvalid,

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("session not found")]
    SessionNotFound,

    #[error("recordings not found")]
    RecordingNotFound,

    #[error("no backend available")]
    NoBackendAvailable,

    #[error("backend returned {key}: {message}")]
    RemoteProtocol { key: String, message: String },

    #[error("unsupported call: {0}")]
    UnsupportedRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn message_key(&self) -> &str {
        match self {
            ApiError::SignatureInvalid => "checksumError",
            ApiError::MissingParameter("meetingID") => "missingParamMeetingID",
            ApiError::MissingParameter("recordID") => "missingParamRecordID",
            ApiError::MissingParameter("publish") => "missingParamPublish",
            ApiError::MissingParameter(_) => "missingParameter",
            ApiError::SessionNotFound | ApiError::RecordingNotFound => "notFound",
            ApiError::NoBackendAvailable => "noAvailableServers",
            ApiError::RemoteProtocol { key, .. } => key.as_str(),
            ApiError::UnsupportedRequest(_) => "unsupportedRequest",
            ApiError::Internal(_) => "internalError",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::SignatureInvalid => "You did not pass the checksum security check".into(),
            ApiError::MissingParameter("meetingID") => {
                "You must specify a meeting ID for the meeting.".into()
            }
            ApiError::MissingParameter("recordID") => {
                "You must specify one or more recording IDs.".into()
            }
            ApiError::MissingParameter("publish") => {
                "You must specify one publish value true or false.".into()
            }
            ApiError::MissingParameter(name) => format!("You must specify the {name} parameter."),
            ApiError::SessionNotFound => {
                "We could not find a meeting with that meeting ID - perhaps the meeting is not yet running?".into()
            }
            ApiError::RecordingNotFound => "We could not find recordings".into(),
            ApiError::NoBackendAvailable => {
                "No server is currently available to host this meeting".into()
            }
            ApiError::RemoteProtocol { message, .. } => message.clone(),
            ApiError::UnsupportedRequest(_) => "This request is not supported.".into(),
            ApiError::Internal(_) => "An internal error occurred".into(),
        }
    }

    /// Renders the failure document, logging internal detail server-side.
    pub fn to_document(&self) -> Element {
        if let ApiError::Internal(detail) = self {
            tracing::error!(error = %detail, "Internal failure");
        }
        Element::failure(self.message_key(), &self.message())
    }
}

impl From<AffinityError> for ApiError {
    fn from(err: AffinityError) -> Self {
        match err {
            AffinityError::SessionNotFound => ApiError::SessionNotFound,
            AffinityError::NoBackendAvailable => ApiError::NoBackendAvailable,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Remote { key, message } => ApiError::RemoteProtocol { key, message },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Errors that stop the gateway process.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ValidationError),

    #[error("could not load recordings snapshot: {0}")]
    Recordings(#[from] crate::recordings::CatalogError),

    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
