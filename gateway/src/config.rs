use crate::signature::ChecksumAlgorithm;
use affinity::config::BackendConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("At least one shared secret is required")]
    NoSecrets,

    #[error("Secret cannot be empty")]
    EmptySecret,

    #[error("Empty backend id")]
    EmptyBackendId,

    #[error("Duplicate backend id: {0}")]
    DuplicateBackend(String),

    #[error("Backend {0} has an empty secret")]
    EmptyBackendSecret(String),

    #[error("Backend timeout must be greater than 0")]
    InvalidTimeout,
}

/// What the cluster listing does when a backend fails
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Any backend failure fails the whole listing
    #[default]
    FailFast,
    /// Failed backends are logged and skipped
    BestEffort,
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for API requests
    pub listener: Listener,
    /// Admin listener for health and readiness
    pub admin_listener: Listener,
    /// Shared secrets accepted on inbound requests
    pub secrets: Vec<String>,
    /// Digest used to sign outbound calls
    #[serde(default)]
    pub outbound_checksum: ChecksumAlgorithm,
    /// Ceiling for the `duration` of created sessions, in minutes.
    /// Absent or 0 means no ceiling.
    #[serde(default)]
    pub max_session_duration: Option<u64>,
    /// Build identifier reported by the version endpoint
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    #[serde(default)]
    pub fan_out_policy: FanOutPolicy,
    pub backends: Vec<BackendConfig>,
    /// Optional JSON file seeding the recording catalog
    #[serde(default)]
    pub recordings_snapshot: Option<PathBuf>,
}

fn default_backend_timeout_secs() -> u64 {
    10
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.secrets.is_empty() {
            return Err(ValidationError::NoSecrets);
        }
        if self.secrets.iter().any(|s| s.is_empty()) {
            return Err(ValidationError::EmptySecret);
        }

        if self.backend_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        let mut ids = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(ValidationError::EmptyBackendId);
            }
            if !ids.insert(&backend.id) {
                return Err(ValidationError::DuplicateBackend(backend.id.clone()));
            }
            if backend.secret.is_empty() {
                return Err(ValidationError::EmptyBackendSecret(backend.id.clone()));
            }
        }

        Ok(())
    }

    /// Effective duration ceiling; `None` when unset or 0.
    pub fn duration_ceiling(&self) -> Option<u64> {
        self.max_session_duration.filter(|d| *d > 0)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}
