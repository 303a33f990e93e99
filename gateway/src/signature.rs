//! Request checksums.
//!
//! A call is signed with `hex(SHA-x(call ‖ parameters ‖ secret))`, where
//! `parameters` is the raw parameter string without the `checksum` pair.
//! Inbound requests may use any supported digest, told apart by the length of
//! the checksum; outbound calls use the configured one.

use crate::errors::ApiError;
use crate::params::{CHECKSUM, Params, strip_checksum};
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha384, Sha512};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Algorithm whose hex digest has `len` characters.
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            64 => Some(ChecksumAlgorithm::Sha256),
            96 => Some(ChecksumAlgorithm::Sha384),
            128 => Some(ChecksumAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn checksum(&self, call: &str, parameters: &str, secret: &str) -> String {
        match self {
            ChecksumAlgorithm::Sha256 => digest::<Sha256>(call, parameters, secret),
            ChecksumAlgorithm::Sha384 => digest::<Sha384>(call, parameters, secret),
            ChecksumAlgorithm::Sha512 => digest::<Sha512>(call, parameters, secret),
        }
    }
}

fn digest<D: Digest>(call: &str, parameters: &str, secret: &str) -> String {
    let mut hasher = D::new();
    hasher.update(call.as_bytes());
    hasher.update(parameters.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Rejects requests that are not signed with one of the shared secrets.
pub struct SignatureGuard {
    secrets: Vec<String>,
}

impl SignatureGuard {
    pub fn new(secrets: Vec<String>) -> Self {
        SignatureGuard { secrets }
    }

    /// Verifies the checksum carried in `raw_params` for `call`.
    ///
    /// `raw_params` must be the parameter string exactly as received (query
    /// string or form body), since the checksum covers its encoded bytes.
    pub fn verify(&self, call: &str, raw_params: &str) -> Result<(), ApiError> {
        let params = Params::parse(raw_params);
        let provided = params
            .get_nonblank(CHECKSUM)
            .map(str::to_ascii_lowercase)
            .ok_or(ApiError::SignatureInvalid)?;

        let algorithm =
            ChecksumAlgorithm::from_hex_len(provided.len()).ok_or(ApiError::SignatureInvalid)?;
        let signed = strip_checksum(raw_params);

        let matched = self.secrets.iter().any(|secret| {
            let expected = algorithm.checksum(call, &signed, secret);
            constant_time_eq(expected.as_bytes(), provided.as_bytes())
        });

        if matched {
            Ok(())
        } else {
            tracing::debug!(call, "Checksum mismatch");
            Err(ApiError::SignatureInvalid)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
