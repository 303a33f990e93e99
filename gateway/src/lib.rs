//! Conferencing API gateway.
//!
//! Clients talk to the gateway exactly as they would to a single backend. The
//! gateway keeps every session on the backend it was created on, forwards
//! single-session calls there, answers cluster listings by asking all
//! backends at once and serves recordings from a local catalog.

pub mod api;
pub mod calls;
pub mod config;
pub mod document;
pub mod errors;
pub mod fanout;
pub mod metrics_defs;
pub mod params;
pub mod proxy;
pub mod recordings;
pub mod sessions;
pub mod signature;

#[cfg(test)]
mod testutils;

use crate::api::{Gateway, GatewayService};
use crate::errors::GatewayError;
use crate::proxy::HttpTransport;
use crate::recordings::InMemoryRecordingCatalog;
use affinity::{Backend, InMemoryAffinityStore};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(config: config::Config) -> Result<(), GatewayError> {
    config.validate()?;

    let backends: Vec<Backend> = config.backends.iter().cloned().map(Backend::from).collect();
    tracing::info!(backends = backends.len(), "Registering backends");
    let store = Arc::new(InMemoryAffinityStore::with_backends(backends));

    let catalog = match &config.recordings_snapshot {
        Some(path) => InMemoryRecordingCatalog::from_snapshot(path)?,
        None => InMemoryRecordingCatalog::new(),
    };
    let transport = HttpTransport::new(Duration::from_secs(config.backend_timeout_secs))?;

    let gateway = Gateway::new(
        &config,
        store.clone(),
        Arc::new(transport),
        Arc::new(catalog),
    );

    // Ready once backends are registered
    let admin_service: AdminService<_, GatewayError> =
        AdminService::new(move || store.backend_count() > 0);

    let api_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        GatewayService::new(Arc::new(gateway)),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}
