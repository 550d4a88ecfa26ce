//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store and replication wiring
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use stockroom_infra::config::Config;
use stockroom_infra::replication::{ReplicationWorker, ReplicationWorkerHandle};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// A wired application: the router to serve plus the background worker that
/// must be shut down after the server stops.
pub struct App {
    pub router: Router,
    pub services: Arc<AppServices>,
    pub worker: ReplicationWorkerHandle,
}

/// Build the full application from configuration (public entrypoint used by `main.rs`).
pub async fn build_app(config: &Config) -> anyhow::Result<App> {
    let services = Arc::new(services::build_services(config).await?);
    let worker = ReplicationWorker::spawn(services.replication(), config.replication);

    Ok(App {
        router: router(services.clone()),
        services,
        worker,
    })
}

/// The HTTP router over already-built services.
pub fn router(services: Arc<AppServices>) -> Router {
    routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn(middleware::trace_requests))
            .layer(axum::middleware::from_fn(middleware::cors))
            .layer(Extension(services)),
    )
}
