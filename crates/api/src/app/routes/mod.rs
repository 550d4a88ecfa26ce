use axum::{routing::get, Router};

pub mod inventory;
pub mod system;

/// Router for every endpoint; services are attached by the caller.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/replication", get(system::replication_status))
        .merge(inventory::router())
}
