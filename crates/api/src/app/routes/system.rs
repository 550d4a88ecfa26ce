use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::dto;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Queue depth and last error per mirror.
pub async fn replication_status(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let queue = services.replication();
    (
        StatusCode::OK,
        Json(dto::ReplicationStatusResponse {
            pending: queue.pending(),
            mirrors: queue.status(),
        }),
    )
        .into_response()
}
