use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockroom_core::ItemId;
use stockroom_infra::StoreError;

pub const NOT_FOUND_MESSAGE: &str = "Item not found";
pub const SERVER_ERROR_MESSAGE: &str = "Server error";

/// Map a store failure to a response. Storage detail is logged, never returned.
pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", NOT_FOUND_MESSAGE),
        StoreError::Storage(detail) => {
            tracing::error!(error = %detail, "inventory store failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                SERVER_ERROR_MESSAGE,
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_item_id(s: &str) -> Result<ItemId, axum::response::Response> {
    s.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid item id"))
}
