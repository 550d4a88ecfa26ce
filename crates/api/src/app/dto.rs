use serde::{Deserialize, Serialize};

use stockroom_infra::replication::LaneStatus;
use stockroom_inventory::ItemFields;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /inventory` and `PUT /inventory/:id`.
#[derive(Debug, Deserialize)]
pub struct ItemRequest {
    pub name: String,
    pub quantity: i64,
}

impl From<ItemRequest> for ItemFields {
    fn from(req: ItemRequest) -> Self {
        ItemFields::new(req.name, req.quantity)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

pub const DELETED_MESSAGE: &str = "Item deleted successfully";

#[derive(Debug, Serialize)]
pub struct ReplicationStatusResponse {
    pub pending: usize,
    pub mirrors: Vec<LaneStatus>,
}
