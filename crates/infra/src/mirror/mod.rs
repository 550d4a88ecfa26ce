//! Mirrors: best-effort secondary copies of the inventory table.
//!
//! The store is authoritative. Mirrors only ever receive [`MirrorOp`]s that
//! describe writes the store has already committed, delivered in order by the
//! replication queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use stockroom_core::ItemId;
use stockroom_inventory::InventoryRecord;

pub mod http;
pub mod recording;

pub use http::{HttpDialect, HttpMirror};
pub use recording::RecordingMirror;

/// A committed write to replay on a mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum MirrorOp {
    /// Create or update of a single record.
    Upsert(InventoryRecord),
    /// Delete that left every other id untouched.
    Remove(ItemId),
    /// Delete that renumbered survivors; the mirror must match this snapshot exactly.
    ReplaceAll(Vec<InventoryRecord>),
}

impl MirrorOp {
    pub fn kind(&self) -> &'static str {
        match self {
            MirrorOp::Upsert(_) => "upsert",
            MirrorOp::Remove(_) => "remove",
            MirrorOp::ReplaceAll(_) => "replace_all",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MirrorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("mirror responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("injected mirror failure")]
    Injected,
}

/// A replication target.
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Stable name used in logs and status reports.
    fn name(&self) -> &str;

    /// Apply one op. Must be idempotent: a retried op may be applied twice.
    async fn apply(&self, op: &MirrorOp) -> Result<(), MirrorError>;
}

#[async_trait]
impl<M> Mirror for Arc<M>
where
    M: Mirror + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn apply(&self, op: &MirrorOp) -> Result<(), MirrorError> {
        (**self).apply(op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_inventory::ItemFields;

    #[test]
    fn ops_serialize_with_kind_tag() {
        let rec = InventoryRecord::new(ItemId::new(2).unwrap(), ItemFields::new("Bolt", 5));

        let json = serde_json::to_value(MirrorOp::Upsert(rec.clone())).unwrap();
        assert_eq!(json["kind"], "upsert");
        assert_eq!(json["payload"]["id"], 2);

        let json = serde_json::to_value(MirrorOp::Remove(rec.id)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "remove", "payload": 2}));

        assert_eq!(MirrorOp::ReplaceAll(vec![rec]).kind(), "replace_all");
    }
}
