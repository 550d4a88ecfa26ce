use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use stockroom_core::ItemId;
use stockroom_inventory::InventoryRecord;

use super::{Mirror, MirrorError, MirrorOp};

#[derive(Debug, Default)]
struct Replica {
    rows: BTreeMap<ItemId, InventoryRecord>,
    applied: Vec<MirrorOp>,
    fail_next: usize,
}

/// In-process mirror that keeps its replica in a map.
///
/// Used by tests and as a dev target. `fail_next(n)` makes the next `n` applies
/// fail with [`MirrorError::Injected`] without touching the replica.
#[derive(Debug)]
pub struct RecordingMirror {
    name: String,
    replica: Mutex<Replica>,
}

impl RecordingMirror {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replica: Mutex::new(Replica::default()),
        }
    }

    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    /// Replica contents, ascending by id.
    pub fn snapshot(&self) -> Vec<InventoryRecord> {
        self.lock().rows.values().cloned().collect()
    }

    /// Every op applied successfully, in order.
    pub fn applied_ops(&self) -> Vec<MirrorOp> {
        self.lock().applied.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Replica> {
        self.replica.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Mirror for RecordingMirror {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, op: &MirrorOp) -> Result<(), MirrorError> {
        let mut replica = self.lock();
        if replica.fail_next > 0 {
            replica.fail_next -= 1;
            return Err(MirrorError::Injected);
        }

        match op {
            MirrorOp::Upsert(rec) => {
                replica.rows.insert(rec.id, rec.clone());
            }
            MirrorOp::Remove(id) => {
                replica.rows.remove(id);
            }
            MirrorOp::ReplaceAll(rows) => {
                replica.rows = rows.iter().map(|r| (r.id, r.clone())).collect();
            }
        }
        replica.applied.push(op.clone());
        Ok(())
    }
}
