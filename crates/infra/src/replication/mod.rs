//! Replication outbox: committed writes waiting to reach each mirror.
//!
//! Every mirror gets its own lane, a FIFO of [`QueuedOp`]s. A lane applies its
//! head op and pops it only after the mirror accepted it, so delivery is
//! in-order and at-least-once. A failed op stays at the head with its attempt
//! count and last error recorded; nothing behind it is applied until it
//! succeeds.
//!
//! Enqueuing a [`MirrorOp::ReplaceAll`] drops every op still pending on that
//! lane: the snapshot already reflects them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::mirror::{Mirror, MirrorError, MirrorOp};
use crate::store::{DeleteOutcome, InventoryStore, StoreError};

pub mod worker;

pub use worker::{next_backoff, ReplicationWorker, ReplicationWorkerConfig, ReplicationWorkerHandle};

/// An op waiting in a lane.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedOp {
    pub id: Uuid,
    pub op: MirrorOp,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl QueuedOp {
    fn new(op: MirrorOp) -> Self {
        Self {
            id: Uuid::now_v7(),
            op,
            enqueued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }
}

/// Point-in-time view of one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneStatus {
    pub mirror: String,
    pub pending: usize,
    pub delivered: u64,
    pub head_attempts: u32,
    pub last_error: Option<String>,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
}

pub(crate) struct Lane {
    mirror: Arc<dyn Mirror>,
    pending: Mutex<VecDeque<QueuedOp>>,
    notify: Notify,
    // Serializes applies so two drainers never deliver the same head twice.
    apply_guard: tokio::sync::Mutex<()>,
    delivered: AtomicU64,
}

impl Lane {
    fn new(mirror: Arc<dyn Mirror>) -> Self {
        Self {
            mirror,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            apply_guard: tokio::sync::Mutex::new(()),
            delivered: AtomicU64::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.mirror.name()
    }

    pub(crate) fn notify(&self) -> &Notify {
        &self.notify
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedOp>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, op: MirrorOp) {
        {
            let mut pending = self.lock();
            if matches!(op, MirrorOp::ReplaceAll(_)) && !pending.is_empty() {
                tracing::debug!(
                    mirror = self.name(),
                    superseded = pending.len(),
                    "replace_all supersedes pending ops"
                );
                pending.clear();
            }
            pending.push_back(QueuedOp::new(op));
        }
        self.notify.notify_one();
    }

    /// Apply the head op once. `None` when the lane is empty.
    pub(crate) async fn apply_head(&self) -> Option<Result<(), MirrorError>> {
        let _guard = self.apply_guard.lock().await;
        let head = self.lock().front().cloned()?;

        let result = self.mirror.apply(&head.op).await;

        let mut pending = self.lock();
        // The head may have been superseded by a ReplaceAll while applying.
        let still_head = pending.front().is_some_and(|q| q.id == head.id);
        match &result {
            Ok(()) => {
                if still_head {
                    pending.pop_front();
                }
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                if let Some(front) = pending.front_mut().filter(|_| still_head) {
                    front.attempts += 1;
                    front.last_error = Some(err.to_string());
                }
                tracing::warn!(
                    mirror = self.name(),
                    op = head.op.kind(),
                    op_id = %head.id,
                    attempts = head.attempts + 1,
                    error = %err,
                    "mirror apply failed"
                );
            }
        }
        Some(result)
    }

    fn status(&self) -> LaneStatus {
        let pending = self.lock();
        let head = pending.front();
        LaneStatus {
            mirror: self.name().to_string(),
            pending: pending.len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            head_attempts: head.map(|q| q.attempts).unwrap_or(0),
            last_error: head.and_then(|q| q.last_error.clone()),
            oldest_enqueued_at: head.map(|q| q.enqueued_at),
        }
    }
}

/// Per-mirror outbox shared by the request path and the replication workers.
#[derive(Clone, Default)]
pub struct ReplicationQueue {
    lanes: Arc<Vec<Arc<Lane>>>,
}

impl std::fmt::Debug for ReplicationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationQueue")
            .field("mirrors", &self.lanes.iter().map(|l| l.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl ReplicationQueue {
    pub fn new(mirrors: Vec<Arc<dyn Mirror>>) -> Self {
        Self {
            lanes: Arc::new(mirrors.into_iter().map(|m| Arc::new(Lane::new(m))).collect()),
        }
    }

    /// Queue `op` for every mirror. Never blocks on a mirror.
    pub fn enqueue(&self, op: MirrorOp) {
        for lane in self.lanes.iter() {
            lane.push(op.clone());
        }
    }

    pub fn mirror_count(&self) -> usize {
        self.lanes.len()
    }

    /// Ops pending across all lanes.
    pub fn pending(&self) -> usize {
        self.lanes.iter().map(|l| l.lock().len()).sum()
    }

    /// Pending ops for one mirror, head first.
    pub fn pending_for(&self, mirror: &str) -> Vec<QueuedOp> {
        self.lanes
            .iter()
            .find(|l| l.name() == mirror)
            .map(|l| l.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn status(&self) -> Vec<LaneStatus> {
        self.lanes.iter().map(|l| l.status()).collect()
    }

    /// Apply what is queued right now, lane by lane. A lane stops at its first
    /// failure. Returns the number of ops delivered.
    pub async fn drain_once(&self) -> usize {
        let mut delivered = 0;
        for lane in self.lanes.iter() {
            let budget = lane.lock().len();
            for _ in 0..budget {
                match lane.apply_head().await {
                    Some(Ok(())) => delivered += 1,
                    Some(Err(_)) | None => break,
                }
            }
        }
        delivered
    }

    pub(crate) fn lanes(&self) -> &[Arc<Lane>] {
        &self.lanes
    }
}

/// The op that replays a committed delete on a mirror.
///
/// A delete that renumbered survivors changed their ids, so mirrors get the
/// whole post-delete table instead of a single removal.
pub async fn delete_op(
    store: &dyn InventoryStore,
    outcome: &DeleteOutcome,
) -> Result<MirrorOp, StoreError> {
    if outcome.renumbered {
        Ok(MirrorOp::ReplaceAll(store.list().await?))
    } else {
        Ok(MirrorOp::Remove(outcome.deleted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::RecordingMirror;
    use stockroom_core::ItemId;
    use stockroom_inventory::{InventoryRecord, ItemFields};

    fn rec(id: i64, name: &str) -> InventoryRecord {
        InventoryRecord::new(ItemId::new(id).unwrap(), ItemFields::new(name, 1))
    }

    fn queue_with(mirror: &Arc<RecordingMirror>) -> ReplicationQueue {
        ReplicationQueue::new(vec![mirror.clone() as Arc<dyn Mirror>])
    }

    #[tokio::test]
    async fn drain_applies_in_order() {
        let mirror = Arc::new(RecordingMirror::new("rec"));
        let queue = queue_with(&mirror);

        queue.enqueue(MirrorOp::Upsert(rec(1, "a")));
        queue.enqueue(MirrorOp::Upsert(rec(2, "b")));
        queue.enqueue(MirrorOp::Remove(ItemId::FIRST));
        assert_eq!(queue.pending(), 3);

        assert_eq!(queue.drain_once().await, 3);
        assert_eq!(queue.pending(), 0);
        assert_eq!(mirror.snapshot(), vec![rec(2, "b")]);
        assert_eq!(queue.status()[0].delivered, 3);
    }

    #[tokio::test]
    async fn failed_head_blocks_lane_and_records_error() {
        let mirror = Arc::new(RecordingMirror::new("rec"));
        let queue = queue_with(&mirror);
        mirror.fail_next(1);

        queue.enqueue(MirrorOp::Upsert(rec(1, "a")));
        queue.enqueue(MirrorOp::Upsert(rec(2, "b")));

        assert_eq!(queue.drain_once().await, 0);
        let status = &queue.status()[0];
        assert_eq!(status.pending, 2);
        assert_eq!(status.head_attempts, 1);
        assert_eq!(status.last_error.as_deref(), Some("injected mirror failure"));
        assert!(mirror.snapshot().is_empty());

        assert_eq!(queue.drain_once().await, 2);
        assert_eq!(mirror.snapshot(), vec![rec(1, "a"), rec(2, "b")]);
        assert_eq!(queue.status()[0].last_error, None);
    }

    #[tokio::test]
    async fn replace_all_supersedes_pending_ops() {
        let mirror = Arc::new(RecordingMirror::new("rec"));
        let queue = queue_with(&mirror);

        queue.enqueue(MirrorOp::Upsert(rec(1, "a")));
        queue.enqueue(MirrorOp::Upsert(rec(2, "b")));
        queue.enqueue(MirrorOp::ReplaceAll(vec![rec(1, "b")]));

        let pending = queue.pending_for("rec");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op.kind(), "replace_all");

        queue.drain_once().await;
        assert_eq!(mirror.applied_ops(), vec![MirrorOp::ReplaceAll(vec![rec(1, "b")])]);
    }

    #[tokio::test]
    async fn every_mirror_gets_its_own_lane() {
        let healthy = Arc::new(RecordingMirror::new("healthy"));
        let flaky = Arc::new(RecordingMirror::new("flaky"));
        flaky.fail_next(1);
        let queue = ReplicationQueue::new(vec![
            healthy.clone() as Arc<dyn Mirror>,
            flaky.clone() as Arc<dyn Mirror>,
        ]);

        queue.enqueue(MirrorOp::Upsert(rec(1, "a")));
        assert_eq!(queue.drain_once().await, 1);
        assert_eq!(healthy.snapshot(), vec![rec(1, "a")]);
        assert!(flaky.snapshot().is_empty());
        assert_eq!(queue.pending_for("flaky").len(), 1);
        assert!(queue.pending_for("healthy").is_empty());
    }

    #[tokio::test]
    async fn queue_without_mirrors_drops_ops() {
        let queue = ReplicationQueue::default();
        queue.enqueue(MirrorOp::Remove(ItemId::FIRST));
        assert_eq!(queue.mirror_count(), 0);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.drain_once().await, 0);
    }
}
