//! Service wiring: the inventory store plus the replication outbox.
//!
//! Handlers call the store through `AppServices` so that every committed write
//! also queues the matching mirror op. Mirror delivery happens later on the
//! replication worker; nothing here waits on a mirror.

use std::sync::Arc;

use anyhow::Context;

use stockroom_core::ItemId;
use stockroom_infra::config::Config;
use stockroom_infra::mirror::{HttpMirror, Mirror, MirrorOp};
use stockroom_infra::replication::{self, ReplicationQueue};
use stockroom_infra::store::open_store;
use stockroom_infra::{DeleteOutcome, InventoryStore, StoreError};
use stockroom_inventory::{InventoryRecord, ItemFields};

pub struct AppServices {
    store: Arc<dyn InventoryStore>,
    replication: ReplicationQueue,
}

pub async fn build_services(config: &Config) -> anyhow::Result<AppServices> {
    let store = open_store(&config.database, config.max_connections)
        .await
        .with_context(|| format!("failed to open {} store", config.database.kind()))?;

    let mirrors = config
        .mirrors
        .iter()
        .map(|target| -> anyhow::Result<Arc<dyn Mirror>> {
            tracing::info!(mirror = %target.name, url = %target.url, "replicating to mirror");
            let mirror = HttpMirror::from_target(target)
                .with_context(|| format!("failed to set up mirror {}", target.name))?;
            Ok(Arc::new(mirror) as Arc<dyn Mirror>)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let services = AppServices::new(store, ReplicationQueue::new(mirrors));
    if config.seed_demo_items {
        services
            .seed_demo_items()
            .await
            .context("failed to seed demo items")?;
    }
    Ok(services)
}

impl AppServices {
    pub fn new(store: Arc<dyn InventoryStore>, replication: ReplicationQueue) -> Self {
        Self { store, replication }
    }

    pub fn store(&self) -> &Arc<dyn InventoryStore> {
        &self.store
    }

    pub fn replication(&self) -> &ReplicationQueue {
        &self.replication
    }

    pub async fn list_items(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        self.store.list().await
    }

    pub async fn get_item(&self, id: ItemId) -> Result<InventoryRecord, StoreError> {
        self.store.get(id).await
    }

    pub async fn create_item(&self, fields: ItemFields) -> Result<InventoryRecord, StoreError> {
        let record = self.store.create(fields).await?;
        self.replication.enqueue(MirrorOp::Upsert(record.clone()));
        Ok(record)
    }

    pub async fn update_item(
        &self,
        id: ItemId,
        fields: ItemFields,
    ) -> Result<InventoryRecord, StoreError> {
        let record = self.store.update(id, fields).await?;
        self.replication.enqueue(MirrorOp::Upsert(record.clone()));
        Ok(record)
    }

    /// Delete `id`, then queue the mirror op for it.
    ///
    /// The delete itself has committed by the time replication is considered,
    /// so a failure to snapshot the table for a renumbering delete is logged
    /// and the caller still sees success.
    pub async fn delete_item(&self, id: ItemId) -> Result<DeleteOutcome, StoreError> {
        let outcome = self.store.delete(id).await?;
        tracing::info!(
            item_id = %id,
            renumbered = outcome.renumbered,
            remaining = outcome.remaining,
            "inventory item deleted"
        );

        if self.replication.mirror_count() > 0 {
            match replication::delete_op(self.store.as_ref(), &outcome).await {
                Ok(op) => self.replication.enqueue(op),
                Err(e) => tracing::warn!(
                    item_id = %id,
                    error = %e,
                    "could not snapshot inventory for mirrors after delete"
                ),
            }
        }
        Ok(outcome)
    }

    /// Insert the two starter items of a fresh install, if the store is empty.
    pub async fn seed_demo_items(&self) -> Result<usize, StoreError> {
        if !self.store.list().await?.is_empty() {
            tracing::info!("store not empty; skipping demo seed");
            return Ok(0);
        }
        let demo = [ItemFields::new("Item A", 100), ItemFields::new("Item B", 200)];
        let count = demo.len();
        for fields in demo {
            self.create_item(fields).await?;
        }
        tracing::info!(count, "seeded demo inventory items");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_infra::mirror::RecordingMirror;
    use stockroom_infra::store::{DeleteStep, InMemoryInventoryStore};

    fn services() -> (AppServices, Arc<RecordingMirror>) {
        let mirror = Arc::new(RecordingMirror::new("rec"));
        let queue = ReplicationQueue::new(vec![mirror.clone() as Arc<dyn Mirror>]);
        (
            AppServices::new(Arc::new(InMemoryInventoryStore::new()), queue),
            mirror,
        )
    }

    #[tokio::test]
    async fn writes_queue_matching_mirror_ops() {
        let (svc, _mirror) = services();
        svc.create_item(ItemFields::new("a", 1)).await.unwrap();
        svc.create_item(ItemFields::new("b", 2)).await.unwrap();
        svc.update_item(ItemId::FIRST, ItemFields::new("aa", 3)).await.unwrap();
        svc.delete_item(ItemId::new(2).unwrap()).await.unwrap();

        let kinds: Vec<&str> = svc
            .replication()
            .pending_for("rec")
            .iter()
            .map(|q| q.op.kind())
            .collect();
        assert_eq!(kinds, vec!["upsert", "upsert", "upsert", "remove"]);
    }

    #[tokio::test]
    async fn renumbering_delete_queues_snapshot() {
        let (svc, mirror) = services();
        for name in ["a", "b", "c"] {
            svc.create_item(ItemFields::new(name, 0)).await.unwrap();
        }
        let outcome = svc.delete_item(ItemId::FIRST).await.unwrap();
        assert!(outcome.renumbered);

        svc.replication().drain_once().await;
        assert_eq!(mirror.snapshot(), svc.list_items().await.unwrap());
    }

    #[tokio::test]
    async fn failed_writes_queue_nothing() {
        let (svc, _mirror) = services();
        svc.create_item(ItemFields::new("a", 1)).await.unwrap();
        svc.replication().drain_once().await;

        let missing = ItemId::new(9).unwrap();
        assert!(svc.update_item(missing, ItemFields::new("x", 0)).await.is_err());
        assert!(svc.delete_item(missing).await.is_err());
        svc.store().faults().arm(DeleteStep::BeforeCommit);
        assert!(svc.delete_item(ItemId::FIRST).await.is_err());

        assert_eq!(svc.replication().pending(), 0);
    }

    #[tokio::test]
    async fn demo_seed_runs_only_on_empty_store() {
        let (svc, _mirror) = services();
        assert_eq!(svc.seed_demo_items().await.unwrap(), 2);
        assert_eq!(svc.seed_demo_items().await.unwrap(), 0);

        let names: Vec<String> = svc
            .list_items()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["Item A", "Item B"]);
    }
}
