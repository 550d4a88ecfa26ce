//! Inventory storage: the single source of truth for inventory records.
//!
//! ## Backends
//!
//! | Backend | Generator | Delete transaction |
//! |---------|-----------|--------------------|
//! | [`InMemoryInventoryStore`] | `next_id` field | staged copy swapped in under a write lock |
//! | [`SqliteInventoryStore`] | `sqlite_sequence` row | SQLite transaction |
//! | [`PostgresInventoryStore`] | `BIGSERIAL` sequence (`setval`) | Postgres transaction |
//!
//! All three share the renumbering rule from [`stockroom_inventory::RenumberPlan`].
//!
//! ## Error Mapping
//!
//! | Situation | StoreError |
//! |-----------|------------|
//! | Target id absent on update/delete/get | `NotFound(id)` |
//! | Any sqlx error (connection, constraint, decode) | `Storage` |
//! | Injected fault inside delete | `Storage` |
//! | Poisoned in-memory lock | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use stockroom_core::ItemId;
use stockroom_inventory::{InventoryRecord, ItemFields};

use crate::config::DatabaseBackend;

pub mod fault;
pub mod in_memory;
pub mod postgres;
pub mod sqlite;

pub use fault::{DeleteStep, FaultInjector};
pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use sqlite::SqliteInventoryStore;

/// Inventory store operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("item {0} not found")]
    NotFound(ItemId),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// What a successful delete did.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: ItemId,
    /// Survivors were given new ids (the deleted id was not the maximum).
    pub renumbered: bool,
    pub remaining: usize,
    /// Id the next create will receive.
    pub next_id: ItemId,
}

/// Owner of all inventory record state.
///
/// `list`, `create`, `update` and `get` are single statements. `delete` runs the
/// existence check, removal, renumbering and generator reset as one atomic unit:
/// on any error nothing is changed.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// All records, ascending by id.
    async fn list(&self) -> Result<Vec<InventoryRecord>, StoreError>;

    async fn get(&self, id: ItemId) -> Result<InventoryRecord, StoreError>;

    /// Insert with the next generator id. Fields are stored as given.
    async fn create(&self, fields: ItemFields) -> Result<InventoryRecord, StoreError>;

    async fn update(&self, id: ItemId, fields: ItemFields) -> Result<InventoryRecord, StoreError>;

    async fn delete(&self, id: ItemId) -> Result<DeleteOutcome, StoreError>;

    /// Failure injection hooks for the delete transaction.
    fn faults(&self) -> &FaultInjector;
}

#[async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    async fn list(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        (**self).list().await
    }

    async fn get(&self, id: ItemId) -> Result<InventoryRecord, StoreError> {
        (**self).get(id).await
    }

    async fn create(&self, fields: ItemFields) -> Result<InventoryRecord, StoreError> {
        (**self).create(fields).await
    }

    async fn update(&self, id: ItemId, fields: ItemFields) -> Result<InventoryRecord, StoreError> {
        (**self).update(id, fields).await
    }

    async fn delete(&self, id: ItemId) -> Result<DeleteOutcome, StoreError> {
        (**self).delete(id).await
    }

    fn faults(&self) -> &FaultInjector {
        (**self).faults()
    }
}

/// Open the store selected by configuration, ensuring its table exists.
pub async fn open_store(
    backend: &DatabaseBackend,
    max_connections: u32,
) -> Result<Arc<dyn InventoryStore>, StoreError> {
    let store: Arc<dyn InventoryStore> = match backend {
        DatabaseBackend::InMemory => {
            tracing::info!("using in-memory inventory store");
            Arc::new(InMemoryInventoryStore::new())
        }
        DatabaseBackend::Sqlite(url) => {
            tracing::info!("using sqlite inventory store");
            Arc::new(SqliteInventoryStore::connect(url, max_connections).await?)
        }
        DatabaseBackend::Postgres(url) => {
            tracing::info!("using postgres inventory store");
            Arc::new(PostgresInventoryStore::connect(url, max_connections).await?)
        }
    };
    Ok(store)
}

/// Map a sqlx error to a storage failure that names the failing operation.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Storage(format!(
            "database error in {}: {} (code {})",
            operation,
            db_err.message(),
            db_err.code().as_deref().unwrap_or("none")
        )),
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Storage(format!("timed out acquiring connection in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Convert a raw id column value, treating non-positive ids as corruption.
pub(crate) fn decode_id(operation: &str, raw: i64) -> Result<ItemId, StoreError> {
    ItemId::new(raw)
        .map_err(|e| StoreError::Storage(format!("bad id column in {}: {}", operation, e)))
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share; each backend's tests call these.

    use super::*;

    pub fn id(v: i64) -> ItemId {
        ItemId::new(v).unwrap()
    }

    pub async fn seed(store: &dyn InventoryStore, names: &[&str]) -> Vec<InventoryRecord> {
        let mut out = Vec::new();
        for (i, name) in names.iter().enumerate() {
            out.push(store.create(ItemFields::new(*name, i as i64 * 10)).await.unwrap());
        }
        out
    }

    pub async fn ids_and_names(store: &dyn InventoryStore) -> Vec<(i64, String)> {
        store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.id.get(), r.name))
            .collect()
    }

    pub async fn create_on_empty_store_assigns_one(store: &dyn InventoryStore) {
        let rec = store.create(ItemFields::new("Widget", 10)).await.unwrap();
        assert_eq!(rec, InventoryRecord::new(id(1), ItemFields::new("Widget", 10)));
        assert_eq!(store.list().await.unwrap(), vec![rec.clone()]);
        assert_eq!(store.get(id(1)).await.unwrap(), rec);
    }

    pub async fn create_stores_fields_unvalidated(store: &dyn InventoryStore) {
        let rec = store.create(ItemFields::new("", -4)).await.unwrap();
        assert_eq!(rec.name, "");
        assert_eq!(rec.quantity, -4);
    }

    pub async fn update_overwrites_and_missing_is_not_found(store: &dyn InventoryStore) {
        seed(store, &["a", "b"]).await;

        let updated = store.update(id(2), ItemFields::new("bee", 7)).await.unwrap();
        assert_eq!(updated, InventoryRecord::new(id(2), ItemFields::new("bee", 7)));

        let before = store.list().await.unwrap();
        let err = store.update(id(9), ItemFields::new("x", 1)).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound(id(9)));
        assert_eq!(store.list().await.unwrap(), before);
    }

    pub async fn delete_first_renumbers_survivors(store: &dyn InventoryStore) {
        seed(store, &["a", "b", "c"]).await;

        let outcome = store.delete(id(1)).await.unwrap();
        assert!(outcome.renumbered);
        assert_eq!(outcome.remaining, 2);
        assert_eq!(outcome.next_id, id(3));
        assert_eq!(
            ids_and_names(store).await,
            vec![(1, "b".to_string()), (2, "c".to_string())]
        );

        let next = store.create(ItemFields::new("d", 0)).await.unwrap();
        assert_eq!(next.id, id(3));
    }

    pub async fn delete_max_leaves_survivors(store: &dyn InventoryStore) {
        seed(store, &["a", "b", "c"]).await;

        let outcome = store.delete(id(3)).await.unwrap();
        assert!(!outcome.renumbered);
        assert_eq!(
            ids_and_names(store).await,
            vec![(1, "a".to_string()), (2, "b".to_string())]
        );

        let next = store.create(ItemFields::new("d", 0)).await.unwrap();
        assert_eq!(next.id, id(3));
    }

    pub async fn delete_sole_record_resets_generator(store: &dyn InventoryStore) {
        seed(store, &["only"]).await;
        let outcome = store.delete(id(1)).await.unwrap();
        assert_eq!(outcome.remaining, 0);
        assert_eq!(outcome.next_id, ItemId::FIRST);
        assert!(store.list().await.unwrap().is_empty());

        let next = store.create(ItemFields::new("again", 1)).await.unwrap();
        assert_eq!(next.id, ItemId::FIRST);
    }

    pub async fn delete_missing_changes_nothing(store: &dyn InventoryStore) {
        seed(store, &["a", "b"]).await;
        let before = store.list().await.unwrap();

        let err = store.delete(id(5)).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound(id(5)));
        assert_eq!(store.list().await.unwrap(), before);

        let next = store.create(ItemFields::new("c", 0)).await.unwrap();
        assert_eq!(next.id, id(3));
    }

    pub async fn injected_fault_rolls_back(store: &dyn InventoryStore, step: DeleteStep) {
        seed(store, &["a", "b", "c", "d"]).await;
        let before = store.list().await.unwrap();

        store.faults().arm(step);
        let err = store.delete(id(2)).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)), "got {err:?}");
        assert_eq!(store.list().await.unwrap(), before);

        // Generator untouched: the next id still follows the original max.
        let next = store.create(ItemFields::new("e", 0)).await.unwrap();
        assert_eq!(next.id, id(5));
    }

    /// Creates and deletes of id 1 racing each other; ids stay `1..=count`.
    pub async fn interleaved_creates_and_deletes_stay_dense(store: Arc<dyn InventoryStore>) {
        seed(store.as_ref(), &["a", "b", "c", "d", "e"]).await;

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let creator = store.clone();
            tasks.spawn(async move {
                creator
                    .create(ItemFields::new(format!("new-{i}"), i))
                    .await
                    .map(|_| 0)
            });
            let deleter = store.clone();
            tasks.spawn(async move {
                match deleter.delete(ItemId::FIRST).await {
                    Ok(_) => Ok(1),
                    Err(StoreError::NotFound(_)) => Ok(0),
                    Err(e) => Err(e),
                }
            });
        }

        let mut deleted = 0;
        while let Some(joined) = tasks.join_next().await {
            deleted += joined.unwrap().unwrap();
        }

        let ids: Vec<i64> = store.list().await.unwrap().iter().map(|r| r.id.get()).collect();
        let expected = 5 + 20 - deleted;
        assert_eq!(ids, (1..=expected).collect::<Vec<_>>());

        let next = store.create(ItemFields::new("after", 0)).await.unwrap();
        assert_eq!(next.id.get(), expected + 1);
    }
}
