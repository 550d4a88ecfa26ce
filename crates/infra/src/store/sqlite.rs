//! SQLite-backed inventory store.
//!
//! The id generator is SQLite's `AUTOINCREMENT` counter, kept in the
//! `sqlite_sequence` row for `inventory`. The counter stores the last id handed
//! out, so resetting the generator to `next` writes `next - 1`.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::instrument;

use stockroom_core::ItemId;
use stockroom_inventory::{InventoryRecord, ItemFields, RenumberPlan};

use super::{
    decode_id, map_sqlx_error, DeleteOutcome, DeleteStep, FaultInjector, InventoryStore,
    StoreError,
};

#[derive(Debug, Clone)]
pub struct SqliteInventoryStore {
    pool: SqlitePool,
    faults: std::sync::Arc<FaultInjector>,
}

impl SqliteInventoryStore {
    /// Connect to `url` (e.g. `sqlite://inventory.db`), creating the file if needed.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| map_sqlx_error("parse_url", e))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database. A single pooled connection that never
    /// expires, since the database lives and dies with that connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| map_sqlx_error("parse_url", e))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inventory (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                name     TEXT    NOT NULL,
                quantity INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| map_sqlx_error("create_table", e))?;

        Ok(Self {
            pool,
            faults: std::sync::Arc::new(FaultInjector::new()),
        })
    }

    async fn delete_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: ItemId,
    ) -> Result<DeleteOutcome, StoreError> {
        let deleted = sqlx::query("DELETE FROM inventory WHERE id = ?1")
            .bind(id.get())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("delete_row", e))?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.faults.check(DeleteStep::AfterDelete)?;

        let survivors = sqlx::query_scalar::<_, i64>("SELECT id FROM inventory ORDER BY id ASC")
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("list_survivors", e))?;
        let survivors = survivors
            .into_iter()
            .map(|raw| decode_id("list_survivors", raw))
            .collect::<Result<Vec<_>, _>>()?;
        let remaining = survivors.len();

        let plan = RenumberPlan::after_delete(id, survivors);

        // Park moved rows on negative ids first so no rewrite collides with a
        // row that has not moved yet.
        for mv in plan.moves() {
            sqlx::query("UPDATE inventory SET id = ?1 WHERE id = ?2")
                .bind(-mv.from.get())
                .bind(mv.from.get())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("park_row", e))?;
        }
        for mv in plan.moves() {
            sqlx::query("UPDATE inventory SET id = ?1 WHERE id = ?2")
                .bind(mv.to.get())
                .bind(-mv.from.get())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("renumber_row", e))?;
        }
        self.faults.check(DeleteStep::AfterRenumber)?;

        sqlx::query("UPDATE sqlite_sequence SET seq = ?1 WHERE name = 'inventory'")
            .bind(plan.next_id().get() - 1)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("reset_sequence", e))?;
        self.faults.check(DeleteStep::BeforeCommit)?;

        Ok(DeleteOutcome {
            deleted: id,
            renumbered: plan.renumbered(),
            remaining,
            next_id: plan.next_id(),
        })
    }
}

fn row_to_record(operation: &str, row: &SqliteRow) -> Result<InventoryRecord, StoreError> {
    let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error(operation, e))?;
    let name: String = row.try_get("name").map_err(|e| map_sqlx_error(operation, e))?;
    let quantity: i64 = row
        .try_get("quantity")
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(InventoryRecord::new(
        decode_id(operation, id)?,
        ItemFields::new(name, quantity),
    ))
}

#[async_trait]
impl InventoryStore for SqliteInventoryStore {
    #[instrument(skip(self), fields(operation = "list_items"), err)]
    async fn list(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        let rows = sqlx::query("SELECT id, name, quantity FROM inventory ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_items", e))?;
        rows.iter().map(|r| row_to_record("list_items", r)).collect()
    }

    #[instrument(skip(self), fields(operation = "get_item", item_id = %id), err)]
    async fn get(&self, id: ItemId) -> Result<InventoryRecord, StoreError> {
        let row = sqlx::query("SELECT id, name, quantity FROM inventory WHERE id = ?1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_item", e))?;
        match row {
            Some(row) => row_to_record("get_item", &row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    #[instrument(skip(self, fields), fields(operation = "create_item"), err)]
    async fn create(&self, fields: ItemFields) -> Result<InventoryRecord, StoreError> {
        let row = sqlx::query(
            "INSERT INTO inventory (name, quantity) VALUES (?1, ?2) RETURNING id, name, quantity",
        )
        .bind(&fields.name)
        .bind(fields.quantity)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_item", e))?;
        row_to_record("create_item", &row)
    }

    #[instrument(skip(self, fields), fields(operation = "update_item", item_id = %id), err)]
    async fn update(&self, id: ItemId, fields: ItemFields) -> Result<InventoryRecord, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE inventory
            SET name = ?1, quantity = ?2
            WHERE id = ?3
            RETURNING id, name, quantity
            "#,
        )
        .bind(&fields.name)
        .bind(fields.quantity)
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_item", e))?;
        match row {
            Some(row) => row_to_record("update_item", &row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    #[instrument(skip(self), fields(operation = "delete_item", item_id = %id), err)]
    async fn delete(&self, id: ItemId) -> Result<DeleteOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        match self.delete_in_tx(&mut tx, id).await {
            Ok(outcome) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(error = %e, "rollback failed after delete error");
                }
                Err(err)
            }
        }
    }

    fn faults(&self) -> &FaultInjector {
        &self.faults
    }
}
