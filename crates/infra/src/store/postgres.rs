//! Postgres-backed inventory store.
//!
//! Table layout:
//!
//! ```sql
//! CREATE TABLE inventory (
//!     id       BIGSERIAL PRIMARY KEY,
//!     name     TEXT   NOT NULL,
//!     quantity BIGINT NOT NULL
//! );
//! ```
//!
//! ## Delete transaction
//!
//! `delete()` runs, inside one transaction:
//! 1. `LOCK TABLE inventory IN SHARE ROW EXCLUSIVE MODE`, so concurrent inserts,
//!    updates and deletes wait for this delete to finish
//! 2. `DELETE` the row (zero rows affected means `NotFound`, nothing changed)
//! 3. read surviving ids and build a [`RenumberPlan`]
//! 4. park every moved row on `-old_id`, then move it to its new id
//! 5. `setval` the serial sequence so the next insert gets `max + 1`
//!
//! Any error rolls back the row changes. Sequences are not transactional, so a
//! failure after step 5 puts the generator back to `old max + 1` while the
//! table lock is still held.
//!
//! ## Thread Safety
//!
//! `PostgresInventoryStore` is `Send + Sync`; the SQLx pool manages connections.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};

use stockroom_core::ItemId;
use stockroom_inventory::{InventoryRecord, ItemFields, RenumberPlan};

use super::{
    decode_id, map_sqlx_error, DeleteOutcome, DeleteStep, FaultInjector, InventoryStore,
    StoreError,
};

#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
    faults: Arc<FaultInjector>,
}

impl PostgresInventoryStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Self::new(pool).await
    }

    /// Wrap an existing pool, creating the `inventory` table if it is missing.
    pub async fn new(pool: PgPool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inventory (
                id       BIGSERIAL PRIMARY KEY,
                name     TEXT   NOT NULL,
                quantity BIGINT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| map_sqlx_error("create_table", e))?;

        Ok(Self {
            pool: Arc::new(pool),
            faults: Arc::new(FaultInjector::new()),
        })
    }

    /// Point the serial sequence so the next insert gets `next`.
    async fn reset_generator(
        tx: &mut Transaction<'_, Postgres>,
        next: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("SELECT setval(pg_get_serial_sequence('inventory', 'id'), $1, false)")
            .bind(next)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("reset_sequence", e))?;
        Ok(())
    }

    /// Generator repair for a failed commit, where the transaction is gone.
    async fn resync_generator(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            SELECT setval(
                pg_get_serial_sequence('inventory', 'id'),
                (SELECT COALESCE(MAX(id), 0) FROM inventory) + 1,
                false
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("resync_sequence", e))?;
        Ok(())
    }

    async fn delete_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: ItemId,
    ) -> Result<DeleteOutcome, StoreError> {
        sqlx::query("LOCK TABLE inventory IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_table", e))?;

        let deleted = sqlx::query("DELETE FROM inventory WHERE id = $1")
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
            .map_err(|e| map_sqlx_error("list_survivors", e))?
            .into_iter()
            .map(|raw| decode_id("list_survivors", raw))
            .collect::<Result<Vec<_>, _>>()?;
        let remaining = survivors.len();
        let max_before = survivors.last().map_or(id.get(), |last| last.get().max(id.get()));

        let plan = RenumberPlan::after_delete(id, survivors);
        for mv in plan.moves() {
            sqlx::query("UPDATE inventory SET id = $1 WHERE id = $2")
                .bind(-mv.from.get())
                .bind(mv.from.get())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("park_row", e))?;
        }
        for mv in plan.moves() {
            sqlx::query("UPDATE inventory SET id = $1 WHERE id = $2")
                .bind(mv.to.get())
                .bind(-mv.from.get())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("renumber_row", e))?;
        }
        self.faults.check(DeleteStep::AfterRenumber)?;

        Self::reset_generator(tx, plan.next_id().get()).await?;
        if let Err(err) = self.faults.check(DeleteStep::BeforeCommit) {
            Self::reset_generator(tx, max_before + 1).await?;
            return Err(err);
        }

        Ok(DeleteOutcome {
            deleted: id,
            renumbered: plan.renumbered(),
            remaining,
            next_id: plan.next_id(),
        })
    }
}

fn row_to_record(operation: &str, row: &PgRow) -> Result<InventoryRecord, StoreError> {
    match (
        row.try_get::<i64, _>("id"),
        row.try_get::<String, _>("name"),
        row.try_get::<i64, _>("quantity"),
    ) {
        (Ok(id), Ok(name), Ok(quantity)) => Ok(InventoryRecord::new(
            decode_id(operation, id)?,
            ItemFields::new(name, quantity),
        )),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => Err(map_sqlx_error(operation, e)),
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    #[instrument(skip(self), fields(operation = "list_items", item_count = tracing::field::Empty), err)]
    async fn list(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, quantity
            FROM inventory
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_items", e))?;

        Span::current().record("item_count", rows.len() as u64);
        rows.iter().map(|r| row_to_record("list_items", r)).collect()
    }

    #[instrument(skip(self), fields(operation = "get_item", item_id = %id), err)]
    async fn get(&self, id: ItemId) -> Result<InventoryRecord, StoreError> {
        let row = sqlx::query("SELECT id, name, quantity FROM inventory WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
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
            r#"
            INSERT INTO inventory (name, quantity)
            VALUES ($1, $2)
            RETURNING id, name, quantity
            "#,
        )
        .bind(&fields.name)
        .bind(fields.quantity)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_item", e))?;
        row_to_record("create_item", &row)
    }

    #[instrument(skip(self, fields), fields(operation = "update_item", item_id = %id), err)]
    async fn update(&self, id: ItemId, fields: ItemFields) -> Result<InventoryRecord, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE inventory
            SET name = $1, quantity = $2
            WHERE id = $3
            RETURNING id, name, quantity
            "#,
        )
        .bind(&fields.name)
        .bind(fields.quantity)
        .bind(id.get())
        .fetch_optional(&*self.pool)
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
                if let Err(e) = tx.commit().await {
                    let err = map_sqlx_error("commit_transaction", e);
                    if let Err(resync) = self.resync_generator().await {
                        tracing::warn!(error = %resync, "failed to resync id sequence after commit failure");
                    }
                    return Err(err);
                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    /// Runs only when `TEST_DATABASE_URL` points at a scratch Postgres database.
    async fn fresh_store() -> Option<PostgresInventoryStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let store = PostgresInventoryStore::connect(&url, 2).await.unwrap();
        sqlx::query("TRUNCATE inventory RESTART IDENTITY")
            .execute(&*store.pool)
            .await
            .unwrap();
        Some(store)
    }

    #[tokio::test]
    async fn postgres_store_honours_the_contract() {
        let Some(store) = fresh_store().await else {
            return;
        };
        contract::create_on_empty_store_assigns_one(&store).await;

        let store = fresh_store().await.unwrap();
        contract::update_overwrites_and_missing_is_not_found(&store).await;

        let store = fresh_store().await.unwrap();
        contract::delete_first_renumbers_survivors(&store).await;

        let store = fresh_store().await.unwrap();
        contract::delete_max_leaves_survivors(&store).await;

        let store = fresh_store().await.unwrap();
        contract::delete_sole_record_resets_generator(&store).await;

        let store = fresh_store().await.unwrap();
        contract::delete_missing_changes_nothing(&store).await;

        for step in [
            DeleteStep::AfterDelete,
            DeleteStep::AfterRenumber,
            DeleteStep::BeforeCommit,
        ] {
            let store = fresh_store().await.unwrap();
            contract::injected_fault_rolls_back(&store, step).await;
        }

        let store = fresh_store().await.unwrap();
        contract::interleaved_creates_and_deletes_stay_dense(Arc::new(store)).await;
    }
}
