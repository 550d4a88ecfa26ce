use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use stockroom_core::ItemId;
use stockroom_inventory::{InventoryRecord, ItemFields, RenumberPlan};

use super::{DeleteOutcome, DeleteStep, FaultInjector, InventoryStore, StoreError};

#[derive(Debug, Clone)]
struct State {
    records: BTreeMap<ItemId, InventoryRecord>,
    next_id: ItemId,
}

impl Default for State {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            next_id: ItemId::FIRST,
        }
    }
}

/// In-memory inventory store.
///
/// Intended for tests/dev. The store owns every record; callers only ever see
/// clones. A delete stages its work on a copy of the state and swaps it in
/// while still holding the write lock, so a failed delete leaves no trace.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    state: RwLock<State>,
    faults: FaultInjector,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `fields`, assigned ids 1..=N in order.
    pub fn with_items(fields: impl IntoIterator<Item = ItemFields>) -> Self {
        let mut state = State::default();
        for f in fields {
            let id = state.next_id;
            state.records.insert(id, InventoryRecord::new(id, f));
            state.next_id = id.next();
        }
        Self {
            state: RwLock::new(state),
            faults: FaultInjector::new(),
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Storage("lock poisoned".to_string())
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn list(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state.records.values().cloned().collect())
    }

    async fn get(&self, id: ItemId) -> Result<InventoryRecord, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        state.records.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn create(&self, fields: ItemFields) -> Result<InventoryRecord, StoreError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let id = state.next_id;
        let record = InventoryRecord::new(id, fields);
        state.records.insert(id, record.clone());
        state.next_id = id.next();
        Ok(record)
    }

    async fn update(&self, id: ItemId, fields: ItemFields) -> Result<InventoryRecord, StoreError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let record = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.apply(fields);
        Ok(record.clone())
    }

    async fn delete(&self, id: ItemId) -> Result<DeleteOutcome, StoreError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        if !state.records.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }

        let mut staged = state.clone();
        staged.records.remove(&id);
        self.faults.check(DeleteStep::AfterDelete)?;

        let plan = RenumberPlan::after_delete(id, staged.records.keys().copied());
        if plan.renumbered() {
            let mut survivors: Vec<InventoryRecord> =
                std::mem::take(&mut staged.records).into_values().collect();
            plan.apply_to(&mut survivors);
            staged.records = survivors.into_iter().map(|r| (r.id, r)).collect();
        }
        self.faults.check(DeleteStep::AfterRenumber)?;

        staged.next_id = plan.next_id();
        self.faults.check(DeleteStep::BeforeCommit)?;

        let outcome = DeleteOutcome {
            deleted: id,
            renumbered: plan.renumbered(),
            remaining: staged.records.len(),
            next_id: staged.next_id,
        };
        *state = staged;

        tracing::debug!(
            item_id = %id,
            renumbered = outcome.renumbered,
            remaining = outcome.remaining,
            "deleted inventory item"
        );
        Ok(outcome)
    }

    fn faults(&self) -> &FaultInjector {
        &self.faults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use proptest::prelude::*;

    #[tokio::test]
    async fn create_on_empty_store_assigns_one() {
        contract::create_on_empty_store_assigns_one(&InMemoryInventoryStore::new()).await;
    }

    #[tokio::test]
    async fn create_stores_fields_unvalidated() {
        contract::create_stores_fields_unvalidated(&InMemoryInventoryStore::new()).await;
    }

    #[tokio::test]
    async fn update_overwrites_and_missing_is_not_found() {
        contract::update_overwrites_and_missing_is_not_found(&InMemoryInventoryStore::new()).await;
    }

    #[tokio::test]
    async fn delete_first_renumbers_survivors() {
        contract::delete_first_renumbers_survivors(&InMemoryInventoryStore::new()).await;
    }

    #[tokio::test]
    async fn delete_max_leaves_survivors() {
        contract::delete_max_leaves_survivors(&InMemoryInventoryStore::new()).await;
    }

    #[tokio::test]
    async fn delete_sole_record_resets_generator() {
        contract::delete_sole_record_resets_generator(&InMemoryInventoryStore::new()).await;
    }

    #[tokio::test]
    async fn delete_missing_changes_nothing() {
        contract::delete_missing_changes_nothing(&InMemoryInventoryStore::new()).await;
    }

    #[tokio::test]
    async fn fault_after_delete_rolls_back() {
        contract::injected_fault_rolls_back(&InMemoryInventoryStore::new(), DeleteStep::AfterDelete)
            .await;
    }

    #[tokio::test]
    async fn fault_after_renumber_rolls_back() {
        contract::injected_fault_rolls_back(
            &InMemoryInventoryStore::new(),
            DeleteStep::AfterRenumber,
        )
        .await;
    }

    #[tokio::test]
    async fn fault_before_commit_rolls_back() {
        contract::injected_fault_rolls_back(&InMemoryInventoryStore::new(), DeleteStep::BeforeCommit)
            .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interleaved_creates_and_deletes_stay_dense() {
        contract::interleaved_creates_and_deletes_stay_dense(std::sync::Arc::new(
            InMemoryInventoryStore::new(),
        ))
        .await;
    }

    #[tokio::test]
    async fn with_items_seeds_dense_ids() {
        let store = InMemoryInventoryStore::with_items([
            ItemFields::new("Item A", 100),
            ItemFields::new("Item B", 200),
        ]);
        assert_eq!(
            contract::ids_and_names(&store).await,
            vec![(1, "Item A".to_string()), (2, "Item B".to_string())]
        );
        assert_eq!(store.create(ItemFields::new("c", 0)).await.unwrap().id.get(), 3);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create,
        Delete(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Create),
            1 => (0usize..16).prop_map(Op::Delete),
        ]
    }

    proptest! {
        /// Property: ids stay exactly 1..=N after any mix of creates and deletes,
        /// and consecutive creates hand out strictly increasing ids.
        #[test]
        fn ids_stay_dense_under_random_operations(ops in proptest::collection::vec(op_strategy(), 1..60)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryInventoryStore::new();
                let mut last_created: Option<ItemId> = None;

                for op in ops {
                    match op {
                        Op::Create => {
                            let rec = store.create(ItemFields::new("x", 1)).await.unwrap();
                            if let Some(prev) = last_created {
                                prop_assert!(rec.id > prev);
                            }
                            last_created = Some(rec.id);
                        }
                        Op::Delete(k) => {
                            let len = store.list().await.unwrap().len();
                            if len == 0 {
                                continue;
                            }
                            let target = contract::id((k % len) as i64 + 1);
                            store.delete(target).await.unwrap();
                            last_created = None;
                        }
                    }

                    let ids: Vec<i64> = store.list().await.unwrap().iter().map(|r| r.id.get()).collect();
                    let want: Vec<i64> = (1..=ids.len() as i64).collect();
                    prop_assert_eq!(ids, want);
                }
                Ok(())
            })?;
        }
    }
}
