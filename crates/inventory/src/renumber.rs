//! Renumbering rule applied after a delete.
//!
//! Deleting anything but the highest id shifts every survivor down so ids stay
//! contiguous from 1. Deleting the highest id leaves the survivors alone. In
//! both cases the id generator restarts right after the highest surviving id.

use stockroom_core::ItemId;

use crate::record::InventoryRecord;

/// One id rewrite: the record currently at `from` moves to `to`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IdMove {
    pub from: ItemId,
    pub to: ItemId,
}

/// The id rewrites and generator reset that follow a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenumberPlan {
    moves: Vec<IdMove>,
    next_id: ItemId,
    renumbered: bool,
}

impl RenumberPlan {
    /// Plan for the ids that survive deleting `deleted`.
    ///
    /// `survivors` may come in any order and must not contain `deleted`.
    pub fn after_delete(deleted: ItemId, survivors: impl IntoIterator<Item = ItemId>) -> Self {
        let mut ids: Vec<ItemId> = survivors.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        let deleted_was_max = ids.last().is_none_or(|max| deleted > *max);
        if deleted_was_max {
            return Self {
                moves: Vec::new(),
                next_id: ids.last().map_or(ItemId::FIRST, |max| max.next()),
                renumbered: false,
            };
        }

        let mut moves = Vec::new();
        let mut target = ItemId::FIRST;
        for from in ids {
            if from != target {
                moves.push(IdMove { from, to: target });
            }
            target = target.next();
        }

        Self {
            moves,
            next_id: target,
            renumbered: true,
        }
    }

    /// Rewrites in ascending order of the target id. Only ids that change are listed.
    pub fn moves(&self) -> &[IdMove] {
        &self.moves
    }

    /// The value the id generator must hand out next.
    pub fn next_id(&self) -> ItemId {
        self.next_id
    }

    /// Whether the delete required renumbering (deleted id was not the maximum).
    pub fn renumbered(&self) -> bool {
        self.renumbered
    }

    /// Rewrite ids of `records` in place and sort them by their new id.
    pub fn apply_to(&self, records: &mut Vec<InventoryRecord>) {
        for mv in &self.moves {
            if let Some(rec) = records.iter_mut().find(|r| r.id == mv.from) {
                rec.id = mv.to;
            }
        }
        records.sort_by_key(|r| r.id);
    }
}
