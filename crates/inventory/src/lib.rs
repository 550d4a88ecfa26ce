//! Inventory domain module.
//!
//! Records, the fields a caller may write, and the renumbering rule applied
//! after a delete. Pure logic only (no IO, no HTTP, no storage).

pub mod record;
pub mod renumber;

pub use record::{InventoryRecord, ItemFields};
pub use renumber::{IdMove, RenumberPlan};
