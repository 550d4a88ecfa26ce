//! One-shot failure injection for the delete transaction.
//!
//! Stores consult the injector at fixed points inside `delete`. An armed step
//! makes that call fail with `StoreError::Storage`, which rolls the whole
//! transaction back. Unarmed, every check is a no-op.

use std::sync::Mutex;

use super::StoreError;

/// Points inside the delete transaction where a failure can be injected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeleteStep {
    /// The row is gone but survivors have not been renumbered yet.
    AfterDelete,
    /// Survivors are renumbered but the id generator is not reset yet.
    AfterRenumber,
    /// Everything is staged; only the commit remains.
    BeforeCommit,
}

impl DeleteStep {
    pub fn as_str(self) -> &'static str {
        match self {
            DeleteStep::AfterDelete => "after_delete",
            DeleteStep::AfterRenumber => "after_renumber",
            DeleteStep::BeforeCommit => "before_commit",
        }
    }
}

#[derive(Debug, Default)]
pub struct FaultInjector {
    armed: Mutex<Option<DeleteStep>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next delete that reaches `step`.
    pub fn arm(&self, step: DeleteStep) {
        *self.armed.lock().unwrap_or_else(|e| e.into_inner()) = Some(step);
    }

    /// Fails (and disarms) if `step` is the armed step.
    pub fn check(&self, step: DeleteStep) -> Result<(), StoreError> {
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        if *armed == Some(step) {
            *armed = None;
            tracing::warn!(step = step.as_str(), "injected delete failure");
            return Err(StoreError::Storage(format!(
                "injected failure at {}",
                step.as_str()
            )));
        }
        Ok(())
    }
}
