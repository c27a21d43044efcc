use parking_lot::Mutex;

use crate::engine::chain::ActionChain;
use crate::model::{Action, TargetRef};

/// An asynchronous action requested inside a unit of work, waiting for commit
#[derive(Clone, Debug)]
pub struct PendingAction {
    pub action: Action,
    pub target: TargetRef,
    pub check_conditions: bool,
    /// Chain captured when the action was deferred
    pub chain: ActionChain,
}

/// Pending actions compare by action id and target only
impl PartialEq for PendingAction {
    fn eq(&self, other: &Self) -> bool {
        self.action.id() == other.action.id() && self.target == other.target
    }
}

impl Eq for PendingAction {}

/// Insertion-ordered, deduplicated list of pending actions
#[derive(Debug, Default)]
pub struct PendingActions {
    entries: Mutex<Vec<PendingAction>>,
}

impl PendingActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless an equal (action, target) pair is already pending.
    /// Returns whether the entry was added.
    pub fn push(&self, pending: PendingAction) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains(&pending) {
            return false;
        }
        entries.push(pending);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the current entries in insertion order
    pub fn snapshot(&self) -> Vec<PendingAction> {
        self.entries.lock().clone()
    }

    /// Remove and return every entry in insertion order
    pub(crate) fn take(&self) -> Vec<PendingAction> {
        std::mem::take(&mut *self.entries.lock())
    }
}
