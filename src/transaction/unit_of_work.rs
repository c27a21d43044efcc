use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

use crate::core::errors::{EngineError, Result};
use crate::transaction::pending::{PendingAction, PendingActions};

/// Lifecycle of a unit of work
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// Callbacks fired when a unit of work finishes
#[async_trait]
pub trait TransactionListener: Send + Sync {
    /// Binding is idempotent per id
    fn id(&self) -> &str;

    async fn after_commit(&self, unit_of_work: &UnitOfWork) -> anyhow::Result<()>;

    async fn after_rollback(&self, _unit_of_work: &UnitOfWork) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Transactional scope whose outcome gates deferred actions.
///
/// Pending actions only reach a queue if the unit of work commits. Rolling
/// back, or dropping it while still active, discards them.
pub struct UnitOfWork {
    id: String,
    run_as: Option<String>,
    status: Mutex<TransactionStatus>,
    listeners: Mutex<Vec<Arc<dyn TransactionListener>>>,
    pending: PendingActions,
}

impl UnitOfWork {
    /// Begin a unit of work without an identity
    pub fn begin() -> Arc<Self> {
        Arc::new(Self::with_identity(None))
    }

    /// Begin a unit of work running as `identity`
    pub fn begin_as(identity: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::with_identity(Some(identity.into())))
    }

    fn with_identity(run_as: Option<String>) -> Self {
        Self {
            id: cuid2::create_id(),
            run_as,
            status: Mutex::new(TransactionStatus::Active),
            listeners: Mutex::new(Vec::new()),
            pending: PendingActions::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run_as(&self) -> Option<&str> {
        self.run_as.as_deref()
    }

    pub fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// Asynchronous actions waiting for this unit of work to commit
    pub fn pending(&self) -> &PendingActions {
        &self.pending
    }

    /// Bind a listener; a listener with the same id is only bound once.
    /// Returns whether the listener was newly bound.
    pub fn bind_listener(&self, listener: Arc<dyn TransactionListener>) -> Result<bool> {
        let status = self.status.lock();
        if *status != TransactionStatus::Active {
            return Err(EngineError::unit_of_work_closed(&self.id, status.to_string()));
        }
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|l| l.id() == listener.id()) {
            return Ok(false);
        }
        debug!(unit_of_work = %self.id, listener = listener.id(), "Bound transaction listener");
        listeners.push(listener);
        Ok(true)
    }

    /// Defer an action until commit. Returns false when an equal
    /// (action, target) pair is already pending.
    pub(crate) fn defer(&self, pending: PendingAction) -> Result<bool> {
        let status = self.status.lock();
        if *status != TransactionStatus::Active {
            return Err(EngineError::unit_of_work_closed(&self.id, status.to_string()));
        }
        Ok(self.pending.push(pending))
    }

    fn finish(&self, outcome: TransactionStatus) -> Result<Vec<Arc<dyn TransactionListener>>> {
        let mut status = self.status.lock();
        if *status != TransactionStatus::Active {
            return Err(EngineError::unit_of_work_closed(&self.id, status.to_string()));
        }
        *status = outcome;
        Ok(std::mem::take(&mut *self.listeners.lock()))
    }

    /// Commit and run every listener's `after_commit` in binding order.
    ///
    /// Listener failures are logged; the unit of work stays committed.
    pub async fn commit(&self) -> Result<()> {
        let listeners = self.finish(TransactionStatus::Committed)?;
        debug!(unit_of_work = %self.id, listeners = listeners.len(), "Committed");
        for listener in listeners {
            if let Err(e) = listener.after_commit(self).await {
                error!(
                    unit_of_work = %self.id,
                    listener = listener.id(),
                    error = %e,
                    "After-commit listener failed"
                );
            }
        }
        Ok(())
    }

    /// Roll back, discarding pending actions
    pub async fn rollback(&self) -> Result<()> {
        let listeners = self.finish(TransactionStatus::RolledBack)?;
        let discarded = self.pending.take();
        debug!(unit_of_work = %self.id, discarded = discarded.len(), "Rolled back");
        for listener in listeners {
            if let Err(e) = listener.after_rollback(self).await {
                error!(
                    unit_of_work = %self.id,
                    listener = listener.id(),
                    error = %e,
                    "After-rollback listener failed"
                );
            }
        }
        Ok(())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.is_active() && !self.pending.is_empty() {
            debug!(
                unit_of_work = %self.id,
                discarded = self.pending.len(),
                "Unit of work dropped without commit"
            );
        }
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("run_as", &self.run_as)
            .field("status", &self.status())
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        id: &'static str,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
    }

    impl Counting {
        fn new(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TransactionListener for Counting {
        fn id(&self) -> &str {
            self.id
        }

        async fn after_commit(&self, _unit_of_work: &UnitOfWork) -> anyhow::Result<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn after_rollback(&self, _unit_of_work: &UnitOfWork) -> anyhow::Result<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_listener_binding_is_idempotent() {
        let uow = UnitOfWork::begin_as("admin");
        let listener = Counting::new("pending");

        assert!(uow.bind_listener(listener.clone()).unwrap());
        assert!(!uow.bind_listener(listener.clone()).unwrap());
        assert!(!uow.bind_listener(Counting::new("pending")).unwrap());

        uow.commit().await.unwrap();
        assert_eq!(listener.commits.load(Ordering::SeqCst), 1);
        assert_eq!(uow.status(), TransactionStatus::Committed);
        assert_eq!(uow.run_as(), Some("admin"));
    }

    #[tokio::test]
    async fn test_rollback_runs_rollback_callbacks_only() {
        let uow = UnitOfWork::begin();
        let listener = Counting::new("pending");
        uow.bind_listener(listener.clone()).unwrap();

        uow.rollback().await.unwrap();
        assert_eq!(listener.commits.load(Ordering::SeqCst), 0);
        assert_eq!(listener.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finished_unit_of_work_rejects_further_use() {
        let uow = UnitOfWork::begin();
        uow.commit().await.unwrap();

        assert!(matches!(
            uow.commit().await,
            Err(EngineError::UnitOfWorkClosed { .. })
        ));
        assert!(uow.rollback().await.is_err());
        assert!(uow.bind_listener(Counting::new("late")).is_err());
    }
}
