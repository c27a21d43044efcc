//! Worker-pool backed queue for asynchronous action execution.
//!
//! Each queue owns an ongoing set of admitted actions. Admission scans the
//! set against every filter registered for the candidate's definition and
//! only inserts the candidate if the set is unchanged since the scan, so two
//! equivalent submissions can never both be admitted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::core::config::QueueConfig;
use crate::core::errors::{EngineError, Result};
use crate::engine::chain::ActionChain;
use crate::engine::context::ExecutionMode;
use crate::model::{Action, TargetRef};
use crate::queue::filter::{ActionFilter, FilterRegistry, FnFilter};
use crate::transaction::UnitOfWork;

/// An action handed to a queue, with everything the worker needs to run it
#[derive(Clone, Debug)]
pub struct QueuedAction {
    pub action: Action,
    pub target: TargetRef,
    pub check_conditions: bool,
    /// Chain captured when the action was deferred
    pub chain: ActionChain,
    pub mode: ExecutionMode,
}

impl QueuedAction {
    pub fn new(action: Action, target: TargetRef) -> Self {
        Self {
            action,
            target,
            check_conditions: true,
            chain: ActionChain::new(),
            mode: ExecutionMode::Asynchronous,
        }
    }

    pub fn check_conditions(mut self, check_conditions: bool) -> Self {
        self.check_conditions = check_conditions;
        self
    }

    pub fn with_chain(mut self, chain: ActionChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// An admitted action that has not finished yet
#[derive(Clone, Debug)]
pub struct OngoingAsyncAction {
    ticket: u64,
    job: Arc<QueuedAction>,
    admitted_at: DateTime<Utc>,
}

impl OngoingAsyncAction {
    pub fn action(&self) -> &Action {
        &self.job.action
    }

    pub fn target(&self) -> &TargetRef {
        &self.job.target
    }

    pub fn admitted_at(&self) -> DateTime<Utc> {
        self.admitted_at
    }
}

/// Result of a submission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Admitted,
    /// An equivalent action is already in flight; nothing will run
    Filtered,
}

/// Outcome reported to [`AsyncExecutionListener`]s
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsyncOutcome {
    Succeeded,
    Failed(String),
}

impl AsyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Notified after every admitted asynchronous execution, successful or not
#[async_trait]
pub trait AsyncExecutionListener: Send + Sync {
    async fn after_async_execute(&self, action: &Action, target: &TargetRef, outcome: &AsyncOutcome);
}

/// Runs a queued action inside the worker's unit of work
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run_queued(&self, job: &QueuedAction, unit_of_work: &Arc<UnitOfWork>) -> Result<()>;
}

/// Admitted actions plus a generation bumped on every change
#[derive(Default)]
struct OngoingSet {
    entries: Vec<OngoingAsyncAction>,
    generation: u64,
}

/// A named asynchronous queue with a bounded worker pool
pub struct AsyncActionQueue {
    name: String,
    runtime: Handle,
    permits: Semaphore,
    max_workers: usize,
    filters: FilterRegistry,
    listeners: RwLock<Vec<Arc<dyn AsyncExecutionListener>>>,
    ongoing: Mutex<OngoingSet>,
    in_flight: watch::Sender<usize>,
    next_ticket: AtomicU64,
}

impl AsyncActionQueue {
    /// A queue with its own filters
    pub fn new(config: &QueueConfig, runtime: Handle) -> Arc<Self> {
        Self::with_filters(config, runtime, FilterRegistry::new())
    }

    /// A queue consulting a filter registry shared with other queues
    pub fn with_filters(config: &QueueConfig, runtime: Handle, filters: FilterRegistry) -> Arc<Self> {
        let (in_flight, _) = watch::channel(0);
        Arc::new(Self {
            name: config.name.clone(),
            runtime,
            permits: Semaphore::new(config.max_workers),
            max_workers: config.max_workers,
            filters,
            listeners: RwLock::new(Vec::new()),
            ongoing: Mutex::new(OngoingSet::default()),
            in_flight,
            next_ticket: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// Register a filter, replacing one with the same name
    pub fn register_filter(&self, filter: Arc<dyn ActionFilter>) {
        self.filters.register(filter);
    }

    /// Register a closure filter and return its generated name
    pub fn register_filter_fn<F>(&self, definition_name: impl Into<String>, compare: F) -> String
    where
        F: Fn(&OngoingAsyncAction, &OngoingAsyncAction) -> CmpOrdering + Send + Sync + 'static,
    {
        let filter = FnFilter::new(definition_name, compare);
        let name = filter.name().to_string();
        self.register_filter(Arc::new(filter));
        name
    }

    pub fn add_listener(&self, listener: Arc<dyn AsyncExecutionListener>) {
        self.listeners.write().push(listener);
    }

    /// Snapshot of the admitted actions in admission order
    pub fn ongoing_actions(&self) -> Vec<OngoingAsyncAction> {
        self.ongoing.lock().entries.clone()
    }

    pub fn ongoing_count(&self) -> usize {
        self.ongoing.lock().entries.len()
    }

    /// Resolves once no admitted action is left on this queue
    pub async fn wait_until_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives as long as the queue, so the channel cannot close here
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Admit `job` unless an equivalent action is in flight, then run it on
    /// the worker pool.
    ///
    /// Never waits for a worker. The action must carry a run-as identity.
    /// Filters compare against a snapshot of the ongoing set; the candidate
    /// is only inserted if the set did not change meanwhile, otherwise the
    /// scan is repeated.
    pub fn submit(
        self: &Arc<Self>,
        runner: Arc<dyn ActionRunner>,
        job: QueuedAction,
    ) -> Result<SubmitOutcome> {
        let run_as = job
            .action
            .run_as()
            .map(str::to_string)
            .ok_or_else(|| EngineError::missing_run_as(job.action.id()))?;

        let candidate = OngoingAsyncAction {
            ticket: self.next_ticket.fetch_add(1, Ordering::Relaxed),
            job: Arc::new(job),
            admitted_at: Utc::now(),
        };
        let filters = self.filters.matching(candidate.action().definition_name());

        loop {
            let (snapshot, generation) = {
                let ongoing = self.ongoing.lock();
                (ongoing.entries.clone(), ongoing.generation)
            };

            for filter in &filters {
                if snapshot
                    .iter()
                    .any(|current| filter.compare(current, &candidate) == CmpOrdering::Equal)
                {
                    debug!(
                        queue = %self.name,
                        action_id = %candidate.action().id(),
                        definition = %candidate.action().definition_name(),
                        filter = filter.name(),
                        target = %candidate.target(),
                        "Equivalent action already in flight, dropping submission"
                    );
                    return Ok(SubmitOutcome::Filtered);
                }
            }

            let mut ongoing = self.ongoing.lock();
            if ongoing.generation != generation {
                continue;
            }
            ongoing.entries.push(candidate.clone());
            ongoing.generation += 1;
            self.in_flight.send_replace(ongoing.entries.len());
            break;
        }

        debug!(
            queue = %self.name,
            action_id = %candidate.action().id(),
            definition = %candidate.action().definition_name(),
            target = %candidate.target(),
            run_as = %run_as,
            "Admitted asynchronous action"
        );

        // Owned by the task from here on; dropping the task releases the entry
        // even if it never gets polled
        let guard = OngoingGuard {
            queue: Arc::clone(self),
            ticket: candidate.ticket,
        };
        self.runtime.spawn(async move {
            guard.queue.run_worker(runner, candidate, run_as).await;
            drop(guard);
        });
        Ok(SubmitOutcome::Admitted)
    }

    async fn run_worker(
        &self,
        runner: Arc<dyn ActionRunner>,
        admitted: OngoingAsyncAction,
        run_as: String,
    ) {
        let job = &admitted.job;

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(queue = %self.name, error = %e, "Worker pool closed");
                return;
            }
        };

        let unit_of_work = UnitOfWork::begin_as(run_as);
        let outcome = match runner.run_queued(job, &unit_of_work).await {
            Ok(()) => match unit_of_work.commit().await {
                Ok(()) => AsyncOutcome::Succeeded,
                Err(e) => AsyncOutcome::Failed(e.to_string()),
            },
            Err(e) => {
                error!(
                    queue = %self.name,
                    action_id = %job.action.id(),
                    definition = %job.action.definition_name(),
                    target = %job.target,
                    error = %e,
                    "Asynchronous action failed"
                );
                if let Err(rollback) = unit_of_work.rollback().await {
                    warn!(queue = %self.name, error = %rollback, "Rollback of worker unit of work failed");
                }
                AsyncOutcome::Failed(e.to_string())
            }
        };

        if outcome.is_success() {
            info!(
                queue = %self.name,
                action_id = %job.action.id(),
                target = %job.target,
                "Asynchronous action completed"
            );
        }
        self.notify(job, &outcome).await;
    }

    async fn notify(&self, job: &QueuedAction, outcome: &AsyncOutcome) {
        let listeners: Vec<_> = self.listeners.read().clone();
        for listener in listeners {
            listener
                .after_async_execute(&job.action, &job.target, outcome)
                .await;
        }
    }

    fn release(&self, ticket: u64) {
        let mut ongoing = self.ongoing.lock();
        ongoing.entries.retain(|entry| entry.ticket != ticket);
        ongoing.generation += 1;
        self.in_flight.send_replace(ongoing.entries.len());
    }
}

impl fmt::Debug for AsyncActionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncActionQueue")
            .field("name", &self.name)
            .field("max_workers", &self.max_workers)
            .field("ongoing", &self.ongoing_count())
            .finish()
    }
}

/// Removes an ongoing entry when the worker task finishes, panics, or is
/// dropped without ever running
struct OngoingGuard {
    queue: Arc<AsyncActionQueue>,
    ticket: u64,
}

impl Drop for OngoingGuard {
    fn drop(&mut self) {
        self.queue.release(self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::filter::SameTargetFilter;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Counts runs and holds each run until a permit is released on `gate`
    struct GatedRunner {
        runs: AtomicUsize,
        gate: Semaphore,
    }

    impl GatedRunner {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                gate: Semaphore::new(0),
            })
        }
    }

    #[async_trait]
    impl ActionRunner for GatedRunner {
        async fn run_queued(&self, _job: &QueuedAction, _uow: &Arc<UnitOfWork>) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let permit = self.gate.acquire().await.map_err(|e| {
                EngineError::action_execution("gate", "test", anyhow::anyhow!(e))
            })?;
            permit.forget();
            Ok(())
        }
    }

    fn job(definition: &str, target: &str) -> QueuedAction {
        let mut action = Action::new(definition);
        action.set_run_as(Some("admin".to_string()));
        QueuedAction::new(action, TargetRef::new("workspace", target))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_same_target_filter_drops_duplicate_in_flight() {
        let queue = AsyncActionQueue::new(&QueueConfig::new("", 2), Handle::current());
        queue.register_filter(Arc::new(SameTargetFilter::new("index")));
        let runner = GatedRunner::new();

        let first = queue.submit(runner.clone(), job("index", "n1")).unwrap();
        let duplicate = queue.submit(runner.clone(), job("index", "n1")).unwrap();
        let other_target = queue.submit(runner.clone(), job("index", "n2")).unwrap();
        let unfiltered = queue.submit(runner.clone(), job("mail", "n1")).unwrap();

        assert_eq!(first, SubmitOutcome::Admitted);
        assert_eq!(duplicate, SubmitOutcome::Filtered);
        assert_eq!(other_target, SubmitOutcome::Admitted);
        assert_eq!(unfiltered, SubmitOutcome::Admitted);
        assert_eq!(queue.ongoing_count(), 3);

        runner.gate.add_permits(3);
        tokio::time::timeout(Duration::from_secs(5), queue.wait_until_idle())
            .await
            .unwrap();
        assert_eq!(runner.runs.load(Ordering::SeqCst), 3);
        assert!(queue.ongoing_actions().is_empty());
    }

    #[tokio::test]
    async fn test_submit_requires_run_as() {
        let queue = AsyncActionQueue::new(&QueueConfig::default(), Handle::current());
        let job = QueuedAction::new(Action::new("mail"), TargetRef::new("workspace", "n1"));
        let err = queue.submit(GatedRunner::new(), job).unwrap_err();
        assert!(matches!(err, EngineError::MissingRunAsIdentity { .. }));
        assert_eq!(queue.ongoing_count(), 0);
    }

    #[tokio::test]
    async fn test_filter_with_same_name_is_replaced() {
        let queue = AsyncActionQueue::new(&QueueConfig::default(), Handle::current());
        queue.register_filter(Arc::new(FnFilter::named("f", "index", |_, _| CmpOrdering::Equal)));
        queue.register_filter(Arc::new(FnFilter::named("f", "index", |_, _| CmpOrdering::Less)));
        queue.register_filter_fn("index", |_, _| CmpOrdering::Greater);
        assert_eq!(queue.filters().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_filter_may_read_the_queue_it_guards() {
        let queue = AsyncActionQueue::new(&QueueConfig::default(), Handle::current());
        let weak = Arc::downgrade(&queue);
        queue.register_filter_fn("index", move |ongoing, candidate| {
            let busy = weak.upgrade().map(|q| q.ongoing_count()).unwrap_or(0);
            if busy > 0 && ongoing.target() == candidate.target() {
                CmpOrdering::Equal
            } else {
                CmpOrdering::Less
            }
        });
        let runner = GatedRunner::new();

        let submit_twice = {
            let queue = queue.clone();
            let runner = runner.clone();
            tokio::task::spawn_blocking(move || {
                let first = queue.submit(runner.clone(), job("index", "n1")).unwrap();
                let second = queue.submit(runner, job("index", "n1")).unwrap();
                (first, second)
            })
        };
        let (first, second) = tokio::time::timeout(Duration::from_secs(5), submit_twice)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, SubmitOutcome::Admitted);
        assert_eq!(second, SubmitOutcome::Filtered);

        runner.gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(5), queue.wait_until_idle())
            .await
            .unwrap();
    }

    #[test]
    fn test_entry_released_when_worker_never_runs() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let queue = AsyncActionQueue::new(&QueueConfig::default(), runtime.handle().clone());
        queue.register_filter(Arc::new(SameTargetFilter::new("index")));
        runtime.shutdown_background();

        let outcome = queue.submit(GatedRunner::new(), job("index", "n1")).unwrap();
        assert_eq!(outcome, SubmitOutcome::Admitted);

        for _ in 0..100 {
            if queue.ongoing_count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(queue.ongoing_count(), 0);

        // Nothing stale is left to filter against
        let again = queue.submit(GatedRunner::new(), job("index", "n1")).unwrap();
        assert_eq!(again, SubmitOutcome::Admitted);
    }
}
