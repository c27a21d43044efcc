//! The action service: dispatch, the execution coordinator and the bridge
//! between units of work and the asynchronous queues.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::core::config::{EngineConfig, DEFAULT_QUEUE};
use crate::core::errors::{EngineError, Result};
use crate::engine::builtin::{CompositeActionExecuter, NoConditionEvaluator};
use crate::engine::chain::ActionChain;
use crate::engine::context::{ExecuteOptions, ExecutionContext, ExecutionMode};
use crate::engine::evaluator::Evaluator;
use crate::engine::registry::{
    ActionExecuter, ConditionEvaluator, EvaluatorRegistry, ExecuterRegistry,
};
use crate::model::{
    Action, ActionDefinition, Condition, ConditionDefinition, Parameters, TargetRef,
    COMPOSITE_CONDITION,
};
use crate::queue::{
    ActionFilter, ActionRunner, AsyncActionQueue, AsyncExecutionListener, FilterRegistry,
    FnFilter, OngoingAsyncAction, QueuedAction, SubmitOutcome,
};
use crate::transaction::{PendingAction, TransactionListener, UnitOfWork};

/// Id of the commit listener that flushes pending actions
const PENDING_FLUSHER_ID: &str = "actuate.pending-actions";

struct ServiceInner {
    config: EngineConfig,
    executers: ExecuterRegistry,
    evaluator: Evaluator,
    filters: FilterRegistry,
    queues: HashMap<String, Arc<AsyncActionQueue>>,
}

/// Entry point of the engine. Cheap to clone; clones share registries and
/// queues.
#[derive(Clone)]
pub struct ActionService {
    inner: Arc<ServiceInner>,
}

/// Builder for [`ActionService`]
#[derive(Default)]
pub struct ActionServiceBuilder {
    config: Option<EngineConfig>,
    executers: Vec<Arc<dyn ActionExecuter>>,
    evaluators: Vec<Arc<dyn ConditionEvaluator>>,
    runtime: Option<Handle>,
}

impl ActionServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn executer(mut self, executer: Arc<dyn ActionExecuter>) -> Self {
        self.executers.push(executer);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    /// Runtime the queue workers are spawned on; defaults to the current one
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<ActionService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| {
                EngineError::configuration(format!(
                    "no tokio runtime available for the asynchronous queues: {}",
                    e
                ))
            })?,
        };

        let executers = ExecuterRegistry::new();
        executers.register(Arc::new(CompositeActionExecuter))?;
        for executer in self.executers {
            executers.register(executer)?;
        }

        let evaluators = EvaluatorRegistry::new();
        evaluators.register(Arc::new(NoConditionEvaluator))?;
        for evaluator in self.evaluators {
            evaluators.register(evaluator)?;
        }

        let filters = FilterRegistry::new();
        let queues: HashMap<_, _> = config
            .all_queues()
            .map(|queue| {
                let async_queue =
                    AsyncActionQueue::with_filters(queue, runtime.clone(), filters.clone());
                (queue.name.clone(), async_queue)
            })
            .collect();

        info!(
            queues = queues.len(),
            executers = executers.definitions().len(),
            evaluators = evaluators.definitions().len(),
            "Action service ready"
        );

        Ok(ActionService {
            inner: Arc::new(ServiceInner {
                evaluator: Evaluator::new(evaluators)
                    .with_parameter_validation(config.validate_parameters),
                config,
                executers,
                filters,
                queues,
            }),
        })
    }
}

impl ActionService {
    pub fn builder() -> ActionServiceBuilder {
        ActionServiceBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // Registration

    pub fn register_executer(&self, executer: Arc<dyn ActionExecuter>) -> Result<()> {
        self.inner.executers.register(executer)
    }

    pub fn register_evaluator(&self, evaluator: Arc<dyn ConditionEvaluator>) -> Result<()> {
        self.inner.evaluator.registry().register(evaluator)
    }

    /// Register a filter for its definition.
    ///
    /// Filters are shared by all queues and looked up when an action is
    /// submitted, so registering before the definition's handler is fine.
    pub fn register_filter(&self, filter: Arc<dyn ActionFilter>) {
        self.inner.filters.register(filter);
    }

    /// Register a closure filter and return its generated name
    pub fn register_filter_fn<F>(&self, definition_name: &str, compare: F) -> String
    where
        F: Fn(&OngoingAsyncAction, &OngoingAsyncAction) -> Ordering + Send + Sync + 'static,
    {
        let filter = FnFilter::new(definition_name, compare);
        let name = filter.name().to_string();
        self.register_filter(Arc::new(filter));
        name
    }

    /// Listen for asynchronous completions on every queue
    pub fn add_async_listener(&self, listener: Arc<dyn AsyncExecutionListener>) {
        for queue in self.inner.queues.values() {
            queue.add_listener(listener.clone());
        }
    }

    // Definitions and factories

    pub fn action_definition(&self, name: &str) -> Option<ActionDefinition> {
        self.inner.executers.get(name).map(|entry| entry.definition)
    }

    pub fn action_definitions(&self) -> Vec<ActionDefinition> {
        self.inner.executers.definitions()
    }

    pub fn condition_definition(&self, name: &str) -> Option<ConditionDefinition> {
        self.inner
            .evaluator
            .registry()
            .get(name)
            .map(|entry| entry.definition)
    }

    pub fn condition_definitions(&self) -> Vec<ConditionDefinition> {
        self.inner.evaluator.registry().definitions()
    }

    pub fn create_action(&self, name: &str) -> Action {
        Action::new(name)
    }

    pub fn create_action_with(&self, name: &str, parameters: Parameters) -> Action {
        Action::new(name).with_parameters(parameters)
    }

    pub fn create_composite_action(&self) -> Action {
        Action::composite()
    }

    /// Create a condition; the composite definition name yields a composite
    pub fn create_condition(&self, name: &str) -> Condition {
        if name == COMPOSITE_CONDITION {
            Condition::composite()
        } else {
            Condition::new(name)
        }
    }

    pub fn create_composite_condition(&self) -> Condition {
        Condition::composite()
    }

    // Evaluation

    pub async fn evaluate(&self, condition: &Condition, target: &TargetRef) -> Result<bool> {
        self.inner.evaluator.evaluate(condition, target).await
    }

    pub async fn evaluate_action(&self, action: &Action, target: &TargetRef) -> Result<bool> {
        self.inner.evaluator.evaluate_action(action, target).await
    }

    // Execution

    /// Execute with conditions checked, synchronously or deferred according
    /// to the action's own flag
    pub async fn execute(
        &self,
        action: &Action,
        target: &TargetRef,
        unit_of_work: &Arc<UnitOfWork>,
    ) -> Result<()> {
        self.execute_with(action, target, unit_of_work, ExecuteOptions::default())
            .await
    }

    pub async fn execute_with(
        &self,
        action: &Action,
        target: &TargetRef,
        unit_of_work: &Arc<UnitOfWork>,
        options: ExecuteOptions,
    ) -> Result<()> {
        self.dispatch(action, target, options, &ActionChain::new(), unit_of_work)
            .await
    }

    pub(crate) async fn dispatch(
        &self,
        action: &Action,
        target: &TargetRef,
        options: ExecuteOptions,
        chain: &ActionChain,
        unit_of_work: &Arc<UnitOfWork>,
    ) -> Result<()> {
        if options.is_asynchronous_for(action) {
            self.add_pending(action, target, options.check_conditions, chain, unit_of_work)?;
            Ok(())
        } else {
            self.execute_impl(
                action,
                target,
                options.check_conditions,
                ExecutionMode::Synchronous,
                chain,
                unit_of_work,
            )
            .await
        }
    }

    /// Run one action under `chain`.
    ///
    /// An action already on the chain is skipped without error. Failures
    /// are returned to the caller; in [`ExecutionMode::Asynchronous`] the
    /// compensating action is queued first.
    pub(crate) fn execute_impl<'a>(
        &'a self,
        action: &'a Action,
        target: &'a TargetRef,
        check_conditions: bool,
        mode: ExecutionMode,
        chain: &'a ActionChain,
        unit_of_work: &'a Arc<UnitOfWork>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if chain.contains(action.id()) {
                debug!(
                    action_id = %action.id(),
                    definition = %action.definition_name(),
                    %chain,
                    "Action already executing in this chain, skipping"
                );
                return Ok(());
            }
            let chain = chain.extended_with(action.id());

            let result = self
                .run_action(action, target, check_conditions, mode, chain, unit_of_work)
                .await;

            if let Err(e) = &result {
                debug!(
                    action_id = %action.id(),
                    definition = %action.definition_name(),
                    %target,
                    error = %e,
                    "Action failed"
                );
                if mode == ExecutionMode::Asynchronous {
                    self.compensate(action, target, unit_of_work);
                }
            }
            result
        }
        .boxed()
    }

    async fn run_action(
        &self,
        action: &Action,
        target: &TargetRef,
        check_conditions: bool,
        mode: ExecutionMode,
        chain: ActionChain,
        unit_of_work: &Arc<UnitOfWork>,
    ) -> Result<()> {
        if check_conditions && !self.inner.evaluator.evaluate_action(action, target).await? {
            debug!(action_id = %action.id(), %target, "Conditions not met, action not executed");
            return Ok(());
        }

        let name = action.definition_name();
        let entry = self
            .inner
            .executers
            .get(name)
            .ok_or_else(|| EngineError::unknown_action(name))?;
        if self.inner.config.validate_parameters {
            entry.validate(action.parameters())?;
        }

        debug!(action_id = %action.id(), definition = name, %target, ?mode, "Executing action");
        let ctx = ExecutionContext::new(self.clone(), unit_of_work.clone(), chain, mode);
        entry
            .executer
            .execute(action, target, &ctx)
            .await
            .map_err(|e| EngineError::from_handler(action.id(), name, e))
    }

    /// Queue the compensating action of a failed asynchronous action
    fn compensate(&self, action: &Action, target: &TargetRef, unit_of_work: &UnitOfWork) {
        let Some(compensating) = action.compensating_action() else {
            return;
        };
        let mut compensating = compensating.clone();
        let run_as = unit_of_work
            .run_as()
            .or_else(|| action.run_as())
            .map(str::to_string);
        compensating.set_run_as(run_as);

        info!(
            action_id = %action.id(),
            compensating_action_id = %compensating.id(),
            %target,
            "Queueing compensating action"
        );
        let job = QueuedAction::new(compensating, target.clone())
            .check_conditions(false)
            .with_mode(ExecutionMode::Compensating);
        if let Err(e) = self.enqueue(job) {
            warn!(
                action_id = %action.id(),
                error = %e,
                "Compensating action could not be queued"
            );
        }
    }

    // Deferral and submission

    /// Defer an action until `unit_of_work` commits.
    ///
    /// Returns false when the action is skipped by the chain or an equal
    /// (action, target) pair is already pending.
    pub fn add_pending(
        &self,
        action: &Action,
        target: &TargetRef,
        check_conditions: bool,
        chain: &ActionChain,
        unit_of_work: &UnitOfWork,
    ) -> Result<bool> {
        if chain.contains(action.id()) {
            debug!(action_id = %action.id(), %chain, "Action already executing in this chain, not deferring");
            return Ok(false);
        }

        let mut action = action.clone();
        if let Some(identity) = unit_of_work.run_as() {
            action.set_run_as(Some(identity.to_string()));
        }
        if action.run_as().is_none() {
            return Err(EngineError::missing_run_as(action.id()));
        }

        unit_of_work.bind_listener(Arc::new(PendingActionFlusher {
            service: self.clone(),
        }))?;

        let action_id = action.id().to_string();
        let added = unit_of_work.defer(PendingAction {
            action,
            target: target.clone(),
            check_conditions,
            chain: chain.clone(),
        })?;
        debug!(
            action_id = %action_id,
            %target,
            unit_of_work = %unit_of_work.id(),
            added,
            "Deferred action until commit"
        );
        Ok(added)
    }

    /// Hand an action straight to the queue serving its definition
    pub fn submit(
        &self,
        action: Action,
        target: TargetRef,
        check_conditions: bool,
        chain: ActionChain,
    ) -> Result<SubmitOutcome> {
        let job = QueuedAction::new(action, target)
            .check_conditions(check_conditions)
            .with_chain(chain);
        self.enqueue(job)
    }

    fn enqueue(&self, job: QueuedAction) -> Result<SubmitOutcome> {
        let queue = self.queue_for(job.action.definition_name())?;
        queue.submit(Arc::new(self.clone()), job)
    }

    // Queues

    pub fn queue(&self, name: &str) -> Option<Arc<AsyncActionQueue>> {
        self.inner.queues.get(name).cloned()
    }

    /// Queue serving a definition; unregistered definitions use the default
    fn queue_for(&self, definition_name: &str) -> Result<Arc<AsyncActionQueue>> {
        let queue_name = self
            .inner
            .executers
            .get(definition_name)
            .and_then(|entry| entry.definition.queue_name)
            .unwrap_or_else(|| DEFAULT_QUEUE.to_string());
        self.queue(&queue_name)
            .ok_or_else(|| EngineError::queue_routing(queue_name))
    }

    pub fn ongoing_count(&self) -> usize {
        self.inner.queues.values().map(|q| q.ongoing_count()).sum()
    }

    /// Resolves once every queue is idle, including work queued by work
    /// that was still running when this was called
    pub async fn wait_until_idle(&self) {
        loop {
            for queue in self.inner.queues.values() {
                queue.wait_until_idle().await;
            }
            if self.ongoing_count() == 0 {
                break;
            }
        }
    }
}

#[async_trait]
impl ActionRunner for ActionService {
    async fn run_queued(&self, job: &QueuedAction, unit_of_work: &Arc<UnitOfWork>) -> Result<()> {
        self.execute_impl(
            &job.action,
            &job.target,
            job.check_conditions,
            job.mode,
            &job.chain,
            unit_of_work,
        )
        .await
    }
}

impl fmt::Debug for ActionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut queues: Vec<_> = self.inner.queues.keys().collect();
        queues.sort();
        f.debug_struct("ActionService")
            .field("queues", &queues)
            .field("validate_parameters", &self.inner.config.validate_parameters)
            .finish()
    }
}

/// Submits a unit of work's pending actions, in order, once it commits
struct PendingActionFlusher {
    service: ActionService,
}

#[async_trait]
impl TransactionListener for PendingActionFlusher {
    fn id(&self) -> &str {
        PENDING_FLUSHER_ID
    }

    async fn after_commit(&self, unit_of_work: &UnitOfWork) -> anyhow::Result<()> {
        let pending = unit_of_work.pending().take();
        debug!(unit_of_work = %unit_of_work.id(), count = pending.len(), "Flushing pending actions");
        for entry in pending {
            let action_id = entry.action.id().to_string();
            let target = entry.target.clone();
            match self.service.submit(
                entry.action,
                entry.target,
                entry.check_conditions,
                entry.chain,
            ) {
                Ok(outcome) => {
                    debug!(action_id = %action_id, %target, ?outcome, "Submitted pending action")
                }
                Err(e) => warn!(
                    action_id = %action_id,
                    %target,
                    error = %e,
                    "Pending action could not be submitted"
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct Recorder {
        name: &'static str,
        queue: Option<&'static str>,
        runs: AtomicUsize,
    }

    impl Recorder {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                queue: None,
                runs: AtomicUsize::new(0),
            })
        }

        fn on_queue(name: &'static str, queue: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                queue: Some(queue),
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ActionExecuter for Recorder {
        fn definition(&self) -> ActionDefinition {
            let definition = ActionDefinition::new(self.name);
            match self.queue {
                Some(queue) => definition.with_queue(queue),
                None => definition,
            }
        }

        async fn execute(
            &self,
            _action: &Action,
            _target: &TargetRef,
            _ctx: &ExecutionContext,
        ) -> anyhow::Result<()> {
            self.runs.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        }
    }

    fn target() -> TargetRef {
        TargetRef::new("workspace", "n1")
    }

    #[tokio::test]
    async fn test_builtins_are_registered() {
        let service = ActionService::builder().build().unwrap();
        assert!(service.action_definition("composite-action").is_some());
        assert!(service.condition_definition("no-condition").is_some());
        assert!(service.create_condition(COMPOSITE_CONDITION).is_composite());
        assert!(service.create_composite_action().is_composite());
        assert!(service.queue(DEFAULT_QUEUE).is_some());
    }

    #[tokio::test]
    async fn test_unknown_definition_fails_synchronously() {
        let service = ActionService::builder().build().unwrap();
        let uow = UnitOfWork::begin();
        let err = service
            .execute(&Action::new("missing"), &target(), &uow)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownActionDefinition { .. }));
    }

    #[tokio::test]
    async fn test_handler_on_unknown_queue_fails_routing() {
        let service = ActionService::builder()
            .executer(Recorder::on_queue("archive", "slow"))
            .build()
            .unwrap();
        let mut action = Action::new("archive");
        action.set_run_as(Some("admin".to_string()));
        let err = service
            .submit(action, target(), true, ActionChain::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::QueueRouting { .. }));
    }

    #[tokio::test]
    async fn test_deferral_without_identity_is_rejected() {
        let service = ActionService::builder()
            .executer(Recorder::new("mail"))
            .build()
            .unwrap();
        let uow = UnitOfWork::begin();
        let err = service
            .execute(&Action::new("mail").asynchronous(), &target(), &uow)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingRunAsIdentity { .. }));
        assert!(uow.pending().is_empty());
    }

    #[tokio::test]
    async fn test_deferral_keeps_action_identity_without_unit_identity() {
        let recorder = Recorder::new("mail");
        let service = ActionService::builder()
            .executer(recorder.clone())
            .build()
            .unwrap();
        let mut action = Action::new("mail").asynchronous();
        action.set_run_as(Some("owner".to_string()));

        let uow = UnitOfWork::begin();
        service.execute(&action, &target(), &uow).await.unwrap();
        let pending = uow.pending().snapshot();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action.run_as(), Some("owner"));

        uow.commit().await.unwrap();
        service.wait_until_idle().await;
        assert_eq!(recorder.runs.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_routes_to_named_queue() {
        let config = EngineConfig::builder().queue("slow", 1).build().unwrap();
        let recorder = Recorder::on_queue("archive", "slow");
        let service = ActionService::builder()
            .with_config(config)
            .executer(recorder.clone())
            .build()
            .unwrap();

        let uow = UnitOfWork::begin_as("admin");
        service
            .execute(&Action::new("archive").asynchronous(), &target(), &uow)
            .await
            .unwrap();
        assert_eq!(recorder.runs.load(AtomicOrdering::SeqCst), 0);
        uow.commit().await.unwrap();
        service.wait_until_idle().await;

        assert_eq!(recorder.runs.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(service.queue("slow").map(|q| q.max_workers()), Some(1));
    }

    #[tokio::test]
    async fn test_filter_registered_before_handler_applies_on_its_queue() {
        let config = EngineConfig::builder().queue("slow", 1).build().unwrap();
        let service = ActionService::builder()
            .with_config(config)
            .build()
            .unwrap();
        service.register_filter_fn("thumb", |_, _| Ordering::Equal);
        service
            .register_executer(Recorder::on_queue("thumb", "slow"))
            .unwrap();

        let submit = || {
            let mut action = Action::new("thumb");
            action.set_run_as(Some("admin".to_string()));
            service.submit(action, target(), true, ActionChain::new())
        };
        let first = submit().unwrap();
        let second = submit().unwrap();

        assert_eq!(first, SubmitOutcome::Admitted);
        assert_eq!(second, SubmitOutcome::Filtered);
        assert_eq!(service.queue("slow").map(|q| q.ongoing_count()), Some(1));
        assert_eq!(service.queue(DEFAULT_QUEUE).map(|q| q.ongoing_count()), Some(0));
        service.wait_until_idle().await;
    }
}
