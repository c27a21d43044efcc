//! Per-call execution context handed to leaf handlers.

use std::sync::Arc;

use crate::core::errors::Result;
use crate::engine::chain::ActionChain;
use crate::engine::service::ActionService;
use crate::model::{Action, Condition, TargetRef};
use crate::transaction::UnitOfWork;

/// How the current `execute_impl` call was reached
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// On the caller's task
    Synchronous,
    /// On a queue worker; failures queue the compensating action
    Asynchronous,
    /// A compensating action on a queue worker; failures never compensate again
    Compensating,
}

impl ExecutionMode {
    pub fn is_asynchronous(self) -> bool {
        !matches!(self, Self::Synchronous)
    }
}

/// Options for a single `execute` call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Evaluate the action's conditions before running it
    pub check_conditions: bool,
    /// Override the action's own `execute_asynchronously` flag
    pub asynchronously: Option<bool>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            check_conditions: true,
            asynchronously: None,
        }
    }
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_conditions(mut self) -> Self {
        self.check_conditions = false;
        self
    }

    pub fn synchronously(mut self) -> Self {
        self.asynchronously = Some(false);
        self
    }

    pub fn asynchronously(mut self) -> Self {
        self.asynchronously = Some(true);
        self
    }

    /// Resolve the dispatch path for `action`
    pub fn is_asynchronous_for(&self, action: &Action) -> bool {
        self.asynchronously
            .unwrap_or_else(|| action.execute_asynchronously())
    }
}

/// What a leaf handler sees of the engine while it runs.
///
/// Nested calls made through the context observe the extended chain, so an
/// action that (directly or indirectly) triggers itself is skipped.
#[derive(Clone)]
pub struct ExecutionContext {
    service: ActionService,
    unit_of_work: Arc<UnitOfWork>,
    chain: ActionChain,
    mode: ExecutionMode,
}

impl ExecutionContext {
    pub(crate) fn new(
        service: ActionService,
        unit_of_work: Arc<UnitOfWork>,
        chain: ActionChain,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            service,
            unit_of_work,
            chain,
            mode,
        }
    }

    pub fn service(&self) -> &ActionService {
        &self.service
    }

    pub fn unit_of_work(&self) -> &Arc<UnitOfWork> {
        &self.unit_of_work
    }

    pub fn chain(&self) -> &ActionChain {
        &self.chain
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Identity the current unit of work runs as
    pub fn current_user(&self) -> Option<&str> {
        self.unit_of_work.run_as()
    }

    /// Execute another action from inside a handler
    pub async fn execute(&self, action: &Action, target: &TargetRef) -> Result<()> {
        self.execute_with(action, target, ExecuteOptions::default())
            .await
    }

    pub async fn execute_with(
        &self,
        action: &Action,
        target: &TargetRef,
        options: ExecuteOptions,
    ) -> Result<()> {
        self.service
            .dispatch(action, target, options, &self.chain, &self.unit_of_work)
            .await
    }

    /// Run a child synchronously under the current chain, checking its conditions
    pub async fn execute_child(&self, action: &Action, target: &TargetRef) -> Result<()> {
        self.service
            .execute_impl(
                action,
                target,
                true,
                ExecutionMode::Synchronous,
                &self.chain,
                &self.unit_of_work,
            )
            .await
    }

    pub async fn evaluate(&self, condition: &Condition, target: &TargetRef) -> Result<bool> {
        self.service.evaluate(condition, target).await
    }
}
