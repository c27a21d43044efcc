//! Test capabilities shared by the integration suites.

#![allow(dead_code)]

use actuate::{
    Action, ActionDefinition, ActionExecuter, ActionService, AsyncExecutionListener,
    AsyncOutcome, Condition, ConditionDefinition, ConditionEvaluator, ExecutionContext, TargetRef,
};
use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub fn target(id: &str) -> TargetRef {
    TargetRef::new("workspace", id)
}

/// Returns its `value` parameter and records every condition id it sees
#[derive(Default)]
pub struct CountingEvaluator {
    calls: Mutex<Vec<String>>,
}

impl CountingEvaluator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, condition_id: &str) -> usize {
        self.calls.lock().iter().filter(|id| *id == condition_id).count()
    }
}

#[async_trait]
impl ConditionEvaluator for CountingEvaluator {
    fn definition(&self) -> ConditionDefinition {
        ConditionDefinition::new("counting")
    }

    async fn evaluate(&self, condition: &Condition, _target: &TargetRef) -> anyhow::Result<bool> {
        self.calls.lock().push(condition.id().to_string());
        condition.parameters().get_as::<bool>("value")
    }
}

pub fn counting(id: &str, value: bool) -> Condition {
    Condition::with_id(id, "counting").with_parameter("value", value)
}

/// Records each run as `action_id@target` together with the identity it ran as
pub struct Recorder {
    name: String,
    runs: Mutex<Vec<(String, Option<String>)>>,
}

impl Recorder {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            runs: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn runs(&self) -> Vec<(String, Option<String>)> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl ActionExecuter for Recorder {
    fn definition(&self) -> ActionDefinition {
        ActionDefinition::new(self.name.clone())
    }

    async fn execute(
        &self,
        action: &Action,
        target: &TargetRef,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<()> {
        self.runs.lock().push((
            format!("{}@{}", action.id(), target.id),
            ctx.current_user().map(str::to_string),
        ));
        Ok(())
    }
}

/// Always fails with a plain error
pub struct Exploding {
    pub attempts: AtomicUsize,
}

impl Exploding {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ActionExecuter for Exploding {
    fn definition(&self) -> ActionDefinition {
        ActionDefinition::new("explode")
    }

    async fn execute(
        &self,
        _action: &Action,
        _target: &TargetRef,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("boom"))
    }
}

/// Holds every run until a permit is added to `gate`
pub struct Blocking {
    pub started: AtomicUsize,
    pub gate: Semaphore,
}

impl Blocking {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        })
    }

    pub fn release(&self, runs: usize) {
        self.gate.add_permits(runs);
    }
}

#[async_trait]
impl ActionExecuter for Blocking {
    fn definition(&self) -> ActionDefinition {
        ActionDefinition::new("slow-index")
    }

    async fn execute(
        &self,
        _action: &Action,
        _target: &TargetRef,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        Ok(())
    }
}

/// Collects every asynchronous completion
#[derive(Default)]
pub struct Outcomes {
    seen: Mutex<Vec<(String, AsyncOutcome)>>,
}

impl Outcomes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<(String, AsyncOutcome)> {
        self.seen.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl AsyncExecutionListener for Outcomes {
    async fn after_async_execute(&self, action: &Action, _target: &TargetRef, outcome: &AsyncOutcome) {
        self.seen
            .lock()
            .push((action.definition_name().to_string(), outcome.clone()));
    }
}

pub async fn idle(service: &ActionService) {
    tokio::time::timeout(Duration::from_secs(5), service.wait_until_idle())
        .await
        .expect("queues did not drain");
}
