//! Condition-gated action execution.
//!
//! Actions are evaluated against their conditions and run either on the
//! caller's task or deferred until the enclosing [`UnitOfWork`] commits,
//! after which they run on a bounded asynchronous queue that drops work
//! equivalent to an action already in flight.

// Core infrastructure modules
pub mod core;

pub mod engine;
pub mod model;
pub mod queue;
pub mod transaction;

// Re-exports for convenience
pub use crate::core::config::{EngineConfig, QueueConfig, DEFAULT_QUEUE};
pub use crate::core::errors::{EngineError, Result};
pub use engine::{
    ActionChain, ActionExecuter, ActionService, ActionServiceBuilder, ConditionEvaluator,
    ExecuteOptions, ExecutionContext, ExecutionMode,
};
pub use model::{
    Action, ActionDefinition, Condition, ConditionDefinition, Parameters, TargetRef,
    COMPOSITE_ACTION, COMPOSITE_CONDITION,
};
pub use queue::{
    ActionFilter, AsyncActionQueue, AsyncExecutionListener, AsyncOutcome, FilterRegistry,
    FnFilter, OngoingAsyncAction, SameTargetFilter, SubmitOutcome,
};
pub use transaction::{TransactionListener, TransactionStatus, UnitOfWork};
