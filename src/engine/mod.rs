//! Condition evaluation and action execution.

pub mod builtin;
pub mod chain;
pub mod context;
pub mod evaluator;
pub mod registry;
pub mod service;

pub use builtin::{CompositeActionExecuter, NoConditionEvaluator, NO_CONDITION};
pub use chain::ActionChain;
pub use context::{ExecuteOptions, ExecutionContext, ExecutionMode};
pub use evaluator::Evaluator;
pub use registry::{
    ActionExecuter, ConditionEvaluator, EvaluatorRegistry, ExecuterRegistry, RegisteredEvaluator,
    RegisteredExecuter,
};
pub use service::{ActionService, ActionServiceBuilder};
