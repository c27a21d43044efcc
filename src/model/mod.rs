//! In-memory action graph: actions, conditions and their parameters.

pub mod action;
pub mod condition;
pub mod parameters;
pub mod types;

pub use action::{Action, COMPOSITE_ACTION};
pub use condition::{Condition, COMPOSITE_CONDITION};
pub use parameters::Parameters;
pub use types::{ActionDefinition, ConditionDefinition, TargetRef};
