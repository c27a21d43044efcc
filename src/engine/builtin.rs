//! Capabilities every service registers on its own.

use async_trait::async_trait;

use crate::engine::context::ExecutionContext;
use crate::engine::registry::{ActionExecuter, ConditionEvaluator};
use crate::model::{
    Action, ActionDefinition, Condition, ConditionDefinition, TargetRef, COMPOSITE_ACTION,
};

/// Definition name of the condition that always holds
pub const NO_CONDITION: &str = "no-condition";

/// Runs the children of a composite action in order, each under the
/// composite's chain and with its own conditions checked. The first failing
/// child stops the composite.
pub struct CompositeActionExecuter;

#[async_trait]
impl ActionExecuter for CompositeActionExecuter {
    fn definition(&self) -> ActionDefinition {
        ActionDefinition::new(COMPOSITE_ACTION)
            .with_title("Composite action")
            .with_description("Executes a list of actions in order")
    }

    async fn execute(
        &self,
        action: &Action,
        target: &TargetRef,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<()> {
        for child in action.actions() {
            ctx.execute_child(child, target).await?;
        }
        Ok(())
    }
}

/// Always true
pub struct NoConditionEvaluator;

#[async_trait]
impl ConditionEvaluator for NoConditionEvaluator {
    fn definition(&self) -> ConditionDefinition {
        ConditionDefinition::new(NO_CONDITION).with_title("No condition")
    }

    async fn evaluate(&self, _condition: &Condition, _target: &TargetRef) -> anyhow::Result<bool> {
        Ok(true)
    }
}
