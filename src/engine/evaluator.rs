//! Condition evaluation.
//!
//! Composite conditions short-circuit (AND stops at the first false, OR at
//! the first true). The top-level condition list of an action is a
//! non-short-circuiting AND: every condition is evaluated even after one
//! fails, so evaluator side effects always run.

use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use crate::core::errors::{EngineError, Result};
use crate::engine::registry::EvaluatorRegistry;
use crate::model::{Action, Condition, TargetRef};

/// Evaluates condition trees against targets
#[derive(Clone)]
pub struct Evaluator {
    registry: EvaluatorRegistry,
    validate_parameters: bool,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(EvaluatorRegistry::default())
    }
}

impl Evaluator {
    pub fn new(registry: EvaluatorRegistry) -> Self {
        Self {
            registry,
            validate_parameters: true,
        }
    }

    /// Toggle schema validation of condition parameters
    pub fn with_parameter_validation(mut self, enabled: bool) -> Self {
        self.validate_parameters = enabled;
        self
    }

    pub fn registry(&self) -> &EvaluatorRegistry {
        &self.registry
    }

    /// AND over every top-level condition of the action
    pub async fn evaluate_action(&self, action: &Action, target: &TargetRef) -> Result<bool> {
        let mut result = true;
        for condition in action.conditions() {
            let passed = self.evaluate(condition, target).await?;
            debug!(
                action_id = %action.id(),
                condition = %condition.definition_name(),
                passed,
                "Condition evaluated"
            );
            result &= passed;
        }
        debug!(action_id = %action.id(), result, "All conditions evaluated");
        Ok(result)
    }

    /// Evaluate a single condition tree
    pub fn evaluate<'a>(
        &'a self,
        condition: &'a Condition,
        target: &'a TargetRef,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            if condition.is_composite() {
                self.evaluate_composite(condition, target).await
            } else {
                self.evaluate_simple(condition, target).await
            }
        }
        .boxed()
    }

    async fn evaluate_composite(&self, condition: &Condition, target: &TargetRef) -> Result<bool> {
        if !condition.has_conditions() {
            return Err(EngineError::illegal_composite(condition.id()));
        }
        debug!(
            condition_id = %condition.id(),
            operator = if condition.is_or() { "OR" } else { "AND" },
            "Evaluating composite condition"
        );

        let mut result = !condition.is_or();
        for child in condition.conditions() {
            let passed = self.evaluate(child, target).await?;
            if condition.is_or() {
                if passed {
                    result = true;
                    break;
                }
            } else if !passed {
                result = false;
                break;
            }
        }

        Ok(apply_invert(condition, result))
    }

    async fn evaluate_simple(&self, condition: &Condition, target: &TargetRef) -> Result<bool> {
        let name = condition.definition_name();
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| EngineError::unknown_condition(name))?;
        if self.validate_parameters {
            entry.validate(condition.parameters())?;
        }

        debug!(condition_id = %condition.id(), definition = name, %target, "Evaluating simple condition");
        let result = entry
            .evaluator
            .evaluate(condition, target)
            .await
            .map_err(|e| EngineError::condition_evaluation(condition.id(), name, e))?;

        Ok(apply_invert(condition, result))
    }
}

fn apply_invert(condition: &Condition, result: bool) -> bool {
    if condition.invert() {
        !result
    } else {
        result
    }
}
