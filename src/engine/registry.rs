//! Capability registries: leaf handlers and atomic condition evaluators,
//! keyed by definition name and populated by explicit registration.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::errors::{EngineError, Result};
use crate::engine::context::ExecutionContext;
use crate::model::{Action, ActionDefinition, Condition, ConditionDefinition, Parameters, TargetRef};

/// Leaf behaviour of an action definition
#[async_trait]
pub trait ActionExecuter: Send + Sync {
    /// Definition published for this handler; its name is the registry key
    fn definition(&self) -> ActionDefinition;

    /// Run the action against the target
    async fn execute(
        &self,
        action: &Action,
        target: &TargetRef,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<()>;
}

/// Atomic condition evaluation
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    fn definition(&self) -> ConditionDefinition;

    /// Evaluate without applying `invert`; the engine applies it
    async fn evaluate(&self, condition: &Condition, target: &TargetRef) -> anyhow::Result<bool>;
}

/// Compiled parameter schema of a definition
#[derive(Clone)]
struct ParameterSchema {
    validator: Arc<jsonschema::Validator>,
}

impl ParameterSchema {
    fn compile(definition: &str, schema: Option<&Value>) -> Result<Option<Self>> {
        let Some(schema) = schema else {
            return Ok(None);
        };
        let validator = jsonschema::validator_for(schema).map_err(|e| {
            EngineError::configuration_field(
                format!("failed to compile parameter schema of '{}': {}", definition, e),
                "parameter_schema",
            )
        })?;
        Ok(Some(Self {
            validator: Arc::new(validator),
        }))
    }

    fn validate(&self, definition: &str, parameters: &Parameters) -> Result<()> {
        let instance = parameters.to_value();
        if let Err(error) = self.validator.validate(&instance) {
            warn!(definition, %error, "Parameter validation failed");
            return Err(EngineError::invalid_parameters(definition, error.to_string()));
        }
        Ok(())
    }
}

/// A registered leaf handler with its definition
#[derive(Clone)]
pub struct RegisteredExecuter {
    pub definition: ActionDefinition,
    pub executer: Arc<dyn ActionExecuter>,
    schema: Option<ParameterSchema>,
}

impl RegisteredExecuter {
    pub fn validate(&self, parameters: &Parameters) -> Result<()> {
        match &self.schema {
            Some(schema) => schema.validate(&self.definition.name, parameters),
            None => Ok(()),
        }
    }
}

/// Registry for leaf handlers
#[derive(Clone, Default)]
pub struct ExecuterRegistry {
    executers: Arc<DashMap<String, RegisteredExecuter>>,
}

impl ExecuterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any handler with the same name
    pub fn register(&self, executer: Arc<dyn ActionExecuter>) -> Result<()> {
        let definition = executer.definition();
        let schema = ParameterSchema::compile(&definition.name, definition.parameter_schema.as_ref())?;
        let name = definition.name.clone();
        let previous = self.executers.insert(
            name.clone(),
            RegisteredExecuter {
                definition,
                executer,
                schema,
            },
        );
        if previous.is_some() {
            debug!(definition = %name, "Replaced action executer");
        } else {
            debug!(definition = %name, "Registered action executer");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<RegisteredExecuter> {
        self.executers.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executers.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<ActionDefinition> {
        let mut definitions: Vec<_> = self
            .executers
            .iter()
            .map(|entry| entry.value().definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }
}

/// A registered evaluator with its definition
#[derive(Clone)]
pub struct RegisteredEvaluator {
    pub definition: ConditionDefinition,
    pub evaluator: Arc<dyn ConditionEvaluator>,
    schema: Option<ParameterSchema>,
}

impl RegisteredEvaluator {
    pub fn validate(&self, parameters: &Parameters) -> Result<()> {
        match &self.schema {
            Some(schema) => schema.validate(&self.definition.name, parameters),
            None => Ok(()),
        }
    }
}

/// Registry for atomic condition evaluators
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: Arc<DashMap<String, RegisteredEvaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, evaluator: Arc<dyn ConditionEvaluator>) -> Result<()> {
        let definition = evaluator.definition();
        let schema = ParameterSchema::compile(&definition.name, definition.parameter_schema.as_ref())?;
        let name = definition.name.clone();
        self.evaluators.insert(
            name.clone(),
            RegisteredEvaluator {
                definition,
                evaluator,
                schema,
            },
        );
        debug!(definition = %name, "Registered condition evaluator");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<RegisteredEvaluator> {
        self.evaluators.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.evaluators.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<ConditionDefinition> {
        let mut definitions: Vec<_> = self
            .evaluators
            .iter()
            .map(|entry| entry.value().definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }
}
