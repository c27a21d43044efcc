//! Target references and capability definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::core::errors::EngineError;

/// Reference to the resource an action or condition is applied to
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetRef {
    pub store: String,
    pub id: String,
}

impl TargetRef {
    pub fn new(store: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.store, self.id)
    }
}

impl FromStr for TargetRef {
    type Err = EngineError;

    /// Parse `store://id`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once("://") {
            Some((store, id)) if !store.is_empty() && !id.is_empty() => Ok(Self::new(store, id)),
            _ => Err(EngineError::configuration(format!(
                "'{}' is not a target reference of the form store://id",
                s
            ))),
        }
    }
}

/// Metadata published by a leaf handler
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Named asynchronous queue; `None` routes to the default queue
    pub queue_name: Option<String>,
    /// JSON schema the action's parameters must satisfy
    pub parameter_schema: Option<Value>,
}

impl ActionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_parameter_schema(mut self, schema: Value) -> Self {
        self.parameter_schema = Some(schema);
        self
    }
}

/// Metadata published by an atomic condition evaluator
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub parameter_schema: Option<Value>,
}

impl ConditionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_parameter_schema(mut self, schema: Value) -> Self {
        self.parameter_schema = Some(schema);
        self
    }
}
