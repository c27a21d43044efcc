use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the action engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// An atomic condition evaluator failed
    #[error("Condition evaluation failed: {definition} ({condition_id})")]
    ConditionEvaluation {
        condition_id: String,
        definition: String,
        #[source]
        source: BoxedSource,
    },

    /// A composite condition was evaluated without any sub-conditions
    #[error("Composite condition {condition_id} has no sub-conditions")]
    IllegalCompositeCondition { condition_id: String },

    /// A leaf handler failed
    #[error("Action {definition} ({action_id}) failed to execute")]
    ActionExecution {
        action_id: String,
        definition: String,
        #[source]
        source: BoxedSource,
    },

    /// An action reached the asynchronous path without a run-as identity
    #[error("Cannot execute action {action_id} asynchronously: run-as identity is not set")]
    MissingRunAsIdentity { action_id: String },

    /// A leaf handler declared a queue that does not exist
    #[error("Unable to route to asynchronous action queue '{queue}'")]
    QueueRouting { queue: String },

    /// No leaf handler is registered under the definition name
    #[error("No action executer registered for '{definition}'")]
    UnknownActionDefinition { definition: String },

    /// No atomic evaluator is registered under the definition name
    #[error("No condition evaluator registered for '{definition}'")]
    UnknownConditionDefinition { definition: String },

    /// Parameters rejected by the definition's schema
    #[error("Invalid parameters for {definition}: {message}")]
    InvalidParameters { definition: String, message: String },

    /// The unit of work is no longer active
    #[error("Unit of work {id} is already {status}")]
    UnitOfWorkClosed { id: String, status: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

impl EngineError {
    /// Create a condition evaluation error from an evaluator failure
    pub fn condition_evaluation<I: Into<String>, D: Into<String>>(
        condition_id: I,
        definition: D,
        source: anyhow::Error,
    ) -> Self {
        Self::ConditionEvaluation {
            condition_id: condition_id.into(),
            definition: definition.into(),
            source: source.into(),
        }
    }

    pub fn illegal_composite<S: Into<String>>(condition_id: S) -> Self {
        Self::IllegalCompositeCondition {
            condition_id: condition_id.into(),
        }
    }

    /// Create an action execution error wrapping the handler's cause
    pub fn action_execution<I: Into<String>, D: Into<String>>(
        action_id: I,
        definition: D,
        source: anyhow::Error,
    ) -> Self {
        Self::ActionExecution {
            action_id: action_id.into(),
            definition: definition.into(),
            source: source.into(),
        }
    }

    /// Turn a handler failure into the error handed back to the caller.
    ///
    /// Errors that already are an `EngineError` pass through untouched,
    /// anything else becomes `ActionExecution` with the original cause.
    pub fn from_handler<I: Into<String>, D: Into<String>>(
        action_id: I,
        definition: D,
        err: anyhow::Error,
    ) -> Self {
        match err.downcast::<EngineError>() {
            Ok(structured) => structured,
            Err(other) => Self::action_execution(action_id, definition, other),
        }
    }

    pub fn missing_run_as<S: Into<String>>(action_id: S) -> Self {
        Self::MissingRunAsIdentity {
            action_id: action_id.into(),
        }
    }

    pub fn queue_routing<S: Into<String>>(queue: S) -> Self {
        Self::QueueRouting {
            queue: queue.into(),
        }
    }

    pub fn unknown_action<S: Into<String>>(definition: S) -> Self {
        Self::UnknownActionDefinition {
            definition: definition.into(),
        }
    }

    pub fn unknown_condition<S: Into<String>>(definition: S) -> Self {
        Self::UnknownConditionDefinition {
            definition: definition.into(),
        }
    }

    pub fn invalid_parameters<D: Into<String>, M: Into<String>>(definition: D, message: M) -> Self {
        Self::InvalidParameters {
            definition: definition.into(),
            message: message.into(),
        }
    }

    pub fn unit_of_work_closed<I: Into<String>, S: Into<String>>(id: I, status: S) -> Self {
        Self::UnitOfWorkClosed {
            id: id.into(),
            status: status.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConditionEvaluation { .. } => "condition",
            Self::IllegalCompositeCondition { .. } => "condition",
            Self::ActionExecution { .. } => "execution",
            Self::MissingRunAsIdentity { .. } => "identity",
            Self::QueueRouting { .. } => "routing",
            Self::UnknownActionDefinition { .. } => "registry",
            Self::UnknownConditionDefinition { .. } => "registry",
            Self::InvalidParameters { .. } => "validation",
            Self::UnitOfWorkClosed { .. } => "transaction",
            Self::Configuration { .. } => "configuration",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("invalid yaml: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_from_handler_wraps_plain_errors() {
        let err = EngineError::from_handler("a1", "mail", anyhow::anyhow!("smtp down"));
        assert!(matches!(err, EngineError::ActionExecution { .. }));
        assert_eq!(err.category(), "execution");
        assert_eq!(err.source().map(|s| s.to_string()), Some("smtp down".to_string()));
    }

    #[test]
    fn test_from_handler_keeps_structured_errors() {
        let inner = anyhow::Error::new(EngineError::illegal_composite("c9"));
        let err = EngineError::from_handler("a1", "mail", inner);
        match err {
            EngineError::IllegalCompositeCondition { condition_id } => assert_eq!(condition_id, "c9"),
            other => panic!("expected structured error, got {other:?}"),
        }
    }

    #[test]
    fn test_display() {
        let err = EngineError::queue_routing("thumbnails");
        assert_eq!(
            err.to_string(),
            "Unable to route to asynchronous action queue 'thumbnails'"
        );
        let err = EngineError::missing_run_as("a7");
        assert!(err.to_string().contains("a7"));
        assert_eq!(err.category(), "identity");
    }
}
