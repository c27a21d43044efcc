use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{EngineError, Result};

/// Name under which the default asynchronous queue is registered
pub const DEFAULT_QUEUE: &str = "";

/// Worker pool settings for one asynchronous action queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name; leaf handlers route to it through their definition
    #[serde(default)]
    pub name: String,
    /// Maximum number of actions executing concurrently on this queue
    #[serde(default = "default_workers")]
    pub max_workers: usize,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        Self {
            name: name.into(),
            max_workers,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE, default_workers())
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_true() -> bool {
    true
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Queue used by leaf handlers that do not name one
    #[serde(default)]
    pub default_queue: QueueConfig,
    /// Additional named queues
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
    /// Validate action parameters against the definition schema before execution
    #[serde(default = "default_true")]
    pub validate_parameters: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_queue: QueueConfig::default(),
            queues: Vec::new(),
            validate_parameters: true,
        }
    }
}

impl EngineConfig {
    /// Create a new builder for EngineConfig
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_queue.name != DEFAULT_QUEUE {
            return Err(EngineError::configuration_field(
                "the default queue cannot be renamed",
                "default_queue.name",
            ));
        }
        if self.default_queue.max_workers == 0 {
            return Err(EngineError::configuration_field(
                "max_workers must be greater than 0",
                "default_queue.max_workers",
            ));
        }

        let mut seen = HashSet::new();
        for queue in &self.queues {
            if queue.name == DEFAULT_QUEUE {
                return Err(EngineError::configuration_field(
                    "named queues cannot use the default queue name",
                    "queues.name",
                ));
            }
            if queue.max_workers == 0 {
                return Err(EngineError::configuration_field(
                    format!("max_workers must be greater than 0 for queue '{}'", queue.name),
                    "queues.max_workers",
                ));
            }
            if !seen.insert(queue.name.as_str()) {
                return Err(EngineError::configuration_field(
                    format!("duplicate queue '{}'", queue.name),
                    "queues.name",
                ));
            }
        }
        Ok(())
    }

    /// All queues, default first
    pub fn all_queues(&self) -> impl Iterator<Item = &QueueConfig> {
        std::iter::once(&self.default_queue).chain(self.queues.iter())
    }
}

/// Builder for EngineConfig
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count of the default queue
    pub fn default_workers(mut self, max_workers: usize) -> Self {
        self.config.default_queue.max_workers = max_workers;
        self
    }

    /// Add a named queue
    pub fn queue(mut self, name: impl Into<String>, max_workers: usize) -> Self {
        self.config.queues.push(QueueConfig::new(name, max_workers));
        self
    }

    pub fn validate_parameters(mut self, enabled: bool) -> Self {
        self.config.validate_parameters = enabled;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.default_queue.max_workers > 0);
        assert!(config.validate_parameters);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .default_workers(2)
            .queue("thumbnails", 1)
            .validate_parameters(false)
            .build()
            .unwrap();

        let names: Vec<_> = config.all_queues().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["", "thumbnails"]);
        assert!(!config.validate_parameters);
    }

    #[test]
    fn test_validation_errors() {
        assert!(EngineConfig::builder().default_workers(0).build().is_err());
        assert!(EngineConfig::builder().queue("", 2).build().is_err());
        assert!(EngineConfig::builder().queue("q", 0).build().is_err());
        assert!(EngineConfig::builder()
            .queue("q", 1)
            .queue("q", 2)
            .build()
            .is_err());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
default_queue:
  max_workers: 3
queues:
  - name: thumbnails
    max_workers: 1
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.default_queue, QueueConfig::new("", 3));
        assert_eq!(config.queues, vec![QueueConfig::new("thumbnails", 1)]);
        assert!(config.validate_parameters);
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        let err = EngineConfig::from_yaml_str("queues:\n  - name: ''\n    max_workers: 1\n").unwrap_err();
        assert_eq!(err.category(), "configuration");
    }
}
