use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key-value parameters of an action or condition.
///
/// No schema is enforced here; leaf handlers validate what they read.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, Value>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, returning the previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Get a parameter deserialized into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .0
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Parameter '{}' not found", key))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("Failed to deserialize parameter '{}': {}", key, e))
    }

    /// Get an optional parameter; null counts as absent
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.0.get(key) {
            Some(value) if !value.is_null() => {
                let parsed = serde_json::from_value(value.clone()).map_err(|e| {
                    anyhow::anyhow!("Failed to deserialize parameter '{}': {}", key, e)
                })?;
                Ok(Some(parsed))
            }
            _ => Ok(None),
        }
    }

    /// The parameters as a JSON object, used for schema validation
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
