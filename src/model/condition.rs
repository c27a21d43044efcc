use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::parameters::Parameters;

/// Definition name of composite conditions
pub const COMPOSITE_CONDITION: &str = "composite-condition";

/// A boolean eligibility predicate evaluated against a target.
///
/// A condition whose definition name is [`COMPOSITE_CONDITION`] combines its
/// sub-conditions with AND (or OR when `or` is set) instead of delegating
/// to an evaluator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    id: String,
    definition_name: String,
    #[serde(default)]
    invert: bool,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    parameters: Parameters,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    or: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    conditions: Vec<Condition>,
}

impl Condition {
    /// Create an atomic condition with a generated id
    pub fn new(definition_name: impl Into<String>) -> Self {
        Self::with_id(cuid2::create_id(), definition_name)
    }

    pub fn with_id(id: impl Into<String>, definition_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            definition_name: definition_name.into(),
            invert: false,
            parameters: Parameters::new(),
            or: false,
            conditions: Vec::new(),
        }
    }

    /// Create an empty AND composite with a generated id
    pub fn composite() -> Self {
        Self::new(COMPOSITE_CONDITION)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn definition_name(&self) -> &str {
        &self.definition_name
    }

    pub fn is_composite(&self) -> bool {
        self.definition_name == COMPOSITE_CONDITION
    }

    pub fn invert(&self) -> bool {
        self.invert
    }

    pub fn set_invert(&mut self, invert: bool) {
        self.invert = invert;
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    /// True when a composite combines with OR
    pub fn is_or(&self) -> bool {
        self.or
    }

    pub fn set_or(&mut self, or: bool) {
        self.or = or;
    }

    pub fn any_of(mut self) -> Self {
        self.or = true;
        self
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.parameters.set(key, value);
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.set(key, value);
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sub-conditions of a composite, in evaluation order
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn add_condition(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    /// Insert at `index`, clamped to the end of the list
    pub fn add_condition_at(&mut self, index: usize, condition: Condition) {
        let index = index.min(self.conditions.len());
        self.conditions.insert(index, condition);
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn remove_condition(&mut self, id: &str) -> Option<Condition> {
        let pos = self.conditions.iter().position(|c| c.id == id)?;
        Some(self.conditions.remove(pos))
    }

    pub fn remove_all_conditions(&mut self) {
        self.conditions.clear();
    }
}
