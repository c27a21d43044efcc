use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::condition::Condition;
use super::parameters::Parameters;

/// Definition name of composite actions
pub const COMPOSITE_ACTION: &str = "composite-action";

/// An executable unit: a named leaf behaviour gated by conditions.
///
/// The id never changes after creation. A composite action
/// (definition [`COMPOSITE_ACTION`]) runs its child actions in order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    id: String,
    definition_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    execute_asynchronously: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compensating_action: Option<Box<Action>>,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    parameters: Parameters,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    actions: Vec<Action>,
    /// Identity the action runs as on the asynchronous path
    #[serde(skip)]
    run_as: Option<String>,
}

impl Action {
    /// Create an action with a generated id
    pub fn new(definition_name: impl Into<String>) -> Self {
        Self::with_id(cuid2::create_id(), definition_name)
    }

    pub fn with_id(id: impl Into<String>, definition_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            definition_name: definition_name.into(),
            title: None,
            description: None,
            execute_asynchronously: false,
            conditions: Vec::new(),
            compensating_action: None,
            parameters: Parameters::new(),
            actions: Vec::new(),
            run_as: None,
        }
    }

    /// Create an empty composite action with a generated id
    pub fn composite() -> Self {
        Self::new(COMPOSITE_ACTION)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn definition_name(&self) -> &str {
        &self.definition_name
    }

    pub fn is_composite(&self) -> bool {
        self.definition_name == COMPOSITE_ACTION
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    pub fn execute_asynchronously(&self) -> bool {
        self.execute_asynchronously
    }

    pub fn set_execute_asynchronously(&mut self, asynchronously: bool) {
        self.execute_asynchronously = asynchronously;
    }

    pub fn asynchronous(mut self) -> Self {
        self.execute_asynchronously = true;
        self
    }

    // Conditions

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn condition(&self, id: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.id() == id)
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
        let pos = self.conditions.iter().position(|c| c.id() == id)?;
        Some(self.conditions.remove(pos))
    }

    pub fn remove_all_conditions(&mut self) {
        self.conditions.clear();
    }

    // Compensation

    pub fn compensating_action(&self) -> Option<&Action> {
        self.compensating_action.as_deref()
    }

    /// Replace the compensating action; an action has at most one
    pub fn set_compensating_action(&mut self, action: Option<Action>) {
        self.compensating_action = action.map(Box::new);
    }

    pub fn with_compensating_action(mut self, action: Action) -> Self {
        self.compensating_action = Some(Box::new(action));
        self
    }

    // Parameters

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

    // Child actions of a composite

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn has_actions(&self) -> bool {
        !self.actions.is_empty()
    }

    pub fn add_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Insert at `index`, clamped to the end of the list
    pub fn add_action_at(&mut self, index: usize, action: Action) {
        let index = index.min(self.actions.len());
        self.actions.insert(index, action);
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn remove_action(&mut self, id: &str) -> Option<Action> {
        let pos = self.actions.iter().position(|a| a.id() == id)?;
        Some(self.actions.remove(pos))
    }

    pub fn remove_all_actions(&mut self) {
        self.actions.clear();
    }

    // Run-as identity

    pub fn run_as(&self) -> Option<&str> {
        self.run_as.as_deref()
    }

    pub fn set_run_as(&mut self, identity: Option<String>) {
        self.run_as = identity;
    }
}
