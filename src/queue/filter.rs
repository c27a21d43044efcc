//! Equivalence filters deciding when a submission duplicates ongoing work.

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::queue::async_queue::OngoingAsyncAction;

/// Compares a candidate submission with an action already in flight.
///
/// A filter only applies to candidates whose definition name equals
/// [`ActionFilter::action_definition_name`]. Returning `Ordering::Equal`
/// drops the candidate.
///
/// `compare` runs without any queue lock held, so it may read the queue
/// (for example `ongoing_count`).
pub trait ActionFilter: Send + Sync {
    /// Registering a filter under an existing name replaces it
    fn name(&self) -> &str;

    fn action_definition_name(&self) -> &str;

    fn compare(&self, ongoing: &OngoingAsyncAction, candidate: &OngoingAsyncAction) -> Ordering;
}

/// Filters shared by every queue of a service, keyed by filter name.
///
/// Queues look up the filters for a definition at submit time, so a filter
/// applies wherever its definition is routed, whenever it was registered.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: Arc<RwLock<Vec<Arc<dyn ActionFilter>>>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter, replacing one with the same name
    pub fn register(&self, filter: Arc<dyn ActionFilter>) {
        let mut filters = self.filters.write();
        filters.retain(|existing| existing.name() != filter.name());
        debug!(
            filter = filter.name(),
            definition = filter.action_definition_name(),
            "Registered action filter"
        );
        filters.push(filter);
    }

    /// Filters that apply to `definition_name`, in registration order
    pub fn matching(&self, definition_name: &str) -> Vec<Arc<dyn ActionFilter>> {
        self.filters
            .read()
            .iter()
            .filter(|f| f.action_definition_name() == definition_name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.filters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.read().is_empty()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.len())
            .finish()
    }
}

type CompareFn = dyn Fn(&OngoingAsyncAction, &OngoingAsyncAction) -> Ordering + Send + Sync;

/// Filter backed by a closure
pub struct FnFilter {
    name: String,
    definition_name: String,
    compare: Arc<CompareFn>,
}

impl FnFilter {
    /// Closure filter with a generated name
    pub fn new<F>(definition_name: impl Into<String>, compare: F) -> Self
    where
        F: Fn(&OngoingAsyncAction, &OngoingAsyncAction) -> Ordering + Send + Sync + 'static,
    {
        Self::named(cuid2::create_id(), definition_name, compare)
    }

    pub fn named<F>(name: impl Into<String>, definition_name: impl Into<String>, compare: F) -> Self
    where
        F: Fn(&OngoingAsyncAction, &OngoingAsyncAction) -> Ordering + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            definition_name: definition_name.into(),
            compare: Arc::new(compare),
        }
    }
}

impl ActionFilter for FnFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn action_definition_name(&self) -> &str {
        &self.definition_name
    }

    fn compare(&self, ongoing: &OngoingAsyncAction, candidate: &OngoingAsyncAction) -> Ordering {
        (self.compare)(ongoing, candidate)
    }
}

impl fmt::Debug for FnFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFilter")
            .field("name", &self.name)
            .field("definition_name", &self.definition_name)
            .finish()
    }
}

/// Treats two actions of one definition as equivalent when they act on the
/// same target
#[derive(Clone, Debug)]
pub struct SameTargetFilter {
    name: String,
    definition_name: String,
}

impl SameTargetFilter {
    pub fn new(definition_name: impl Into<String>) -> Self {
        let definition_name = definition_name.into();
        Self {
            name: format!("same-target:{}", definition_name),
            definition_name,
        }
    }
}

impl ActionFilter for SameTargetFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn action_definition_name(&self) -> &str {
        &self.definition_name
    }

    fn compare(&self, ongoing: &OngoingAsyncAction, candidate: &OngoingAsyncAction) -> Ordering {
        if ongoing.action().definition_name() != self.definition_name {
            return Ordering::Less;
        }
        ongoing.target().cmp(candidate.target())
    }
}
