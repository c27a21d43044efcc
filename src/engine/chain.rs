use std::collections::BTreeSet;
use std::fmt;

/// Ids of the actions executing in one synchronous call tree.
///
/// Passed by value down every nested call; the caller's chain is never
/// modified, so leaving a call restores the previous chain on every path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionChain {
    ids: BTreeSet<String>,
}

impl ActionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.ids.contains(action_id)
    }

    /// A new chain holding this chain's ids plus `action_id`
    pub fn extended_with(&self, action_id: &str) -> Self {
        let mut ids = self.ids.clone();
        ids.insert(action_id.to_string());
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl fmt::Display for ActionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ids.is_empty() {
            return write!(f, "[]");
        }
        write!(f, "[")?;
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "]")
    }
}

impl<S: Into<String>> FromIterator<S> for ActionChain {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}
