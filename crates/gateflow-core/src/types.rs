use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The accumulated runtime facts of a workflow instance
///
/// Form submissions merge their field values into the set under the field
/// names; approval resolutions insert a `<node_id>.decision` fact. Conditional
/// nodes route by looking facts up by name. The map is ordered so that
/// serialized instances are stable.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FactSet {
    values: BTreeMap<String, Value>,
}

impl FactSet {
    /// Create an empty fact set
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a fact by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Record a single fact, replacing any previous value under the name
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Merge a batch of facts (e.g. a submitted form payload)
    pub fn merge(&mut self, values: impl IntoIterator<Item = (String, Value)>) {
        self.values.extend(values);
    }

    /// Check whether a fact is present
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Number of recorded facts
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check whether any fact has been recorded
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over all facts in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}
