//! State: the open map of extension-contributed runtime fields on a node.

use std::collections::BTreeMap;

use super::Value;

/// Per-node runtime state. The core never reads it for structural decisions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State(BTreeMap<String, Value>);

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for hooks returning partial state.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Overlay `other` onto this state; entries in `other` win.
    pub fn merge(&mut self, other: State) {
        self.0.extend(other.0);
    }

    /// Entries passing `keep`.
    pub fn filtered(&self, keep: impl Fn(&str, &Value) -> bool) -> State {
        self.0
            .iter()
            .filter(|(k, v)| keep(k, v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for State {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overrides() {
        let mut state = State::new().with("a", 1).with("b", true);
        state.merge(State::new().with("a", 2).with("c", "x"));
        assert_eq!(state.get("a"), Some(&Value::Int(2)));
        assert_eq!(state.get_bool("b"), Some(true));
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_filtered() {
        let state = State::new().with("keep", 1).with("drop", Value::Null);
        let kept = state.filtered(|_, v| !v.is_null());
        assert!(kept.contains("keep"));
        assert!(!kept.contains("drop"));
    }
}
