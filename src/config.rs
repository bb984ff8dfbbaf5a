//! Graph configuration.

use serde::{Deserialize, Serialize};

/// Tunables for a `MetaGraph`.
///
/// All fields have defaults; a config can be deserialized from a partial
/// document (`{"max_depth": 64}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Deepest nesting the builder will descend into before failing with
    /// `Error::DepthExceeded`. Self-referencing data would otherwise recurse
    /// forever.
    pub max_depth: usize,

    /// When commit creates a backing container for an empty sequence, also
    /// attach it to the parent's container (if the parent has one). Empty
    /// sequences never materialize ancestors.
    pub attach_empty_sequences: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: 256,
            attach_empty_sequences: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: GraphConfig = serde_json::from_str(r#"{"max_depth": 8}"#).unwrap();
        assert_eq!(config.max_depth, 8);
        assert!(config.attach_empty_sequences);
    }
}
