//! Typed, versioned script parameter sets.
//!
//! Queue entries carry a script's parameters as a small JSON document
//! rather than a delimiter-joined string, so values containing `:` or `,`
//! survive the round trip and old persisted queues can be detected by
//! version.

use cf_bus::{SettingsStore, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PARAMSET_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSet {
    pub version: u32,
    pub params: BTreeMap<String, Value>,
}

impl Default for ParamSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamSet {
    pub fn new() -> Self {
        Self {
            version: PARAMSET_VERSION,
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Snapshot the named parameters from a script's settings subtree.
    /// Absent keys are skipped, so applying the set later leaves them at
    /// their defaults.
    pub fn capture(store: &dyn SettingsStore, dir: &str, names: &[&str]) -> Self {
        let mut set = Self::new();
        for name in names {
            if let Some(value) = store.get(&format!("{dir}/{name}")) {
                set.params.insert((*name).to_string(), value);
            }
        }
        set
    }

    /// Write every captured parameter into a script's settings subtree.
    pub fn apply(&self, store: &dyn SettingsStore, dir: &str) {
        for (name, value) in &self.params {
            store.set(&format!("{dir}/{name}"), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_bus::{MemStore, StoreExt};

    #[test]
    fn capture_and_apply_round_trip() {
        let store = MemStore::new();
        store.set("/equipment/sc/settings/temperature_k", Value::Float(45.0));
        store.set("/equipment/sc/settings/label", Value::Str("a: b, c".into()));

        let set = ParamSet::capture(
            &store,
            "/equipment/sc/settings",
            &["temperature_k", "label", "missing"],
        );
        assert_eq!(set.params.len(), 2);

        let other = MemStore::new();
        set.apply(&other, "/equipment/sc/settings");
        assert_eq!(
            other.get_f64("/equipment/sc/settings/temperature_k", 0.0),
            45.0
        );
        // Punctuation inside values survives.
        assert_eq!(
            other.get_str("/equipment/sc/settings/label", ""),
            "a: b, c"
        );
    }

    #[test]
    fn json_round_trip_keeps_version() {
        let set = ParamSet::new().with("x", 1.5).with("policy", "reroute");
        let json = serde_json::to_string(&set).unwrap();
        let back: ParamSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, PARAMSET_VERSION);
        assert_eq!(back, set);
    }
}
