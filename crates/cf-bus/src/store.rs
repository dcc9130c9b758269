//! Hierarchical settings/status store with change notification.

use crate::value::Value;

/// Handle returned by [`SettingsStore::watch`], used to stop watching.
pub type WatchId = u64;

/// Callback invoked with (key path, new value) after a watched key changes.
pub type WatchFn = Box<dyn FnMut(&str, &Value)>;

/// Shared key/value store used for tunable settings, queue persistence, and
/// cross-component signaling flags.
///
/// Keys are `/`-separated paths. Watch callbacks fire after the write is
/// visible, so a callback reading the store observes the new value.
/// Re-entrant sets from inside a callback are permitted.
pub trait SettingsStore {
    fn get(&self, path: &str) -> Option<Value>;
    fn set(&self, path: &str, value: Value);
    /// Watch every key under `prefix`. Returns a handle for `unwatch`.
    fn watch(&self, prefix: &str, callback: WatchFn) -> WatchId;
    fn unwatch(&self, id: WatchId);
    /// All keys under `prefix`, in lexical order.
    fn keys_under(&self, prefix: &str) -> Vec<String>;
}

/// Settings subtree for a named equipment (script, loop, or sequencer).
pub fn settings_dir(name: &str) -> String {
    format!("/equipment/{name}/settings")
}

/// Typed accessors with defaults, for the common read patterns.
pub trait StoreExt: SettingsStore {
    fn get_f64(&self, path: &str, default: f64) -> f64 {
        self.get(path).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    fn get_bool(&self, path: &str, default: bool) -> bool {
        self.get(path).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn get_str(&self, path: &str, default: &str) -> String {
        self.get(path)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| default.to_string())
    }

    /// Write `value` only if the key is absent. Used to seed defaults
    /// without clobbering operator edits.
    fn set_default(&self, path: &str, value: Value) {
        if self.get(path).is_none() {
            self.set(path, value);
        }
    }
}

impl<T: SettingsStore + ?Sized> StoreExt for T {}
