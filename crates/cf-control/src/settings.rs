//! Tunable-setting bounds and clamp-and-report helper.

use cf_bus::{EventSink, SettingsStore, Value};
use std::collections::BTreeMap;

/// Hard bounds on the operator-tunable loop settings. A write outside the
/// bounds is clamped, written back to the store so the operator sees the
/// effective value, and reported once per write.
#[derive(Debug, Clone, Default)]
pub struct LimitTable {
    bounds: BTreeMap<String, (f64, f64)>,
}

impl LimitTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, low: f64, high: f64) -> Self {
        self.bounds.insert(key.to_string(), (low, high));
        self
    }

    pub fn bounds(&self, key: &str) -> Option<(f64, f64)> {
        self.bounds.get(key).copied()
    }

    /// Clamp `value` to the bounds for `key`. Out-of-bounds values are
    /// written back to `{dir}/{key}` and reported through the sink.
    pub fn clamp(
        &self,
        store: &dyn SettingsStore,
        sink: &dyn EventSink,
        dir: &str,
        key: &str,
        value: f64,
    ) -> f64 {
        let Some((low, high)) = self.bounds(key) else {
            return value;
        };
        if value < low {
            store.set(&format!("{dir}/{key}"), Value::Float(low));
            sink.message(&format!("\"{key}\" value too low, bounded by {low}"), false);
            low
        } else if value > high {
            store.set(&format!("{dir}/{key}"), Value::Float(high));
            sink.message(
                &format!("\"{key}\" value too high, bounded by {high}"),
                false,
            );
            high
        } else {
            value
        }
    }
}
