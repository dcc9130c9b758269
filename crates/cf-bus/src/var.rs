//! Remote process-variable bus.

use crate::error::BusResult;

/// Per-variable metadata reported by the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct VarInfo {
    pub connected: bool,
    /// Engineering units string, e.g. "K" or "mbar".
    pub units: String,
    /// Hardware-reported lower control limit for writes.
    pub lower_ctrl_limit: f64,
    /// Hardware-reported upper control limit for writes.
    pub upper_ctrl_limit: f64,
    /// Bus timestamp of the last value update, seconds.
    pub last_update_s: f64,
}

impl Default for VarInfo {
    fn default() -> Self {
        Self {
            connected: true,
            units: String::new(),
            lower_ctrl_limit: f64::NEG_INFINITY,
            upper_ctrl_limit: f64::INFINITY,
            last_update_s: 0.0,
        }
    }
}

/// The process-variable bus the plant instruments live on.
///
/// The engine only needs synchronous get/put, a connectivity check, and
/// limits/units introspection; subscription machinery stays behind the
/// production binding.
pub trait VarBus {
    fn get(&self, name: &str) -> BusResult<f64>;
    fn put(&self, name: &str, value: f64) -> BusResult<()>;
    fn connected(&self, name: &str) -> bool;
    fn info(&self, name: &str) -> BusResult<VarInfo>;
}
