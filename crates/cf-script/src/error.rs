//! Error types for script execution.

use thiserror::Error;

/// Result type for script operations.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Errors raised while checking or running a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// A checklist entry does not hold, so the script refuses to start.
    #[error("{device}: expected {expected}, found {actual}")]
    PreconditionFailed {
        device: String,
        expected: String,
        actual: String,
    },

    /// A convergent store write never read back as set.
    #[error("attempted to set {path} for {timeout_s} seconds, stuck at {stuck}")]
    SetTimeout {
        path: String,
        timeout_s: f64,
        stuck: String,
    },

    /// The script's enable flag was cleared externally mid-run.
    #[error("script was cancelled")]
    Cancelled,

    /// No flow where flow is required: the trap or a line is blocked.
    #[error("{what}")]
    Clogged { what: String },

    /// Invalid parameter value in the script's settings.
    #[error("bad parameter {name}: {why}")]
    BadParam { name: &'static str, why: String },

    #[error(transparent)]
    Device(#[from] cf_device::DeviceError),

    #[error(transparent)]
    Bus(#[from] cf_bus::BusError),

    /// Anything the script machinery did not anticipate. Logged with the
    /// full chain and treated like any other failure for safe-exit.
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl ScriptError {
    /// Cancellation follows the safe-exit path but is not an error exit.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ScriptError::Cancelled | ScriptError::Device(cf_device::DeviceError::Cancelled { .. })
        )
    }
}
