//! Error types for control loop operations.

use thiserror::Error;

/// Result type for control loop operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur while running a control loop.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A monitored device is not in the state the loop requires.
    #[error("{name}: device precondition failed, loop disabled")]
    PreconditionFailed { name: String },

    /// The actuator no longer reads back what the loop last commanded,
    /// meaning someone else is driving it.
    #[error("{var}: reads {actual}, last commanded {commanded}")]
    ActuatorMismatch {
        var: String,
        commanded: f64,
        actual: f64,
    },

    /// The target readback has not updated within the staleness window.
    #[error("{var}: value unchanged for {stale_s:.1} s")]
    StaleTarget { var: String, stale_s: f64 },

    /// Two loops configured to drive the same actuator.
    #[error("actuator {var} is claimed by both {first} and {second}")]
    DuplicateActuator {
        var: String,
        first: String,
        second: String,
    },

    /// Invalid argument provided to a control function.
    #[error("invalid argument: {what}")]
    InvalidArg { what: &'static str },

    /// Underlying bus failure.
    #[error(transparent)]
    Bus(#[from] cf_bus::BusError),
}
