use cf_bus::BusError;
use thiserror::Error;

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Error, Debug)]
pub enum DeviceError {
    /// A backing variable was unreachable at construction. Fatal: the
    /// device cannot be used at all.
    #[error("{device}: variable {var} unreachable, device cannot connect")]
    ConnectionFailure { device: String, var: String },

    /// Hardware safety interlock engaged and not bypassed.
    #[error("{device} is interlocked")]
    Interlocked { device: String },

    /// Hardware timeout flag stuck despite reset attempts.
    #[error("{device} has timed out and is unresponsive to reset")]
    DeviceTimeout { device: String },

    /// Pump reports a hardware fault.
    #[error("{device} has faulted")]
    Faulted { device: String },

    /// Commanded state or setpoint not reached within the timeout.
    #[error("{device} timed out during {op}")]
    OperationTimeout { device: String, op: &'static str },

    /// Setpoint outside hardware-reported control limits; nothing written.
    #[error("{device}: setpoint {value} outside limits ({lower}, {upper})")]
    OutOfRange {
        device: String,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("{device} does not define a setpoint variable")]
    NoSetpoint { device: String },

    #[error("{device} does not define a readback variable")]
    NoReadback { device: String },

    #[error("{device} is not a switchable device")]
    NotSwitchable { device: String },

    /// Cooperative cancellation observed mid-operation.
    #[error("{device}: {op} cancelled")]
    Cancelled { device: String, op: &'static str },

    /// Device name does not match any routing prefix.
    #[error("no routing prefix for device name {name}")]
    UnknownRoute { name: String },

    /// Device name does not match any known instrument kind.
    #[error("cannot classify device name {name}")]
    UnknownKind { name: String },

    #[error(transparent)]
    Bus(#[from] BusError),
}
