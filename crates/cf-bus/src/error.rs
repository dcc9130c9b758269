use thiserror::Error;

pub type BusResult<T> = Result<T, BusError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    /// The variable exists but the instrument backing it is unreachable.
    #[error("process variable {name} is not connected")]
    Unconnected { name: String },

    /// No variable of that name on the bus.
    #[error("unknown process variable {name}")]
    UnknownVar { name: String },
}
