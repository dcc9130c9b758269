//! cf-core: stable foundation for cryoflow.
//!
//! Contains:
//! - clock (injectable time source, wall-clock or manual)
//! - pace (cooperative yielding between polls, cancellation-aware)
//! - converge (the one settle-and-confirm primitive used by every
//!   retry-until-timeout operation in the engine)
//! - error (shared error types)

pub mod clock;
pub mod converge;
pub mod error;
pub mod pace;

// Re-exports: nice ergonomics for downstream crates
pub use clock::{Clock, ManualClock, SystemClock};
pub use converge::{converge, ConvergeOutcome, ConvergeSpec};
pub use error::{CoreError, CoreResult};
pub use pace::{FnPacer, NullPacer, Pacer, SleepPacer};
