//! cf-control: ticked PID loops with guard checks.
//!
//! A [`ControlLoop`] regulates one target readback by driving one actuator
//! setpoint. Every tick walks a guard chain (device preconditions, actuator
//! drift, target staleness, panic hysteresis) before computing a PID step;
//! any guard failure disables the loop through the settings store so the
//! operator-visible flag always reflects reality.

pub mod control_loop;
pub mod error;
pub mod pid;
pub mod settings;
pub mod validate;

pub use control_loop::{
    ControlLoop, LoopDefaults, LoopSpec, PanicSpec, Preconditions, TickOutcome,
};
pub use error::{ControlError, ControlResult};
pub use pid::Pid;
pub use settings::LimitTable;
pub use validate::check_exclusive_actuators;
