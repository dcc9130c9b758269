//! Settle-and-confirm with timeout.
//!
//! Remote hardware does not acknowledge commands synchronously: a drive bit
//! is pulsed and the status readback catches up some time later, or not at
//! all. Every such operation in the engine follows the same shape: check the
//! predicate, re-issue the command, yield, repeat until the predicate holds
//! or the deadline passes. This module is the single implementation of that
//! shape.

use crate::clock::Clock;
use crate::pace::Pacer;

/// Timeout and poll interval for one converge operation.
#[derive(Clone, Copy, Debug)]
pub struct ConvergeSpec {
    /// Give up after this many seconds.
    pub timeout_s: f64,
    /// Pause between polls, in seconds.
    pub poll_s: f64,
}

/// How a converge operation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergeOutcome {
    /// Predicate satisfied.
    Converged,
    /// Deadline passed with the predicate still false.
    TimedOut,
    /// The pacer reported cancellation mid-wait.
    Cancelled,
}

/// Drive `action` until `done` reports true, the deadline passes, or the
/// pacer cancels.
///
/// The predicate is checked first: an already-satisfied operation performs
/// no action at all. Errors from either closure abort immediately.
pub fn converge<E>(
    clock: &dyn Clock,
    pacer: &mut dyn Pacer,
    spec: ConvergeSpec,
    mut done: impl FnMut() -> Result<bool, E>,
    mut action: impl FnMut() -> Result<(), E>,
) -> Result<ConvergeOutcome, E> {
    let deadline = clock.now_s() + spec.timeout_s;
    loop {
        if done()? {
            return Ok(ConvergeOutcome::Converged);
        }
        if clock.now_s() > deadline {
            return Ok(ConvergeOutcome::TimedOut);
        }
        action()?;
        if !pacer.pause(spec.poll_s) {
            return Ok(ConvergeOutcome::Cancelled);
        }
    }
}
