//! Cooperative yielding between polls.
//!
//! Blocking operations (device switching, setpoint convergence, script
//! waits) never sleep the OS thread directly. They pause through a `Pacer`,
//! which is the single point where the host interleaves other work: ticking
//! control loops, advancing a simulated clock, or observing a cancellation
//! request.

/// Yield point between polls of a slow operation.
pub trait Pacer {
    /// Pause for roughly `dt_s` seconds. Returns `false` if the operation
    /// has been cancelled and the caller should stop polling.
    fn pause(&mut self, dt_s: f64) -> bool;
}

/// Wall-clock pacer: sleeps the current thread.
pub struct SleepPacer;

impl Pacer for SleepPacer {
    fn pause(&mut self, dt_s: f64) -> bool {
        if dt_s > 0.0 {
            std::thread::sleep(std::time::Duration::from_secs_f64(dt_s));
        }
        true
    }
}

/// Pacer that never sleeps and never cancels. Used by dry-run paths and
/// tests that only exercise non-blocking branches.
pub struct NullPacer;

impl Pacer for NullPacer {
    fn pause(&mut self, _dt_s: f64) -> bool {
        true
    }
}

/// Closure-backed pacer.
///
/// The workhorse for tests: the closure advances a [`ManualClock`] and
/// mutates the fake bus to simulate hardware settling between polls.
///
/// [`ManualClock`]: crate::clock::ManualClock
pub struct FnPacer<F: FnMut(f64) -> bool>(pub F);

impl<F: FnMut(f64) -> bool> Pacer for FnPacer<F> {
    fn pause(&mut self, dt_s: f64) -> bool {
        (self.0)(dt_s)
    }
}
