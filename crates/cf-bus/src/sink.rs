//! Operator-visible message and alarm channel.

/// Severity class of a raised alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmClass {
    Warning,
    Alarm,
}

/// Leveled message channel plus named alarms.
///
/// Distinct from `tracing`: messages sent here reach the operator console
/// of the host control system, so everything written through this trait is
/// phrased for an operator, not a developer.
pub trait EventSink {
    fn message(&self, msg: &str, is_error: bool);
    fn alarm(&self, name: &str, msg: &str, class: AlarmClass);
}

/// Sink that forwards to `tracing`, for hosts without an operator console.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn message(&self, msg: &str, is_error: bool) {
        if is_error {
            tracing::error!("{msg}");
        } else {
            tracing::info!("{msg}");
        }
    }

    fn alarm(&self, name: &str, msg: &str, class: AlarmClass) {
        match class {
            AlarmClass::Warning => tracing::warn!(alarm = name, "{msg}"),
            AlarmClass::Alarm => tracing::error!(alarm = name, "{msg}"),
        }
    }
}
