//! Precondition checklists walked before a script runs.

use crate::error::{ScriptError, ScriptResult};
use cf_bus::EventSink;
use cf_device::DeviceRegistry;

/// Plant state a script requires before it will start. Device names are
/// bare (registry-routed). Valves read as open/closed, everything else as
/// on/off.
#[derive(Debug, Clone, Default)]
pub struct Checklist {
    /// Must be on (or open, for valves).
    pub on: Vec<&'static str>,
    /// Must be off (or closed, for valves).
    pub off: Vec<&'static str>,
    /// Readback must be above the threshold.
    pub above: Vec<(&'static str, f64)>,
    /// Readback must be below the threshold.
    pub below: Vec<(&'static str, f64)>,
}

impl Checklist {
    /// Walk every entry, reporting each violation. With `dry_run` the
    /// violations are warnings; otherwise the first one is returned as a
    /// [`ScriptError::PreconditionFailed`] after the full walk.
    pub fn verify(
        &self,
        registry: &DeviceRegistry,
        sink: &dyn EventSink,
        dry_run: bool,
    ) -> ScriptResult<()> {
        let mut first: Option<ScriptError> = None;
        let mut fail = |sink: &dyn EventSink, device: &str, expected: String, actual: String| {
            sink.message(&format!("{device} is {actual} when it should be {expected}!"), !dry_run);
            if first.is_none() {
                first = Some(ScriptError::PreconditionFailed {
                    device: device.to_string(),
                    expected,
                    actual,
                });
            }
        };

        for name in &self.on {
            let device = registry.get(name)?;
            let violated = if device.kind().is_valve() {
                device.is_closed()?
            } else {
                device.is_off()?
            };
            if violated {
                fail(sink, name, "on/open".into(), "off/closed".into());
            }
        }
        for name in &self.off {
            let device = registry.get(name)?;
            let violated = if device.kind().is_valve() {
                device.is_open()?
            } else {
                device.is_on()?
            };
            if violated {
                fail(sink, name, "off/closed".into(), "on/open".into());
            }
        }
        for (name, thresh) in &self.above {
            let device = registry.get(name)?;
            let value = device.readback()?;
            if value < *thresh {
                fail(sink, name, format!("above {thresh}"), format!("{value:.3}"));
            }
        }
        for (name, thresh) in &self.below {
            let device = registry.get(name)?;
            let value = device.readback()?;
            if value > *thresh {
                fail(sink, name, format!("below {thresh}"), format!("{value:.3}"));
            }
        }

        match first {
            None => {
                sink.message("All checks passed", false);
                Ok(())
            }
            Some(_) if dry_run => {
                sink.message("[dry-run] continuing despite failed checks", false);
                Ok(())
            }
            Some(err) => Err(err),
        }
    }
}
