//! Shared services handed to a running script.

use crate::error::{ScriptError, ScriptResult};
use cf_bus::{settings_dir, EventSink, SettingsStore, StoreExt, Value};
use cf_core::{converge, Clock, ConvergeOutcome, ConvergeSpec, Pacer};
use cf_device::{Device, DeviceRegistry};
use std::rc::Rc;

/// Seconds between condition polls in `wait`.
pub const WAIT_POLL_S: f64 = 60.0;
/// Minimum seconds between repeated "still waiting" log lines.
pub const WAIT_LOG_S: f64 = 900.0;
/// Timeout for convergent store writes.
pub const SET_TIMEOUT_S: f64 = 10.0;

/// Everything a script body needs: registry access, its settings subtree,
/// logging, and the blocking-wait primitives. The context belongs to one
/// named script; its flags (`enabled`, `dry_run`, `exit_with_error`) live
/// in the store so external components can observe and clear them.
pub struct ScriptContext {
    name: String,
    dir: String,
    registry: Rc<DeviceRegistry>,
    store: Rc<dyn SettingsStore>,
    sink: Rc<dyn EventSink>,
    clock: Rc<dyn Clock>,
}

impl ScriptContext {
    pub fn new(
        name: &str,
        registry: Rc<DeviceRegistry>,
        store: Rc<dyn SettingsStore>,
        sink: Rc<dyn EventSink>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let dir = settings_dir(name);
        store.set_default(&format!("{dir}/enabled"), Value::Bool(false));
        store.set_default(&format!("{dir}/dry_run"), Value::Bool(false));
        store.set_default(&format!("{dir}/exit_with_error"), Value::Bool(false));
        Self {
            name: name.to_string(),
            dir,
            registry,
            store,
            sink,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings_dir(&self) -> &str {
        &self.dir
    }

    pub fn store(&self) -> &Rc<dyn SettingsStore> {
        &self.store
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn log(&self, msg: &str, is_error: bool) {
        self.sink.message(msg, is_error);
    }

    pub fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }

    pub fn device(&self, name: &str) -> ScriptResult<Rc<Device>> {
        Ok(self.registry.get(name)?)
    }

    pub fn is_enabled(&self) -> bool {
        self.store.get_bool(&format!("{}/enabled", self.dir), false)
    }

    pub fn dry_run(&self) -> bool {
        self.store.get_bool(&format!("{}/dry_run", self.dir), false)
    }

    pub fn set_flag(&self, leaf: &str, value: bool) {
        self.store.set(&format!("{}/{leaf}", self.dir), Value::Bool(value));
    }

    // --- parameters ---------------------------------------------------

    pub fn param_f64(&self, name: &str, default: f64) -> f64 {
        self.store.get_f64(&format!("{}/{name}", self.dir), default)
    }

    pub fn param_bool(&self, name: &str, default: bool) -> bool {
        self.store.get_bool(&format!("{}/{name}", self.dir), default)
    }

    pub fn param_str(&self, name: &str, default: &str) -> String {
        self.store.get_str(&format!("{}/{name}", self.dir), default)
    }

    // --- blocking primitives ------------------------------------------

    /// Poll `condition` until it holds, yielding through the pacer between
    /// polls. The enable flag is observed every poll, so clearing it from
    /// outside cancels the wait. Re-logs `msg` at a bounded rate. Dry-run
    /// returns immediately.
    pub fn wait(
        &self,
        pacer: &mut dyn Pacer,
        mut condition: impl FnMut() -> ScriptResult<bool>,
        msg: &str,
    ) -> ScriptResult<()> {
        if self.dry_run() {
            self.log(&format!("[dry-run] not waiting: {msg}"), false);
            return Ok(());
        }
        let mut t_logged = f64::NEG_INFINITY;
        loop {
            if !self.is_enabled() {
                self.log(&format!("{} wait cancelled: {msg}", self.name), false);
                return Err(ScriptError::Cancelled);
            }
            if condition()? {
                return Ok(());
            }
            let now = self.clock.now_s();
            if now - t_logged > WAIT_LOG_S {
                t_logged = now;
                self.log(&format!("Condition not satisfied. Waiting: {msg}"), false);
            }
            if !pacer.pause(WAIT_POLL_S) {
                return Err(ScriptError::Cancelled);
            }
        }
    }

    /// Block until the device readback rises above `thresh`.
    pub fn wait_above(&self, pacer: &mut dyn Pacer, name: &str, thresh: f64) -> ScriptResult<()> {
        let device = self.device(name)?;
        let units = device.readback_units()?;
        if device.readback()? < thresh {
            self.log(
                &format!(
                    "Waiting for {} to rise above threshold {thresh} {units}, currently {:.2} {units}",
                    device.path(),
                    device.readback()?
                ),
                false,
            );
            let d = Rc::clone(&device);
            self.wait(
                pacer,
                move || Ok(d.readback()? >= thresh),
                &format!("{name} above {thresh}"),
            )?;
        }
        self.log(
            &format!(
                "{} ({:.2} {units}) satisfies threshold of {thresh} {units}",
                device.path(),
                device.readback()?
            ),
            false,
        );
        Ok(())
    }

    /// Block until the device readback drops below `thresh`.
    pub fn wait_below(&self, pacer: &mut dyn Pacer, name: &str, thresh: f64) -> ScriptResult<()> {
        let device = self.device(name)?;
        let units = device.readback_units()?;
        if device.readback()? > thresh {
            self.log(
                &format!(
                    "Waiting for {} to drop below threshold {thresh} {units}, currently {:.2} {units}",
                    device.path(),
                    device.readback()?
                ),
                false,
            );
            let d = Rc::clone(&device);
            self.wait(
                pacer,
                move || Ok(d.readback()? <= thresh),
                &format!("{name} below {thresh}"),
            )?;
        }
        self.log(
            &format!(
                "{} ({:.2} {units}) satisfies threshold of {thresh} {units}",
                device.path(),
                device.readback()?
            ),
            false,
        );
        Ok(())
    }

    /// Repeatedly write a store key until it reads back as set, or fail
    /// with [`ScriptError::SetTimeout`]. Dry-run logs only.
    pub fn set_value(
        &self,
        pacer: &mut dyn Pacer,
        path: &str,
        value: Value,
    ) -> ScriptResult<()> {
        if self.dry_run() {
            self.log(&format!("[dry-run] set {path} to {value}"), false);
            return Ok(());
        }
        let store = Rc::clone(&self.store);
        let outcome = converge(
            self.clock.as_ref(),
            pacer,
            ConvergeSpec {
                timeout_s: SET_TIMEOUT_S,
                poll_s: 1.0,
            },
            || {
                Ok::<_, ScriptError>(
                    store
                        .get(path)
                        .is_some_and(|current| current.approx_eq(&value)),
                )
            },
            || {
                store.set(path, value.clone());
                Ok(())
            },
        )?;
        match outcome {
            ConvergeOutcome::Converged => {
                self.log(&format!("Set {path} to {value}"), false);
                Ok(())
            }
            ConvergeOutcome::TimedOut => {
                let stuck = self
                    .store
                    .get(path)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "nothing".to_string());
                let err = ScriptError::SetTimeout {
                    path: path.to_string(),
                    timeout_s: SET_TIMEOUT_S,
                    stuck,
                };
                self.log(&err.to_string(), true);
                Err(err)
            }
            ConvergeOutcome::Cancelled => Err(ScriptError::Cancelled),
        }
    }
}
