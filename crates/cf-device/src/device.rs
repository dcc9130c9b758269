//! One physical instrument as an object.

use crate::error::{DeviceError, DeviceResult};
use crate::kind::DeviceKind;
use cf_bus::{EventSink, VarBus};
use cf_core::{converge, Clock, ConvergeOutcome, ConvergeSpec, Pacer};
use std::rc::Rc;

/// A physical instrument exposed as a small set of named bus variables.
///
/// Mutating operations (`on`, `off`, `open`, `close`, `set`) drive the
/// hardware until the status readback confirms the change or the shared
/// timeout elapses; all of them run a health check first and poll through
/// the caller's [`Pacer`] so they stay cancellable. In dry-run mode they
/// log and do nothing. Queries never mutate.
pub struct Device {
    path: String,
    kind: DeviceKind,
    bus: Rc<dyn VarBus>,
    sink: Rc<dyn EventSink>,
    clock: Rc<dyn Clock>,
    timeout_s: f64,
    dry_run: bool,
}

impl Device {
    /// Connect to every variable behind the instrument.
    ///
    /// Any unreachable variable is a fatal [`DeviceError::ConnectionFailure`],
    /// dry-run or not: a device that cannot be observed cannot be simulated
    /// safely either.
    pub fn connect(
        path: impl Into<String>,
        kind: DeviceKind,
        bus: Rc<dyn VarBus>,
        sink: Rc<dyn EventSink>,
        clock: Rc<dyn Clock>,
        timeout_s: f64,
        dry_run: bool,
    ) -> DeviceResult<Self> {
        let path = path.into();
        let device = Self {
            path,
            kind,
            bus,
            sink,
            clock,
            timeout_s,
            dry_run,
        };
        for var in device.kind.all_vars() {
            let full = device.var(var);
            if !device.bus.connected(&full) {
                return Err(DeviceError::ConnectionFailure {
                    device: device.path.clone(),
                    var: full,
                });
            }
        }
        tracing::debug!(device = %device.path, kind = device.kind.label(), "connected");
        Ok(device)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    fn var(&self, suffix: &str) -> String {
        format!("{}:{}", self.path, suffix)
    }

    fn log(&self, msg: &str, is_error: bool) {
        self.sink.message(msg, is_error);
    }

    fn flag(&self, suffix: &str) -> DeviceResult<bool> {
        Ok(self.bus.get(&self.var(suffix))? != 0.0)
    }

    // --- queries ------------------------------------------------------

    pub fn is_on(&self) -> DeviceResult<bool> {
        self.flag("STATON")
    }

    pub fn is_off(&self) -> DeviceResult<bool> {
        Ok(!self.is_on()?)
    }

    /// Interlock status is active-low on the bus.
    pub fn is_interlocked(&self) -> DeviceResult<bool> {
        Ok(!self.flag("STATINT")?)
    }

    pub fn is_bypassed(&self) -> DeviceResult<bool> {
        self.flag("STATBYP")
    }

    pub fn is_timeout(&self) -> DeviceResult<bool> {
        self.flag("STATTMO")
    }

    pub fn is_driven(&self) -> DeviceResult<bool> {
        self.flag("STATDRV")
    }

    pub fn is_open(&self) -> DeviceResult<bool> {
        if self.kind.normally_open() {
            self.is_off()
        } else {
            self.is_on()
        }
    }

    pub fn is_closed(&self) -> DeviceResult<bool> {
        Ok(!self.is_open()?)
    }

    pub fn is_auto(&self) -> DeviceResult<bool> {
        let var = self.kind.auto_var().ok_or_else(|| DeviceError::NoReadback {
            device: self.path.clone(),
        })?;
        Ok(self.bus.get(&self.var(var))? != 0.0)
    }

    pub fn readback(&self) -> DeviceResult<f64> {
        let var = self.readback_var()?;
        Ok(self.bus.get(&var)?)
    }

    pub fn readback_units(&self) -> DeviceResult<String> {
        let var = self.readback_var()?;
        Ok(self.bus.info(&var)?.units)
    }

    pub fn setpoint(&self) -> DeviceResult<f64> {
        let var = self.setpoint_var()?;
        Ok(self.bus.get(&var)?)
    }

    pub fn setpoint_units(&self) -> DeviceResult<String> {
        let var = self.setpoint_var()?;
        Ok(self.bus.info(&var)?.units)
    }

    fn readback_var(&self) -> DeviceResult<String> {
        self.kind
            .readback_var()
            .map(|s| self.var(s))
            .ok_or_else(|| DeviceError::NoReadback {
                device: self.path.clone(),
            })
    }

    fn setpoint_var(&self) -> DeviceResult<String> {
        self.kind
            .setpoint_var()
            .map(|s| self.var(s))
            .ok_or_else(|| DeviceError::NoSetpoint {
                device: self.path.clone(),
            })
    }

    // --- health -------------------------------------------------------

    /// Pulse the hardware reset button.
    pub fn reset(&self) -> DeviceResult<()> {
        if self.dry_run {
            self.log(&format!("[dry-run] {} reset", self.path), false);
            return Ok(());
        }
        self.bus.put(&self.var("RST"), 1.0)?;
        self.log(&format!("{} reset", self.path), false);
        Ok(())
    }

    /// Refuse to operate an interlocked device; try to reset a timed-out
    /// one, escalating if the timeout flag survives the reset attempts.
    pub fn healthcheck(&self, pacer: &mut dyn Pacer) -> DeviceResult<()> {
        if !self.kind.has_switch() {
            return Ok(());
        }

        if self.is_interlocked()? && !self.is_bypassed()? {
            let msg = format!("{} is interlocked", self.path);
            self.log(&msg, true);
            return Err(DeviceError::Interlocked {
                device: self.path.clone(),
            });
        }

        if self.kind == DeviceKind::TurboPump {
            if self.flag("STATPTMO")? {
                let msg = format!("{} shows pump has timed out", self.path);
                self.log(&msg, true);
                return Err(DeviceError::DeviceTimeout {
                    device: self.path.clone(),
                });
            }
            if self.flag("STATFLT")? {
                let msg = format!("{} shows pump has faulted", self.path);
                self.log(&msg, true);
                return Err(DeviceError::Faulted {
                    device: self.path.clone(),
                });
            }
        }

        if self.is_timeout()? {
            self.log(&format!("{} has timed out, resetting", self.path), false);
            let outcome = converge(
                self.clock.as_ref(),
                pacer,
                ConvergeSpec {
                    timeout_s: self.timeout_s,
                    poll_s: self.kind.settle_s(),
                },
                || Ok(!self.is_timeout()?),
                || self.reset(),
            )?;
            match outcome {
                ConvergeOutcome::Converged => {
                    self.log(&format!("reset of {} successful", self.path), false);
                }
                ConvergeOutcome::TimedOut => {
                    let msg =
                        format!("{} has timed out and is unresponsive to reset", self.path);
                    self.log(&msg, true);
                    return Err(DeviceError::DeviceTimeout {
                        device: self.path.clone(),
                    });
                }
                ConvergeOutcome::Cancelled => {
                    return Err(DeviceError::Cancelled {
                        device: self.path.clone(),
                        op: "healthcheck",
                    });
                }
            }
        }
        Ok(())
    }

    // --- actuation ----------------------------------------------------

    fn switch(&self, pacer: &mut dyn Pacer, target_on: bool, op: &'static str) -> DeviceResult<()> {
        if !self.kind.has_switch() {
            return Err(DeviceError::NotSwitchable {
                device: self.path.clone(),
            });
        }
        self.healthcheck(pacer)?;

        if self.dry_run {
            self.log(&format!("[dry-run] {} {}", self.path, op), false);
            return Ok(());
        }

        let drive = if target_on { "DRVON" } else { "DRVOFF" };
        let outcome = converge(
            self.clock.as_ref(),
            pacer,
            ConvergeSpec {
                timeout_s: self.timeout_s,
                poll_s: self.kind.settle_s(),
            },
            || Ok(self.is_on()? == target_on),
            || Ok::<_, DeviceError>(self.bus.put(&self.var(drive), 1.0)?),
        )?;
        match outcome {
            ConvergeOutcome::Converged => {
                self.log(&format!("{} {}", self.path, op), false);
                Ok(())
            }
            ConvergeOutcome::TimedOut => {
                let msg = format!("{} timeout while trying to {}", self.path, op);
                self.log(&msg, true);
                Err(DeviceError::OperationTimeout {
                    device: self.path.clone(),
                    op,
                })
            }
            ConvergeOutcome::Cancelled => Err(DeviceError::Cancelled {
                device: self.path.clone(),
                op,
            }),
        }
    }

    pub fn on(&self, pacer: &mut dyn Pacer) -> DeviceResult<()> {
        self.switch(pacer, true, "turn on")
    }

    pub fn off(&self, pacer: &mut dyn Pacer) -> DeviceResult<()> {
        self.switch(pacer, false, "turn off")
    }

    /// Open the valve, inverting the drive for normally-open valves.
    pub fn open(&self, pacer: &mut dyn Pacer) -> DeviceResult<()> {
        self.switch(pacer, !self.kind.normally_open(), "open")
    }

    pub fn close(&self, pacer: &mut dyn Pacer) -> DeviceResult<()> {
        self.switch(pacer, self.kind.normally_open(), "close")
    }

    /// Command the setpoint and confirm it reads back, validating against
    /// hardware control limits before anything is written.
    pub fn set(&self, pacer: &mut dyn Pacer, value: f64) -> DeviceResult<()> {
        let sp = self.setpoint_var()?;
        self.healthcheck(pacer)?;

        let info = self.bus.info(&sp)?;
        if value < info.lower_ctrl_limit || value > info.upper_ctrl_limit {
            let msg = format!(
                "refusing setpoint {} for {}: outside limits ({}, {})",
                value, self.path, info.lower_ctrl_limit, info.upper_ctrl_limit
            );
            self.log(&msg, true);
            return Err(DeviceError::OutOfRange {
                device: self.path.clone(),
                value,
                lower: info.lower_ctrl_limit,
                upper: info.upper_ctrl_limit,
            });
        }

        if self.dry_run {
            self.log(
                &format!("[dry-run] {} set to {} {}", self.path, value, info.units),
                false,
            );
            return Ok(());
        }

        let outcome = converge(
            self.clock.as_ref(),
            pacer,
            ConvergeSpec {
                timeout_s: self.timeout_s,
                poll_s: self.kind.settle_s(),
            },
            || {
                let read = self.bus.get(&sp)?;
                Ok((read - value).abs() <= 1e-9 * value.abs().max(1.0))
            },
            || Ok::<_, DeviceError>(self.bus.put(&sp, value)?),
        )?;
        match outcome {
            ConvergeOutcome::Converged => {
                self.log(
                    &format!("{} set to {} {}", sp, value, info.units),
                    false,
                );
                Ok(())
            }
            ConvergeOutcome::TimedOut => {
                let msg = format!("{} timed out while setting setpoint", self.path);
                self.log(&msg, true);
                Err(DeviceError::OperationTimeout {
                    device: self.path.clone(),
                    op: "set",
                })
            }
            ConvergeOutcome::Cancelled => Err(DeviceError::Cancelled {
                device: self.path.clone(),
                op: "set",
            }),
        }
    }

    /// Toggle the hardware auto-control mode off so an external loop can
    /// drive the setpoint directly.
    pub fn disable_auto(&self, pacer: &mut dyn Pacer) -> DeviceResult<()> {
        self.set_auto(pacer, false)
    }

    pub fn enable_auto(&self, pacer: &mut dyn Pacer) -> DeviceResult<()> {
        self.set_auto(pacer, true)
    }

    fn set_auto(&self, pacer: &mut dyn Pacer, target: bool) -> DeviceResult<()> {
        // Only heaters have a CMD toggle for the auto-control mode.
        if !matches!(
            self.kind,
            DeviceKind::Heater | DeviceKind::HeaterCalibrated
        ) {
            return Err(DeviceError::NotSwitchable {
                device: self.path.clone(),
            });
        }
        let auto = self.kind.auto_var().ok_or_else(|| DeviceError::NotSwitchable {
            device: self.path.clone(),
        })?;
        self.healthcheck(pacer)?;

        if self.dry_run {
            self.log(
                &format!("[dry-run] {} autocontrol -> {}", self.path, target),
                false,
            );
            return Ok(());
        }

        let auto = self.var(auto);
        let op: &'static str = if target {
            "enable autocontrol"
        } else {
            "disable autocontrol"
        };
        let outcome = converge(
            self.clock.as_ref(),
            pacer,
            ConvergeSpec {
                timeout_s: self.timeout_s,
                poll_s: self.kind.settle_s(),
            },
            || Ok((self.bus.get(&auto)? != 0.0) == target),
            || Ok::<_, DeviceError>(self.bus.put(&self.var("CMD"), 1.0)?),
        )?;
        match outcome {
            ConvergeOutcome::Converged => {
                self.log(&format!("{} {}d", self.path, op), false);
                Ok(())
            }
            ConvergeOutcome::TimedOut => {
                let msg = format!("{} timeout while trying to {}", self.path, op);
                self.log(&msg, true);
                Err(DeviceError::OperationTimeout {
                    device: self.path.clone(),
                    op,
                })
            }
            ConvergeOutcome::Cancelled => Err(DeviceError::Cancelled {
                device: self.path.clone(),
                op,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_bus::{MemBus, MemSink};
    use cf_core::{FnPacer, ManualClock, NullPacer};

    struct Rig {
        bus: Rc<MemBus>,
        sink: Rc<MemSink>,
        clock: Rc<ManualClock>,
        device: Device,
    }

    fn rig(path: &str, kind: DeviceKind) -> Rig {
        let clock = Rc::new(ManualClock::new());
        let bus = Rc::new(MemBus::new(Rc::clone(&clock) as Rc<dyn Clock>));
        for var in kind.all_vars() {
            bus.insert(&format!("{path}:{var}"), 0.0);
        }
        // Healthy state: interlock is active-low.
        if kind.has_switch() {
            bus.force(&format!("{path}:STATINT"), 1.0);
        }
        let sink = Rc::new(MemSink::new());
        let device = Device::connect(
            path,
            kind,
            Rc::clone(&bus) as Rc<dyn VarBus>,
            Rc::clone(&sink) as Rc<dyn EventSink>,
            Rc::clone(&clock) as Rc<dyn Clock>,
            10.0,
            false,
        )
        .unwrap();
        Rig {
            bus,
            sink,
            clock,
            device,
        }
    }

    #[test]
    fn connect_fails_on_missing_var() {
        let clock = Rc::new(ManualClock::new());
        let bus = Rc::new(MemBus::new(Rc::clone(&clock) as Rc<dyn Clock>));
        bus.insert("PUR:CRY:TS510:RDTEMPK", 4.2);
        bus.mark_disconnected("PUR:CRY:TS510:RDTEMPK");
        let err = Device::connect(
            "PUR:CRY:TS510",
            DeviceKind::TempSensor,
            Rc::clone(&bus) as Rc<dyn VarBus>,
            Rc::new(MemSink::new()),
            clock,
            10.0,
            false,
        )
        .err()
        .unwrap();
        assert!(matches!(err, DeviceError::ConnectionFailure { .. }));
    }

    #[test]
    fn valve_open_close_polarity() {
        let r = rig("PUR:HE4:AV203", DeviceKind::ValveNormOpen);
        // De-energized, so the valve is already open.
        assert!(r.device.is_open().unwrap());
        // Closing a normally-open valve energizes it.
        let bus = Rc::clone(&r.bus);
        let mut pacer = FnPacer(|_dt| {
            bus.force("PUR:HE4:AV203:STATON", 1.0);
            true
        });
        r.device.close(&mut pacer).unwrap();
        assert!(r.device.is_closed().unwrap());
        assert_eq!(r.bus.peek("PUR:HE4:AV203:DRVON"), Some(1.0));
    }

    #[test]
    fn switch_times_out_when_status_never_settles() {
        let r = rig("PUR:HE3:AV105", DeviceKind::ValveNormClosed);
        let clock = Rc::clone(&r.clock);
        let mut pacer = FnPacer(move |dt| {
            clock.advance(dt);
            true
        });
        let err = r.device.open(&mut pacer).unwrap_err();
        assert!(matches!(err, DeviceError::OperationTimeout { op: "open", .. }));
        assert!(r.sink.error_count() > 0);
    }

    #[test]
    fn interlocked_device_refuses_to_switch() {
        let r = rig("PUR:HE3:AV105", DeviceKind::ValveNormClosed);
        r.bus.force("PUR:HE3:AV105:STATINT", 0.0);
        let err = r.device.on(&mut NullPacer).unwrap_err();
        assert!(matches!(err, DeviceError::Interlocked { .. }));
        // Nothing was driven.
        assert_eq!(r.bus.peek("PUR:HE3:AV105:DRVON"), Some(0.0));
    }

    #[test]
    fn bypassed_interlock_is_ignored() {
        let r = rig("PUR:HE3:AV105", DeviceKind::ValveNormClosed);
        r.bus.force("PUR:HE3:AV105:STATINT", 0.0);
        r.bus.force("PUR:HE3:AV105:STATBYP", 1.0);
        let bus = Rc::clone(&r.bus);
        let mut pacer = FnPacer(|_dt| {
            bus.force("PUR:HE3:AV105:STATON", 1.0);
            true
        });
        r.device.on(&mut pacer).unwrap();
    }

    #[test]
    fn timeout_flag_clears_after_reset() {
        let r = rig("PUR:HE3:AV105", DeviceKind::ValveNormClosed);
        r.bus.force("PUR:HE3:AV105:STATTMO", 1.0);
        let bus = Rc::clone(&r.bus);
        let mut pacer = FnPacer(|_dt| {
            // Reset pulse takes effect while we wait.
            if bus.peek("PUR:HE3:AV105:RST") == Some(1.0) {
                bus.force("PUR:HE3:AV105:STATTMO", 0.0);
            }
            bus.force("PUR:HE3:AV105:STATON", 1.0);
            true
        });
        r.device.on(&mut pacer).unwrap();
        assert!(r.sink.contains("reset of PUR:HE3:AV105 successful"));
    }

    #[test]
    fn stuck_timeout_flag_escalates() {
        let r = rig("PUR:HE3:AV105", DeviceKind::ValveNormClosed);
        r.bus.force("PUR:HE3:AV105:STATTMO", 1.0);
        let clock = Rc::clone(&r.clock);
        let mut pacer = FnPacer(move |dt| {
            clock.advance(dt);
            true
        });
        let err = r.device.healthcheck(&mut pacer).unwrap_err();
        assert!(matches!(err, DeviceError::DeviceTimeout { .. }));
        assert!(r.sink.contains("unresponsive to reset"));
    }

    #[test]
    fn pump_fault_flag_is_fatal() {
        let r = rig("PUR:HE3:TP101", DeviceKind::TurboPump);
        r.bus.force("PUR:HE3:TP101:STATFLT", 1.0);
        let err = r.device.healthcheck(&mut NullPacer).unwrap_err();
        assert!(matches!(err, DeviceError::Faulted { .. }));
    }

    #[test]
    fn set_refuses_out_of_range_before_writing() {
        let r = rig("PUR:HE3:HTR105", DeviceKind::Heater);
        r.bus
            .insert_with_limits("PUR:HE3:HTR105:CUR", 0.0, 0.0, 2.0, "A");
        let err = r.device.set(&mut NullPacer, 5.0).unwrap_err();
        assert!(matches!(err, DeviceError::OutOfRange { value, .. } if value == 5.0));
        assert_eq!(r.bus.peek("PUR:HE3:HTR105:CUR"), Some(0.0));
    }

    #[test]
    fn set_converges_on_readback() {
        let r = rig("PUR:HE3:HTR105", DeviceKind::Heater);
        r.bus
            .insert_with_limits("PUR:HE3:HTR105:CUR", 0.0, 0.0, 2.0, "A");
        let mut pacer = FnPacer(|_dt| true);
        r.device.set(&mut pacer, 1.5).unwrap();
        assert_eq!(r.bus.peek("PUR:HE3:HTR105:CUR"), Some(1.5));
        assert!(r.sink.contains("set to 1.5 A"));
    }

    #[test]
    fn sensor_has_no_setpoint() {
        let r = rig("PUR:CRY:TS510", DeviceKind::TempSensor);
        let err = r.device.set(&mut NullPacer, 4.2).unwrap_err();
        assert!(matches!(err, DeviceError::NoSetpoint { .. }));
        assert!(matches!(
            r.device.on(&mut NullPacer).unwrap_err(),
            DeviceError::NotSwitchable { .. }
        ));
    }

    #[test]
    fn cancel_during_switch() {
        let r = rig("PUR:HE3:AV105", DeviceKind::ValveNormClosed);
        let mut pacer = FnPacer(|_dt| false);
        let err = r.device.open(&mut pacer).unwrap_err();
        assert!(matches!(err, DeviceError::Cancelled { .. }));
    }

    #[test]
    fn dry_run_logs_without_writing() {
        let clock = Rc::new(ManualClock::new());
        let bus = Rc::new(MemBus::new(Rc::clone(&clock) as Rc<dyn Clock>));
        for var in DeviceKind::Heater.all_vars() {
            bus.insert(&format!("PUR:HE3:HTR105:{var}"), 0.0);
        }
        bus.force("PUR:HE3:HTR105:STATINT", 1.0);
        let sink = Rc::new(MemSink::new());
        let device = Device::connect(
            "PUR:HE3:HTR105",
            DeviceKind::Heater,
            Rc::clone(&bus) as Rc<dyn VarBus>,
            Rc::clone(&sink) as Rc<dyn EventSink>,
            clock,
            10.0,
            true,
        )
        .unwrap();
        device.on(&mut NullPacer).unwrap();
        device.set(&mut NullPacer, 1.0).unwrap();
        assert_eq!(bus.peek("PUR:HE3:HTR105:DRVON"), Some(0.0));
        assert_eq!(bus.peek("PUR:HE3:HTR105:CUR"), Some(0.0));
        assert!(sink.contains("[dry-run]"));
    }

    #[test]
    fn auto_toggle_only_for_heaters() {
        let r = rig("PUR:HE3:AV105", DeviceKind::ValveNormClosed);
        assert!(matches!(
            r.device.disable_auto(&mut NullPacer).unwrap_err(),
            DeviceError::NotSwitchable { .. }
        ));

        let h = rig("PUR:HE4:HTR208", DeviceKind::HeaterCalibrated);
        h.bus.force("PUR:HE4:HTR208:STATLOC", 1.0);
        let bus = Rc::clone(&h.bus);
        let mut pacer = FnPacer(|_dt| {
            if bus.peek("PUR:HE4:HTR208:CMD") == Some(1.0) {
                bus.force("PUR:HE4:HTR208:STATLOC", 0.0);
            }
            true
        });
        h.device.disable_auto(&mut pacer).unwrap();
    }
}
