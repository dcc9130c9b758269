//! Periodically ticked PID loop with guard checks and panic hysteresis.

use crate::error::{ControlError, ControlResult};
use crate::pid::Pid;
use crate::settings::LimitTable;
use cf_bus::{
    settings_dir, AlarmClass, EventSink, SettingsStore, StoreExt, Value, VarBus, WatchId,
};
use cf_core::Clock;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

/// Commanded output drifting further than this from the live readback means
/// someone else is driving the actuator.
const CTRL_TOLERANCE: f64 = 1.0;

/// Overpressure-style protective response: when the target reading crosses
/// `target_high_thresh`, the loop saves its output, drives the actuator to
/// `safe_output`, and suspends control. It resumes only after the reading is
/// back below threshold and `cooldown_s` has elapsed, restoring
/// `restore_fraction` of the saved output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanicSpec {
    pub target_high_thresh: f64,
    pub safe_output: f64,
    #[serde(default = "default_cooldown_s")]
    pub cooldown_s: f64,
    #[serde(default = "default_restore_fraction")]
    pub restore_fraction: f64,
}

fn default_cooldown_s() -> f64 {
    30.0
}

fn default_restore_fraction() -> f64 {
    0.8
}

/// Live readbacks the loop requires before it will command anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preconditions {
    /// These readbacks must stay below their threshold.
    pub thresh_off: Vec<(String, f64)>,
    /// These readbacks must stay above their threshold.
    pub thresh_on: Vec<(String, f64)>,
    /// These status flags must read 0.
    pub state_off: Vec<String>,
    /// These status flags must read 1.
    pub state_on: Vec<String>,
}

/// Default values seeded into the settings store on first start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDefaults {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub inverted_output: bool,
    pub target_setpoint: f64,
    pub time_step_s: f64,
    pub output_limit_low: f64,
    pub output_limit_high: f64,
    pub proportional_on_measurement: bool,
    pub derivative_on_measurement: bool,
    pub target_timeout_s: f64,
}

impl Default for LoopDefaults {
    fn default() -> Self {
        Self {
            p: 1.0,
            i: 0.0,
            d: 0.0,
            inverted_output: false,
            target_setpoint: 0.0,
            time_step_s: 10.0,
            output_limit_low: 0.0,
            output_limit_high: 1000.0,
            proportional_on_measurement: false,
            derivative_on_measurement: false,
            target_timeout_s: 30.0,
        }
    }
}

fn default_limits() -> BTreeMap<String, (f64, f64)> {
    [
        ("target_setpoint", (0.0, 1500.0)),
        ("time_step_s", (0.0, 500.0)),
        ("output_limit_low", (0.0, 1000.0)),
        ("output_limit_high", (0.0, 1000.0)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Static description of one control loop, loaded from the plant config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    pub name: String,
    /// Bus variable the loop writes (actuator setpoint).
    pub control_var: String,
    /// Bus variable the loop regulates toward the setpoint.
    pub target_var: String,
    #[serde(default)]
    pub preconditions: Preconditions,
    /// Write zero to the actuator whenever the loop disables itself.
    #[serde(default)]
    pub zero_on_disable: bool,
    /// Value to force on the actuator when a precondition check fails.
    #[serde(default)]
    pub ctrl_safe_value: Option<f64>,
    #[serde(default)]
    pub panic: Option<PanicSpec>,
    #[serde(default)]
    pub defaults: LoopDefaults,
    /// Hard bounds on tunable settings, key -> (low, high).
    #[serde(default = "default_limits")]
    pub limits: BTreeMap<String, (f64, f64)>,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Loop is disabled.
    Idle,
    /// Enabled but the time step has not elapsed yet.
    Waiting,
    /// Computed and commanded a new output.
    Stepped(f64),
    /// Suspended with the actuator at its safe output.
    Panicking,
}

type PendingSettings = Rc<RefCell<VecDeque<(String, Value)>>>;

/// One PID loop, ticked by the host at its own pace.
///
/// All tunables live in the settings store under the loop's equipment dir;
/// a single dispatch handler applies store changes between ticks. Guard
/// failures (precondition, actuator drift, stale target) disable the loop
/// through the store so the operator-visible flag always matches.
pub struct ControlLoop {
    spec: LoopSpec,
    dir: String,
    bus: Rc<dyn VarBus>,
    store: Rc<dyn SettingsStore>,
    sink: Rc<dyn EventSink>,
    clock: Rc<dyn Clock>,
    limits: LimitTable,
    pid: Pid,
    inverted: f64,
    time_step_s: f64,
    target_timeout_s: f64,
    enabled: bool,
    last_commanded: Option<f64>,
    t_last_step: Option<f64>,
    target_last: f64,
    t_target_last: f64,
    panicking: bool,
    t_panic: f64,
    saved_output: f64,
    pending: PendingSettings,
    watch: WatchId,
}

impl ControlLoop {
    pub fn new(
        spec: LoopSpec,
        bus: Rc<dyn VarBus>,
        store: Rc<dyn SettingsStore>,
        sink: Rc<dyn EventSink>,
        clock: Rc<dyn Clock>,
    ) -> ControlResult<Self> {
        let dir = settings_dir(&spec.name);
        let d = &spec.defaults;
        store.set_default(&format!("{dir}/enabled"), Value::Bool(false));
        store.set_default(&format!("{dir}/p"), Value::Float(d.p));
        store.set_default(&format!("{dir}/i"), Value::Float(d.i));
        store.set_default(&format!("{dir}/d"), Value::Float(d.d));
        store.set_default(
            &format!("{dir}/inverted_output"),
            Value::Bool(d.inverted_output),
        );
        store.set_default(
            &format!("{dir}/target_setpoint"),
            Value::Float(d.target_setpoint),
        );
        store.set_default(&format!("{dir}/time_step_s"), Value::Float(d.time_step_s));
        store.set_default(
            &format!("{dir}/output_limit_low"),
            Value::Float(d.output_limit_low),
        );
        store.set_default(
            &format!("{dir}/output_limit_high"),
            Value::Float(d.output_limit_high),
        );
        store.set_default(
            &format!("{dir}/proportional_on_measurement"),
            Value::Bool(d.proportional_on_measurement),
        );
        store.set_default(
            &format!("{dir}/derivative_on_measurement"),
            Value::Bool(d.derivative_on_measurement),
        );
        store.set_default(
            &format!("{dir}/target_timeout_s"),
            Value::Float(d.target_timeout_s),
        );
        // Identity keys are informational: forced to match the loaded config.
        store.set(
            &format!("{dir}/control_var"),
            Value::Str(spec.control_var.clone()),
        );
        store.set(
            &format!("{dir}/target_var"),
            Value::Str(spec.target_var.clone()),
        );

        let mut limits = LimitTable::new();
        for (key, (low, high)) in &spec.limits {
            limits = limits.with(key, *low, *high);
        }

        let pending: PendingSettings = Rc::new(RefCell::new(VecDeque::new()));
        let queue = Rc::clone(&pending);
        let watch = store.watch(
            &dir,
            Box::new(move |key, value| {
                queue.borrow_mut().push_back((key.to_string(), value.clone()));
            }),
        );

        let now = clock.now_s();
        let target_last = bus.get(&spec.target_var)?;
        let mut loop_ = Self {
            dir,
            bus,
            store,
            sink,
            clock,
            limits,
            pid: Pid::new(d.p, d.i, d.d, d.target_setpoint),
            inverted: 1.0,
            time_step_s: d.time_step_s,
            target_timeout_s: d.target_timeout_s,
            enabled: false,
            last_commanded: None,
            t_last_step: None,
            target_last,
            t_target_last: now,
            panicking: false,
            t_panic: 0.0,
            saved_output: 0.0,
            pending,
            watch,
            spec,
        };

        // A set enabled flag at startup is stale state from a crash.
        if loop_.store.get_bool(&format!("{}/enabled", loop_.dir), false) {
            loop_
                .sink
                .message(&format!("{} was enabled at startup", loop_.spec.name), false);
            loop_.disable()?;
        }
        loop_.reset_pid()?;
        Ok(loop_)
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn key(&self, leaf: &str) -> String {
        format!("{}/{leaf}", self.dir)
    }

    fn clamped(&self, leaf: &str, value: f64) -> f64 {
        self.limits
            .clamp(self.store.as_ref(), self.sink.as_ref(), &self.dir, leaf, value)
    }

    fn clamped_from_store(&self, leaf: &str, default: f64) -> f64 {
        let value = self.store.get_f64(&self.key(leaf), default);
        self.clamped(leaf, value)
    }

    /// Rebuild PID memory from the store, parking the output at the
    /// actuator's current position.
    fn reset_pid(&mut self) -> ControlResult<()> {
        let d = self.spec.defaults.clone();
        self.inverted = if self.store.get_bool(&self.key("inverted_output"), d.inverted_output) {
            -1.0
        } else {
            1.0
        };
        let mut pid = Pid::new(
            self.store.get_f64(&self.key("p"), d.p) * self.inverted,
            self.store.get_f64(&self.key("i"), d.i) * self.inverted,
            self.store.get_f64(&self.key("d"), d.d) * self.inverted,
            self.clamped_from_store("target_setpoint", d.target_setpoint),
        );
        pid.set_output_limits(
            self.clamped_from_store("output_limit_low", d.output_limit_low),
            self.clamped_from_store("output_limit_high", d.output_limit_high),
        )?;
        pid.proportional_on_measurement = self
            .store
            .get_bool(&self.key("proportional_on_measurement"), d.proportional_on_measurement);
        pid.derivative_on_measurement = self
            .store
            .get_bool(&self.key("derivative_on_measurement"), d.derivative_on_measurement);
        let start = self.bus.get(&self.spec.control_var)?;
        pid.reset(start);
        self.pid = pid;
        self.last_commanded = Some(start);
        self.t_last_step = None;
        self.time_step_s = self.clamped_from_store("time_step_s", d.time_step_s);
        self.target_timeout_s = self
            .store
            .get_f64(&self.key("target_timeout_s"), d.target_timeout_s);
        Ok(())
    }

    /// Disable through the store so the operator-visible flag stays true.
    pub fn disable(&mut self) -> ControlResult<()> {
        self.enabled = false;
        self.store.set(&self.key("enabled"), Value::Bool(false));
        self.last_commanded = None;
        self.panicking = false;
        if self.spec.zero_on_disable {
            self.bus.put(&self.spec.control_var, 0.0)?;
        }
        self.sink
            .message(&format!("{} has been disabled", self.spec.name), false);
        Ok(())
    }

    fn on_enabled(&mut self) -> ControlResult<()> {
        self.enabled = true;
        self.reset_pid()?;
        let (low, high) = self.pid.output_limits();
        self.sink.message(
            &format!(
                "{} has been enabled with settings: P={}, I={}, D={}, setpoint={}, \
                 limits=({low}, {high}), time_step_s={}, inverted={}",
                self.spec.name,
                self.pid.kp,
                self.pid.ki,
                self.pid.kd,
                self.pid.setpoint,
                self.time_step_s,
                self.inverted < 0.0,
            ),
            false,
        );
        Ok(())
    }

    /// Apply one changed setting. One dispatch point for every tunable.
    fn apply_setting(&mut self, leaf: &str, value: &Value) -> ControlResult<()> {
        match leaf {
            "enabled" => {
                let on = value.as_bool().unwrap_or(false);
                if on && !self.enabled {
                    self.on_enabled()?;
                } else if !on && self.enabled {
                    self.enabled = false;
                    self.last_commanded = None;
                    self.panicking = false;
                    self.sink
                        .message(&format!("{} has been disabled", self.spec.name), false);
                }
            }
            "p" | "i" | "d" => {
                if let Some(v) = value.as_f64() {
                    let signed = v * self.inverted;
                    match leaf {
                        "p" => self.pid.kp = signed,
                        "i" => self.pid.ki = signed,
                        _ => self.pid.kd = signed,
                    }
                    self.sink.message(
                        &format!("{} {} value changed to {signed}", self.spec.name, leaf.to_uppercase()),
                        false,
                    );
                }
            }
            "target_setpoint" => {
                if let Some(v) = value.as_f64() {
                    self.pid.setpoint = self.clamped(leaf, v);
                    self.sink.message(
                        &format!("{} setpoint changed to {}", self.spec.name, self.pid.setpoint),
                        false,
                    );
                }
            }
            "output_limit_low" | "output_limit_high" => {
                if let Some(v) = value.as_f64() {
                    let v = self.clamped(leaf, v);
                    let (low, high) = if leaf == "output_limit_low" {
                        (v, self.pid.output_limits().1)
                    } else {
                        (self.pid.output_limits().0, v)
                    };
                    self.pid.set_output_limits(low, high)?;
                    self.sink.message(
                        &format!("{} output limits changed to ({low}, {high})", self.spec.name),
                        false,
                    );
                }
            }
            "time_step_s" => {
                if let Some(v) = value.as_f64() {
                    self.time_step_s = self.clamped(leaf, v);
                    self.sink.message(
                        &format!("{} time step changed to {}", self.spec.name, self.time_step_s),
                        false,
                    );
                }
            }
            "inverted_output" => {
                if let Some(v) = value.as_bool() {
                    self.inverted = if v { -1.0 } else { 1.0 };
                    // Re-sign the gains from their stored magnitudes.
                    let d = &self.spec.defaults;
                    self.pid.kp = self.store.get_f64(&self.key("p"), d.p) * self.inverted;
                    self.pid.ki = self.store.get_f64(&self.key("i"), d.i) * self.inverted;
                    self.pid.kd = self.store.get_f64(&self.key("d"), d.d) * self.inverted;
                    self.sink.message(
                        &format!("{} inverted output state changed to {v}", self.spec.name),
                        false,
                    );
                }
            }
            "target_timeout_s" => {
                if let Some(v) = value.as_f64() {
                    self.target_timeout_s = v;
                    self.sink.message(
                        &format!("{} target timeout changed to {v} seconds", self.spec.name),
                        false,
                    );
                }
            }
            "control_var" | "target_var" => {
                let actual = if leaf == "control_var" {
                    &self.spec.control_var
                } else {
                    &self.spec.target_var
                };
                if value.as_str() != Some(actual.as_str()) {
                    self.store.set(&self.key(leaf), Value::Str(actual.clone()));
                    self.sink.message(
                        &format!("{} {leaf} is read-only", self.spec.name),
                        false,
                    );
                }
            }
            "proportional_on_measurement" => {
                if let Some(v) = value.as_bool() {
                    self.pid.proportional_on_measurement = v;
                    self.sink.message(
                        &format!("{} proportional_on_measurement changed to {v}", self.spec.name),
                        false,
                    );
                }
            }
            "derivative_on_measurement" => {
                if let Some(v) = value.as_bool() {
                    self.pid.derivative_on_measurement = v;
                    self.sink.message(
                        &format!("{} derivative_on_measurement changed to {v}", self.spec.name),
                        false,
                    );
                }
            }
            other => {
                tracing::debug!(loop_name = %self.spec.name, key = other, "ignoring setting");
            }
        }
        Ok(())
    }

    fn drain_settings(&mut self) -> ControlResult<()> {
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some((path, value)) = next else {
                return Ok(());
            };
            let leaf = path
                .strip_prefix(&self.dir)
                .map(|s| s.trim_start_matches('/'))
                .unwrap_or(&path)
                .to_string();
            self.apply_setting(&leaf, &value)?;
        }
    }

    fn check_preconditions(&self) -> ControlResult<bool> {
        let mut ok = true;
        let pre = &self.spec.preconditions;
        for (var, lim) in &pre.thresh_off {
            if self.bus.get(var)? > *lim {
                ok = false;
                self.sink.message(
                    &format!("{}: \"{var}\" is above threshold ({lim})", self.spec.name),
                    true,
                );
            }
        }
        for (var, lim) in &pre.thresh_on {
            if self.bus.get(var)? < *lim {
                ok = false;
                self.sink.message(
                    &format!("{}: \"{var}\" is below threshold ({lim})", self.spec.name),
                    true,
                );
            }
        }
        for var in &pre.state_off {
            if self.bus.get(var)? != 0.0 {
                ok = false;
                self.sink.message(
                    &format!(
                        "{}: \"{var}\" should not be in the ON state. Turn it OFF",
                        self.spec.name
                    ),
                    true,
                );
            }
        }
        for var in &pre.state_on {
            if self.bus.get(var)? == 0.0 {
                ok = false;
                self.sink.message(
                    &format!(
                        "{}: \"{var}\" should not be in the OFF state. Turn it ON",
                        self.spec.name
                    ),
                    true,
                );
            }
        }
        Ok(ok)
    }

    /// One pass through the guard chain and, if due, one PID step.
    pub fn tick(&mut self) -> ControlResult<TickOutcome> {
        self.drain_settings()?;
        if !self.enabled {
            return Ok(TickOutcome::Idle);
        }
        let now = self.clock.now_s();

        // Guards run in severity order; panic suppresses the device checks
        // since the plant is deliberately out of its operating envelope.
        if !self.panicking && !self.check_preconditions()? {
            if let Some(safe) = self.spec.ctrl_safe_value {
                self.bus.put(&self.spec.control_var, safe)?;
            }
            self.disable()?;
            self.sink.alarm(
                &self.spec.name,
                "failed device check, see messages",
                AlarmClass::Warning,
            );
            return Err(ControlError::PreconditionFailed {
                name: self.spec.name.clone(),
            });
        }

        if let Some(commanded) = self.last_commanded {
            let actual = self.bus.get(&self.spec.control_var)?;
            if (actual - commanded).abs() > CTRL_TOLERANCE {
                self.sink.alarm(
                    &self.spec.name,
                    &format!(
                        "\"{}\" setpoint ({actual:.0}) does not match previously set value \
                         ({commanded:.0}) - disabling {}",
                        self.spec.control_var, self.spec.name
                    ),
                    AlarmClass::Warning,
                );
                self.disable()?;
                return Err(ControlError::ActuatorMismatch {
                    var: self.spec.control_var.clone(),
                    commanded,
                    actual,
                });
            }
        }

        let target_val = self.bus.get(&self.spec.target_var)?;
        if target_val != self.target_last {
            self.target_last = target_val;
            self.t_target_last = now;
        } else if self.target_timeout_s > 0.0 && now - self.t_target_last > self.target_timeout_s {
            let stale_s = now - self.t_target_last;
            self.sink.alarm(
                &self.spec.name,
                &format!("\"{}\" timeout", self.spec.target_var),
                AlarmClass::Warning,
            );
            self.sink.message(
                &format!(
                    "\"{}\" timeout! Value read back has been {target_val} for the last \
                     {stale_s:.1} seconds",
                    self.spec.target_var
                ),
                true,
            );
            self.disable()?;
            return Err(ControlError::StaleTarget {
                var: self.spec.target_var.clone(),
                stale_s,
            });
        }

        if let Some(panic) = self.spec.panic.clone() {
            if target_val > panic.target_high_thresh {
                if !self.panicking {
                    self.saved_output = self.bus.get(&self.spec.control_var)?;
                    self.panicking = true;
                    self.last_commanded = None;
                    self.bus.put(&self.spec.control_var, panic.safe_output)?;
                    self.sink.message(
                        &format!(
                            "{}: \"{}\" too high! Driving \"{}\" to {}",
                            self.spec.name,
                            self.spec.target_var,
                            self.spec.control_var,
                            panic.safe_output
                        ),
                        true,
                    );
                }
                // Restamp while still above threshold: the cooldown counts
                // from the last excursion, not the first.
                self.t_panic = now;
                return Ok(TickOutcome::Panicking);
            }
            if self.panicking {
                if now - self.t_panic <= panic.cooldown_s {
                    return Ok(TickOutcome::Panicking);
                }
                let restored = self.saved_output * panic.restore_fraction;
                self.bus.put(&self.spec.control_var, restored)?;
                self.panicking = false;
                self.last_commanded = Some(restored);
                self.t_last_step = Some(now);
                self.sink.message(
                    &format!(
                        "{}: \"{}\" back under control, restoring \"{}\" to {restored:.1}",
                        self.spec.name, self.spec.target_var, self.spec.control_var
                    ),
                    false,
                );
                return Ok(TickOutcome::Waiting);
            }
        }

        let due = match self.t_last_step {
            None => true,
            Some(t0) => now - t0 >= self.time_step_s,
        };
        if due {
            let dt = self
                .t_last_step
                .map(|t0| now - t0)
                .unwrap_or(self.time_step_s);
            let out = self.pid.update(target_val, dt);
            self.bus.put(&self.spec.control_var, out)?;
            self.t_last_step = Some(now);
            self.last_commanded = Some(out);
            return Ok(TickOutcome::Stepped(out));
        }
        Ok(TickOutcome::Waiting)
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.store.unwatch(self.watch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_bus::{MemBus, MemSink, MemStore};
    use cf_core::ManualClock;

    const CTRL: &str = "PUR:HE3:HTR105:CUR";
    const TARGET: &str = "PUR:CRY:TS510:RDTEMPK";

    struct Rig {
        bus: Rc<MemBus>,
        store: Rc<MemStore>,
        sink: Rc<MemSink>,
        clock: Rc<ManualClock>,
        loop_: ControlLoop,
    }

    fn spec() -> LoopSpec {
        LoopSpec {
            name: "pid_pur_he70k".to_string(),
            control_var: CTRL.to_string(),
            target_var: TARGET.to_string(),
            preconditions: Preconditions::default(),
            zero_on_disable: false,
            ctrl_safe_value: None,
            panic: None,
            defaults: LoopDefaults {
                p: 2.0,
                target_setpoint: 70.0,
                time_step_s: 10.0,
                output_limit_low: 0.0,
                output_limit_high: 1000.0,
                target_timeout_s: 30.0,
                ..LoopDefaults::default()
            },
            limits: default_limits(),
        }
    }

    fn rig(spec: LoopSpec) -> Rig {
        let clock = Rc::new(ManualClock::starting_at(1000.0));
        let bus = Rc::new(MemBus::new(Rc::clone(&clock) as Rc<dyn Clock>));
        bus.insert(CTRL, 0.0);
        bus.insert(TARGET, 300.0);
        let store = Rc::new(MemStore::new());
        let sink = Rc::new(MemSink::new());
        let loop_ = ControlLoop::new(
            spec,
            Rc::clone(&bus) as Rc<dyn VarBus>,
            Rc::clone(&store) as Rc<dyn SettingsStore>,
            Rc::clone(&sink) as Rc<dyn EventSink>,
            Rc::clone(&clock) as Rc<dyn Clock>,
        )
        .unwrap();
        Rig {
            bus,
            store,
            sink,
            clock,
            loop_,
        }
    }

    fn enable(r: &mut Rig) {
        r.store
            .set("/equipment/pid_pur_he70k/settings/enabled", Value::Bool(true));
        // Pending until the next tick drains it.
        assert!(!r.loop_.is_enabled());
    }

    #[test]
    fn disabled_loop_is_idle() {
        let mut r = rig(spec());
        assert_eq!(r.loop_.tick().unwrap(), TickOutcome::Idle);
        assert_eq!(r.bus.peek(CTRL), Some(0.0));
    }

    #[test]
    fn enable_steps_immediately_then_waits() {
        let mut r = rig(spec());
        enable(&mut r);
        let out = match r.loop_.tick().unwrap() {
            TickOutcome::Stepped(out) => out,
            other => panic!("expected step, got {other:?}"),
        };
        // P-only: clamp(2 * (70 - 300)) = clamp(-460) = 0.
        assert_eq!(out, 0.0);
        assert!(r.sink.contains("has been enabled with settings"));
        // Second tick inside the same time step does nothing.
        r.clock.advance(1.0);
        r.bus.force(TARGET, 299.0);
        assert_eq!(r.loop_.tick().unwrap(), TickOutcome::Waiting);
    }

    #[test]
    fn output_respects_inversion() {
        let mut s = spec();
        s.defaults.inverted_output = true;
        let mut r = rig(s);
        enable(&mut r);
        // Inverted: clamp(-2 * (70 - 300)) = clamp(460) = 460.
        assert_eq!(r.loop_.tick().unwrap(), TickOutcome::Stepped(460.0));
        assert_eq!(r.bus.peek(CTRL), Some(460.0));
    }

    #[test]
    fn actuator_drift_disables() {
        let mut r = rig(spec());
        enable(&mut r);
        r.loop_.tick().unwrap();
        // Someone else drives the heater between ticks.
        r.bus.force(CTRL, 500.0);
        r.clock.advance(10.0);
        r.bus.force(TARGET, 299.0);
        let err = r.loop_.tick().unwrap_err();
        assert!(matches!(err, ControlError::ActuatorMismatch { .. }));
        assert!(!r.loop_.is_enabled());
        assert_eq!(
            r.store.get("/equipment/pid_pur_he70k/settings/enabled"),
            Some(Value::Bool(false))
        );
        assert_eq!(r.sink.alarm_count(), 1);
        // Disabled now: no further guard errors.
        assert_eq!(r.loop_.tick().unwrap(), TickOutcome::Idle);
    }

    #[test]
    fn stale_target_disables_once() {
        let mut r = rig(spec());
        enable(&mut r);
        r.loop_.tick().unwrap();
        // Target never updates; walk past the timeout.
        r.clock.advance(31.0);
        let err = r.loop_.tick().unwrap_err();
        assert!(matches!(err, ControlError::StaleTarget { .. }));
        assert!(r.sink.contains("timeout! Value read back"));
        assert_eq!(r.loop_.tick().unwrap(), TickOutcome::Idle);
    }

    #[test]
    fn zero_target_timeout_disables_staleness_check() {
        let mut s = spec();
        s.defaults.target_timeout_s = 0.0;
        let mut r = rig(s);
        enable(&mut r);
        r.loop_.tick().unwrap();
        r.clock.advance(1000.0);
        assert!(matches!(r.loop_.tick().unwrap(), TickOutcome::Stepped(_)));
    }

    #[test]
    fn precondition_failure_forces_safe_value() {
        let mut s = spec();
        s.preconditions.state_on = vec!["PUR:HE3:HTR105:STATON".to_string()];
        s.ctrl_safe_value = Some(0.0);
        let mut r = rig(s);
        r.bus.insert("PUR:HE3:HTR105:STATON", 0.0);
        r.bus.force(CTRL, 300.0);
        enable(&mut r);
        let err = r.loop_.tick().unwrap_err();
        assert!(matches!(err, ControlError::PreconditionFailed { .. }));
        assert_eq!(r.bus.peek(CTRL), Some(0.0));
        assert!(!r.loop_.is_enabled());
        assert!(r.sink.contains("should not be in the OFF state"));
    }

    #[test]
    fn panic_hysteresis() {
        let mut s = spec();
        s.panic = Some(PanicSpec {
            target_high_thresh: 350.0,
            safe_output: 100.0,
            cooldown_s: 30.0,
            restore_fraction: 0.8,
        });
        s.defaults.target_timeout_s = 0.0;
        let mut r = rig(s);
        r.bus.force(CTRL, 40.0);
        enable(&mut r);

        // Target spikes above threshold: output saved, safe value driven.
        r.bus.force(TARGET, 400.0);
        assert_eq!(r.loop_.tick().unwrap(), TickOutcome::Panicking);
        assert_eq!(r.bus.peek(CTRL), Some(100.0));

        // Back below threshold but inside the cooldown: still suspended.
        r.clock.advance(10.0);
        r.bus.force(TARGET, 300.0);
        assert_eq!(r.loop_.tick().unwrap(), TickOutcome::Panicking);
        assert_eq!(r.bus.peek(CTRL), Some(100.0));

        // Cooldown elapsed: restore 80% of the saved output.
        r.clock.advance(31.0);
        r.bus.force(TARGET, 299.0);
        assert_eq!(r.loop_.tick().unwrap(), TickOutcome::Waiting);
        assert_eq!(r.bus.peek(CTRL), Some(32.0));

        // Control resumes on the following step.
        r.clock.advance(10.0);
        r.bus.force(TARGET, 298.0);
        assert!(matches!(r.loop_.tick().unwrap(), TickOutcome::Stepped(_)));
    }

    #[test]
    fn panic_reentry_restamps_cooldown() {
        let mut s = spec();
        s.panic = Some(PanicSpec {
            target_high_thresh: 350.0,
            safe_output: 100.0,
            cooldown_s: 30.0,
            restore_fraction: 0.8,
        });
        s.defaults.target_timeout_s = 0.0;
        let mut r = rig(s);
        r.bus.force(CTRL, 40.0);
        enable(&mut r);

        r.bus.force(TARGET, 400.0);
        r.loop_.tick().unwrap();
        // Still above threshold 25 s later: the clock restarts.
        r.clock.advance(25.0);
        r.loop_.tick().unwrap();
        r.bus.force(TARGET, 300.0);
        // 25 s after the last excursion is inside the cooldown.
        r.clock.advance(25.0);
        assert_eq!(r.loop_.tick().unwrap(), TickOutcome::Panicking);
        // The saved output is the pre-panic one, not the safe value.
        r.clock.advance(10.0);
        r.bus.force(TARGET, 299.0);
        r.loop_.tick().unwrap();
        assert_eq!(r.bus.peek(CTRL), Some(32.0));
    }

    #[test]
    fn settings_changes_apply_between_ticks() {
        let mut r = rig(spec());
        enable(&mut r);
        r.loop_.tick().unwrap();
        r.store
            .set("/equipment/pid_pur_he70k/settings/p", Value::Float(5.0));
        r.store.set(
            "/equipment/pid_pur_he70k/settings/target_setpoint",
            Value::Float(400.0),
        );
        r.clock.advance(10.0);
        r.bus.force(TARGET, 299.0);
        // P=5, setpoint=400: clamp(5 * (400 - 299)) = 505.
        assert_eq!(r.loop_.tick().unwrap(), TickOutcome::Stepped(505.0));
        assert!(r.sink.contains("P value changed to 5"));
    }

    #[test]
    fn setpoint_clamped_to_limit_table() {
        let mut r = rig(spec());
        r.store.set(
            "/equipment/pid_pur_he70k/settings/target_setpoint",
            Value::Float(9000.0),
        );
        r.loop_.tick().unwrap();
        assert!(r.sink.contains("too high"));
        assert_eq!(
            r.store.get("/equipment/pid_pur_he70k/settings/target_setpoint"),
            Some(Value::Float(1500.0))
        );
    }

    #[test]
    fn identity_keys_are_read_only() {
        let mut r = rig(spec());
        r.store.set(
            "/equipment/pid_pur_he70k/settings/control_var",
            Value::Str("PUR:HE3:HTR999:CUR".to_string()),
        );
        r.loop_.tick().unwrap();
        assert!(r.sink.contains("control_var is read-only"));
        assert_eq!(
            r.store.get("/equipment/pid_pur_he70k/settings/control_var"),
            Some(Value::Str(CTRL.to_string()))
        );
    }

    #[test]
    fn zero_on_disable_zeroes_actuator() {
        let mut s = spec();
        s.zero_on_disable = true;
        let mut r = rig(s);
        enable(&mut r);
        r.loop_.tick().unwrap();
        r.bus.force(CTRL, 400.0);
        r.clock.advance(10.0);
        r.bus.force(TARGET, 299.0);
        assert!(r.loop_.tick().is_err());
        assert_eq!(r.bus.peek(CTRL), Some(0.0));
    }
}
