//! The purifier's operating procedures.
//!
//! Plant roles referenced below: AV024/AV025/AV026 are the supply,
//! recovery, and exhaust isolation valves; AV105 the circulation inlet;
//! AV203 the circulation bypass; FPV201 the vent proportional valve;
//! TP101 the insulation vacuum pump; HTR105 the cold-head trim heater
//! (driven by the `pid_pur_he70k` loop against TS510); HTR208 the
//! temperature-calibrated regeneration heater; PT206 and FM208 the He
//! pressure and flow readbacks.

use crate::context::ScriptContext;
use crate::error::{ScriptError, ScriptResult};
use crate::{Checklist, Script};
use cf_bus::Value;
use cf_core::Pacer;

/// Settings path of a control loop's enable flag.
fn loop_enabled_key(name: &str) -> String {
    format!("{}/enabled", cf_bus::settings_dir(name))
}

const COLD_HEAD_LOOP: &str = "pid_pur_he70k";

/// What "stop circulation" does when the trap turns out to be clogged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClogPolicy {
    /// Hard failure: leave the plant in the safe-exit state and flag the
    /// error so the sequencer stops.
    Fail,
    /// Soft recovery: reroute the remaining gas through the bypass valve
    /// and finish normally.
    Reroute,
}

impl ClogPolicy {
    pub fn parse(s: &str) -> ScriptResult<Self> {
        match s {
            "fail" => Ok(ClogPolicy::Fail),
            "reroute" => Ok(ClogPolicy::Reroute),
            other => Err(ScriptError::BadParam {
                name: "clog_policy",
                why: format!("expected \"fail\" or \"reroute\", got \"{other}\""),
            }),
        }
    }
}

/// Cool the purifier cold head down to operating temperature and hand
/// regulation to the cold-head loop.
#[derive(Default)]
pub struct StartCooling {
    state: Option<&'static str>,
}

impl Script for StartCooling {
    fn name(&self) -> &'static str {
        "start_cooling"
    }

    fn checklist(&self) -> Checklist {
        Checklist {
            off: vec!["AV105"],
            below: vec![("PT206", 1300.0)],
            ..Checklist::default()
        }
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["temperature_k"]
    }

    fn run_state(&self) -> Option<&'static str> {
        self.state
    }

    fn run(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        let temperature_k = cx.param_f64("temperature_k", 45.0);
        self.state = Some("cooling");

        cx.device("AV024")?.open(pacer)?;
        cx.device("TP101")?.on(pacer)?;
        cx.wait_below(pacer, "TS510", temperature_k)?;

        // Cold enough: the loop takes over holding the setpoint.
        let loop_dir = cf_bus::settings_dir(COLD_HEAD_LOOP);
        cx.set_value(
            pacer,
            &format!("{loop_dir}/target_setpoint"),
            Value::Float(temperature_k),
        )?;
        cx.set_value(pacer, &loop_enabled_key(COLD_HEAD_LOOP), Value::Bool(true))?;

        self.state = None;
        Ok(())
    }

    fn safe_exit(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        cx.store()
            .set(&loop_enabled_key(COLD_HEAD_LOOP), Value::Bool(false));
        cx.device("TP101")?.off(pacer)?;
        cx.device("AV024")?.close(pacer)?;
        self.state = None;
        Ok(())
    }
}

/// Stop cooling: release the cold-head loop, zero the trim heater, and
/// isolate the supply.
#[derive(Default)]
pub struct StopCooling {
    state: Option<&'static str>,
}

impl Script for StopCooling {
    fn name(&self) -> &'static str {
        "stop_cooling"
    }

    fn run_state(&self) -> Option<&'static str> {
        self.state
    }

    fn run(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        self.state = Some("warming");
        cx.set_value(pacer, &loop_enabled_key(COLD_HEAD_LOOP), Value::Bool(false))?;
        cx.device("HTR105")?.set(pacer, 0.0)?;
        cx.device("HTR105")?.off(pacer)?;
        cx.device("TP101")?.off(pacer)?;
        cx.device("AV024")?.close(pacer)?;
        self.state = None;
        Ok(())
    }

    fn safe_exit(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        cx.device("TP101")?.off(pacer)?;
        cx.device("AV024")?.close(pacer)?;
        self.state = None;
        Ok(())
    }
}

/// Admit gas and establish flow through the cold trap.
#[derive(Default)]
pub struct StartCirculation {
    state: Option<&'static str>,
}

impl Script for StartCirculation {
    fn name(&self) -> &'static str {
        "start_circulation"
    }

    fn checklist(&self) -> Checklist {
        Checklist {
            on: vec!["AV024"],
            off: vec!["AV203"],
            below: vec![("TS510", 60.0)],
            ..Checklist::default()
        }
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["flow_target", "vent_position"]
    }

    fn run_state(&self) -> Option<&'static str> {
        self.state
    }

    fn run(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        let flow_target = cx.param_f64("flow_target", 1.0);
        let vent_position = cx.param_f64("vent_position", 20.0);
        self.state = Some("circulating");

        cx.device("AV105")?.open(pacer)?;
        cx.device("FPV201")?.set(pacer, vent_position)?;
        cx.wait_above(pacer, "FM208", flow_target)?;

        self.state = None;
        Ok(())
    }

    fn safe_exit(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        cx.device("AV105")?.close(pacer)?;
        cx.device("FPV201")?.set(pacer, 0.0)?;
        self.state = None;
        Ok(())
    }
}

/// Shut circulation down and vent the trapped volume.
///
/// The `clog_policy` parameter decides what happens if the trap no longer
/// passes gas (see [`ClogPolicy`]); the plant revisions disagree, so both
/// behaviors are first-class.
#[derive(Default)]
pub struct StopCirculation {
    state: Option<&'static str>,
}

/// Residual flow below this with pressure still high means the trap is
/// blocked rather than empty.
const CLOG_FLOW_MIN: f64 = 0.05;
const CLOG_PRESSURE_THRESH: f64 = 500.0;
/// Venting is done once the line pressure is below this.
const VENT_DONE_PRESSURE: f64 = 10.0;

impl Script for StopCirculation {
    fn name(&self) -> &'static str {
        "stop_circulation"
    }

    fn checklist(&self) -> Checklist {
        Checklist {
            on: vec!["AV105"],
            ..Checklist::default()
        }
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["clog_policy"]
    }

    fn run_state(&self) -> Option<&'static str> {
        self.state
    }

    fn run(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        let policy = ClogPolicy::parse(&cx.param_str("clog_policy", "fail"))?;
        self.state = Some("stopping_circulation");

        cx.set_value(pacer, &loop_enabled_key(COLD_HEAD_LOOP), Value::Bool(false))?;
        cx.device("AV105")?.close(pacer)?;
        cx.device("FPV201")?.set(pacer, 100.0)?;

        let flow = cx.device("FM208")?.readback()?;
        let pressure = cx.device("PT206")?.readback()?;
        if flow < CLOG_FLOW_MIN && pressure > CLOG_PRESSURE_THRESH {
            let what = format!(
                "no flow while venting ({flow:.3} with PT206 at {pressure:.0}): trap is clogged"
            );
            match policy {
                ClogPolicy::Fail => return Err(ScriptError::Clogged { what }),
                ClogPolicy::Reroute => {
                    cx.log(&format!("{what}; rerouting through AV203"), true);
                    cx.device("AV203")?.open(pacer)?;
                }
            }
        }

        cx.wait_below(pacer, "PT206", VENT_DONE_PRESSURE)?;
        cx.device("FPV201")?.set(pacer, 0.0)?;

        self.state = None;
        Ok(())
    }

    fn safe_exit(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        cx.device("AV105")?.close(pacer)?;
        cx.device("AV203")?.close(pacer)?;
        cx.device("FPV201")?.set(pacer, 0.0)?;
        self.state = None;
        Ok(())
    }
}

/// Pump the purified gas back to storage.
#[derive(Default)]
pub struct StartRecovery {
    state: Option<&'static str>,
}

impl Script for StartRecovery {
    fn name(&self) -> &'static str {
        "start_recovery"
    }

    fn checklist(&self) -> Checklist {
        Checklist {
            off: vec!["AV105"],
            ..Checklist::default()
        }
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["recovery_pressure"]
    }

    fn run_state(&self) -> Option<&'static str> {
        self.state
    }

    fn run(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        let recovery_pressure = cx.param_f64("recovery_pressure", 50.0);
        self.state = Some("recovering");

        cx.device("AV025")?.open(pacer)?;
        cx.wait_below(pacer, "PT206", recovery_pressure)?;
        cx.device("AV025")?.close(pacer)?;

        self.state = None;
        Ok(())
    }

    fn safe_exit(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        cx.device("AV025")?.close(pacer)?;
        self.state = None;
        Ok(())
    }
}

/// Stop an in-progress recovery and isolate the recovery line.
#[derive(Default)]
pub struct StopRecovery {
    state: Option<&'static str>,
}

impl Script for StopRecovery {
    fn name(&self) -> &'static str {
        "stop_recovery"
    }

    fn run_state(&self) -> Option<&'static str> {
        self.state
    }

    fn run(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        self.state = Some("recovering");
        cx.device("AV025")?.close(pacer)?;
        self.state = None;
        Ok(())
    }

    fn safe_exit(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        cx.device("AV025")?.close(pacer)?;
        self.state = None;
        Ok(())
    }
}

/// Warm the trap to drive off the captured impurities and pump them out
/// through the exhaust.
#[derive(Default)]
pub struct StartRegeneration {
    state: Option<&'static str>,
}

impl Script for StartRegeneration {
    fn name(&self) -> &'static str {
        "start_regeneration"
    }

    fn checklist(&self) -> Checklist {
        Checklist {
            off: vec!["AV105", "AV024"],
            ..Checklist::default()
        }
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["regen_temperature_k", "purge_pressure"]
    }

    fn run_state(&self) -> Option<&'static str> {
        self.state
    }

    fn run(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        let regen_temperature_k = cx.param_f64("regen_temperature_k", 90.0);
        let purge_pressure = cx.param_f64("purge_pressure", 20.0);
        self.state = Some("regenerating");

        cx.device("AV026")?.open(pacer)?;
        let heater = cx.device("HTR208")?;
        heater.set(pacer, regen_temperature_k)?;
        heater.on(pacer)?;
        cx.wait_above(pacer, "TS510", regen_temperature_k * 0.95)?;
        // Hold at temperature until the released impurities are pumped out.
        cx.wait_below(pacer, "PT206", purge_pressure)?;
        heater.off(pacer)?;
        cx.device("AV026")?.close(pacer)?;

        self.state = None;
        Ok(())
    }

    fn safe_exit(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        cx.device("HTR208")?.off(pacer)?;
        cx.device("AV026")?.close(pacer)?;
        self.state = None;
        Ok(())
    }
}

/// Abort a regeneration: heater off, exhaust closed.
#[derive(Default)]
pub struct StopRegeneration {
    state: Option<&'static str>,
}

impl Script for StopRegeneration {
    fn name(&self) -> &'static str {
        "stop_regeneration"
    }

    fn run_state(&self) -> Option<&'static str> {
        self.state
    }

    fn run(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        self.state = Some("regenerating");
        cx.device("HTR208")?.off(pacer)?;
        cx.device("AV026")?.close(pacer)?;
        self.state = None;
        Ok(())
    }

    fn safe_exit(&mut self, cx: &ScriptContext, pacer: &mut dyn Pacer) -> ScriptResult<()> {
        cx.device("HTR208")?.off(pacer)?;
        cx.device("AV026")?.close(pacer)?;
        self.state = None;
        Ok(())
    }
}

/// Every purifier procedure, boxed for the host roster.
pub fn all_scripts() -> Vec<Box<dyn Script>> {
    vec![
        Box::<StartCooling>::default(),
        Box::<StopCooling>::default(),
        Box::<StartCirculation>::default(),
        Box::<StopCirculation>::default(),
        Box::<StartRecovery>::default(),
        Box::<StopRecovery>::default(),
        Box::<StartRegeneration>::default(),
        Box::<StopRegeneration>::default(),
    ]
}
