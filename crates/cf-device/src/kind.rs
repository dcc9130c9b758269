//! Instrument kinds and their variable layouts.
//!
//! Kinds differ only in which variables back readback/setpoint, in
//! open/close polarity, and in how long the hardware takes to settle after
//! a command. One enum, no inheritance chain.

/// Status/command suffixes common to every switchable instrument.
const SWITCH_VARS: &[&str] = &[
    "STATON",  // on/off status
    "STATTMO", // timeout status
    "STATDRV", // drive status
    "STATINT", // interlock status
    "STATBYP", // interlock bypass status
    "DRVON",   // on button
    "DRVOFF",  // off button
    "RST",     // reset button
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Automatic valve, de-energized closed.
    ValveNormClosed,
    /// Automatic valve, de-energized open: open/close invert on/off.
    ValveNormOpen,
    /// Proportional valve with a position setpoint.
    ValveProportional,
    /// Heater driven by a current setpoint.
    Heater,
    /// Heater calibrated to take a temperature setpoint directly.
    HeaterCalibrated,
    /// Turbo pump, with extended fault/timeout health flags.
    TurboPump,
    FlowMeter,
    PressureGauge,
    TempSensor,
}

impl DeviceKind {
    /// Variables beyond the common switch set (or the full set for simple
    /// read-only instruments).
    pub fn extra_vars(self) -> &'static [&'static str] {
        match self {
            DeviceKind::ValveNormClosed | DeviceKind::ValveNormOpen => &[],
            DeviceKind::ValveProportional => &["POS", "RDDACP", "STATLOC"],
            DeviceKind::Heater => &["CUR", "RDCUR", "RDHILIMI", "CMD", "STAT.B8"],
            DeviceKind::HeaterCalibrated => &["SETTEMP", "RDSETTEMP", "STATLOC", "CMD"],
            DeviceKind::TurboPump => &[
                "STATLSPD", "STATSTRT", "STATPTMO", "STATFLT", "STATATSPD", "DRVLSPD", "RDHRS",
                "RDSPD",
            ],
            DeviceKind::FlowMeter => &["RDFLOW"],
            DeviceKind::PressureGauge => &["RDPRESS"],
            DeviceKind::TempSensor => &["RDTEMPK"],
        }
    }

    /// All variables the device must connect to.
    pub fn all_vars(self) -> Vec<&'static str> {
        let mut vars = Vec::new();
        if self.has_switch() {
            vars.extend_from_slice(SWITCH_VARS);
        }
        vars.extend_from_slice(self.extra_vars());
        vars
    }

    /// Simple instruments (sensors, flow meters) expose a readback only.
    pub fn has_switch(self) -> bool {
        !matches!(
            self,
            DeviceKind::FlowMeter | DeviceKind::PressureGauge | DeviceKind::TempSensor
        )
    }

    pub fn is_valve(self) -> bool {
        matches!(
            self,
            DeviceKind::ValveNormClosed | DeviceKind::ValveNormOpen | DeviceKind::ValveProportional
        )
    }

    /// Normally-open valves invert the underlying on/off action.
    pub fn normally_open(self) -> bool {
        self == DeviceKind::ValveNormOpen
    }

    pub fn setpoint_var(self) -> Option<&'static str> {
        match self {
            DeviceKind::ValveProportional => Some("POS"),
            DeviceKind::Heater => Some("CUR"),
            DeviceKind::HeaterCalibrated => Some("SETTEMP"),
            _ => None,
        }
    }

    pub fn readback_var(self) -> Option<&'static str> {
        match self {
            DeviceKind::ValveProportional => Some("RDDACP"),
            DeviceKind::Heater => Some("RDCUR"),
            DeviceKind::HeaterCalibrated => Some("RDSETTEMP"),
            DeviceKind::TurboPump => Some("RDSPD"),
            DeviceKind::FlowMeter => Some("RDFLOW"),
            DeviceKind::PressureGauge => Some("RDPRESS"),
            DeviceKind::TempSensor => Some("RDTEMPK"),
            DeviceKind::ValveNormClosed | DeviceKind::ValveNormOpen => None,
        }
    }

    /// Local/auto-control status flag, where the hardware has one.
    pub fn auto_var(self) -> Option<&'static str> {
        match self {
            DeviceKind::Heater => Some("STAT.B8"),
            DeviceKind::HeaterCalibrated | DeviceKind::ValveProportional => Some("STATLOC"),
            _ => None,
        }
    }

    /// Settle interval between command polls, seconds. Valves actuate
    /// slower than heaters; pumps slower still.
    pub fn settle_s(self) -> f64 {
        match self {
            DeviceKind::ValveNormClosed | DeviceKind::ValveNormOpen => 1.0,
            DeviceKind::TurboPump => 3.0,
            _ => 0.25,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeviceKind::ValveNormClosed => "valve (normally closed)",
            DeviceKind::ValveNormOpen => "valve (normally open)",
            DeviceKind::ValveProportional => "proportional valve",
            DeviceKind::Heater => "heater",
            DeviceKind::HeaterCalibrated => "calibrated heater",
            DeviceKind::TurboPump => "turbo pump",
            DeviceKind::FlowMeter => "flow meter",
            DeviceKind::PressureGauge => "pressure gauge",
            DeviceKind::TempSensor => "temperature sensor",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_kinds_have_readback_but_no_switch() {
        for kind in [
            DeviceKind::FlowMeter,
            DeviceKind::PressureGauge,
            DeviceKind::TempSensor,
        ] {
            assert!(!kind.has_switch());
            assert!(kind.readback_var().is_some());
            assert!(kind.setpoint_var().is_none());
        }
    }

    #[test]
    fn actuated_kinds_pair_setpoint_with_readback() {
        for kind in [
            DeviceKind::ValveProportional,
            DeviceKind::Heater,
            DeviceKind::HeaterCalibrated,
        ] {
            assert!(kind.has_switch());
            assert!(kind.setpoint_var().is_some());
            assert!(kind.readback_var().is_some());
        }
    }

    #[test]
    fn plain_valves_have_no_setpoint() {
        assert!(DeviceKind::ValveNormClosed.setpoint_var().is_none());
        assert!(DeviceKind::ValveNormOpen.normally_open());
        assert!(!DeviceKind::ValveNormClosed.normally_open());
    }

    #[test]
    fn switch_vars_present_for_actuated_kinds() {
        let vars = DeviceKind::Heater.all_vars();
        assert!(vars.contains(&"DRVON"));
        assert!(vars.contains(&"CUR"));
        let vars = DeviceKind::TempSensor.all_vars();
        assert_eq!(vars, vec!["RDTEMPK"]);
    }
}
