//! Plant wiring file: routing table, polarity/calibration overrides, the
//! instrument roster, and control loop specs. YAML, one file per plant.

use cf_control::{check_exclusive_actuators, LoopSpec};
use cf_device::{DeviceKind, PlantMap, RegistryConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

pub type PlantResult<T> = Result<T, PlantError>;

#[derive(Debug, Error)]
pub enum PlantError {
    #[error("cannot read plant file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse plant file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Device(#[from] cf_device::DeviceError),

    #[error(transparent)]
    Control(#[from] cf_control::ControlError),

    #[error("invalid plant file: {0}")]
    Invalid(String),
}

/// Everything the engine needs to know about one plant installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantFile {
    /// Subsystem digit to bus path prefix.
    pub routing: BTreeMap<char, String>,
    /// Valves that are open when de-energized.
    pub normally_open: BTreeSet<String>,
    /// Heaters that take a temperature setpoint directly.
    pub calibrated: BTreeSet<String>,
    pub timeout_s: f64,
    pub dry_run: bool,
    /// Instruments the plant must be able to reach at startup.
    pub devices: Vec<String>,
    pub loops: Vec<LoopSpec>,
}

impl Default for PlantFile {
    fn default() -> Self {
        let map = PlantMap::default();
        let config = RegistryConfig::default();
        Self {
            routing: map.prefixes,
            normally_open: map.normally_open,
            calibrated: map.calibrated,
            timeout_s: config.timeout_s,
            dry_run: config.dry_run,
            devices: Vec::new(),
            loops: Vec::new(),
        }
    }
}

impl PlantFile {
    pub fn load(path: &Path) -> PlantResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    pub fn plant_map(&self) -> PlantMap {
        PlantMap {
            prefixes: self.routing.clone(),
            normally_open: self.normally_open.clone(),
            calibrated: self.calibrated.clone(),
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            timeout_s: self.timeout_s,
            dry_run: self.dry_run,
        }
    }

    /// Check everything that can be checked without touching hardware.
    pub fn validate(&self) -> PlantResult<()> {
        if self.timeout_s <= 0.0 {
            return Err(PlantError::Invalid(format!(
                "timeout_s must be positive, got {}",
                self.timeout_s
            )));
        }

        let map = self.plant_map();
        for name in &self.devices {
            map.classify(name)?;
            map.route(name)?;
        }
        // Overrides may name devices outside the roster (other plants
        // share the tables), but they must still route and make sense.
        for name in &self.normally_open {
            if !map.classify(name)?.is_valve() {
                return Err(PlantError::Invalid(format!(
                    "{name} is listed as normally-open but is not a valve"
                )));
            }
            map.route(name)?;
        }
        for name in &self.calibrated {
            if map.classify(name)? != DeviceKind::HeaterCalibrated {
                return Err(PlantError::Invalid(format!(
                    "{name} is listed as calibrated but is not a heater"
                )));
            }
            map.route(name)?;
        }

        let mut names = BTreeSet::new();
        for spec in &self.loops {
            if !names.insert(&spec.name) {
                return Err(PlantError::Invalid(format!(
                    "duplicate loop name {:?}",
                    spec.name
                )));
            }
            let d = &spec.defaults;
            if d.output_limit_low >= d.output_limit_high {
                return Err(PlantError::Invalid(format!(
                    "loop {:?}: output limits ({}, {}) are not an interval",
                    spec.name, d.output_limit_low, d.output_limit_high
                )));
            }
        }
        check_exclusive_actuators(&self.loops)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
devices: [AV024, AV105, TP101, HTR105, TS510, PT206]
loops:
  - name: pid_pur_he70k
    control_var: "PUR:HE3:HTR105:CUR"
    target_var: "PUR:CRY:TS510:RDTEMPK"
"#;

    #[test]
    fn minimal_file_validates_with_default_tables() {
        let plant: PlantFile = serde_yaml::from_str(MINIMAL).unwrap();
        plant.validate().unwrap();
        assert_eq!(plant.routing, PlantMap::default().prefixes);
        assert!(plant.normally_open.contains("AV024"));
    }

    #[test]
    fn default_overrides_outside_roster_are_accepted() {
        // The stock override tables name valves and heaters no minimal
        // roster lists; that must not fail validation.
        let plant: PlantFile = serde_yaml::from_str("devices: [TS510]").unwrap();
        plant.validate().unwrap();
    }

    #[test]
    fn non_valve_normally_open_override_is_rejected() {
        let text = r#"
normally_open: [TS510]
devices: [TS510]
"#;
        let plant: PlantFile = serde_yaml::from_str(text).unwrap();
        assert!(matches!(plant.validate(), Err(PlantError::Invalid(_))));
    }

    #[test]
    fn unroutable_device_is_rejected() {
        let plant: PlantFile = serde_yaml::from_str("devices: [AV904]").unwrap();
        assert!(matches!(plant.validate(), Err(PlantError::Device(_))));
    }

    #[test]
    fn shared_actuator_is_rejected() {
        let text = r#"
devices: [HTR105, TS510, PT206]
loops:
  - name: a
    control_var: "PUR:HE3:HTR105:CUR"
    target_var: "PUR:CRY:TS510:RDTEMPK"
  - name: b
    control_var: "PUR:HE3:HTR105:CUR"
    target_var: "PUR:HE4:PT206:RDPRESS"
"#;
        let plant: PlantFile = serde_yaml::from_str(text).unwrap();
        assert!(matches!(plant.validate(), Err(PlantError::Control(_))));
    }

    #[test]
    fn duplicate_loop_names_are_rejected() {
        let text = r#"
loops:
  - name: a
    control_var: "PUR:HE3:HTR105:CUR"
    target_var: "PUR:CRY:TS510:RDTEMPK"
  - name: a
    control_var: "PUR:HE4:HTR208:SETTEMP"
    target_var: "PUR:HE4:PT206:RDPRESS"
"#;
        let plant: PlantFile = serde_yaml::from_str(text).unwrap();
        assert!(matches!(plant.validate(), Err(PlantError::Invalid(_))));
    }
}
