//! Name-routed, lazily constructed device collection.

use crate::device::Device;
use crate::error::{DeviceError, DeviceResult};
use crate::kind::DeviceKind;
use cf_bus::{EventSink, VarBus};
use cf_core::Clock;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

/// Shared device construction settings, propagated to every device the
/// registry creates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistryConfig {
    pub timeout_s: f64,
    pub dry_run: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            timeout_s: 10.0,
            dry_run: false,
        }
    }
}

/// Plant wiring: routing prefixes and kind-override sets.
///
/// Device names embed their subsystem in the third digit from the end
/// ("TS510" lives on subsystem '5'); the prefix table maps that digit to
/// the bus path prefix. Valves that are normally open and heaters that are
/// temperature-calibrated cannot be told apart by name alone, so they are
/// listed explicitly.
#[derive(Debug, Clone)]
pub struct PlantMap {
    pub prefixes: BTreeMap<char, String>,
    pub normally_open: BTreeSet<String>,
    pub calibrated: BTreeSet<String>,
}

impl Default for PlantMap {
    fn default() -> Self {
        let prefixes = [
            ('0', "PUR:ISO"),
            ('1', "PUR:HE3"),
            ('2', "PUR:HE4"),
            ('3', "PUR:LD2"),
            ('5', "PUR:CRY"),
            ('7', "PUR:UDG"),
            ('8', "PUR:VAC"),
        ]
        .into_iter()
        .map(|(c, p)| (c, p.to_string()))
        .collect();
        let normally_open = ["AV024", "AV025", "AV026", "AV108", "AV203"]
            .into_iter()
            .map(str::to_string)
            .collect();
        let calibrated = [
            "HTR206", "HTR207", "HTR208", "HTR209", "HTR210", "HTR211", "HTR212", "HTR213",
            "HTR214",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self {
            prefixes,
            normally_open,
            calibrated,
        }
    }
}

impl PlantMap {
    /// Classify an instrument kind from the leading letters of its name.
    pub fn classify(&self, name: &str) -> DeviceResult<DeviceKind> {
        let kind = if name.starts_with("FPV") {
            DeviceKind::ValveProportional
        } else if name.starts_with("AV") {
            if self.normally_open.contains(name) {
                DeviceKind::ValveNormOpen
            } else {
                DeviceKind::ValveNormClosed
            }
        } else if name.starts_with("HTR") {
            if self.calibrated.contains(name) {
                DeviceKind::HeaterCalibrated
            } else {
                DeviceKind::Heater
            }
        } else if name.starts_with("TP") {
            DeviceKind::TurboPump
        } else if name.starts_with("FM") {
            DeviceKind::FlowMeter
        } else if name.starts_with("PT") {
            DeviceKind::PressureGauge
        } else if name.starts_with("TS") {
            DeviceKind::TempSensor
        } else {
            return Err(DeviceError::UnknownKind {
                name: name.to_string(),
            });
        };
        Ok(kind)
    }

    /// Full bus path for a bare device name.
    pub fn route(&self, name: &str) -> DeviceResult<String> {
        let digit = name
            .chars()
            .rev()
            .nth(2)
            .ok_or_else(|| DeviceError::UnknownRoute {
                name: name.to_string(),
            })?;
        let prefix = self
            .prefixes
            .get(&digit)
            .ok_or_else(|| DeviceError::UnknownRoute {
                name: name.to_string(),
            })?;
        Ok(format!("{prefix}:{name}"))
    }
}

/// Lazy collection of every device in the plant.
///
/// `get` constructs on first reference and memoizes; changing the shared
/// config drops the memo so every device reconnects with the new settings
/// on next access. The host keeps at most one live registry per config.
pub struct DeviceRegistry {
    map: PlantMap,
    config: RefCell<RegistryConfig>,
    devices: RefCell<HashMap<String, Rc<Device>>>,
    bus: Rc<dyn VarBus>,
    sink: Rc<dyn EventSink>,
    clock: Rc<dyn Clock>,
}

impl DeviceRegistry {
    pub fn new(
        map: PlantMap,
        config: RegistryConfig,
        bus: Rc<dyn VarBus>,
        sink: Rc<dyn EventSink>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            map,
            config: RefCell::new(config),
            devices: RefCell::new(HashMap::new()),
            bus,
            sink,
            clock,
        }
    }

    pub fn config(&self) -> RegistryConfig {
        *self.config.borrow()
    }

    /// Change shared timeout/dry-run. Invalidates every memoized device.
    pub fn set_config(&self, config: RegistryConfig) {
        if *self.config.borrow() != config {
            *self.config.borrow_mut() = config;
            self.devices.borrow_mut().clear();
            tracing::debug!(?config, "registry reconfigured, devices will reconnect");
        }
    }

    /// Fetch or construct the named device. Construction failures are not
    /// memoized, so a transient outage can be retried.
    pub fn get(&self, name: &str) -> DeviceResult<Rc<Device>> {
        if let Some(device) = self.devices.borrow().get(name) {
            return Ok(Rc::clone(device));
        }
        let path = self.map.route(name)?;
        let kind = self.map.classify(name)?;
        let config = self.config();
        let device = Rc::new(Device::connect(
            path,
            kind,
            Rc::clone(&self.bus),
            Rc::clone(&self.sink),
            Rc::clone(&self.clock),
            config.timeout_s,
            config.dry_run,
        )?);
        self.devices
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&device));
        Ok(device)
    }
}
