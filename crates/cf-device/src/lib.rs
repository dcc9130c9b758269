//! cf-device: instruments as devices.
//!
//! A [`Device`] bundles the handful of process variables behind one physical
//! instrument (valve, heater, pump, sensor) into a single object with
//! health, interlock, and timeout semantics. The [`DeviceRegistry`] routes
//! bare device names ("AV203", "TS510") to full bus paths and memoizes
//! construction.

pub mod device;
pub mod error;
pub mod kind;
pub mod registry;

pub use device::Device;
pub use error::{DeviceError, DeviceResult};
pub use kind::DeviceKind;
pub use registry::{DeviceRegistry, PlantMap, RegistryConfig};
