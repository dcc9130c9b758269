//! cf-bus: external collaborator seams for cryoflow.
//!
//! The control engine talks to the outside world through three narrow
//! traits:
//! - [`VarBus`]: the remote process-variable bus the instruments live on
//!   (synchronous get/put plus connectivity and limits/units metadata)
//! - [`SettingsStore`]: the hierarchical settings/status store with
//!   change-notification, used for tunable parameters and cross-component
//!   signaling flags
//! - [`EventSink`]: the leveled operator message and alarm channel
//!
//! Production bindings to a concrete control system are external to this
//! workspace. The in-memory implementations here ([`MemBus`], [`MemStore`],
//! [`MemSink`]) back the test suites and the demo binary.

pub mod error;
pub mod mem;
pub mod sink;
pub mod store;
pub mod value;
pub mod var;

pub use error::{BusError, BusResult};
pub use mem::{MemBus, MemSink, MemStore};
pub use sink::{AlarmClass, EventSink, TracingSink};
pub use store::{settings_dir, SettingsStore, StoreExt, WatchFn, WatchId};
pub use value::Value;
pub use var::{VarBus, VarInfo};
