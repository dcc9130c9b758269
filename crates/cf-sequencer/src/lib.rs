//! Persisted job queue chaining purifier scripts.
//!
//! Entries are `(script, parameters)` pairs. The queue survives restarts
//! through the settings store, advances on each script's completion
//! signal, wraps with an optional loop counter, and exposes a small
//! command surface for an operator UI. Queue mutation is legal while a
//! script is mid-flight; only the running entry itself is pinned.

mod command;
mod error;
mod queue;
mod sequencer;

pub use command::CommandStatus;
pub use error::{QueueError, QueueResult, SeqResult, SequencerError};
pub use queue::{Advance, QueueEntry, ScriptQueue, QUEUE_MAX_LEN};
pub use sequencer::{purifier_catalog, ScriptRef, Sequencer, QUEUE_BLOB_VERSION};
