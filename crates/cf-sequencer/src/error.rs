//! Error types for queue and sequencer operations.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;
pub type SeqResult<T> = Result<T, SequencerError>;

/// Violations of the queue's structural invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full ({max} entries)")]
    Full { max: usize },

    #[error("index {idx} out of range (queue has {len} entries)")]
    BadIndex { idx: usize, len: usize },

    /// The entry at the cursor backs the running script and stays put
    /// until the queue is disabled.
    #[error("entry {idx} is currently running")]
    RemoveRunning { idx: usize },

    #[error("queue is empty")]
    Empty,
}

/// Errors from the sequencer's operator surface.
#[derive(Debug, Error)]
pub enum SequencerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The named script is not in the catalog.
    #[error("unknown script {name:?}")]
    UnknownScript { name: String },

    #[error("bad argument {arg:?}: {why}")]
    BadArg { arg: String, why: String },

    #[error("sequencer is already enabled")]
    AlreadyEnabled,
}
