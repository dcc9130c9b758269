//! The ordered run queue and its cursor rules.
//!
//! Pure data structure: no store, no clock. The sequencer layers
//! persistence and script activation on top.

use crate::error::{QueueError, QueueResult};
use cf_script::ParamSet;
use serde::{Deserialize, Serialize};

pub const QUEUE_MAX_LEN: usize = 64;

/// One queued job: which script to run and the parameters to hand it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub script_name: String,
    pub params: ParamSet,
}

impl QueueEntry {
    pub fn new(script_name: &str, params: ParamSet) -> Self {
        Self {
            script_name: script_name.to_string(),
            params,
        }
    }
}

/// What [`ScriptQueue::advance`] decided after a clean completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Moved to the next entry in order.
    Started(usize),
    /// Reached the end and wrapped back to the front.
    Wrapped,
    /// Reached the end with no loops remaining; cursor is idle again.
    Finished,
}

/// Bounded FIFO of [`QueueEntry`] with a run cursor and a loop counter.
///
/// The cursor is `None` when idle, otherwise a valid index. Mutations
/// re-index the cursor so the entry it points at stays the same job;
/// only removal of the running entry itself is refused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptQueue {
    entries: Vec<QueueEntry>,
    cursor: Option<usize>,
    /// Extra passes to run after the first: `None` loops forever,
    /// `Some(0)` stops at the end.
    loops: Option<u32>,
}

impl ScriptQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn loops(&self) -> Option<u32> {
        self.loops
    }

    pub fn set_loops(&mut self, loops: Option<u32>) {
        self.loops = loops;
    }

    /// The entry the cursor points at, if any.
    pub fn current(&self) -> Option<&QueueEntry> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    pub fn add(&mut self, entry: QueueEntry) -> QueueResult<()> {
        if self.entries.len() >= QUEUE_MAX_LEN {
            return Err(QueueError::Full { max: QUEUE_MAX_LEN });
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Remove the entry at `idx`. `running` is whether the queue is
    /// currently executing; the cursor entry cannot be removed then.
    pub fn remove(&mut self, idx: usize, running: bool) -> QueueResult<QueueEntry> {
        let len = self.entries.len();
        if idx >= len {
            return Err(QueueError::BadIndex { idx, len });
        }
        if running && self.cursor == Some(idx) {
            return Err(QueueError::RemoveRunning { idx });
        }
        let removed = self.entries.remove(idx);
        self.cursor = match self.cursor {
            Some(c) if idx < c => Some(c - 1),
            Some(c) if c >= self.entries.len() => {
                // Removed the (idle) cursor entry at the tail.
                if self.entries.is_empty() {
                    None
                } else {
                    Some(self.entries.len() - 1)
                }
            }
            other => other,
        };
        Ok(removed)
    }

    /// Swap `idx` with the entry before it. The cursor follows its job.
    pub fn move_up(&mut self, idx: usize) -> QueueResult<()> {
        let len = self.entries.len();
        if idx == 0 || idx >= len {
            return Err(QueueError::BadIndex { idx, len });
        }
        self.entries.swap(idx, idx - 1);
        self.cursor = match self.cursor {
            Some(c) if c == idx => Some(idx - 1),
            Some(c) if c == idx - 1 => Some(idx),
            other => other,
        };
        Ok(())
    }

    /// Swap `idx` with the entry after it. The cursor follows its job.
    pub fn move_down(&mut self, idx: usize) -> QueueResult<()> {
        let len = self.entries.len();
        if idx + 1 >= len {
            return Err(QueueError::BadIndex { idx, len });
        }
        self.entries.swap(idx, idx + 1);
        self.cursor = match self.cursor {
            Some(c) if c == idx => Some(idx + 1),
            Some(c) if c == idx + 1 => Some(idx),
            other => other,
        };
        Ok(())
    }

    pub fn clear(&mut self, running: bool) -> QueueResult<()> {
        if running {
            return Err(QueueError::RemoveRunning {
                idx: self.cursor.unwrap_or(0),
            });
        }
        self.entries.clear();
        self.cursor = None;
        Ok(())
    }

    /// Park the cursor on its current entry (or the front) to start a run.
    pub fn begin(&mut self) -> QueueResult<usize> {
        if self.entries.is_empty() {
            return Err(QueueError::Empty);
        }
        let idx = self.cursor.unwrap_or(0).min(self.entries.len() - 1);
        self.cursor = Some(idx);
        Ok(idx)
    }

    /// Step the cursor after a clean completion, wrapping at the end and
    /// spending the loop counter.
    pub fn advance(&mut self) -> QueueResult<Advance> {
        let c = self.cursor.ok_or(QueueError::Empty)?;
        if c + 1 < self.entries.len() {
            self.cursor = Some(c + 1);
            return Ok(Advance::Started(c + 1));
        }
        match self.loops {
            None => {
                self.cursor = Some(0);
                Ok(Advance::Wrapped)
            }
            Some(0) => {
                self.cursor = None;
                Ok(Advance::Finished)
            }
            Some(n) => {
                self.loops = Some(n - 1);
                self.cursor = Some(0);
                Ok(Advance::Wrapped)
            }
        }
    }

    /// Return the cursor to idle without touching the entries.
    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }
}
