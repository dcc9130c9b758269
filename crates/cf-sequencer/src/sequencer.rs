//! Queue orchestration over the shared settings store.
//!
//! The sequencer never runs a script in-process. It writes the entry's
//! parameters into the target script's settings subtree, raises that
//! script's enable flag, and watches the flag for the completion signal
//! (the runner always clears it, error or not). `exit_with_error`
//! decides whether the queue stops or advances.

use crate::error::{SeqResult, SequencerError};
use crate::queue::{Advance, QueueEntry, ScriptQueue};
use cf_bus::{settings_dir, EventSink, SettingsStore, StoreExt, Value, WatchId};
use cf_script::ParamSet;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub const QUEUE_BLOB_VERSION: u32 = 1;

/// A script the sequencer is allowed to start: its settings name and the
/// parameter keys it reads.
#[derive(Debug, Clone, Copy)]
pub struct ScriptRef {
    pub name: &'static str,
    pub param_names: &'static [&'static str],
}

/// The full purifier roster as a sequencer catalog.
pub fn purifier_catalog() -> Vec<ScriptRef> {
    cf_script::purifier::all_scripts()
        .iter()
        .map(|s| ScriptRef {
            name: s.name(),
            param_names: s.param_names(),
        })
        .collect()
}

/// On-store representation of the queue, with enough metadata to refuse
/// blobs written by a different build.
#[derive(Serialize, Deserialize)]
struct PersistedQueue {
    version: u32,
    saved_at: String,
    queue: ScriptQueue,
}

type PendingNotifications = Rc<RefCell<VecDeque<(String, Value)>>>;

pub struct Sequencer {
    dir: String,
    store: Rc<dyn SettingsStore>,
    sink: Rc<dyn EventSink>,
    catalog: Vec<ScriptRef>,
    queue: ScriptQueue,
    enabled: bool,
    watch: Option<WatchId>,
    pending: PendingNotifications,
}

impl Sequencer {
    pub fn new(
        store: Rc<dyn SettingsStore>,
        sink: Rc<dyn EventSink>,
        catalog: Vec<ScriptRef>,
    ) -> Self {
        let dir = settings_dir("sequencer");
        store.set_default(&format!("{dir}/enabled"), Value::Bool(false));
        store.set_default(&format!("{dir}/current"), Value::Int(-1));
        store.set_default(&format!("{dir}/loops"), Value::Int(-1));

        let queue = match store.get(&format!("{dir}/queue")) {
            Some(Value::Str(blob)) => match serde_json::from_str::<PersistedQueue>(&blob) {
                Ok(p) if p.version == QUEUE_BLOB_VERSION => p.queue,
                Ok(p) => {
                    sink.message(
                        &format!("discarding persisted queue with version {}", p.version),
                        true,
                    );
                    ScriptQueue::new()
                }
                Err(err) => {
                    sink.message(&format!("discarding unreadable persisted queue: {err}"), true);
                    ScriptQueue::new()
                }
            },
            _ => ScriptQueue::new(),
        };

        let mut seq = Self {
            dir,
            store,
            sink,
            catalog,
            queue,
            enabled: false,
            watch: None,
            pending: Rc::new(RefCell::new(VecDeque::new())),
        };

        // A raised flag at startup is stale state from a crash; the queue
        // keeps its cursor as the resume point but never auto-starts.
        if seq.store.get_bool(&format!("{}/enabled", seq.dir), false) {
            seq.sink
                .message("sequencer was enabled at startup, disabling", false);
        }
        seq.store
            .set(&format!("{}/enabled", seq.dir), Value::Bool(false));
        seq.save();
        seq
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn queue(&self) -> &ScriptQueue {
        &self.queue
    }

    fn script_ref(&self, name: &str) -> Option<&ScriptRef> {
        self.catalog.iter().find(|s| s.name == name)
    }

    fn save(&self) {
        let persisted = PersistedQueue {
            version: QUEUE_BLOB_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            queue: self.queue.clone(),
        };
        match serde_json::to_string(&persisted) {
            Ok(blob) => self
                .store
                .set(&format!("{}/queue", self.dir), Value::Str(blob)),
            Err(err) => tracing::error!(%err, "queue serialization failed"),
        }
        let current = self.queue.cursor().map_or(-1, |c| c as i64);
        self.store
            .set(&format!("{}/current", self.dir), Value::Int(current));
        let loops = self.queue.loops().map_or(-1, |n| n as i64);
        self.store
            .set(&format!("{}/loops", self.dir), Value::Int(loops));
    }

    // --- queue mutation ----------------------------------------------

    pub fn add(&mut self, name: &str, params: ParamSet) -> SeqResult<()> {
        if self.script_ref(name).is_none() {
            return Err(SequencerError::UnknownScript {
                name: name.to_string(),
            });
        }
        self.queue.add(QueueEntry::new(name, params))?;
        self.save();
        self.sink.message(
            &format!("Queued {name} ({} entries)", self.queue.len()),
            false,
        );
        Ok(())
    }

    pub fn remove(&mut self, idx: usize) -> SeqResult<()> {
        let removed = self.queue.remove(idx, self.enabled)?;
        self.save();
        self.sink.message(
            &format!("Removed {} from slot {idx}", removed.script_name),
            false,
        );
        Ok(())
    }

    pub fn move_up(&mut self, idx: usize) -> SeqResult<()> {
        self.queue.move_up(idx)?;
        self.save();
        Ok(())
    }

    pub fn move_down(&mut self, idx: usize) -> SeqResult<()> {
        self.queue.move_down(idx)?;
        self.save();
        Ok(())
    }

    pub fn clear(&mut self) -> SeqResult<()> {
        self.queue.clear(self.enabled)?;
        self.save();
        self.sink.message("Queue cleared", false);
        Ok(())
    }

    pub fn set_loops(&mut self, loops: Option<u32>) {
        self.queue.set_loops(loops);
        self.save();
    }

    // --- run control --------------------------------------------------

    /// Start executing at the cursor (the front, if idle).
    pub fn enable(&mut self) -> SeqResult<()> {
        if self.enabled {
            return Err(SequencerError::AlreadyEnabled);
        }
        let idx = self.queue.begin()?;
        self.enabled = true;
        self.store
            .set(&format!("{}/enabled", self.dir), Value::Bool(true));
        self.start_entry(idx)?;
        Ok(())
    }

    /// Stop the queue and cancel the active script. The cursor stays put
    /// so a later enable resumes the same entry.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        self.unwatch_active();
        if let Some(entry) = self.queue.current() {
            let key = format!("{}/enabled", settings_dir(&entry.script_name));
            self.store.set(&key, Value::Bool(false));
        }
        self.store
            .set(&format!("{}/enabled", self.dir), Value::Bool(false));
        self.save();
        self.sink.message("Sequencer disabled", false);
    }

    /// Drain completion signals and chain to the next entry. Call once
    /// per scheduler pass.
    pub fn tick(&mut self) -> SeqResult<()> {
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some((key, value)) = next else {
                return Ok(());
            };
            if !self.enabled || value.as_bool() != Some(false) {
                continue;
            }
            let Some(entry) = self.queue.current() else {
                continue;
            };
            let sdir = settings_dir(&entry.script_name);
            if key != format!("{sdir}/enabled") {
                // Left over from a watch on a previous entry.
                continue;
            }
            let name = entry.script_name.clone();
            self.unwatch_active();
            if self.store.get_bool(&format!("{sdir}/exit_with_error"), false) {
                self.enabled = false;
                self.store
                    .set(&format!("{}/enabled", self.dir), Value::Bool(false));
                self.save();
                self.sink.message(
                    &format!("{name} exited with an error, stopping the queue"),
                    true,
                );
                return Ok(());
            }
            match self.queue.advance()? {
                Advance::Started(idx) => {
                    self.save();
                    self.start_entry(idx)?;
                }
                Advance::Wrapped => {
                    self.save();
                    self.sink.message("End of queue, wrapping to the front", false);
                    self.start_entry(0)?;
                }
                Advance::Finished => {
                    self.enabled = false;
                    self.store
                        .set(&format!("{}/enabled", self.dir), Value::Bool(false));
                    self.save();
                    self.sink.message("Queue finished", false);
                }
            }
        }
    }

    fn start_entry(&mut self, idx: usize) -> SeqResult<()> {
        let entry = match self.queue.entries().get(idx) {
            Some(e) => e.clone(),
            None => {
                return Err(SequencerError::Queue(crate::error::QueueError::BadIndex {
                    idx,
                    len: self.queue.len(),
                }))
            }
        };
        if self.script_ref(&entry.script_name).is_none() {
            // Persisted queue can outlive a catalog change.
            self.enabled = false;
            self.store
                .set(&format!("{}/enabled", self.dir), Value::Bool(false));
            return Err(SequencerError::UnknownScript {
                name: entry.script_name,
            });
        }

        let sdir = settings_dir(&entry.script_name);
        entry.params.apply(self.store.as_ref(), &sdir);

        let queue = Rc::clone(&self.pending);
        let id = self.store.watch(
            &format!("{sdir}/enabled"),
            Box::new(move |key, value| {
                queue.borrow_mut().push_back((key.to_string(), value.clone()));
            }),
        );
        self.watch = Some(id);

        self.sink.message(
            &format!(
                "Starting {} ({} of {})",
                entry.script_name,
                idx + 1,
                self.queue.len()
            ),
            false,
        );
        self.store
            .set(&format!("{sdir}/enabled"), Value::Bool(true));
        Ok(())
    }

    fn unwatch_active(&mut self) {
        if let Some(id) = self.watch.take() {
            self.store.unwatch(id);
        }
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.unwatch_active();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_bus::{MemSink, MemStore};

    const CATALOG: &[ScriptRef] = &[
        ScriptRef {
            name: "alpha",
            param_names: &["x"],
        },
        ScriptRef {
            name: "beta",
            param_names: &["y"],
        },
    ];

    struct Rig {
        store: Rc<MemStore>,
        sink: Rc<MemSink>,
    }

    fn rig() -> (Rig, Sequencer) {
        let store = Rc::new(MemStore::new());
        let sink = Rc::new(MemSink::new());
        let seq = Sequencer::new(
            Rc::clone(&store) as Rc<dyn SettingsStore>,
            Rc::clone(&sink) as _,
            CATALOG.to_vec(),
        );
        (Rig { store, sink }, seq)
    }

    fn finish_script(store: &MemStore, name: &str) {
        store.set(
            &format!("/equipment/{name}/settings/enabled"),
            Value::Bool(false),
        );
    }

    #[test]
    fn chaining_runs_the_queue_in_order_then_stops() {
        let (r, mut seq) = rig();
        seq.add("alpha", ParamSet::new().with("x", 1.0)).unwrap();
        seq.add("beta", ParamSet::new().with("y", 2.0)).unwrap();
        seq.set_loops(Some(0));

        seq.enable().unwrap();
        assert!(r.store.get_bool("/equipment/alpha/settings/enabled", false));
        assert_eq!(r.store.get_f64("/equipment/alpha/settings/x", 0.0), 1.0);

        finish_script(&r.store, "alpha");
        seq.tick().unwrap();
        assert!(r.store.get_bool("/equipment/beta/settings/enabled", false));
        assert_eq!(r.store.get_f64("/equipment/beta/settings/y", 0.0), 2.0);

        finish_script(&r.store, "beta");
        seq.tick().unwrap();
        assert!(!seq.is_enabled());
        assert_eq!(seq.queue().cursor(), None);
        assert!(!r
            .store
            .get_bool("/equipment/sequencer/settings/enabled", true));
        assert!(r.sink.contains("Queue finished"));
    }

    #[test]
    fn error_exit_stops_the_queue_in_place() {
        let (r, mut seq) = rig();
        seq.add("alpha", ParamSet::new()).unwrap();
        seq.add("beta", ParamSet::new()).unwrap();
        seq.enable().unwrap();

        r.store.set(
            "/equipment/alpha/settings/exit_with_error",
            Value::Bool(true),
        );
        finish_script(&r.store, "alpha");
        seq.tick().unwrap();

        assert!(!seq.is_enabled());
        // Cursor stays on the failed entry for inspection and resume.
        assert_eq!(seq.queue().cursor(), Some(0));
        assert!(!r.store.get_bool("/equipment/beta/settings/enabled", false));
        assert!(r.sink.contains("exited with an error"));
    }

    #[test]
    fn looping_replays_the_queue() {
        let (r, mut seq) = rig();
        seq.add("alpha", ParamSet::new()).unwrap();
        seq.set_loops(Some(1));
        seq.enable().unwrap();

        finish_script(&r.store, "alpha");
        seq.tick().unwrap();
        // Wrapped: alpha is running again.
        assert!(seq.is_enabled());
        assert!(r.store.get_bool("/equipment/alpha/settings/enabled", false));

        finish_script(&r.store, "alpha");
        seq.tick().unwrap();
        assert!(!seq.is_enabled());
        assert_eq!(seq.queue().cursor(), None);
    }

    #[test]
    fn enable_requires_entries() {
        let (_r, mut seq) = rig();
        assert!(matches!(
            seq.enable(),
            Err(SequencerError::Queue(crate::error::QueueError::Empty))
        ));
    }

    #[test]
    fn unknown_scripts_are_rejected_at_add() {
        let (_r, mut seq) = rig();
        assert!(matches!(
            seq.add("gamma", ParamSet::new()),
            Err(SequencerError::UnknownScript { .. })
        ));
        assert!(seq.queue().is_empty());
    }

    #[test]
    fn disable_cancels_the_active_script() {
        let (r, mut seq) = rig();
        seq.add("alpha", ParamSet::new()).unwrap();
        seq.enable().unwrap();
        seq.disable();

        assert!(!r.store.get_bool("/equipment/alpha/settings/enabled", true));
        // The cancellation's own completion signal must not chain.
        seq.tick().unwrap();
        assert!(!seq.is_enabled());
        assert_eq!(seq.queue().cursor(), Some(0));
    }

    #[test]
    fn queue_persists_across_restarts() {
        let store = Rc::new(MemStore::new());
        let sink = Rc::new(MemSink::new());
        {
            let mut seq = Sequencer::new(
                Rc::clone(&store) as Rc<dyn SettingsStore>,
                Rc::clone(&sink) as _,
                CATALOG.to_vec(),
            );
            seq.add("alpha", ParamSet::new().with("x", 7.0)).unwrap();
            seq.add("beta", ParamSet::new()).unwrap();
            seq.set_loops(Some(3));
        }
        let seq = Sequencer::new(
            Rc::clone(&store) as Rc<dyn SettingsStore>,
            Rc::clone(&sink) as _,
            CATALOG.to_vec(),
        );
        assert_eq!(seq.queue().len(), 2);
        assert_eq!(seq.queue().loops(), Some(3));
        assert_eq!(
            seq.queue().entries()[0].params.get("x"),
            Some(&Value::Float(7.0))
        );
    }

    #[test]
    fn stale_enabled_flag_is_cleared_at_startup() {
        let store = Rc::new(MemStore::new());
        let sink = Rc::new(MemSink::new());
        store.set("/equipment/sequencer/settings/enabled", Value::Bool(true));
        let seq = Sequencer::new(
            Rc::clone(&store) as Rc<dyn SettingsStore>,
            Rc::clone(&sink) as _,
            CATALOG.to_vec(),
        );
        assert!(!seq.is_enabled());
        assert!(!store.get_bool("/equipment/sequencer/settings/enabled", true));
        assert!(sink.contains("enabled at startup"));
    }

    #[test]
    fn purifier_catalog_lists_the_roster() {
        let catalog = purifier_catalog();
        assert!(catalog.iter().any(|s| s.name == "start_cooling"));
        assert!(catalog.iter().any(|s| s.name == "stop_circulation"));
        assert_eq!(catalog.len(), 8);
    }
}
