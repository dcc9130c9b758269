//! In-memory collaborators for tests, dry runs, and the demo binary.

use crate::error::{BusError, BusResult};
use crate::sink::{AlarmClass, EventSink};
use crate::store::{SettingsStore, WatchFn, WatchId};
use crate::value::Value;
use crate::var::{VarBus, VarInfo};
use cf_core::Clock;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

struct MemVar {
    value: f64,
    info: VarInfo,
}

/// Fake process-variable bus.
///
/// Deliberately dumb: a `put` lands immediately and nothing settles on its
/// own. Tests that exercise settle-and-confirm loops mutate the bus from
/// their pacer closure, which is exactly where real hardware would respond.
pub struct MemBus {
    vars: RefCell<HashMap<String, MemVar>>,
    clock: Rc<dyn Clock>,
}

impl MemBus {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            vars: RefCell::new(HashMap::new()),
            clock,
        }
    }

    /// Create a variable with default metadata.
    pub fn insert(&self, name: &str, value: f64) {
        self.insert_with(name, value, VarInfo::default());
    }

    pub fn insert_with(&self, name: &str, value: f64, info: VarInfo) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), MemVar { value, info });
    }

    pub fn insert_with_limits(&self, name: &str, value: f64, lower: f64, upper: f64, units: &str) {
        self.insert_with(
            name,
            value,
            VarInfo {
                units: units.to_string(),
                lower_ctrl_limit: lower,
                upper_ctrl_limit: upper,
                ..VarInfo::default()
            },
        );
    }

    /// Backdoor write, same as `put` but usable from test scaffolding
    /// without a `BusResult`.
    pub fn force(&self, name: &str, value: f64) {
        let mut vars = self.vars.borrow_mut();
        let var = vars
            .get_mut(name)
            .unwrap_or_else(|| panic!("force on unknown var {name}"));
        var.value = value;
        var.info.last_update_s = self.clock.now_s();
    }

    /// Simulate an instrument dropping off the bus.
    pub fn mark_disconnected(&self, name: &str) {
        if let Some(var) = self.vars.borrow_mut().get_mut(name) {
            var.info.connected = false;
        }
    }

    /// Number of 'put' writes is not tracked; peek at a value instead.
    pub fn peek(&self, name: &str) -> Option<f64> {
        self.vars.borrow().get(name).map(|v| v.value)
    }
}

impl VarBus for MemBus {
    fn get(&self, name: &str) -> BusResult<f64> {
        let vars = self.vars.borrow();
        let var = vars.get(name).ok_or_else(|| BusError::UnknownVar {
            name: name.to_string(),
        })?;
        if !var.info.connected {
            return Err(BusError::Unconnected {
                name: name.to_string(),
            });
        }
        Ok(var.value)
    }

    fn put(&self, name: &str, value: f64) -> BusResult<()> {
        let mut vars = self.vars.borrow_mut();
        let var = vars.get_mut(name).ok_or_else(|| BusError::UnknownVar {
            name: name.to_string(),
        })?;
        if !var.info.connected {
            return Err(BusError::Unconnected {
                name: name.to_string(),
            });
        }
        var.value = value;
        var.info.last_update_s = self.clock.now_s();
        Ok(())
    }

    fn connected(&self, name: &str) -> bool {
        self.vars
            .borrow()
            .get(name)
            .map(|v| v.info.connected)
            .unwrap_or(false)
    }

    fn info(&self, name: &str) -> BusResult<VarInfo> {
        self.vars
            .borrow()
            .get(name)
            .map(|v| v.info.clone())
            .ok_or_else(|| BusError::UnknownVar {
                name: name.to_string(),
            })
    }
}

struct Watcher {
    id: WatchId,
    prefix: String,
    callback: Rc<RefCell<WatchFn>>,
}

#[derive(Default)]
struct StoreInner {
    values: BTreeMap<String, Value>,
    watchers: Vec<Watcher>,
    next_id: WatchId,
    pending: VecDeque<(String, Value)>,
    dispatching: bool,
}

/// In-memory settings store with synchronous watch dispatch.
///
/// Notifications queue up and are drained by the outermost `set` call, so a
/// callback that sets another key does not recurse into dispatch.
#[derive(Default)]
pub struct MemStore {
    inner: RefCell<StoreInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn drain_notifications(&self) {
        loop {
            let (path, value) = {
                let mut inner = self.inner.borrow_mut();
                match inner.pending.pop_front() {
                    Some(item) => item,
                    None => {
                        inner.dispatching = false;
                        return;
                    }
                }
            };
            // Clone the matching callbacks out so the inner borrow is not
            // held while user code runs.
            let callbacks: Vec<Rc<RefCell<WatchFn>>> = {
                let inner = self.inner.borrow();
                inner
                    .watchers
                    .iter()
                    .filter(|w| path.starts_with(w.prefix.as_str()))
                    .map(|w| Rc::clone(&w.callback))
                    .collect()
            };
            for callback in callbacks {
                (callback.borrow_mut())(&path, &value);
            }
        }
    }
}

impl SettingsStore for MemStore {
    fn get(&self, path: &str) -> Option<Value> {
        self.inner.borrow().values.get(path).cloned()
    }

    fn set(&self, path: &str, value: Value) {
        let should_dispatch = {
            let mut inner = self.inner.borrow_mut();
            inner.values.insert(path.to_string(), value.clone());
            inner.pending.push_back((path.to_string(), value));
            if inner.dispatching {
                false
            } else {
                inner.dispatching = true;
                true
            }
        };
        if should_dispatch {
            self.drain_notifications();
        }
    }

    fn watch(&self, prefix: &str, callback: WatchFn) -> WatchId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.watchers.push(Watcher {
            id,
            prefix: prefix.to_string(),
            callback: Rc::new(RefCell::new(callback)),
        });
        id
    }

    fn unwatch(&self, id: WatchId) {
        self.inner.borrow_mut().watchers.retain(|w| w.id != id);
    }

    fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.inner
            .borrow()
            .values
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Recording sink for assertions on operator traffic.
#[derive(Default)]
pub struct MemSink {
    messages: RefCell<Vec<(String, bool)>>,
    alarms: RefCell<Vec<(String, String, AlarmClass)>>,
}

impl MemSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, bool)> {
        self.messages.borrow().clone()
    }

    pub fn alarms(&self) -> Vec<(String, String, AlarmClass)> {
        self.alarms.borrow().clone()
    }

    pub fn error_count(&self) -> usize {
        self.messages.borrow().iter().filter(|(_, e)| *e).count()
    }

    pub fn alarm_count(&self) -> usize {
        self.alarms.borrow().len()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.borrow().iter().any(|(m, _)| m.contains(needle))
    }
}

impl EventSink for MemSink {
    fn message(&self, msg: &str, is_error: bool) {
        self.messages.borrow_mut().push((msg.to_string(), is_error));
    }

    fn alarm(&self, name: &str, msg: &str, class: AlarmClass) {
        self.alarms
            .borrow_mut()
            .push((name.to_string(), msg.to_string(), class));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreExt;
    use cf_core::ManualClock;

    fn bus() -> MemBus {
        MemBus::new(Rc::new(ManualClock::new()))
    }

    #[test]
    fn bus_get_put_round_trip() {
        let bus = bus();
        bus.insert("PUR:HE4:PT206:RDPRESS", 1200.0);
        assert_eq!(bus.get("PUR:HE4:PT206:RDPRESS").unwrap(), 1200.0);
        bus.put("PUR:HE4:PT206:RDPRESS", 1250.0).unwrap();
        assert_eq!(bus.peek("PUR:HE4:PT206:RDPRESS"), Some(1250.0));
    }

    #[test]
    fn bus_unknown_and_disconnected() {
        let bus = bus();
        assert!(matches!(
            bus.get("NOPE"),
            Err(BusError::UnknownVar { .. })
        ));
        bus.insert("X", 1.0);
        bus.mark_disconnected("X");
        assert!(!bus.connected("X"));
        assert!(matches!(bus.get("X"), Err(BusError::Unconnected { .. })));
    }

    #[test]
    fn store_watch_fires_after_write_is_visible() {
        let store = Rc::new(MemStore::new());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let store2 = Rc::clone(&store);
        let seen2 = Rc::clone(&seen);
        store.watch(
            "/equipment/a",
            Box::new(move |path, _value| {
                // The write must already be visible to readers.
                seen2
                    .borrow_mut()
                    .push((path.to_string(), store2.get(path)));
            }),
        );
        store.set("/equipment/a/settings/p", Value::Float(2.0));
        store.set("/equipment/b/settings/p", Value::Float(9.0));
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, Some(Value::Float(2.0)));
    }

    #[test]
    fn store_reentrant_set_from_callback() {
        let store = Rc::new(MemStore::new());
        let store2 = Rc::clone(&store);
        store.watch(
            "/a",
            Box::new(move |_path, value| {
                if value.as_f64() == Some(1.0) {
                    store2.set("/a/echo", Value::Float(2.0));
                }
            }),
        );
        store.set("/a/x", Value::Float(1.0));
        assert_eq!(store.get_f64("/a/echo", 0.0), 2.0);
    }

    #[test]
    fn store_unwatch_stops_callbacks() {
        let store = MemStore::new();
        let hits = Rc::new(RefCell::new(0));
        let hits2 = Rc::clone(&hits);
        let id = store.watch(
            "/a",
            Box::new(move |_, _| {
                *hits2.borrow_mut() += 1;
            }),
        );
        store.set("/a/x", Value::Bool(true));
        store.unwatch(id);
        store.set("/a/x", Value::Bool(false));
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn keys_under_prefix() {
        let store = MemStore::new();
        store.set("/equipment/a/settings/p", Value::Float(1.0));
        store.set("/equipment/a/settings/enabled", Value::Bool(false));
        store.set("/equipment/b/settings/p", Value::Float(2.0));
        let keys = store.keys_under("/equipment/a/settings");
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.starts_with("/equipment/a")));
    }
}
