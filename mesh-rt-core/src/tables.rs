//! Runtime tables (§3.3, §4.G): properties, functions, events, and
//! reactors. Unlike `ProcessStore` in the teacher (a pluggable, async
//! trait-object backend), these tables are process-scoped in-memory state
//! with no alternate backend — grounded on the *shape* of
//! `bpmn-lite-core/src/store_memory.rs` (one lock guarding several maps),
//! not on its pluggability.

use crate::value::Value;
use instr::Program;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::instr;

/// A named, mutable, remotely-readable cell (§3.3).
#[derive(Clone, Debug)]
pub struct Property {
    pub value: Value,
}

/// How many integer arguments a native function expects (§9 design note:
/// "expose an explicit declared-arity field on Func records for future
/// extension"). The original infers arity purely from the shape of the
/// call argument (a bare `Int` vs a `Cons`); that inference is preserved
/// for dispatch, but a `Func::Native` now also carries what it *expects*,
/// so a caller passing the wrong shape faults instead of silently calling
/// the wrong native entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    One,
    Two,
}

/// A callable registered in the function table (§3.3).
#[derive(Clone)]
pub enum Func {
    /// Resolved via the out-of-scope dynamic-library loader, by symbol
    /// name within a shared library (§1, §4.E.2).
    Native {
        lib: String,
        symbol: String,
        arity: Arity,
    },
    /// Authored reactor bytecode (only system reactors use this path in
    /// this version; the bytecode compiler that would populate user
    /// functions is out of scope, §1).
    Bytecode { code: Arc<Program> },
}

/// A named, device-scoped signal (§3.3). `reactors` holds the names of
/// reactors currently subscribed, preserving registration order.
#[derive(Clone, Debug, Default)]
pub struct EventDef {
    pub reactors: Vec<String>,
}

/// A registered reactor body (§3.3).
#[derive(Clone)]
pub struct Reactor {
    pub code: Arc<Program>,
}

#[derive(Default)]
struct Inner {
    props: HashMap<String, Property>,
    funcs: HashMap<String, Func>,
    events: HashMap<(String, String), EventDef>,
    reactors: HashMap<String, Reactor>,
}

/// Process-scoped registries consulted by the decoder (C) and the VM (E).
/// Lifecycle is runtime start to shutdown (§3.3).
#[derive(Default)]
pub struct RuntimeTables {
    inner: RwLock<Inner>,
}

impl RuntimeTables {
    pub fn new() -> Self {
        Self::default()
    }

    // ── properties ──

    pub fn prop_add(&self, name: impl Into<String>) {
        self.inner
            .write()
            .props
            .entry(name.into())
            .or_insert(Property { value: Value::Null });
    }

    pub fn prop_get(&self, name: &str) -> Option<Value> {
        self.inner.read().props.get(name).map(|p| p.value.clone())
    }

    /// Returns `false` if the property does not exist (§7 lookup miss).
    pub fn prop_set(&self, name: &str, value: Value) -> bool {
        match self.inner.write().props.get_mut(name) {
            Some(p) => {
                p.value = value;
                true
            }
            None => false,
        }
    }

    // ── functions ──

    pub fn func_add(&self, name: impl Into<String>, f: Func) {
        self.inner.write().funcs.insert(name.into(), f);
    }

    pub fn func_lookup(&self, name: &str) -> Option<Func> {
        self.inner.read().funcs.get(name).cloned()
    }

    // ── reactors ──

    pub fn reactor_add(&self, name: impl Into<String>, code: Arc<Program>) {
        self.inner
            .write()
            .reactors
            .insert(name.into(), Reactor { code });
    }

    pub fn reactor_lookup(&self, name: &str) -> Option<Reactor> {
        self.inner.read().reactors.get(name).cloned()
    }

    // ── events ──

    pub fn event_register(&self, device: impl Into<String>, name: impl Into<String>) {
        self.inner
            .write()
            .events
            .entry((device.into(), name.into()))
            .or_default();
    }

    pub fn event_add_reactor(&self, device: &str, name: &str, reactor: impl Into<String>) {
        self.inner
            .write()
            .events
            .entry((device.to_string(), name.to_string()))
            .or_default()
            .reactors
            .push(reactor.into());
    }

    pub fn event_reactors(&self, device: &str, name: &str) -> Vec<String> {
        self.inner
            .read()
            .events
            .get(&(device.to_string(), name.to_string()))
            .map(|e| e.reactors.clone())
            .unwrap_or_default()
    }

    pub fn event_exists(&self, device: &str, name: &str) -> bool {
        self.inner
            .read()
            .events
            .contains_key(&(device.to_string(), name.to_string()))
    }
}

/// The six system events / reactors registered at startup, keyed by the
/// device's own name (§4.G, grounded on `original_source/mvrt/sysinit.c`).
pub const SYSTEM_EVENTS: &[&str] = &[
    "_E_prop_get",
    "_E_prop_set",
    "_E_func_call",
    "_E_func_call_ret",
    "_E_func_return",
    "_E_reply",
];

pub const SYSTEM_REACTORS: &[&str] = &[
    "_R_prop_get",
    "_R_prop_set",
    "_R_func_call",
    "_R_func_call_ret",
    "_R_func_return",
    "_R_reply",
];

/// Registers the system events (and, where a matching hand-authored
/// reactor has been installed via [`crate::sysreactors::install`], binds
/// the reactor to its event) for `device`. Mirrors
/// `mvrt_system_event_init` + `mvrt_system_reactor_init`.
pub fn init_system_events(tables: &RuntimeTables, device: &str) {
    for name in SYSTEM_EVENTS {
        tables.event_register(device, *name);
    }
    for (ev, re) in SYSTEM_EVENTS.iter().zip(SYSTEM_REACTORS.iter()) {
        if tables.reactor_lookup(re).is_some() {
            tables.event_add_reactor(device, ev, *re);
        } else {
            tracing::warn!(reactor = re, "system reactor not defined");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prop_add_then_get_starts_null() {
        let t = RuntimeTables::new();
        t.prop_add("volume");
        assert_eq!(t.prop_get("volume"), Some(Value::Null));
    }

    #[test]
    fn prop_set_on_missing_prop_fails() {
        let t = RuntimeTables::new();
        assert!(!t.prop_set("missing", Value::Int(1)));
    }

    #[test]
    fn prop_set_then_get_round_trips() {
        let t = RuntimeTables::new();
        t.prop_add("volume");
        assert!(t.prop_set("volume", Value::Int(7)));
        assert_eq!(t.prop_get("volume"), Some(Value::Int(7)));
    }

    #[test]
    fn system_events_registered_without_reactors_logs_and_continues() {
        let t = RuntimeTables::new();
        init_system_events(&t, "dev1");
        for name in SYSTEM_EVENTS {
            assert!(t.event_exists("dev1", name));
            assert!(t.event_reactors("dev1", name).is_empty());
        }
    }

    #[test]
    fn system_reactor_is_bound_when_present() {
        let t = RuntimeTables::new();
        t.reactor_add("_R_prop_get", Arc::new(vec![]));
        init_system_events(&t, "dev1");
        assert_eq!(t.event_reactors("dev1", "_E_prop_get"), vec!["_R_prop_get"]);
    }
}
