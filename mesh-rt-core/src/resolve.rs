//! External collaborators the VM depends on but which this crate does not
//! implement (§1): device-address lookup and native-symbol resolution.
//! Grounded on `bpmn-lite-core/src/store.rs`'s `#[async_trait] pub trait
//! ProcessStore` — an async trait object the engine holds behind `Arc<dyn
//! ...>` and calls through exclusively, enabling pluggable backends.

use async_trait::async_trait;

/// Resolves a device name to its transport address (`tcp://host:port`).
/// In the original this is `mv_device_addr`; out of scope here (§1) beyond
/// its contract.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn resolve(&self, device: &str) -> Option<String>;
}

/// Resolves and invokes a native function by symbol name. In the original
/// this is `dlopen`/`dlsym` against a shared library (§4.E.2); out of
/// scope here beyond its contract. Arity is fixed by the shape of the
/// call argument: a bare `Int` calls the one-argument form, a `Cons` of
/// two ints calls the two-argument form (§4.E.2).
#[async_trait]
pub trait NativeResolver: Send + Sync {
    async fn call1(&self, lib: &str, symbol: &str, arg1: i32) -> Option<i32>;
    async fn call2(&self, lib: &str, symbol: &str, arg1: i32, arg2: i32) -> Option<i32>;
}

/// A `NativeResolver` that resolves nothing, for devices with no native
/// functions registered and for tests that never exercise `CALL_FUNC`
/// against a native target.
pub struct NoNativeFunctions;

#[async_trait]
impl NativeResolver for NoNativeFunctions {
    async fn call1(&self, _lib: &str, _symbol: &str, _arg1: i32) -> Option<i32> {
        None
    }

    async fn call2(&self, _lib: &str, _symbol: &str, _arg1: i32, _arg2: i32) -> Option<i32> {
        None
    }
}

/// A `DeviceRegistry` backed by a fixed, explicitly configured name→address
/// map. Sufficient for tests and small fixed topologies; a production
/// deployment would supply its own registry (service discovery, a config
/// file watcher, etc.) through the same trait.
#[derive(Default)]
pub struct StaticDeviceRegistry {
    addrs: std::collections::HashMap<String, String>,
}

impl StaticDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, device: impl Into<String>, addr: impl Into<String>) -> Self {
        self.addrs.insert(device.into(), addr.into());
        self
    }

    pub fn insert(&mut self, device: impl Into<String>, addr: impl Into<String>) {
        self.addrs.insert(device.into(), addr.into());
    }
}

#[async_trait]
impl DeviceRegistry for StaticDeviceRegistry {
    async fn resolve(&self, device: &str) -> Option<String> {
        self.addrs.get(device).cloned()
    }
}
