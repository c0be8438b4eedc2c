//! The `Runtime` context struct (§9 design note: avoid ambient/global
//! module state; thread one instance through every component instead).

use crate::config::RuntimeConfig;
use crate::continuation::ContinuationTable;
use crate::resolve::{DeviceRegistry, NativeResolver};
use crate::tables::RuntimeTables;
use crate::transport::OutboundMessage;
use crate::value::Arena;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything a single device process needs, instantiated once at
/// startup. Grounded on `bpmn-lite-core/src/engine.rs`'s `BpmnLiteEngine`
/// facade (a struct wrapping shared state that every operation goes
/// through), generalized from "wraps one store" to "wraps every runtime
/// table plus its external collaborators".
pub struct Runtime {
    pub config: RuntimeConfig,
    pub arena: Mutex<Arena>,
    pub tables: RuntimeTables,
    pub continuations: ContinuationTable,
    pub devices: Arc<dyn DeviceRegistry>,
    pub natives: Arc<dyn NativeResolver>,
    pub outbound: mpsc::Sender<OutboundMessage>,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        devices: Arc<dyn DeviceRegistry>,
        natives: Arc<dyn NativeResolver>,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Arc<Runtime> {
        let tables = RuntimeTables::new();
        crate::tables::init_system_events(&tables, &config.device_name);
        crate::sysreactors::install(&tables);
        // sysreactors were installed after system events were registered
        // against (then-absent) reactors; re-run registration so the
        // newly installed reactors get bound (mirrors
        // `mvrt_system_reactor_init` running after reactor definitions are
        // loaded, per `sysinit.c`).
        crate::tables::init_system_events(&tables, &config.device_name);

        Arc::new(Runtime {
            config,
            arena: Mutex::new(Arena::new()),
            tables,
            continuations: ContinuationTable::new(),
            devices,
            natives,
            outbound,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.config.device_name
    }

    pub fn self_addr(&self) -> &str {
        self.config
            .self_addr_override
            .as_deref()
            .expect("Runtime requires a resolved self address (RuntimeConfig.self_addr_override)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{NoNativeFunctions, StaticDeviceRegistry};

    #[tokio::test]
    async fn new_runtime_binds_system_reactors() {
        let (tx, _rx) = mpsc::channel(8);
        let rt = Runtime::new(
            RuntimeConfig::for_test("A"),
            Arc::new(StaticDeviceRegistry::new()),
            Arc::new(NoNativeFunctions),
            tx,
        );
        for (ev, re) in crate::tables::SYSTEM_EVENTS
            .iter()
            .zip(crate::tables::SYSTEM_REACTORS.iter())
        {
            assert_eq!(rt.tables.event_reactors("A", ev), vec![re.to_string()]);
        }
    }
}
