//! Event dispatch (§4.D): turns a decoded wire message or a locally
//! triggered signal into reactor invocations. Grounded on
//! `rteval.c`'s event loop, which looks up every reactor subscribed to an
//! event and runs each one to completion or suspension without waiting
//! for the others — reactors never block each other.

use crate::runtime::Runtime;
use crate::value::Value;
use crate::vm::{self, Context};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One occurrence of a named event on this device, carrying its payload.
#[derive(Clone, Debug)]
pub struct EventInstance {
    pub device: String,
    pub name: String,
    pub arg: Value,
}

pub type EventSender = mpsc::Sender<EventInstance>;
pub type EventReceiver = mpsc::Receiver<EventInstance>;

/// Drain `events_rx` for the lifetime of the runtime, running every
/// reactor subscribed to each event as an independent spawned task
/// (§3.5: one event can fan out to several reactors that must not block
/// each other). Each reactor invocation starts a fresh [`Context`] whose
/// `GETARG` value is the event's payload.
pub async fn run_dispatcher(rt: Arc<Runtime>, mut events_rx: EventReceiver) {
    while let Some(event) = events_rx.recv().await {
        let reactor_names = rt.tables.event_reactors(&event.device, &event.name);
        if reactor_names.is_empty() {
            tracing::debug!(event = %event.name, "no reactors subscribed");
            continue;
        }
        for reactor_name in reactor_names {
            let Some(reactor) = rt.tables.reactor_lookup(&reactor_name) else {
                tracing::warn!(reactor = %reactor_name, "event names a reactor that is not registered");
                continue;
            };
            let rt = Arc::clone(&rt);
            let arg = event.arg.clone();
            let reactor_name = reactor_name.clone();
            tokio::spawn(async move {
                let ctx = Context::new(reactor.code, arg);
                if let Err(fault) = vm::eval(&rt, ctx).await {
                    tracing::warn!(reactor = %reactor_name, error = %fault, "reactor faulted");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::instr::{Immediate, Instr, Opcode};
    use crate::resolve::{NoNativeFunctions, StaticDeviceRegistry};
    use std::time::Duration;

    #[tokio::test]
    async fn dispatcher_runs_subscribed_reactor_to_completion() {
        let (outbound_tx, _outbound_rx) = mpsc::channel(8);
        let rt = Runtime::new(
            RuntimeConfig::for_test("A"),
            Arc::new(StaticDeviceRegistry::new()),
            Arc::new(NoNativeFunctions),
            outbound_tx,
        );
        rt.tables.prop_add("hits");
        rt.tables.prop_set("hits", Value::Int(0));
        let code = Arc::new(vec![
            Instr::new(Opcode::PushI, Immediate::Int(1)),
            Instr::new(Opcode::PushS, Immediate::Str("hits".to_string())),
            Instr::plain(Opcode::PropSet),
            Instr::plain(Opcode::Ret),
        ]);
        rt.tables.reactor_add("bump_hits", code);
        rt.tables.event_register("A", "on_tick");
        rt.tables.event_add_reactor("A", "on_tick", "bump_hits");

        let (events_tx, events_rx) = mpsc::channel(8);
        let dispatcher = tokio::spawn(run_dispatcher(Arc::clone(&rt), events_rx));
        events_tx
            .send(EventInstance {
                device: "A".to_string(),
                name: "on_tick".to_string(),
                arg: Value::Null,
            })
            .await
            .unwrap();
        drop(events_tx);
        tokio::time::timeout(Duration::from_secs(1), dispatcher)
            .await
            .expect("dispatcher did not finish")
            .unwrap();

        assert_eq!(rt.tables.prop_get("hits"), Some(Value::Int(1)));
    }

    #[tokio::test]
    async fn dispatcher_ignores_event_with_no_subscribers() {
        let (outbound_tx, _outbound_rx) = mpsc::channel(8);
        let rt = Runtime::new(
            RuntimeConfig::for_test("A"),
            Arc::new(StaticDeviceRegistry::new()),
            Arc::new(NoNativeFunctions),
            outbound_tx,
        );
        let (events_tx, events_rx) = mpsc::channel(8);
        let dispatcher = tokio::spawn(run_dispatcher(rt, events_rx));
        events_tx
            .send(EventInstance {
                device: "A".to_string(),
                name: "nobody_listens".to_string(),
                arg: Value::Null,
            })
            .await
            .unwrap();
        drop(events_tx);
        tokio::time::timeout(Duration::from_secs(1), dispatcher)
            .await
            .expect("dispatcher did not finish")
            .unwrap();
    }
}
