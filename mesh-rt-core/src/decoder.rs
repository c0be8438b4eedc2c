//! Inbound message decoding (§4.C), grounded on
//! `original_source/mvrt/rtdecoder.c`'s per-tag dispatch table. That
//! table has a real bug (`_decoder_init` overwrites the `funarg` value
//! slot with the literal string `"dev"`, §9 open question 4 in
//! SPEC_FULL.md) that this dispatch, expressed as a plain `match` instead
//! of an indexed table of value slots, cannot reproduce even by accident.

use crate::error::CodecError;
use crate::events::{EventInstance, EventSender};
use crate::runtime::Runtime;
use crate::transport::{self, MessageTag};
use crate::value::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Every wire tag that drives a system event, and the event it drives.
/// `EVENT_OCCUR` is handled separately since its event name comes from
/// the message itself rather than being fixed by the tag; `PROP_ADD`
/// drives no event at all (§4.C).
fn system_event_for(tag: MessageTag) -> Option<&'static str> {
    match tag {
        MessageTag::PropSet => Some("_E_prop_set"),
        MessageTag::PropGet => Some("_E_prop_get"),
        MessageTag::FuncCall => Some("_E_func_call"),
        MessageTag::FuncCallRet => Some("_E_func_call_ret"),
        MessageTag::Reply => Some("_E_reply"),
        MessageTag::EventOccur | MessageTag::PropAdd => None,
    }
}

/// Decode one wire body and turn it into either a property-table mutation
/// (`PROP_ADD`) or an [`EventInstance`] pushed onto `events_tx`.
async fn handle_body(rt: &Runtime, body: &str, events_tx: &EventSender) -> Result<(), CodecError> {
    let wire = {
        let mut arena = rt.arena.lock();
        transport::decode_message(&mut arena, body)?
    };

    match wire.tag {
        MessageTag::PropAdd => {
            let name = {
                let arena = rt.arena.lock();
                match arena.map_lookup(&wire.arg, &Value::String("name".to_string()))? {
                    Value::String(s) => s,
                    _ => return Err(CodecError::Malformed("PROP_ADD missing \"name\"")),
                }
            };
            rt.tables.prop_add(name);
            Ok(())
        }
        MessageTag::EventOccur => {
            // §4.C: resolved via `lookup(src.dev, arg.name)` — the event is
            // keyed by the *originating* device, not this (receiving) one,
            // since a reactor here may be subscribed to a remote device's
            // named event. The name lives inside `arg`, not as a top-level
            // wire field (§3.2's field list is just `tag`/`arg`/`src`).
            let name = {
                let arena = rt.arena.lock();
                match arena.map_lookup(&wire.arg, &Value::String("name".to_string()))? {
                    Value::String(s) => s,
                    _ => return Err(CodecError::Malformed("EVENT_OCCUR arg missing \"name\"")),
                }
            };
            let instance = EventInstance {
                device: wire.src_dev.clone(),
                name,
                arg: wire.arg,
            };
            events_tx
                .send(instance)
                .await
                .map_err(|_| CodecError::Malformed("event channel closed"))
        }
        tag => {
            let name = system_event_for(tag).expect("every remaining tag maps to a system event");
            let instance = EventInstance {
                device: rt.device_name().to_string(),
                name: name.to_string(),
                arg: wire.arg,
            };
            events_tx
                .send(instance)
                .await
                .map_err(|_| CodecError::Malformed("event channel closed"))
        }
    }
}

/// Drain raw message bodies off `inbound_rx` (read by the binary crate's
/// TCP accept loop) for the lifetime of the runtime, decoding each and
/// forwarding it to the event dispatcher. A malformed body is logged and
/// dropped (§7): one bad message must never take down the decoder loop.
pub async fn run_decoder(
    rt: Arc<Runtime>,
    mut inbound_rx: mpsc::Receiver<String>,
    events_tx: EventSender,
) {
    while let Some(body) = inbound_rx.recv().await {
        if let Err(err) = handle_body(&rt, &body, &events_tx).await {
            tracing::warn!(error = %err, body = %body, "dropping malformed inbound message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::resolve::{NoNativeFunctions, StaticDeviceRegistry};
    use crate::transport::encode_message;
    use tokio::sync::mpsc;

    fn test_runtime() -> Arc<Runtime> {
        let (tx, _rx) = mpsc::channel(8);
        Runtime::new(
            RuntimeConfig::for_test("A"),
            Arc::new(StaticDeviceRegistry::new()),
            Arc::new(NoNativeFunctions),
            tx,
        )
    }

    #[tokio::test]
    async fn prop_add_registers_property_with_no_event() {
        let rt = test_runtime();
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let body = {
            let mut arena = rt.arena.lock();
            let arg = arena.map_new();
            arena
                .map_add(&arg, Value::String("name".into()), Value::String("volume".into()))
                .unwrap();
            encode_message(&mut arena, MessageTag::PropAdd, arg, "B", "tcp://10.0.0.2:5557").unwrap()
        };
        handle_body(&rt, &body, &events_tx).await.unwrap();
        assert_eq!(rt.tables.prop_get("volume"), Some(Value::Null));
        drop(events_tx);
        assert!(events_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn prop_get_drives_system_event() {
        let rt = test_runtime();
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let body = {
            let mut arena = rt.arena.lock();
            let arg = arena.map_new();
            arena
                .map_add(&arg, Value::String("name".into()), Value::String("volume".into()))
                .unwrap();
            encode_message(&mut arena, MessageTag::PropGet, arg, "B", "tcp://10.0.0.2:5557").unwrap()
        };
        handle_body(&rt, &body, &events_tx).await.unwrap();
        let instance = events_rx.recv().await.unwrap();
        assert_eq!(instance.device, "A");
        assert_eq!(instance.name, "_E_prop_get");
    }

    #[tokio::test]
    async fn event_occur_is_keyed_by_the_sending_device_not_this_one() {
        // §4.C: EVENT_OCCUR resolves via `lookup(src.dev, arg.name)` — this
        // device (A) is merely the recipient; the event it looks up is
        // scoped to B, the device that reported the occurrence.
        let rt = test_runtime();
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let body = r#"{"tag":"EVENT_OCCUR","arg":{"name":"button_press"},"src":{"dev":"B","addr":"tcp://10.0.0.2:5557"}}"#;
        handle_body(&rt, body, &events_tx).await.unwrap();
        let instance = events_rx.recv().await.unwrap();
        assert_eq!(instance.device, "B");
        assert_eq!(instance.name, "button_press");
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_without_panicking() {
        let rt = test_runtime();
        let (events_tx, _events_rx) = mpsc::channel(8);
        let err = handle_body(&rt, "not json at all", &events_tx).await.unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedChar { .. }));
    }
}
