//! Hand-assembled bytecode for the six system reactors (§4.G), grounded on
//! `original_source/mvrt/rteval.c`'s internal `_eval_prop_get`/
//! `_eval_prop_set`/`_eval_call_func`/`_eval_call_continue` handler bodies,
//! translated into the opcode sequences a real reactor program would need
//! to produce the same wire behavior. The original implements these
//! handlers as C functions called directly by the dispatcher rather than
//! as interpreted bytecode; expressing them as `Program`s here lets every
//! system behavior run through the same `vm::eval` path as an authored
//! reactor, with no special-cased dispatch.

use crate::instr::{Immediate, Instr, Opcode, Program};
use crate::tables::RuntimeTables;
use std::sync::Arc;

fn getf(key: &str) -> Vec<Instr> {
    vec![
        Instr::plain(Opcode::GetArg),
        Instr::new(Opcode::PushS, Immediate::Str(key.to_string())),
        Instr::plain(Opcode::GetF),
    ]
}

/// Handles an incoming `PROP_GET` (arg: `{name, retid, retaddr}`): look up
/// the named local property and reply with its value.
fn prop_get_reactor() -> Program {
    let mut code = Vec::new();
    code.extend(getf("name")); // [name]
    code.push(Instr::plain(Opcode::PropGet)); // [value]
    code.extend(getf("retaddr")); // [value, retaddr]
    code.extend(getf("retid")); // [value, retaddr, retid]
    code.push(Instr::plain(Opcode::CallReturn));
    code.push(Instr::plain(Opcode::Ret));
    code
}

/// Handles an incoming `PROP_SET` (arg: `{name, value}`): set the named
/// local property. No reply; `PROP_SET` is fire-and-forget (§4.E.1).
fn prop_set_reactor() -> Program {
    let mut code = Vec::new();
    code.extend(getf("value")); // [value]
    code.extend(getf("name")); // [value, name]
    code.push(Instr::plain(Opcode::PropSet));
    code.push(Instr::plain(Opcode::Ret));
    code
}

/// Handles an incoming `FUNC_CALL` (arg: `{name, funarg}`): invoke the
/// named local function, discarding any result (§4.E.2, fire-and-forget).
fn func_call_reactor() -> Program {
    let mut code = Vec::new();
    code.extend(getf("funarg")); // [funarg]
    code.extend(getf("name")); // [funarg, name]
    code.push(Instr::plain(Opcode::CallFunc));
    code.push(Instr::plain(Opcode::Ret));
    code
}

/// Handles an incoming `FUNC_CALL_RET` (arg: `{name, funarg, retid,
/// retaddr}`): invoke the named local function and reply with its result.
fn func_call_ret_reactor() -> Program {
    let mut code = Vec::new();
    code.extend(getf("funarg")); // [funarg]
    code.extend(getf("name")); // [funarg, name]
    code.push(Instr::plain(Opcode::CallFuncRet)); // local call, pushes retval: [retval]
    code.extend(getf("retaddr")); // [retval, retaddr]
    code.extend(getf("retid")); // [retval, retaddr, retid]
    code.push(Instr::plain(Opcode::CallReturn));
    code.push(Instr::plain(Opcode::Ret));
    code
}

/// Reserved hook for a local call-completion notification (arg shaped
/// like `_R_reply`'s: `{retid, retval}`). Not currently triggered by the
/// decoder — `FUNC_CALL_RET` replies inline via `func_call_ret_reactor`
/// instead — kept for symmetry with the six-entry system event/reactor
/// table in `sysinit.c` and as a ready extension point for a future
/// asynchronous local-call path.
fn func_return_reactor() -> Program {
    let mut code = Vec::new();
    code.extend(getf("retval")); // [retval]
    code.extend(getf("retid")); // [retval, retid]
    code.push(Instr::plain(Opcode::CallReturn));
    code.push(Instr::plain(Opcode::Ret));
    code
}

/// Handles an incoming `REPLY` (arg: `{retid, retval}`): resume the
/// suspended continuation the reply answers.
fn reply_reactor() -> Program {
    let mut code = Vec::new();
    code.extend(getf("retval")); // [retval]
    code.extend(getf("retid")); // [retval, retid]
    code.push(Instr::plain(Opcode::CallContinue));
    code.push(Instr::plain(Opcode::Ret));
    code
}

/// Install all six system reactors into `tables`. Called once per
/// `Runtime` at startup, before the first (of two) `init_system_events`
/// passes so the second pass can bind them (`runtime.rs`).
pub fn install(tables: &RuntimeTables) {
    tables.reactor_add("_R_prop_get", Arc::new(prop_get_reactor()));
    tables.reactor_add("_R_prop_set", Arc::new(prop_set_reactor()));
    tables.reactor_add("_R_func_call", Arc::new(func_call_reactor()));
    tables.reactor_add("_R_func_call_ret", Arc::new(func_call_ret_reactor()));
    tables.reactor_add("_R_func_return", Arc::new(func_return_reactor()));
    tables.reactor_add("_R_reply", Arc::new(reply_reactor()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::resolve::{NoNativeFunctions, StaticDeviceRegistry};
    use crate::runtime::Runtime;
    use crate::value::Value;
    use crate::vm::{eval, Context, EvalOutcome};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn prop_get_reactor_replies_with_local_value() {
        let (tx, mut rx) = mpsc::channel(8);
        let rt = Runtime::new(
            RuntimeConfig::for_test("A"),
            Arc::new(StaticDeviceRegistry::new()),
            Arc::new(NoNativeFunctions),
            tx,
        );
        rt.tables.prop_add("volume");
        rt.tables.prop_set("volume", Value::Int(5));

        let reactor = rt.tables.reactor_lookup("_R_prop_get").unwrap();
        let arg = {
            let mut arena = rt.arena.lock();
            let m = arena.map_new();
            arena
                .map_add(&m, Value::String("retaddr".into()), Value::String("tcp://127.0.0.1:1".into()))
                .unwrap();
            arena.map_add(&m, Value::String("retid".into()), Value::Int(7)).unwrap();
            arena.map_add(&m, Value::String("name".into()), Value::String("volume".into())).unwrap();
            m
        };
        let ctx = Context::new(reactor.code, arg);
        match eval(&rt, ctx).await.unwrap() {
            EvalOutcome::Returned(_) => {}
            _ => panic!("expected Returned"),
        }
        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.dest_addr, "tcp://127.0.0.1:1");
        assert!(sent.body.contains("REPLY"));
    }

    #[tokio::test]
    async fn reply_reactor_resumes_waiting_continuation() {
        let (tx, _rx) = mpsc::channel(8);
        let rt = Runtime::new(
            RuntimeConfig::for_test("A"),
            Arc::new(StaticDeviceRegistry::new().with("B", "tcp://127.0.0.1:9")),
            Arc::new(NoNativeFunctions),
            tx,
        );
        let code = Arc::new(vec![
            Instr::new(Opcode::PushS, Immediate::Str("B:volume".to_string())),
            Instr::plain(Opcode::PropGet),
            Instr::plain(Opcode::Ret),
        ]);
        let retid = match eval(&rt, Context::new(code, Value::Null)).await.unwrap() {
            EvalOutcome::Suspended(id) => id,
            _ => panic!("expected Suspended"),
        };

        let reactor = rt.tables.reactor_lookup("_R_reply").unwrap();
        let arg = {
            let mut arena = rt.arena.lock();
            let m = arena.map_new();
            arena.map_add(&m, Value::String("retval".into()), Value::Int(42)).unwrap();
            arena.map_add(&m, Value::String("retid".into()), Value::Int(retid as i32)).unwrap();
            m
        };
        let ctx = Context::new(reactor.code, arg);
        match eval(&rt, ctx).await.unwrap() {
            EvalOutcome::Returned(_) => {}
            _ => panic!("expected Returned"),
        }
        assert!(rt.continuations.is_empty());
    }
}
