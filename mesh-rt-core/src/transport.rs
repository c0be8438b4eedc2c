//! Wire-side transport types shared between the core VM and the socket
//! I/O owned by the `mesh-rt-node` binary crate (§4.B, §6).
//!
//! The teacher's equivalent split (`ProcessStore` trait in
//! `bpmn-lite-core`, actual Postgres/gRPC I/O in `bpmn-lite-server`) is
//! mirrored here: this module defines the message shapes and the codec,
//! the binary crate owns the `TcpListener`/`TcpStream` calls.

use crate::error::CodecError;
use crate::value::{Arena, Value};

/// Default bounded-queue capacity (§3.5).
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Default listen port (§6).
pub const DEFAULT_PORT: u16 = 5557;

/// The seven wire tags (§6, exhaustive).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageTag {
    EventOccur,
    PropAdd,
    PropSet,
    PropGet,
    FuncCall,
    FuncCallRet,
    Reply,
}

impl MessageTag {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageTag::EventOccur => "EVENT_OCCUR",
            MessageTag::PropAdd => "PROP_ADD",
            MessageTag::PropSet => "PROP_SET",
            MessageTag::PropGet => "PROP_GET",
            MessageTag::FuncCall => "FUNC_CALL",
            MessageTag::FuncCallRet => "FUNC_CALL_RET",
            MessageTag::Reply => "REPLY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "EVENT_OCCUR" => MessageTag::EventOccur,
            "PROP_ADD" => MessageTag::PropAdd,
            "PROP_SET" => MessageTag::PropSet,
            "PROP_GET" => MessageTag::PropGet,
            "FUNC_CALL" => MessageTag::FuncCall,
            "FUNC_CALL_RET" => MessageTag::FuncCallRet,
            "REPLY" => MessageTag::Reply,
            _ => return None,
        })
    }
}

/// A decoded wire message (§3.2): tag, payload, and the sender's
/// self-reported `{dev, addr}`.
#[derive(Clone, Debug)]
pub struct WireMessage {
    pub tag: MessageTag,
    pub arg: Value,
    pub src_dev: String,
    pub src_addr: String,
}

/// An item on the bounded output queue: a fully rendered JSON body plus
/// the address to dial. Unlike the original's single string-with-prefix
/// queue entry (a C workaround for a homogeneous `char **` queue), the
/// destination and body are separate fields on a typed struct — Rust's
/// channel item type does not need to be a string.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub dest_addr: String,
    pub body: String,
}

/// Render a full wire message body (§3.2, §6), grounded on
/// `mv_sendrecv_sock.c::mv_message_send`'s
/// `"%s {\"tag\":\"%s\", \"arg\":%s, \"src\":%s}"` format, reimplemented
/// through the typed `Value`/`Arena` codec instead of `sprintf`. Because
/// this always goes through the typed serializer, the missing-comma bug
/// in the original CLI layer (`_command_prop_get`, SPEC_FULL §9 open
/// question 4) cannot occur here.
pub fn encode_message(
    arena: &mut Arena,
    tag: MessageTag,
    arg: Value,
    src_dev: &str,
    src_addr: &str,
) -> Result<String, CodecError> {
    let src = arena.map_new();
    arena.map_add(
        &src,
        Value::String("dev".to_string()),
        Value::String(src_dev.to_string()),
    )?;
    arena.map_add(
        &src,
        Value::String("addr".to_string()),
        Value::String(src_addr.to_string()),
    )?;

    let msg = arena.map_new();
    // Inserted in reverse of desired print order: map_add prepends, and
    // to_str walks head-first, so the *last* insertion prints *first*.
    arena.map_add(&msg, Value::String("src".to_string()), src)?;
    arena.map_add(&msg, Value::String("arg".to_string()), arg)?;
    arena.map_add(
        &msg,
        Value::String("tag".to_string()),
        Value::String(tag.as_str().to_string()),
    )?;
    arena.to_str(&msg)
}

/// Parse a received message body into a typed [`WireMessage`] (§4.C).
pub fn decode_message(arena: &mut Arena, body: &str) -> Result<WireMessage, CodecError> {
    let parsed = arena.from_str(body)?;
    let tag_v = arena.map_lookup(&parsed, &Value::String("tag".to_string()))?;
    let arg = arena.map_lookup(&parsed, &Value::String("arg".to_string()))?;
    let src = arena.map_lookup(&parsed, &Value::String("src".to_string()))?;

    let tag_s = match tag_v {
        Value::String(s) => s,
        _ => return Err(CodecError::Malformed("missing or non-string \"tag\" field")),
    };
    let tag = MessageTag::parse(&tag_s)
        .ok_or(CodecError::Malformed("unrecognized wire tag"))?;

    let src_dev = match arena.map_lookup(&src, &Value::String("dev".to_string()))? {
        Value::String(s) => s,
        _ => return Err(CodecError::Malformed("missing \"src.dev\" field")),
    };
    let src_addr = match arena.map_lookup(&src, &Value::String("addr".to_string()))? {
        Value::String(s) => s,
        _ => return Err(CodecError::Malformed("missing \"src.addr\" field")),
    };

    Ok(WireMessage {
        tag,
        arg,
        src_dev,
        src_addr,
    })
}

/// Split a `tcp://host:port` address into `(host, port)`, grounded on
/// `mv_sendrecv_sock.c::_mq_output_thread`'s manual `strstr` parse.
pub fn parse_tcp_addr(addr: &str) -> Result<(String, u16), CodecError> {
    let rest = addr
        .strip_prefix("tcp://")
        .ok_or(CodecError::Malformed("address missing tcp:// scheme"))?;
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or(CodecError::Malformed("address missing port"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| CodecError::Malformed("address port is not a number"))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips_fields() {
        let mut arena = Arena::new();
        let arg = arena.map_new();
        arena
            .map_add(&arg, Value::String("name".into()), Value::String("volume".into()))
            .unwrap();
        let body = encode_message(
            &mut arena,
            MessageTag::PropGet,
            arg,
            "A",
            "tcp://10.0.0.1:5557",
        )
        .unwrap();

        let decoded = decode_message(&mut arena, &body).unwrap();
        assert_eq!(decoded.tag, MessageTag::PropGet);
        assert_eq!(decoded.src_dev, "A");
        assert_eq!(decoded.src_addr, "tcp://10.0.0.1:5557");
        let name = arena
            .map_lookup(&decoded.arg, &Value::String("name".into()))
            .unwrap();
        assert_eq!(name, Value::String("volume".into()));
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let mut arena = Arena::new();
        let err = decode_message(&mut arena, r#"{"tag":"BOGUS","arg":null,"src":{"dev":"A","addr":"tcp://x:1"}}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn parse_tcp_addr_splits_host_and_port() {
        let (host, port) = parse_tcp_addr("tcp://10.0.0.2:5557").unwrap();
        assert_eq!(host, "10.0.0.2");
        assert_eq!(port, 5557);
    }

    #[test]
    fn parse_tcp_addr_rejects_missing_scheme() {
        assert!(parse_tcp_addr("10.0.0.2:5557").is_err());
    }
}
