use thiserror::Error;

/// Failures from encoding/decoding the wire grammar (§4.A).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),
    #[error("unexpected character {found:?} at byte {at}, expected {expected}")]
    UnexpectedChar {
        at: usize,
        found: char,
        expected: &'static str,
    },
    #[error("string literal exceeds 1023 byte limit")]
    StringTooLong,
    #[error("token budget of 65536 tokens exceeded")]
    TooManyTokens,
    #[error("serialized form exceeds 64 KiB limit")]
    BufferTooLarge,
    #[error("map key must be a primitive value, got {0}")]
    NonPrimitiveKey(&'static str),
    #[error("malformed wire message: {0}")]
    Malformed(&'static str),
}

/// Faults raised while executing reactor bytecode (§4.E).
#[derive(Debug, Error)]
pub enum VmFault {
    #[error("stack underflow at ip {ip}")]
    StackUnderflow { ip: u32 },
    #[error("stack overflow: exceeded limit of {limit}")]
    StackOverflow { limit: usize },
    #[error("division by zero at ip {ip}")]
    DivideByZero { ip: u32 },
    #[error("type mismatch at ip {ip}: expected {expected}, got {found}")]
    TypeMismatch {
        ip: u32,
        expected: &'static str,
        found: &'static str,
    },
    #[error("operand is not a primitive value, cannot compare")]
    NotPrimitive,
    #[error("instruction pointer {ip} out of bounds (program has {len} instructions)")]
    IpOutOfBounds { ip: u32, len: usize },
    #[error("no such property: {0}")]
    NoSuchProperty(String),
    #[error("no such function: {0}")]
    NoSuchFunction(String),
    #[error("native function {0} arity mismatch")]
    NativeArityMismatch(String),
    #[error("continuation table exhausted")]
    ContinuationTableFull,
    #[error("device registry error: {0}")]
    DeviceRegistry(String),
    #[error("native call to {0} produced no result")]
    NativeCallFailed(String),
    #[error("unimplemented: {0}")]
    Unimplemented(&'static str),
    #[error("outbound message channel closed")]
    OutboundClosed,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Failures in the transport layer (§4.B, §7).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to parse destination address {0:?}")]
    BadAddress(String),
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("no usable network interface found (need eth0 or wlan0)")]
    NoSelfAddress,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
