//! Core types and the reactor VM for a single mesh device process (§1).
//!
//! This crate has no socket or process-entry code of its own — that
//! lives in the `mesh-rt-node` binary crate, mirroring the
//! `bpmn-lite-core`/`bpmn-lite-server` split this workspace grew out of.

pub mod config;
pub mod continuation;
pub mod decoder;
pub mod error;
pub mod events;
pub mod instr;
pub mod resolve;
pub mod runtime;
pub mod sysreactors;
pub mod tables;
pub mod transport;
pub mod value;
pub mod vm;

pub use config::RuntimeConfig;
pub use error::{CodecError, TransportError, VmFault};
pub use runtime::Runtime;
pub use value::{Arena, Handle, Value};
