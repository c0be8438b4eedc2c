//! Socket-side glue for a mesh device process. Split out of `main.rs` into
//! a small library target so `tests/integration.rs` can reach `net`
//! directly, the same way `bpmn-lite-server`'s own modules are exposed to
//! its `tests/integration.rs`.

pub mod net;
pub mod peers;
