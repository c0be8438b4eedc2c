//! Continuation registry (§4.F): tracks VM contexts suspended at a remote
//! property-get or function-call-with-return, keyed by a monotonically
//! increasing return id.

use crate::vm::Context;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Return-id type; `u32` per §3.4.
pub type RetId = u32;

/// Grounded on `bpmn-lite-core/src/store_memory.rs`'s single-lock-over-map
/// pattern, scaled down to exactly the one table this component owns.
#[derive(Default)]
pub struct ContinuationTable {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: RetId,
    live: HashMap<RetId, Context>,
}

impl ContinuationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a continuation and return its fresh id. Every VM suspension
    /// point calls this exactly once before yielding (§3.5 invariant).
    pub fn install(&self, ctx: Context) -> Option<RetId> {
        let mut inner = self.inner.lock();
        let start = inner.next_id;
        loop {
            let id = inner.next_id;
            inner.next_id = inner.next_id.wrapping_add(1);
            if !inner.live.contains_key(&id) {
                inner.live.insert(id, ctx);
                return Some(id);
            }
            if inner.next_id == start {
                // wrapped all the way around with no free id
                return None;
            }
        }
    }

    /// Single-shot lookup: a live continuation is removed the moment it is
    /// resumed (§3.5 invariant 4 / §8 quantified invariant "continuation
    /// single-shot").
    pub fn take(&self, id: RetId) -> Option<Context> {
        self.inner.lock().live.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::sync::Arc;

    fn empty_ctx() -> Context {
        Context {
            code: Arc::new(vec![]),
            ip: 0,
            stack: vec![],
            arg: Value::Null,
        }
    }

    #[test]
    fn install_then_take_is_single_shot() {
        let table = ContinuationTable::new();
        let id = table.install(empty_ctx()).unwrap();
        assert!(table.take(id).is_some());
        assert!(table.take(id).is_none(), "second take of same id must miss");
    }

    #[test]
    fn ids_are_distinct_across_installs() {
        let table = ContinuationTable::new();
        let a = table.install(empty_ctx()).unwrap();
        let b = table.install(empty_ctx()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_id_is_dropped_not_panicked() {
        let table = ContinuationTable::new();
        assert!(table.take(999).is_none());
    }
}
