use std::collections::HashMap;

use crate::fiber::{Fiber, FiberId};
use crate::job::CounterRef;
use crate::sync::spinlock::SpinLock;

/// A parked fiber's wait condition, per `SPEC_FULL.md` §3.
pub(crate) struct WaitData {
    pub(crate) fiber: Fiber,
    pub(crate) counter: CounterRef,
    pub(crate) desired: i64,
    pub(crate) is_main: bool,
}

impl WaitData {
    fn is_satisfied(&self) -> bool {
        self.counter.as_ref().load_relaxed() <= self.desired
    }
}

/// The transient handoff structure between "a fiber decided to switch away" and "the fiber it
/// switched to has actually started running, proving the first fiber's stack is quiescent".
///
/// Keyed by the *next* fiber (the one about to be resumed), not the fiber that is parking itself;
/// see `SPEC_FULL.md` §4.5/§9 for why the direction matters.
#[derive(Default)]
pub(crate) struct ScheduleList {
    entries: SpinLock<HashMap<FiberId, WaitData>>,
}

impl ScheduleList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, next: FiberId, data: WaitData) {
        let prev = self.entries.lock().insert(next, data);
        debug_assert!(
            prev.is_none(),
            "schedule list already had a pending entry for this fiber"
        );
    }

    /// Remove and return the entry keyed by `fiber_id`, if any. Called once per fiber resumption,
    /// immediately before the fiber is resumed (`SPEC_FULL.md` §9, "`UpdateWaitData` granularity").
    pub(crate) fn take(&self, fiber_id: FiberId) -> Option<WaitData> {
        self.entries.lock().remove(&fiber_id)
    }
}

/// The active set of parked fibers awaiting their counter condition.
#[derive(Default)]
pub(crate) struct WaitList {
    entries: SpinLock<Vec<WaitData>>,
}

impl WaitList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reserve(&self, capacity: usize) {
        self.entries.lock().reserve(capacity);
    }

    pub(crate) fn push(&self, data: WaitData) {
        self.entries.lock().push(data);
    }

    /// Scan for the first entry whose counter condition is satisfied and whose main-thread
    /// affinity matches `is_main_worker`, removing and returning it if found.
    ///
    /// First-match, not oldest-counter: callers must not depend on a particular wake order among
    /// concurrently satisfiable waits (`SPEC_FULL.md` §4.6).
    pub(crate) fn take_satisfied(&self, is_main_worker: bool) -> Option<WaitData> {
        let mut guard = self.entries.lock();
        let pos = guard
            .iter()
            .position(|d| d.is_satisfied() && d.is_main == is_main_worker)?;
        Some(guard.remove(pos))
    }

    pub(crate) fn drain(&self) -> Vec<WaitData> {
        self.entries.lock().drain(..).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
