use std::collections::VecDeque;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::job::CounterRef;
use crate::sync::spinlock::SpinLock;

/// A small stable identifier for a pooled fiber, used as a map key instead of the fiber's address
/// (the `Coroutine` value itself is moved between the pool, the schedule list, the wait list, and
/// "currently executing" as ownership of it changes hands, so it cannot double as a map key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FiberId(pub usize);

/// What a suspending fiber asks the driving loop (`crate::worker::drive`) to do on its behalf.
///
/// A coroutine cannot take ownership of the `Fiber` value that represents its own execution (that
/// value lives in the driving loop's local variable, not in anything reachable from inside the
/// coroutine body), so instead of inserting itself into the schedule list or fiber pool directly,
/// as the reference does with a bare `GetCurrentFiber()` pointer, the body yields a descriptor of
/// the intended bookkeeping, and the driving loop performs the mutation immediately after the
/// `resume()` call that just quiesced it returns. See `SPEC_FULL.md` §9 for the full equivalence
/// argument.
pub(crate) enum Handoff {
    /// Park the suspending fiber under this wait condition (to be promoted into the wait list the
    /// next time `next` is resumed), then resume `next`.
    ParkAndSwitch {
        next: Fiber,
        counter: CounterRef,
        desired: i64,
        is_main: bool,
    },
    /// Return the suspending fiber to the pool, then resume `next`.
    ReleaseAndSwitch { next: Fiber },
}

pub(crate) type FiberYielder = Yielder<(), Handoff>;
type FiberCoroutine = Coroutine<(), Handoff, ()>;

/// A pooled, reusable stackful coroutine. Every fiber shares the same entry routine (the worker
/// loop in `crate::worker`); what distinguishes one from another is only its own stack and
/// suspended position within that routine.
pub(crate) struct Fiber {
    id: FiberId,
    co: FiberCoroutine,
}

impl Fiber {
    pub(crate) fn new(
        id: FiberId,
        stack_size: usize,
        body: impl FnOnce(&FiberYielder, ()) + 'static,
    ) -> Self {
        let stack = DefaultStack::new(stack_size).expect("failed to allocate fiber stack");
        Self {
            id,
            co: Coroutine::with_stack(stack, body),
        }
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn resume(&mut self) -> CoroutineResult<Handoff, ()> {
        self.co.resume(())
    }
}

/// A bounded pool of pre-created fibers.
///
/// Capacity is fixed at construction (`SchedulerConfig::num_fibers`); `acquire` on an empty pool is
/// treated as fatal, per `SPEC_FULL.md` §4.2 and the resolution of Open Question (d): the designer
/// evidently intended the pool size to bound the maximum number of concurrently outstanding waits,
/// and this reimplementation keeps that bound rather than growing the pool dynamically.
pub(crate) struct FiberPool {
    fibers: SpinLock<VecDeque<Fiber>>,
    capacity: usize,
}

impl FiberPool {
    pub(crate) fn new(fibers: Vec<Fiber>) -> Self {
        let capacity = fibers.len();
        Self {
            fibers: SpinLock::new(fibers.into_iter().collect()),
            capacity,
        }
    }

    pub(crate) fn acquire(&self) -> Fiber {
        let mut guard = self.fibers.lock();
        match guard.pop_front() {
            Some(fiber) => fiber,
            None => {
                log::error!(
                    target: "scheduler",
                    "fiber pool exhausted (capacity {}): too many concurrently outstanding waits",
                    self.capacity,
                );
                drop(guard);
                panic!("fiber pool exhausted: too many concurrently outstanding waits");
            }
        }
    }

    pub(crate) fn release(&self, fiber: Fiber) {
        let mut guard = self.fibers.lock();
        guard.push_back(fiber);
        debug_assert!(guard.len() <= self.capacity);
    }

    /// The number of fibers currently sitting idle in the pool.
    pub(crate) fn len(&self) -> usize {
        self.fibers.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drain and drop every fiber still in the pool, used by `Deinitialize`.
    pub(crate) fn drain(&self) -> Vec<Fiber> {
        self.fibers.lock().drain(..).collect()
    }
}
