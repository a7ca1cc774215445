//! The coroutine worker loop and the per-thread driving loop that resumes it.
//!
//! A fiber never touches the schedule list, wait list, or fiber pool directly; it only yields a
//! [`Handoff`] describing what it wants done, and the thread that called `resume()` (the "driving
//! loop", [`drive`]) performs the corresponding mutation once `resume()` returns control to it.
//! This split exists because a running coroutine has no way to take ownership of the `Fiber` value
//! that represents its own execution; see `SPEC_FULL.md` §9 for the full argument.

use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use corosensei::CoroutineResult;

use crate::fiber::{Fiber, FiberId, FiberYielder, Handoff};
use crate::job::{Counter, CounterRef};
use crate::scheduler::Shared;
use crate::wait::WaitData;

thread_local! {
    static IS_MAIN_THREAD: Cell<bool> = const { Cell::new(false) };
    static CURRENT_CONTEXT: Cell<Option<(*const FiberYielder, FiberId)>> = const { Cell::new(None) };
}

/// Mark the calling OS thread as the one and only main thread, per `SPEC_FULL.md` §4.7 step 1.
/// Called once, by `initialize`, from the thread that calls it.
pub(crate) fn mark_main_thread() {
    IS_MAIN_THREAD.with(|c| c.set(true));
}

pub(crate) fn is_main_thread() -> bool {
    IS_MAIN_THREAD.with(|c| c.get())
}

/// Whether the calling OS thread is currently executing inside a pooled fiber.
pub(crate) fn in_fiber_context() -> bool {
    CURRENT_CONTEXT.with(|c| c.get().is_some())
}

fn set_current_context(yielder: &FiberYielder, id: FiberId) {
    CURRENT_CONTEXT.with(|c| c.set(Some((yielder as *const FiberYielder, id))));
}

/// Suspend the running fiber with `handoff`, then re-establish the thread-local context once
/// control returns here (possibly on a different OS thread than the one that suspended it).
fn suspend(yielder: &FiberYielder, id: FiberId, handoff: Handoff) {
    yielder.suspend(handoff);
    set_current_context(yielder, id);
}

/// Construct a pooled fiber whose body is the worker loop below.
pub(crate) fn make_fiber(id: FiberId, stack_size: usize, shared: Arc<Shared>) -> Fiber {
    Fiber::new(id, stack_size, move |yielder, ()| worker_body(yielder, id, &shared))
}

/// The body every pooled fiber runs, from the first time it is resumed until the scheduler shuts
/// down (`SPEC_FULL.md` §4.6).
fn worker_body(yielder: &FiberYielder, id: FiberId, shared: &Arc<Shared>) {
    set_current_context(yielder, id);
    loop {
        if !shared.run.load(Ordering::Acquire) {
            return;
        }

        if let Some(data) = shared.wait_list.take_satisfied(is_main_thread()) {
            suspend(yielder, id, Handoff::ReleaseAndSwitch { next: data.fiber });
            continue;
        }

        if shared.queues.is_empty() {
            std::hint::spin_loop();
            continue;
        }

        let Some(job) = shared.queues.pick_next(is_main_thread()) else {
            continue;
        };
        log::trace!(target: "scheduler", "running job \"{}\" ({:?})", job.name(), job.priority());
        (job.entry)(job.arg);
        if let Some(counter) = &job.counter {
            counter.as_ref().decrement();
        }
    }
}

/// Park the running fiber on `counter <= desired` and switch to a freshly acquired pooled fiber.
///
/// Must only be called from within a fiber context (`in_fiber_context()` is true); the caller
/// (`crate::wait_for_counter`) is responsible for branching to [`native_pump_until`] otherwise.
pub(crate) fn park_and_switch(shared: &Arc<Shared>, counter: CounterRef, desired: i64, is_main: bool) {
    let (yielder_ptr, id) = CURRENT_CONTEXT.with(|c| c.get()).unwrap_or_else(|| {
        log::error!(target: "scheduler", "park_and_switch called outside a fiber context");
        panic!("park_and_switch called outside a fiber context");
    });
    // SAFETY: the yielder outlives every suspend point of its own coroutine body, which is the
    // entire span during which this thread-local can hold its pointer.
    let yielder: &FiberYielder = unsafe { &*yielder_ptr };
    let next = shared.fiber_pool.acquire();
    suspend(
        yielder,
        id,
        Handoff::ParkAndSwitch {
            next,
            counter,
            desired,
            is_main,
        },
    );
}

/// Busy-poll fallback for a calling thread that isn't driving any fiber (the native/calling
/// thread, per `SPEC_FULL.md` §4.5.3 and §9 "The native calling thread cannot be fiberized").
///
/// Only the main thread drains work here, and only its own MAIN-affine queue, one job per
/// iteration, so a blocked `wait_for_counter` on main still makes progress on jobs explicitly
/// routed to it without ever executing arbitrary pool work off a non-fiber stack.
pub(crate) fn native_pump_until(shared: &Arc<Shared>, counter: &Counter, desired: i64) {
    loop {
        if counter.load() <= desired {
            return;
        }
        let ran_job = if is_main_thread() {
            if let Some(job) = shared.queues.pop_main_only() {
                (job.entry)(job.arg);
                if let Some(job_counter) = &job.counter {
                    job_counter.as_ref().decrement();
                }
                true
            } else {
                false
            }
        } else {
            false
        };

        if !ran_job {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }
}

/// The per-OS-thread trampoline that owns a physical [`Fiber`] and keeps resuming whichever one
/// the running fiber hands off to, performing the schedule-list/wait-list/pool bookkeeping that
/// the suspended fiber could not perform on its own behalf.
///
/// Returns once the fiber it is currently driving returns from its body (i.e. observed
/// `shared.run == false` and exited its loop).
pub(crate) fn drive(mut current: Fiber, shared: &Arc<Shared>) {
    loop {
        // UpdateWaitData: promote any schedule-list entry addressed to the fiber we are about to
        // resume into the wait list. At most one entry can ever be pending here, inserted by the
        // previous driving-loop iteration that switched to this very fiber (`SPEC_FULL.md` §9).
        if let Some(data) = shared.schedule_list.take(current.id()) {
            shared.wait_list.push(data);
        }

        match current.resume() {
            CoroutineResult::Yield(Handoff::ParkAndSwitch {
                next,
                counter,
                desired,
                is_main,
            }) => {
                shared.schedule_list.insert(
                    next.id(),
                    WaitData {
                        fiber: current,
                        counter,
                        desired,
                        is_main,
                    },
                );
                current = next;
            }
            CoroutineResult::Yield(Handoff::ReleaseAndSwitch { next }) => {
                shared.fiber_pool.release(current);
                current = next;
            }
            CoroutineResult::Return(()) => return,
        }
    }
}
