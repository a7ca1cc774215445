//! Process-wide scheduler state and the public lifecycle/kick/wait entry points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

use crate::config::SchedulerConfig;
use crate::fiber::{FiberId, FiberPool};
use crate::job::{Counter, CounterRef, Job};
use crate::queues::ReadyQueues;
use crate::wait::{ScheduleList, WaitList};
use crate::worker;

/// State shared by every worker thread and every pooled fiber. Lives for exactly as long as the
/// scheduler is initialized; torn down and rebuilt fresh on each `initialize`/`deinitialize` cycle
/// (`SPEC_FULL.md` §4.7).
pub(crate) struct Shared {
    pub(crate) queues: ReadyQueues,
    pub(crate) fiber_pool: FiberPool,
    pub(crate) schedule_list: ScheduleList,
    pub(crate) wait_list: WaitList,
    pub(crate) run: AtomicBool,
}

struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

static HANDLE: OnceLock<Mutex<Option<Scheduler>>> = OnceLock::new();

fn handle() -> &'static Mutex<Option<Scheduler>> {
    HANDLE.get_or_init(|| Mutex::new(None))
}

/// Bring up the scheduler: pre-allocate the fiber pool, spawn worker threads, and mark the
/// calling thread as main (`SPEC_FULL.md` §4.7 step 1-3).
///
/// # Panics
/// Panics if the scheduler is already initialized (a double-`initialize` is a caller bug with no
/// recovery path, matching the reference's fatal assertion).
pub fn initialize(config: SchedulerConfig) {
    let mut guard = handle().lock().unwrap();
    assert!(guard.is_none(), "scheduler already initialized");

    // `SPEC_FULL.md` §4.7 step 1: an explicit request for zero worker threads is a degenerate
    // no-op, distinct from `worker_threads: None` (which resolves to the `hardware_concurrency -
    // 1` default a few lines below via `effective_worker_threads`'s out-of-range clamp).
    if config.worker_threads == Some(0) {
        log::debug!(target: "scheduler", "initialize called with worker_threads = 0, no-op");
        return;
    }

    worker::mark_main_thread();

    if config.num_fibers > crate::config::MAX_FIBERS {
        log::error!(
            target: "scheduler",
            "num_fibers ({}) exceeds the hard ceiling of {}",
            config.num_fibers,
            crate::config::MAX_FIBERS,
        );
    }
    assert!(
        config.num_fibers <= crate::config::MAX_FIBERS,
        "num_fibers ({}) exceeds the hard ceiling of {}",
        config.num_fibers,
        crate::config::MAX_FIBERS
    );

    let shared = Arc::new(Shared {
        queues: ReadyQueues::new(),
        fiber_pool: FiberPool::new(Vec::new()),
        schedule_list: ScheduleList::new(),
        wait_list: WaitList::new(),
        run: AtomicBool::new(true),
    });
    shared.wait_list.reserve(config.num_fibers);

    let fibers: Vec<_> = (0..config.num_fibers)
        .map(|i| worker::make_fiber(FiberId(i), config.fiber_stack_size, Arc::clone(&shared)))
        .collect();
    for fiber in fibers {
        shared.fiber_pool.release(fiber);
    }

    let worker_count = config.effective_worker_threads(config.worker_threads.unwrap_or(0));
    log::debug!(
        target: "scheduler",
        "initializing: {worker_count} worker thread(s), {} pooled fiber(s)",
        config.num_fibers,
    );
    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let shared = Arc::clone(&shared);
        workers.push(std::thread::spawn(move || {
            let fiber = shared.fiber_pool.acquire();
            worker::drive(fiber, &shared);
            log::debug!(target: "scheduler", "worker thread exiting");
        }));
    }

    *guard = Some(Scheduler { shared, workers });
}

/// Tear the scheduler down: stop accepting new work, let every worker thread's currently running
/// fiber observe `run == false` and return, join the threads, and drop whatever fibers remain in
/// the pool (`SPEC_FULL.md` §4.7 step 4).
///
/// # Panics
/// Panics if the scheduler is not currently initialized.
pub fn deinitialize() {
    let mut guard = handle().lock().unwrap();
    let scheduler = guard.take().expect("scheduler was not initialized");

    scheduler.shared.run.store(false, Ordering::Release);
    for worker in scheduler.workers {
        worker.join().expect("worker thread panicked");
    }
    scheduler.shared.queues.clear();
    drop(scheduler.shared.fiber_pool.drain());
}

fn with_shared<R>(f: impl FnOnce(&Arc<Shared>) -> R) -> R {
    let guard = handle().lock().unwrap();
    let scheduler = guard.as_ref().expect("scheduler is not initialized");
    f(&scheduler.shared)
}

/// Clone the shared handle out from under `HANDLE`'s guard and return it with the guard already
/// dropped.
///
/// Used anywhere the caller may block for a while (a fiber park or the native pump): holding
/// `HANDLE`'s lock for that whole span would stop every other thread's `kick_job`/`kick_jobs`/
/// `wait_for_counter`/`deinitialize` call at the `handle().lock()` step, including the very
/// workers that need to keep running in order to satisfy this wait, which deadlocks as soon as two
/// waits are outstanding at once.
fn shared_handle() -> Arc<Shared> {
    let guard = handle().lock().unwrap();
    Arc::clone(&guard.as_ref().expect("scheduler is not initialized").shared)
}

/// Submit `job` to the pool-wide ready queue matching its priority.
pub fn kick_job(job: Job) {
    with_shared(|shared| shared.queues.push(job));
}

/// Submit every job in `jobs` to the pool-wide ready queues matching each one's priority.
pub fn kick_jobs(jobs: impl IntoIterator<Item = Job>) {
    with_shared(|shared| {
        for job in jobs {
            shared.queues.push(job);
        }
    });
}

/// Submit `job` to the main-thread-only queue, regardless of its priority.
pub fn kick_main_thread_job(job: Job) {
    with_shared(|shared| shared.queues.push_main(job));
}

/// Submit every job in `jobs` to the main-thread-only queue, regardless of priority.
pub fn kick_main_thread_jobs(jobs: impl IntoIterator<Item = Job>) {
    with_shared(|shared| {
        for job in jobs {
            shared.queues.push_main(job);
        }
    });
}

/// Block the calling context until `counter.load() <= desired`.
///
/// From inside a pooled fiber, this parks the fiber and switches to another pooled fiber so the
/// underlying OS thread keeps making progress on other work. From any other context, including
/// the main thread (which this library never retroactively fiberizes), it falls back to the
/// native pump (`SPEC_FULL.md` §4.5.3, §9).
pub fn wait_for_counter(counter: &Counter, desired: i64) {
    if counter.load() <= desired {
        return;
    }
    // The wait itself may block for a while, so the shared handle is cloned out and `HANDLE`'s
    // guard is dropped before parking or pumping; see `shared_handle`.
    let shared = shared_handle();
    if worker::in_fiber_context() {
        // SAFETY: this function does not return until the wait is satisfied, at which point
        // every job that could still decrement `counter` has already executed.
        let counter_ref = unsafe { CounterRef::from_ref(counter) };
        worker::park_and_switch(&shared, counter_ref, desired, worker::is_main_thread());
    } else {
        worker::native_pump_until(&shared, counter, desired);
    }
}

/// Equivalent to [`wait_for_counter`], additionally taking ownership of a heap-allocated counter
/// and freeing it once the wait is satisfied.
///
/// The reference exposes this as a distinct code path with its own (buggy, double-acquiring)
/// fiber handling; this reimplementation resolves Open Question (e) by sharing the one slow path
/// above and simply freeing the box afterwards.
pub fn wait_for_counter_and_free(counter: Box<Counter>, desired: i64) {
    wait_for_counter(&counter, desired);
    drop(counter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Priority;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::MutexGuard;

    // The scheduler is process-global state (`SPEC_FULL.md` §9, "Global mutable state"), so tests
    // that initialize/deinitialize it cannot run concurrently with each other; this lock is purely
    // a test-harness serialization device and has no counterpart in the scheduler itself.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn lock_tests() -> MutexGuard<'static, ()> {
        // Route this crate's log::debug!/trace!/error! lifecycle output through env_logger so a
        // failing test's surrounding scheduler activity shows up in `cargo test -- --nocapture`;
        // `is_test(true)` routes it through the test harness's own output capture.
        let _ = env_logger::builder().is_test(true).try_init();
        TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reinit(config: SchedulerConfig) {
        if handle().lock().unwrap().is_some() {
            deinitialize();
        }
        initialize(config);
    }

    #[test]
    fn test_basic_fanout_and_wait() {
        let _guard = lock_tests();
        reinit(SchedulerConfig {
            num_fibers: 8,
            worker_threads: Some(2),
            ..Default::default()
        });

        static COUNT: AtomicUsize = AtomicUsize::new(0);
        fn bump(_: usize) {
            COUNT.fetch_add(1, Ordering::SeqCst);
        }

        let counter = Counter::new(10);
        let jobs: Vec<_> = (0..10)
            .map(|i| unsafe { Job::with_counter("bump", Priority::Normal, bump, i, &counter) })
            .collect();
        kick_jobs(jobs);
        wait_for_counter(&counter, 0);

        assert_eq!(COUNT.load(Ordering::SeqCst), 10);
        deinitialize();
    }

    #[test]
    fn test_main_thread_job_only_runs_on_main() {
        let _guard = lock_tests();
        reinit(SchedulerConfig {
            num_fibers: 4,
            worker_threads: Some(2),
            ..Default::default()
        });

        static RAN_ON_MAIN: AtomicUsize = AtomicUsize::new(0);
        fn mark(_: usize) {
            if worker::is_main_thread() {
                RAN_ON_MAIN.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Counter::new(1);
        kick_main_thread_job(unsafe {
            Job::with_counter("main-only", Priority::Normal, mark, 0, &counter)
        });
        wait_for_counter(&counter, 0);

        assert_eq!(RAN_ON_MAIN.load(Ordering::SeqCst), 1);
        deinitialize();
    }

    #[test]
    fn test_reinitialize_after_deinitialize() {
        let _guard = lock_tests();
        reinit(SchedulerConfig {
            num_fibers: 4,
            worker_threads: Some(1),
            ..Default::default()
        });
        deinitialize();

        initialize(SchedulerConfig {
            num_fibers: 4,
            worker_threads: Some(1),
            ..Default::default()
        });
        let counter = Counter::new(1);
        fn noop(_: usize) {}
        kick_job(unsafe { Job::with_counter("noop", Priority::Low, noop, 0, &counter) });
        wait_for_counter(&counter, 0);
        deinitialize();
    }

    #[test]
    fn test_initialize_zero_worker_threads_is_noop() {
        let _guard = lock_tests();
        if handle().lock().unwrap().is_some() {
            deinitialize();
        }
        initialize(SchedulerConfig {
            worker_threads: Some(0),
            ..Default::default()
        });
        assert!(
            handle().lock().unwrap().is_none(),
            "initialize(0) must not install scheduler state"
        );
    }

    #[test]
    fn test_priority_preference() {
        let _guard = lock_tests();
        reinit(SchedulerConfig {
            num_fibers: 8,
            worker_threads: Some(4),
            ..Default::default()
        });

        static HIGH_FLAG: AtomicBool = AtomicBool::new(false);
        static LOW_SAW_HIGH_FIRST: AtomicBool = AtomicBool::new(false);

        fn slow_low(_: usize) {
            std::thread::sleep(std::time::Duration::from_millis(10));
            LOW_SAW_HIGH_FIRST.store(HIGH_FLAG.load(Ordering::SeqCst), Ordering::SeqCst);
        }
        fn set_high(_: usize) {
            HIGH_FLAG.store(true, Ordering::SeqCst);
        }

        let counter = Counter::new(2);
        kick_job(unsafe { Job::with_counter("low", Priority::Low, slow_low, 0, &counter) });
        kick_job(unsafe { Job::with_counter("high", Priority::High, set_high, 0, &counter) });
        wait_for_counter(&counter, 0);

        assert!(LOW_SAW_HIGH_FIRST.load(Ordering::SeqCst));
        deinitialize();
    }

    #[test]
    fn test_hierarchical_waits() {
        let _guard = lock_tests();
        reinit(SchedulerConfig {
            num_fibers: 8,
            worker_threads: Some(4),
            ..Default::default()
        });

        static OUTER_DONE: AtomicUsize = AtomicUsize::new(0);

        fn sub_job(_: usize) {}

        fn outer_job(_: usize) {
            let inner = Counter::new(4);
            let jobs: Vec<_> = (0..4)
                .map(|i| unsafe { Job::with_counter("sub", Priority::Normal, sub_job, i, &inner) })
                .collect();
            crate::kick_jobs(jobs);
            crate::wait_for_counter(&inner, 0);
            assert_eq!(inner.load(), 0);
            OUTER_DONE.fetch_add(1, Ordering::SeqCst);
        }

        let outer_counter = Counter::new(1);
        kick_job(unsafe { Job::with_counter("outer", Priority::Normal, outer_job, 0, &outer_counter) });
        wait_for_counter(&outer_counter, 0);

        assert_eq!(OUTER_DONE.load(Ordering::SeqCst), 1);
        assert_eq!(outer_counter.load(), 0);
        deinitialize();
    }

    #[test]
    fn test_wait_for_counter_and_free_drops_counter() {
        let _guard = lock_tests();
        reinit(SchedulerConfig {
            num_fibers: 4,
            worker_threads: Some(2),
            ..Default::default()
        });

        fn noop(_: usize) {}

        let before = crate::job::COUNTERS_DROPPED.load(Ordering::SeqCst);
        let counter = Box::new(Counter::new(1));
        kick_job(unsafe { Job::with_counter("noop", Priority::Normal, noop, 0, &counter) });
        wait_for_counter_and_free(counter, 0);

        assert_eq!(crate::job::COUNTERS_DROPPED.load(Ordering::SeqCst), before + 1);
        deinitialize();
    }

    #[test]
    fn test_shutdown_cleanliness_repeated_cycles() {
        let _guard = lock_tests();
        static COUNT: AtomicUsize = AtomicUsize::new(0);
        fn bump(_: usize) {
            COUNT.fetch_add(1, Ordering::SeqCst);
        }

        for _ in 0..3 {
            COUNT.store(0, Ordering::SeqCst);
            reinit(SchedulerConfig {
                num_fibers: 16,
                worker_threads: Some(4),
                ..Default::default()
            });

            let counter = Counter::new(200);
            let jobs: Vec<_> = (0..200)
                .map(|i| unsafe { Job::with_counter("bump", Priority::Normal, bump, i, &counter) })
                .collect();
            kick_jobs(jobs);
            wait_for_counter(&counter, 0);

            assert_eq!(COUNT.load(Ordering::SeqCst), 200);
            deinitialize();
        }
    }

    #[test]
    #[should_panic(expected = "already initialized")]
    fn test_double_initialize_is_fatal() {
        let _guard = lock_tests();
        reinit(SchedulerConfig {
            num_fibers: 2,
            worker_threads: Some(1),
            ..Default::default()
        });
        let result = std::panic::catch_unwind(|| initialize(SchedulerConfig::default()));
        deinitialize();
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }
}
