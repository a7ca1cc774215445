//! A fiber-based parallel job scheduler.
//!
//! Callers submit short-lived units of work ("jobs") together with a [`Priority`] and,
//! optionally, a shared [`Counter`]; a fixed pool of worker threads executes those jobs on a
//! fixed pool of user-mode stackful coroutines ("fibers"). A job may synchronously wait on a
//! counter reaching a desired value via [`wait_for_counter`]: the waiting job is parked, its
//! fiber suspended, and the underlying worker thread immediately picks up other work. When the
//! counter eventually satisfies the wait, some worker resumes the parked fiber exactly where it
//! yielded.
//!
//! This is intended for latency-sensitive, throughput-oriented workloads (game engines,
//! simulation runtimes) that need to saturate every core without the per-task overhead of kernel
//! threads, and without the `.await`-threading overhead of a stackless async executor: a job may
//! call [`wait_for_counter`] from an arbitrary call depth, with no suspension points wired through
//! its signature.
//!
//! ```
//! use fiber_jobs::{initialize, deinitialize, kick_jobs, wait_for_counter, Counter, Job, Priority, SchedulerConfig};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! static COUNT: AtomicUsize = AtomicUsize::new(0);
//!
//! fn bump(_: usize) {
//!     COUNT.fetch_add(1, Ordering::SeqCst);
//! }
//!
//! initialize(SchedulerConfig::default());
//!
//! let counter = Counter::new(8);
//! let jobs: Vec<_> = (0..8)
//!     .map(|i| unsafe { Job::with_counter("bump", Priority::Normal, bump, i, &counter) })
//!     .collect();
//! kick_jobs(jobs);
//! wait_for_counter(&counter, 0);
//!
//! assert_eq!(COUNT.load(Ordering::SeqCst), 8);
//! deinitialize();
//! ```
//!
//! # Submission contract
//!
//! Pre-initialize a [`Counter`] to the exact number of jobs that will reference it, kick those
//! jobs, then wait. The counter reaches zero iff every submitted job has executed; initializing it
//! to fewer jobs than are actually kicked against it is a caller bug this library cannot detect
//! (it manifests as the wait never returning, never as a panic).
//!
//! # Main-thread affinity
//!
//! The thread that calls [`initialize`] is recorded as the main thread and is the only thread
//! that ever drains [`kick_main_thread_job`]/[`kick_main_thread_jobs`] work or resumes a
//! main-thread-bound wait. That thread is never fiberized (see `DESIGN.md` for why); its own
//! calls to [`wait_for_counter`] take a bounded native-pump path instead of a fiber switch.
//!
//! # Safety
//!
//! [`Job::with_counter`] is `unsafe`: the referenced [`Counter`] must outlive every job kicked
//! against it, which in practice means the caller must not let it go out of scope before the
//! matching [`wait_for_counter`]/[`wait_for_counter_and_free`] call returns.

mod config;
mod fiber;
mod job;
mod queues;
mod scheduler;
mod sync;
mod wait;
mod worker;

pub use config::{SchedulerConfig, DEFAULT_FIBER_STACK_SIZE, DEFAULT_NUM_FIBERS, MAX_FIBERS};
pub use job::{Counter, Job, JobFn, Priority};
pub use scheduler::{
    deinitialize, initialize, kick_job, kick_jobs, kick_main_thread_job, kick_main_thread_jobs,
    wait_for_counter, wait_for_counter_and_free,
};
