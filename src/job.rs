use std::sync::atomic::{AtomicI64, Ordering};

/// Coarse scheduling class for a [`Job`], orthogonal to main-thread affinity.
///
/// `Critical` is accepted for source compatibility with callers migrating from systems that
/// exposed it, but it is routed to the same queue as [`Priority::High`]; nothing in this scheduler
/// treats it as a distinct class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// The effective priority used for queue routing, with [`Priority::Critical`] folded into
    /// [`Priority::High`].
    pub(crate) fn effective(self) -> Self {
        match self {
            Priority::Critical => Priority::High,
            other => other,
        }
    }
}

/// An atomic completion barrier.
///
/// Callers initialize a `Counter` to the exact number of jobs that reference it, kick those jobs,
/// and then call [`wait_for_counter`](crate::wait_for_counter) (or the `_and_free` variant). Every
/// executed job that was kicked with a reference to this counter decrements it by one on return.
/// The counter must never be observed to go negative in a correctly-used program: initializing it
/// to fewer jobs than are actually kicked against it is a caller bug with no detection mechanism
/// (see `SPEC_FULL.md` §7).
#[derive(Debug, Default)]
pub struct Counter(AtomicI64);

#[cfg(test)]
pub(crate) static COUNTERS_DROPPED: AtomicI64 = AtomicI64::new(0);

#[cfg(test)]
impl Drop for Counter {
    fn drop(&mut self) {
        COUNTERS_DROPPED.fetch_add(1, Ordering::SeqCst);
    }
}

impl Counter {
    /// Create a new counter initialized to `value`, the number of jobs that will be kicked
    /// against it before waiting.
    pub fn new(value: i64) -> Self {
        Self(AtomicI64::new(value))
    }

    /// Read the current value with acquire ordering, the ordering required for any observation
    /// that precedes a suspension decision (`SPEC_FULL.md` §9, Open Question (a)).
    pub fn load(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Read the current value with relaxed ordering, suitable only for optimistic polling inside
    /// the wait-list scan where a false negative merely delays a wakeup by one iteration.
    pub(crate) fn load_relaxed(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Decrement by one with release ordering, called exactly once per executed job that
    /// referenced this counter.
    pub(crate) fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

/// A function pointer job entry point: one opaque machine word in, nothing out.
pub type JobFn = fn(usize);

/// A type-erased, non-owning reference to a [`Counter`].
///
/// Jobs are stored in queues and may be picked up and executed by any worker thread at an
/// arbitrary future point, so a `Job` cannot carry a borrow with the lifetime of the scope that
/// kicked it (that scope may itself be a stack frame, as in "Counter c = 40; kick 40 jobs
/// referencing &c"). `CounterRef` erases that lifetime the same way the reference Counter* does in
/// the original C++: the scheduler never checks it, the caller upholds it.
///
/// # Safety invariant
/// The referenced `Counter` must remain valid until every job kicked against it has executed. The
/// scheduler's own `wait_for_counter`/`wait_for_counter_and_free` do not return until that is
/// true, so a caller who always waits before letting the counter go out of scope never observes
/// UB; a caller who drops (or otherwise invalidates) the counter earlier has a bug that this type
/// cannot detect, mirroring the undetectable-underflow caveat in `SPEC_FULL.md` §7.
pub(crate) struct CounterRef(*const Counter);

// SAFETY: a `CounterRef` is only ever read through `as_ref`, which produces a shared `&Counter`;
// `Counter` itself is `Sync` (it is a plain atomic), so sharing the raw pointer across threads is
// sound as long as the pointee stays alive (see the invariant above).
unsafe impl Send for CounterRef {}
unsafe impl Sync for CounterRef {}

impl CounterRef {
    /// # Safety
    /// See the struct-level safety invariant: `counter` must remain valid until the matching wait
    /// has returned.
    pub(crate) unsafe fn from_ref(counter: &Counter) -> Self {
        CounterRef(counter as *const Counter)
    }

    pub(crate) fn as_ref(&self) -> &Counter {
        // SAFETY: see the struct-level safety invariant.
        unsafe { &*self.0 }
    }
}

/// An immovable-once-dispatched unit of work.
///
/// A `Job` is constructed by the caller and handed to one of the `kick_*` functions, which moves
/// it into the matching ready queue. Ownership remains with the scheduler until `entry` returns.
pub struct Job {
    pub(crate) entry: JobFn,
    pub(crate) arg: usize,
    pub(crate) counter: Option<CounterRef>,
    pub(crate) priority: Priority,
    pub(crate) name: &'static str,
}

impl Job {
    /// Create a new job with no associated counter.
    pub fn new(name: &'static str, priority: Priority, entry: JobFn, arg: usize) -> Self {
        Self {
            entry,
            arg,
            counter: None,
            priority,
            name,
        }
    }

    /// Create a new job that decrements `counter` by one when its entry point returns.
    ///
    /// # Safety
    /// `counter` must remain valid until `wait_for_counter`/`wait_for_counter_and_free` has been
    /// called on it and has returned (see [`CounterRef`]'s safety invariant). The caller is
    /// expected to have pre-initialized `counter` to the exact number of jobs that will be kicked
    /// against it.
    pub unsafe fn with_counter(
        name: &'static str,
        priority: Priority,
        entry: JobFn,
        arg: usize,
        counter: &Counter,
    ) -> Self {
        Self {
            entry,
            arg,
            counter: Some(CounterRef(counter as *const Counter)),
            priority,
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("has_counter", &self.counter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_critical_folds_to_high() {
        assert_eq!(Priority::Critical.effective(), Priority::High);
        assert_eq!(Priority::High.effective(), Priority::High);
        assert_eq!(Priority::Low.effective(), Priority::Low);
        assert_eq!(Priority::Normal.effective(), Priority::Normal);
    }

    #[test]
    fn test_counter_decrement() {
        let c = Counter::new(3);
        assert_eq!(c.load(), 3);
        c.decrement();
        c.decrement();
        assert_eq!(c.load(), 1);
        c.decrement();
        assert_eq!(c.load(), 0);
    }

    #[test]
    fn test_job_debug_does_not_require_counter() {
        fn entry(_: usize) {}
        let job = Job::new("noop", Priority::Normal, entry, 0);
        assert_eq!(job.name(), "noop");
        assert_eq!(format!("{job:?}"), "Job { name: \"noop\", priority: Normal, has_counter: false }");
    }
}
