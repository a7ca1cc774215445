use std::collections::VecDeque;

use crate::job::{Job, Priority};
use crate::sync::spinlock::SpinLock;

/// The four priority-keyed job FIFOs. Each class gets its own lock (`SPEC_FULL.md` §4.3/§9): a
/// single global queue lock becomes the bottleneck at high kick rates, which per-class locks avoid
/// by letting producers and consumers of different classes make progress independently.
#[derive(Default)]
pub(crate) struct ReadyQueues {
    low: SpinLock<VecDeque<Job>>,
    normal: SpinLock<VecDeque<Job>>,
    high: SpinLock<VecDeque<Job>>,
    main: SpinLock<VecDeque<Job>>,
}

impl ReadyQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn queue_for(&self, priority: Priority) -> &SpinLock<VecDeque<Job>> {
        match priority.effective() {
            Priority::Low => &self.low,
            Priority::Normal => &self.normal,
            Priority::High | Priority::Critical => &self.high,
        }
    }

    /// Route `job` to the queue matching its priority.
    pub(crate) fn push(&self, job: Job) {
        self.queue_for(job.priority()).lock().push_back(job);
    }

    /// Route `job` to the main-thread queue regardless of its priority.
    pub(crate) fn push_main(&self, job: Job) {
        self.main.lock().push_back(job);
    }

    fn pop(&self, priority: Priority) -> Option<Job> {
        self.queue_for(priority).lock().pop_front()
    }

    fn pop_main(&self) -> Option<Job> {
        self.main.lock().pop_front()
    }

    /// Pop a MAIN-queue job without falling through to HIGH/NORMAL/LOW, used by the native pump
    /// (`SPEC_FULL.md` §4.5.3): a calling thread that isn't driving a fiber should only ever run
    /// MAIN-affine work synchronously, never arbitrary pool work.
    pub(crate) fn pop_main_only(&self) -> Option<Job> {
        self.pop_main()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.low.lock().is_empty()
            && self.normal.lock().is_empty()
            && self.high.lock().is_empty()
            && self.main.lock().is_empty()
    }

    /// Pick the next job to run per `SPEC_FULL.md` §4.6 step 4: MAIN (only if this worker is the
    /// main thread) → HIGH → NORMAL → LOW. When a MAIN job is taken, the other queues are not
    /// consulted this iteration, so main-thread affinity wins over priority.
    pub(crate) fn pick_next(&self, is_main_worker: bool) -> Option<Job> {
        if is_main_worker {
            if let Some(job) = self.pop_main() {
                return Some(job);
            }
        }
        self.pop(Priority::High)
            .or_else(|| self.pop(Priority::Normal))
            .or_else(|| self.pop(Priority::Low))
    }

    pub(crate) fn clear(&self) {
        self.low.lock().clear();
        self.normal.lock().clear();
        self.high.lock().clear();
        self.main.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(_: usize) {}

    #[test]
    fn test_critical_routes_to_high() {
        let queues = ReadyQueues::new();
        queues.push(Job::new("c", Priority::Critical, entry, 0));
        let job = queues.pick_next(false).unwrap();
        assert_eq!(job.priority(), Priority::Critical);
        // it came out of the high-priority slot: nothing else was queued, so a single pop proves
        // routing, and pick_next's priority order confirms it wasn't sitting in low/normal.
        assert!(queues.is_empty());
    }

    #[test]
    fn test_fifo_within_class() {
        let queues = ReadyQueues::new();
        queues.push(Job::new("a", Priority::Normal, entry, 1));
        queues.push(Job::new("b", Priority::Normal, entry, 2));
        queues.push(Job::new("c", Priority::Normal, entry, 3));

        assert_eq!(queues.pick_next(false).unwrap().arg, 1);
        assert_eq!(queues.pick_next(false).unwrap().arg, 2);
        assert_eq!(queues.pick_next(false).unwrap().arg, 3);
    }

    #[test]
    fn test_main_only_consulted_by_main_worker() {
        let queues = ReadyQueues::new();
        queues.push_main(Job::new("m", Priority::Low, entry, 0));
        assert!(queues.pick_next(false).is_none());
        assert!(queues.pick_next(true).is_some());
    }

    #[test]
    fn test_main_wins_over_priority_when_main_worker() {
        let queues = ReadyQueues::new();
        queues.push(Job::new("h", Priority::High, entry, 0));
        queues.push_main(Job::new("m", Priority::Low, entry, 0));

        let job = queues.pick_next(true).unwrap();
        assert_eq!(job.name(), "m");
    }

    #[test]
    fn test_priority_order_high_normal_low() {
        let queues = ReadyQueues::new();
        queues.push(Job::new("low", Priority::Low, entry, 0));
        queues.push(Job::new("normal", Priority::Normal, entry, 0));
        queues.push(Job::new("high", Priority::High, entry, 0));

        assert_eq!(queues.pick_next(false).unwrap().name(), "high");
        assert_eq!(queues.pick_next(false).unwrap().name(), "normal");
        assert_eq!(queues.pick_next(false).unwrap().name(), "low");
    }
}
