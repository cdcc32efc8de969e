//! Deliberate hang used to exercise the watchdog path end to end.

use core::time::Duration;

use crate::scheduler::{RegisterError, Scheduler, TaskTimingStats, TimedTask};

/// One step of a busy loop that never yields to the scheduler.
pub trait BusyWait {
    fn spin(&self);
}

/// Owns a one-shot task whose operation never returns.
pub struct CrashProvoker<'a, B> {
    busy: B,
    stats: TaskTimingStats<'a>,
    task: TimedTask<'a, CrashProvoker<'a, B>>,
}

impl<'a, B: BusyWait> CrashProvoker<'a, B> {
    pub const STATS_NAME: &'static str = "CrashProvoke";

    #[must_use]
    pub const fn new(busy: B) -> Self {
        Self {
            busy,
            stats: TaskTimingStats::new(Self::STATS_NAME),
            task: TimedTask::new(Self::hang),
        }
    }

    /// Registers the hang task; it stays idle until [`provoke`](Self::provoke).
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::AlreadyRegistered`] when attached twice.
    pub fn attach(&'a self, scheduler: &Scheduler<'a>) -> Result<(), RegisterError> {
        self.task.attach(self, &self.stats, scheduler)
    }

    /// Arms the hang for the next scheduler pass.
    pub fn provoke(&self) {
        self.task.run_once(Duration::ZERO);
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.task.is_enabled()
    }

    fn hang(&self) {
        loop {
            self.busy.spin();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverSpins;

    impl BusyWait for NeverSpins {
        fn spin(&self) {
            unreachable!("hang task must not run in this test");
        }
    }

    struct FixedClock;

    impl crate::time::Clock for FixedClock {
        fn now(&self) -> crate::time::Instant {
            crate::time::Instant::ZERO
        }
    }

    #[test]
    fn provoke_arms_a_single_shot() {
        let clock = FixedClock;
        let scheduler = Scheduler::new(&clock);
        let provoker = CrashProvoker::new(NeverSpins);
        provoker.attach(&scheduler).unwrap();

        assert!(!provoker.is_armed());
        provoker.provoke();
        assert!(provoker.is_armed());
        assert_eq!(provoker.task.period(), None);
        assert!(scheduler.find_stats(CrashProvoker::<NeverSpins>::STATS_NAME).is_some());
    }
}
