//! Single fixed-period job such as fan regulation or display refresh.

use core::time::Duration;

use crate::scheduler::{RegisterError, Scheduler, TaskTimingStats, TimedTask};
use crate::time::Instant;

/// Work executed on every period.
pub trait Workload {
    /// `scheduled` is the deadline that triggered this run.
    fn run(&self, scheduled: Instant);
}

impl<W> Workload for &W
where
    W: Workload + ?Sized,
{
    fn run(&self, scheduled: Instant) {
        (**self).run(scheduled);
    }
}

/// A component with one periodic task and its own stats group.
pub struct PeriodicJob<'a, W> {
    work: W,
    period: Duration,
    stats: TaskTimingStats<'a>,
    task: TimedTask<'a, PeriodicJob<'a, W>>,
}

impl<'a, W: Workload> PeriodicJob<'a, W> {
    #[must_use]
    pub const fn new(name: &'static str, period: Duration, work: W) -> Self {
        Self {
            work,
            period,
            stats: TaskTimingStats::new(name),
            task: TimedTask::new(Self::tick),
        }
    }

    /// Registers the job and starts it one period from now.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::AlreadyRegistered`] when attached twice.
    pub fn attach(&'a self, scheduler: &Scheduler<'a>) -> Result<(), RegisterError> {
        self.task.attach(self, &self.stats, scheduler)?;
        self.task.run_repeated(self.period);
        Ok(())
    }

    #[must_use]
    pub const fn stats(&self) -> &TaskTimingStats<'a> {
        &self.stats
    }

    #[must_use]
    pub const fn work(&self) -> &W {
        &self.work
    }

    pub fn pause(&self) {
        self.task.cancel();
    }

    pub fn resume(&self) {
        self.task.run_repeated(self.period);
    }

    fn tick(&self) {
        self.work.run(self.task.schedule_time());
    }
}
