//! Execution-time accounting for scheduled work.

use core::cell::Cell;
use core::fmt;

/// Named accumulator of task run times, in microseconds.
///
/// One instance may back several related tasks; the scheduler records every
/// run of every task attached to it. Stats link themselves into the
/// scheduler's stats registry the first time one of their tasks registers.
pub struct TaskTimingStats<'a> {
    name: &'static str,
    count: Cell<u32>,
    last: Cell<u32>,
    min: Cell<u32>,
    max: Cell<u32>,
    sum: Cell<u64>,
    overruns: Cell<u32>,
    pub(super) linked: Cell<bool>,
    pub(super) next: Cell<Option<&'a TaskTimingStats<'a>>>,
}

impl<'a> TaskTimingStats<'a> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            count: Cell::new(0),
            last: Cell::new(0),
            min: Cell::new(0),
            max: Cell::new(0),
            sum: Cell::new(0),
            overruns: Cell::new(0),
            linked: Cell::new(false),
            next: Cell::new(None),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Adds one run of `micros` duration.
    pub fn record(&self, micros: u32) {
        let count = self.count.get();
        if count == 0 {
            self.min.set(micros);
            self.max.set(micros);
        } else {
            self.min.set(self.min.get().min(micros));
            self.max.set(self.max.get().max(micros));
        }
        self.count.set(count.saturating_add(1));
        self.last.set(micros);
        self.sum.set(self.sum.get().saturating_add(u64::from(micros)));
    }

    /// Counts a run that took longer than its task's period.
    pub fn record_overrun(&self) {
        self.overruns.set(self.overruns.get().saturating_add(1));
    }

    /// Mean run time in microseconds, `0` before the first sample.
    #[must_use]
    pub fn average(&self) -> u32 {
        match u64::from(self.count.get()) {
            0 => 0,
            count => u32::try_from(self.sum.get() / count).unwrap_or(u32::MAX),
        }
    }

    /// Zeroes every counter; the name is kept.
    pub fn reset(&self) {
        self.count.set(0);
        self.last.set(0);
        self.min.set(0);
        self.max.set(0);
        self.sum.set(0);
        self.overruns.set(0);
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count.get()
    }

    #[must_use]
    pub fn last(&self) -> u32 {
        self.last.get()
    }

    #[must_use]
    pub fn min(&self) -> u32 {
        self.min.get()
    }

    #[must_use]
    pub fn max(&self) -> u32 {
        self.max.get()
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.sum.get()
    }

    #[must_use]
    pub fn overruns(&self) -> u32 {
        self.overruns.get()
    }

    /// Copies the current counters for reporting.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            name: self.name,
            count: self.count(),
            last: self.last(),
            min: self.min(),
            max: self.max(),
            average: self.average(),
            overruns: self.overruns(),
        }
    }
}

impl fmt::Debug for TaskTimingStats<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTimingStats")
            .field("name", &self.name)
            .field("count", &self.count())
            .field("min", &self.min())
            .field("max", &self.max())
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of a [`TaskTimingStats`], durations in microseconds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub name: &'static str,
    pub count: u32,
    pub last: u32,
    pub min: u32,
    pub max: u32,
    pub average: u32,
    pub overruns: u32,
}

/// How a component with several tasks reports their run times.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum StatsGrouping {
    /// All tasks feed one statistic named after the component.
    #[default]
    Shared,
    /// Every task gets its own statistic.
    PerTask,
}

/// Statistics for the `N` tasks of one component, shared or split per task.
pub struct StatsGroup<'a, const N: usize> {
    grouping: StatsGrouping,
    shared: TaskTimingStats<'a>,
    per_task: [TaskTimingStats<'a>; N],
}

impl<'a, const N: usize> StatsGroup<'a, N> {
    #[must_use]
    pub fn new(name: &'static str, task_names: [&'static str; N], grouping: StatsGrouping) -> Self {
        Self {
            grouping,
            shared: TaskTimingStats::new(name),
            per_task: task_names.map(TaskTimingStats::new),
        }
    }

    #[must_use]
    pub const fn grouping(&self) -> StatsGrouping {
        self.grouping
    }

    /// Stats a task at `index` should record into.
    ///
    /// Out-of-range indices fall back to the shared statistic.
    #[must_use]
    pub fn for_task(&self, index: usize) -> &TaskTimingStats<'a> {
        match self.grouping {
            StatsGrouping::Shared => &self.shared,
            StatsGrouping::PerTask => self.per_task.get(index).unwrap_or(&self.shared),
        }
    }

    /// The component-wide statistic.
    #[must_use]
    pub const fn shared(&self) -> &TaskTimingStats<'a> {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tracks_min_max_and_average() {
        let stats = TaskTimingStats::new("SensorRead");
        for micros in [2_000, 3_000, 2_000, 3_000] {
            stats.record(micros);
        }

        assert_eq!(stats.count(), 4);
        assert_eq!(stats.min(), 2_000);
        assert_eq!(stats.max(), 3_000);
        assert_eq!(stats.last(), 3_000);
        assert_eq!(stats.average(), 2_500);
        assert!(stats.min() <= stats.average() && stats.average() <= stats.max());
    }

    #[test]
    fn average_is_zero_without_samples() {
        let stats = TaskTimingStats::new("Idle");
        assert_eq!(stats.average(), 0);
    }

    #[test]
    fn reset_restarts_min_and_max_from_next_sample() {
        let stats = TaskTimingStats::new("FanControl");
        stats.record(100);
        stats.record(900);
        stats.record_overrun();

        stats.reset();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.overruns(), 0);
        assert_eq!(stats.name(), "FanControl");

        stats.record(450);
        assert_eq!(stats.min(), 450);
        assert_eq!(stats.max(), 450);
        assert_eq!(stats.average(), 450);
    }

    #[test]
    fn grouping_selects_shared_or_individual_stats() {
        let shared = StatsGroup::new("Sensors", ["A", "B"], StatsGrouping::Shared);
        assert!(core::ptr::eq(shared.for_task(0), shared.for_task(1)));
        assert_eq!(shared.for_task(1).name(), "Sensors");

        let split = StatsGroup::new("Sensors", ["A", "B"], StatsGrouping::PerTask);
        assert_eq!(split.for_task(0).name(), "A");
        assert_eq!(split.for_task(1).name(), "B");
        assert_eq!(split.for_task(7).name(), "Sensors");
    }
}
