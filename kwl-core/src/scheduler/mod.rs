//! Cooperative run-to-completion scheduler.
//!
//! Tasks live inside their owning components for the whole process lifetime
//! and are linked into the scheduler's registry when attached. The registry is
//! intrusive: every task carries the link to its successor in its
//! [`TaskSlot`], so the scheduler needs no storage of its own beyond the list
//! heads. All state sits in `Cell`s, which lets a running operation reschedule
//! itself or its siblings while the scheduler walks the list.

use core::cell::Cell;
use core::fmt;
use core::time::Duration;

use crate::time::{Clock, Instant, clamp_micros};
use crate::watchdog::Watchdog;

pub mod publish;
pub mod stats;
pub mod timed;

pub use publish::{PublishOutcome, PublishTask, SendStatus};
pub use stats::{StatsGroup, StatsGrouping, StatsSnapshot, TaskTimingStats};
pub use timed::TimedTask;

/// A schedulable unit: timing state plus one operation to run when due.
pub trait Task<'a> {
    /// Trigger state embedded in the task.
    fn slot(&self) -> &TaskSlot<'a>;

    /// Runs the bound operation once.
    fn execute(&self);
}

/// Trigger policy and registry link shared by every task type.
pub struct TaskSlot<'a> {
    stats: Cell<Option<&'a TaskTimingStats<'a>>>,
    clock: Cell<Option<&'a dyn Clock>>,
    enabled: Cell<bool>,
    deadline: Cell<Instant>,
    period: Cell<Option<u32>>,
    /// Deadline stored as an offset until the task learns its clock.
    relative: Cell<bool>,
    running: Cell<bool>,
    rescheduled: Cell<bool>,
    fired_at: Cell<Instant>,
    registered: Cell<bool>,
    next: Cell<Option<&'a dyn Task<'a>>>,
}

impl<'a> TaskSlot<'a> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stats: Cell::new(None),
            clock: Cell::new(None),
            enabled: Cell::new(false),
            deadline: Cell::new(Instant::ZERO),
            period: Cell::new(None),
            relative: Cell::new(false),
            running: Cell::new(false),
            rescheduled: Cell::new(false),
            fired_at: Cell::new(Instant::ZERO),
            registered: Cell::new(false),
            next: Cell::new(None),
        }
    }

    /// Statistics bound at registration.
    #[must_use]
    pub fn stats(&self) -> Option<&'a TaskTimingStats<'a>> {
        self.stats.get()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.get()
    }

    /// Returns `true` while the scheduler is inside this task's operation.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Instant {
        self.deadline.get()
    }

    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        self.period
            .get()
            .map(|micros| Duration::from_micros(u64::from(micros)))
    }

    /// Deadline that triggered the current run, or the current time when idle.
    #[must_use]
    pub fn schedule_time(&self) -> Instant {
        if self.running.get() {
            self.fired_at.get()
        } else {
            self.now()
        }
    }

    /// Returns `true` when the task is enabled and `now` has reached its deadline.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.enabled.get() && !self.relative.get() && now.is_reached(self.deadline.get())
    }

    /// Fires once after `delay`.
    pub fn run_once(&self, delay: Duration) {
        self.arm(clamp_micros(delay), None);
    }

    /// Fires every `period`, first after one period.
    ///
    /// Called from the task's own operation the next deadline is the
    /// triggering deadline plus `period`, so repeated self-rescheduling does
    /// not drift. A run that is already late is due once more, not once per
    /// missed period.
    pub fn run_repeated(&self, period: Duration) {
        let period = clamp_micros(period);
        if self.running.get() {
            let next = self.fired_at.get().wrapping_add_micros(period);
            self.deadline.set(latest_missed(next, self.now(), period));
            self.period.set(Some(period));
            self.enabled.set(true);
            self.rescheduled.set(true);
        } else {
            self.arm(period, Some(period));
        }
    }

    /// Fires after `first_delay`, then every `period`.
    pub fn run_repeated_after(&self, first_delay: Duration, period: Duration) {
        self.arm(clamp_micros(first_delay), Some(clamp_micros(period)));
    }

    /// Stops future firings. A run already in progress completes normally.
    pub fn cancel(&self) {
        self.enabled.set(false);
        if self.running.get() {
            self.rescheduled.set(true);
        }
    }

    fn arm(&self, delay: u32, period: Option<u32>) {
        match self.clock.get() {
            Some(clock) => {
                self.deadline.set(clock.now().wrapping_add_micros(delay));
                self.relative.set(false);
            }
            None => {
                self.deadline.set(Instant::from_micros(delay));
                self.relative.set(true);
            }
        }
        self.period.set(period);
        self.enabled.set(true);
        if self.running.get() {
            self.rescheduled.set(true);
        }
    }

    fn now(&self) -> Instant {
        self.clock.get().map_or(Instant::ZERO, |clock| clock.now())
    }

    fn bind_clock(&self, clock: &'a dyn Clock) {
        self.clock.set(Some(clock));
        if self.relative.replace(false) {
            let offset = self.deadline.get().as_micros();
            self.deadline.set(clock.now().wrapping_add_micros(offset));
        }
    }

    fn begin_run(&self) {
        self.fired_at.set(self.deadline.get());
        self.rescheduled.set(false);
        self.running.set(true);
    }

    fn finish_run(&self, now: Instant) {
        self.running.set(false);
        if self.rescheduled.replace(false) || !self.enabled.get() {
            return;
        }

        match self.period.get() {
            Some(0) => self.deadline.set(now),
            Some(period) => {
                let next = self.fired_at.get().wrapping_add_micros(period);
                self.deadline.set(latest_missed(next, now, period));
            }
            None => self.enabled.set(false),
        }
    }
}

/// Next deadline of a periodic task that finished at `now`.
///
/// When `next` has already passed, the task is due again at the most recent
/// slot of its phase that is not after `now`. Older slots are dropped.
fn latest_missed(next: Instant, now: Instant, period: u32) -> Instant {
    if period == 0 || !now.is_reached(next) {
        return next;
    }
    let missed = now.wrapping_micros_since(next) / period;
    next.wrapping_add_micros(missed.wrapping_mul(period))
}

impl Default for TaskSlot<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors raised while building the registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegisterError {
    /// The task is already linked into a scheduler.
    AlreadyRegistered,
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::AlreadyRegistered => f.write_str("task already registered"),
        }
    }
}

/// Run-time overrun observed during an iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Overrun {
    pub stats: &'static str,
    pub elapsed_us: u32,
    pub period_us: u32,
}

/// Summary of one pass over the registry.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IterationReport {
    /// Number of operations invoked.
    pub executed: u16,
    /// Number of runs that exceeded their period.
    pub overruns: u16,
    /// Most recent overrun, for logging.
    pub last_overrun: Option<Overrun>,
}

/// The task registry and its cooperative loop body.
pub struct Scheduler<'a> {
    clock: &'a dyn Clock,
    head: Cell<Option<&'a dyn Task<'a>>>,
    tail: Cell<Option<&'a dyn Task<'a>>>,
    stats_head: Cell<Option<&'a TaskTimingStats<'a>>>,
    stats_tail: Cell<Option<&'a TaskTimingStats<'a>>>,
    tasks: Cell<usize>,
    current: Cell<Option<Instant>>,
}

impl<'a> Scheduler<'a> {
    #[must_use]
    pub const fn new(clock: &'a dyn Clock) -> Self {
        Self {
            clock,
            head: Cell::new(None),
            tail: Cell::new(None),
            stats_head: Cell::new(None),
            stats_tail: Cell::new(None),
            tasks: Cell::new(0),
            current: Cell::new(None),
        }
    }

    /// Appends `task` to the registry, recording its runs into `stats`.
    ///
    /// `stats` joins the stats registry the first time any task names it.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::AlreadyRegistered`] if the task is already linked.
    pub fn register(
        &self,
        task: &'a dyn Task<'a>,
        stats: &'a TaskTimingStats<'a>,
    ) -> Result<(), RegisterError> {
        let slot = task.slot();
        if slot.registered.replace(true) {
            return Err(RegisterError::AlreadyRegistered);
        }

        slot.stats.set(Some(stats));
        slot.bind_clock(self.clock);
        match self.tail.replace(Some(task)) {
            Some(previous) => previous.slot().next.set(Some(task)),
            None => self.head.set(Some(task)),
        }
        self.tasks.set(self.tasks.get() + 1);
        self.link_stats(stats);
        Ok(())
    }

    fn link_stats(&self, stats: &'a TaskTimingStats<'a>) {
        if stats.linked.replace(true) {
            return;
        }
        match self.stats_tail.replace(Some(stats)) {
            Some(previous) => previous.next.set(Some(stats)),
            None => self.stats_head.set(Some(stats)),
        }
    }

    #[must_use]
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Deadline of the task currently executing, or the current time between tasks.
    #[must_use]
    pub fn schedule_time(&self) -> Instant {
        self.current.get().unwrap_or_else(|| self.clock.now())
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.get()
    }

    /// Registered tasks in registration order.
    #[must_use]
    pub fn tasks(&self) -> Tasks<'a> {
        Tasks {
            cursor: self.head.get(),
        }
    }

    /// Named statistics in the order they were first registered.
    #[must_use]
    pub fn stats(&self) -> Stats<'a> {
        Stats {
            cursor: self.stats_head.get(),
        }
    }

    /// Looks up a statistic by name (case insensitive).
    #[must_use]
    pub fn find_stats(&self, name: &str) -> Option<&'a TaskTimingStats<'a>> {
        self.stats()
            .find(|stats| stats.name().eq_ignore_ascii_case(name))
    }

    /// Runs every due task once in registry order, then feeds `watchdog`.
    pub fn run_iteration<W>(&self, watchdog: &mut W) -> IterationReport
    where
        W: Watchdog + ?Sized,
    {
        let mut report = IterationReport::default();
        for task in self.tasks() {
            if task.slot().is_due(self.clock.now()) {
                self.execute(task, &mut report);
            }
        }
        watchdog.feed();
        report
    }

    fn execute(&self, task: &'a dyn Task<'a>, report: &mut IterationReport) {
        let slot = task.slot();
        let period = slot.period.get();

        slot.begin_run();
        self.current.set(Some(slot.fired_at.get()));
        let started = self.clock.now();
        task.execute();
        let finished = self.clock.now();
        self.current.set(None);

        let elapsed = finished.wrapping_micros_since(started);
        report.executed = report.executed.saturating_add(1);
        let overran = period.filter(|period| elapsed > *period);
        if let Some(stats) = slot.stats() {
            stats.record(elapsed);
            if overran.is_some() {
                stats.record_overrun();
            }
        }

        if let Some(period) = overran {
            report.overruns = report.overruns.saturating_add(1);
            report.last_overrun = Some(Overrun {
                stats: slot.stats().map_or("", TaskTimingStats::name),
                elapsed_us: elapsed,
                period_us: period,
            });
        }

        slot.finish_run(finished);
    }
}

/// Iterator over registered tasks.
pub struct Tasks<'a> {
    cursor: Option<&'a dyn Task<'a>>,
}

impl<'a> Iterator for Tasks<'a> {
    type Item = &'a dyn Task<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let task = self.cursor?;
        self.cursor = task.slot().next.get();
        Some(task)
    }
}

/// Iterator over linked statistics.
pub struct Stats<'a> {
    cursor: Option<&'a TaskTimingStats<'a>>,
}

impl<'a> Iterator for Stats<'a> {
    type Item = &'a TaskTimingStats<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let stats = self.cursor?;
        self.cursor = stats.next.get();
        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockClock(Cell<u32>);

    impl MockClock {
        fn at(micros: u32) -> Self {
            Self(Cell::new(micros))
        }

        fn advance_ms(&self, millis: u32) {
            self.0.set(self.0.get().wrapping_add(millis * 1_000));
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            Instant::from_micros(self.0.get())
        }
    }

    #[derive(Default)]
    struct CountingWatchdog {
        feeds: u32,
    }

    impl Watchdog for CountingWatchdog {
        fn arm(&mut self, _timeout: Duration) {}

        fn feed(&mut self) {
            self.feeds += 1;
        }

        fn disable(&mut self) {}
    }

    #[derive(Default)]
    struct Plain<'a> {
        slot: TaskSlot<'a>,
        runs: Cell<u32>,
    }

    impl<'a> Task<'a> for Plain<'a> {
        fn slot(&self) -> &TaskSlot<'a> {
            &self.slot
        }

        fn execute(&self) {
            self.runs.set(self.runs.get() + 1);
        }
    }

    #[test]
    fn registry_preserves_order_and_links_stats_once() {
        let clock = MockClock::at(0);
        let scheduler = Scheduler::new(&clock);
        let shared = TaskTimingStats::new("Shared");
        let own = TaskTimingStats::new("Own");
        let a = Plain::default();
        let b = Plain::default();
        let c = Plain::default();

        scheduler.register(&a, &shared).unwrap();
        scheduler.register(&b, &own).unwrap();
        scheduler.register(&c, &shared).unwrap();
        assert_eq!(
            scheduler.register(&b, &own),
            Err(RegisterError::AlreadyRegistered)
        );

        assert_eq!(scheduler.task_count(), 3);
        let names: heapless::Vec<&str, 4> = scheduler.stats().map(TaskTimingStats::name).collect();
        assert_eq!(names.as_slice(), &["Shared", "Own"]);
        assert!(scheduler.find_stats("own").is_some());
    }

    #[test]
    fn one_shot_fires_once_and_stays_registered() {
        let clock = MockClock::at(0);
        let scheduler = Scheduler::new(&clock);
        let stats = TaskTimingStats::new("Once");
        let task = Plain::default();
        scheduler.register(&task, &stats).unwrap();
        task.slot.run_once(Duration::from_millis(5));

        let mut watchdog = CountingWatchdog::default();
        scheduler.run_iteration(&mut watchdog);
        assert_eq!(task.runs.get(), 0);

        clock.advance_ms(5);
        let report = scheduler.run_iteration(&mut watchdog);
        assert_eq!(report.executed, 1);

        clock.advance_ms(50);
        scheduler.run_iteration(&mut watchdog);
        assert_eq!(task.runs.get(), 1);
        assert!(!task.slot.is_enabled());
        assert_eq!(scheduler.task_count(), 1);
        assert_eq!(watchdog.feeds, 3);
    }

    #[test]
    fn schedule_before_registration_is_relative_to_attach_time() {
        let clock = MockClock::at(40_000);
        let scheduler = Scheduler::new(&clock);
        let stats = TaskTimingStats::new("Early");
        let task = Plain::default();

        task.slot.run_repeated(Duration::from_millis(10));
        assert!(!task.slot.is_due(Instant::from_micros(40_000)));

        scheduler.register(&task, &stats).unwrap();
        assert_eq!(task.slot.next_deadline(), Instant::from_micros(50_000));
    }

    #[test]
    fn late_periodic_task_catches_up_once_without_backlog() {
        let clock = MockClock::at(0);
        let scheduler = Scheduler::new(&clock);
        let stats = TaskTimingStats::new("Slow");
        let task = Plain::default();
        scheduler.register(&task, &stats).unwrap();
        task.slot.run_repeated(Duration::from_millis(100));

        let mut watchdog = CountingWatchdog::default();
        clock.advance_ms(450);
        scheduler.run_iteration(&mut watchdog);
        assert_eq!(task.runs.get(), 1);
        assert_eq!(task.slot.next_deadline(), Instant::from_micros(400_000));

        scheduler.run_iteration(&mut watchdog);
        assert_eq!(task.runs.get(), 2);
        assert_eq!(task.slot.next_deadline(), Instant::from_micros(500_000));

        scheduler.run_iteration(&mut watchdog);
        assert_eq!(task.runs.get(), 2);

        clock.advance_ms(50);
        scheduler.run_iteration(&mut watchdog);
        assert_eq!(task.runs.get(), 3);
        assert_eq!(task.slot.next_deadline(), Instant::from_micros(600_000));
    }

    /// Operation that outlasts its own period.
    struct Sluggish<'a> {
        slot: TaskSlot<'a>,
        clock: &'a MockClock,
        cost_ms: u32,
        runs: Cell<u32>,
    }

    impl<'a> Task<'a> for Sluggish<'a> {
        fn slot(&self) -> &TaskSlot<'a> {
            &self.slot
        }

        fn execute(&self) {
            self.runs.set(self.runs.get() + 1);
            self.clock.advance_ms(self.cost_ms);
        }
    }

    #[test]
    fn overlong_run_is_due_again_on_the_next_pass() {
        let clock = MockClock::at(0);
        let scheduler = Scheduler::new(&clock);
        let stats = TaskTimingStats::new("Sluggish");
        let task = Sluggish {
            slot: TaskSlot::new(),
            clock: &clock,
            cost_ms: 150,
            runs: Cell::new(0),
        };
        scheduler.register(&task, &stats).unwrap();
        task.slot.run_repeated(Duration::from_millis(100));

        let mut watchdog = CountingWatchdog::default();
        clock.advance_ms(100);
        let report = scheduler.run_iteration(&mut watchdog);
        assert_eq!(report.overruns, 1);
        assert_eq!(task.slot.next_deadline(), Instant::from_micros(200_000));

        clock.advance_ms(10);
        scheduler.run_iteration(&mut watchdog);
        assert_eq!(task.runs.get(), 2);
        assert_eq!(stats.count(), 2);
        assert_eq!(stats.overruns(), 2);
        assert_eq!(task.slot.next_deadline(), Instant::from_micros(400_000));
    }

    /// Reschedules itself from inside its operation.
    #[derive(Default)]
    struct SelfPaced<'a> {
        slot: TaskSlot<'a>,
        runs: Cell<u32>,
    }

    impl<'a> Task<'a> for SelfPaced<'a> {
        fn slot(&self) -> &TaskSlot<'a> {
            &self.slot
        }

        fn execute(&self) {
            self.runs.set(self.runs.get() + 1);
            self.slot.run_repeated(Duration::from_millis(100));
        }
    }

    #[test]
    fn self_rescheduled_task_skips_missed_periods() {
        let clock = MockClock::at(0);
        let scheduler = Scheduler::new(&clock);
        let stats = TaskTimingStats::new("SelfPaced");
        let task = SelfPaced::default();
        scheduler.register(&task, &stats).unwrap();
        task.slot.run_once(Duration::from_millis(100));

        let mut watchdog = CountingWatchdog::default();
        clock.advance_ms(550);
        for _ in 0..6 {
            scheduler.run_iteration(&mut watchdog);
        }
        assert_eq!(task.runs.get(), 2);
        assert_eq!(task.slot.next_deadline(), Instant::from_micros(600_000));

        clock.advance_ms(50);
        scheduler.run_iteration(&mut watchdog);
        assert_eq!(task.runs.get(), 3);
        assert_eq!(task.slot.next_deadline(), Instant::from_micros(700_000));
    }
}
