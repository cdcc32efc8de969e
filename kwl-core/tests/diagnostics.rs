use core::cell::Cell;
use core::time::Duration;

use heapless::String as HeaplessString;
use kwl_core::components::periodic::{PeriodicJob, Workload};
use kwl_core::crash::{BusyWait, CrashProvoker, CrashRecorder, FaultInfo, MemoryStorage};
use kwl_core::diag::commands::{CommandError, CommandExecutor, CommandOutcome, SystemDiagnostics};
use kwl_core::diag::report;
use kwl_core::scheduler::{Scheduler, StatsSnapshot};
use kwl_core::time::{Clock, Instant};
use kwl_core::watchdog::Watchdog;

struct MockClock(Cell<u32>);

impl MockClock {
    fn advance_ms(&self, millis: u32) {
        self.0.set(self.0.get().wrapping_add(millis * 1_000));
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.0.get())
    }
}

struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn arm(&mut self, _timeout: Duration) {}
    fn feed(&mut self) {}
    fn disable(&mut self) {}
}

/// Workload that takes a fixed amount of mock time.
struct Busy<'a> {
    clock: &'a MockClock,
    work_ms: u32,
}

impl Workload for Busy<'_> {
    fn run(&self, _scheduled: Instant) {
        self.clock.advance_ms(self.work_ms);
    }
}

struct NeverSpins;

impl BusyWait for NeverSpins {
    fn spin(&self) {
        panic!("hang task must not run in diagnostics tests");
    }
}

fn run_for(scheduler: &Scheduler<'_>, clock: &MockClock, total_ms: u32) {
    for _ in 0..total_ms / 10 {
        scheduler.run_iteration(&mut NoWatchdog);
        clock.advance_ms(10);
    }
}

fn counts(outcome: &CommandOutcome) -> Vec<(&'static str, u32)> {
    match outcome {
        CommandOutcome::Stats { groups, .. } => groups
            .iter()
            .map(|stats: &StatsSnapshot| (stats.name, stats.count))
            .collect(),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn invalid_target_is_rejected_without_touching_stats() {
    let clock = MockClock(Cell::new(0));
    let fan = PeriodicJob::new(
        "FanControl",
        Duration::from_millis(100),
        Busy {
            clock: &clock,
            work_ms: 2,
        },
    );
    let display = PeriodicJob::new(
        "Display",
        Duration::from_millis(250),
        Busy {
            clock: &clock,
            work_ms: 1,
        },
    );
    let provoker = CrashProvoker::new(NeverSpins);
    let mut recorder = CrashRecorder::new(MemoryStorage::<256>::erased());
    recorder.boot(None);

    let scheduler = Scheduler::new(&clock);
    fan.attach(&scheduler).expect("fan attaches");
    display.attach(&scheduler).expect("display attaches");
    provoker.attach(&scheduler).expect("provoker attaches");
    run_for(&scheduler, &clock, 1_000);

    let mut executor =
        CommandExecutor::new(SystemDiagnostics::new(&scheduler, &mut recorder, &provoker));
    let before = executor.execute("scheduler stats").expect("stats query");
    assert_eq!(
        counts(&before),
        [("FanControl", 10), ("Display", 4), ("CrashProvoke", 0)]
    );

    let error = executor
        .execute("scheduler reset Ventilation")
        .expect_err("unknown group");
    assert_eq!(error, CommandError::UnknownGroup("Ventilation"));
    assert!(error.is_nak());

    let topic_error = executor
        .execute_topic("/debugset/kwl/scheduler/resetvalues", "nope")
        .expect("diagnostic topic")
        .expect_err("unknown group");
    assert!(topic_error.is_nak());

    let after = executor.execute("scheduler stats").expect("stats query");
    assert_eq!(after, before, "a rejected command must not change state");
}

#[test]
fn reset_one_group_then_all() {
    let clock = MockClock(Cell::new(0));
    let fan = PeriodicJob::new(
        "FanControl",
        Duration::from_millis(100),
        Busy {
            clock: &clock,
            work_ms: 2,
        },
    );
    let display = PeriodicJob::new(
        "Display",
        Duration::from_millis(250),
        Busy {
            clock: &clock,
            work_ms: 1,
        },
    );
    let provoker = CrashProvoker::new(NeverSpins);
    let mut recorder = CrashRecorder::new(MemoryStorage::<256>::erased());

    let scheduler = Scheduler::new(&clock);
    fan.attach(&scheduler).expect("fan attaches");
    display.attach(&scheduler).expect("display attaches");
    provoker.attach(&scheduler).expect("provoker attaches");
    run_for(&scheduler, &clock, 1_000);

    let mut executor =
        CommandExecutor::new(SystemDiagnostics::new(&scheduler, &mut recorder, &provoker));
    assert_eq!(
        executor.execute("scheduler reset fancontrol"),
        Ok(CommandOutcome::StatsReset { groups: 1 })
    );
    assert_eq!(fan.stats().count(), 0);
    assert_eq!(display.stats().count(), 4);

    let only_display = executor.execute("scheduler stats Display").expect("known group");
    assert_eq!(counts(&only_display), [("Display", 4)]);

    assert_eq!(
        executor.execute("scheduler reset"),
        Ok(CommandOutcome::StatsReset { groups: 3 })
    );
    assert_eq!(display.stats().count(), 0);
}

#[test]
fn crash_commands_over_console_and_bus() {
    let clock = MockClock(Cell::new(0));
    let provoker = CrashProvoker::new(NeverSpins);
    let mut recorder = CrashRecorder::new(MemoryStorage::<256>::erased());
    recorder.boot(Some(FaultInfo {
        pc: 0x0_1a2b,
        sp: 0x0100,
        uptime_ms: 61_000,
        real_time: 0,
    }));

    let scheduler = Scheduler::new(&clock);
    provoker.attach(&scheduler).expect("provoker attaches");

    let mut executor =
        CommandExecutor::new(SystemDiagnostics::new(&scheduler, &mut recorder, &provoker));

    let listed = executor
        .execute_topic("d15/debugset/kwl/crash/getvalues", "")
        .expect("diagnostic topic")
        .expect("crash list");
    let mut published: Vec<(String, String)> = Vec::new();
    report::for_each_topic_response(&listed, |topic, payload| {
        published.push((topic.as_str().to_owned(), payload.to_owned()));
    });
    assert_eq!(
        published,
        [(
            "/debugstate/kwl/crash/0".to_owned(),
            "uptime=61000ms real_time=0 pc=0x01a2b sp=0x0100".to_owned()
        )]
    );

    assert_eq!(executor.execute("crash reset"), Ok(CommandOutcome::CrashesCleared));
    let mut console: HeaplessString<64> = HeaplessString::new();
    let cleared = executor.execute("crash list").expect("crash list");
    report::write_outcome(&mut console, &cleared).expect("fits");
    assert_eq!(console.as_str(), "no crash records\n");

    assert_eq!(
        executor.execute_topic("/debugset/kwl/crash/provoke_IKNOWWHATIMDOING", ""),
        Some(Ok(CommandOutcome::CrashProvoked))
    );
    assert_eq!(
        executor.execute_topic("/set/kwl/restart", ""),
        Some(Ok(CommandOutcome::RestartRequested))
    );
    assert_eq!(executor.execute_topic("/set/kwl/fan/speed", "2"), None);

    drop(executor);
    assert!(provoker.is_armed());
    assert!(!recorder.has_crash());
    assert_eq!(recorder.storage_mut().writes(), 2);
}

#[test]
fn malformed_console_line_is_a_parse_error() {
    let clock = MockClock(Cell::new(0));
    let provoker = CrashProvoker::new(NeverSpins);
    let mut recorder = CrashRecorder::new(MemoryStorage::<256>::erased());
    let scheduler = Scheduler::new(&clock);
    provoker.attach(&scheduler).expect("provoker attaches");

    let mut executor =
        CommandExecutor::new(SystemDiagnostics::new(&scheduler, &mut recorder, &provoker));
    let error = executor.execute("crash explode").expect_err("unknown subcommand");
    assert!(matches!(error, CommandError::Parse(_)));
    assert!(!error.is_nak());

    let mut console: HeaplessString<96> = HeaplessString::new();
    report::write_error(&mut console, &error).expect("fits");
    assert!(console.starts_with("ERR parse error"), "got {console}");
}
