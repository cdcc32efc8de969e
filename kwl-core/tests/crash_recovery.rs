use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::panic::{self, AssertUnwindSafe};

use kwl_core::crash::{
    BootReport, BusyWait, CrashProvoker, CrashRecorder, FaultInfo, LayoutError, MemoryStorage,
    MemoryStorageError, PreservedFault, StorageError,
};
use kwl_core::scheduler::Scheduler;
use kwl_core::time::{Clock, Instant};
use kwl_core::watchdog::{PRE_TIMEOUT, RestartControl, Watchdog};

const HANG_PC: u32 = 0x0_4242;
const HANG_SP: u32 = 0x0180;

type Storage = MemoryStorage<256>;

#[derive(Debug, PartialEq)]
enum ResetCause {
    Watchdog,
    Restart,
}

/// Board model: a clock driven by the test, a watchdog countdown and the
/// RAM cell that survives resets.
struct Board {
    micros: Cell<u32>,
    boot_micros: Cell<u32>,
    last_feed: Cell<u32>,
    preserved: RefCell<PreservedFault>,
}

impl Board {
    fn new() -> Self {
        Self {
            micros: Cell::new(0),
            boot_micros: Cell::new(0),
            last_feed: Cell::new(0),
            preserved: RefCell::new(PreservedFault::empty()),
        }
    }

    fn power_on_reset(&self) {
        self.boot_micros.set(self.micros.get());
        self.last_feed.set(self.micros.get());
    }

    fn advance_ms(&self, millis: u32) {
        self.micros.set(self.micros.get().wrapping_add(millis * 1_000));
        let starved = self.micros.get().wrapping_sub(self.last_feed.get());
        if u128::from(starved) >= PRE_TIMEOUT.as_micros() {
            let uptime_ms = self.micros.get().wrapping_sub(self.boot_micros.get()) / 1_000;
            self.preserved.borrow_mut().capture(FaultInfo {
                pc: HANG_PC,
                sp: HANG_SP,
                uptime_ms,
                real_time: 0,
            });
            panic::panic_any(ResetCause::Watchdog);
        }
    }
}

impl Clock for Board {
    fn now(&self) -> Instant {
        Instant::from_micros(self.micros.get())
    }
}

struct BoardWatchdog<'a>(&'a Board);

impl Watchdog for BoardWatchdog<'_> {
    fn arm(&mut self, _timeout: Duration) {}

    fn feed(&mut self) {
        self.0.last_feed.set(self.0.micros.get());
    }

    fn disable(&mut self) {}
}

struct Spin<'a>(&'a Board);

impl BusyWait for Spin<'_> {
    fn spin(&self) {
        self.0.advance_ms(1);
    }
}

struct BoardRestart<'a>(&'a Board);

impl RestartControl for BoardRestart<'_> {
    fn restart(&mut self) -> ! {
        self.0.preserved.borrow_mut().disarm();
        panic::panic_any(ResetCause::Restart);
    }
}

#[derive(Copy, Clone)]
enum Run {
    Idle,
    Hang,
    Restart,
}

/// Boots the device once and runs it until it resets or `run` completes.
fn boot(
    board: &Board,
    storage: &mut Storage,
    run: Run,
) -> (BootReport<MemoryStorageError>, usize, Option<ResetCause>) {
    board.power_on_reset();
    let mut recorder = CrashRecorder::new(&mut *storage);
    let report = recorder.boot(&mut *board.preserved.borrow_mut());
    let records = recorder.records().len();

    let scheduler = Scheduler::new(board);
    let provoker = CrashProvoker::new(Spin(board));
    provoker.attach(&scheduler).expect("provoker attaches once");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut watchdog = BoardWatchdog(board);
        match run {
            Run::Hang => provoker.provoke(),
            Run::Restart => BoardRestart(board).restart(),
            Run::Idle => {}
        }
        for _ in 0..500 {
            scheduler.run_iteration(&mut watchdog);
            board.advance_ms(10);
        }
    }));

    let cause = outcome.err().map(|payload| {
        *payload
            .downcast::<ResetCause>()
            .expect("only simulated resets unwind")
    });
    (report, records, cause)
}

#[test]
fn hang_produces_one_reset_and_one_record() {
    let board = Board::new();
    let mut storage = Storage::erased();

    let (report, records, cause) = boot(&board, &mut storage, Run::Hang);
    assert_eq!(report.migrated, Some(LayoutError::Erased));
    assert_eq!(records, 0);
    assert_eq!(cause, Some(ResetCause::Watchdog));

    let (report, records, cause) = boot(&board, &mut storage, Run::Idle);
    let appended = report.appended.expect("hang leaves a crash record");
    assert_eq!(appended.pc(), HANG_PC);
    assert_eq!(appended.sp(), HANG_SP);
    assert!(appended.uptime_ms >= 2_000, "uptime {}", appended.uptime_ms);
    assert_eq!(records, 1);
    assert_eq!(cause, None, "idle run must not trip the watchdog");

    let (report, records, _) = boot(&board, &mut storage, Run::Idle);
    assert!(report.is_clean());
    assert_eq!(records, 1, "a fault is recorded exactly once");
}

#[test]
fn restart_never_appends_a_record() {
    let board = Board::new();
    let mut storage = Storage::erased();

    let (_, _, cause) = boot(&board, &mut storage, Run::Restart);
    assert_eq!(cause, Some(ResetCause::Restart));

    let (report, records, _) = boot(&board, &mut storage, Run::Idle);
    assert_eq!(report.appended, None);
    assert_eq!(records, 0);
}

#[test]
fn ring_keeps_the_most_recent_records_across_boots() {
    let mut storage = Storage::erased();

    for uptime_ms in 1..=5 {
        let mut recorder = CrashRecorder::new(&mut storage);
        let mut source = Some(FaultInfo {
            pc: 0x100 + uptime_ms,
            sp: 0x40,
            uptime_ms,
            real_time: 1_700_000_000,
        });
        let report = recorder.boot(&mut source);
        assert!(report.storage.is_ok());
        assert!(source.is_none(), "fault source is consumed");
    }

    let mut recorder = CrashRecorder::new(&mut storage);
    let report = recorder.boot(None);
    assert!(report.is_clean());
    let uptimes: Vec<u32> = recorder.records().iter().map(|record| record.uptime_ms).collect();
    assert_eq!(uptimes, [2, 3, 4, 5]);
    assert_eq!(recorder.records().latest().map(|record| record.pc()), Some(0x105));
}

#[test]
fn storage_failure_keeps_the_session_ring() {
    let mut storage = Storage::erased();
    storage.fail_writes(true);

    let mut recorder = CrashRecorder::new(&mut storage);
    let report = recorder.boot(Some(FaultInfo {
        pc: 0x10,
        sp: 0x20,
        uptime_ms: 30,
        real_time: 0,
    }));
    assert_eq!(
        report.storage,
        Err(StorageError::Write(MemoryStorageError::WriteRejected))
    );
    assert!(recorder.has_crash());

    recorder.storage_mut().fail_writes(false);
    recorder.reset_all().expect("writes accepted again");
    assert!(!recorder.has_crash());
    assert_eq!(storage.writes(), 1);
}
