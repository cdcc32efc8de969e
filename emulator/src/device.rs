use std::cell::RefCell;
use std::fmt::Write as _;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use kwl_core::components::periodic::{PeriodicJob, Workload};
use kwl_core::components::sensors::{ClimateReading, Reading, ReadingSink, SensorHub, SensorPort};
use kwl_core::crash::{BootReport, CrashProvoker, CrashRecorder, MemoryStorageError};
use kwl_core::diag::commands::{CommandExecutor, CommandOutcome, SystemDiagnostics};
use kwl_core::diag::report;
use kwl_core::diag::topic::STATE_PREFIX;
use kwl_core::scheduler::{IterationReport, RegisterError, Scheduler, StatsGrouping};
use kwl_core::time::Instant;
use kwl_core::watchdog::{RestartControl, WATCHDOG_TIMEOUT, Watchdog, WatchdogGuard};

use crate::board::{ResetCause, SimBoard, SimRestart, SimSpin, SimWatchdog};

/// Virtual time between two loop iterations.
pub const STEP_MS: u32 = 10;

const FAN_PERIOD: Duration = Duration::from_millis(1_000);
const FAN_WORK_MS: u32 = 2;
const DISPLAY_PERIOD: Duration = Duration::from_millis(250);
const DISPLAY_WORK_MS: u32 = 4;

/// Longest `run` accepted from the console.
const MAX_RUN_MS: u32 = 3_600_000;

/// Console side of the emulator.
pub trait Host {
    /// Next console line; `None` ends the session.
    fn next_line(&mut self) -> io::Result<Option<String>>;

    fn device_output(&mut self, line: &str) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug)]
pub struct DeviceOptions {
    pub start_micros: u32,
    pub grouping: StatsGrouping,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            start_micros: 0,
            grouping: StatsGrouping::Shared,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    pub boots: u32,
    pub watchdog_resets: u32,
    pub restarts: u32,
}

/// Boots the device repeatedly until the host runs out of input.
pub fn run<H: Host>(board: &SimBoard, options: &DeviceOptions, host: &mut H) -> io::Result<RunSummary> {
    let mut summary = RunSummary::default();
    loop {
        summary.boots += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_boot(board, options, &mut *host)));
        let payload = match outcome {
            Ok(result) => return result.map(|()| summary),
            Err(payload) => payload,
        };

        match payload.downcast::<ResetCause>() {
            Ok(cause) => {
                match *cause {
                    ResetCause::Watchdog => summary.watchdog_resets += 1,
                    ResetCause::Restart => summary.restarts += 1,
                }
                host.device_output(&format!("*** reset: {cause}"))?;
            }
            Err(other) => panic::resume_unwind(other),
        }
    }
}

fn run_boot<H: Host>(board: &SimBoard, options: &DeviceOptions, host: &mut H) -> io::Result<()> {
    board.power_on();

    let mut storage = board.storage.borrow_mut();
    let mut recorder = CrashRecorder::new(&mut *storage);
    let boot_report = recorder.boot(&mut *board.preserved.borrow_mut());
    log_boot(host, board.boots(), &boot_report, recorder.records().len())?;

    let sensors = SensorHub::new(SimSensors(board), Outbox::default(), options.grouping);
    let fan = PeriodicJob::new(
        "FanControl",
        FAN_PERIOD,
        SimLoad {
            board,
            work_ms: FAN_WORK_MS,
        },
    );
    let display = PeriodicJob::new(
        "Display",
        DISPLAY_PERIOD,
        SimLoad {
            board,
            work_ms: DISPLAY_WORK_MS,
        },
    );
    let provoker = CrashProvoker::new(SimSpin(board));
    let scheduler = Scheduler::new(board);
    attach_all(&scheduler, &sensors, &fan, &display, &provoker).map_err(io::Error::other)?;
    sensors.begin();

    let mut watchdog = WatchdogGuard::new(SimWatchdog(board));
    watchdog.arm(WATCHDOG_TIMEOUT);
    host.device_output(&format!(
        "ready: {} tasks, clock at {:#010x}",
        scheduler.task_count(),
        scheduler.now().as_micros()
    ))?;

    while let Some(line) = host.next_line()? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut restart = false;
        if let Some(arg) = line.strip_prefix("run") {
            match arg.trim().parse::<u32>() {
                Ok(millis) if millis <= MAX_RUN_MS => {
                    run_for(&scheduler, &mut watchdog, board, &sensors, host, millis)?;
                }
                _ => host.device_output(&format!("ERR usage: run <0..={MAX_RUN_MS} ms>"))?,
            }
            continue;
        }

        let mut executor =
            CommandExecutor::new(SystemDiagnostics::new(&scheduler, &mut recorder, &provoker));
        let mut text = String::new();
        if let Some(rest) = line.strip_prefix("topic ") {
            let (topic, payload) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
            match executor.execute_topic(topic, payload) {
                None => text.push_str("ignored: not a diagnostic topic\n"),
                Some(Ok(outcome)) => {
                    report::for_each_topic_response(&outcome, |topic, payload| {
                        let _ = writeln!(text, "PUB {topic} {payload}");
                    });
                    if text.is_empty() {
                        text = report::render_outcome(&outcome);
                    }
                    restart = outcome == CommandOutcome::RestartRequested;
                }
                Some(Err(error)) => {
                    let _ = report::write_error(&mut text, &error);
                }
            }
        } else {
            match executor.execute(line) {
                Ok(outcome) => {
                    text = report::render_outcome(&outcome);
                    restart = outcome == CommandOutcome::RestartRequested;
                }
                Err(error) => {
                    let _ = report::write_error(&mut text, &error);
                }
            }
        }
        drop(executor);

        for output in text.lines() {
            host.device_output(output)?;
        }
        if restart {
            SimRestart(board).restart();
        }
        run_for(&scheduler, &mut watchdog, board, &sensors, host, STEP_MS)?;
    }

    watchdog.disable();
    Ok(())
}

fn attach_all<'a>(
    scheduler: &Scheduler<'a>,
    sensors: &'a Sensors<'a>,
    fan: &'a PeriodicJob<'a, SimLoad<'a>>,
    display: &'a PeriodicJob<'a, SimLoad<'a>>,
    provoker: &'a CrashProvoker<'a, SimSpin<'a>>,
) -> Result<(), RegisterError> {
    sensors.attach(scheduler)?;
    fan.attach(scheduler)?;
    display.attach(scheduler)?;
    provoker.attach(scheduler)
}

type Sensors<'a> = SensorHub<'a, SimSensors<'a>, Outbox>;

fn run_for<H, W>(
    scheduler: &Scheduler<'_>,
    watchdog: &mut W,
    board: &SimBoard,
    sensors: &Sensors<'_>,
    host: &mut H,
    millis: u32,
) -> io::Result<()>
where
    H: Host,
    W: Watchdog,
{
    for _ in 0..millis.div_ceil(STEP_MS) {
        let report = scheduler.run_iteration(&mut *watchdog);
        log_iteration(host, &report)?;
        for reading in sensors.sink().drain() {
            host.device_output(&format!("PUB {STATE_PREFIX}{} {reading}", reading.topic()))?;
        }
        board.advance_ms(STEP_MS);
    }
    Ok(())
}

fn log_boot<H: Host>(
    host: &mut H,
    boot: u32,
    report: &BootReport<MemoryStorageError>,
    records: usize,
) -> io::Result<()> {
    host.device_output(&format!("boot #{boot}: {records} crash record(s) stored"))?;
    if let Some(layout) = report.migrated {
        host.device_output(&format!("config migration: clearing crash reports ({layout})"))?;
    }
    if let Some(record) = report.appended {
        host.device_output(&format!("crash recorded: {record}"))?;
    }
    if let Err(err) = &report.storage {
        host.device_output(&format!("crash storage: {err}"))?;
    }
    Ok(())
}

fn log_iteration<H: Host>(host: &mut H, report: &IterationReport) -> io::Result<()> {
    if let Some(overrun) = report.last_overrun {
        host.device_output(&format!(
            "overrun: {} ran {}us, period {}us",
            overrun.stats, overrun.elapsed_us, overrun.period_us
        ))?;
    }
    Ok(())
}

/// Periodic job that burns a fixed slice of virtual time.
struct SimLoad<'b> {
    board: &'b SimBoard,
    work_ms: u32,
}

impl Workload for SimLoad<'_> {
    fn run(&self, _scheduled: Instant) {
        self.board.advance_ms(self.work_ms);
    }
}

/// One DHT sensor on channel 0 and a CO2 sensor, slowly drifting with uptime.
struct SimSensors<'b>(&'b SimBoard);

impl SensorPort for SimSensors<'_> {
    fn read_climate(&self, channel: usize) -> Option<ClimateReading> {
        if channel != 0 {
            return None;
        }
        let minutes = self.0.uptime_ms() / 60_000;
        let step = i16::try_from(minutes % 8).unwrap_or(0);
        Some(ClimateReading {
            deci_celsius: 215 + step,
            deci_percent: 450 + step.unsigned_abs() * 5,
        })
    }

    fn read_co2(&self) -> Option<u16> {
        let minutes = self.0.uptime_ms() / 60_000;
        Some(600 + u16::try_from(minutes % 4).unwrap_or(0) * 25)
    }
}

/// Bus stand-in collecting published readings until the loop drains them.
#[derive(Default)]
struct Outbox {
    pending: RefCell<Vec<Reading>>,
}

impl Outbox {
    fn drain(&self) -> Vec<Reading> {
        self.pending.take()
    }
}

impl ReadingSink for Outbox {
    fn publish(&self, reading: Reading) -> bool {
        self.pending.borrow_mut().push(reading);
        true
    }
}
