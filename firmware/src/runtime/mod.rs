use core::cell::RefCell;
use core::fmt::{self, Write as _};
use core::time::Duration;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::yield_now;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::Timer;
use kwl_core::components::periodic::{PeriodicJob, Workload};
use kwl_core::crash::{CrashProvoker, CrashRecorder, CrashStorage};
use kwl_core::diag::commands::{CommandError, CommandExecutor, CommandOutcome, SystemDiagnostics};
use kwl_core::diag::report;
use kwl_core::scheduler::Scheduler;
use kwl_core::time::Instant;
use kwl_core::watchdog::{RestartControl, WATCHDOG_TIMEOUT, Watchdog, WatchdogGuard};

use crate::console::{ConsoleLine, ReplyLine, ReplyWriter};
use crate::hw::{self, EmbassyClock, FlashStorage, HardwareWatchdog, PreservedRam, Spin, SystemReset};
use crate::telemetry;

mod console_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

const LINE_QUEUE_DEPTH: usize = 2;
/// One line per stats group plus headroom.
const REPLY_QUEUE_DEPTH: usize = 24;

const HEARTBEAT_PERIOD: Duration = Duration::from_millis(500);
/// Lets the UART drain "OK restarting" before the reset.
const RESTART_GRACE: embassy_time::Duration = embassy_time::Duration::from_millis(20);

pub(super) static CONSOLE_LINES: Channel<CriticalSectionRawMutex, ConsoleLine, LINE_QUEUE_DEPTH> =
    Channel::new();
pub(super) static CONSOLE_REPLIES: Channel<CriticalSectionRawMutex, ReplyLine, REPLY_QUEUE_DEPTH> =
    Channel::new();

/// Status LED toggled by a periodic task, so a hung loop is visible.
struct Heartbeat<'d> {
    led: RefCell<Output<'d>>,
}

impl Workload for Heartbeat<'_> {
    fn run(&self, _scheduled: Instant) {
        if let Ok(mut led) = self.led.try_borrow_mut() {
            led.toggle();
        }
    }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA5,
        PB0,
        PB1,
        USART5,
        IWDG,
        FLASH,
        ..
    } = hal::init(config);
    let mut core = cortex_m::Peripherals::take().expect("core peripherals already taken");

    // The snapshot must be read before the pre-timeout can run again.
    let mut recorder = CrashRecorder::new(FlashStorage::new(FLASH));
    let boot = recorder.boot(PreservedRam);
    telemetry::boot(&boot, recorder.records().len());
    hw::fault::start_tick(&mut core.SYST);

    spawner
        .spawn(console_task::run(USART5, PB0, PB1))
        .expect("failed to spawn console task");

    let clock = EmbassyClock;
    let heartbeat = PeriodicJob::new(
        "Heartbeat",
        HEARTBEAT_PERIOD,
        Heartbeat {
            led: RefCell::new(Output::new(PA5, Level::Low, Speed::Low)),
        },
    );
    let provoker = CrashProvoker::new(Spin);
    let scheduler = Scheduler::new(&clock);
    heartbeat
        .attach(&scheduler)
        .expect("heartbeat registration");
    provoker
        .attach(&scheduler)
        .expect("crash provoker registration");

    let mut watchdog = WatchdogGuard::new(HardwareWatchdog::new(IWDG, WATCHDOG_TIMEOUT));
    watchdog.arm(WATCHDOG_TIMEOUT);
    telemetry::ready(scheduler.task_count(), scheduler.stats().count());

    loop {
        let report = scheduler.run_iteration(&mut watchdog);
        if let Some(overrun) = &report.last_overrun {
            telemetry::overrun(overrun);
        }

        if let Ok(line) = CONSOLE_LINES.try_receive() {
            if handle_line(line.trim(), &scheduler, &mut recorder, &provoker) {
                telemetry::restart();
                Timer::after(RESTART_GRACE).await;
                SystemReset.restart();
            }
        }

        yield_now().await;
    }
}

/// Runs one console line and queues its response. Returns `true` when the
/// line asked for a restart.
fn handle_line<'a, S>(
    line: &str,
    scheduler: &Scheduler<'a>,
    recorder: &mut CrashRecorder<S>,
    provoker: &CrashProvoker<'a, Spin>,
) -> bool
where
    S: CrashStorage,
    S::Error: fmt::Debug,
{
    if line.is_empty() {
        return false;
    }
    telemetry::command(line);

    let mut executor = CommandExecutor::new(SystemDiagnostics::new(scheduler, recorder, provoker));
    let mut out = ReplyWriter::new(|reply| {
        if CONSOLE_REPLIES.try_send(reply).is_err() {
            telemetry::reply_dropped();
        }
    });

    let mut restart = false;
    // `topic <topic> [payload]` injects a bus message; answers use the bus format.
    if let Some(rest) = line.strip_prefix("topic ") {
        let rest = rest.trim();
        let (topic, payload) = rest.split_once(' ').unwrap_or((rest, ""));
        match executor.execute_topic(topic, payload) {
            None => {
                let _ = writeln!(out, "ignored: not a diagnostic topic");
            }
            Some(Ok(outcome)) => {
                let mut published = false;
                report::for_each_topic_response(&outcome, |topic, payload| {
                    published = true;
                    let _ = writeln!(out, "PUB {topic} {payload}");
                });
                if !published {
                    let _ = report::write_outcome(&mut out, &outcome);
                }
                restart = outcome == CommandOutcome::RestartRequested;
            }
            Some(Err(error)) => reject(&mut out, &error),
        }
    } else {
        match executor.execute(line) {
            Ok(outcome) => {
                let _ = report::write_outcome(&mut out, &outcome);
                restart = outcome == CommandOutcome::RestartRequested;
            }
            Err(error) => reject(&mut out, &error),
        }
    }

    out.finish();
    restart
}

fn reject<W: fmt::Write, E: fmt::Debug>(out: &mut W, error: &CommandError<'_, E>) {
    if let CommandError::Storage(err) = error {
        telemetry::storage_failure(err);
    }
    let _ = report::write_error(out, error);
}
