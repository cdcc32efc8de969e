use std::io;

#[allow(dead_code)]
#[path = "../board.rs"]
mod board;
#[allow(dead_code)]
#[path = "../device.rs"]
mod device;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use board::SimBoard;
use device::{DeviceOptions, RunSummary};
use kwl_core::scheduler::StatsGrouping;
use session::{Session, TranscriptProfile};

/// Counter value 1.5 s before the 32-bit microsecond wrap.
const NEAR_WRAP_MICROS: u32 = u32::MAX - 1_500_000;

fn main() -> io::Result<()> {
    board::silence_reset_panics();
    record_stats()?;
    record_crash()?;
    record_restart()?;
    Ok(())
}

fn record(
    profile: TranscriptProfile,
    options: DeviceOptions,
    lines: &[&str],
) -> io::Result<RunSummary> {
    let board = SimBoard::new(options.start_micros);
    let mut session = Session::scripted(profile, lines.iter().copied())?;
    let summary = device::run(&board, &options, &mut session)?;
    println!(
        "{}: {} boot(s), transcript at {}",
        profile.header(),
        summary.boots,
        profile.log_path()
    );
    Ok(summary)
}

fn record_stats() -> io::Result<()> {
    let options = DeviceOptions {
        start_micros: NEAR_WRAP_MICROS,
        grouping: StatsGrouping::PerTask,
    };
    record(
        TranscriptProfile::Stats,
        options,
        &[
            "help",
            "run 12000",
            "scheduler stats",
            "scheduler stats FanControl",
            "scheduler reset Ventilation",
            "scheduler reset ClimateRead",
            "topic /debugset/kwl/scheduler/getvalues ClimateRead",
            "scheduler reset",
            "scheduler stats Display",
        ],
    )?;
    Ok(())
}

fn record_crash() -> io::Result<()> {
    let summary = record(
        TranscriptProfile::Crash,
        DeviceOptions::default(),
        &[
            "crash list",
            "run 1000",
            "topic /debugset/kwl/crash/provoke_IKNOWWHATIMDOING",
            "crash list",
            "topic /debugset/kwl/crash/getvalues",
            "crash reset",
            "crash list",
        ],
    )?;
    if summary.watchdog_resets != 1 {
        return Err(io::Error::other(format!(
            "expected one watchdog reset, saw {}",
            summary.watchdog_resets
        )));
    }
    Ok(())
}

fn record_restart() -> io::Result<()> {
    let summary = record(
        TranscriptProfile::Restart,
        DeviceOptions::default(),
        &["run 500", "restart", "crash list", "topic /set/kwl/restart", "crash list"],
    )?;
    if summary.restarts != 2 {
        return Err(io::Error::other(format!(
            "expected two restarts, saw {}",
            summary.restarts
        )));
    }
    Ok(())
}
