mod board;
mod device;
mod session;

use std::env;
use std::io;
use std::process;

use kwl_core::scheduler::StatsGrouping;

use board::SimBoard;
use device::DeviceOptions;
use session::{Session, TranscriptProfile};

const USAGE: &str = "Usage: kwl-emulator [--profile <console|stats|crash|restart>] \
                     [--start-micros <n>] [--stats <shared|per-task>]";

struct Options {
    profile: TranscriptProfile,
    device: DeviceOptions,
}

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    board::silence_reset_panics();
    let board = SimBoard::new(options.device.start_micros);
    let mut session = Session::interactive(options.profile)?;
    println!(
        "KWL controller emulator ready. Type `help` for commands, `run <ms>` to advance time or `exit` to quit."
    );

    let summary = device::run(&board, &options.device, &mut session)?;
    println!(
        "{} command(s), {} boot(s): {} watchdog reset(s), {} restart(s).",
        session.command_count(),
        summary.boots,
        summary.watchdog_resets,
        summary.restarts
    );
    Ok(())
}

fn parse_options<I>(args: I) -> Result<Options, String>
where
    I: IntoIterator<Item = String>,
{
    let mut options = Options {
        profile: TranscriptProfile::Console,
        device: DeviceOptions::default(),
    };

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_owned(), Some(value.to_owned())),
            None => (arg, None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };

        match flag.as_str() {
            "--profile" => options.profile = TranscriptProfile::from_tag(&value()?)?,
            "--start-micros" => {
                let raw = value()?;
                options.device.start_micros = parse_micros(&raw)
                    .ok_or_else(|| format!("Invalid --start-micros value `{raw}`"))?;
            }
            "--stats" => options.device.grouping = parse_grouping(&value()?)?,
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }
    Ok(options)
}

fn parse_micros(raw: &str) -> Option<u32> {
    match raw.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn parse_grouping(raw: &str) -> Result<StatsGrouping, String> {
    if raw.eq_ignore_ascii_case("shared") {
        Ok(StatsGrouping::Shared)
    } else if raw.eq_ignore_ascii_case("per-task") {
        Ok(StatsGrouping::PerTask)
    } else {
        Err(format!("Unknown stats grouping `{raw}`"))
    }
}
