//! Text rendering of command results for the console and the bus.

use core::fmt::{self, Write};

use heapless::String;

use crate::scheduler::StatsSnapshot;

use super::catalog;
use super::commands::{CommandError, CommandOutcome};
use super::topic::{self, Topic};

/// Longest bus payload produced by [`for_each_topic_response`].
pub const MAX_PAYLOAD_LEN: usize = 96;

pub type Payload = String<MAX_PAYLOAD_LEN>;

/// Writes the counters of one stats group, without its name.
///
/// # Errors
///
/// Propagates failures of `out`.
pub fn write_stats_values<W: Write>(out: &mut W, stats: &StatsSnapshot) -> fmt::Result {
    write!(
        out,
        "count={} last={}us min={}us max={}us avg={}us overruns={}",
        stats.count, stats.last, stats.min, stats.max, stats.average, stats.overruns
    )
}

/// Writes a console response, one line per item.
///
/// # Errors
///
/// Propagates failures of `out`.
pub fn write_outcome<W: Write>(out: &mut W, outcome: &CommandOutcome) -> fmt::Result {
    match outcome {
        CommandOutcome::Stats { groups, omitted } => {
            if groups.is_empty() {
                writeln!(out, "no stats groups registered")?;
            }
            for stats in groups {
                write!(out, "{} ", stats.name)?;
                write_stats_values(out, stats)?;
                writeln!(out)?;
            }
            if *omitted > 0 {
                writeln!(out, "{omitted} more stats group(s) not shown")?;
            }
            Ok(())
        }
        CommandOutcome::StatsReset { groups } => writeln!(out, "OK reset {groups} stats group(s)"),
        CommandOutcome::Crashes(records) => {
            if records.is_empty() {
                writeln!(out, "no crash records")?;
            }
            for (index, record) in records.iter().enumerate() {
                writeln!(out, "crash[{index}] {record}")?;
            }
            Ok(())
        }
        CommandOutcome::CrashesCleared => writeln!(out, "OK crash records cleared"),
        CommandOutcome::CrashProvoked => writeln!(out, "OK hanging a task, expect a watchdog reset"),
        CommandOutcome::RestartRequested => writeln!(out, "OK restarting"),
        CommandOutcome::Help(Some(spec)) => writeln!(out, "{}: {}", spec.usage, spec.summary),
        CommandOutcome::Help(None) => {
            for spec in catalog::commands() {
                writeln!(out, "{:<10} {}", spec.name, spec.summary)?;
            }
            Ok(())
        }
    }
}

/// Writes the negative acknowledgement for a rejected command.
///
/// # Errors
///
/// Propagates failures of `out`.
pub fn write_error<W: Write, E: fmt::Debug>(out: &mut W, error: &CommandError<'_, E>) -> fmt::Result {
    if error.is_nak() {
        writeln!(out, "NAK {error}")
    } else {
        writeln!(out, "ERR {error}")
    }
}

/// Renders a console response into an owned string.
#[cfg(feature = "alloc")]
#[must_use]
pub fn render_outcome(outcome: &CommandOutcome) -> alloc::string::String {
    let mut out = alloc::string::String::new();
    // Writing into a `String` cannot fail.
    let _ = write_outcome(&mut out, outcome);
    out
}

/// Emits the bus messages answering `outcome`.
///
/// Stats go to `/debugstate/kwl/scheduler/<group>` and crash records to
/// `/debugstate/kwl/crash/<index>`; other outcomes publish nothing. Items whose
/// topic or payload does not fit are skipped.
pub fn for_each_topic_response<F>(outcome: &CommandOutcome, mut publish: F)
where
    F: FnMut(&Topic, &str),
{
    match outcome {
        CommandOutcome::Stats { groups, .. } => {
            for stats in groups {
                let mut payload = Payload::new();
                if let (Ok(topic), Ok(())) = (
                    topic::stats_topic(stats.name),
                    write_stats_values(&mut payload, stats),
                ) {
                    publish(&topic, &payload);
                }
            }
        }
        CommandOutcome::Crashes(records) => {
            for (index, record) in records.iter().enumerate() {
                let mut payload = Payload::new();
                if let (Ok(topic), Ok(())) =
                    (topic::crash_topic(index), write!(payload, "{record}"))
                {
                    publish(&topic, &payload);
                }
            }
        }
        _ => {}
    }
}
