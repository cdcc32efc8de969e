//! Logging for the main loop.
//!
//! Events go out through defmt (RTT) on the target and through `println!` on
//! host builds. Every event has a target and a host `emit_*` function so call
//! sites stay free of `cfg` noise.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::fmt;

use kwl_core::crash::{BootReport, CrashRecord, LayoutError, StorageError};
use kwl_core::scheduler::Overrun;

use crate::console::LineError;

/// How the previous session ended, as far as the crash ring can tell.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootKind {
    Clean,
    /// A watchdog snapshot was found and appended.
    AfterCrash,
    /// The stored ring had a foreign layout and was cleared.
    Migrated,
    /// The ring could not be read or written.
    StorageFault,
}

impl BootKind {
    pub fn classify<E>(report: &BootReport<E>) -> Self {
        if report.storage.is_err() {
            BootKind::StorageFault
        } else if report.appended.is_some() {
            BootKind::AfterCrash
        } else if report.migrated.is_some() {
            BootKind::Migrated
        } else {
            BootKind::Clean
        }
    }

    const fn label(self) -> &'static str {
        match self {
            BootKind::Clean => "clean",
            BootKind::AfterCrash => "after watchdog reset",
            BootKind::Migrated => "crash ring migrated",
            BootKind::StorageFault => "crash storage fault",
        }
    }
}

/// Logs everything the crash recorder did during boot.
pub fn boot<E: fmt::Debug>(report: &BootReport<E>, stored: usize) {
    emit_boot(BootKind::classify(report).label(), stored);
    if let Some(layout) = &report.migrated {
        emit_migration(layout);
    }
    if let Some(record) = &report.appended {
        emit_crash_recorded(record);
    }
    if let Err(err) = &report.storage {
        storage_failure(err);
    }
}

pub fn storage_failure<E: fmt::Debug>(err: &StorageError<E>) {
    emit_storage_failure(err);
}

pub fn ready(tasks: usize, stats_groups: usize) {
    emit_ready(tasks, stats_groups);
}

pub fn overrun(overrun: &Overrun) {
    emit_overrun(overrun.stats, overrun.elapsed_us, overrun.period_us);
}

pub fn command(line: &str) {
    emit_command(line);
}

pub fn console_rejected(error: LineError) {
    emit_console_rejected(error);
}

/// A response line did not fit the reply queue.
pub fn reply_dropped() {
    emit_reply_dropped();
}

pub fn restart() {
    emit_restart();
}

#[cfg(target_os = "none")]
fn emit_boot(kind: &'static str, stored: usize) {
    defmt::info!("boot: {=str}, {=usize} crash record(s) stored", kind, stored);
}

#[cfg(not(target_os = "none"))]
fn emit_boot(kind: &'static str, stored: usize) {
    println!("boot: {kind}, {stored} crash record(s) stored");
}

#[cfg(target_os = "none")]
fn emit_migration(layout: &LayoutError) {
    defmt::warn!(
        "config migration: clearing crash reports ({})",
        defmt::Display2Format(layout)
    );
}

#[cfg(not(target_os = "none"))]
fn emit_migration(layout: &LayoutError) {
    println!("config migration: clearing crash reports ({layout})");
}

#[cfg(target_os = "none")]
fn emit_crash_recorded(record: &CrashRecord) {
    defmt::warn!("crash recorded: {}", defmt::Display2Format(record));
}

#[cfg(not(target_os = "none"))]
fn emit_crash_recorded(record: &CrashRecord) {
    println!("crash recorded: {record}");
}

#[cfg(target_os = "none")]
fn emit_storage_failure<E: fmt::Debug>(err: &StorageError<E>) {
    defmt::error!("{}", defmt::Display2Format(err));
}

#[cfg(not(target_os = "none"))]
fn emit_storage_failure<E: fmt::Debug>(err: &StorageError<E>) {
    println!("{err}");
}

#[cfg(target_os = "none")]
fn emit_ready(tasks: usize, stats_groups: usize) {
    defmt::info!(
        "scheduler: {=usize} tasks in {=usize} stats groups, watchdog armed",
        tasks,
        stats_groups
    );
}

#[cfg(not(target_os = "none"))]
fn emit_ready(tasks: usize, stats_groups: usize) {
    println!("scheduler: {tasks} tasks in {stats_groups} stats groups, watchdog armed");
}

#[cfg(target_os = "none")]
fn emit_overrun(stats: &'static str, elapsed_us: u32, period_us: u32) {
    defmt::warn!(
        "overrun: {=str} ran {=u32}us, period {=u32}us",
        stats,
        elapsed_us,
        period_us
    );
}

#[cfg(not(target_os = "none"))]
fn emit_overrun(stats: &'static str, elapsed_us: u32, period_us: u32) {
    println!("overrun: {stats} ran {elapsed_us}us, period {period_us}us");
}

#[cfg(target_os = "none")]
fn emit_command(line: &str) {
    defmt::info!("console: {=str}", line);
}

#[cfg(not(target_os = "none"))]
fn emit_command(line: &str) {
    println!("console: {line}");
}

#[cfg(target_os = "none")]
fn emit_console_rejected(error: LineError) {
    defmt::warn!("console: {}", defmt::Display2Format(&error));
}

#[cfg(not(target_os = "none"))]
fn emit_console_rejected(error: LineError) {
    println!("console: {error}");
}

#[cfg(target_os = "none")]
fn emit_reply_dropped() {
    defmt::warn!("console: reply queue full, line dropped");
}

#[cfg(not(target_os = "none"))]
fn emit_reply_dropped() {
    println!("console: reply queue full, line dropped");
}

#[cfg(target_os = "none")]
fn emit_restart() {
    defmt::info!("restart requested");
}

#[cfg(not(target_os = "none"))]
fn emit_restart() {
    println!("restart requested");
}
