//! Post-mortem records for watchdog resets.
//!
//! A hang is caught by the watchdog. Just before the hardware reset the
//! platform parks the faulting PC and SP in RAM that survives the reset
//! ([`preserved`]); on the next boot the [`recorder`] turns that snapshot into
//! a [`CrashRecord`] and persists the ring through [`storage`].

use core::fmt;

use heapless::HistoryBuf;

pub mod preserved;
pub mod provoke;
pub mod recorder;
pub mod storage;

pub use preserved::PreservedFault;
pub use provoke::{BusyWait, CrashProvoker};
pub use recorder::{BootReport, CrashRecorder};
pub use storage::{
    CRASH_IMAGE_LEN, CRASH_LAYOUT_VERSION, CRASH_LOG_OFFSET, CrashStorage, LayoutError,
    MemoryStorage, MemoryStorageError, StorageError,
};

/// Number of crash records kept in persistent storage.
pub const CRASH_LOG_CAPACITY: usize = 4;

const PC_BITS: u32 = 18;
const PC_MASK: u32 = (1 << PC_BITS) - 1;
const SP_MASK: u32 = (1 << (32 - PC_BITS)) - 1;

/// Processor state captured when the watchdog pre-timeout fired.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FaultInfo {
    pub pc: u32,
    pub sp: u32,
    pub uptime_ms: u32,
    /// Unix seconds, `0` when wall-clock time was unknown.
    pub real_time: u32,
}

/// Where the recorder learns about the last unplanned reset.
pub trait FaultSource {
    /// Returns the preserved fault, at most once per reset.
    fn read_last_fault(&mut self) -> Option<FaultInfo>;
}

impl<F> FaultSource for &mut F
where
    F: FaultSource + ?Sized,
{
    fn read_last_fault(&mut self) -> Option<FaultInfo> {
        (**self).read_last_fault()
    }
}

/// A scripted source: yields the stored fault once.
impl FaultSource for Option<FaultInfo> {
    fn read_last_fault(&mut self) -> Option<FaultInfo> {
        self.take()
    }
}

/// One persisted post-mortem entry.
///
/// PC and SP are stored in 18 and 14 bits respectively; platforms encode them
/// relative to their flash base and stack top before capture.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CrashRecord {
    pub uptime_ms: u32,
    pub real_time: u32,
    pc: u32,
    sp: u32,
}

impl CrashRecord {
    #[must_use]
    pub const fn new(uptime_ms: u32, real_time: u32, pc: u32, sp: u32) -> Self {
        Self {
            uptime_ms,
            real_time,
            pc: pc & PC_MASK,
            sp: sp & SP_MASK,
        }
    }

    #[must_use]
    pub const fn from_fault(info: FaultInfo) -> Self {
        Self::new(info.uptime_ms, info.real_time, info.pc, info.sp)
    }

    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.pc
    }

    #[must_use]
    pub const fn sp(&self) -> u32 {
        self.sp
    }

    /// Packs PC into the low 18 bits and SP into the high 14 bits.
    #[must_use]
    pub const fn packed_location(&self) -> u32 {
        self.pc | (self.sp << PC_BITS)
    }

    #[must_use]
    pub const fn from_packed(uptime_ms: u32, real_time: u32, location: u32) -> Self {
        Self::new(uptime_ms, real_time, location, location >> PC_BITS)
    }
}

impl fmt::Display for CrashRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uptime={}ms real_time={} pc={:#07x} sp={:#06x}",
            self.uptime_ms, self.real_time, self.pc, self.sp
        )
    }
}

/// Fixed-capacity FIFO of crash records; the oldest entry is overwritten when full.
#[derive(Clone)]
pub struct CrashLog<const N: usize = CRASH_LOG_CAPACITY> {
    ring: HistoryBuf<CrashRecord, N>,
}

impl<const N: usize> CrashLog<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
        }
    }

    pub fn push(&mut self, record: CrashRecord) {
        self.ring.write(record);
    }

    /// Records from oldest to newest.
    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &CrashRecord> + '_ {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&CrashRecord> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    #[must_use]
    pub fn has_crash(&self) -> bool {
        !self.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

impl<const N: usize> Default for CrashLog<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for CrashLog<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uptime_ms: u32) -> CrashRecord {
        CrashRecord::new(uptime_ms, 0, 0x100 + uptime_ms, 0x40)
    }

    #[test]
    fn ring_keeps_most_recent_in_insertion_order() {
        let mut log: CrashLog = CrashLog::new();
        for uptime in 1..=5 {
            log.push(record(uptime));
        }

        assert_eq!(log.len(), CRASH_LOG_CAPACITY);
        let uptimes: heapless::Vec<u32, 4> = log.iter().map(|r| r.uptime_ms).collect();
        assert_eq!(uptimes.as_slice(), &[2, 3, 4, 5]);
        assert_eq!(log.latest().map(|r| r.uptime_ms), Some(5));
    }

    #[test]
    fn clear_empties_the_ring() {
        let mut log: CrashLog = CrashLog::new();
        log.push(record(1));
        assert!(log.has_crash());
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.latest(), None);
    }

    #[test]
    fn location_fields_are_truncated_to_their_widths() {
        let record = CrashRecord::new(10, 0, 0xFFFF_FFFF, 0xFFFF_FFFF);
        assert_eq!(record.pc(), 0x3_FFFF);
        assert_eq!(record.sp(), 0x3FFF);
        assert_eq!(record.packed_location(), 0xFFFF_FFFF);

        let unpacked = CrashRecord::from_packed(10, 0, 0x0001_0123 | (0x12 << 18));
        assert_eq!(unpacked.pc(), 0x1_0123);
        assert_eq!(unpacked.sp(), 0x12);
    }

    #[test]
    fn scripted_fault_source_yields_once() {
        let mut source = Some(FaultInfo {
            pc: 0x200,
            sp: 0x10,
            uptime_ms: 5_000,
            real_time: 0,
        });
        assert!(source.read_last_fault().is_some());
        assert!(source.read_last_fault().is_none());
    }
}
