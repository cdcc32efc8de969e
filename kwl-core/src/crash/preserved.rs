//! Fault snapshot that survives a watchdog reset.
//!
//! The platform places one [`PreservedFault`] in RAM that the startup code
//! does not initialise. Its contents are garbage after a power cycle, so the
//! record only counts when both the magic and the checksum match.

use super::{FaultInfo, FaultSource};

const MAGIC: u32 = 0x5744_4F47;
const CHECKSUM_SEED: u32 = 0xA5A5_5A5A;

#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PreservedFault {
    magic: u32,
    pc: u32,
    sp: u32,
    uptime_ms: u32,
    real_time: u32,
    checksum: u32,
}

impl PreservedFault {
    /// A cell holding no fault.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            magic: 0,
            pc: 0,
            sp: 0,
            uptime_ms: 0,
            real_time: 0,
            checksum: 0,
        }
    }

    /// Stores `info`. Called from the pre-timeout handler, so it only writes fields.
    pub fn capture(&mut self, info: FaultInfo) {
        self.pc = info.pc;
        self.sp = info.sp;
        self.uptime_ms = info.uptime_ms;
        self.real_time = info.real_time;
        self.magic = MAGIC;
        self.checksum = self.expected_checksum();
    }

    /// Returns `true` when a valid snapshot is waiting to be read.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.magic == MAGIC && self.checksum == self.expected_checksum()
    }

    /// Returns the snapshot if valid and clears the cell.
    pub fn take(&mut self) -> Option<FaultInfo> {
        let info = self.is_armed().then_some(FaultInfo {
            pc: self.pc,
            sp: self.sp,
            uptime_ms: self.uptime_ms,
            real_time: self.real_time,
        });
        self.disarm();
        info
    }

    /// Clears the cell.
    pub fn disarm(&mut self) {
        *self = Self::empty();
    }

    fn expected_checksum(&self) -> u32 {
        CHECKSUM_SEED
            ^ self.magic
            ^ self.pc.rotate_left(7)
            ^ self.sp.rotate_left(13)
            ^ self.uptime_ms.rotate_left(19)
            ^ self.real_time.rotate_left(27)
    }
}

impl Default for PreservedFault {
    fn default() -> Self {
        Self::empty()
    }
}

impl FaultSource for PreservedFault {
    fn read_last_fault(&mut self) -> Option<FaultInfo> {
        self.take()
    }
}
