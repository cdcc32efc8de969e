use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic;
use std::sync::Once;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kwl_core::crash::{BusyWait, FaultInfo, MemoryStorage, PreservedFault};
use kwl_core::time::{Clock, Instant};
use kwl_core::watchdog::{PRE_TIMEOUT, RestartControl, Watchdog};

/// Size of the emulated configuration EEPROM.
pub const CONFIG_AREA_LEN: usize = 1024;

/// Pseudo program counters reported in crash records.
pub const LOOP_PC: u32 = 0x0_1c40;
pub const SPIN_PC: u32 = 0x0_2f14;
const STACK_DEPTH: u32 = 0x0180;

pub type ConfigStorage = MemoryStorage<CONFIG_AREA_LEN>;

/// Why the emulated MCU went through reset. Carried as the unwind payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResetCause {
    Watchdog,
    Restart,
}

impl fmt::Display for ResetCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetCause::Watchdog => f.write_str("watchdog timeout"),
            ResetCause::Restart => f.write_str("restart requested"),
        }
    }
}

/// State that survives an emulated reset: the virtual clock source, the
/// configuration EEPROM and the uninitialised RAM holding the fault snapshot.
pub struct SimBoard {
    start_micros: u32,
    micros: Cell<u32>,
    boot_micros: Cell<u32>,
    last_feed: Cell<u32>,
    watchdog_timeout: Cell<Option<u32>>,
    pre_timeout_fired: Cell<bool>,
    pc: Cell<u32>,
    boots: Cell<u32>,
    pub(crate) preserved: RefCell<PreservedFault>,
    pub(crate) storage: RefCell<ConfigStorage>,
}

impl SimBoard {
    pub fn new(start_micros: u32) -> Self {
        Self {
            start_micros,
            micros: Cell::new(start_micros),
            boot_micros: Cell::new(start_micros),
            last_feed: Cell::new(start_micros),
            watchdog_timeout: Cell::new(None),
            pre_timeout_fired: Cell::new(false),
            pc: Cell::new(LOOP_PC),
            boots: Cell::new(0),
            preserved: RefCell::new(PreservedFault::empty()),
            storage: RefCell::new(ConfigStorage::erased()),
        }
    }

    /// Reset vector: restarts the counter and leaves the watchdog disarmed.
    pub fn power_on(&self) {
        self.micros.set(self.start_micros);
        self.boot_micros.set(self.start_micros);
        self.last_feed.set(self.start_micros);
        self.watchdog_timeout.set(None);
        self.pre_timeout_fired.set(false);
        self.pc.set(LOOP_PC);
        self.boots.set(self.boots.get() + 1);
    }

    pub fn boots(&self) -> u32 {
        self.boots.get()
    }

    pub fn uptime_ms(&self) -> u32 {
        self.micros.get().wrapping_sub(self.boot_micros.get()) / 1_000
    }

    /// Advances virtual time, firing the pre-timeout and the reset as due.
    pub fn advance_ms(&self, millis: u32) {
        self.micros
            .set(self.micros.get().wrapping_add(millis.saturating_mul(1_000)));

        let Some(timeout) = self.watchdog_timeout.get() else {
            return;
        };
        let starved = self.micros.get().wrapping_sub(self.last_feed.get());
        if !self.pre_timeout_fired.get() && u128::from(starved) >= PRE_TIMEOUT.as_micros() {
            self.pre_timeout_fired.set(true);
            self.preserved.borrow_mut().capture(FaultInfo {
                pc: self.pc.get(),
                sp: STACK_DEPTH,
                uptime_ms: self.uptime_ms(),
                real_time: wall_clock_secs(),
            });
        }
        if starved >= timeout {
            panic::panic_any(ResetCause::Watchdog);
        }
    }

    fn feed(&self) {
        self.last_feed.set(self.micros.get());
        if self.pre_timeout_fired.replace(false) {
            // The loop recovered; the snapshot no longer describes a hang.
            self.preserved.borrow_mut().disarm();
        }
        self.pc.set(LOOP_PC);
    }
}

impl Clock for SimBoard {
    fn now(&self) -> Instant {
        Instant::from_micros(self.micros.get())
    }
}

/// Independent watchdog model with the pre-timeout snapshot.
pub struct SimWatchdog<'b>(pub &'b SimBoard);

impl Watchdog for SimWatchdog<'_> {
    fn arm(&mut self, timeout: Duration) {
        let micros = u32::try_from(timeout.as_micros()).unwrap_or(u32::MAX);
        self.0.watchdog_timeout.set(Some(micros));
        self.0.feed();
    }

    fn feed(&mut self) {
        self.0.feed();
    }

    fn disable(&mut self) {
        self.0.watchdog_timeout.set(None);
    }
}

/// One millisecond of a busy loop.
pub struct SimSpin<'b>(pub &'b SimBoard);

impl BusyWait for SimSpin<'_> {
    fn spin(&self) {
        self.0.pc.set(SPIN_PC);
        self.0.advance_ms(1);
    }
}

pub struct SimRestart<'b>(pub &'b SimBoard);

impl RestartControl for SimRestart<'_> {
    fn restart(&mut self) -> ! {
        self.0.watchdog_timeout.set(None);
        self.0.preserved.borrow_mut().disarm();
        panic::panic_any(ResetCause::Restart);
    }
}

/// Keeps emulated resets out of stderr; other panics still report.
pub fn silence_reset_panics() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let default_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<ResetCause>().is_none() {
                default_hook(info);
            }
        }));
    });
}

fn wall_clock_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| u32::try_from(elapsed.as_secs()).ok())
        .unwrap_or(0)
}
