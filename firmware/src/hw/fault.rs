//! Watchdog pre-timeout and the fault snapshot it leaves behind.
//!
//! SysTick runs at 1 kHz and counts [`PRE_TIMEOUT`] down between two watchdog
//! feeds. When the count reaches zero the handler reads the exception frame
//! of the interrupted code and parks its PC and SP in `.uninit` RAM, which the
//! startup code leaves alone. The IWDG resets the chip shortly after; the next
//! boot reads the snapshot through [`PreservedRam`].

use core::arch::global_asm;
use core::mem::MaybeUninit;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use kwl_core::crash::{BusyWait, FaultInfo, FaultSource, PreservedFault};
use kwl_core::watchdog::{PRE_TIMEOUT, RestartControl};
use portable_atomic::{AtomicU32, Ordering};

use super::clock;

const FLASH_BASE: u32 = 0x0800_0000;
/// HSI16; `hal::Config::default()` keeps the reset clock tree.
const CORE_CLOCK_HZ: u32 = 16_000_000;
const TICK_HZ: u32 = 1_000;

#[allow(clippy::cast_possible_truncation)]
const PRE_TIMEOUT_TICKS: u32 = PRE_TIMEOUT.as_millis() as u32;

/// Ticks left until the snapshot; zero while stopped.
static COUNTDOWN: AtomicU32 = AtomicU32::new(0);

#[unsafe(link_section = ".uninit.kwl_fault")]
static mut PRESERVED: MaybeUninit<PreservedFault> = MaybeUninit::uninit();

unsafe extern "C" {
    static _stack_start: u32;
}

// SysTick entry: picks the stack the interrupted code pushed its frame on and
// tail-calls `pre_timeout_tick` with the frame address. Overrides the
// cortex-m-rt default handler.
global_asm!(
    ".section .text.SysTick,\"ax\",%progbits",
    ".global SysTick",
    ".type SysTick,%function",
    ".thumb_func",
    "SysTick:",
    "    movs r0, #4",
    "    mov r1, lr",
    "    tst r0, r1",
    "    bne 1f",
    "    mrs r0, msp",
    "    ldr r1, ={handler}",
    "    bx r1",
    "1:",
    "    mrs r0, psp",
    "    ldr r1, ={handler}",
    "    bx r1",
    "    .ltorg",
    ".size SysTick, . - SysTick",
    handler = sym pre_timeout_tick,
);

/// Starts the 1 kHz tick. The countdown stays idle until [`rearm`].
pub fn start_tick(syst: &mut SYST) {
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(CORE_CLOCK_HZ / TICK_HZ - 1);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
}

/// Restarts the countdown. Called on every watchdog feed.
///
/// A snapshot taken while the loop was stalled is dropped once the loop feeds
/// again.
pub fn rearm() {
    critical_section::with(|_| {
        if COUNTDOWN.swap(PRE_TIMEOUT_TICKS, Ordering::Relaxed) == 0 {
            unsafe { (*preserved()).disarm() };
        }
    });
}

pub fn stop() {
    COUNTDOWN.store(0, Ordering::Relaxed);
}

fn preserved() -> *mut PreservedFault {
    // `MaybeUninit<T>` has the layout of `T`.
    (&raw mut PRESERVED).cast()
}

unsafe extern "C" fn pre_timeout_tick(frame: *const u32) {
    let remaining = COUNTDOWN.load(Ordering::Relaxed);
    if remaining == 0 {
        return;
    }
    COUNTDOWN.store(remaining - 1, Ordering::Relaxed);
    if remaining > 1 {
        return;
    }

    // Exception frame: r0 r1 r2 r3 r12 lr pc xpsr.
    let pc = unsafe { frame.add(6).read_volatile() };
    let sp = u32::try_from(frame.addr()).unwrap_or(0);
    let info = FaultInfo {
        pc: pc.wrapping_sub(FLASH_BASE) >> 1,
        sp: stack_top().wrapping_sub(sp) >> 2,
        uptime_ms: clock::uptime_ms(),
        real_time: 0,
    };
    unsafe { (*preserved()).capture(info) };
}

fn stack_top() -> u32 {
    let top = unsafe { &raw const _stack_start };
    u32::try_from(top.addr()).unwrap_or(0)
}

/// Boot-time view of the `.uninit` snapshot.
///
/// Read before [`rearm`] is first called, so the handler never runs concurrently.
pub struct PreservedRam;

impl FaultSource for PreservedRam {
    fn read_last_fault(&mut self) -> Option<FaultInfo> {
        // Every bit pattern is a valid `PreservedFault`; garbage fails its checksum.
        unsafe { (*preserved()).take() }
    }
}

/// Clean restart: no countdown, no snapshot, then a system reset.
pub struct SystemReset;

impl RestartControl for SystemReset {
    fn restart(&mut self) -> ! {
        stop();
        critical_section::with(|_| unsafe { (*preserved()).disarm() });
        SCB::sys_reset()
    }
}

/// The provoked hang spins here until the watchdog fires.
pub struct Spin;

impl BusyWait for Spin {
    fn spin(&self) {
        cortex_m::asm::nop();
    }
}
