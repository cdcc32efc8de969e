use core::time::Duration;

use embassy_stm32::Peri;
use embassy_stm32::peripherals::IWDG;
use embassy_stm32::wdg::IndependentWatchdog;
use kwl_core::watchdog::Watchdog;

use super::fault;

/// IWDG plus the SysTick pre-timeout.
///
/// The IWDG prescaler is programmed when the driver is built and cannot be
/// changed or stopped once the watchdog runs, so `arm` only releases it and
/// `disable` only stops the pre-timeout.
pub struct HardwareWatchdog<'d> {
    iwdg: IndependentWatchdog<'d, IWDG>,
    running: bool,
}

impl<'d> HardwareWatchdog<'d> {
    pub fn new(iwdg: Peri<'d, IWDG>, timeout: Duration) -> Self {
        let timeout_us = u32::try_from(timeout.as_micros()).unwrap_or(u32::MAX);
        Self {
            iwdg: IndependentWatchdog::new(iwdg, timeout_us),
            running: false,
        }
    }
}

impl Watchdog for HardwareWatchdog<'_> {
    fn arm(&mut self, _timeout: Duration) {
        if !self.running {
            self.iwdg.unleash();
            self.running = true;
        }
        self.feed();
    }

    fn feed(&mut self) {
        self.iwdg.pet();
        fault::rearm();
    }

    fn disable(&mut self) {
        fault::stop();
    }
}
