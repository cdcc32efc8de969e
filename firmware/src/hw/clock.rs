use embassy_time::Instant as EmbassyInstant;
use kwl_core::time::{Clock, Instant};

/// Scheduler clock on the embassy time driver, truncated to the wrapping `u32` counter.
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now(&self) -> Instant {
        Instant::from_micros_u64(EmbassyInstant::now().as_micros())
    }
}

/// Milliseconds since boot, saturating.
pub fn uptime_ms() -> u32 {
    u32::try_from(EmbassyInstant::now().as_millis()).unwrap_or(u32::MAX)
}
