//! Watchdog and restart contracts implemented by each platform.

use core::time::Duration;

/// Hardware watchdog timeout used by the firmware.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(4);

/// Software deadline that snapshots the faulting context before the hardware reset.
pub const PRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Timer that resets the device unless fed.
pub trait Watchdog {
    /// Starts the countdown. On most hardware this cannot be undone.
    fn arm(&mut self, timeout: Duration);

    /// Restarts the countdown.
    fn feed(&mut self);

    /// Stops the countdown where the hardware allows it.
    fn disable(&mut self);
}

impl<W> Watchdog for &mut W
where
    W: Watchdog + ?Sized,
{
    fn arm(&mut self, timeout: Duration) {
        (**self).arm(timeout);
    }

    fn feed(&mut self) {
        (**self).feed();
    }

    fn disable(&mut self) {
        (**self).disable();
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum WatchdogState {
    #[default]
    Disarmed,
    Armed {
        timeout: Duration,
    },
}

/// Tracks the arm state of a platform watchdog and counts feeds.
///
/// Feeds while disarmed are dropped so a platform driver never sees a feed
/// before its timeout has been configured.
#[derive(Debug)]
pub struct WatchdogGuard<W> {
    inner: W,
    state: WatchdogState,
    feeds: u32,
}

impl<W: Watchdog> WatchdogGuard<W> {
    #[must_use]
    pub const fn new(inner: W) -> Self {
        Self {
            inner,
            state: WatchdogState::Disarmed,
            feeds: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> WatchdogState {
        self.state
    }

    #[must_use]
    pub const fn feeds(&self) -> u32 {
        self.feeds
    }

    #[must_use]
    pub const fn inner(&self) -> &W {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Watchdog> Watchdog for WatchdogGuard<W> {
    fn arm(&mut self, timeout: Duration) {
        self.inner.arm(timeout);
        self.state = WatchdogState::Armed { timeout };
    }

    fn feed(&mut self) {
        if let WatchdogState::Armed { .. } = self.state {
            self.inner.feed();
            self.feeds = self.feeds.wrapping_add(1);
        }
    }

    fn disable(&mut self) {
        self.inner.disable();
        self.state = WatchdogState::Disarmed;
    }
}

/// Deliberate device restart.
///
/// Implementations must not leave a fault behind, so a restart never shows up
/// as a crash record on the next boot.
pub trait RestartControl {
    fn restart(&mut self) -> !;
}
