//! Wrapping microsecond clock shared by the scheduler and its platforms.
//!
//! The platform counter is a free-running `u32` of microseconds that wraps
//! roughly every 71.6 minutes. [`Instant`] therefore deliberately has no
//! ordering: every comparison goes through an unsigned difference so deadlines
//! stay correct across the wrap.

use core::ops::Add;
use core::time::Duration;

/// Half of the counter range. Differences below this value count as "not in the future".
const HALF_RANGE: u32 = 1 << 31;

/// Longest delay that can be expressed without becoming ambiguous across a wrap.
pub const MAX_SCHEDULE_DELAY: Duration = Duration::from_micros(0x7FFF_FFFF);

/// Point on the wrapping microsecond timeline.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Instant(u32);

impl Instant {
    /// Counter origin.
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_micros(micros: u32) -> Self {
        Self(micros)
    }

    /// Truncates a wide microsecond reading (e.g. a 64-bit uptime) onto the wrapping counter.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_micros_u64(micros: u64) -> Self {
        Self(micros as u32)
    }

    /// Maps a millisecond uptime onto the wrapping microsecond counter.
    #[must_use]
    pub const fn from_millis_u64(millis: u64) -> Self {
        Self::from_micros_u64(millis.wrapping_mul(1_000))
    }

    #[must_use]
    pub const fn as_micros(self) -> u32 {
        self.0
    }

    /// Advances the instant by `micros`, wrapping at the counter range.
    #[must_use]
    pub const fn wrapping_add_micros(self, micros: u32) -> Self {
        Self(self.0.wrapping_add(micros))
    }

    /// Advances the instant by `duration`, clamped to [`MAX_SCHEDULE_DELAY`].
    #[must_use]
    pub const fn wrapping_add(self, duration: Duration) -> Self {
        self.wrapping_add_micros(clamp_micros(duration))
    }

    /// Microseconds from `earlier` to `self`, computed by unsigned subtraction.
    #[must_use]
    pub const fn wrapping_micros_since(self, earlier: Self) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    #[must_use]
    pub fn wrapping_duration_since(self, earlier: Self) -> Duration {
        Duration::from_micros(u64::from(self.wrapping_micros_since(earlier)))
    }

    /// Returns `true` once `self` is at or past `deadline`.
    ///
    /// A deadline more than half the counter range in the past reads as "in the
    /// future"; schedules never place deadlines that far ahead.
    #[must_use]
    pub const fn is_reached(self, deadline: Self) -> bool {
        self.wrapping_micros_since(deadline) < HALF_RANGE
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        self.wrapping_add(rhs)
    }
}

/// Converts `duration` into counter ticks, saturating at [`MAX_SCHEDULE_DELAY`].
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn clamp_micros(duration: Duration) -> u32 {
    let micros = duration.as_micros();
    if micros >= 1 << 31 {
        HALF_RANGE - 1
    } else {
        micros as u32
    }
}

/// Monotonic microsecond source supplied by the platform.
pub trait Clock {
    fn now(&self) -> Instant;
}

impl<C> Clock for &C
where
    C: Clock + ?Sized,
{
    fn now(&self) -> Instant {
        (**self).now()
    }
}
