//! Coalescing outbound notifications.

use core::cell::Cell;
use core::time::Duration;

use super::{RegisterError, Scheduler, Task, TaskSlot, TaskTimingStats};

/// Result of handing a message to the sender.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SendStatus {
    /// The message left the device.
    Sent,
    /// The message was dropped; do not retry.
    Failed,
    /// Part of the message is still outstanding; try again later.
    Retry,
}

/// How [`PublishTask::publish`] treated the new message.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PublishOutcome {
    Queued,
    /// An unsent message was replaced.
    Coalesced,
}

/// Keeps at most one message in flight for an owner's topic.
///
/// A publish stores the message and schedules an attempt on the next
/// scheduler pass. Publishing again before the attempt replaces the stored
/// message. A sender may update the message (e.g. clear the bits it managed
/// to send) and ask for a retry.
pub struct PublishTask<'a, O, M> {
    slot: TaskSlot<'a>,
    owner: Cell<Option<&'a O>>,
    sender: fn(&O, &mut M) -> SendStatus,
    message: Cell<Option<M>>,
    retry_interval: Duration,
    attempts: Cell<u32>,
    failures: Cell<u32>,
}

impl<'a, O, M> PublishTask<'a, O, M> {
    #[must_use]
    pub const fn new(sender: fn(&O, &mut M) -> SendStatus, retry_interval: Duration) -> Self {
        Self {
            slot: TaskSlot::new(),
            owner: Cell::new(None),
            sender,
            message: Cell::new(None),
            retry_interval,
            attempts: Cell::new(0),
            failures: Cell::new(0),
        }
    }

    /// Binds the task to `owner` and registers it with `scheduler`.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::AlreadyRegistered`] when attached twice.
    pub fn attach(
        &'a self,
        owner: &'a O,
        stats: &'a TaskTimingStats<'a>,
        scheduler: &Scheduler<'a>,
    ) -> Result<(), RegisterError>
    where
        O: 'a,
        M: 'a,
    {
        if self.slot.is_registered() {
            return Err(RegisterError::AlreadyRegistered);
        }
        self.owner.set(Some(owner));
        scheduler.register(self, stats)
    }

    /// Stores `message` and schedules an attempt on the next iteration.
    pub fn publish(&self, message: M) -> PublishOutcome {
        let outcome = match self.message.replace(Some(message)) {
            Some(_) => PublishOutcome::Coalesced,
            None => PublishOutcome::Queued,
        };
        self.slot.run_once(Duration::ZERO);
        outcome
    }

    /// Returns `true` from [`publish`](Self::publish) until the attempt completes.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot.is_running() || self.has_message()
    }

    /// Drops any unsent message.
    pub fn cancel(&self) {
        self.message.set(None);
        self.slot.cancel();
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures.get()
    }

    fn has_message(&self) -> bool {
        let message = self.message.take();
        let present = message.is_some();
        self.message.set(message);
        present
    }
}

impl<'a, O, M> Task<'a> for PublishTask<'a, O, M> {
    fn slot(&self) -> &TaskSlot<'a> {
        &self.slot
    }

    fn execute(&self) {
        let Some(owner) = self.owner.get() else {
            return;
        };
        let Some(mut message) = self.message.take() else {
            return;
        };

        self.attempts.set(self.attempts.get().saturating_add(1));
        match (self.sender)(owner, &mut message) {
            SendStatus::Sent => {}
            SendStatus::Failed => self.failures.set(self.failures.get().saturating_add(1)),
            SendStatus::Retry => {
                // A publish from inside the sender supersedes the retry.
                if !self.has_message() {
                    self.message.set(Some(message));
                    self.slot.run_once(self.retry_interval);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Clock, Instant};
    use crate::watchdog::Watchdog;

    struct MockClock(Cell<u32>);

    impl MockClock {
        fn advance_ms(&self, millis: u32) {
            self.0.set(self.0.get() + millis * 1_000);
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            Instant::from_micros(self.0.get())
        }
    }

    struct NoWatchdog;

    impl Watchdog for NoWatchdog {
        fn arm(&mut self, _timeout: Duration) {}
        fn feed(&mut self) {}
        fn disable(&mut self) {}
    }

    /// Sends one bit of the mask per attempt.
    struct Topic<'a> {
        task: PublishTask<'a, Topic<'a>, u8>,
        sent_bits: Cell<u8>,
    }

    impl<'a> Topic<'a> {
        fn new() -> Self {
            Self {
                task: PublishTask::new(Self::send, Duration::from_millis(100)),
                sent_bits: Cell::new(0),
            }
        }

        fn send(&self, mask: &mut u8) -> SendStatus {
            let bit = *mask & mask.wrapping_neg();
            self.sent_bits.set(self.sent_bits.get() | bit);
            *mask &= !bit;
            if *mask == 0 {
                SendStatus::Sent
            } else {
                SendStatus::Retry
            }
        }
    }

    #[test]
    fn publish_coalesces_until_sent() {
        let clock = MockClock(Cell::new(0));
        let scheduler = Scheduler::new(&clock);
        let stats = TaskTimingStats::new("Publish");
        let topic = Topic::new();
        topic.task.attach(&topic, &stats, &scheduler).unwrap();

        assert_eq!(topic.task.publish(0b0001), PublishOutcome::Queued);
        assert_eq!(topic.task.publish(0b0010), PublishOutcome::Coalesced);
        assert!(topic.task.is_pending());

        scheduler.run_iteration(&mut NoWatchdog);
        assert!(!topic.task.is_pending());
        assert_eq!(topic.sent_bits.get(), 0b0010);
        assert_eq!(topic.task.attempts(), 1);
    }

    #[test]
    fn retry_keeps_partial_progress() {
        let clock = MockClock(Cell::new(0));
        let scheduler = Scheduler::new(&clock);
        let stats = TaskTimingStats::new("Publish");
        let topic = Topic::new();
        topic.task.attach(&topic, &stats, &scheduler).unwrap();

        topic.task.publish(0b0101);
        scheduler.run_iteration(&mut NoWatchdog);
        assert!(topic.task.is_pending());
        assert_eq!(topic.sent_bits.get(), 0b0001);

        scheduler.run_iteration(&mut NoWatchdog);
        assert_eq!(topic.task.attempts(), 1);

        clock.advance_ms(100);
        scheduler.run_iteration(&mut NoWatchdog);
        assert!(!topic.task.is_pending());
        assert_eq!(topic.sent_bits.get(), 0b0101);
        assert_eq!(topic.task.attempts(), 2);
        assert_eq!(topic.task.failures(), 0);
    }
}
