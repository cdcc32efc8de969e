//! Statically allocated binding of an owner operation to a trigger policy.

use core::cell::Cell;
use core::time::Duration;

use super::{RegisterError, Scheduler, Task, TaskSlot, TaskTimingStats};
use crate::time::Instant;

enum Binding<O, A> {
    Plain(fn(&O)),
    Args(fn(&O, A), A),
}

/// Runs `fn(&O)` or `fn(&O, A)` on the owner when its trigger fires.
///
/// A component embeds one `TimedTask` per unit of work and attaches them all
/// once at startup. The same operation may be bound by several tasks with
/// different arguments, e.g. a periodic send and a forced send.
pub struct TimedTask<'a, O, A: Copy = ()> {
    slot: TaskSlot<'a>,
    owner: Cell<Option<&'a O>>,
    binding: Binding<O, A>,
}

impl<'a, O> TimedTask<'a, O, ()> {
    #[must_use]
    pub const fn new(operation: fn(&O)) -> Self {
        Self {
            slot: TaskSlot::new(),
            owner: Cell::new(None),
            binding: Binding::Plain(operation),
        }
    }
}

impl<'a, O, A: Copy> TimedTask<'a, O, A> {
    #[must_use]
    pub const fn with_args(operation: fn(&O, A), args: A) -> Self {
        Self {
            slot: TaskSlot::new(),
            owner: Cell::new(None),
            binding: Binding::Args(operation, args),
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
        A: 'a,
    {
        if self.slot.is_registered() {
            return Err(RegisterError::AlreadyRegistered);
        }
        self.owner.set(Some(owner));
        scheduler.register(self, stats)
    }

    /// Fires once after `delay`.
    pub fn run_once(&self, delay: Duration) {
        self.slot.run_once(delay);
    }

    /// Fires every `period`; drift-free when called from the task's own operation.
    pub fn run_repeated(&self, period: Duration) {
        self.slot.run_repeated(period);
    }

    /// Fires after `first_delay`, then every `period`.
    pub fn run_repeated_after(&self, first_delay: Duration, period: Duration) {
        self.slot.run_repeated_after(first_delay, period);
    }

    pub fn cancel(&self) {
        self.slot.cancel();
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.slot.is_enabled()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Instant {
        self.slot.next_deadline()
    }

    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        self.slot.period()
    }

    /// Arguments passed on every firing; `None` for plain bindings.
    #[must_use]
    pub fn args(&self) -> Option<A> {
        match self.binding {
            Binding::Plain(_) => None,
            Binding::Args(_, args) => Some(args),
        }
    }

    #[must_use]
    pub fn schedule_time(&self) -> Instant {
        self.slot.schedule_time()
    }

    #[must_use]
    pub fn stats(&self) -> Option<&'a TaskTimingStats<'a>> {
        self.slot.stats()
    }
}

impl<'a, O, A: Copy> Task<'a> for TimedTask<'a, O, A> {
    fn slot(&self) -> &TaskSlot<'a> {
        &self.slot
    }

    fn execute(&self) {
        let Some(owner) = self.owner.get() else {
            return;
        };
        match self.binding {
            Binding::Plain(operation) => operation(owner),
            Binding::Args(operation, args) => operation(owner, args),
        }
    }
}
