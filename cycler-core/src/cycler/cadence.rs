//! Monotonic tick abstraction the polling loop suspends on.
//!
//! The Cycler computes each poll's deadline before issuing the instrument
//! queries, so query latency comes out of the interval rather than being added
//! to it. A deadline that has already passed must resolve immediately.

use core::future::Future;
use core::ops::Add;
use core::time::Duration;

/// Monotonic instant produced by a [`CadenceClock`].
pub trait CadenceInstant: Copy + Ord + Add<Duration, Output = Self> {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Result of a cadence sleep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Wake {
    /// The deadline passed.
    Elapsed,
    /// An external stop was requested while sleeping.
    Stopped,
}

/// Time source and the only suspension point of a run.
pub trait CadenceClock {
    type Instant: CadenceInstant;

    fn now(&self) -> Self::Instant;

    /// Suspends until `deadline` or until a stop is requested, whichever is first.
    fn sleep_until(&mut self, deadline: Self::Instant) -> impl Future<Output = Wake>;
}

impl<C: CadenceClock + ?Sized> CadenceClock for &mut C {
    type Instant = C::Instant;

    fn now(&self) -> Self::Instant {
        (**self).now()
    }

    fn sleep_until(&mut self, deadline: Self::Instant) -> impl Future<Output = Wake> {
        (**self).sleep_until(deadline)
    }
}
