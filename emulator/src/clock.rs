//! Cadence clocks for the emulator: virtual time for unattended runs and the
//! embassy time driver for wall-clock runs.

use core::future::{Future, ready};
use core::ops::Add;
use std::time::Duration;

use cycler_core::cycler::{CadenceClock, CadenceInstant, Wake};
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Instant, Timer};

use crate::bench::{TimeSource, VirtualTime};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(Duration);

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl CadenceInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

/// Jumps straight to each deadline.
#[derive(Clone, Debug)]
pub struct VirtualClock {
    time: VirtualTime,
    stop_at: Option<Duration>,
}

impl VirtualClock {
    #[must_use]
    pub fn new(time: VirtualTime) -> Self {
        Self {
            time,
            stop_at: None,
        }
    }

    /// Reports a stop from the first sleep whose deadline reaches `at`.
    #[must_use]
    pub fn stopping_at(mut self, at: Duration) -> Self {
        self.stop_at = Some(at);
        self
    }
}

impl CadenceClock for VirtualClock {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.time.elapsed())
    }

    fn sleep_until(&mut self, deadline: SimInstant) -> impl Future<Output = Wake> {
        let wake = match self.stop_at {
            Some(stop_at) if deadline.0 >= stop_at => {
                self.time.advance_to(stop_at);
                Wake::Stopped
            }
            _ => {
                self.time.advance_to(deadline.0);
                Wake::Elapsed
            }
        };
        ready(wake)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostInstant(Instant);

impl Add<Duration> for HostInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self(self.0 + embassy_time::Duration::from_micros(micros))
    }
}

impl CadenceInstant for HostInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_duration_since(earlier.0).as_micros())
    }
}

/// Sleeps on the embassy timer until the deadline or until `stop` is signalled.
///
/// A signal raised while the Cycler is polling stays pending and ends the
/// next sleep.
pub struct RealtimeClock {
    stop: &'static Signal<CriticalSectionRawMutex, ()>,
}

impl RealtimeClock {
    #[must_use]
    pub const fn new(stop: &'static Signal<CriticalSectionRawMutex, ()>) -> Self {
        Self { stop }
    }
}

impl CadenceClock for RealtimeClock {
    type Instant = HostInstant;

    fn now(&self) -> HostInstant {
        HostInstant(Instant::now())
    }

    fn sleep_until(&mut self, deadline: HostInstant) -> impl Future<Output = Wake> {
        let stop = self.stop;
        async move {
            match select(Timer::at(deadline.0), stop.wait()).await {
                Either::First(()) => Wake::Elapsed,
                Either::Second(()) => Wake::Stopped,
            }
        }
    }
}
