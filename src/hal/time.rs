//! Time units.
use core::ops::{Add as Adds, Sub as Subtracts};

/// Abstract point in time. Useful for time periods
///
/// Any implementer of Instant can be subtracted with
/// itself to obtain a span of milliseconds.
///
/// Any implementer of Instant can be added with
/// milliseconds to obtain another instant.
pub trait Instant
where
    Self: Copy + Clone,
    Self: Subtracts<Output = Milliseconds>,
    Self: Adds<Milliseconds, Output = Self>,
{
}

/// Monotonic clock source.
pub trait Now {
    type I: Instant;
    fn now(&self) -> Self::I;
}

#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, defmt::Format)]
pub struct Milliseconds(pub u32);

#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, defmt::Format)]
pub struct Seconds(pub u32);

/// Extension trait that adds convenience methods to the `u32` type
pub trait U32Ext {
    /// Wrap in `Seconds`
    fn s(self) -> Seconds;

    /// Wrap in `Milliseconds`
    fn ms(self) -> Milliseconds;
}

impl U32Ext for u32 {
    fn s(self) -> Seconds { Seconds(self) }

    fn ms(self) -> Milliseconds { Milliseconds(self) }
}

impl From<Seconds> for Milliseconds {
    fn from(seconds: Seconds) -> Milliseconds { Milliseconds(seconds.0 * 1_000) }
}

impl Adds for Milliseconds {
    type Output = Milliseconds;
    fn add(self, rhs: Self) -> Self::Output { Milliseconds(self.0.saturating_add(rhs.0)) }
}

impl core::ops::Mul<u32> for Milliseconds {
    type Output = Milliseconds;
    fn mul(self, rhs: u32) -> Self::Output { Milliseconds(self.0.saturating_mul(rhs)) }
}

/// Busy-waits until `period` has elapsed, calling `idle` on every poll.
pub fn spin<C: Now, F: FnMut()>(clock: &C, period: Milliseconds, mut idle: F) {
    let start = clock.now();
    while clock.now() - start < period {
        idle();
    }
}
