//! 64-bit microsecond timer.
use super::read_register;
use crate::hal::time::{self, Milliseconds};

const TIMER_BASE: usize = 0x4005_4000;
const TIMERAWH: usize = TIMER_BASE + 0x24;
const TIMERAWL: usize = TIMER_BASE + 0x28;

/// Opaque wrapper around the microsecond count at a point in time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Instant {
    micros: u64,
}

/// Instant subtraction to obtain a time period
impl core::ops::Sub for Instant {
    type Output = Milliseconds;

    fn sub(self, rhs: Self) -> Self::Output {
        let millis = self.micros.wrapping_sub(rhs.micros) / 1000;
        Milliseconds(millis.min(u32::MAX as u64) as u32)
    }
}

impl core::ops::Add<Milliseconds> for Instant {
    type Output = Self;

    fn add(self, rhs: Milliseconds) -> Self { Self { micros: self.micros.wrapping_add(rhs.0 as u64 * 1000) } }
}

impl time::Instant for Instant {}

/// Reads the free running timer. Uses the raw registers, so reading
/// has no side effects on the latched pair used by the SDK.
#[derive(Copy, Clone, Debug, Default)]
pub struct Timer;

impl Timer {
    pub const fn new() -> Self { Timer }
}

impl time::Now for Timer {
    type I = Instant;

    fn now(&self) -> Instant {
        // NOTE(Safety) Read only registers. The high word is read twice
        // so that a carry between the two reads is never missed.
        let micros = unsafe {
            loop {
                let high = read_register(TIMERAWH);
                let low = read_register(TIMERAWL);
                if read_register(TIMERAWH) == high {
                    break (high as u64) << 32 | low as u64;
                }
            }
        };
        Instant { micros }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn instant_differences_and_additions() {
        // Given
        let early = Instant { micros: 1_500 };
        let late = Instant { micros: 2_750_000 };

        // Then
        assert_eq!(Milliseconds(2748), late - early);

        // Given
        let later = late + Milliseconds(300);

        // Then
        assert_eq!(Milliseconds(3048), later - early);
    }
}
