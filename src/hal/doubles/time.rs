use crate::hal::time::{self, Milliseconds};
use std::{cell::Cell, rc::Rc};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MockInstant(pub u32);

/// Millisecond clock under test control.
///
/// Clones share the same time. With a non-zero step, every
/// reading advances the clock so that busy-waits terminate.
#[derive(Clone, Debug, Default)]
pub struct MockClock {
    now: Rc<Cell<u32>>,
    step: u32,
}

impl MockClock {
    pub fn new() -> Self { Self::default() }

    pub fn with_step(step: u32) -> Self { Self { now: Rc::new(Cell::new(0)), step } }

    pub fn advance(&self, period: Milliseconds) { self.now.set(self.now.get().wrapping_add(period.0)); }

    pub fn set_step(&mut self, step: u32) { self.step = step; }

    pub fn elapsed(&self) -> Milliseconds { Milliseconds(self.now.get()) }
}

impl time::Instant for MockInstant {}

impl time::Now for MockClock {
    type I = MockInstant;
    fn now(&self) -> MockInstant {
        let current = self.now.get();
        self.now.set(current.wrapping_add(self.step));
        MockInstant(current)
    }
}

impl core::ops::Sub for MockInstant {
    type Output = Milliseconds;
    fn sub(self, rhs: Self) -> Self::Output { Milliseconds(self.0.wrapping_sub(rhs.0)) }
}

impl core::ops::Add<Milliseconds> for MockInstant {
    type Output = Self;
    fn add(self, rhs: Milliseconds) -> Self { MockInstant(self.0.wrapping_add(rhs.0)) }
}
