use crate::hal::{system::System, watchdog::Watchdog};

#[derive(Debug, Default)]
pub struct FakeWatchdog {
    pub feeds: usize,
}

impl Watchdog for FakeWatchdog {
    fn feed(&mut self) { self.feeds += 1; }

    fn trigger(&mut self) -> ! { panic!("watchdog reset") }
}

#[derive(Debug, Default)]
pub struct FakeSystem {
    pub interrupts_disabled: bool,
}

impl System for FakeSystem {
    fn disable_interrupts(&mut self) { self.interrupts_disabled = true; }

    fn reset(&mut self) -> ! { panic!("system reset") }
}
