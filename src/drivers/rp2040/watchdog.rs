//! Hardware watchdog.
use super::{read_register, write_register};
use crate::hal::{time::Milliseconds, watchdog::Watchdog};

const WATCHDOG_BASE: usize = 0x4005_8000;
const CTRL: usize = WATCHDOG_BASE + 0x00;
const LOAD: usize = WATCHDOG_BASE + 0x04;

const CTRL_ENABLE: u32 = 1 << 30;
const CTRL_TRIGGER: u32 = 1 << 31;

/// Largest value the 24-bit counter accepts.
const MAX_LOAD: u32 = 0x00FF_FFFF;

/// The counter decrements twice per microsecond tick.
pub fn load_value(timeout: Milliseconds) -> u32 {
    timeout.0.saturating_mul(2_000).min(MAX_LOAD)
}

pub struct HardwareWatchdog {
    load: u32,
}

impl HardwareWatchdog {
    /// # Safety
    ///
    /// The watchdog tick generator must be running at 1MHz, and the
    /// caller hands over exclusive ownership of the watchdog.
    pub unsafe fn start(timeout: Milliseconds) -> Self {
        let load = load_value(timeout);
        write_register(LOAD, load);
        write_register(CTRL, read_register(CTRL) | CTRL_ENABLE);
        Self { load }
    }
}

impl Watchdog for HardwareWatchdog {
    #[inline(always)]
    fn feed(&mut self) {
        // NOTE(Safety) Owned register, single word write.
        unsafe { write_register(LOAD, self.load) }
    }

    #[inline(always)]
    fn trigger(&mut self) -> ! {
        // NOTE(Safety) Owned register. The chip resets shortly after.
        unsafe { write_register(CTRL, read_register(CTRL) | CTRL_TRIGGER) };
        loop {
            core::hint::spin_loop();
        }
    }
}
