//! Core control through `cortex-m`.
use crate::hal::system::System;

const AIRCR: usize = 0xE000_ED0C;
const AIRCR_VECTKEY: u32 = 0x05FA << 16;
const AIRCR_SYSRESETREQ: u32 = 1 << 2;

#[derive(Debug, Default)]
pub struct CortexSystem;

impl System for CortexSystem {
    #[inline(always)]
    fn disable_interrupts(&mut self) { cortex_m::interrupt::disable(); }

    /// Same request as `SCB::sys_reset`, spelled out so that it is
    /// inlined into RAM resident callers.
    #[inline(always)]
    fn reset(&mut self) -> ! {
        cortex_m::asm::dsb();
        // NOTE(Safety) Single word write to the reset control register.
        unsafe { super::write_register(AIRCR, AIRCR_VECTKEY | AIRCR_SYSRESETREQ) };
        cortex_m::asm::dsb();
        loop {
            cortex_m::asm::nop();
        }
    }
}
