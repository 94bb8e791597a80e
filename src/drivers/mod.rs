//! Driver implementations for all supported platforms. Register access
//! is confined to these modules; everything above them goes through the
//! traits in `hal`.

#[cfg(feature = "rp2040")]
pub mod rp2040 {
    pub mod rom;
    pub mod serial;
    pub mod system;
    pub mod timer;
    pub mod watchdog;

    use core::ptr;

    /// # Safety
    ///
    /// `address` must be a readable, word aligned peripheral register.
    #[inline(always)]
    pub(crate) unsafe fn read_register(address: usize) -> u32 { ptr::read_volatile(address as *const u32) }

    /// # Safety
    ///
    /// `address` must be a writable, word aligned peripheral register
    /// owned by the caller.
    #[inline(always)]
    pub(crate) unsafe fn write_register(address: usize, value: u32) {
        ptr::write_volatile(address as *mut u32, value)
    }
}
