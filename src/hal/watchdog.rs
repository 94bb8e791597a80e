/// Hardware watchdog
pub trait Watchdog {
    /// Reloads the countdown. Must not depend on code in flash.
    fn feed(&mut self);

    /// Forces an immediate watchdog reset.
    fn trigger(&mut self) -> !;
}
