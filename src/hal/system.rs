/// Core-level control that the reprogrammer needs while the
/// boot region is being rewritten.
pub trait System {
    /// Masks interrupts. They stay masked until the next reset.
    fn disable_interrupts(&mut self);

    /// Resets the processor through its reset control register.
    fn reset(&mut self) -> !;
}
