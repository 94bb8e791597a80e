//! Memory size helpers.
#![macro_use]

#[macro_export]
macro_rules! kb {
    ($val:expr) => {
        $val * 1024
    };
}

#[macro_export]
macro_rules! mb {
    ($val:expr) => {
        $val * 1024 * 1024
    };
}

/// Rounds `value` up to the next multiple of `alignment`.
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) / alignment * alignment
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sizes_and_alignment() {
        assert_eq!(1_572_864, kb!(1536));
        assert_eq!(2_097_152, mb!(2));
        assert_eq!(4096, align_up(1, 4096));
        assert_eq!(8192, align_up(4097, 4096));
        assert_eq!(256, align_up(256, 256));
    }
}
