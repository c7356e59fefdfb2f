//! Address-space layout of the two flash banks.
use crate::region::Capacity;

/// Base addresses and capacity tiers of a device's flash banks.
///
/// The defaults describe a microcontroller with 128 KiB of internal flash
/// (256 KiB on the larger part) mapped at `0x0800_0000`, and 1 MiB of
/// memory-mapped external flash at `0x9000_0000`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLayout {
    pub internal_base: u32,
    pub internal_capacity: Capacity,
    pub external_base: u32,
    pub external_capacity: Capacity,
}

impl DeviceLayout {
    pub const INTERNAL_BASE: u32 = 0x0800_0000;
    pub const INTERNAL_SIZE: usize = 0x2_0000;
    pub const INTERNAL_EXTENDED_SIZE: usize = 0x4_0000;
    pub const EXTERNAL_BASE: u32 = 0x9000_0000;
    pub const EXTERNAL_SIZE: usize = 0x10_0000;

    pub const fn new(
        internal_base: u32,
        internal_capacity: Capacity,
        external_base: u32,
        external_capacity: Capacity,
    ) -> Self {
        Self {
            internal_base,
            internal_capacity,
            external_base,
            external_capacity,
        }
    }
}

impl Default for DeviceLayout {
    fn default() -> Self {
        Self::new(
            Self::INTERNAL_BASE,
            Capacity::new(Self::INTERNAL_SIZE).with_extended(Self::INTERNAL_EXTENDED_SIZE),
            Self::EXTERNAL_BASE,
            Capacity::new(Self::EXTERNAL_SIZE),
        )
    }
}
