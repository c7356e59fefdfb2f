//! The flash banks of a firmware image
use crate::{
    Result,
    error::{bounds_error, capacity_error, range_error},
};
use alloc::{format, vec::Vec};
use bitflags::bitflags;
use core::{fmt::Display, ops::Range};

pub const PAGE_SIZE: usize = 0x1000;
pub const WORD_SIZE: usize = 4;
/// Value of an erased flash cell. Used when a region is grown explicitly.
pub const ERASED_BYTE: u8 = 0xFF;

/// Which of the two flash banks a [`Region`] models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Internal,
    External,
}

impl Display for RegionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegionKind::Internal => f.write_str("internal"),
            RegionKind::External => f.write_str("external"),
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// State flags of a flash region.
    pub struct RegionFlags: u8 {
        /// The extended capacity tier is active.
        const EXTENDED = 1;
        /// The region has been shortened and must not be edited further.
        const SEALED = 1 << 1;
    }
}

/// Size limits of a flash bank.
///
/// A bank always has a base ceiling. Some devices can be fitted with a larger
/// part, which unlocks the extended ceiling when
/// [`RegionFlags::EXTENDED`] is set on the region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capacity {
    base: usize,
    extended: Option<usize>,
}

impl Capacity {
    /// A capacity with a single tier of `base` bytes.
    #[inline]
    pub const fn new(base: usize) -> Self {
        Self {
            base,
            extended: None,
        }
    }

    /// Adds an extended tier. Tiers smaller than the base are ignored.
    #[inline]
    pub const fn with_extended(mut self, extended: usize) -> Self {
        if extended > self.base {
            self.extended = Some(extended);
        }
        self
    }

    /// Size of the base tier.
    #[inline]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Size of the extended tier, if the device has one.
    #[inline]
    pub const fn extended(&self) -> Option<usize> {
        self.extended
    }

    /// The ceiling that applies for the given tier selection.
    #[inline]
    pub const fn ceiling(&self, extended: bool) -> usize {
        match (extended, self.extended) {
            (true, Some(size)) => size,
            _ => self.base,
        }
    }
}

/// One independently addressed flash bank held as a mutable byte buffer.
///
/// All `address` arguments are offsets from the start of the bank. Use
/// [`Region::absolute`] to obtain the address the firmware sees.
#[derive(Clone, Debug)]
pub struct Region {
    kind: RegionKind,
    base_address: u32,
    capacity: Capacity,
    flags: RegionFlags,
    bytes: Vec<u8>,
    pointer_window: Option<Range<usize>>,
    exclusions: Vec<Range<usize>>,
}

impl Region {
    /// Creates a region from its raw image.
    ///
    /// Fails with [`Error::CapacityExceeded`](crate::Error::CapacityExceeded)
    /// if the image is larger than the ceiling selected by `flags`.
    pub fn new(
        kind: RegionKind,
        base_address: u32,
        capacity: Capacity,
        flags: RegionFlags,
        bytes: Vec<u8>,
    ) -> Result<Self> {
        let ceiling = capacity.ceiling(flags.contains(RegionFlags::EXTENDED));
        if bytes.len() > ceiling {
            return Err(capacity_error(format!(
                "{kind} image of {} bytes exceeds capacity 0x{ceiling:x}",
                bytes.len()
            )));
        }
        let ceiling_end = base_address as u64 + ceiling as u64;
        if ceiling_end > u32::MAX as u64 + 1 {
            return Err(range_error(format!(
                "{kind} region at 0x{base_address:08x} overflows the address space"
            )));
        }
        Ok(Self {
            kind,
            base_address,
            capacity,
            flags,
            bytes,
            pointer_window: None,
            exclusions: Vec::new(),
        })
    }

    /// Which bank this region models.
    #[inline]
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Absolute address of offset 0.
    #[inline]
    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    #[inline]
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    #[inline]
    pub fn flags(&self) -> RegionFlags {
        self.flags
    }

    #[inline]
    pub fn is_extended(&self) -> bool {
        self.flags.contains(RegionFlags::EXTENDED)
    }

    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.flags.contains(RegionFlags::SEALED)
    }

    #[inline]
    pub(crate) fn seal(&mut self) {
        self.flags.insert(RegionFlags::SEALED);
    }

    /// Ceiling of the active capacity tier.
    #[inline]
    pub fn ceiling(&self) -> usize {
        self.capacity.ceiling(self.is_extended())
    }

    /// Selects the capacity tier.
    ///
    /// Dropping back to the base tier fails when the current contents no
    /// longer fit in it.
    pub fn set_extended(&mut self, extended: bool) -> Result<()> {
        let ceiling = self.capacity.ceiling(extended);
        if self.bytes.len() > ceiling {
            return Err(capacity_error(format!(
                "{} region holds {} bytes, tier ceiling is 0x{ceiling:x}",
                self.kind,
                self.bytes.len()
            )));
        }
        self.flags.set(RegionFlags::EXTENDED, extended);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the region and returns the final image.
    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Absolute address of an offset inside this region.
    #[inline]
    pub fn absolute(&self, offset: usize) -> u32 {
        self.base_address.wrapping_add(offset as u32)
    }

    /// Offset of an absolute address, if it lies under the active ceiling.
    pub fn offset_of(&self, address: u32) -> Option<usize> {
        let offset = address.checked_sub(self.base_address)? as usize;
        (offset < self.ceiling()).then_some(offset)
    }

    /// Absolute address range `[start, start + len)` of a block in this region.
    ///
    /// The block must lie under the active ceiling, so the range never wraps
    /// into another bank.
    pub fn absolute_range(&self, offset: usize, len: usize) -> Result<Range<u32>> {
        self.bounds_check(offset, len)?;
        let start = u32::try_from(offset)
            .ok()
            .and_then(|offset| self.base_address.checked_add(offset));
        let end = start.zip(u32::try_from(len).ok()).and_then(|(s, l)| s.checked_add(l));
        match (start, end) {
            (Some(start), Some(end)) => Ok(start..end),
            _ => Err(range_error(format!(
                "{} block 0x{offset:x} + {len} leaves the address space",
                self.kind
            ))),
        }
    }

    fn span(&self, address: usize, size: usize) -> Result<Range<usize>> {
        match address.checked_add(size) {
            Some(end) if end <= self.bytes.len() => Ok(address..end),
            _ => Err(bounds_error(format!(
                "{} access at 0x{address:x} of {size} bytes exceeds length 0x{:x}",
                self.kind,
                self.bytes.len()
            ))),
        }
    }

    /// Checks that `[address, address + size)` lies under the active
    /// capacity ceiling. Equality with the ceiling is accepted.
    pub fn bounds_check(&self, address: usize, size: usize) -> Result<()> {
        let ceiling = self.ceiling();
        match address.checked_add(size) {
            Some(end) if end <= ceiling => Ok(()),
            _ => Err(capacity_error(format!(
                "{} position 0x{address:x} + {size} exceeds {} capacity 0x{ceiling:x}",
                self.kind,
                if self.is_extended() { "extended" } else { "base" },
            ))),
        }
    }

    /// Borrows `size` bytes at `address`.
    ///
    /// Fails with [`Error::OutOfBounds`](crate::Error::OutOfBounds) when the span
    /// runs past the current length.
    pub fn read(&self, address: usize, size: usize) -> Result<&[u8]> {
        let span = self.span(address, size)?;
        Ok(&self.bytes[span])
    }

    /// Overwrites bytes in place. Never grows the region.
    pub fn write(&mut self, address: usize, bytes: &[u8]) -> Result<()> {
        let span = self.span(address, bytes.len())?;
        self.bytes[span].copy_from_slice(bytes);
        Ok(())
    }

    /// Sets `len` bytes starting at `address` to `byte`.
    pub fn fill(&mut self, address: usize, byte: u8, len: usize) -> Result<()> {
        let span = self.span(address, len)?;
        self.bytes[span].fill(byte);
        Ok(())
    }

    /// Reads a little-endian unsigned integer of `size` bytes (1 to 8).
    pub fn read_uint(&self, address: usize, size: usize) -> Result<u64> {
        check_width(size)?;
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(self.read(address, size)?);
        Ok(u64::from_le_bytes(buf))
    }

    #[inline]
    pub fn read_u32(&self, address: usize) -> Result<u32> {
        self.read_uint(address, WORD_SIZE).map(|v| v as u32)
    }

    /// Writes `value` as a little-endian unsigned integer of `size` bytes.
    pub fn write_uint(&mut self, address: usize, value: u64, size: usize) -> Result<()> {
        check_width(size)?;
        if size < 8 && value >> (size * 8) != 0 {
            return Err(range_error(format!(
                "value 0x{value:x} does not fit in {size} bytes"
            )));
        }
        self.write(address, &value.to_le_bytes()[..size])
    }

    /// Grows the region with erased bytes so that it is at least `end` long.
    ///
    /// This is the only way a region grows. It is used by block moves that
    /// land past the current end.
    pub fn grow_to(&mut self, end: usize) -> Result<()> {
        if end <= self.bytes.len() {
            return Ok(());
        }
        self.bounds_check(0, end)?;
        #[cfg(feature = "log")]
        log::trace!(
            "[Grow] {} region: 0x{:x} -> 0x{:x}",
            self.kind,
            self.bytes.len(),
            end
        );
        self.bytes.resize(end, ERASED_BYTE);
        Ok(())
    }

    /// Appends bytes at the end and returns their offset.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize> {
        let offset = self.bytes.len();
        self.bounds_check(offset, bytes.len())?;
        self.bytes.extend_from_slice(bytes);
        Ok(offset)
    }

    /// Drops `byte_count` bytes from the logical end of the region.
    pub fn truncate_end(&mut self, byte_count: usize) -> Result<()> {
        let len = self.bytes.len();
        if byte_count > len {
            return Err(bounds_error(format!(
                "cannot truncate {byte_count} bytes from {} region of {len} bytes",
                self.kind
            )));
        }
        #[cfg(feature = "log")]
        log::trace!(
            "[Truncate] {} region: 0x{:x} -> 0x{:x}",
            self.kind,
            len,
            len - byte_count
        );
        self.bytes.truncate(len - byte_count);
        if let Some(window) = &mut self.pointer_window {
            window.end = window.end.min(len - byte_count);
            window.start = window.start.min(window.end);
        }
        Ok(())
    }

    /// Window holding the pointer-bearing data (for example the initializer
    /// of the read/write data segment) that fixup scans walk by default.
    #[inline]
    pub fn pointer_window(&self) -> Option<Range<usize>> {
        self.pointer_window.clone()
    }

    /// Sets the span walked by [`Window::Pointers`](crate::Window::Pointers)
    /// scans. It must lie under the active ceiling.
    pub fn set_pointer_window(&mut self, window: Range<usize>) -> Result<()> {
        if window.start > window.end {
            return Err(range_error(format!(
                "inverted pointer window 0x{:x}..0x{:x}",
                window.start, window.end
            )));
        }
        self.span(window.start, window.end - window.start)?;
        self.pointer_window = Some(window);
        Ok(())
    }

    /// Marks a span as opaque data (audio, image tiles, ...). Pointer scans
    /// skip every word that overlaps an excluded span.
    pub fn exclude_from_scans(&mut self, span: Range<usize>) {
        if span.start < span.end {
            self.exclusions.push(span);
        }
    }

    #[inline]
    pub fn exclusions(&self) -> &[Range<usize>] {
        &self.exclusions
    }

    #[inline]
    pub(crate) fn is_excluded(&self, offset: usize, len: usize) -> bool {
        let end = offset + len;
        self.exclusions
            .iter()
            .any(|span| offset < span.end && span.start < end)
    }

    #[inline]
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[inline]
fn check_width(size: usize) -> Result<()> {
    if (1..=8).contains(&size) {
        Ok(())
    } else {
        Err(range_error(format!("unsupported field width {size}")))
    }
}
