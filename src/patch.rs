//! Primitive edits on a single region.
//!
//! None of these update pointers to the edited bytes. Pair every move or
//! delete with the matching [`add`](Region::add) calls or pointer scans.
use crate::{
    Result,
    compress::round_up_page,
    error::{bounds_error, range_error},
    region::Region,
};
use alloc::format;

impl Region {
    /// Overwrites `bytes.len()` bytes at `address`.
    #[inline]
    pub fn replace(&mut self, address: usize, bytes: &[u8]) -> Result<()> {
        self.write(address, bytes)
    }

    /// Overwrites a `size`-byte little-endian field with `value`.
    #[inline]
    pub fn replace_uint(&mut self, address: usize, value: u64, size: usize) -> Result<()> {
        self.write_uint(address, value, size)
    }

    /// Copies `size` bytes at `address` to `address + delta` and returns the
    /// destination offset.
    ///
    /// Overlapping spans are handled. A destination past the current end grows
    /// the region once it has passed [`Region::bounds_check`]. The bytes left
    /// behind at the source are not touched.
    pub fn move_block(&mut self, address: usize, delta: i64, size: usize) -> Result<usize> {
        self.read(address, size)?;
        if delta == 0 {
            return Ok(address);
        }
        let dest = (address as i64)
            .checked_add(delta)
            .and_then(|dest| usize::try_from(dest).ok())
            .ok_or_else(|| {
                bounds_error(format!(
                    "{} move of 0x{address:x} by {delta} lands outside the region",
                    self.kind()
                ))
            })?;
        let end = dest
            .checked_add(size)
            .ok_or_else(|| bounds_error("move destination overflows"))?;
        self.bounds_check(dest, size)?;
        self.grow_to(end)?;
        self.bytes_mut().copy_within(address..address + size, dest);
        #[cfg(feature = "log")]
        log::trace!(
            "[Move] {} 0x{:x} -> 0x{:x} ({} bytes)",
            self.kind(),
            address,
            dest,
            size
        );
        Ok(dest)
    }

    /// Adds `delta` to the `size`-byte little-endian field at `address` and
    /// returns the new value.
    pub fn add(&mut self, address: usize, delta: i64, size: usize) -> Result<u64> {
        let value = self.read_uint(address, size)?;
        let limit = 1i128 << (size * 8);
        let new_value = value as i128 + delta as i128;
        if new_value < 0 || new_value >= limit {
            return Err(range_error(format!(
                "{} 0x{address:x}: 0x{value:x} {delta:+} does not fit in {size} bytes",
                self.kind()
            )));
        }
        self.write_uint(address, new_value as u64, size)?;
        #[cfg(feature = "log")]
        log::trace!(
            "[Add] {} 0x{:x}: 0x{:x} -> 0x{:x}",
            self.kind(),
            address,
            value,
            new_value
        );
        Ok(new_value as u64)
    }
}

/// Copies `size` bytes from one region to another.
///
/// The destination must pass [`Region::bounds_check`]; it grows when the
/// block lands past its current end. The source is left as is.
pub fn move_to_region(
    src: &Region,
    src_address: usize,
    dst: &mut Region,
    dst_address: usize,
    size: usize,
) -> Result<()> {
    let block = src.read(src_address, size)?;
    dst.bounds_check(dst_address, size)?;
    dst.grow_to(dst_address + size)?;
    dst.write(dst_address, block)?;
    #[cfg(feature = "log")]
    log::trace!(
        "[Relocate] {} 0x{:x} -> {} 0x{:x} ({} bytes)",
        src.kind(),
        src_address,
        dst.kind(),
        dst_address,
        size
    );
    Ok(())
}

/// Truncates `region` by the reclaimed space of a negative running offset.
///
/// The offset is first rounded toward zero to a whole page, so live data in a
/// partially freed page survives. Returns the number of bytes removed. The
/// region is sealed afterwards.
pub fn shorten(region: &mut Region, total_delta: i64) -> Result<usize> {
    if total_delta > 0 {
        return Err(range_error(format!(
            "cannot shorten {} region by a positive offset {total_delta}",
            region.kind()
        )));
    }
    let removed = round_up_page(total_delta)
        .and_then(|rounded| usize::try_from(rounded.unsigned_abs()).ok())
        .ok_or_else(|| range_error(format!("offset {total_delta} cannot be rounded to a page")))?;
    region.truncate_end(removed)?;
    region.seal();
    #[cfg(feature = "log")]
    log::debug!(
        "[Shorten] {} region: -{} bytes, 0x{:x} remain",
        region.kind(),
        removed,
        region.len()
    );
    Ok(removed)
}
