//! In-place block compression through an external codec.
use crate::{
    Result,
    error::{bounds_error, compression_error},
    region::{PAGE_SIZE, Region, WORD_SIZE},
};
use alloc::{format, vec::Vec};

/// A trait for the codec that shrinks blocks before they are relocated.
///
/// Implementations must be deterministic and pair with the decompressor the
/// patched firmware runs on the device.
pub trait Codec {
    /// Compresses `input`. Fails with
    /// [`Error::Compression`](crate::Error::Compression) for input it cannot
    /// represent.
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>>;
}

impl<C: Codec + ?Sized> Codec for &C {
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        (**self).compress(input)
    }
}

impl Codec for () {
    fn compress(&self, _input: &[u8]) -> Result<Vec<u8>> {
        Err(compression_error("no codec configured"))
    }
}

/// Compresses `size` bytes at `address` in place and returns the compressed
/// length.
///
/// The compressed bytes start at `address`; the rest of the original span is
/// zeroed. Round the returned length with [`round_up_word`] before treating
/// it as consumed space.
pub fn compress_block<C>(region: &mut Region, address: usize, size: usize, codec: &C) -> Result<usize>
where
    C: Codec + ?Sized,
{
    if size == 0 {
        return Err(compression_error(format!(
            "empty block at {} 0x{address:x}",
            region.kind()
        )));
    }
    let packed = codec.compress(region.read(address, size)?)?;
    if packed.is_empty() || packed.len() > size {
        return Err(compression_error(format!(
            "block at {} 0x{address:x} compressed from {size} to {} bytes",
            region.kind(),
            packed.len()
        )));
    }
    region.write(address, &packed)?;
    region.fill(address + packed.len(), 0, size - packed.len())?;
    #[cfg(feature = "log")]
    log::debug!(
        "[Compress] {} 0x{:x}: {} -> {} bytes",
        region.kind(),
        address,
        size,
        packed.len()
    );
    Ok(packed.len())
}

#[inline]
pub const fn round_down_word(value: usize) -> usize {
    value / WORD_SIZE * WORD_SIZE
}

#[inline]
pub const fn round_up_word(value: usize) -> usize {
    value.div_ceil(WORD_SIZE) * WORD_SIZE
}

/// Rounds toward negative infinity to a page multiple.
#[inline]
pub const fn round_down_page(value: i64) -> i64 {
    value.div_euclid(PAGE_SIZE as i64) * PAGE_SIZE as i64
}

/// Rounds toward positive infinity to a page multiple. For a negative running
/// offset this rounds toward zero, so reclaimed space is never overstated.
///
/// Returns `None` when the rounded value does not fit in an `i64`.
#[inline]
pub const fn round_up_page(value: i64) -> Option<i64> {
    let page = PAGE_SIZE as i64;
    let rem = value.rem_euclid(page);
    if rem == 0 {
        Some(value)
    } else {
        (value - rem).checked_add(page)
    }
}

/// Checks that a compressed block fits back into its slot. Used by callers
/// that move the compressed bytes elsewhere and need the padded length.
pub fn padded_len(compressed: usize, limit: usize) -> Result<usize> {
    let padded = round_up_word(compressed);
    if padded > limit {
        return Err(bounds_error(format!(
            "padded block of {padded} bytes exceeds {limit}"
        )));
    }
    Ok(padded)
}

#[cfg(feature = "deflate")]
mod deflate {
    use super::Codec;
    use crate::{Result, error::compression_error};
    use alloc::{format, vec::Vec};
    use flate2::{Compression, write::DeflateEncoder};
    use std::io::Write;

    /// Raw DEFLATE (no zlib header), matching an `inflate`-style decompressor
    /// on the device.
    #[derive(Clone, Copy, Debug)]
    pub struct DeflateCodec {
        level: u32,
    }

    impl Default for DeflateCodec {
        fn default() -> Self {
            Self { level: 9 }
        }
    }

    impl DeflateCodec {
        pub fn new(level: u32) -> Self {
            Self {
                level: level.min(9),
            }
        }

        /// Decompresses raw DEFLATE data. Handy for verifying a patched image.
        pub fn inflate(&self, input: &[u8]) -> Result<Vec<u8>> {
            let mut decoder = flate2::write::DeflateDecoder::new(Vec::new());
            decoder
                .write_all(input)
                .and_then(|_| decoder.finish())
                .map_err(|e| compression_error(format!("inflate failed: {e}")))
        }
    }

    impl Codec for DeflateCodec {
        fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(self.level));
            encoder
                .write_all(input)
                .and_then(|_| encoder.finish())
                .map_err(|e| compression_error(format!("deflate failed: {e}")))
        }
    }

}

#[cfg(feature = "deflate")]
pub use deflate::DeflateCodec;
