//! Pointer fixups by address-range scanning.
//!
//! Flat firmware images carry no relocation table. A word is treated as a
//! pointer purely because its value falls inside the address range of a block
//! that moved. Any other data that happens to look like such an address is
//! rewritten as well; mark known non-pointer spans with
//! [`Region::exclude_from_scans`] to protect them, and use [`scan`] to review
//! the matches of a pass before applying it.
use crate::{
    Result,
    error::{bounds_error, range_error},
    region::{Region, WORD_SIZE},
};
use alloc::{format, vec::Vec};
use core::ops::Range;

/// The span of a region a pointer scan walks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Window {
    /// The region's configured pointer window.
    Pointers,
    /// An explicit `[start, end)` offset span.
    Span(Range<usize>),
}

impl Window {
    pub(crate) fn resolve(&self, region: &Region) -> Result<Range<usize>> {
        let span = match self {
            Window::Pointers => region.pointer_window().ok_or_else(|| {
                bounds_error(format!("{} region has no pointer window", region.kind()))
            })?,
            Window::Span(span) => span.clone(),
        };
        if span.start > span.end || span.end > region.len() {
            return Err(bounds_error(format!(
                "scan window 0x{:x}..0x{:x} outside {} region of 0x{:x} bytes",
                span.start,
                span.end,
                region.kind(),
                region.len()
            )));
        }
        Ok(span)
    }
}

impl From<Range<usize>> for Window {
    fn from(span: Range<usize>) -> Self {
        Window::Span(span)
    }
}

/// A pointer-shaped word found by a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerMatch {
    /// Offset of the word inside the scanned region.
    pub offset: usize,
    /// The value the word held when it was found.
    pub value: u32,
}

/// Offsets of the word-aligned slots inside `span`, alignment taken on the
/// absolute address.
fn aligned_words(region: &Region, span: Range<usize>) -> impl Iterator<Item = usize> {
    let misalign = region.absolute(span.start) as usize % WORD_SIZE;
    let first = span.start + (WORD_SIZE - misalign) % WORD_SIZE;
    let end = span.end;
    (first..end)
        .step_by(WORD_SIZE)
        .take_while(move |offset| offset + WORD_SIZE <= end)
}

/// Reports every aligned word in `window` whose value lies in `values`
/// without modifying the region.
pub fn scan(region: &Region, window: &Window, values: Range<u32>) -> Result<Vec<PointerMatch>> {
    let span = window.resolve(region)?;
    let bytes = region.as_bytes();
    let mut matches = Vec::new();
    for offset in aligned_words(region, span) {
        if region.is_excluded(offset, WORD_SIZE) {
            continue;
        }
        let value = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]);
        if values.contains(&value) {
            matches.push(PointerMatch { offset, value });
        }
    }
    Ok(matches)
}

/// Adds `delta` to every aligned word in `window` whose value lies in
/// `values`, in one left-to-right pass. Returns the number of words changed.
///
/// Either every match is rewritten or, if one adjusted value would leave the
/// 32-bit address space, none is.
pub fn scan_and_adjust(
    region: &mut Region,
    window: &Window,
    values: Range<u32>,
    delta: i64,
) -> Result<usize> {
    let matches = scan(region, window, values)?;
    let mut updates = Vec::with_capacity(matches.len());
    for m in &matches {
        let adjusted = (m.value as i64).checked_add(delta);
        let new_value = adjusted.and_then(|v| u32::try_from(v).ok()).ok_or_else(|| {
            range_error(format!(
                "pointer 0x{:08x} at {} 0x{:x} adjusted by {delta} leaves the address space",
                m.value,
                region.kind(),
                m.offset
            ))
        })?;
        updates.push((m.offset, new_value));
    }
    let bytes = region.bytes_mut();
    for &(offset, new_value) in &updates {
        bytes[offset..offset + WORD_SIZE].copy_from_slice(&new_value.to_le_bytes());
    }
    #[cfg(feature = "log")]
    for (m, (_, new_value)) in matches.iter().zip(updates.iter()) {
        log::trace!(
            "[Fixup] {} 0x{:x}: 0x{:08x} -> 0x{:08x}",
            region.kind(),
            m.offset,
            m.value,
            new_value
        );
    }
    Ok(updates.len())
}

/// Zeroes every aligned word in `window` whose value lies in `values`.
/// Used when the referenced block was deleted rather than moved.
pub fn scan_and_zero(region: &mut Region, window: &Window, values: Range<u32>) -> Result<usize> {
    let matches = scan(region, window, values)?;
    let bytes = region.bytes_mut();
    for m in &matches {
        bytes[m.offset..m.offset + WORD_SIZE].fill(0);
    }
    #[cfg(feature = "log")]
    log::trace!(
        "[Erase] {} region: {} references cleared",
        region.kind(),
        matches.len()
    );
    Ok(matches.len())
}
