//! The patch session
//!
//! A [`Session`] owns both flash regions together with the running offset,
//! the internal write cursor and the external services. Every mutating
//! operation of the crate is available on it, and all of them refuse to run
//! once the external region has been shortened.
use crate::{
    Result,
    compress::{Codec, compress_block, round_up_page, round_up_word},
    error::{encoding_error, order_error, range_error},
    inject::{self, Assembler, SymbolLookup, TemplateVars, expand_template},
    input::{ImageReader, IntoImageReader},
    layout::DeviceLayout,
    patch,
    plan::PatchValue,
    region::{Region, RegionFlags, RegionKind, WORD_SIZE},
    relocation::{self, PointerMatch, Window},
};
use alloc::{format, vec::Vec};
use core::ops::Range;
use delegate::delegate;

/// The final images of a finished session, ready to be flashed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareImages {
    pub internal: Vec<u8>,
    pub external: Vec<u8>,
}

/// Configures and creates a [`Session`].
///
/// # Examples
/// ```rust
/// use flash_patcher::{Session, SymbolMap};
///
/// let symbols: SymbolMap = [("bootloader", 0x0801_d001)].into_iter().collect();
/// let session = Session::builder(vec![0; 0x1000], vec![0xff; 0x4000])
///     .cursor(0x800)
///     .pointer_window(0xc00..0x1000)
///     .symbols(symbols)
///     .build()
///     .unwrap();
/// assert_eq!(session.cursor(), 0x800);
/// ```
pub struct SessionBuilder<A = (), S = (), C = ()> {
    layout: DeviceLayout,
    internal: Vec<u8>,
    external: Vec<u8>,
    extended: bool,
    cursor: Option<usize>,
    pointer_window: Option<Range<usize>>,
    exclusions: Vec<(RegionKind, Range<usize>)>,
    assembler: A,
    symbols: S,
    codec: C,
}

impl SessionBuilder {
    fn new(internal: Vec<u8>, external: Vec<u8>) -> Self {
        Self {
            layout: DeviceLayout::default(),
            internal,
            external,
            extended: false,
            cursor: None,
            pointer_window: None,
            exclusions: Vec::new(),
            assembler: (),
            symbols: (),
            codec: (),
        }
    }

    /// Reads both images from any supported source.
    pub fn from_readers<'a, I, E>(internal: I, external: E) -> Result<Self>
    where
        I: IntoImageReader<'a>,
        E: IntoImageReader<'a>,
    {
        let mut internal = internal.into_reader()?;
        let mut external = external.into_reader()?;
        #[cfg(feature = "log")]
        log::debug!(
            "[Session] Loading images [{}] ({} bytes) and [{}] ({} bytes)",
            internal.shortname(),
            internal.len(),
            external.shortname(),
            external.len()
        );
        Ok(Self::new(internal.read_all()?, external.read_all()?))
    }
}

impl<A, S, C> SessionBuilder<A, S, C> {
    /// Uses the base addresses and capacity tiers of another device.
    pub fn layout(mut self, layout: DeviceLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Selects the extended internal capacity tier.
    pub fn extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    /// Sets the first free internal offset. Defaults to the end of the
    /// internal image, rounded up to a word.
    pub fn cursor(mut self, cursor: usize) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Sets the internal span holding pointers to external flash, usually the
    /// initializer of the read/write data segment.
    pub fn pointer_window(mut self, window: Range<usize>) -> Self {
        self.pointer_window = Some(window);
        self
    }

    /// Keeps pointer scans away from a span of opaque data.
    pub fn exclude(mut self, region: RegionKind, span: Range<usize>) -> Self {
        self.exclusions.push((region, span));
        self
    }

    /// Plugs in the assembler used by call and instruction patches.
    ///
    /// # Examples
    /// ```rust
    /// use flash_patcher::{Assembler, RegionKind, Result, Session};
    ///
    /// struct ThumbNop;
    ///
    /// impl Assembler for ThumbNop {
    ///     fn assemble(&self, _text: &str, _address: u32) -> Result<Vec<u8>> {
    ///         Ok(vec![0x00, 0xbf])
    ///     }
    /// }
    ///
    /// let mut session = Session::builder(vec![0xff; 0x100], vec![])
    ///     .assembler(ThumbNop)
    ///     .build()
    ///     .unwrap();
    /// session.patch_instruction(RegionKind::Internal, 0x10, "nop", Some(2)).unwrap();
    /// assert_eq!(session.internal().read(0x10, 2).unwrap(), &[0x00, 0xbf]);
    /// ```
    pub fn assembler<NewA: Assembler>(self, assembler: NewA) -> SessionBuilder<NewA, S, C> {
        SessionBuilder {
            layout: self.layout,
            internal: self.internal,
            external: self.external,
            extended: self.extended,
            cursor: self.cursor,
            pointer_window: self.pointer_window,
            exclusions: self.exclusions,
            assembler,
            symbols: self.symbols,
            codec: self.codec,
        }
    }

    /// Plugs in the symbol table used by call patches and
    /// [`PatchValue::Symbol`](crate::PatchValue::Symbol).
    pub fn symbols<NewS: SymbolLookup>(self, symbols: NewS) -> SessionBuilder<A, NewS, C> {
        SessionBuilder {
            layout: self.layout,
            internal: self.internal,
            external: self.external,
            extended: self.extended,
            cursor: self.cursor,
            pointer_window: self.pointer_window,
            exclusions: self.exclusions,
            assembler: self.assembler,
            symbols,
            codec: self.codec,
        }
    }

    /// Plugs in the compressor used by [`Session::compress_block`].
    pub fn codec<NewC: Codec>(self, codec: NewC) -> SessionBuilder<A, S, NewC> {
        SessionBuilder {
            layout: self.layout,
            internal: self.internal,
            external: self.external,
            extended: self.extended,
            cursor: self.cursor,
            pointer_window: self.pointer_window,
            exclusions: self.exclusions,
            assembler: self.assembler,
            symbols: self.symbols,
            codec,
        }
    }

    /// Validates the configuration and creates the session.
    pub fn build(self) -> Result<Session<A, S, C>> {
        let layout = self.layout;
        let flags = if self.extended {
            RegionFlags::EXTENDED
        } else {
            RegionFlags::empty()
        };
        let cursor = self
            .cursor
            .unwrap_or_else(|| round_up_word(self.internal.len()));
        let mut internal = Region::new(
            RegionKind::Internal,
            layout.internal_base,
            layout.internal_capacity,
            flags,
            self.internal,
        )?;
        let mut external = Region::new(
            RegionKind::External,
            layout.external_base,
            layout.external_capacity,
            RegionFlags::empty(),
            self.external,
        )?;
        internal.bounds_check(cursor, 0)?;
        if let Some(window) = self.pointer_window {
            internal.set_pointer_window(window)?;
        }
        for (kind, span) in self.exclusions {
            match kind {
                RegionKind::Internal => internal.exclude_from_scans(span),
                RegionKind::External => external.exclude_from_scans(span),
            }
        }
        #[cfg(feature = "log")]
        log::debug!(
            "[Session] internal 0x{:x} bytes (ceiling 0x{:x}), external 0x{:x} bytes, cursor 0x{:x}",
            internal.len(),
            internal.ceiling(),
            external.len(),
            cursor
        );
        Ok(Session {
            internal,
            external,
            offset: 0,
            cursor,
            last_compressed: None,
            assembler: self.assembler,
            symbols: self.symbols,
            codec: self.codec,
        })
    }
}

/// One patch session over an internal and an external flash image.
///
/// The running offset is the net shift of the external address space caused
/// by the space-reclaiming edits applied so far. It is only meaningful for
/// addresses past the last edited point; the session cannot tell whether a
/// caller applies it correctly.
pub struct Session<A = (), S = (), C = ()> {
    internal: Region,
    external: Region,
    offset: i64,
    cursor: usize,
    last_compressed: Option<usize>,
    assembler: A,
    symbols: S,
    codec: C,
}

impl Session {
    /// Starts configuring a session over two raw images using the default
    /// [`DeviceLayout`].
    pub fn builder(internal: Vec<u8>, external: Vec<u8>) -> SessionBuilder {
        SessionBuilder::new(internal, external)
    }
}

impl<A, S, C> Session<A, S, C>
where
    A: Assembler,
    S: SymbolLookup,
    C: Codec,
{
    delegate! {
        to self.internal {
            /// Ceiling of the active internal capacity tier.
            #[call(ceiling)]
            pub fn internal_ceiling(&self) -> usize;
            pub fn is_extended(&self) -> bool;
        }
        to self.external {
            /// Whether the external region has been shortened.
            pub fn is_sealed(&self) -> bool;
        }
    }

    #[inline]
    pub fn internal(&self) -> &Region {
        &self.internal
    }

    #[inline]
    pub fn external(&self) -> &Region {
        &self.external
    }

    #[inline]
    pub fn region(&self, kind: RegionKind) -> &Region {
        match kind {
            RegionKind::Internal => &self.internal,
            RegionKind::External => &self.external,
        }
    }

    /// The running offset.
    #[inline]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// The next free internal offset.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Absolute address of the cursor as the firmware sees it.
    #[inline]
    pub fn cursor_address(&self) -> u32 {
        self.internal.absolute(self.cursor)
    }

    /// Length returned by the most recent compression, if any.
    #[inline]
    pub fn last_compressed(&self) -> Option<usize> {
        self.last_compressed
    }

    /// Values available to instruction templates.
    pub fn template_vars(&self) -> TemplateVars {
        TemplateVars {
            offset: self.offset,
            cursor: self.cursor_address() as i64,
        }
    }

    fn guard(&self) -> Result<()> {
        if self.external.is_sealed() {
            return Err(order_error(
                "the external region was shortened; no further edits are allowed",
            ));
        }
        Ok(())
    }

    fn region_mut(&mut self, kind: RegionKind) -> Result<&mut Region> {
        self.guard()?;
        Ok(match kind {
            RegionKind::Internal => &mut self.internal,
            RegionKind::External => &mut self.external,
        })
    }

    /// Overwrites data at `address` without touching any reference to it.
    pub fn replace(&mut self, kind: RegionKind, address: usize, value: &PatchValue) -> Result<()> {
        self.guard()?;
        let cursor = self.cursor_address();
        let region = match kind {
            RegionKind::Internal => &mut self.internal,
            RegionKind::External => &mut self.external,
        };
        match value {
            PatchValue::Uint { value, size } => region.replace_uint(address, *value, *size),
            PatchValue::Bytes(bytes) => region.replace(address, bytes),
            PatchValue::Fill { byte, len } => region.fill(address, *byte, *len),
            PatchValue::Symbol(name) => {
                let target = self
                    .symbols
                    .lookup(name)
                    .ok_or_else(|| encoding_error(format!("unresolved symbol `{name}`")))?;
                region.replace_uint(address, target as u64, WORD_SIZE)
            }
            PatchValue::CursorAddress => region.replace_uint(address, cursor as u64, WORD_SIZE),
        }
    }

    /// Copies a block within one region by `delta` bytes and returns its new
    /// offset.
    pub fn move_block(
        &mut self,
        kind: RegionKind,
        address: usize,
        delta: i64,
        size: usize,
    ) -> Result<usize> {
        self.region_mut(kind)?.move_block(address, delta, size)
    }

    /// Copies a block from the `from` region to `dst_address` in the other
    /// one.
    pub fn move_to_region(
        &mut self,
        from: RegionKind,
        src_address: usize,
        dst_address: usize,
        size: usize,
    ) -> Result<()> {
        self.guard()?;
        match from {
            RegionKind::External => patch::move_to_region(
                &self.external,
                src_address,
                &mut self.internal,
                dst_address,
                size,
            ),
            RegionKind::Internal => patch::move_to_region(
                &self.internal,
                src_address,
                &mut self.external,
                dst_address,
                size,
            ),
        }
    }

    /// Adds `delta` to a single known field.
    pub fn add(&mut self, kind: RegionKind, address: usize, delta: i64, size: usize) -> Result<u64> {
        self.region_mut(kind)?.add(address, delta, size)
    }

    /// Adds the running offset to a single known field.
    pub fn add_offset(&mut self, kind: RegionKind, address: usize, size: usize) -> Result<u64> {
        let offset = self.offset;
        self.add(kind, address, offset, size)
    }

    /// Shifts the running offset and returns the new value.
    pub fn advance_offset(&mut self, delta: i64) -> Result<i64> {
        self.guard()?;
        self.offset = self.offset.checked_add(delta).ok_or_else(|| {
            range_error(format!("offset {} {delta:+} overflows", self.offset))
        })?;
        #[cfg(feature = "log")]
        log::trace!("[Offset] {:+} -> {}", delta, self.offset);
        Ok(self.offset)
    }

    /// Rounds the running offset toward zero to a whole page.
    pub fn round_offset_to_page(&mut self) -> Result<i64> {
        self.guard()?;
        self.offset = round_up_page(self.offset)
            .ok_or_else(|| range_error(format!("offset {} cannot be rounded to a page", self.offset)))?;
        Ok(self.offset)
    }

    /// Moves the internal cursor. It must stay under the active ceiling.
    pub fn set_cursor(&mut self, cursor: usize) -> Result<()> {
        self.guard()?;
        self.internal.bounds_check(cursor, 0)?;
        self.cursor = cursor;
        Ok(())
    }

    /// Advances the cursor past a placed block of `len` bytes, rounded up to
    /// a word. Returns the new cursor.
    pub fn advance_cursor(&mut self, len: usize) -> Result<usize> {
        self.guard()?;
        let cursor = self
            .cursor
            .checked_add(round_up_word(len))
            .ok_or_else(|| range_error("internal cursor overflows"))?;
        self.internal.bounds_check(cursor, 0)?;
        #[cfg(feature = "log")]
        log::trace!("[Cursor] 0x{:x} -> 0x{:x}", self.cursor, cursor);
        self.cursor = cursor;
        Ok(cursor)
    }

    /// Reports the pointer-shaped words a scan would touch.
    pub fn scan(
        &self,
        kind: RegionKind,
        window: &Window,
        values: Range<u32>,
    ) -> Result<Vec<PointerMatch>> {
        relocation::scan(self.region(kind), window, values)
    }

    /// Adds `delta` to every word in `window` whose value lies in `values`.
    pub fn scan_and_adjust(
        &mut self,
        kind: RegionKind,
        window: &Window,
        values: Range<u32>,
        delta: i64,
    ) -> Result<usize> {
        relocation::scan_and_adjust(self.region_mut(kind)?, window, values, delta)
    }

    /// Zeroes every word in `window` whose value lies in `values`.
    pub fn scan_and_zero(
        &mut self,
        kind: RegionKind,
        window: &Window,
        values: Range<u32>,
    ) -> Result<usize> {
        relocation::scan_and_zero(self.region_mut(kind)?, window, values)
    }

    /// Shifts every pointer in the internal pointer window that targets the
    /// external block `[address, address + size)` by `delta`.
    pub fn fixup_external_refs(&mut self, address: usize, size: usize, delta: i64) -> Result<usize> {
        let values = self.external.absolute_range(address, size)?;
        self.scan_and_adjust(RegionKind::Internal, &Window::Pointers, values, delta)
    }

    /// Zeroes every pointer in the internal pointer window that targets the
    /// external block `[address, address + size)`.
    pub fn erase_external_refs(&mut self, address: usize, size: usize) -> Result<usize> {
        let values = self.external.absolute_range(address, size)?;
        self.scan_and_zero(RegionKind::Internal, &Window::Pointers, values)
    }

    /// Zeroes an external block that is no longer used and reclaims its
    /// space in the running offset. Returns the new offset.
    pub fn delete_block(&mut self, address: usize, len: usize) -> Result<i64> {
        self.guard()?;
        let offset = i64::try_from(len)
            .ok()
            .and_then(|len| self.offset.checked_sub(len))
            .ok_or_else(|| range_error(format!("deleting {len} bytes overflows the offset")))?;
        self.external.fill(address, 0, len)?;
        #[cfg(feature = "log")]
        log::debug!(
            "[Delete] external 0x{:x}: {} bytes, offset {} -> {}",
            address,
            len,
            self.offset,
            offset
        );
        self.offset = offset;
        Ok(offset)
    }

    /// Writes a call to `symbol` at `address`. Returns the encoded width.
    pub fn patch_call(&mut self, kind: RegionKind, address: usize, symbol: &str) -> Result<usize> {
        self.guard()?;
        let region = match kind {
            RegionKind::Internal => &mut self.internal,
            RegionKind::External => &mut self.external,
        };
        inject::patch_call(region, address, symbol, &self.symbols, &self.assembler)
    }

    /// Expands session placeholders in `text`, assembles it and writes the
    /// encoding at `address`.
    pub fn patch_instruction(
        &mut self,
        kind: RegionKind,
        address: usize,
        text: &str,
        slot: Option<usize>,
    ) -> Result<usize> {
        self.guard()?;
        let text = expand_template(text, &self.template_vars())?;
        let region = match kind {
            RegionKind::Internal => &mut self.internal,
            RegionKind::External => &mut self.external,
        };
        inject::patch_instruction(region, address, &text, slot, &self.assembler)
    }

    /// Compresses a block in place and remembers the compressed length.
    pub fn compress_block(&mut self, kind: RegionKind, address: usize, size: usize) -> Result<usize> {
        self.guard()?;
        let region = match kind {
            RegionKind::Internal => &mut self.internal,
            RegionKind::External => &mut self.external,
        };
        let len = compress_block(region, address, size, &self.codec)?;
        self.last_compressed = Some(len);
        Ok(len)
    }

    /// Truncates the external region by the reclaimed space and seals the
    /// session. Returns the number of bytes removed.
    pub fn shorten(&mut self, total_delta: i64) -> Result<usize> {
        self.guard()?;
        patch::shorten(&mut self.external, total_delta)
    }

    /// Consumes the session and returns the final images.
    pub fn into_images(self) -> FirmwareImages {
        FirmwareImages {
            internal: self.internal.into_bytes(),
            external: self.external.into_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, SymbolMap};
    use alloc::vec;

    fn session() -> Session<(), SymbolMap, ()> {
        let symbols: SymbolMap = [("bootloader", 0x0801_d001)].into_iter().collect();
        Session::builder(vec![0; 0x1000], vec![0xaa; 0x4000])
            .cursor(0x800)
            .pointer_window(0xc00..0x1000)
            .symbols(symbols)
            .build()
            .unwrap()
    }

    #[test]
    fn default_cursor_follows_internal_image() {
        let session = Session::builder(vec![0; 0x3f1], vec![]).build().unwrap();
        assert_eq!(session.cursor(), 0x3f4);
        assert_eq!(session.cursor_address(), 0x0800_03f4);
    }

    #[test]
    fn replace_symbol_and_cursor() {
        let mut session = session();
        session
            .replace(
                RegionKind::Internal,
                4,
                &PatchValue::Symbol("bootloader".into()),
            )
            .unwrap();
        session
            .replace(RegionKind::Internal, 8, &PatchValue::CursorAddress)
            .unwrap();
        assert_eq!(session.internal().read_u32(4).unwrap(), 0x0801_d001);
        assert_eq!(session.internal().read_u32(8).unwrap(), 0x0800_0800);
        assert!(matches!(
            session.replace(RegionKind::Internal, 4, &PatchValue::Symbol("nope".into())),
            Err(Error::Encoding { .. })
        ));
    }

    #[test]
    fn cursor_is_bounded() {
        let mut session = session();
        assert_eq!(session.advance_cursor(3).unwrap(), 0x804);
        assert!(matches!(
            session.advance_cursor(0x2_0000),
            Err(Error::CapacityExceeded { .. })
        ));
        assert_eq!(session.cursor(), 0x804);
        session.set_cursor(0x2_0000).unwrap();
        assert!(session.set_cursor(0x2_0001).is_err());
    }

    #[test]
    fn delete_reclaims_offset() {
        let mut session = session();
        assert_eq!(session.delete_block(0x100, 0x200).unwrap(), -0x200);
        assert!(
            session
                .external()
                .read(0x100, 0x200)
                .unwrap()
                .iter()
                .all(|&b| b == 0)
        );
        assert!(session.delete_block(0x3f00, 0x200).is_err());
        assert_eq!(session.offset(), -0x200);
    }

    #[test]
    fn external_refs_in_pointer_window() {
        let mut session = session();
        session
            .replace(
                RegionKind::Internal,
                0xc00,
                &PatchValue::Uint {
                    value: 0x9000_1010,
                    size: 4,
                },
            )
            .unwrap();
        session
            .replace(
                RegionKind::Internal,
                0xc04,
                &PatchValue::Uint {
                    value: 0x9000_2000,
                    size: 4,
                },
            )
            .unwrap();
        assert_eq!(session.fixup_external_refs(0x1000, 0x1000, -0x100).unwrap(), 1);
        assert_eq!(session.internal().read_u32(0xc00).unwrap(), 0x9000_0f10);
        assert_eq!(session.erase_external_refs(0x2000, 4).unwrap(), 1);
        assert_eq!(session.internal().read_u32(0xc04).unwrap(), 0);
    }

    #[test]
    fn external_refs_stay_in_the_external_bank() {
        let mut session = session();
        session
            .replace(RegionKind::Internal, 0xc00, &PatchValue::word(0x0800_0010))
            .unwrap();
        // 0x9000_0000 + 0x7800_0000 would wrap to 0x0800_0000.
        assert!(matches!(
            session.fixup_external_refs(0x7800_0000, 0x100, 4),
            Err(Error::CapacityExceeded { .. })
        ));
        assert!(matches!(
            session.erase_external_refs(0x7800_0000, 0x100),
            Err(Error::CapacityExceeded { .. })
        ));
        assert!(session.erase_external_refs(0xff000, 0x2000).is_err());
        assert_eq!(session.internal().read_u32(0xc00).unwrap(), 0x0800_0010);
    }

    #[test]
    fn extreme_operands_fail_without_panicking() {
        let mut session = session();
        session
            .replace(RegionKind::Internal, 0xc00, &PatchValue::word(0x9000_0010))
            .unwrap();
        assert!(matches!(
            session.move_block(RegionKind::External, 0x10, i64::MAX, 4),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            session.move_block(RegionKind::External, 0x10, i64::MIN, 4),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            session.fixup_external_refs(0, 0x100, i64::MAX),
            Err(Error::ValueOutOfRange { .. })
        ));
        assert_eq!(session.internal().read_u32(0xc00).unwrap(), 0x9000_0010);
        assert!(session.shorten(i64::MIN).is_err());
        assert!(!session.is_sealed());
        assert_eq!(session.external().len(), 0x4000);
    }

    #[test]
    fn offset_rounding_overflow_is_reported() {
        let mut session = session();
        session.advance_offset(i64::MAX).unwrap();
        assert!(matches!(
            session.round_offset_to_page(),
            Err(Error::ValueOutOfRange { .. })
        ));
        assert_eq!(session.offset(), i64::MAX);
    }

    #[test]
    fn shorten_seals() {
        let mut session = session();
        session.advance_offset(-0x1800).unwrap();
        let offset = session.round_offset_to_page().unwrap();
        assert_eq!(offset, -0x1000);
        assert_eq!(session.shorten(offset).unwrap(), 0x1000);
        assert!(session.is_sealed());
        assert!(matches!(
            session.add(RegionKind::Internal, 0, 1, 1),
            Err(Error::OrderViolation { .. })
        ));
        assert!(matches!(
            session.shorten(0),
            Err(Error::OrderViolation { .. })
        ));
        let images = session.into_images();
        assert_eq!(images.external.len(), 0x3000);
        assert_eq!(images.internal.len(), 0x1000);
    }

    #[test]
    fn missing_services() {
        let mut session = session();
        assert!(matches!(
            session.patch_call(RegionKind::Internal, 0, "bootloader"),
            Err(Error::Encoding { .. })
        ));
        assert!(matches!(
            session.compress_block(RegionKind::External, 0, 0x100),
            Err(Error::Compression { .. })
        ));
        assert_eq!(session.last_compressed(), None);
    }
}
