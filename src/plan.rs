//! Patch plans
//!
//! A [`PatchPlan`] is an ordered list of [`PatchOp`] records executed against
//! a [`Session`] by a single driver loop. Operands that are only known while
//! the plan runs (the running offset, the internal cursor, the length of the
//! last compressed block) are expressed with [`Delta`], [`Len`] and [`Dest`].
use crate::{
    Result,
    compress::Codec,
    error::{order_error, plan_error},
    inject::{Assembler, SymbolLookup},
    region::RegionKind,
    relocation::Window,
    session::Session,
};
use alloc::{string::String, vec::Vec};
use core::ops::Range;

/// The data a replace operation writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchValue {
    /// A little-endian unsigned integer of `size` bytes.
    Uint { value: u64, size: usize },
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// The address of a named symbol, as a 4-byte word.
    Symbol(String),
    /// `len` copies of `byte`.
    Fill { byte: u8, len: usize },
    /// The absolute address of the internal cursor, as a 4-byte word.
    CursorAddress,
}

impl PatchValue {
    /// A 4-byte little-endian word.
    #[inline]
    pub const fn word(value: u32) -> Self {
        PatchValue::Uint {
            value: value as u64,
            size: 4,
        }
    }

    #[inline]
    pub fn symbol(name: impl Into<String>) -> Self {
        PatchValue::Symbol(name.into())
    }

    #[inline]
    pub const fn zeros(len: usize) -> Self {
        PatchValue::Fill { byte: 0, len }
    }
}

/// A signed distance resolved when the operation runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delta {
    Fixed(i64),
    /// The running offset.
    Offset,
    /// Distance from the absolute address of `address` in `region` to the
    /// absolute cursor address.
    ToCursor { region: RegionKind, address: usize },
}

/// A length resolved when the operation runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Len {
    Fixed(usize),
    /// The length returned by the most recent compression.
    Compressed,
}

/// A destination offset resolved when the operation runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dest {
    At(usize),
    /// The internal cursor.
    Cursor,
}

/// One step of a [`PatchPlan`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchOp {
    Replace {
        region: RegionKind,
        address: usize,
        value: PatchValue,
    },
    Move {
        region: RegionKind,
        address: usize,
        delta: Delta,
        size: Len,
    },
    /// Copy a block from `from` into the other region.
    MoveToRegion {
        from: RegionKind,
        address: usize,
        dest: Dest,
        size: Len,
    },
    Add {
        region: RegionKind,
        address: usize,
        delta: Delta,
        size: usize,
    },
    ScanAndAdjust {
        region: RegionKind,
        window: Window,
        values: Range<u32>,
        delta: Delta,
    },
    ScanAndZero {
        region: RegionKind,
        window: Window,
        values: Range<u32>,
    },
    /// Shift internal pointers to an external block.
    FixupExternalRefs {
        address: usize,
        size: usize,
        delta: Delta,
    },
    /// Zero internal pointers to an external block.
    EraseExternalRefs { address: usize, size: usize },
    PatchCall {
        region: RegionKind,
        address: usize,
        symbol: String,
    },
    PatchInstruction {
        region: RegionKind,
        address: usize,
        text: String,
        slot: Option<usize>,
    },
    Compress {
        region: RegionKind,
        address: usize,
        size: usize,
    },
    /// Zero an external block and reclaim its length in the running offset.
    Delete { address: usize, len: usize },
    AdvanceOffset(i64),
    RoundOffsetToPage,
    SetCursor(usize),
    AdvanceCursor(Len),
    /// Truncate the external region. Must be the last operation.
    Shorten(Delta),
}

/// Counters collected while a plan runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlanReport {
    /// Number of operations executed.
    pub applied: usize,
    /// Pointers rewritten by scans.
    pub pointers_adjusted: usize,
    /// Pointers zeroed by scans.
    pub pointers_zeroed: usize,
    /// Bytes removed from the end of the external region.
    pub bytes_removed: usize,
    /// Final running offset.
    pub offset: i64,
    /// Final internal cursor.
    pub cursor: usize,
}

/// An ordered list of patch operations.
///
/// Operations run strictly in submission order and the first failure stops
/// the plan. The failing step's region is left untouched, but earlier steps
/// are not rolled back: discard the session on error.
///
/// Two ordering mistakes are detected and reported as
/// [`Error::OrderViolation`](crate::Error::OrderViolation): any operation
/// after [`PatchOp::Shorten`], and [`Len::Compressed`] used before anything
/// was compressed. The main hazard is not detectable: [`Delta::Offset`] is
/// only valid for addresses past the last edited point, and applying it to an
/// earlier block (or forgetting to apply it to a later one) silently corrupts
/// the image. Likewise every live reference to a moved or deleted block needs
/// its own `Add`, scan or erase step before the plan ends.
///
/// # Examples
/// ```rust
/// use flash_patcher::{Delta, PatchPlan, PatchValue, RegionKind, Session};
///
/// let mut internal = vec![0u8; 0x100];
/// internal[0x20..0x24].copy_from_slice(&0x9000_1000u32.to_le_bytes());
/// let mut session = Session::builder(internal, vec![0x5a; 0x2000]).build().unwrap();
///
/// let mut plan = PatchPlan::new();
/// plan.delete(0x0, 0x100)
///     .move_block(RegionKind::External, 0x1000, Delta::Offset, 0x400)
///     .add(RegionKind::Internal, 0x20, Delta::Offset, 4)
///     .replace(RegionKind::Internal, 0x40, PatchValue::word(0xdead_beef));
/// let report = plan.execute(&mut session).unwrap();
/// assert_eq!(report.applied, 4);
/// assert_eq!(session.internal().read_u32(0x20).unwrap(), 0x9000_0f00);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatchPlan {
    ops: Vec<PatchOp>,
}

impl PatchPlan {
    /// An empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Appends a raw operation.
    pub fn push(&mut self, op: PatchOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// Overwrites a field with `value`.
    pub fn replace(&mut self, region: RegionKind, address: usize, value: PatchValue) -> &mut Self {
        self.push(PatchOp::Replace {
            region,
            address,
            value,
        })
    }

    /// Moves a block within `region` by `delta`.
    pub fn move_block(
        &mut self,
        region: RegionKind,
        address: usize,
        delta: Delta,
        size: usize,
    ) -> &mut Self {
        self.push(PatchOp::Move {
            region,
            address,
            delta,
            size: Len::Fixed(size),
        })
    }

    /// Copies a block from `from` into the other region, either at a fixed
    /// offset or at the internal cursor. The cursor is not advanced; follow with
    /// [`advance_cursor`](Self::advance_cursor).
    pub fn move_to_region(
        &mut self,
        from: RegionKind,
        address: usize,
        dest: Dest,
        size: Len,
    ) -> &mut Self {
        self.push(PatchOp::MoveToRegion {
            from,
            address,
            dest,
            size,
        })
    }

    /// Adds `delta` to a single `size`-byte field.
    pub fn add(&mut self, region: RegionKind, address: usize, delta: Delta, size: usize) -> &mut Self {
        self.push(PatchOp::Add {
            region,
            address,
            delta,
            size,
        })
    }

    /// Shifts pointers in `window` that fall in `values`.
    pub fn scan_and_adjust(
        &mut self,
        region: RegionKind,
        window: impl Into<Window>,
        values: Range<u32>,
        delta: Delta,
    ) -> &mut Self {
        self.push(PatchOp::ScanAndAdjust {
            region,
            window: window.into(),
            values,
            delta,
        })
    }

    /// Zeroes pointers in `window` that fall in `values`.
    pub fn scan_and_zero(
        &mut self,
        region: RegionKind,
        window: impl Into<Window>,
        values: Range<u32>,
    ) -> &mut Self {
        self.push(PatchOp::ScanAndZero {
            region,
            window: window.into(),
            values,
        })
    }

    /// Shifts internal pointers into the external block `[address, address + size)`.
    pub fn fixup_external_refs(&mut self, address: usize, size: usize, delta: Delta) -> &mut Self {
        self.push(PatchOp::FixupExternalRefs {
            address,
            size,
            delta,
        })
    }

    /// Zeroes internal pointers into the external block `[address, address + size)`.
    pub fn erase_external_refs(&mut self, address: usize, size: usize) -> &mut Self {
        self.push(PatchOp::EraseExternalRefs { address, size })
    }

    /// Writes a call to `symbol`.
    pub fn patch_call(
        &mut self,
        region: RegionKind,
        address: usize,
        symbol: impl Into<String>,
    ) -> &mut Self {
        self.push(PatchOp::PatchCall {
            region,
            address,
            symbol: symbol.into(),
        })
    }

    /// Assembles `text` at `address`.
    ///
    /// With `Some(slot)` the step fails with
    /// [`Error::Encoding`](crate::Error::Encoding) when the encoding is wider
    /// than `slot` bytes. `None` writes the encoding whatever its length, so the
    /// caller guarantees that it does not spill over the next instruction.
    ///
    /// # Examples
    /// ```rust
    /// use flash_patcher::{PatchPlan, RegionKind};
    ///
    /// let mut plan = PatchPlan::new();
    /// plan.patch_instruction(RegionKind::Internal, 0x48, ".word {offset+0xff000}", Some(4));
    /// ```
    pub fn patch_instruction(
        &mut self,
        region: RegionKind,
        address: usize,
        text: impl Into<String>,
        slot: Option<usize>,
    ) -> &mut Self {
        self.push(PatchOp::PatchInstruction {
            region,
            address,
            text: text.into(),
            slot,
        })
    }

    /// Compresses a block in place and records its packed length.
    pub fn compress(&mut self, region: RegionKind, address: usize, size: usize) -> &mut Self {
        self.push(PatchOp::Compress {
            region,
            address,
            size,
        })
    }

    /// Zeroes an external block and reclaims its length in the running offset.
    pub fn delete(&mut self, address: usize, len: usize) -> &mut Self {
        self.push(PatchOp::Delete { address, len })
    }

    /// Shifts the running offset.
    pub fn advance_offset(&mut self, delta: i64) -> &mut Self {
        self.push(PatchOp::AdvanceOffset(delta))
    }

    /// Rounds the running offset toward zero to a whole page.
    pub fn round_offset_to_page(&mut self) -> &mut Self {
        self.push(PatchOp::RoundOffsetToPage)
    }

    /// Moves the internal cursor.
    pub fn set_cursor(&mut self, cursor: usize) -> &mut Self {
        self.push(PatchOp::SetCursor(cursor))
    }

    /// Moves the cursor past a placed block, rounded up to a word.
    pub fn advance_cursor(&mut self, len: Len) -> &mut Self {
        self.push(PatchOp::AdvanceCursor(len))
    }

    /// Truncates the external region. Must be the last step.
    pub fn shorten(&mut self, delta: Delta) -> &mut Self {
        self.push(PatchOp::Shorten(delta))
    }

    /// Runs every operation in order against `session`.
    ///
    /// The first failure is returned as [`Error::Plan`](crate::Error::Plan)
    /// carrying the index of the failing operation.
    pub fn execute<A, S, C>(&self, session: &mut Session<A, S, C>) -> Result<PlanReport>
    where
        A: Assembler,
        S: SymbolLookup,
        C: Codec,
    {
        #[cfg(feature = "log")]
        log::debug!("[Plan] Executing {} operations", self.ops.len());
        let mut report = PlanReport::default();
        for (index, op) in self.ops.iter().enumerate() {
            apply(session, op, &mut report).map_err(|err| {
                #[cfg(feature = "log")]
                log::debug!("[Plan] Operation {} failed: {}", index, err);
                plan_error(index, err)
            })?;
            report.applied += 1;
        }
        report.offset = session.offset();
        report.cursor = session.cursor();
        #[cfg(feature = "log")]
        log::debug!(
            "[Plan] Done: offset {}, cursor 0x{:x}, {} pointers adjusted, {} zeroed",
            report.offset,
            report.cursor,
            report.pointers_adjusted,
            report.pointers_zeroed
        );
        Ok(report)
    }
}

impl FromIterator<PatchOp> for PatchPlan {
    fn from_iter<T: IntoIterator<Item = PatchOp>>(iter: T) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

impl Extend<PatchOp> for PatchPlan {
    fn extend<T: IntoIterator<Item = PatchOp>>(&mut self, iter: T) {
        self.ops.extend(iter);
    }
}

fn delta<A, S, C>(session: &Session<A, S, C>, delta: &Delta) -> i64
where
    A: Assembler,
    S: SymbolLookup,
    C: Codec,
{
    match *delta {
        Delta::Fixed(delta) => delta,
        Delta::Offset => session.offset(),
        Delta::ToCursor { region, address } => {
            session.cursor_address() as i64 - session.region(region).absolute(address) as i64
        }
    }
}

fn len<A, S, C>(session: &Session<A, S, C>, len: &Len) -> Result<usize>
where
    A: Assembler,
    S: SymbolLookup,
    C: Codec,
{
    match *len {
        Len::Fixed(len) => Ok(len),
        Len::Compressed => session
            .last_compressed()
            .ok_or_else(|| order_error("compressed length used before any block was compressed")),
    }
}

fn apply<A, S, C>(session: &mut Session<A, S, C>, op: &PatchOp, report: &mut PlanReport) -> Result<()>
where
    A: Assembler,
    S: SymbolLookup,
    C: Codec,
{
    #[cfg(feature = "log")]
    log::trace!("[Plan] {:?}", op);
    match op {
        PatchOp::Replace {
            region,
            address,
            value,
        } => session.replace(*region, *address, value)?,
        PatchOp::Move {
            region,
            address,
            delta: d,
            size,
        } => {
            let (d, size) = (delta(session, d), len(session, size)?);
            session.move_block(*region, *address, d, size)?;
        }
        PatchOp::MoveToRegion {
            from,
            address,
            dest,
            size,
        } => {
            let size = len(session, size)?;
            let dest = match dest {
                Dest::At(dest) => *dest,
                Dest::Cursor => session.cursor(),
            };
            session.move_to_region(*from, *address, dest, size)?;
        }
        PatchOp::Add {
            region,
            address,
            delta: d,
            size,
        } => {
            let d = delta(session, d);
            session.add(*region, *address, d, *size)?;
        }
        PatchOp::ScanAndAdjust {
            region,
            window,
            values,
            delta: d,
        } => {
            let d = delta(session, d);
            report.pointers_adjusted += session.scan_and_adjust(*region, window, values.clone(), d)?;
        }
        PatchOp::ScanAndZero {
            region,
            window,
            values,
        } => report.pointers_zeroed += session.scan_and_zero(*region, window, values.clone())?,
        PatchOp::FixupExternalRefs {
            address,
            size,
            delta: d,
        } => {
            let d = delta(session, d);
            report.pointers_adjusted += session.fixup_external_refs(*address, *size, d)?;
        }
        PatchOp::EraseExternalRefs { address, size } => {
            report.pointers_zeroed += session.erase_external_refs(*address, *size)?
        }
        PatchOp::PatchCall {
            region,
            address,
            symbol,
        } => {
            session.patch_call(*region, *address, symbol)?;
        }
        PatchOp::PatchInstruction {
            region,
            address,
            text,
            slot,
        } => {
            session.patch_instruction(*region, *address, text, *slot)?;
        }
        PatchOp::Compress {
            region,
            address,
            size,
        } => {
            session.compress_block(*region, *address, *size)?;
        }
        PatchOp::Delete { address, len } => {
            session.delete_block(*address, *len)?;
        }
        PatchOp::AdvanceOffset(d) => {
            session.advance_offset(*d)?;
        }
        PatchOp::RoundOffsetToPage => {
            session.round_offset_to_page()?;
        }
        PatchOp::SetCursor(cursor) => session.set_cursor(*cursor)?,
        PatchOp::AdvanceCursor(l) => {
            let l = len(session, l)?;
            session.advance_cursor(l)?;
        }
        PatchOp::Shorten(d) => {
            let d = delta(session, d);
            report.bytes_removed += session.shorten(d)?;
        }
    }
    Ok(())
}
