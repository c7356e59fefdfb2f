//! # flash_patcher
//! An engine for applying ordered binary patches to firmware split across two
//! flash banks: a small internal flash and a larger memory-mapped external
//! flash.
//! ## Usage
//! A [`Session`] owns both images, a running address offset and the internal
//! write cursor. Edits (replace, move, add, compress, call injection,
//! instruction re-assembly and a final truncation) are applied either directly
//! on the session or collected in a [`PatchPlan`] and executed in order.
//! Instruction encoding, compression and symbol addresses come from the
//! caller through the [`Assembler`], [`Codec`] and [`SymbolLookup`] traits.
//! ## Example
//! ```rust
//! use flash_patcher::{Delta, PatchPlan, RegionKind, Session};
//!
//! let mut internal = vec![0u8; 0x100];
//! internal[0x20..0x24].copy_from_slice(&0x9000_1000u32.to_le_bytes());
//! let mut session = Session::builder(internal, vec![0u8; 0x2000]).build().unwrap();
//!
//! let mut plan = PatchPlan::new();
//! plan.advance_offset(-256)
//!     .move_block(RegionKind::External, 0x1000, Delta::Offset, 1024)
//!     .add(RegionKind::Internal, 0x20, Delta::Offset, 4);
//! plan.execute(&mut session).unwrap();
//!
//! let images = session.into_images();
//! assert_eq!(&images.internal[0x20..0x24], &0x9000_0f00u32.to_le_bytes());
//! ```
#![no_std]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod compress;
mod error;
pub mod inject;
pub mod input;
mod layout;
mod macros;
mod patch;
mod plan;
pub mod region;
pub mod relocation;
mod session;

pub use compress::{
    Codec, compress_block, padded_len, round_down_page, round_down_word, round_up_page,
    round_up_word,
};
#[cfg(feature = "deflate")]
pub use compress::DeflateCodec;
pub use error::{Error, Result, compression_error, encoding_error};
pub use inject::{
    Assembler, CALL_WIDTH, SymbolLookup, SymbolMap, TemplateVars, expand_template, patch_call,
    patch_instruction,
};
pub use layout::DeviceLayout;
pub use patch::{move_to_region, shorten};
pub use plan::{Delta, Dest, Len, PatchOp, PatchPlan, PatchValue, PlanReport};
pub use region::{Capacity, ERASED_BYTE, PAGE_SIZE, Region, RegionFlags, RegionKind, WORD_SIZE};
pub use relocation::{PointerMatch, Window, scan, scan_and_adjust, scan_and_zero};
pub use session::{FirmwareImages, Session, SessionBuilder};
