//! `gen-image` is a utility for generating synthetic internal/external
//! firmware image pairs, specifically designed for testing flash patchers.

mod common;
pub mod sample;
mod writer;

pub use common::{Bank, BlockDesc, BlockFill, PointerDesc};
pub use writer::{ImageOutput, ImageWriter, ImageWriterConfig};
