//! Flash image sources
//!
//! Traits and implementations for reading the raw internal and external
//! images a session starts from, whether they live in memory or in files.

#[cfg(feature = "std")]
pub use backend::ImageFile;
pub use backend::ImageBytes;
pub use traits::{ImageReader, IntoImageReader};

mod backend;
mod traits;
