use crate::Result;
use alloc::{vec, vec::Vec};

/// A trait for reading a raw flash image from some storage.
///
/// `ImageReader` abstracts the source (memory, file system, a debug probe,
/// etc.) so that a [`Session`](crate::Session) can be seeded uniformly.
pub trait ImageReader {
    /// Returns the full name or path of the image.
    fn image_name(&self) -> &str;

    /// Total size of the image in bytes.
    fn len(&self) -> usize;

    /// Reads a chunk of the image into `buf`, starting at byte `offset`.
    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()>;

    /// Returns `true` if the image holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the short name of the image (the file name without the path).
    fn shortname(&self) -> &str {
        let name = self.image_name();
        name.rsplit('/').next().unwrap_or(name)
    }

    /// Reads the whole image.
    fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.len()];
        self.read(&mut buf, 0)?;
        Ok(buf)
    }
}

/// A trait for converting input sources (paths, byte slices) into an
/// [`ImageReader`].
pub trait IntoImageReader<'a> {
    /// The type of reader produced by this conversion.
    type Reader: ImageReader + 'a;

    /// Converts the input into an `ImageReader`.
    fn into_reader(self) -> Result<Self::Reader>;
}
