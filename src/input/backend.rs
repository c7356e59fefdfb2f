use super::{ImageReader, IntoImageReader};
use crate::{Result, error::io_error};
use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};

/// A flash image backed by an in-memory byte slice.
#[derive(Debug)]
pub struct ImageBytes<'bytes> {
    name: String,
    bytes: &'bytes [u8],
}

impl<'bytes> ImageBytes<'bytes> {
    /// Wraps `bytes` under `name`, which only shows up in error messages and
    /// logs.
    ///
    /// ```rust
    /// use flash_patcher::input::{ImageBytes, ImageReader};
    ///
    /// let data = [0u8; 16];
    /// let image = ImageBytes::new("internal.bin", &data);
    /// assert_eq!(image.len(), 16);
    /// ```
    pub fn new(name: &str, bytes: &'bytes [u8]) -> Self {
        Self {
            name: name.to_string(),
            bytes,
        }
    }
}

impl ImageReader for ImageBytes<'_> {
    fn image_name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        let end = offset
            .checked_add(buf.len())
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                io_error(format!(
                    "{}: read of {} bytes at 0x{offset:x} out of bounds",
                    self.name,
                    buf.len()
                ))
            })?;
        buf.copy_from_slice(&self.bytes[offset..end]);
        Ok(())
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        mod file {
            use super::super::ImageReader;
            use crate::{Result, error::io_error};
            use alloc::{format, string::String, string::ToString};
            use std::{
                fs::File,
                io::{Read, Seek, SeekFrom},
            };

            /// A flash image backed by a file on the filesystem.
            pub struct ImageFile {
                path: String,
                file: File,
                len: usize,
            }

            impl ImageFile {
                /// Opens the image at `path`.
                pub fn from_path(path: impl AsRef<str>) -> Result<Self> {
                    let path = path.as_ref();
                    let file = File::open(path).map_err(|e| io_error(format!("{path}: {e}")))?;
                    let len = file
                        .metadata()
                        .map_err(|e| io_error(format!("{path}: {e}")))?
                        .len() as usize;
                    Ok(Self {
                        path: path.to_string(),
                        file,
                        len,
                    })
                }
            }

            impl ImageReader for ImageFile {
                fn image_name(&self) -> &str {
                    &self.path
                }

                fn len(&self) -> usize {
                    self.len
                }

                fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
                    self.file
                        .seek(SeekFrom::Start(offset as u64))
                        .and_then(|_| self.file.read_exact(buf))
                        .map_err(|e| io_error(format!("{}: {e}", self.path)))
                }
            }
        }

        pub use file::ImageFile;
    }
}

#[cfg(feature = "std")]
impl<'a> IntoImageReader<'a> for &'a str {
    type Reader = ImageFile;

    fn into_reader(self) -> Result<Self::Reader> {
        ImageFile::from_path(self)
    }
}

#[cfg(feature = "std")]
impl<'a> IntoImageReader<'a> for String {
    type Reader = ImageFile;

    fn into_reader(self) -> Result<Self::Reader> {
        ImageFile::from_path(&self)
    }
}

#[cfg(feature = "std")]
impl<'a> IntoImageReader<'a> for ImageFile {
    type Reader = ImageFile;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(self)
    }
}

impl<'a> IntoImageReader<'a> for &'a [u8] {
    type Reader = ImageBytes<'a>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(ImageBytes::new("<memory>", self))
    }
}

impl<'a> IntoImageReader<'a> for &'a Vec<u8> {
    type Reader = ImageBytes<'a>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(ImageBytes::new("<memory>", self.as_slice()))
    }
}

impl<'a, 'b> IntoImageReader<'a> for ImageBytes<'b>
where
    'b: 'a,
{
    type Reader = ImageBytes<'b>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(self)
    }
}
