use crate::{Bank, BlockDesc, PointerDesc};
use anyhow::{Result, bail, ensure};
use byteorder::{ByteOrder, LittleEndian};
use std::{fmt::Write as _, fs, path::Path};

/// Base addresses, sizes and erase values of the two generated banks.
#[derive(Clone, Copy, Debug)]
pub struct ImageWriterConfig {
    pub internal_base: u32,
    pub internal_len: usize,
    pub external_base: u32,
    pub external_len: usize,
    /// Value of bytes not covered by any block.
    pub internal_fill: u8,
    pub external_fill: u8,
}

impl Default for ImageWriterConfig {
    fn default() -> Self {
        Self {
            internal_base: 0x0800_0000,
            internal_len: 0x4000,
            external_base: 0x9000_0000,
            external_len: 0x2_0000,
            internal_fill: 0x00,
            external_fill: 0xff,
        }
    }
}

impl ImageWriterConfig {
    fn base(&self, bank: Bank) -> u32 {
        match bank {
            Bank::Internal => self.internal_base,
            Bank::External => self.external_base,
        }
    }

    fn len(&self, bank: Bank) -> usize {
        match bank {
            Bank::Internal => self.internal_len,
            Bank::External => self.external_len,
        }
    }
}

/// The generated images.
#[derive(Clone, Debug)]
pub struct ImageOutput {
    pub internal: Vec<u8>,
    pub external: Vec<u8>,
    /// One line per block and pointer, in placement order.
    pub manifest: String,
}

/// Builds a synthetic internal/external image pair from block and pointer
/// descriptions.
#[derive(Clone, Debug, Default)]
pub struct ImageWriter {
    config: ImageWriterConfig,
    blocks: Vec<BlockDesc>,
    pointers: Vec<PointerDesc>,
}

impl ImageWriter {
    pub fn new(config: ImageWriterConfig) -> Self {
        Self {
            config,
            blocks: Vec::new(),
            pointers: Vec::new(),
        }
    }

    pub fn config(&self) -> &ImageWriterConfig {
        &self.config
    }

    pub fn block(&mut self, block: BlockDesc) -> &mut Self {
        self.blocks.push(block);
        self
    }

    /// Pointers are written after every block, so they may sit inside one.
    pub fn pointer(&mut self, pointer: PointerDesc) -> &mut Self {
        self.pointers.push(pointer);
        self
    }

    /// Absolute address of an offset in a bank.
    pub fn address(&self, bank: Bank, offset: usize) -> u32 {
        self.config.base(bank).wrapping_add(offset as u32)
    }

    pub fn build(&self) -> Result<ImageOutput> {
        let config = &self.config;
        let mut internal = vec![config.internal_fill; config.internal_len];
        let mut external = vec![config.external_fill; config.external_len];
        let mut manifest = String::new();

        for block in &self.blocks {
            let image = match block.bank {
                Bank::Internal => &mut internal,
                Bank::External => &mut external,
            };
            let Some(end) = block.offset.checked_add(block.len) else {
                bail!("block `{}` overflows", block.name);
            };
            ensure!(
                end <= image.len(),
                "block `{}` (0x{:x}..0x{:x}) does not fit the {:?} bank of 0x{:x} bytes",
                block.name,
                block.offset,
                end,
                block.bank,
                image.len()
            );
            image[block.offset..end].copy_from_slice(&block.bytes());
            writeln!(
                manifest,
                "block {:<16} {:?} 0x{:06x} len 0x{:x}",
                block.name, block.bank, block.offset, block.len
            )?;
        }

        for pointer in &self.pointers {
            ensure!(
                pointer.target_offset < config.len(pointer.target),
                "pointer target 0x{:x} outside the {:?} bank",
                pointer.target_offset,
                pointer.target
            );
            let value = self.address(pointer.target, pointer.target_offset);
            let image = match pointer.bank {
                Bank::Internal => &mut internal,
                Bank::External => &mut external,
            };
            ensure!(
                pointer.at % 4 == 0 && pointer.at + 4 <= image.len(),
                "pointer slot 0x{:x} in the {:?} bank is unaligned or out of range",
                pointer.at,
                pointer.bank
            );
            LittleEndian::write_u32(&mut image[pointer.at..pointer.at + 4], value);
            writeln!(
                manifest,
                "pointer {:?} 0x{:06x} -> 0x{:08x}",
                pointer.bank, pointer.at, value
            )?;
        }

        Ok(ImageOutput {
            internal,
            external,
            manifest,
        })
    }

    /// Builds the images and writes `internal.bin`, `external.bin` and
    /// `manifest.txt` into `dir`.
    pub fn write_files(&self, dir: &Path) -> Result<ImageOutput> {
        let output = self.build()?;
        fs::create_dir_all(dir)?;
        fs::write(dir.join("internal.bin"), &output.internal)?;
        fs::write(dir.join("external.bin"), &output.external)?;
        fs::write(dir.join("manifest.txt"), &output.manifest)?;
        Ok(output)
    }
}
