#![allow(dead_code)]

use flash_patcher::{Assembler, Codec, Result, SymbolMap, compression_error, encoding_error};
use std::path::PathBuf;
use std::sync::Once;

pub const BOOTLOADER: u32 = 0x0800_3801;
pub const MEMCPY_INFLATE: u32 = 0x0800_3901;

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn symbols() -> SymbolMap {
    [("bootloader", BOOTLOADER), ("memcpy_inflate", MEMCPY_INFLATE)]
        .into_iter()
        .collect()
}

/// A fresh directory for files written by a test.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("flash_patcher_tests")
        .join(format!("{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn parse_imm(text: &str) -> Option<u32> {
    let text = text.trim().trim_start_matches('#');
    match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Thumb-2 `bl` from `address` to `target`. `None` when out of range.
pub fn thumb_bl(address: u32, target: u32) -> Option<[u8; 4]> {
    let offset = (target & !1) as i64 - (address as i64 + 4);
    if !(-(1 << 24)..(1 << 24)).contains(&offset) {
        return None;
    }
    let imm = offset as u32;
    let s = (imm >> 24) & 1;
    let i1 = (imm >> 23) & 1;
    let i2 = (imm >> 22) & 1;
    let j1 = (!(i1 ^ s)) & 1;
    let j2 = (!(i2 ^ s)) & 1;
    let hi = 0xf000 | (s << 10) | ((imm >> 12) & 0x3ff);
    let lo = 0xd000 | (j1 << 13) | (j2 << 11) | ((imm >> 1) & 0x7ff);
    let mut out = [0u8; 4];
    out[..2].copy_from_slice(&(hi as u16).to_le_bytes());
    out[2..].copy_from_slice(&(lo as u16).to_le_bytes());
    Some(out)
}

/// Thumb-2 `movw rd, #imm16`.
pub fn thumb_movw(rd: u32, imm: u32) -> [u8; 4] {
    let hi = 0xf240 | (((imm >> 11) & 1) << 10) | ((imm >> 12) & 0xf);
    let lo = (((imm >> 8) & 0x7) << 12) | (rd << 8) | (imm & 0xff);
    let mut out = [0u8; 4];
    out[..2].copy_from_slice(&(hi as u16).to_le_bytes());
    out[2..].copy_from_slice(&(lo as u16).to_le_bytes());
    out
}

/// Understands just enough Thumb to patch test images: `bl #target`,
/// `movw rN, #imm`, `nop` and the `.word` directive.
pub struct ThumbAssembler;

impl Assembler for ThumbAssembler {
    fn assemble(&self, text: &str, address: u32) -> Result<Vec<u8>> {
        let text = text.trim();
        let bad = || encoding_error(format!("cannot assemble `{text}`"));
        if text == "nop" {
            return Ok(vec![0x00, 0xbf]);
        }
        if let Some(target) = text.strip_prefix("bl ") {
            let target = parse_imm(target).ok_or_else(bad)?;
            return thumb_bl(address, target)
                .map(|code| code.to_vec())
                .ok_or_else(|| encoding_error(format!("bl target 0x{target:x} out of range")));
        }
        if let Some(operands) = text.strip_prefix("movw ") {
            let (rd, imm) = operands.split_once(',').ok_or_else(bad)?;
            let rd: u32 = rd
                .trim()
                .strip_prefix('r')
                .and_then(|r| r.parse().ok())
                .filter(|&r| r < 13)
                .ok_or_else(bad)?;
            let imm = parse_imm(imm).filter(|&imm| imm <= 0xffff).ok_or_else(bad)?;
            return Ok(thumb_movw(rd, imm).to_vec());
        }
        if let Some(value) = text.strip_prefix(".word ") {
            return Ok(parse_imm(value).ok_or_else(bad)?.to_le_bytes().to_vec());
        }
        Err(bad())
    }
}

/// Byte-oriented run-length codec: `(count, byte)` pairs.
pub struct RleCodec;

impl RleCodec {
    pub fn expand(packed: &[u8]) -> Vec<u8> {
        packed
            .chunks_exact(2)
            .flat_map(|pair| std::iter::repeat_n(pair[1], pair[0] as usize))
            .collect()
    }
}

impl Codec for RleCodec {
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut iter = input.iter().copied().peekable();
        while let Some(byte) = iter.next() {
            let mut count = 1u8;
            while count < u8::MAX && iter.peek() == Some(&byte) {
                iter.next();
                count += 1;
            }
            out.extend_from_slice(&[count, byte]);
        }
        if out.len() > input.len() {
            return Err(compression_error("block does not shrink under RLE"));
        }
        Ok(out)
    }
}

/// A codec that always produces exactly `len` bytes, for exercising length
/// bookkeeping.
pub struct FixedLenCodec(pub usize);

impl Codec for FixedLenCodec {
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.iter().copied().cycle().take(self.0).collect())
    }
}

pub fn word(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

pub fn put_word(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
