//! Subroutine-call injection and instruction re-assembly.
//!
//! Encoding is delegated to an [`Assembler`]; this module only resolves
//! targets, enforces slot widths and writes the result.
mod symbols;
mod traits;

pub use symbols::SymbolMap;
pub use traits::{Assembler, SymbolLookup};

use crate::{Result, error::encoding_error, region::Region};
use alloc::{format, string::String};

/// Width of the call slot `patch_call` overwrites (a 32-bit Thumb-2 `bl`).
pub const CALL_WIDTH: usize = 4;

/// Replaces the instruction at `address` with a branch-and-link to `symbol`.
///
/// Returns the number of bytes written.
pub fn patch_call<S, A>(
    region: &mut Region,
    address: usize,
    symbol: &str,
    symbols: &S,
    assembler: &A,
) -> Result<usize>
where
    S: SymbolLookup + ?Sized,
    A: Assembler + ?Sized,
{
    let target = symbols
        .lookup(symbol)
        .ok_or_else(|| encoding_error(format!("unresolved symbol `{symbol}`")))?;
    let text = format!("bl #0x{target:x}");
    #[cfg(feature = "log")]
    log::debug!(
        "[Call] {} 0x{:x}: bl {} (0x{:08x})",
        region.kind(),
        address,
        symbol,
        target
    );
    patch_instruction(region, address, &text, Some(CALL_WIDTH), assembler)
}

/// Assembles `text` for the absolute address of `address` and writes it.
///
/// With a `slot`, the encoding must not be longer than the slot. Without one
/// the caller vouches for the width. Nothing is written when encoding or the
/// bounds check fails. Returns the number of
/// bytes written.
pub fn patch_instruction<A>(
    region: &mut Region,
    address: usize,
    text: &str,
    slot: Option<usize>,
    assembler: &A,
) -> Result<usize>
where
    A: Assembler + ?Sized,
{
    let code = assembler.assemble(text, region.absolute(address))?;
    if code.is_empty() {
        return Err(encoding_error(format!("`{text}` assembled to nothing")));
    }
    if let Some(slot) = slot {
        if code.len() > slot {
            return Err(encoding_error(format!(
                "`{text}` encodes to {} bytes, slot at {} 0x{address:x} holds {slot}",
                code.len(),
                region.kind()
            )));
        }
    }
    region.write(address, &code)?;
    #[cfg(feature = "log")]
    log::trace!(
        "[Asm] {} 0x{:x}: `{}` ({} bytes)",
        region.kind(),
        address,
        text,
        code.len()
    );
    Ok(code.len())
}

/// Session values instruction text may refer to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TemplateVars {
    /// The running offset.
    pub offset: i64,
    /// Absolute address of the internal write cursor.
    pub cursor: i64,
}

/// Expands `{offset}`, `{cursor}` and their `{name+N}` / `{name-N}` forms to
/// hex immediates. `N` is decimal or `0x` hex. Other braces, such as
/// register lists, are copied unchanged.
///
/// ```rust
/// use flash_patcher::{TemplateVars, expand_template};
///
/// let vars = TemplateVars { offset: -0x30000, cursor: 0 };
/// let text = expand_template("movne.w r4, #{offset+0xff000}", &vars).unwrap();
/// assert_eq!(text, "movne.w r4, #0xcf000");
/// ```
pub fn expand_template(text: &str, vars: &TemplateVars) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            return Ok(out);
        };
        let inner = &tail[1..close];
        match placeholder_value(inner, vars)? {
            Some(value) => {
                if value < 0 {
                    out.push_str(&format!("-0x{:x}", value.unsigned_abs()));
                } else {
                    out.push_str(&format!("0x{value:x}"));
                }
            }
            None => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn placeholder_value(inner: &str, vars: &TemplateVars) -> Result<Option<i64>> {
    let inner = inner.trim();
    let (base, rest) = if let Some(rest) = inner.strip_prefix("offset") {
        (vars.offset, rest)
    } else if let Some(rest) = inner.strip_prefix("cursor") {
        (vars.cursor, rest)
    } else {
        return Ok(None);
    };
    let rest = rest.trim_start();
    if rest.is_empty() {
        return Ok(Some(base));
    }
    let (negative, literal) = match rest.as_bytes()[0] {
        b'+' => (false, rest[1..].trim()),
        b'-' => (true, rest[1..].trim()),
        _ => return Ok(None),
    };
    let parsed = match literal
        .strip_prefix("0x")
        .or_else(|| literal.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(&hex.replace('_', ""), 16),
        None => literal.replace('_', "").parse::<i64>(),
    }
    .map_err(|_| encoding_error(format!("bad placeholder `{{{inner}}}`")))?;
    let value = if negative {
        base.checked_sub(parsed)
    } else {
        base.checked_add(parsed)
    };
    value
        .map(Some)
        .ok_or_else(|| encoding_error(format!("placeholder `{{{inner}}}` overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Error,
        region::{Capacity, RegionFlags, RegionKind},
    };
    use alloc::{vec, vec::Vec};

    struct Fixed(Vec<u8>);

    impl Assembler for Fixed {
        fn assemble(&self, _text: &str, _address: u32) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    fn region() -> Region {
        Region::new(
            RegionKind::Internal,
            0x0800_0000,
            Capacity::new(0x100),
            RegionFlags::empty(),
            vec![0u8; 0x20],
        )
        .unwrap()
    }

    #[test]
    fn unresolved_symbol() {
        let mut region = region();
        let err = patch_call(&mut region, 0, "missing", &(), &Fixed(vec![0; 4])).unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
    }

    #[test]
    fn call_wider_than_slot_is_rejected() {
        let mut region = region();
        let symbols = |_: &str| Some(0x0801_0001u32);
        let err = patch_call(&mut region, 0, "f", &symbols, &Fixed(vec![1; 6])).unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
        assert!(region.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn instruction_without_slot() {
        let mut region = region();
        let n = patch_instruction(&mut region, 4, "anything", None, &Fixed(vec![7; 6])).unwrap();
        assert_eq!(n, 6);
        assert_eq!(region.read(4, 6).unwrap(), &[7; 6]);
        // past the end of the buffer
        assert!(patch_instruction(&mut region, 0x1e, "x", None, &Fixed(vec![7; 4])).is_err());
    }

    #[test]
    fn no_assembler() {
        let mut region = region();
        assert!(patch_instruction(&mut region, 0, "nop", None, &()).is_err());
    }

    #[test]
    fn templates() {
        let vars = TemplateVars {
            offset: -0x2f000,
            cursor: 0x0801_d000,
        };
        assert_eq!(
            expand_template("ite ne; movne.w r4, #{offset+0xff000}", &vars).unwrap(),
            "ite ne; movne.w r4, #0xd0000"
        );
        assert_eq!(expand_template("{offset}", &vars).unwrap(), "-0x2f000");
        assert_eq!(expand_template("{cursor - 16}", &vars).unwrap(), "0x801cff0");
        assert_eq!(
            expand_template("push {r4, lr}", &vars).unwrap(),
            "push {r4, lr}"
        );
        assert_eq!(expand_template("b {", &vars).unwrap(), "b {");
        assert!(expand_template("{offset+zz}", &vars).is_err());
    }
}
