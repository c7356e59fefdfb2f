use crate::{Result, error::encoding_error};
use alloc::{collections::BTreeMap, string::String, sync::Arc, vec::Vec};

/// A trait for resolving the names the caller patches against.
///
/// Typically backed by the symbol table of the custom code that is linked
/// into the freed space. Returned addresses are absolute and already carry
/// any mode bit the target architecture expects (e.g. Thumb bit).
///
/// # Examples
/// ```rust
/// use flash_patcher::SymbolLookup;
///
/// let lookup = |name: &str| match name {
///     "bootloader" => Some(0x0801_d001u32),
///     _ => None,
/// };
/// assert_eq!(lookup.lookup("bootloader"), Some(0x0801_d001));
/// ```
pub trait SymbolLookup {
    /// Finds the absolute address of a symbol by name.
    fn lookup(&self, name: &str) -> Option<u32>;
}

impl<F: ?Sized> SymbolLookup for F
where
    F: Fn(&str) -> Option<u32>,
{
    fn lookup(&self, name: &str) -> Option<u32> {
        self(name)
    }
}

impl<S: SymbolLookup + ?Sized> SymbolLookup for Arc<S> {
    fn lookup(&self, name: &str) -> Option<u32> {
        (**self).lookup(name)
    }
}

impl SymbolLookup for BTreeMap<String, u32> {
    fn lookup(&self, name: &str) -> Option<u32> {
        self.get(name).copied()
    }
}

impl SymbolLookup for () {
    fn lookup(&self, _name: &str) -> Option<u32> {
        None
    }
}

/// A trait for turning instruction text into machine code.
///
/// The engine never encodes instructions itself. It hands the text and the
/// absolute address the code will execute from (needed for PC-relative
/// branches) to this service.
///
/// # Examples
/// ```rust
/// use flash_patcher::{Assembler, Result, encoding_error};
///
/// struct Nop;
///
/// impl Assembler for Nop {
///     fn assemble(&self, text: &str, _address: u32) -> Result<Vec<u8>> {
///         match text {
///             "nop" => Ok(vec![0x00, 0xbf]),
///             _ => Err(encoding_error("unsupported")),
///         }
///     }
/// }
/// ```
pub trait Assembler {
    /// Assembles `text` as if placed at `address`.
    fn assemble(&self, text: &str, address: u32) -> Result<Vec<u8>>;
}

impl<A: Assembler + ?Sized> Assembler for &A {
    fn assemble(&self, text: &str, address: u32) -> Result<Vec<u8>> {
        (**self).assemble(text, address)
    }
}

impl<A: Assembler + ?Sized> Assembler for Arc<A> {
    fn assemble(&self, text: &str, address: u32) -> Result<Vec<u8>> {
        (**self).assemble(text, address)
    }
}

impl Assembler for () {
    fn assemble(&self, text: &str, _address: u32) -> Result<Vec<u8>> {
        Err(encoding_error(alloc::format!(
            "no assembler configured for `{text}`"
        )))
    }
}
