/// One of the two flash banks of a generated image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bank {
    /// Internal flash, mapped at the low base address.
    Internal,
    /// Memory-mapped external flash.
    External,
}

/// Content of a generated block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockFill {
    /// Pseudo-random bytes derived from a seed. Never contains a word that
    /// looks like an address of either bank.
    Pattern(u32),
    /// Runs of a single byte, which compress well.
    Runs(u8),
    /// All zeros.
    Zero,
}

/// Description of a block to place in one of the banks.
#[derive(Clone, Debug)]
pub struct BlockDesc {
    /// Name used in the generated manifest.
    pub name: String,
    pub bank: Bank,
    /// Offset from the start of the bank.
    pub offset: usize,
    pub len: usize,
    pub fill: BlockFill,
}

impl BlockDesc {
    pub fn pattern(name: impl Into<String>, bank: Bank, offset: usize, len: usize, seed: u32) -> Self {
        Self {
            name: name.into(),
            bank,
            offset,
            len,
            fill: BlockFill::Pattern(seed),
        }
    }

    pub fn runs(name: impl Into<String>, bank: Bank, offset: usize, len: usize, byte: u8) -> Self {
        Self {
            name: name.into(),
            bank,
            offset,
            len,
            fill: BlockFill::Runs(byte),
        }
    }

    pub fn zero(name: impl Into<String>, bank: Bank, offset: usize, len: usize) -> Self {
        Self {
            name: name.into(),
            bank,
            offset,
            len,
            fill: BlockFill::Zero,
        }
    }

    /// Generates the block's bytes.
    pub fn bytes(&self) -> Vec<u8> {
        match self.fill {
            BlockFill::Zero => vec![0; self.len],
            // The top byte of every aligned word stays below 0x08, so no word
            // of a word-aligned block falls in either bank's address range.
            BlockFill::Pattern(seed) => {
                let mut state = seed | 1;
                (0..self.len)
                    .map(|i| {
                        state ^= state << 13;
                        state ^= state >> 17;
                        state ^= state << 5;
                        if i % 4 == 3 {
                            (state & 0x07) as u8
                        } else {
                            state as u8
                        }
                    })
                    .collect()
            }
            BlockFill::Runs(byte) => (0..self.len)
                .map(|i| if (i / 64) % 2 == 0 { byte } else { 0 })
                .collect(),
        }
    }
}

/// A 4-byte little-endian pointer stored in one bank that targets an offset
/// in another (or the same) bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerDesc {
    /// Bank holding the pointer.
    pub bank: Bank,
    /// Offset of the pointer inside its bank.
    pub at: usize,
    /// Bank the pointer targets.
    pub target: Bank,
    /// Offset of the target inside its bank.
    pub target_offset: usize,
}

impl PointerDesc {
    /// A pointer in internal flash to a block in external flash.
    pub fn to_external(at: usize, target_offset: usize) -> Self {
        Self {
            bank: Bank::Internal,
            at,
            target: Bank::External,
            target_offset,
        }
    }

    /// A pointer in external flash to another external offset, as found in
    /// scene and lookup tables.
    pub fn external_table(at: usize, target_offset: usize) -> Self {
        Self {
            bank: Bank::External,
            at,
            target: Bank::External,
            target_offset,
        }
    }
}
