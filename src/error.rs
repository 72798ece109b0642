//! Translation error types.

use std::io;

/// Error types for a translation session.
///
/// Every error is fatal to the session; no partial output is valid.
#[derive(Debug)]
pub enum Error {
    /// The input object could not be opened or traversed.
    ElfStructural(String),
    /// The `maps` section or one of its symbols has an invalid size.
    BadMapSection(String),
    /// A relocation or LDDW references a map with no definition.
    MapMissing(String),
    /// Unsupported opcode within a class, or an invalid operand value.
    InvalidOperand(String),
    /// A branch leaves the instruction buffer or lands on an unlabeled slot.
    InvalidJumpTarget(u32),
    /// Register id out of range (valid ids are 0..=10).
    InvalidRegister(u8),
    /// A relocation references a symbol index absent from the symbol table.
    RelocationResolution(u64),
    /// Writing the output stream failed.
    FormatFailure(io::Error),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ElfStructural(msg) => write!(f, "Can't process ELF object: {}", msg),
            Self::BadMapSection(msg) => write!(f, "Bad maps section: {}", msg),
            Self::MapMissing(name) => write!(f, "Map not found in map definitions: {}", name),
            Self::InvalidOperand(msg) => write!(f, "Invalid operand: {}", msg),
            Self::InvalidJumpTarget(pc) => write!(f, "Invalid jump target at pc {}", pc),
            Self::InvalidRegister(id) => write!(f, "Invalid register id {}", id),
            Self::RelocationResolution(offset) => {
                write!(f, "Can't perform relocation at offset {}", offset)
            }
            Self::FormatFailure(err) => write!(f, "Failed to write output: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FormatFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::FormatFailure(err)
    }
}
