use thiserror::Error;

use crate::types::CardErrors;

/// Main error type for card parsing and recovery
#[derive(Error, Debug)]
pub enum CardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory mapping error: {0}")]
    Mmap(String),

    #[error("Invalid card size: {0:?}")]
    SizeInvalid(CardErrors),

    #[error("Header checksum is invalid")]
    HeaderChecksumInvalid,

    #[error("Both directory tables are invalid")]
    DirectoryTablesBothInvalid,

    #[error("Both block allocation tables are invalid")]
    AllocationTablesBothInvalid,

    #[error("Decode error: {what} needs {needed} bytes, got {got}")]
    Decode {
        what: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("Corrupt block chain starting at block {first_block}: {reason}")]
    ChainCorrupt { first_block: u16, reason: String },

    #[error("Block chain length {actual} does not match recorded block count {expected}")]
    ChainBlockCountMismatch { expected: u16, actual: u16 },

    #[error("Block {block} is already used by a regular file")]
    OverlapRejected { block: u16 },

    #[error("Block index {index} is out of range (card has {size} blocks)")]
    BlockOutOfRange { index: u32, size: u32 },

    #[error("Buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall { needed: usize, got: usize },

    #[error("Invalid table index: {0} (must be 0 or 1)")]
    InvalidTableIndex(u8),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CardError {
    pub fn decode(what: &'static str, needed: usize, got: usize) -> Self {
        CardError::Decode { what, needed, got }
    }

    pub fn chain_corrupt(first_block: u16, reason: impl Into<String>) -> Self {
        CardError::ChainCorrupt {
            first_block,
            reason: reason.into(),
        }
    }
}

/// Result type alias for card operations
pub type Result<T> = std::result::Result<T, CardError>;
