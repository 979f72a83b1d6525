use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::CardError;

/// Size of one memory card block in bytes
pub const BLOCK_SIZE: usize = 0x2000;

/// Reserved system blocks: header, two directory tables, two block tables
pub const SYS_BLOCKS: u16 = 5;

/// Smallest valid card: 512 KiB (MC59)
pub const MIN_CARD_BYTES: u64 = 512 * 1024;

/// Largest valid card: 16 MiB (MC2043)
pub const MAX_CARD_BYTES: u64 = 16 * 1024 * 1024;

/// Block allocation entry: block is free
pub const BAT_FREE: u16 = 0x0000;

/// Block allocation entry: last block of a chain
pub const BAT_LAST: u16 = 0xFFFF;

bitflags! {
    /// Card-level error conditions, ordered by severity (lowest bit first).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CardErrors: u32 {
        /// Card is smaller than 512 KiB
        const SZ_TOO_SMALL = 0x01;
        /// Card is bigger than 16 MiB
        const SZ_TOO_BIG = 0x02;
        /// Card size is not a power of two
        const SZ_NON_POW2 = 0x04;
        /// Header checksum mismatch
        const INVALID_HEADER = 0x10;
        /// Both directory tables are invalid
        const INVALID_DATS = 0x20;
        /// Both block tables are invalid
        const INVALID_BATS = 0x40;
    }
}

impl CardErrors {
    pub const SIZE_ERRORS: CardErrors = CardErrors::SZ_TOO_SMALL
        .union(CardErrors::SZ_TOO_BIG)
        .union(CardErrors::SZ_NON_POW2);

    /// Size-related flags for an image of `len` bytes.
    pub fn for_image_size(len: u64) -> Self {
        let mut errors = CardErrors::empty();
        if len < MIN_CARD_BYTES {
            errors |= CardErrors::SZ_TOO_SMALL;
        } else if len > MAX_CARD_BYTES {
            errors |= CardErrors::SZ_TOO_BIG;
        }
        if !len.is_power_of_two() {
            errors |= CardErrors::SZ_NON_POW2;
        }
        errors
    }

    /// The single most severe condition currently set.
    pub fn most_severe(&self) -> Option<CardErrors> {
        self.iter().next()
    }

    /// Convert the most severe condition into an error value.
    pub fn to_error(&self) -> Option<CardError> {
        let worst = self.most_severe()?;
        Some(if CardErrors::SIZE_ERRORS.contains(worst) {
            CardError::SizeInvalid(*self & CardErrors::SIZE_ERRORS)
        } else if worst == CardErrors::INVALID_HEADER {
            CardError::HeaderChecksumInvalid
        } else if worst == CardErrors::INVALID_DATS {
            CardError::DirectoryTablesBothInvalid
        } else {
            CardError::AllocationTablesBothInvalid
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.iter_names().map(|(name, _)| name.to_string()).collect()
    }
}

/// Text encoding declared in the card header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Encoding {
    /// ISO-8859-1 / Windows-1252
    #[default]
    Ansi,
    /// Shift-JIS
    ShiftJis,
}

impl Encoding {
    pub fn from_raw(value: u16) -> Self {
        if value & 1 != 0 {
            Encoding::ShiftJis
        } else {
            Encoding::Ansi
        }
    }

    pub fn as_raw(&self) -> u16 {
        match self {
            Encoding::Ansi => 0,
            Encoding::ShiftJis => 1,
        }
    }

    /// Encoding to use for a file from the given region code.
    ///
    /// Japanese titles (`J` region) are always Shift-JIS; everything else
    /// follows the card-wide setting.
    pub fn for_region(&self, region: u8) -> Self {
        match region {
            b'J' => Encoding::ShiftJis,
            _ => *self,
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Ansi => write!(f, "ANSI"),
            Encoding::ShiftJis => write!(f, "Shift-JIS"),
        }
    }
}

/// Lost-file scanner configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Number of threads (0 = auto)
    pub num_threads: usize,

    /// Look for stale entries in the inactive directory table
    pub include_inactive_dat: bool,

    /// Look for entry-shaped data in unused data blocks
    pub scan_block_pool: bool,

    /// Byte alignment of candidate entries inside a block
    pub alignment: usize,

    /// Drop candidates that already exist in the active directory table
    pub skip_known: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            include_inactive_dat: true,
            scan_block_pool: true,
            alignment: 64,
            skip_known: true,
        }
    }
}
