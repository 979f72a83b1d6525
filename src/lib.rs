//! GameCube memory card recovery engine
//!
//! This library parses memory card images and recovers lost save files:
//! - Typed big-endian decoders for the header, directory and block tables
//! - Dual 16-bit checksum verification behind a pluggable trait
//! - Active table selection that survives a corrupted copy
//! - Block chain resolution with loop and range protection
//! - Parallel scanning of unused blocks for lost directory entries using rayon
//! - Lost file reconstruction with overlap checks and change notifications
//! - JSON reports with SHA-256 digests

pub mod card;
pub mod chain;
pub mod checksum;
pub mod cli;
pub mod disk;
pub mod encoding;
pub mod error;
pub mod events;
pub mod file;
pub mod format;
pub mod layout;
pub mod recovery;
pub mod report;
pub mod scanner;
pub mod tables;
pub mod types;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use card::Card;
pub use chain::{contiguous_chain, resolve_chain, ChainResolution};
pub use checksum::{AddInvDual16, ChecksumAlgorithm, ChecksumValue};
pub use disk::CardImage;
pub use error::{CardError, Result};
pub use events::{CardEvent, CardObserver};
pub use file::{CardFile, ChainBasis, ChainIssues, LostInfo, Provenance};
pub use format::FormatOptions;
pub use layout::{BlockTable, CardHeader, DirEntry, DirectoryTable};
pub use scanner::{looks_like_direntry, CandidateSource, EntryScanner, SearchCandidate};
pub use tables::{select_active, ActiveSelection, TableManager};
pub use types::{CardErrors, Encoding, ScanConfig, BLOCK_SIZE, SYS_BLOCKS};
