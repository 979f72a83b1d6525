//! Search for directory entries of files the active tables no longer list.

pub mod parallel;

pub use parallel::EntryScanner;

use std::ops::Range;

use serde::Serialize;

use crate::layout::dir::FILENAME_LEN;
use crate::layout::DirEntry;
use crate::types::SYS_BLOCKS;

/// Where a candidate entry was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CandidateSource {
    /// A slot of the directory table copy that is not active
    InactiveDat,
    /// Entry-shaped bytes inside an unused data block
    BlockPool,
}

/// A directory entry that may describe a lost file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCandidate {
    pub entry: DirEntry,
    /// Absolute byte offset in the image
    pub offset: u64,
    pub source: CandidateSource,
    /// Blocks the file would occupy if stored contiguously. Recovery uses
    /// this range when the allocation table no longer links the file.
    pub blocks: Range<u16>,
}

impl SearchCandidate {
    pub fn new(entry: DirEntry, offset: u64, source: CandidateSource) -> Self {
        let blocks = entry.block..entry.block.saturating_add(entry.length);
        Self {
            entry,
            offset,
            source,
            blocks,
        }
    }

    /// Identity used to merge duplicate sightings of the same entry.
    pub fn key(&self) -> ([u8; 6], [u8; FILENAME_LEN], u16) {
        (self.entry.id6(), self.entry.filename, self.entry.block)
    }
}

fn is_code_byte(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit()
}

/// Heuristic check that a decoded entry looks like something a game wrote.
pub fn looks_like_direntry(entry: &DirEntry, size_in_blocks: u16) -> bool {
    if !entry.gamecode.iter().chain(entry.company.iter()).all(|&b| is_code_byte(b)) {
        return false;
    }
    if entry.pad_00 != 0xFF || entry.pad_01 != 0xFFFF {
        return false;
    }

    let size_no_sys = size_in_blocks.saturating_sub(SYS_BLOCKS);
    if entry.block < SYS_BLOCKS || entry.block >= size_in_blocks {
        return false;
    }
    if entry.length == 0 || entry.length > size_no_sys {
        return false;
    }
    if entry.block as u32 + entry.length as u32 > size_in_blocks as u32 {
        return false;
    }

    // Shift-JIS lead bytes are >= 0x81.
    let first = entry.filename[0];
    first.is_ascii_graphic() || first >= 0x81
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::dir::tests::entry;

    #[test]
    fn test_shape_accepts_real_entry() {
        assert!(looks_like_direntry(&entry(b"GALE", "smash", 5, 11), 64));
        assert!(looks_like_direntry(&entry(b"GM4P", "mk", 60, 4), 64));
    }

    #[test]
    fn test_shape_rejects_noise() {
        assert!(!looks_like_direntry(&entry(b"gale", "smash", 5, 1), 64));
        assert!(!looks_like_direntry(&entry(b"GALE", "", 5, 1), 64));
        assert!(!looks_like_direntry(&entry(b"GALE", "smash", 4, 1), 64));
        assert!(!looks_like_direntry(&entry(b"GALE", "smash", 5, 0), 64));
        assert!(!looks_like_direntry(&entry(b"GALE", "smash", 61, 4), 64));

        let mut e = entry(b"GALE", "smash", 5, 1);
        e.pad_00 = 0;
        assert!(!looks_like_direntry(&e, 64));
        assert!(!looks_like_direntry(&DirEntry::unused(), 64));
    }

    #[test]
    fn test_candidate_hint_and_key() {
        let c = SearchCandidate::new(entry(b"GALE", "smash", 10, 3), 0x4000, CandidateSource::InactiveDat);
        assert_eq!(c.blocks, 10..13);
        assert_eq!(c.key().2, 10);
        assert_eq!(&c.key().0, b"GALE01");
    }
}
