use std::ops::Range;

use ahash::AHashSet;
use log::{debug, info, warn};

use crate::card::Card;
use crate::chain::{contiguous_chain, resolve_chain};
use crate::error::{CardError, Result};
use crate::file::{CardFile, ChainBasis, ChainIssues, LostInfo};
use crate::layout::DirEntry;
use crate::scanner::{looks_like_direntry, SearchCandidate};
use crate::types::SYS_BLOCKS;

/// Reject a chain that touches a regular file or an already reserved block.
fn check_overlap(card: &Card, chain: &[u16], reserved: &AHashSet<u16>) -> Result<()> {
    let used = card.used_block_map();
    for &block in chain {
        let claimed = used.get(block as usize).copied().unwrap_or(0) > 0;
        if claimed || reserved.contains(&block) {
            return Err(CardError::OverlapRejected { block });
        }
    }
    Ok(())
}

fn check_entry(entry: &DirEntry) -> Result<()> {
    if entry.is_unused() {
        return Err(CardError::InvalidArgument(
            "directory entry is unused".to_string(),
        ));
    }
    Ok(())
}

/// Build a lost file record, preferring the active allocation table and
/// falling back to the contiguous block range the entry describes.
pub fn build_lost_file(card: &Card, entry: &DirEntry, reserved: &AHashSet<u16>) -> Result<CardFile> {
    let range = entry.block..entry.block.saturating_add(entry.length);
    build_lost_file_in(card, entry, range, reserved)
}

/// Like [`build_lost_file`], with the contiguous fallback taken from `range`.
fn build_lost_file_in(
    card: &Card,
    entry: &DirEntry,
    range: Range<u16>,
    reserved: &AHashSet<u16>,
) -> Result<CardFile> {
    check_entry(entry)?;
    let size = card.size_in_blocks();

    let walked = match resolve_chain(card.active_bat(), entry.block, entry.length, size) {
        Ok(res) if res.corrupt.is_none() => {
            let issues = ChainIssues::from(&res);
            return finish(card, entry, res.blocks, ChainBasis::AllocationTable, issues, reserved);
        }
        Ok(res) => {
            debug!("BAT walk for {} is damaged, trying contiguous range", entry.id6_string());
            Some(res)
        }
        Err(err) => {
            debug!("BAT walk for {} failed: {}", entry.id6_string(), err);
            None
        }
    };

    let len = range.end.saturating_sub(range.start);
    match contiguous_chain(range.start, len, size) {
        Ok(chain) => finish(card, entry, chain, ChainBasis::Contiguous, ChainIssues::default(), reserved),
        Err(err) => match walked {
            Some(res) if !res.blocks.is_empty() => {
                let issues = ChainIssues::from(&res);
                finish(card, entry, res.blocks, ChainBasis::AllocationTable, issues, reserved)
            }
            _ => Err(err),
        },
    }
}

/// Build a lost file record from a caller-supplied chain.
pub fn build_lost_file_with_chain(
    card: &Card,
    entry: &DirEntry,
    chain: Vec<u16>,
    reserved: &AHashSet<u16>,
) -> Result<CardFile> {
    check_entry(entry)?;
    let size = card.size_in_blocks();
    let first = chain.first().copied().unwrap_or(entry.block);

    if chain.is_empty() {
        return Err(CardError::chain_corrupt(first, "empty chain"));
    }
    let mut seen = AHashSet::with_capacity(chain.len());
    for &block in &chain {
        if block < SYS_BLOCKS || block >= size {
            return Err(CardError::chain_corrupt(
                first,
                format!("block {} is not a data block", block),
            ));
        }
        if !seen.insert(block) {
            return Err(CardError::chain_corrupt(
                first,
                format!("block {} appears twice", block),
            ));
        }
    }

    let actual = chain.len() as u16;
    let issues = ChainIssues {
        count_mismatch: (actual != entry.length).then_some((entry.length, actual)),
        ..Default::default()
    };
    finish(card, entry, chain, ChainBasis::Explicit, issues, reserved)
}

fn finish(
    card: &Card,
    entry: &DirEntry,
    chain: Vec<u16>,
    basis: ChainBasis,
    issues: ChainIssues,
    reserved: &AHashSet<u16>,
) -> Result<CardFile> {
    check_overlap(card, &chain, reserved)?;
    let info = LostInfo {
        basis,
        shape_match: looks_like_direntry(entry, card.size_in_blocks()),
    };
    info!(
        "Recovered {} \"{}\": {} blocks via {:?}",
        entry.id6_string(),
        String::from_utf8_lossy(&entry.filename).trim_end_matches('\0'),
        chain.len(),
        basis
    );
    Ok(CardFile::lost(entry.clone(), chain, info, issues, card.encoding()))
}

/// Validate every candidate independently and keep the acceptable ones.
/// Candidates may not overlap regular files, earlier lost files or each
/// other. A non-empty `blocks` hint replaces the entry's own range for the
/// contiguous fallback.
pub fn build_lost_files(card: &Card, candidates: &[SearchCandidate]) -> Vec<CardFile> {
    let mut reserved = card.lost_blocks();
    let mut accepted = Vec::new();

    for candidate in candidates {
        let range = if candidate.blocks.is_empty() {
            candidate.entry.block..candidate.entry.block.saturating_add(candidate.entry.length)
        } else {
            candidate.blocks.clone()
        };
        match build_lost_file_in(card, &candidate.entry, range, &reserved) {
            Ok(file) => {
                reserved.extend(file.chain().iter().copied());
                accepted.push(file);
            }
            Err(err) => warn!(
                "Rejected candidate {} at 0x{:X}: {}",
                candidate.entry.id6_string(),
                candidate.offset,
                err
            ),
        }
    }
    accepted
}
