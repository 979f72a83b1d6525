//! Block chain resolution over a block allocation table.

use ahash::AHashSet;
use log::debug;

use crate::error::{CardError, Result};
use crate::layout::BlockTable;
use crate::types::{BAT_FREE, BAT_LAST, SYS_BLOCKS};

/// Outcome of walking a chain.
///
/// A walk that hits damage part way through still returns the blocks it
/// collected; `corrupt` says why it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainResolution {
    pub blocks: Vec<u16>,
    pub corrupt: Option<String>,
    /// `(expected, actual)` when the chain length disagrees with the entry
    pub count_mismatch: Option<(u16, u16)>,
}

impl ChainResolution {
    pub fn is_clean(&self) -> bool {
        self.corrupt.is_none() && self.count_mismatch.is_none()
    }

    /// Mismatch as an error value, for callers that want to surface it.
    pub fn mismatch_error(&self) -> Option<CardError> {
        self.count_mismatch
            .map(|(expected, actual)| CardError::ChainBlockCountMismatch { expected, actual })
    }
}

fn in_data_range(block: u16, size_in_blocks: u16) -> bool {
    block >= SYS_BLOCKS && block < size_in_blocks
}

/// Follow the allocation table from `first_block` until an end-of-chain
/// marker.
pub fn resolve_chain(
    bat: &BlockTable,
    first_block: u16,
    expected_len: u16,
    size_in_blocks: u16,
) -> Result<ChainResolution> {
    if !in_data_range(first_block, size_in_blocks) {
        return Err(CardError::chain_corrupt(
            first_block,
            format!("first block outside data range {}..{}", SYS_BLOCKS, size_in_blocks),
        ));
    }
    if bat.entry(first_block) == Some(BAT_FREE) {
        return Err(CardError::chain_corrupt(first_block, "first block is marked free"));
    }

    let max_steps = size_in_blocks.saturating_sub(SYS_BLOCKS) as usize;
    let mut blocks = Vec::with_capacity(expected_len as usize);
    let mut visited = AHashSet::with_capacity(expected_len as usize);
    let mut corrupt = None;
    let mut block = first_block;

    loop {
        if blocks.len() >= max_steps {
            corrupt = Some(format!("chain longer than {} data blocks", max_steps));
            break;
        }
        if !visited.insert(block) {
            corrupt = Some(format!("block {} visited twice", block));
            break;
        }
        blocks.push(block);

        let next = match bat.entry(block) {
            Some(next) => next,
            None => {
                corrupt = Some(format!("no allocation entry for block {}", block));
                break;
            }
        };
        match next {
            BAT_LAST => break,
            BAT_FREE => {
                corrupt = Some(format!("block {} links to a free entry", block));
                break;
            }
            n if n < SYS_BLOCKS => {
                corrupt = Some(format!("block {} links to system block {}", block, n));
                break;
            }
            n if n >= size_in_blocks => {
                corrupt = Some(format!("block {} links past the end of the card ({})", block, n));
                break;
            }
            n => block = n,
        }
    }

    if let Some(reason) = &corrupt {
        debug!("chain at {}: {}", first_block, reason);
    }

    let actual = blocks.len() as u16;
    let count_mismatch = (actual != expected_len).then_some((expected_len, actual));

    Ok(ChainResolution {
        blocks,
        corrupt,
        count_mismatch,
    })
}

/// Consecutive blocks `first_block..first_block + len`, for files whose
/// allocation entries have already been released.
pub fn contiguous_chain(first_block: u16, len: u16, size_in_blocks: u16) -> Result<Vec<u16>> {
    if len == 0 {
        return Err(CardError::chain_corrupt(first_block, "zero-length file"));
    }
    let end = first_block as u32 + len as u32;
    if !in_data_range(first_block, size_in_blocks) || end > size_in_blocks as u32 {
        return Err(CardError::chain_corrupt(
            first_block,
            format!("blocks {}..{} exceed the card ({} blocks)", first_block, end, size_in_blocks),
        ));
    }
    Ok((first_block..end as u16).collect())
}
