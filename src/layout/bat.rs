use byteorder::{BigEndian, ByteOrder};

use super::ensure_len;
use crate::checksum::{self, AddInvDual16, ChecksumValue};
use crate::error::Result;
use crate::types::{BAT_FREE, BLOCK_SIZE, SYS_BLOCKS};

/// Block table field offsets
const BAT_CHECKSUM: usize = 0x0000;
const BAT_UPDATE_COUNTER: usize = 0x0004;
const BAT_FREE_BLOCKS: usize = 0x0006;
const BAT_LAST_ALLOC: usize = 0x0008;
const BAT_ENTRIES: usize = 0x000A;

/// Number of allocation entries in one table (blocks 5..4096)
pub const BAT_ENTRY_COUNT: usize = 0xFFB;

/// One decoded block allocation table copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTable {
    pub update_counter: u16,
    pub free_blocks: u16,
    pub last_alloc: u16,
    /// Entry `i` describes block `i + 5`
    pub entries: Vec<u16>,
    pub stored_checksum: u32,
}

impl BlockTable {
    pub fn parse(block: &[u8]) -> Result<Self> {
        ensure_len(block, BLOCK_SIZE, "block allocation table")?;

        let entries = block[BAT_ENTRIES..BAT_ENTRIES + BAT_ENTRY_COUNT * 2]
            .chunks_exact(2)
            .map(BigEndian::read_u16)
            .collect();

        Ok(Self {
            update_counter: BigEndian::read_u16(&block[BAT_UPDATE_COUNTER..]),
            free_blocks: BigEndian::read_u16(&block[BAT_FREE_BLOCKS..]),
            last_alloc: BigEndian::read_u16(&block[BAT_LAST_ALLOC..]),
            entries,
            stored_checksum: BigEndian::read_u32(&block[BAT_CHECKSUM..]),
        })
    }

    /// Checksum covers everything after the checksum itself.
    pub fn checksum(block: &[u8]) -> Result<ChecksumValue> {
        checksum::verify_region(&AddInvDual16, block, BAT_UPDATE_COUNTER..BLOCK_SIZE, BAT_CHECKSUM)
    }

    /// Freshly formatted table: every data block free.
    pub fn formatted(update_counter: u16, size_in_blocks: u16) -> Self {
        Self {
            update_counter,
            free_blocks: size_in_blocks.saturating_sub(SYS_BLOCKS),
            last_alloc: SYS_BLOCKS - 1,
            entries: vec![BAT_FREE; BAT_ENTRY_COUNT],
            stored_checksum: 0,
        }
    }

    /// Allocation entry for `block`, or `None` for system blocks and
    /// blocks past the end of the table.
    pub fn entry(&self, block: u16) -> Option<u16> {
        let idx = block.checked_sub(SYS_BLOCKS)? as usize;
        self.entries.get(idx).copied()
    }

    pub fn set_entry(&mut self, block: u16, value: u16) -> bool {
        match block.checked_sub(SYS_BLOCKS) {
            Some(idx) if (idx as usize) < self.entries.len() => {
                self.entries[idx as usize] = value;
                true
            }
            _ => false,
        }
    }

    /// Number of free entries among the card's data blocks.
    pub fn count_free(&self, size_in_blocks: u16) -> u16 {
        (SYS_BLOCKS..size_in_blocks)
            .filter(|&b| self.entry(b) == Some(BAT_FREE))
            .count() as u16
    }

    /// The recorded free-block counter agrees with the entries.
    pub fn is_consistent(&self, size_in_blocks: u16) -> bool {
        self.count_free(size_in_blocks) == self.free_blocks
    }

    pub fn write_to(&self, block: &mut [u8]) -> Result<u32> {
        ensure_len(block, BLOCK_SIZE, "block allocation table")?;

        block.fill(0);
        BigEndian::write_u16(&mut block[BAT_UPDATE_COUNTER..], self.update_counter);
        BigEndian::write_u16(&mut block[BAT_FREE_BLOCKS..], self.free_blocks);
        BigEndian::write_u16(&mut block[BAT_LAST_ALLOC..], self.last_alloc);
        for (i, value) in self.entries.iter().take(BAT_ENTRY_COUNT).enumerate() {
            let off = BAT_ENTRIES + i * 2;
            BigEndian::write_u16(&mut block[off..off + 2], *value);
        }
        checksum::store(&AddInvDual16, block, BAT_UPDATE_COUNTER..BLOCK_SIZE, BAT_CHECKSUM)
    }
}
