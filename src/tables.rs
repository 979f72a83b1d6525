//! Directory and block allocation table management.
//!
//! A card carries two copies of each table. Each copy is validated on its own
//! (checksum, plus the free-block counter for block tables), then one copy of
//! each kind is made active: the copy the card itself prefers (higher update
//! counter) if it is valid, otherwise the other valid copy. The manager only
//! holds table data; the card reloads its file list when an index changes.

use log::{debug, warn};

use crate::checksum::ChecksumValue;
use crate::disk::CardImage;
use crate::error::{CardError, Result};
use crate::layout::{bat_block, dat_block, BlockTable, DirectoryTable};
use crate::types::CardErrors;

/// One table copy together with its validation result.
#[derive(Debug, Clone)]
pub struct ValidatedTable<T> {
    pub table: T,
    pub checksum: ChecksumValue,
    pub valid: bool,
    /// Set when the copy could not be decoded at all
    pub decode_error: Option<String>,
}

impl<T> ValidatedTable<T> {
    fn undecodable(table: T, err: &CardError) -> Self {
        Self {
            table,
            checksum: ChecksumValue::default(),
            valid: false,
            decode_error: Some(err.to_string()),
        }
    }
}

/// Parse directory table copy `copy` and verify its checksum.
pub fn load_dat(image: &CardImage, copy: u8) -> Result<ValidatedTable<DirectoryTable>> {
    check_copy(copy)?;
    let block = image.block(dat_block(copy) as u32)?;
    let table = DirectoryTable::parse(block)?;
    let checksum = DirectoryTable::checksum(block)?;
    Ok(ValidatedTable {
        valid: checksum.is_valid(),
        table,
        checksum,
        decode_error: None,
    })
}

/// Parse block table copy `copy`, verify its checksum and free-block counter.
pub fn load_bat(image: &CardImage, copy: u8, size_in_blocks: u16) -> Result<ValidatedTable<BlockTable>> {
    check_copy(copy)?;
    let block = image.block(bat_block(copy) as u32)?;
    let table = BlockTable::parse(block)?;
    let checksum = BlockTable::checksum(block)?;
    let consistent = table.is_consistent(size_in_blocks);
    if checksum.is_valid() && !consistent {
        debug!(
            "BAT {}: free counter {} disagrees with {} free entries",
            copy,
            table.free_blocks,
            table.count_free(size_in_blocks)
        );
    }
    Ok(ValidatedTable {
        valid: checksum.is_valid() && consistent,
        table,
        checksum,
        decode_error: None,
    })
}

fn check_copy(copy: u8) -> Result<()> {
    if copy > 1 {
        return Err(CardError::InvalidTableIndex(copy));
    }
    Ok(())
}

/// Copy the card itself considers current: the higher update counter,
/// compared with 16-bit wraparound. Ties go to copy 0.
pub fn header_preference(counter0: u16, counter1: u16) -> u8 {
    if (counter1.wrapping_sub(counter0) as i16) > 0 {
        1
    } else {
        0
    }
}

/// Outcome of choosing an active table copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSelection {
    Active(u8),
    /// Neither copy is valid; `fallback` is used so the card stays readable.
    BothInvalid { fallback: u8 },
}

impl ActiveSelection {
    pub fn index(&self) -> u8 {
        match *self {
            ActiveSelection::Active(idx) => idx,
            ActiveSelection::BothInvalid { fallback } => fallback,
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, ActiveSelection::Active(_))
    }
}

pub fn select_active(preference: u8, valid0: bool, valid1: bool) -> ActiveSelection {
    let valid = [valid0, valid1];
    let preference = preference & 1;
    let other = preference ^ 1;
    if valid[preference as usize] {
        ActiveSelection::Active(preference)
    } else if valid[other as usize] {
        ActiveSelection::Active(other)
    } else {
        ActiveSelection::BothInvalid { fallback: preference }
    }
}

/// Both copies of one table kind plus the selection state.
#[derive(Debug, Clone)]
pub struct TablePair<T> {
    copies: [ValidatedTable<T>; 2],
    preference: u8,
    selection: ActiveSelection,
    active: u8,
}

impl<T> TablePair<T> {
    fn new(copies: [ValidatedTable<T>; 2], preference: u8) -> Self {
        let selection = select_active(preference, copies[0].valid, copies[1].valid);
        Self {
            copies,
            preference,
            selection,
            active: selection.index(),
        }
    }

    pub fn active(&self) -> &T {
        &self.copies[self.active as usize].table
    }

    pub fn inactive(&self) -> &T {
        &self.copies[(self.active ^ 1) as usize].table
    }

    pub fn active_idx(&self) -> u8 {
        self.active
    }

    /// Copy the card would use, or `None` if both copies are invalid.
    pub fn hdr_idx(&self) -> Option<u8> {
        match self.selection {
            ActiveSelection::Active(idx) => Some(idx),
            ActiveSelection::BothInvalid { .. } => None,
        }
    }

    /// Copy with the newer update counter, regardless of validity.
    pub fn preference(&self) -> u8 {
        self.preference
    }

    pub fn selection(&self) -> ActiveSelection {
        self.selection
    }

    pub fn copy(&self, idx: u8) -> Option<&ValidatedTable<T>> {
        self.copies.get(idx as usize)
    }

    pub fn is_valid(&self, idx: u8) -> bool {
        self.copy(idx).map(|c| c.valid).unwrap_or(false)
    }

    pub fn both_invalid(&self) -> bool {
        !self.selection.is_usable()
    }

    /// Returns whether the active index changed.
    fn set_active(&mut self, idx: u8) -> Result<bool> {
        check_copy(idx)?;
        if self.active == idx {
            return Ok(false);
        }
        self.active = idx;
        Ok(true)
    }
}

/// Owns both directory tables and both block tables of a card.
#[derive(Debug, Clone)]
pub struct TableManager {
    dats: TablePair<DirectoryTable>,
    bats: TablePair<BlockTable>,
}

impl TableManager {
    /// Load and validate all four tables. Never fails: an undecodable copy is
    /// recorded as invalid and selection proceeds without it. `Card` rejects
    /// images missing a system block, so it never takes this path.
    pub fn load(image: &CardImage, size_in_blocks: u16) -> Self {
        let dats = [0u8, 1].map(|copy| {
            load_dat(image, copy).unwrap_or_else(|err| {
                warn!("DAT {} could not be decoded: {}", copy, err);
                ValidatedTable::undecodable(DirectoryTable::empty(0), &err)
            })
        });
        let bats = [0u8, 1].map(|copy| {
            load_bat(image, copy, size_in_blocks).unwrap_or_else(|err| {
                warn!("BAT {} could not be decoded: {}", copy, err);
                ValidatedTable::undecodable(BlockTable::formatted(0, size_in_blocks), &err)
            })
        });

        let dat_pref = header_preference(dats[0].table.update_counter, dats[1].table.update_counter);
        let bat_pref = header_preference(bats[0].table.update_counter, bats[1].table.update_counter);
        let manager = Self {
            dats: TablePair::new(dats, dat_pref),
            bats: TablePair::new(bats, bat_pref),
        };

        debug!(
            "DAT valid [{}, {}] active {:?}; BAT valid [{}, {}] active {:?}",
            manager.dats.is_valid(0),
            manager.dats.is_valid(1),
            manager.dats.selection(),
            manager.bats.is_valid(0),
            manager.bats.is_valid(1),
            manager.bats.selection()
        );
        if manager.dats.both_invalid() {
            warn!("both directory tables are invalid");
        }
        if manager.bats.both_invalid() {
            warn!("both block allocation tables are invalid");
        }
        manager
    }

    pub fn dats(&self) -> &TablePair<DirectoryTable> {
        &self.dats
    }

    pub fn bats(&self) -> &TablePair<BlockTable> {
        &self.bats
    }

    pub fn active_dat(&self) -> &DirectoryTable {
        self.dats.active()
    }

    pub fn active_bat(&self) -> &BlockTable {
        self.bats.active()
    }

    pub fn set_active_dat(&mut self, idx: u8) -> Result<bool> {
        self.dats.set_active(idx)
    }

    pub fn set_active_bat(&mut self, idx: u8) -> Result<bool> {
        self.bats.set_active(idx)
    }

    /// Table-related error flags.
    pub fn errors(&self) -> CardErrors {
        let mut errors = CardErrors::empty();
        if self.dats.both_invalid() {
            errors |= CardErrors::INVALID_DATS;
        }
        if self.bats.both_invalid() {
            errors |= CardErrors::INVALID_BATS;
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::CardBuilder;
    use crate::types::BLOCK_SIZE;

    #[test]
    fn test_header_preference_wraps() {
        assert_eq!(header_preference(0, 1), 1);
        assert_eq!(header_preference(5, 3), 0);
        assert_eq!(header_preference(7, 7), 0);
        assert_eq!(header_preference(0xFFFF, 0x0000), 1);
        assert_eq!(header_preference(0x0001, 0xFFFE), 0);
    }

    #[test]
    fn test_select_active() {
        assert_eq!(select_active(1, true, true), ActiveSelection::Active(1));
        assert_eq!(select_active(1, true, false), ActiveSelection::Active(0));
        assert_eq!(select_active(0, false, true), ActiveSelection::Active(1));
        assert_eq!(
            select_active(1, false, false),
            ActiveSelection::BothInvalid { fallback: 1 }
        );
        assert_eq!(select_active(1, false, false).index(), 1);
    }

    #[test]
    fn test_load_selects_newer_valid_copies() {
        let image = CardBuilder::new(64).build_image();
        let tables = TableManager::load(&image, 64);
        assert_eq!(tables.dats().active_idx(), 1);
        assert_eq!(tables.bats().active_idx(), 1);
        assert!(tables.dats().copy(1).unwrap().checksum.is_valid());
        assert!(tables.bats().copy(1).unwrap().checksum.is_valid());
        assert_eq!(tables.errors(), CardErrors::empty());
    }

    #[test]
    fn test_invalid_preferred_copy_falls_back() {
        let image = CardBuilder::new(64).corrupt_dat(1).corrupt_bat(1).build_image();
        let tables = TableManager::load(&image, 64);
        assert_eq!(tables.dats().preference(), 1);
        assert_eq!(tables.dats().active_idx(), 0);
        assert_eq!(tables.dats().hdr_idx(), Some(0));
        assert_eq!(tables.bats().active_idx(), 0);
        assert!(tables.dats().copy(0).unwrap().checksum.is_valid());
        assert_eq!(tables.errors(), CardErrors::empty());
    }

    #[test]
    fn test_both_invalid_is_flagged() {
        let image = CardBuilder::new(64)
            .corrupt_dat(0)
            .corrupt_dat(1)
            .corrupt_bat(0)
            .corrupt_bat(1)
            .build_image();
        let tables = TableManager::load(&image, 64);
        assert_eq!(tables.dats().hdr_idx(), None);
        assert_eq!(tables.bats().hdr_idx(), None);
        assert_eq!(
            tables.errors(),
            CardErrors::INVALID_DATS | CardErrors::INVALID_BATS
        );
    }

    #[test]
    fn test_free_counter_mismatch_invalidates_bat() {
        let image = CardBuilder::new(64).bat_free_counter(1, 3).build_image();
        let tables = TableManager::load(&image, 64);
        let copy = tables.bats().copy(1).unwrap();
        assert!(copy.checksum.is_valid());
        assert!(!copy.valid);
        assert_eq!(tables.bats().active_idx(), 0);
    }

    #[test]
    fn test_set_active() {
        let image = CardBuilder::new(64).build_image();
        let mut tables = TableManager::load(&image, 64);
        assert!(!tables.set_active_dat(1).unwrap());
        assert!(tables.set_active_dat(0).unwrap());
        assert_eq!(tables.dats().active_idx(), 0);
        assert_eq!(tables.dats().hdr_idx(), Some(1));
        assert!(matches!(
            tables.set_active_bat(2),
            Err(CardError::InvalidTableIndex(2))
        ));
    }

    #[test]
    fn test_undecodable_copies_are_invalid() {
        let data = CardBuilder::new(64).build();
        let short = CardImage::from_bytes(data[..BLOCK_SIZE * 2].to_vec());
        assert!(matches!(
            load_dat(&short, 1),
            Err(CardError::BlockOutOfRange { index: 2, size: 2 })
        ));

        let tables = TableManager::load(&short, 64);
        assert!(tables.dats().is_valid(0));
        assert!(tables.dats().copy(1).unwrap().decode_error.is_some());
        assert_eq!(tables.dats().active_idx(), 0);
        assert!(tables.bats().copy(0).unwrap().decode_error.is_some());
        assert!(tables.bats().copy(1).unwrap().decode_error.is_some());
        assert_eq!(tables.errors(), CardErrors::INVALID_BATS);
        assert_eq!(tables.active_bat().count_free(64), 59);
    }

    #[test]
    fn test_load_rejects_bad_copy_index() {
        let image = CardBuilder::new(64).build_image();
        assert!(load_dat(&image, 2).is_err());
    }
}
