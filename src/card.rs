//! The card façade: one open image with its validated tables and file list.
//!
//! Regular files come first in the list, in directory-table order; lost files
//! added by the recovery builder follow them. Switching the active directory
//! or block table rebuilds the regular list and drops all lost files.

use std::path::Path;

use ahash::AHashSet;
use log::{debug, info, warn};

use crate::chain::resolve_chain;
use crate::checksum::ChecksumValue;
use crate::disk::CardImage;
use crate::error::{CardError, Result};
use crate::events::{CardEvent, CardObserver, EventBus};
use crate::file::{CardFile, ChainIssues};
use crate::format::{self, FormatOptions};
use crate::layout::{BlockTable, CardHeader, DirEntry, DirectoryTable, HEADER_BLOCK};
use crate::recovery;
use crate::scanner::SearchCandidate;
use crate::tables::TableManager;
use crate::types::{CardErrors, Encoding, BLOCK_SIZE, SYS_BLOCKS};

pub struct Card {
    image: CardImage,
    header: CardHeader,
    header_checksum: ChecksumValue,
    size_errors: CardErrors,
    size_in_blocks: u16,
    tables: TableManager,
    files: Vec<CardFile>,
    num_regular: usize,
    used_blocks: Vec<u8>,
    events: EventBus,
}

impl std::fmt::Debug for Card {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Card")
            .field("image", &self.image)
            .field("size_in_blocks", &self.size_in_blocks)
            .field("files", &self.files.len())
            .field("errors", &self.errors())
            .finish()
    }
}

impl Card {
    /// Open a card image file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let image = CardImage::open(path)?;
        Self::load(image)
    }

    /// Open an in-memory card image.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::load(CardImage::from_bytes(data))
    }

    /// Write a blank card to `path` and open it.
    pub fn format<P: AsRef<Path>>(path: P, options: &FormatOptions) -> Result<Self> {
        format::write_image(path.as_ref(), options)?;
        Self::open(path)
    }

    fn load(image: CardImage) -> Result<Self> {
        let len = image.len();
        let min_len = SYS_BLOCKS as u64 * BLOCK_SIZE as u64;
        if len < min_len {
            return Err(CardError::decode("card image", min_len as usize, len as usize));
        }
        if len % BLOCK_SIZE as u64 != 0 {
            warn!(
                "Ignoring {} trailing bytes after the last whole block",
                len % BLOCK_SIZE as u64
            );
        }

        let size_errors = CardErrors::for_image_size(len);
        if !size_errors.is_empty() {
            warn!("Unusual card size {} bytes: {:?}", len, size_errors);
        }
        let size_in_blocks = image.block_count().min(u16::MAX as u32) as u16;

        let header_block = image.block(HEADER_BLOCK as u32)?;
        let header = CardHeader::parse(header_block)?;
        let header_checksum = CardHeader::checksum(header_block)?;
        if !header_checksum.is_valid() {
            warn!("Header checksum mismatch: {}", header_checksum);
        }
        if header.size_in_blocks_hint() != size_in_blocks as u32 {
            warn!(
                "Header declares {} blocks, image holds {}",
                header.size_in_blocks_hint(),
                size_in_blocks
            );
        }

        let tables = TableManager::load(&image, size_in_blocks);

        let mut card = Self {
            image,
            header,
            header_checksum,
            size_errors,
            size_in_blocks,
            tables,
            files: Vec::new(),
            num_regular: 0,
            used_blocks: Vec::new(),
            events: EventBus::default(),
        };
        let (files, used) = card.build_regular_files();
        card.num_regular = files.len();
        card.files = files;
        card.used_blocks = used;

        info!(
            "Loaded card: {} blocks, {} files, {} free",
            card.size_in_blocks,
            card.num_files(),
            card.free_blocks()
        );
        Ok(card)
    }

    /// Resolve every used entry of the active directory table against the
    /// active block table.
    fn build_regular_files(&self) -> (Vec<CardFile>, Vec<u8>) {
        let size = self.size_in_blocks;
        let mut used = vec![0u8; size as usize];
        for slot in used.iter_mut().take(SYS_BLOCKS as usize) {
            *slot = 1;
        }

        let bat = self.tables.active_bat();
        let encoding = self.encoding();
        let mut files = Vec::new();

        for (idx, entry) in self.tables.active_dat().used_entries() {
            let res = match resolve_chain(bat, entry.block, entry.length, size) {
                Ok(res) => res,
                Err(err) => {
                    warn!("Skipping {} ({}): {}", entry.id6_string(), idx, err);
                    continue;
                }
            };

            let mut file = CardFile::regular(
                entry.clone(),
                idx,
                res.blocks.clone(),
                ChainIssues::from(&res),
                encoding,
            );
            for &block in &res.blocks {
                let slot = &mut used[block as usize];
                *slot = slot.saturating_add(1);
                if *slot > 1 {
                    file.mark_cross_linked();
                }
            }
            if file.issues().cross_linked {
                warn!("File {} shares blocks with an earlier file", idx);
            }
            files.push(file);
        }

        (files, used)
    }

    pub fn subscribe(&mut self, observer: Box<dyn CardObserver>) {
        self.events.subscribe(observer);
    }

    // Projections

    pub fn image(&self) -> &CardImage {
        &self.image
    }

    pub fn header(&self) -> &CardHeader {
        &self.header
    }

    pub fn tables(&self) -> &TableManager {
        &self.tables
    }

    pub fn path(&self) -> Option<&Path> {
        self.image.path()
    }

    /// Image size in bytes
    pub fn filesize(&self) -> u64 {
        self.image.len()
    }

    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    pub fn size_in_blocks(&self) -> u16 {
        self.size_in_blocks
    }

    pub fn size_in_blocks_no_sys(&self) -> u16 {
        self.size_in_blocks.saturating_sub(SYS_BLOCKS)
    }

    /// Free-block counter of the active block table.
    pub fn free_blocks(&self) -> u16 {
        self.tables.active_bat().free_blocks
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn num_regular_files(&self) -> usize {
        self.num_regular
    }

    pub fn num_lost_files(&self) -> usize {
        self.files.len() - self.num_regular
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file(&self, idx: usize) -> Option<&CardFile> {
        self.files.get(idx)
    }

    pub fn files(&self) -> &[CardFile] {
        &self.files
    }

    pub fn lost_files(&self) -> &[CardFile] {
        &self.files[self.num_regular..]
    }

    /// Regular-file claims per block; system blocks are marked as used.
    pub fn used_block_map(&self) -> &[u8] {
        &self.used_blocks
    }

    pub fn header_checksum_value(&self) -> ChecksumValue {
        self.header_checksum
    }

    /// Error conditions of the current state.
    pub fn errors(&self) -> CardErrors {
        let mut errors = self.size_errors;
        if !self.header_checksum.is_valid() {
            errors |= CardErrors::INVALID_HEADER;
        }
        errors | self.tables.errors()
    }

    pub fn serial_number(&self) -> String {
        self.header.serial_number()
    }

    pub fn encoding(&self) -> Encoding {
        self.header.encoding()
    }

    pub fn active_dat(&self) -> &DirectoryTable {
        self.tables.active_dat()
    }

    pub fn active_bat(&self) -> &BlockTable {
        self.tables.active_bat()
    }

    pub fn active_dat_idx(&self) -> u8 {
        self.tables.dats().active_idx()
    }

    pub fn active_dat_hdr_idx(&self) -> Option<u8> {
        self.tables.dats().hdr_idx()
    }

    pub fn is_dat_valid(&self, idx: u8) -> bool {
        self.tables.dats().is_valid(idx)
    }

    pub fn active_bat_idx(&self) -> u8 {
        self.tables.bats().active_idx()
    }

    pub fn active_bat_hdr_idx(&self) -> Option<u8> {
        self.tables.bats().hdr_idx()
    }

    pub fn is_bat_valid(&self, idx: u8) -> bool {
        self.tables.bats().is_valid(idx)
    }

    /// Zero-copy view of block `idx`.
    pub fn block(&self, idx: u16) -> Result<&[u8]> {
        if idx >= self.size_in_blocks {
            return Err(CardError::BlockOutOfRange {
                index: idx as u32,
                size: self.size_in_blocks as u32,
            });
        }
        self.image.block(idx as u32)
    }

    /// Copy block `idx` into `buf`, returning the number of bytes written.
    pub fn read_block(&self, idx: u16, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < BLOCK_SIZE {
            return Err(CardError::BufferTooSmall {
                needed: BLOCK_SIZE,
                got: buf.len(),
            });
        }
        let data = self.block(idx)?;
        buf[..BLOCK_SIZE].copy_from_slice(data);
        Ok(BLOCK_SIZE)
    }

    // Active table selection

    pub fn set_active_dat_idx(&mut self, idx: u8) -> Result<()> {
        if idx > 1 {
            return Err(CardError::InvalidTableIndex(idx));
        }
        if idx == self.active_dat_idx() {
            return Ok(());
        }
        self.switch_tables(|tables| tables.set_active_dat(idx))
    }

    pub fn set_active_bat_idx(&mut self, idx: u8) -> Result<()> {
        if idx > 1 {
            return Err(CardError::InvalidTableIndex(idx));
        }
        if idx == self.active_bat_idx() {
            return Ok(());
        }
        self.switch_tables(|tables| tables.set_active_bat(idx))
    }

    fn switch_tables<F>(&mut self, switch: F) -> Result<()>
    where
        F: FnOnce(&mut TableManager) -> Result<bool>,
    {
        self.remove_range(0);
        switch(&mut self.tables)?;

        let (files, used) = self.build_regular_files();
        self.used_blocks = used;
        self.num_regular = files.len();
        self.insert_files(files);

        debug!(
            "Active tables now DAT {} / BAT {}",
            self.active_dat_idx(),
            self.active_bat_idx()
        );
        self.events.emit(CardEvent::BlockCountChanged {
            size_no_sys: self.size_in_blocks_no_sys(),
            free: self.free_blocks(),
        });
        Ok(())
    }

    /// Append files with one bracketing event pair.
    fn insert_files(&mut self, new_files: Vec<CardFile>) {
        if new_files.is_empty() {
            return;
        }
        let start = self.files.len();
        let end = start + new_files.len() - 1;
        self.events.emit(CardEvent::FilesAboutToBeInserted { start, end });
        self.files.extend(new_files);
        self.events.emit(CardEvent::FilesInserted);
    }

    /// Drop files from `start` to the end with one bracketing event pair.
    fn remove_range(&mut self, start: usize) {
        if start >= self.files.len() {
            return;
        }
        let end = self.files.len() - 1;
        self.events.emit(CardEvent::FilesAboutToBeRemoved { start, end });
        self.files.truncate(start);
        self.events.emit(CardEvent::FilesRemoved);
    }

    // Lost file recovery

    /// Blocks claimed by lost files added so far.
    pub fn lost_blocks(&self) -> AHashSet<u16> {
        self.lost_files()
            .iter()
            .flat_map(|f| f.chain().iter().copied())
            .collect()
    }

    /// Add a lost file, resolving its chain from the active block table or
    /// from its recorded block range. Returns the new file index.
    pub fn add_lost_file(&mut self, entry: DirEntry) -> Result<usize> {
        let file = recovery::build_lost_file(self, &entry, &self.lost_blocks())?;
        let idx = self.files.len();
        self.insert_files(vec![file]);
        Ok(idx)
    }

    /// Add a lost file with a caller-supplied chain.
    pub fn add_lost_file_with_chain(&mut self, entry: DirEntry, chain: Vec<u16>) -> Result<usize> {
        let file = recovery::build_lost_file_with_chain(self, &entry, chain, &self.lost_blocks())?;
        let idx = self.files.len();
        self.insert_files(vec![file]);
        Ok(idx)
    }

    /// Add every acceptable candidate. Rejected candidates are logged and
    /// skipped. Returns the indices of the added files.
    pub fn add_lost_files(&mut self, candidates: &[SearchCandidate]) -> Vec<usize> {
        let accepted = recovery::build_lost_files(self, candidates);
        let start = self.files.len();
        let indices = (start..start + accepted.len()).collect();
        self.insert_files(accepted);
        indices
    }

    /// Remove all lost files. Regular files are untouched.
    pub fn remove_lost_files(&mut self) {
        self.remove_range(self.num_regular);
    }
}
