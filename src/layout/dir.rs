use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, TimeZone, Utc};

use super::ensure_len;
use crate::checksum::{self, AddInvDual16, ChecksumValue};
use crate::error::Result;
use crate::types::BLOCK_SIZE;

/// Directory entry field offsets
const DE_GAMECODE: usize = 0x00;
const DE_COMPANY: usize = 0x04;
const DE_PAD_00: usize = 0x06;
const DE_BANNER_FMT: usize = 0x07;
const DE_FILENAME: usize = 0x08;
const DE_LAST_MODIFIED: usize = 0x28;
const DE_IMAGE_ADDR: usize = 0x2C;
const DE_ICON_FMT: usize = 0x30;
const DE_ICON_SPEED: usize = 0x32;
const DE_PERMISSION: usize = 0x34;
const DE_COPY_TIMES: usize = 0x35;
const DE_BLOCK: usize = 0x36;
const DE_LENGTH: usize = 0x38;
const DE_PAD_01: usize = 0x3A;
const DE_COMMENT_ADDR: usize = 0x3C;

pub const DIRENTRY_SIZE: usize = 64;
pub const FILENAME_LEN: usize = 32;
pub const DIR_ENTRIES: usize = 127;

/// Directory table trailer offsets
const DAT_UPDATE_COUNTER: usize = 0x1FFA;
const DAT_CHECKSUM: usize = 0x1FFC;

/// Permission bits
pub const PERM_PUBLIC: u8 = 0x04;
pub const PERM_NO_COPY: u8 = 0x08;
pub const PERM_NO_MOVE: u8 = 0x10;

/// Seconds between the Unix epoch and the console epoch (2000-01-01).
pub const GCN_EPOCH_OFFSET: i64 = 946_684_800;

/// One 64-byte directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    pub gamecode: [u8; 4],
    pub company: [u8; 2],
    pub pad_00: u8,
    pub banner_fmt: u8,
    pub filename: [u8; FILENAME_LEN],
    /// Seconds since 2000-01-01
    pub last_modified: u32,
    pub image_addr: u32,
    pub icon_fmt: u16,
    pub icon_speed: u16,
    pub permission: u8,
    pub copy_times: u8,
    /// First block of the file
    pub block: u16,
    /// Length in blocks
    pub length: u16,
    pub pad_01: u16,
    pub comment_addr: u32,
}

impl DirEntry {
    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure_len(data, DIRENTRY_SIZE, "directory entry")?;

        let mut gamecode = [0u8; 4];
        gamecode.copy_from_slice(&data[DE_GAMECODE..DE_GAMECODE + 4]);
        let mut company = [0u8; 2];
        company.copy_from_slice(&data[DE_COMPANY..DE_COMPANY + 2]);
        let mut filename = [0u8; FILENAME_LEN];
        filename.copy_from_slice(&data[DE_FILENAME..DE_FILENAME + FILENAME_LEN]);

        Ok(Self {
            gamecode,
            company,
            pad_00: data[DE_PAD_00],
            banner_fmt: data[DE_BANNER_FMT],
            filename,
            last_modified: BigEndian::read_u32(&data[DE_LAST_MODIFIED..]),
            image_addr: BigEndian::read_u32(&data[DE_IMAGE_ADDR..]),
            icon_fmt: BigEndian::read_u16(&data[DE_ICON_FMT..]),
            icon_speed: BigEndian::read_u16(&data[DE_ICON_SPEED..]),
            permission: data[DE_PERMISSION],
            copy_times: data[DE_COPY_TIMES],
            block: BigEndian::read_u16(&data[DE_BLOCK..]),
            length: BigEndian::read_u16(&data[DE_LENGTH..]),
            pad_01: BigEndian::read_u16(&data[DE_PAD_01..]),
            comment_addr: BigEndian::read_u32(&data[DE_COMMENT_ADDR..]),
        })
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure_len(data, DIRENTRY_SIZE, "directory entry")?;

        data[DE_GAMECODE..DE_GAMECODE + 4].copy_from_slice(&self.gamecode);
        data[DE_COMPANY..DE_COMPANY + 2].copy_from_slice(&self.company);
        data[DE_PAD_00] = self.pad_00;
        data[DE_BANNER_FMT] = self.banner_fmt;
        data[DE_FILENAME..DE_FILENAME + FILENAME_LEN].copy_from_slice(&self.filename);
        BigEndian::write_u32(&mut data[DE_LAST_MODIFIED..], self.last_modified);
        BigEndian::write_u32(&mut data[DE_IMAGE_ADDR..], self.image_addr);
        BigEndian::write_u16(&mut data[DE_ICON_FMT..], self.icon_fmt);
        BigEndian::write_u16(&mut data[DE_ICON_SPEED..], self.icon_speed);
        data[DE_PERMISSION] = self.permission;
        data[DE_COPY_TIMES] = self.copy_times;
        BigEndian::write_u16(&mut data[DE_BLOCK..], self.block);
        BigEndian::write_u16(&mut data[DE_LENGTH..], self.length);
        BigEndian::write_u16(&mut data[DE_PAD_01..], self.pad_01);
        BigEndian::write_u32(&mut data[DE_COMMENT_ADDR..], self.comment_addr);
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; DIRENTRY_SIZE] {
        let mut buf = [0u8; DIRENTRY_SIZE];
        // Buffer is exactly one entry long.
        let _ = self.write_to(&mut buf);
        buf
    }

    /// An erased slot: every byte 0xFF.
    pub fn unused() -> Self {
        Self {
            gamecode: [0xFF; 4],
            company: [0xFF; 2],
            pad_00: 0xFF,
            banner_fmt: 0xFF,
            filename: [0xFF; FILENAME_LEN],
            last_modified: u32::MAX,
            image_addr: u32::MAX,
            icon_fmt: u16::MAX,
            icon_speed: u16::MAX,
            permission: 0xFF,
            copy_times: 0xFF,
            block: u16::MAX,
            length: u16::MAX,
            pad_01: u16::MAX,
            comment_addr: u32::MAX,
        }
    }

    /// An unused slot has an all-0xFF game code.
    pub fn is_unused(&self) -> bool {
        self.gamecode == [0xFF; 4]
    }

    /// Game code followed by company code, e.g. `GALE01`.
    pub fn id6(&self) -> [u8; 6] {
        let mut id = [0u8; 6];
        id[..4].copy_from_slice(&self.gamecode);
        id[4..].copy_from_slice(&self.company);
        id
    }

    pub fn id6_string(&self) -> String {
        String::from_utf8_lossy(&self.id6()).into_owned()
    }

    /// Region character of the game code.
    pub fn region(&self) -> u8 {
        self.gamecode[3]
    }

    pub fn last_modified_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(GCN_EPOCH_OFFSET + self.last_modified as i64, 0)
            .single()
    }

    pub fn is_public(&self) -> bool {
        self.permission & PERM_PUBLIC != 0
    }

    pub fn is_no_copy(&self) -> bool {
        self.permission & PERM_NO_COPY != 0
    }

    pub fn is_no_move(&self) -> bool {
        self.permission & PERM_NO_MOVE != 0
    }

    /// Identity used to match the same save across tables: id6 + filename.
    pub fn same_file_as(&self, other: &DirEntry) -> bool {
        self.gamecode == other.gamecode
            && self.company == other.company
            && self.filename == other.filename
    }
}

/// One decoded directory table copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTable {
    /// All 127 slots, unused ones included
    pub entries: Vec<DirEntry>,
    pub update_counter: u16,
    pub stored_checksum: u32,
}

impl DirectoryTable {
    pub fn parse(block: &[u8]) -> Result<Self> {
        ensure_len(block, BLOCK_SIZE, "directory table")?;

        let entries = block[..DIR_ENTRIES * DIRENTRY_SIZE]
            .chunks_exact(DIRENTRY_SIZE)
            .map(DirEntry::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            entries,
            update_counter: BigEndian::read_u16(&block[DAT_UPDATE_COUNTER..]),
            stored_checksum: BigEndian::read_u32(&block[DAT_CHECKSUM..]),
        })
    }

    pub fn checksum(block: &[u8]) -> Result<ChecksumValue> {
        checksum::verify_region(&AddInvDual16, block, 0..DAT_CHECKSUM, DAT_CHECKSUM)
    }

    /// A table with every slot unused.
    pub fn empty(update_counter: u16) -> Self {
        Self {
            entries: vec![DirEntry::unused(); DIR_ENTRIES],
            update_counter,
            stored_checksum: 0,
        }
    }

    /// Used entries with their slot index.
    pub fn used_entries(&self) -> impl Iterator<Item = (usize, &DirEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_unused())
    }

    pub fn contains(&self, entry: &DirEntry) -> bool {
        self.used_entries().any(|(_, e)| e.same_file_as(entry))
    }

    pub fn write_to(&self, block: &mut [u8]) -> Result<u32> {
        ensure_len(block, BLOCK_SIZE, "directory table")?;

        block.fill(0xFF);
        for (i, entry) in self.entries.iter().take(DIR_ENTRIES).enumerate() {
            let start = i * DIRENTRY_SIZE;
            entry.write_to(&mut block[start..start + DIRENTRY_SIZE])?;
        }
        BigEndian::write_u16(&mut block[DAT_UPDATE_COUNTER..], self.update_counter);
        checksum::store(&AddInvDual16, block, 0..DAT_CHECKSUM, DAT_CHECKSUM)
    }
}
