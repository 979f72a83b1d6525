//! File records: a directory entry joined with its resolved block chain.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chain::ChainResolution;
use crate::disk::CardImage;
use crate::encoding::decode_text;
use crate::error::{CardError, Result};
use crate::layout::dir::FILENAME_LEN;
use crate::layout::DirEntry;
use crate::types::{Encoding, BLOCK_SIZE};

/// Length of one comment string
pub const COMMENT_LEN: usize = 32;

/// Where a file record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Provenance {
    /// Listed in the active directory table
    Regular,
    /// Reconstructed by the recovery builder
    Lost,
}

/// How a lost file's chain was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChainBasis {
    AllocationTable,
    Contiguous,
    Explicit,
}

/// Problems found while resolving a file's chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainIssues {
    pub corrupt: Option<String>,
    pub count_mismatch: Option<(u16, u16)>,
    /// Some block is also claimed by an earlier regular file
    pub cross_linked: bool,
}

impl ChainIssues {
    pub fn is_empty(&self) -> bool {
        self.corrupt.is_none() && self.count_mismatch.is_none() && !self.cross_linked
    }
}

impl From<&ChainResolution> for ChainIssues {
    fn from(res: &ChainResolution) -> Self {
        Self {
            corrupt: res.corrupt.clone(),
            count_mismatch: res.count_mismatch,
            cross_linked: false,
        }
    }
}

/// Extra information carried by lost records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LostInfo {
    pub basis: ChainBasis,
    /// The entry passed the directory entry shape check
    pub shape_match: bool,
}

#[derive(Debug, Clone)]
pub struct CardFile {
    entry: DirEntry,
    /// Slot in the active directory table; `None` for lost files
    dir_index: Option<usize>,
    chain: Vec<u16>,
    provenance: Provenance,
    lost: Option<LostInfo>,
    issues: ChainIssues,
    encoding: Encoding,
}

impl CardFile {
    pub(crate) fn regular(
        entry: DirEntry,
        dir_index: usize,
        chain: Vec<u16>,
        issues: ChainIssues,
        card_encoding: Encoding,
    ) -> Self {
        let encoding = card_encoding.for_region(entry.region());
        Self {
            entry,
            dir_index: Some(dir_index),
            chain,
            provenance: Provenance::Regular,
            lost: None,
            issues,
            encoding,
        }
    }

    pub(crate) fn lost(
        entry: DirEntry,
        chain: Vec<u16>,
        info: LostInfo,
        issues: ChainIssues,
        card_encoding: Encoding,
    ) -> Self {
        let encoding = card_encoding.for_region(entry.region());
        Self {
            entry,
            dir_index: None,
            chain,
            provenance: Provenance::Lost,
            lost: Some(info),
            issues,
            encoding,
        }
    }

    pub fn entry(&self) -> &DirEntry {
        &self.entry
    }

    pub fn dir_index(&self) -> Option<usize> {
        self.dir_index
    }

    /// Ordered block indices of the file's data.
    pub fn chain(&self) -> &[u16] {
        &self.chain
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn is_lost(&self) -> bool {
        self.provenance == Provenance::Lost
    }

    pub fn lost_info(&self) -> Option<LostInfo> {
        self.lost
    }

    pub fn issues(&self) -> &ChainIssues {
        &self.issues
    }

    pub(crate) fn mark_cross_linked(&mut self) {
        self.issues.cross_linked = true;
    }

    /// Encoding used for this file's strings.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn filename(&self) -> String {
        decode_text(&self.entry.filename[..FILENAME_LEN], self.encoding)
    }

    pub fn id6(&self) -> String {
        self.entry.id6_string()
    }

    pub fn first_block(&self) -> u16 {
        self.entry.block
    }

    /// Block count recorded in the directory entry.
    pub fn length(&self) -> u16 {
        self.entry.length
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.entry.last_modified_utc()
    }

    pub fn permission(&self) -> u8 {
        self.entry.permission
    }

    pub fn banner_format(&self) -> u8 {
        self.entry.banner_fmt
    }

    pub fn icon_format(&self) -> u16 {
        self.entry.icon_fmt
    }

    /// Data blocks of the file, in chain order.
    pub fn block_slices<'a>(&self, image: &'a CardImage) -> Result<Vec<&'a [u8]>> {
        self.chain
            .iter()
            .map(|&block| image.block(block as u32))
            .collect()
    }

    /// Read `len` bytes starting at `offset` within the file's data.
    pub fn read_at(&self, image: &CardImage, offset: usize, len: usize) -> Result<Vec<u8>> {
        let total = self.chain.len() * BLOCK_SIZE;
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= total)
            .ok_or_else(|| CardError::decode("file data", offset.saturating_add(len), total))?;

        let mut out = Vec::with_capacity(len);
        let mut pos = offset;
        while pos < end {
            let block = self.chain[pos / BLOCK_SIZE];
            let within = pos % BLOCK_SIZE;
            let take = (BLOCK_SIZE - within).min(end - pos);
            let data = image.block(block as u32)?;
            out.extend_from_slice(&data[within..within + take]);
            pos += take;
        }
        Ok(out)
    }

    /// The two comment strings stored at the entry's comment offset.
    pub fn comments(&self, image: &CardImage) -> Result<(String, String)> {
        let raw = self.read_at(image, self.entry.comment_addr as usize, COMMENT_LEN * 2)?;
        Ok((
            decode_text(&raw[..COMMENT_LEN], self.encoding),
            decode_text(&raw[COMMENT_LEN..], self.encoding),
        ))
    }
}
