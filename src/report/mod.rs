//! Report generation for a card and its recovered files.
//!
//! The report is a JSON document: image metadata with a SHA-256 of the raw
//! image, header and table state, the error flags, and one record per file
//! with provenance and block chain.

use std::fs;
use std::path::Path;

use chrono::Local;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::card::Card;
use crate::checksum::ChecksumValue;
use crate::file::{CardFile, ChainBasis, ChainIssues, Provenance};
use crate::tables::{TablePair, ValidatedTable};

/// Full JSON report
#[derive(Debug, Clone, Serialize)]
pub struct CardReport {
    pub metadata: ReportMetadata,
    pub card: CardSummary,
    pub tables: TableSummary,
    pub files: Vec<FileReport>,
    /// Candidates produced by the scanner, accepted or not
    pub candidates_found: usize,
}

/// Report metadata
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    /// Report generation timestamp
    pub timestamp: String,
    pub tool_name: String,
    pub version: String,
    pub image_path: String,
    /// SHA-256 of the raw image
    pub image_sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardSummary {
    pub size_bytes: u64,
    pub size_in_blocks: u16,
    /// Size declared by the header's megabit field
    pub header_size_in_blocks: u32,
    pub free_blocks: u16,
    pub serial_number: String,
    pub encoding: String,
    pub header_checksum: ChecksumValue,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableCopy {
    pub update_counter: u16,
    pub checksum: ChecksumValue,
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub dat_active: u8,
    pub dat_header_preference: Option<u8>,
    pub dat_copies: Vec<TableCopy>,
    pub bat_active: u8,
    pub bat_header_preference: Option<u8>,
    pub bat_copies: Vec<TableCopy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub index: usize,
    pub id6: String,
    pub filename: String,
    pub provenance: Provenance,
    pub basis: Option<ChainBasis>,
    pub shape_match: Option<bool>,
    pub first_block: u16,
    pub length: u16,
    pub chain: Vec<u16>,
    pub issues: ChainIssues,
    pub last_modified: Option<String>,
    /// SHA-256 of the file's data blocks in chain order
    pub sha256: Option<String>,
}

/// Report generation errors
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

fn sha256_hex(chunks: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    format!("{:x}", hasher.finalize())
}

fn table_copies<T, F>(pair: &TablePair<T>, counter: F) -> Vec<TableCopy>
where
    F: Fn(&T) -> u16,
{
    (0..2u8)
        .filter_map(|idx| pair.copy(idx))
        .map(|copy: &ValidatedTable<T>| TableCopy {
            update_counter: counter(&copy.table),
            checksum: copy.checksum,
            valid: copy.valid,
        })
        .collect()
}

fn file_report(card: &Card, index: usize, file: &CardFile) -> FileReport {
    let sha256 = file
        .block_slices(card.image())
        .ok()
        .map(|blocks| sha256_hex(&blocks));
    let lost = file.lost_info();

    FileReport {
        index,
        id6: file.id6(),
        filename: file.filename(),
        provenance: file.provenance(),
        basis: lost.map(|l| l.basis),
        shape_match: lost.map(|l| l.shape_match),
        first_block: file.first_block(),
        length: file.length(),
        chain: file.chain().to_vec(),
        issues: file.issues().clone(),
        last_modified: file.last_modified().map(|t| t.to_rfc3339()),
        sha256,
    }
}

/// Build a report of the card's current state.
pub fn build_report(card: &Card, candidates_found: usize, version: &str) -> CardReport {
    let tables = card.tables();
    let metadata = ReportMetadata {
        timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        tool_name: "gcn-recover".to_string(),
        version: version.to_string(),
        image_path: card
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string()),
        image_sha256: sha256_hex(&[card.image().as_bytes()]),
    };

    let summary = CardSummary {
        size_bytes: card.filesize(),
        size_in_blocks: card.size_in_blocks(),
        header_size_in_blocks: card.header().size_in_blocks_hint(),
        free_blocks: card.free_blocks(),
        serial_number: card.serial_number(),
        encoding: card.encoding().to_string(),
        header_checksum: card.header_checksum_value(),
        errors: card.errors().names(),
    };

    let table_summary = TableSummary {
        dat_active: tables.dats().active_idx(),
        dat_header_preference: tables.dats().hdr_idx(),
        dat_copies: table_copies(tables.dats(), |t| t.update_counter),
        bat_active: tables.bats().active_idx(),
        bat_header_preference: tables.bats().hdr_idx(),
        bat_copies: table_copies(tables.bats(), |t| t.update_counter),
    };

    let files = card
        .files()
        .iter()
        .enumerate()
        .map(|(i, f)| file_report(card, i, f))
        .collect();

    CardReport {
        metadata,
        card: summary,
        tables: table_summary,
        files,
        candidates_found,
    }
}

pub fn to_json(report: &CardReport) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Write the report as pretty-printed JSON.
pub fn write_json(report: &CardReport, path: &Path) -> Result<(), ReportError> {
    fs::write(path, to_json(report)?)?;
    Ok(())
}
