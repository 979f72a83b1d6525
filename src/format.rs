//! Blank card image construction.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use log::info;

use crate::error::{CardError, Result};
use crate::layout::header::SERIAL_LEN;
use crate::layout::{bat_block, dat_block, BlockTable, CardHeader, DirectoryTable, HEADER_BLOCK};
use crate::types::{Encoding, BLOCK_SIZE, MAX_CARD_BYTES, MIN_CARD_BYTES};

/// Console timer ticks per millisecond (40.5 MHz bus clock / 1000)
const TICKS_PER_MS: u64 = 40_500;

/// Blocks per megabit of card capacity
const BLOCKS_PER_MBIT: u16 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// Total size in blocks, system blocks included
    pub size_in_blocks: u16,
    pub encoding: Encoding,
    /// Flash id; derived from the format time when not given
    pub serial: Option<[u8; SERIAL_LEN]>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            size_in_blocks: 2048,
            encoding: Encoding::Ansi,
            serial: None,
        }
    }
}

impl FormatOptions {
    pub fn new(size_in_blocks: u16) -> Self {
        Self {
            size_in_blocks,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let bytes = self.size_in_blocks as u64 * BLOCK_SIZE as u64;
        if !(MIN_CARD_BYTES..=MAX_CARD_BYTES).contains(&bytes) || !bytes.is_power_of_two() {
            return Err(CardError::InvalidArgument(format!(
                "card size must be a power of two between {} and {} blocks, got {}",
                MIN_CARD_BYTES / BLOCK_SIZE as u64,
                MAX_CARD_BYTES / BLOCK_SIZE as u64,
                self.size_in_blocks
            )));
        }
        Ok(())
    }
}

/// Console ticks elapsed between 2000-01-01 and `when`.
pub fn console_ticks(when: DateTime<Utc>) -> u64 {
    let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
    match epoch {
        Some(epoch) => {
            let ms = (when - epoch).num_milliseconds().max(0) as u64;
            ms.saturating_mul(TICKS_PER_MS)
        }
        None => 0,
    }
}

fn derived_serial(format_time: u64, options: &FormatOptions) -> [u8; SERIAL_LEN] {
    let mut serial = [0u8; SERIAL_LEN];
    serial[..8].copy_from_slice(&format_time.to_be_bytes());
    serial[8..10].copy_from_slice(&options.size_in_blocks.to_be_bytes());
    serial[10..12].copy_from_slice(&options.encoding.as_raw().to_be_bytes());
    serial
}

/// Build a freshly formatted image in memory.
pub fn build_image(options: &FormatOptions, now: DateTime<Utc>) -> Result<Vec<u8>> {
    options.validate()?;

    let size = options.size_in_blocks;
    let mut image = vec![0u8; size as usize * BLOCK_SIZE];
    let format_time = console_ticks(now);

    let header = CardHeader {
        serial: options
            .serial
            .unwrap_or_else(|| derived_serial(format_time, options)),
        format_time,
        sram_bias: 0,
        sram_lang: 0,
        device_id: 0,
        size_mbits: size / BLOCKS_PER_MBIT,
        encoding: options.encoding.as_raw(),
        stored_checksum: 0,
    };
    header.write_to(block_mut(&mut image, HEADER_BLOCK))?;

    for copy in 0..2u8 {
        DirectoryTable::empty(copy as u16).write_to(block_mut(&mut image, dat_block(copy)))?;
        BlockTable::formatted(copy as u16, size).write_to(block_mut(&mut image, bat_block(copy)))?;
    }

    Ok(image)
}

fn block_mut(image: &mut [u8], index: u16) -> &mut [u8] {
    let start = index as usize * BLOCK_SIZE;
    &mut image[start..start + BLOCK_SIZE]
}

/// Write a formatted image to `path`.
pub fn write_image(path: &Path, options: &FormatOptions) -> Result<()> {
    let image = build_image(options, Utc::now())?;
    let mut file = File::create(path)?;
    file.write_all(&image)?;
    file.sync_all()?;
    info!(
        "Formatted {} ({} blocks, {})",
        path.display(),
        options.size_in_blocks,
        options.encoding
    );
    Ok(())
}
