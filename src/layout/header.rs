use byteorder::{BigEndian, ByteOrder};

use super::ensure_len;
use crate::checksum::{self, AddInvDual16, ChecksumValue};
use crate::error::Result;
use crate::types::{Encoding, BLOCK_SIZE};

/// Header field offsets
const HDR_SERIAL: usize = 0x000;
const HDR_FORMAT_TIME: usize = 0x00C;
const HDR_SRAM_BIAS: usize = 0x014;
const HDR_SRAM_LANG: usize = 0x018;
const HDR_RESERVED1: usize = 0x01C;
const HDR_DEVICE_ID: usize = 0x020;
const HDR_SIZE_MBITS: usize = 0x022;
const HDR_ENCODING: usize = 0x024;
const HDR_CHECKSUM: usize = 0x1FC;

/// Bytes covered by the header: everything up to and including the checksum
pub const HEADER_SIZE: usize = 0x200;

pub const SERIAL_LEN: usize = 12;

/// Decoded card header (block 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardHeader {
    pub serial: [u8; SERIAL_LEN],
    /// Format time in console ticks since 2000-01-01
    pub format_time: u64,
    pub sram_bias: u32,
    pub sram_lang: u32,
    pub device_id: u16,
    /// Card capacity in megabits
    pub size_mbits: u16,
    pub encoding: u16,
    /// Checksum as stored in the header
    pub stored_checksum: u32,
}

impl CardHeader {
    pub fn parse(block: &[u8]) -> Result<Self> {
        ensure_len(block, HEADER_SIZE, "card header")?;

        let mut serial = [0u8; SERIAL_LEN];
        serial.copy_from_slice(&block[HDR_SERIAL..HDR_SERIAL + SERIAL_LEN]);

        Ok(Self {
            serial,
            format_time: BigEndian::read_u64(&block[HDR_FORMAT_TIME..]),
            sram_bias: BigEndian::read_u32(&block[HDR_SRAM_BIAS..]),
            sram_lang: BigEndian::read_u32(&block[HDR_SRAM_LANG..]),
            device_id: BigEndian::read_u16(&block[HDR_DEVICE_ID..]),
            size_mbits: BigEndian::read_u16(&block[HDR_SIZE_MBITS..]),
            encoding: BigEndian::read_u16(&block[HDR_ENCODING..]),
            stored_checksum: BigEndian::read_u32(&block[HDR_CHECKSUM..]),
        })
    }

    /// Header checksum: always AddInvDual16 over the first 0x1FC bytes.
    pub fn checksum(block: &[u8]) -> Result<ChecksumValue> {
        checksum::verify_region(&AddInvDual16, block, 0..HDR_CHECKSUM, HDR_CHECKSUM)
    }

    pub fn encoding(&self) -> Encoding {
        Encoding::from_raw(self.encoding)
    }

    /// Upper-case hex rendering of the serial bytes.
    pub fn serial_number(&self) -> String {
        hex::encode_upper(self.serial)
    }

    /// Card size in blocks according to the header (16 blocks per megabit).
    pub fn size_in_blocks_hint(&self) -> u32 {
        self.size_mbits as u32 * 16
    }

    /// Write the header into a full block and recompute its checksum.
    pub fn write_to(&self, block: &mut [u8]) -> Result<u32> {
        ensure_len(block, BLOCK_SIZE, "card header block")?;

        block.fill(0xFF);
        block[HDR_SERIAL..HDR_SERIAL + SERIAL_LEN].copy_from_slice(&self.serial);
        BigEndian::write_u64(&mut block[HDR_FORMAT_TIME..], self.format_time);
        BigEndian::write_u32(&mut block[HDR_SRAM_BIAS..], self.sram_bias);
        BigEndian::write_u32(&mut block[HDR_SRAM_LANG..], self.sram_lang);
        BigEndian::write_u32(&mut block[HDR_RESERVED1..], 0);
        BigEndian::write_u16(&mut block[HDR_DEVICE_ID..], self.device_id);
        BigEndian::write_u16(&mut block[HDR_SIZE_MBITS..], self.size_mbits);
        BigEndian::write_u16(&mut block[HDR_ENCODING..], self.encoding);

        checksum::store(&AddInvDual16, block, 0..HDR_CHECKSUM, HDR_CHECKSUM)
    }
}
