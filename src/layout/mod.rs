//! Typed views over the fixed-offset structures of a card image.
//!
//! All multi-byte fields are big-endian. Decoders copy out of the raw block
//! so the result does not borrow the image; encoders are used by the format
//! path and by tests that build synthetic images.

pub mod bat;
pub mod dir;
pub mod header;

pub use bat::BlockTable;
pub use dir::{DirEntry, DirectoryTable};
pub use header::CardHeader;

use crate::error::{CardError, Result};

/// Block index of the card header
pub const HEADER_BLOCK: u16 = 0;

/// Block index of directory table copy `idx`
pub fn dat_block(idx: u8) -> u16 {
    1 + idx as u16
}

/// Block index of block table copy `idx`
pub fn bat_block(idx: u8) -> u16 {
    3 + idx as u16
}

pub(crate) fn ensure_len(data: &[u8], needed: usize, what: &'static str) -> Result<()> {
    if data.len() < needed {
        return Err(CardError::decode(what, needed, data.len()));
    }
    Ok(())
}
