//! Text decoding for filenames and comments stored on the card.

use encoding_rs::{SHIFT_JIS, WINDOWS_1252};

use crate::types::Encoding;

/// Decode a fixed-width, NUL-padded byte string.
pub fn decode_text(raw: &[u8], encoding: Encoding) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let raw = &raw[..end];

    let codec = match encoding {
        Encoding::Ansi => WINDOWS_1252,
        Encoding::ShiftJis => SHIFT_JIS,
    };
    let (text, _, _) = codec.decode(raw);
    text.trim_end().to_string()
}
