//! Escaping of reserved bytes inside a frame body.
//!
//! The first byte of a frame is its start marker and is never touched. Every later
//! byte in `0xFC..=0xFE` is replaced by `[ESCAPE, byte & 0x7F]`; the decoder reverses
//! this by setting the high bit of the byte following an `ESCAPE`.

use crate::constants::ESCAPE;

#[inline]
fn is_reserved(byte: u8) -> bool {
    (0xFC..=0xFE).contains(&byte)
}

/// Escape a raw frame for the wire.
pub fn escape(raw: &[u8]) -> Vec<u8> {
    let Some((&first, rest)) = raw.split_first() else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(raw.len() + 4);
    out.push(first);
    for &byte in rest {
        if is_reserved(byte) {
            out.push(ESCAPE);
            out.push(byte & 0x7F);
        } else {
            out.push(byte);
        }
    }
    out
}

/// Undo [`escape`].
///
/// A trailing `ESCAPE` with nothing after it is dropped.
pub fn unescape(escaped: &[u8]) -> Vec<u8> {
    let Some((&first, rest)) = escaped.split_first() else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(escaped.len());
    out.push(first);
    let mut pending = false;
    for &byte in rest {
        if byte == ESCAPE {
            pending = true;
            continue;
        }
        if pending {
            out.push(byte | 0x80);
            pending = false;
        } else {
            out.push(byte);
        }
    }
    out
}
