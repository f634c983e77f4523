//! Glyphs: short deterministic identifiers derived from text.

use sha2::{Digest, Sha256};

/// Every glyph starts with this marker.
pub const GLYPH_PREFIX: char = '⟁';

/// Symbols per glyph after the prefix.
pub const GLYPH_SYMBOLS: usize = 8;

const ALPHABET: [char; 32] = [
    '◆', '◇', '○', '●', '□', '■', '△', '▲', '▽', '▼', '◁', '▷', '★', '☆', '✦', '✧', '⬡', '⬢',
    '⬟', '⬠', '⟐', '⟡', '⧫', '⧖', '⧗', '⌬', '⌘', '⍟', '⎔', '⏣', '⌖', '⊕',
];

/// Returns the glyph of `text`: the prefix followed by the first 40 bits
/// of its SHA-256, five bits per symbol.
#[must_use]
pub fn glyph_for(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let bits = digest[..5]
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));

    let mut glyph = String::with_capacity(1 + GLYPH_SYMBOLS * 3);
    glyph.push(GLYPH_PREFIX);
    for i in (0..GLYPH_SYMBOLS).rev() {
        let index = (bits >> (i * 5)) & 0x1F;
        glyph.push(ALPHABET[index as usize]);
    }
    glyph
}

/// Normalizes a path: forward slashes, no `.` segments, no empty
/// segments. A leading `/` is kept, so absolute and relative spellings of
/// the same segments stay distinct.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let segments = path
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");
    if path.starts_with('/') {
        format!("/{segments}")
    } else {
        segments
    }
}

/// Returns the glyph of a path after normalization.
#[must_use]
pub fn glyph_for_path(path: &str) -> String {
    glyph_for(&normalize_path(path))
}

/// Returns the lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Glyph length relative to path length, in thousandths.
#[must_use]
pub fn compression_permille(glyph: &str, path: &str) -> i64 {
    let path_len = path.chars().count().max(1);
    i64::try_from(glyph.chars().count() * 1000 / path_len).unwrap_or(i64::MAX)
}

/// Returns true if `text` has the shape of a glyph.
#[must_use]
pub fn is_glyph(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next() == Some(GLYPH_PREFIX)
        && chars.clone().count() == GLYPH_SYMBOLS
        && chars.all(|c| ALPHABET.contains(&c))
}
