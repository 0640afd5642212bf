//! Glyph sequences and the lookup application driver.
//!
//! A [`RawGlyph`] carries the glyph id together with the input text it
//! originated from and the positioning adjustments accumulated so far.
//! Lookups rewrite the sequence in place; ligatures shrink it, multiple
//! substitution grows it. The sequence is owned exclusively by the one
//! shaping pass operating on it.

use log::warn;
use smallvec::SmallVec;

use crate::gdef::GlyphFilter;
use crate::lookup::LayoutTable;
use crate::{GlyphId, LayoutError};

/// One glyph of a sequence being shaped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGlyph {
    /// The glyph id.
    pub gid: GlyphId,
    /// The input characters this glyph represents. Ligation concatenates
    /// these, one-to-many substitution leaves them on the first output
    /// glyph.
    pub text: SmallVec<[char; 1]>,
    /// Horizontal offset in PDF glyph-space units (1/1000 em).
    pub x_offset: i32,
    /// Vertical offset in PDF glyph-space units.
    pub y_offset: i32,
    /// Horizontal advance in PDF glyph-space units.
    pub advance: i32,
}

impl RawGlyph {
    /// A glyph with no text attribution and no positioning.
    pub fn new(gid: GlyphId) -> Self {
        Self {
            gid,
            text: SmallVec::new(),
            x_offset: 0,
            y_offset: 0,
            advance: 0,
        }
    }

    /// A glyph carrying the characters it was mapped from.
    pub fn with_text(gid: GlyphId, text: &str) -> Self {
        Self {
            text: text.chars().collect(),
            ..Self::new(gid)
        }
    }
}

/// Apply the feature-selected lookups of `table` to `seq`.
///
/// A single cursor walks the sequence. At each position the selected
/// lookups are tried in order; the first one that reports progress moves
/// the cursor to the position it returns, otherwise the cursor advances by
/// one. A lookup whose subtables are unsupported is skipped with a
/// warning; structural decode errors abort the pass.
pub fn apply_lookups(table: &LayoutTable, seq: &mut Vec<RawGlyph>) -> Result<(), LayoutError> {
    let mut pos = 0;
    while pos < seq.len() {
        let mut next = None;
        for &index in &table.selected {
            match table.apply_lookup_at(index, seq, pos, 0) {
                Ok(Some(n)) => {
                    next = Some(n);
                    break;
                }
                Ok(None) => {}
                Err(LayoutError::Unsupported(what)) => {
                    warn!("skipping unsupported lookup {index}: {what}");
                }
                Err(err) => return Err(err),
            }
        }
        match next {
            Some(n) => pos = n,
            None => pos += 1,
        }
    }
    Ok(())
}

/// The next position after `from` that `filter` keeps.
pub(crate) fn next_kept(filter: &GlyphFilter, seq: &[RawGlyph], from: usize) -> Option<usize> {
    let mut i = from + 1;
    while i < seq.len() {
        if filter.keep(seq[i].gid) {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// The closest position before `from` that `filter` keeps.
pub(crate) fn prev_kept(filter: &GlyphFilter, seq: &[RawGlyph], from: usize) -> Option<usize> {
    let mut i = from;
    while i > 0 {
        i -= 1;
        if filter.keep(seq[i].gid) {
            return Some(i);
        }
    }
    None
}
