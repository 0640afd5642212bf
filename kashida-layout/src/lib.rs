/*!
A reader and interpreter for OpenType layout tables.

This crate decodes the `GSUB`, `GPOS` and `GDEF` tables of an OpenType font
and applies the substitution and positioning lookups they describe to a
glyph sequence. It does not rasterize anything and it is not a full shaping
engine: lookup types that are not implemented are reported as
[`LayoutError::Unsupported`] so that callers can skip them instead of
aborting the whole font.

Table data is consumed through the [`FontData`] trait, a plain
random-access byte source. Binary decoding is driven by a small bytecode
interpreter (see [`interp`]) so that every read is bounds-checked against
the declared table region and decode failures always carry the table tag
and byte offset of the offending read.

## Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod coverage;
pub mod gdef;
pub mod gpos;
pub mod gsub;
pub mod interp;
pub mod lookup;
pub mod seq;
mod source;

pub use source::{FontData, TableRegion};

use core::fmt;

/// A type-safe wrapper for a glyph ID.
#[repr(transparent)]
#[derive(Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Default, Debug, Hash)]
pub struct GlyphId(pub u16);

impl GlyphId {
    /// The `.notdef` glyph, present in every font.
    pub const NOTDEF: Self = Self(0);
}

/// A four-byte OpenType tag, e.g. `GSUB` or `liga`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    /// Create a tag from its four raw bytes.
    pub const fn from_bytes(bytes: &[u8; 4]) -> Self {
        Self(*bytes)
    }

    /// Create a tag from a big-endian `u32` as stored in font files.
    pub const fn from_u32(v: u32) -> Self {
        Self(v.to_be_bytes())
    }

    /// The tag as a big-endian `u32`.
    pub const fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

/// A list of errors that can occur while reading or applying layout tables.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LayoutError {
    /// Malformed table data. Fatal to the current parse.
    Decode {
        /// The tag of the table being read.
        table: Tag,
        /// The byte offset (within the table) of the last read.
        offset: u64,
        /// What went wrong.
        reason: &'static str,
    },
    /// A recognized but unimplemented table format or lookup flag.
    ///
    /// Distinct from [`LayoutError::Decode`] so that callers can skip the
    /// affected lookup instead of treating the font as corrupt.
    Unsupported(&'static str),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode {
                table,
                offset,
                reason,
            } => {
                write!(f, "malformed {table} table at offset {offset}: {reason}")
            }
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

impl std::error::Error for LayoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_display() {
        assert_eq!(Tag::from_bytes(b"GSUB").to_string(), "GSUB");
        assert_eq!(Tag::from_u32(0x6C696761).to_string(), "liga");
        assert_eq!(Tag::from_bytes(b"GSUB"), Tag::from_u32(0x47535542));
    }

    #[test]
    fn decode_error_message() {
        let err = LayoutError::Decode {
            table: Tag::from_bytes(b"GPOS"),
            offset: 42,
            reason: "coverage range out of order",
        };
        assert_eq!(
            err.to_string(),
            "malformed GPOS table at offset 42: coverage range out of order"
        );
    }
}
