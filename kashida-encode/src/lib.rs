/*!
Character-code, CID and glyph encoding support for PDF fonts.

PDF strings address glyphs through character codes: 1 to 4 raw bytes
interpreted under a codec (a set of code-space ranges, see [`codec`]).
This crate maps those codes to CIDs, widths and Unicode text and back,
with the allocation policies composite fonts need:

- [`cid::CompositeEncoder`] allocates codes for CIDs under the identity,
  UTF-8 or a fixed CMap-derived policy.
- [`simple::SimpleEncoder`] assigns the 256 one-byte codes of a simple
  font, biased towards the Standard Encoding.
- [`widths`] run-length encodes CID width maps the way PDF `W` arrays do.
- [`tounicode`] writes and reads `ToUnicode` CMap streams.

All encoders guarantee stable allocation: a (CID, text) pair keeps the
code it was first given, since codes already written into content
streams cannot be changed afterwards.

## Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cid;
pub mod codec;
pub mod simple;
pub mod tounicode;
pub mod widths;

use core::fmt;

/// A character identifier within a character collection. CID 0 is always
/// the notdef character.
pub type Cid = u16;

/// A character code: up to four raw bytes of a PDF string, interpreted
/// under a codec.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct Code {
    /// The code value, built big-endian from the raw bytes.
    pub value: u32,
    /// How many bytes the code occupies in the string (1 to 4).
    pub bytes: u8,
}

impl Code {
    /// A code of `bytes` bytes with the given value.
    pub const fn new(value: u32, bytes: u8) -> Self {
        Self { value, bytes }
    }

    /// A one-byte code.
    pub const fn one_byte(b: u8) -> Self {
        Self {
            value: b as u32,
            bytes: 1,
        }
    }

    /// Append the code's raw bytes to `out`.
    pub fn write(self, out: &mut Vec<u8>) {
        let raw = self.value.to_be_bytes();
        out.extend(&raw[4 - usize::from(self.bytes)..]);
    }

    /// Whether this code triggers PDF word spacing, which applies to the
    /// single byte 0x20 only.
    pub fn uses_word_spacing(self) -> bool {
        self.bytes == 1 && self.value == 0x20
    }
}

/// What is known about one allocated character code.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeInfo {
    /// The CID the code maps to.
    pub cid: Cid,
    /// The glyph width in 1/1000 em units, if known.
    pub width: Option<f32>,
    /// The Unicode text the code represents, if known.
    pub text: Option<String>,
}

/// Errors of the encoding layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The one-byte code space of a simple font has no free slot left.
    CodeSpaceFull,
    /// Every private-use code point is taken.
    PrivateUseExhausted,
    /// Data registered for a CID or code contradicts what was registered
    /// before. Allocations are never overwritten, see the crate docs.
    Conflict(&'static str),
    /// A codec with malformed code-space ranges.
    InvalidCodec(&'static str),
    /// A `ToUnicode` CMap stream that does not parse.
    MalformedCmap(&'static str),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CodeSpaceFull => write!(f, "all 256 one-byte codes are in use"),
            Self::PrivateUseExhausted => write!(f, "private-use code points exhausted"),
            Self::Conflict(what) => write!(f, "conflicting allocation: {what}"),
            Self::InvalidCodec(what) => write!(f, "invalid codec: {what}"),
            Self::MalformedCmap(what) => write!(f, "malformed CMap: {what}"),
        }
    }
}

impl std::error::Error for EncodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_write_is_big_endian() {
        let mut out = Vec::new();
        Code::new(0x0102, 2).write(&mut out);
        Code::one_byte(0xFF).write(&mut out);
        Code::new(0xE4B8AD, 3).write(&mut out);
        assert_eq!(out, vec![0x01, 0x02, 0xFF, 0xE4, 0xB8, 0xAD]);
    }

    #[test]
    fn word_spacing_needs_a_single_byte() {
        assert!(Code::one_byte(0x20).uses_word_spacing());
        assert!(!Code::new(0x20, 2).uses_word_spacing());
        assert!(!Code::one_byte(0x21).uses_word_spacing());
    }
}
