//! Codecs: how raw PDF string bytes split into character codes.
//!
//! A codec is a list of code-space ranges. Each range covers codes of one
//! fixed byte length, and a byte sequence is decoded by trying lengths
//! from shortest to longest until a range matches. This is the CMap
//! code-space model; the three stock codecs below cover the encoders in
//! this crate, arbitrary range lists come from parsed CMaps.

use crate::{Code, EncodeError};

/// One code-space range: all codes of `number_bytes` bytes whose value
/// lies in `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodespaceRange {
    /// Byte length of the codes in this range, 1 to 4.
    pub number_bytes: u8,
    /// Lowest code value, inclusive.
    pub low: u32,
    /// Highest code value, inclusive.
    pub high: u32,
}

impl CodespaceRange {
    /// Whether `code` falls into this range.
    pub fn contains(&self, code: Code) -> bool {
        code.bytes == self.number_bytes && (self.low..=self.high).contains(&code.value)
    }
}

/// A set of code-space ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    ranges: Vec<CodespaceRange>,
}

impl Codec {
    /// Build a codec from explicit ranges, validating them.
    pub fn new(ranges: Vec<CodespaceRange>) -> Result<Self, EncodeError> {
        if ranges.is_empty() {
            return Err(EncodeError::InvalidCodec("no code-space ranges"));
        }
        for range in &ranges {
            if !(1..=4).contains(&range.number_bytes) {
                return Err(EncodeError::InvalidCodec("range byte length outside 1..=4"));
            }
            if range.low > range.high {
                return Err(EncodeError::InvalidCodec("range low above high"));
            }
            let max = match range.number_bytes {
                4 => u32::MAX,
                n => (1 << (8 * u32::from(n))) - 1,
            };
            if range.high > max {
                return Err(EncodeError::InvalidCodec("range value too wide for its length"));
            }
        }
        Ok(Self { ranges })
    }

    /// The one-byte codec of simple fonts: codes 0x00 to 0xFF.
    pub fn simple() -> Self {
        Self {
            ranges: vec![CodespaceRange {
                number_bytes: 1,
                low: 0x00,
                high: 0xFF,
            }],
        }
    }

    /// The two-byte identity codec: codes 0x0000 to 0xFFFF.
    pub fn ucs2() -> Self {
        Self {
            ranges: vec![CodespaceRange {
                number_bytes: 2,
                low: 0x0000,
                high: 0xFFFF,
            }],
        }
    }

    /// A variable-width codec matching the UTF-8 byte patterns, so that
    /// codes equal to the UTF-8 encoding of their text decode correctly.
    pub fn utf8() -> Self {
        Self {
            ranges: vec![
                CodespaceRange {
                    number_bytes: 1,
                    low: 0x00,
                    high: 0x7F,
                },
                CodespaceRange {
                    number_bytes: 2,
                    low: 0xC000,
                    high: 0xDFFF,
                },
                CodespaceRange {
                    number_bytes: 3,
                    low: 0xE0_0000,
                    high: 0xEF_FFFF,
                },
                CodespaceRange {
                    number_bytes: 4,
                    low: 0xF000_0000,
                    high: 0xF7FF_FFFF,
                },
            ],
        }
    }

    /// The ranges of this codec.
    pub fn ranges(&self) -> &[CodespaceRange] {
        &self.ranges
    }

    /// Whether `code` lies in the code space.
    pub fn contains(&self, code: Code) -> bool {
        self.ranges.iter().any(|r| r.contains(code))
    }

    /// Decode the next code from the front of `bytes`, trying lengths
    /// from shortest to longest. Returns `None` when no range matches or
    /// the input is too short.
    pub fn decode_next(&self, bytes: &[u8]) -> Option<Code> {
        for len in 1..=4u8 {
            let Some(prefix) = bytes.get(..usize::from(len)) else {
                break;
            };
            let value = prefix.iter().fold(0u32, |v, &b| (v << 8) | u32::from(b));
            let code = Code::new(value, len);
            if self.contains(code) {
                return Some(code);
            }
        }
        None
    }

    /// Decode a whole string into codes. Bytes that match no range end
    /// the decode early.
    pub fn decode(&self, mut bytes: &[u8]) -> Vec<Code> {
        let mut codes = Vec::new();
        while !bytes.is_empty() {
            let Some(code) = self.decode_next(bytes) else {
                break;
            };
            codes.push(code);
            bytes = &bytes[usize::from(code.bytes)..];
        }
        codes
    }
}

/// The code equal to the UTF-8 byte sequence of `c`.
pub fn utf8_code(c: char) -> Code {
    let mut buf = [0u8; 4];
    let raw = c.encode_utf8(&mut buf).as_bytes();
    let value = raw.iter().fold(0u32, |v, &b| (v << 8) | u32::from(b));
    Code::new(value, raw.len() as u8)
}
