//! Code allocation for composite (CID-keyed) fonts.
//!
//! A [`CompositeEncoder`] hands out character codes for (CID, text)
//! pairs under one of three policies: identity (code equals CID), UTF-8
//! (code equals the text's own UTF-8 bytes where possible) and fixed
//! (codes come from an existing CMap and are never invented). All three
//! keep allocations stable and reject contradictory re-registration
//! instead of overwriting.

use rustc_hash::FxHashMap;

use crate::codec::{utf8_code, Codec};
use crate::{Cid, Code, CodeInfo, EncodeError};

/// First private-use code point tried by the UTF-8 encoder.
const PRIVATE_USE_START: u32 = 0xE000;
/// Sentinel meaning every private-use code point has been handed out.
const PRIVATE_USE_DONE: u32 = 0x11_0000;

/// A code range of an identity encoder with its own notdef fallback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotdefRange {
    /// Lowest code value covered, inclusive.
    pub low: u16,
    /// Highest code value covered, inclusive.
    pub high: u16,
    /// The CID unmapped codes in the range fall back to.
    pub cid: Cid,
    /// The width of that fallback glyph.
    pub width: f32,
}

/// A run of consecutive codes mapping to consecutive CIDs, as declared
/// by a `cidrange` section of a CMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidRange {
    /// Byte length of the codes in this range.
    pub number_bytes: u8,
    /// Lowest code value, inclusive.
    pub low: u32,
    /// Highest code value, inclusive.
    pub high: u32,
    /// The CID of the lowest code; the rest follow consecutively.
    pub first_cid: Cid,
}

impl CidRange {
    fn cid_of(&self, code: Code) -> Option<Cid> {
        if code.bytes != self.number_bytes || !(self.low..=self.high).contains(&code.value) {
            return None;
        }
        let delta = code.value - self.low;
        u16::try_from(u32::from(self.first_cid) + delta).ok()
    }

    fn code_of(&self, cid: Cid) -> Option<Code> {
        let offset = u32::from(cid).checked_sub(u32::from(self.first_cid))?;
        let value = self.low.checked_add(offset)?;
        (value <= self.high).then_some(Code::new(value, self.number_bytes))
    }
}

/// An allocator of character codes for a composite font.
#[derive(Debug)]
pub enum CompositeEncoder {
    /// Two-byte codes equal to the CID.
    Identity {
        /// Per-CID registrations; the code is the CID itself.
        allocated: FxHashMap<Cid, CodeInfo>,
        /// Byte-range-scoped notdef overrides, first match wins.
        notdef_ranges: Vec<NotdefRange>,
    },
    /// Codes equal to the text's UTF-8 bytes, with private-use fallback.
    Utf8 {
        /// Stable (CID, text) to code assignment.
        by_key: FxHashMap<(Cid, String), Code>,
        /// What each allocated code maps to.
        by_code: FxHashMap<Code, CodeInfo>,
        /// Next private-use candidate, or [`PRIVATE_USE_DONE`].
        next_private: u32,
    },
    /// Codes fixed by an existing CMap; text and width are back-filled.
    Fixed {
        /// The CMap's code space.
        codec: Codec,
        /// The CMap's code-to-CID ranges.
        ranges: Vec<CidRange>,
        /// Back-filled text and width per code.
        filled: FxHashMap<Code, CodeInfo>,
    },
}

impl CompositeEncoder {
    /// An identity encoder with an empty allocation table.
    pub fn identity() -> Self {
        Self::Identity {
            allocated: FxHashMap::default(),
            notdef_ranges: Vec::new(),
        }
    }

    /// A UTF-8 encoder with an empty allocation table.
    ///
    /// Text is keyed exactly as given, without Unicode normalization.
    /// Callers that want one code per canonically-equivalent string must
    /// NFC-normalize before encoding; un-normalized variants still encode
    /// correctly, they just fall back to private-use codes.
    pub fn utf8() -> Self {
        Self::Utf8 {
            by_key: FxHashMap::default(),
            by_code: FxHashMap::default(),
            next_private: PRIVATE_USE_START,
        }
    }

    /// A fixed encoder wrapping the code space and CID ranges of an
    /// existing CMap.
    pub fn fixed(codec: Codec, ranges: Vec<CidRange>) -> Self {
        Self::Fixed {
            codec,
            ranges,
            filled: FxHashMap::default(),
        }
    }

    /// The codec codes of this encoder decode under.
    pub fn codec(&self) -> Codec {
        match self {
            Self::Identity { .. } => Codec::ucs2(),
            Self::Utf8 { .. } => Codec::utf8(),
            Self::Fixed { codec, .. } => codec.clone(),
        }
    }

    /// Register a notdef override for a code range (identity only).
    pub fn add_notdef_range(&mut self, range: NotdefRange) {
        if let Self::Identity { notdef_ranges, .. } = self {
            notdef_ranges.push(range);
        }
    }

    /// The code for `(cid, text)`, allocating one on first use.
    ///
    /// Registration is idempotent: repeating it with the same text and
    /// width returns the same code, while a contradicting text or width
    /// for an already-registered key is a [`EncodeError::Conflict`]. The
    /// fixed variant never invents codes; a CID outside its ranges is
    /// reported as [`EncodeError::CodeSpaceFull`].
    pub fn encode(
        &mut self,
        cid: Cid,
        text: Option<&str>,
        width: Option<f32>,
    ) -> Result<Code, EncodeError> {
        match self {
            Self::Identity { allocated, .. } => {
                let info = allocated.entry(cid).or_insert(CodeInfo {
                    cid,
                    width: None,
                    text: None,
                });
                backfill(info, text, width)?;
                Ok(Code::new(u32::from(cid), 2))
            }
            Self::Utf8 {
                by_key,
                by_code,
                next_private,
            } => {
                let key = (cid, text.unwrap_or_default().to_owned());
                if let Some(&code) = by_key.get(&key) {
                    if let Some(info) = by_code.get_mut(&code) {
                        backfill(info, text, width)?;
                    }
                    return Ok(code);
                }

                let natural = text
                    .and_then(single_char)
                    .map(utf8_code)
                    .filter(|code| !by_code.contains_key(code));
                let code = match natural {
                    Some(code) => code,
                    None => allocate_private(by_code, next_private)?,
                };

                by_key.insert(key, code);
                by_code.insert(
                    code,
                    CodeInfo {
                        cid,
                        width,
                        text: text.map(str::to_owned),
                    },
                );
                Ok(code)
            }
            Self::Fixed { ranges, filled, .. } => {
                let code = ranges
                    .iter()
                    .find_map(|r| r.code_of(cid))
                    .ok_or(EncodeError::CodeSpaceFull)?;
                let info = filled.entry(code).or_insert(CodeInfo {
                    cid,
                    width: None,
                    text: None,
                });
                backfill(info, text, width)?;
                Ok(code)
            }
        }
    }

    /// What `code` maps to. Unallocated codes resolve to the notdef
    /// mapping (CID 0, or a matching notdef-range override for identity
    /// encoders).
    pub fn info(&self, code: Code) -> CodeInfo {
        match self {
            Self::Identity {
                allocated,
                notdef_ranges,
            } => {
                if code.bytes == 2 {
                    if let Ok(cid) = u16::try_from(code.value) {
                        if let Some(info) = allocated.get(&cid) {
                            return info.clone();
                        }
                        for range in notdef_ranges {
                            if (range.low..=range.high).contains(&cid) {
                                return CodeInfo {
                                    cid: range.cid,
                                    width: Some(range.width),
                                    text: None,
                                };
                            }
                        }
                    }
                }
                CodeInfo::default()
            }
            Self::Utf8 { by_code, .. } => by_code.get(&code).cloned().unwrap_or_default(),
            Self::Fixed { ranges, filled, .. } => {
                if let Some(info) = filled.get(&code) {
                    return info.clone();
                }
                let cid = ranges.iter().find_map(|r| r.cid_of(code)).unwrap_or(0);
                CodeInfo {
                    cid,
                    width: None,
                    text: None,
                }
            }
        }
    }

    /// Every registered code with its mapping, sorted by code. This is
    /// what the `ToUnicode` and width-array writers consume.
    pub fn mappings(&self) -> Vec<(Code, CodeInfo)> {
        let mut out: Vec<(Code, CodeInfo)> = match self {
            Self::Identity { allocated, .. } => allocated
                .iter()
                .map(|(&cid, info)| (Code::new(u32::from(cid), 2), info.clone()))
                .collect(),
            Self::Utf8 { by_code, .. } => {
                by_code.iter().map(|(&c, info)| (c, info.clone())).collect()
            }
            Self::Fixed { filled, .. } => {
                filled.iter().map(|(&c, info)| (c, info.clone())).collect()
            }
        };
        out.sort_by_key(|&(code, _)| (code.bytes, code.value));
        out
    }
}

/// Merge late text/width registration into an existing record. The first
/// registration wins; repeating it is fine, contradicting it is not.
fn backfill(info: &mut CodeInfo, text: Option<&str>, width: Option<f32>) -> Result<(), EncodeError> {
    if let Some(text) = text {
        match &info.text {
            None => info.text = Some(text.to_owned()),
            Some(prior) if prior == text => {}
            Some(_) => return Err(EncodeError::Conflict("text differs from prior registration")),
        }
    }
    if let Some(width) = width {
        match info.width {
            None => info.width = Some(width),
            Some(prior) if prior == width => {}
            Some(_) => {
                return Err(EncodeError::Conflict("width differs from prior registration"));
            }
        }
    }
    Ok(())
}

fn single_char(text: &str) -> Option<char> {
    let mut chars = text.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

/// Hand out the next free private-use code point as a UTF-8 code.
fn allocate_private(
    by_code: &FxHashMap<Code, CodeInfo>,
    next_private: &mut u32,
) -> Result<Code, EncodeError> {
    while *next_private != PRIVATE_USE_DONE {
        let candidate = *next_private;
        *next_private = match candidate {
            // End of the BMP private-use area; continue in plane 15.
            0xF8FF => 0xF_0000,
            // End of plane 15 (the last two code points are noncharacters).
            0xF_FFFD => 0x10_0000,
            0x10_FFFD => PRIVATE_USE_DONE,
            c => c + 1,
        };
        let Some(c) = char::from_u32(candidate) else {
            continue;
        };
        let code = utf8_code(c);
        if !by_code.contains_key(&code) {
            return Ok(code);
        }
    }
    Err(EncodeError::PrivateUseExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_code_equals_cid() {
        let mut enc = CompositeEncoder::identity();
        let code = enc.encode(513, Some("a"), Some(500.0)).unwrap();
        assert_eq!(code, Code::new(513, 2));
        let mut raw = Vec::new();
        code.write(&mut raw);
        assert_eq!(raw, vec![0x02, 0x01]);
    }

    #[test]
    fn allocation_is_stable_and_idempotent() {
        let mut enc = CompositeEncoder::utf8();
        let a = enc.encode(7, Some("x"), Some(400.0)).unwrap();
        let b = enc.encode(7, Some("x"), Some(400.0)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn conflicting_backfill_is_rejected() {
        let mut enc = CompositeEncoder::identity();
        enc.encode(5, Some("a"), Some(500.0)).unwrap();
        assert!(matches!(
            enc.encode(5, Some("b"), None),
            Err(EncodeError::Conflict(_))
        ));
        assert!(matches!(
            enc.encode(5, None, Some(600.0)),
            Err(EncodeError::Conflict(_))
        ));
        // Re-registering the same values stays fine.
        enc.encode(5, Some("a"), Some(500.0)).unwrap();
    }

    #[test]
    fn identity_notdef_ranges_override_fallback() {
        let mut enc = CompositeEncoder::identity();
        enc.add_notdef_range(NotdefRange {
            low: 0x100,
            high: 0x1FF,
            cid: 42,
            width: 750.0,
        });
        let hit = enc.info(Code::new(0x150, 2));
        assert_eq!(hit.cid, 42);
        assert_eq!(hit.width, Some(750.0));
        // Outside every range the global notdef applies.
        assert_eq!(enc.info(Code::new(0x2000, 2)).cid, 0);
    }

    #[test]
    fn utf8_prefers_the_text_bytes() {
        let mut enc = CompositeEncoder::utf8();
        let code = enc.encode(10, Some("A"), None).unwrap();
        assert_eq!(code, Code::one_byte(0x41));
        let code = enc.encode(11, Some("中"), None).unwrap();
        assert_eq!(code, utf8_code('中'));
    }

    #[test]
    fn utf8_collision_falls_back_to_private_use() {
        let mut enc = CompositeEncoder::utf8();
        let first = enc.encode(10, Some("A"), None).unwrap();
        // Same text, different CID: the natural code is taken.
        let second = enc.encode(20, Some("A"), None).unwrap();
        assert_ne!(first, second);
        assert_eq!(second, utf8_code('\u{E000}'));
        // Multi-char texts never get a natural code either.
        let third = enc.encode(30, Some("ffi"), None).unwrap();
        assert_eq!(third, utf8_code('\u{E001}'));
    }

    #[test]
    fn private_use_counter_skips_to_plane_15() {
        let mut by_code = FxHashMap::default();
        let mut next = 0xF8FF;
        let code = allocate_private(&by_code, &mut next).unwrap();
        assert_eq!(code, utf8_code('\u{F8FF}'));
        by_code.insert(code, CodeInfo::default());
        let code = allocate_private(&by_code, &mut next).unwrap();
        assert_eq!(code, utf8_code('\u{F0000}'));
    }

    #[test]
    fn private_use_exhaustion_is_an_error() {
        let by_code = FxHashMap::default();
        let mut next = 0x10_FFFD;
        allocate_private(&by_code, &mut next).unwrap();
        assert_eq!(
            allocate_private(&by_code, &mut next),
            Err(EncodeError::PrivateUseExhausted)
        );
    }

    #[test]
    fn fixed_encoder_never_invents_codes() {
        let codec = Codec::ucs2();
        let mut enc = CompositeEncoder::fixed(
            codec,
            vec![CidRange {
                number_bytes: 2,
                low: 0x20,
                high: 0x7E,
                first_cid: 1,
            }],
        );
        // CID 2 sits at code 0x21 per the range.
        let code = enc.encode(2, Some("!"), Some(333.0)).unwrap();
        assert_eq!(code, Code::new(0x21, 2));
        // A CID outside every range cannot be encoded.
        assert_eq!(enc.encode(500, None, None), Err(EncodeError::CodeSpaceFull));

        let info = enc.info(Code::new(0x21, 2));
        assert_eq!(info.cid, 2);
        assert_eq!(info.text.as_deref(), Some("!"));
        // Unfilled codes still resolve their CID through the ranges.
        assert_eq!(enc.info(Code::new(0x30, 2)).cid, 17);
    }

    #[test]
    fn mappings_are_sorted_by_code() {
        let mut enc = CompositeEncoder::utf8();
        enc.encode(3, Some("c"), None).unwrap();
        enc.encode(1, Some("a"), None).unwrap();
        enc.encode(2, Some("中"), None).unwrap();
        let mappings = enc.mappings();
        let codes: Vec<_> = mappings.iter().map(|&(c, _)| c).collect();
        assert_eq!(
            codes,
            vec![
                Code::one_byte(b'a'),
                Code::one_byte(b'c'),
                utf8_code('中')
            ]
        );
    }
}
