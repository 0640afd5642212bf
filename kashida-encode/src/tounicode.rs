//! Writing and reading `ToUnicode` CMap streams.
//!
//! A `ToUnicode` CMap maps character codes to Unicode text in PostScript
//! CMap syntax: a code-space section plus `bfchar`/`bfrange` blocks of
//! hex strings, where destination text is UTF-16BE. The writer compresses
//! incrementing single-character runs into `bfrange` entries and the
//! reader parses exactly the syntax the writer produces, so the two
//! round-trip.

use std::fmt::Write as _;

use rustc_hash::FxHashMap;

use crate::codec::{Codec, CodespaceRange};
use crate::{Code, EncodeError};

/// Maximum entries per `bfchar`/`bfrange` block, as required by the CMap
/// format.
const MAX_BLOCK: usize = 100;

/// Upper bound on one `bfrange` expansion, to keep a corrupt range from
/// allocating without limit.
const MAX_RANGE: u32 = 0x10000;

/// Serialize a `ToUnicode` CMap for `codec` and the given code-to-text
/// mappings.
pub fn write_to_unicode(codec: &Codec, mappings: &[(Code, &str)]) -> String {
    let mut sorted: Vec<(Code, &str)> = mappings.to_vec();
    sorted.sort_by_key(|&(code, _)| (code.bytes, code.value));

    // Partition into incrementing runs and single entries. A run needs
    // consecutive code values under one high-byte prefix and
    // single-character texts with consecutive scalar values.
    let mut chars: Vec<(Code, &str)> = Vec::new();
    let mut ranges: Vec<(Code, Code, &str)> = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let (start, text) = sorted[i];
        let mut len = 1u32;
        if single_scalar(text).is_some() {
            while let Some(&(next, next_text)) = sorted.get(i + len as usize) {
                let expected_scalar =
                    single_scalar(text).map(|s| s + len).and_then(char::from_u32);
                let continues = next.bytes == start.bytes
                    && next.value == start.value + len
                    && next.value >> 8 == start.value >> 8
                    && expected_scalar.is_some()
                    && single_scalar(next_text) == expected_scalar.map(u32::from);
                if !continues {
                    break;
                }
                len += 1;
            }
        }
        if len >= 2 {
            let last = Code::new(start.value + len - 1, start.bytes);
            ranges.push((start, last, text));
        } else {
            chars.push((start, text));
        }
        i += len as usize;
    }

    let mut out = String::new();
    out.push_str(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo\n\
         << /Registry (Adobe)\n\
         /Ordering (UCS)\n\
         /Supplement 0\n\
         >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n",
    );
    let _ = writeln!(out, "{} begincodespacerange", codec.ranges().len());
    for range in codec.ranges() {
        let _ = writeln!(
            out,
            "{} {}",
            hex_value(range.low, range.number_bytes),
            hex_value(range.high, range.number_bytes)
        );
    }
    out.push_str("endcodespacerange\n");

    for block in chars.chunks(MAX_BLOCK) {
        let _ = writeln!(out, "{} beginbfchar", block.len());
        for &(code, text) in block {
            let _ = writeln!(out, "{} {}", hex_code(code), hex_text(text));
        }
        out.push_str("endbfchar\n");
    }
    for block in ranges.chunks(MAX_BLOCK) {
        let _ = writeln!(out, "{} beginbfrange", block.len());
        for &(lo, hi, text) in block {
            let _ = writeln!(out, "{} {} {}", hex_code(lo), hex_code(hi), hex_text(text));
        }
        out.push_str("endbfrange\n");
    }

    out.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    out
}

fn single_scalar(text: &str) -> Option<u32> {
    let mut chars = text.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(u32::from(c))
}

fn hex_value(value: u32, bytes: u8) -> String {
    format!("<{:0width$X}>", value, width = usize::from(bytes) * 2)
}

fn hex_code(code: Code) -> String {
    hex_value(code.value, code.bytes)
}

fn hex_text(text: &str) -> String {
    let mut out = String::from("<");
    for unit in text.encode_utf16() {
        let _ = write!(out, "{unit:04X}");
    }
    out.push('>');
    out
}

/// A parsed `ToUnicode` CMap.
#[derive(Debug, Clone)]
pub struct ToUnicode {
    codec: Codec,
    map: FxHashMap<Code, String>,
}

impl ToUnicode {
    /// Parse a `ToUnicode` stream.
    pub fn parse(data: &[u8]) -> Result<Self, EncodeError> {
        let mut lexer = Lexer { data, pos: 0 };
        let mut ranges = Vec::new();
        let mut map = FxHashMap::default();

        while let Some(token) = lexer.next_token()? {
            let Token::Word(word) = token else {
                continue;
            };
            match word {
                b"begincodespacerange" => loop {
                    let Some(low) = hex_or_end(&mut lexer, b"endcodespacerange")? else {
                        break;
                    };
                    let high = expect_hex(&mut lexer)?;
                    if low.len() != high.len() {
                        return Err(EncodeError::MalformedCmap(
                            "code-space bounds differ in length",
                        ));
                    }
                    ranges.push(CodespaceRange {
                        number_bytes: code_from_bytes(&low)?.bytes,
                        low: code_from_bytes(&low)?.value,
                        high: code_from_bytes(&high)?.value,
                    });
                },
                b"beginbfchar" => loop {
                    let Some(src) = hex_or_end(&mut lexer, b"endbfchar")? else {
                        break;
                    };
                    let dst = expect_hex(&mut lexer)?;
                    map.insert(code_from_bytes(&src)?, utf16_to_string(&dst)?);
                },
                b"beginbfrange" => loop {
                    let Some(low) = hex_or_end(&mut lexer, b"endbfrange")? else {
                        break;
                    };
                    let high = expect_hex(&mut lexer)?;
                    let dst = expect_hex(&mut lexer)?;
                    let low = code_from_bytes(&low)?;
                    let high = code_from_bytes(&high)?;
                    if high.bytes != low.bytes || high.value < low.value {
                        return Err(EncodeError::MalformedCmap("bfrange bounds out of order"));
                    }
                    let count = high.value - low.value;
                    if count >= MAX_RANGE {
                        return Err(EncodeError::MalformedCmap("bfrange too large"));
                    }
                    let base = utf16_to_string(&dst)?;
                    for offset in 0..=count {
                        let code = Code::new(low.value + offset, low.bytes);
                        map.insert(code, offset_text(&base, offset)?);
                    }
                },
                _ => {}
            }
        }

        Ok(Self {
            codec: Codec::new(ranges)?,
            map,
        })
    }

    /// The code space the CMap declared.
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// The text for `code`, if mapped.
    pub fn text(&self, code: Code) -> Option<&str> {
        self.map.get(&code).map(String::as_str)
    }

    /// Every mapping, sorted by code.
    pub fn mappings(&self) -> Vec<(Code, &str)> {
        let mut out: Vec<_> = self
            .map
            .iter()
            .map(|(&code, text)| (code, text.as_str()))
            .collect();
        out.sort_by_key(|&(code, _)| (code.bytes, code.value));
        out
    }
}

fn code_from_bytes(bytes: &[u8]) -> Result<Code, EncodeError> {
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(EncodeError::MalformedCmap("code must be 1 to 4 bytes"));
    }
    let value = bytes.iter().fold(0u32, |v, &b| (v << 8) | u32::from(b));
    Ok(Code::new(value, bytes.len() as u8))
}

fn utf16_to_string(bytes: &[u8]) -> Result<String, EncodeError> {
    if bytes.len() % 2 != 0 {
        return Err(EncodeError::MalformedCmap("odd UTF-16 byte count"));
    }
    char::decode_utf16(
        bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]])),
    )
    .collect::<Result<String, _>>()
    .map_err(|_| EncodeError::MalformedCmap("invalid UTF-16 destination"))
}

/// The destination text `offset` steps into a `bfrange`: the last
/// character's scalar value is incremented, the rest stays.
fn offset_text(base: &str, offset: u32) -> Result<String, EncodeError> {
    if offset == 0 {
        return Ok(base.to_owned());
    }
    let mut chars: Vec<char> = base.chars().collect();
    let last = chars
        .pop()
        .ok_or(EncodeError::MalformedCmap("empty bfrange destination"))?;
    let stepped = u32::from(last)
        .checked_add(offset)
        .and_then(char::from_u32)
        .ok_or(EncodeError::MalformedCmap("bfrange leaves Unicode range"))?;
    chars.push(stepped);
    Ok(chars.into_iter().collect())
}

enum Token<'a> {
    Hex(Vec<u8>),
    Word(&'a [u8]),
}

struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn next_token(&mut self) -> Result<Option<Token<'a>>, EncodeError> {
        loop {
            self.skip_filler();
            let Some(&byte) = self.data.get(self.pos) else {
                return Ok(None);
            };
            match byte {
                b'<' if self.data.get(self.pos + 1) == Some(&b'<') => {
                    self.pos += 2;
                }
                b'>' => {
                    // Only reached as part of a `>>` dictionary close.
                    self.pos += 1;
                }
                b'<' => {
                    self.pos += 1;
                    return self.hex_string().map(Some);
                }
                b'(' => self.skip_literal_string()?,
                b'/' => {
                    self.pos += 1;
                    self.skip_regular();
                }
                b'[' | b']' => {
                    return Err(EncodeError::MalformedCmap(
                        "array destinations are not supported",
                    ));
                }
                _ => {
                    let start = self.pos;
                    self.skip_regular();
                    if self.pos == start {
                        // A stray delimiter; never part of our syntax.
                        return Err(EncodeError::MalformedCmap("unexpected delimiter"));
                    }
                    return Ok(Some(Token::Word(&self.data[start..self.pos])));
                }
            }
        }
    }

    fn skip_filler(&mut self) {
        while let Some(&b) = self.data.get(self.pos) {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'%' {
                while self.data.get(self.pos).is_some_and(|&b| b != b'\n') {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn skip_regular(&mut self) {
        while let Some(&b) = self.data.get(self.pos) {
            if b.is_ascii_whitespace() || b"<>()[]/%{}".contains(&b) {
                break;
            }
            self.pos += 1;
        }
    }

    fn skip_literal_string(&mut self) -> Result<(), EncodeError> {
        self.pos += 1;
        let mut depth = 1;
        while depth > 0 {
            let Some(&b) = self.data.get(self.pos) else {
                return Err(EncodeError::MalformedCmap("unterminated string"));
            };
            self.pos += 1;
            match b {
                b'\\' => self.pos += 1,
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn hex_string(&mut self) -> Result<Token<'a>, EncodeError> {
        let mut nibbles = Vec::new();
        loop {
            let Some(&b) = self.data.get(self.pos) else {
                return Err(EncodeError::MalformedCmap("unterminated hex string"));
            };
            self.pos += 1;
            match b {
                b'>' => break,
                b if b.is_ascii_whitespace() => {}
                b => {
                    let digit = (b as char)
                        .to_digit(16)
                        .ok_or(EncodeError::MalformedCmap("invalid hex digit"))?;
                    nibbles.push(digit as u8);
                }
            }
        }
        if nibbles.len() % 2 != 0 {
            return Err(EncodeError::MalformedCmap("odd hex digit count"));
        }
        let bytes = nibbles
            .chunks_exact(2)
            .map(|pair| (pair[0] << 4) | pair[1])
            .collect();
        Ok(Token::Hex(bytes))
    }
}

fn expect_hex(lexer: &mut Lexer<'_>) -> Result<Vec<u8>, EncodeError> {
    match lexer.next_token()? {
        Some(Token::Hex(bytes)) => Ok(bytes),
        _ => Err(EncodeError::MalformedCmap("expected a hex string")),
    }
}

/// The next hex string of a section, or `None` on its end keyword.
fn hex_or_end(lexer: &mut Lexer<'_>, end: &[u8]) -> Result<Option<Vec<u8>>, EncodeError> {
    match lexer.next_token()? {
        Some(Token::Hex(bytes)) => Ok(Some(bytes)),
        Some(Token::Word(word)) if word == end => Ok(None),
        _ => Err(EncodeError::MalformedCmap("unterminated section")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_chars_and_ranges() {
        let codec = Codec::ucs2();
        let mappings = vec![
            (Code::new(0x0041, 2), "A"),
            (Code::new(0x0042, 2), "B"),
            (Code::new(0x0043, 2), "C"),
            (Code::new(0x0100, 2), "ffi"),
        ];
        let out = write_to_unicode(&codec, &mappings);
        assert!(out.contains("1 begincodespacerange"));
        assert!(out.contains("<0000> <FFFF>"));
        // A, B, C collapse into one bfrange.
        assert!(out.contains("<0041> <0043> <0041>"));
        assert!(out.contains("<0100> <006600660069>"));
        assert!(out.ends_with("end\nend\n"));
    }

    #[test]
    fn run_detection_respects_byte_prefix() {
        let codec = Codec::ucs2();
        // 0x00FF and 0x0100 are consecutive but cross the low-byte
        // boundary, so they must stay separate bfchar entries.
        let mappings = vec![(Code::new(0x00FF, 2), "a"), (Code::new(0x0100, 2), "b")];
        let out = write_to_unicode(&codec, &mappings);
        assert!(!out.contains("beginbfrange"));
        assert!(out.contains("2 beginbfchar"));
    }

    #[test]
    fn parse_round_trips_writer_output() {
        let codec = Codec::ucs2();
        let mappings = vec![
            (Code::new(0x0020, 2), " "),
            (Code::new(0x0041, 2), "A"),
            (Code::new(0x0042, 2), "B"),
            (Code::new(0x0043, 2), "C"),
            (Code::new(0x0100, 2), "ffi"),
            (Code::new(0x3042, 2), "\u{3042}"),
        ];
        let out = write_to_unicode(&codec, &mappings);
        let parsed = ToUnicode::parse(out.as_bytes()).unwrap();
        assert_eq!(parsed.codec(), &codec);
        assert_eq!(parsed.mappings(), mappings);
    }

    #[test]
    fn parses_supplementary_plane_text() {
        let codec = Codec::ucs2();
        let mappings = vec![(Code::new(0x0005, 2), "\u{1F600}")];
        let out = write_to_unicode(&codec, &mappings);
        // Surrogate pair in the destination.
        assert!(out.contains("<D83DDE00>"));
        let parsed = ToUnicode::parse(out.as_bytes()).unwrap();
        assert_eq!(parsed.text(Code::new(0x0005, 2)), Some("\u{1F600}"));
    }

    #[test]
    fn bfrange_expands_incrementally() {
        let data = b"1 begincodespacerange <00> <FF> endcodespacerange\n\
            1 beginbfrange <61> <63> <0078> endbfrange";
        let parsed = ToUnicode::parse(data).unwrap();
        assert_eq!(parsed.text(Code::one_byte(0x61)), Some("x"));
        assert_eq!(parsed.text(Code::one_byte(0x62)), Some("y"));
        assert_eq!(parsed.text(Code::one_byte(0x63)), Some("z"));
    }

    #[test]
    fn rejects_malformed_streams() {
        assert!(ToUnicode::parse(b"1 beginbfchar <41>").is_err());
        assert!(ToUnicode::parse(b"1 beginbfchar <4> <0041> endbfchar").is_err());
        assert!(ToUnicode::parse(
            b"1 begincodespacerange <00> <FFFF> endcodespacerange"
        )
        .is_err());
        // No code space at all cannot build a codec.
        assert!(ToUnicode::parse(b"0 begincodespacerange endcodespacerange").is_err());
    }

    #[test]
    fn large_blocks_are_split() {
        let codec = Codec::ucs2();
        // 150 non-consecutive codes force two bfchar blocks.
        let texts: Vec<String> = (0..150u32)
            .map(|i| char::from_u32(0x4E00 + i * 2).map(String::from).unwrap_or_default())
            .collect();
        let mappings: Vec<(Code, &str)> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| (Code::new(2 * i as u32, 2), t.as_str()))
            .collect();
        let out = write_to_unicode(&codec, &mappings);
        assert!(out.contains("100 beginbfchar"));
        assert!(out.contains("50 beginbfchar"));
        let parsed = ToUnicode::parse(out.as_bytes()).unwrap();
        assert_eq!(parsed.mappings().len(), 150);
    }
}
