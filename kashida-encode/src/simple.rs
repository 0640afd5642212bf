//! The one-byte code allocator for simple fonts.
//!
//! A simple font has 256 codes. The encoder assigns one to each
//! (glyph, text) pair the first time it is seen, preferring the slot the
//! text's first character occupies in the Standard Encoding, so that the
//! resulting encoding stays close to what PDF viewers expect even
//! without a `/Differences` array. Code 32 is reserved for the space
//! character because PDF word spacing applies to the literal byte 0x20
//! only.

use log::warn;
use phf::phf_map;
use rustc_hash::FxHashMap;

use kashida_layout::GlyphId;

/// Standard Encoding entries that do not coincide with ASCII: the two
/// typographic quotes sitting on ASCII slots, their ASCII counterparts
/// pushed to the high range, and the 0xA1..=0xFB block.
static EXTENDED: phf::Map<char, u8> = phf_map! {
    '\u{2019}' => 0x27, // quoteright
    '\u{2018}' => 0x60, // quoteleft
    '\u{00A1}' => 0xA1, // exclamdown
    '\u{00A2}' => 0xA2, // cent
    '\u{00A3}' => 0xA3, // sterling
    '\u{2044}' => 0xA4, // fraction
    '\u{00A5}' => 0xA5, // yen
    '\u{0192}' => 0xA6, // florin
    '\u{00A7}' => 0xA7, // section
    '\u{00A4}' => 0xA8, // currency
    '\'' => 0xA9,       // quotesingle
    '\u{201C}' => 0xAA, // quotedblleft
    '\u{00AB}' => 0xAB, // guillemotleft
    '\u{2039}' => 0xAC, // guilsinglleft
    '\u{203A}' => 0xAD, // guilsinglright
    '\u{FB01}' => 0xAE, // fi
    '\u{FB02}' => 0xAF, // fl
    '\u{2013}' => 0xB1, // endash
    '\u{2020}' => 0xB2, // dagger
    '\u{2021}' => 0xB3, // daggerdbl
    '\u{00B7}' => 0xB4, // periodcentered
    '\u{00B6}' => 0xB6, // paragraph
    '\u{2022}' => 0xB7, // bullet
    '\u{201A}' => 0xB8, // quotesinglbase
    '\u{201E}' => 0xB9, // quotedblbase
    '\u{201D}' => 0xBA, // quotedblright
    '\u{00BB}' => 0xBB, // guillemotright
    '\u{2026}' => 0xBC, // ellipsis
    '\u{2030}' => 0xBD, // perthousand
    '\u{00BF}' => 0xBF, // questiondown
    '`' => 0xC1,        // grave
    '\u{00B4}' => 0xC2, // acute
    '\u{02C6}' => 0xC3, // circumflex
    '\u{02DC}' => 0xC4, // tilde
    '\u{00AF}' => 0xC5, // macron
    '\u{02D8}' => 0xC6, // breve
    '\u{02D9}' => 0xC7, // dotaccent
    '\u{00A8}' => 0xC8, // dieresis
    '\u{02DA}' => 0xCA, // ring
    '\u{00B8}' => 0xCB, // cedilla
    '\u{02DD}' => 0xCD, // hungarumlaut
    '\u{02DB}' => 0xCE, // ogonek
    '\u{02C7}' => 0xCF, // caron
    '\u{2014}' => 0xD0, // emdash
    '\u{00C6}' => 0xE1, // AE
    '\u{00AA}' => 0xE3, // ordfeminine
    '\u{0141}' => 0xE8, // Lslash
    '\u{00D8}' => 0xE9, // Oslash
    '\u{0152}' => 0xEA, // OE
    '\u{00BA}' => 0xEB, // ordmasculine
    '\u{00E6}' => 0xF1, // ae
    '\u{0131}' => 0xF5, // dotlessi
    '\u{0142}' => 0xF8, // lslash
    '\u{00F8}' => 0xF9, // oslash
    '\u{0153}' => 0xFA, // oe
    '\u{00DF}' => 0xFB, // germandbls
};

/// The Standard Encoding code of `c`, if it has one.
fn standard_code(c: char) -> Option<u8> {
    if let Some(&code) = EXTENDED.get(&c) {
        return Some(code);
    }
    matches!(c, ' '..='~').then(|| c as u8)
}

/// The inverse table: per code, the Standard Encoding character.
fn standard_runes() -> [Option<char>; 256] {
    let mut table = [None; 256];
    for b in 0x20..=0x7Eu8 {
        table[usize::from(b)] = Some(b as char);
    }
    table[0x27] = Some('\u{2019}');
    table[0x60] = Some('\u{2018}');
    for (&c, &code) in EXTENDED.entries() {
        table[usize::from(code)] = Some(c);
    }
    table
}

/// Greedy one-byte code allocator.
#[derive(Debug)]
pub struct SimpleEncoder {
    assigned: FxHashMap<(GlyphId, String), u8>,
    taken: [bool; 256],
    std_runes: [Option<char>; 256],
    overflowed: bool,
}

impl Default for SimpleEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleEncoder {
    /// An encoder with all 256 codes free.
    pub fn new() -> Self {
        Self {
            assigned: FxHashMap::default(),
            taken: [false; 256],
            std_runes: standard_runes(),
            overflowed: false,
        }
    }

    /// The code for `(gid, text)`, assigning one on first use.
    ///
    /// Assignment preference: the pair's existing code, then the
    /// Standard Encoding slot of the text's first character, then the
    /// free code whose Standard Encoding character is closest to that
    /// character. Code 32 is only ever given to the space character.
    ///
    /// When no free code is left the encoder enters its overflow state
    /// and keeps returning 0; callers must check [`Self::overflowed`]
    /// before trusting further assignments.
    pub fn code(&mut self, gid: GlyphId, text: &str) -> u8 {
        let key = (gid, text.to_owned());
        if let Some(&code) = self.assigned.get(&key) {
            return code;
        }

        let rune = text.chars().next();
        let is_space = rune == Some(' ');
        let preferred = rune
            .and_then(standard_code)
            .filter(|&code| !self.taken[usize::from(code)]);

        let code = preferred.or_else(|| self.closest_free(rune, is_space));
        let Some(code) = code else {
            if !self.overflowed {
                warn!("one-byte code space exhausted, returning code 0");
            }
            self.overflowed = true;
            return 0;
        };

        self.taken[usize::from(code)] = true;
        self.assigned.insert(key, code);
        code
    }

    /// Whether the encoder has run out of codes. Assignments made after
    /// this point all collapsed to code 0 and are unusable.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Every assignment, sorted by code.
    pub fn assignments(&self) -> Vec<(u8, GlyphId, &str)> {
        let mut out: Vec<_> = self
            .assigned
            .iter()
            .map(|((gid, text), &code)| (code, *gid, text.as_str()))
            .collect();
        out.sort_by_key(|&(code, _, _)| code);
        out
    }

    /// The free code whose Standard Encoding character is closest to
    /// `rune`. Closeness is the leading-zero count of the XOR of the two
    /// scalar values; codes with no Standard Encoding character score
    /// below every real match, ties go to the lowest code.
    fn closest_free(&self, rune: Option<char>, is_space: bool) -> Option<u8> {
        let mut best: Option<(i32, u8)> = None;
        for code in 0..=255u8 {
            if self.taken[usize::from(code)] {
                continue;
            }
            if code == 32 && !is_space {
                continue;
            }
            let score = match (rune, self.std_runes[usize::from(code)]) {
                (Some(r), Some(s)) => (r as u32 ^ s as u32).leading_zeros() as i32,
                _ => -1,
            };
            if best.is_none_or(|(b, _)| score > b) {
                best = Some((score, code));
            }
        }
        best.map(|(_, code)| code)
    }
}
