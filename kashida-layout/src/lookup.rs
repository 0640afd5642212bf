//! GSUB/GPOS table headers, script/language/feature selection and the
//! lookup list.
//!
//! The full lookup list is decoded once into an arena (`Vec<Lookup>`
//! indexed by lookup index). Contextual rules reference other lookups by
//! absolute index, including lookups no selected feature points at, so
//! nested actions store plain indices into the arena rather than
//! references. Feature selection only decides which indices end up in
//! [`LayoutTable::selected`].

use bitflags::bitflags;

use crate::coverage::LayoutCache;
use crate::gdef::{Gdef, GlyphFilter};
use crate::gpos::{self, GposSubtable};
use crate::gsub::{self, GsubSubtable};
use crate::interp::{Cmd, Interpreter, Kind};
use crate::seq::RawGlyph;
use crate::{LayoutError, Tag};

/// Maximum depth of contextual lookups invoking other lookups.
pub(crate) const MAX_NESTING_DEPTH: u32 = 16;

bitflags! {
    /// The flag word of one lookup.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct LookupFlags: u16 {
        /// Process the sequence right to left (GSUB only).
        const RIGHT_TO_LEFT = 0x0001;
        /// Skip base glyphs while matching.
        const IGNORE_BASE_GLYPHS = 0x0002;
        /// Skip ligature glyphs while matching.
        const IGNORE_LIGATURES = 0x0004;
        /// Skip mark glyphs while matching.
        const IGNORE_MARKS = 0x0008;
        /// Restrict marks to a mark glyph set (not applied, see below).
        const USE_MARK_FILTERING_SET = 0x0010;
        /// Restrict marks to one mark-attachment class (high byte).
        const MARK_ATTACHMENT_CLASS = 0xFF00;
    }
}

impl LookupFlags {
    /// The mark-attachment class restriction (0 = none).
    pub fn mark_attachment_class(self) -> u16 {
        (self.bits() & Self::MARK_ATTACHMENT_CLASS.bits()) >> 8
    }
}

/// A nested lookup invocation inside a contextual rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqLookup {
    /// Index into the matched input positions.
    pub seq_index: u16,
    /// Index into the lookup arena.
    pub lookup_index: u16,
}

/// One contextual rule: the input tail to match (the first input glyph is
/// implied by the rule set it belongs to), optional backtrack and
/// lookahead context, and the nested lookups to run on a match.
///
/// `T` is [`crate::GlyphId`] for glyph rules and `u16` for class rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqRule<T> {
    /// Preceding context, closest glyph first.
    pub backtrack: Vec<T>,
    /// Input tail, following the implied first glyph.
    pub input: Vec<T>,
    /// Following context.
    pub lookahead: Vec<T>,
    /// Nested lookups applied on a match.
    pub actions: Vec<SeqLookup>,
}

/// One decoded subtable of either table.
#[derive(Debug, Clone)]
pub enum Subtable {
    /// A GSUB (substitution) subtable.
    Gsub(GsubSubtable),
    /// A GPOS (positioning) subtable.
    Gpos(GposSubtable),
}

/// One lookup of the arena: flags, filter and decoded subtables.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// The raw lookup type this lookup was declared with.
    pub kind: u16,
    /// The lookup's flag word.
    pub flags: LookupFlags,
    /// The mark filtering set index, when `USE_MARK_FILTERING_SET` is set.
    pub mark_filtering_set: Option<u16>,
    /// The glyph filter compiled from the flags and GDEF.
    pub filter: GlyphFilter,
    /// The subtables in declaration order.
    pub subtables: Vec<Subtable>,
}

/// What happens to the source-text attribution of a glyph deleted by a
/// zero-length multiple substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedTextPolicy {
    /// The text is dropped together with the glyph.
    #[default]
    Drop,
    /// The text is prepended to the following glyph, if any.
    AttachToNext,
}

/// Which script, language system and features to select lookups for.
#[derive(Debug, Clone)]
pub struct FeatureSelection {
    /// The script tag, e.g. `latn`. Falls back to `DFLT`, then to the
    /// first script of the table.
    pub script: Tag,
    /// The language system tag; `None` selects the script's default.
    pub lang: Option<Tag>,
    /// The feature tags to include. The language system's required
    /// feature is always included on top of these.
    pub features: Vec<Tag>,
}

impl FeatureSelection {
    /// Select `features` for `script` with the default language system.
    pub fn new(script: Tag, features: &[Tag]) -> Self {
        Self {
            script,
            lang: None,
            features: features.to_vec(),
        }
    }
}

/// A decoded `GSUB` or `GPOS` table: the lookup arena plus the lookup
/// indices selected by script/language/feature resolution.
#[derive(Debug, Clone)]
pub struct LayoutTable {
    /// Every lookup of the table, indexed by lookup index.
    pub lookups: Vec<Lookup>,
    /// Feature-selected lookup indices, deduplicated and sorted.
    pub selected: Vec<u16>,
    /// Text-attribution policy for glyphs deleted by multiple substitution.
    pub deleted_text: DeletedTextPolicy,
}

impl LayoutTable {
    /// Decode the table `ip` is bound to and resolve `selection`.
    ///
    /// A missing script or language system yields an empty selection, not
    /// an error; a nonzero feature-variations offset (header minor
    /// version 1) is reported as unsupported.
    pub fn read(
        ip: &mut Interpreter<'_>,
        gdef: Option<&Gdef>,
        selection: &FeatureSelection,
    ) -> Result<Self, LayoutError> {
        ip.set_a(0);
        ip.run(&[
            Cmd::Seek,
            Cmd::Read16(Kind::UInt),
            Cmd::AssertEq(1),
            Cmd::Read16(Kind::UInt),
            Cmd::AssertLe(1),
        ])?;
        let minor = ip.a();
        let offsets = ip.run(&[Cmd::Stash, Cmd::Stash, Cmd::Stash])?;
        let (script_list, feature_list, lookup_list) = (
            u64::from(offsets[0]),
            u64::from(offsets[1]),
            u64::from(offsets[2]),
        );
        if minor >= 1 {
            ip.run(&[Cmd::Read32(Kind::UInt)])?;
            if ip.a() != 0 {
                return Err(LayoutError::Unsupported("feature variations"));
            }
        }

        let selected = resolve_features(ip, script_list, feature_list, selection)?;
        let lookups = read_lookup_list(ip, gdef, lookup_list)?;

        Ok(Self {
            lookups,
            selected,
            deleted_text: DeletedTextPolicy::default(),
        })
    }

    /// Try one lookup at `pos`, returning the position after the consumed
    /// span on a match.
    ///
    /// Subtables are tried in declaration order and the first one
    /// reporting progress wins; an unsupported subtable is skipped with a
    /// warning so its supported siblings still get their turn.
    pub fn apply_lookup_at(
        &self,
        index: u16,
        seq: &mut Vec<RawGlyph>,
        pos: usize,
        depth: u32,
    ) -> Result<Option<usize>, LayoutError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(LayoutError::Unsupported(
                "contextual lookups nested too deeply",
            ));
        }
        let lookup = self
            .lookups
            .get(usize::from(index))
            .ok_or(LayoutError::Unsupported("lookup index out of range"))?;
        if lookup.flags.contains(LookupFlags::USE_MARK_FILTERING_SET) {
            return Err(LayoutError::Unsupported("mark filtering sets"));
        }
        if pos >= seq.len() || !lookup.filter.keep(seq[pos].gid) {
            return Ok(None);
        }

        for subtable in &lookup.subtables {
            let applied = match subtable {
                Subtable::Gsub(s) => gsub::apply(self, s, &lookup.filter, seq, pos, depth),
                Subtable::Gpos(s) => gpos::apply(s, &lookup.filter, seq, pos),
            };
            match applied {
                Ok(Some(next)) => return Ok(Some(next)),
                Ok(None) => {}
                // An unsupported subtable must not shadow a supported
                // sibling later in the same lookup.
                Err(LayoutError::Unsupported(what)) => {
                    log::warn!("skipping subtable of lookup {index}: unsupported {what}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Run the nested actions of a matched contextual rule.
    ///
    /// `positions` are the matched input positions in the sequence;
    /// action offsets index into them. Nested lookups must not change the
    /// sequence length, otherwise later action positions would silently
    /// shift; that case is unsupported and reported as such.
    pub(crate) fn apply_actions(
        &self,
        seq: &mut Vec<RawGlyph>,
        positions: &[usize],
        actions: &[SeqLookup],
        depth: u32,
    ) -> Result<(), LayoutError> {
        for action in actions {
            let target = positions
                .get(usize::from(action.seq_index))
                .copied()
                .ok_or(LayoutError::Unsupported(
                    "contextual action index out of range",
                ))?;
            let len_before = seq.len();
            self.apply_lookup_at(action.lookup_index, seq, target, depth + 1)?;
            if seq.len() != len_before {
                return Err(LayoutError::Unsupported(
                    "length-changing nested lookup action",
                ));
            }
        }
        Ok(())
    }
}

/// Read a `(tag, offset)` record list as used by the script and feature
/// lists. The tags are collected through a `Call` hook while the offsets
/// go to the stash.
fn read_tag_records(
    ip: &mut Interpreter<'_>,
    offset: u64,
) -> Result<Vec<(Tag, u16)>, LayoutError> {
    ip.set_a(offset as i64);
    let mut tags = Vec::new();
    let offsets = ip.run_with(
        &[
            Cmd::Seek,
            Cmd::Read16(Kind::UInt),
            Cmd::Loop,
            Cmd::Read32(Kind::UInt),
            Cmd::Call,
            Cmd::Stash,
            Cmd::EndLoop,
        ],
        &mut |state| {
            tags.push(Tag::from_u32(state.a as u32));
            Ok(())
        },
    )?;
    Ok(tags.into_iter().zip(offsets).collect())
}

/// Read a `u16` count-prefixed array at `offset`.
fn read_u16_array(ip: &mut Interpreter<'_>, offset: u64) -> Result<Vec<u16>, LayoutError> {
    ip.set_a(offset as i64);
    ip.run(&[
        Cmd::Seek,
        Cmd::Read16(Kind::UInt),
        Cmd::Loop,
        Cmd::Stash,
        Cmd::EndLoop,
    ])
}

fn resolve_features(
    ip: &mut Interpreter<'_>,
    script_list: u64,
    feature_list: u64,
    selection: &FeatureSelection,
) -> Result<Vec<u16>, LayoutError> {
    const NO_FEATURE: u16 = 0xFFFF;

    let scripts = read_tag_records(ip, script_list)?;
    let script = scripts
        .iter()
        .find(|(tag, _)| *tag == selection.script)
        .or_else(|| {
            scripts
                .iter()
                .find(|(tag, _)| *tag == Tag::from_bytes(b"DFLT"))
        })
        .or_else(|| scripts.first());
    let Some(&(_, script_offset)) = script else {
        return Ok(Vec::new());
    };
    let script_base = script_list + u64::from(script_offset);

    // Script table: default LangSys offset, then (tag, offset) records.
    ip.set_a(script_base as i64);
    let mut lang_tags = Vec::new();
    let stash = ip.run_with(
        &[
            Cmd::Seek,
            Cmd::Stash, // defaultLangSysOffset
            Cmd::Read16(Kind::UInt),
            Cmd::Loop,
            Cmd::Read32(Kind::UInt),
            Cmd::Call,
            Cmd::Stash,
            Cmd::EndLoop,
        ],
        &mut |state| {
            lang_tags.push(Tag::from_u32(state.a as u32));
            Ok(())
        },
    )?;
    let default_lang_sys = stash[0];
    let lang_sys_offset = selection
        .lang
        .and_then(|lang| {
            lang_tags
                .iter()
                .zip(&stash[1..])
                .find(|(tag, _)| **tag == lang)
                .map(|(_, &off)| off)
        })
        .or(match default_lang_sys {
            0 => None,
            off => Some(off),
        });
    let Some(lang_sys_offset) = lang_sys_offset else {
        // No language system: the table contributes no lookups.
        return Ok(Vec::new());
    };

    // LangSys: lookupOrder (reserved), required feature index, then the
    // optional feature indices.
    ip.set_a((script_base + u64::from(lang_sys_offset)) as i64);
    let stash = ip.run(&[
        Cmd::Seek,
        Cmd::Read16(Kind::UInt), // lookupOrderOffset, reserved
        Cmd::Stash,              // requiredFeatureIndex
        Cmd::Read16(Kind::UInt),
        Cmd::Loop,
        Cmd::Stash,
        Cmd::EndLoop,
    ])?;
    let required = stash[0];
    let feature_indices = &stash[1..];

    let features = read_tag_records(ip, feature_list)?;
    let mut selected = Vec::new();
    let mut add_feature = |ip: &mut Interpreter<'_>, index: u16| -> Result<(), LayoutError> {
        let Some(&(_, offset)) = features.get(usize::from(index)) else {
            return Err(ip.err("feature index out of range"));
        };
        // Feature table: featureParams offset (ignored), lookup indices.
        let base = feature_list + u64::from(offset);
        ip.set_a(base as i64);
        let lookups = ip.run(&[
            Cmd::Seek,
            Cmd::Read16(Kind::UInt), // featureParamsOffset
            Cmd::Read16(Kind::UInt),
            Cmd::Loop,
            Cmd::Stash,
            Cmd::EndLoop,
        ])?;
        selected.extend(lookups);
        Ok(())
    };

    if required != NO_FEATURE {
        add_feature(ip, required)?;
    }
    for &index in feature_indices {
        if index == required {
            continue;
        }
        let Some(&(tag, _)) = features.get(usize::from(index)) else {
            return Err(ip.err("feature index out of range"));
        };
        if selection.features.contains(&tag) {
            add_feature(ip, index)?;
        }
    }

    selected.sort_unstable();
    selected.dedup();
    Ok(selected)
}

fn read_lookup_list(
    ip: &mut Interpreter<'_>,
    gdef: Option<&Gdef>,
    lookup_list: u64,
) -> Result<Vec<Lookup>, LayoutError> {
    let offsets = read_u16_array(ip, lookup_list)?;
    let mut cache = LayoutCache::default();
    let table_tag = ip.region().tag;

    let mut lookups = Vec::with_capacity(offsets.len());
    for offset in offsets {
        let base = lookup_list + u64::from(offset);
        ip.set_a(base as i64);
        let stash = ip.run(&[
            Cmd::Seek,
            Cmd::Stash, // lookupType
            Cmd::Stash, // lookupFlag
            Cmd::Read16(Kind::UInt),
            Cmd::Loop,
            Cmd::Stash, // subtableOffsets
            Cmd::EndLoop,
        ])?;
        let kind = stash[0];
        let flags = LookupFlags::from_bits_retain(stash[1]);
        let subtable_offsets = &stash[2..];

        let mark_filtering_set = if flags.contains(LookupFlags::USE_MARK_FILTERING_SET) {
            Some(ip.run(&[Cmd::Stash])?[0])
        } else {
            None
        };

        let mut subtables = Vec::with_capacity(subtable_offsets.len());
        for &sub in subtable_offsets {
            let sub_base = base + u64::from(sub);
            let subtable = if table_tag == Tag::from_bytes(b"GSUB") {
                Subtable::Gsub(gsub::read_subtable(ip, &mut cache, sub_base, kind)?)
            } else if table_tag == Tag::from_bytes(b"GPOS") {
                Subtable::Gpos(gpos::read_subtable(ip, &mut cache, sub_base, kind)?)
            } else {
                return Err(ip.err("not a layout table"));
            };
            subtables.push(subtable);
        }

        lookups.push(Lookup {
            kind,
            flags,
            mark_filtering_set,
            filter: GlyphFilter::new(flags, gdef),
            subtables,
        });
    }

    Ok(lookups)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::interp::Interpreter;
    use crate::seq::{apply_lookups, RawGlyph};
    use crate::{FontData, GlyphId, TableRegion};

    /// A little builder for synthetic layout tables.
    pub(crate) struct Buf(pub Vec<u8>);

    impl Buf {
        pub(crate) fn new() -> Self {
            Self(Vec::new())
        }

        pub(crate) fn u16(&mut self, v: u16) -> &mut Self {
            self.0.extend(v.to_be_bytes());
            self
        }

        pub(crate) fn u32(&mut self, v: u32) -> &mut Self {
            self.0.extend(v.to_be_bytes());
            self
        }

        pub(crate) fn tag(&mut self, tag: &[u8; 4]) -> &mut Self {
            self.0.extend(tag);
            self
        }
    }

    pub(crate) fn gsub_interp<S: FontData + AsRef<[u8]>>(data: &S) -> Interpreter<'_> {
        let region = TableRegion::whole(Tag::from_bytes(b"GSUB"), data.as_ref().len() as u64);
        Interpreter::new(data, region, 1000)
    }

    /// A minimal GSUB: one `latn` script, one `liga` feature pointing at
    /// lookup 0, which is a single substitution (delta +5) covering
    /// glyph 10.
    fn single_subst_gsub(script: &[u8; 4], lookup_type: u16) -> Vec<u8> {
        let mut b = Buf::new();
        // Header.
        b.u16(1).u16(0).u16(10).u16(30).u16(44);
        // Script list at 10.
        b.u16(1).tag(script).u16(8);
        // Script table at 18: default LangSys at +4, no named records.
        b.u16(4).u16(0);
        // LangSys at 22.
        b.u16(0).u16(0xFFFF).u16(1).u16(0);
        // Feature list at 30.
        b.u16(1).tag(b"liga").u16(8);
        // Feature table at 38.
        b.u16(0).u16(1).u16(0);
        // Lookup list at 44.
        b.u16(1).u16(4);
        match lookup_type {
            1 => {
                // Lookup at 48: single substitution.
                b.u16(1).u16(0).u16(1).u16(8);
                // SingleSubst format 1 at 56.
                b.u16(1).u16(6).u16(5);
                // Coverage at 62.
                b.u16(1).u16(1).u16(10);
            }
            7 => {
                // Lookup at 48: extension wrapping a single substitution.
                b.u16(7).u16(0).u16(1).u16(8);
                // Extension subtable at 56.
                b.u16(1).u16(1).u32(8);
                // SingleSubst format 1 at 64.
                b.u16(1).u16(6).u16(5);
                // Coverage at 70.
                b.u16(1).u16(1).u16(10);
            }
            _ => unreachable!(),
        }
        b.0
    }

    fn liga_selection(script: &[u8; 4]) -> FeatureSelection {
        FeatureSelection::new(Tag::from_bytes(script), &[Tag::from_bytes(b"liga")])
    }

    #[test]
    fn selects_feature_lookups() {
        let data = single_subst_gsub(b"latn", 1);
        let mut ip = gsub_interp(&data);
        let table = LayoutTable::read(&mut ip, None, &liga_selection(b"latn")).unwrap();
        assert_eq!(table.selected, vec![0]);
        assert_eq!(table.lookups.len(), 1);

        let mut seq = vec![RawGlyph::new(GlyphId(10)), RawGlyph::new(GlyphId(11))];
        apply_lookups(&table, &mut seq).unwrap();
        assert_eq!(seq[0].gid, GlyphId(15));
        assert_eq!(seq[1].gid, GlyphId(11));
    }

    #[test]
    fn falls_back_to_dflt_script() {
        let data = single_subst_gsub(b"DFLT", 1);
        let mut ip = gsub_interp(&data);
        let table = LayoutTable::read(&mut ip, None, &liga_selection(b"arab")).unwrap();
        assert_eq!(table.selected, vec![0]);
    }

    #[test]
    fn falls_back_to_first_script() {
        let data = single_subst_gsub(b"grek", 1);
        let mut ip = gsub_interp(&data);
        let table = LayoutTable::read(&mut ip, None, &liga_selection(b"arab")).unwrap();
        assert_eq!(table.selected, vec![0]);
    }

    #[test]
    fn unselected_feature_keeps_arena() {
        let data = single_subst_gsub(b"latn", 1);
        let mut ip = gsub_interp(&data);
        let selection = FeatureSelection::new(Tag::from_bytes(b"latn"), &[]);
        let table = LayoutTable::read(&mut ip, None, &selection).unwrap();
        // `liga` was not asked for, but the arena still holds the lookup
        // for contextual rules to reference.
        assert!(table.selected.is_empty());
        assert_eq!(table.lookups.len(), 1);
    }

    #[test]
    fn extension_subtable_redirects() {
        let data = single_subst_gsub(b"latn", 7);
        let mut ip = gsub_interp(&data);
        let table = LayoutTable::read(&mut ip, None, &liga_selection(b"latn")).unwrap();

        let mut seq = vec![RawGlyph::new(GlyphId(10))];
        apply_lookups(&table, &mut seq).unwrap();
        assert_eq!(seq[0].gid, GlyphId(15));
    }

    #[test]
    fn extension_of_extension_is_rejected() {
        let mut data = single_subst_gsub(b"latn", 7);
        // Patch the wrapped lookup type (offset 58) to extension again.
        data[58] = 0;
        data[59] = 7;
        let mut ip = gsub_interp(&data);
        let err = LayoutTable::read(&mut ip, None, &liga_selection(b"latn")).unwrap_err();
        assert!(matches!(err, LayoutError::Decode { .. }));
    }

    #[test]
    fn nonzero_feature_variations_unsupported() {
        let mut b = Buf::new();
        b.u16(1).u16(1).u16(14).u16(16).u16(18).u32(100);
        // Empty script, feature and lookup lists.
        b.u16(0).u16(0).u16(0);
        let data = b.0;
        let mut ip = gsub_interp(&data);
        let err = LayoutTable::read(&mut ip, None, &liga_selection(b"latn")).unwrap_err();
        assert_eq!(err, LayoutError::Unsupported("feature variations"));
    }

    #[test]
    fn missing_language_system_selects_nothing() {
        let mut b = Buf::new();
        // Header, script list with a script that has no LangSys at all.
        b.u16(1).u16(0).u16(10).u16(22).u16(24);
        // Script list at 10.
        b.u16(1).tag(b"latn").u16(8);
        // Script table at 18: no default LangSys, no records.
        b.u16(0).u16(0);
        // Feature list at 22, lookup list at 24, both empty.
        b.u16(0).u16(0);
        let data = b.0;
        let mut ip = gsub_interp(&data);
        let table = LayoutTable::read(&mut ip, None, &liga_selection(b"latn")).unwrap();
        assert!(table.selected.is_empty());
    }

    #[test]
    fn mark_attachment_class_from_flags() {
        let flags = LookupFlags::from_bits_retain(0x0300 | 0x0002);
        assert_eq!(flags.mark_attachment_class(), 3);
        assert!(flags.contains(LookupFlags::IGNORE_BASE_GLYPHS));
    }
}
