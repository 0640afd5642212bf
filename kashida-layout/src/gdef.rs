//! The `GDEF` table and the per-lookup glyph filter derived from it.
//!
//! `GDEF` supplies two class-defs that matter here: the glyph-class def
//! (base/ligature/mark/component) and the mark-attachment class def. A
//! lookup's flags select which of those classes it ignores while matching;
//! that selection is compiled once per lookup into a [`GlyphFilter`].

use std::sync::Arc;

use crate::coverage::{ClassDef, LayoutCache};
use crate::interp::{Cmd, Interpreter, Kind};
use crate::lookup::LookupFlags;
use crate::{GlyphId, LayoutError};

/// GDEF glyph class of base glyphs.
pub const CLASS_BASE: u16 = 1;
/// GDEF glyph class of ligature glyphs.
pub const CLASS_LIGATURE: u16 = 2;
/// GDEF glyph class of mark glyphs.
pub const CLASS_MARK: u16 = 3;
/// GDEF glyph class of component glyphs.
pub const CLASS_COMPONENT: u16 = 4;

/// The parts of a `GDEF` table used for lookup filtering.
#[derive(Debug, Default)]
pub struct Gdef {
    /// Glyph classes (base/ligature/mark/component), if present.
    pub glyph_classes: Option<Arc<ClassDef>>,
    /// Mark attachment classes, if present.
    pub mark_attach_classes: Option<Arc<ClassDef>>,
    /// Offset of the mark glyph sets structure (version 1.2+).
    ///
    /// Parsed so that the field is not silently skipped over, but mark
    /// filtering sets are not applied during matching; lookups that
    /// request them report their subtables as unsupported.
    pub mark_glyph_sets_offset: Option<u16>,
}

impl Gdef {
    /// Decode a `GDEF` table through `ip`.
    pub fn read(ip: &mut Interpreter<'_>) -> Result<Self, LayoutError> {
        ip.set_a(0);
        let stash = ip.run(&[
            Cmd::Seek,
            Cmd::Read16(Kind::UInt),
            Cmd::AssertEq(1),
            Cmd::Read16(Kind::UInt),
            Cmd::Store(0),
            Cmd::Stash, // glyphClassDefOffset
            Cmd::Stash, // attachListOffset
            Cmd::Stash, // ligCaretListOffset
            Cmd::Stash, // markAttachClassDefOffset
            Cmd::Load(0),
            Cmd::ExitIfLt(2),
            Cmd::Stash, // markGlyphSetsDefOffset
        ])?;

        let mut cache = LayoutCache::default();
        let glyph_classes = match stash[0] {
            0 => None,
            off => Some(cache.class_def(ip, u64::from(off))?),
        };
        let mark_attach_classes = match stash[3] {
            0 => None,
            off => Some(cache.class_def(ip, u64::from(off))?),
        };
        let mark_glyph_sets_offset = stash.get(4).copied().filter(|&off| off != 0);

        Ok(Self {
            glyph_classes,
            mark_attach_classes,
            mark_glyph_sets_offset,
        })
    }

    /// The GDEF glyph class of `gid` (0 if unclassified or no table).
    pub fn glyph_class(&self, gid: GlyphId) -> u16 {
        self.glyph_classes.as_ref().map_or(0, |c| c.get(gid))
    }
}

/// A predicate deciding which glyphs a lookup considers.
///
/// Compiled once per lookup from its flags and the font's `GDEF` data.
/// Without a GDEF glyph-class table the skip bits are inert and every
/// glyph is kept.
#[derive(Debug, Clone, Default)]
pub struct GlyphFilter {
    skip_base: bool,
    skip_ligature: bool,
    skip_mark: bool,
    mark_attach_class: Option<u16>,
    glyph_classes: Option<Arc<ClassDef>>,
    mark_attach_classes: Option<Arc<ClassDef>>,
}

impl GlyphFilter {
    /// Build the filter for a lookup with `flags`.
    pub fn new(flags: LookupFlags, gdef: Option<&Gdef>) -> Self {
        let glyph_classes = gdef.and_then(|g| g.glyph_classes.clone());
        let mark_attach_classes = gdef.and_then(|g| g.mark_attach_classes.clone());

        let mut mark_attach_class = match flags.mark_attachment_class() {
            0 => None,
            c => Some(c),
        };
        // Ignoring all marks subsumes any attachment-class restriction.
        if flags.contains(LookupFlags::IGNORE_MARKS) {
            mark_attach_class = None;
        }
        // The restriction needs the attachment class-def to be decidable.
        if mark_attach_classes.is_none() {
            mark_attach_class = None;
        }

        Self {
            skip_base: flags.contains(LookupFlags::IGNORE_BASE_GLYPHS),
            skip_ligature: flags.contains(LookupFlags::IGNORE_LIGATURES),
            skip_mark: flags.contains(LookupFlags::IGNORE_MARKS),
            mark_attach_class,
            glyph_classes,
            mark_attach_classes,
        }
    }

    /// Whether the lookup considers `gid` at all.
    pub fn keep(&self, gid: GlyphId) -> bool {
        let Some(classes) = &self.glyph_classes else {
            // No glyph-class table: the skip bits have nothing to act on.
            return true;
        };

        let class = classes.get(gid);
        match class {
            CLASS_BASE if self.skip_base => return false,
            CLASS_LIGATURE if self.skip_ligature => return false,
            CLASS_MARK if self.skip_mark => return false,
            _ => {}
        }

        if class == CLASS_MARK {
            if let (Some(required), Some(attach)) =
                (self.mark_attach_class, &self.mark_attach_classes)
            {
                return attach.get(gid) == required;
            }
        }

        true
    }
}
