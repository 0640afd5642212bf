//! `GPOS` subtables: decoding and the positioning engines.
//!
//! Only the mark attachment lookups are implemented: mark-to-base (4)
//! and mark-to-mark (6), plus the extension wrapper (9). They share one
//! binary layout, a mark array keyed by mark class against an anchor
//! matrix on the base side. Pair kerning and the other positioning types
//! decode into [`GposSubtable::Unsupported`].

use std::sync::Arc;

use crate::coverage::{Coverage, LayoutCache};
use crate::gdef::GlyphFilter;
use crate::interp::{Cmd, Interpreter, Kind};
use crate::seq::{prev_kept, RawGlyph};
use crate::LayoutError;

/// An attachment point, already scaled to PDF glyph-space units.
///
/// Anchor formats 2 and 3 carry extra data (a contour point, device
/// deltas) that only matters when hinting or varying the font; both are
/// skipped and contribute nothing here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    /// Horizontal anchor coordinate.
    pub x: i32,
    /// Vertical anchor coordinate.
    pub y: i32,
}

/// One entry of a mark array: the mark's class and its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkRecord {
    /// The mark class, below the subtable's declared class count.
    pub class: u16,
    /// Where the mark attaches.
    pub anchor: Anchor,
}

/// The shared payload of the two mark attachment lookup types.
#[derive(Debug, Clone)]
pub struct MarkAttach {
    /// Coverage of the marks being positioned.
    pub mark_coverage: Arc<Coverage>,
    /// Coverage of the glyphs marks attach to (bases, or other marks for
    /// mark-to-mark).
    pub base_coverage: Arc<Coverage>,
    /// Mark records, indexed by mark coverage index.
    pub marks: Vec<MarkRecord>,
    /// Per base glyph, one optional anchor per mark class.
    pub bases: Vec<Vec<Option<Anchor>>>,
}

/// A decoded `GPOS` subtable.
#[derive(Debug, Clone)]
pub enum GposSubtable {
    /// Mark-to-base attachment (type 4).
    MarkToBase(MarkAttach),
    /// Mark-to-mark attachment (type 6).
    MarkToMark(MarkAttach),
    /// A lookup type or format this crate does not handle.
    Unsupported {
        /// The declared lookup type.
        lookup_type: u16,
        /// The subtable format.
        format: u16,
    },
}

/// Decode the `GPOS` subtable at `offset` for a lookup of `lookup_type`.
pub fn read_subtable(
    ip: &mut Interpreter<'_>,
    cache: &mut LayoutCache,
    offset: u64,
    lookup_type: u16,
) -> Result<GposSubtable, LayoutError> {
    ip.set_a(offset as i64);
    ip.run(&[Cmd::Seek, Cmd::Read16(Kind::UInt)])?;
    let format = ip.a() as u16;

    match (lookup_type, format) {
        (4, 1) => Ok(GposSubtable::MarkToBase(read_mark_attach(
            ip, cache, offset,
        )?)),
        (6, 1) => Ok(GposSubtable::MarkToMark(read_mark_attach(
            ip, cache, offset,
        )?)),
        (9, 1) => {
            let ext_type = ip.run(&[Cmd::Stash])?[0];
            if ext_type == 9 {
                return Err(ip.err("nested extension subtable"));
            }
            ip.run(&[Cmd::Read32(Kind::UInt)])?;
            let ext_offset = ip.a() as u64;
            read_subtable(ip, cache, offset + ext_offset, ext_type)
        }
        _ => Ok(GposSubtable::Unsupported {
            lookup_type,
            format,
        }),
    }
}

/// Read the body shared by MarkBasePos and MarkMarkPos, with the cursor
/// standing right after the format word.
fn read_mark_attach(
    ip: &mut Interpreter<'_>,
    cache: &mut LayoutCache,
    offset: u64,
) -> Result<MarkAttach, LayoutError> {
    let stash = ip.run(&[
        Cmd::Stash, // markCoverageOffset
        Cmd::Stash, // baseCoverageOffset
        Cmd::Stash, // markClassCount
        Cmd::Stash, // markArrayOffset
        Cmd::Stash, // baseArrayOffset
    ])?;
    let class_count = stash[2];
    let mark_coverage = cache.coverage(ip, offset + u64::from(stash[0]))?;
    let base_coverage = cache.coverage(ip, offset + u64::from(stash[1]))?;
    let marks = read_mark_array(ip, offset + u64::from(stash[3]), class_count)?;
    let bases = read_anchor_matrix(ip, offset + u64::from(stash[4]), class_count)?;

    if !mark_coverage.fits(marks.len()) {
        return Err(ip.err("mark coverage larger than mark array"));
    }
    if !base_coverage.fits(bases.len()) {
        return Err(ip.err("base coverage larger than base array"));
    }

    Ok(MarkAttach {
        mark_coverage,
        base_coverage,
        marks,
        bases,
    })
}

fn read_mark_array(
    ip: &mut Interpreter<'_>,
    offset: u64,
    class_count: u16,
) -> Result<Vec<MarkRecord>, LayoutError> {
    ip.set_a(offset as i64);
    let records = ip.run(&[
        Cmd::Seek,
        Cmd::Read16(Kind::UInt),
        Cmd::Loop,
        Cmd::Stash, // markClass
        Cmd::Stash, // markAnchorOffset, relative to the mark array
        Cmd::EndLoop,
    ])?;

    let mut marks = Vec::with_capacity(records.len() / 2);
    for pair in records.chunks_exact(2) {
        let (class, anchor_off) = (pair[0], pair[1]);
        if class >= class_count {
            return Err(ip.err("mark class out of range"));
        }
        marks.push(MarkRecord {
            class,
            anchor: read_anchor(ip, offset + u64::from(anchor_off))?,
        });
    }
    Ok(marks)
}

/// Read a base (or mark2) array: per glyph, `class_count` anchor offsets
/// where zero means no anchor for that class.
fn read_anchor_matrix(
    ip: &mut Interpreter<'_>,
    offset: u64,
    class_count: u16,
) -> Result<Vec<Vec<Option<Anchor>>>, LayoutError> {
    ip.set_a(offset as i64);
    ip.run(&[Cmd::Seek, Cmd::Read16(Kind::UInt)])?;
    let base_count = ip.a();
    ip.set_a(base_count * i64::from(class_count));
    let offsets = ip.run(&[Cmd::Loop, Cmd::Stash, Cmd::EndLoop])?;

    let mut bases = Vec::with_capacity(base_count as usize);
    for row in offsets.chunks_exact(usize::from(class_count.max(1))) {
        let mut anchors = Vec::with_capacity(row.len());
        for &anchor_off in row {
            anchors.push(match anchor_off {
                0 => None,
                off => Some(read_anchor(ip, offset + u64::from(off))?),
            });
        }
        bases.push(anchors);
    }
    Ok(bases)
}

fn read_anchor(ip: &mut Interpreter<'_>, offset: u64) -> Result<Anchor, LayoutError> {
    ip.set_a(offset as i64);
    ip.run(&[
        Cmd::Seek,
        Cmd::Read16(Kind::UInt),
        Cmd::AssertGe(1),
        Cmd::AssertLe(3),
    ])?;
    ip.run(&[Cmd::Read16(Kind::FWord)])?;
    let x = ip.a() as i32;
    ip.run(&[Cmd::Read16(Kind::FWord)])?;
    let y = ip.a() as i32;
    Ok(Anchor { x, y })
}

/// Try `sub` at `pos`, adjusting the mark's offsets on a match.
pub(crate) fn apply(
    sub: &GposSubtable,
    filter: &GlyphFilter,
    seq: &mut [RawGlyph],
    pos: usize,
) -> Result<Option<usize>, LayoutError> {
    let attach = match sub {
        GposSubtable::MarkToBase(attach) | GposSubtable::MarkToMark(attach) => attach,
        GposSubtable::Unsupported { .. } => {
            return Err(LayoutError::Unsupported("unimplemented lookup subtable"));
        }
    };

    let Some(mark_index) = attach.mark_coverage.index(seq[pos].gid) else {
        return Ok(None);
    };
    let record = &attach.marks[usize::from(mark_index)];
    let Some(base_pos) = prev_kept(filter, seq, pos) else {
        return Ok(None);
    };
    let Some(base_index) = attach.base_coverage.index(seq[base_pos].gid) else {
        return Ok(None);
    };
    let Some(&Some(anchor)) = attach.bases[usize::from(base_index)].get(usize::from(record.class))
    else {
        return Ok(None);
    };

    // Offsets are relative to the mark's own pen position, which sits one
    // base advance past the base's origin.
    seq[pos].x_offset = anchor.x - record.anchor.x - seq[base_pos].advance;
    seq[pos].y_offset = anchor.y - record.anchor.y;
    Ok(Some(pos + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interpreter;
    use crate::lookup::tests::Buf;
    use crate::{FontData, GlyphId, TableRegion, Tag};

    fn gpos_interp<S: FontData + AsRef<[u8]>>(data: &S) -> Interpreter<'_> {
        let region = TableRegion::whole(Tag::from_bytes(b"GPOS"), data.as_ref().len() as u64);
        Interpreter::new(data, region, 1000)
    }

    /// MarkBasePos with one mark class: mark 50 attaches to base 20.
    fn mark_base_data() -> Vec<u8> {
        let mut b = Buf::new();
        // Header.
        b.u16(1).u16(12).u16(18).u16(1).u16(24).u16(36);
        // Mark coverage at 12.
        b.u16(1).u16(1).u16(50);
        // Base coverage at 18.
        b.u16(1).u16(1).u16(20);
        // Mark array at 24: one record, anchor at +6.
        b.u16(1).u16(0).u16(6);
        // Mark anchor at 30: format 1, (10, 20).
        b.u16(1).u16(10).u16(20);
        // Base array at 36: one base, anchor at +4.
        b.u16(1).u16(4);
        // Base anchor at 40: format 1, (110, 220).
        b.u16(1).u16(110).u16(220);
        b.0
    }

    #[test]
    fn mark_attaches_to_preceding_base() {
        let data = mark_base_data();
        let mut ip = gpos_interp(&data);
        let mut cache = LayoutCache::default();
        let sub = read_subtable(&mut ip, &mut cache, 0, 4).unwrap();

        let mut seq = vec![RawGlyph::new(GlyphId(20)), RawGlyph::new(GlyphId(50))];
        seq[0].advance = 600;
        let next = apply(&sub, &GlyphFilter::default(), &mut seq, 1).unwrap();
        assert_eq!(next, Some(2));
        assert_eq!(seq[1].x_offset, 110 - 10 - 600);
        assert_eq!(seq[1].y_offset, 220 - 20);
        // The base itself is untouched.
        assert_eq!(seq[0].x_offset, 0);
    }

    #[test]
    fn mark_without_covered_base_is_skipped() {
        let data = mark_base_data();
        let mut ip = gpos_interp(&data);
        let mut cache = LayoutCache::default();
        let sub = read_subtable(&mut ip, &mut cache, 0, 4).unwrap();

        let mut seq = vec![RawGlyph::new(GlyphId(99)), RawGlyph::new(GlyphId(50))];
        let next = apply(&sub, &GlyphFilter::default(), &mut seq, 1).unwrap();
        assert_eq!(next, None);
        assert_eq!(seq[1].x_offset, 0);
    }

    #[test]
    fn mark_class_out_of_range_is_rejected() {
        let mut data = mark_base_data();
        // Patch the mark record's class (offset 26) past the class count.
        data[26] = 0;
        data[27] = 3;
        let mut ip = gpos_interp(&data);
        let mut cache = LayoutCache::default();
        let err = read_subtable(&mut ip, &mut cache, 0, 4).unwrap_err();
        assert!(matches!(err, LayoutError::Decode { .. }));
    }

    #[test]
    fn anchor_scales_to_glyph_space() {
        // Anchor (1024, -512) at 2048 units per em.
        let mut b = Buf::new();
        b.u16(1).u16(1024);
        b.0.extend((-512_i16).to_be_bytes());
        let data = b.0;
        let region = TableRegion::whole(Tag::from_bytes(b"GPOS"), data.len() as u64);
        let mut ip = Interpreter::new(&data, region, 2048);
        let anchor = read_anchor(&mut ip, 0).unwrap();
        assert_eq!(anchor, Anchor { x: 500, y: -250 });
    }

    #[test]
    fn nested_extension_is_rejected() {
        let mut b = Buf::new();
        b.u16(1).u16(9).u32(8);
        let data = b.0;
        let mut ip = gpos_interp(&data);
        let mut cache = LayoutCache::default();
        let err = read_subtable(&mut ip, &mut cache, 0, 9).unwrap_err();
        assert!(matches!(err, LayoutError::Decode { .. }));
    }

    #[test]
    fn pair_positioning_decodes_as_unsupported() {
        let mut b = Buf::new();
        b.u16(1);
        let data = b.0;
        let mut ip = gpos_interp(&data);
        let mut cache = LayoutCache::default();
        let sub = read_subtable(&mut ip, &mut cache, 0, 2).unwrap();
        assert!(matches!(
            sub,
            GposSubtable::Unsupported {
                lookup_type: 2,
                format: 1,
            }
        ));
    }
}
