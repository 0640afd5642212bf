//! Coverage and class-definition tables.
//!
//! Nearly every GSUB/GPOS subtable starts with one of these two
//! structures: a coverage table maps a sparse set of glyph ids to dense
//! indices, a class-def table maps glyph ids to small integer classes.
//! Both come in an explicit-list format 1 and a range-based format 2.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::interp::{Cmd, Interpreter, Kind};
use crate::{GlyphId, LayoutError};

/// An ordered injective mapping from a sparse glyph-id set to the dense
/// indices `0..n`.
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    map: FxHashMap<GlyphId, u16>,
}

impl Coverage {
    /// The coverage index of `gid`, if covered.
    pub fn index(&self, gid: GlyphId) -> Option<u16> {
        self.map.get(&gid).copied()
    }

    /// Whether `gid` is covered.
    pub fn contains(&self, gid: GlyphId) -> bool {
        self.map.contains_key(&gid)
    }

    /// The number of covered glyphs.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no glyph is covered.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Whether every coverage index falls inside `[0, size)`.
    ///
    /// Subtables that use coverage indices to index a fixed-size parallel
    /// array must call this before trusting the indices; glyph ids are
    /// untrusted input and format 2 ranges can produce arbitrary indices.
    pub fn fits(&self, size: usize) -> bool {
        self.map.values().all(|&i| usize::from(i) < size)
    }

    #[cfg(test)]
    pub(crate) fn from_pairs(pairs: &[(u16, u16)]) -> Self {
        Self {
            map: pairs.iter().map(|&(g, i)| (GlyphId(g), i)).collect(),
        }
    }
}

/// A mapping from glyph ids to integer classes. Class 0 is the implicit
/// default for every glyph not mentioned.
#[derive(Debug, Clone, Default)]
pub struct ClassDef {
    classes: FxHashMap<GlyphId, u16>,
}

impl ClassDef {
    /// The class of `gid` (0 if unassigned).
    pub fn get(&self, gid: GlyphId) -> u16 {
        self.classes.get(&gid).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn from_pairs(pairs: &[(u16, u16)]) -> Self {
        Self {
            classes: pairs.iter().map(|&(g, c)| (GlyphId(g), c)).collect(),
        }
    }
}

/// Decode a coverage table at `offset` within the interpreter's table.
pub fn read_coverage(ip: &mut Interpreter<'_>, offset: u64) -> Result<Coverage, LayoutError> {
    ip.set_a(offset as i64);
    ip.run(&[Cmd::Seek, Cmd::Read16(Kind::UInt)])?;

    let mut map = FxHashMap::default();
    match ip.a() {
        1 => {
            let glyphs = ip.run(&[
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            for (i, gid) in glyphs.into_iter().enumerate() {
                map.insert(GlyphId(gid), i as u16);
            }
        }
        2 => {
            let ranges = ip.run(&[
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::Stash,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            for chunk in ranges.chunks_exact(3) {
                let (start, end, first) = (chunk[0], chunk[1], chunk[2]);
                if end < start {
                    return Err(ip.err("coverage range out of order"));
                }
                for gid in start..=end {
                    let index = u32::from(first) + u32::from(gid - start);
                    let index =
                        u16::try_from(index).map_err(|_| ip.err("coverage index overflow"))?;
                    map.insert(GlyphId(gid), index);
                }
            }
        }
        _ => return Err(ip.err("unknown coverage format")),
    }

    Ok(Coverage { map })
}

/// Decode a class-def table at `offset` within the interpreter's table.
pub fn read_class_def(ip: &mut Interpreter<'_>, offset: u64) -> Result<ClassDef, LayoutError> {
    ip.set_a(offset as i64);
    ip.run(&[Cmd::Seek, Cmd::Read16(Kind::UInt)])?;

    let mut classes = FxHashMap::default();
    match ip.a() {
        1 => {
            ip.run(&[Cmd::Read16(Kind::UInt)])?;
            let start = ip.a() as u16;
            let values = ip.run(&[
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            for (i, class) in values.into_iter().enumerate() {
                if class != 0 {
                    let gid = start
                        .checked_add(i as u16)
                        .ok_or_else(|| ip.err("class array past end of glyph space"))?;
                    classes.insert(GlyphId(gid), class);
                }
            }
        }
        2 => {
            let ranges = ip.run(&[
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::Stash,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            for chunk in ranges.chunks_exact(3) {
                let (start, end, class) = (chunk[0], chunk[1], chunk[2]);
                if end < start {
                    return Err(ip.err("class range out of order"));
                }
                if class == 0 {
                    continue;
                }
                for gid in start..=end {
                    classes.insert(GlyphId(gid), class);
                }
            }
        }
        _ => return Err(ip.err("unknown class-def format")),
    }

    Ok(ClassDef { classes })
}

/// Per-offset caches for coverage and class-def tables.
///
/// The same subtable is frequently referenced from several lookups, so
/// decoding is memoized per offset within one table.
#[derive(Debug, Default)]
pub struct LayoutCache {
    coverage: FxHashMap<u64, Arc<Coverage>>,
    class_defs: FxHashMap<u64, Arc<ClassDef>>,
}

impl LayoutCache {
    /// The coverage table at `offset`, decoding it on first use.
    pub fn coverage(
        &mut self,
        ip: &mut Interpreter<'_>,
        offset: u64,
    ) -> Result<Arc<Coverage>, LayoutError> {
        if let Some(cov) = self.coverage.get(&offset) {
            return Ok(cov.clone());
        }
        let cov = Arc::new(read_coverage(ip, offset)?);
        self.coverage.insert(offset, cov.clone());
        Ok(cov)
    }

    /// The class-def table at `offset`, decoding it on first use.
    pub fn class_def(
        &mut self,
        ip: &mut Interpreter<'_>,
        offset: u64,
    ) -> Result<Arc<ClassDef>, LayoutError> {
        if let Some(cd) = self.class_defs.get(&offset) {
            return Ok(cd.clone());
        }
        let cd = Arc::new(read_class_def(ip, offset)?);
        self.class_defs.insert(offset, cd.clone());
        Ok(cd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FontData, Tag, TableRegion};

    fn interp<S: FontData + AsRef<[u8]>>(data: &S) -> Interpreter<'_> {
        let region = TableRegion::whole(Tag::from_bytes(b"GSUB"), data.as_ref().len() as u64);
        Interpreter::new(data, region, 1000)
    }

    fn be16(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    #[test]
    fn coverage_format_1() {
        let data = be16(&[1, 3, 5, 10, 20]);
        let mut ip = interp(&data);
        let cov = read_coverage(&mut ip, 0).unwrap();
        assert_eq!(cov.index(GlyphId(5)), Some(0));
        assert_eq!(cov.index(GlyphId(10)), Some(1));
        assert_eq!(cov.index(GlyphId(20)), Some(2));
        assert_eq!(cov.index(GlyphId(15)), None);
        assert_eq!(cov.len(), 3);
    }

    #[test]
    fn coverage_format_2() {
        let data = be16(&[2, 1, 100, 103, 0]);
        let mut ip = interp(&data);
        let cov = read_coverage(&mut ip, 0).unwrap();
        assert_eq!(cov.index(GlyphId(100)), Some(0));
        assert_eq!(cov.index(GlyphId(101)), Some(1));
        assert_eq!(cov.index(GlyphId(102)), Some(2));
        assert_eq!(cov.index(GlyphId(103)), Some(3));
        assert_eq!(cov.index(GlyphId(104)), None);
    }

    #[test]
    fn coverage_rejects_reversed_range() {
        let data = be16(&[2, 1, 103, 100, 0]);
        let mut ip = interp(&data);
        assert!(read_coverage(&mut ip, 0).is_err());
    }

    #[test]
    fn coverage_fits() {
        let data = be16(&[1, 2, 7, 8]);
        let mut ip = interp(&data);
        let cov = read_coverage(&mut ip, 0).unwrap();
        assert!(cov.fits(2));
        assert!(!cov.fits(1));
    }

    #[test]
    fn class_def_format_1() {
        // Glyphs 40..44 with classes 0, 1, 2, 1.
        let data = be16(&[1, 40, 4, 0, 1, 2, 1]);
        let mut ip = interp(&data);
        let cd = read_class_def(&mut ip, 0).unwrap();
        assert_eq!(cd.get(GlyphId(40)), 0);
        assert_eq!(cd.get(GlyphId(41)), 1);
        assert_eq!(cd.get(GlyphId(42)), 2);
        assert_eq!(cd.get(GlyphId(43)), 1);
        assert_eq!(cd.get(GlyphId(44)), 0);
    }

    #[test]
    fn class_def_format_2() {
        let data = be16(&[2, 2, 10, 12, 3, 20, 20, 0]);
        let mut ip = interp(&data);
        let cd = read_class_def(&mut ip, 0).unwrap();
        assert_eq!(cd.get(GlyphId(10)), 3);
        assert_eq!(cd.get(GlyphId(12)), 3);
        assert_eq!(cd.get(GlyphId(13)), 0);
        // Class 0 ranges are skipped entirely.
        assert_eq!(cd.get(GlyphId(20)), 0);
    }

    #[test]
    fn cache_decodes_once() {
        let data = be16(&[1, 1, 7]);
        let mut ip = interp(&data);
        let mut cache = LayoutCache::default();
        let a = cache.coverage(&mut ip, 0).unwrap();
        let b = cache.coverage(&mut ip, 0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
