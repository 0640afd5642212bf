//! Run-length coding of CID width maps, mirroring the PDF `W` array.
//!
//! A `W` array mixes two group forms: `first last width` for a run of
//! consecutive CIDs sharing one width, and `first [w1 w2 ...]` for an
//! irregular stretch. CIDs in no group get the font's default width
//! (`DW`), so default-width entries are omitted entirely.

use rustc_hash::FxHashMap;

use crate::Cid;

/// Minimum length of an equal-width run worth a range group. A range
/// costs three numbers while array entries cost one each plus two per
/// array, so shorter runs stay inline.
const MIN_RANGE_RUN: usize = 4;

/// One group of a width array.
#[derive(Debug, Clone, PartialEq)]
pub enum WidthGroup {
    /// Consecutive CIDs `first..=last`, all of width `width`.
    Range {
        /// First CID of the run.
        first: Cid,
        /// Last CID of the run, inclusive.
        last: Cid,
        /// The shared width in 1/1000 em units.
        width: f32,
    },
    /// Consecutive CIDs starting at `first` with per-CID widths.
    Array {
        /// First CID of the stretch.
        first: Cid,
        /// One width per CID.
        widths: Vec<f32>,
    },
}

/// Encode a CID width map into width groups.
///
/// Entries equal to `default_width` are dropped; the rest is split into
/// maximal consecutive-CID stretches, with equal-width runs of at least
/// [`MIN_RANGE_RUN`] pulled out as ranges.
pub fn encode_widths(widths: &FxHashMap<Cid, f32>, default_width: f32) -> Vec<WidthGroup> {
    let mut entries: Vec<(Cid, f32)> = widths
        .iter()
        .filter(|&(_, &w)| w != default_width)
        .map(|(&cid, &w)| (cid, w))
        .collect();
    entries.sort_by_key(|&(cid, _)| cid);

    let mut groups = Vec::new();
    let mut start = 0;
    while start < entries.len() {
        let mut end = start + 1;
        while end < entries.len() && entries[end].0 == entries[end - 1].0 + 1 {
            end += 1;
        }
        encode_stretch(&entries[start..end], &mut groups);
        start = end;
    }
    groups
}

/// Split one consecutive-CID stretch into range and array groups.
fn encode_stretch(stretch: &[(Cid, f32)], out: &mut Vec<WidthGroup>) {
    let flush = |from: usize, to: usize, out: &mut Vec<WidthGroup>| {
        if from < to {
            out.push(WidthGroup::Array {
                first: stretch[from].0,
                widths: stretch[from..to].iter().map(|&(_, w)| w).collect(),
            });
        }
    };

    let mut pending = 0;
    let mut i = 0;
    while i < stretch.len() {
        let mut j = i + 1;
        while j < stretch.len() && stretch[j].1 == stretch[i].1 {
            j += 1;
        }
        if j - i >= MIN_RANGE_RUN {
            flush(pending, i, out);
            out.push(WidthGroup::Range {
                first: stretch[i].0,
                last: stretch[j - 1].0,
                width: stretch[i].1,
            });
            pending = j;
        }
        i = j;
    }
    flush(pending, stretch.len(), out);
}

/// Expand width groups back into an explicit CID width map.
pub fn decode_widths(groups: &[WidthGroup]) -> FxHashMap<Cid, f32> {
    let mut map = FxHashMap::default();
    for group in groups {
        match group {
            WidthGroup::Range { first, last, width } => {
                for cid in *first..=*last {
                    map.insert(cid, *width);
                }
            }
            WidthGroup::Array { first, widths } => {
                for (i, &w) in widths.iter().enumerate() {
                    let Some(cid) = first.checked_add(i as Cid) else {
                        break;
                    };
                    map.insert(cid, w);
                }
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(Cid, f32)]) -> FxHashMap<Cid, f32> {
        entries.iter().copied().collect()
    }

    #[test]
    fn all_default_widths_encode_to_nothing() {
        let widths = map(&[(1, 1000.0), (2, 1000.0), (500, 1000.0)]);
        assert!(encode_widths(&widths, 1000.0).is_empty());
    }

    #[test]
    fn equal_run_becomes_a_range() {
        let widths = map(&[(10, 600.0), (11, 600.0), (12, 600.0), (13, 600.0), (14, 600.0)]);
        let groups = encode_widths(&widths, 1000.0);
        assert_eq!(
            groups,
            vec![WidthGroup::Range {
                first: 10,
                last: 14,
                width: 600.0,
            }]
        );
    }

    #[test]
    fn irregular_widths_become_an_array() {
        let widths = map(&[(10, 600.0), (11, 610.0), (12, 620.0)]);
        let groups = encode_widths(&widths, 1000.0);
        assert_eq!(
            groups,
            vec![WidthGroup::Array {
                first: 10,
                widths: vec![600.0, 610.0, 620.0],
            }]
        );
    }

    #[test]
    fn mixed_runs_use_both_forms() {
        // Irregular head, a long equal run, an irregular tail.
        let entries: Vec<(Cid, f32)> = vec![
            (10, 500.0),
            (11, 510.0),
            (12, 600.0),
            (13, 600.0),
            (14, 600.0),
            (15, 600.0),
            (16, 700.0),
        ];
        let groups = encode_widths(&map(&entries), 1000.0);
        assert_eq!(
            groups,
            vec![
                WidthGroup::Array {
                    first: 10,
                    widths: vec![500.0, 510.0],
                },
                WidthGroup::Range {
                    first: 12,
                    last: 15,
                    width: 600.0,
                },
                WidthGroup::Array {
                    first: 16,
                    widths: vec![700.0],
                },
            ]
        );
    }

    #[test]
    fn gaps_split_stretches() {
        let widths = map(&[(1, 250.0), (2, 250.0), (100, 250.0)]);
        let groups = encode_widths(&widths, 1000.0);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn encode_decode_round_trips() {
        let original = map(&[
            (5, 320.0),
            (6, 320.0),
            (7, 320.0),
            (8, 320.0),
            (9, 900.0),
            (200, 444.0),
            (201, 445.0),
            // Default-width entries disappear in the round trip.
            (300, 1000.0),
        ]);
        let decoded = decode_widths(&encode_widths(&original, 1000.0));
        let mut expected = original.clone();
        expected.remove(&300);
        assert_eq!(decoded, expected);
    }
}
