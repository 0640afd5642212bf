//! `GSUB` subtables: decoding and the substitution engines.
//!
//! Supported lookup types are single (1), multiple (2), ligature (4),
//! class-based context (5 format 2), chained context (6, all three
//! formats) and the extension wrapper (7). Everything else decodes into
//! [`GsubSubtable::Unsupported`] so that a single exotic lookup never
//! poisons the rest of the table.

use std::sync::Arc;

use crate::coverage::{ClassDef, Coverage, LayoutCache};
use crate::gdef::GlyphFilter;
use crate::interp::{Cmd, Interpreter, Kind};
use crate::lookup::{DeletedTextPolicy, LayoutTable, SeqLookup, SeqRule};
use crate::seq::{next_kept, prev_kept, RawGlyph};
use crate::{GlyphId, LayoutError};

/// One ligature: the component tail to match after the first glyph, and
/// the glyph that replaces the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ligature {
    /// The components following the (coverage-implied) first glyph.
    pub components: Vec<GlyphId>,
    /// The ligature glyph.
    pub glyph: GlyphId,
}

/// A decoded `GSUB` subtable.
#[derive(Debug, Clone)]
pub enum GsubSubtable {
    /// Single substitution, format 1: add a constant to the glyph id.
    SingleDelta {
        /// The glyphs this subtable applies to.
        coverage: Arc<Coverage>,
        /// Added to the glyph id modulo 65536.
        delta: i16,
    },
    /// Single substitution, format 2: replace via a parallel array.
    SingleList {
        /// The glyphs this subtable applies to.
        coverage: Arc<Coverage>,
        /// Replacement glyphs, indexed by coverage index.
        substitutes: Vec<GlyphId>,
    },
    /// Multiple substitution: one glyph becomes a (possibly empty) run.
    Multiple {
        /// The glyphs this subtable applies to.
        coverage: Arc<Coverage>,
        /// Replacement sequences, indexed by coverage index.
        sequences: Vec<Vec<GlyphId>>,
    },
    /// Ligature substitution: a glyph run collapses into one glyph.
    Ligature {
        /// Coverage of the first glyph of each ligature.
        coverage: Arc<Coverage>,
        /// Candidate ligatures per first glyph, in declaration order.
        sets: Vec<Vec<Ligature>>,
    },
    /// Contextual substitution keyed by glyph classes (type 5 format 2).
    ContextClass {
        /// Coverage of the first input glyph.
        coverage: Arc<Coverage>,
        /// Classes of the input glyphs.
        classes: Arc<ClassDef>,
        /// Rule sets, indexed by the class of the first input glyph.
        rules: Vec<Vec<SeqRule<u16>>>,
    },
    /// Chained context keyed by glyph ids (type 6 format 1).
    ChainedGlyph {
        /// Coverage of the first input glyph.
        coverage: Arc<Coverage>,
        /// Rule sets, indexed by the coverage index of the first glyph.
        rules: Vec<Vec<SeqRule<GlyphId>>>,
    },
    /// Chained context keyed by glyph classes (type 6 format 2).
    ChainedClass {
        /// Coverage of the first input glyph.
        coverage: Arc<Coverage>,
        /// Classes used for the backtrack context.
        backtrack_classes: Arc<ClassDef>,
        /// Classes used for the input run.
        input_classes: Arc<ClassDef>,
        /// Classes used for the lookahead context.
        lookahead_classes: Arc<ClassDef>,
        /// Rule sets, indexed by the input class of the first glyph.
        rules: Vec<Vec<SeqRule<u16>>>,
    },
    /// Chained context with one coverage per position (type 6 format 3).
    ChainedCoverage {
        /// Backtrack coverages, closest glyph first.
        backtrack: Vec<Arc<Coverage>>,
        /// Input coverages; the first one selects the subtable.
        input: Vec<Arc<Coverage>>,
        /// Lookahead coverages.
        lookahead: Vec<Arc<Coverage>>,
        /// Nested lookups applied on a match.
        actions: Vec<SeqLookup>,
    },
    /// A recognized lookup type in a format this crate does not handle.
    Unsupported {
        /// The declared lookup type.
        lookup_type: u16,
        /// The subtable format.
        format: u16,
    },
}

/// Decode the `GSUB` subtable at `offset` for a lookup of `lookup_type`.
pub fn read_subtable(
    ip: &mut Interpreter<'_>,
    cache: &mut LayoutCache,
    offset: u64,
    lookup_type: u16,
) -> Result<GsubSubtable, LayoutError> {
    ip.set_a(offset as i64);
    ip.run(&[Cmd::Seek, Cmd::Read16(Kind::UInt)])?;
    let format = ip.a() as u16;

    match (lookup_type, format) {
        (1, 1) => {
            let cov = ip.run(&[Cmd::Stash])?[0];
            ip.run(&[Cmd::Read16(Kind::Int)])?;
            let delta = ip.a() as i16;
            Ok(GsubSubtable::SingleDelta {
                coverage: cache.coverage(ip, offset + u64::from(cov))?,
                delta,
            })
        }
        (1, 2) => {
            let stash = ip.run(&[
                Cmd::Stash,
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            let coverage = cache.coverage(ip, offset + u64::from(stash[0]))?;
            let substitutes: Vec<_> = stash[1..].iter().map(|&g| GlyphId(g)).collect();
            if !coverage.fits(substitutes.len()) {
                return Err(ip.err("coverage larger than substitute array"));
            }
            Ok(GsubSubtable::SingleList {
                coverage,
                substitutes,
            })
        }
        (2, 1) => {
            let stash = ip.run(&[
                Cmd::Stash,
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            let coverage = cache.coverage(ip, offset + u64::from(stash[0]))?;
            let mut sequences = Vec::with_capacity(stash.len() - 1);
            for &seq_off in &stash[1..] {
                ip.set_a((offset + u64::from(seq_off)) as i64);
                let gids = ip.run(&[
                    Cmd::Seek,
                    Cmd::Read16(Kind::UInt),
                    Cmd::Loop,
                    Cmd::Stash,
                    Cmd::EndLoop,
                ])?;
                sequences.push(gids.into_iter().map(GlyphId).collect());
            }
            if !coverage.fits(sequences.len()) {
                return Err(ip.err("coverage larger than sequence array"));
            }
            Ok(GsubSubtable::Multiple {
                coverage,
                sequences,
            })
        }
        (4, 1) => {
            let stash = ip.run(&[
                Cmd::Stash,
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            let coverage = cache.coverage(ip, offset + u64::from(stash[0]))?;
            let mut sets = Vec::with_capacity(stash.len() - 1);
            for &set_off in &stash[1..] {
                let set_base = offset + u64::from(set_off);
                ip.set_a(set_base as i64);
                let lig_offsets = ip.run(&[
                    Cmd::Seek,
                    Cmd::Read16(Kind::UInt),
                    Cmd::Loop,
                    Cmd::Stash,
                    Cmd::EndLoop,
                ])?;
                let mut set = Vec::with_capacity(lig_offsets.len());
                for lig_off in lig_offsets {
                    ip.set_a((set_base + u64::from(lig_off)) as i64);
                    let glyph = ip.run(&[Cmd::Seek, Cmd::Stash])?[0];
                    ip.run(&[Cmd::Read16(Kind::UInt), Cmd::AssertGe(1)])?;
                    // componentCount includes the first glyph; the stored
                    // array holds the tail only.
                    ip.set_a(ip.a() - 1);
                    let tail = ip.run(&[Cmd::Loop, Cmd::Stash, Cmd::EndLoop])?;
                    set.push(Ligature {
                        components: tail.into_iter().map(GlyphId).collect(),
                        glyph: GlyphId(glyph),
                    });
                }
                sets.push(set);
            }
            if !coverage.fits(sets.len()) {
                return Err(ip.err("coverage larger than ligature set array"));
            }
            Ok(GsubSubtable::Ligature { coverage, sets })
        }
        (5, 2) => {
            let stash = ip.run(&[
                Cmd::Stash, // coverageOffset
                Cmd::Stash, // classDefOffset
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash, // ruleSetOffsets, may be NULL
                Cmd::EndLoop,
            ])?;
            let coverage = cache.coverage(ip, offset + u64::from(stash[0]))?;
            let classes = cache.class_def(ip, offset + u64::from(stash[1]))?;
            let mut rules = Vec::with_capacity(stash.len() - 2);
            for &set_off in &stash[2..] {
                if set_off == 0 {
                    rules.push(Vec::new());
                    continue;
                }
                let set_base = offset + u64::from(set_off);
                ip.set_a(set_base as i64);
                let rule_offsets = ip.run(&[
                    Cmd::Seek,
                    Cmd::Read16(Kind::UInt),
                    Cmd::Loop,
                    Cmd::Stash,
                    Cmd::EndLoop,
                ])?;
                let mut set = Vec::with_capacity(rule_offsets.len());
                for rule_off in rule_offsets {
                    set.push(read_context_rule(ip, set_base + u64::from(rule_off))?);
                }
                rules.push(set);
            }
            Ok(GsubSubtable::ContextClass {
                coverage,
                classes,
                rules,
            })
        }
        (6, 1) => {
            let stash = ip.run(&[
                Cmd::Stash,
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            let coverage = cache.coverage(ip, offset + u64::from(stash[0]))?;
            let rules = read_chain_rule_sets(ip, offset, &stash[1..])?;
            let rules = rules
                .into_iter()
                .map(|set| set.into_iter().map(glyph_rule).collect())
                .collect::<Vec<Vec<SeqRule<GlyphId>>>>();
            if !coverage.fits(rules.len()) {
                return Err(ip.err("coverage larger than rule set array"));
            }
            Ok(GsubSubtable::ChainedGlyph { coverage, rules })
        }
        (6, 2) => {
            let stash = ip.run(&[
                Cmd::Stash, // coverageOffset
                Cmd::Stash, // backtrackClassDefOffset
                Cmd::Stash, // inputClassDefOffset
                Cmd::Stash, // lookaheadClassDefOffset
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            let coverage = cache.coverage(ip, offset + u64::from(stash[0]))?;
            let backtrack_classes = cache.class_def(ip, offset + u64::from(stash[1]))?;
            let input_classes = cache.class_def(ip, offset + u64::from(stash[2]))?;
            let lookahead_classes = cache.class_def(ip, offset + u64::from(stash[3]))?;
            let rules = read_chain_rule_sets(ip, offset, &stash[4..])?;
            Ok(GsubSubtable::ChainedClass {
                coverage,
                backtrack_classes,
                input_classes,
                lookahead_classes,
                rules,
            })
        }
        (6, 3) => {
            // Coverage decoding moves the cursor, so all offset arrays are
            // read completely before any coverage is resolved.
            let backtrack_offsets = ip.run(&[
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            let input_offsets = ip.run(&[
                Cmd::Read16(Kind::UInt),
                Cmd::AssertGe(1),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            let lookahead_offsets = ip.run(&[
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            let actions = read_actions(ip)?;

            let resolve = |ip: &mut Interpreter<'_>,
                           cache: &mut LayoutCache,
                           offsets: Vec<u16>|
             -> Result<Vec<Arc<Coverage>>, LayoutError> {
                offsets
                    .into_iter()
                    .map(|off| cache.coverage(ip, offset + u64::from(off)))
                    .collect()
            };
            Ok(GsubSubtable::ChainedCoverage {
                backtrack: resolve(ip, cache, backtrack_offsets)?,
                input: resolve(ip, cache, input_offsets)?,
                lookahead: resolve(ip, cache, lookahead_offsets)?,
                actions,
            })
        }
        (7, 1) => {
            let ext_type = ip.run(&[Cmd::Stash])?[0];
            if ext_type == 7 {
                return Err(ip.err("nested extension subtable"));
            }
            ip.run(&[Cmd::Read32(Kind::UInt)])?;
            let ext_offset = ip.a() as u64;
            read_subtable(ip, cache, offset + ext_offset, ext_type)
        }
        _ => Ok(GsubSubtable::Unsupported {
            lookup_type,
            format,
        }),
    }
}

/// Read a type 5 format 2 rule: input classes and nested lookups.
fn read_context_rule(ip: &mut Interpreter<'_>, base: u64) -> Result<SeqRule<u16>, LayoutError> {
    ip.set_a(base as i64);
    ip.run(&[Cmd::Seek, Cmd::Read16(Kind::UInt), Cmd::AssertGe(1)])?;
    let glyph_count = ip.a();
    ip.run(&[Cmd::Read16(Kind::UInt)])?;
    let action_count = ip.a();
    // glyphCount includes the coverage-matched first glyph.
    ip.set_a(glyph_count - 1);
    let input = ip.run(&[Cmd::Loop, Cmd::Stash, Cmd::EndLoop])?;
    ip.set_a(action_count);
    let records = ip.run(&[Cmd::Loop, Cmd::Stash, Cmd::Stash, Cmd::EndLoop])?;
    Ok(SeqRule {
        backtrack: Vec::new(),
        input,
        lookahead: Vec::new(),
        actions: pair_actions(&records),
    })
}

/// Read the rule sets of a type 6 format 1 or 2 subtable. Both formats
/// share the same rule encoding; only the meaning of the `u16` entries
/// (glyph ids vs. classes) differs.
fn read_chain_rule_sets(
    ip: &mut Interpreter<'_>,
    subtable: u64,
    set_offsets: &[u16],
) -> Result<Vec<Vec<SeqRule<u16>>>, LayoutError> {
    let mut sets = Vec::with_capacity(set_offsets.len());
    for &set_off in set_offsets {
        if set_off == 0 {
            sets.push(Vec::new());
            continue;
        }
        let set_base = subtable + u64::from(set_off);
        ip.set_a(set_base as i64);
        let rule_offsets = ip.run(&[
            Cmd::Seek,
            Cmd::Read16(Kind::UInt),
            Cmd::Loop,
            Cmd::Stash,
            Cmd::EndLoop,
        ])?;
        let mut set = Vec::with_capacity(rule_offsets.len());
        for rule_off in rule_offsets {
            ip.set_a((set_base + u64::from(rule_off)) as i64);
            let backtrack = ip.run(&[
                Cmd::Seek,
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            ip.run(&[Cmd::Read16(Kind::UInt), Cmd::AssertGe(1)])?;
            ip.set_a(ip.a() - 1);
            let input = ip.run(&[Cmd::Loop, Cmd::Stash, Cmd::EndLoop])?;
            let lookahead = ip.run(&[
                Cmd::Read16(Kind::UInt),
                Cmd::Loop,
                Cmd::Stash,
                Cmd::EndLoop,
            ])?;
            let actions = read_actions(ip)?;
            set.push(SeqRule {
                backtrack,
                input,
                lookahead,
                actions,
            });
        }
        sets.push(set);
    }
    Ok(sets)
}

/// Read a count-prefixed array of sequence-lookup records at the cursor.
fn read_actions(ip: &mut Interpreter<'_>) -> Result<Vec<SeqLookup>, LayoutError> {
    let records = ip.run(&[
        Cmd::Read16(Kind::UInt),
        Cmd::Loop,
        Cmd::Stash,
        Cmd::Stash,
        Cmd::EndLoop,
    ])?;
    Ok(pair_actions(&records))
}

fn pair_actions(records: &[u16]) -> Vec<SeqLookup> {
    records
        .chunks_exact(2)
        .map(|pair| SeqLookup {
            seq_index: pair[0],
            lookup_index: pair[1],
        })
        .collect()
}

fn glyph_rule(rule: SeqRule<u16>) -> SeqRule<GlyphId> {
    SeqRule {
        backtrack: rule.backtrack.into_iter().map(GlyphId).collect(),
        input: rule.input.into_iter().map(GlyphId).collect(),
        lookahead: rule.lookahead.into_iter().map(GlyphId).collect(),
        actions: rule.actions,
    }
}

/// Try `sub` at `pos`, returning the position after the consumed span on
/// a match.
pub(crate) fn apply(
    table: &LayoutTable,
    sub: &GsubSubtable,
    filter: &GlyphFilter,
    seq: &mut Vec<RawGlyph>,
    pos: usize,
    depth: u32,
) -> Result<Option<usize>, LayoutError> {
    let gid = seq[pos].gid;
    match sub {
        GsubSubtable::SingleDelta { coverage, delta } => {
            if !coverage.contains(gid) {
                return Ok(None);
            }
            let new = (i32::from(gid.0) + i32::from(*delta)).rem_euclid(0x10000);
            seq[pos].gid = GlyphId(new as u16);
            Ok(Some(pos + 1))
        }
        GsubSubtable::SingleList {
            coverage,
            substitutes,
        } => {
            let Some(index) = coverage.index(gid) else {
                return Ok(None);
            };
            seq[pos].gid = substitutes[usize::from(index)];
            Ok(Some(pos + 1))
        }
        GsubSubtable::Multiple {
            coverage,
            sequences,
        } => {
            let Some(index) = coverage.index(gid) else {
                return Ok(None);
            };
            let replacement = &sequences[usize::from(index)];
            if replacement.is_empty() {
                let removed = seq.remove(pos);
                if let DeletedTextPolicy::AttachToNext = table.deleted_text {
                    if let Some(next) = seq.get_mut(pos) {
                        let mut text = removed.text;
                        text.extend(next.text.iter().copied());
                        next.text = text;
                    }
                }
                return Ok(Some(pos));
            }
            let mut out = Vec::with_capacity(replacement.len());
            for (i, &new_gid) in replacement.iter().enumerate() {
                let mut glyph = RawGlyph::new(new_gid);
                if i == 0 {
                    // Text attribution stays on the first output glyph.
                    glyph.text = seq[pos].text.clone();
                }
                out.push(glyph);
            }
            let count = out.len();
            seq.splice(pos..=pos, out);
            Ok(Some(pos + count))
        }
        GsubSubtable::Ligature { coverage, sets } => {
            let Some(index) = coverage.index(gid) else {
                return Ok(None);
            };
            for lig in &sets[usize::from(index)] {
                let Some(positions) = match_tail(filter, seq, pos, &lig.components) else {
                    continue;
                };
                // A match that reaches across filtered glyphs would have
                // to reattach them to the ligature, which this crate does
                // not model.
                if positions
                    .iter()
                    .enumerate()
                    .any(|(i, &p)| p != pos + i)
                {
                    return Err(LayoutError::Unsupported(
                        "ligature components across ignored glyphs",
                    ));
                }
                let mut text = seq[pos].text.clone();
                for &p in &positions[1..] {
                    text.extend(seq[p].text.iter().copied());
                }
                seq[pos].gid = lig.glyph;
                seq[pos].text = text;
                for &p in positions[1..].iter().rev() {
                    seq.remove(p);
                }
                return Ok(Some(pos + 1));
            }
            Ok(None)
        }
        GsubSubtable::ContextClass {
            coverage,
            classes,
            rules,
        } => {
            if !coverage.contains(gid) {
                return Ok(None);
            }
            let class = classes.get(gid);
            let Some(set) = rules.get(usize::from(class)) else {
                return Ok(None);
            };
            apply_rules(table, filter, seq, pos, set, depth, |g, &class| {
                classes.get(g) == class
            })
        }
        GsubSubtable::ChainedGlyph { coverage, rules } => {
            let Some(index) = coverage.index(gid) else {
                return Ok(None);
            };
            let set = &rules[usize::from(index)];
            apply_rules(table, filter, seq, pos, set, depth, |g, &want| g == want)
        }
        GsubSubtable::ChainedClass {
            coverage,
            backtrack_classes,
            input_classes,
            lookahead_classes,
            rules,
        } => {
            if !coverage.contains(gid) {
                return Ok(None);
            }
            let class = input_classes.get(gid);
            let Some(set) = rules.get(usize::from(class)) else {
                return Ok(None);
            };
            for rule in set {
                let matched = match_chain(
                    filter,
                    seq,
                    pos,
                    &rule.backtrack,
                    &rule.input,
                    &rule.lookahead,
                    |g, &c| backtrack_classes.get(g) == c,
                    |g, &c| input_classes.get(g) == c,
                    |g, &c| lookahead_classes.get(g) == c,
                );
                if let Some(positions) = matched {
                    table.apply_actions(seq, &positions, &rule.actions, depth)?;
                    let last = positions.last().copied().unwrap_or(pos);
                    return Ok(Some(last + 1));
                }
            }
            Ok(None)
        }
        GsubSubtable::ChainedCoverage {
            backtrack,
            input,
            lookahead,
            actions,
        } => {
            let Some(first) = input.first() else {
                return Ok(None);
            };
            if !first.contains(gid) {
                return Ok(None);
            }
            let matched = match_chain(
                filter,
                seq,
                pos,
                backtrack,
                &input[1..],
                lookahead,
                |g, cov: &Arc<Coverage>| cov.contains(g),
                |g, cov| cov.contains(g),
                |g, cov| cov.contains(g),
            );
            if let Some(positions) = matched {
                table.apply_actions(seq, &positions, actions, depth)?;
                let last = positions.last().copied().unwrap_or(pos);
                return Ok(Some(last + 1));
            }
            Ok(None)
        }
        GsubSubtable::Unsupported { .. } => {
            Err(LayoutError::Unsupported("unimplemented lookup subtable"))
        }
    }
}

/// Try every rule of a set in declaration order.
fn apply_rules<T>(
    table: &LayoutTable,
    filter: &GlyphFilter,
    seq: &mut Vec<RawGlyph>,
    pos: usize,
    rules: &[SeqRule<T>],
    depth: u32,
    matches: impl Fn(GlyphId, &T) -> bool + Copy,
) -> Result<Option<usize>, LayoutError> {
    for rule in rules {
        let matched = match_chain(
            filter,
            seq,
            pos,
            &rule.backtrack,
            &rule.input,
            &rule.lookahead,
            matches,
            matches,
            matches,
        );
        if let Some(positions) = matched {
            table.apply_actions(seq, &positions, &rule.actions, depth)?;
            let last = positions.last().copied().unwrap_or(pos);
            return Ok(Some(last + 1));
        }
    }
    Ok(None)
}

/// Match the input tail after `pos` over kept glyphs only, returning the
/// matched positions (including `pos`).
fn match_tail<T>(
    filter: &GlyphFilter,
    seq: &[RawGlyph],
    pos: usize,
    tail: &[T],
) -> Option<Vec<usize>>
where
    T: PartialEq<GlyphId>,
{
    let mut positions = Vec::with_capacity(tail.len() + 1);
    positions.push(pos);
    let mut cur = pos;
    for want in tail {
        cur = next_kept(filter, seq, cur)?;
        if *want != seq[cur].gid {
            return None;
        }
        positions.push(cur);
    }
    Some(positions)
}

/// Match backtrack, input tail and lookahead around `pos`, walking kept
/// glyphs only. On success returns the input positions including `pos`.
fn match_chain<B, I, L>(
    filter: &GlyphFilter,
    seq: &[RawGlyph],
    pos: usize,
    backtrack: &[B],
    input_tail: &[I],
    lookahead: &[L],
    back_matches: impl Fn(GlyphId, &B) -> bool,
    input_matches: impl Fn(GlyphId, &I) -> bool,
    ahead_matches: impl Fn(GlyphId, &L) -> bool,
) -> Option<Vec<usize>> {
    let mut positions = Vec::with_capacity(input_tail.len() + 1);
    positions.push(pos);
    let mut cur = pos;
    for want in input_tail {
        cur = next_kept(filter, seq, cur)?;
        if !input_matches(seq[cur].gid, want) {
            return None;
        }
        positions.push(cur);
    }

    let mut ahead = cur;
    for want in lookahead {
        ahead = next_kept(filter, seq, ahead)?;
        if !ahead_matches(seq[ahead].gid, want) {
            return None;
        }
    }

    // Backtrack entries are stored closest-first.
    let mut back = pos;
    for want in backtrack {
        back = prev_kept(filter, seq, back)?;
        if !back_matches(seq[back].gid, want) {
            return None;
        }
    }

    Some(positions)
}
