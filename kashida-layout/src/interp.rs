//! A small bytecode interpreter that drives binary table decoding.
//!
//! Table readers in this crate do not poke at byte slices directly.
//! Instead they describe the layout of a structure as a short sequence of
//! [`Cmd`]s and hand it to an [`Interpreter`] bound to one table region.
//! Every read is bounds-checked against the region, so a decode failure
//! always carries the table tag and the byte offset of the offending read.
//!
//! The interpreter keeps an accumulator `A`, eight general registers and a
//! "stash": an append-only buffer of decoded 16-bit values. [`Interpreter::run`]
//! returns the stash as an owned vector, so there is no shared mutable
//! buffer to drain and no re-entrancy hazard.

use crate::source::{FontData, TableRegion};
use crate::LayoutError;

/// Size of the read-ahead buffer. Plenty for header-sized structures, while
/// large arrays are still fetched chunk by chunk.
const BUF_LEN: usize = 512;

/// How a 16- or 32-bit read is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// An unsigned integer.
    UInt,
    /// A two's-complement signed integer.
    Int,
    /// A signed value in font design units, scaled to PDF glyph-space
    /// units (1/1000 em) using the font's `unitsPerEm`.
    FWord,
}

/// One instruction of the table-decoding bytecode.
#[derive(Clone, Copy, Debug)]
pub enum Cmd {
    /// Move the cursor to `A`, which must lie within `[0, table length)`.
    Seek,
    /// Read 16 bits at the cursor into `A`.
    Read16(Kind),
    /// Read 32 bits at the cursor into `A`.
    Read32(Kind),
    /// Read 16 bits at the cursor and append them to the stash.
    Stash,
    /// Copy `A` into register `R[i]`.
    Store(usize),
    /// Copy register `R[i]` into `A`.
    Load(usize),
    /// Repeat the commands up to the matching [`Cmd::EndLoop`] `A` times.
    ///
    /// A count of zero skips the body entirely; skip-scanning tracks
    /// nested loop pairs, so loops may contain loops.
    Loop,
    /// End of a [`Cmd::Loop`] body.
    EndLoop,
    /// Fail with a decode error unless `A` equals the operand.
    AssertEq(i64),
    /// Fail with a decode error unless `A >=` the operand.
    AssertGe(i64),
    /// Fail with a decode error unless `A >` the operand.
    AssertGt(i64),
    /// Fail with a decode error unless `A <=` the operand.
    AssertLe(i64),
    /// Successfully stop executing the program if `A <` the operand.
    ///
    /// Used to gate optional trailing fields behind a minor-version check.
    ExitIfLt(i64),
    /// Invoke the caller-supplied hook with the current [`State`].
    Call,
}

/// The mutable machine state a [`Cmd::Call`] hook sees.
#[derive(Debug)]
pub struct State {
    /// The accumulator.
    pub a: i64,
    /// The general registers.
    pub r: [i64; 8],
    stash: Vec<u16>,
}

impl State {
    /// Append a value to the stash from inside a hook.
    pub fn stash(&mut self, v: u16) {
        self.stash.push(v);
    }
}

/// A bytecode interpreter bound to one table region of a font.
pub struct Interpreter<'a> {
    source: &'a dyn FontData,
    region: TableRegion,
    units_per_em: u16,
    pos: u64,
    state: State,
    buf: [u8; BUF_LEN],
    buf_start: u64,
    buf_len: usize,
}

impl<'a> Interpreter<'a> {
    /// Bind an interpreter to `region` within `source`.
    ///
    /// `units_per_em` is taken from the font's `head` table and only used
    /// for [`Kind::FWord`] reads; pass 1000 for identity scaling.
    pub fn new(source: &'a dyn FontData, region: TableRegion, units_per_em: u16) -> Self {
        Self {
            source,
            region,
            units_per_em: if units_per_em == 0 { 1000 } else { units_per_em },
            pos: 0,
            state: State {
                a: 0,
                r: [0; 8],
                stash: Vec::new(),
            },
            buf: [0; BUF_LEN],
            buf_start: 0,
            buf_len: 0,
        }
    }

    /// The region this interpreter is bound to.
    pub fn region(&self) -> TableRegion {
        self.region
    }

    /// The current cursor position within the table.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// The accumulator.
    pub fn a(&self) -> i64 {
        self.state.a
    }

    /// Set the accumulator, e.g. to a subtable offset before a [`Cmd::Seek`].
    pub fn set_a(&mut self, a: i64) {
        self.state.a = a;
    }

    /// A decode error at the current cursor position.
    pub fn err(&self, reason: &'static str) -> LayoutError {
        self.region.decode_error(self.pos, reason)
    }

    /// Execute `prog` and return the values stashed while running it.
    pub fn run(&mut self, prog: &[Cmd]) -> Result<Vec<u16>, LayoutError> {
        self.run_with(prog, &mut |_| Ok(()))
    }

    /// Execute `prog`, invoking `hook` for every [`Cmd::Call`].
    pub fn run_with(
        &mut self,
        prog: &[Cmd],
        hook: &mut dyn FnMut(&mut State) -> Result<(), LayoutError>,
    ) -> Result<Vec<u16>, LayoutError> {
        let mut ip = 0;
        // (index of the first body command, remaining iterations)
        let mut loops: Vec<(usize, i64)> = Vec::new();

        while ip < prog.len() {
            match prog[ip] {
                Cmd::Seek => {
                    let a = self.state.a;
                    if a < 0 || a as u64 >= self.region.len {
                        return Err(self.err("seek outside of table"));
                    }
                    self.pos = a as u64;
                }
                Cmd::Read16(kind) => {
                    let v = self.read_u16()?;
                    self.state.a = self.convert(kind, i64::from(v), i64::from(v as i16));
                }
                Cmd::Read32(kind) => {
                    let v = self.read_u32()?;
                    self.state.a = self.convert(kind, i64::from(v), i64::from(v as i32));
                }
                Cmd::Stash => {
                    let v = self.read_u16()?;
                    self.state.stash.push(v);
                }
                Cmd::Store(i) => {
                    self.state.r[i] = self.state.a;
                }
                Cmd::Load(i) => {
                    self.state.a = self.state.r[i];
                }
                Cmd::Loop => {
                    if self.state.a > 0 {
                        loops.push((ip + 1, self.state.a));
                    } else {
                        ip = Self::skip_loop_body(prog, ip)
                            .ok_or_else(|| self.err("unbalanced loop in decode program"))?;
                    }
                }
                Cmd::EndLoop => {
                    let (start, remaining) = loops
                        .last_mut()
                        .ok_or_else(|| self.err("unbalanced loop in decode program"))?;
                    *remaining -= 1;
                    if *remaining > 0 {
                        ip = *start;
                        continue;
                    }
                    loops.pop();
                }
                Cmd::AssertEq(v) => {
                    if self.state.a != v {
                        return Err(self.err("unexpected value in table"));
                    }
                }
                Cmd::AssertGe(v) => {
                    if self.state.a < v {
                        return Err(self.err("value in table too small"));
                    }
                }
                Cmd::AssertGt(v) => {
                    if self.state.a <= v {
                        return Err(self.err("value in table too small"));
                    }
                }
                Cmd::AssertLe(v) => {
                    if self.state.a > v {
                        return Err(self.err("value in table too large"));
                    }
                }
                Cmd::ExitIfLt(v) => {
                    if self.state.a < v {
                        break;
                    }
                }
                Cmd::Call => {
                    hook(&mut self.state)?;
                }
            }
            ip += 1;
        }

        Ok(std::mem::take(&mut self.state.stash))
    }

    /// Find the instruction index of the `EndLoop` matching the `Loop` at
    /// `ip`, tracking nesting depth. Returns `None` for unbalanced programs.
    fn skip_loop_body(prog: &[Cmd], ip: usize) -> Option<usize> {
        let mut depth = 0;
        for (i, cmd) in prog.iter().enumerate().skip(ip + 1) {
            match cmd {
                Cmd::Loop => depth += 1,
                Cmd::EndLoop => {
                    if depth == 0 {
                        return Some(i);
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        None
    }

    fn convert(&self, kind: Kind, unsigned: i64, signed: i64) -> i64 {
        match kind {
            Kind::UInt => unsigned,
            Kind::Int => signed,
            Kind::FWord => {
                let scaled = signed as f64 * 1000.0 / f64::from(self.units_per_em);
                scaled.round() as i64
            }
        }
    }

    fn read_u16(&mut self) -> Result<u16, LayoutError> {
        let b = self.fill(2)?;
        let v = u16::from_be_bytes([b[0], b[1]]);
        self.pos += 2;
        Ok(v)
    }

    fn read_u32(&mut self) -> Result<u32, LayoutError> {
        let b = self.fill(4)?;
        let v = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        self.pos += 4;
        Ok(v)
    }

    /// Make sure `n` bytes starting at the cursor are buffered and return
    /// them. Only re-fetches from the source when the requested range is
    /// not already buffered.
    fn fill(&mut self, n: usize) -> Result<&[u8], LayoutError> {
        debug_assert!(n <= BUF_LEN);

        if self.pos + n as u64 > self.region.len {
            return Err(self.err("read past end of table"));
        }

        let buffered = self.pos >= self.buf_start
            && self.pos + n as u64 <= self.buf_start + self.buf_len as u64;

        if !buffered {
            let want = (self.region.len - self.pos).min(BUF_LEN as u64) as usize;
            self.source
                .read_at(self.region.start + self.pos, &mut self.buf[..want])
                .map_err(|_| self.err("read from font data source failed"))?;
            self.buf_start = self.pos;
            self.buf_len = want;
        }

        let off = (self.pos - self.buf_start) as usize;
        Ok(&self.buf[off..off + n])
    }
}
