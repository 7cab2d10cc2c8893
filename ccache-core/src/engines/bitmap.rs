//! # Bitmap Engine
//!
//! Addressable bit strings over a byte vector, plus the BITFIELD
//! typed-integer overlay: GET/SET/INCRBY windows with WRAP/SAT/FAIL
//! overflow, applied atomically in argument order under one body lock.

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;

/// Typed-integer window into a bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub signed: bool,
    /// 1..=64 for signed, 1..=63 for unsigned.
    pub width: u8,
    pub offset_bits: u64,
}

impl FieldSpec {
    /// Parses `u8`/`i16` style type text plus an offset (`#n` multiplies by
    /// the width).
    pub fn parse(type_text: &str, offset_text: &str) -> CacheResult<FieldSpec> {
        let (signed, width_text) = match type_text.split_at(1) {
            ("i", rest) => (true, rest),
            ("u", rest) => (false, rest),
            _ => return Err(CacheError::Syntax),
        };
        let width: u8 = width_text.parse().map_err(|_| CacheError::Syntax)?;
        let max_width = if signed { 64 } else { 63 };
        if width == 0 || width > max_width {
            return Err(CacheError::Syntax);
        }

        let offset_bits = if let Some(stripped) = offset_text.strip_prefix('#') {
            let slot: u64 = stripped.parse().map_err(|_| CacheError::Syntax)?;
            slot * width as u64
        } else {
            offset_text.parse().map_err(|_| CacheError::Syntax)?
        };
        Ok(FieldSpec {
            signed,
            width,
            offset_bits,
        })
    }

    fn min(&self) -> i64 {
        match (self.signed, self.width) {
            (true, 64) => i64::MIN,
            (true, w) => -(1i64 << (w - 1)),
            (false, _) => 0,
        }
    }

    fn max(&self) -> i64 {
        match (self.signed, self.width) {
            (true, 64) => i64::MAX,
            (true, w) => (1i64 << (w - 1)) - 1,
            (false, w) => ((1u64 << w) - 1) as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    Wrap,
    Sat,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitfieldCmd {
    Get {
        spec: FieldSpec,
    },
    Set {
        spec: FieldSpec,
        value: i64,
        overflow: Overflow,
    },
    IncrBy {
        spec: FieldSpec,
        delta: i64,
        overflow: Overflow,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Not,
}

impl Db {
    /// SETBIT. Returns the previous bit value.
    pub fn setbit(&self, key: &str, offset: u64, bit: bool) -> CacheResult<i64> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Bitmap)?;
        let body = self.keyspace.bitmaps.load_or_store(key, Vec::new);
        let mut bytes = body.write();

        let byte_idx = (offset / 8) as usize;
        let bit_idx = 7 - (offset % 8) as u32;
        if bytes.len() <= byte_idx {
            bytes.resize(byte_idx + 1, 0);
        }
        let old = (bytes[byte_idx] >> bit_idx) & 1;
        if bit {
            bytes[byte_idx] |= 1 << bit_idx;
        } else {
            bytes[byte_idx] &= !(1 << bit_idx);
        }
        drop(bytes);
        self.touch_write(key);
        Ok(old as i64)
    }

    pub fn getbit(&self, key: &str, offset: u64) -> CacheResult<i64> {
        let Some(bytes) = self.bitmap_snapshot(key)? else {
            return Ok(0);
        };
        let byte_idx = (offset / 8) as usize;
        if byte_idx >= bytes.len() {
            return Ok(0);
        }
        let bit_idx = 7 - (offset % 8) as u32;
        Ok(((bytes[byte_idx] >> bit_idx) & 1) as i64)
    }

    /// BITCOUNT over a byte-indexed inclusive range with negative tail
    /// indices.
    pub fn bitcount(&self, key: &str, start: Option<i64>, end: Option<i64>) -> CacheResult<i64> {
        let Some(bytes) = self.bitmap_snapshot(key)? else {
            return Ok(0);
        };
        let (lo, hi) = match super::clip_range(
            start.unwrap_or(0),
            end.unwrap_or(-1),
            bytes.len(),
        ) {
            Some(range) => range,
            None => return Ok(0),
        };
        Ok(bytes[lo..=hi]
            .iter()
            .map(|b| b.count_ones() as i64)
            .sum())
    }

    /// BITPOS: first (or last, when `reverse`) offset holding `bit` within
    /// the byte range. Searching for 0 with no explicit end reports the
    /// first bit past an all-ones string.
    pub fn bitpos(
        &self,
        key: &str,
        bit: bool,
        start: Option<i64>,
        end: Option<i64>,
        reverse: bool,
    ) -> CacheResult<i64> {
        let Some(bytes) = self.bitmap_snapshot(key)? else {
            return Ok(if bit { -1 } else { 0 });
        };
        let open_ended = end.is_none();
        let Some((lo, hi)) = super::clip_range(start.unwrap_or(0), end.unwrap_or(-1), bytes.len())
        else {
            return Ok(-1);
        };

        let mut positions = (lo..=hi).flat_map(|byte_idx| {
            let byte = bytes[byte_idx];
            (0..8u32).filter_map(move |i| {
                let value = (byte >> (7 - i)) & 1 == 1;
                if value == bit {
                    Some((byte_idx as i64) * 8 + i as i64)
                } else {
                    None
                }
            })
        });

        let found = if reverse {
            positions.last()
        } else {
            positions.next()
        };
        match found {
            Some(pos) => Ok(pos),
            None if !bit && open_ended && !reverse => Ok((bytes.len() as i64) * 8),
            None => Ok(-1),
        }
    }

    /// BITOP. Stores the combined bitmap at `dest` and returns its length.
    /// NOT accepts exactly one source.
    pub fn bitop(&self, op: BitOp, dest: &str, sources: &[String]) -> CacheResult<i64> {
        if sources.is_empty() || (op == BitOp::Not && sources.len() != 1) {
            return Err(CacheError::Syntax);
        }

        let mut operands = Vec::with_capacity(sources.len());
        for key in sources {
            operands.push(self.bitmap_snapshot(key)?.unwrap_or_default());
        }
        let width = operands.iter().map(|b| b.len()).max().unwrap_or(0);

        let mut result = vec![0u8; width];
        match op {
            BitOp::Not => {
                for (i, slot) in result.iter_mut().enumerate() {
                    *slot = !byte_at(&operands[0], i);
                }
            }
            _ => {
                for (i, slot) in result.iter_mut().enumerate() {
                    let mut acc = byte_at(&operands[0], i);
                    for operand in &operands[1..] {
                        let byte = byte_at(operand, i);
                        acc = match op {
                            BitOp::And => acc & byte,
                            BitOp::Or => acc | byte,
                            BitOp::Xor => acc ^ byte,
                            BitOp::Not => unreachable!("single-source NOT"),
                        };
                    }
                    *slot = acc;
                }
            }
        }

        let len = result.len() as i64;
        self.del(&[dest.to_string()]);
        if !result.is_empty() {
            self.keyspace.claim(dest, ValueKind::Bitmap)?;
            let body = self.keyspace.bitmaps.load_or_store(dest, Vec::new);
            *body.write() = result;
            self.touch_write(dest);
        }
        Ok(len)
    }

    /// BITFIELD: applies the commands sequentially under one body lock.
    /// Each slot of the result is the command's reply; FAIL overflow yields
    /// None for that slot.
    pub fn bitfield(&self, key: &str, cmds: &[BitfieldCmd]) -> CacheResult<Vec<Option<i64>>> {
        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Bitmap)?;
        let body = self.keyspace.bitmaps.load_or_store(key, Vec::new);
        let mut bytes = body.write();

        let mut replies = Vec::with_capacity(cmds.len());
        let mut mutated = false;
        for cmd in cmds {
            match *cmd {
                BitfieldCmd::Get { spec } => {
                    replies.push(Some(read_field(&bytes, spec)));
                }
                BitfieldCmd::Set {
                    spec,
                    value,
                    overflow,
                } => match apply_overflow(value as i128, spec, overflow) {
                    Some(stored) => {
                        let old = read_field(&bytes, spec);
                        write_field(&mut bytes, spec, stored);
                        mutated = true;
                        replies.push(Some(old));
                    }
                    None => replies.push(None),
                },
                BitfieldCmd::IncrBy {
                    spec,
                    delta,
                    overflow,
                } => {
                    let current = read_field(&bytes, spec) as i128;
                    match apply_overflow(current + delta as i128, spec, overflow) {
                        Some(next) => {
                            write_field(&mut bytes, spec, next);
                            mutated = true;
                            replies.push(Some(next));
                        }
                        None => replies.push(None),
                    }
                }
            }
        }
        drop(bytes);
        if mutated {
            self.touch_write(key);
        }
        Ok(replies)
    }

    /// BITFIELD_RO: GET-only variant.
    pub fn bitfield_ro(&self, key: &str, specs: &[FieldSpec]) -> CacheResult<Vec<Option<i64>>> {
        let bytes = self.bitmap_snapshot(key)?.unwrap_or_default();
        Ok(specs
            .iter()
            .map(|spec| Some(read_field(&bytes, *spec)))
            .collect())
    }

    fn bitmap_snapshot(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Bitmap)? {
            return Ok(None);
        }
        Ok(self
            .keyspace
            .bitmaps
            .load(key)
            .map(|body| body.read().clone()))
    }
}

fn byte_at(bytes: &[u8], index: usize) -> u8 {
    bytes.get(index).copied().unwrap_or(0)
}

/// Reads `spec.width` bits at the bit offset, sign-extending for signed
/// fields. Bits past the end of the vector read as zero.
fn read_field(bytes: &[u8], spec: FieldSpec) -> i64 {
    let mut raw: u64 = 0;
    for i in 0..spec.width as u64 {
        let offset = spec.offset_bits + i;
        let byte_idx = (offset / 8) as usize;
        let bit = if byte_idx < bytes.len() {
            (bytes[byte_idx] >> (7 - (offset % 8) as u32)) & 1
        } else {
            0
        };
        raw = (raw << 1) | bit as u64;
    }

    if spec.signed && spec.width < 64 {
        let sign_bit = 1u64 << (spec.width - 1);
        if raw & sign_bit != 0 {
            return (raw as i64) - (1i64 << spec.width);
        }
    }
    raw as i64
}

/// Writes the low `spec.width` bits of `value`, growing the vector to fit.
fn write_field(bytes: &mut Vec<u8>, spec: FieldSpec, value: i64) {
    let raw = value as u64;
    let end_byte = ((spec.offset_bits + spec.width as u64 + 7) / 8) as usize;
    if bytes.len() < end_byte {
        bytes.resize(end_byte, 0);
    }
    for i in 0..spec.width as u64 {
        let offset = spec.offset_bits + i;
        let byte_idx = (offset / 8) as usize;
        let bit_idx = 7 - (offset % 8) as u32;
        let bit = (raw >> (spec.width as u64 - 1 - i)) & 1;
        if bit == 1 {
            bytes[byte_idx] |= 1 << bit_idx;
        } else {
            bytes[byte_idx] &= !(1 << bit_idx);
        }
    }
}

/// Resolves a candidate value against the field's range under the overflow
/// policy. None means FAIL refused the operation.
fn apply_overflow(candidate: i128, spec: FieldSpec, overflow: Overflow) -> Option<i64> {
    let min = spec.min() as i128;
    let max = spec.max() as i128;
    if candidate >= min && candidate <= max {
        return Some(candidate as i64);
    }
    match overflow {
        Overflow::Fail => None,
        Overflow::Sat => Some(if candidate < min {
            min as i64
        } else {
            max as i64
        }),
        Overflow::Wrap => {
            let modulus = 1i128 << spec.width;
            let mut wrapped = candidate.rem_euclid(modulus);
            if spec.signed && wrapped > max {
                wrapped -= modulus;
            }
            Some(wrapped as i64)
        }
    }
}
