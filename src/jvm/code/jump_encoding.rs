//! Decoding and re-encoding jumps
//!
//! When code moves around, every instruction which encodes a relative jump needs its offsets
//! recomputed. Most of those offsets are 16-bit, so moving code can also push a jump out of range,
//! in which case it gets rewritten into a wider form:
//!
//! ```text,ignore,no_run
//!     goto L        =>      goto_w L
//!
//!     jsr L         =>      jsr_w L
//!
//!                           ifnot* L1
//!     if* L         =>      goto_w L
//!                       L1: ...
//! ```
//!
//! The rewrites don't preserve the width of the code modulo 4, so `tableswitch`/`lookupswitch`
//! padding has to be recomputed from the final position of each switch (which is why a
//! [`JumpSite`] is encoded at a given offset, instead of patched in place).

use super::opcodes::*;
use crate::jvm::Error;
use std::ops::RangeInclusive;

/// Range of relative jump offsets supported by `goto` and `if*` branch instructions
pub const SIGNED_16BIT_JUMP_RANGE: RangeInclusive<isize> =
    RangeInclusive::new(i16::MIN as isize, i16::MAX as isize);

/// Keys of a switch instruction (the jump targets are stored separately)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchKeys {
    /// `tableswitch` has consecutive keys from `low` to `high`
    Table { low: i32, high: i32 },

    /// `lookupswitch` has sorted explicit keys
    Lookup(Vec<i32>),
}

/// Instruction which encodes one or more relative jumps
///
/// All targets are absolute offsets into the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JumpSite {
    /// `if*`, `goto`, and `jsr`: target is encoded as a signed 16-bit offset
    Narrow { opcode: u8, target: usize },

    /// `goto_w` and `jsr_w`: target is encoded as a signed 32-bit offset
    Wide { opcode: u8, target: usize },

    /// `tableswitch` and `lookupswitch`: targets are encoded as signed 32-bit offsets
    Switch {
        opcode: u8,
        default: usize,
        keys: SwitchKeys,
        targets: Vec<usize>,
    },
}

/// Turn a relative jump at `offset` into an absolute target
fn absolute_target(offset: usize, relative: i64) -> Result<usize, Error> {
    usize::try_from(offset as i64 + relative).map_err(|_| Error::InvalidInstructionBoundary(offset))
}

/// Turn an absolute target into a jump relative to `offset`
fn relative_target(offset: usize, target: usize) -> isize {
    target as isize - offset as isize
}

impl JumpSite {
    /// Decode the jump encoded by the instruction at `offset`, if it has one
    pub fn decode(code: &[u8], offset: usize) -> Result<Option<JumpSite>, Error> {
        let opcode = *code
            .get(offset)
            .ok_or(Error::InvalidInstructionBoundary(offset))?;
        let site = match opcode {
            IFEQ..=JSR | IFNULL | IFNONNULL => {
                let relative = read_i16(code, offset + 1, offset)?;
                JumpSite::Narrow {
                    opcode,
                    target: absolute_target(offset, relative as i64)?,
                }
            }
            GOTO_W | JSR_W => {
                let relative = read_i32(code, offset + 1, offset)?;
                JumpSite::Wide {
                    opcode,
                    target: absolute_target(offset, relative as i64)?,
                }
            }
            TABLESWITCH => {
                let operands = offset + 1 + switch_padding(offset);
                let default = read_i32(code, operands, offset)?;
                let low = read_i32(code, operands + 4, offset)?;
                let high = read_i32(code, operands + 8, offset)?;
                let count = (high as i64 - low as i64 + 1).max(0) as usize;
                let mut targets = Vec::with_capacity(count);
                for i in 0..count {
                    let relative = read_i32(code, operands + 12 + 4 * i, offset)?;
                    targets.push(absolute_target(offset, relative as i64)?);
                }
                JumpSite::Switch {
                    opcode,
                    default: absolute_target(offset, default as i64)?,
                    keys: SwitchKeys::Table { low, high },
                    targets,
                }
            }
            LOOKUPSWITCH => {
                let operands = offset + 1 + switch_padding(offset);
                let default = read_i32(code, operands, offset)?;
                let npairs = read_i32(code, operands + 4, offset)?.max(0) as usize;
                let mut keys = Vec::with_capacity(npairs);
                let mut targets = Vec::with_capacity(npairs);
                for i in 0..npairs {
                    keys.push(read_i32(code, operands + 8 + 8 * i, offset)?);
                    let relative = read_i32(code, operands + 12 + 8 * i, offset)?;
                    targets.push(absolute_target(offset, relative as i64)?);
                }
                JumpSite::Switch {
                    opcode,
                    default: absolute_target(offset, default as i64)?,
                    keys: SwitchKeys::Lookup(keys),
                    targets,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(site))
    }

    /// Apply a function to every target
    pub fn map_targets<F>(&self, mut map: F) -> Result<JumpSite, Error>
    where
        F: FnMut(usize) -> Result<usize, Error>,
    {
        Ok(match self {
            JumpSite::Narrow { opcode, target } => JumpSite::Narrow {
                opcode: *opcode,
                target: map(*target)?,
            },
            JumpSite::Wide { opcode, target } => JumpSite::Wide {
                opcode: *opcode,
                target: map(*target)?,
            },
            JumpSite::Switch {
                opcode,
                default,
                keys,
                targets,
            } => JumpSite::Switch {
                opcode: *opcode,
                default: map(*default)?,
                keys: keys.clone(),
                targets: targets
                    .iter()
                    .map(|target| map(*target))
                    .collect::<Result<Vec<usize>, Error>>()?,
            },
        })
    }

    /// Whether a narrow jump at `offset` can reach its target without widening
    pub fn fits_at(&self, offset: usize) -> bool {
        match self {
            JumpSite::Narrow { target, .. } => {
                SIGNED_16BIT_JUMP_RANGE.contains(&relative_target(offset, *target))
            }
            _ => true,
        }
    }

    /// Width of the site when encoded at `offset`
    ///
    /// The `widened` flag only matters for narrow jumps.
    pub fn width_at(&self, offset: usize, widened: bool) -> usize {
        match self {
            JumpSite::Narrow { opcode, .. } if widened => {
                if is_conditional_branch(*opcode) {
                    8
                } else {
                    5
                }
            }
            JumpSite::Narrow { .. } => 3,
            JumpSite::Wide { .. } => 5,
            JumpSite::Switch { keys, targets, .. } => {
                let header = match keys {
                    SwitchKeys::Table { .. } => 12,
                    SwitchKeys::Lookup(_) => 8,
                };
                let per_target = match keys {
                    SwitchKeys::Table { .. } => 4,
                    SwitchKeys::Lookup(_) => 8,
                };
                1 + switch_padding(offset) + header + per_target * targets.len()
            }
        }
    }

    /// Encode the site at `offset`
    ///
    /// A narrow jump which does not fit and was not marked as `widened` is an error.
    pub fn encode(&self, offset: usize, widened: bool, out: &mut Vec<u8>) -> Result<(), Error> {
        debug_assert_eq!(out.len(), offset, "site must be encoded where it will live");
        match self {
            JumpSite::Narrow { opcode, target } if widened => {
                if let Some(inverted) = invert_branch(*opcode) {
                    // skip over the `goto_w` when the original condition is false
                    out.push(inverted);
                    out.extend_from_slice(&8i16.to_be_bytes());
                    out.push(GOTO_W);
                    let relative = relative_target(offset + 3, *target) as i32;
                    out.extend_from_slice(&relative.to_be_bytes());
                } else {
                    out.push(if *opcode == JSR { JSR_W } else { GOTO_W });
                    let relative = relative_target(offset, *target) as i32;
                    out.extend_from_slice(&relative.to_be_bytes());
                }
            }
            JumpSite::Narrow { opcode, target } => {
                let relative = i16::try_from(relative_target(offset, *target))
                    .map_err(|_| Error::MethodCodeOverflow(*target))?;
                out.push(*opcode);
                out.extend_from_slice(&relative.to_be_bytes());
            }
            JumpSite::Wide { opcode, target } => {
                out.push(*opcode);
                let relative = relative_target(offset, *target) as i32;
                out.extend_from_slice(&relative.to_be_bytes());
            }
            JumpSite::Switch {
                opcode,
                default,
                keys,
                targets,
            } => {
                out.push(*opcode);
                for _ in 0..switch_padding(offset) {
                    out.push(0);
                }
                let default = relative_target(offset, *default) as i32;
                out.extend_from_slice(&default.to_be_bytes());
                match keys {
                    SwitchKeys::Table { low, high } => {
                        out.extend_from_slice(&low.to_be_bytes());
                        out.extend_from_slice(&high.to_be_bytes());
                        for target in targets {
                            let relative = relative_target(offset, *target) as i32;
                            out.extend_from_slice(&relative.to_be_bytes());
                        }
                    }
                    SwitchKeys::Lookup(keys) => {
                        out.extend_from_slice(&(keys.len() as i32).to_be_bytes());
                        for (key, target) in keys.iter().zip(targets) {
                            let relative = relative_target(offset, *target) as i32;
                            out.extend_from_slice(&key.to_be_bytes());
                            out.extend_from_slice(&relative.to_be_bytes());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
