use super::jump_encoding::JumpSite;
use super::opcodes::{instruction_width, NOP};
use crate::jvm::class_file::{Code, CodeAttribute};
use crate::jvm::Error;
use log::trace;

/// What happens to references to the offset where a gap is inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapMode {
    /// References keep pointing at the instruction originally at that offset, so the gap is
    /// outside of any range starting there and jumps to that instruction skip the gap
    Exclusive,

    /// References point at the start of the gap, so the gap is inside any range starting there and
    /// jumps to that instruction run the gap first
    Inclusive,
}

/// Result of inserting a gap into code
///
/// Besides the position of the gap, this also remembers where every instruction of the old code
/// ended up, so that offsets recorded before the edit can be translated.
#[derive(Debug, Clone)]
pub struct Gap {
    /// Offset of the start of the gap in the new code
    pub position: usize,

    /// Size of the gap
    pub length: usize,

    /// Offset in the old code where the gap was requested
    at: usize,
    mode: GapMode,

    old_starts: Vec<usize>,
    new_starts: Vec<usize>,
    old_len: usize,
    new_len: usize,
}

impl Gap {
    /// Offset in the new code of an instruction boundary of the old code
    pub fn map(&self, old_offset: usize) -> Result<usize, Error> {
        if old_offset == self.at {
            return Ok(match self.mode {
                GapMode::Exclusive => self.position + self.length,
                GapMode::Inclusive => self.position,
            });
        }
        if old_offset == self.old_len {
            return Ok(self.new_len);
        }
        match self.old_starts.binary_search(&old_offset) {
            Ok(idx) => Ok(self.new_starts[idx]),
            Err(_) => Err(Error::InvalidInstructionBoundary(old_offset)),
        }
    }

    /// Target of a jump after the edit
    ///
    /// An instruction at the gap which jumps to itself keeps jumping to itself.
    fn map_jump(&self, from: usize, target: usize) -> Result<usize, Error> {
        if from == self.at && target == self.at {
            Ok(self.position + self.length)
        } else {
            self.map(target)
        }
    }
}

/// Instruction of the code being relocated
struct Instruction {
    offset: usize,
    width: usize,
    jump: Option<JumpSite>,
    widened: bool,
}

impl Instruction {
    fn width_at(&self, offset: usize) -> usize {
        match &self.jump {
            Some(jump) => jump.width_at(offset, self.widened),
            None => self.width,
        }
    }
}

/// Compute where every instruction goes if the gap is inserted before the instruction at `at`
fn layout(
    instructions: &[Instruction],
    at: usize,
    length: usize,
    mode: GapMode,
    old_len: usize,
) -> Gap {
    let mut position = None;
    let mut new_starts = Vec::with_capacity(instructions.len());
    let mut offset = 0;
    for instruction in instructions {
        if instruction.offset == at {
            position = Some(offset);
            offset += length;
        }
        new_starts.push(offset);
        offset += instruction.width_at(offset);
    }
    let position = match position {
        Some(position) => position,
        None => {
            offset += length;
            offset - length
        }
    };
    Gap {
        position,
        length,
        at,
        mode,
        old_starts: instructions.iter().map(|insn| insn.offset).collect(),
        new_starts,
        old_len,
        new_len: offset,
    }
}

/// Insert a gap of `length` bytes of `nop` in front of the instruction at offset `at`
///
/// This is the single place where offsets in a method get relocated: jump targets in the code
/// itself, the exception table, line numbers, and local variable scopes are all moved together.
/// Jumps which no longer fit in 16 bits are widened, and switch padding is recomputed, so the
/// instructions before `at` can also move (`Gap::position` is where the gap actually starts).
///
/// `at` may also be the end of the code, in which case the gap is appended.
pub fn insert_gap(code: &mut Code, at: usize, length: usize, mode: GapMode) -> Result<Gap, Error> {
    let old_len = code.code.len();

    let mut instructions = vec![];
    let mut offset = 0;
    while offset < old_len {
        let width = instruction_width(&code.code, offset)?;
        instructions.push(Instruction {
            offset,
            width,
            jump: JumpSite::decode(&code.code, offset)?,
            widened: false,
        });
        offset += width;
    }
    if at != old_len && !instructions.iter().any(|insn| insn.offset == at) {
        return Err(Error::InvalidInstructionBoundary(at));
    }

    // Widen jumps until everything fits. Widened jumps are never narrowed again, so this stops
    // after at most one round per narrow jump.
    let mut gap = layout(&instructions, at, length, mode, old_len);
    let mut widened_count = 0;
    loop {
        let mut changed = false;
        for (idx, instruction) in instructions.iter_mut().enumerate() {
            if instruction.widened {
                continue;
            }
            if let Some(jump @ JumpSite::Narrow { .. }) = &instruction.jump {
                let from = instruction.offset;
                let new_jump = jump.map_targets(|target| gap.map_jump(from, target))?;
                if !new_jump.fits_at(gap.new_starts[idx]) {
                    instruction.widened = true;
                    widened_count += 1;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
        gap = layout(&instructions, at, length, mode, old_len);
    }

    if gap.new_len > u16::MAX as usize {
        return Err(Error::MethodCodeOverflow(gap.new_len));
    }

    // Emit the new code
    let mut new_code = Vec::with_capacity(gap.new_len);
    for (idx, instruction) in instructions.iter().enumerate() {
        if instruction.offset == at {
            new_code.resize(new_code.len() + length, NOP);
        }
        debug_assert_eq!(new_code.len(), gap.new_starts[idx]);
        match &instruction.jump {
            None => {
                let end = instruction.offset + instruction.width;
                new_code.extend_from_slice(&code.code[instruction.offset..end]);
            }
            Some(jump) => {
                let from = instruction.offset;
                let new_jump = jump.map_targets(|target| gap.map_jump(from, target))?;
                new_jump.encode(new_code.len(), instruction.widened, &mut new_code)?;
            }
        }
    }
    if at == old_len {
        new_code.resize(new_code.len() + length, NOP);
    }
    debug_assert_eq!(new_code.len(), gap.new_len);

    // Relocate the tables into a copy first, so that a bad offset leaves `code` untouched
    let mut exception_table = code.exception_table.clone();
    for handler in &mut exception_table {
        handler.start_pc = gap.map(handler.start_pc as usize)? as u16;
        handler.end_pc = gap.map(handler.end_pc as usize)? as u16;
        handler.handler_pc = gap.map(handler.handler_pc as usize)? as u16;
    }

    let mut attributes = code.attributes.clone();
    for attribute in &mut attributes {
        match attribute {
            CodeAttribute::LineNumberTable(table) => {
                for entry in &mut table.entries {
                    entry.start_pc = gap.map(entry.start_pc as usize)? as u16;
                }
            }
            CodeAttribute::LocalVariableTable(table)
            | CodeAttribute::LocalVariableTypeTable(table) => {
                for entry in &mut table.entries {
                    let old_start = entry.start_pc as usize;
                    let old_end = old_start + entry.length as usize;

                    // Variables in scope from the start (eg. parameters) stay in scope
                    let new_start = if old_start == 0 {
                        0
                    } else {
                        gap.map(old_start)?
                    };
                    let new_end = gap.map(old_end)?;
                    entry.start_pc = new_start as u16;
                    entry.length = (new_end - new_start) as u16;
                }
            }
            CodeAttribute::StackMapTable(_) | CodeAttribute::Other(_) => (),
        }
    }

    trace!(
        "inserted {} byte gap at {} ({:?}), now at {}, widened {} jumps, code is {} bytes",
        length,
        at,
        mode,
        gap.position,
        widened_count,
        gap.new_len
    );

    code.code = new_code;
    code.exception_table = exception_table;
    code.attributes = attributes;
    Ok(gap)
}
