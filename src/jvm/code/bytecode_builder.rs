use super::opcodes::*;
use crate::jvm::class_file::{Code, ExceptionHandler};
use crate::jvm::{Error, ValueKind};
use crate::util::Width;

/// Small emitter for straight-line glue code
///
/// This works directly at the level of bytes: there are no labels, just offsets. Forward jumps
/// are emitted with a placeholder offset and patched once the target is known. The builder also
/// tracks the maximum stack and local sizes the code needs, since the caller is the one who knows
/// what the code does to the stack.
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    code: Vec<u8>,
    exception_table: Vec<ExceptionHandler>,
    max_stack: u16,
    max_locals: u16,
}

impl BytecodeBuilder {
    pub fn new() -> BytecodeBuilder {
        BytecodeBuilder::default()
    }

    /// Offset at which the next instruction will be emitted
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Raise the maximum stack size to at least `depth`
    pub fn require_stack(&mut self, depth: u16) {
        self.max_stack = self.max_stack.max(depth);
    }

    /// Raise the maximum locals size to at least `count`
    pub fn require_locals(&mut self, count: u16) {
        self.max_locals = self.max_locals.max(count);
    }

    pub fn push_opcode(&mut self, opcode: u8) {
        self.code.push(opcode);
    }

    pub fn push_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    pub fn push_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    pub fn push_i16(&mut self, value: i16) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    pub fn push_i32(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit an instruction which takes a local variable index as its operand
    ///
    /// Uses the `wide` form when the index does not fit in a byte.
    fn push_local_instruction(&mut self, opcode: u8, slot: u16) {
        if let Ok(slot) = u8::try_from(slot) {
            self.code.push(opcode);
            self.code.push(slot);
        } else {
            self.code.push(WIDE);
            self.code.push(opcode);
            self.push_u16(slot);
        }
    }

    /// Load a local onto the stack, using the shortest encoding
    pub fn push_load(&mut self, kind: ValueKind, slot: u16) {
        if slot < 4 {
            self.code.push(kind.load_short_opcode() + slot as u8);
        } else {
            self.push_local_instruction(kind.load_opcode(), slot);
        }
        self.require_locals(slot + kind.width() as u16);
    }

    /// Store the top of the stack into a local, using the shortest encoding
    pub fn push_store(&mut self, kind: ValueKind, slot: u16) {
        if slot < 4 {
            self.code.push(kind.store_short_opcode() + slot as u8);
        } else {
            self.push_local_instruction(kind.store_opcode(), slot);
        }
        self.require_locals(slot + kind.width() as u16);
    }

    /// Increment an `int` local
    pub fn push_iinc(&mut self, slot: u16, delta: i16) {
        match (u8::try_from(slot), i8::try_from(delta)) {
            (Ok(slot), Ok(delta)) => {
                self.code.push(IINC);
                self.code.push(slot);
                self.code.push(delta as u8);
            }
            _ => {
                self.code.push(WIDE);
                self.code.push(IINC);
                self.push_u16(slot);
                self.push_i16(delta);
            }
        }
        self.require_locals(slot + 1);
    }

    /// Return from a subroutine whose return address is in `slot`
    pub fn push_ret(&mut self, slot: u16) {
        self.push_local_instruction(RET, slot);
        self.require_locals(slot + 1);
    }

    /// Push the zero value (or `null`) of some kind
    pub fn push_zero(&mut self, kind: ValueKind) {
        self.code.push(kind.zero_opcode());
    }

    /// Emit a 16-bit jump with a placeholder offset, returning the offset of the instruction
    pub fn push_jump_placeholder(&mut self, opcode: u8) -> usize {
        let offset = self.code.len();
        self.code.push(opcode);
        self.push_i16(0);
        offset
    }

    /// Point the jump emitted at `site` towards `target`
    pub fn patch_jump(&mut self, site: usize, target: usize) -> Result<(), Error> {
        let relative = i16::try_from(target as isize - site as isize)
            .map_err(|_| Error::MethodCodeOverflow(target))?;
        self.code[site + 1..site + 3].copy_from_slice(&relative.to_be_bytes());
        Ok(())
    }

    /// Overwrite the 32-bit operand at `at` (eg. a switch target)
    pub fn patch_i32(&mut self, at: usize, value: i32) {
        self.code[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Emit `nop` until the current offset is a multiple of 4
    pub fn align(&mut self) {
        while self.code.len() % 4 != 0 {
            self.code.push(NOP);
        }
    }

    /// Add a row to the exception table
    pub fn push_exception_handler(&mut self, handler: ExceptionHandler) {
        self.exception_table.push(handler);
    }

    /// Copy in some standalone code, returning the offset at which it starts
    ///
    /// The code is aligned first if it has a switch (so the switch padding stays valid). Its
    /// exception handlers are rebased and appended, and its maxima merged.
    pub fn append_code(&mut self, other: &Code) -> Result<usize, Error> {
        if contains_switch(&other.code)? {
            self.align();
        }
        let start = self.code.len();
        self.code.extend_from_slice(&other.code);
        let end = self.code.len();
        if end > u16::MAX as usize {
            return Err(Error::MethodCodeOverflow(end));
        }
        for handler in &other.exception_table {
            self.exception_table.push(ExceptionHandler {
                start_pc: handler.start_pc + start as u16,
                end_pc: handler.end_pc + start as u16,
                handler_pc: handler.handler_pc + start as u16,
                catch_type: handler.catch_type,
            });
        }
        self.require_stack(other.max_stack);
        self.require_locals(other.max_locals);
        Ok(start)
    }

    /// Finish building
    pub fn into_code(self) -> Result<Code, Error> {
        if self.code.len() > u16::MAX as usize {
            return Err(Error::MethodCodeOverflow(self.code.len()));
        }
        Ok(Code {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code: self.code,
            exception_table: self.exception_table,
            attributes: vec![],
        })
    }
}
