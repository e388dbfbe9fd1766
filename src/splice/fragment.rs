use crate::jvm::class_file::{Code, ExceptionHandler};
use crate::jvm::code::opcodes::{contains_switch, NOP};
use crate::jvm::code::{insert_gap, GapMode};
use crate::jvm::Error;

/// Self-contained piece of bytecode, ready to be spliced into a method
///
/// Offsets in the exception table are relative to the start of the fragment. Fragments are
/// compiled as if they start at offset 0, so a fragment containing a switch must be placed at a
/// multiple of 4 for its padding to stay valid.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fragment {
    pub code: Vec<u8>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub exception_table: Vec<ExceptionHandler>,
}

impl Fragment {
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Exception table rows moved to a fragment starting at `start`
    fn rebased_handlers(&self, start: usize) -> impl Iterator<Item = ExceptionHandler> + '_ {
        let start = start as u16;
        self.exception_table
            .iter()
            .map(move |handler| ExceptionHandler {
                start_pc: handler.start_pc + start,
                end_pc: handler.end_pc + start,
                handler_pc: handler.handler_pc + start,
                catch_type: handler.catch_type,
            })
    }

    /// Grow the maxima of some code to fit the fragment
    fn merge_maxima_into(&self, code: &mut Code) {
        code.max_stack = code.max_stack.max(self.max_stack);
        code.max_locals = code.max_locals.max(self.max_locals);
    }
}

impl From<Code> for Fragment {
    fn from(code: Code) -> Fragment {
        Fragment {
            code: code.code,
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            exception_table: code.exception_table,
        }
    }
}

impl From<Fragment> for Code {
    fn from(fragment: Fragment) -> Code {
        Code {
            max_stack: fragment.max_stack,
            max_locals: fragment.max_locals,
            code: fragment.code,
            exception_table: fragment.exception_table,
            attributes: vec![],
        }
    }
}

/// Insert a fragment in front of the instruction at `at`, returning where the fragment starts
///
/// The fragment's exception handlers go in front of the existing ones, so that handlers inside
/// the fragment take priority over handlers covering the insertion point. If the fragment has a
/// switch, up to 3 bytes of `nop` surround it to keep it aligned.
pub fn place(code: &mut Code, at: usize, fragment: &Fragment, mode: GapMode) -> Result<usize, Error> {
    let needs_alignment = contains_switch(&fragment.code)?;
    let slack = if needs_alignment { 3 } else { 0 };
    let gap = insert_gap(code, at, fragment.len() + slack, mode)?;

    let padding = if needs_alignment {
        (4 - gap.position % 4) % 4
    } else {
        0
    };
    let start = gap.position + padding;
    code.code[start..start + fragment.len()].copy_from_slice(&fragment.code);

    let handlers: Vec<ExceptionHandler> = fragment.rebased_handlers(start).collect();
    code.exception_table.splice(0..0, handlers);
    fragment.merge_maxima_into(code);

    Ok(start)
}

/// Append a fragment at the end of the code, returning where the fragment starts
///
/// The fragment's exception handlers go after the existing ones.
pub fn append(code: &mut Code, fragment: &Fragment) -> Result<usize, Error> {
    let padding = if contains_switch(&fragment.code)? {
        (4 - code.code.len() % 4) % 4
    } else {
        0
    };
    let start = code.code.len() + padding;
    let end = start + fragment.len();
    if end > u16::MAX as usize {
        return Err(Error::MethodCodeOverflow(end));
    }

    code.code.resize(start, NOP);
    code.code.extend_from_slice(&fragment.code);
    code.exception_table.extend(fragment.rebased_handlers(start));
    fragment.merge_maxima_into(code);

    Ok(start)
}
