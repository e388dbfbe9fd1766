use super::Fragment;
use crate::jvm;
use crate::jvm::class_file::{ConstantPoolOverflow, ConstantsPool};
use crate::jvm::FieldType;
use crate::util::Width;
use std::fmt;

/// Turns snippets of source into fragments of bytecode
///
/// The splicing operations don't care what the source language is. They only hand over the
/// variables in scope at the point where the fragment will run, and expect back a fragment which
/// only uses slots from `Bindings::first_free_slot` up for its own temporaries.
pub trait Compiler {
    fn compile(
        &mut self,
        source: &str,
        bindings: &Bindings,
        constants: &mut ConstantsPool,
    ) -> Result<Fragment, CompileError>;
}

/// Named local variable slot visible to a snippet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub slot: u16,

    /// `None` is the placeholder bound for the return value of a `void` method, which occupies
    /// one slot like an object reference
    pub field_type: Option<FieldType>,
}

impl Binding {
    pub fn new(name: impl Into<String>, slot: u16, field_type: Option<FieldType>) -> Binding {
        Binding {
            name: name.into(),
            slot,
            field_type,
        }
    }
}

impl Width for Binding {
    fn width(&self) -> usize {
        self.field_type.as_ref().map_or(1, |typ| typ.width())
    }
}

/// Everything in scope where a fragment is going to run
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    /// Positional parameters (receiver included, if there is one)
    pub parameters: Vec<Binding>,

    /// Named local variables live where the fragment runs (from the `LocalVariableTable`)
    pub locals: Vec<Binding>,

    /// Value about to be returned, for fragments running on method exit
    pub return_value: Option<Binding>,

    /// Caught exception, for fragments running as an exception handler
    pub caught: Option<Binding>,

    /// First slot the fragment may use for its own locals
    pub first_free_slot: u16,

    /// Operand stack depth at the start of the fragment
    pub initial_stack_depth: u16,
}

impl Bindings {
    /// Find a binding by name
    ///
    /// Synthetic bindings shadow named locals, which shadow positional parameters. Among locals,
    /// the innermost (last declared) one wins.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.caught
            .iter()
            .chain(self.return_value.iter())
            .chain(self.locals.iter().rev())
            .chain(self.parameters.iter())
            .find(|binding| binding.name == name)
    }

    /// Number of local slots needed to hold every binding
    pub fn slots_used(&self) -> u16 {
        self.parameters
            .iter()
            .chain(self.locals.iter())
            .chain(self.return_value.iter())
            .chain(self.caught.iter())
            .map(|binding| binding.slot + binding.width() as u16)
            .max()
            .unwrap_or(0)
            .max(self.first_free_slot)
    }
}

#[derive(Debug)]
pub enum CompileError {
    /// Statement could not be parsed
    Syntax { line: usize, message: String },

    /// Name is not bound to any variable
    UnknownBinding(String),

    /// Jump to a label which is never defined
    UnknownLabel(String),

    /// Type or descriptor which is malformed
    BadType(String),

    /// Operand stack would have a negative depth
    StackUnderflow { offset: usize },

    /// Control flow merges with different operand stack depths
    InconsistentStack { offset: usize },

    Bytecode(jvm::Error),
}

impl From<jvm::Error> for CompileError {
    fn from(err: jvm::Error) -> CompileError {
        CompileError::Bytecode(err)
    }
}

impl From<ConstantPoolOverflow> for CompileError {
    fn from(err: ConstantPoolOverflow) -> CompileError {
        CompileError::Bytecode(jvm::Error::ConstantPoolOverflow(err))
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Syntax { line, message } => write!(f, "line {}: {}", line, message),
            CompileError::UnknownBinding(name) => write!(f, "unknown variable `{}`", name),
            CompileError::UnknownLabel(name) => write!(f, "unknown label `{}`", name),
            CompileError::BadType(msg) => write!(f, "bad type: {}", msg),
            CompileError::StackUnderflow { offset } => {
                write!(f, "operand stack underflow at offset {}", offset)
            }
            CompileError::InconsistentStack { offset } => {
                write!(f, "inconsistent operand stack depth at offset {}", offset)
            }
            CompileError::Bytecode(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CompileError {}
