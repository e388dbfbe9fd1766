use super::CompileError;
use crate::jvm;
use crate::jvm::class_file::ConstantPoolOverflow;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Snippet failed to compile
    Compile(CompileError),

    /// Method is abstract or native
    NoMethodBody,

    /// Method has no `LineNumberTable`
    NoLineNumberInfo,

    /// Declaring class is frozen
    Frozen(String),

    /// Encoding or relocating bytecode failed
    Bytecode(jvm::Error),

    /// Type name or descriptor which does not resolve
    TypeResolution(String),

    /// No method with this name (and descriptor) in the class
    NoSuchMethod(String),
}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Error {
        Error::Compile(err)
    }
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::Bytecode(err)
    }
}

impl From<ConstantPoolOverflow> for Error {
    fn from(err: ConstantPoolOverflow) -> Error {
        Error::Bytecode(jvm::Error::ConstantPoolOverflow(err))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Compile(err) => write!(f, "cannot compile: {}", err),
            Error::NoMethodBody => f.write_str("no method body"),
            Error::NoLineNumberInfo => f.write_str("no line number info"),
            Error::Frozen(class) => write!(f, "{}: class is frozen", class),
            Error::Bytecode(err) => write!(f, "bad bytecode: {}", err),
            Error::TypeResolution(msg) => write!(f, "cannot resolve type: {}", msg),
            Error::NoSuchMethod(method) => write!(f, "no such method: {}", method),
        }
    }
}

impl std::error::Error for Error {}
