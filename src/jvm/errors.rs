use super::class_file::ConstantPoolOverflow;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    ConstantPoolOverflow(ConstantPoolOverflow),
    IoError(std::io::Error),

    /// Class file could not be decoded
    MalformedClassFile(String),

    /// Code array would be longer than offsets in the method tables can represent
    MethodCodeOverflow(usize),
    MethodCodeMaxStackOverflow(usize),
    MethodCodeMaxLocalsOverflow(usize),

    /// Offset which should be the start of an instruction (or the end of the code) is not
    InvalidInstructionBoundary(usize),

    /// Instruction starting at this offset runs past the end of the code
    TruncatedInstruction(usize),

    /// Opcode is not part of the instruction set
    UnknownOpcode { offset: usize, opcode: u8 },
}

impl From<ConstantPoolOverflow> for Error {
    fn from(err: ConstantPoolOverflow) -> Error {
        Error::ConstantPoolOverflow(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConstantPoolOverflow(overflow) => write!(
                f,
                "constant pool overflow at index {} adding {:?}",
                overflow.offset, overflow.constant
            ),
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::MalformedClassFile(msg) => write!(f, "malformed class file: {}", msg),
            Error::MethodCodeOverflow(len) => {
                write!(f, "method code of {} bytes exceeds 65535 bytes", len)
            }
            Error::MethodCodeMaxStackOverflow(size) => {
                write!(f, "max stack of {} exceeds 65535", size)
            }
            Error::MethodCodeMaxLocalsOverflow(size) => {
                write!(f, "max locals of {} exceeds 65535", size)
            }
            Error::InvalidInstructionBoundary(offset) => {
                write!(f, "offset {} is not an instruction boundary", offset)
            }
            Error::TruncatedInstruction(offset) => {
                write!(f, "instruction at offset {} is truncated", offset)
            }
            Error::UnknownOpcode { offset, opcode } => {
                write!(f, "unknown opcode 0x{:02x} at offset {}", opcode, offset)
            }
        }
    }
}

impl std::error::Error for Error {}
