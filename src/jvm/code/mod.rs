//! Bytecode level editing of method bodies

mod bytecode_builder;
mod gap;
mod jump_encoding;
pub mod opcodes;

pub use bytecode_builder::*;
pub use gap::*;
pub use jump_encoding::*;
