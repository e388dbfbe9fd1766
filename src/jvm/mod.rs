//! Read, rewrite, and write JVM classes
//!
//! ### Structure
//!
//! Unlike a class generator, an editor starts from an existing class file and has to leave
//! everything it does not understand untouched. Consequently, most of the class file is kept in
//! its raw serialized form ([`class_file::Attribute`]) and only the pieces that need rewriting are
//! decoded:
//!
//!   - the constant pool, since snippets need to add classes, members, and strings to it
//!   - the `Code` attribute of a method, along with the tables inside it that refer to bytecode
//!     offsets (exception table, `LineNumberTable`, `LocalVariableTable`)
//!
//! ### Bytecode rewriting
//!
//! The [`code`] module contains the primitive everything else builds on: inserting a gap of
//! bytes into a code array while keeping every offset in the method consistent (see
//! [`code::insert_gap`]).
//!
//! ### Simple example
//!
//! ```
//! use jarsplice::jvm::class_file::{Code, ExceptionHandler};
//! use jarsplice::jvm::code::{insert_gap, GapMode};
//!
//! # fn main() -> Result<(), jarsplice::jvm::Error> {
//! // iconst_0; ireturn  protected by a handler at offset 2
//! let mut code = Code::new(1, 1, vec![0x03, 0xac, 0xbf]);
//! code.exception_table.push(ExceptionHandler {
//!     start_pc: 0,
//!     end_pc: 2,
//!     handler_pc: 2,
//!     catch_type: None,
//! });
//!
//! let gap = insert_gap(&mut code, 1, 2, GapMode::Exclusive)?;
//! assert_eq!(gap.position, 1);
//! assert_eq!(code.code, vec![0x03, 0x00, 0x00, 0xac, 0xbf]);
//! assert_eq!(code.exception_table[0].handler_pc, 4);
//! # Ok(())
//! # }
//! ```

mod access_flags;
pub mod class_file;
pub mod code;
mod descriptors;
mod errors;
mod names;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
