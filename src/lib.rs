//! Edit the compiled bodies of JVM methods
//!
//! The [`jvm`] module models the parts of the class file format that matter when rewriting a
//! method body (constant pool, `Code` attribute, exception/line/local tables) along with the
//! bytecode relocation machinery. The [`splice`] module builds the high-level editing operations
//! on top of that: inserting snippets before a method body, after it (on every return and
//! optionally on exceptional exit), at a source line, or as a new exception handler.

pub mod jvm;
pub mod splice;
mod util;
