//! Splice snippets of code into existing method bodies
//!
//! ### Editing a method
//!
//! Classes are loaded into an [`EditableClass`], from which a method is picked as a [`Behavior`].
//! All of the editing operations hang off of `Behavior`:
//!
//!   - [`Behavior::insert_before`] runs a snippet on entry
//!   - [`Behavior::insert_after`] runs a snippet on every return (and optionally on exceptions)
//!   - [`Behavior::insert_at`] runs a snippet at the start of a source line
//!   - [`Behavior::add_catch`] wraps the body in a new exception handler
//!
//! ### Snippets
//!
//! Snippets are turned into bytecode by a [`Compiler`]. The default one is the
//! [`SnippetAssembler`], which accepts a small textual assembly language with named locals.
//! Compilers are handed the [`Bindings`] in scope and return a position independent
//! [`Fragment`], which then gets placed into the method with [`fragment::place`] or
//! [`fragment::append`].

mod assembler;
mod behavior;
mod class;
mod compiler;
mod errors;
pub mod fragment;
mod settings;

pub use assembler::*;
pub use behavior::*;
pub use class::*;
pub use compiler::*;
pub use errors::*;
pub use fragment::Fragment;
pub use settings::*;
