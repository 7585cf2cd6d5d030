//! In-memory representation of SIL: types, values, instructions, functions
//! and the module holding them.

pub mod builder;
pub mod function;
pub mod instruction;
pub mod module;
pub mod printer;
pub mod types;
pub mod value;
