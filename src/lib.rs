//! Reading, printing and locally optimizing the textual form of SIL.
//!
//! [`parse::parse_source`] turns a `.sil` file into a [`sil::module::Module`],
//! reporting problems as [`diagnostics::Diagnostic`]s instead of stopping at
//! the first one. [`opt`] holds the utilities and passes which work on the
//! parsed functions.

pub mod config;
pub mod diagnostics;
pub mod index;
pub mod intern;
pub(crate) mod logging;
pub mod opt;
pub mod oracle;
pub mod parse;
pub mod sil;
pub mod source;
