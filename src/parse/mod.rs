//! Reads the textual form of SIL into a [`Module`].

use crate::{
    config::ParserOptions,
    diagnostics::{DiagnosticCollector, DiagnosticSink},
    oracle::{DeclTable, ModuleLoader},
    sil::module::Module,
    source::SourceFile,
};

mod decls;
mod instructions;
pub mod lexer;
mod name_tables;
mod parser;
mod types;

pub use parser::Parser;

/// The module parsed from one file, along with everything that went wrong.
/// Declarations with errors are skipped, so the module is always usable.
#[derive(Debug)]
pub struct ParseResult {
    pub module: Module,
    pub diagnostics: DiagnosticCollector,
}

impl ParseResult {
    pub fn is_ok(&self) -> bool {
        !self.diagnostics.has_errors()
    }
}

/// Parses `source`. Swift declarations found in the file are added to
/// `decls`, and `import`s are resolved through `loader` when one is given.
pub fn parse_source<'session>(
    source: &SourceFile,
    decls: &'session mut DeclTable,
    options: ParserOptions,
    loader: Option<&'session mut dyn ModuleLoader>,
) -> ParseResult {
    Parser::new(source, decls, options, loader).parse_module()
}
