//! The recursive descent driver: token helpers, error recovery, the top level
//! declaration loop, functions and their blocks. Types, instruction operands
//! and the remaining declarations live in sibling modules as further `impl
//! Parser` blocks.

use std::rc::Rc;

use crate::{
    config::ParserOptions,
    diagnostics::{report, Diagnostic, DiagnosticCollector, DiagnosticKind, DiagnosticSink},
    intern::InternedSymbol,
    logging::parse_log,
    oracle::{DeclTable, ModuleLoader, TypeOracle},
    parse::{
        instructions::parse_operands,
        lexer::{integer_value, unescape, Keyword, Lexer, Token, TokenKind},
        name_tables::{BlockNameTable, LocalNameTable, NameError},
        ParseResult,
    },
    sil::{
        builder::Builder,
        function::{
            BlockId, Body, EffectsKind, Function, FunctionAttributes, FunctionId, InlineStrategy,
            SerializedKind, SourceLoc, SpecializationKind, SpecializeAttr, ThunkKind,
        },
        instruction::{InstKind, Opcode},
        module::{Linkage, Module, ScopeId, SilStage},
        printer::print_instruction,
        types::{
            Conformance, GenericParam, GenericSignature, Requirement, SilType, Substitution, Type,
        },
        value::{OwnershipKind, ValueId},
    },
    source::{SourceFile, Span},
    config::OptimizationMode,
};

/// A failed production. Its diagnostic has already been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError;

pub type PResult<T> = Result<T, ParseError>;

/// A `%name` or `undef` before its type is known
#[derive(Debug, Clone, Copy)]
pub struct ValueRef<'source> {
    /// `None` for `undef`
    pub name: Option<&'source str>,
    pub span: Span,
}

/// What an operand parser hands back to be turned into an instruction
#[derive(Debug)]
pub struct ParsedInst {
    pub kind: InstKind,
    pub operands: Vec<ValueId>,
    pub results: Vec<SilType>,
}

impl ParsedInst {
    pub fn new(kind: InstKind, operands: Vec<ValueId>, results: Vec<SilType>) -> Self {
        Self {
            kind,
            operands,
            results,
        }
    }

    pub fn no_results(kind: InstKind, operands: Vec<ValueId>) -> Self {
        Self::new(kind, operands, Vec::new())
    }

    pub fn single(kind: InstKind, operands: Vec<ValueId>, result: SilType) -> Self {
        Self::new(kind, operands, vec![result])
    }
}

/// State of the body being parsed. The body is moved out of its function
/// while it is being filled in.
pub struct BodyContext {
    pub body: Body,
    pub values: LocalNameTable,
    pub blocks: BlockNameTable,
    pub current: Option<BlockId>,
}

impl BodyContext {
    pub fn new(body: Body) -> Self {
        Self {
            body,
            values: LocalNameTable::new(),
            blocks: BlockNameTable::new(),
            current: None,
        }
    }
}

/// `[_specialize ...]` before the function's generic signature is known
struct SpecializeDraft {
    exported: bool,
    kind: SpecializationKind,
    requirements: Option<Span>,
}

pub struct Parser<'source, 'session> {
    pub(super) lexer: Lexer<'source>,
    pub(super) decls: &'session mut DeclTable,
    pub(super) options: ParserOptions,
    pub(super) loader: Option<&'session mut dyn ModuleLoader>,
    pub(super) module: Module,
    pub(super) diagnostics: DiagnosticCollector,
    /// Generic parameters in scope, innermost last
    pub(super) generic_scopes: Vec<Vec<GenericParam>>,
    stage_seen: bool,
}

impl DiagnosticSink for Parser<'_, '_> {
    fn diagnose(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.diagnose(diagnostic);
    }

    fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

fn is_word(kind: TokenKind) -> bool {
    matches!(kind, TokenKind::Identifier | TokenKind::Keyword(_))
}

impl<'source, 'session> Parser<'source, 'session> {
    pub fn new(
        source: &'source SourceFile,
        decls: &'session mut DeclTable,
        options: ParserOptions,
        loader: Option<&'session mut dyn ModuleLoader>,
    ) -> Self {
        Self {
            lexer: Lexer::new(source),
            decls,
            options,
            loader,
            module: Module::new(),
            diagnostics: DiagnosticCollector::new(),
            generic_scopes: Vec::new(),
            stage_seen: false,
        }
    }

    /* Tokens */

    pub(super) fn text(&self, token: Token) -> &'source str {
        self.lexer.source().value_of_span(token.span)
    }

    pub(super) fn peek_is(&mut self, kind: TokenKind) -> bool {
        self.lexer.peek().is_some_and(|t| t.kind == kind)
    }

    pub(super) fn peek_nth_is(&mut self, n: usize, kind: TokenKind) -> bool {
        self.lexer.peek_nth(n).is_some_and(|t| t.kind == kind)
    }

    /// Text of the next token when it is an identifier or keyword
    pub(super) fn peek_word(&mut self) -> Option<&'source str> {
        self.peek_nth_word(0)
    }

    pub(super) fn peek_nth_word(&mut self, n: usize) -> Option<&'source str> {
        let token = self.lexer.peek_nth(n)?;
        is_word(token.kind).then(|| self.text(token))
    }

    pub(super) fn peek_span(&mut self) -> Span {
        match self.lexer.peek() {
            Some(token) => token.span,
            None => {
                let end = self.lexer.source().contents.len();
                Span::new(end, end)
            }
        }
    }

    pub(super) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_is(kind) {
            self.lexer.next();
            return true;
        }

        false
    }

    pub(super) fn eat_word(&mut self, word: &str) -> bool {
        if self.peek_word() == Some(word) {
            self.lexer.next();
            return true;
        }

        false
    }

    /// Records that something else was expected at the next token
    pub(super) fn expected(&mut self, expecting: &str) -> ParseError {
        match self.lexer.peek() {
            Some(token) if token.kind == TokenKind::Unknown => {
                report!(self, token.span, InvalidToken, "invalid character '{}'", self.text(token));
            }
            Some(token) if token.kind == TokenKind::UnterminatedString => {
                report!(self, token.span, InvalidToken, "unterminated string literal");
            }
            Some(token) => {
                report!(
                    self,
                    token.span,
                    ExpectedToken,
                    "expected {expecting}, found '{}'",
                    self.text(token)
                );
            }
            None => {
                let span = self.peek_span();
                report!(self, span, ExpectedToken, "expected {expecting}, found end of file");
            }
        }

        ParseError
    }

    pub(super) fn expect_peek(&mut self, expecting: &str) -> PResult<Token> {
        match self.lexer.peek() {
            Some(token) => Ok(token),
            None => Err(self.expected(expecting)),
        }
    }

    pub(super) fn expect_next_to_be(&mut self, kind: TokenKind, expecting: &str) -> PResult<Token> {
        match self.lexer.peek() {
            Some(token) if token.kind == kind => {
                self.lexer.next();
                Ok(token)
            }
            _ => Err(self.expected(expecting)),
        }
    }

    pub(super) fn expect_keyword(&mut self, keyword: Keyword, expecting: &str) -> PResult<Token> {
        self.expect_next_to_be(TokenKind::Keyword(keyword), expecting)
    }

    /// An identifier or keyword spelled `word`
    pub(super) fn expect_word(&mut self, word: &str) -> PResult<Token> {
        match self.lexer.peek() {
            Some(token) if is_word(token.kind) && self.text(token) == word => {
                self.lexer.next();
                Ok(token)
            }
            _ => Err(self.expected(&format!("'{word}'"))),
        }
    }

    /// Any identifier or keyword
    pub(super) fn expect_name(&mut self, expecting: &str) -> PResult<(InternedSymbol, Span)> {
        match self.lexer.peek() {
            Some(token) if is_word(token.kind) => {
                self.lexer.next();
                Ok((self.text(token).into(), token.span))
            }
            _ => Err(self.expected(expecting)),
        }
    }

    /// `@name`, returned without the sigil
    pub(super) fn expect_global_name(&mut self, expecting: &str) -> PResult<(InternedSymbol, Span)> {
        let token = self.expect_next_to_be(TokenKind::GlobalName, expecting)?;
        Ok((self.text(token)[1..].into(), token.span))
    }

    /// The name of an `@attribute` at the next token, without the sigil
    pub(super) fn peek_attribute(&mut self) -> Option<&'source str> {
        let token = self.lexer.peek()?;
        (token.kind == TokenKind::GlobalName).then(|| &self.text(token)[1..])
    }

    pub(super) fn expect_integer(&mut self) -> PResult<(u128, Span)> {
        let token = self.expect_next_to_be(TokenKind::IntegerLiteral, "an integer")?;

        match integer_value(self.text(token)) {
            Some(value) => Ok((value, token.span)),
            None => {
                report!(self, token.span, InvalidLiteral, "integer literal '{}' is out of range", self.text(token));
                Err(ParseError)
            }
        }
    }

    pub(super) fn expect_u32(&mut self) -> PResult<u32> {
        let (value, span) = self.expect_integer()?;

        match u32::try_from(value) {
            Ok(value) => Ok(value),
            Err(_) => {
                report!(self, span, InvalidLiteral, "{value} does not fit in 32 bits");
                Err(ParseError)
            }
        }
    }

    pub(super) fn expect_string(&mut self) -> PResult<String> {
        let token = self.expect_next_to_be(TokenKind::StringLiteral, "a string literal")?;

        match unescape(self.text(token)) {
            Some(value) => Ok(value),
            None => {
                report!(self, token.span, InvalidLiteral, "invalid escape sequence in string literal");
                Err(ParseError)
            }
        }
    }

    /// `[word]`, consumed only when it matches
    pub(super) fn bracket_flag(&mut self, word: &str) -> bool {
        let matches = self.peek_is(TokenKind::OpenBracket)
            && self.peek_nth_word(1) == Some(word)
            && self.peek_nth_is(2, TokenKind::CloseBracket);

        if matches {
            self.lexer.next();
            self.lexer.next();
            self.lexer.next();
        }

        matches
    }

    /// `[word]` with any word inside
    pub(super) fn bracket_word(&mut self) -> PResult<Option<(&'source str, Span)>> {
        if !self.peek_is(TokenKind::OpenBracket) {
            return Ok(None);
        }

        self.lexer.next();
        let token = self.expect_peek("an attribute")?;
        if !is_word(token.kind) {
            return Err(self.expected("an attribute"));
        }
        self.lexer.next();
        self.expect_next_to_be(TokenKind::CloseBracket, "']'")?;

        Ok(Some((self.text(token), token.span)))
    }

    /// Whether the next tokens are `, loc` or `, scope`
    pub(super) fn at_trailing_debug_info(&mut self) -> bool {
        self.peek_is(TokenKind::Comma)
            && matches!(self.peek_nth_word(1), Some("loc") | Some("scope"))
    }

    /* Recovery */

    /// Skips the rest of the instruction that started on `line`
    fn skip_line(&mut self, line: usize) {
        while let Some(token) = self.lexer.peek() {
            if token.line != line || token.kind == TokenKind::CloseBrace {
                break;
            }

            self.lexer.next();
        }
    }

    /// Skips to the next top level declaration keyword that begins a line
    fn recover_to_declaration(&mut self) {
        let mut previous_line = self.lexer.next().map(|t| t.line);

        while let Some(token) = self.lexer.peek() {
            let starts_line = previous_line != Some(token.line);

            if let TokenKind::Keyword(keyword) = token.kind {
                if keyword.starts_declaration() && starts_line {
                    return;
                }
            }

            previous_line = Some(token.line);
            self.lexer.next();
        }
    }

    /* Generic scopes */

    pub(super) fn with_generic_scope<T>(
        &mut self,
        params: Vec<GenericParam>,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        self.generic_scopes.push(params);
        let result = f(self);
        self.generic_scopes.pop();
        result
    }

    pub(super) fn lookup_generic_param(&self, name: &str) -> Option<GenericParam> {
        self.generic_scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|param| param.name.value() == name)
            .copied()
    }

    /* Conformances and substitutions */

    /// Finds how `ty` conforms to `protocol`, asking the loader for
    /// conformances declared in other modules when the local tables have none
    pub(super) fn find_conformance(&mut self, ty: &Type, protocol: InternedSymbol) -> Option<Conformance> {
        if let Some(conformance) = self.decls.lookup_conformance(ty, protocol) {
            return Some(conformance);
        }

        let nominal = ty.nominal_name()?;
        let loader = self.loader.as_deref_mut()?;
        loader.load_extensions(self.decls, nominal, 0);
        self.decls.lookup_conformance(ty, protocol)
    }

    /// `<A, B>` after a callee or builtin name, empty when absent
    pub(super) fn parse_substitution_types(&mut self) -> PResult<(Vec<Type>, Span)> {
        let span = self.peek_span();

        if !self.eat(TokenKind::LessThan) {
            return Ok((Vec::new(), span));
        }

        let mut types = vec![self.parse_type()?];
        while self.eat(TokenKind::Comma) {
            types.push(self.parse_type()?);
        }

        let end = self.expect_next_to_be(TokenKind::GreaterThan, "'>'")?;
        Ok((types, span.to(end.span)))
    }

    /// Pairs replacement types with the parameters of `generics`, looking up
    /// the conformances each parameter's requirements need
    pub(super) fn build_substitutions(
        &mut self,
        generics: Option<&Rc<GenericSignature>>,
        replacements: Vec<Type>,
        span: Span,
    ) -> PResult<Vec<Substitution>> {
        let Some(generics) = generics.filter(|g| !g.params.is_empty()) else {
            if replacements.is_empty() {
                return Ok(Vec::new());
            }

            report!(self, span, SubstitutionsOnNonGenericType, "substitutions given for a non-generic type");
            return Err(ParseError);
        };

        if replacements.len() < generics.params.len() {
            report!(
                self,
                span,
                MissingSubstitutions,
                "expected {} substitutions, found {}",
                generics.params.len(),
                replacements.len()
            );
            return Err(ParseError);
        }

        if replacements.len() > generics.params.len() {
            report!(
                self,
                span,
                TooManySubstitutions,
                "expected {} substitutions, found {}",
                generics.params.len(),
                replacements.len()
            );
            return Err(ParseError);
        }

        let mut substitutions = Vec::with_capacity(replacements.len());

        for (param, replacement) in generics.params.iter().zip(replacements) {
            let mut conformances = Vec::new();

            for protocol in generics.conformance_requirements(param) {
                match self.find_conformance(&replacement, protocol) {
                    Some(conformance) => conformances.push(conformance),
                    None => {
                        report!(
                            self,
                            span,
                            SubstitutionMismatch,
                            "{replacement} does not conform to {protocol}, as {} requires",
                            param.name
                        );
                        return Err(ParseError);
                    }
                }
            }

            substitutions.push(Substitution {
                replacement,
                conformances,
            });
        }

        Ok(substitutions)
    }

    /* Values and blocks */

    /// `%name` or `undef`
    pub(super) fn value_name(&mut self) -> PResult<ValueRef<'source>> {
        match self.lexer.peek() {
            Some(token) if token.kind == TokenKind::LocalName => {
                self.lexer.next();
                Ok(ValueRef {
                    name: Some(self.text(token)),
                    span: token.span,
                })
            }
            Some(token) if token.kind == TokenKind::Keyword(Keyword::Undef) => {
                self.lexer.next();
                Ok(ValueRef {
                    name: None,
                    span: token.span,
                })
            }
            _ => Err(self.expected("a value name")),
        }
    }

    /// The value `value` names, expected to be of type `ty`. Mismatches are
    /// reported and replaced by `undef` so parsing can go on.
    pub(super) fn resolve_value(&mut self, ctx: &mut BodyContext, value: ValueRef<'source>, ty: &SilType) -> ValueId {
        let Some(name) = value.name else {
            return ctx.body.undef(ty.clone());
        };

        match ctx.values.use_value(&mut ctx.body, name, ty, value.span) {
            Ok(resolved) => resolved,
            Err(NameError::TypeMismatch { actual }) => {
                report!(
                    self,
                    value.span,
                    ValueTypeMismatch,
                    "value {name} has type {actual} but is used as {ty}"
                );
                ctx.body.undef(ty.clone())
            }
            Err(_) => ctx.body.undef(ty.clone()),
        }
    }

    /// A value whose type the text does not repeat, so it has to be defined
    /// already
    pub(super) fn defined_value(&mut self, ctx: &mut BodyContext, value: ValueRef<'source>) -> PResult<ValueId> {
        let Some(name) = value.name else {
            report!(self, value.span, ExpectedToken, "undef needs a type here");
            return Err(ParseError);
        };

        match ctx.values.lookup(name) {
            Some(resolved) => Ok(resolved),
            None if ctx.values.is_poisoned(name) => Err(ParseError),
            None => {
                report!(self, value.span, UndefinedValue, "use of undefined value {name}");
                Err(ParseError)
            }
        }
    }

    /// `%0 : $T`
    pub(super) fn typed_value(&mut self, ctx: &mut BodyContext) -> PResult<ValueId> {
        let value = self.value_name()?;
        self.expect_next_to_be(TokenKind::Colon, "':'")?;
        let ty = self.parse_sil_type()?;
        Ok(self.resolve_value(ctx, value, &ty))
    }

    /// `%0 : $T, %1 : $U` up to (not including) `until`
    pub(super) fn typed_values_until(&mut self, ctx: &mut BodyContext, until: TokenKind) -> PResult<Vec<ValueId>> {
        let mut values = Vec::new();

        if self.peek_is(until) {
            return Ok(values);
        }

        values.push(self.typed_value(ctx)?);
        while self.eat(TokenKind::Comma) {
            values.push(self.typed_value(ctx)?);
        }

        Ok(values)
    }

    pub(super) fn define_value(&mut self, ctx: &mut BodyContext, name: &str, span: Span, value: ValueId) {
        match ctx.values.define(&mut ctx.body, name, value, span) {
            Ok(()) => {}
            Err(NameError::Redefined { previous }) => {
                report!(self, span, RedefinedValue, "redefinition of value {name}");
                self.diagnose(Diagnostic::note(previous, DiagnosticKind::PriorReference, "previous definition is here"));
            }
            Err(NameError::ForwardTypeMismatch { expected, first_use }) => {
                report!(
                    self,
                    span,
                    ValueTypeMismatch,
                    "value {name} defined with type {} but used earlier as {expected}",
                    ctx.body.value_type(value)
                );
                self.diagnose(Diagnostic::note(first_use, DiagnosticKind::PriorReference, "first use is here"));
            }
            Err(NameError::TypeMismatch { .. }) => {}
        }
    }

    /// `bb3`
    pub(super) fn block_ref(&mut self, ctx: &mut BodyContext) -> PResult<BlockId> {
        let token = self.expect_next_to_be(TokenKind::Identifier, "a block name")?;
        Ok(ctx.blocks.reference(&mut ctx.body, self.text(token), token.span))
    }

    /// `bb3` or `bb3(%0 : $T, %1 : $U)`
    pub(super) fn destination(&mut self, ctx: &mut BodyContext) -> PResult<(BlockId, Vec<ValueId>)> {
        let block = self.block_ref(ctx)?;

        if !self.eat(TokenKind::OpenParen) {
            return Ok((block, Vec::new()));
        }

        let args = self.typed_values_until(ctx, TokenKind::CloseParen)?;
        self.expect_next_to_be(TokenKind::CloseParen, "')'")?;
        Ok((block, args))
    }

    /* Module */

    pub fn parse_module(mut self) -> ParseResult {
        while let Some(token) = self.lexer.peek() {
            let result = match token.kind {
                TokenKind::Keyword(Keyword::SilStage) => self.parse_stage(),
                TokenKind::Keyword(Keyword::Sil) => self.parse_function(),
                TokenKind::Keyword(Keyword::SilGlobal) => self.parse_global(),
                TokenKind::Keyword(Keyword::SilVtable) => self.parse_vtable(),
                TokenKind::Keyword(Keyword::SilWitnessTable) => self.parse_witness_table(),
                TokenKind::Keyword(Keyword::SilDefaultWitnessTable) => {
                    self.parse_default_witness_table()
                }
                TokenKind::Keyword(Keyword::SilCoverageMap) => self.parse_coverage_map(),
                TokenKind::Keyword(Keyword::SilScope) => self.parse_scope(),
                TokenKind::Keyword(Keyword::Import) => self.parse_import(),
                _ => self.parse_swift_decl(),
            };

            if result.is_err() {
                self.recover_to_declaration();
            }
        }

        ParseResult {
            module: self.module,
            diagnostics: self.diagnostics,
        }
    }

    /// sil_stage canonical
    fn parse_stage(&mut self) -> PResult<()> {
        let keyword = self.expect_keyword(Keyword::SilStage, "'sil_stage'")?;
        let (name, span) = self.expect_name("a stage name")?;

        let Ok(stage) = name.value().parse::<SilStage>() else {
            report!(self, span, UnknownStage, "unknown SIL stage '{name}'");
            return Err(ParseError);
        };

        if self.stage_seen {
            report!(self, keyword.span.to(span), MultipleStageDeclarations, "multiple sil_stage declarations");
            return Ok(());
        }

        self.stage_seen = true;
        self.module.stage = stage;
        Ok(())
    }

    /// import Swift
    fn parse_import(&mut self) -> PResult<()> {
        self.expect_keyword(Keyword::Import, "'import'")?;
        let (name, _) = self.expect_name("a module name")?;
        self.module.imports.push(name);

        let Some(loader) = self.loader.as_deref_mut() else {
            return Ok(());
        };

        let Some(imported) = loader.load_module(name.value()) else {
            parse_log!("module {name} not found, import ignored");
            return Ok(());
        };

        let declared = imported
            .live_functions()
            .map(|(_, function)| (function.name, function.ty.clone(), function.linkage))
            .collect::<Vec<_>>();
        let extended = imported
            .witness_tables
            .iter()
            .filter_map(|table| table.conformance.conforming_type()?.nominal_name())
            .collect::<Vec<_>>();

        for nominal in extended {
            if self.decls.contains(nominal) {
                loader.load_extensions(self.decls, nominal, 0);
            }
        }

        for (function_name, ty, linkage) in declared {
            if self.module.lookup_function(function_name).is_some() {
                continue;
            }

            parse_log!("declaring @{function_name} from {name}");
            self.module
                .add_function(Function::new(function_name, ty, linkage.as_external()));
        }

        Ok(())
    }

    /* Functions */

    pub(super) fn parse_linkage(&mut self) -> PResult<Option<Linkage>> {
        let Some(token) = self.lexer.peek() else {
            return Ok(None);
        };

        if token.kind != TokenKind::Identifier {
            return Ok(None);
        }

        match self.text(token).parse::<Linkage>() {
            Ok(linkage) => {
                self.lexer.next();
                Ok(Some(linkage))
            }
            Err(_) => {
                report!(self, token.span, UnknownLinkage, "unknown linkage '{}'", self.text(token));
                Err(ParseError)
            }
        }
    }

    // [transparent] [serialized] [_semantics "x"] ...
    fn parse_function_attributes(&mut self) -> PResult<(FunctionAttributes, Vec<SpecializeDraft>)> {
        let mut attributes = FunctionAttributes::default();
        let mut specializations = Vec::new();

        while self.eat(TokenKind::OpenBracket) {
            let (name, span) = self.expect_name("a function attribute")?;

            match name.value() {
                "transparent" => attributes.transparent = true,
                "serialized" => attributes.serialized = SerializedKind::Serialized,
                "serializable" => attributes.serialized = SerializedKind::Serializable,
                "thunk" => attributes.thunk = ThunkKind::Thunk,
                "reabstraction_thunk" => attributes.thunk = ThunkKind::ReabstractionThunk,
                "global_init" => attributes.global_init = true,
                "noinline" => attributes.inline = InlineStrategy::NoInline,
                "always_inline" => attributes.inline = InlineStrategy::AlwaysInline,
                "Onone" => attributes.optimization_mode = Some(OptimizationMode::None),
                "Ospeed" => attributes.optimization_mode = Some(OptimizationMode::Speed),
                "Osize" => attributes.optimization_mode = Some(OptimizationMode::Size),
                "_semantics" => attributes.semantics.push(self.expect_string()?),
                "_specialize" => specializations.push(self.parse_specialize_draft()?),
                "clang" => attributes.clang_node = Some(self.parse_decl_ref(true)?),
                other => match other.parse::<EffectsKind>() {
                    Ok(effects) => attributes.effects = Some(effects),
                    Err(_) => {
                        report!(self, span, UnknownAttribute, "unknown function attribute '{other}'");
                        return Err(ParseError);
                    }
                },
            }

            self.expect_next_to_be(TokenKind::CloseBracket, "']'")?;
        }

        Ok((attributes, specializations))
    }

    // _specialize exported: true, kind: full, where T == Int
    fn parse_specialize_draft(&mut self) -> PResult<SpecializeDraft> {
        let mut draft = SpecializeDraft {
            exported: false,
            kind: SpecializationKind::Full,
            requirements: None,
        };

        loop {
            if self.eat_word("where") {
                let start = self.peek_span().start;
                let mut end = start;
                let mut depth = 0usize;

                while let Some(token) = self.lexer.peek() {
                    match token.kind {
                        TokenKind::CloseBracket if depth == 0 => break,
                        TokenKind::OpenBracket => depth += 1,
                        TokenKind::CloseBracket => depth -= 1,
                        _ => {}
                    }

                    end = token.span.end;
                    self.lexer.next();
                }

                draft.requirements = Some(Span::new(start, end));
                return Ok(draft);
            }

            if self.peek_is(TokenKind::CloseBracket) {
                return Ok(draft);
            }

            let (name, span) = self.expect_name("'exported', 'kind' or 'where'")?;
            self.expect_next_to_be(TokenKind::Colon, "':'")?;
            let (value, value_span) = self.expect_name("an attribute value")?;

            match (name.value(), value.value()) {
                ("exported", "true") => draft.exported = true,
                ("exported", "false") => draft.exported = false,
                ("kind", kind) => match kind.parse() {
                    Ok(kind) => draft.kind = kind,
                    Err(_) => {
                        report!(self, value_span, UnknownAttribute, "unknown specialization kind '{kind}'");
                        return Err(ParseError);
                    }
                },
                _ => {
                    report!(self, span.to(value_span), UnknownAttribute, "unknown _specialize argument '{name}: {value}'");
                    return Err(ParseError);
                }
            }

            if !self.eat(TokenKind::Comma) {
                return Ok(draft);
            }
        }
    }

    /// Parses a `_specialize` requirement list now that the generic
    /// parameters it mentions are known
    fn parse_specialize_requirements(
        &mut self,
        range: Span,
        generics: Option<&Rc<GenericSignature>>,
    ) -> PResult<Vec<Requirement>> {
        let source = self.lexer.source();
        let outer = std::mem::replace(&mut self.lexer, Lexer::with_range(source, range));
        let params = generics.map(|g| g.params.clone()).unwrap_or_default();

        let result = self.with_generic_scope(params, |parser| {
            let mut requirements = vec![parser.parse_requirement()?];
            while parser.eat(TokenKind::Comma) {
                requirements.push(parser.parse_requirement()?);
            }

            if !parser.lexer.is_eof() {
                return Err(parser.expected("',' or ']'"));
            }

            Ok(requirements)
        });

        self.lexer = outer;
        result
    }

    /// sil [linkage] [attributes] @name : $type { blocks }
    fn parse_function(&mut self) -> PResult<()> {
        self.expect_keyword(Keyword::Sil, "'sil'")?;
        let linkage = self.parse_linkage()?;
        let (mut attributes, drafts) = self.parse_function_attributes()?;
        let (name, name_span) = self.expect_global_name("a function name")?;
        self.expect_next_to_be(TokenKind::Colon, "':'")?;

        let type_span = self.peek_span();
        let ty = self.parse_sil_type()?;
        let Some(function_type) = ty.ty.function_type().cloned() else {
            report!(self, type_span, NotAFunction, "{ty} is not a function type");
            return Err(ParseError);
        };

        for draft in drafts {
            let requirements = match draft.requirements {
                Some(range) => {
                    self.parse_specialize_requirements(range, function_type.generics.as_ref())?
                }
                None => Vec::new(),
            };

            attributes.specializations.push(SpecializeAttr {
                exported: draft.exported,
                kind: draft.kind,
                requirements,
            });
        }

        let has_body = self.peek_is(TokenKind::OpenBrace);
        let linkage = linkage.unwrap_or(Linkage::default_for(has_body));

        let id = match self.module.lookup_function(name) {
            Some(existing) if has_body && self.module.function(existing).is_definition() => {
                report!(self, name_span, RedefinedFunction, "redefinition of function @{name}");

                // The duplicate is still parsed into a zombie so later
                // references resolve to the original
                let mut zombie = Function::new(name, function_type, Linkage::Private);
                zombie.is_zombie = true;
                self.module.add_function(zombie)
            }
            Some(existing) => {
                let previous = self.module.function(existing).ty.clone();
                if previous != function_type {
                    report!(
                        self,
                        type_span,
                        DefinitionTypeMismatch,
                        "function @{name} defined with type {} but previously declared with type {}",
                        Type::function((*function_type).clone()),
                        Type::function((*previous).clone())
                    );
                }

                let function = self.module.function_mut(existing);
                if !function.is_definition() {
                    function.ty = function_type;
                    function.linkage = linkage;
                    function.attributes = attributes;
                }

                existing
            }
            None => {
                let mut function = Function::new(name, function_type, linkage);
                function.attributes = attributes;
                self.module.add_function(function)
            }
        };

        parse_log!("function @{name}");

        if has_body {
            self.parse_function_body(id)?;
        }

        Ok(())
    }

    fn parse_function_body(&mut self, id: FunctionId) -> PResult<()> {
        let open = self.expect_next_to_be(TokenKind::OpenBrace, "'{'")?;
        let params = self
            .module
            .function(id)
            .ty
            .generics
            .as_ref()
            .map(|generics| generics.params.clone())
            .unwrap_or_default();

        let mut ctx = BodyContext::new(std::mem::take(&mut self.module.function_mut(id).body));
        let result = self.with_generic_scope(params, |parser| {
            if parser.peek_is(TokenKind::CloseBrace) {
                report!(parser, open.span, ExpectedToken, "function body needs at least one basic block");
                return Err(ParseError);
            }

            while !parser.peek_is(TokenKind::CloseBrace) && !parser.lexer.is_eof() {
                parser.parse_block(&mut ctx)?;
            }

            Ok(())
        });

        self.finish_body(&mut ctx);
        let function = self.module.function_mut(id);
        function.body = ctx.body;
        function.has_qualified_ownership = self.options.parses_ownership();

        result?;
        self.expect_next_to_be(TokenKind::CloseBrace, "'}'")?;
        Ok(())
    }

    /// Reports names that were used but never defined
    pub(super) fn finish_body(&mut self, ctx: &mut BodyContext) {
        for (name, span) in ctx.values.unresolved() {
            report!(self, span, UndefinedValue, "use of undefined value {name}");
        }
        ctx.values.drop_unresolved(&mut ctx.body);

        for (name, span) in ctx.blocks.finish() {
            report!(self, span, UndefinedBlock, "use of undefined basic block {name}");
        }
    }

    /// Whether the next tokens are `bbN:` or `bbN(`
    fn at_block_label(&mut self) -> bool {
        let Some(token) = self.lexer.peek() else {
            return false;
        };

        if token.kind != TokenKind::Identifier {
            return false;
        }

        // `tuple (` starts an instruction, not a block
        self.peek_nth_is(1, TokenKind::Colon)
            || (self.peek_nth_is(1, TokenKind::OpenParen) && self.text(token).parse::<Opcode>().is_err())
    }

    // bb1(%0 : $Int, %1 : @owned $C):
    fn parse_block(&mut self, ctx: &mut BodyContext) -> PResult<()> {
        let label = self.expect_next_to_be(TokenKind::Identifier, "a basic block label")?;
        let name = self.text(label);

        let block = match ctx.blocks.define(&mut ctx.body, name) {
            Some(block) => block,
            None => {
                report!(self, label.span, RedefinedBlock, "redefinition of basic block {name}");
                ctx.body.new_block()
            }
        };
        ctx.current = Some(block);

        if self.eat(TokenKind::OpenParen) {
            loop {
                let value = self.value_name()?;
                let Some(arg_name) = value.name else {
                    report!(self, value.span, ExpectedToken, "block arguments need a name");
                    return Err(ParseError);
                };

                self.expect_next_to_be(TokenKind::Colon, "':'")?;
                let ownership = self.parse_argument_ownership()?;
                let ty = self.parse_sil_type()?;
                let arg = ctx.body.add_block_argument(block, ty, ownership);
                self.define_value(ctx, arg_name, value.span, arg);

                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }

            self.expect_next_to_be(TokenKind::CloseParen, "')'")?;
        }

        self.expect_next_to_be(TokenKind::Colon, "':'")?;
        self.parse_instructions(ctx, label)
    }

    /// Instructions up to the next block label or closing brace. `owner` is
    /// the token diagnostics about the block as a whole point at.
    pub(super) fn parse_instructions(&mut self, ctx: &mut BodyContext, owner: Token) -> PResult<()> {
        let Some(block) = ctx.current else {
            return Err(self.expected("a basic block"));
        };

        let mut had_error = false;
        let mut reported_after_terminator = false;

        while !self.peek_is(TokenKind::CloseBrace) && !self.lexer.is_eof() && !self.at_block_label() {
            let ends_block = ctx
                .body
                .last_inst(block)
                .is_some_and(|inst| ctx.body.inst(inst).kind.is_terminator());

            if ends_block && !reported_after_terminator {
                let span = self.peek_span();
                report!(self, span, ExpectedToken, "instruction follows the block's terminator");
                reported_after_terminator = true;
            }

            let line = self.expect_peek("an instruction")?.line;
            if self.parse_instruction(ctx, block).is_err() {
                had_error = true;
                self.skip_line(line);
            }
        }

        let terminated = ctx
            .body
            .last_inst(block)
            .is_some_and(|inst| ctx.body.inst(inst).kind.is_terminator());

        if !terminated && !had_error && owner.kind == TokenKind::Identifier {
            report!(
                self,
                owner.span,
                ExpectedToken,
                "block {} does not end with a terminator",
                self.text(owner)
            );
        }

        Ok(())
    }

    /// `@owned` in front of a block argument type
    fn parse_argument_ownership(&mut self) -> PResult<OwnershipKind> {
        let Some(attribute) = self.peek_attribute() else {
            return Ok(OwnershipKind::Any);
        };

        let Ok(ownership) = attribute.parse::<OwnershipKind>() else {
            return Ok(OwnershipKind::Any);
        };

        let span = self.peek_span();
        self.lexer.next();

        if !self.options.parses_ownership() {
            report!(
                self,
                span,
                UnsupportedOwnershipKind,
                "ownership annotation @{ownership} requires ownership SSA"
            );
            return Err(ParseError);
        }

        Ok(ownership)
    }

    /* Instructions */

    /// `%0 = ` or `(%0, %1) = `
    fn parse_result_names(&mut self) -> PResult<Vec<(&'source str, Span)>> {
        if self.peek_is(TokenKind::LocalName) && self.peek_nth_is(1, TokenKind::Equals) {
            let value = self.value_name()?;
            self.lexer.next();
            return Ok(value.name.map(|name| (name, value.span)).into_iter().collect());
        }

        if !(self.peek_is(TokenKind::OpenParen) && self.peek_nth_is(1, TokenKind::LocalName)) {
            return Ok(Vec::new());
        }

        self.lexer.next();
        let mut names = Vec::new();
        loop {
            let token = self.expect_next_to_be(TokenKind::LocalName, "a value name")?;
            names.push((self.text(token), token.span));

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen, "')'")?;
        self.expect_next_to_be(TokenKind::Equals, "'='")?;
        Ok(names)
    }

    /// `, loc "file":1:2` and `, scope 3`
    fn parse_debug_info(&mut self) -> PResult<(Option<SourceLoc>, Option<ScopeId>)> {
        let mut location = None;
        let mut scope = None;

        while self.at_trailing_debug_info() {
            self.lexer.next();

            if self.eat_word("loc") {
                location = Some(self.parse_source_loc()?);
            } else {
                self.expect_word("scope")?;
                let span = self.peek_span();
                let slot = self.expect_u32()?;

                match self.module.scope_by_slot(slot) {
                    Some(id) => scope = Some(id),
                    None => {
                        report!(self, span, UndeclaredScope, "scope {slot} is not declared");
                        return Err(ParseError);
                    }
                }
            }
        }

        Ok((location, scope))
    }

    /// `"file.swift":12:3`
    pub(super) fn parse_source_loc(&mut self) -> PResult<SourceLoc> {
        let file = self.expect_string()?;
        self.expect_next_to_be(TokenKind::Colon, "':'")?;
        let line = self.expect_u32()?;
        self.expect_next_to_be(TokenKind::Colon, "':'")?;
        let column = self.expect_u32()?;

        Ok(SourceLoc {
            file: file.as_str().into(),
            line,
            column,
        })
    }

    // %2 = struct_extract %1 : $S, #S.x, loc "a.swift":3:7, scope 2
    fn parse_instruction(&mut self, ctx: &mut BodyContext, block: BlockId) -> PResult<()> {
        let names = self.parse_result_names()?;
        let built = self.build_instruction(ctx, block, &names);

        if built.is_err() {
            for (name, _) in &names {
                ctx.values.poison(&mut ctx.body, name);
            }
        }

        built
    }

    fn build_instruction(
        &mut self,
        ctx: &mut BodyContext,
        block: BlockId,
        names: &[(&'source str, Span)],
    ) -> PResult<()> {
        let token = self.expect_peek("an instruction")?;
        if !is_word(token.kind) {
            return Err(self.expected("an instruction"));
        }
        self.lexer.next();

        let Ok(opcode) = self.text(token).parse::<Opcode>() else {
            report!(self, token.span, UnknownOpcode, "unknown instruction '{}'", self.text(token));
            return Err(ParseError);
        };

        let parsed = parse_operands(self, ctx, opcode)?;
        let (location, scope) = self.parse_debug_info()?;

        let mut builder = Builder::at_end(&mut ctx.body, block);
        builder.set_debug_location(location, scope);
        let inst = builder.create(parsed.kind, &parsed.operands, parsed.results);

        if opcode == Opcode::BeginApply && self.options.verbose {
            eprintln!("{}", print_instruction(&self.module, &ctx.body, inst));
        }

        let results = ctx.body.results(inst).to_vec();
        if names.len() != results.len() {
            report!(
                self,
                token.span,
                WrongResultCount,
                "{opcode} produces {} results but {} names were given",
                results.len(),
                names.len()
            );
        }

        for (&(name, span), value) in names.iter().zip(results) {
            self.define_value(ctx, name, span, value);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::{
        config::ParserOptions,
        diagnostics::DiagnosticKind,
        oracle::DeclTable,
        parse::{parse_source, ParseResult},
        sil::{
            function::{EffectsKind, InlineStrategy, SpecializationKind},
            instruction::Opcode,
            module::{Linkage, SilStage},
            value::{OwnershipKind, ValueKind},
        },
        source::SourceFile,
    };

    fn parse_with(text: &str, options: ParserOptions) -> ParseResult {
        let source = SourceFile::from_memory(text);
        let mut decls = DeclTable::with_standard_library();
        parse_source(&source, &mut decls, options, None)
    }

    fn parse(text: &str) -> ParseResult {
        parse_with(text, ParserOptions::default())
    }

    #[test]
    fn function_with_forward_references() {
        let parsed = parse(indoc! {"
            sil_stage canonical

            sil @f : $@convention(thin) (Builtin.Int1, Builtin.Int32) -> Builtin.Int32 {
            bb0(%0 : $Builtin.Int1, %1 : $Builtin.Int32):
              cond_br %0, bb2, bb1(%1 : $Builtin.Int32)
            bb1(%3 : $Builtin.Int32):
              return %3 : $Builtin.Int32
            bb2:
              br bb1(%5 : $Builtin.Int32)
            bb3:
              %5 = integer_literal $Builtin.Int32, 7
              unreachable
            }
        "});

        assert_eq!(parsed.diagnostics.error_count(), 0, "{:?}", parsed.diagnostics.kinds());
        assert_eq!(parsed.module.stage, SilStage::Canonical);

        let function = parsed.module.function_named("f").unwrap();
        assert_eq!(function.linkage, Linkage::Public);
        assert_eq!(function.body.block_order.len(), 4);

        let entry = function.body.block_order[0];
        let terminator = function.body.terminator(entry).unwrap();
        assert_eq!(function.body.opcode(terminator), Opcode::CondBr);
        assert_eq!(function.body.successors(entry).len(), 2);
    }

    #[test]
    fn undefined_names_are_reported() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) () -> () {
            bb0:
              br bb9(%4 : $Builtin.Int32)
            }
        "});

        assert_eq!(
            parsed.diagnostics.kinds(),
            vec![DiagnosticKind::UndefinedValue, DiagnosticKind::UndefinedBlock]
        );
    }

    #[test]
    fn redefined_value_points_at_previous_definition() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) () -> () {
            bb0:
              %0 = integer_literal $Builtin.Int32, 1
              %0 = integer_literal $Builtin.Int32, 2
              %2 = tuple ()
              return %2 : $()
            }
        "});

        assert_eq!(
            parsed.diagnostics.kinds(),
            vec![DiagnosticKind::RedefinedValue, DiagnosticKind::PriorReference]
        );
        assert_eq!(parsed.diagnostics.error_count(), 1);
    }

    #[test]
    fn forward_use_with_wrong_type() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) () -> () {
            bb0:
              br bb1
            bb1:
              cond_fail %1 : $Builtin.Int1
              %1 = integer_literal $Builtin.Int32, 1
              %2 = tuple ()
              return %2 : $()
            }
        "});

        assert_eq!(parsed.diagnostics.count_of(DiagnosticKind::ValueTypeMismatch), 1);
        assert_eq!(parsed.diagnostics.count_of(DiagnosticKind::PriorReference), 1);
    }

    #[test]
    fn errors_recover_at_the_next_line() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) () -> () {
            bb0:
              %0 = frobnicate %x
              %1 = integer_literal $Builtin.Int32, 1
              %2 = integer_literal $Bogus, 1
              %3 = tuple ()
              return %3 : $()
            }

            sil @g : $@convention(thin) () -> ()
        "});

        assert_eq!(
            parsed.diagnostics.kinds(),
            vec![DiagnosticKind::UnknownOpcode, DiagnosticKind::UnknownType]
        );
        assert!(parsed.module.function_named("g").is_some());

        let f = parsed.module.function_named("f").unwrap();
        assert_eq!(f.body.all_insts().len(), 3);
    }

    #[test]
    fn operand_type_errors_keep_the_instruction() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) (Builtin.Int64) -> () {
            bb0(%0 : $Builtin.Int64):
              %1 = load %0 : $Builtin.Int64
              %2 = tuple (%1 : $Builtin.Int64)
              %3 = tuple ()
              return %3 : $()
            }
        "});

        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::NotAnAddress]);

        let f = parsed.module.function_named("f").unwrap();
        let insts = f.body.all_insts();
        assert_eq!(insts.len(), 4);
        assert_eq!(f.body.opcode(insts[0]), Opcode::Load);
        assert_eq!(f.body.operand_value(insts[1], 0), f.body.single_result(insts[0]));
    }

    #[test]
    fn names_of_rejected_lines_are_not_reported_again() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) () -> () {
            bb0:
              cond_fail %1 : $Builtin.Int1
              %1 = integer_literal $Bogus, 1
              %2 = tuple (%1 : $Builtin.Int32)
              %3 = tuple ()
              return %3 : $()
            }
        "});

        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::UnknownType]);

        let f = parsed.module.function_named("f").unwrap();
        let insts = f.body.all_insts();
        assert_eq!(insts.len(), 4);
        for user in &insts[..2] {
            let operand = f.body.operand_value(*user, 0).unwrap();
            assert_eq!(f.body.value(operand).kind, ValueKind::Undef);
        }
    }

    #[test]
    fn missing_terminator_is_reported() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) () -> () {
            bb0:
              %0 = tuple ()
            }
        "});

        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::ExpectedToken]);
    }

    #[test]
    fn redefined_function_becomes_a_zombie() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) () -> () {
            bb0:
              %0 = tuple ()
              return %0 : $()
            }

            sil @f : $@convention(thin) () -> () {
            bb0:
              unreachable
            }
        "});

        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::RedefinedFunction]);
        assert_eq!(parsed.module.functions.len(), 2);
        assert_eq!(parsed.module.live_functions().count(), 1);

        let original = parsed.module.function_named("f").unwrap();
        assert_eq!(original.body.all_insts().len(), 2);
    }

    #[test]
    fn forward_declared_function_is_completed_in_place() {
        let parsed = parse(indoc! {"
            sil @caller : $@convention(thin) () -> () {
            bb0:
              %0 = function_ref @callee : $@convention(thin) () -> ()
              %1 = apply %0() : $@convention(thin) () -> ()
              return %1 : $()
            }

            sil hidden [noinline] @callee : $@convention(thin) () -> () {
            bb0:
              %0 = tuple ()
              return %0 : $()
            }
        "});

        assert_eq!(parsed.diagnostics.error_count(), 0, "{:?}", parsed.diagnostics.kinds());
        assert_eq!(parsed.module.functions.len(), 2);

        let callee = parsed.module.function_named("callee").unwrap();
        assert_eq!(callee.linkage, Linkage::Hidden);
        assert_eq!(callee.attributes.inline, InlineStrategy::NoInline);
        assert!(callee.is_definition());
    }

    #[test]
    fn definition_type_must_match_forward_reference() {
        let parsed = parse(indoc! {"
            sil @caller : $@convention(thin) () -> () {
            bb0:
              %0 = function_ref @callee : $@convention(thin) () -> ()
              %1 = tuple ()
              return %1 : $()
            }

            sil @callee : $@convention(thin) (Builtin.Int32) -> () {
            bb0(%0 : $Builtin.Int32):
              %1 = tuple ()
              return %1 : $()
            }
        "});

        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::DefinitionTypeMismatch]);
    }

    #[test]
    fn function_attributes() {
        let parsed = parse(indoc! {r#"
            sil [transparent] [readonly] [_semantics "array.count"] [_specialize exported: true, kind: partial, where T == Builtin.Int64] @f : $@convention(thin) <T> (@in T) -> () {
            bb0(%0 : $*T):
              destroy_addr %0 : $*T
              %2 = tuple ()
              return %2 : $()
            }
        "#});

        assert_eq!(parsed.diagnostics.error_count(), 0, "{:?}", parsed.diagnostics.kinds());

        let attributes = &parsed.module.function_named("f").unwrap().attributes;
        assert!(attributes.transparent);
        assert_eq!(attributes.effects, Some(EffectsKind::ReadOnly));
        assert_eq!(attributes.semantics, vec!["array.count".to_string()]);
        assert_eq!(attributes.specializations.len(), 1);
        assert!(attributes.specializations[0].exported);
        assert_eq!(attributes.specializations[0].kind, SpecializationKind::Partial);
        assert_eq!(attributes.specializations[0].requirements[0].to_string(), "T == Builtin.Int64");
    }

    #[test]
    fn stage_declarations() {
        let parsed = parse("sil_stage raw\nsil_stage lowered\n");
        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::MultipleStageDeclarations]);
        assert_eq!(parsed.module.stage, SilStage::Raw);

        let parsed = parse("sil_stage baked\n");
        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::UnknownStage]);
    }

    #[test]
    fn ownership_annotations_need_ownership_ssa() {
        let text = indoc! {"
            sil @f : $@convention(thin) (@owned Builtin.NativeObject) -> () {
            bb0(%0 : @owned $Builtin.NativeObject):
              destroy_value %0 : $Builtin.NativeObject
              %2 = tuple ()
              return %2 : $()
            }
        "};

        let parsed = parse(text);
        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::UnsupportedOwnershipKind]);

        let parsed = parse_with(
            text,
            ParserOptions {
                enable_ownership_ssa: true,
                assume_unqualified_ownership: false,
                verbose: false,
            },
        );
        assert_eq!(parsed.diagnostics.error_count(), 0, "{:?}", parsed.diagnostics.kinds());

        let function = parsed.module.function_named("f").unwrap();
        let arg = function.body.function_arguments()[0];
        assert_eq!(function.body.value(arg).ownership, OwnershipKind::Owned);
    }

    #[test]
    fn debug_locations_and_scopes() {
        let parsed = parse(indoc! {r#"
            sil_scope 1 { loc "a.swift":1:1 parent @f : $@convention(thin) () -> () }

            sil @f : $@convention(thin) () -> () {
            bb0:
              %0 = tuple (), loc "a.swift":2:3, scope 1
              return %0 : $(), scope 4
            }
        "#});

        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::UndeclaredScope]);

        let function = parsed.module.function_named("f").unwrap();
        let first = function.body.first_inst(function.body.block_order[0]).unwrap();
        let location = function.body.inst(first).location.clone().unwrap();
        assert_eq!((location.file.value(), location.line, location.column), ("a.swift", 2, 3));
        assert!(function.body.inst(first).scope.is_some());
    }
}
