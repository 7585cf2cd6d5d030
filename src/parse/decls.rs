//! Top level declarations other than functions. Tables that name functions
//! (vtables, witness tables, coverage maps) need those functions to be
//! declared first.

use crate::{
    diagnostics::{report, DiagnosticSink},
    intern::InternedSymbol,
    logging::parse_log,
    oracle::{NominalDecl, NominalKind, TypeOracle},
    parse::{
        lexer::{Keyword, Token, TokenKind},
        parser::{BodyContext, PResult, ParseError, Parser},
    },
    sil::{
        function::{Body, SerializedKind},
        module::{
            ConditionalConformance, CounterExpr, CounterId, CoverageMap, CoverageRegion,
            DebugScope, DefaultWitnessTable, Global, Linkage, ScopeId, ScopeParent, VTable,
            VTableEntry, VTableEntryKind, WitnessEntry, WitnessTable,
        },
        types::{Type, TypeKind},
    },
};

impl Parser<'_, '_> {
    /// A linkage, consumed only when the next word spells one. Used where a
    /// type or protocol name may follow instead.
    fn optional_linkage(&mut self) -> Option<Linkage> {
        let linkage = self.peek_word()?.parse::<Linkage>().ok()?;
        self.lexer.next();
        Some(linkage)
    }

    /// `@name` of a function which must already be declared
    fn declared_function(&mut self) -> PResult<(InternedSymbol, Linkage)> {
        let (name, span) = self.expect_global_name("a function name")?;

        match self.module.lookup_function(name) {
            Some(id) => Ok((name, self.module.function(id).linkage)),
            None => {
                report!(self, span, UndefinedFunction, "use of undefined function @{name}");
                Err(ParseError)
            }
        }
    }

    /// `@witness` or `nil`
    fn witness_or_nil(&mut self) -> PResult<Option<InternedSymbol>> {
        if self.eat_word("nil") {
            return Ok(None);
        }

        Ok(Some(self.declared_function()?.0))
    }

    /// A name which must be a declared protocol
    fn protocol_name(&mut self) -> PResult<InternedSymbol> {
        let (protocol, span) = self.expect_name("a protocol name")?;

        if !self.decls.is_protocol(protocol) {
            report!(self, span, UnknownProtocol, "{protocol} is not a protocol");
            return Err(ParseError);
        }

        Ok(protocol)
    }

    fn open_table(&mut self) -> PResult<()> {
        self.expect_next_to_be(TokenKind::OpenBrace, "'{'")?;
        Ok(())
    }

    fn at_table_end(&mut self) -> bool {
        self.peek_is(TokenKind::CloseBrace) || self.lexer.is_eof()
    }

    fn close_table(&mut self) -> PResult<()> {
        self.expect_next_to_be(TokenKind::CloseBrace, "'}'")?;
        Ok(())
    }

    /* Globals */

    // sil_global private [let] @g : $Int32 = { ... }
    pub(super) fn parse_global(&mut self) -> PResult<()> {
        let keyword = self.expect_keyword(Keyword::SilGlobal, "'sil_global'")?;
        let linkage = self.parse_linkage()?.unwrap_or(Linkage::Public);

        let mut serialized = SerializedKind::NotSerialized;
        let mut is_let = false;
        loop {
            if self.bracket_flag("serialized") {
                serialized = SerializedKind::Serialized;
            } else if self.bracket_flag("let") {
                is_let = true;
            } else {
                break;
            }
        }

        let (name, span) = self.expect_global_name("a global name")?;
        self.expect_next_to_be(TokenKind::Colon, "':'")?;
        let ty = self.parse_sil_type()?.ty;

        if self.module.lookup_global(name).is_some() {
            report!(self, span, RedefinedGlobal, "redefinition of global @{name}");
            return Err(ParseError);
        }

        let initializer = if self.eat(TokenKind::Equals) {
            Some(self.parse_global_initializer(keyword)?)
        } else {
            None
        };

        parse_log!("global @{name}");
        self.module.globals.push(Global {
            name,
            ty,
            linkage,
            serialized,
            is_let,
            initializer,
        });

        Ok(())
    }

    /// `{ instructions }` of a static initializer, a single unlabeled block
    fn parse_global_initializer(&mut self, keyword: Token) -> PResult<Body> {
        self.open_table()?;

        let mut ctx = BodyContext::new(Body::default());
        let block = ctx.body.new_block();
        ctx.current = Some(block);

        let result = self.parse_instructions(&mut ctx, keyword);
        self.finish_body(&mut ctx);
        result?;

        self.close_table()?;
        Ok(ctx.body)
    }

    /* VTables */

    // sil_vtable [serialized] C { #C.m!1: @C_m [override] }
    pub(super) fn parse_vtable(&mut self) -> PResult<()> {
        self.expect_keyword(Keyword::SilVtable, "'sil_vtable'")?;
        let serialized = if self.bracket_flag("serialized") {
            SerializedKind::Serialized
        } else {
            SerializedKind::NotSerialized
        };

        let (class, span) = self.expect_name("a class name")?;
        if self.decls.nominal(class).map(|decl| decl.kind) != Some(NominalKind::Class) {
            report!(self, span, UnknownVtableClass, "sil_vtable for {class}, which is not a class");
            return Err(ParseError);
        }

        self.open_table()?;

        let mut entries = Vec::new();
        while !self.at_table_end() {
            entries.push(self.parse_vtable_entry()?);
        }

        self.close_table()?;
        self.module.vtables.push(VTable {
            class,
            serialized,
            entries,
        });

        Ok(())
    }

    fn parse_vtable_entry(&mut self) -> PResult<VTableEntry> {
        let method = self.parse_decl_ref(false)?;

        let mut entry = VTableEntry {
            method,
            implementation: None,
            kind: VTableEntryKind::Normal,
            linkage: Linkage::Public,
        };

        // `#C.m!1 nil` or `#C.m!1: [linkage] @impl`
        if !self.eat_word("nil") {
            self.expect_next_to_be(TokenKind::Colon, "':'")?;

            if !self.eat_word("nil") {
                let explicit = self.optional_linkage();
                let (implementation, implied) = self.declared_function()?;
                entry.implementation = Some(implementation);
                entry.linkage = explicit.unwrap_or(implied.strip_external());
            }
        }

        if let Some((word, span)) = self.bracket_word()? {
            match word.parse::<VTableEntryKind>() {
                Ok(kind) => entry.kind = kind,
                Err(_) => {
                    report!(self, span, UnknownAttribute, "unknown vtable entry kind '{word}'");
                    return Err(ParseError);
                }
            }
        }

        Ok(entry)
    }

    /* Witness tables */

    // sil_witness_table [serialized] <T> Box<T>: P module main { ... }
    pub(super) fn parse_witness_table(&mut self) -> PResult<()> {
        self.expect_keyword(Keyword::SilWitnessTable, "'sil_witness_table'")?;
        let linkage = self.optional_linkage();
        let serialized = if self.bracket_flag("serialized") {
            SerializedKind::Serialized
        } else {
            SerializedKind::NotSerialized
        };

        let generics = if self.peek_is(TokenKind::LessThan) {
            Some(self.parse_generic_signature()?)
        } else {
            None
        };
        let params = generics.as_ref().map(|g| g.params.clone()).unwrap_or_default();

        self.with_generic_scope(params, |parser| {
            let conformance = parser.parse_conformance(None)?;
            let protocol = conformance.protocol();

            if let Some(nominal) = conformance.conforming_type().and_then(Type::nominal_name) {
                parser.decls.add_conformance(nominal, protocol);
            }

            let is_declaration = !parser.peek_is(TokenKind::OpenBrace);
            let mut table = WitnessTable {
                linkage: linkage.unwrap_or(Linkage::default_for(!is_declaration)),
                serialized,
                generics,
                conformance,
                entries: Vec::new(),
                conditional_conformances: Vec::new(),
                is_declaration,
            };

            if !is_declaration {
                parser.open_table()?;
                while !parser.at_table_end() {
                    parser.parse_witness_entry(&mut table)?;
                }
                parser.close_table()?;
            }

            parse_log!("witness table for {}", table.conformance);
            parser.module.witness_tables.push(table);
            Ok(())
        })
    }

    fn parse_witness_entry(&mut self, table: &mut WitnessTable) -> PResult<()> {
        let (kind, span) = self.expect_name("a witness table entry")?;

        match kind.value() {
            "method" => {
                let requirement = self.parse_decl_ref(false)?;
                self.expect_next_to_be(TokenKind::Colon, "':'")?;
                let witness = self.witness_or_nil()?;
                table.entries.push(WitnessEntry::Method {
                    requirement,
                    witness,
                });
            }
            "associated_type" => {
                let (name, _) = self.expect_name("an associated type name")?;
                self.expect_next_to_be(TokenKind::Colon, "':'")?;
                let ty = self.parse_type()?;
                table.entries.push(WitnessEntry::AssociatedType { name, ty });
            }
            "associated_type_protocol" => {
                self.expect_next_to_be(TokenKind::OpenParen, "'('")?;
                let mut path = vec![self.expect_name("an associated type name")?.0];
                while self.eat(TokenKind::Dot) {
                    path.push(self.expect_name("an associated type name")?.0);
                }
                self.expect_next_to_be(TokenKind::Colon, "':'")?;
                let protocol = self.protocol_name()?;
                self.expect_next_to_be(TokenKind::CloseParen, "')'")?;
                self.expect_next_to_be(TokenKind::Colon, "':'")?;

                let conformance = self.parse_conformance(Some(protocol))?;
                table.entries.push(WitnessEntry::AssociatedTypeProtocol {
                    path,
                    protocol,
                    conformance,
                });
            }
            "base_protocol" => {
                let protocol = self.protocol_name()?;
                self.expect_next_to_be(TokenKind::Colon, "':'")?;

                let conformance = self.parse_conformance(Some(protocol))?;
                table.entries.push(WitnessEntry::BaseProtocol {
                    protocol,
                    conformance,
                });
            }
            "conditional_conformance" => {
                self.expect_next_to_be(TokenKind::OpenParen, "'('")?;
                let subject = self.parse_type()?;
                self.expect_next_to_be(TokenKind::Colon, "':'")?;
                let protocol = self.protocol_name()?;
                self.expect_next_to_be(TokenKind::CloseParen, "')'")?;
                self.expect_next_to_be(TokenKind::Colon, "':'")?;

                let conformance = self.parse_conformance(Some(protocol))?;
                table.conditional_conformances.push(ConditionalConformance {
                    subject,
                    protocol,
                    conformance,
                });
            }
            other => {
                report!(self, span, UnknownWitnessEntry, "unknown witness table entry '{other}'");
                return Err(ParseError);
            }
        }

        Ok(())
    }

    // sil_default_witness_table P { no_default; method #P.f!1: @f_default }
    pub(super) fn parse_default_witness_table(&mut self) -> PResult<()> {
        self.expect_keyword(Keyword::SilDefaultWitnessTable, "'sil_default_witness_table'")?;
        let linkage = self.optional_linkage().unwrap_or(Linkage::Public);
        let protocol = self.protocol_name()?;

        self.open_table()?;

        let mut entries = Vec::new();
        while !self.at_table_end() {
            if self.eat_word("no_default") {
                entries.push(None);
                continue;
            }

            self.expect_word("method")?;
            let requirement = self.parse_decl_ref(false)?;
            self.expect_next_to_be(TokenKind::Colon, "':'")?;
            let (witness, _) = self.declared_function()?;
            entries.push(Some((requirement, witness)));
        }

        self.close_table()?;
        self.module.default_witness_tables.push(DefaultWitnessTable {
            linkage,
            protocol,
            entries,
        });

        Ok(())
    }

    /* Coverage maps */

    // sil_coverage_map "a.swift" "f" "pgo" 17 { 1:1 -> 3:2 : (0 + 1) }
    pub(super) fn parse_coverage_map(&mut self) -> PResult<()> {
        self.expect_keyword(Keyword::SilCoverageMap, "'sil_coverage_map'")?;
        let filename = self.expect_string()?;
        let function_span = self.peek_span();
        let function = self.expect_string()?;
        let pgo_name = self.expect_string()?;

        let (hash, hash_span) = self.expect_integer()?;
        let Ok(hash) = u64::try_from(hash) else {
            report!(self, hash_span, InvalidLiteral, "coverage hash {hash} does not fit in 64 bits");
            return Err(ParseError);
        };

        if self.module.function_named(&function).is_none() {
            report!(
                self,
                function_span,
                CoverageMapFunctionNotFound,
                "coverage map for undefined function {function}"
            );
            return Err(ParseError);
        }

        let mut map = CoverageMap {
            filename: filename.as_str().into(),
            function: function.as_str().into(),
            pgo_name,
            hash,
            regions: Vec::new(),
            expressions: Default::default(),
        };

        self.open_table()?;

        while !self.at_table_end() {
            let start_line = self.expect_u32()?;
            self.expect_next_to_be(TokenKind::Colon, "':'")?;
            let start_column = self.expect_u32()?;
            self.expect_next_to_be(TokenKind::Arrow, "'->'")?;
            let end_line = self.expect_u32()?;
            self.expect_next_to_be(TokenKind::Colon, "':'")?;
            let end_column = self.expect_u32()?;
            self.expect_next_to_be(TokenKind::Colon, "':'")?;
            let counter = self.parse_counter_expr(&mut map)?;

            map.regions.push(CoverageRegion {
                start_line,
                start_column,
                end_line,
                end_column,
                counter,
            });
        }

        self.close_table()?;
        self.module.coverage_maps.push(map);
        Ok(())
    }

    /// `zero`, `3`, `(a + b)` or `(a - b)`
    fn parse_counter_expr(&mut self, map: &mut CoverageMap) -> PResult<CounterId> {
        if self.eat_word("zero") {
            return Ok(map.intern_expression(CounterExpr::Zero));
        }

        if self.peek_is(TokenKind::IntegerLiteral) {
            let counter = self.expect_u32()?;
            return Ok(map.intern_expression(CounterExpr::Counter(counter)));
        }

        let span = self.peek_span();
        if !self.eat(TokenKind::OpenParen) {
            report!(self, span, InvalidCounterExpression, "expected a counter expression");
            return Err(ParseError);
        }

        let lhs = self.parse_counter_expr(map)?;
        let operator = self.peek_span();
        let expression = if self.eat(TokenKind::Plus) {
            CounterExpr::Add(lhs, self.parse_counter_expr(map)?)
        } else if self.eat(TokenKind::Minus) {
            CounterExpr::Subtract(lhs, self.parse_counter_expr(map)?)
        } else {
            report!(self, operator, InvalidCounterExpression, "expected '+' or '-' in a counter expression");
            return Err(ParseError);
        };
        self.expect_next_to_be(TokenKind::CloseParen, "')'")?;

        Ok(map.intern_expression(expression))
    }

    /* Debug scopes */

    // sil_scope 2 { loc "a.swift":3:1 parent 1 inlined_at 1 }
    pub(super) fn parse_scope(&mut self) -> PResult<()> {
        self.expect_keyword(Keyword::SilScope, "'sil_scope'")?;
        let slot_span = self.peek_span();
        let slot = self.expect_u32()?;

        if self.module.scope_by_slot(slot).is_some() {
            report!(self, slot_span, RedefinedScope, "redefinition of scope {slot}");
            return Err(ParseError);
        }

        self.open_table()?;

        let loc = if self.eat_word("loc") {
            Some(self.parse_source_loc()?)
        } else {
            None
        };

        self.expect_word("parent")?;
        let parent = if self.peek_is(TokenKind::GlobalName) {
            let (name, _) = self.expect_global_name("a function name")?;
            self.expect_next_to_be(TokenKind::Colon, "':'")?;

            let type_span = self.peek_span();
            let ty = self.parse_sil_type()?;
            let Some(function_type) = ty.ty.function_type().cloned() else {
                report!(self, type_span, NotAFunction, "{ty} is not a function type");
                return Err(ParseError);
            };

            let id = self.module.get_or_declare_function(name, function_type.clone());
            if self.module.function(id).ty != function_type {
                report!(
                    self,
                    type_span,
                    FunctionTypeMismatch,
                    "scope parent @{name} has type {}",
                    self.module.function(id).lowered_type()
                );
                return Err(ParseError);
            }

            ScopeParent::Function(name)
        } else {
            ScopeParent::Scope(self.scope_reference()?)
        };

        let inlined_at = if self.eat_word("inlined_at") {
            Some(self.scope_reference()?)
        } else {
            None
        };

        self.close_table()?;
        self.module.scopes.push(DebugScope {
            slot,
            loc,
            parent,
            inlined_at,
        });

        Ok(())
    }

    fn scope_reference(&mut self) -> PResult<ScopeId> {
        let span = self.peek_span();
        let slot = self.expect_u32()?;

        match self.module.scope_by_slot(slot) {
            Some(id) => Ok(id),
            None => {
                report!(self, span, UndeclaredScope, "scope {slot} is not declared");
                Err(ParseError)
            }
        }
    }

    /* Swift declarations */

    /// The nominal types and extensions a SIL file declares for the types its
    /// functions use
    pub(super) fn parse_swift_decl(&mut self) -> PResult<()> {
        let mut is_final = false;
        let mut is_objc = false;

        loop {
            if self.eat_word("final") {
                is_final = true;
            } else if self.peek_attribute() == Some("objc") {
                self.lexer.next();
                is_objc = true;
            } else {
                break;
            }
        }

        let kind = match self.lexer.peek().map(|token| token.kind) {
            Some(TokenKind::Keyword(Keyword::Class)) => NominalKind::Class,
            Some(TokenKind::Keyword(Keyword::Struct)) => NominalKind::Struct,
            Some(TokenKind::Keyword(Keyword::Enum)) => NominalKind::Enum,
            Some(TokenKind::Keyword(Keyword::Protocol)) => NominalKind::Protocol,
            Some(TokenKind::Keyword(Keyword::Extension)) if !is_final && !is_objc => {
                return self.parse_extension();
            }
            _ => return Err(self.expected("a declaration")),
        };
        self.lexer.next();

        let (name, _) = self.expect_name("a type name")?;
        let params = if self.peek_is(TokenKind::LessThan) {
            self.parse_generic_signature()?.params.clone()
        } else {
            Vec::new()
        };

        // Registered before the members, which may mention the type itself
        self.decls.insert(NominalDecl {
            generic_params: params.iter().map(|param| param.name).collect(),
            is_final,
            is_objc,
            ..NominalDecl::new(name, kind)
        });
        parse_log!("{kind:?} {name}");

        self.with_generic_scope(params, |parser| {
            if parser.eat(TokenKind::Colon) {
                loop {
                    parser.parse_inherited(name, kind)?;
                    if !parser.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }

            parser.open_table()?;
            while !parser.at_table_end() {
                parser.parse_member(name)?;
            }
            parser.close_table()
        })
    }

    /// One entry of `: Base, P, Q`
    fn parse_inherited(&mut self, name: InternedSymbol, kind: NominalKind) -> PResult<()> {
        if kind == NominalKind::Protocol && self.eat_word("class") {
            if let Some(decl) = self.decls.get_mut(name) {
                decl.class_bound = true;
            }
            return Ok(());
        }

        let span = self.peek_span();
        let ty = self.parse_type()?;

        if let TypeKind::Existential(protocols) = ty.kind() {
            if !protocols.is_empty() {
                let protocols = protocols.to_vec();
                if let Some(decl) = self.decls.get_mut(name) {
                    decl.protocols.extend(protocols);
                }
                return Ok(());
            }
        }

        let takes_superclass = kind == NominalKind::Class
            && self.decls.is_class(&ty)
            && self.decls.nominal(name).is_some_and(|decl| decl.superclass.is_none());

        if !takes_superclass {
            report!(self, span, UnknownProtocol, "{name} cannot inherit from {ty}");
            return Err(ParseError);
        }

        if let Some(decl) = self.decls.get_mut(name) {
            decl.superclass = Some(ty);
        }

        Ok(())
    }

    // var x: Int64, let y: C, case some(T), typealias _ObjectiveCType = NSString
    fn parse_member(&mut self, name: InternedSymbol) -> PResult<()> {
        let token = self.expect_peek("a member declaration")?;

        match token.kind {
            TokenKind::Keyword(Keyword::Var | Keyword::Let) => {
                self.lexer.next();
                let (field, _) = self.expect_name("a field name")?;
                self.expect_next_to_be(TokenKind::Colon, "':'")?;
                let ty = self.parse_type()?;

                if let Some(decl) = self.decls.get_mut(name) {
                    decl.fields.push((field, ty));
                }
            }
            TokenKind::Keyword(Keyword::Case) => {
                self.lexer.next();

                loop {
                    let (case, _) = self.expect_name("a case name")?;
                    let payload = if self.eat(TokenKind::OpenParen) {
                        let mut elements = vec![self.parse_type()?];
                        while self.eat(TokenKind::Comma) {
                            elements.push(self.parse_type()?);
                        }
                        self.expect_next_to_be(TokenKind::CloseParen, "')'")?;

                        match elements.len() {
                            1 => elements.pop(),
                            _ => Some(Type::tuple(elements)),
                        }
                    } else {
                        None
                    };

                    if let Some(decl) = self.decls.get_mut(name) {
                        decl.cases.push((case, payload));
                    }

                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            TokenKind::Keyword(Keyword::Typealias) => {
                self.lexer.next();
                let (alias, _) = self.expect_name("a type alias name")?;
                self.expect_next_to_be(TokenKind::Equals, "'='")?;
                let ty = self.parse_type()?;

                if alias.value() == "_ObjectiveCType" {
                    if let Some(decl) = self.decls.get_mut(name) {
                        decl.bridged_to = Some(ty);
                    }
                }
            }
            _ => return Err(self.expected("'var', 'let', 'case' or 'typealias'")),
        }

        self.eat(TokenKind::Semicolon);
        Ok(())
    }

    // extension S : P, Q {}
    fn parse_extension(&mut self) -> PResult<()> {
        self.expect_keyword(Keyword::Extension, "'extension'")?;
        let (name, span) = self.expect_name("a type name")?;

        if !self.decls.contains(name) {
            report!(self, span, UnknownType, "unknown type {name}");
            return Err(ParseError);
        }

        if self.eat(TokenKind::Colon) {
            loop {
                let protocol = self.protocol_name()?;
                self.decls.add_conformance(name, protocol);

                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.open_table()?;
        self.close_table()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::{
        config::ParserOptions,
        diagnostics::DiagnosticKind,
        intern::InternedSymbol,
        oracle::{DeclTable, NominalKind, TypeOracle},
        parse::{parse_source, ParseResult},
        sil::{
            module::{CounterExpr, Linkage, ScopeParent, VTableEntryKind, WitnessEntry},
            printer::print_module_plain,
            types::Type,
        },
        source::SourceFile,
    };

    fn parse_into(text: &str, decls: &mut DeclTable) -> ParseResult {
        let source = SourceFile::from_memory(text);
        parse_source(&source, decls, ParserOptions::default(), None)
    }

    fn parse(text: &str) -> ParseResult {
        parse_into(text, &mut DeclTable::with_standard_library())
    }

    fn assert_clean(parsed: &ParseResult) {
        assert_eq!(parsed.diagnostics.error_count(), 0, "{:?}", parsed.diagnostics.kinds());
    }

    /// Printing, parsing the output and printing again changes nothing
    fn assert_reprints(parsed: &ParseResult, decls: &str) {
        let printed = print_module_plain(&parsed.module);
        let reparsed = parse(&format!("{decls}\n{printed}"));
        assert_clean(&reparsed);
        assert_eq!(print_module_plain(&reparsed.module), printed);
    }

    const CLASSES: &str = indoc! {"
        protocol P {}
        class C : P {
          var x: Int64
        }
        class D : C {}
    "};

    #[test]
    fn swift_declarations_populate_the_decl_table() {
        let mut decls = DeclTable::with_standard_library();
        let parsed = parse_into(
            indoc! {"
                protocol Shape : class, Equatable {}
                final class Box<T> : Shape {
                  var value: T
                  let count: Int
                }
                enum Choice {
                  case none, some(Int32)
                  case pair(Int8, Bool)
                }
                struct Name : Hashable {
                  var raw: Int64
                  typealias _ObjectiveCType = Box<Int64>
                }
                @objc class Base {}
                extension Choice : Equatable {}
            "},
            &mut decls,
        );
        assert_clean(&parsed);

        let shape: InternedSymbol = "Shape".into();
        assert!(decls.is_protocol(shape));
        assert!(decls.nominal(shape).unwrap().class_bound);

        let boxed = decls.nominal("Box".into()).unwrap();
        assert!(boxed.is_final);
        assert_eq!(boxed.generic_params, vec![InternedSymbol::from("T")]);
        assert_eq!(boxed.fields.len(), 2);
        assert_eq!(boxed.fields[0].1, Type::generic_param("T", 0, 0));
        assert_eq!(boxed.protocols, vec![shape]);

        let choice = decls.nominal("Choice".into()).unwrap();
        assert_eq!(choice.kind, NominalKind::Enum);
        assert_eq!(choice.cases.len(), 3);
        assert_eq!(choice.cases[0].1, None);
        assert_eq!(choice.cases[1].1, Some(Type::nominal("Int32", Vec::new())));
        assert!(choice.cases[2].1.as_ref().unwrap().tuple_elements().is_some());
        assert!(decls.conforms_to(&Type::nominal("Choice", Vec::new()), "Equatable".into()));

        let name = decls.nominal("Name".into()).unwrap();
        assert_eq!(name.bridged_to, Some(Type::nominal("Box", vec![Type::nominal("Int64", Vec::new())])));
        assert!(decls.nominal("Base".into()).unwrap().is_objc);
    }

    #[test]
    fn subclasses_record_their_superclass() {
        let mut decls = DeclTable::with_standard_library();
        let parsed = parse_into(CLASSES, &mut decls);
        assert_clean(&parsed);

        let sub = Type::nominal("D", Vec::new());
        let base = Type::nominal("C", Vec::new());
        assert!(decls.is_same_or_subclass(&sub, &base));
        assert!(decls.conforms_to(&sub, "P".into()));
    }

    #[test]
    fn bad_inheritance_is_reported() {
        let parsed = parse("struct S : Int64 {}\nextension Missing : Equatable {}\n");
        assert_eq!(
            parsed.diagnostics.kinds(),
            vec![DiagnosticKind::UnknownProtocol, DiagnosticKind::UnknownType]
        );
    }

    #[test]
    fn globals_with_initializers() {
        let text = indoc! {"
            sil_global private [let] @answer : $Builtin.Int64 = {
              %0 = integer_literal $Builtin.Int64, 42
            }
            sil_global [serialized] @counter : $Builtin.Int32
            sil_global @counter : $Builtin.Int32
        "};
        let parsed = parse(text);

        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::RedefinedGlobal]);
        assert_eq!(parsed.module.globals.len(), 2);

        let answer = parsed.module.lookup_global("answer".into()).unwrap();
        assert_eq!(answer.linkage, Linkage::Private);
        assert!(answer.is_let);
        assert_eq!(answer.initializer.as_ref().unwrap().all_insts().len(), 1);

        let counter = parsed.module.lookup_global("counter".into()).unwrap();
        assert_eq!(counter.linkage, Linkage::Public);
        assert!(counter.initializer.is_none());
    }

    #[test]
    fn vtables_resolve_their_implementations() {
        let text = indoc! {"
            sil private @C_x : $@convention(method) (@guaranteed C) -> Int64
            sil hidden_external @D_x : $@convention(method) (@guaranteed D) -> Int64

            sil_vtable [serialized] D {
              #C.x!getter.1: @D_x [override]
              #C.init!allocator.1: public @C_x [inherited]
              #C.deinit!deallocator nil
            }
        "};
        let parsed = parse(&format!("{CLASSES}{text}"));
        assert_clean(&parsed);

        let vtable = parsed.module.lookup_vtable("D".into()).unwrap();
        assert_eq!(vtable.entries.len(), 3);
        assert_eq!(vtable.entries[0].linkage, Linkage::Hidden);
        assert_eq!(vtable.entries[0].kind, VTableEntryKind::Override);
        assert_eq!(vtable.entries[1].linkage, Linkage::Public);
        assert_eq!(vtable.entries[1].kind, VTableEntryKind::Inherited);
        assert_eq!(vtable.entries[2].implementation, None);

        assert_reprints(&parsed, CLASSES);
    }

    #[test]
    fn vtable_errors() {
        let parsed = parse(&format!("{CLASSES}sil_vtable P {{\n}}\n"));
        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::UnknownVtableClass]);

        let parsed = parse(&format!("{CLASSES}sil_vtable C {{\n  #C.x!getter.1: @missing\n}}\n"));
        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::UndefinedFunction]);
    }

    #[test]
    fn witness_tables_and_their_entries() {
        let decls = indoc! {"
            protocol Q {}
            protocol P : Q {}
            struct S {}
            struct Box<T> {}
        "};
        let text = indoc! {"
            sil @S_f : $@convention(witness_method: P) (@in_guaranteed S) -> ()

            sil_witness_table hidden S: Q module main {
            }

            sil_witness_table [serialized] S: P module main {
              base_protocol Q: S: Q module main
              method #P.f!1: @S_f
              method #P.g!1: nil
              associated_type Element: Int64
              associated_type_protocol (Element: Hashable): Int64: Hashable module Swift
            }

            sil_witness_table <T where T : P> Box<T>: P module main {
              base_protocol Q: dependent
              conditional_conformance (T: P): dependent
            }

            sil_witness_table Int64: Q module Swift
        "};
        let mut table = DeclTable::with_standard_library();
        let parsed = parse_into(&format!("{decls}{text}"), &mut table);
        assert_clean(&parsed);

        let tables = &parsed.module.witness_tables;
        assert_eq!(tables.len(), 4);
        assert_eq!(tables[0].linkage, Linkage::Hidden);
        assert_eq!(tables[1].entries.len(), 5);
        assert!(matches!(tables[1].entries[2], WitnessEntry::Method { witness: None, .. }));
        assert_eq!(tables[2].conditional_conformances.len(), 1);
        assert!(tables[3].is_declaration);
        assert_eq!(tables[3].linkage, Linkage::PublicExternal);

        // Conformances declared by tables are visible to later lookups
        assert!(table.conforms_to(&Type::nominal("S", Vec::new()), "P".into()));

        assert_reprints(&parsed, decls);
    }

    #[test]
    fn witness_table_errors() {
        let parsed = parse(indoc! {"
            protocol P {}
            struct S {}
            sil_witness_table S: P module main {
              requirement #P.f!1: nil
            }
            sil_witness_table S: Nope module main {
            }
        "});

        assert_eq!(
            parsed.diagnostics.kinds(),
            vec![DiagnosticKind::UnknownWitnessEntry, DiagnosticKind::UnknownProtocol]
        );
    }

    #[test]
    fn default_witness_tables() {
        let decls = "protocol P {}\n";
        let parsed = parse(&format!(
            "{decls}{}",
            indoc! {"
                sil @f_default : $@convention(witness_method: P) <Self where Self : P> (@in_guaranteed Self) -> ()

                sil_default_witness_table hidden P {
                  no_default
                  method #P.f!1: @f_default
                }
            "}
        ));
        assert_clean(&parsed);

        let table = parsed.module.lookup_default_witness_table("P".into()).unwrap();
        assert_eq!(table.linkage, Linkage::Hidden);
        assert_eq!(table.entries.len(), 2);
        assert!(table.entries[0].is_none());

        assert_reprints(&parsed, decls);
    }

    #[test]
    fn coverage_maps_share_counter_expressions() {
        let parsed = parse(indoc! {r#"
            sil @f : $@convention(thin) () -> ()

            sil_coverage_map "a.swift" "f" "a.swift:f" 1234 {
              1:10 -> 4:2 : 0
              2:3 -> 2:9 : (0 + 1)
              3:3 -> 3:9 : ((0 + 1) - 2)
              4:1 -> 4:2 : zero
            }
        "#});
        assert_clean(&parsed);

        let map = &parsed.module.coverage_maps[0];
        assert_eq!(map.hash, 1234);
        assert_eq!(map.regions.len(), 4);
        assert_eq!(map.expressions[map.regions[0].counter], CounterExpr::Counter(0));
        assert!(matches!(map.expressions[map.regions[2].counter], CounterExpr::Subtract(..)));

        // `0` and `(0 + 1)` are interned once each
        assert_eq!(map.expressions.len(), 6);

        assert_reprints(&parsed, "");
    }

    #[test]
    fn coverage_map_errors() {
        let parsed = parse("sil_coverage_map \"a.swift\" \"g\" \"g\" 1 {\n}\n");
        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::CoverageMapFunctionNotFound]);

        let parsed = parse(indoc! {r#"
            sil @f : $@convention(thin) () -> ()
            sil_coverage_map "a.swift" "f" "f" 1 {
              1:1 -> 2:1 : (0 * 1)
            }
        "#});
        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::InvalidCounterExpression]);
    }

    #[test]
    fn scopes_link_to_functions_and_each_other() {
        let parsed = parse(indoc! {r#"
            sil_scope 1 { loc "a.swift":1:1 parent @f : $@convention(thin) () -> () }
            sil_scope 2 { loc "a.swift":2:5 parent 1 inlined_at 1 }

            sil @f : $@convention(thin) () -> () {
            bb0:
              %0 = tuple (), scope 2
              return %0 : $()
            }
        "#});
        assert_clean(&parsed);

        let scopes = &parsed.module.scopes;
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes.iter().next().unwrap().parent, ScopeParent::Function("f".into()));

        // The scope's forward declaration is completed by the definition
        assert_eq!(parsed.module.functions.len(), 1);
        assert!(parsed.module.function_named("f").unwrap().is_definition());

        assert_reprints(&parsed, "");
    }

    #[test]
    fn scope_errors() {
        let parsed = parse(indoc! {"
            sil_scope 1 { parent 7 }
            sil_scope 2 { parent @f : $Builtin.Int32 }
        "});
        assert_eq!(
            parsed.diagnostics.kinds(),
            vec![DiagnosticKind::UndeclaredScope, DiagnosticKind::NotAFunction]
        );

        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) () -> ()
            sil_scope 1 { parent @f : $@convention(thin) () -> () }
            sil_scope 1 { parent 1 }
        "});
        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::RedefinedScope]);
    }
}
