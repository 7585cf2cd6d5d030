//! Type grammar: `$T` and `$*T`, function and box types, generic signatures,
//! requirements, declaration references and conformances.

use std::rc::Rc;

use crate::{
    diagnostics::{report, DiagnosticSink},
    intern::InternedSymbol,
    oracle::TypeOracle,
    parse::{
        lexer::TokenKind,
        parser::{PResult, ParseError, Parser},
    },
    sil::{
        instruction::{DeclRef, DeclRefKind},
        types::{
            BoxField, BoxType, Conformance, CoroutineKind, FunctionRepresentation, GenericParam,
            GenericSignature, MetatypeRepresentation, ParameterConvention, ReferenceOwnership,
            Requirement, RequirementKind, ResultConvention, SilFunctionType, SilParameter,
            SilResult, SilType, Substitution, TupleElement, Type, TypeKind,
        },
    },
};

/// Attributes which can start a type, as opposed to `@function` names
const TYPE_ATTRIBUTES: &[&str] = &[
    "thin",
    "thick",
    "objc",
    "convention",
    "pseudogeneric",
    "noescape",
    "callee_owned",
    "callee_guaranteed",
    "callee_unowned",
    "yield_once",
    "yield_many",
    "opened",
    "sil_weak",
    "sil_unowned",
    "sil_unmanaged",
    "block_storage",
];

/// One element of a parenthesized list, before it is known whether the list
/// is a tuple or a parameter list
struct ParenElement {
    label: Option<InternedSymbol>,
    convention: Option<ParameterConvention>,
    ty: Type,
}

/// Everything that may precede the parameter list of a function type
#[derive(Default)]
struct FunctionAttributes {
    representation: Option<FunctionRepresentation>,
    callee: Option<ParameterConvention>,
    coroutine: CoroutineKind,
    is_noescape: bool,
    is_pseudogeneric: bool,
}

impl FunctionAttributes {
    fn is_empty(&self) -> bool {
        self.representation.is_none()
            && self.callee.is_none()
            && self.coroutine == CoroutineKind::None
            && !self.is_noescape
            && !self.is_pseudogeneric
    }
}

/// `τ_1_0` names a generic parameter by depth and index
fn canonical_generic_param(name: &str) -> Option<GenericParam> {
    let (depth, index) = name.strip_prefix("τ_")?.split_once('_')?;

    Some(GenericParam {
        name: name.into(),
        depth: depth.parse().ok()?,
        index: index.parse().ok()?,
    })
}

fn builtin_type(name: &str) -> Option<Type> {
    let kind = match name {
        "Word" => TypeKind::BuiltinWord,
        "RawPointer" => TypeKind::BuiltinRawPointer,
        "NativeObject" => TypeKind::BuiltinNativeObject,
        "UnknownObject" => TypeKind::BuiltinUnknownObject,
        "BridgeObject" => TypeKind::BuiltinBridgeObject,
        "UnsafeValueBuffer" => TypeKind::BuiltinUnsafeValueBuffer,
        "SILToken" => TypeKind::BuiltinSilToken,
        _ => {
            if let Some(width) = name.strip_prefix("Int") {
                TypeKind::BuiltinInteger(width.parse().ok().filter(|w| *w > 0)?)
            } else {
                TypeKind::BuiltinFloat(name.strip_prefix("FPIEEE")?.parse().ok()?)
            }
        }
    };

    Some(Type::new(kind))
}

impl<'source> Parser<'source, '_> {
    /// `$T` or `$*T`
    pub fn parse_sil_type(&mut self) -> PResult<SilType> {
        self.expect_next_to_be(TokenKind::Dollar, "'$'")?;

        if self.eat(TokenKind::Asterisk) {
            return Ok(SilType::address(self.parse_type()?));
        }

        Ok(SilType::object(self.parse_type()?))
    }

    /// A formal type, written with or without a leading `$`
    pub fn parse_formal_type(&mut self) -> PResult<Type> {
        self.eat(TokenKind::Dollar);
        self.parse_type()
    }

    pub fn parse_type(&mut self) -> PResult<Type> {
        if let Some(representation) = self
            .peek_attribute()
            .and_then(|attribute| attribute.parse::<MetatypeRepresentation>().ok())
        {
            let span = self.peek_span();
            self.lexer.next();

            return match self.parse_type()?.kind() {
                TypeKind::Metatype { instance, .. } => {
                    Ok(Type::metatype(instance.clone(), Some(representation)))
                }
                TypeKind::ExistentialMetatype { instance, .. } => {
                    Ok(Type::existential_metatype(instance.clone(), Some(representation)))
                }
                _ => {
                    report!(self, span, UnknownAttribute, "@{representation} only applies to metatypes");
                    Err(ParseError)
                }
            };
        }

        let primary = self.parse_type_primary()?;
        self.parse_type_postfix(primary)
    }

    /// `.Type`, `.Protocol` and `.Member` suffixes
    fn parse_type_postfix(&mut self, mut ty: Type) -> PResult<Type> {
        while self.peek_is(TokenKind::Dot) {
            let Some(member) = self.peek_nth_word(1) else {
                break;
            };

            self.lexer.next();
            self.lexer.next();

            ty = match member {
                "Type" if ty.is_existential() => Type::existential_metatype(ty, None),
                "Type" => Type::metatype(ty, None),
                "Protocol" => Type::metatype(ty, None),
                name => Type::new(TypeKind::DependentMember {
                    base: ty,
                    name: name.into(),
                }),
            };
        }

        Ok(ty)
    }

    fn parse_type_primary(&mut self) -> PResult<Type> {
        let token = self.expect_peek("a type")?;

        match token.kind {
            TokenKind::GlobalName => self.parse_attributed_type(),
            TokenKind::LessThan => {
                let generics = self.parse_generic_signature()?;
                let params = generics.params.clone();

                self.with_generic_scope(params, |parser| {
                    if parser.peek_is(TokenKind::OpenBrace) {
                        parser.parse_box_type(Some(generics))
                    } else {
                        parser.parse_function_type(FunctionAttributes::default(), Some(generics))
                    }
                })
            }
            TokenKind::OpenBrace => self.parse_box_type(None),
            TokenKind::OpenParen => self.parse_paren_type(FunctionAttributes::default()),
            TokenKind::Identifier | TokenKind::Keyword(_) => self.parse_named_type(),
            _ => Err(self.expected("a type")),
        }
    }

    // @opened("...") P, @sil_weak T, @convention(thin) () -> ()
    fn parse_attributed_type(&mut self) -> PResult<Type> {
        let span = self.peek_span();
        let Some(attribute) = self.peek_attribute() else {
            return Err(self.expected("a type"));
        };

        if let Ok(ownership) = attribute.parse::<ReferenceOwnership>() {
            self.lexer.next();
            let referent = self.parse_type()?;
            return Ok(Type::new(TypeKind::ReferenceStorage { ownership, referent }));
        }

        match attribute {
            "opened" => {
                self.lexer.next();
                self.expect_next_to_be(TokenKind::OpenParen, "'('")?;
                let id = self.expect_string()?;
                self.expect_next_to_be(TokenKind::CloseParen, "')'")?;

                let existential = self.parse_type_primary()?;
                if !existential.is_existential() {
                    report!(self, span, InvalidOperandType, "@opened needs an existential, found {existential}");
                    return Err(ParseError);
                }

                Ok(Type::new(TypeKind::Opened {
                    id: id.as_str().into(),
                    existential,
                }))
            }
            "block_storage" => {
                self.lexer.next();
                Ok(Type::new(TypeKind::BlockStorage(self.parse_type()?)))
            }
            _ => {
                let attributes = self.parse_function_attributes_of_type()?;

                if self.peek_is(TokenKind::LessThan) {
                    let generics = self.parse_generic_signature()?;
                    let params = generics.params.clone();
                    return self.with_generic_scope(params, |parser| {
                        parser.parse_function_type(attributes, Some(generics))
                    });
                }

                self.parse_function_type(attributes, None)
            }
        }
    }

    fn parse_function_attributes_of_type(&mut self) -> PResult<FunctionAttributes> {
        let mut attributes = FunctionAttributes::default();

        while let Some(attribute) = self.peek_attribute() {
            let span = self.peek_span();

            match attribute {
                "convention" => {
                    self.lexer.next();
                    self.expect_next_to_be(TokenKind::OpenParen, "'('")?;
                    let (name, name_span) = self.expect_name("a calling convention")?;

                    attributes.representation = Some(match name.value() {
                        "thin" => FunctionRepresentation::Thin,
                        "thick" => FunctionRepresentation::Thick,
                        "method" => FunctionRepresentation::Method,
                        "c" => FunctionRepresentation::C,
                        "block" => FunctionRepresentation::Block,
                        "objc_method" => FunctionRepresentation::ObjCMethod,
                        "closure" => FunctionRepresentation::Closure,
                        "witness_method" => {
                            self.expect_next_to_be(TokenKind::Colon, "':'")?;
                            let (protocol, _) = self.expect_name("a protocol name")?;
                            FunctionRepresentation::WitnessMethod(protocol)
                        }
                        other => {
                            report!(self, name_span, UnknownAttribute, "unknown calling convention '{other}'");
                            return Err(ParseError);
                        }
                    });

                    self.expect_next_to_be(TokenKind::CloseParen, "')'")?;
                    continue;
                }
                "pseudogeneric" => attributes.is_pseudogeneric = true,
                "noescape" => attributes.is_noescape = true,
                "yield_once" => attributes.coroutine = CoroutineKind::YieldOnce,
                "yield_many" => attributes.coroutine = CoroutineKind::YieldMany,
                other => match other.strip_prefix("callee_").map(str::parse::<ParameterConvention>) {
                    Some(Ok(callee)) => attributes.callee = Some(callee),
                    _ if attributes.is_empty() => {
                        report!(self, span, UnknownType, "unknown type attribute '@{other}'");
                        return Err(ParseError);
                    }
                    _ => break,
                },
            }

            self.lexer.next();
        }

        Ok(attributes)
    }

    /// `<T, U where T : P>`. Every signature binds depth 0 and shadows the
    /// signatures around it.
    pub fn parse_generic_signature(&mut self) -> PResult<Rc<GenericSignature>> {
        self.expect_next_to_be(TokenKind::LessThan, "'<'")?;

        let mut params = Vec::new();
        let mut inline_constraints = Vec::new();

        loop {
            let (name, _) = self.expect_name("a generic parameter")?;
            let param = GenericParam {
                name,
                depth: 0,
                index: params.len() as u32,
            };
            params.push(param);

            // <T : P & Q> is shorthand for a where clause
            if self.eat(TokenKind::Colon) {
                loop {
                    let (protocol, _) = self.expect_name("a protocol name")?;
                    inline_constraints.push(Requirement {
                        subject: Type::new(TypeKind::GenericParam(param)),
                        kind: RequirementKind::Conformance(protocol),
                    });

                    if !self.eat(TokenKind::Ampersand) {
                        break;
                    }
                }
            }

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        let mut requirements = inline_constraints;
        let scope = params.clone();
        self.with_generic_scope(scope, |parser| {
            if parser.eat_word("where") {
                requirements.push(parser.parse_requirement()?);
                while parser.eat(TokenKind::Comma) {
                    requirements.push(parser.parse_requirement()?);
                }
            }

            Ok(())
        })?;

        self.expect_next_to_be(TokenKind::GreaterThan, "'>'")?;

        Ok(Rc::new(GenericSignature {
            params,
            requirements,
        }))
    }

    /// `T : P`, `T : Base`, `T : _Trivial` or `T == U`
    pub fn parse_requirement(&mut self) -> PResult<Requirement> {
        let subject = self.parse_type()?;

        if self.eat(TokenKind::DoubleEquals) {
            let other = self.parse_type()?;
            return Ok(Requirement {
                subject,
                kind: RequirementKind::SameType(other),
            });
        }

        self.expect_next_to_be(TokenKind::Colon, "':' or '=='")?;

        if let Some(word) = self.peek_word() {
            let name: InternedSymbol = word.into();

            if self.decls.is_protocol(name) {
                self.lexer.next();
                return Ok(Requirement {
                    subject,
                    kind: RequirementKind::Conformance(name),
                });
            }

            if word.starts_with('_') && !self.decls.contains(name) {
                self.lexer.next();
                return Ok(Requirement {
                    subject,
                    kind: RequirementKind::Layout(name),
                });
            }
        }

        let superclass = self.parse_type()?;
        Ok(Requirement {
            subject,
            kind: RequirementKind::Superclass(superclass),
        })
    }

    // { var T, let U } <Int>
    fn parse_box_type(&mut self, generics: Option<Rc<GenericSignature>>) -> PResult<Type> {
        self.expect_next_to_be(TokenKind::OpenBrace, "'{'")?;

        let mut fields = Vec::new();
        while !self.peek_is(TokenKind::CloseBrace) {
            let mutable = match self.peek_word() {
                Some("var") => true,
                Some("let") => false,
                _ => return Err(self.expected("'var' or 'let'")),
            };
            self.lexer.next();

            fields.push(BoxField {
                mutable,
                ty: self.parse_type()?,
            });

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect_next_to_be(TokenKind::CloseBrace, "'}'")?;

        // The arguments are written outside the box's own generic scope
        let outer = generics.as_ref().map(|_| self.generic_scopes.pop());
        let args = self.parse_type_arguments();
        if let Some(Some(scope)) = outer {
            self.generic_scopes.push(scope);
        }

        Ok(Type::new(TypeKind::Box(Rc::new(BoxType {
            generics,
            fields,
            args: args?,
        }))))
    }

    /// `<A, B>` after a nominal or box, empty when absent
    fn parse_type_arguments(&mut self) -> PResult<Vec<Type>> {
        if !self.eat(TokenKind::LessThan) {
            return Ok(Vec::new());
        }

        let mut args = vec![self.parse_type()?];
        while self.eat(TokenKind::Comma) {
            args.push(self.parse_type()?);
        }

        self.expect_next_to_be(TokenKind::GreaterThan, "'>'")?;
        Ok(args)
    }

    // (label: A, @owned B)
    fn parse_paren_elements(&mut self) -> PResult<Vec<ParenElement>> {
        self.expect_next_to_be(TokenKind::OpenParen, "'('")?;
        let mut elements = Vec::new();

        while !self.peek_is(TokenKind::CloseParen) {
            let label = match self.peek_word() {
                Some(label) if self.peek_nth_is(1, TokenKind::Colon) => {
                    self.lexer.next();
                    self.lexer.next();
                    Some(label.into())
                }
                _ => None,
            };

            let convention = match self
                .peek_attribute()
                .and_then(|attribute| attribute.parse::<ParameterConvention>().ok())
            {
                Some(convention) => {
                    self.lexer.next();
                    Some(convention)
                }
                None => None,
            };

            elements.push(ParenElement {
                label,
                convention,
                ty: self.parse_type()?,
            });

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen, "')'")?;
        Ok(elements)
    }

    /// A tuple, a parenthesized type or, when `->` follows, a function type
    fn parse_paren_type(&mut self, attributes: FunctionAttributes) -> PResult<Type> {
        let start = self.peek_span();
        let elements = self.parse_paren_elements()?;

        if self.peek_is(TokenKind::Arrow) {
            return self.finish_function_type(attributes, None, elements);
        }

        if elements.iter().any(|element| element.convention.is_some()) {
            report!(self, start, ExpectedToken, "parameter conventions need a function type");
            return Err(ParseError);
        }

        if let [single] = elements.as_slice() {
            if single.label.is_none() {
                return Ok(single.ty.clone());
            }
        }

        Ok(Type::new(TypeKind::Tuple(
            elements
                .into_iter()
                .map(|element| TupleElement {
                    label: element.label,
                    ty: element.ty,
                })
                .collect(),
        )))
    }

    fn parse_function_type(
        &mut self,
        attributes: FunctionAttributes,
        generics: Option<Rc<GenericSignature>>,
    ) -> PResult<Type> {
        let elements = self.parse_paren_elements()?;
        self.finish_function_type(attributes, generics, elements)
    }

    // -> @owned R, -> (@out R, @yields @inout T, @error Error)
    fn finish_function_type(
        &mut self,
        attributes: FunctionAttributes,
        generics: Option<Rc<GenericSignature>>,
        params: Vec<ParenElement>,
    ) -> PResult<Type> {
        self.expect_next_to_be(TokenKind::Arrow, "'->'")?;

        let mut function = SilFunctionType::new(
            attributes
                .representation
                .unwrap_or(FunctionRepresentation::Thick),
        );
        function.callee = attributes.callee;
        function.coroutine = attributes.coroutine;
        function.is_noescape = attributes.is_noescape;
        function.is_pseudogeneric = attributes.is_pseudogeneric;
        function.generics = generics;
        function.params = params
            .into_iter()
            .map(|param| SilParameter {
                convention: param.convention.unwrap_or(ParameterConvention::DirectUnowned),
                ty: param.ty,
            })
            .collect();

        if !self.eat(TokenKind::OpenParen) {
            let convention = self.parse_result_convention();
            function.results.push(SilResult {
                convention,
                ty: self.parse_type()?,
            });
            return Ok(Type::function(function));
        }

        while !self.peek_is(TokenKind::CloseParen) {
            match self.peek_attribute() {
                Some("yields") => {
                    self.lexer.next();
                    let convention = match self
                        .peek_attribute()
                        .and_then(|attribute| attribute.parse::<ParameterConvention>().ok())
                    {
                        Some(convention) => {
                            self.lexer.next();
                            convention
                        }
                        None => ParameterConvention::DirectUnowned,
                    };
                    function.yields.push(SilParameter {
                        convention,
                        ty: self.parse_type()?,
                    });
                }
                Some("error") => {
                    self.lexer.next();
                    function.error = Some(self.parse_type()?);
                }
                _ => {
                    let convention = self.parse_result_convention();
                    function.results.push(SilResult {
                        convention,
                        ty: self.parse_type()?,
                    });
                }
            }

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen, "')'")?;
        Ok(Type::function(function))
    }

    fn parse_result_convention(&mut self) -> ResultConvention {
        match self
            .peek_attribute()
            .and_then(|attribute| attribute.parse::<ResultConvention>().ok())
        {
            Some(convention) => {
                self.lexer.next();
                convention
            }
            None => ResultConvention::Unowned,
        }
    }

    /// Builtins, generic parameters, protocol compositions and nominals
    fn parse_named_type(&mut self) -> PResult<Type> {
        let (name, span) = self.expect_name("a type")?;

        if name.value() == "Builtin" {
            self.expect_next_to_be(TokenKind::Dot, "'.'")?;
            let (builtin, builtin_span) = self.expect_name("a builtin type")?;

            return match builtin_type(builtin.value()) {
                Some(ty) => Ok(ty),
                None => {
                    report!(self, span.to(builtin_span), UnknownType, "unknown type Builtin.{builtin}");
                    Err(ParseError)
                }
            };
        }

        if let Some(param) = self.lookup_generic_param(name.value()) {
            return Ok(Type::new(TypeKind::GenericParam(param)));
        }

        if let Some(param) = canonical_generic_param(name.value()) {
            return Ok(Type::new(TypeKind::GenericParam(param)));
        }

        if name.value() == "Any" {
            return Ok(Type::existential(Vec::new()));
        }

        if self.decls.is_protocol(name) {
            let mut protocols = vec![name];

            while self.eat(TokenKind::Ampersand) {
                let (protocol, protocol_span) = self.expect_name("a protocol name")?;
                if !self.decls.is_protocol(protocol) {
                    report!(self, protocol_span, UnknownProtocol, "{protocol} is not a protocol");
                    return Err(ParseError);
                }
                protocols.push(protocol);
            }

            return Ok(Type::existential(protocols));
        }

        let args = self.parse_type_arguments()?;
        match self.decls.resolve_type(name, args) {
            Some(ty) => Ok(ty),
            None => {
                report!(self, span, UnknownType, "unknown type {name}");
                Err(ParseError)
            }
        }
    }

    /// `#Class.method!kind.1.foreign`, optionally followed by `: FormalType`
    /// when `allow_formal_type` is set
    pub fn parse_decl_ref(&mut self, allow_formal_type: bool) -> PResult<DeclRef> {
        self.expect_next_to_be(TokenKind::Hash, "'#'")?;

        let mut path = vec![self.expect_name("a declaration name")?.0];
        while self.peek_is(TokenKind::Dot) && self.peek_nth_word(1).is_some() {
            self.lexer.next();
            path.push(self.expect_name("a declaration name")?.0);
        }

        let mut decl = DeclRef::new(path);

        if self.eat(TokenKind::Bang) {
            let mut first = true;

            loop {
                let token = self.expect_peek("a declaration kind or uncurry level")?;

                match token.kind {
                    TokenKind::IntegerLiteral => decl.uncurry_level = Some(self.expect_u32()?),
                    _ => {
                        let (word, span) = self.expect_name("a declaration kind")?;

                        match word.value() {
                            "foreign" => decl.foreign = true,
                            kind if first => match kind.parse::<DeclRefKind>() {
                                Ok(kind) => decl.kind = Some(kind),
                                Err(_) => {
                                    report!(self, span, UnknownDecl, "unknown declaration kind '{kind}'");
                                    return Err(ParseError);
                                }
                            },
                            _ => return Err(self.expected("an uncurry level or 'foreign'")),
                        }
                    }
                }

                first = false;
                let continues = self.peek_is(TokenKind::Dot)
                    && (self.peek_nth_is(1, TokenKind::IntegerLiteral)
                        || self.peek_nth_word(1) == Some("foreign"));
                if !continues {
                    break;
                }

                self.lexer.next();
            }
        }

        if allow_formal_type && self.at_formal_type() {
            self.lexer.next();
            decl.formal_type = Some(self.parse_type()?);
        }

        Ok(decl)
    }

    /// Whether the tokens after a declaration reference are `: Type`
    fn at_formal_type(&mut self) -> bool {
        if !self.peek_is(TokenKind::Colon) {
            return false;
        }

        let Some(token) = self.lexer.peek_nth(1) else {
            return false;
        };

        match token.kind {
            TokenKind::GlobalName => {
                let attribute = &self.text(token)[1..];
                TYPE_ATTRIBUTES.contains(&attribute)
            }
            TokenKind::Identifier | TokenKind::Keyword(_) => self.text(token) != "nil",
            TokenKind::OpenParen | TokenKind::LessThan | TokenKind::OpenBrace => true,
            _ => false,
        }
    }

    /// `dependent`, `T: P module M`, `T: specialize <A> (conf)` or
    /// `T: inherit (conf)`. `dependent` takes its protocol from `protocol`.
    pub fn parse_conformance(&mut self, protocol: Option<InternedSymbol>) -> PResult<Conformance> {
        if self.peek_word() == Some("dependent") {
            let span = self.peek_span();
            self.lexer.next();

            return match protocol {
                Some(protocol) => Ok(Conformance::Abstract { protocol }),
                None => {
                    report!(self, span, UnknownConformance, "a dependent conformance needs a known protocol");
                    Err(ParseError)
                }
            };
        }

        let ty = self.parse_type()?;
        self.expect_next_to_be(TokenKind::Colon, "':'")?;

        if self.eat_word("specialize") {
            let (replacements, span) = self.parse_substitution_types()?;
            self.expect_next_to_be(TokenKind::OpenParen, "'('")?;

            let generics = if self.peek_is(TokenKind::LessThan) {
                Some(self.parse_generic_signature()?)
            } else {
                None
            };

            let params = generics.as_ref().map(|g| g.params.clone()).unwrap_or_default();
            let generic = self.with_generic_scope(params, |parser| parser.parse_conformance(protocol))?;
            self.expect_next_to_be(TokenKind::CloseParen, "')'")?;

            let subs = match &generics {
                Some(_) => self.build_substitutions(generics.as_ref(), replacements, span)?,
                None => replacements
                    .into_iter()
                    .map(|replacement| Substitution {
                        replacement,
                        conformances: Vec::new(),
                    })
                    .collect(),
            };

            return Ok(Conformance::Specialized {
                ty,
                subs,
                generics,
                generic: Rc::new(generic),
            });
        }

        if self.eat_word("inherit") {
            self.expect_next_to_be(TokenKind::OpenParen, "'('")?;
            let base = self.parse_conformance(protocol)?;
            self.expect_next_to_be(TokenKind::CloseParen, "')'")?;

            return Ok(Conformance::Inherited {
                ty,
                base: Rc::new(base),
            });
        }

        let (protocol, span) = self.expect_name("a protocol name")?;
        if !self.decls.is_protocol(protocol) {
            report!(self, span, UnknownProtocol, "{protocol} is not a protocol");
            return Err(ParseError);
        }

        self.expect_word("module")?;
        let (module, _) = self.expect_name("a module name")?;

        Ok(Conformance::Concrete {
            ty,
            protocol,
            module,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::ParserOptions,
        diagnostics::{DiagnosticCollector, DiagnosticKind},
        oracle::{DeclTable, NominalDecl, NominalKind},
        parse::parser::Parser,
        sil::{
            instruction::DeclRefKind,
            types::{
                Conformance, CoroutineKind, FunctionRepresentation, ParameterConvention,
                RequirementKind, ResultConvention, SilType, Type, TypeKind,
            },
        },
        source::SourceFile,
    };

    fn decls() -> DeclTable {
        let mut decls = DeclTable::with_standard_library();
        decls.insert(NominalDecl::new("P", NominalKind::Protocol));
        decls.insert(NominalDecl::new("Q", NominalKind::Protocol));
        decls.insert(NominalDecl::new("C", NominalKind::Class));
        decls.insert(NominalDecl {
            generic_params: vec!["T".into()],
            ..NominalDecl::new("Array", NominalKind::Struct)
        });
        decls
    }

    /// Parses `text` with `f` and returns the result together with the
    /// diagnostics it produced
    fn with_parser<T>(text: &str, f: impl FnOnce(&mut Parser) -> T) -> (T, DiagnosticCollector) {
        let source = SourceFile::from_memory(text);
        let mut decls = decls();
        let mut parser = Parser::new(&source, &mut decls, ParserOptions::default(), None);
        let result = f(&mut parser);
        (result, std::mem::take(&mut parser.diagnostics))
    }

    fn sil_type(text: &str) -> SilType {
        let (ty, diagnostics) = with_parser(text, |parser| parser.parse_sil_type());
        assert_eq!(diagnostics.error_count(), 0, "{text}: {:?}", diagnostics.kinds());
        ty.unwrap()
    }

    #[test]
    fn printed_types_parse_back() {
        for text in [
            "$Builtin.Int32",
            "$*Builtin.FPIEEE64",
            "$Optional<C>",
            "$(Builtin.Int1, label: Builtin.Word)",
            "$()",
            "$@thick C.Type",
            "$@thick P.Protocol",
            "$@thick P.Type",
            "$@thin (P & Q).Type",
            "$P & Q",
            "$Any",
            "$@convention(thin) (Builtin.Int32, @owned C) -> @owned C",
            "$@callee_guaranteed (@in_guaranteed C) -> (@out C, @error Error)",
            "$@convention(method) @yield_once (@guaranteed C) -> (@yields @inout Builtin.Int64)",
            "$@convention(witness_method: P) <Self where Self : P> (@in_guaranteed Self) -> ()",
            "$@convention(thin) <T> (@in T) -> @out T",
            "$@convention(thin) () -> (Builtin.Int1, Builtin.Int1)",
            "$@convention(thin) () -> ((Builtin.Int1, Builtin.Int1))",
            "$@callee_owned () -> (@owned @callee_owned () -> ())",
            "$<τ_0_0> { var τ_0_0 } <Builtin.Int64>",
            "${ let C, var Builtin.Int8 }",
            "$*@sil_weak Optional<C>",
            "$@opened(\"01234567-89AB-CDEF-0123-000000000000\") P",
            "$@opened(\"01234567-89AB-CDEF-0123-000000000000\") P.Type",
            "$*@block_storage @convention(block) () -> ()",
            "$Builtin.SILToken",
        ] {
            assert_eq!(sil_type(text).to_string(), text);
        }
    }

    #[test]
    fn function_type_details() {
        let ty = sil_type("$@convention(witness_method: P) @yield_many <Self where Self : P> (@inout Self) -> (@yields @in_guaranteed C)");
        let function = ty.ty.function_type().unwrap();

        assert_eq!(function.representation, FunctionRepresentation::WitnessMethod("P".into()));
        assert_eq!(function.coroutine, CoroutineKind::YieldMany);
        assert_eq!(function.params[0].convention, ParameterConvention::IndirectInout);
        assert_eq!(function.yields[0].convention, ParameterConvention::IndirectInGuaranteed);
        assert!(function.results.is_empty());

        let generics = function.generics.as_ref().unwrap();
        assert_eq!(generics.requirements[0].kind, RequirementKind::Conformance("P".into()));
    }

    #[test]
    fn results_default_to_unowned() {
        let ty = sil_type("$@convention(thin) () -> C");
        let function = ty.ty.function_type().unwrap();

        assert_eq!(function.results[0].convention, ResultConvention::Unowned);
        assert_eq!(function.representation, FunctionRepresentation::Thin);
    }

    #[test]
    fn inline_generic_constraints_become_requirements() {
        let ty = sil_type("$@convention(thin) <T : P & Q> (@in T) -> ()");
        let generics = ty.ty.function_type().unwrap().generics.clone().unwrap();

        assert_eq!(generics.requirements.len(), 2);
        assert_eq!(generics.to_string(), "<T where T : P, T : Q>");
    }

    #[test]
    fn generic_parameters_are_scoped() {
        let (result, diagnostics) = with_parser("$@convention(thin) <T> (@in T) -> () $T", |parser| {
            let _ = parser.parse_sil_type();
            parser.parse_sil_type()
        });

        assert!(result.is_err());
        assert_eq!(diagnostics.kinds(), vec![DiagnosticKind::UnknownType]);
    }

    #[test]
    fn unknown_types_are_reported() {
        for text in ["$Nope", "$Builtin.Int", "$Builtin.Float"] {
            let (result, diagnostics) = with_parser(text, |parser| parser.parse_sil_type());
            assert!(result.is_err(), "{text}");
            assert_eq!(diagnostics.kinds(), vec![DiagnosticKind::UnknownType], "{text}");
        }
    }

    #[test]
    fn dependent_members_and_canonical_params() {
        let ty = sil_type("$τ_1_0.Element");

        let TypeKind::DependentMember { base, name } = ty.ty.kind() else {
            panic!("expected a dependent member, got {ty}");
        };
        assert_eq!(name.value(), "Element");
        assert!(matches!(base.kind(), TypeKind::GenericParam(p) if p.depth == 1 && p.index == 0));
    }

    #[test]
    fn decl_refs() {
        let (decl, diagnostics) = with_parser("#C.init!allocator.1.foreign : (C.Type) -> () -> C", |parser| {
            parser.parse_decl_ref(true)
        });
        assert_eq!(diagnostics.error_count(), 0, "{:?}", diagnostics.kinds());

        let decl = decl.unwrap();
        assert_eq!(decl.kind, Some(DeclRefKind::Allocator));
        assert_eq!(decl.uncurry_level, Some(1));
        assert!(decl.foreign);
        assert!(decl.formal_type.is_some());

        let (decl, _) = with_parser("#Optional.some!enumelt.1: bb1", |parser| parser.parse_decl_ref(false));
        assert_eq!(decl.unwrap().to_string(), "#Optional.some!enumelt.1");

        let (decl, _) = with_parser("#P.f!1: nil", |parser| parser.parse_decl_ref(true));
        assert_eq!(decl.unwrap().formal_type, None);
    }

    #[test]
    fn conformances() {
        let (conformance, diagnostics) = with_parser(
            "Array<Builtin.Int64>: specialize <Builtin.Int64> (<T> Array<T>: P module main)",
            |parser| parser.parse_conformance(None),
        );
        assert_eq!(diagnostics.error_count(), 0, "{:?}", diagnostics.kinds());

        let conformance = conformance.unwrap();
        assert_eq!(conformance.protocol().value(), "P");
        assert_eq!(
            conformance.to_string(),
            "Array<Builtin.Int64>: specialize <Builtin.Int64> (<T> Array<T>: P module main)"
        );

        let (conformance, _) = with_parser("dependent", |parser| parser.parse_conformance(Some("Q".into())));
        assert_eq!(conformance.unwrap(), Conformance::Abstract { protocol: "Q".into() });

        let (conformance, diagnostics) = with_parser("C: Nope module main", |parser| parser.parse_conformance(None));
        assert!(conformance.is_err());
        assert_eq!(diagnostics.kinds(), vec![DiagnosticKind::UnknownProtocol]);
    }

    #[test]
    fn requirements() {
        let (requirement, _) = with_parser("T : _Trivial", |parser| {
            parser.with_generic_scope(
                vec![crate::sil::types::GenericParam {
                    name: "T".into(),
                    depth: 0,
                    index: 0,
                }],
                |parser| parser.parse_requirement(),
            )
        });
        assert_eq!(requirement.unwrap().kind, RequirementKind::Layout("_Trivial".into()));

        let (requirement, _) = with_parser("τ_0_0 == Builtin.Int8", |parser| parser.parse_requirement());
        assert_eq!(requirement.unwrap().kind, RequirementKind::SameType(Type::int(8)));
    }
}
