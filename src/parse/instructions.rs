//! Operand grammars. Each opcode maps to a handler which reads everything
//! after the mnemonic, checks the operands against each other and against
//! the declarations, and computes the result types.

use std::iter;

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use strum::IntoEnumIterator;

use crate::{
    diagnostics::{report, DiagnosticSink},
    intern::InternedSymbol,
    oracle::{existential_protocols, NominalKind, TypeOracle},
    parse::{
        lexer::TokenKind,
        parser::{BodyContext, PResult, ParseError, ParsedInst, Parser, ValueRef},
    },
    sil::{
        instruction::{
            AccessEnforcement, AccessKind, CastConsumptionKind, DebugVar, DebugVarKind, DeclRef,
            InstKind, KeyPathComponent, KeyPathComponentId, KeyPathPattern, LoadOwnership,
            MarkUninitializedKind, Opcode, OpenedExistentialAccess, StoreOwnership,
            StringEncoding,
        },
        types::{
            replacement_types, Conformance, ParameterConvention, SilParameter, SilType,
            Substitution, Type, TypeKind,
        },
        value::{OwnershipKind, ValueId},
    },
    source::Span,
};

type Handler = fn(&mut Parser<'_, '_>, &mut BodyContext, Opcode) -> PResult<ParsedInst>;

static HANDLERS: Lazy<HashMap<Opcode, Handler>> = Lazy::new(|| {
    use Opcode::*;

    let mut handlers: HashMap<Opcode, Handler> = HashMap::new();
    let mut register = |opcodes: &[Opcode], handler: Handler| {
        for opcode in opcodes {
            handlers.insert(*opcode, handler);
        }
    };

    register(&[IntegerLiteral], integer_literal);
    register(&[FloatLiteral], float_literal);
    register(&[StringLiteral, ConstStringLiteral], string_literal);
    register(&[FunctionRef], function_ref);
    register(&[GlobalAddr, GlobalValue, AllocGlobal], global);
    register(&[Builtin], builtin);

    register(&[AllocStack], alloc_stack);
    register(&[AllocBox], alloc_box);
    register(&[AllocRef, AllocRefDynamic], alloc_ref);
    register(&[DeallocRef], dealloc_ref);
    register(
        &[AllocValueBuffer, ProjectValueBuffer, DeallocValueBuffer, ProjectExistentialBox],
        type_in_value,
    );
    register(&[DeallocExistentialBox, RefTailAddr, TailAddr], value_then_type);
    register(&[BindMemory], bind_memory);
    register(&[InitBlockStorageHeader], init_block_storage_header);

    register(
        &[
            DeallocStack,
            DeallocBox,
            DeallocPartialRef,
            FixLifetime,
            EndLifetime,
            DestroyAddr,
            DestroyValue,
            CondFail,
            EndBorrowArgument,
            MarkFunctionEscape,
            DeinitExistentialAddr,
            DeinitExistentialValue,
            Return,
            Throw,
        ],
        no_results,
    );
    register(
        &[
            CopyValue,
            CopyBlock,
            BeginBorrow,
            LoadBorrow,
            IsUnique,
            IsUniqueOrPinned,
            ProjectBlockStorage,
            CopyUnownedValue,
        ],
        single_operand,
    );
    register(&[DestructureStruct, DestructureTuple], destructure);
    register(&[RefToBridgeObject, IndexAddr, IndexRawPointer], operand_pair);
    register(&[UncheckedOwnershipConversion], ownership_conversion);

    for opcode in Opcode::iter().filter(|opcode| opcode.is_reference_counting()) {
        register(&[opcode], ref_counting);
    }
    register(&[DebugValue, DebugValueAddr], debug_value);

    register(&[Load], load);
    register(&[Store, StoreBorrow, Assign], store);
    register(&[LoadWeak, LoadUnowned], load_reference);
    register(&[StoreWeak, StoreUnowned], store_reference);
    register(&[CopyAddr], copy_addr);
    register(&[EndBorrow], end_borrow);
    register(&[MarkDependence], mark_dependence);
    register(&[MarkUninitialized], mark_uninitialized);
    register(&[MarkUninitializedBehavior], mark_uninitialized_behavior);
    register(&[BeginAccess, EndAccess, BeginUnpairedAccess, EndUnpairedAccess], access);

    for opcode in Opcode::iter().filter(|opcode| opcode.is_conversion()) {
        register(&[opcode], conversion);
    }
    register(&[PointerToAddress], pointer_to_address);
    register(&[UnconditionalCheckedCastAddr, UncheckedRefCastAddr], cast_addr);
    register(&[CheckedCastBr, CheckedCastValueBr], checked_cast_br);
    register(&[CheckedCastAddrBr], checked_cast_addr_br);

    register(&[OpenExistentialAddr], open_existential_addr);
    register(
        &[
            InitExistentialAddr,
            InitExistentialValue,
            InitExistentialRef,
            InitExistentialMetatype,
            AllocExistentialBox,
        ],
        init_existential,
    );
    register(&[Metatype], metatype);
    register(&[ValueMetatype, ExistentialMetatype], value_metatype);
    register(&[ObjcProtocol], objc_protocol);

    register(&[Tuple], tuple);
    register(&[TupleExtract, TupleElementAddr, ProjectBox], field_index);
    register(&[Struct], struct_inst);
    register(&[StructExtract, StructElementAddr, RefElementAddr], field);
    register(&[Object], object);
    register(&[Enum], enum_inst);
    register(
        &[InitEnumDataAddr, UncheckedEnumData, UncheckedTakeEnumDataAddr, InjectEnumAddr],
        enum_data,
    );
    register(&[SelectEnum, SelectEnumAddr], select_enum);
    register(&[SelectValue], select_value);

    register(&[ClassMethod, SuperMethod, ObjcMethod, ObjcSuperMethod], method);
    register(&[WitnessMethod], witness_method);

    register(&[Apply, BeginApply, PartialApply, TryApply], apply);
    register(&[AbortApply, EndApply], end_coroutine);
    register(&[KeyPath], key_path);

    register(&[Br], br);
    register(&[CondBr], cond_br);
    register(&[SwitchValue], switch_value);
    register(&[SwitchEnum, SwitchEnumAddr], switch_enum);
    register(&[DynamicMethodBr], dynamic_method_br);
    register(&[Yield], yield_inst);
    register(&[Unwind, Unreachable], no_operands);

    handlers
});

/// Parses the operands of an instruction whose mnemonic was just consumed
pub fn parse_operands(
    parser: &mut Parser<'_, '_>,
    ctx: &mut BodyContext,
    opcode: Opcode,
) -> PResult<ParsedInst> {
    let Some(handler) = HANDLERS.get(&opcode) else {
        unreachable!("no operand grammar for {opcode}");
    };

    handler(parser, ctx, opcode)
}

/* Shared pieces */

fn comma(p: &mut Parser<'_, '_>) -> PResult<()> {
    p.expect_next_to_be(TokenKind::Comma, "','")?;
    Ok(())
}

fn colon(p: &mut Parser<'_, '_>) -> PResult<()> {
    p.expect_next_to_be(TokenKind::Colon, "':'")?;
    Ok(())
}

/// Whether a `,` follows which is not the start of the debug info
fn more_operands(p: &mut Parser<'_, '_>) -> bool {
    p.peek_is(TokenKind::Comma) && !p.at_trailing_debug_info()
}

/// `%0 : $T` together with where it starts
fn spanned_value(p: &mut Parser<'_, '_>, ctx: &mut BodyContext) -> PResult<(ValueId, Span)> {
    let span = p.peek_span();
    let value = p.typed_value(ctx)?;
    Ok((value, span))
}

fn typed_list(p: &mut Parser<'_, '_>, ctx: &mut BodyContext) -> PResult<Vec<ValueId>> {
    let mut values = vec![p.typed_value(ctx)?];

    while more_operands(p) {
        p.lexer.next();
        values.push(p.typed_value(ctx)?);
    }

    Ok(values)
}

/// `%0, %1` up to and including the closing parenthesis
fn value_names_in_parens<'source>(p: &mut Parser<'source, '_>) -> PResult<Vec<ValueRef<'source>>> {
    p.expect_next_to_be(TokenKind::OpenParen, "'('")?;
    let mut names = Vec::new();

    if !p.peek_is(TokenKind::CloseParen) {
        names.push(p.value_name()?);
        while p.eat(TokenKind::Comma) {
            names.push(p.value_name()?);
        }
    }

    p.expect_next_to_be(TokenKind::CloseParen, "')'")?;
    Ok(names)
}

fn value_type(ctx: &BodyContext, value: ValueId) -> SilType {
    ctx.body.value_type(value).clone()
}

/// The type of an operand that must be an address. A mismatch is reported
/// and the address of the operand's type is used so the instruction still
/// gets built.
fn require_address(p: &mut Parser<'_, '_>, ctx: &BodyContext, value: ValueId, span: Span) -> SilType {
    let ty = value_type(ctx, value);

    if !ty.is_address() {
        report!(p, span, NotAnAddress, "operand of type {ty} is not an address");
        return ty.address_type();
    }

    ty
}

fn require_object(p: &mut Parser<'_, '_>, ctx: &BodyContext, value: ValueId, span: Span) -> SilType {
    let ty = value_type(ctx, value);

    if ty.is_address() {
        report!(p, span, InvalidOperandType, "operand of type {ty} must be an object");
        return ty.object_type();
    }

    ty
}

fn attribute<T: std::str::FromStr>(p: &mut Parser<'_, '_>, word: &str, span: Span, what: &str) -> PResult<T> {
    match word.parse() {
        Ok(value) => Ok(value),
        Err(_) => {
            report!(p, span, UnknownAttribute, "unknown {what} '{word}'");
            Err(ParseError)
        }
    }
}

// , let, name "x", argno 1
fn debug_var(p: &mut Parser<'_, '_>) -> PResult<DebugVar> {
    let mut var = DebugVar::default();

    while more_operands(p) {
        p.lexer.next();
        let (word, span) = p.expect_name("a debug variable attribute")?;

        match word.value() {
            "let" => var.kind = Some(DebugVarKind::Let),
            "var" => var.kind = Some(DebugVarKind::Var),
            "name" => var.name = Some(p.expect_string()?),
            "argno" => var.arg_no = Some(p.expect_u32()?),
            other => {
                report!(p, span, UnknownDebugVarAttribute, "unknown debug variable attribute '{other}'");
                return Err(ParseError);
            }
        }
    }

    Ok(var)
}

/// The conformances `concrete` needs to be stored in `existential`. Missing
/// ones are reported and left out.
fn existential_conformances(p: &mut Parser<'_, '_>, concrete: &Type, existential: &Type, span: Span) -> Vec<Conformance> {
    if !existential.is_existential() {
        report!(p, span, InvalidOperandType, "{existential} is not an existential type");
        return Vec::new();
    }

    let mut conformances = Vec::new();

    for protocol in existential_protocols(existential) {
        // AnyObject is a layout constraint without a witness table
        if protocol.value() == "AnyObject" && p.decls.is_reference(concrete) {
            continue;
        }

        match p.find_conformance(concrete, protocol) {
            Some(conformance) => conformances.push(conformance),
            None => {
                report!(p, span, UnknownConformance, "{concrete} does not conform to {protocol}");
            }
        }
    }

    conformances
}

/// The payload of `case`, or `None` when `ty` has no such case (reported)
fn case_payload(p: &mut Parser<'_, '_>, ty: &Type, case: &DeclRef, span: Span) -> Option<Option<Type>> {
    let found = case.member().and_then(|member| p.decls.case_payload(ty, member));

    if found.is_none() {
        report!(p, span, UnknownEnumCase, "{case} is not a case of {ty}");
    }

    found
}

fn covers_all_cases<'a>(p: &Parser<'_, '_>, ty: &Type, cases: impl Iterator<Item = &'a DeclRef> + Clone) -> bool {
    let Some(decl) = p.decls.nominal_of(ty) else {
        return true;
    };

    decl.cases
        .iter()
        .all(|(name, _)| cases.clone().any(|case| case.member() == Some(*name)))
}

/* Literals and references */

// integer_literal $Builtin.Int32, -7
fn integer_literal(p: &mut Parser<'_, '_>, _: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let span = p.peek_span();
    let ty = p.parse_sil_type()?;

    let Some(width) = ty.ty.builtin_integer_width().filter(|_| ty.is_object()) else {
        report!(p, span, InvalidOperandType, "integer_literal needs a builtin integer type, found {ty}");
        return Err(ParseError);
    };

    comma(p)?;
    let negative = p.eat(TokenKind::Minus);
    let (magnitude, literal_span) = p.expect_integer()?;

    let value = i128::try_from(magnitude)
        .ok()
        .map(|value| if negative { -value } else { value })
        .filter(|value| fits_in_width(*value, width));

    let Some(value) = value else {
        report!(p, literal_span, InvalidLiteral, "integer literal does not fit in {ty}");
        return Err(ParseError);
    };

    Ok(ParsedInst::single(InstKind::IntegerLiteral(value), Vec::new(), ty))
}

/// Accepts both the signed and the unsigned reading of `width` bits
fn fits_in_width(value: i128, width: u32) -> bool {
    if width >= 127 {
        return true;
    }

    let min = -(1i128 << (width - 1));
    let max = (1i128 << width) - 1;
    (min..=max).contains(&value)
}

// float_literal $Builtin.FPIEEE64, 0x3FF0000000000000
fn float_literal(p: &mut Parser<'_, '_>, _: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let span = p.peek_span();
    let ty = p.parse_sil_type()?;

    if !matches!(ty.ty.kind(), TypeKind::BuiltinFloat(_)) || ty.is_address() {
        report!(p, span, InvalidOperandType, "float_literal needs a builtin float type, found {ty}");
        return Err(ParseError);
    }

    comma(p)?;
    let (bits, _) = p.expect_integer()?;
    Ok(ParsedInst::single(InstKind::FloatLiteral(bits), Vec::new(), ty))
}

// string_literal utf8 "hello"
fn string_literal(p: &mut Parser<'_, '_>, _: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (name, span) = p.expect_name("a string encoding")?;
    let encoding = attribute::<StringEncoding>(p, name.value(), span, "string encoding")?;
    let value = p.expect_string()?;

    Ok(ParsedInst::single(
        InstKind::StringLiteral {
            constant: opcode == Opcode::ConstStringLiteral,
            encoding,
            value,
        },
        Vec::new(),
        SilType::object(Type::raw_pointer()),
    ))
}

// function_ref @f : $@convention(thin) () -> ()
fn function_ref(p: &mut Parser<'_, '_>, _: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let (name, _) = p.expect_global_name("a function name")?;
    colon(p)?;
    let span = p.peek_span();
    let ty = p.parse_sil_type()?;

    let Some(function_type) = ty.ty.function_type().cloned() else {
        report!(p, span, NotAFunction, "{ty} is not a function type");
        return Err(ParseError);
    };

    match p.module.lookup_function(name) {
        Some(existing) => {
            let declared = p.module.function(existing).ty.clone();
            if declared != function_type {
                report!(
                    p,
                    span,
                    FunctionTypeMismatch,
                    "function @{name} has type {} but is referenced as {ty}",
                    Type::function((*declared).clone())
                );
            }
        }
        None => {
            p.module.get_or_declare_function(name, function_type);
        }
    }

    Ok(ParsedInst::single(InstKind::FunctionRef(name), Vec::new(), ty))
}

// global_addr @g : $*T, alloc_global @g
fn global(p: &mut Parser<'_, '_>, _: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (name, name_span) = p.expect_global_name("a global name")?;

    let Some(declared) = p.module.lookup_global(name).map(|global| global.ty.clone()) else {
        report!(p, name_span, UndefinedGlobal, "use of undefined global @{name}");
        return Err(ParseError);
    };

    let kind = InstKind::Global { opcode, name };
    if opcode == Opcode::AllocGlobal {
        return Ok(ParsedInst::no_results(kind, Vec::new()));
    }

    colon(p)?;
    let span = p.peek_span();
    let ty = p.parse_sil_type()?;

    let expected = match opcode {
        Opcode::GlobalAddr => SilType::address(declared),
        _ => SilType::object(declared),
    };

    if ty != expected {
        report!(p, span, GlobalTypeMismatch, "global @{name} has type {expected} but is used as {ty}");
    }

    Ok(ParsedInst::single(kind, Vec::new(), ty))
}

// builtin "sadd_with_overflow_Int32"(%0 : $Builtin.Int32, ...) : $(Builtin.Int32, Builtin.Int1)
fn builtin(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let name = p.expect_string()?;
    let (types, _) = p.parse_substitution_types()?;

    p.expect_next_to_be(TokenKind::OpenParen, "'('")?;
    let args = p.typed_values_until(ctx, TokenKind::CloseParen)?;
    p.expect_next_to_be(TokenKind::CloseParen, "')'")?;

    colon(p)?;
    let result = p.parse_sil_type()?;

    let subs = types
        .into_iter()
        .map(|replacement| Substitution {
            replacement,
            conformances: Vec::new(),
        })
        .collect();

    Ok(ParsedInst::single(
        InstKind::Builtin {
            name: name.as_str().into(),
            subs,
        },
        args,
        result,
    ))
}

/* Allocation */

fn alloc_stack(p: &mut Parser<'_, '_>, _: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let ty = p.parse_sil_type()?;
    let var = debug_var(p)?;
    Ok(ParsedInst::single(InstKind::AllocStack(var), Vec::new(), ty.address_type()))
}

fn alloc_box(p: &mut Parser<'_, '_>, _: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let span = p.peek_span();
    let ty = p.parse_sil_type()?;

    if ty.ty.box_type().is_none() {
        report!(p, span, InvalidOperandType, "alloc_box needs a box type, found {ty}");
        return Err(ParseError);
    }

    let var = debug_var(p)?;
    Ok(ParsedInst::single(InstKind::AllocBox(var), Vec::new(), ty))
}

// alloc_ref [stack] [tail_elems $Builtin.Int8 * %0 : $Builtin.Word] $C
fn alloc_ref(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let start = p.peek_span();
    let mut objc = false;
    let mut on_stack = false;
    let mut tail_types = Vec::new();
    let mut operands = Vec::new();

    while p.eat(TokenKind::OpenBracket) {
        let (word, span) = p.expect_name("'objc', 'stack' or 'tail_elems'")?;

        match word.value() {
            "objc" => objc = true,
            "stack" => on_stack = true,
            "tail_elems" => {
                tail_types.push(p.parse_sil_type()?);
                p.expect_next_to_be(TokenKind::Asterisk, "'*'")?;
                operands.push(p.typed_value(ctx)?);
            }
            other => {
                report!(p, span, UnknownAttribute, "unknown alloc_ref attribute '{other}'");
                return Err(ParseError);
            }
        }

        p.expect_next_to_be(TokenKind::CloseBracket, "']'")?;
    }

    if objc && !tail_types.is_empty() {
        report!(p, start, ObjcWithTailElements, "objc classes cannot have tail allocated elements");
        return Err(ParseError);
    }

    let dynamic = opcode == Opcode::AllocRefDynamic;
    if dynamic {
        operands.push(p.typed_value(ctx)?);
        comma(p)?;
    }

    let ty = p.parse_sil_type()?;

    Ok(ParsedInst::single(
        InstKind::AllocRef {
            dynamic,
            objc,
            on_stack,
            tail_types,
        },
        operands,
        ty,
    ))
}

fn dealloc_ref(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let on_stack = p.bracket_flag("stack");
    let operand = p.typed_value(ctx)?;
    Ok(ParsedInst::no_results(InstKind::DeallocRef { on_stack }, vec![operand]))
}

// alloc_value_buffer $T in %0 : $*Builtin.UnsafeValueBuffer
fn type_in_value(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let ty = p.parse_sil_type()?;
    p.expect_word("in")?;
    let operand = p.typed_value(ctx)?;

    let results = match opcode {
        Opcode::DeallocValueBuffer => Vec::new(),
        _ => vec![ty.address_type()],
    };

    Ok(ParsedInst::new(InstKind::WithType { opcode, ty }, vec![operand], results))
}

// ref_tail_addr %0 : $C, $Builtin.Int8
fn value_then_type(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let mut operands = vec![p.typed_value(ctx)?];
    comma(p)?;

    if opcode == Opcode::TailAddr {
        operands.push(p.typed_value(ctx)?);
        comma(p)?;
    }

    let ty = p.parse_sil_type()?;
    let results = match opcode {
        Opcode::DeallocExistentialBox => Vec::new(),
        _ => vec![ty.address_type()],
    };

    Ok(ParsedInst::new(InstKind::WithType { opcode, ty }, operands, results))
}

// bind_memory %0 : $Builtin.RawPointer, %1 : $Builtin.Word to $*T
fn bind_memory(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let base = p.typed_value(ctx)?;
    comma(p)?;
    let index = p.typed_value(ctx)?;
    p.expect_word("to")?;
    let ty = p.parse_sil_type()?;

    Ok(ParsedInst::no_results(InstKind::WithType { opcode, ty }, vec![base, index]))
}

// init_block_storage_header %0 : $*@block_storage F, invoke %1 : $G, type $B
fn init_block_storage_header(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let storage = p.typed_value(ctx)?;
    comma(p)?;
    p.expect_word("invoke")?;

    let invoke = p.value_name()?;
    let (types, span) = p.parse_substitution_types()?;
    colon(p)?;
    let invoke_ty = p.parse_sil_type()?;
    let generics = invoke_ty.ty.function_type().and_then(|f| f.generics.clone());
    let subs = p.build_substitutions(generics.as_ref(), types, span)?;
    let invoke = p.resolve_value(ctx, invoke, &invoke_ty);

    comma(p)?;
    p.expect_word("type")?;
    let result = p.parse_sil_type()?;

    Ok(ParsedInst::single(
        InstKind::InitBlockStorageHeader { subs },
        vec![storage, invoke],
        result,
    ))
}

/* Single operands */

fn no_results(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let span = p.peek_span();
    let operands = typed_list(p, ctx)?;

    match opcode {
        Opcode::DeallocStack | Opcode::DestroyAddr | Opcode::DeinitExistentialAddr => {
            require_address(p, ctx, operands[0], span);
        }
        Opcode::CondFail => {
            let ty = value_type(ctx, operands[0]);
            if ty.ty.builtin_integer_width() != Some(1) {
                report!(p, span, InvalidOperandType, "cond_fail needs a Builtin.Int1, found {ty}");
            }
        }
        _ => {}
    }

    Ok(ParsedInst::no_results(InstKind::Simple(opcode), operands))
}

fn no_operands(_: &mut Parser<'_, '_>, _: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    Ok(ParsedInst::no_results(InstKind::Simple(opcode), Vec::new()))
}

/// One typed operand whose type determines the single result
fn single_operand(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (operand, span) = spanned_value(p, ctx)?;
    let ty = value_type(ctx, operand);

    let result = match opcode {
        Opcode::LoadBorrow => require_address(p, ctx, operand, span).object_type(),
        Opcode::IsUnique | Opcode::IsUniqueOrPinned => {
            require_address(p, ctx, operand, span);
            SilType::object(Type::int(1))
        }
        Opcode::ProjectBlockStorage => match ty.ty.kind() {
            TypeKind::BlockStorage(inner) if ty.is_address() => SilType::address(inner.clone()),
            _ => {
                report!(p, span, InvalidOperandType, "{ty} is not the address of block storage");
                return Err(ParseError);
            }
        },
        Opcode::CopyUnownedValue => match ty.ty.kind() {
            TypeKind::ReferenceStorage { referent, .. } => SilType::object(referent.clone()),
            _ => {
                report!(p, span, InvalidOperandType, "{ty} is not a reference storage type");
                return Err(ParseError);
            }
        },
        _ => ty,
    };

    Ok(ParsedInst::single(InstKind::Simple(opcode), vec![operand], result))
}

// (%1, %2) = destructure_struct %0 : $S
fn destructure(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (operand, span) = spanned_value(p, ctx)?;
    let ty = require_object(p, ctx, operand, span);

    let fields = match opcode {
        Opcode::DestructureTuple => ty
            .ty
            .tuple_elements()
            .map(|elements| elements.iter().map(|e| e.ty.clone()).collect::<Vec<_>>()),
        _ => p
            .decls
            .nominal_of(&ty.ty)
            .filter(|decl| decl.kind == NominalKind::Struct)
            .map(|decl| {
                decl.fields
                    .iter()
                    .map(|(_, field)| field.substitute(ty.ty.nominal_args()))
                    .collect()
            }),
    };

    let Some(fields) = fields else {
        report!(p, span, InvalidOperandType, "{opcode} cannot take {ty} apart");
        return Err(ParseError);
    };

    Ok(ParsedInst::new(
        InstKind::Simple(opcode),
        vec![operand],
        fields.into_iter().map(SilType::object).collect(),
    ))
}

// index_addr %0 : $*T, %1 : $Builtin.Word
fn operand_pair(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let span = p.peek_span();
    let operands = typed_list(p, ctx)?;

    if operands.len() != 2 {
        report!(p, span, WrongArgumentCount, "{opcode} takes 2 operands, found {}", operands.len());
        return Err(ParseError);
    }

    let result = match opcode {
        Opcode::RefToBridgeObject => SilType::object(Type::new(TypeKind::BuiltinBridgeObject)),
        Opcode::IndexRawPointer => SilType::object(Type::raw_pointer()),
        _ => require_address(p, ctx, operands[0], span),
    };

    Ok(ParsedInst::single(InstKind::Simple(opcode), operands, result))
}

// unchecked_ownership_conversion %0 : $C, @guaranteed to @owned
fn ownership_conversion(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let operand = p.typed_value(ctx)?;
    comma(p)?;
    let from = ownership_kind(p)?;
    p.expect_word("to")?;
    let to = ownership_kind(p)?;

    let ty = value_type(ctx, operand);
    Ok(ParsedInst::single(InstKind::OwnershipConversion { from, to }, vec![operand], ty))
}

fn ownership_kind(p: &mut Parser<'_, '_>) -> PResult<OwnershipKind> {
    let span = p.peek_span();
    let Some(name) = p.peek_attribute() else {
        return Err(p.expected("an ownership kind"));
    };

    match name.parse() {
        Ok(kind) => {
            p.lexer.next();
            Ok(kind)
        }
        Err(_) => {
            report!(p, span, UnsupportedOwnershipKind, "unknown ownership kind '@{name}'");
            Err(ParseError)
        }
    }
}

// strong_release [nonatomic] %0 : $C
fn ref_counting(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let atomic = !p.bracket_flag("nonatomic");
    let (operand, span) = spanned_value(p, ctx)?;

    if matches!(opcode, Opcode::RetainValueAddr | Opcode::ReleaseValueAddr) {
        require_address(p, ctx, operand, span);
    } else {
        require_object(p, ctx, operand, span);
    }

    let results = match opcode {
        Opcode::StrongPin => vec![SilType::object(Type::optional(Type::native_object()))],
        _ => Vec::new(),
    };

    Ok(ParsedInst::new(InstKind::RefCounting { opcode, atomic }, vec![operand], results))
}

// debug_value %0 : $Int, let, name "x", argno 1
fn debug_value(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (operand, span) = spanned_value(p, ctx)?;

    if opcode == Opcode::DebugValueAddr {
        require_address(p, ctx, operand, span);
    }

    let var = debug_var(p)?;
    Ok(ParsedInst::no_results(InstKind::DebugValue { opcode, var }, vec![operand]))
}

/* Memory */

// load [take] %0 : $*T
fn load(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let ownership = match p.bracket_word()? {
        Some((word, span)) => attribute::<LoadOwnership>(p, word, span, "load ownership")?,
        None => LoadOwnership::Unqualified,
    };

    let (address, span) = spanned_value(p, ctx)?;
    let ty = require_address(p, ctx, address, span);

    Ok(ParsedInst::single(InstKind::Load(ownership), vec![address], ty.object_type()))
}

// store %0 to [init] %1 : $*T
fn store(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let source = p.value_name()?;
    p.expect_word("to")?;

    let ownership = match opcode {
        Opcode::Store => match p.bracket_word()? {
            Some((word, span)) => attribute::<StoreOwnership>(p, word, span, "store ownership")?,
            None => StoreOwnership::Unqualified,
        },
        _ => StoreOwnership::Unqualified,
    };

    let (dest, span) = spanned_value(p, ctx)?;
    let dest_ty = require_address(p, ctx, dest, span);
    let source = p.resolve_value(ctx, source, &dest_ty.object_type());

    let kind = match opcode {
        Opcode::Store => InstKind::Store(ownership),
        _ => InstKind::Simple(opcode),
    };

    Ok(ParsedInst::no_results(kind, vec![source, dest]))
}

fn reference_storage_referent(p: &mut Parser<'_, '_>, ty: &SilType, span: Span) -> PResult<Type> {
    match ty.ty.kind() {
        TypeKind::ReferenceStorage { referent, .. } if ty.is_address() => Ok(referent.clone()),
        _ => {
            report!(p, span, InvalidOperandType, "{ty} is not the address of a reference storage type");
            Err(ParseError)
        }
    }
}

// load_weak [take] %0 : $*@sil_weak Optional<C>
fn load_reference(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let take = p.bracket_flag("take");
    let (address, span) = spanned_value(p, ctx)?;
    let ty = value_type(ctx, address);
    let referent = reference_storage_referent(p, &ty, span)?;

    Ok(ParsedInst::single(
        InstKind::LoadReference { opcode, take },
        vec![address],
        SilType::object(referent),
    ))
}

// store_weak %0 to [initialization] %1 : $*@sil_weak Optional<C>
fn store_reference(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let source = p.value_name()?;
    p.expect_word("to")?;
    let initialization = p.bracket_flag("initialization");

    let (dest, span) = spanned_value(p, ctx)?;
    let dest_ty = value_type(ctx, dest);
    let referent = reference_storage_referent(p, &dest_ty, span)?;
    let source = p.resolve_value(ctx, source, &SilType::object(referent));

    Ok(ParsedInst::no_results(
        InstKind::StoreReference {
            opcode,
            initialization,
        },
        vec![source, dest],
    ))
}

// copy_addr [take] %0 to [initialization] %1 : $*T
fn copy_addr(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let take = p.bracket_flag("take");
    let source = p.value_name()?;
    p.expect_word("to")?;
    let initialization = p.bracket_flag("initialization");

    let (dest, span) = spanned_value(p, ctx)?;
    let dest_ty = require_address(p, ctx, dest, span);
    let source = p.resolve_value(ctx, source, &dest_ty);

    Ok(ParsedInst::no_results(
        InstKind::CopyAddr {
            take,
            initialization,
        },
        vec![source, dest],
    ))
}

// end_borrow %1 from %0 : $C, $*C
fn end_borrow(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let borrowed = p.value_name()?;
    p.expect_word("from")?;
    let original = p.value_name()?;
    colon(p)?;
    let borrowed_ty = p.parse_sil_type()?;
    comma(p)?;
    let original_ty = p.parse_sil_type()?;

    let borrowed = p.resolve_value(ctx, borrowed, &borrowed_ty);
    let original = p.resolve_value(ctx, original, &original_ty);
    Ok(ParsedInst::no_results(InstKind::Simple(opcode), vec![borrowed, original]))
}

fn mark_dependence(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let value = p.typed_value(ctx)?;
    p.expect_word("on")?;
    let base = p.typed_value(ctx)?;

    let ty = value_type(ctx, value);
    Ok(ParsedInst::single(InstKind::Simple(opcode), vec![value, base], ty))
}

// mark_uninitialized [rootself] %0 : $*S
fn mark_uninitialized(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let Some((word, span)) = p.bracket_word()? else {
        return Err(p.expected("a mark_uninitialized kind"));
    };
    let kind = attribute::<MarkUninitializedKind>(p, word, span, "mark_uninitialized kind")?;

    let operand = p.typed_value(ctx)?;
    let ty = value_type(ctx, operand);
    Ok(ParsedInst::single(InstKind::MarkUninitialized(kind), vec![operand], ty))
}

// mark_uninitialized_behavior %i<T>(%s) : $F, %set<T>(%self) : $G
fn mark_uninitialized_behavior(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let (init, init_subs, storage) = behavior_call(p, ctx)?;
    comma(p)?;
    let (setter, setter_subs, self_value) = behavior_call(p, ctx)?;

    let ty = value_type(ctx, storage);
    Ok(ParsedInst::single(
        InstKind::MarkUninitializedBehavior {
            init_subs,
            setter_subs,
        },
        vec![init, storage, setter, self_value],
        ty,
    ))
}

fn behavior_call(
    p: &mut Parser<'_, '_>,
    ctx: &mut BodyContext,
) -> PResult<(ValueId, Vec<Substitution>, ValueId)> {
    let callee = p.value_name()?;
    let (types, span) = p.parse_substitution_types()?;

    p.expect_next_to_be(TokenKind::OpenParen, "'('")?;
    let argument = p.value_name()?;
    let argument = p.defined_value(ctx, argument)?;
    p.expect_next_to_be(TokenKind::CloseParen, "')'")?;

    colon(p)?;
    let ty = p.parse_sil_type()?;
    let generics = ty.ty.function_type().and_then(|f| f.generics.clone());
    let subs = p.build_substitutions(generics.as_ref(), types, span)?;
    let callee = p.resolve_value(ctx, callee, &ty);

    Ok((callee, subs, argument))
}

// begin_access [modify] [dynamic] [abort] %0 : $*T
fn access(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let start = p.peek_span();
    let mut kind = None;
    let mut enforcement = None;
    let mut aborting = false;

    while let Some((word, span)) = p.bracket_word()? {
        if let Ok(parsed) = word.parse::<AccessKind>() {
            kind = Some(parsed);
        } else if let Ok(parsed) = word.parse::<AccessEnforcement>() {
            enforcement = Some(parsed);
        } else if word == "abort" {
            aborting = true;
        } else {
            report!(p, span, UnknownAttribute, "unknown access attribute '{word}'");
            return Err(ParseError);
        }
    }

    let begins = matches!(opcode, Opcode::BeginAccess | Opcode::BeginUnpairedAccess);
    let needs_enforcement = opcode != Opcode::EndAccess;

    if (begins && kind.is_none()) || (needs_enforcement && enforcement.is_none()) {
        report!(p, start, MissingAccessAttribute, "{opcode} needs an access kind and enforcement");
        return Err(ParseError);
    }

    let operands = typed_list(p, ctx)?;
    let results = match opcode {
        Opcode::BeginAccess => vec![value_type(ctx, operands[0])],
        _ => Vec::new(),
    };

    Ok(ParsedInst::new(
        InstKind::Access {
            opcode,
            kind,
            enforcement,
            aborting,
        },
        operands,
        results,
    ))
}

/* Conversions and casts */

// upcast %0 : $D to $C
fn conversion(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (operand, span) = spanned_value(p, ctx)?;
    p.expect_word("to")?;
    let ty = p.parse_sil_type()?;
    let source = value_type(ctx, operand);

    match opcode {
        Opcode::Upcast => {
            let (from, to) = match (source.ty.metatype_instance(), ty.ty.metatype_instance()) {
                (Some(from), Some(to)) => (from.clone(), to.clone()),
                _ => (source.ty.clone(), ty.ty.clone()),
            };

            if p.decls.is_class(&from) && p.decls.is_class(&to) && !p.decls.is_same_or_subclass(&from, &to) {
                report!(p, span, InvalidOperandType, "{from} is not a subclass of {to}");
            }
        }
        Opcode::UncheckedAddrCast => {
            require_address(p, ctx, operand, span);
            if !ty.is_address() {
                report!(p, span, NotAnAddress, "unchecked_addr_cast to non-address {ty}");
                return Err(ParseError);
            }
        }
        Opcode::AddressToPointer => {
            require_address(p, ctx, operand, span);
        }
        _ => {}
    }

    Ok(ParsedInst::single(InstKind::Conversion(opcode), vec![operand], ty))
}

// pointer_to_address %0 : $Builtin.RawPointer to [strict] $*T
fn pointer_to_address(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let operand = p.typed_value(ctx)?;
    p.expect_word("to")?;
    let strict = p.bracket_flag("strict");
    let invariant = p.bracket_flag("invariant");

    let span = p.peek_span();
    let ty = p.parse_sil_type()?;
    if !ty.is_address() {
        report!(p, span, NotAnAddress, "pointer_to_address produces an address, found {ty}");
        return Err(ParseError);
    }

    Ok(ParsedInst::single(InstKind::PointerToAddress { strict, invariant }, vec![operand], ty))
}

/// `S in %0 : $*S` of the address casts
fn cast_side(p: &mut Parser<'_, '_>, ctx: &mut BodyContext) -> PResult<(Type, ValueId)> {
    let ty = p.parse_formal_type()?;
    p.expect_word("in")?;
    let (address, span) = spanned_value(p, ctx)?;
    require_address(p, ctx, address, span);
    Ok((ty, address))
}

// unconditional_checked_cast_addr P in %0 : $*P to C in %1 : $*C
fn cast_addr(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (source, src) = cast_side(p, ctx)?;
    p.expect_word("to")?;
    let (target, dest) = cast_side(p, ctx)?;

    Ok(ParsedInst::no_results(InstKind::CastAddr { opcode, source, target }, vec![src, dest]))
}

// checked_cast_br [exact] %0 : $C to $D, bb1, bb2
fn checked_cast_br(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let exact = opcode == Opcode::CheckedCastBr && p.bracket_flag("exact");
    let operand = p.typed_value(ctx)?;
    p.expect_word("to")?;
    let target = p.parse_sil_type()?;
    comma(p)?;
    let success = p.block_ref(ctx)?;
    comma(p)?;
    let failure = p.block_ref(ctx)?;

    let kind = match opcode {
        Opcode::CheckedCastBr => InstKind::CheckedCastBr {
            exact,
            target,
            success,
            failure,
        },
        _ => InstKind::CheckedCastValueBr {
            target,
            success,
            failure,
        },
    };

    Ok(ParsedInst::no_results(kind, vec![operand]))
}

// checked_cast_addr_br take_always P in %0 : $*P to C in %1 : $*C, bb1, bb2
fn checked_cast_addr_br(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let (word, span) = p.expect_name("a cast consumption kind")?;
    let consumption = attribute::<CastConsumptionKind>(p, word.value(), span, "cast consumption kind")?;

    let (source, src) = cast_side(p, ctx)?;
    p.expect_word("to")?;
    let (target, dest) = cast_side(p, ctx)?;
    comma(p)?;
    let success = p.block_ref(ctx)?;
    comma(p)?;
    let failure = p.block_ref(ctx)?;

    Ok(ParsedInst::no_results(
        InstKind::CheckedCastAddrBr {
            consumption,
            source,
            target,
            success,
            failure,
        },
        vec![src, dest],
    ))
}

/* Existentials and metatypes */

// open_existential_addr immutable_access %0 : $*P to $*@opened("...") P
fn open_existential_addr(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let (word, span) = p.expect_name("an access kind")?;
    let access = attribute::<OpenedExistentialAccess>(p, word.value(), span, "existential access")?;

    let (operand, span) = spanned_value(p, ctx)?;
    require_address(p, ctx, operand, span);
    p.expect_word("to")?;
    let ty = p.parse_sil_type()?;

    Ok(ParsedInst::single(InstKind::OpenExistentialAddr(access), vec![operand], ty))
}

fn init_existential(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let span = p.peek_span();

    // alloc_existential_box $Error, $MyError
    if opcode == Opcode::AllocExistentialBox {
        let result = p.parse_sil_type()?;
        comma(p)?;
        let concrete = p.parse_formal_type()?;
        let conformances = existential_conformances(p, &concrete, &result.ty, span);

        return Ok(ParsedInst::single(
            InstKind::InitExistential {
                opcode,
                concrete,
                conformances,
            },
            Vec::new(),
            result,
        ));
    }

    let operand = p.typed_value(ctx)?;
    let operand_ty = value_type(ctx, operand);

    let (concrete, existential, result) = match opcode {
        // init_existential_addr %0 : $*P, $C
        Opcode::InitExistentialAddr => {
            require_address(p, ctx, operand, span);
            comma(p)?;
            let concrete = p.parse_formal_type()?;
            let result = SilType::address(concrete.clone());
            (concrete, operand_ty.ty, result)
        }
        // init_existential_value %0 : $C, $C, $P
        Opcode::InitExistentialValue => {
            comma(p)?;
            let concrete = p.parse_formal_type()?;
            comma(p)?;
            let result = p.parse_sil_type()?;
            (concrete, result.ty.clone(), result)
        }
        // init_existential_ref %0 : $C : $C, $P
        Opcode::InitExistentialRef => {
            colon(p)?;
            let concrete = p.parse_formal_type()?;
            comma(p)?;
            let result = p.parse_sil_type()?;
            (concrete, result.ty.clone(), result)
        }
        // init_existential_metatype %0 : $@thick C.Type, $@thick P.Type
        _ => {
            comma(p)?;
            let result = p.parse_sil_type()?;
            let (Some(instance), Some(existential)) =
                (operand_ty.ty.metatype_instance(), result.ty.metatype_instance())
            else {
                report!(p, span, InvalidOperandType, "init_existential_metatype needs metatypes");
                return Err(ParseError);
            };

            let conformances = existential_conformances(p, instance, existential, span);
            return Ok(ParsedInst::single(
                InstKind::InitExistential {
                    opcode,
                    concrete: operand_ty.ty.clone(),
                    conformances,
                },
                vec![operand],
                result,
            ));
        }
    };

    let conformances = existential_conformances(p, &concrete, &existential, span);
    Ok(ParsedInst::single(
        InstKind::InitExistential {
            opcode,
            concrete,
            conformances,
        },
        vec![operand],
        result,
    ))
}

fn metatype(p: &mut Parser<'_, '_>, _: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let span = p.peek_span();
    let ty = p.parse_sil_type()?;

    if !ty.ty.is_any_metatype() {
        report!(p, span, InvalidOperandType, "metatype needs a metatype type, found {ty}");
        return Err(ParseError);
    }

    Ok(ParsedInst::single(InstKind::Simple(opcode), Vec::new(), ty))
}

// value_metatype $@thick C.Type, %0 : $C
fn value_metatype(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let span = p.peek_span();
    let ty = p.parse_sil_type()?;

    if !ty.ty.is_any_metatype() {
        report!(p, span, InvalidOperandType, "{opcode} needs a metatype type, found {ty}");
        return Err(ParseError);
    }

    comma(p)?;
    let operand = p.typed_value(ctx)?;
    Ok(ParsedInst::single(InstKind::Simple(opcode), vec![operand], ty))
}

fn objc_protocol(p: &mut Parser<'_, '_>, _: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let protocol = p.parse_decl_ref(false)?;
    colon(p)?;
    let ty = p.parse_sil_type()?;
    Ok(ParsedInst::single(InstKind::ObjcProtocol(protocol), Vec::new(), ty))
}

/* Aggregates */

// tuple (%0 : $A, %1 : $B) or tuple $(a: A, b: B) (%0, %1)
fn tuple(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    if !p.peek_is(TokenKind::Dollar) {
        p.expect_next_to_be(TokenKind::OpenParen, "'(' or a tuple type")?;
        let operands = p.typed_values_until(ctx, TokenKind::CloseParen)?;
        p.expect_next_to_be(TokenKind::CloseParen, "')'")?;

        let ty = Type::tuple(operands.iter().map(|v| value_type(ctx, *v).ty));
        return Ok(ParsedInst::single(InstKind::Simple(opcode), operands, SilType::object(ty)));
    }

    let span = p.peek_span();
    let ty = p.parse_sil_type()?;
    let Some(elements) = ty.ty.tuple_elements().map(<[_]>::to_vec) else {
        report!(p, span, InvalidOperandType, "{ty} is not a tuple type");
        return Err(ParseError);
    };

    let names = value_names_in_parens(p)?;
    if names.len() != elements.len() {
        report!(
            p,
            span,
            TupleElementCountMismatch,
            "{ty} has {} elements but {} values were given",
            elements.len(),
            names.len()
        );
        return Err(ParseError);
    }

    let operands = names
        .into_iter()
        .zip(elements)
        .map(|(name, element)| p.resolve_value(ctx, name, &SilType::object(element.ty)))
        .collect();

    Ok(ParsedInst::single(InstKind::Simple(opcode), operands, ty))
}

// tuple_extract %0 : $(A, B), 1 and project_box %0 : ${ var T }, 0
fn field_index(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (operand, span) = spanned_value(p, ctx)?;
    comma(p)?;
    let index_span = p.peek_span();
    let index = p.expect_u32()?;

    let ty = match opcode {
        Opcode::TupleElementAddr => require_address(p, ctx, operand, span),
        _ => require_object(p, ctx, operand, span),
    };

    let field = match opcode {
        Opcode::ProjectBox => ty.ty.box_type().map(|b| b.field_type(index as usize)),
        _ => ty
            .ty
            .tuple_elements()
            .map(|elements| elements.get(index as usize).map(|e| e.ty.clone())),
    };

    let field = match field {
        Some(Some(field)) => field,
        Some(None) => {
            report!(p, index_span, FieldIndexOutOfRange, "{ty} has no element {index}");
            return Err(ParseError);
        }
        None => {
            report!(p, span, InvalidOperandType, "{opcode} cannot project from {ty}");
            return Err(ParseError);
        }
    };

    let result = match opcode {
        Opcode::TupleExtract => SilType::object(field),
        _ => SilType::address(field),
    };

    Ok(ParsedInst::single(InstKind::FieldIndex { opcode, index }, vec![operand], result))
}

// struct $S (%0 : $A, %1 : $B)
fn struct_inst(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let span = p.peek_span();
    let ty = p.parse_sil_type()?;

    p.expect_next_to_be(TokenKind::OpenParen, "'('")?;
    let operands = p.typed_values_until(ctx, TokenKind::CloseParen)?;
    p.expect_next_to_be(TokenKind::CloseParen, "')'")?;

    let fields = p
        .decls
        .nominal_of(&ty.ty)
        .map(|decl| (decl.kind, decl.fields.len()));

    match fields {
        Some((NominalKind::Struct, count)) if count != operands.len() => {
            report!(
                p,
                span,
                WrongArgumentCount,
                "{ty} has {count} stored properties but {} values were given",
                operands.len()
            );
        }
        Some((NominalKind::Struct, _)) => {}
        _ => {
            report!(p, span, InvalidOperandType, "{ty} is not a struct type");
        }
    }

    Ok(ParsedInst::single(InstKind::Simple(opcode), operands, ty))
}

// struct_extract %0 : $S, #S.x
fn field(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (operand, span) = spanned_value(p, ctx)?;
    comma(p)?;
    let field_span = p.peek_span();
    let field = p.parse_decl_ref(false)?;

    let ty = match opcode {
        Opcode::StructElementAddr => require_address(p, ctx, operand, span),
        _ => require_object(p, ctx, operand, span),
    };

    let field_ty = field.member().and_then(|member| p.decls.field_type(&ty.ty, member));
    let Some(field_ty) = field_ty else {
        report!(p, field_span, UnknownField, "{ty} has no stored property {field}");
        return Err(ParseError);
    };

    let result = match opcode {
        Opcode::StructExtract => SilType::object(field_ty),
        _ => SilType::address(field_ty),
    };

    Ok(ParsedInst::single(InstKind::Field { opcode, field }, vec![operand], result))
}

// object $C (%0 : $Int, [tail_elems] %1 : $Int, %2 : $Int)
fn object(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let ty = p.parse_sil_type()?;
    p.expect_next_to_be(TokenKind::OpenParen, "'('")?;

    let mut operands = Vec::new();
    let mut first_tail = None;

    while !p.peek_is(TokenKind::CloseParen) {
        if p.bracket_flag("tail_elems") {
            first_tail.get_or_insert(operands.len());
        }

        operands.push(p.typed_value(ctx)?);

        if !p.eat(TokenKind::Comma) {
            break;
        }
    }

    p.expect_next_to_be(TokenKind::CloseParen, "')'")?;

    let tail_count = first_tail.map_or(0, |first| operands.len() - first);
    Ok(ParsedInst::single(InstKind::Object { tail_count }, operands, ty))
}

// enum $Optional<Int>, #Optional.some!enumelt.1, %0 : $Int
fn enum_inst(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let ty = p.parse_sil_type()?;
    comma(p)?;
    let case_span = p.peek_span();
    let case = p.parse_decl_ref(false)?;
    let payload = case_payload(p, &ty.ty, &case, case_span);

    let mut operands = Vec::new();
    if more_operands(p) {
        p.lexer.next();
        let (value, span) = spanned_value(p, ctx)?;

        if payload == Some(None) {
            report!(p, span, InvalidOperandType, "{case} has no payload");
        }
        operands.push(value);
    } else if let Some(Some(payload)) = payload {
        report!(p, case_span, InvalidOperandType, "{case} needs a payload of type {payload}");
    }

    Ok(ParsedInst::single(InstKind::Enum(case), operands, ty))
}

// unchecked_enum_data %0 : $Optional<Int>, #Optional.some!enumelt.1
fn enum_data(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (operand, span) = spanned_value(p, ctx)?;
    comma(p)?;
    let case_span = p.peek_span();
    let case = p.parse_decl_ref(false)?;

    let ty = match opcode {
        Opcode::UncheckedEnumData => require_object(p, ctx, operand, span),
        _ => require_address(p, ctx, operand, span),
    };

    // Without the case there is no result type to build the instruction with
    let Some(payload) = case_payload(p, &ty.ty, &case, case_span) else {
        return Err(ParseError);
    };
    let kind = InstKind::EnumData { opcode, case };

    if opcode == Opcode::InjectEnumAddr {
        return Ok(ParsedInst::no_results(kind, vec![operand]));
    }

    let Some(payload) = payload else {
        report!(p, case_span, InvalidOperandType, "enum case without payload has no data");
        return Err(ParseError);
    };

    let result = match opcode {
        Opcode::UncheckedEnumData => SilType::object(payload),
        _ => SilType::address(payload),
    };

    Ok(ParsedInst::single(kind, vec![operand], result))
}

// select_enum %0 : $E, case #E.a!enumelt: %1, default %2 : $Int
fn select_enum(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (operand, span) = spanned_value(p, ctx)?;
    let enum_ty = value_type(ctx, operand).ty;

    let mut cases = Vec::new();
    let mut values = Vec::new();
    let mut default = None;

    while more_operands(p) {
        p.lexer.next();

        if p.eat_word("default") {
            default = Some(p.value_name()?);
            break;
        }

        p.expect_word("case")?;
        let case_span = p.peek_span();
        let case = p.parse_decl_ref(false)?;
        case_payload(p, &enum_ty, &case, case_span);
        colon(p)?;
        values.push(p.value_name()?);
        cases.push(case);
    }

    colon(p)?;
    let result = p.parse_sil_type()?;

    if default.is_none() && !covers_all_cases(p, &enum_ty, cases.iter()) {
        report!(p, span, MissingDefaultCase, "{opcode} does not cover every case of {enum_ty}");
        return Err(ParseError);
    }

    let mut operands = vec![operand];
    for value in values.into_iter().chain(default) {
        operands.push(p.resolve_value(ctx, value, &result));
    }

    Ok(ParsedInst::single(
        InstKind::SelectEnum {
            opcode,
            cases,
            has_default: default.is_some(),
        },
        operands,
        result,
    ))
}

// select_value %0 : $Int, case %1: %2, default %3 : $Int
fn select_value(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let (operand, span) = spanned_value(p, ctx)?;
    let operand_ty = value_type(ctx, operand);

    let mut pairs = Vec::new();
    let mut default = None;

    while more_operands(p) {
        p.lexer.next();

        if p.eat_word("default") {
            default = Some(p.value_name()?);
            break;
        }

        p.expect_word("case")?;
        let case = p.value_name()?;
        colon(p)?;
        pairs.push((case, p.value_name()?));
    }

    colon(p)?;
    let result = p.parse_sil_type()?;

    let Some(default) = default else {
        report!(p, span, MissingDefaultCase, "select_value needs a default");
        return Err(ParseError);
    };

    let mut operands = vec![operand];
    for (case, value) in pairs {
        operands.push(p.resolve_value(ctx, case, &operand_ty));
        operands.push(p.resolve_value(ctx, value, &result));
    }
    operands.push(p.resolve_value(ctx, default, &result));

    Ok(ParsedInst::single(InstKind::SelectValue { has_default: true }, operands, result))
}

/* Dispatch */

// class_method %0 : $C, #C.foo!1 : (C) -> () -> (), $@convention(method) (@guaranteed C) -> ()
fn method(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let operand = p.typed_value(ctx)?;
    comma(p)?;
    let member = p.parse_decl_ref(true)?;
    comma(p)?;
    let ty = p.parse_sil_type()?;

    Ok(ParsedInst::single(InstKind::Method { opcode, member }, vec![operand], ty))
}

// witness_method $T, #P.foo!1 : $@convention(witness_method: P) <Self where Self : P> (@in_guaranteed Self) -> ()
fn witness_method(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let lookup_span = p.peek_span();
    let lookup = p.parse_formal_type()?;
    comma(p)?;
    let member_span = p.peek_span();
    let member = p.parse_decl_ref(true)?;

    let mut operands = Vec::new();
    if more_operands(p) {
        p.lexer.next();
        operands.push(p.typed_value(ctx)?);
    }

    colon(p)?;
    let ty = p.parse_sil_type()?;

    let Some(protocol) = member.parent_name() else {
        report!(p, member_span, UnknownDecl, "{member} does not name a protocol requirement");
        return Err(ParseError);
    };

    let Some(conformance) = p.find_conformance(&lookup, protocol) else {
        report!(p, lookup_span, UnknownConformance, "{lookup} does not conform to {protocol}");
        return Err(ParseError);
    };

    Ok(ParsedInst::single(
        InstKind::WitnessMethod {
            lookup,
            member,
            conformance,
        },
        operands,
        ty,
    ))
}

/* Application */

// apply [nothrow] %0<T>(%1, %2) : $@convention(thin) <T> (@in T, Int) -> ()
fn apply(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let flag = match opcode {
        Opcode::PartialApply => p.bracket_flag("callee_guaranteed"),
        Opcode::TryApply => false,
        _ => p.bracket_flag("nothrow"),
    };

    let callee = p.value_name()?;
    let (types, subs_span) = p.parse_substitution_types()?;
    let args = value_names_in_parens(p)?;
    colon(p)?;
    let ty_span = p.peek_span();
    let ty = p.parse_sil_type()?;

    let Some(function) = ty.ty.function_type().cloned() else {
        report!(p, ty_span, NotAFunction, "{ty} is not a function type");
        return Err(ParseError);
    };

    let subs = p.build_substitutions(function.generics.as_ref(), types, subs_span)?;
    let substituted = if function.is_polymorphic() {
        function.substitute(&replacement_types(&subs))
    } else {
        (*function).clone()
    };

    if opcode != Opcode::PartialApply && function.is_coroutine() != (opcode == Opcode::BeginApply) {
        let expected = if function.is_coroutine() { "begin_apply" } else { "apply or try_apply" };
        report!(p, ty_span, InvalidCoroutineKind, "{ty} has to be called with {expected}");
        return Err(ParseError);
    }

    let arg_types = match opcode {
        Opcode::PartialApply if args.len() <= substituted.params.len() => substituted.params
            [substituted.params.len() - args.len()..]
            .iter()
            .map(SilParameter::sil_type)
            .collect(),
        Opcode::PartialApply => Vec::new(),
        _ => substituted.sil_argument_types(),
    };

    let arity_ok = match opcode {
        Opcode::PartialApply => args.len() <= substituted.params.len(),
        _ => args.len() == arg_types.len(),
    };

    if !arity_ok {
        report!(
            p,
            subs_span,
            WrongArgumentCount,
            "{ty} takes {} arguments, found {}",
            substituted.sil_argument_count(),
            args.len()
        );
        return Err(ParseError);
    }

    let mut operands = vec![p.resolve_value(ctx, callee, &ty)];
    for (arg, arg_ty) in args.into_iter().zip(&arg_types) {
        operands.push(p.resolve_value(ctx, arg, arg_ty));
    }

    match opcode {
        Opcode::Apply => Ok(ParsedInst::single(
            InstKind::Apply { nothrow: flag, subs },
            operands,
            SilType::object(substituted.direct_result_type()),
        )),
        Opcode::BeginApply => {
            let results = substituted
                .yields
                .iter()
                .map(SilParameter::sil_type)
                .chain(iter::once(SilType::object(Type::sil_token())))
                .collect();

            Ok(ParsedInst::new(InstKind::BeginApply { nothrow: flag, subs }, operands, results))
        }
        Opcode::PartialApply => {
            let callee_convention = if flag {
                ParameterConvention::DirectGuaranteed
            } else {
                ParameterConvention::DirectOwned
            };
            let applied = operands.len() - 1;
            let closure = substituted.partially_applied(applied, callee_convention);

            Ok(ParsedInst::single(
                InstKind::PartialApply {
                    callee_guaranteed: flag,
                    subs,
                },
                operands,
                SilType::object(Type::function(closure)),
            ))
        }
        _ => {
            comma(p)?;
            p.expect_word("normal")?;
            let normal = p.block_ref(ctx)?;
            comma(p)?;
            p.expect_word("error")?;
            let error = p.block_ref(ctx)?;

            Ok(ParsedInst::no_results(InstKind::TryApply { subs, normal, error }, operands))
        }
    }
}

// end_apply %token
fn end_coroutine(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let span = p.peek_span();
    let token = p.value_name()?;
    let token = p.defined_value(ctx, token)?;

    let ty = value_type(ctx, token);
    if !matches!(ty.ty.kind(), TypeKind::BuiltinSilToken) {
        report!(p, span, InvalidOperandType, "{opcode} needs the token of a begin_apply, found {ty}");
    }

    Ok(ParsedInst::no_results(InstKind::Simple(opcode), vec![token]))
}

// keypath $KeyPath<S, Int>, (root $S; stored_property #S.x : $Int)
fn key_path(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let line = p.expect_peek("a key path type")?.line;
    let ty = p.parse_sil_type()?;
    comma(p)?;

    let generics = if p.peek_is(TokenKind::LessThan) {
        Some(p.parse_generic_signature()?)
    } else {
        None
    };

    let params = generics.as_ref().map(|g| g.params.clone()).unwrap_or_default();
    let (root, objc, components) = p.with_generic_scope(params, key_path_components)?;

    let (types, span) = p.parse_substitution_types()?;
    let subs = p.build_substitutions(generics.as_ref(), types, span)?;

    let mut operands = Vec::new();
    let operands_follow = p
        .lexer
        .peek()
        .is_some_and(|token| token.kind == TokenKind::OpenParen && token.line == line);

    if operands_follow {
        for name in value_names_in_parens(p)? {
            operands.push(p.defined_value(ctx, name)?);
        }
    }

    Ok(ParsedInst::single(
        InstKind::KeyPath {
            pattern: KeyPathPattern {
                generics,
                root,
                objc,
                components,
            },
            subs,
        },
        operands,
        ty,
    ))
}

type KeyPathParts = (Option<Type>, Option<String>, Vec<KeyPathComponent>);

fn key_path_components(p: &mut Parser<'_, '_>) -> PResult<KeyPathParts> {
    p.expect_next_to_be(TokenKind::OpenParen, "'('")?;

    let mut root = None;
    let mut objc = None;
    let mut components = Vec::new();

    loop {
        let (word, span) = p.expect_name("a key path component")?;

        match word.value() {
            "objc" => objc = Some(p.expect_string()?),
            "root" => root = Some(p.parse_formal_type()?),
            "stored_property" => {
                let property = p.parse_decl_ref(false)?;
                colon(p)?;
                let ty = p.parse_formal_type()?;
                components.push(KeyPathComponent::StoredProperty { property, ty });
            }
            "gettable_property" | "settable_property" => {
                let ty = p.parse_formal_type()?;
                comma(p)?;
                p.expect_word("id")?;
                let id = key_path_id(p)?;
                comma(p)?;
                p.expect_word("getter")?;
                let getter = accessor(p)?;

                let setter = if word.value() == "settable_property" {
                    comma(p)?;
                    p.expect_word("setter")?;
                    Some(accessor(p)?)
                } else {
                    None
                };

                components.push(KeyPathComponent::ComputedProperty {
                    ty,
                    id,
                    getter,
                    setter,
                });
            }
            "optional_chain" | "optional_force" | "optional_wrap" => {
                colon(p)?;
                let ty = p.parse_formal_type()?;
                components.push(match word.value() {
                    "optional_chain" => KeyPathComponent::OptionalChain(ty),
                    "optional_force" => KeyPathComponent::OptionalForce(ty),
                    _ => KeyPathComponent::OptionalWrap(ty),
                });
            }
            other => {
                report!(p, span, UnknownAttribute, "unknown key path component '{other}'");
                return Err(ParseError);
            }
        }

        if !p.eat(TokenKind::Semicolon) {
            break;
        }
    }

    p.expect_next_to_be(TokenKind::CloseParen, "')'")?;
    Ok((root, objc, components))
}

fn key_path_id(p: &mut Parser<'_, '_>) -> PResult<KeyPathComponentId> {
    if p.peek_is(TokenKind::GlobalName) {
        let (name, ty) = accessor(p)?;
        return Ok(KeyPathComponentId::Function(name, ty));
    }

    if p.peek_is(TokenKind::Hash) && p.peek_nth_is(1, TokenKind::Hash) {
        p.lexer.next();
        return Ok(KeyPathComponentId::Property(p.parse_decl_ref(false)?));
    }

    Ok(KeyPathComponentId::Decl(p.parse_decl_ref(false)?))
}

// @getter : $@convention(thin) (@in S) -> @out Int
fn accessor(p: &mut Parser<'_, '_>) -> PResult<(InternedSymbol, SilType)> {
    let (name, _) = p.expect_global_name("an accessor function")?;
    colon(p)?;
    let ty = p.parse_sil_type()?;
    Ok((name, ty))
}

/* Terminators */

fn br(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let (dest, args) = p.destination(ctx)?;
    Ok(ParsedInst::no_results(InstKind::Br(dest), args))
}

// cond_br %0, bb1(%1 : $Int), bb2
fn cond_br(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let condition = p.value_name()?;
    let condition = p.resolve_value(ctx, condition, &SilType::object(Type::int(1)));
    comma(p)?;
    let (true_dest, true_args) = p.destination(ctx)?;
    comma(p)?;
    let (false_dest, false_args) = p.destination(ctx)?;

    let true_arg_count = true_args.len();
    let operands = iter::once(condition).chain(true_args).chain(false_args).collect();

    Ok(ParsedInst::no_results(
        InstKind::CondBr {
            true_dest,
            false_dest,
            true_arg_count,
        },
        operands,
    ))
}

// switch_value %0 : $Builtin.Int32, case %1: bb1, default bb2
fn switch_value(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let operand = p.typed_value(ctx)?;
    let operand_ty = value_type(ctx, operand);

    let mut operands = vec![operand];
    let mut cases = Vec::new();
    let mut default = None;

    while more_operands(p) {
        p.lexer.next();

        if p.eat_word("default") {
            default = Some(p.block_ref(ctx)?);
            break;
        }

        p.expect_word("case")?;
        let value = p.value_name()?;
        operands.push(p.resolve_value(ctx, value, &operand_ty));
        colon(p)?;
        cases.push(p.block_ref(ctx)?);
    }

    Ok(ParsedInst::no_results(InstKind::SwitchValue { cases, default }, operands))
}

// switch_enum %0 : $Optional<C>, case #Optional.some!enumelt.1: bb1, default bb2
fn switch_enum(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, opcode: Opcode) -> PResult<ParsedInst> {
    let (operand, span) = spanned_value(p, ctx)?;

    let enum_ty = match opcode {
        Opcode::SwitchEnumAddr => require_address(p, ctx, operand, span).ty,
        _ => require_object(p, ctx, operand, span).ty,
    };

    let mut cases = Vec::new();
    let mut default = None;

    while more_operands(p) {
        p.lexer.next();

        if p.eat_word("default") {
            default = Some(p.block_ref(ctx)?);
            break;
        }

        p.expect_word("case")?;
        let case_span = p.peek_span();
        let case = p.parse_decl_ref(false)?;
        case_payload(p, &enum_ty, &case, case_span);
        colon(p)?;
        cases.push((case, p.block_ref(ctx)?));
    }

    if default.is_none() && !covers_all_cases(p, &enum_ty, cases.iter().map(|(case, _)| case)) {
        report!(p, span, MissingDefaultCase, "{opcode} does not cover every case of {enum_ty}");
        return Err(ParseError);
    }

    Ok(ParsedInst::no_results(
        InstKind::SwitchEnum {
            opcode,
            cases,
            default,
        },
        vec![operand],
    ))
}

// dynamic_method_br %0 : $Builtin.UnknownObject, #X.foo!1.foreign, bb1, bb2
fn dynamic_method_br(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let operand = p.typed_value(ctx)?;
    comma(p)?;
    let member = p.parse_decl_ref(false)?;
    comma(p)?;
    let has_method = p.block_ref(ctx)?;
    comma(p)?;
    let no_method = p.block_ref(ctx)?;

    Ok(ParsedInst::no_results(
        InstKind::DynamicMethodBr {
            member,
            has_method,
            no_method,
        },
        vec![operand],
    ))
}

// yield (%0 : $*T, %1 : $Int), resume bb1, unwind bb2
fn yield_inst(p: &mut Parser<'_, '_>, ctx: &mut BodyContext, _: Opcode) -> PResult<ParsedInst> {
    let operands = if p.eat(TokenKind::OpenParen) {
        let values = p.typed_values_until(ctx, TokenKind::CloseParen)?;
        p.expect_next_to_be(TokenKind::CloseParen, "')'")?;
        values
    } else {
        vec![p.typed_value(ctx)?]
    };

    comma(p)?;
    p.expect_word("resume")?;
    let resume = p.block_ref(ctx)?;
    comma(p)?;
    p.expect_word("unwind")?;
    let unwind = p.block_ref(ctx)?;

    Ok(ParsedInst::no_results(InstKind::Yield { resume, unwind }, operands))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use strum::IntoEnumIterator;

    use super::HANDLERS;
    use crate::{
        config::ParserOptions,
        diagnostics::DiagnosticKind,
        oracle::{DeclTable, NominalDecl, NominalKind},
        parse::{parse_source, ParseResult},
        sil::{
            instruction::{InstKind, Opcode},
            printer::print_module_plain,
            types::Type,
        },
        source::SourceFile,
    };

    fn decls() -> DeclTable {
        let mut decls = DeclTable::with_standard_library();

        decls.insert(NominalDecl::new("P", NominalKind::Protocol));
        decls.insert(NominalDecl {
            protocols: vec!["P".into()],
            fields: vec![("x".into(), Type::int(64))],
            ..NominalDecl::new("C", NominalKind::Class)
        });
        decls.insert(NominalDecl {
            superclass: Some(Type::nominal("C", Vec::new())),
            ..NominalDecl::new("D", NominalKind::Class)
        });
        decls.insert(NominalDecl {
            fields: vec![("a".into(), Type::int(32)), ("b".into(), Type::int(1))],
            protocols: vec!["P".into()],
            ..NominalDecl::new("S", NominalKind::Struct)
        });
        decls.insert(NominalDecl {
            cases: vec![("red".into(), None), ("green".into(), Some(Type::int(8)))],
            ..NominalDecl::new("E", NominalKind::Enum)
        });
        decls.insert(NominalDecl {
            generic_params: vec!["Root".into(), "Value".into()],
            ..NominalDecl::new("KeyPath", NominalKind::Class)
        });

        decls
    }

    fn parse(text: &str) -> ParseResult {
        let source = SourceFile::from_memory(text);
        let mut decls = decls();
        parse_source(&source, &mut decls, ParserOptions::default(), None)
    }

    fn assert_clean(parsed: &ParseResult) {
        assert_eq!(parsed.diagnostics.error_count(), 0, "{:?}", parsed.diagnostics.kinds());
    }

    /// Every block label and instruction of the fixture survives printing
    /// unchanged, and printing is a fixed point
    fn assert_round_trip(text: &str) {
        let parsed = parse(text);
        assert_clean(&parsed);
        let printed = print_module_plain(&parsed.module);

        for line in text.lines().filter(|line| line.starts_with("  ") || line.starts_with("bb")) {
            assert!(printed.contains(line), "missing line {line:?} in:\n{printed}");
        }

        let reparsed = parse(&printed);
        assert_clean(&reparsed);
        assert_eq!(print_module_plain(&reparsed.module), printed);
    }

    fn with_body(inst: &str) -> String {
        format!("sil @f : $@convention(thin) (@owned C) -> () {{\nbb0(%0 : $C):\n  {inst}\n  unreachable\n}}\n")
    }

    #[test]
    fn every_opcode_has_a_grammar() {
        for opcode in Opcode::iter() {
            assert!(HANDLERS.contains_key(&opcode), "{opcode} has no operand grammar");
        }
    }

    #[test]
    fn literal_widths() {
        assert!(super::fits_in_width(255, 8));
        assert!(super::fits_in_width(-128, 8));
        assert!(!super::fits_in_width(256, 8));
        assert!(!super::fits_in_width(-129, 8));
        assert!(super::fits_in_width(-1, 1));
        assert!(super::fits_in_width(i128::MIN, 128));
    }

    #[test]
    fn literals_and_references_round_trip() {
        assert_round_trip(indoc! {r#"
            sil @callee : $@convention(thin) (Builtin.Int32) -> Builtin.Int32

            sil @f : $@convention(thin) () -> Builtin.Int32 {
            bb0:
              %0 = integer_literal $Builtin.Int32, -7
              %1 = float_literal $Builtin.FPIEEE64, 0x3FF0000000000000
              %2 = string_literal utf8 "hi\n"
              %3 = function_ref @callee : $@convention(thin) (Builtin.Int32) -> Builtin.Int32
              %4 = apply %3(%0) : $@convention(thin) (Builtin.Int32) -> Builtin.Int32
              %5 = builtin "sadd_with_overflow_Int32"(%4 : $Builtin.Int32, %0 : $Builtin.Int32) : $(Builtin.Int32, Builtin.Int1)
              %6 = tuple_extract %5 : $(Builtin.Int32, Builtin.Int1), 0
              return %6 : $Builtin.Int32
            }
        "#});
    }

    #[test]
    fn memory_instructions_round_trip() {
        assert_round_trip(indoc! {r#"
            sil @f : $@convention(thin) (@in S, @owned C) -> () {
            bb0(%0 : $*S, %1 : $C):
              %2 = alloc_stack $S, var, name "s"
              copy_addr [take] %0 to [initialization] %2 : $*S
              %3 = struct_element_addr %2 : $*S, #S.a
              %4 = load %3 : $*Builtin.Int32
              store %4 to %3 : $*Builtin.Int32
              %5 = begin_access [modify] [static] %2 : $*S
              end_access %5 : $*S
              %6 = ref_element_addr %1 : $C, #C.x
              destroy_addr %2 : $*S
              dealloc_stack %2 : $*S
              strong_release [nonatomic] %1 : $C
              %7 = tuple ()
              return %7 : $()
            }
        "#});
    }

    #[test]
    fn aggregates_and_enums_round_trip() {
        assert_round_trip(indoc! {"
            sil @f : $@convention(thin) (Builtin.Int32, Builtin.Int1, E) -> Builtin.Int8 {
            bb0(%0 : $Builtin.Int32, %1 : $Builtin.Int1, %2 : $E):
              %3 = struct $S (%0 : $Builtin.Int32, %1 : $Builtin.Int1)
              %4 = struct_extract %3 : $S, #S.b
              %5 = tuple $(a: Builtin.Int32, b: Builtin.Int1) (%0, %4)
              %6 = integer_literal $Builtin.Int8, 3
              %7 = enum $E, #E.green!enumelt.1, %6 : $Builtin.Int8
              %8 = select_enum %2 : $E, case #E.red!enumelt: %6, default %6 : $Builtin.Int8
              switch_enum %7 : $E, case #E.red!enumelt: bb1, case #E.green!enumelt.1: bb2
            bb1:
              br bb3(%8 : $Builtin.Int8)
            bb2:
              %9 = unchecked_enum_data %7 : $E, #E.green!enumelt.1
              br bb3(%9 : $Builtin.Int8)
            bb3(%10 : $Builtin.Int8):
              return %10 : $Builtin.Int8
            }
        "});
    }

    #[test]
    fn casts_and_existentials_round_trip() {
        assert_round_trip(indoc! {r#"
            sil @f : $@convention(thin) (@owned D, @in P) -> () {
            bb0(%0 : $D, %1 : $*P):
              %2 = upcast %0 : $D to $C
              %3 = init_existential_ref %2 : $C : $C, $P
              %4 = alloc_stack $P
              %5 = init_existential_addr %4 : $*P, $S
              %6 = open_existential_addr immutable_access %1 : $*P to $*@opened("01234567-89AB-CDEF-0123-000000000000") P
              unconditional_checked_cast_addr P in %1 : $*P to S in %5 : $*S
              checked_cast_br [exact] %2 : $C to $D, bb1, bb2
            bb1(%7 : $D):
              br bb2
            bb2:
              dealloc_stack %4 : $*P
              %8 = tuple ()
              return %8 : $()
            }
        "#});
    }

    #[test]
    fn key_path_patterns_round_trip() {
        assert_round_trip(indoc! {"
            sil @get : $@convention(thin) (@in_guaranteed S) -> @out Builtin.Int32

            sil @f : $@convention(thin) () -> () {
            bb0:
              %0 = keypath $KeyPath<S, Builtin.Int32>, (root $S; stored_property #S.a : $Builtin.Int32)
              %1 = keypath $KeyPath<S, Builtin.Int32>, (root $S; gettable_property $Builtin.Int32, id @get : $@convention(thin) (@in_guaranteed S) -> @out Builtin.Int32, getter @get : $@convention(thin) (@in_guaranteed S) -> @out Builtin.Int32)
              %2 = tuple ()
              return %2 : $()
            }
        "});
    }

    #[test]
    fn partial_apply_produces_the_closure_type() {
        let parsed = parse(indoc! {"
            sil @callee : $@convention(thin) (Builtin.Int32, @owned C) -> ()

            sil @f : $@convention(thin) (@owned C) -> () {
            bb0(%0 : $C):
              %1 = function_ref @callee : $@convention(thin) (Builtin.Int32, @owned C) -> ()
              %2 = partial_apply [callee_guaranteed] %1(%0) : $@convention(thin) (Builtin.Int32, @owned C) -> ()
              %3 = tuple ()
              return %3 : $()
            }
        "});
        assert_clean(&parsed);

        let function = parsed.module.function_named("f").unwrap();
        let closure = function.body.all_insts()[1];
        assert!(matches!(
            function.body.kind(closure),
            InstKind::PartialApply { callee_guaranteed: true, .. }
        ));

        let result = function.body.single_result(closure).unwrap();
        let closure_type = function.body.value_type(result).ty.function_type().unwrap().clone();
        assert_eq!(closure_type.params.len(), 1);
        assert_eq!(closure_type.params[0].ty, Type::int(32));
        assert!(closure_type.is_thick());
    }

    #[test]
    fn generic_apply_checks_conformances() {
        let text = |replacement: &str| {
            format!(
                "sil @id : $@convention(thin) <T where T : P> (@in T) -> @out T\n\n\
                 sil @f : $@convention(thin) (@in {r}) -> @out {r} {{\n\
                 bb0(%0 : $*{r}, %1 : $*{r}):\n\
                 \x20 %2 = function_ref @id : $@convention(thin) <T where T : P> (@in T) -> @out T\n\
                 \x20 %3 = apply %2<{r}>(%0, %1) : $@convention(thin) <T where T : P> (@in T) -> @out T\n\
                 \x20 unreachable\n\
                 }}\n",
                r = replacement
            )
        };

        let parsed = parse(&text("S"));
        assert_clean(&parsed);
        let function = parsed.module.function_named("f").unwrap();
        let InstKind::Apply { subs, .. } = function.body.kind(function.body.all_insts()[1]) else {
            panic!("expected an apply");
        };
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].conformances.len(), 1);

        let parsed = parse(&text("E"));
        assert!(parsed.diagnostics.kinds().contains(&DiagnosticKind::SubstitutionMismatch));
    }

    #[test]
    fn operand_errors_are_diagnosed() {
        let cases = [
            ("%1 = integer_literal $Builtin.Int8, 300", DiagnosticKind::InvalidLiteral),
            ("%1 = integer_literal $S, 1", DiagnosticKind::InvalidOperandType),
            ("%1 = load %0 : $C", DiagnosticKind::NotAnAddress),
            ("%1 = ref_element_addr %0 : $C, #C.nope", DiagnosticKind::UnknownField),
            ("%1 = global_addr @missing : $*Builtin.Int32", DiagnosticKind::UndefinedGlobal),
            ("%1 = enum $E, #E.blue!enumelt", DiagnosticKind::UnknownEnumCase),
            ("%1 = tuple $(a: C, b: C) (%0)", DiagnosticKind::TupleElementCountMismatch),
            ("%1 = tuple_extract %0 : $C, 0", DiagnosticKind::InvalidOperandType),
            ("%1 = begin_access [read] %0 : $C", DiagnosticKind::MissingAccessAttribute),
            ("%1 = alloc_ref [objc] [tail_elems $C * %0 : $C] $C", DiagnosticKind::ObjcWithTailElements),
            ("%1 = alloc_stack $C, name \"x\", weird", DiagnosticKind::UnknownDebugVarAttribute),
            ("%1 = init_existential_ref %0 : $C : $C, $E", DiagnosticKind::InvalidOperandType),
            ("%1 = apply %0() : $C", DiagnosticKind::NotAFunction),
            ("%1 = unchecked_ownership_conversion %0 : $C, @borrowed to @owned", DiagnosticKind::UnsupportedOwnershipKind),
            ("%1 = struct $S (%0 : $C)", DiagnosticKind::WrongArgumentCount),
            ("%1 = index_addr %0 : $C", DiagnosticKind::WrongArgumentCount),
        ];

        for (inst, expected) in cases {
            let parsed = parse(&with_body(inst));
            assert!(
                parsed.diagnostics.kinds().contains(&expected),
                "{inst}: expected {expected:?}, found {:?}",
                parsed.diagnostics.kinds()
            );
        }
    }

    #[test]
    fn field_indices_are_bounds_checked() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) (Builtin.Int32, Builtin.Int1) -> () {
            bb0(%0 : $Builtin.Int32, %1 : $Builtin.Int1):
              %2 = tuple (%0 : $Builtin.Int32, %1 : $Builtin.Int1)
              %3 = tuple_extract %2 : $(Builtin.Int32, Builtin.Int1), 2
              unreachable
            }
        "});

        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::FieldIndexOutOfRange]);
    }

    #[test]
    fn switch_enum_without_default_must_be_exhaustive() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) (E) -> () {
            bb0(%0 : $E):
              switch_enum %0 : $E, case #E.red!enumelt: bb1
            bb1:
              unreachable
            }
        "});

        assert!(parsed.diagnostics.kinds().contains(&DiagnosticKind::MissingDefaultCase));
    }

    #[test]
    fn select_value_needs_a_default() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) (Builtin.Int32) -> () {
            bb0(%0 : $Builtin.Int32):
              %1 = select_value %0 : $Builtin.Int32, case %0: %0 : $Builtin.Int32
              unreachable
            }
        "});

        assert!(parsed.diagnostics.kinds().contains(&DiagnosticKind::MissingDefaultCase));
    }

    #[test]
    fn coroutines_need_begin_apply() {
        let parsed = parse(indoc! {"
            sil @co : $@yield_once @convention(thin) () -> (@yields @in_guaranteed S)

            sil @f : $@convention(thin) () -> () {
            bb0:
              %0 = function_ref @co : $@yield_once @convention(thin) () -> (@yields @in_guaranteed S)
              (%1, %2) = begin_apply %0() : $@yield_once @convention(thin) () -> (@yields @in_guaranteed S)
              end_apply %2
              %3 = apply %0() : $@yield_once @convention(thin) () -> (@yields @in_guaranteed S)
              unreachable
            }
        "});

        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::InvalidCoroutineKind]);

        let function = parsed.module.function_named("f").unwrap();
        let begin = function.body.all_insts()[1];
        assert_eq!(function.body.results(begin).len(), 2);
    }

    #[test]
    fn witness_method_finds_the_conformance() {
        let parsed = parse(indoc! {"
            sil @f : $@convention(thin) () -> () {
            bb0:
              %0 = witness_method $S, #P.run!1 : $@convention(witness_method: P) <Self where Self : P> (@in_guaranteed Self) -> ()
              %1 = witness_method $E, #P.run!1 : $@convention(witness_method: P) <Self where Self : P> (@in_guaranteed Self) -> ()
              unreachable
            }
        "});

        assert_eq!(parsed.diagnostics.kinds(), vec![DiagnosticKind::UnknownConformance]);

        let function = parsed.module.function_named("f").unwrap();
        let InstKind::WitnessMethod { conformance, .. } = function.body.kind(function.body.all_insts()[0]) else {
            panic!("expected witness_method");
        };
        assert!(conformance.is_concrete());
    }
}
