//! Cheap facts about integer and pointer values, derived by looking at how a
//! value was computed. Every query is conservative: when the definition
//! chain says nothing useful the answer is "unknown".

use crate::{
    config::InoutAliasingAssumption,
    oracle::ConstantFolder,
    sil::{
        function::{Body, InstId},
        instruction::{builtin_base_name, InstKind, Opcode},
        types::{ParameterConvention, SilFunctionType},
        value::ValueId,
    },
};

/// How far the queries follow definition chains. Chains only loop in
/// unreachable code, but the queries must terminate there too.
const RECURSION_LIMIT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsZero {
    Zero,
    NotZero,
    Unknown,
}

/// The builtin called by `inst`, without its type suffixes
fn builtin_name(body: &Body, inst: InstId) -> Option<&str> {
    match body.kind(inst) {
        InstKind::Builtin { name, .. } => Some(builtin_base_name(name.value())),
        _ => None,
    }
}

fn integer_literal(body: &Body, value: ValueId) -> Option<i128> {
    let definition = body.defining_inst(value)?;

    match body.kind(definition) {
        InstKind::IntegerLiteral(literal) => Some(*literal),
        _ => None,
    }
}

/* Zero */

/// Whether `value` is known to be zero, known not to be zero, or neither
pub fn is_zero_value(body: &Body, value: ValueId) -> IsZero {
    is_zero_at_depth(body, value, 0)
}

fn is_zero_at_depth(body: &Body, value: ValueId, depth: u32) -> IsZero {
    if depth > RECURSION_LIMIT {
        return IsZero::Unknown;
    }

    let Some(inst) = body.defining_inst(value) else {
        return IsZero::Unknown;
    };

    let operand_is_zero = |index: usize| {
        body.operand_value(inst, index)
            .map_or(IsZero::Unknown, |operand| is_zero_at_depth(body, operand, depth + 1))
    };

    match body.kind(inst) {
        InstKind::IntegerLiteral(literal) => {
            if *literal == 0 {
                IsZero::Zero
            } else {
                IsZero::NotZero
            }
        }
        InstKind::Conversion(Opcode::UncheckedTrivialBitCast)
        | InstKind::Field {
            opcode: Opcode::StructExtract,
            ..
        } => operand_is_zero(0),
        InstKind::Builtin { name, .. } => match builtin_base_name(name.value()) {
            "inttoptr" | "ptrtoint" | "zext" | "zextOrBitCast" => operand_is_zero(0),
            // Zero divided by anything is zero
            "udiv" | "sdiv" => match operand_is_zero(0) {
                IsZero::Zero => IsZero::Zero,
                _ => IsZero::Unknown,
            },
            "mul" | "smul_with_overflow" | "umul_with_overflow" => {
                if operand_is_zero(0) == IsZero::Zero || operand_is_zero(1) == IsZero::Zero {
                    IsZero::Zero
                } else {
                    IsZero::Unknown
                }
            }
            _ => IsZero::Unknown,
        },
        // The value half of an `*_with_overflow` result
        InstKind::FieldIndex {
            opcode: Opcode::TupleExtract,
            index: 0,
        } => {
            let Some(tuple) = body.operand_value(inst, 0) else {
                return IsZero::Unknown;
            };

            match body.defining_inst(tuple) {
                Some(producer) if body.opcode(producer) == Opcode::Builtin => {
                    is_zero_at_depth(body, tuple, depth + 1)
                }
                _ => IsZero::Unknown,
            }
        }
        kind => {
            let opcode = kind.opcode();
            if matches!(
                opcode,
                Opcode::StringLiteral | Opcode::ConstStringLiteral | Opcode::GlobalAddr
            ) || opcode.is_allocation()
            {
                IsZero::NotZero
            } else {
                IsZero::Unknown
            }
        }
    }
}

/* Sign bit */

/// The sign bit of an integer value, `None` when it cannot be determined
pub fn compute_sign_bit(body: &Body, value: ValueId) -> Option<bool> {
    sign_bit_at_depth(body, value, 0)
}

fn sign_bit_at_depth(body: &Body, value: ValueId, depth: u32) -> Option<bool> {
    if depth > RECURSION_LIMIT {
        return None;
    }

    let inst = body.defining_inst(value)?;
    let operand_sign = |index: usize| {
        body.operand_value(inst, index)
            .and_then(|operand| sign_bit_at_depth(body, operand, depth + 1))
    };

    match body.kind(inst) {
        InstKind::IntegerLiteral(literal) => Some(*literal < 0),
        InstKind::Conversion(Opcode::UncheckedTrivialBitCast) => operand_sign(0),
        InstKind::Builtin { .. } => {
            let name = builtin_name(body, inst)?;

            match name {
                "sizeof" | "strideof" | "strideof_nonzero" | "alignof" => Some(false),
                "and" => match (operand_sign(0), operand_sign(1)) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                },
                "or" => match (operand_sign(0), operand_sign(1)) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                },
                "xor" => match (operand_sign(0), operand_sign(1)) {
                    (Some(lhs), Some(rhs)) => Some(lhs != rhs),
                    _ => None,
                },
                "lshr" => {
                    let shifted_by_literal = body
                        .operand_value(inst, 1)
                        .and_then(|amount| integer_literal(body, amount))
                        .is_some_and(|amount| amount > 0);

                    // A logical shift by at least one clears the sign bit
                    if shifted_by_literal {
                        Some(false)
                    } else {
                        operand_sign(0)
                    }
                }
                "s_to_u_checked_conversion" | "u_to_s_checked_conversion" | "sext"
                | "sextOrBitCast" | "zextOrBitCast" | "inttoptr" | "ptrtoint" => operand_sign(0),
                "zext" => Some(false),
                _ => None,
            }
        }
        _ => None,
    }
}

/* Overflow */

/// Whether the arithmetic `inst` performs may overflow
pub fn can_overflow(body: &Body, inst: InstId, folder: &dyn ConstantFolder) -> bool {
    if folder.fold(body, inst).is_some() {
        return false;
    }

    !is_masked_truncation(body, inst)
}

/// A checked truncation of `and(x, mask)` where the mask already fits the
/// narrower type
fn is_masked_truncation(body: &Body, inst: InstId) -> bool {
    let Some(name) = builtin_name(body, inst) else {
        return false;
    };

    let signed_target = match name {
        "s_to_s_checked_trunc" | "u_to_s_checked_trunc" => true,
        "s_to_u_checked_trunc" | "u_to_u_checked_trunc" => false,
        _ => return false,
    };

    // Checked truncations produce `(value, overflow)`
    let Some(width) = body
        .single_result(inst)
        .and_then(|result| {
            body.value_type(result)
                .ty
                .tuple_elements()
                .and_then(|elements| elements.first())
                .and_then(|element| element.ty.builtin_integer_width())
        })
    else {
        return false;
    };

    let Some(masked) = body.operand_value(inst, 0) else {
        return false;
    };
    let Some(and) = body.defining_inst(masked) else {
        return false;
    };
    if builtin_name(body, and) != Some("and") {
        return false;
    }

    let available_bits = if signed_target { width.saturating_sub(1) } else { width };

    body.operand_values(and)
        .into_iter()
        .filter_map(|operand| integer_literal(body, operand))
        .any(|mask| mask >= 0 && bits_needed(mask) <= available_bits)
}

fn bits_needed(value: i128) -> u32 {
    128 - value.leading_zeros()
}

/* Underlying objects */

/// Follows projections and reference casts back to the object or address
/// they were derived from
pub fn strip_underlying_object(body: &Body, value: ValueId) -> ValueId {
    let mut current = value;

    for _ in 0..RECURSION_LIMIT * 4 {
        let Some(inst) = body.defining_inst(current) else {
            break;
        };

        let derived = match body.kind(inst) {
            InstKind::Conversion(opcode) => {
                opcode.is_ownership_forwarding_conversion() || *opcode == Opcode::UncheckedAddrCast
            }
            InstKind::Field { opcode, .. } => {
                matches!(opcode, Opcode::StructElementAddr | Opcode::StructExtract)
            }
            InstKind::FieldIndex { opcode, .. } => {
                matches!(opcode, Opcode::TupleElementAddr | Opcode::TupleExtract)
            }
            InstKind::EnumData { opcode, .. } => matches!(
                opcode,
                Opcode::UncheckedTakeEnumDataAddr
                    | Opcode::InitEnumDataAddr
                    | Opcode::UncheckedEnumData
            ),
            InstKind::Access {
                opcode: Opcode::BeginAccess,
                ..
            } => true,
            InstKind::Simple(opcode) => matches!(
                opcode,
                Opcode::IndexAddr
                    | Opcode::IndexRawPointer
                    | Opcode::MarkDependence
                    | Opcode::BeginBorrow
                    | Opcode::CopyValue
            ),
            _ => false,
        };

        if !derived {
            break;
        }

        let Some(operand) = body.operand_value(inst, 0) else {
            break;
        };
        current = operand;
    }

    current
}

/// Follows `struct_extract`, `tuple_extract` and `unchecked_enum_data` back
/// to the aggregate the value was taken out of
pub fn strip_value_projections(body: &Body, value: ValueId) -> ValueId {
    let mut current = value;

    for _ in 0..RECURSION_LIMIT * 4 {
        let Some(inst) = body.defining_inst(current) else {
            break;
        };

        let projection = matches!(
            body.opcode(inst),
            Opcode::StructExtract | Opcode::TupleExtract | Opcode::UncheckedEnumData
        );

        match body.operand_value(inst, 0) {
            Some(operand) if projection => current = operand,
            _ => break,
        }
    }

    current
}

/// Whether `value` refers to memory nothing outside the function can reach:
/// a local allocation, or an indirect argument which cannot alias
pub fn points_to_local_object(
    body: &Body,
    function_ty: &SilFunctionType,
    value: ValueId,
    inout_aliasing: InoutAliasingAssumption,
) -> bool {
    let object = strip_underlying_object(body, value);

    if let Some(inst) = body.defining_inst(object) {
        return body.opcode(inst).is_allocation();
    }

    let Some(index) = body.function_argument_index(object) else {
        return false;
    };

    let indirect_results = function_ty.indirect_results().count();
    if index < indirect_results {
        return true;
    }

    let Some(param) = function_ty.params.get(index - indirect_results) else {
        return false;
    };

    match param.convention {
        ParameterConvention::IndirectIn
        | ParameterConvention::IndirectInConstant
        | ParameterConvention::IndirectInGuaranteed => true,
        ParameterConvention::IndirectInout => {
            inout_aliasing == InoutAliasingAssumption::NotAliasing
        }
        ParameterConvention::IndirectInoutAliasable
        | ParameterConvention::DirectOwned
        | ParameterConvention::DirectUnowned
        | ParameterConvention::DirectGuaranteed => false,
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        oracle::LiteralFolder,
        opt::test_support::{find, parse_module},
    };

    #[test]
    fn returned_literal_is_not_zero() {
        let module = parse_module(indoc! {"
            sil @f : $@convention(thin) () -> Int32 {
            bb0:
              %0 = integer_literal $Builtin.Int32, 42
              return %0 : $Builtin.Int32
            }
        "});
        assert_eq!(module.functions.len(), 1);

        let body = &module.function_named("f").unwrap().body;
        assert_eq!(body.block_order.len(), 1);

        let insts = body.all_insts();
        assert_eq!(insts.len(), 2);
        assert_eq!(body.kind(insts[0]), &InstKind::IntegerLiteral(42));
        assert_eq!(body.opcode(insts[1]), Opcode::Return);

        let literal = body.single_result(insts[0]).unwrap();
        assert_eq!(body.value_type(literal).ty.to_string(), "Builtin.Int32");
        assert_eq!(is_zero_value(body, literal), IsZero::NotZero);
    }

    #[test]
    fn zero_through_conversions_and_arithmetic() {
        let module = parse_module(indoc! {r#"
            sil @f : $@convention(thin) (Builtin.Int64) -> () {
            bb0(%0 : $Builtin.Int64):
              %1 = integer_literal $Builtin.Int64, 0
              %2 = integer_literal $Builtin.Int64, 5
              %3 = builtin "mul_Int64"(%0 : $Builtin.Int64, %1 : $Builtin.Int64) : $Builtin.Int64
              %4 = builtin "udiv_Int64"(%1 : $Builtin.Int64, %0 : $Builtin.Int64) : $Builtin.Int64
              %5 = builtin "udiv_Int64"(%0 : $Builtin.Int64, %2 : $Builtin.Int64) : $Builtin.Int64
              %6 = builtin "inttoptr_Int64"(%2 : $Builtin.Int64) : $Builtin.RawPointer
              %7 = alloc_stack $Builtin.Int64
              %8 = string_literal utf8 "x"
              dealloc_stack %7 : $*Builtin.Int64
              %9 = tuple ()
              return %9 : $()
            }
        "#});
        let body = &module.function_named("f").unwrap().body;
        let builtins = find(body, Opcode::Builtin);
        let result = |inst: InstId| body.single_result(inst).unwrap();

        assert_eq!(is_zero_value(body, result(find(body, Opcode::IntegerLiteral)[0])), IsZero::Zero);
        assert_eq!(is_zero_value(body, result(find(body, Opcode::IntegerLiteral)[1])), IsZero::NotZero);
        assert_eq!(is_zero_value(body, result(builtins[0])), IsZero::Zero);
        assert_eq!(is_zero_value(body, result(builtins[1])), IsZero::Zero);
        assert_eq!(is_zero_value(body, result(builtins[2])), IsZero::Unknown);
        assert_eq!(is_zero_value(body, result(builtins[3])), IsZero::NotZero);
        assert_eq!(is_zero_value(body, result(find(body, Opcode::AllocStack)[0])), IsZero::NotZero);
        assert_eq!(is_zero_value(body, result(find(body, Opcode::StringLiteral)[0])), IsZero::NotZero);
        assert_eq!(is_zero_value(body, body.function_arguments()[0]), IsZero::Unknown);
    }

    #[test]
    fn overflow_tuples_only_look_at_their_value() {
        let module = parse_module(indoc! {r#"
            sil @f : $@convention(thin) (Builtin.Int32) -> () {
            bb0(%0 : $Builtin.Int32):
              %1 = integer_literal $Builtin.Int32, 0
              %2 = builtin "smul_with_overflow_Int32"(%0 : $Builtin.Int32, %1 : $Builtin.Int32) : $(Builtin.Int32, Builtin.Int1)
              %3 = tuple_extract %2 : $(Builtin.Int32, Builtin.Int1), 0
              %4 = tuple_extract %2 : $(Builtin.Int32, Builtin.Int1), 1
              %5 = tuple ()
              return %5 : $()
            }
        "#});
        let body = &module.function_named("f").unwrap().body;
        let extracts = find(body, Opcode::TupleExtract);

        assert_eq!(is_zero_value(body, body.single_result(extracts[0]).unwrap()), IsZero::Zero);
        assert_eq!(is_zero_value(body, body.single_result(extracts[1]).unwrap()), IsZero::Unknown);
    }

    #[test]
    fn sign_bits() {
        let module = parse_module(indoc! {r#"
            sil @f : $@convention(thin) (Builtin.Int64, Builtin.Int32) -> () {
            bb0(%0 : $Builtin.Int64, %1 : $Builtin.Int32):
              %2 = integer_literal $Builtin.Int64, -3
              %3 = integer_literal $Builtin.Int64, 3
              %4 = builtin "and_Int64"(%0 : $Builtin.Int64, %3 : $Builtin.Int64) : $Builtin.Int64
              %5 = builtin "or_Int64"(%0 : $Builtin.Int64, %2 : $Builtin.Int64) : $Builtin.Int64
              %6 = builtin "xor_Int64"(%2 : $Builtin.Int64, %3 : $Builtin.Int64) : $Builtin.Int64
              %7 = builtin "xor_Int64"(%0 : $Builtin.Int64, %3 : $Builtin.Int64) : $Builtin.Int64
              %8 = builtin "lshr_Int64"(%0 : $Builtin.Int64, %3 : $Builtin.Int64) : $Builtin.Int64
              %9 = builtin "zext_Int32_Int64"(%1 : $Builtin.Int32) : $Builtin.Int64
              %10 = builtin "sext_Int32_Int64"(%1 : $Builtin.Int32) : $Builtin.Int64
              %11 = tuple ()
              return %11 : $()
            }
        "#});
        let body = &module.function_named("f").unwrap().body;
        let literals = find(body, Opcode::IntegerLiteral);
        let signs = find(body, Opcode::Builtin)
            .into_iter()
            .map(|inst| compute_sign_bit(body, body.single_result(inst).unwrap()))
            .collect::<Vec<_>>();

        assert_eq!(compute_sign_bit(body, body.single_result(literals[0]).unwrap()), Some(true));
        assert_eq!(compute_sign_bit(body, body.single_result(literals[1]).unwrap()), Some(false));
        assert_eq!(signs, vec![Some(false), Some(true), Some(true), None, Some(false), Some(false), None]);
    }

    #[test]
    fn folded_and_masked_arithmetic_cannot_overflow() {
        let module = parse_module(indoc! {r#"
            sil @f : $@convention(thin) (Builtin.Int64) -> () {
            bb0(%0 : $Builtin.Int64):
              %1 = integer_literal $Builtin.Int64, 1
              %2 = integer_literal $Builtin.Int64, 2
              %3 = builtin "sadd_with_overflow_Int64"(%1 : $Builtin.Int64, %2 : $Builtin.Int64) : $(Builtin.Int64, Builtin.Int1)
              %4 = builtin "sadd_with_overflow_Int64"(%0 : $Builtin.Int64, %2 : $Builtin.Int64) : $(Builtin.Int64, Builtin.Int1)
              %5 = integer_literal $Builtin.Int64, 127
              %6 = builtin "and_Int64"(%0 : $Builtin.Int64, %5 : $Builtin.Int64) : $Builtin.Int64
              %7 = builtin "s_to_s_checked_trunc_Int64_Int8"(%6 : $Builtin.Int64) : $(Builtin.Int8, Builtin.Int1)
              %8 = integer_literal $Builtin.Int64, 255
              %9 = builtin "and_Int64"(%0 : $Builtin.Int64, %8 : $Builtin.Int64) : $Builtin.Int64
              %10 = builtin "s_to_s_checked_trunc_Int64_Int8"(%9 : $Builtin.Int64) : $(Builtin.Int8, Builtin.Int1)
              %11 = builtin "u_to_u_checked_trunc_Int64_Int8"(%9 : $Builtin.Int64) : $(Builtin.Int8, Builtin.Int1)
              %12 = tuple ()
              return %12 : $()
            }
        "#});
        let body = &module.function_named("f").unwrap().body;
        let builtins = find(body, Opcode::Builtin);
        let folder = LiteralFolder;

        assert!(!can_overflow(body, builtins[0], &folder));
        assert!(can_overflow(body, builtins[1], &folder));
        assert!(!can_overflow(body, builtins[3], &folder));
        assert!(can_overflow(body, builtins[5], &folder));
        assert!(!can_overflow(body, builtins[6], &folder));
    }

    #[test]
    fn local_objects() {
        let module = parse_module(indoc! {r#"
            struct S {
              var a: Builtin.Int64
            }

            sil @f : $@convention(thin) (@in S, @inout S, @inout_aliasable S, Builtin.RawPointer) -> @out S {
            bb0(%0 : $*S, %1 : $*S, %2 : $*S, %3 : $*S, %4 : $Builtin.RawPointer):
              %5 = alloc_stack $S
              %6 = struct_element_addr %5 : $*S, #S.a
              %7 = struct_element_addr %2 : $*S, #S.a
              dealloc_stack %5 : $*S
              %8 = tuple ()
              return %8 : $()
            }
        "#});
        let function = module.function_named("f").unwrap();
        let body = &function.body;
        let args = body.function_arguments();
        let projections = find(body, Opcode::StructElementAddr);
        let local = |value, aliasing| points_to_local_object(body, &function.ty, value, aliasing);
        let not_aliasing = InoutAliasingAssumption::NotAliasing;

        assert!(local(body.single_result(projections[0]).unwrap(), not_aliasing));
        assert!(local(args[0], not_aliasing));
        assert!(local(args[1], not_aliasing));
        assert!(local(body.single_result(projections[1]).unwrap(), not_aliasing));
        assert!(!local(args[2], InoutAliasingAssumption::Aliasing));
        assert!(!local(args[3], not_aliasing));
        assert!(!local(args[4], not_aliasing));
    }
}
