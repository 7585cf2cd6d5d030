//! Folding instructions into values which already exist: projections out of
//! the aggregate that was just built, and casts which undo each other.

use itertools::Itertools;

use crate::{
    logging::opt_log,
    sil::{
        function::{Body, InstId},
        instruction::{InstKind, Opcode},
        value::ValueId,
    },
};

/// Casts which only reinterpret their operand
fn is_reinterpreting_cast(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Upcast
            | Opcode::UncheckedRefCast
            | Opcode::UncheckedAddrCast
            | Opcode::UncheckedBitwiseCast
            | Opcode::UncheckedTrivialBitCast
            | Opcode::ConvertFunction
    )
}

/// An existing value `inst` computes, if there is one
pub fn simplify_instruction(body: &Body, inst: InstId) -> Option<ValueId> {
    let result = body.single_result(inst)?;
    let operand = body.operand_value(inst, 0)?;
    let source = body.defining_inst(operand);

    match body.kind(inst) {
        InstKind::Conversion(opcode) if is_reinterpreting_cast(*opcode) => {
            let ty = body.value_type(result);
            if body.value_type(operand) == ty {
                return Some(operand);
            }

            // (cast (cast %x : $A to $B) : $B to $A) is %x
            let source = source?;
            let InstKind::Conversion(inner) = body.kind(source) else {
                return None;
            };
            let original = body.operand_value(source, 0)?;

            (is_reinterpreting_cast(*inner) && body.value_type(original) == ty).then_some(original)
        }
        InstKind::FieldIndex {
            opcode: Opcode::TupleExtract,
            index,
        } => {
            let source = source?;
            if body.opcode(source) != Opcode::Tuple {
                return None;
            }

            body.operand_value(source, *index as usize)
        }
        InstKind::EnumData {
            opcode: Opcode::UncheckedEnumData,
            case,
        } => match body.kind(source?) {
            InstKind::Enum(built) if built == case => body.operand_value(source?, 0),
            _ => None,
        },
        _ => None,
    }
}

/// Replaces every single-result user of `inst` which folds into an existing
/// value by that value, erasing the user
pub fn simplify_users(body: &mut Body, inst: InstId) -> bool {
    let users = body
        .results(inst)
        .iter()
        .flat_map(|result| body.users(*result))
        .unique()
        .collect::<Vec<_>>();

    let mut changed = false;

    for user in users {
        if body.inst(user).erased {
            continue;
        }

        let (Some(result), Some(simplified)) = (body.single_result(user), simplify_instruction(body, user)) else {
            continue;
        };

        opt_log!("folding {} into an existing value", body.opcode(user));
        body.replace_all_uses_with(result, simplified);
        body.erase_instruction(user);
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::opt::test_support::{count, find, parse_module};

    const MODULE: &str = indoc! {r#"
        class C {}
        class D : C {}

        sil @f : $@convention(thin) (Builtin.Int64, @owned D) -> () {
        bb0(%0 : $Builtin.Int64, %1 : $D):
          %2 = integer_literal $Builtin.Int64, 1
          %3 = tuple (%0 : $Builtin.Int64, %2 : $Builtin.Int64)
          %4 = tuple_extract %3 : $(Builtin.Int64, Builtin.Int64), 1
          %5 = builtin "add_Int64"(%4 : $Builtin.Int64, %0 : $Builtin.Int64) : $Builtin.Int64
          %6 = upcast %1 : $D to $C
          %7 = unchecked_ref_cast %6 : $C to $D
          %8 = unchecked_ref_cast %7 : $D to $D
          %9 = enum $Optional<D>, #Optional.some!enumelt.1, %8 : $D
          %10 = unchecked_enum_data %9 : $Optional<D>, #Optional.some!enumelt.1
          strong_release %10 : $D
          %11 = tuple ()
          return %11 : $()
        }
    "#};

    fn result(body: &Body, opcode: Opcode, index: usize) -> ValueId {
        body.single_result(find(body, opcode)[index]).unwrap()
    }

    #[test]
    fn folds_into_existing_values() {
        let module = parse_module(MODULE);
        let body = &module.function_named("f").unwrap().body;
        let casts = find(body, Opcode::UncheckedRefCast);

        assert_eq!(
            simplify_instruction(body, find(body, Opcode::TupleExtract)[0]),
            Some(result(body, Opcode::IntegerLiteral, 0))
        );
        // Through the upcast and back
        assert_eq!(simplify_instruction(body, casts[0]), Some(body.function_arguments()[1]));
        assert_eq!(simplify_instruction(body, casts[1]), body.single_result(casts[0]));
        assert_eq!(
            simplify_instruction(body, find(body, Opcode::UncheckedEnumData)[0]),
            body.single_result(casts[1])
        );

        assert_eq!(simplify_instruction(body, find(body, Opcode::Upcast)[0]), None);
        assert_eq!(simplify_instruction(body, find(body, Opcode::Builtin)[0]), None);
    }

    #[test]
    fn users_are_replaced_and_erased() {
        let mut module = parse_module(MODULE);
        let id = module.lookup_function("f".into()).unwrap();
        let body = &mut module.function_mut(id).body;

        let tuple = find(body, Opcode::Tuple)[0];
        let literal = result(body, Opcode::IntegerLiteral, 0);
        assert!(simplify_users(body, tuple));
        assert_eq!(count(body, Opcode::TupleExtract), 0);
        assert_eq!(body.operand_value(find(body, Opcode::Builtin)[0], 0), Some(literal));

        let upcast = find(body, Opcode::Upcast)[0];
        assert!(simplify_users(body, upcast));
        assert_eq!(count(body, Opcode::UncheckedRefCast), 1);

        let remaining = find(body, Opcode::UncheckedRefCast)[0];
        assert_eq!(body.operand_value(remaining, 0), Some(body.function_arguments()[1]));

        let enum_inst = find(body, Opcode::Enum)[0];
        assert!(simplify_users(body, enum_inst));
        assert_eq!(
            body.operand_value(find(body, Opcode::StrongRelease)[0], 0),
            body.single_result(remaining)
        );
    }

    #[test]
    fn users_without_a_simpler_form_stay() {
        let mut module = parse_module(MODULE);
        let id = module.lookup_function("f".into()).unwrap();
        let body = &mut module.function_mut(id).body;
        let before = body.all_insts().len();

        let literal = find(body, Opcode::IntegerLiteral)[0];
        assert!(!simplify_users(body, literal));
        assert_eq!(body.all_insts().len(), before);
    }
}
