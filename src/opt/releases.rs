//! Telling the releases which end a function argument's lifetime apart from
//! the ones in the middle of it.

use crate::{
    opt::value_tracking::strip_value_projections,
    sil::{
        function::{Body, InstId},
        instruction::{MemoryBehavior, Opcode},
        types::{ParameterConvention, SilFunctionType},
        value::ValueId,
    },
};

fn is_release(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::StrongRelease | Opcode::ReleaseValue)
}

/// Convention of the function argument at `index`. Indirect results come
/// first and have none.
fn argument_convention(function_ty: &SilFunctionType, index: usize) -> Option<ParameterConvention> {
    let indirect_results = function_ty.indirect_results().count();
    let param = function_ty.params.get(index.checked_sub(indirect_results)?)?;
    Some(param.convention)
}

fn uses_value(body: &Body, inst: InstId, value: ValueId) -> bool {
    body.operand_values(inst)
        .into_iter()
        .any(|operand| strip_value_projections(body, operand) == value)
}

/// The releases of `arg` right before the function returns. Each return
/// block is walked backwards from its terminator until something uses the
/// argument or may have side effects. Releases of other values are stepped
/// over. Empty unless every return block has one.
pub fn epilogue_releases(body: &Body, arg: ValueId) -> Vec<InstId> {
    let returns = body
        .block_order
        .iter()
        .filter_map(|block| body.terminator(*block))
        .filter(|terminator| body.opcode(*terminator) == Opcode::Return)
        .collect::<Vec<_>>();

    let mut releases = Vec::new();

    for terminator in returns {
        let mut found = false;
        let mut cursor = body.prev_inst(terminator);

        while let Some(inst) = cursor {
            let opcode = body.opcode(inst);
            let uses_arg = uses_value(body, inst, arg);

            if is_release(opcode) {
                if uses_arg {
                    releases.push(inst);
                    found = true;
                }
            } else if uses_arg || opcode.memory_behavior() == MemoryBehavior::MayHaveSideEffects {
                break;
            }

            cursor = body.prev_inst(inst);
        }

        if !found {
            return Vec::new();
        }
    }

    releases
}

/// Whether `inst` releases a function argument, or part of one, without
/// ending its lifetime. Guaranteed arguments are kept alive by the caller,
/// so any release of them is intermediate. For the others only releases
/// besides the epilogue ones are.
pub fn is_intermediate_release(body: &Body, function_ty: &SilFunctionType, inst: InstId) -> bool {
    if !is_release(body.opcode(inst)) {
        return false;
    }

    let Some(operand) = body.operand_value(inst, 0) else {
        return false;
    };

    let arg = strip_value_projections(body, operand);
    let Some(index) = body.function_argument_index(arg) else {
        return false;
    };

    match argument_convention(function_ty, index) {
        Some(ParameterConvention::DirectGuaranteed) => true,
        Some(_) => {
            let epilogue = epilogue_releases(body, arg);
            !epilogue.is_empty() && !epilogue.contains(&inst)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::opt::test_support::{find, parse_module};

    const MODULE: &str = indoc! {"
        class C {}
        struct Pair {
          var first: C
          var second: C
        }

        sil @use : $@convention(thin) (@guaranteed C) -> ()
        sil @other : $@convention(thin) () -> ()

        sil @f : $@convention(thin) (@guaranteed Pair, @owned C, @owned C) -> () {
        bb0(%0 : $Pair, %1 : $C, %2 : $C):
          %3 = struct_extract %0 : $Pair, #Pair.first
          strong_release %3 : $C
          strong_retain %1 : $C
          %4 = function_ref @use : $@convention(thin) (@guaranteed C) -> ()
          %5 = apply %4(%1) : $@convention(thin) (@guaranteed C) -> ()
          strong_release %1 : $C
          %6 = apply %4(%2) : $@convention(thin) (@guaranteed C) -> ()
          strong_release %2 : $C
          strong_release %1 : $C
          %7 = tuple ()
          return %7 : $()
        }

        sil @g : $@convention(thin) (@owned C) -> () {
        bb0(%0 : $C):
          strong_release %0 : $C
          %1 = function_ref @other : $@convention(thin) () -> ()
          %2 = apply %1() : $@convention(thin) () -> ()
          return %2 : $()
        }
    "};

    #[test]
    fn epilogue_releases_end_the_function() {
        let module = parse_module(MODULE);
        let body = &module.function_named("f").unwrap().body;
        let args = body.function_arguments().to_vec();
        let releases = find(body, Opcode::StrongRelease);

        assert_eq!(epilogue_releases(body, args[1]), vec![releases[3]]);
        assert_eq!(epilogue_releases(body, args[2]), vec![releases[2]]);
        assert!(epilogue_releases(body, args[0]).is_empty());
    }

    #[test]
    fn releases_are_classified_by_convention() {
        let module = parse_module(MODULE);
        let function = module.function_named("f").unwrap();
        let body = &function.body;
        let releases = find(body, Opcode::StrongRelease);

        // Part of a guaranteed argument
        assert!(is_intermediate_release(body, &function.ty, releases[0]));
        // Owned, with the final release still to come
        assert!(is_intermediate_release(body, &function.ty, releases[1]));
        assert!(!is_intermediate_release(body, &function.ty, releases[2]));
        assert!(!is_intermediate_release(body, &function.ty, releases[3]));
        assert!(!is_intermediate_release(body, &function.ty, find(body, Opcode::StrongRetain)[0]));
    }

    #[test]
    fn nothing_is_proven_without_an_epilogue() {
        let module = parse_module(MODULE);
        let function = module.function_named("g").unwrap();
        let release = find(&function.body, Opcode::StrongRelease)[0];

        assert!(epilogue_releases(&function.body, function.body.function_arguments()[0]).is_empty());
        assert!(!is_intermediate_release(&function.body, &function.ty, release));
    }
}
