//! Deleting instructions whose results nobody needs, and emitting the
//! reference counting operations other rewrites leave behind.

use hashbrown::HashSet;
use itertools::Itertools;

use crate::{
    config::OptimizationMode,
    logging::opt_log,
    oracle::TypeOracle,
    sil::{
        builder::Builder,
        function::{Body, InstId},
        instruction::{builtin_base_name, InstKind, Opcode},
        types::{ReferenceOwnership, TypeKind},
        value::ValueId,
    },
};

/// Whether every use of the instruction's results is a debug value
fn only_debug_uses(body: &Body, inst: InstId) -> bool {
    body.results(inst)
        .iter()
        .flat_map(|result| body.users(*result))
        .all(|user| body.opcode(user).is_debug_value())
}

/// Whether `inst` can be deleted without changing what the function does.
/// Without optimization even debug uses keep an instruction alive.
pub fn is_instruction_trivially_dead(body: &Body, inst: InstId, mode: OptimizationMode) -> bool {
    let data = body.inst(inst);
    if data.erased || data.kind.is_terminator() {
        return false;
    }

    if mode == OptimizationMode::None && body.has_result_uses(inst) {
        return false;
    }

    if !only_debug_uses(body, inst) {
        return false;
    }

    match &data.kind {
        // Marks a fast path for the inliner, removing it changes heuristics
        InstKind::Builtin { name, .. } if builtin_base_name(name.value()) == "onFastPath" => false,
        InstKind::Builtin { .. } => !data.kind.may_have_side_effects(),
        InstKind::Simple(Opcode::CondFail) => body
            .operand_value(inst, 0)
            .and_then(|condition| body.defining_inst(condition))
            .is_some_and(|definition| matches!(body.kind(definition), InstKind::IntegerLiteral(0))),
        InstKind::MarkUninitialized(_) | InstKind::MarkUninitializedBehavior { .. } => false,
        InstKind::DebugValue { .. } => false,
        // Only moves the payload out, the enum is dead afterwards anyway
        InstKind::EnumData {
            opcode: Opcode::UncheckedTakeEnumDataAddr,
            ..
        } => true,
        kind => !kind.may_have_side_effects(),
    }
}

/// Erases the debug values using `inst`'s results, then `inst` itself
fn erase_with_debug_uses(body: &mut Body, inst: InstId) {
    for result in body.results(inst).to_vec() {
        for user in body.users(result) {
            if body.opcode(user).is_debug_value() {
                body.erase_instruction(user);
            }
        }

        // Forced deletions may leave real uses behind
        body.replace_all_uses_with_undef(result);
    }

    body.erase_instruction(inst);
}

/// Deletes `seeds`, then every instruction which became trivially dead
/// because of it. With `force` the seeds are deleted even if they are
/// still needed. `on_delete` sees each instruction right before it goes.
pub fn recursively_delete_trivially_dead_instructions(
    body: &mut Body,
    seeds: &[InstId],
    force: bool,
    mode: OptimizationMode,
    mut on_delete: impl FnMut(&Body, InstId),
) -> usize {
    let mut dead = seeds
        .iter()
        .copied()
        .filter(|inst| !body.inst(*inst).erased)
        .filter(|inst| force || is_instruction_trivially_dead(body, *inst, mode))
        .unique()
        .collect::<Vec<_>>();

    let mut deleted = 0;

    while !dead.is_empty() {
        let in_current_round = dead.iter().copied().collect::<HashSet<_>>();
        let mut next = Vec::new();
        let mut next_set = HashSet::new();

        for inst in &dead {
            on_delete(body, *inst);

            let operands = body.operand_values(*inst);
            body.drop_all_references(*inst);

            for operand in operands {
                let Some(definition) = body.defining_inst(operand) else {
                    continue;
                };

                if in_current_round.contains(&definition) || next_set.contains(&definition) {
                    continue;
                }

                if is_instruction_trivially_dead(body, definition, mode) {
                    next_set.insert(definition);
                    next.push(definition);
                }
            }
        }

        for inst in dead {
            opt_log!("deleting dead {}", body.opcode(inst));
            erase_with_debug_uses(body, inst);
            deleted += 1;
        }

        dead = next;
    }

    deleted
}

/// Erases every transitive user of `inst`'s results. Operands of the erased
/// users which became dead go too. `inst` itself stays.
pub fn erase_uses_of_instruction(
    body: &mut Body,
    inst: InstId,
    mode: OptimizationMode,
    on_delete: &mut dyn FnMut(&Body, InstId),
) {
    for result in body.results(inst).to_vec() {
        while let Some(user) = body.users(result).first().copied() {
            erase_uses_of_instruction(body, user, mode, on_delete);

            let operands = body.operand_values(user);
            body.drop_all_references(user);

            for operand in operands {
                let Some(definition) = body.defining_inst(operand) else {
                    continue;
                };

                if definition != inst {
                    recursively_delete_trivially_dead_instructions(
                        body,
                        &[definition],
                        false,
                        mode,
                        &mut *on_delete,
                    );
                }
            }

            on_delete(body, user);
            erase_with_debug_uses(body, user);
        }
    }
}

/// The transitive users of `value`, in discovery order
pub fn collect_uses_of_value(body: &Body, value: ValueId) -> Vec<InstId> {
    let mut seen = HashSet::new();
    let mut users = Vec::new();
    let mut pending = vec![value];

    while let Some(value) = pending.pop() {
        for user in body.users(value) {
            if !seen.insert(user) {
                continue;
            }

            users.push(user);
            pending.extend(body.results(user).iter().copied());
        }
    }

    users
}

/// Erases every transitive user of `value`. Remaining uses of their results
/// become `undef`.
pub fn erase_uses_of_value(body: &mut Body, value: ValueId) {
    for user in collect_uses_of_value(body, value) {
        for result in body.results(user).to_vec() {
            body.replace_all_uses_with_undef(result);
        }
        body.erase_instruction(user);
    }
}

/* Reference counting */

enum RefCountStyle {
    Unowned,
    Strong,
    Value,
}

fn ref_count_style(body: &Body, value: ValueId, oracle: &dyn TypeOracle) -> Option<RefCountStyle> {
    let ty = &body.value_type(value).ty;

    if oracle.is_trivial(ty) {
        return None;
    }

    Some(match ty.kind() {
        TypeKind::ReferenceStorage {
            ownership: ReferenceOwnership::Unowned,
            ..
        } => RefCountStyle::Unowned,
        _ if oracle.is_reference(ty) => RefCountStyle::Strong,
        _ => RefCountStyle::Value,
    })
}

/// Emits a retain of `value` right before `before`. Trivial values need
/// none.
pub fn create_increment_before(
    body: &mut Body,
    value: ValueId,
    before: InstId,
    oracle: &dyn TypeOracle,
) -> Option<InstId> {
    let style = ref_count_style(body, value, oracle)?;
    let scope = body.inst(before).scope;

    let mut builder = Builder::before(body, before);
    builder.set_debug_location(None, scope);

    Some(match style {
        RefCountStyle::Unowned => builder.create_unowned_retain(value),
        RefCountStyle::Strong => builder.create_strong_retain(value),
        RefCountStyle::Value => builder.create_retain_value(value),
    })
}

/// Emits a release of `value` right before `before`. Trivial values need
/// none.
pub fn create_decrement_before(
    body: &mut Body,
    value: ValueId,
    before: InstId,
    oracle: &dyn TypeOracle,
) -> Option<InstId> {
    let style = ref_count_style(body, value, oracle)?;
    let scope = body.inst(before).scope;

    let mut builder = Builder::before(body, before);
    builder.set_debug_location(None, scope);

    Some(match style {
        RefCountStyle::Unowned => builder.create_unowned_release(value),
        RefCountStyle::Strong => builder.create_strong_release(value),
        RefCountStyle::Value => builder.create_release_value(value),
    })
}
