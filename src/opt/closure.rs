//! Deleting closures which are only retained and released. Arguments a
//! `partial_apply` captured are still owned by the closure, so they are
//! destroyed where the closure's last release used to be.

use hashbrown::HashSet;

use crate::{
    logging::opt_log,
    oracle::TypeOracle,
    sil::{
        builder::Builder,
        function::{BlockId, Body, InsertPoint, InstId},
        instruction::{DebugVar, Opcode},
        types::SilParameter,
        value::{ValueId, ValueKind},
    },
};

type UserQuery = fn(&Body, InstId) -> bool;

/// Collects the users of a value while checking each one against two
/// queries: users it accepts, and conversions whose results are followed
pub struct ReleaseTracker {
    accepts: UserQuery,
    transitive: UserQuery,
    tracked: Vec<InstId>,
    tracked_set: HashSet<InstId>,
    final_releases: Vec<InstId>,
}

impl ReleaseTracker {
    pub fn new(accepts: UserQuery, transitive: UserQuery) -> Self {
        Self {
            accepts,
            transitive,
            tracked: Vec::new(),
            tracked_set: HashSet::new(),
            final_releases: Vec::new(),
        }
    }

    pub fn is_user_acceptable(&self, body: &Body, inst: InstId) -> bool {
        (self.accepts)(body, inst)
    }

    pub fn is_user_transitive(&self, body: &Body, inst: InstId) -> bool {
        (self.transitive)(body, inst)
    }

    fn track_user(&mut self, inst: InstId) -> bool {
        let inserted = self.tracked_set.insert(inst);
        if inserted {
            self.tracked.push(inst);
        }
        inserted
    }

    pub fn is_tracked(&self, inst: InstId) -> bool {
        self.tracked_set.contains(&inst)
    }

    /// Every accepted user, conversions before their own users
    pub fn tracked_users(&self) -> &[InstId] {
        &self.tracked
    }

    pub fn final_releases(&self) -> &[InstId] {
        &self.final_releases
    }
}

fn value_block(body: &Body, value: ValueId) -> Option<BlockId> {
    match body.value(value).kind {
        ValueKind::Result { inst, .. } => Some(body.inst(inst).block),
        ValueKind::BlockArgument { block, .. } => Some(block),
        ValueKind::Undef | ValueKind::Placeholder => None,
    }
}

/// Tracks every user of `value` and finds its final releases: the last
/// tracked user of each block the value is not live out of. Returns false
/// if some user is not acceptable.
pub fn get_final_releases_for_value(body: &Body, value: ValueId, tracker: &mut ReleaseTracker) -> bool {
    let Some(def_block) = value_block(body, value) else {
        return false;
    };

    let mut use_blocks = Vec::new();
    let mut pending = vec![value];

    while let Some(value) = pending.pop() {
        for user in body.users(value) {
            if tracker.is_user_transitive(body, user) {
                if tracker.track_user(user) {
                    pending.extend(body.results(user).iter().copied());
                }
                continue;
            }

            if !tracker.is_user_acceptable(body, user) {
                return false;
            }

            tracker.track_user(user);

            let block = body.inst(user).block;
            if !use_blocks.contains(&block) {
                use_blocks.push(block);
            }
        }
    }

    // Blocks the value is live into
    let mut live_in = HashSet::new();
    let mut worklist = use_blocks
        .iter()
        .copied()
        .filter(|block| *block != def_block)
        .collect::<Vec<_>>();

    while let Some(block) = worklist.pop() {
        if !live_in.insert(block) {
            continue;
        }

        for predecessor in body.predecessors(block) {
            if predecessor != def_block && !live_in.contains(&predecessor) {
                worklist.push(predecessor);
            }
        }
    }

    for block in use_blocks {
        if body
            .successors(block)
            .iter()
            .any(|successor| live_in.contains(successor))
        {
            continue;
        }

        let last_use = std::iter::successors(body.last_inst(block), |inst| body.prev_inst(*inst))
            .find(|inst| tracker.is_tracked(*inst));

        if let Some(last_use) = last_use {
            tracker.final_releases.push(last_use);
        }
    }

    true
}

/* Dead closures */

fn is_closure_user(body: &Body, inst: InstId) -> bool {
    matches!(
        body.opcode(inst),
        Opcode::StrongRetain
            | Opcode::StrongRelease
            | Opcode::CopyValue
            | Opcode::DestroyValue
            | Opcode::RetainValue
            | Opcode::ReleaseValue
            | Opcode::DebugValue
    )
}

fn is_closure_conversion(body: &Body, inst: InstId) -> bool {
    body.opcode(inst) == Opcode::ConvertFunction
}

fn should_destroy_captured_argument(
    body: &Body,
    argument: ValueId,
    param: &SilParameter,
    oracle: &dyn TypeOracle,
) -> bool {
    // Inout captures are owned by the caller
    if param.convention.is_inout() {
        return false;
    }

    !oracle.is_trivial(&body.value_type(argument).ty)
}

/// Moves an address argument into a stack slot that lives for the whole
/// function, so the destroy emitted later cannot come after the original
/// location was deallocated
fn create_lifetime_extended_alloc_stack(body: &mut Body, closure: InstId, argument: ValueId) -> Option<ValueId> {
    let entry = body.entry_block()?;
    let entry_start = body.first_inst(entry)?;
    let ty = body.value_type(argument).clone();

    let exiting = body
        .block_order
        .iter()
        .copied()
        .filter_map(|block| body.terminator(block))
        .filter(|terminator| body.opcode(*terminator).is_function_exiting())
        .collect::<Vec<_>>();

    let mut builder = Builder::before(body, entry_start);
    let slot = builder.create_alloc_stack(ty, DebugVar::default());

    for terminator in exiting {
        builder.set_insertion_point(InsertPoint::Before(terminator));
        builder.create_dealloc_stack(slot);
    }

    builder.set_insertion_point(InsertPoint::Before(closure));
    builder.create_copy_addr(argument, slot, true, true);

    Some(slot)
}

/// Emits a destroy of every non-trivial captured argument at each final
/// release of the closure
fn release_captured_arguments(
    body: &mut Body,
    closure: InstId,
    final_releases: &[InstId],
    oracle: &dyn TypeOracle,
    qualified_ownership: bool,
) -> bool {
    let operands = body.operand_values(closure);
    let Some((callee, arguments)) = operands.split_first() else {
        return false;
    };

    let Some(callee_ty) = body.value_type(*callee).ty.function_type().cloned() else {
        return false;
    };

    // Captured arguments fill the last parameters
    let Some(delta) = callee_ty.params.len().checked_sub(arguments.len()) else {
        return false;
    };
    let params = &callee_ty.params[delta..];

    if arguments
        .iter()
        .any(|argument| body.value_type(*argument).ty.has_opened_existential())
    {
        return false;
    }

    let mut to_destroy = Vec::new();
    for (argument, param) in arguments.iter().zip(params) {
        if !should_destroy_captured_argument(body, *argument, param, oracle) {
            continue;
        }

        if body.value_type(*argument).is_address() {
            let Some(slot) = create_lifetime_extended_alloc_stack(body, closure, *argument) else {
                return false;
            };
            to_destroy.push(slot);
        } else {
            to_destroy.push(*argument);
        }
    }

    for release in final_releases {
        let mut builder = Builder::before(body, *release);

        for argument in &to_destroy {
            let ty = builder.value_type(*argument);

            if ty.is_address() {
                builder.create_destroy_addr(*argument);
            } else if qualified_ownership {
                builder.create_destroy_value(*argument);
            } else if oracle.is_reference(&ty.ty) {
                builder.create_strong_release(*argument);
            } else {
                builder.create_release_value(*argument);
            }
        }
    }

    true
}

/// Deletes a `partial_apply` or `thin_to_thick_function` whose only users
/// are reference counting and debug instructions. Returns false, without
/// touching the function, if the closure has any other use.
pub fn try_delete_dead_closure(
    body: &mut Body,
    closure: InstId,
    oracle: &dyn TypeOracle,
    qualified_ownership: bool,
) -> bool {
    let opcode = body.opcode(closure);
    if !matches!(opcode, Opcode::PartialApply | Opcode::ThinToThickFunction) {
        return false;
    }

    let Some(value) = body.single_result(closure) else {
        return false;
    };

    let mut tracker = ReleaseTracker::new(is_closure_user, is_closure_conversion);
    if !get_final_releases_for_value(body, value, &mut tracker) {
        return false;
    }

    if opcode == Opcode::PartialApply
        && !release_captured_arguments(body, closure, tracker.final_releases(), oracle, qualified_ownership)
    {
        return false;
    }

    for user in tracker.tracked_users().iter().rev() {
        for result in body.results(*user).to_vec() {
            body.replace_all_uses_with_undef(result);
        }
        body.erase_instruction(*user);
    }

    opt_log!("deleted dead closure {opcode}");
    body.erase_instruction(closure);
    true
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::opt::test_support::{count, find, parse_with_decls};

    const CAPTURING: &str = indoc! {"
        class C {}
        struct S {
          var c: C
        }

        sil @callee : $@convention(thin) (Builtin.Int64, @owned C, @in S, @inout S, Builtin.Int64) -> ()

        sil @f : $@convention(thin) (@owned C, @in S, @inout S) -> () {
        bb0(%0 : $C, %1 : $*S, %2 : $*S):
          %3 = integer_literal $Builtin.Int64, 1
          %4 = function_ref @callee : $@convention(thin) (Builtin.Int64, @owned C, @in S, @inout S, Builtin.Int64) -> ()
          %5 = partial_apply %4(%0, %1, %2, %3) : $@convention(thin) (Builtin.Int64, @owned C, @in S, @inout S, Builtin.Int64) -> ()
          %6 = convert_function %5 : $@callee_owned (Builtin.Int64) -> () to $@callee_owned (Builtin.Int64) -> ()
          strong_retain %5 : $@callee_owned (Builtin.Int64) -> ()
          strong_release %6 : $@callee_owned (Builtin.Int64) -> ()
          strong_release %5 : $@callee_owned (Builtin.Int64) -> ()
          %7 = tuple ()
          return %7 : $()
        }
    "};

    #[test]
    fn captured_arguments_are_destroyed_at_the_final_release() {
        let (mut module, decls) = parse_with_decls(CAPTURING);
        let id = module.lookup_function("f".into()).unwrap();
        let body = &mut module.function_mut(id).body;
        let closure = find(body, Opcode::PartialApply)[0];
        let owned = body.function_arguments()[0];

        assert!(try_delete_dead_closure(body, closure, &decls, false));

        assert_eq!(count(body, Opcode::PartialApply), 0);
        assert_eq!(count(body, Opcode::ConvertFunction), 0);
        assert_eq!(count(body, Opcode::StrongRetain), 0);

        // One release for the owned reference, one destroy for the moved
        // `@in` struct, nothing for the inout or trivial captures
        let releases = find(body, Opcode::StrongRelease);
        assert_eq!(releases.len(), 1);
        assert_eq!(body.operand_value(releases[0], 0), Some(owned));
        assert_eq!(count(body, Opcode::DestroyAddr), 1);

        let slot = find(body, Opcode::AllocStack)[0];
        assert_eq!(body.first_inst(body.entry_block().unwrap()), Some(slot));
        assert_eq!(count(body, Opcode::CopyAddr), 1);
        let dealloc = find(body, Opcode::DeallocStack)[0];
        assert_eq!(body.opcode(body.next_inst(dealloc).unwrap()), Opcode::Return);
    }

    #[test]
    fn qualified_ownership_destroys_values() {
        let (mut module, decls) = parse_with_decls(CAPTURING);
        let id = module.lookup_function("f".into()).unwrap();
        let body = &mut module.function_mut(id).body;
        let closure = find(body, Opcode::PartialApply)[0];

        assert!(try_delete_dead_closure(body, closure, &decls, true));
        assert_eq!(count(body, Opcode::DestroyValue), 1);
        assert_eq!(count(body, Opcode::StrongRelease), 0);
    }

    #[test]
    fn closures_with_real_uses_stay() {
        let (mut module, decls) = parse_with_decls(indoc! {"
            class C {}

            sil @callee : $@convention(thin) (Builtin.Int64, @owned C) -> ()

            sil @f : $@convention(thin) (@owned C) -> () {
            bb0(%0 : $C):
              %1 = function_ref @callee : $@convention(thin) (Builtin.Int64, @owned C) -> ()
              %2 = partial_apply %1(%0) : $@convention(thin) (Builtin.Int64, @owned C) -> ()
              %3 = integer_literal $Builtin.Int64, 0
              %4 = apply %2(%3) : $@callee_owned (Builtin.Int64) -> ()
              %5 = tuple ()
              return %5 : $()
            }
        "});
        let id = module.lookup_function("f".into()).unwrap();
        let body = &mut module.function_mut(id).body;
        let before = body.all_insts();
        let closure = find(body, Opcode::PartialApply)[0];

        assert!(!try_delete_dead_closure(body, closure, &decls, false));
        assert_eq!(body.all_insts(), before);
        assert!(!try_delete_dead_closure(body, find(body, Opcode::FunctionRef)[0], &decls, false));
    }

    #[test]
    fn thin_to_thick_closures_have_nothing_to_release() {
        let (mut module, decls) = parse_with_decls(indoc! {"
            sil @callee : $@convention(thin) () -> ()

            sil @f : $@convention(thin) () -> () {
            bb0:
              %0 = function_ref @callee : $@convention(thin) () -> ()
              %1 = thin_to_thick_function %0 : $@convention(thin) () -> () to $@callee_guaranteed () -> ()
              strong_release %1 : $@callee_guaranteed () -> ()
              %2 = tuple ()
              return %2 : $()
            }
        "});
        let id = module.lookup_function("f".into()).unwrap();
        let body = &mut module.function_mut(id).body;
        let closure = find(body, Opcode::ThinToThickFunction)[0];

        assert!(try_delete_dead_closure(body, closure, &decls, false));
        assert_eq!(body.all_insts().len(), 3);
    }

    #[test]
    fn final_releases_on_each_path() {
        let (module, _) = parse_with_decls(indoc! {"
            class C {}

            sil @f : $@convention(thin) (@owned C, Builtin.Int1) -> () {
            bb0(%0 : $C, %1 : $Builtin.Int1):
              strong_retain %0 : $C
              cond_br %1, bb1, bb2
            bb1:
              strong_release %0 : $C
              br bb3
            bb2:
              strong_release %0 : $C
              br bb3
            bb3:
              %2 = tuple ()
              return %2 : $()
            }
        "});
        let body = &module.function_named("f").unwrap().body;
        let argument = body.function_arguments()[0];
        let mut tracker = ReleaseTracker::new(is_closure_user, is_closure_conversion);

        assert!(get_final_releases_for_value(body, argument, &mut tracker));
        assert_eq!(tracker.tracked_users().len(), 3);

        let mut finals = tracker.final_releases().to_vec();
        finals.sort();
        assert_eq!(finals, find(body, Opcode::StrongRelease));
    }
}
