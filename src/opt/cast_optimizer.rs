//! Resolving dynamic casts at compile time. Each entry point classifies its
//! cast with the type oracle and then:
//!
//! - `WillFail`: branches to the failure block, or traps for unconditional
//!   casts.
//! - `WillSucceed`: replaces the cast with a static conversion, a bridging
//!   call or nothing at all if the result is unused.
//! - `MaySucceed`: only rewrites bridged casts, everything else is left for
//!   the runtime.
//!
//! None of the entry points report errors. A cast which can't be improved
//! is left untouched and the entry point returns `None` or `false`.

use crate::{
    logging::opt_log,
    oracle::{existential_protocols, CastFeasibility, TypeOracle},
    sil::{
        builder::Builder,
        function::{BlockId, Body, InsertPoint, InstId},
        instruction::{CastConsumptionKind, InstKind, LoadOwnership, Opcode, StoreOwnership},
        module::Module,
        types::{Conformance, SilType, Type, TypeKind},
        value::{OwnershipKind, ValueId, ValueKind},
    },
};

use super::bridging::BridgedCast;

/// How many casts were resolved in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CastStats {
    pub will_succeed: usize,
    pub will_fail: usize,
}

/// What happened to an `unconditional_checked_cast`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastRewrite {
    /// The cast always fails and was replaced by this trap
    Trap(InstId),
    /// Uses of the cast now use this value
    Replaced(ValueId),
    /// The cast had no uses
    Erased,
}

/// How an existential of some protocol stores its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExistentialRepresentation {
    Opaque,
    Class,
    Boxed,
}

/// Where code goes to run first in `block`
pub(super) fn block_start(body: &Body, block: BlockId) -> InsertPoint {
    match body.first_inst(block) {
        Some(first) => InsertPoint::Before(first),
        None => InsertPoint::End(block),
    }
}

pub struct CastOptimizer<'a> {
    pub(super) body: &'a mut Body,
    pub(super) module: &'a Module,
    pub(super) oracle: &'a dyn TypeOracle,
    stats: CastStats,
}

impl<'a> CastOptimizer<'a> {
    /// `module` is only read, to find bridging functions. The body being
    /// optimized must not be borrowed from it.
    pub fn new(body: &'a mut Body, module: &'a Module, oracle: &'a dyn TypeOracle) -> Self {
        Self {
            body,
            module,
            oracle,
            stats: CastStats::default(),
        }
    }

    pub fn stats(&self) -> CastStats {
        self.stats
    }

    /// Runs the entry point matching the opcode of `inst`. Returns true if
    /// the function changed.
    pub fn simplify(&mut self, inst: InstId) -> bool {
        match self.body.opcode(inst) {
            Opcode::CheckedCastBr => self.simplify_checked_cast_branch(inst).is_some(),
            Opcode::CheckedCastValueBr => self.simplify_checked_cast_value_branch(inst).is_some(),
            Opcode::CheckedCastAddrBr => self.simplify_checked_cast_addr_branch(inst).is_some(),
            Opcode::UnconditionalCheckedCast => self.optimize_unconditional_checked_cast(inst).is_some(),
            Opcode::UnconditionalCheckedCastAddr => self.optimize_unconditional_checked_cast_addr(inst),
            _ => false,
        }
    }

    fn will_succeed(&mut self) {
        self.stats.will_succeed += 1;
    }

    fn will_fail(&mut self) {
        self.stats.will_fail += 1;
    }

    /* Queries */

    fn is_defined_by(&self, value: ValueId, opcode: Opcode) -> bool {
        self.body
            .defining_inst(value)
            .is_some_and(|inst| self.body.opcode(inst) == opcode)
    }

    fn strip_up_casts(&self, mut value: ValueId) -> ValueId {
        while let Some(inst) = self.body.defining_inst(value) {
            if self.body.opcode(inst) != Opcode::Upcast {
                break;
            }

            let Some(operand) = self.body.operand_value(inst, 0) else {
                break;
            };
            value = operand;
        }

        value
    }

    pub(super) fn is_address_only(&self, ty: &Type) -> bool {
        ty.has_archetype() || ty.is_existential() && !self.oracle.is_class_bound_existential(ty)
    }

    /// Whether `checked_cast_br` and `unconditional_checked_cast` can
    /// express a cast between the two types
    fn can_use_scalar_checked_cast_instructions(&self, source: &Type, target: &Type) -> bool {
        let is_scalar = |ty: &Type| {
            let ty = ty.optional_payload().unwrap_or(ty);
            ty.is_any_metatype() || self.oracle.is_reference(ty)
        };

        is_scalar(source) && is_scalar(target)
    }

    fn is_bridgeable_object_type(&self, ty: &Type) -> bool {
        self.oracle.is_reference(ty) || ty.metatype_instance().is_some_and(|instance| self.oracle.is_class(instance))
    }

    /// Exactly one side is an object type, so the cast goes through a
    /// bridging conversion at runtime
    pub(super) fn is_bridging_cast(&self, source: &Type, target: &Type) -> bool {
        self.is_bridgeable_object_type(source) != self.is_bridgeable_object_type(target)
    }

    /// Conformances of `ty` to every protocol of `existential`
    fn conformances_for(&self, ty: &Type, existential: &Type) -> Option<Vec<Conformance>> {
        existential_protocols(existential)
            .into_iter()
            .filter(|protocol| protocol.value() != "AnyObject")
            .map(|protocol| self.oracle.lookup_conformance(ty, protocol))
            .collect()
    }

    fn preferred_existential_representation(&self, existential: &Type) -> ExistentialRepresentation {
        if self.oracle.is_class_bound_existential(existential) {
            return ExistentialRepresentation::Class;
        }

        match existential_protocols(existential).as_slice() {
            [protocol] if protocol.value() == "Error" => ExistentialRepresentation::Boxed,
            _ => ExistentialRepresentation::Opaque,
        }
    }

    /// If `dest` is a stack slot only written by `cast`, returns the single
    /// `destroy_addr` of it, when `allow_destroy` permits one
    fn unused_cast_destination(&self, dest: ValueId, cast: InstId, allow_destroy: bool) -> Option<Option<InstId>> {
        if !self.is_defined_by(dest, Opcode::AllocStack) {
            return None;
        }

        let mut destroy = None;

        for user in self.body.users(dest) {
            if user == cast || self.body.opcode(user) == Opcode::DeallocStack {
                continue;
            }

            if allow_destroy && destroy.is_none() && self.body.opcode(user) == Opcode::DestroyAddr {
                destroy = Some(user);
                continue;
            }

            return None;
        }

        Some(destroy)
    }

    /* Rewriting helpers */

    pub(super) fn emit_destroy_addr(builder: &mut Builder<'_>, oracle: &dyn TypeOracle, address: ValueId) {
        if !oracle.is_trivial(&builder.value_type(address).ty) {
            builder.create_destroy_addr(address);
        }
    }

    /// Replaces `inst` by a trap followed by `unreachable`
    fn replace_with_trap(&mut self, inst: InstId) -> InstId {
        for result in self.body.results(inst).to_vec() {
            self.body.replace_all_uses_with_undef(result);
        }

        let trap = Builder::before(self.body, inst).create(
            InstKind::Builtin {
                name: "int_trap".into(),
                subs: Vec::new(),
            },
            &[],
            vec![SilType::object(Type::empty_tuple())],
        );
        self.body.erase_instruction(inst);

        let unreachable = Builder::after(self.body, trap).create_unreachable();
        self.delete_instructions_after_unreachable(unreachable, trap);

        trap
    }

    /// Deletes everything after `unreachable` in its block. Stack
    /// deallocations move before `trap` instead.
    pub fn delete_instructions_after_unreachable(&mut self, unreachable: InstId, trap: InstId) {
        let mut cursor = self.body.next_inst(unreachable);

        while let Some(current) = cursor {
            cursor = self.body.next_inst(current);

            if self.body.opcode(current) == Opcode::DeallocStack {
                let deallocates_slot = self
                    .body
                    .operand_value(current, 0)
                    .is_some_and(|slot| self.body.value(slot).kind != ValueKind::Undef);

                if deallocates_slot {
                    self.body.move_before(current, trap);
                    continue;
                }
            }

            for result in self.body.results(current).to_vec() {
                self.body.replace_all_uses_with_undef(result);
            }
            self.body.erase_instruction(current);
        }
    }

    /// Emits the static equivalent of a cast of `operand` which is known to
    /// succeed. `None` if no instruction other than a runtime cast can do it.
    fn emit_successful_scalar_unconditional_cast(
        &mut self,
        before: InstId,
        operand: ValueId,
        cast_type: &SilType,
        source: &Type,
        target: &Type,
    ) -> Option<ValueId> {
        if self.body.value_type(operand) == cast_type {
            return Some(operand);
        }

        let oracle = self.oracle;
        let is_class_upcast =
            |sub: &Type, sup: &Type| oracle.is_class(sub) && oracle.is_class(sup) && oracle.is_same_or_subclass(sub, sup);

        let is_metatype_upcast = matches!(
            (source.kind(), target.kind()),
            (TypeKind::Metatype { .. }, TypeKind::Metatype { .. })
        ) && source
            .metatype_instance()
            .zip(target.metatype_instance())
            .is_some_and(|(sub, sup)| is_class_upcast(sub, sup));

        if is_class_upcast(source, target) || is_metatype_upcast {
            return Some(Builder::before(self.body, before).create_upcast(operand, cast_type.clone()));
        }

        if target.is_existential() && oracle.is_class_bound_existential(target) && oracle.is_class(source) {
            let conformances = self.conformances_for(source, target)?;

            return Some(Builder::before(self.body, before).create_init_existential_ref(
                operand,
                source.clone(),
                conformances,
                cast_type.clone(),
            ));
        }

        None
    }

    /// Emits the static equivalent of an address cast which is known to
    /// succeed, taking the source
    fn emit_successful_indirect_unconditional_cast(
        &mut self,
        before: InstId,
        src: ValueId,
        source: &Type,
        dest: ValueId,
        target: &Type,
    ) -> bool {
        let oracle = self.oracle;

        if source == target {
            Builder::before(self.body, before).create_copy_addr(src, dest, true, true);
            return true;
        }

        if oracle.is_class(source) && oracle.is_class(target) && oracle.is_same_or_subclass(source, target) {
            let mut builder = Builder::before(self.body, before);
            let value = builder.create_load(src, LoadOwnership::Unqualified);
            let upcast = builder.create_upcast(value, SilType::object(target.clone()));
            builder.create_store(upcast, dest, StoreOwnership::Unqualified);
            return true;
        }

        if target.is_existential() && oracle.is_class_bound_existential(target) && oracle.is_class(source) {
            let Some(conformances) = self.conformances_for(source, target) else {
                return false;
            };

            let mut builder = Builder::before(self.body, before);
            let value = builder.create_load(src, LoadOwnership::Unqualified);
            let existential =
                builder.create_init_existential_ref(value, source.clone(), conformances, SilType::object(target.clone()));
            builder.create_store(existential, dest, StoreOwnership::Unqualified);
            return true;
        }

        false
    }

    /// Rewrites `unconditional_checked_cast_addr` of a type into an
    /// existential of a protocol it is known to conform to, as a direct
    /// existential initialization
    pub fn optimize_statically_known_protocol_conformance(&mut self, inst: InstId) -> bool {
        let InstKind::CastAddr { source, target, .. } = self.body.kind(inst).clone() else {
            return false;
        };
        let (Some(src), Some(dest)) = (self.body.operand_value(inst, 0), self.body.operand_value(inst, 1)) else {
            return false;
        };

        if !target.is_existential() || source.is_existential() {
            return false;
        }

        let [protocol] = existential_protocols(&target)[..] else {
            return false;
        };

        if !self.oracle.is_protocol(protocol) {
            return false;
        }

        let Some(conformance) = self.oracle.lookup_conformance(&source, protocol) else {
            return false;
        };

        let representation = self.preferred_existential_representation(&target);
        let dest_type = self.body.value_type(dest).clone();
        let src_type = self.body.value_type(src).clone();
        let mut builder = Builder::before(self.body, inst);

        match representation {
            ExistentialRepresentation::Opaque => {
                let payload = builder.create_init_existential_addr(dest, source, vec![conformance]);
                builder.create_copy_addr(src, payload, true, true);
            }
            ExistentialRepresentation::Class => {
                let value = builder.create_load(src, LoadOwnership::Unqualified);
                let existential =
                    builder.create_init_existential_ref(value, source, vec![conformance], dest_type.object_type());
                builder.create_store(existential, dest, StoreOwnership::Unqualified);
            }
            ExistentialRepresentation::Boxed => {
                let boxed = builder.create_alloc_existential_box(dest_type, source, vec![conformance]);
                let payload = builder.create_project_existential_box(boxed, src_type.ty);
                let value = builder.create_load(src, LoadOwnership::Unqualified);
                builder.create_store(value, payload, StoreOwnership::Unqualified);
                builder.create_store(boxed, dest, StoreOwnership::Unqualified);
            }
        }

        opt_log!("initialized existential {target} directly with a {representation:?} payload");
        true
    }

    /* Pre-simplifications */

    /// Replaces `inst` by a non-exact `checked_cast_br` of `operand`
    fn recast_branch(&mut self, inst: InstId, operand: ValueId, target: SilType, success: BlockId, failure: BlockId) -> InstId {
        let branch = Builder::before(self.body, inst).create_checked_cast_br(operand, target, success, failure);
        self.body.erase_instruction(inst);
        branch
    }

    /// ```text
    /// %1 = metatype $A.Type
    /// [%2 = init_existential_metatype %1 ...]
    /// %3 = alloc_stack
    /// store %1 to %3 or store %2 to %3
    /// checked_cast_addr_br %3 to ...
    /// ```
    ///
    /// becomes a `checked_cast_br` of the metatype, storing the result on
    /// success
    fn optimize_checked_cast_addr_branch(&mut self, inst: InstId) -> Option<InstId> {
        let InstKind::CheckedCastAddrBr {
            target,
            success,
            failure,
            ..
        } = self.body.kind(inst).clone()
        else {
            return None;
        };
        let src = self.body.operand_value(inst, 0)?;
        let dest = self.body.operand_value(inst, 1)?;

        if self.body.value_type(src).ty.has_archetype() || self.body.value_type(dest).ty.has_archetype() {
            return None;
        }

        if !self.is_defined_by(src, Opcode::AllocStack) {
            return None;
        }

        let mut store = None;
        for user in self.body.users(src) {
            if user == inst || self.body.opcode(user) == Opcode::DeallocStack {
                continue;
            }

            if store.is_none()
                && self.body.opcode(user) == Opcode::Store
                && self.body.operand_value(user, 1) == Some(src)
            {
                store = Some(user);
                continue;
            }

            return None;
        }

        let stored = self.body.operand_value(store?, 0)?;
        let stored_def = self.body.defining_inst(stored)?;

        let metatype = match self.body.opcode(stored_def) {
            Opcode::Metatype => stored,
            Opcode::InitExistentialMetatype => {
                let operand = self.body.operand_value(stored_def, 0)?;
                if !self.is_defined_by(operand, Opcode::Metatype) {
                    return None;
                }
                operand
            }
            _ => return None,
        };

        self.body.single_predecessor(success)?;

        let metatype_type = self.body.value_type(metatype).ty.clone();
        if !self.can_use_scalar_checked_cast_instructions(&metatype_type, &target) {
            return None;
        }

        let dest_type = self.body.value_type(dest).object_type();
        let branch = Builder::before(self.body, inst).create_checked_cast_br(metatype, dest_type.clone(), success, failure);

        let argument = self.body.add_block_argument(success, dest_type, OwnershipKind::Owned);
        let start = block_start(self.body, success);
        Builder::new(self.body, start).create_store(argument, dest, StoreOwnership::Unqualified);

        self.body.erase_instruction(inst);
        Some(branch)
    }

    /// Propagates the concrete type behind an existential metatype into a
    /// `checked_cast_br`:
    ///
    /// ```text
    /// %0 = metatype $A.Type
    /// %1 = init_existential_metatype %0 ...
    /// checked_cast_br %1 to ...
    /// ```
    ///
    /// and the `existential_metatype` of an existential initialized exactly
    /// once, either in a stack slot by `init_existential_addr` or from an
    /// `alloc_ref` by `init_existential_ref`.
    fn optimize_checked_cast_branch(&mut self, inst: InstId) -> Option<InstId> {
        let InstKind::CheckedCastBr {
            exact: false,
            target,
            success,
            failure,
        } = self.body.kind(inst).clone()
        else {
            return None;
        };
        let operand = self.body.operand_value(inst, 0)?;
        let def = self.body.defining_inst(operand)?;

        match self.body.opcode(def) {
            Opcode::InitExistentialMetatype => {
                let metatype = self.body.operand_value(def, 0)?;
                if !self.is_defined_by(metatype, Opcode::Metatype) {
                    return None;
                }

                Some(self.recast_branch(inst, metatype, target, success, failure))
            }
            Opcode::ExistentialMetatype => {
                let block = self.body.inst(def).block;
                let representation = self.body.value_type(operand).ty.metatype_representation();
                let existential = self.body.operand_value(def, 0)?;
                let init = self.find_single_existential_initialization(existential, block)?;

                let InstKind::InitExistential { concrete, .. } = self.body.kind(init) else {
                    return None;
                };

                // Nothing is known statically about these
                if concrete.is_existential() || concrete.is_archetype() {
                    return None;
                }

                let metatype_type = SilType::object(Type::metatype(concrete.clone(), representation));
                let metatype = Builder::before(self.body, inst).create_metatype(metatype_type);

                Some(self.recast_branch(inst, metatype, target, success, failure))
            }
            _ => None,
        }
    }

    /// The only instruction initializing `existential`, in `block`
    fn find_single_existential_initialization(&self, existential: ValueId, block: BlockId) -> Option<InstId> {
        let def = self.body.defining_inst(existential)?;

        match self.body.opcode(def) {
            Opcode::AllocStack => {
                if self.body.inst(def).block != block {
                    return None;
                }

                let mut found = None;
                for user in self.body.users(existential) {
                    match self.body.opcode(user) {
                        opcode if opcode.is_debug_value() => {}
                        Opcode::ExistentialMetatype | Opcode::DestroyAddr | Opcode::DeallocStack => {}
                        Opcode::InitExistentialAddr if found.is_none() => found = Some(user),
                        _ => return None,
                    }
                }

                found.filter(|init| self.body.inst(*init).block == block)
            }
            Opcode::InitExistentialRef => {
                let allocation = self.body.operand_value(def, 0)?;
                let allocation_def = self.body.defining_inst(allocation)?;

                if self.body.opcode(allocation_def) != Opcode::AllocRef
                    || self.body.inst(allocation_def).block != block
                {
                    return None;
                }

                for user in self.body.users(allocation) {
                    match self.body.opcode(user) {
                        opcode if opcode.is_debug_value() => {}
                        Opcode::ExistentialMetatype | Opcode::StrongRelease => {}
                        _ if user == def => {}
                        _ => return None,
                    }
                }

                (self.body.inst(def).block == block).then_some(def)
            }
            _ => None,
        }
    }

    /* Entry points */

    /// `checked_cast_addr_br`. Returns the instruction the cast turned into.
    pub fn simplify_checked_cast_addr_branch(&mut self, inst: InstId) -> Option<InstId> {
        if let Some(rewritten) = self.optimize_checked_cast_addr_branch(inst) {
            return Some(rewritten);
        }

        let InstKind::CheckedCastAddrBr {
            consumption,
            source,
            target,
            success,
            failure,
        } = self.body.kind(inst).clone()
        else {
            return None;
        };
        let src = self.body.operand_value(inst, 0)?;
        let dest = self.body.operand_value(inst, 1)?;
        let block = self.body.inst(inst).block;
        let oracle = self.oracle;

        let exact = self.is_defined_by(src, Opcode::Metatype);
        let feasibility = oracle.classify_dynamic_cast(&source, &target, exact);

        if feasibility == CastFeasibility::WillFail {
            let mut builder = Builder::before(self.body, inst);
            if consumption.takes_on_failure() {
                Self::emit_destroy_addr(&mut builder, oracle, src);
            }
            let branch = builder.create_br(failure, &[]);

            self.body.erase_instruction(inst);
            self.will_fail();
            return Some(branch);
        }

        let result_not_used = self.unused_cast_destination(dest, inst, false).is_some();

        let bridged = self.optimize_bridged_casts(BridgedCast {
            inst,
            consumption,
            conditional: feasibility == CastFeasibility::MaySucceed,
            src,
            dest: Some(dest),
            source: source.clone(),
            target: target.clone(),
            success: Some(success),
            failure: Some(failure),
        });

        if bridged.is_none() {
            if feasibility == CastFeasibility::MaySucceed {
                return None;
            }

            if result_not_used {
                let mut builder = Builder::before(self.body, inst);
                if consumption.takes_on_success() {
                    Self::emit_destroy_addr(&mut builder, oracle, src);
                }

                self.body.erase_instruction(inst);
                let branch = Builder::at_end(self.body, block).create_br(success, &[]);
                self.will_succeed();
                return Some(branch);
            }

            if !self.body.value_type(src).is_address() || !self.body.value_type(dest).is_address() {
                return None;
            }

            // Both taking kinds reduce to an unconditional cast since the
            // failure path is gone
            if consumption == CastConsumptionKind::CopyOnSuccess {
                return None;
            }

            if !self.emit_successful_indirect_unconditional_cast(inst, src, &source, dest, &target) {
                return None;
            }
            self.body.erase_instruction(inst);
        }

        let last = self.body.last_inst(block)?;
        let rewritten = if self.body.kind(last).is_terminator() {
            last
        } else {
            Builder::at_end(self.body, block).create_br(success, &[])
        };

        self.will_succeed();
        Some(rewritten)
    }

    /// `checked_cast_br`. Returns the instruction the cast turned into.
    pub fn simplify_checked_cast_branch(&mut self, inst: InstId) -> Option<InstId> {
        let InstKind::CheckedCastBr {
            exact,
            target: cast_type,
            success,
            failure,
        } = self.body.kind(inst).clone()
        else {
            return None;
        };
        let operand = self.body.operand_value(inst, 0)?;

        // The dynamic type of an allocation is known
        if exact {
            let allocation = self.strip_up_casts(operand);
            if !self.is_defined_by(allocation, Opcode::AllocRef) {
                return None;
            }

            let succeeds = self.body.value_type(allocation) == &cast_type;
            let mut builder = Builder::before(self.body, inst);
            let branch = if succeeds {
                builder.create_br(success, &[allocation])
            } else {
                builder.create_br(failure, &[])
            };

            self.body.erase_instruction(inst);
            if succeeds {
                self.will_succeed();
            } else {
                self.will_fail();
            }
            return Some(branch);
        }

        let presimplified = self.optimize_checked_cast_branch(inst);
        let inst = presimplified.unwrap_or(inst);
        let operand = self.body.operand_value(inst, 0)?;

        let source = self.body.value_type(operand).ty.clone();
        let target = cast_type.ty.clone();
        let exact = self.is_defined_by(operand, Opcode::Metatype);
        let feasibility = self.oracle.classify_dynamic_cast(&source, &target, exact);

        if feasibility == CastFeasibility::WillFail {
            let branch = Builder::before(self.body, inst).create_br(failure, &[]);
            self.body.erase_instruction(inst);
            self.will_fail();
            return Some(branch);
        }

        let result_not_used = self
            .body
            .block_args(success)
            .first()
            .is_none_or(|argument| !self.body.has_uses(*argument));

        let casted = if self.body.value_type(operand) != &cast_type {
            // Bridging conversions can't be expressed on scalar casts
            if feasibility == CastFeasibility::MaySucceed {
                return presimplified;
            }

            if result_not_used {
                self.body.undef(cast_type)
            } else {
                if !self.can_use_scalar_checked_cast_instructions(&source, &target) {
                    return presimplified;
                }

                match self.emit_successful_scalar_unconditional_cast(inst, operand, &cast_type, &source, &target) {
                    Some(casted) => casted,
                    None => Builder::before(self.body, inst).create_unconditional_checked_cast(operand, cast_type),
                }
            }
        } else {
            operand
        };

        let branch = Builder::before(self.body, inst).create_br(success, &[casted]);
        self.body.erase_instruction(inst);
        self.will_succeed();
        Some(branch)
    }

    /// `checked_cast_value_br`. Returns the instruction the cast turned into.
    pub fn simplify_checked_cast_value_branch(&mut self, inst: InstId) -> Option<InstId> {
        let InstKind::CheckedCastValueBr {
            target: cast_type,
            success,
            failure,
        } = self.body.kind(inst).clone()
        else {
            return None;
        };
        let operand = self.body.operand_value(inst, 0)?;

        let source = self.body.value_type(operand).ty.clone();
        let target = cast_type.ty.clone();
        let exact = self.is_defined_by(operand, Opcode::Metatype);
        let feasibility = self.oracle.classify_dynamic_cast(&source, &target, exact);

        if feasibility == CastFeasibility::WillFail {
            let branch = Builder::before(self.body, inst).create_br(failure, &[]);
            self.body.erase_instruction(inst);
            self.will_fail();
            return Some(branch);
        }

        let result_not_used = self
            .body
            .block_args(success)
            .first()
            .is_none_or(|argument| !self.body.has_uses(*argument));

        let casted = if self.body.value_type(operand) != &cast_type {
            if feasibility == CastFeasibility::MaySucceed
                || !self.can_use_scalar_checked_cast_instructions(&source, &target)
            {
                return None;
            }

            let casted = if result_not_used {
                Some(self.body.undef(cast_type.clone()))
            } else {
                self.emit_successful_scalar_unconditional_cast(inst, operand, &cast_type, &source, &target)
            };

            match casted {
                Some(casted) => casted,
                None => Builder::before(self.body, inst).create_conversion(
                    Opcode::UnconditionalCheckedCastValue,
                    operand,
                    cast_type,
                ),
            }
        } else {
            operand
        };

        let branch = Builder::before(self.body, inst).create_br(success, &[casted]);
        self.body.erase_instruction(inst);
        self.will_succeed();
        Some(branch)
    }

    /// `unconditional_checked_cast`
    pub fn optimize_unconditional_checked_cast(&mut self, inst: InstId) -> Option<CastRewrite> {
        let operand = self.body.operand_value(inst, 0)?;
        let result = self.body.single_result(inst)?;
        let cast_type = self.body.value_type(result).clone();

        let source = self.body.value_type(operand).ty.clone();
        let target = cast_type.ty.clone();
        let exact = self.is_defined_by(operand, Opcode::Metatype);
        let feasibility = self.oracle.classify_dynamic_cast(&source, &target, exact);

        if feasibility == CastFeasibility::WillFail {
            let trap = self.replace_with_trap(inst);
            self.will_fail();
            return Some(CastRewrite::Trap(trap));
        }

        if feasibility == CastFeasibility::WillSucceed && !self.body.has_uses(result) {
            self.body.erase_instruction(inst);
            self.will_succeed();
            return Some(CastRewrite::Erased);
        }

        let bridged = self.optimize_bridged_casts(BridgedCast {
            inst,
            consumption: CastConsumptionKind::CopyOnSuccess,
            conditional: false,
            src: operand,
            dest: None,
            source: source.clone(),
            target: target.clone(),
            success: None,
            failure: None,
        });

        if let Some(bridged) = bridged {
            let value = self.body.single_result(bridged)?;
            self.body.replace_all_uses_with(result, value);
            self.body.erase_instruction(inst);
            self.will_succeed();
            return Some(CastRewrite::Replaced(value));
        }

        if feasibility == CastFeasibility::MaySucceed || self.is_bridging_cast(&source, &target) {
            return None;
        }

        let value = self.emit_successful_scalar_unconditional_cast(inst, operand, &cast_type, &source, &target)?;
        self.body.replace_all_uses_with(result, value);
        self.body.erase_instruction(inst);
        self.will_succeed();
        Some(CastRewrite::Replaced(value))
    }

    /// `unconditional_checked_cast_addr`. Returns true if the function
    /// changed.
    pub fn optimize_unconditional_checked_cast_addr(&mut self, inst: InstId) -> bool {
        let InstKind::CastAddr {
            opcode: Opcode::UnconditionalCheckedCastAddr,
            source,
            target,
        } = self.body.kind(inst).clone()
        else {
            return false;
        };
        let (Some(src), Some(dest)) = (self.body.operand_value(inst, 0), self.body.operand_value(inst, 1)) else {
            return false;
        };

        let exact = self.is_defined_by(src, Opcode::Metatype);
        let feasibility = self.oracle.classify_dynamic_cast(&source, &target, exact);

        // Forced bridging casts fail inside the conversion function
        if feasibility == CastFeasibility::MaySucceed && !self.is_bridging_cast(&source, &target) {
            return false;
        }

        if feasibility == CastFeasibility::WillFail {
            // Loadable destinations get a value so they stay initialized
            let dest_type = self.body.value_type(dest).object_type();
            if !self.is_address_only(&dest_type.ty) {
                let undef = self.body.undef(dest_type);
                Builder::before(self.body, inst).create_store(undef, dest, StoreOwnership::Unqualified);
            }

            self.replace_with_trap(inst);
            self.will_fail();
            return true;
        }

        // An unused result makes the cast removable even if it could fail
        if let Some(destroy) = self.unused_cast_destination(dest, inst, true) {
            Builder::before(self.body, inst).create_destroy_addr(src);
            if let Some(destroy) = destroy {
                self.body.erase_instruction(destroy);
            }

            self.body.erase_instruction(inst);
            self.will_succeed();
            return true;
        }

        let bridged = self.optimize_bridged_casts(BridgedCast {
            inst,
            consumption: CastConsumptionKind::TakeAlways,
            conditional: false,
            src,
            dest: Some(dest),
            source: source.clone(),
            target: target.clone(),
            success: None,
            failure: None,
        });

        if bridged.is_some() {
            self.will_succeed();
            return true;
        }

        if feasibility == CastFeasibility::MaySucceed {
            return false;
        }

        if self.optimize_statically_known_protocol_conformance(inst) {
            self.body.erase_instruction(inst);
            self.will_succeed();
            return true;
        }

        if self.is_bridging_cast(&source, &target)
            || !self.emit_successful_indirect_unconditional_cast(inst, src, &source, dest, &target)
        {
            return false;
        }

        self.body.erase_instruction(inst);
        self.will_succeed();
        true
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        opt::test_support::{count, find, parse_with_decls},
        oracle::DeclTable,
        sil::module::Module,
    };

    fn optimize<R>(
        text: &str,
        function: &str,
        run: impl FnOnce(&mut CastOptimizer<'_>) -> R,
    ) -> (R, Body, CastStats) {
        let (mut module, decls) = parse_with_decls(text);
        let id = module.lookup_function(function.into()).unwrap();
        let mut body = std::mem::take(&mut module.function_mut(id).body);

        let mut optimizer = CastOptimizer::new(&mut body, &module, &decls);
        let result = run(&mut optimizer);
        let stats = optimizer.stats();

        (result, body, stats)
    }

    fn only(body: &Body, opcode: Opcode) -> InstId {
        let found = find(body, opcode);
        assert_eq!(found.len(), 1, "expected a single {opcode}");
        found[0]
    }

    const CLASSES: &str = indoc! {"
        protocol P {}
        class C : P {}
        class D : C {}
        final class E {}
    "};

    #[test]
    fn existential_metatype_of_a_known_class_branches_to_success() {
        let text = format!(
            "{CLASSES}{}",
            indoc! {"
                sil @f : $@convention(thin) () -> () {
                bb0:
                  %0 = metatype $@thick C.Type
                  %1 = init_existential_metatype %0 : $@thick C.Type, $@thick P.Type
                  checked_cast_br %1 : $@thick P.Type to $@thick C.Type, bb1, bb2
                bb1(%2 : $@thick C.Type):
                  %3 = tuple ()
                  return %3 : $()
                bb2:
                  unreachable
                }
            "}
        );

        let (branch, body, stats) = optimize(&text, "f", |optimizer| {
            let cast = only(optimizer.body, Opcode::CheckedCastBr);
            optimizer.simplify_checked_cast_branch(cast)
        });

        let branch = branch.unwrap();
        let metatype = body.single_result(only(&body, Opcode::Metatype)).unwrap();

        assert_eq!(body.opcode(branch), Opcode::Br);
        assert_eq!(body.operand_values(branch), vec![metatype]);
        assert_eq!(body.successors(body.inst(branch).block).len(), 1);
        assert_eq!(count(&body, Opcode::CheckedCastBr), 0);
        assert_eq!(stats.will_succeed, 1);

        let failure = body.block_order[2];
        assert!(body.predecessors(failure).is_empty());
    }

    #[test]
    fn existential_metatype_of_an_initialized_stack_slot() {
        let text = format!(
            "{CLASSES}{}",
            indoc! {"
                struct S : P {}

                sil @f : $@convention(thin) () -> () {
                bb0:
                  %0 = alloc_stack $P
                  %1 = init_existential_addr %0 : $*P, $S
                  %2 = existential_metatype $@thick P.Type, %0 : $*P
                  checked_cast_br %2 : $@thick P.Type to $@thick S.Type, bb1, bb2
                bb1(%3 : $@thick S.Type):
                  destroy_addr %0 : $*P
                  dealloc_stack %0 : $*P
                  %4 = tuple ()
                  return %4 : $()
                bb2:
                  unreachable
                }
            "}
        );

        let (branch, body, _) = optimize(&text, "f", |optimizer| {
            optimizer.simplify(only(optimizer.body, Opcode::CheckedCastBr))
        });

        assert!(branch);
        assert_eq!(count(&body, Opcode::CheckedCastBr), 0);

        let metatype = only(&body, Opcode::Metatype);
        assert_eq!(body.value_type(body.single_result(metatype).unwrap()).ty.to_string(), "@thick S.Type");
        assert_eq!(count(&body, Opcode::Br), 1);
    }

    #[test]
    fn class_casts() {
        let text = format!(
            "{CLASSES}{}",
            indoc! {"
                sil @up : $@convention(thin) (@owned D) -> @owned C {
                bb0(%0 : $D):
                  checked_cast_br %0 : $D to $C, bb1, bb2
                bb1(%1 : $C):
                  return %1 : $C
                bb2:
                  unreachable
                }

                sil @unrelated : $@convention(thin) (@owned C) -> () {
                bb0(%0 : $C):
                  checked_cast_br %0 : $C to $E, bb1, bb2
                bb1(%1 : $E):
                  br bb3
                bb2:
                  br bb3
                bb3:
                  %2 = tuple ()
                  return %2 : $()
                }

                sil @down : $@convention(thin) (@owned C) -> () {
                bb0(%0 : $C):
                  checked_cast_br %0 : $C to $D, bb1, bb2
                bb1(%1 : $D):
                  br bb3
                bb2:
                  br bb3
                bb3:
                  %2 = tuple ()
                  return %2 : $()
                }
            "}
        );

        let (_, body, stats) = optimize(&text, "up", |optimizer| {
            optimizer.simplify(only(optimizer.body, Opcode::CheckedCastBr))
        });
        let upcast = only(&body, Opcode::Upcast);
        let branch = only(&body, Opcode::Br);
        assert_eq!(body.operand_values(branch), body.results(upcast).to_vec());
        assert_eq!(stats.will_succeed, 1);

        let (_, body, stats) = optimize(&text, "unrelated", |optimizer| {
            optimizer.simplify(only(optimizer.body, Opcode::CheckedCastBr))
        });
        assert_eq!(count(&body, Opcode::CheckedCastBr), 0);
        assert_eq!(stats.will_fail, 1);
        assert_eq!(body.predecessors(body.block_order[1]), Vec::new());

        let (changed, body, _) = optimize(&text, "down", |optimizer| {
            optimizer.simplify(only(optimizer.body, Opcode::CheckedCastBr))
        });
        assert!(!changed);
        assert_eq!(count(&body, Opcode::CheckedCastBr), 1);
    }

    #[test]
    fn exact_casts_of_allocations() {
        let text = format!(
            "{CLASSES}{}",
            indoc! {"
                sil @f : $@convention(thin) () -> () {
                bb0:
                  %0 = alloc_ref $D
                  %1 = upcast %0 : $D to $C
                  checked_cast_br [exact] %1 : $C to $D, bb1, bb2
                bb1(%2 : $D):
                  strong_release %2 : $D
                  br bb3
                bb2:
                  strong_release %1 : $C
                  br bb3
                bb3:
                  %3 = tuple ()
                  return %3 : $()
                }
            "}
        );

        let (branch, body, _) = optimize(&text, "f", |optimizer| {
            optimizer.simplify_checked_cast_branch(only(optimizer.body, Opcode::CheckedCastBr))
        });

        let allocation = body.single_result(only(&body, Opcode::AllocRef)).unwrap();
        assert_eq!(body.operand_values(branch.unwrap()), vec![allocation]);
    }

    #[test]
    fn failing_unconditional_casts_trap() {
        let text = format!(
            "{CLASSES}{}",
            indoc! {"
                sil @f : $@convention(thin) (@owned C) -> () {
                bb0(%0 : $C):
                  %1 = alloc_stack $Builtin.Int64
                  %2 = unconditional_checked_cast %0 : $C to $E
                  strong_release %2 : $E
                  dealloc_stack %1 : $*Builtin.Int64
                  %3 = tuple ()
                  return %3 : $()
                }
            "}
        );

        let (rewrite, body, stats) = optimize(&text, "f", |optimizer| {
            optimizer.optimize_unconditional_checked_cast(only(optimizer.body, Opcode::UnconditionalCheckedCast))
        });

        let Some(CastRewrite::Trap(trap)) = rewrite else {
            panic!("expected a trap, got {rewrite:?}");
        };
        assert_eq!(stats.will_fail, 1);

        let entry = body.entry_block().unwrap();
        let opcodes = body.insts_in(entry).map(|inst| body.opcode(inst)).collect::<Vec<_>>();
        assert_eq!(
            opcodes,
            vec![Opcode::AllocStack, Opcode::DeallocStack, Opcode::Builtin, Opcode::Unreachable]
        );
        assert_eq!(body.next_inst(trap).map(|inst| body.opcode(inst)), Some(Opcode::Unreachable));
    }

    #[test]
    fn succeeding_unconditional_casts() {
        let text = format!(
            "{CLASSES}{}",
            indoc! {"
                protocol Q : class {}
                class F : Q {}

                sil @used : $@convention(thin) (@owned D) -> @owned C {
                bb0(%0 : $D):
                  %1 = unconditional_checked_cast %0 : $D to $C
                  return %1 : $C
                }

                sil @unused : $@convention(thin) (@owned D) -> () {
                bb0(%0 : $D):
                  %1 = unconditional_checked_cast %0 : $D to $C
                  %2 = tuple ()
                  return %2 : $()
                }

                sil @existential : $@convention(thin) (@owned F) -> @owned Q {
                bb0(%0 : $F):
                  %1 = unconditional_checked_cast %0 : $F to $Q
                  return %1 : $Q
                }
            "}
        );

        let (rewrite, body, _) = optimize(&text, "used", |optimizer| {
            optimizer.optimize_unconditional_checked_cast(only(optimizer.body, Opcode::UnconditionalCheckedCast))
        });
        let upcast = body.single_result(only(&body, Opcode::Upcast)).unwrap();
        assert_eq!(rewrite, Some(CastRewrite::Replaced(upcast)));
        assert_eq!(body.operand_value(only(&body, Opcode::Return), 0), Some(upcast));

        let (rewrite, body, _) = optimize(&text, "unused", |optimizer| {
            optimizer.optimize_unconditional_checked_cast(only(optimizer.body, Opcode::UnconditionalCheckedCast))
        });
        assert_eq!(rewrite, Some(CastRewrite::Erased));
        assert_eq!(count(&body, Opcode::UnconditionalCheckedCast), 0);

        let (rewrite, body, _) = optimize(&text, "existential", |optimizer| {
            optimizer.optimize_unconditional_checked_cast(only(optimizer.body, Opcode::UnconditionalCheckedCast))
        });
        assert!(matches!(rewrite, Some(CastRewrite::Replaced(_))));
        let init = only(&body, Opcode::InitExistentialRef);
        let InstKind::InitExistential { conformances, .. } = body.kind(init) else {
            panic!("expected an existential initialization");
        };
        assert_eq!(conformances.len(), 1);
    }

    #[test]
    fn addr_branch_outcomes_follow_the_consumption_kind() {
        let text = |consumption: &str| {
            format!(
                "{CLASSES}{}",
                indoc! {"
                    struct S {
                      var c: C
                    }

                    sil @f : $@convention(thin) (@in S) -> () {
                    bb0(%0 : $*S):
                      %1 = alloc_stack $C
                      checked_cast_addr_br CONSUMPTION S in %0 : $*S to C in %1 : $*C, bb1, bb2
                    bb1:
                      dealloc_stack %1 : $*C
                      br bb3
                    bb2:
                      dealloc_stack %1 : $*C
                      br bb3
                    bb3:
                      %2 = tuple ()
                      return %2 : $()
                    }
                "}
            )
            .replace("CONSUMPTION", consumption)
        };

        // S neither is nor bridges to a class, so the cast fails and only a
        // taking cast destroys the source
        for (consumption, destroys) in [("take_always", 1), ("take_on_success", 0), ("copy_on_success", 0)] {
            let (branch, body, stats) = optimize(&text(consumption), "f", |optimizer| {
                optimizer.simplify_checked_cast_addr_branch(only(optimizer.body, Opcode::CheckedCastAddrBr))
            });

            let branch = branch.unwrap();
            assert_eq!(body.inst(branch).kind.successors(), vec![body.block_order[2]], "{consumption}");
            assert_eq!(count(&body, Opcode::DestroyAddr), destroys, "{consumption}");
            assert_eq!(stats.will_fail, 1);
        }
    }

    #[test]
    fn unused_addr_cast_results_are_dropped() {
        let text = |consumption: &str| {
            format!(
                "{CLASSES}{}",
                indoc! {"
                    sil @f : $@convention(thin) (@in D) -> () {
                    bb0(%0 : $*D):
                      %1 = alloc_stack $C
                      checked_cast_addr_br CONSUMPTION D in %0 : $*D to C in %1 : $*C, bb1, bb2
                    bb1:
                      dealloc_stack %1 : $*C
                      br bb3
                    bb2:
                      dealloc_stack %1 : $*C
                      br bb3
                    bb3:
                      %2 = tuple ()
                      return %2 : $()
                    }
                "}
            )
            .replace("CONSUMPTION", consumption)
        };

        for (consumption, destroys) in [("take_always", 1), ("take_on_success", 1), ("copy_on_success", 0)] {
            let (branch, body, _) = optimize(&text(consumption), "f", |optimizer| {
                optimizer.simplify_checked_cast_addr_branch(only(optimizer.body, Opcode::CheckedCastAddrBr))
            });

            let branch = branch.unwrap();
            assert_eq!(body.inst(branch).kind.successors(), vec![body.block_order[1]], "{consumption}");
            assert_eq!(count(&body, Opcode::DestroyAddr), destroys, "{consumption}");
        }
    }

    #[test]
    fn used_addr_cast_results_become_unconditional() {
        let text = format!(
            "{CLASSES}{}",
            indoc! {"
                sil @f : $@convention(thin) (@in D) -> @owned C {
                bb0(%0 : $*D):
                  %1 = alloc_stack $C
                  checked_cast_addr_br take_on_success D in %0 : $*D to C in %1 : $*C, bb1, bb2
                bb1:
                  %2 = load %1 : $*C
                  dealloc_stack %1 : $*C
                  return %2 : $C
                bb2:
                  unreachable
                }
            "}
        );

        let (branch, body, _) = optimize(&text, "f", |optimizer| {
            optimizer.simplify_checked_cast_addr_branch(only(optimizer.body, Opcode::CheckedCastAddrBr))
        });

        assert_eq!(body.opcode(branch.unwrap()), Opcode::Br);
        assert_eq!(count(&body, Opcode::Upcast), 1);
        assert_eq!(count(&body, Opcode::Store), 1);
        assert_eq!(count(&body, Opcode::Load), 2);
    }

    #[test]
    fn stored_metatypes_cast_as_scalars() {
        let text = format!(
            "{CLASSES}{}",
            indoc! {"
                sil @f : $@convention(thin) () -> () {
                bb0:
                  %0 = metatype $@thick D.Type
                  %1 = alloc_stack $@thick D.Type
                  store %0 to %1 : $*@thick D.Type
                  %2 = alloc_stack $@thick C.Type
                  checked_cast_addr_br take_always D.Type in %1 : $*@thick D.Type to C.Type in %2 : $*@thick C.Type, bb1, bb2
                bb1:
                  br bb3
                bb2:
                  br bb3
                bb3:
                  dealloc_stack %2 : $*@thick C.Type
                  dealloc_stack %1 : $*@thick D.Type
                  %3 = tuple ()
                  return %3 : $()
                }
            "}
        );

        let (branch, body, _) = optimize(&text, "f", |optimizer| {
            optimizer.simplify_checked_cast_addr_branch(only(optimizer.body, Opcode::CheckedCastAddrBr))
        });

        let branch = branch.unwrap();
        assert_eq!(body.opcode(branch), Opcode::CheckedCastBr);

        let success = body.block_order[1];
        assert_eq!(body.block_args(success).len(), 1);
        assert_eq!(body.first_inst(success).map(|inst| body.opcode(inst)), Some(Opcode::Store));
    }

    #[test]
    fn statically_known_conformances_initialize_existentials() {
        let text = format!(
            "{CLASSES}{}",
            indoc! {"
                protocol Q : class {}
                class F : Q {}
                struct S : P {}
                struct Failure : Error {}

                sil @opaque : $@convention(thin) (@in S) -> @out P {
                bb0(%0 : $*P, %1 : $*S):
                  unconditional_checked_cast_addr S in %1 : $*S to P in %0 : $*P
                  %2 = tuple ()
                  return %2 : $()
                }

                sil @class : $@convention(thin) (@in F) -> @out Q {
                bb0(%0 : $*Q, %1 : $*F):
                  unconditional_checked_cast_addr F in %1 : $*F to Q in %0 : $*Q
                  %2 = tuple ()
                  return %2 : $()
                }

                sil @boxed : $@convention(thin) (@in Failure) -> @out Error {
                bb0(%0 : $*Error, %1 : $*Failure):
                  unconditional_checked_cast_addr Failure in %1 : $*Failure to Error in %0 : $*Error
                  %2 = tuple ()
                  return %2 : $()
                }
            "}
        );

        let run = |function: &str| {
            let (changed, body, stats) = optimize(&text, function, |optimizer| {
                optimizer.optimize_unconditional_checked_cast_addr(only(optimizer.body, Opcode::UnconditionalCheckedCastAddr))
            });
            assert!(changed, "{function}");
            assert_eq!(stats.will_succeed, 1, "{function}");
            assert_eq!(count(&body, Opcode::UnconditionalCheckedCastAddr), 0, "{function}");
            body
        };

        let body = run("opaque");
        assert_eq!(count(&body, Opcode::InitExistentialAddr), 1);
        assert_eq!(count(&body, Opcode::CopyAddr), 1);

        let body = run("class");
        assert_eq!(count(&body, Opcode::InitExistentialRef), 1);
        assert_eq!(count(&body, Opcode::Store), 1);

        let body = run("boxed");
        assert_eq!(count(&body, Opcode::AllocExistentialBox), 1);
        assert_eq!(count(&body, Opcode::ProjectExistentialBox), 1);
        assert_eq!(count(&body, Opcode::Store), 2);
    }

    #[test]
    fn failing_addr_casts_store_undef_and_trap() {
        let text = format!(
            "{CLASSES}{}",
            indoc! {"
                sil @f : $@convention(thin) (@in C) -> () {
                bb0(%0 : $*C):
                  %1 = alloc_stack $E
                  unconditional_checked_cast_addr C in %0 : $*C to E in %1 : $*E
                  %2 = load %1 : $*E
                  strong_release %2 : $E
                  dealloc_stack %1 : $*E
                  %3 = tuple ()
                  return %3 : $()
                }
            "}
        );

        let (changed, body, stats) = optimize(&text, "f", |optimizer| {
            optimizer.optimize_unconditional_checked_cast_addr(only(optimizer.body, Opcode::UnconditionalCheckedCastAddr))
        });

        assert!(changed);
        assert_eq!(stats.will_fail, 1);

        let entry = body.entry_block().unwrap();
        let opcodes = body.insts_in(entry).map(|inst| body.opcode(inst)).collect::<Vec<_>>();
        assert_eq!(
            opcodes,
            vec![
                Opcode::AllocStack,
                Opcode::Store,
                Opcode::DeallocStack,
                Opcode::Builtin,
                Opcode::Unreachable,
            ]
        );
    }

    #[test]
    fn runtime_dependent_casts_stay() {
        let text = format!(
            "{CLASSES}{}",
            indoc! {"
                sil @f : $@convention(thin) (@in C) -> @out D {
                bb0(%0 : $*D, %1 : $*C):
                  unconditional_checked_cast_addr C in %1 : $*C to D in %0 : $*D
                  %2 = tuple ()
                  return %2 : $()
                }
            "}
        );

        let (changed, body, stats) = optimize(&text, "f", |optimizer| {
            let cast = only(optimizer.body, Opcode::UnconditionalCheckedCastAddr);
            optimizer.simplify(cast)
        });

        assert!(!changed);
        assert_eq!(stats, CastStats::default());
        assert_eq!(count(&body, Opcode::UnconditionalCheckedCastAddr), 1);
    }

    #[test]
    fn classification_is_stable() {
        let decls = DeclTable::with_standard_library();
        let module = Module::new();
        let mut body = Body::default();
        let optimizer = CastOptimizer::new(&mut body, &module, &decls);

        let int = Type::nominal("Int", Vec::new());
        let any = Type::existential(Vec::new());
        let first = optimizer.oracle.classify_dynamic_cast(&int, &any, false);

        for _ in 0..4 {
            assert_eq!(optimizer.oracle.classify_dynamic_cast(&int, &any, false), first);
        }
        assert_eq!(first, CastFeasibility::WillSucceed);
    }
}
