//! Casts between value types and the Objective-C classes they bridge to.
//! Such a cast becomes a call of the conversion function of the value type
//! in either direction.

use crate::{
    logging::opt_log,
    oracle::{BridgingFunction, OBJECTIVE_C_BRIDGEABLE},
    sil::{
        builder::Builder,
        function::{BlockId, InsertPoint, InstId},
        instruction::{CastConsumptionKind, DebugVar, DeclRef, InstKind, LoadOwnership, Opcode, StoreOwnership},
        types::{MetatypeRepresentation, ParameterConvention, SilType, Substitution, Type},
        value::{OwnershipKind, ValueId},
    },
};

use super::cast_optimizer::{block_start, CastOptimizer};

/// A cast which may be a bridging conversion. Scalar casts have no
/// destination and no successors.
pub(super) struct BridgedCast {
    pub inst: InstId,
    pub consumption: CastConsumptionKind,
    /// The cast may fail at runtime and needs its failure path
    pub conditional: bool,
    pub src: ValueId,
    pub dest: Option<ValueId>,
    pub source: Type,
    pub target: Type,
    pub success: Option<BlockId>,
    pub failure: Option<BlockId>,
}

/// How the result of `_bridgeToObjectiveC` reaches the target class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassConversion {
    Same,
    Upcast,
    Downcast,
}

/// Reference counting around a `_bridgeToObjectiveC` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Ownership {
    retain_before: bool,
    release_after: bool,
    release_in_success: bool,
}

impl Ownership {
    fn for_parameter(convention: ParameterConvention, consumption: CastConsumptionKind, address_only: bool) -> Option<Self> {
        use CastConsumptionKind::*;

        let (retain_before, release_after, release_in_success) = match convention {
            ParameterConvention::DirectGuaranteed | ParameterConvention::IndirectInGuaranteed => match consumption {
                TakeAlways => (false, true, false),
                TakeOnSuccess => (false, false, true),
                CopyOnSuccess => (true, true, false),
            },
            ParameterConvention::DirectOwned
            | ParameterConvention::IndirectIn
            | ParameterConvention::IndirectInConstant => match consumption {
                TakeAlways => (false, false, false),
                TakeOnSuccess => (true, false, true),
                CopyOnSuccess => (true, false, false),
            },
            // An unowned parameter is +0 and the callee consumes nothing, the
            // same contract as guaranteed. A taking cast still owns the source
            // afterwards and has to release it. Address-only values can't be
            // passed unowned.
            ParameterConvention::DirectUnowned if !address_only => match consumption {
                TakeAlways => (false, true, false),
                TakeOnSuccess => (false, false, true),
                CopyOnSuccess => (false, false, false),
            },
            ParameterConvention::DirectUnowned
            | ParameterConvention::IndirectInout
            | ParameterConvention::IndirectInoutAliasable => return None,
        };

        Some(Self {
            retain_before,
            release_after,
            release_in_success,
        })
    }
}

impl CastOptimizer<'_> {
    /// Rewrites a cast between a bridgeable value type and a class into a
    /// call of the bridging function. Returns the instruction producing the
    /// converted value. The cast itself is erased unless it was scalar.
    pub(super) fn optimize_bridged_casts(&mut self, cast: BridgedCast) -> Option<InstId> {
        let oracle = self.oracle;
        let (source, target) = (&cast.source, &cast.target);

        if source.is_existential() || target.is_existential() || source.has_archetype() || target.has_archetype() {
            return None;
        }

        let class_and_struct = oracle.is_class(source) && oracle.is_struct(target)
            || oracle.is_struct(source) && oracle.is_class(target);
        if !class_and_struct {
            return None;
        }

        let bridged_source = oracle.bridged_objc_type(source)?;
        let bridged_target = oracle.bridged_objc_type(target)?;

        let source_is_objc = bridged_source == *source;
        let target_is_objc = bridged_target == *target;
        if source_is_objc == target_is_objc {
            return None;
        }

        // Errors bridge through their own runtime entry points
        let is_error = |ty: &Type| ty.nominal_name().is_some_and(|name| name.value() == "NSError");
        if is_error(source) || is_error(target) {
            return None;
        }

        if target_is_objc {
            self.optimize_bridged_swift_to_objc_cast(&cast)
        } else {
            self.optimize_bridged_objc_to_swift_cast(&cast, bridged_target)
        }
    }

    /// `NSFoo` to `Foo` through `_forceBridgeFromObjectiveC_bridgeable` or
    /// `_conditionallyBridgeFromObjectiveC_bridgeable`
    fn optimize_bridged_objc_to_swift_cast(&mut self, cast: &BridgedCast, bridged_target: Type) -> Option<InstId> {
        let oracle = self.oracle;

        let which = if cast.conditional {
            BridgingFunction::ConditionallyFromObjectiveC
        } else {
            BridgingFunction::ForceFromObjectiveC
        };
        let function_name = oracle.bridging_function(which);
        let function_type = self.module.function_named(function_name.value())?.lowered_type();

        let dest = cast.dest?;
        if !self.body.value_type(cast.src).is_address() || !self.body.value_type(dest).is_address() {
            return None;
        }

        if cast.target.nominal_name().is_some_and(|name| name.value() == "AnyHashable") {
            return None;
        }

        let conformance = oracle.lookup_conformance(&cast.target, OBJECTIVE_C_BRIDGEABLE.into())?;

        let (success, failure) = match (cast.success, cast.failure) {
            (Some(success), Some(failure)) => (Some(success), Some(failure)),
            _ if cast.conditional => return None,
            (success, _) => (success, None),
        };

        let mut builder = Builder::before(self.body, cast.inst);
        let loaded = builder.create_load(cast.src, LoadOwnership::Unqualified);
        let mut objc_cast = None;

        // The source may hold a superclass of the bridged class
        let src_op = if builder.value_type(loaded).ty != bridged_target {
            let bridged_type = SilType::object(bridged_target);

            match failure {
                Some(failure) if cast.conditional => {
                    let block = builder.insertion_block();
                    let cast_success = builder.body.new_block_after(block);
                    let argument = builder
                        .body
                        .add_block_argument(cast_success, bridged_type.clone(), OwnershipKind::Owned);
                    let objc_failure = builder.body.new_block_after(cast_success);

                    objc_cast = Some(builder.create_checked_cast_br(loaded, bridged_type, cast_success, objc_failure));

                    builder.set_insertion_point(InsertPoint::End(objc_failure));
                    if cast.consumption.takes_on_failure() {
                        Self::emit_destroy_addr(&mut builder, oracle, cast.src);
                    }
                    builder.create_br(failure, &[]);

                    builder.set_insertion_point(InsertPoint::End(cast_success));
                    argument
                }
                _ => builder.create_unconditional_checked_cast(loaded, bridged_type),
            }
        } else {
            loaded
        };

        let function = builder.create_function_ref(function_name, function_type);
        let metatype = builder.create_metatype(SilType::object(Type::metatype(
            cast.target.clone(),
            Some(MetatypeRepresentation::Thick),
        )));

        let result_slot = if cast.conditional {
            let optional = SilType::object(Type::optional(cast.target.clone()));
            builder.create_alloc_stack(optional, DebugVar::default())
        } else {
            dest
        };

        builder.create_retain_value(src_op);
        let subs = vec![Substitution {
            replacement: cast.target.clone(),
            conformances: vec![conformance],
        }];
        let result = builder.create_apply(function, subs, &[result_slot, src_op, metatype], false);

        match cast.consumption {
            CastConsumptionKind::TakeAlways => {
                builder.create_release_value(src_op);
            }
            CastConsumptionKind::TakeOnSuccess => match success {
                Some(success) => {
                    let point = builder.insertion_point();
                    builder.set_insertion_point(block_start(builder.body, success));
                    builder.create_release_value(src_op);
                    builder.set_insertion_point(point);
                }
                None => {
                    builder.create_release_value(src_op);
                }
            },
            CastConsumptionKind::CopyOnSuccess => {}
        }

        if let (true, Some(success), Some(failure)) = (cast.conditional, success, failure) {
            let block = builder.insertion_block();
            let none = builder.body.new_block_after(block);
            let some = builder.body.new_block_after(none);

            builder.create(
                InstKind::SwitchEnum {
                    opcode: Opcode::SwitchEnumAddr,
                    cases: vec![(DeclRef::enum_element("Optional", "none", false), none)],
                    default: Some(some),
                },
                &[result_slot],
                Vec::new(),
            );

            builder.set_insertion_point(InsertPoint::End(none));
            builder.create_dealloc_stack(result_slot);
            builder.create_br(failure, &[]);

            builder.set_insertion_point(InsertPoint::End(some));
            let payload = builder.create_value(
                InstKind::EnumData {
                    opcode: Opcode::UncheckedTakeEnumDataAddr,
                    case: DeclRef::enum_element("Optional", "some", true),
                },
                &[result_slot],
                SilType::address(cast.target.clone()),
            );
            builder.create_copy_addr(payload, dest, true, true);
            builder.create_dealloc_stack(result_slot);
            builder.create_br(success, &[]);
        }

        let apply = self.body.defining_inst(result)?;
        self.body.erase_instruction(cast.inst);

        opt_log!("bridged {} from Objective-C with {function_name}", cast.target);
        Some(objc_cast.unwrap_or(apply))
    }

    /// `Foo` to `NSFoo` through `Foo._bridgeToObjectiveC`
    fn optimize_bridged_swift_to_objc_cast(&mut self, cast: &BridgedCast) -> Option<InstId> {
        let oracle = self.oracle;

        oracle.lookup_conformance(&cast.source, OBJECTIVE_C_BRIDGEABLE.into())?;
        let function_name = oracle.bridge_to_objective_c_function(&cast.source)?;
        let callee = self.module.function_named(function_name.value())?;
        let function_type = callee.lowered_type();

        let parameter = callee.ty.params.first()?.clone();
        if callee.ty.indirect_results().next().is_some() {
            return None;
        }

        let converted_type = callee.ty.direct_result_type();
        let conversion = if converted_type == cast.target {
            ClassConversion::Same
        } else if oracle.is_same_or_subclass(&converted_type, &cast.target) {
            ClassConversion::Upcast
        } else if oracle.is_same_or_subclass(&cast.target, &converted_type) {
            ClassConversion::Downcast
        } else {
            return None;
        };

        let src_is_address = self.body.value_type(cast.src).is_address();
        if !src_is_address && parameter.convention.is_indirect() {
            return None;
        }

        let address_only = src_is_address && self.is_address_only(&cast.source);
        let ownership = Ownership::for_parameter(parameter.convention, cast.consumption, address_only)?;

        let needs_failure = conversion == ClassConversion::Downcast && cast.conditional && cast.dest.is_some();
        if needs_failure && (cast.success.is_none() || cast.failure.is_none()) {
            return None;
        }

        let mut builder = Builder::before(self.body, cast.inst);

        let mut src_op = cast.src;
        if src_is_address && !parameter.convention.is_indirect() {
            src_op = builder.create_load(cast.src, LoadOwnership::Unqualified);
        }

        let mut temporary = None;
        if ownership.retain_before {
            if address_only {
                let src_type = builder.value_type(cast.src);
                let slot = builder.create_alloc_stack(src_type, DebugVar::default());
                builder.create_copy_addr(cast.src, slot, false, true);
                src_op = slot;
                temporary = Some(slot);
            } else {
                builder.create_retain_value(src_op);
            }
        }

        let function = builder.create_function_ref(function_name, function_type);
        let subs = cast
            .source
            .nominal_args()
            .iter()
            .map(|arg| Substitution {
                replacement: arg.clone(),
                conformances: Vec::new(),
            })
            .collect();
        let converted = builder.create_apply(function, subs, &[src_op], false);

        let release = |builder: &mut Builder<'_>| {
            if address_only {
                builder.create_destroy_addr(src_op);
            } else {
                builder.create_release_value(src_op);
            }
        };

        if ownership.release_after {
            release(&mut builder);
        }

        if ownership.release_in_success {
            match cast.success {
                Some(success) => {
                    let point = builder.insertion_point();
                    builder.set_insertion_point(block_start(builder.body, success));
                    release(&mut builder);
                    builder.set_insertion_point(point);
                }
                None => release(&mut builder),
            }
        }

        if let Some(slot) = temporary {
            match (cast.success, cast.failure) {
                (Some(success), Some(failure)) => {
                    let point = builder.insertion_point();
                    for block in [success, failure] {
                        builder.set_insertion_point(block_start(builder.body, block));
                        builder.create_dealloc_stack(slot);
                    }
                    builder.set_insertion_point(point);
                }
                _ => {
                    builder.create_dealloc_stack(slot);
                }
            }
        }

        let target_type = SilType::object(cast.target.clone());

        let Some(dest) = cast.dest else {
            let value = match conversion {
                ClassConversion::Same => converted,
                ClassConversion::Upcast => builder.create_upcast(converted, target_type),
                ClassConversion::Downcast => builder.create_unconditional_checked_cast(converted, target_type),
            };

            opt_log!("bridged {} to Objective-C with {function_name}", cast.source);
            return self.body.defining_inst(value);
        };

        let mut in_new_block = false;
        let value = match conversion {
            ClassConversion::Same => converted,
            ClassConversion::Upcast => builder.create_upcast(converted, target_type),
            ClassConversion::Downcast => match cast.failure {
                Some(failure) if cast.conditional => {
                    let block = builder.insertion_block();
                    let cast_success = builder.body.new_block_after(block);
                    let argument = builder
                        .body
                        .add_block_argument(cast_success, target_type.clone(), OwnershipKind::Owned);

                    builder.create_checked_cast_br(converted, target_type, cast_success, failure);
                    builder.set_insertion_point(InsertPoint::End(cast_success));
                    in_new_block = true;
                    argument
                }
                _ => builder.create_unconditional_checked_cast(converted, target_type),
            },
        };

        let store = builder.create_store(value, dest, StoreOwnership::Unqualified);
        if in_new_block {
            if let Some(success) = cast.success {
                builder.create_br(success, &[]);
            }
        }

        self.body.erase_instruction(cast.inst);

        opt_log!("bridged {} to Objective-C with {function_name}", cast.source);
        Some(store)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::Ownership;
    use crate::{
        opt::{
            cast_optimizer::{CastOptimizer, CastRewrite},
            test_support::{count, find, parse_with_decls},
        },
        sil::{
            function::{BlockId, Body, InstId},
            instruction::{CastConsumptionKind, InstKind, Opcode},
            types::ParameterConvention,
        },
    };

    const BRIDGEABLE: &str = indoc! {"
        @objc class NSObject {}
        @objc class NSFoo : NSObject {}
        class C {}

        struct S : _ObjectiveCBridgeable {
          var c: C
          typealias _ObjectiveCType = NSFoo
        }

        sil @S_bridgeToObjectiveC : $@convention(method) (@guaranteed S) -> @owned NSFoo
        sil @_conditionallyBridgeFromObjectiveC_bridgeable : $@convention(thin) <T where T : _ObjectiveCBridgeable> (@owned T._ObjectiveCType, @thick T.Type) -> @out Optional<T>
        sil @_forceBridgeFromObjectiveC_bridgeable : $@convention(thin) <T where T : _ObjectiveCBridgeable> (@owned T._ObjectiveCType, @thick T.Type) -> @out T
    "};

    /// Also returns the blocks as parsed, new blocks may be laid out between
    /// them
    fn simplify_in(text: &str, function: &str, opcode: Opcode) -> (bool, Body, Vec<BlockId>) {
        let (mut module, decls) = parse_with_decls(&format!("{BRIDGEABLE}\n{text}"));
        let id = module.lookup_function(function.into()).unwrap();
        let mut body = std::mem::take(&mut module.function_mut(id).body);

        let blocks = body.block_order.clone();
        let cast = find(&body, opcode)[0];
        let changed = CastOptimizer::new(&mut body, &module, &decls).simplify(cast);
        (changed, body, blocks)
    }

    fn callee(body: &Body, apply: InstId) -> String {
        let function_ref = body.defining_inst(body.operand_value(apply, 0).unwrap()).unwrap();
        match body.kind(function_ref) {
            InstKind::FunctionRef(name) => name.to_string(),
            other => panic!("expected a function_ref, got {other:?}"),
        }
    }

    fn swift_to_objc(consumption: &str) -> String {
        indoc! {"
            sil @f : $@convention(thin) (@in S) -> @owned NSFoo {
            bb0(%0 : $*S):
              %1 = alloc_stack $NSFoo
              checked_cast_addr_br CONSUMPTION S in %0 : $*S to NSFoo in %1 : $*NSFoo, bb1, bb2
            bb1:
              %2 = load %1 : $*NSFoo
              dealloc_stack %1 : $*NSFoo
              return %2 : $NSFoo
            bb2:
              unreachable
            }
        "}
        .replace("CONSUMPTION", consumption)
    }

    #[test]
    fn unowned_sources_are_released_like_guaranteed_ones() {
        for consumption in [
            CastConsumptionKind::TakeAlways,
            CastConsumptionKind::TakeOnSuccess,
            CastConsumptionKind::CopyOnSuccess,
        ] {
            let unowned = Ownership::for_parameter(ParameterConvention::DirectUnowned, consumption, false);
            let guaranteed = Ownership::for_parameter(ParameterConvention::DirectGuaranteed, consumption, false);

            assert!(!unowned.unwrap().retain_before);
            if consumption != CastConsumptionKind::CopyOnSuccess {
                assert_eq!(unowned, guaranteed, "{consumption:?}");
            }
        }

        assert_eq!(
            Ownership::for_parameter(ParameterConvention::DirectUnowned, CastConsumptionKind::TakeAlways, true),
            None
        );
        assert_eq!(
            Ownership::for_parameter(ParameterConvention::IndirectInout, CastConsumptionKind::TakeAlways, false),
            None
        );
    }

    #[test]
    fn value_types_bridge_to_objective_c_through_their_conversion() {
        for (consumption, retains, releases) in [
            ("take_always", 0, 1),
            ("take_on_success", 0, 1),
            ("copy_on_success", 1, 1),
        ] {
            let (changed, body, blocks) = simplify_in(&swift_to_objc(consumption), "f", Opcode::CheckedCastAddrBr);
            assert!(changed, "{consumption}");

            let apply = find(&body, Opcode::Apply)[0];
            assert_eq!(callee(&body, apply), "S_bridgeToObjectiveC");
            assert_eq!(count(&body, Opcode::CheckedCastAddrBr), 0);
            assert_eq!(count(&body, Opcode::RetainValue), retains, "{consumption}");
            assert_eq!(count(&body, Opcode::ReleaseValue), releases, "{consumption}");
            assert_eq!(count(&body, Opcode::Store), 1);

            let entry = body.entry_block().unwrap();
            let terminator = body.terminator(entry).unwrap();
            assert_eq!(body.inst(terminator).kind.successors(), vec![blocks[1]]);
        }

        // Taking only on success releases on the success path
        let (_, body, blocks) = simplify_in(&swift_to_objc("take_on_success"), "f", Opcode::CheckedCastAddrBr);
        let success = blocks[1];
        let first = body.first_inst(success).unwrap();
        assert_eq!(body.opcode(first), Opcode::ReleaseValue);
    }

    #[test]
    fn conditional_bridging_from_objective_c_switches_on_the_optional() {
        let text = indoc! {"
            sil @f : $@convention(thin) (@in NSFoo) -> () {
            bb0(%0 : $*NSFoo):
              %1 = alloc_stack $S
              checked_cast_addr_br take_always NSFoo in %0 : $*NSFoo to S in %1 : $*S, bb1, bb2
            bb1:
              destroy_addr %1 : $*S
              dealloc_stack %1 : $*S
              br bb3
            bb2:
              dealloc_stack %1 : $*S
              br bb3
            bb3:
              %2 = tuple ()
              return %2 : $()
            }
        "};

        let (changed, body, blocks) = simplify_in(text, "f", Opcode::CheckedCastAddrBr);
        assert!(changed);

        let apply = find(&body, Opcode::Apply)[0];
        assert_eq!(callee(&body, apply), "_conditionallyBridgeFromObjectiveC_bridgeable");
        assert_eq!(count(&body, Opcode::SwitchEnumAddr), 1);
        assert_eq!(count(&body, Opcode::UncheckedTakeEnumDataAddr), 1);
        assert_eq!(count(&body, Opcode::CopyAddr), 1);
        assert_eq!(count(&body, Opcode::RetainValue), 1);
        assert_eq!(count(&body, Opcode::ReleaseValue), 1);
        assert_eq!(count(&body, Opcode::AllocStack), 2);
        assert_eq!(count(&body, Opcode::DeallocStack), 4);
        assert_eq!(body.block_order.len(), 6);

        let switch = find(&body, Opcode::SwitchEnumAddr)[0];
        let InstKind::SwitchEnum { cases, default, .. } = body.kind(switch) else {
            panic!("expected a switch_enum_addr");
        };
        assert_eq!(cases.len(), 1);
        assert!(default.is_some());

        let (success, failure) = (blocks[1], blocks[2]);
        assert!(body.predecessors(success).contains(&default.unwrap()));
        assert!(body.predecessors(failure).contains(&cases[0].1));
    }

    #[test]
    fn superclass_sources_are_cast_to_the_bridged_class_first() {
        let text = indoc! {"
            sil @f : $@convention(thin) (@in NSObject) -> () {
            bb0(%0 : $*NSObject):
              %1 = alloc_stack $S
              checked_cast_addr_br take_always NSObject in %0 : $*NSObject to S in %1 : $*S, bb1, bb2
            bb1:
              destroy_addr %1 : $*S
              dealloc_stack %1 : $*S
              br bb3
            bb2:
              dealloc_stack %1 : $*S
              br bb3
            bb3:
              %2 = tuple ()
              return %2 : $()
            }
        "};

        let (changed, body, _) = simplify_in(text, "f", Opcode::CheckedCastAddrBr);
        assert!(changed);

        let entry = body.entry_block().unwrap();
        let terminator = body.terminator(entry).unwrap();
        assert_eq!(body.opcode(terminator), Opcode::CheckedCastBr);

        // The failed class cast destroys the taken source
        assert_eq!(count(&body, Opcode::DestroyAddr), 2);
        assert_eq!(body.block_order.len(), 8);
    }

    #[test]
    fn forced_bridging_from_objective_c() {
        let text = indoc! {"
            sil @f : $@convention(thin) (@in NSFoo) -> @out S {
            bb0(%0 : $*S, %1 : $*NSFoo):
              unconditional_checked_cast_addr NSFoo in %1 : $*NSFoo to S in %0 : $*S
              %2 = tuple ()
              return %2 : $()
            }
        "};

        let (changed, body, _) = simplify_in(text, "f", Opcode::UnconditionalCheckedCastAddr);
        assert!(changed);

        let apply = find(&body, Opcode::Apply)[0];
        assert_eq!(callee(&body, apply), "_forceBridgeFromObjectiveC_bridgeable");
        assert_eq!(count(&body, Opcode::UnconditionalCheckedCastAddr), 0);
        assert_eq!(count(&body, Opcode::SwitchEnumAddr), 0);
        assert_eq!(count(&body, Opcode::ReleaseValue), 1);

        // The result is written straight into the destination
        let destination = body.function_arguments()[0];
        assert_eq!(body.operand_value(apply, 1), Some(destination));
    }

    #[test]
    fn scalar_casts_use_the_converted_value() {
        let text = indoc! {"
            sil @f : $@convention(thin) (@owned S) -> @owned NSFoo {
            bb0(%0 : $S):
              %1 = unconditional_checked_cast %0 : $S to $NSFoo
              return %1 : $NSFoo
            }
        "};

        let (mut module, decls) = parse_with_decls(&format!("{BRIDGEABLE}\n{text}"));
        let id = module.lookup_function("f".into()).unwrap();
        let mut body = std::mem::take(&mut module.function_mut(id).body);

        let cast = find(&body, Opcode::UnconditionalCheckedCast)[0];
        let rewrite = CastOptimizer::new(&mut body, &module, &decls).optimize_unconditional_checked_cast(cast);

        let apply = find(&body, Opcode::Apply)[0];
        let converted = body.single_result(apply).unwrap();
        assert_eq!(rewrite, Some(CastRewrite::Replaced(converted)));

        let ret = find(&body, Opcode::Return)[0];
        assert_eq!(body.operand_value(ret, 0), Some(converted));
    }
}
