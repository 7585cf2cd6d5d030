//! Local optimizations over parsed functions. [`optimize_module`] runs the
//! cast simplifications, dead closure removal, folding and dead code
//! elimination on each function until none of them finds anything left to
//! do.

use crate::{
    config::{OptimizationMode, OptimizerOptions},
    logging::opt_log,
    oracle::TypeOracle,
    sil::{
        function::Body,
        instruction::{InstKind, Opcode},
        module::Module,
    },
};

use self::{
    cast_optimizer::{CastOptimizer, CastStats},
    cfg::remove_unreachable_blocks,
    closure::try_delete_dead_closure,
    dead_code::{is_instruction_trivially_dead, recursively_delete_trivially_dead_instructions},
    simplify::simplify_users,
};

mod bridging;
pub mod cast_optimizer;
pub mod cfg;
pub mod closure;
pub mod dead_code;
pub mod lifetime;
pub mod releases;
pub mod simplify;
pub mod value_tracking;

/// What [`optimize_module`] changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizationStats {
    pub casts: CastStats,
    pub closures_deleted: usize,
    pub dead_instructions: usize,
    /// Blocks left unreachable by resolved casts
    pub dead_blocks: usize,
    /// Functions the optimizer looked at
    pub functions: usize,
}

/// Optimizes every function defined in `module`. Functions marked `[Onone]`
/// are skipped, as is everything when `options` doesn't ask for
/// optimization and the function doesn't either.
pub fn optimize_module(module: &mut Module, oracle: &dyn TypeOracle, options: &OptimizerOptions) -> OptimizationStats {
    let mut stats = OptimizationStats::default();

    for id in module.functions.indices().collect::<Vec<_>>() {
        let function = module.function(id);
        if !function.is_definition() || function.is_zombie {
            continue;
        }

        let mode = function
            .attributes
            .optimization_mode
            .unwrap_or(options.optimization_mode);
        if mode == OptimizationMode::None {
            continue;
        }

        let qualified_ownership = function.has_qualified_ownership;
        opt_log!("optimizing @{} for {mode}", function.name);

        // Taken out so the rest of the module stays readable
        let mut body = std::mem::take(&mut module.function_mut(id).body);
        optimize_function(&mut body, module, oracle, mode, qualified_ownership, &mut stats);
        module.function_mut(id).body = body;

        stats.functions += 1;
    }

    stats
}

fn optimize_function(
    body: &mut Body,
    module: &Module,
    oracle: &dyn TypeOracle,
    mode: OptimizationMode,
    qualified_ownership: bool,
    stats: &mut OptimizationStats,
) {
    loop {
        let mut changed = false;

        /* Casts */

        let mut optimizer = CastOptimizer::new(body, module, oracle);
        for inst in optimizer.body.all_insts() {
            if !optimizer.body.inst(inst).erased {
                changed |= optimizer.simplify(inst);
            }
        }

        let casts = optimizer.stats();
        stats.casts.will_succeed += casts.will_succeed;
        stats.casts.will_fail += casts.will_fail;

        /* Closures */

        for inst in body.all_insts() {
            let is_closure = matches!(body.opcode(inst), Opcode::PartialApply | Opcode::ThinToThickFunction);

            if is_closure && !body.inst(inst).erased && try_delete_dead_closure(body, inst, oracle, qualified_ownership) {
                stats.closures_deleted += 1;
                changed = true;
            }
        }

        /* Folding */

        for inst in body.all_insts() {
            let aggregate = matches!(
                body.kind(inst),
                InstKind::Simple(Opcode::Tuple) | InstKind::Enum(_) | InstKind::Conversion(_)
            );

            if aggregate && !body.inst(inst).erased {
                changed |= simplify_users(body, inst);
            }
        }

        /* Dead code */

        let dead_blocks = remove_unreachable_blocks(body);
        if dead_blocks > 0 {
            stats.dead_blocks += dead_blocks;
            changed = true;
        }

        let dead = body
            .all_insts()
            .into_iter()
            .filter(|inst| is_instruction_trivially_dead(body, *inst, mode))
            .collect::<Vec<_>>();

        let deleted = recursively_delete_trivially_dead_instructions(body, &dead, false, mode, |_, _| {});
        if deleted > 0 {
            stats.dead_instructions += deleted;
            changed = true;
        }

        if !changed {
            break;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{
        config::ParserOptions,
        oracle::DeclTable,
        parse::parse_source,
        sil::{
            function::{Body, InstId},
            instruction::Opcode,
            module::Module,
        },
        source::SourceFile,
    };

    /// Parses `text` against the standard library declarations, failing the
    /// test on any diagnostic
    pub fn parse_with_decls(text: &str) -> (Module, DeclTable) {
        let mut decls = DeclTable::with_standard_library();
        let source = SourceFile::from_memory(text);
        let parsed = parse_source(&source, &mut decls, ParserOptions::default(), None);

        assert!(parsed.is_ok(), "{:?}", parsed.diagnostics.kinds());
        (parsed.module, decls)
    }

    pub fn parse_module(text: &str) -> Module {
        parse_with_decls(text).0
    }

    /// Instructions with `opcode`, in layout order
    pub fn find(body: &Body, opcode: Opcode) -> Vec<InstId> {
        body.all_insts()
            .into_iter()
            .filter(|inst| body.opcode(*inst) == opcode)
            .collect()
    }

    pub fn count(body: &Body, opcode: Opcode) -> usize {
        find(body, opcode).len()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{test_support::*, *};

    const MODULE: &str = indoc! {"
        class C {}
        class D : C {}

        sil @callee : $@convention(thin) (@owned C) -> ()

        sil @casts : $@convention(thin) (@owned D) -> @owned C {
        bb0(%0 : $D):
          %1 = function_ref @callee : $@convention(thin) (@owned C) -> ()
          %2 = partial_apply %1(%0) : $@convention(thin) (@owned C) -> ()
          strong_release %2 : $@callee_owned () -> ()
          %3 = integer_literal $Builtin.Int64, 7
          checked_cast_br %0 : $D to $C, bb1, bb2
        bb1(%4 : $C):
          return %4 : $C
        bb2:
          unreachable
        }

        sil [Onone] @untouched : $@convention(thin) (@owned D) -> @owned C {
        bb0(%0 : $D):
          %1 = integer_literal $Builtin.Int64, 7
          %2 = unconditional_checked_cast %0 : $D to $C
          return %2 : $C
        }
    "};

    fn optimize(mode: OptimizationMode) -> (Module, OptimizationStats) {
        let (mut module, decls) = parse_with_decls(MODULE);
        let options = OptimizerOptions {
            optimization_mode: mode,
            ..Default::default()
        };

        let stats = optimize_module(&mut module, &decls, &options);
        (module, stats)
    }

    #[test]
    fn functions_are_optimized_until_nothing_changes() {
        let (module, stats) = optimize(OptimizationMode::Speed);
        let body = &module.function_named("casts").unwrap().body;

        assert_eq!(stats.functions, 1);
        assert_eq!(stats.casts.will_succeed, 1);
        assert_eq!(stats.closures_deleted, 1);
        assert!(stats.dead_instructions >= 2);
        assert_eq!(stats.dead_blocks, 1);
        assert_eq!(body.block_order.len(), 2);

        assert_eq!(count(body, Opcode::CheckedCastBr), 0);
        assert_eq!(count(body, Opcode::Upcast), 1);
        assert_eq!(count(body, Opcode::PartialApply), 0);
        assert_eq!(count(body, Opcode::FunctionRef), 0);
        assert_eq!(count(body, Opcode::IntegerLiteral), 0);

        // The closure owned its capture, which is released in its place
        assert_eq!(count(body, Opcode::StrongRelease), 1);
    }

    #[test]
    fn onone_functions_are_left_alone() {
        let (module, _) = optimize(OptimizationMode::Speed);
        let body = &module.function_named("untouched").unwrap().body;

        assert_eq!(count(body, Opcode::UnconditionalCheckedCast), 1);
        assert_eq!(count(body, Opcode::IntegerLiteral), 1);
    }

    #[test]
    fn nothing_runs_without_an_optimization_mode() {
        let (module, stats) = optimize(OptimizationMode::None);

        assert_eq!(stats, OptimizationStats::default());
        assert_eq!(count(&module.function_named("casts").unwrap().body, Opcode::CheckedCastBr), 1);
    }
}
