//! Mechanical edits of the control flow graph: emptying and removing
//! unreachable blocks, and passing one more value along a branch edge.

use hashbrown::HashSet;

use crate::{
    logging::opt_log,
    sil::{
        builder::Builder,
        function::{BlockId, Body, InstId},
        instruction::InstKind,
        value::ValueId,
    },
};

/// Erases every instruction of `block`, last to first. Whatever still uses
/// them, typically other dead blocks, gets `undef` instead.
pub fn clear_block_body(body: &mut Body, block: BlockId) {
    while let Some(inst) = body.last_inst(block) {
        for result in body.results(inst).to_vec() {
            body.replace_all_uses_with_undef(result);
        }

        body.erase_instruction(inst);
    }
}

/// Removes an unreachable block together with its instructions
pub fn remove_dead_block(body: &mut Body, block: BlockId) {
    opt_log!("removing dead block with {} instructions", body.insts_in(block).count());

    clear_block_body(body, block);
    body.erase_block(block);
}

/// Removes every block the entry block cannot reach. Returns how many went.
pub fn remove_unreachable_blocks(body: &mut Body) -> usize {
    let Some(entry) = body.entry_block() else {
        return 0;
    };

    let mut reachable = HashSet::new();
    let mut worklist = vec![entry];
    while let Some(block) = worklist.pop() {
        if reachable.insert(block) {
            worklist.extend(body.successors(block));
        }
    }

    let dead = body
        .block_order
        .iter()
        .copied()
        .filter(|block| !reachable.contains(block))
        .collect::<Vec<_>>();

    for block in &dead {
        remove_dead_block(body, *block);
    }

    dead.len()
}

/// Builds a copy of `branch` which also passes `value` to `dest`, right
/// before the old one. The old branch is left for the caller to erase.
/// Only `br` and `cond_br` can carry arguments.
pub fn add_argument_to_branch(body: &mut Body, value: ValueId, dest: BlockId, branch: InstId) -> Option<InstId> {
    let mut operands = body.operand_values(branch);

    let (kind, passed) = match *body.kind(branch) {
        InstKind::Br(target) if target == dest => {
            operands.push(value);
            (InstKind::Br(target), operands.len())
        }
        InstKind::CondBr {
            true_dest,
            false_dest,
            true_arg_count,
        } if true_dest == dest || false_dest == dest => {
            let on_true = true_dest == dest;

            // The condition comes first, then the true arguments
            if on_true {
                operands.insert(1 + true_arg_count, value);
            } else {
                operands.push(value);
            }

            let true_arg_count = true_arg_count + usize::from(on_true);
            let passed = if on_true {
                true_arg_count
            } else {
                operands.len() - 1 - true_arg_count
            };

            (
                InstKind::CondBr {
                    true_dest,
                    false_dest,
                    true_arg_count,
                },
                passed,
            )
        }
        _ => return None,
    };

    debug_assert_eq!(passed, body.block_args(dest).len(), "branch arguments don't match the destination");

    Some(Builder::before(body, branch).create(kind, &operands, Vec::new()))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        opt::test_support::{count, find, parse_module},
        sil::{
            instruction::Opcode,
            module::Module,
            types::{SilType, Type},
            value::{OwnershipKind, ValueKind},
        },
    };

    const DIAMOND: &str = indoc! {"
        sil @f : $@convention(thin) (Builtin.Int1, Builtin.Int64) -> () {
        bb0(%0 : $Builtin.Int1, %1 : $Builtin.Int64):
          cond_br %0, bb1, bb2(%1 : $Builtin.Int64)
        bb1:
          br bb2(%1 : $Builtin.Int64)
        bb2(%4 : $Builtin.Int64):
          %5 = tuple ()
          return %5 : $()
        bb3:
          %6 = integer_literal $Builtin.Int64, 1
          br bb4(%6 : $Builtin.Int64)
        bb4(%8 : $Builtin.Int64):
          %9 = tuple (%8 : $Builtin.Int64, %6 : $Builtin.Int64)
          %10 = tuple ()
          return %10 : $()
        }
    "};

    fn body_of(module: &mut Module) -> &mut Body {
        let id = module.lookup_function("f".into()).unwrap();
        &mut module.function_mut(id).body
    }

    #[test]
    fn dead_blocks_are_removed_with_their_instructions() {
        let mut module = parse_module(DIAMOND);
        let body = body_of(&mut module);
        let blocks = body.block_order.clone();
        let tuple = find(body, Opcode::Tuple)[1];

        remove_dead_block(body, blocks[3]);

        assert_eq!(body.block_order, vec![blocks[0], blocks[1], blocks[2], blocks[4]]);
        assert!(body.block(blocks[3]).erased);
        assert_eq!(count(body, Opcode::IntegerLiteral), 0);

        remove_dead_block(body, blocks[4]);

        assert_eq!(body.block_order, blocks[..3].to_vec());
        assert!(body.inst(tuple).erased);
        assert_eq!(body.all_insts().len(), 4);
    }

    #[test]
    fn unreachable_blocks_are_found_from_the_entry() {
        let mut module = parse_module(DIAMOND);
        let body = body_of(&mut module);
        let blocks = body.block_order.clone();

        assert_eq!(remove_unreachable_blocks(body), 2);
        assert_eq!(body.block_order, blocks[..3].to_vec());
        assert_eq!(remove_unreachable_blocks(body), 0);
    }

    #[test]
    fn clearing_a_block_leaves_undef_behind() {
        let mut module = parse_module(DIAMOND);
        let body = body_of(&mut module);
        let blocks = body.block_order.clone();
        let tuple = find(body, Opcode::Tuple)[1];

        clear_block_body(body, blocks[3]);

        assert_eq!(body.insts_in(blocks[3]).count(), 0);
        assert!(body.block_order.contains(&blocks[3]));

        // bb4 used the literal, it now sees undef
        let operand = body.operand_value(tuple, 1).unwrap();
        assert_eq!(body.value(operand).kind, ValueKind::Undef);
        assert_eq!(body.operand_value(tuple, 0), Some(body.block_args(blocks[4])[0]));
    }

    #[test]
    fn arguments_are_added_to_the_right_edge() {
        let mut module = parse_module(DIAMOND);
        let body = body_of(&mut module);
        let blocks = body.block_order.clone();
        let (bb0, bb1, bb2) = (blocks[0], blocks[1], blocks[2]);
        let [cond, x] = body.function_arguments()[..] else {
            panic!("expected two arguments");
        };
        let int64 = SilType::object(Type::int(64));

        body.add_block_argument(bb2, int64.clone(), OwnershipKind::Any);

        let cond_br = body.terminator(bb0).unwrap();
        let rebuilt = add_argument_to_branch(body, x, bb2, cond_br).unwrap();
        body.erase_instruction(cond_br);

        assert_eq!(body.terminator(bb0), Some(rebuilt));
        assert_eq!(body.operand_value(rebuilt, 0), Some(cond));
        assert_eq!(body.edge_arguments(bb0, 0), Vec::new());
        assert_eq!(body.edge_arguments(bb0, 1), vec![x, x]);

        let br = body.terminator(bb1).unwrap();
        let rebuilt_br = add_argument_to_branch(body, x, bb2, br).unwrap();
        body.erase_instruction(br);
        assert_eq!(body.edge_arguments(bb1, 0), vec![x, x]);
        assert_eq!(body.opcode(rebuilt_br), Opcode::Br);

        // The true side grows in front of the false arguments
        body.add_block_argument(bb1, int64, OwnershipKind::Any);
        let again = add_argument_to_branch(body, cond, bb1, rebuilt).unwrap();
        body.erase_instruction(rebuilt);
        assert_eq!(body.edge_arguments(bb0, 0), vec![cond]);
        assert_eq!(body.edge_arguments(bb0, 1), vec![x, x]);
        assert_eq!(body.opcode(again), Opcode::CondBr);
    }

    #[test]
    fn only_branches_to_the_destination_take_arguments() {
        let mut module = parse_module(DIAMOND);
        let body = body_of(&mut module);
        let blocks = body.block_order.clone();
        let x = body.function_arguments()[1];

        let ret = body.terminator(blocks[2]).unwrap();
        assert_eq!(add_argument_to_branch(body, x, blocks[2], ret), None);

        let br = body.terminator(blocks[1]).unwrap();
        assert_eq!(add_argument_to_branch(body, x, blocks[4], br), None);
    }
}
