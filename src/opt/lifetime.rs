//! Where a value stops being live. The analysis is built from a definition
//! and the set of its users, and finds the points right after the last use
//! on every path.

use hashbrown::HashSet;

use crate::{
    index::IndexBitSet,
    logging::opt_log,
    sil::function::{BlockId, Body, InstId},
};

/// What [`ValueLifetimeAnalysis::compute_frontier`] may do when the lifetime
/// ends on a critical edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontierMode {
    /// Give up if the value is dead on some path leaving a live block
    UsersMustPostDomDef,
    /// Split critical edges to get a place for the frontier
    AllowToModifyCfg,
    /// Give up instead of splitting an edge
    DontModifyCfg,
}

/// The instructions right after the end of a value's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontier {
    pub insts: Vec<InstId>,
    /// Critical edges were split to make room for some of the points
    pub split_edges: bool,
}

pub struct ValueLifetimeAnalysis {
    def: InstId,
    def_block: BlockId,
    users: HashSet<InstId>,
    /// Blocks where the value is live somewhere, in discovery order
    live_blocks: Vec<BlockId>,
    live: IndexBitSet<BlockId>,
    /// A user in the definition's block comes before the definition, so the
    /// value flows around a loop back into it
    has_users_before_def: bool,
}

impl ValueLifetimeAnalysis {
    pub fn new(body: &Body, def: InstId, users: impl IntoIterator<Item = InstId>) -> Self {
        let mut analysis = Self {
            def,
            def_block: body.inst(def).block,
            users: users.into_iter().collect(),
            live_blocks: Vec::new(),
            live: IndexBitSet::new(),
            has_users_before_def: false,
        };

        analysis.propagate_liveness(body);
        analysis
    }

    fn mark_live(&mut self, block: BlockId) -> bool {
        let inserted = self.live.insert(block);
        if inserted {
            self.live_blocks.push(block);
        }
        inserted
    }

    /// Walks backwards from every user until reaching the definition
    fn propagate_liveness(&mut self, body: &Body) {
        let mut pending = Vec::new();
        let mut users_before_def = 0;

        let users = self.users.iter().copied().collect::<Vec<_>>();
        for user in users {
            let block = body.inst(user).block;

            if self.mark_live(block) {
                pending.push(block);
            }

            if block == self.def_block && !body.comes_before(self.def, user) && user != self.def {
                users_before_def += 1;
            }
        }

        self.has_users_before_def = users_before_def > 0;

        // The definition's block is live already
        self.mark_live(self.def_block);

        while let Some(block) = pending.pop() {
            // Liveness stops at the definition, unless it loops back
            if block == self.def_block && users_before_def == 0 {
                continue;
            }

            for predecessor in body.predecessors(block) {
                if self.mark_live(predecessor) {
                    pending.push(predecessor);
                }
            }
        }
    }

    fn is_alive_at_begin_of_block(&self, block: BlockId) -> bool {
        self.live.contains(block) && (block != self.def_block || self.has_users_before_def)
    }

    /// The last user in `block`, or the definition if no user comes after it
    fn find_last_user_in_block(&self, body: &Body, block: BlockId) -> Option<InstId> {
        let mut cursor = body.last_inst(block);

        while let Some(inst) = cursor {
            if self.users.contains(&inst) {
                return Some(inst);
            }

            if inst == self.def {
                return Some(inst);
            }

            cursor = body.prev_inst(inst);
        }

        None
    }

    /// Finds the points where the value stops being live. `None` means the
    /// frontier cannot be expressed under `mode`.
    pub fn compute_frontier(&self, body: &mut Body, mode: FrontierMode) -> Option<Frontier> {
        debug_assert!(
            body.entry_block()
                .is_none_or(|entry| entry == self.def_block || !self.is_alive_at_begin_of_block(entry)),
            "a value can't be live into the entry block"
        );

        let mut frontier = Frontier::default();
        let mut live_out = HashSet::new();
        let mut frontier_blocks = Vec::new();

        for block in self.live_blocks.iter().copied() {
            let successors = body.successors(block);

            let live_in_successor = successors
                .iter()
                .any(|successor| self.is_alive_at_begin_of_block(*successor));
            let dead_in_successor = successors
                .iter()
                .any(|successor| !self.is_alive_at_begin_of_block(*successor));

            if !live_in_successor {
                let Some(last_user) = self.find_last_user_in_block(body, block) else {
                    continue;
                };

                // The lifetime ends inside the block
                if !body.inst(last_user).kind.is_terminator() {
                    if let Some(next) = body.next_inst(last_user) {
                        frontier.insts.push(next);
                    }
                    continue;
                }
            }

            if dead_in_successor {
                if mode == FrontierMode::UsersMustPostDomDef {
                    return None;
                }

                live_out.insert(block);

                for successor in successors {
                    if !self.is_alive_at_begin_of_block(successor) && !frontier_blocks.contains(&successor) {
                        frontier_blocks.push(successor);
                    }
                }
            }
        }

        // A frontier block reached from a block where the value is dead has
        // no room for the point at its start
        let mut unhandled = Vec::new();

        for block in frontier_blocks {
            let needs_split = body
                .predecessors(block)
                .into_iter()
                .any(|predecessor| !live_out.contains(&predecessor));

            if needs_split {
                if mode == FrontierMode::DontModifyCfg {
                    return None;
                }
                unhandled.push(block);
            } else if let Some(first) = body.first_inst(block) {
                frontier.insts.push(first);
            }
        }

        for block in &self.live_blocks {
            if !live_out.contains(block) {
                continue;
            }

            let successors = body.successors(*block);
            for (index, successor) in successors.iter().enumerate() {
                if !unhandled.contains(successor) {
                    continue;
                }

                let Some(middle) = body.split_edge(*block, index) else {
                    continue;
                };

                opt_log!("split lifetime edge {block:?} -> {successor:?}");
                if let Some(first) = body.first_inst(middle) {
                    frontier.insts.push(first);
                }
                frontier.split_edges = true;
            }
        }

        Some(frontier)
    }

    /// Whether `inst` runs while the value is live. Only meaningful for
    /// instructions the definition dominates.
    pub fn is_within_lifetime(&self, body: &Body, inst: InstId) -> bool {
        let block = body.inst(inst).block;

        if !self.live.contains(block) {
            return false;
        }

        if body
            .successors(block)
            .into_iter()
            .any(|successor| self.is_alive_at_begin_of_block(successor))
        {
            return true;
        }

        // A user at or after `inst` keeps it inside the lifetime
        let mut cursor = body.last_inst(block);
        while let Some(current) = cursor {
            if self.users.contains(&current) {
                return true;
            }

            if current == inst {
                return false;
            }

            cursor = body.prev_inst(current);
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        opt::test_support::{find, parse_module},
        sil::instruction::Opcode,
    };

    fn analysis_of_alloc(body: &Body) -> ValueLifetimeAnalysis {
        let def = find(body, Opcode::AllocRef)[0];
        let value = body.single_result(def).unwrap();
        ValueLifetimeAnalysis::new(body, def, body.users(value))
    }

    #[test]
    fn straight_line_lifetime_ends_after_the_last_user() {
        let mut module = parse_module(indoc! {"
            class C {}

            sil @f : $@convention(thin) () -> () {
            bb0:
              %0 = alloc_ref $C
              strong_retain %0 : $C
              strong_release %0 : $C
              %1 = tuple ()
              return %1 : $()
            }
        "});
        let id = module.lookup_function("f".into()).unwrap();
        let body = &mut module.function_mut(id).body;
        let analysis = analysis_of_alloc(body);
        let tuple = find(body, Opcode::Tuple)[0];

        let frontier = analysis.compute_frontier(body, FrontierMode::UsersMustPostDomDef).unwrap();
        assert_eq!(frontier.insts, vec![tuple]);
        assert!(!frontier.split_edges);

        assert!(analysis.is_within_lifetime(body, find(body, Opcode::StrongRetain)[0]));
        assert!(!analysis.is_within_lifetime(body, tuple));
    }

    const DIAMOND: &str = indoc! {"
        class C {}

        sil @f : $@convention(thin) (Builtin.Int1) -> () {
        bb0(%0 : $Builtin.Int1):
          %1 = alloc_ref $C
          cond_br %0, bb1, bb2
        bb1:
          strong_release %1 : $C
          br bb3
        bb2:
          br bb3
        bb3:
          %2 = tuple ()
          return %2 : $()
        }
    "};

    #[test]
    fn lifetime_ending_on_one_side_of_a_diamond() {
        let mut module = parse_module(DIAMOND);
        let id = module.lookup_function("f".into()).unwrap();
        let body = &mut module.function_mut(id).body;
        let analysis = analysis_of_alloc(body);

        assert!(analysis.compute_frontier(body, FrontierMode::UsersMustPostDomDef).is_none());

        // bb2 only has the live entry block as predecessor
        let frontier = analysis.compute_frontier(body, FrontierMode::DontModifyCfg).unwrap();
        let mut expected = vec![find(body, Opcode::Br)[0], find(body, Opcode::Br)[1]];
        expected.sort();
        let mut found = frontier.insts.clone();
        found.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn critical_edges_are_split_when_allowed() {
        let text = indoc! {"
            class C {}

            sil @f : $@convention(thin) (Builtin.Int1) -> () {
            bb0(%0 : $Builtin.Int1):
              %1 = alloc_ref $C
              cond_br %0, bb1, bb2
            bb1:
              strong_release %1 : $C
              br bb2
            bb2:
              %2 = tuple ()
              return %2 : $()
            }
        "};

        let mut module = parse_module(text);
        let id = module.lookup_function("f".into()).unwrap();
        let body = &mut module.function_mut(id).body;
        let analysis = analysis_of_alloc(body);
        let blocks_before = body.block_order.len();

        assert!(analysis.compute_frontier(body, FrontierMode::DontModifyCfg).is_none());
        assert_eq!(body.block_order.len(), blocks_before);

        let frontier = analysis.compute_frontier(body, FrontierMode::AllowToModifyCfg).unwrap();
        assert!(frontier.split_edges);
        assert_eq!(body.block_order.len(), blocks_before + 1);
        assert_eq!(frontier.insts.len(), 2);
    }

    #[test]
    fn loops_keep_the_value_live_around_the_back_edge() {
        let module = parse_module(indoc! {"
            class C {}

            sil @f : $@convention(thin) (Builtin.Int1) -> () {
            bb0(%0 : $Builtin.Int1):
              br bb1
            bb1:
              %1 = alloc_ref $C
              strong_release %1 : $C
              cond_br %0, bb1, bb2
            bb2:
              %2 = tuple ()
              return %2 : $()
            }
        "});
        let body = &module.function_named("f").unwrap().body;
        let analysis = analysis_of_alloc(body);

        assert!(!analysis.is_alive_at_begin_of_block(body.entry_block().unwrap()));
        assert!(!analysis.is_within_lifetime(body, find(body, Opcode::Tuple)[0]));
        assert!(analysis.is_within_lifetime(body, find(body, Opcode::StrongRelease)[0]));
    }
}
