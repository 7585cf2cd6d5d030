//! Functions and the arena holding their control flow graph. Blocks and
//! instructions are addressed by handles and never move, erasing only unlinks
//! them.

use std::rc::Rc;

use hashbrown::HashMap;

use crate::{
    config::OptimizationMode,
    index::{simple_index, IndexVec},
    intern::InternedSymbol,
    sil::{
        instruction::{DeclRef, InstKind, Opcode},
        module::{Linkage, ScopeId},
        types::{Requirement, SilFunctionType, SilType, Type},
        value::{OperandData, OperandId, OwnershipKind, ValueData, ValueId, ValueKind},
    },
};

simple_index! {
    /// Identifies a function of a module
    pub struct FunctionId;
}

simple_index! {
    /// Identifies a basic block of a function body
    pub struct BlockId;
}

simple_index! {
    /// Identifies an instruction of a function body
    pub struct InstId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializedKind {
    #[default]
    NotSerialized,
    Serialized,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThunkKind {
    #[default]
    NotThunk,
    Thunk,
    ReabstractionThunk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InlineStrategy {
    #[default]
    Default,
    NoInline,
    AlwaysInline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum EffectsKind {
    ReadNone,
    ReadOnly,
    ReadWrite,
    ReleaseNone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SpecializationKind {
    Full,
    Partial,
}

/// `[_specialize exported: false, kind: full, where T == Int]`
#[derive(Debug, Clone, PartialEq)]
pub struct SpecializeAttr {
    pub exported: bool,
    pub kind: SpecializationKind,
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionAttributes {
    pub transparent: bool,
    pub serialized: SerializedKind,
    pub thunk: ThunkKind,
    pub global_init: bool,
    pub inline: InlineStrategy,
    pub optimization_mode: Option<OptimizationMode>,
    pub effects: Option<EffectsKind>,
    pub semantics: Vec<String>,
    pub specializations: Vec<SpecializeAttr>,
    pub clang_node: Option<DeclRef>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: InternedSymbol,
    pub ty: Rc<SilFunctionType>,
    pub linkage: Linkage,
    pub attributes: FunctionAttributes,
    pub body: Body,
    /// Created after a redefinition so the original stays untouched
    pub is_zombie: bool,
    /// Parsed with ownership SSA, so copies and destroys are explicit
    pub has_qualified_ownership: bool,
}

impl Function {
    pub fn new(name: InternedSymbol, ty: Rc<SilFunctionType>, linkage: Linkage) -> Self {
        Self {
            name,
            ty,
            linkage,
            attributes: FunctionAttributes::default(),
            body: Body::default(),
            is_zombie: false,
            has_qualified_ownership: false,
        }
    }

    pub fn lowered_type(&self) -> SilType {
        SilType::object(Type::new(crate::sil::types::TypeKind::Function(
            self.ty.clone(),
        )))
    }

    pub fn is_definition(&self) -> bool {
        !self.body.block_order.is_empty()
    }
}

/// `loc "file.swift":12:3`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLoc {
    pub file: InternedSymbol,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub args: Vec<ValueId>,
    pub(crate) first: Option<InstId>,
    pub(crate) last: Option<InstId>,
    pub erased: bool,
}

#[derive(Debug, Clone)]
pub struct InstructionData {
    pub kind: InstKind,
    pub operands: Vec<OperandId>,
    pub results: Vec<ValueId>,
    pub block: BlockId,
    pub location: Option<SourceLoc>,
    pub scope: Option<ScopeId>,
    pub erased: bool,
    prev: Option<InstId>,
    next: Option<InstId>,
}

impl InstructionData {
    pub fn opcode(&self) -> Opcode {
        self.kind.opcode()
    }
}

/// Where a new instruction goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    End(BlockId),
    Before(InstId),
    After(InstId),
}

/// Arena of a function body
#[derive(Debug, Clone, Default)]
pub struct Body {
    pub blocks: IndexVec<BlockId, BlockData>,
    /// Layout order of the live blocks, the first one is the entry
    pub block_order: Vec<BlockId>,
    pub insts: IndexVec<InstId, InstructionData>,
    pub values: IndexVec<ValueId, ValueData>,
    pub operands: IndexVec<OperandId, OperandData>,
    undefs: HashMap<SilType, ValueId>,
    /// How many live `function_ref`s name each function
    function_refs: HashMap<InternedSymbol, usize>,
}

pub struct InstIter<'b> {
    body: &'b Body,
    cursor: Option<InstId>,
}

impl Iterator for InstIter<'_> {
    type Item = InstId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = self.body.insts[current].next;
        Some(current)
    }
}

impl Body {
    pub fn entry_block(&self) -> Option<BlockId> {
        self.block_order.first().copied()
    }

    pub fn block(&self, block: BlockId) -> &BlockData {
        &self.blocks[block]
    }

    pub fn inst(&self, inst: InstId) -> &InstructionData {
        &self.insts[inst]
    }

    pub fn inst_mut(&mut self, inst: InstId) -> &mut InstructionData {
        &mut self.insts[inst]
    }

    pub fn value(&self, value: ValueId) -> &ValueData {
        &self.values[value]
    }

    pub fn value_type(&self, value: ValueId) -> &SilType {
        &self.values[value].ty
    }

    pub fn kind(&self, inst: InstId) -> &InstKind {
        &self.insts[inst].kind
    }

    pub fn opcode(&self, inst: InstId) -> Opcode {
        self.insts[inst].kind.opcode()
    }

    /* Blocks */

    pub fn new_block(&mut self) -> BlockId {
        let block = self.blocks.push(BlockData::default());
        self.block_order.push(block);
        block
    }

    /// Creates a block placed right after `after` in the layout
    pub fn new_block_after(&mut self, after: BlockId) -> BlockId {
        let block = self.blocks.push(BlockData::default());
        let position = self
            .block_order
            .iter()
            .position(|b| *b == after)
            .map_or(self.block_order.len(), |p| p + 1);
        self.block_order.insert(position, block);
        block
    }

    pub fn move_block_to_end(&mut self, block: BlockId) {
        self.block_order.retain(|b| *b != block);
        self.block_order.push(block);
    }

    /// Takes an empty block out of the layout. Uses of its arguments become
    /// `undef`.
    pub fn erase_block(&mut self, block: BlockId) {
        debug_assert!(self.blocks[block].first.is_none(), "erasing a block with instructions");

        for arg in self.blocks[block].args.clone() {
            self.replace_all_uses_with_undef(arg);
        }

        self.block_order.retain(|b| *b != block);
        self.blocks[block].erased = true;
    }

    pub fn add_block_argument(
        &mut self,
        block: BlockId,
        ty: SilType,
        ownership: OwnershipKind,
    ) -> ValueId {
        let index = self.blocks[block].args.len() as u32;
        let is_function_argument = self.entry_block() == Some(block);
        let value = self.values.push(ValueData::new(
            ty,
            ValueKind::BlockArgument {
                block,
                index,
                is_function_argument,
            },
            ownership,
        ));
        self.blocks[block].args.push(value);
        value
    }

    pub fn block_args(&self, block: BlockId) -> &[ValueId] {
        &self.blocks[block].args
    }

    pub fn function_arguments(&self) -> &[ValueId] {
        match self.entry_block() {
            Some(entry) => &self.blocks[entry].args,
            None => &[],
        }
    }

    pub fn insts_in(&self, block: BlockId) -> InstIter<'_> {
        InstIter {
            body: self,
            cursor: self.blocks[block].first,
        }
    }

    pub fn first_inst(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block].first
    }

    pub fn last_inst(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block].last
    }

    pub fn next_inst(&self, inst: InstId) -> Option<InstId> {
        self.insts[inst].next
    }

    pub fn prev_inst(&self, inst: InstId) -> Option<InstId> {
        self.insts[inst].prev
    }

    /// Every live instruction in layout order
    pub fn all_insts(&self) -> Vec<InstId> {
        self.block_order
            .iter()
            .flat_map(|block| self.insts_in(*block))
            .collect()
    }

    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block]
            .last
            .filter(|inst| self.insts[*inst].kind.is_terminator())
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|terminator| self.insts[terminator].kind.successors())
            .unwrap_or_default()
    }

    /// Blocks branching to `block`, each listed once
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.block_order
            .iter()
            .copied()
            .filter(|candidate| self.successors(*candidate).contains(&block))
            .collect()
    }

    pub fn single_predecessor(&self, block: BlockId) -> Option<BlockId> {
        match self.predecessors(block).as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// Operands of `from`'s terminator passed along the `succ_index`th edge
    pub fn edge_arguments(&self, from: BlockId, succ_index: usize) -> Vec<ValueId> {
        let Some(terminator) = self.terminator(from) else {
            return Vec::new();
        };

        let operands = self.operand_values(terminator);

        match &self.insts[terminator].kind {
            InstKind::Br(_) => operands,
            InstKind::CondBr { true_arg_count, .. } => {
                // The condition comes first
                if succ_index == 0 {
                    operands[1..1 + true_arg_count].to_vec()
                } else {
                    operands[1 + true_arg_count..].to_vec()
                }
            }
            _ => Vec::new(),
        }
    }

    pub fn is_critical_edge(&self, from: BlockId, succ_index: usize) -> bool {
        let successors = self.successors(from);

        if successors.len() <= 1 {
            return false;
        }

        successors
            .get(succ_index)
            .is_some_and(|dest| self.single_predecessor(*dest).is_none())
    }

    /// Puts a new block on the `succ_index`th edge leaving `from`. The new
    /// block takes over the edge's arguments and forwards them to the old
    /// destination.
    pub fn split_edge(&mut self, from: BlockId, succ_index: usize) -> Option<BlockId> {
        let terminator = self.terminator(from)?;
        let dest = *self.insts[terminator].kind.successors().get(succ_index)?;

        let middle = self.new_block_after(from);

        let arg_types = self.blocks[dest]
            .args
            .iter()
            .map(|arg| {
                let value = &self.values[*arg];
                (value.ty.clone(), value.ownership)
            })
            .collect::<Vec<_>>();
        let forwarded = arg_types
            .into_iter()
            .map(|(ty, ownership)| self.add_block_argument(middle, ty, ownership))
            .collect::<Vec<_>>();

        if let Some(slot) = self.insts[terminator]
            .kind
            .successors_mut()
            .into_iter()
            .nth(succ_index)
        {
            *slot = middle;
        }

        self.insert(
            InsertPoint::End(middle),
            InstKind::Br(dest),
            &forwarded,
            Vec::new(),
        );

        Some(middle)
    }

    /* Values */

    /// The shared `undef` of a type
    pub fn undef(&mut self, ty: SilType) -> ValueId {
        if let Some(value) = self.undefs.get(&ty) {
            return *value;
        }

        let value = self
            .values
            .push(ValueData::new(ty.clone(), ValueKind::Undef, OwnershipKind::Any));
        self.undefs.insert(ty, value);
        value
    }

    pub fn new_placeholder(&mut self, ty: SilType) -> ValueId {
        self.values
            .push(ValueData::new(ty, ValueKind::Placeholder, OwnershipKind::Any))
    }

    pub fn defining_inst(&self, value: ValueId) -> Option<InstId> {
        match self.values[value].kind {
            ValueKind::Result { inst, .. } => Some(inst),
            _ => None,
        }
    }

    pub fn is_function_argument(&self, value: ValueId) -> bool {
        matches!(
            self.values[value].kind,
            ValueKind::BlockArgument {
                is_function_argument: true,
                ..
            }
        )
    }

    /// Index of a function argument among the function's arguments
    pub fn function_argument_index(&self, value: ValueId) -> Option<usize> {
        match self.values[value].kind {
            ValueKind::BlockArgument {
                index,
                is_function_argument: true,
                ..
            } => Some(index as usize),
            _ => None,
        }
    }

    /* Use lists */

    fn link(&mut self, operand: OperandId) {
        let value = self.operands[operand].value;
        let head = self.values[value].first_use;

        if let Some(head) = head {
            self.operands[head].prev_use = Some(operand);
        }

        let data = &mut self.operands[operand];
        data.prev_use = None;
        data.next_use = head;
        data.linked = true;
        self.values[value].first_use = Some(operand);
    }

    fn unlink(&mut self, operand: OperandId) {
        let OperandData {
            value,
            prev_use,
            next_use,
            linked,
            ..
        } = self.operands[operand];

        if !linked {
            return;
        }

        match prev_use {
            Some(prev) => self.operands[prev].next_use = next_use,
            None => self.values[value].first_use = next_use,
        }

        if let Some(next) = next_use {
            self.operands[next].prev_use = prev_use;
        }

        let data = &mut self.operands[operand];
        data.prev_use = None;
        data.next_use = None;
        data.linked = false;
    }

    fn add_use(&mut self, value: ValueId, user: InstId) -> OperandId {
        let operand = self.operands.push(OperandData {
            value,
            user,
            prev_use: None,
            next_use: None,
            linked: false,
        });
        self.link(operand);
        operand
    }

    pub fn operand_values(&self, inst: InstId) -> Vec<ValueId> {
        self.insts[inst]
            .operands
            .iter()
            .map(|operand| self.operands[*operand].value)
            .collect()
    }

    pub fn operand_value(&self, inst: InstId, index: usize) -> Option<ValueId> {
        self.insts[inst]
            .operands
            .get(index)
            .map(|operand| self.operands[*operand].value)
    }

    pub fn set_operand(&mut self, inst: InstId, index: usize, value: ValueId) {
        let Some(operand) = self.insts[inst].operands.get(index).copied() else {
            return;
        };

        self.set_operand_value(operand, value);
    }

    pub fn set_operand_value(&mut self, operand: OperandId, value: ValueId) {
        self.unlink(operand);
        self.operands[operand].value = value;
        self.link(operand);
    }

    pub fn uses(&self, value: ValueId) -> Vec<OperandId> {
        let mut uses = Vec::new();
        let mut cursor = self.values[value].first_use;

        while let Some(operand) = cursor {
            uses.push(operand);
            cursor = self.operands[operand].next_use;
        }

        uses
    }

    pub fn users(&self, value: ValueId) -> Vec<InstId> {
        self.uses(value)
            .into_iter()
            .map(|operand| self.operands[operand].user)
            .collect()
    }

    pub fn has_uses(&self, value: ValueId) -> bool {
        self.values[value].first_use.is_some()
    }

    pub fn has_one_use(&self, value: ValueId) -> bool {
        self.values[value]
            .first_use
            .is_some_and(|operand| self.operands[operand].next_use.is_none())
    }

    pub fn replace_all_uses_with(&mut self, from: ValueId, to: ValueId) {
        if from == to {
            return;
        }

        for operand in self.uses(from) {
            self.set_operand_value(operand, to);
        }

        if let ValueKind::Placeholder = self.values[from].kind {
            self.values[from].first_use = None;
        }
    }

    pub fn replace_all_uses_with_undef(&mut self, value: ValueId) {
        if !self.has_uses(value) {
            return;
        }

        let undef = self.undef(self.values[value].ty.clone());
        self.replace_all_uses_with(value, undef);
    }

    /* Instructions */

    /// Creates an instruction at `point` with one result per entry of
    /// `result_types`
    pub fn insert(
        &mut self,
        point: InsertPoint,
        kind: InstKind,
        operands: &[ValueId],
        result_types: Vec<SilType>,
    ) -> InstId {
        let block = match point {
            InsertPoint::End(block) => block,
            InsertPoint::Before(inst) | InsertPoint::After(inst) => self.insts[inst].block,
        };

        if let InstKind::FunctionRef(name) = &kind {
            *self.function_refs.entry(*name).or_default() += 1;
        }

        let inst = self.insts.push(InstructionData {
            kind,
            operands: Vec::new(),
            results: Vec::new(),
            block,
            location: None,
            scope: None,
            erased: false,
            prev: None,
            next: None,
        });

        let operand_ids = operands
            .iter()
            .map(|value| self.add_use(*value, inst))
            .collect();
        self.insts[inst].operands = operand_ids;

        let results = result_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                self.values.push(ValueData::new(
                    ty,
                    ValueKind::Result {
                        inst,
                        index: index as u32,
                    },
                    OwnershipKind::Any,
                ))
            })
            .collect();
        self.insts[inst].results = results;

        let (prev, next) = match point {
            InsertPoint::End(block) => (self.blocks[block].last, None),
            InsertPoint::Before(before) => (self.insts[before].prev, Some(before)),
            InsertPoint::After(after) => (Some(after), self.insts[after].next),
        };

        self.insts[inst].prev = prev;
        self.insts[inst].next = next;

        match prev {
            Some(prev) => self.insts[prev].next = Some(inst),
            None => self.blocks[block].first = Some(inst),
        }

        match next {
            Some(next) => self.insts[next].prev = Some(inst),
            None => self.blocks[block].last = Some(inst),
        }

        inst
    }

    pub fn results(&self, inst: InstId) -> &[ValueId] {
        &self.insts[inst].results
    }

    pub fn single_result(&self, inst: InstId) -> Option<ValueId> {
        match self.insts[inst].results.as_slice() {
            [result] => Some(*result),
            _ => None,
        }
    }

    pub fn has_result_uses(&self, inst: InstId) -> bool {
        self.insts[inst]
            .results
            .iter()
            .any(|result| self.has_uses(*result))
    }

    /// Severs every operand edge of the instruction
    pub fn drop_all_references(&mut self, inst: InstId) {
        for operand in std::mem::take(&mut self.insts[inst].operands) {
            self.unlink(operand);
        }
    }

    /// Unlinks the instruction from its block. Its results must be unused.
    pub fn erase_instruction(&mut self, inst: InstId) {
        if self.insts[inst].erased {
            return;
        }

        debug_assert!(
            !self.has_result_uses(inst),
            "erasing an instruction whose results are still used"
        );

        self.drop_all_references(inst);

        if let InstKind::FunctionRef(name) = &self.insts[inst].kind {
            let name = *name;
            if let Some(count) = self.function_refs.get_mut(&name) {
                *count -= 1;
                if *count == 0 {
                    self.function_refs.remove(&name);
                }
            }
        }

        let InstructionData {
            block, prev, next, ..
        } = self.insts[inst];

        match prev {
            Some(prev) => self.insts[prev].next = next,
            None => self.blocks[block].first = next,
        }

        match next {
            Some(next) => self.insts[next].prev = prev,
            None => self.blocks[block].last = prev,
        }

        let data = &mut self.insts[inst];
        data.prev = None;
        data.next = None;
        data.erased = true;
    }

    /// Moves a live instruction in front of `before`
    pub fn move_before(&mut self, inst: InstId, before: InstId) {
        let InstructionData {
            block, prev, next, ..
        } = self.insts[inst];

        match prev {
            Some(prev) => self.insts[prev].next = next,
            None => self.blocks[block].first = next,
        }

        match next {
            Some(next) => self.insts[next].prev = prev,
            None => self.blocks[block].last = prev,
        }

        let new_block = self.insts[before].block;
        let new_prev = self.insts[before].prev;

        let data = &mut self.insts[inst];
        data.block = new_block;
        data.prev = new_prev;
        data.next = Some(before);

        match new_prev {
            Some(prev) => self.insts[prev].next = Some(inst),
            None => self.blocks[new_block].first = Some(inst),
        }

        self.insts[before].prev = Some(inst);
    }

    /// Whether `a` comes strictly before `b`. Both must be in the same block.
    pub fn comes_before(&self, a: InstId, b: InstId) -> bool {
        let mut cursor = self.insts[a].next;

        while let Some(inst) = cursor {
            if inst == b {
                return true;
            }
            cursor = self.insts[inst].next;
        }

        false
    }

    pub fn function_ref_count(&self, name: InternedSymbol) -> usize {
        self.function_refs.get(&name).copied().unwrap_or_default()
    }

    pub(crate) fn function_refs(&self) -> impl Iterator<Item = (&InternedSymbol, &usize)> {
        self.function_refs.iter()
    }
}
