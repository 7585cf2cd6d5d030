//! Per-function tables mapping `%name`s and `bbN` labels to what they refer
//! to. Names may be used before they are defined. A forward use creates a
//! placeholder which the definition later replaces.

use hashbrown::{HashMap, HashSet};

use crate::{
    sil::{
        function::{BlockId, Body},
        types::SilType,
        value::ValueId,
    },
    source::Span,
};

/// Why a local value name could not be used or defined
#[derive(Debug, Clone, PartialEq)]
pub enum NameError {
    /// The name already refers to a value
    Redefined { previous: Span },
    /// A use expected a different type than the value has
    TypeMismatch { actual: SilType },
    /// The definition's type differs from the type of an earlier forward use
    ForwardTypeMismatch { expected: SilType, first_use: Span },
}

#[derive(Debug, Default)]
pub struct LocalNameTable {
    defined: HashMap<String, (ValueId, Span)>,
    forward: HashMap<String, (ValueId, Span)>,
    /// Results of instructions that were rejected
    poisoned: HashSet<String>,
}

impl LocalNameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value a use of `name` refers to. An unknown name gets a
    /// placeholder of the expected type.
    pub fn use_value(
        &mut self,
        body: &mut Body,
        name: &str,
        expected: &SilType,
        span: Span,
    ) -> Result<ValueId, NameError> {
        let existing = self
            .defined
            .get(name)
            .or_else(|| self.forward.get(name))
            .map(|(value, _)| *value);

        if let Some(value) = existing {
            let actual = body.value_type(value);
            if actual != expected {
                return Err(NameError::TypeMismatch {
                    actual: actual.clone(),
                });
            }

            return Ok(value);
        }

        if self.poisoned.contains(name) {
            return Ok(body.undef(expected.clone()));
        }

        let placeholder = body.new_placeholder(expected.clone());
        self.forward.insert(name.to_string(), (placeholder, span));
        Ok(placeholder)
    }

    /// The value of a name which must already be defined, whatever its type
    pub fn lookup(&self, name: &str) -> Option<ValueId> {
        self.defined.get(name).map(|(value, _)| *value)
    }

    /// Marks `name` as the result of an instruction that could not be built.
    /// Its uses, earlier or later, quietly become `undef`.
    pub fn poison(&mut self, body: &mut Body, name: &str) {
        if self.defined.contains_key(name) {
            return;
        }

        if let Some((placeholder, _)) = self.forward.remove(name) {
            body.replace_all_uses_with_undef(placeholder);
        }

        self.poisoned.insert(name.to_string());
    }

    pub fn is_poisoned(&self, name: &str) -> bool {
        self.poisoned.contains(name)
    }

    /// Binds `name` to `value`, resolving earlier forward uses. When the
    /// forward uses disagree on the type they are pointed at `undef`.
    pub fn define(
        &mut self,
        body: &mut Body,
        name: &str,
        value: ValueId,
        span: Span,
    ) -> Result<(), NameError> {
        if let Some((_, previous)) = self.defined.get(name) {
            return Err(NameError::Redefined {
                previous: *previous,
            });
        }

        self.defined.insert(name.to_string(), (value, span));

        let Some((placeholder, first_use)) = self.forward.remove(name) else {
            return Ok(());
        };

        let expected = body.value_type(placeholder).clone();
        if *body.value_type(value) != expected {
            body.replace_all_uses_with_undef(placeholder);
            return Err(NameError::ForwardTypeMismatch {
                expected,
                first_use,
            });
        }

        body.replace_all_uses_with(placeholder, value);
        Ok(())
    }

    /// Names used but never defined, in order of first use
    pub fn unresolved(&self) -> Vec<(String, Span)> {
        let mut pending = self
            .forward
            .iter()
            .map(|(name, (_, span))| (name.clone(), *span))
            .collect::<Vec<_>>();
        pending.sort_by_key(|(_, span)| span.start);
        pending
    }

    /// Points every use of an unresolved name at `undef`
    pub fn drop_unresolved(&mut self, body: &mut Body) {
        for (_, (placeholder, _)) in self.forward.drain() {
            body.replace_all_uses_with_undef(placeholder);
        }
    }
}

#[derive(Debug, Default)]
pub struct BlockNameTable {
    blocks: HashMap<String, BlockId>,
    /// Blocks referenced by a branch before their label was seen
    undefined: HashMap<String, Span>,
}

impl BlockNameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The block a branch to `name` targets, created on first mention
    pub fn reference(&mut self, body: &mut Body, name: &str, span: Span) -> BlockId {
        if let Some(block) = self.blocks.get(name) {
            return *block;
        }

        let block = body.new_block();
        self.blocks.insert(name.to_string(), block);
        self.undefined.insert(name.to_string(), span);
        block
    }

    /// The block a `name:` label starts. A block that was only referenced so
    /// far moves to the end of the layout. `None` means the label was already
    /// defined.
    pub fn define(&mut self, body: &mut Body, name: &str) -> Option<BlockId> {
        match self.blocks.get(name) {
            Some(block) => {
                self.undefined.remove(name)?;
                body.move_block_to_end(*block);
                Some(*block)
            }
            None => {
                let block = body.new_block();
                self.blocks.insert(name.to_string(), block);
                Some(block)
            }
        }
    }

    /// Labels referenced but never defined, in order of first reference
    pub fn finish(&mut self) -> Vec<(String, Span)> {
        let mut pending = self.undefined.drain().collect::<Vec<_>>();
        pending.sort_by_key(|(_, span)| span.start);
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sil::{
        function::InsertPoint,
        instruction::{InstKind, Opcode},
        types::Type,
        value::OwnershipKind,
    };

    fn int32() -> SilType {
        SilType::object(Type::int(32))
    }

    #[test]
    fn forward_uses_are_resolved_by_the_definition() {
        let mut body = Body::default();
        let block = body.new_block();
        let mut names = LocalNameTable::new();

        let placeholder = names
            .use_value(&mut body, "%1", &int32(), Span::new(0, 2))
            .unwrap();
        let user = body.insert(
            InsertPoint::End(block),
            InstKind::Simple(Opcode::Return),
            &[placeholder],
            Vec::new(),
        );

        let arg = body.add_block_argument(block, int32(), OwnershipKind::Any);
        names.define(&mut body, "%1", arg, Span::new(5, 7)).unwrap();

        assert_eq!(body.operand_values(user), vec![arg]);
        assert!(names.unresolved().is_empty());
    }

    #[test]
    fn mismatched_forward_use_becomes_undef() {
        let mut body = Body::default();
        let block = body.new_block();
        let mut names = LocalNameTable::new();

        let placeholder = names
            .use_value(&mut body, "%1", &int32(), Span::new(0, 2))
            .unwrap();
        let user = body.insert(
            InsertPoint::End(block),
            InstKind::Simple(Opcode::Return),
            &[placeholder],
            Vec::new(),
        );

        let word = body.add_block_argument(block, SilType::object(Type::word()), OwnershipKind::Any);
        let error = names.define(&mut body, "%1", word, Span::new(5, 7));

        assert_eq!(
            error,
            Err(NameError::ForwardTypeMismatch {
                expected: int32(),
                first_use: Span::new(0, 2),
            })
        );
        assert_eq!(body.operand_values(user), vec![body.undef(int32())]);
    }

    #[test]
    fn redefinition_and_type_mismatch_are_reported() {
        let mut body = Body::default();
        let block = body.new_block();
        let mut names = LocalNameTable::new();

        let arg = body.add_block_argument(block, int32(), OwnershipKind::Any);
        names.define(&mut body, "%0", arg, Span::new(0, 2)).unwrap();

        assert_eq!(
            names.define(&mut body, "%0", arg, Span::new(3, 5)),
            Err(NameError::Redefined {
                previous: Span::new(0, 2)
            })
        );
        assert_eq!(
            names.use_value(&mut body, "%0", &SilType::address(Type::int(32)), Span::new(6, 8)),
            Err(NameError::TypeMismatch { actual: int32() })
        );
        assert_eq!(names.lookup("%0"), Some(arg));
    }

    #[test]
    fn forward_referenced_blocks_move_to_the_end() {
        let mut body = Body::default();
        let mut blocks = BlockNameTable::new();

        let entry = blocks.define(&mut body, "bb0").unwrap();
        let exit = blocks.reference(&mut body, "bb2", Span::new(10, 13));
        let middle = blocks.define(&mut body, "bb1").unwrap();

        assert_eq!(body.block_order, vec![entry, exit, middle]);
        assert_eq!(blocks.define(&mut body, "bb2"), Some(exit));
        assert_eq!(body.block_order, vec![entry, middle, exit]);
        assert_eq!(blocks.define(&mut body, "bb2"), None);
        assert!(blocks.finish().is_empty());
    }

    #[test]
    fn undefined_blocks_are_listed() {
        let mut body = Body::default();
        let mut blocks = BlockNameTable::new();

        blocks.reference(&mut body, "bb7", Span::new(4, 7));
        blocks.reference(&mut body, "bb3", Span::new(1, 3));

        assert_eq!(
            blocks.finish(),
            vec![
                ("bb3".to_string(), Span::new(1, 3)),
                ("bb7".to_string(), Span::new(4, 7)),
            ]
        );
    }

    #[test]
    fn uses_of_poisoned_names_become_undef() {
        let mut body = Body::default();
        let block = body.new_block();
        let mut names = LocalNameTable::new();

        let placeholder = names
            .use_value(&mut body, "%1", &int32(), Span::new(0, 2))
            .unwrap();
        let user = body.insert(
            InsertPoint::End(block),
            InstKind::Simple(Opcode::Return),
            &[placeholder],
            Vec::new(),
        );

        names.poison(&mut body, "%1");
        let undef = body.undef(int32());

        assert_eq!(body.operand_values(user), vec![undef]);
        assert!(names.unresolved().is_empty());
        assert!(names.is_poisoned("%1"));
        assert_eq!(names.use_value(&mut body, "%1", &int32(), Span::new(9, 11)), Ok(undef));
        assert_eq!(names.lookup("%1"), None);
    }
}
