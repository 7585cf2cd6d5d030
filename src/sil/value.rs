use strum::{Display, EnumIter, EnumString};

use crate::{
    index::simple_index,
    sil::{
        function::{BlockId, InstId},
        types::SilType,
    },
};

simple_index! {
    /// Anything an operand can refer to
    pub struct ValueId;
}

simple_index! {
    /// One use of a value by an instruction
    pub struct OperandId;
}

/// Ownership of a value in ownership qualified SIL. Unqualified functions use
/// `Any` everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum OwnershipKind {
    #[default]
    Any,
    Trivial,
    Unowned,
    Owned,
    Guaranteed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// The `index`th result of an instruction
    Result { inst: InstId, index: u32 },
    /// A block argument. Arguments of the entry block are the function's
    /// arguments, all others act as phis.
    BlockArgument {
        block: BlockId,
        index: u32,
        is_function_argument: bool,
    },
    /// `undef` of some type
    Undef,
    /// Stand-in for a value which was used before its definition was parsed
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: SilType,
    pub kind: ValueKind,
    pub ownership: OwnershipKind,
    /// Head of the intrusive use list
    pub(crate) first_use: Option<OperandId>,
}

impl ValueData {
    pub fn new(ty: SilType, kind: ValueKind, ownership: OwnershipKind) -> Self {
        Self {
            ty,
            kind,
            ownership,
            first_use: None,
        }
    }
}

/// An edge from a user instruction to the value it consumes. The edge is
/// threaded into the value's use list through `prev_use`/`next_use`, so it can
/// be unlinked without walking the list.
#[derive(Debug, Clone)]
pub struct OperandData {
    pub value: ValueId,
    pub user: InstId,
    pub(crate) prev_use: Option<OperandId>,
    pub(crate) next_use: Option<OperandId>,
    pub(crate) linked: bool,
}
