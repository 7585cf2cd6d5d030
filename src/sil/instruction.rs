use std::rc::Rc;

use itertools::Itertools;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    intern::InternedSymbol,
    sil::{
        function::BlockId,
        types::{Conformance, GenericSignature, SilType, Substitution, Type},
        value::OwnershipKind,
    },
};

/// Every instruction mnemonic understood by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Opcode {
    /* Literals and references */
    IntegerLiteral,
    FloatLiteral,
    StringLiteral,
    ConstStringLiteral,
    FunctionRef,
    GlobalAddr,
    GlobalValue,
    AllocGlobal,
    Builtin,

    /* Allocation */
    AllocStack,
    AllocBox,
    AllocRef,
    AllocRefDynamic,
    AllocValueBuffer,
    AllocExistentialBox,
    DeallocStack,
    DeallocBox,
    DeallocRef,
    DeallocPartialRef,
    DeallocValueBuffer,
    DeallocExistentialBox,
    ProjectValueBuffer,
    ProjectBox,
    ProjectExistentialBox,
    ProjectBlockStorage,
    InitBlockStorageHeader,

    /* Single operand instructions */
    FixLifetime,
    EndLifetime,
    CopyBlock,
    IsUnique,
    IsUniqueOrPinned,
    DestroyAddr,
    CopyValue,
    CopyUnownedValue,
    DestroyValue,
    CondFail,
    EndBorrowArgument,
    DestructureStruct,
    DestructureTuple,

    /* Reference counting */
    UnmanagedReleaseValue,
    UnmanagedRetainValue,
    UnmanagedAutoreleaseValue,
    StrongPin,
    StrongRetain,
    StrongRelease,
    StrongUnpin,
    StrongRetainUnowned,
    UnownedRetain,
    UnownedRelease,
    AutoreleaseValue,
    SetDeallocating,
    ReleaseValue,
    RetainValue,
    ReleaseValueAddr,
    RetainValueAddr,

    /* Debug info */
    DebugValue,
    DebugValueAddr,

    /* Memory and ownership */
    UncheckedOwnershipConversion,
    Load,
    LoadBorrow,
    BeginBorrow,
    EndBorrow,
    LoadWeak,
    LoadUnowned,
    Store,
    StoreBorrow,
    Assign,
    StoreWeak,
    StoreUnowned,
    CopyAddr,
    MarkDependence,
    MarkUninitialized,
    MarkUninitializedBehavior,
    MarkFunctionEscape,
    BeginAccess,
    EndAccess,
    BeginUnpairedAccess,
    EndUnpairedAccess,
    BindMemory,

    /* Conversions */
    UncheckedRefCast,
    UncheckedAddrCast,
    UncheckedTrivialBitCast,
    UncheckedBitwiseCast,
    Upcast,
    AddressToPointer,
    PointerToAddress,
    BridgeObjectToRef,
    BridgeObjectToWord,
    RefToBridgeObject,
    RefToRawPointer,
    RawPointerToRef,
    RefToUnowned,
    UnownedToRef,
    RefToUnmanaged,
    UnmanagedToRef,
    ThinFunctionToPointer,
    PointerToThinFunction,
    ThinToThickFunction,
    ThickToObjcMetatype,
    ObjcToThickMetatype,
    ConvertFunction,
    ObjcMetatypeToObject,
    ObjcExistentialMetatypeToObject,

    /* Dynamic casts */
    UnconditionalCheckedCast,
    UnconditionalCheckedCastValue,
    UnconditionalCheckedCastAddr,
    UncheckedRefCastAddr,
    CheckedCastBr,
    CheckedCastValueBr,
    CheckedCastAddrBr,

    /* Existentials */
    OpenExistentialAddr,
    OpenExistentialRef,
    OpenExistentialBox,
    OpenExistentialBoxValue,
    OpenExistentialMetatype,
    OpenExistentialValue,
    InitExistentialAddr,
    InitExistentialValue,
    InitExistentialRef,
    InitExistentialMetatype,
    DeinitExistentialAddr,
    DeinitExistentialValue,

    /* Metatypes */
    Metatype,
    ValueMetatype,
    ExistentialMetatype,
    ObjcProtocol,

    /* Aggregates */
    Tuple,
    TupleExtract,
    TupleElementAddr,
    Struct,
    StructExtract,
    StructElementAddr,
    Object,
    Enum,
    InitEnumDataAddr,
    UncheckedEnumData,
    UncheckedTakeEnumDataAddr,
    InjectEnumAddr,
    SelectEnum,
    SelectEnumAddr,
    SelectValue,
    RefElementAddr,
    RefTailAddr,
    IndexAddr,
    TailAddr,
    IndexRawPointer,

    /* Dynamic dispatch */
    ClassMethod,
    SuperMethod,
    ObjcMethod,
    ObjcSuperMethod,
    WitnessMethod,

    /* Function application */
    Apply,
    BeginApply,
    AbortApply,
    EndApply,
    PartialApply,
    TryApply,
    #[strum(serialize = "keypath")]
    KeyPath,

    /* Terminators */
    Br,
    CondBr,
    SwitchValue,
    SwitchEnum,
    SwitchEnumAddr,
    DynamicMethodBr,
    Return,
    Throw,
    Yield,
    Unwind,
    Unreachable,
}

/// Coarse memory effects of an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryBehavior {
    None,
    MayRead,
    MayWrite,
    MayHaveSideEffects,
}

impl Opcode {
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Br
                | Opcode::CondBr
                | Opcode::SwitchValue
                | Opcode::SwitchEnum
                | Opcode::SwitchEnumAddr
                | Opcode::DynamicMethodBr
                | Opcode::CheckedCastBr
                | Opcode::CheckedCastValueBr
                | Opcode::CheckedCastAddrBr
                | Opcode::TryApply
                | Opcode::Return
                | Opcode::Throw
                | Opcode::Yield
                | Opcode::Unwind
                | Opcode::Unreachable
        )
    }

    /// Terminators which leave the function
    pub fn is_function_exiting(self) -> bool {
        matches!(
            self,
            Opcode::Return | Opcode::Throw | Opcode::Unwind | Opcode::Unreachable
        )
    }

    pub fn is_reference_counting(self) -> bool {
        matches!(
            self,
            Opcode::UnmanagedReleaseValue
                | Opcode::UnmanagedRetainValue
                | Opcode::UnmanagedAutoreleaseValue
                | Opcode::StrongPin
                | Opcode::StrongRetain
                | Opcode::StrongRelease
                | Opcode::StrongUnpin
                | Opcode::StrongRetainUnowned
                | Opcode::UnownedRetain
                | Opcode::UnownedRelease
                | Opcode::AutoreleaseValue
                | Opcode::SetDeallocating
                | Opcode::ReleaseValue
                | Opcode::RetainValue
                | Opcode::ReleaseValueAddr
                | Opcode::RetainValueAddr
        )
    }

    pub fn is_debug_value(self) -> bool {
        matches!(self, Opcode::DebugValue | Opcode::DebugValueAddr)
    }

    pub fn is_allocation(self) -> bool {
        matches!(
            self,
            Opcode::AllocStack
                | Opcode::AllocBox
                | Opcode::AllocRef
                | Opcode::AllocRefDynamic
                | Opcode::AllocValueBuffer
                | Opcode::AllocExistentialBox
        )
    }

    /// Instructions spelled `%v : $A to $B`
    pub fn is_conversion(self) -> bool {
        matches!(
            self,
            Opcode::UncheckedRefCast
                | Opcode::UncheckedAddrCast
                | Opcode::UncheckedTrivialBitCast
                | Opcode::UncheckedBitwiseCast
                | Opcode::Upcast
                | Opcode::AddressToPointer
                | Opcode::BridgeObjectToRef
                | Opcode::BridgeObjectToWord
                | Opcode::RefToRawPointer
                | Opcode::RawPointerToRef
                | Opcode::RefToUnowned
                | Opcode::UnownedToRef
                | Opcode::RefToUnmanaged
                | Opcode::UnmanagedToRef
                | Opcode::ThinFunctionToPointer
                | Opcode::PointerToThinFunction
                | Opcode::ThinToThickFunction
                | Opcode::ThickToObjcMetatype
                | Opcode::ObjcToThickMetatype
                | Opcode::ConvertFunction
                | Opcode::ObjcMetatypeToObject
                | Opcode::ObjcExistentialMetatypeToObject
                | Opcode::UnconditionalCheckedCast
                | Opcode::UnconditionalCheckedCastValue
                | Opcode::OpenExistentialRef
                | Opcode::OpenExistentialBox
                | Opcode::OpenExistentialBoxValue
                | Opcode::OpenExistentialMetatype
                | Opcode::OpenExistentialValue
        )
    }

    /// Conversions which neither touch memory nor change the reference
    /// count of the converted value
    pub fn is_ownership_forwarding_conversion(self) -> bool {
        matches!(
            self,
            Opcode::UncheckedRefCast
                | Opcode::Upcast
                | Opcode::ConvertFunction
                | Opcode::ThinToThickFunction
                | Opcode::RefToBridgeObject
                | Opcode::BridgeObjectToRef
                | Opcode::UncheckedBitwiseCast
        )
    }

    pub fn memory_behavior(self) -> MemoryBehavior {
        use Opcode::*;

        match self {
            IntegerLiteral | FloatLiteral | StringLiteral | ConstStringLiteral | FunctionRef
            | GlobalAddr | GlobalValue | Metatype | ObjcProtocol | Tuple | TupleExtract
            | TupleElementAddr | Struct | StructExtract | StructElementAddr | Object | Enum
            | InitEnumDataAddr | UncheckedEnumData | SelectEnum | SelectValue | RefElementAddr
            | RefTailAddr | IndexAddr | TailAddr | IndexRawPointer | ClassMethod | SuperMethod
            | ObjcMethod | ObjcSuperMethod | WitnessMethod | ProjectBox | ProjectExistentialBox
            | ProjectBlockStorage | ProjectValueBuffer | OpenExistentialRef
            | OpenExistentialMetatype | OpenExistentialBox | OpenExistentialBoxValue
            | OpenExistentialValue | InitExistentialRef | InitExistentialMetatype
            | MarkDependence | AllocStack | AllocRef | AllocRefDynamic | AllocBox
            | AllocExistentialBox | DestructureStruct | DestructureTuple
            | UncheckedOwnershipConversion | RefToBridgeObject | BeginBorrow
            | UncheckedRefCast | UncheckedAddrCast | UncheckedTrivialBitCast
            | UncheckedBitwiseCast | Upcast | AddressToPointer | PointerToAddress
            | BridgeObjectToRef | BridgeObjectToWord | RefToRawPointer | RawPointerToRef
            | RefToUnowned | UnownedToRef | RefToUnmanaged | UnmanagedToRef
            | ThinFunctionToPointer | PointerToThinFunction | ThinToThickFunction
            | ThickToObjcMetatype | ObjcToThickMetatype | ConvertFunction
            | ObjcMetatypeToObject | ObjcExistentialMetatypeToObject => MemoryBehavior::None,

            Load | LoadBorrow | LoadWeak | LoadUnowned | ValueMetatype | ExistentialMetatype
            | SelectEnumAddr | OpenExistentialAddr => MemoryBehavior::MayRead,

            Store | StoreBorrow | Assign | StoreWeak | StoreUnowned | CopyAddr
            | InjectEnumAddr | UncheckedTakeEnumDataAddr | InitExistentialAddr
            | InitExistentialValue | DeinitExistentialAddr | DeinitExistentialValue
            | AllocValueBuffer | BindMemory | InitBlockStorageHeader => MemoryBehavior::MayWrite,

            _ => MemoryBehavior::MayHaveSideEffects,
        }
    }

    pub fn may_trap(self) -> bool {
        matches!(
            self,
            Opcode::CondFail
                | Opcode::UnconditionalCheckedCast
                | Opcode::UnconditionalCheckedCastAddr
                | Opcode::UnconditionalCheckedCastValue
        )
    }
}

/// `utf8 "..."`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum StringEncoding {
    Utf8,
    Utf16,
    ObjcSelector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LoadOwnership {
    #[default]
    Unqualified,
    Take,
    Copy,
    Trivial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StoreOwnership {
    #[default]
    Unqualified,
    Init,
    Assign,
    Trivial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AccessKind {
    Init,
    Read,
    Modify,
    Deinit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AccessEnforcement {
    Unknown,
    Static,
    Dynamic,
    Unsafe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MarkUninitializedKind {
    Var,
    RootSelf,
    CrossModuleRootSelf,
    DerivedSelf,
    DerivedSelfOnly,
    DelegatingSelf,
}

/// Whether `open_existential_addr` may modify the opened value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum OpenedExistentialAccess {
    ImmutableAccess,
    MutableAccess,
}

/// What happens to the source of an indirect cast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CastConsumptionKind {
    /// The source is destroyed whether or not the cast succeeds
    TakeAlways,
    /// The source is destroyed only when the cast succeeds
    TakeOnSuccess,
    /// The source is never destroyed, the destination gets a copy
    CopyOnSuccess,
}

impl CastConsumptionKind {
    pub fn takes_on_success(self) -> bool {
        matches!(self, Self::TakeAlways | Self::TakeOnSuccess)
    }

    pub fn takes_on_failure(self) -> bool {
        self == Self::TakeAlways
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum DeclRefKind {
    Func,
    Getter,
    Setter,
    MaterializeForSet,
    Allocator,
    Initializer,
    Enumelt,
    Destroyer,
    Deallocator,
    GlobalAccessor,
    GlobalGetter,
    IvarDestroyer,
    IvarInitializer,
    DefaultArg,
    PropertyInit,
}

/// `#Class.method!allocator.1.foreign`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeclRef {
    pub path: Vec<InternedSymbol>,
    pub kind: Option<DeclRefKind>,
    pub uncurry_level: Option<u32>,
    pub foreign: bool,
    /// `: (C) -> () -> ()`, picks one of several overloads
    pub formal_type: Option<Type>,
}

impl DeclRef {
    pub fn new(path: Vec<InternedSymbol>) -> Self {
        Self {
            path,
            kind: None,
            uncurry_level: None,
            foreign: false,
            formal_type: None,
        }
    }

    /// `#Optional.some!enumelt.1`
    pub fn enum_element(enum_name: &str, case: &str, has_payload: bool) -> Self {
        Self {
            path: vec![enum_name.into(), case.into()],
            kind: Some(DeclRefKind::Enumelt),
            uncurry_level: has_payload.then_some(1),
            foreign: false,
            formal_type: None,
        }
    }

    /// The referenced member, i.e. the last path component
    pub fn member(&self) -> Option<InternedSymbol> {
        self.path.last().copied()
    }

    /// Everything but the last path component
    pub fn parent_name(&self) -> Option<InternedSymbol> {
        (self.path.len() >= 2).then(|| self.path[self.path.len() - 2])
    }
}

impl core::fmt::Display for DeclRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.path.iter().join("."))?;

        let mut parts = Vec::new();

        if let Some(kind) = self.kind {
            parts.push(kind.to_string());
        }

        if let Some(level) = self.uncurry_level {
            parts.push(level.to_string());
        }

        if self.foreign {
            parts.push("foreign".to_string());
        }

        if !parts.is_empty() {
            write!(f, "!{}", parts.join("."))?;
        }

        if let Some(ty) = &self.formal_type {
            write!(f, " : {ty}")?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DebugVarKind {
    Let,
    Var,
}

/// Source variable attached to `alloc_stack`, `alloc_box` and `debug_value`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DebugVar {
    pub kind: Option<DebugVarKind>,
    pub name: Option<String>,
    pub arg_no: Option<u32>,
}

impl DebugVar {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.name.is_none() && self.arg_no.is_none()
    }
}

impl core::fmt::Display for DebugVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(kind) = self.kind {
            write!(f, ", {kind}")?;
        }

        if let Some(name) = &self.name {
            write!(f, ", name {name:?}")?;
        }

        if let Some(arg_no) = self.arg_no {
            write!(f, ", argno {arg_no}")?;
        }

        Ok(())
    }
}

/// The identity of a computed key path component
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPathComponentId {
    Function(InternedSymbol, SilType),
    Decl(DeclRef),
    Property(DeclRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPathComponent {
    StoredProperty {
        property: DeclRef,
        ty: Type,
    },
    ComputedProperty {
        ty: Type,
        id: KeyPathComponentId,
        getter: (InternedSymbol, SilType),
        setter: Option<(InternedSymbol, SilType)>,
    },
    OptionalChain(Type),
    OptionalForce(Type),
    OptionalWrap(Type),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPathPattern {
    pub generics: Option<Rc<GenericSignature>>,
    pub root: Option<Type>,
    pub objc: Option<String>,
    pub components: Vec<KeyPathComponent>,
}

/// Opcode specific payload of an instruction. Operands and result types live
/// on the instruction itself.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// Fully described by its opcode, operands and result types
    Simple(Opcode),
    IntegerLiteral(i128),
    /// Bit pattern of the literal
    FloatLiteral(u128),
    StringLiteral {
        constant: bool,
        encoding: StringEncoding,
        value: String,
    },
    FunctionRef(InternedSymbol),
    Global {
        opcode: Opcode,
        name: InternedSymbol,
    },
    Builtin {
        name: InternedSymbol,
        subs: Vec<Substitution>,
    },
    RefCounting {
        opcode: Opcode,
        atomic: bool,
    },
    /// `%v : $A to $B`
    Conversion(Opcode),
    PointerToAddress {
        strict: bool,
        invariant: bool,
    },
    OwnershipConversion {
        from: OwnershipKind,
        to: OwnershipKind,
    },
    /// Instructions carrying one extra type operand
    WithType {
        opcode: Opcode,
        ty: SilType,
    },
    AllocStack(DebugVar),
    AllocBox(DebugVar),
    AllocRef {
        dynamic: bool,
        objc: bool,
        on_stack: bool,
        tail_types: Vec<SilType>,
    },
    DeallocRef {
        on_stack: bool,
    },
    DebugValue {
        opcode: Opcode,
        var: DebugVar,
    },
    Load(LoadOwnership),
    Store(StoreOwnership),
    /// `load_weak`, `load_unowned`
    LoadReference {
        opcode: Opcode,
        take: bool,
    },
    /// `store_weak`, `store_unowned`
    StoreReference {
        opcode: Opcode,
        initialization: bool,
    },
    CopyAddr {
        take: bool,
        initialization: bool,
    },
    MarkUninitialized(MarkUninitializedKind),
    MarkUninitializedBehavior {
        init_subs: Vec<Substitution>,
        setter_subs: Vec<Substitution>,
    },
    Access {
        opcode: Opcode,
        kind: Option<AccessKind>,
        enforcement: Option<AccessEnforcement>,
        aborting: bool,
    },
    OpenExistentialAddr(OpenedExistentialAccess),
    InitExistential {
        opcode: Opcode,
        concrete: Type,
        conformances: Vec<Conformance>,
    },
    /// `unconditional_checked_cast_addr`, `unchecked_ref_cast_addr`
    CastAddr {
        opcode: Opcode,
        source: Type,
        target: Type,
    },
    CheckedCastBr {
        exact: bool,
        target: SilType,
        success: BlockId,
        failure: BlockId,
    },
    CheckedCastValueBr {
        target: SilType,
        success: BlockId,
        failure: BlockId,
    },
    CheckedCastAddrBr {
        consumption: CastConsumptionKind,
        source: Type,
        target: Type,
        success: BlockId,
        failure: BlockId,
    },
    Enum(DeclRef),
    /// `init_enum_data_addr`, `unchecked_enum_data`,
    /// `unchecked_take_enum_data_addr`, `inject_enum_addr`
    EnumData {
        opcode: Opcode,
        case: DeclRef,
    },
    /// `tuple_extract`, `tuple_element_addr`, `project_box`
    FieldIndex {
        opcode: Opcode,
        index: u32,
    },
    /// `struct_extract`, `struct_element_addr`, `ref_element_addr`
    Field {
        opcode: Opcode,
        field: DeclRef,
    },
    Object {
        tail_count: usize,
    },
    SelectEnum {
        opcode: Opcode,
        cases: Vec<DeclRef>,
        has_default: bool,
    },
    SelectValue {
        has_default: bool,
    },
    Method {
        opcode: Opcode,
        member: DeclRef,
    },
    WitnessMethod {
        lookup: Type,
        member: DeclRef,
        conformance: Conformance,
    },
    ObjcProtocol(DeclRef),
    Apply {
        nothrow: bool,
        subs: Vec<Substitution>,
    },
    BeginApply {
        nothrow: bool,
        subs: Vec<Substitution>,
    },
    PartialApply {
        callee_guaranteed: bool,
        subs: Vec<Substitution>,
    },
    TryApply {
        subs: Vec<Substitution>,
        normal: BlockId,
        error: BlockId,
    },
    KeyPath {
        pattern: KeyPathPattern,
        subs: Vec<Substitution>,
    },
    InitBlockStorageHeader {
        subs: Vec<Substitution>,
    },
    Br(BlockId),
    CondBr {
        true_dest: BlockId,
        false_dest: BlockId,
        true_arg_count: usize,
    },
    SwitchValue {
        cases: Vec<BlockId>,
        default: Option<BlockId>,
    },
    SwitchEnum {
        opcode: Opcode,
        cases: Vec<(DeclRef, BlockId)>,
        default: Option<BlockId>,
    },
    DynamicMethodBr {
        member: DeclRef,
        has_method: BlockId,
        no_method: BlockId,
    },
    Yield {
        resume: BlockId,
        unwind: BlockId,
    },
}

impl InstKind {
    pub fn opcode(&self) -> Opcode {
        match self {
            InstKind::Simple(opcode)
            | InstKind::Conversion(opcode)
            | InstKind::Global { opcode, .. }
            | InstKind::RefCounting { opcode, .. }
            | InstKind::WithType { opcode, .. }
            | InstKind::DebugValue { opcode, .. }
            | InstKind::LoadReference { opcode, .. }
            | InstKind::StoreReference { opcode, .. }
            | InstKind::Access { opcode, .. }
            | InstKind::InitExistential { opcode, .. }
            | InstKind::CastAddr { opcode, .. }
            | InstKind::EnumData { opcode, .. }
            | InstKind::FieldIndex { opcode, .. }
            | InstKind::Field { opcode, .. }
            | InstKind::SelectEnum { opcode, .. }
            | InstKind::Method { opcode, .. }
            | InstKind::SwitchEnum { opcode, .. } => *opcode,
            InstKind::IntegerLiteral(_) => Opcode::IntegerLiteral,
            InstKind::FloatLiteral(_) => Opcode::FloatLiteral,
            InstKind::StringLiteral { constant: false, .. } => Opcode::StringLiteral,
            InstKind::StringLiteral { constant: true, .. } => Opcode::ConstStringLiteral,
            InstKind::FunctionRef(_) => Opcode::FunctionRef,
            InstKind::Builtin { .. } => Opcode::Builtin,
            InstKind::PointerToAddress { .. } => Opcode::PointerToAddress,
            InstKind::OwnershipConversion { .. } => Opcode::UncheckedOwnershipConversion,
            InstKind::AllocStack(_) => Opcode::AllocStack,
            InstKind::AllocBox(_) => Opcode::AllocBox,
            InstKind::AllocRef { dynamic: false, .. } => Opcode::AllocRef,
            InstKind::AllocRef { dynamic: true, .. } => Opcode::AllocRefDynamic,
            InstKind::DeallocRef { .. } => Opcode::DeallocRef,
            InstKind::Load(_) => Opcode::Load,
            InstKind::Store(_) => Opcode::Store,
            InstKind::CopyAddr { .. } => Opcode::CopyAddr,
            InstKind::MarkUninitialized(_) => Opcode::MarkUninitialized,
            InstKind::MarkUninitializedBehavior { .. } => Opcode::MarkUninitializedBehavior,
            InstKind::OpenExistentialAddr(_) => Opcode::OpenExistentialAddr,
            InstKind::CheckedCastBr { .. } => Opcode::CheckedCastBr,
            InstKind::CheckedCastValueBr { .. } => Opcode::CheckedCastValueBr,
            InstKind::CheckedCastAddrBr { .. } => Opcode::CheckedCastAddrBr,
            InstKind::Enum(_) => Opcode::Enum,
            InstKind::Object { .. } => Opcode::Object,
            InstKind::SelectValue { .. } => Opcode::SelectValue,
            InstKind::WitnessMethod { .. } => Opcode::WitnessMethod,
            InstKind::ObjcProtocol(_) => Opcode::ObjcProtocol,
            InstKind::Apply { .. } => Opcode::Apply,
            InstKind::BeginApply { .. } => Opcode::BeginApply,
            InstKind::PartialApply { .. } => Opcode::PartialApply,
            InstKind::TryApply { .. } => Opcode::TryApply,
            InstKind::KeyPath { .. } => Opcode::KeyPath,
            InstKind::InitBlockStorageHeader { .. } => Opcode::InitBlockStorageHeader,
            InstKind::Br(_) => Opcode::Br,
            InstKind::CondBr { .. } => Opcode::CondBr,
            InstKind::SwitchValue { .. } => Opcode::SwitchValue,
            InstKind::DynamicMethodBr { .. } => Opcode::DynamicMethodBr,
            InstKind::Yield { .. } => Opcode::Yield,
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode().is_terminator()
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br(dest) => vec![*dest],
            InstKind::CondBr {
                true_dest,
                false_dest,
                ..
            } => vec![*true_dest, *false_dest],
            InstKind::SwitchValue { cases, default } => {
                cases.iter().copied().chain(*default).collect()
            }
            InstKind::SwitchEnum { cases, default, .. } => {
                cases.iter().map(|(_, block)| *block).chain(*default).collect()
            }
            InstKind::DynamicMethodBr {
                has_method,
                no_method,
                ..
            } => vec![*has_method, *no_method],
            InstKind::CheckedCastBr {
                success, failure, ..
            }
            | InstKind::CheckedCastValueBr {
                success, failure, ..
            }
            | InstKind::CheckedCastAddrBr {
                success, failure, ..
            } => vec![*success, *failure],
            InstKind::TryApply { normal, error, .. } => vec![*normal, *error],
            InstKind::Yield { resume, unwind } => vec![*resume, *unwind],
            _ => Vec::new(),
        }
    }

    pub fn successors_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            InstKind::Br(dest) => vec![dest],
            InstKind::CondBr {
                true_dest,
                false_dest,
                ..
            } => vec![true_dest, false_dest],
            InstKind::SwitchValue { cases, default } => {
                cases.iter_mut().chain(default.as_mut()).collect()
            }
            InstKind::SwitchEnum { cases, default, .. } => cases
                .iter_mut()
                .map(|(_, block)| block)
                .chain(default.as_mut())
                .collect(),
            InstKind::DynamicMethodBr {
                has_method,
                no_method,
                ..
            } => vec![has_method, no_method],
            InstKind::CheckedCastBr {
                success, failure, ..
            }
            | InstKind::CheckedCastValueBr {
                success, failure, ..
            }
            | InstKind::CheckedCastAddrBr {
                success, failure, ..
            } => vec![success, failure],
            InstKind::TryApply { normal, error, .. } => vec![normal, error],
            InstKind::Yield { resume, unwind } => vec![resume, unwind],
            _ => Vec::new(),
        }
    }

    /// Whether executing the instruction can be observed other than through
    /// its results
    pub fn may_have_side_effects(&self) -> bool {
        match self {
            InstKind::Builtin { name, .. } => builtin_has_side_effects(name.value()),
            _ => {
                let opcode = self.opcode();
                opcode.may_trap() || opcode.memory_behavior() >= MemoryBehavior::MayWrite
            }
        }
    }

    pub fn substitutions(&self) -> &[Substitution] {
        match self {
            InstKind::Builtin { subs, .. }
            | InstKind::Apply { subs, .. }
            | InstKind::BeginApply { subs, .. }
            | InstKind::PartialApply { subs, .. }
            | InstKind::TryApply { subs, .. }
            | InstKind::KeyPath { subs, .. }
            | InstKind::InitBlockStorageHeader { subs } => subs,
            _ => &[],
        }
    }
}

/// Builtins which only compute a value from their operands
const PURE_BUILTINS: &[&str] = &[
    "add", "sub", "mul", "and", "or", "xor", "shl", "lshr", "ashr", "sdiv", "udiv", "srem",
    "urem", "fadd", "fsub", "fmul", "fdiv", "frem", "fneg", "cmp_eq", "cmp_ne", "cmp_slt",
    "cmp_sle", "cmp_sgt", "cmp_sge", "cmp_ult", "cmp_ule", "cmp_ugt", "cmp_uge", "fcmp_oeq",
    "fcmp_one", "fcmp_olt", "fcmp_ole", "fcmp_ogt", "fcmp_oge", "trunc", "zext", "sext",
    "zextOrBitCast", "truncOrBitCast", "sextOrBitCast", "bitcast", "ptrtoint", "inttoptr",
    "fptosi", "fptoui", "sitofp", "uitofp", "fptrunc", "fpext", "sizeof", "strideof", "alignof",
    "sadd_with_overflow", "uadd_with_overflow", "ssub_with_overflow", "usub_with_overflow",
    "smul_with_overflow", "umul_with_overflow", "s_to_u_checked_trunc", "u_to_s_checked_trunc",
    "s_to_s_checked_trunc", "u_to_u_checked_trunc", "s_to_u_checked_conversion",
    "u_to_s_checked_conversion", "assumeNonNegative", "int_expect", "int_ctlz", "int_cttz",
    "int_ctpop", "int_bswap", "gep", "canBeClass", "isPOD", "isOptional",
];

/// Strips the trailing type suffixes of a builtin name, e.g.
/// `zextOrBitCast_Int1_Int64` becomes `zextOrBitCast`
pub fn builtin_base_name(name: &str) -> &str {
    let mut base = name;

    while let Some((head, suffix)) = base.rsplit_once('_') {
        let is_type_suffix = suffix == "Word"
            || suffix == "RawPointer"
            || suffix
                .strip_prefix("Int")
                .or_else(|| suffix.strip_prefix("FPIEEE"))
                .is_some_and(|width| !width.is_empty() && width.chars().all(|c| c.is_ascii_digit()));

        if !is_type_suffix {
            break;
        }

        base = head;
    }

    base
}

pub fn builtin_has_side_effects(name: &str) -> bool {
    !PURE_BUILTINS.contains(&builtin_base_name(name))
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn mnemonics_round_trip() {
        for opcode in Opcode::iter() {
            let mnemonic: &'static str = opcode.into();
            assert_eq!(mnemonic.parse::<Opcode>(), Ok(opcode));
        }

        assert_eq!("keypath".parse::<Opcode>(), Ok(Opcode::KeyPath));
        assert_eq!(
            "objc_to_thick_metatype".parse::<Opcode>(),
            Ok(Opcode::ObjcToThickMetatype)
        );
        assert_eq!("cond_br".parse::<Opcode>(), Ok(Opcode::CondBr));
    }

    #[test]
    fn builtin_names_are_classified_by_base_name() {
        assert_eq!(builtin_base_name("zextOrBitCast_Int1_Int64"), "zextOrBitCast");
        assert_eq!(builtin_base_name("sadd_with_overflow_Int64"), "sadd_with_overflow");
        assert!(!builtin_has_side_effects("add_Int64"));
        assert!(builtin_has_side_effects("int_trap"));
        assert!(builtin_has_side_effects("onFastPath"));
    }

    #[test]
    fn decl_refs_print_kind_and_level() {
        let case = DeclRef::enum_element("Optional", "some", true);
        assert_eq!(case.to_string(), "#Optional.some!enumelt.1");

        let method = DeclRef {
            foreign: true,
            kind: Some(DeclRefKind::Func),
            ..DeclRef::new(vec!["NSObject".into(), "description".into()])
        };
        assert_eq!(method.to_string(), "#NSObject.description!func.foreign");
    }
}
