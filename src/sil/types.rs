//! The type model seen by SIL instructions. Types are immutable and shared
//! through `Rc`, so cloning a [`Type`] is cheap and equality is structural.

use std::rc::Rc;

use itertools::Itertools;
use strum::{Display, EnumString, IntoStaticStr};

use crate::intern::InternedSymbol;

/// Thin pointer to a shared type kind
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Type(Rc<TypeKind>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Builtin.Int1, Builtin.Int64, etc.
    BuiltinInteger(u32),
    /// Builtin.Word
    ///
    /// A pointer sized integer
    BuiltinWord,
    /// Builtin.FPIEEE32, Builtin.FPIEEE64, etc.
    BuiltinFloat(u32),
    /// Builtin.RawPointer
    BuiltinRawPointer,
    /// Builtin.NativeObject
    BuiltinNativeObject,
    /// Builtin.UnknownObject
    BuiltinUnknownObject,
    /// Builtin.BridgeObject
    BuiltinBridgeObject,
    /// Builtin.UnsafeValueBuffer
    BuiltinUnsafeValueBuffer,
    /// Builtin.SILToken
    ///
    /// Produced by `begin_apply` to tie the coroutine to its end
    BuiltinSilToken,
    /// A class, struct or enum, possibly with generic arguments
    Nominal {
        name: InternedSymbol,
        args: Rc<[Type]>,
    },
    /// (label: A, B)
    Tuple(Rc<[TupleElement]>),
    /// @convention(thin) (Int) -> ()
    Function(Rc<SilFunctionType>),
    /// @thick T.Type
    ///
    /// The metatype of a concrete type. For an existential instance this is
    /// spelled `P.Protocol`.
    Metatype {
        instance: Type,
        representation: Option<MetatypeRepresentation>,
    },
    /// @thick P.Type
    ///
    /// The metatype of whatever concrete type an existential holds
    ExistentialMetatype {
        instance: Type,
        representation: Option<MetatypeRepresentation>,
    },
    /// A protocol composition `P & Q`. No protocols at all is `Any`.
    Existential(Rc<[InternedSymbol]>),
    /// T, τ_0_0
    GenericParam(GenericParam),
    /// T.Element
    DependentMember { base: Type, name: InternedSymbol },
    /// @opened("01234567-...") P
    ///
    /// The concrete type hidden inside an opened existential
    Opened { id: InternedSymbol, existential: Type },
    /// @sil_weak T, @sil_unowned T, @sil_unmanaged T
    ReferenceStorage {
        ownership: ReferenceOwnership,
        referent: Type,
    },
    /// { var T } <Int>
    Box(Rc<BoxType>),
    /// @block_storage T
    BlockStorage(Type),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleElement {
    pub label: Option<InternedSymbol>,
    pub ty: Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetatypeRepresentation {
    Thin,
    Thick,
    #[strum(serialize = "objc")]
    ObjC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ReferenceOwnership {
    #[strum(serialize = "sil_weak")]
    Weak,
    #[strum(serialize = "sil_unowned")]
    Unowned,
    #[strum(serialize = "sil_unmanaged")]
    Unmanaged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericParam {
    pub name: InternedSymbol,
    pub depth: u32,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoxField {
    pub mutable: bool,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoxType {
    pub generics: Option<Rc<GenericSignature>>,
    pub fields: Vec<BoxField>,
    pub args: Vec<Type>,
}

impl BoxType {
    /// Type of the `index`th field with the box's generic arguments applied
    pub fn field_type(&self, index: usize) -> Option<Type> {
        self.fields
            .get(index)
            .map(|field| field.ty.substitute(&self.args))
    }
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0
    }

    pub fn int(width: u32) -> Self {
        Self::new(TypeKind::BuiltinInteger(width))
    }

    pub fn word() -> Self {
        Self::new(TypeKind::BuiltinWord)
    }

    pub fn raw_pointer() -> Self {
        Self::new(TypeKind::BuiltinRawPointer)
    }

    pub fn native_object() -> Self {
        Self::new(TypeKind::BuiltinNativeObject)
    }

    pub fn sil_token() -> Self {
        Self::new(TypeKind::BuiltinSilToken)
    }

    pub fn empty_tuple() -> Self {
        Self::new(TypeKind::Tuple(Rc::from([])))
    }

    pub fn tuple(elements: impl IntoIterator<Item = Type>) -> Self {
        Self::new(TypeKind::Tuple(
            elements
                .into_iter()
                .map(|ty| TupleElement { label: None, ty })
                .collect(),
        ))
    }

    pub fn nominal(name: impl Into<InternedSymbol>, args: Vec<Type>) -> Self {
        Self::new(TypeKind::Nominal {
            name: name.into(),
            args: args.into(),
        })
    }

    pub fn optional(payload: Type) -> Self {
        Self::nominal("Optional", vec![payload])
    }

    pub fn existential(protocols: Vec<InternedSymbol>) -> Self {
        Self::new(TypeKind::Existential(protocols.into()))
    }

    pub fn metatype(instance: Type, representation: Option<MetatypeRepresentation>) -> Self {
        Self::new(TypeKind::Metatype {
            instance,
            representation,
        })
    }

    pub fn existential_metatype(
        instance: Type,
        representation: Option<MetatypeRepresentation>,
    ) -> Self {
        Self::new(TypeKind::ExistentialMetatype {
            instance,
            representation,
        })
    }

    pub fn generic_param(name: impl Into<InternedSymbol>, depth: u32, index: u32) -> Self {
        Self::new(TypeKind::GenericParam(GenericParam {
            name: name.into(),
            depth,
            index,
        }))
    }

    pub fn function(function: SilFunctionType) -> Self {
        Self::new(TypeKind::Function(Rc::new(function)))
    }

    pub fn builtin_integer_width(&self) -> Option<u32> {
        match self.kind() {
            TypeKind::BuiltinInteger(width) => Some(*width),
            TypeKind::BuiltinWord => Some(64),
            _ => None,
        }
    }

    pub fn is_builtin_integer(&self) -> bool {
        matches!(self.kind(), TypeKind::BuiltinInteger(_) | TypeKind::BuiltinWord)
    }

    pub fn tuple_elements(&self) -> Option<&[TupleElement]> {
        match self.kind() {
            TypeKind::Tuple(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn nominal_name(&self) -> Option<InternedSymbol> {
        match self.kind() {
            TypeKind::Nominal { name, .. } => Some(*name),
            _ => None,
        }
    }

    pub fn nominal_args(&self) -> &[Type] {
        match self.kind() {
            TypeKind::Nominal { args, .. } => args,
            _ => &[],
        }
    }

    /// The wrapped type of `Optional<T>`
    pub fn optional_payload(&self) -> Option<&Type> {
        match self.kind() {
            TypeKind::Nominal { name, args } if name.value() == "Optional" => args.first(),
            _ => None,
        }
    }

    pub fn is_existential(&self) -> bool {
        matches!(self.kind(), TypeKind::Existential(_))
    }

    pub fn is_existential_metatype(&self) -> bool {
        matches!(self.kind(), TypeKind::ExistentialMetatype { .. })
    }

    pub fn is_any_metatype(&self) -> bool {
        matches!(
            self.kind(),
            TypeKind::Metatype { .. } | TypeKind::ExistentialMetatype { .. }
        )
    }

    /// The instance type of a (possibly existential) metatype
    pub fn metatype_instance(&self) -> Option<&Type> {
        match self.kind() {
            TypeKind::Metatype { instance, .. }
            | TypeKind::ExistentialMetatype { instance, .. } => Some(instance),
            _ => None,
        }
    }

    pub fn metatype_representation(&self) -> Option<MetatypeRepresentation> {
        match self.kind() {
            TypeKind::Metatype { representation, .. }
            | TypeKind::ExistentialMetatype { representation, .. } => *representation,
            _ => None,
        }
    }

    pub fn function_type(&self) -> Option<&Rc<SilFunctionType>> {
        match self.kind() {
            TypeKind::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn box_type(&self) -> Option<&BoxType> {
        match self.kind() {
            TypeKind::Box(box_type) => Some(box_type),
            _ => None,
        }
    }

    /// Whether the concrete type is only known at runtime (generic
    /// parameters and opened existentials)
    pub fn is_archetype(&self) -> bool {
        matches!(
            self.kind(),
            TypeKind::GenericParam(_) | TypeKind::DependentMember { .. } | TypeKind::Opened { .. }
        )
    }

    /// Whether an archetype appears anywhere inside the type
    pub fn has_archetype(&self) -> bool {
        match self.kind() {
            TypeKind::GenericParam(_) | TypeKind::DependentMember { .. } | TypeKind::Opened { .. } => {
                true
            }
            TypeKind::Nominal { args, .. } => args.iter().any(Type::has_archetype),
            TypeKind::Tuple(elements) => elements.iter().any(|e| e.ty.has_archetype()),
            TypeKind::Metatype { instance, .. } | TypeKind::ExistentialMetatype { instance, .. } => {
                instance.has_archetype()
            }
            TypeKind::ReferenceStorage { referent, .. } => referent.has_archetype(),
            TypeKind::BlockStorage(ty) => ty.has_archetype(),
            TypeKind::Box(box_type) => box_type.args.iter().any(Type::has_archetype),
            TypeKind::Function(function) => {
                function.generics.is_none()
                    && function
                        .params
                        .iter()
                        .map(|p| &p.ty)
                        .chain(function.results.iter().map(|r| &r.ty))
                        .any(Type::has_archetype)
            }
            _ => false,
        }
    }

    pub fn has_opened_existential(&self) -> bool {
        match self.kind() {
            TypeKind::Opened { .. } => true,
            TypeKind::Nominal { args, .. } => args.iter().any(Type::has_opened_existential),
            TypeKind::Tuple(elements) => elements.iter().any(|e| e.ty.has_opened_existential()),
            TypeKind::Metatype { instance, .. } | TypeKind::ExistentialMetatype { instance, .. } => {
                instance.has_opened_existential()
            }
            TypeKind::ReferenceStorage { referent, .. } => referent.has_opened_existential(),
            TypeKind::BlockStorage(ty) => ty.has_opened_existential(),
            TypeKind::Box(box_type) => box_type.args.iter().any(Type::has_opened_existential),
            TypeKind::Function(function) => function
                .params
                .iter()
                .map(|p| &p.ty)
                .chain(function.results.iter().map(|r| &r.ty))
                .any(Type::has_opened_existential),
            _ => false,
        }
    }

    /// Replaces every depth-0 generic parameter with the matching entry of
    /// `replacements`. Parameters without a replacement are left alone.
    pub fn substitute(&self, replacements: &[Type]) -> Type {
        if replacements.is_empty() {
            return self.clone();
        }

        match self.kind() {
            TypeKind::GenericParam(param) if param.depth == 0 => replacements
                .get(param.index as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            TypeKind::Nominal { name, args } => Type::new(TypeKind::Nominal {
                name: *name,
                args: args.iter().map(|a| a.substitute(replacements)).collect(),
            }),
            TypeKind::Tuple(elements) => Type::new(TypeKind::Tuple(
                elements
                    .iter()
                    .map(|e| TupleElement {
                        label: e.label,
                        ty: e.ty.substitute(replacements),
                    })
                    .collect(),
            )),
            TypeKind::Metatype {
                instance,
                representation,
            } => Type::metatype(instance.substitute(replacements), *representation),
            TypeKind::ExistentialMetatype {
                instance,
                representation,
            } => Type::existential_metatype(instance.substitute(replacements), *representation),
            TypeKind::ReferenceStorage { ownership, referent } => {
                Type::new(TypeKind::ReferenceStorage {
                    ownership: *ownership,
                    referent: referent.substitute(replacements),
                })
            }
            TypeKind::BlockStorage(ty) => {
                Type::new(TypeKind::BlockStorage(ty.substitute(replacements)))
            }
            TypeKind::Box(box_type) => Type::new(TypeKind::Box(Rc::new(BoxType {
                generics: box_type.generics.clone(),
                fields: box_type.fields.clone(),
                args: box_type
                    .args
                    .iter()
                    .map(|a| a.substitute(replacements))
                    .collect(),
            }))),
            TypeKind::DependentMember { base, name } => Type::new(TypeKind::DependentMember {
                base: base.substitute(replacements),
                name: *name,
            }),
            // Generic function types bind their own parameters
            TypeKind::Function(function) if function.generics.is_none() => {
                Type::function(function.substitute_unchecked(replacements))
            }
            _ => self.clone(),
        }
    }
}

impl core::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Type({self})")
    }
}

impl core::ops::Deref for Type {
    type Target = TypeKind;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn needs_parens_as_metatype_instance(ty: &Type) -> bool {
    match ty.kind() {
        TypeKind::Function(_) => true,
        TypeKind::Existential(protocols) => protocols.len() > 1,
        _ => false,
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            TypeKind::BuiltinInteger(width) => write!(f, "Builtin.Int{width}"),
            TypeKind::BuiltinWord => f.write_str("Builtin.Word"),
            TypeKind::BuiltinFloat(width) => write!(f, "Builtin.FPIEEE{width}"),
            TypeKind::BuiltinRawPointer => f.write_str("Builtin.RawPointer"),
            TypeKind::BuiltinNativeObject => f.write_str("Builtin.NativeObject"),
            TypeKind::BuiltinUnknownObject => f.write_str("Builtin.UnknownObject"),
            TypeKind::BuiltinBridgeObject => f.write_str("Builtin.BridgeObject"),
            TypeKind::BuiltinUnsafeValueBuffer => f.write_str("Builtin.UnsafeValueBuffer"),
            TypeKind::BuiltinSilToken => f.write_str("Builtin.SILToken"),
            TypeKind::Nominal { name, args } if args.is_empty() => write!(f, "{name}"),
            TypeKind::Nominal { name, args } => write!(f, "{name}<{}>", args.iter().join(", ")),
            TypeKind::Tuple(elements) => {
                write!(
                    f,
                    "({})",
                    elements
                        .iter()
                        .map(|e| match e.label {
                            Some(label) => format!("{label}: {}", e.ty),
                            None => e.ty.to_string(),
                        })
                        .join(", ")
                )
            }
            TypeKind::Function(function) => write!(f, "{function}"),
            TypeKind::Metatype {
                instance,
                representation,
            }
            | TypeKind::ExistentialMetatype {
                instance,
                representation,
            } => {
                if let Some(representation) = representation {
                    write!(f, "@{representation} ")?;
                }

                if needs_parens_as_metatype_instance(instance) {
                    write!(f, "({instance})")?;
                } else {
                    write!(f, "{instance}")?;
                }

                let suffix = match self.kind() {
                    TypeKind::Metatype { .. } if instance.is_existential() => "Protocol",
                    _ => "Type",
                };

                write!(f, ".{suffix}")
            }
            TypeKind::Existential(protocols) if protocols.is_empty() => f.write_str("Any"),
            TypeKind::Existential(protocols) => write!(f, "{}", protocols.iter().join(" & ")),
            TypeKind::GenericParam(param) => write!(f, "{}", param.name),
            TypeKind::DependentMember { base, name } => write!(f, "{base}.{name}"),
            TypeKind::Opened { id, existential } => write!(f, "@opened(\"{id}\") {existential}"),
            TypeKind::ReferenceStorage { ownership, referent } => {
                write!(f, "@{ownership} {referent}")
            }
            TypeKind::Box(box_type) => {
                if let Some(generics) = &box_type.generics {
                    write!(f, "{generics} ")?;
                }

                write!(
                    f,
                    "{{ {} }}",
                    box_type
                        .fields
                        .iter()
                        .map(|field| format!("{} {}", if field.mutable { "var" } else { "let" }, field.ty))
                        .join(", ")
                )?;

                if !box_type.args.is_empty() {
                    write!(f, " <{}>", box_type.args.iter().join(", "))?;
                }

                Ok(())
            }
            TypeKind::BlockStorage(ty) => write!(f, "@block_storage {ty}"),
        }
    }
}

/// Whether a SIL value is the object itself or the address of one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueCategory {
    Object,
    Address,
}

/// A lowered type together with its value category. Spelled `$T` for
/// objects and `$*T` for addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SilType {
    pub ty: Type,
    pub category: ValueCategory,
}

impl SilType {
    pub fn object(ty: Type) -> Self {
        Self {
            ty,
            category: ValueCategory::Object,
        }
    }

    pub fn address(ty: Type) -> Self {
        Self {
            ty,
            category: ValueCategory::Address,
        }
    }

    pub fn is_address(&self) -> bool {
        self.category == ValueCategory::Address
    }

    pub fn is_object(&self) -> bool {
        self.category == ValueCategory::Object
    }

    pub fn address_type(&self) -> SilType {
        SilType::address(self.ty.clone())
    }

    pub fn object_type(&self) -> SilType {
        SilType::object(self.ty.clone())
    }

    pub fn substitute(&self, replacements: &[Type]) -> SilType {
        SilType {
            ty: self.ty.substitute(replacements),
            category: self.category,
        }
    }
}

impl core::fmt::Display for SilType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.category {
            ValueCategory::Object => write!(f, "${}", self.ty),
            ValueCategory::Address => write!(f, "$*{}", self.ty),
        }
    }
}

/// How a function value is called
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionRepresentation {
    /// A function pointer plus a context
    Thick,
    Thin,
    Method,
    WitnessMethod(InternedSymbol),
    C,
    Block,
    ObjCMethod,
    Closure,
}

impl FunctionRepresentation {
    fn convention_name(&self) -> Option<String> {
        match self {
            FunctionRepresentation::Thick => None,
            FunctionRepresentation::Thin => Some("thin".into()),
            FunctionRepresentation::Method => Some("method".into()),
            FunctionRepresentation::WitnessMethod(protocol) => {
                Some(format!("witness_method: {protocol}"))
            }
            FunctionRepresentation::C => Some("c".into()),
            FunctionRepresentation::Block => Some("block".into()),
            FunctionRepresentation::ObjCMethod => Some("objc_method".into()),
            FunctionRepresentation::Closure => Some("closure".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ParameterConvention {
    #[strum(serialize = "in")]
    IndirectIn,
    #[strum(serialize = "in_constant")]
    IndirectInConstant,
    #[strum(serialize = "in_guaranteed")]
    IndirectInGuaranteed,
    #[strum(serialize = "inout")]
    IndirectInout,
    #[strum(serialize = "inout_aliasable")]
    IndirectInoutAliasable,
    #[strum(serialize = "owned")]
    DirectOwned,
    #[strum(serialize = "unowned")]
    DirectUnowned,
    #[strum(serialize = "guaranteed")]
    DirectGuaranteed,
}

impl ParameterConvention {
    pub fn is_indirect(self) -> bool {
        matches!(
            self,
            Self::IndirectIn
                | Self::IndirectInConstant
                | Self::IndirectInGuaranteed
                | Self::IndirectInout
                | Self::IndirectInoutAliasable
        )
    }

    pub fn is_inout(self) -> bool {
        matches!(self, Self::IndirectInout | Self::IndirectInoutAliasable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ResultConvention {
    #[strum(serialize = "out")]
    Indirect,
    #[strum(serialize = "owned")]
    Owned,
    #[strum(serialize = "unowned")]
    Unowned,
    #[strum(serialize = "unowned_inner_pointer")]
    UnownedInnerPointer,
    #[strum(serialize = "autoreleased")]
    Autoreleased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
pub enum CoroutineKind {
    #[default]
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "yield_once")]
    YieldOnce,
    #[strum(serialize = "yield_many")]
    YieldMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SilParameter {
    pub convention: ParameterConvention,
    pub ty: Type,
}

impl SilParameter {
    pub fn sil_type(&self) -> SilType {
        if self.convention.is_indirect() {
            SilType::address(self.ty.clone())
        } else {
            SilType::object(self.ty.clone())
        }
    }
}

impl core::fmt::Display for SilParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.convention {
            ParameterConvention::DirectUnowned => write!(f, "{}", self.ty),
            convention => write!(f, "@{convention} {}", self.ty),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SilResult {
    pub convention: ResultConvention,
    pub ty: Type,
}

impl SilResult {
    pub fn is_indirect(&self) -> bool {
        self.convention == ResultConvention::Indirect
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequirementKind {
    Conformance(InternedSymbol),
    Superclass(Type),
    SameType(Type),
    Layout(InternedSymbol),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub subject: Type,
    pub kind: RequirementKind,
}

impl core::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            RequirementKind::Conformance(protocol) => write!(f, "{} : {protocol}", self.subject),
            RequirementKind::Superclass(class) => write!(f, "{} : {class}", self.subject),
            RequirementKind::Layout(layout) => write!(f, "{} : {layout}", self.subject),
            RequirementKind::SameType(other) => write!(f, "{} == {other}", self.subject),
        }
    }
}

/// `<T, U where T : P>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct GenericSignature {
    pub params: Vec<GenericParam>,
    pub requirements: Vec<Requirement>,
}

impl GenericSignature {
    /// Protocols `param` must conform to, in declaration order
    pub fn conformance_requirements(&self, param: &GenericParam) -> Vec<InternedSymbol> {
        self.requirements
            .iter()
            .filter_map(|requirement| match (&requirement.kind, requirement.subject.kind()) {
                (RequirementKind::Conformance(protocol), TypeKind::GenericParam(subject))
                    if subject == param =>
                {
                    Some(*protocol)
                }
                _ => None,
            })
            .collect()
    }
}

impl core::fmt::Display for GenericSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}", self.params.iter().map(|p| p.name).join(", "))?;

        if !self.requirements.is_empty() {
            write!(f, " where {}", self.requirements.iter().join(", "))?;
        }

        f.write_str(">")
    }
}

/// A protocol conformance used to satisfy a generic requirement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Conformance {
    /// `Int: Hashable module Swift`
    Concrete {
        ty: Type,
        protocol: InternedSymbol,
        module: InternedSymbol,
    },
    /// `Array<Int>: specialize <Int> (<T> Array<T>: P module Swift)`
    Specialized {
        ty: Type,
        subs: Vec<Substitution>,
        /// Generic parameters the unspecialized conformance is written with
        generics: Option<Rc<GenericSignature>>,
        generic: Rc<Conformance>,
    },
    /// `Derived: inherit (Base: P module M)`
    Inherited { ty: Type, base: Rc<Conformance> },
    /// The conformance of an archetype, only known at runtime
    Abstract { protocol: InternedSymbol },
}

impl Conformance {
    pub fn protocol(&self) -> InternedSymbol {
        match self {
            Conformance::Concrete { protocol, .. } | Conformance::Abstract { protocol } => *protocol,
            Conformance::Specialized { generic, .. } => generic.protocol(),
            Conformance::Inherited { base, .. } => base.protocol(),
        }
    }

    pub fn is_concrete(&self) -> bool {
        !matches!(self, Conformance::Abstract { .. })
    }

    /// The conforming type, if the conformance is concrete
    pub fn conforming_type(&self) -> Option<&Type> {
        match self {
            Conformance::Concrete { ty, .. }
            | Conformance::Specialized { ty, .. }
            | Conformance::Inherited { ty, .. } => Some(ty),
            Conformance::Abstract { .. } => None,
        }
    }
}

impl core::fmt::Display for Conformance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conformance::Concrete {
                ty,
                protocol,
                module,
            } => write!(f, "{ty}: {protocol} module {module}"),
            Conformance::Specialized {
                ty,
                subs,
                generics,
                generic,
            } => {
                write!(
                    f,
                    "{ty}: specialize <{}> (",
                    subs.iter().map(|s| &s.replacement).join(", ")
                )?;

                if let Some(generics) = generics {
                    write!(f, "{generics} ")?;
                }

                write!(f, "{generic})")
            }
            Conformance::Inherited { ty, base } => write!(f, "{ty}: inherit ({base})"),
            Conformance::Abstract { .. } => f.write_str("dependent"),
        }
    }
}

/// One replacement type of a substitution list, with the conformances the
/// generic signature demands of it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Substitution {
    pub replacement: Type,
    pub conformances: Vec<Conformance>,
}

pub fn replacement_types(substitutions: &[Substitution]) -> Vec<Type> {
    substitutions.iter().map(|s| s.replacement.clone()).collect()
}

/// A lowered function type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SilFunctionType {
    pub representation: FunctionRepresentation,
    pub callee: Option<ParameterConvention>,
    pub coroutine: CoroutineKind,
    pub is_noescape: bool,
    pub is_pseudogeneric: bool,
    pub generics: Option<Rc<GenericSignature>>,
    pub params: Vec<SilParameter>,
    pub yields: Vec<SilParameter>,
    pub results: Vec<SilResult>,
    pub error: Option<Type>,
}

impl SilFunctionType {
    pub fn new(representation: FunctionRepresentation) -> Self {
        Self {
            representation,
            callee: None,
            coroutine: CoroutineKind::None,
            is_noescape: false,
            is_pseudogeneric: false,
            generics: None,
            params: Vec::new(),
            yields: Vec::new(),
            results: Vec::new(),
            error: None,
        }
    }

    pub fn thin(params: Vec<SilParameter>, results: Vec<SilResult>) -> Self {
        Self {
            params,
            results,
            ..Self::new(FunctionRepresentation::Thin)
        }
    }

    pub fn is_polymorphic(&self) -> bool {
        self.generics.as_ref().is_some_and(|g| !g.params.is_empty())
    }

    pub fn is_coroutine(&self) -> bool {
        self.coroutine != CoroutineKind::None
    }

    pub fn is_thick(&self) -> bool {
        matches!(
            self.representation,
            FunctionRepresentation::Thick | FunctionRepresentation::Block
        )
    }

    pub fn indirect_results(&self) -> impl Iterator<Item = &SilResult> {
        self.results.iter().filter(|r| r.is_indirect())
    }

    pub fn direct_results(&self) -> impl Iterator<Item = &SilResult> {
        self.results.iter().filter(|r| !r.is_indirect())
    }

    /// The single object type the function returns directly. Several direct
    /// results are returned as a tuple, none as `()`.
    pub fn direct_result_type(&self) -> Type {
        let mut direct = self.direct_results().map(|r| r.ty.clone()).collect::<Vec<_>>();

        if direct.len() == 1 {
            direct.swap_remove(0)
        } else {
            Type::tuple(direct)
        }
    }

    /// Types of the arguments at the SIL level: indirect results first, then
    /// the parameters
    pub fn sil_argument_types(&self) -> Vec<SilType> {
        self.indirect_results()
            .map(|r| SilType::address(r.ty.clone()))
            .chain(self.params.iter().map(SilParameter::sil_type))
            .collect()
    }

    pub fn sil_argument_count(&self) -> usize {
        self.indirect_results().count() + self.params.len()
    }

    /// The same type with its generic signature applied. The caller has
    /// already checked the substitution count.
    pub fn substitute(&self, replacements: &[Type]) -> SilFunctionType {
        let mut substituted = self.substitute_unchecked(replacements);
        substituted.generics = None;
        substituted
    }

    pub(crate) fn substitute_unchecked(&self, replacements: &[Type]) -> SilFunctionType {
        let substitute_param = |p: &SilParameter| SilParameter {
            convention: p.convention,
            ty: p.ty.substitute(replacements),
        };

        SilFunctionType {
            representation: self.representation.clone(),
            callee: self.callee,
            coroutine: self.coroutine,
            is_noescape: self.is_noescape,
            is_pseudogeneric: self.is_pseudogeneric,
            generics: self.generics.clone(),
            params: self.params.iter().map(substitute_param).collect(),
            yields: self.yields.iter().map(substitute_param).collect(),
            results: self
                .results
                .iter()
                .map(|r| SilResult {
                    convention: r.convention,
                    ty: r.ty.substitute(replacements),
                })
                .collect(),
            error: self.error.as_ref().map(|e| e.substitute(replacements)),
        }
    }

    /// The closure type produced by partially applying the last
    /// `applied` parameters
    pub fn partially_applied(&self, applied: usize, callee: ParameterConvention) -> SilFunctionType {
        let remaining = self.params.len().saturating_sub(applied);

        SilFunctionType {
            representation: FunctionRepresentation::Thick,
            callee: Some(callee),
            generics: None,
            params: self.params[..remaining].to_vec(),
            ..self.clone()
        }
    }
}

impl core::fmt::Display for SilFunctionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(convention) = self.representation.convention_name() {
            write!(f, "@convention({convention}) ")?;
        }

        if self.is_pseudogeneric {
            f.write_str("@pseudogeneric ")?;
        }

        if self.is_noescape {
            f.write_str("@noescape ")?;
        }

        if let Some(callee) = self.callee {
            write!(f, "@callee_{callee} ")?;
        }

        if self.coroutine != CoroutineKind::None {
            write!(f, "@{} ", self.coroutine)?;
        }

        if let Some(generics) = &self.generics {
            write!(f, "{generics} ")?;
        }

        write!(f, "({}) -> ", self.params.iter().join(", "))?;

        let mut results = self
            .results
            .iter()
            .map(|r| match r.convention {
                ResultConvention::Unowned => r.ty.to_string(),
                convention => format!("@{convention} {}", r.ty),
            })
            .collect::<Vec<_>>();

        results.extend(self.yields.iter().map(|y| match y.convention {
            ParameterConvention::DirectUnowned => format!("@yields {}", y.ty),
            convention => format!("@yields @{convention} {}", y.ty),
        }));

        if let Some(error) = &self.error {
            results.push(format!("@error {error}"));
        }

        let single_plain_result = results.len() == 1
            && self.error.is_none()
            && self.yields.is_empty()
            && !matches!(self.results[0].ty.kind(), TypeKind::Tuple(_) | TypeKind::Function(_));

        if single_plain_result {
            f.write_str(&results[0])
        } else {
            write!(f, "({})", results.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic_identity() -> SilFunctionType {
        let t = Type::generic_param("T", 0, 0);

        SilFunctionType {
            generics: Some(Rc::new(GenericSignature {
                params: vec![GenericParam {
                    name: "T".into(),
                    depth: 0,
                    index: 0,
                }],
                requirements: Vec::new(),
            })),
            ..SilFunctionType::thin(
                vec![SilParameter {
                    convention: ParameterConvention::IndirectIn,
                    ty: t.clone(),
                }],
                vec![SilResult {
                    convention: ResultConvention::Indirect,
                    ty: t,
                }],
            )
        }
    }

    #[test]
    fn function_types_print_in_sil_syntax() {
        let function = SilFunctionType::thin(
            Vec::new(),
            vec![SilResult {
                convention: ResultConvention::Unowned,
                ty: Type::nominal("Int32", Vec::new()),
            }],
        );

        assert_eq!(function.to_string(), "@convention(thin) () -> Int32");
        assert_eq!(
            generic_identity().to_string(),
            "@convention(thin) <T> (@in T) -> @out T"
        );
    }

    #[test]
    fn substitution_replaces_generic_params() {
        let substituted = generic_identity().substitute(&[Type::int(64)]);

        assert!(!substituted.is_polymorphic());
        assert_eq!(
            substituted.sil_argument_types(),
            vec![
                SilType::address(Type::int(64)),
                SilType::address(Type::int(64))
            ]
        );
    }

    #[test]
    fn existential_metatypes_are_spelled_by_kind() {
        let p = Type::existential(vec!["P".into()]);

        assert_eq!(
            Type::metatype(p.clone(), Some(MetatypeRepresentation::Thick)).to_string(),
            "@thick P.Protocol"
        );
        assert_eq!(
            Type::existential_metatype(p, Some(MetatypeRepresentation::Thick)).to_string(),
            "@thick P.Type"
        );
    }

    #[test]
    fn partial_application_drops_trailing_params() {
        let function = SilFunctionType::thin(
            vec![
                SilParameter {
                    convention: ParameterConvention::DirectUnowned,
                    ty: Type::int(64),
                },
                SilParameter {
                    convention: ParameterConvention::DirectGuaranteed,
                    ty: Type::native_object(),
                },
            ],
            Vec::new(),
        );

        let closure = function.partially_applied(1, ParameterConvention::DirectGuaranteed);
        assert_eq!(closure.params.len(), 1);
        assert_eq!(closure.to_string(), "@callee_guaranteed (Builtin.Int64) -> ()");
    }
}
