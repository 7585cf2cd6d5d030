//! Collaborators the parser and the optimizer consult but do not own: type
//! facts, constant folding and module loading.

use std::{
    fs,
    path::PathBuf,
};

use hashbrown::HashMap;
use strum::{Display, EnumString};

use crate::{
    config::ParserOptions,
    intern::InternedSymbol,
    parse::parse_source,
    sil::{
        function::{Body, InstId},
        instruction::{builtin_base_name, DeclRefKind, InstKind},
        module::Module,
        types::{Conformance, ReferenceOwnership, Type, TypeKind},
    },
    source::SourceFile,
};

/// Compile time verdict on a dynamic cast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CastFeasibility {
    WillFail,
    MaySucceed,
    WillSucceed,
}

impl CastFeasibility {
    /// Meet of two verdicts: failure wins, certainty needs both sides
    fn and(self, other: CastFeasibility) -> CastFeasibility {
        match (self, other) {
            (CastFeasibility::WillFail, _) | (_, CastFeasibility::WillFail) => {
                CastFeasibility::WillFail
            }
            (CastFeasibility::WillSucceed, CastFeasibility::WillSucceed) => {
                CastFeasibility::WillSucceed
            }
            _ => CastFeasibility::MaySucceed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum NominalKind {
    Class,
    Struct,
    Enum,
    Protocol,
}

/// A declared class, struct, enum or protocol. Member types may mention
/// the declaration's own generic parameters as depth 0 generic params.
#[derive(Debug, Clone)]
pub struct NominalDecl {
    pub name: InternedSymbol,
    pub kind: NominalKind,
    pub module: InternedSymbol,
    pub generic_params: Vec<InternedSymbol>,
    pub superclass: Option<Type>,
    /// Conformances of a type, inherited protocols of a protocol
    pub protocols: Vec<InternedSymbol>,
    pub fields: Vec<(InternedSymbol, Type)>,
    pub cases: Vec<(InternedSymbol, Option<Type>)>,
    pub is_final: bool,
    pub is_objc: bool,
    /// Protocols declared `: class`
    pub class_bound: bool,
    /// `_ObjectiveCType` of an `_ObjectiveCBridgeable` value type
    pub bridged_to: Option<Type>,
}

impl NominalDecl {
    pub fn new(name: impl Into<InternedSymbol>, kind: NominalKind) -> Self {
        Self {
            name: name.into(),
            kind,
            module: "main".into(),
            generic_params: Vec::new(),
            superclass: None,
            protocols: Vec::new(),
            fields: Vec::new(),
            cases: Vec::new(),
            is_final: false,
            is_objc: false,
            class_bound: false,
            bridged_to: None,
        }
    }

    fn in_module(mut self, module: &str) -> Self {
        self.module = module.into();
        self
    }

    fn conforming_to(mut self, protocols: &[&str]) -> Self {
        self.protocols = protocols.iter().map(|p| (*p).into()).collect();
        self
    }
}

/// The protocol a bridged value type conforms to
pub const OBJECTIVE_C_BRIDGEABLE: &str = "_ObjectiveCBridgeable";

/// Standard library entry points used by bridged casts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgingFunction {
    /// `_forceBridgeFromObjectiveC_bridgeable`
    ForceFromObjectiveC,
    /// `_conditionallyBridgeFromObjectiveC_bridgeable`
    ConditionallyFromObjectiveC,
}

/// Everything the IR needs to know about source level declarations
pub trait TypeOracle {
    fn nominal(&self, name: InternedSymbol) -> Option<&NominalDecl>;

    /// SIL name of a standard library bridging function
    fn bridging_function(&self, function: BridgingFunction) -> InternedSymbol {
        match function {
            BridgingFunction::ForceFromObjectiveC => "_forceBridgeFromObjectiveC_bridgeable".into(),
            BridgingFunction::ConditionallyFromObjectiveC => {
                "_conditionallyBridgeFromObjectiveC_bridgeable".into()
            }
        }
    }

    /// SIL name of the `_bridgeToObjectiveC` implementation of a bridged
    /// value type
    fn bridge_to_objective_c_function(&self, ty: &Type) -> Option<InternedSymbol> {
        let decl = self.nominal_of(ty)?;
        decl.bridged_to.as_ref()?;

        Some(format!("{}_bridgeToObjectiveC", decl.name).as_str().into())
    }

    /// The type a name spelled in SIL text refers to. Protocols name their
    /// existential.
    fn resolve_type(&self, name: InternedSymbol, args: Vec<Type>) -> Option<Type> {
        let decl = self.nominal(name)?;

        Some(match decl.kind {
            NominalKind::Protocol => Type::existential(vec![name]),
            _ => Type::nominal(name, args),
        })
    }

    fn nominal_of(&self, ty: &Type) -> Option<&NominalDecl> {
        ty.nominal_name().and_then(|name| self.nominal(name))
    }

    fn is_protocol(&self, name: InternedSymbol) -> bool {
        self.nominal(name)
            .is_some_and(|decl| decl.kind == NominalKind::Protocol)
    }

    fn is_class(&self, ty: &Type) -> bool {
        self.nominal_of(ty)
            .is_some_and(|decl| decl.kind == NominalKind::Class)
    }

    fn is_struct(&self, ty: &Type) -> bool {
        self.nominal_of(ty)
            .is_some_and(|decl| decl.kind == NominalKind::Struct)
    }

    /// Whether the protocol or anything it inherits is class bound
    fn is_class_bound_protocol(&self, protocol: InternedSymbol) -> bool {
        let mut pending = vec![protocol];
        let mut seen = Vec::new();

        while let Some(protocol) = pending.pop() {
            if seen.contains(&protocol) {
                continue;
            }
            seen.push(protocol);

            let Some(decl) = self.nominal(protocol) else {
                continue;
            };

            if decl.class_bound {
                return true;
            }

            pending.extend(decl.protocols.iter().copied());
        }

        false
    }

    fn is_class_bound_existential(&self, ty: &Type) -> bool {
        match ty.kind() {
            TypeKind::Existential(protocols) => protocols
                .iter()
                .any(|protocol| self.is_class_bound_protocol(*protocol)),
            _ => false,
        }
    }

    /// Values held by a single strong reference
    fn is_reference(&self, ty: &Type) -> bool {
        match ty.kind() {
            TypeKind::BuiltinNativeObject
            | TypeKind::BuiltinUnknownObject
            | TypeKind::BuiltinBridgeObject
            | TypeKind::Box(_) => true,
            TypeKind::Existential(_) => self.is_class_bound_existential(ty),
            TypeKind::Opened { existential, .. } => self.is_class_bound_existential(existential),
            _ => self.is_class(ty),
        }
    }

    /// Whether copying the value needs no reference counting
    fn is_trivial(&self, ty: &Type) -> bool {
        is_trivial_at_depth(self, ty, 0)
    }

    /// The superclass with the subclass's generic arguments applied
    fn superclass(&self, ty: &Type) -> Option<Type> {
        let decl = self.nominal_of(ty)?;
        decl.superclass
            .as_ref()
            .map(|superclass| superclass.substitute(ty.nominal_args()))
    }

    /// Whether `sub` is `sup` or inherits from it
    fn is_same_or_subclass(&self, sub: &Type, sup: &Type) -> bool {
        let mut current = Some(sub.clone());
        let mut steps = 0;

        while let Some(class) = current {
            // An unparameterized superclass matches any specialization
            if class == *sup
                || (class.nominal_name() == sup.nominal_name() && sup.nominal_args().is_empty())
            {
                return true;
            }

            steps += 1;
            if steps > 64 {
                break;
            }

            current = self.superclass(&class);
        }

        false
    }

    fn field_index(&self, ty: &Type, field: InternedSymbol) -> Option<usize> {
        self.nominal_of(ty)?
            .fields
            .iter()
            .position(|(name, _)| *name == field)
    }

    /// Type of a stored property, looked up through superclasses
    fn field_type(&self, ty: &Type, field: InternedSymbol) -> Option<Type> {
        let decl = self.nominal_of(ty)?;

        match decl.fields.iter().find(|(name, _)| *name == field) {
            Some((_, field_ty)) => Some(field_ty.substitute(ty.nominal_args())),
            None => self
                .superclass(ty)
                .and_then(|superclass| self.field_type(&superclass, field)),
        }
    }

    /// `Some(payload)` when `case` is an element of the enum
    fn case_payload(&self, ty: &Type, case: InternedSymbol) -> Option<Option<Type>> {
        let decl = self.nominal_of(ty)?;

        decl.cases
            .iter()
            .find(|(name, _)| *name == case)
            .map(|(_, payload)| payload.as_ref().map(|p| p.substitute(ty.nominal_args())))
    }

    fn conforms_to(&self, ty: &Type, protocol: InternedSymbol) -> bool {
        self.lookup_conformance(ty, protocol).is_some()
    }

    fn lookup_conformance(&self, ty: &Type, protocol: InternedSymbol) -> Option<Conformance> {
        match ty.kind() {
            TypeKind::GenericParam(_) | TypeKind::DependentMember { .. } => {
                Some(Conformance::Abstract { protocol })
            }
            TypeKind::Existential(_) | TypeKind::Opened { .. }
                if existential_protocols(ty)
                    .iter()
                    .any(|declared| self.protocol_implies(*declared, protocol)) =>
            {
                Some(Conformance::Abstract { protocol })
            }
            TypeKind::Nominal { name, .. } => {
                let mut current = Some(ty.clone());
                let mut steps = 0;

                while let Some(class) = current {
                    let decl = self.nominal_of(&class)?;

                    if decl
                        .protocols
                        .iter()
                        .any(|declared| self.protocol_implies(*declared, protocol))
                    {
                        let conformance = Conformance::Concrete {
                            ty: class.clone(),
                            protocol,
                            module: decl.module,
                        };

                        return Some(if class.nominal_name() != Some(*name) {
                            Conformance::Inherited {
                                ty: ty.clone(),
                                base: conformance.into(),
                            }
                        } else {
                            conformance
                        });
                    }

                    steps += 1;
                    if steps > 64 {
                        return None;
                    }

                    current = self.superclass(&class);
                }

                None
            }
            _ => None,
        }
    }

    /// Whether conforming to `declared` implies conforming to `wanted`
    fn protocol_implies(&self, declared: InternedSymbol, wanted: InternedSymbol) -> bool {
        let mut pending = vec![declared];
        let mut seen = Vec::new();

        while let Some(protocol) = pending.pop() {
            if protocol == wanted {
                return true;
            }

            if seen.contains(&protocol) {
                continue;
            }
            seen.push(protocol);

            if let Some(decl) = self.nominal(protocol) {
                pending.extend(decl.protocols.iter().copied());
            }
        }

        false
    }

    /// The Objective-C class a type is represented by when bridged. A class
    /// bridges to itself.
    fn bridged_objc_type(&self, ty: &Type) -> Option<Type> {
        let decl = self.nominal_of(ty)?;

        match decl.kind {
            NominalKind::Class => Some(ty.clone()),
            NominalKind::Struct | NominalKind::Enum => decl.bridged_to.clone(),
            NominalKind::Protocol => None,
        }
    }

    fn classify_dynamic_cast(
        &self,
        source: &Type,
        target: &Type,
        source_is_exact: bool,
    ) -> CastFeasibility {
        classify_dynamic_cast(self, source, target, source_is_exact, 0)
    }
}

/// Protocols of an existential, looking through opened archetypes
pub fn existential_protocols(ty: &Type) -> Vec<InternedSymbol> {
    match ty.kind() {
        TypeKind::Existential(protocols) => protocols.to_vec(),
        TypeKind::Opened { existential, .. } => existential_protocols(existential),
        _ => Vec::new(),
    }
}

fn is_trivial_at_depth<O: TypeOracle + ?Sized>(oracle: &O, ty: &Type, depth: u32) -> bool {
    // Recursive value types are not trivial
    if depth > 16 {
        return false;
    }

    match ty.kind() {
        TypeKind::BuiltinInteger(_)
        | TypeKind::BuiltinWord
        | TypeKind::BuiltinFloat(_)
        | TypeKind::BuiltinRawPointer
        | TypeKind::BuiltinSilToken
        | TypeKind::Metatype { .. }
        | TypeKind::ExistentialMetatype { .. } => true,
        TypeKind::Tuple(elements) => elements
            .iter()
            .all(|element| is_trivial_at_depth(oracle, &element.ty, depth + 1)),
        TypeKind::Function(function) => !function.is_thick(),
        TypeKind::ReferenceStorage { ownership, .. } => *ownership == ReferenceOwnership::Unmanaged,
        TypeKind::Nominal { .. } => {
            let Some(decl) = oracle.nominal_of(ty) else {
                return false;
            };

            let args = ty.nominal_args();

            match decl.kind {
                NominalKind::Struct => decl
                    .fields
                    .iter()
                    .all(|(_, field)| is_trivial_at_depth(oracle, &field.substitute(args), depth + 1)),
                NominalKind::Enum => decl.cases.iter().all(|(_, payload)| {
                    payload
                        .as_ref()
                        .is_none_or(|p| is_trivial_at_depth(oracle, &p.substitute(args), depth + 1))
                }),
                NominalKind::Class | NominalKind::Protocol => false,
            }
        }
        _ => false,
    }
}

/* Dynamic cast classification */

fn is_existential_type(ty: &Type) -> bool {
    matches!(ty.kind(), TypeKind::Existential(_))
}

fn classify_dynamic_cast<O: TypeOracle + ?Sized>(
    oracle: &O,
    source: &Type,
    target: &Type,
    source_is_exact: bool,
    depth: u32,
) -> CastFeasibility {
    if source == target {
        return CastFeasibility::WillSucceed;
    }

    if depth > 16 {
        return CastFeasibility::MaySucceed;
    }

    let recurse = |source: &Type, target: &Type, exact: bool| {
        classify_dynamic_cast(oracle, source, target, exact, depth + 1)
    };

    // Optionals unwrap on either side
    match (source.optional_payload(), target.optional_payload()) {
        (Some(source_payload), Some(target_payload)) => {
            // `nil` always casts to `nil`
            return match recurse(source_payload, target_payload, source_is_exact) {
                CastFeasibility::WillFail => CastFeasibility::MaySucceed,
                other => other,
            };
        }
        (Some(source_payload), None) => {
            return match recurse(source_payload, target, source_is_exact) {
                CastFeasibility::WillSucceed => CastFeasibility::MaySucceed,
                other => other,
            };
        }
        (None, Some(target_payload)) => return recurse(source, target_payload, source_is_exact),
        (None, None) => {}
    }

    if source.is_archetype() || target.is_archetype() {
        return CastFeasibility::MaySucceed;
    }

    // Anything converts to `Any`
    if matches!(target.kind(), TypeKind::Existential(protocols) if protocols.is_empty()) {
        return CastFeasibility::WillSucceed;
    }

    /* Metatypes */

    if let (Some(source_instance), Some(target_instance)) =
        (source.metatype_instance(), target.metatype_instance())
    {
        return classify_metatype_cast(oracle, source, target, source_instance, target_instance, source_is_exact, depth);
    }

    if source.is_any_metatype() {
        return match target.kind() {
            TypeKind::Existential(protocols)
                if protocols.iter().all(|p| p.value() == "AnyObject") =>
            {
                CastFeasibility::MaySucceed
            }
            _ => CastFeasibility::WillFail,
        };
    }

    if target.is_any_metatype() {
        return if is_existential_type(source) || is_unknown_object(source) {
            CastFeasibility::MaySucceed
        } else {
            CastFeasibility::WillFail
        };
    }

    /* Existentials */

    if let TypeKind::Existential(target_protocols) = target.kind() {
        return classify_to_existential(oracle, source, target_protocols, source_is_exact);
    }

    if let TypeKind::Existential(source_protocols) = source.kind() {
        return classify_from_existential(oracle, source_protocols, target);
    }

    /* Builtin references */

    if is_unknown_object(source) {
        return if oracle.is_reference(target) || oracle.bridged_objc_type(target).is_some() {
            CastFeasibility::MaySucceed
        } else {
            CastFeasibility::WillFail
        };
    }

    if is_unknown_object(target) {
        return if oracle.is_reference(source) {
            CastFeasibility::WillSucceed
        } else if oracle.bridged_objc_type(source).is_some() {
            CastFeasibility::WillSucceed
        } else {
            CastFeasibility::WillFail
        };
    }

    /* Structural types */

    match (source.kind(), target.kind()) {
        (TypeKind::Tuple(source_elements), TypeKind::Tuple(target_elements)) => {
            if source_elements.len() != target_elements.len() {
                return CastFeasibility::WillFail;
            }

            return source_elements.iter().zip(target_elements.iter()).fold(
                CastFeasibility::WillSucceed,
                |verdict, (s, t)| {
                    if s.label.is_some() && t.label.is_some() && s.label != t.label {
                        return CastFeasibility::WillFail;
                    }
                    verdict.and(recurse(&s.ty, &t.ty, false))
                },
            );
        }
        (TypeKind::Tuple(_), _) | (_, TypeKind::Tuple(_)) => return CastFeasibility::WillFail,
        (TypeKind::Function(_), TypeKind::Function(_)) => return CastFeasibility::MaySucceed,
        (TypeKind::Function(_), _) | (_, TypeKind::Function(_)) => {
            return CastFeasibility::WillFail;
        }
        _ => {}
    }

    /* Nominal types */

    let source_is_class = oracle.is_class(source);
    let target_is_class = oracle.is_class(target);

    if source_is_class && target_is_class {
        if oracle.is_same_or_subclass(source, target) {
            return CastFeasibility::WillSucceed;
        }

        if oracle.is_same_or_subclass(target, source) {
            return if source_is_exact {
                CastFeasibility::WillFail
            } else {
                CastFeasibility::MaySucceed
            };
        }

        return CastFeasibility::WillFail;
    }

    // Bridging between value types and their Objective-C classes
    if target_is_class {
        if let Some(bridged) = oracle.bridged_objc_type(source) {
            if oracle.is_same_or_subclass(&bridged, target) {
                return CastFeasibility::WillSucceed;
            }

            if oracle.is_same_or_subclass(target, &bridged) {
                return CastFeasibility::MaySucceed;
            }
        }

        return CastFeasibility::WillFail;
    }

    if source_is_class {
        if let Some(bridged) = oracle.bridged_objc_type(target) {
            if oracle.is_same_or_subclass(source, &bridged) || oracle.is_same_or_subclass(&bridged, source) {
                return CastFeasibility::MaySucceed;
            }
        }

        return CastFeasibility::WillFail;
    }

    match (source.nominal_name(), target.nominal_name()) {
        // Collections of different element types may still convert
        (Some(source_name), Some(target_name)) if source_name == target_name => {
            CastFeasibility::MaySucceed
        }
        (Some(_), Some(_)) => CastFeasibility::WillFail,
        _ if source.is_builtin_integer() || target.is_builtin_integer() => {
            CastFeasibility::WillFail
        }
        _ => CastFeasibility::MaySucceed,
    }
}

fn is_unknown_object(ty: &Type) -> bool {
    matches!(
        ty.kind(),
        TypeKind::BuiltinUnknownObject | TypeKind::BuiltinNativeObject | TypeKind::BuiltinBridgeObject
    )
}

fn classify_metatype_cast<O: TypeOracle + ?Sized>(
    oracle: &O,
    source: &Type,
    target: &Type,
    source_instance: &Type,
    target_instance: &Type,
    source_is_exact: bool,
    depth: u32,
) -> CastFeasibility {
    // `P.Type` holds the metatype of any conforming type
    if source.is_existential_metatype() {
        return match classify_dynamic_cast(oracle, source_instance, target_instance, false, depth + 1) {
            CastFeasibility::WillSucceed if target.is_existential_metatype() => {
                CastFeasibility::WillSucceed
            }
            CastFeasibility::WillFail if !is_existential_type(target_instance) => {
                CastFeasibility::MaySucceed
            }
            CastFeasibility::WillFail => CastFeasibility::WillFail,
            _ => CastFeasibility::MaySucceed,
        };
    }

    // `P.Protocol` is a single value
    if is_existential_type(source_instance) {
        return if source_instance == target_instance && !target.is_existential_metatype() {
            CastFeasibility::WillSucceed
        } else {
            CastFeasibility::WillFail
        };
    }

    if target.is_existential_metatype() {
        let TypeKind::Existential(protocols) = target_instance.kind() else {
            return CastFeasibility::MaySucceed;
        };

        return classify_to_existential(oracle, source_instance, protocols, source_is_exact);
    }

    if is_existential_type(target_instance) {
        return CastFeasibility::WillFail;
    }

    classify_dynamic_cast(oracle, source_instance, target_instance, source_is_exact, depth + 1)
}

fn classify_to_existential<O: TypeOracle + ?Sized>(
    oracle: &O,
    source: &Type,
    target_protocols: &[InternedSymbol],
    source_is_exact: bool,
) -> CastFeasibility {
    if let TypeKind::Existential(source_protocols) = source.kind() {
        let implied = target_protocols.iter().all(|wanted| {
            source_protocols
                .iter()
                .any(|declared| oracle.protocol_implies(*declared, *wanted))
        });

        return if implied {
            CastFeasibility::WillSucceed
        } else {
            CastFeasibility::MaySucceed
        };
    }

    let class_bound = target_protocols
        .iter()
        .any(|protocol| oracle.is_class_bound_protocol(*protocol));

    if class_bound && !oracle.is_reference(source) && oracle.bridged_objc_type(source).is_none() {
        return CastFeasibility::WillFail;
    }

    let all_conform = target_protocols.iter().all(|protocol| {
        protocol.value() == "AnyObject" && oracle.is_reference(source)
            || oracle.conforms_to(source, *protocol)
    });

    if all_conform {
        return CastFeasibility::WillSucceed;
    }

    // A subclass may add the conformance
    let is_open_class = oracle
        .nominal_of(source)
        .is_some_and(|decl| decl.kind == NominalKind::Class && !decl.is_final);

    if is_open_class && !source_is_exact {
        return CastFeasibility::MaySucceed;
    }

    if oracle.nominal_of(source).is_none() && !source.is_builtin_integer() {
        return CastFeasibility::MaySucceed;
    }

    CastFeasibility::WillFail
}

fn classify_from_existential<O: TypeOracle + ?Sized>(
    oracle: &O,
    source_protocols: &[InternedSymbol],
    target: &Type,
) -> CastFeasibility {
    let class_bound = source_protocols
        .iter()
        .any(|protocol| oracle.is_class_bound_protocol(*protocol));

    if class_bound && !oracle.is_reference(target) && oracle.bridged_objc_type(target).is_none() {
        return CastFeasibility::WillFail;
    }

    let Some(decl) = oracle.nominal_of(target) else {
        return CastFeasibility::MaySucceed;
    };

    let conforms = source_protocols.iter().all(|protocol| {
        protocol.value() == "AnyObject" || oracle.conforms_to(target, *protocol)
    });

    if conforms || (decl.kind == NominalKind::Class && !decl.is_final) {
        CastFeasibility::MaySucceed
    } else {
        CastFeasibility::WillFail
    }
}

/// Table of declarations, filled from the standard library subset below and
/// from declarations found in SIL files
#[derive(Debug, Clone, Default)]
pub struct DeclTable {
    decls: HashMap<InternedSymbol, NominalDecl>,
}

impl DeclTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The declarations every SIL file can rely on
    pub fn with_standard_library() -> Self {
        let mut table = Self::new();
        let wrapped = Type::generic_param("Wrapped", 0, 0);

        table.insert(NominalDecl {
            generic_params: vec!["Wrapped".into()],
            cases: vec![("none".into(), None), ("some".into(), Some(wrapped))],
            ..NominalDecl::new("Optional", NominalKind::Enum).in_module("Swift")
        });

        table.insert(
            NominalDecl {
                class_bound: true,
                ..NominalDecl::new("AnyObject", NominalKind::Protocol)
            }
            .in_module("Swift"),
        );

        for protocol in ["Equatable", "Error", OBJECTIVE_C_BRIDGEABLE] {
            table.insert(NominalDecl::new(protocol, NominalKind::Protocol).in_module("Swift"));
        }

        table.insert(
            NominalDecl::new("Hashable", NominalKind::Protocol)
                .in_module("Swift")
                .conforming_to(&["Equatable"]),
        );

        for (name, storage) in [
            ("Bool", Type::int(1)),
            ("Int", Type::int(64)),
            ("Int8", Type::int(8)),
            ("Int16", Type::int(16)),
            ("Int32", Type::int(32)),
            ("Int64", Type::int(64)),
            ("UInt", Type::int(64)),
            ("UInt8", Type::int(8)),
            ("UInt32", Type::int(32)),
            ("UInt64", Type::int(64)),
            ("Double", Type::new(TypeKind::BuiltinFloat(64))),
            ("Float", Type::new(TypeKind::BuiltinFloat(32))),
        ] {
            table.insert(NominalDecl {
                fields: vec![("_value".into(), storage)],
                ..NominalDecl::new(name, NominalKind::Struct)
                    .in_module("Swift")
                    .conforming_to(&["Hashable"])
            });
        }

        table.insert(NominalDecl {
            fields: vec![("_rawValue".into(), Type::raw_pointer())],
            ..NominalDecl::new("UnsafeMutableRawPointer", NominalKind::Struct).in_module("Swift")
        });

        table
    }

    pub fn insert(&mut self, decl: NominalDecl) {
        self.decls.insert(decl.name, decl);
    }

    pub fn get_mut(&mut self, name: InternedSymbol) -> Option<&mut NominalDecl> {
        self.decls.get_mut(&name)
    }

    pub fn contains(&self, name: InternedSymbol) -> bool {
        self.decls.contains_key(&name)
    }

    /// Adds a conformance declared by an extension
    pub fn add_conformance(&mut self, name: InternedSymbol, protocol: InternedSymbol) -> bool {
        match self.decls.get_mut(&name) {
            Some(decl) => {
                if !decl.protocols.contains(&protocol) {
                    decl.protocols.push(protocol);
                }
                true
            }
            None => false,
        }
    }
}

impl TypeOracle for DeclTable {
    fn nominal(&self, name: InternedSymbol) -> Option<&NominalDecl> {
        self.decls.get(&name)
    }
}

/* Constant folding */

/// Evaluates integer instructions whose operands are literals
pub trait ConstantFolder {
    /// The integer an instruction computes. For `*_with_overflow` builtins
    /// this is the value of the first tuple element, and `None` when the
    /// operation overflows.
    fn fold(&self, body: &Body, inst: InstId) -> Option<i128>;
}

/// Folds the arithmetic builtins over `integer_literal` operands
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralFolder;

impl LiteralFolder {
    fn literal(body: &Body, inst: InstId, index: usize) -> Option<(i128, u32)> {
        let value = body.operand_value(inst, index)?;
        let width = body.value_type(value).ty.builtin_integer_width()?;
        let definition = body.defining_inst(value)?;

        match body.kind(definition) {
            InstKind::IntegerLiteral(literal) => Some((*literal, width)),
            _ => None,
        }
    }
}

/// Sign extends the low `width` bits of `value`
fn sign_extend(value: i128, width: u32) -> i128 {
    if width >= 128 {
        return value;
    }

    let shift = 128 - width;
    (value << shift) >> shift
}

fn zero_extend(value: i128, width: u32) -> i128 {
    if width >= 128 {
        return value;
    }

    value & ((1i128 << width) - 1)
}

impl ConstantFolder for LiteralFolder {
    fn fold(&self, body: &Body, inst: InstId) -> Option<i128> {
        let InstKind::Builtin { name, .. } = body.kind(inst) else {
            return match body.kind(inst) {
                InstKind::IntegerLiteral(value) => Some(*value),
                _ => None,
            };
        };

        let (lhs, width) = Self::literal(body, inst, 0)?;
        let (rhs, _) = Self::literal(body, inst, 1)?;
        let base = builtin_base_name(name.value());

        let checked = |result: Option<i128>, signed: bool| -> Option<i128> {
            let result = result?;
            let truncated = if signed {
                sign_extend(result, width)
            } else {
                zero_extend(result, width)
            };
            (truncated == result).then_some(truncated)
        };

        let (slhs, srhs) = (sign_extend(lhs, width), sign_extend(rhs, width));
        let (ulhs, urhs) = (zero_extend(lhs, width), zero_extend(rhs, width));

        match base {
            "sadd_with_overflow" => checked(slhs.checked_add(srhs), true),
            "ssub_with_overflow" => checked(slhs.checked_sub(srhs), true),
            "smul_with_overflow" => checked(slhs.checked_mul(srhs), true),
            "uadd_with_overflow" => checked(ulhs.checked_add(urhs), false),
            "usub_with_overflow" => checked(ulhs.checked_sub(urhs), false),
            "umul_with_overflow" => checked(ulhs.checked_mul(urhs), false),
            "add" => Some(sign_extend(lhs.wrapping_add(rhs), width)),
            "sub" => Some(sign_extend(lhs.wrapping_sub(rhs), width)),
            "mul" => Some(sign_extend(lhs.wrapping_mul(rhs), width)),
            "and" => Some(sign_extend(lhs & rhs, width)),
            "or" => Some(sign_extend(lhs | rhs, width)),
            "xor" => Some(sign_extend(lhs ^ rhs, width)),
            _ => None,
        }
    }
}

/* Module loading */

/// Records every file handed to a loader, verbatim and in first-seen order
#[derive(Debug, Clone, Default)]
pub struct DependencyTracker {
    paths: Vec<String>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dependency(&mut self, path: &str) {
        if !self.paths.iter().any(|known| known == path) {
            self.paths.push(path.to_string());
        }
    }

    pub fn dependencies(&self) -> &[String] {
        &self.paths
    }
}

pub trait ModuleLoader {
    /// Loads the module `name`, returning `None` when it cannot be found or
    /// fails to parse
    fn load_module(&mut self, name: &str) -> Option<&Module>;

    /// Gives the loader a chance to add conformances declared in extensions
    /// of `nominal` by modules loaded after `since_generation`
    fn load_extensions(&mut self, decls: &mut DeclTable, nominal: InternedSymbol, since_generation: u32);

    /// Implementations of the Objective-C method `selector` of `class` found in
    /// modules loaded after `since_generation`
    fn load_objc_methods_matching(
        &mut self,
        class: InternedSymbol,
        selector: &str,
        is_instance: bool,
        since_generation: u32,
    ) -> Vec<InternedSymbol>;

    /// Whether every loaded module only references functions it declares
    fn verify_all_modules(&self) -> bool;

    fn generation(&self) -> u32;

    fn dependency_tracker(&self) -> Option<&DependencyTracker>;
}

struct LoadedModule {
    generation: u32,
    module: Module,
    decls: DeclTable,
}

/// Loads `<name>.sil` from a list of search directories
pub struct FileModuleLoader {
    search_paths: Vec<PathBuf>,
    options: ParserOptions,
    tracker: DependencyTracker,
    loaded: HashMap<String, LoadedModule>,
    generation: u32,
}

impl FileModuleLoader {
    pub fn new(search_paths: Vec<PathBuf>, options: ParserOptions) -> Self {
        Self {
            search_paths,
            options,
            tracker: DependencyTracker::new(),
            loaded: HashMap::new(),
            generation: 0,
        }
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|dir| dir.join(format!("{name}.sil")))
            .find(|candidate| candidate.is_file())
    }

    fn modules_since(&self, since_generation: u32) -> impl Iterator<Item = &LoadedModule> {
        self.loaded
            .values()
            .filter(move |loaded| loaded.generation > since_generation)
    }
}

impl ModuleLoader for FileModuleLoader {
    fn load_module(&mut self, name: &str) -> Option<&Module> {
        if !self.loaded.contains_key(name) {
            let path = self.find(name)?;
            let path_text = path.to_string_lossy().into_owned();
            self.tracker.add_dependency(&path_text);

            let contents = fs::read_to_string(&path).ok()?;
            let source = SourceFile::from_path(path, contents);
            let mut decls = DeclTable::with_standard_library();
            let parsed = parse_source(&source, &mut decls, self.options.clone(), None);

            if parsed.diagnostics.error_count() > 0 {
                return None;
            }

            self.generation += 1;
            self.loaded.insert(
                name.to_string(),
                LoadedModule {
                    generation: self.generation,
                    module: parsed.module,
                    decls,
                },
            );
        }

        self.loaded.get(name).map(|loaded| &loaded.module)
    }

    fn load_extensions(&mut self, decls: &mut DeclTable, nominal: InternedSymbol, since_generation: u32) {
        let protocols = self
            .modules_since(since_generation)
            .filter_map(|loaded| loaded.decls.nominal(nominal))
            .flat_map(|decl| decl.protocols.clone())
            .collect::<Vec<_>>();

        for protocol in protocols {
            decls.add_conformance(nominal, protocol);
        }
    }

    fn load_objc_methods_matching(
        &mut self,
        class: InternedSymbol,
        selector: &str,
        is_instance: bool,
        since_generation: u32,
    ) -> Vec<InternedSymbol> {
        let mut found = Vec::new();

        for loaded in self.modules_since(since_generation) {
            let Some(vtable) = loaded.module.lookup_vtable(class) else {
                continue;
            };

            for entry in &vtable.entries {
                let method = &entry.method;
                let matches_kind = match method.kind {
                    Some(DeclRefKind::Allocator) => !is_instance,
                    _ => is_instance,
                };

                if method.foreign
                    && matches_kind
                    && method.member().is_some_and(|member| member.value() == selector)
                {
                    found.extend(entry.implementation);
                }
            }
        }

        found
    }

    fn verify_all_modules(&self) -> bool {
        self.loaded.values().all(|loaded| {
            loaded
                .module
                .referenced_functions()
                .iter()
                .all(|name| loaded.module.lookup_function(*name).is_some())
        })
    }

    fn generation(&self) -> u32 {
        self.generation
    }

    fn dependency_tracker(&self) -> Option<&DependencyTracker> {
        Some(&self.tracker)
    }
}
