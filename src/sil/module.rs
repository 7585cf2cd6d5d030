use std::rc::Rc;

use hashbrown::HashMap;
use strum::{Display, EnumString};

use crate::{
    index::{simple_index, IndexVec},
    intern::InternedSymbol,
    sil::{
        function::{Body, Function, FunctionId, SerializedKind, SourceLoc},
        instruction::DeclRef,
        types::{Conformance, GenericSignature, SilFunctionType, Type},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Linkage {
    Public,
    Hidden,
    Shared,
    Private,
    PublicExternal,
    HiddenExternal,
    SharedExternal,
    PrivateExternal,
}

impl Linkage {
    /// Linkage of a function or global spelled without one
    pub fn default_for(is_definition: bool) -> Self {
        if is_definition {
            Linkage::Public
        } else {
            Linkage::PublicExternal
        }
    }

    pub fn is_external(self) -> bool {
        matches!(
            self,
            Linkage::PublicExternal
                | Linkage::HiddenExternal
                | Linkage::SharedExternal
                | Linkage::PrivateExternal
        )
    }

    pub fn strip_external(self) -> Self {
        match self {
            Linkage::PublicExternal => Linkage::Public,
            Linkage::HiddenExternal => Linkage::Hidden,
            Linkage::SharedExternal => Linkage::Shared,
            Linkage::PrivateExternal => Linkage::Private,
            other => other,
        }
    }

    /// The linkage a definition has when seen from another module
    pub fn as_external(self) -> Self {
        match self {
            Linkage::Public => Linkage::PublicExternal,
            Linkage::Hidden => Linkage::HiddenExternal,
            Linkage::Shared => Linkage::SharedExternal,
            Linkage::Private => Linkage::PrivateExternal,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SilStage {
    #[default]
    Raw,
    Canonical,
    Lowered,
}

simple_index! {
    /// A declared `sil_scope`
    pub struct ScopeId;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScopeParent {
    Scope(ScopeId),
    Function(InternedSymbol),
}

/// `sil_scope 2 { loc "a.swift":3:1 parent @f : $@convention(thin) () -> () }`
#[derive(Debug, Clone, PartialEq)]
pub struct DebugScope {
    /// The number the scope is declared and referenced with
    pub slot: u32,
    pub loc: Option<SourceLoc>,
    pub parent: ScopeParent,
    pub inlined_at: Option<ScopeId>,
}

#[derive(Debug, Clone)]
pub struct Global {
    pub name: InternedSymbol,
    pub ty: Type,
    pub linkage: Linkage,
    pub serialized: SerializedKind,
    pub is_let: bool,
    /// Instructions of `= { ... }`, all in a single block
    pub initializer: Option<Body>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum VTableEntryKind {
    Normal,
    Inherited,
    Override,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VTableEntry {
    pub method: DeclRef,
    /// `nil` entries have no implementation
    pub implementation: Option<InternedSymbol>,
    pub kind: VTableEntryKind,
    pub linkage: Linkage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VTable {
    pub class: InternedSymbol,
    pub serialized: SerializedKind,
    pub entries: Vec<VTableEntry>,
}

impl VTable {
}

#[derive(Debug, Clone, PartialEq)]
pub enum WitnessEntry {
    Method {
        requirement: DeclRef,
        witness: Option<InternedSymbol>,
    },
    AssociatedType {
        name: InternedSymbol,
        ty: Type,
    },
    AssociatedTypeProtocol {
        path: Vec<InternedSymbol>,
        protocol: InternedSymbol,
        conformance: Conformance,
    },
    BaseProtocol {
        protocol: InternedSymbol,
        conformance: Conformance,
    },
}

/// `conditional_conformance (T: Equatable): dependent`
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalConformance {
    pub subject: Type,
    pub protocol: InternedSymbol,
    pub conformance: Conformance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WitnessTable {
    pub linkage: Linkage,
    pub serialized: SerializedKind,
    pub generics: Option<Rc<GenericSignature>>,
    pub conformance: Conformance,
    pub entries: Vec<WitnessEntry>,
    pub conditional_conformances: Vec<ConditionalConformance>,
    /// Declared without a body
    pub is_declaration: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefaultWitnessTable {
    pub linkage: Linkage,
    pub protocol: InternedSymbol,
    /// `None` is a `no_default` entry
    pub entries: Vec<Option<(DeclRef, InternedSymbol)>>,
}

simple_index! {
    /// A node of a coverage map's counter expression graph
    pub struct CounterId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterExpr {
    Zero,
    Counter(u32),
    Add(CounterId, CounterId),
    Subtract(CounterId, CounterId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRegion {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub counter: CounterId,
}

#[derive(Debug, Clone)]
pub struct CoverageMap {
    pub filename: InternedSymbol,
    pub function: InternedSymbol,
    pub pgo_name: String,
    pub hash: u64,
    pub regions: Vec<CoverageRegion>,
    pub expressions: IndexVec<CounterId, CounterExpr>,
}

impl CoverageMap {
    /// Builds `lhs + rhs` and `lhs - rhs`, reusing an identical node
    pub fn intern_expression(&mut self, expression: CounterExpr) -> CounterId {
        let existing = self
            .expressions
            .enumerate()
            .find(|(_, e)| **e == expression)
            .map(|(id, _)| id);
        match existing {
            Some(id) => id,
            None => self.expressions.push(expression),
        }
    }
}

/// Everything parsed from one SIL file
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub stage: SilStage,
    pub imports: Vec<InternedSymbol>,
    pub functions: IndexVec<FunctionId, Function>,
    function_table: HashMap<InternedSymbol, FunctionId>,
    pub globals: Vec<Global>,
    pub vtables: Vec<VTable>,
    pub witness_tables: Vec<WitnessTable>,
    pub default_witness_tables: Vec<DefaultWitnessTable>,
    pub coverage_maps: Vec<CoverageMap>,
    pub scopes: IndexVec<ScopeId, DebugScope>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup_function(&self, name: InternedSymbol) -> Option<FunctionId> {
        self.function_table.get(&name).copied()
    }

    pub fn function_named(&self, name: &str) -> Option<&Function> {
        self.lookup_function(name.into()).map(|id| &self.functions[id])
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id]
    }

    /// Adds a function. Zombies are kept out of the name table so lookups
    /// keep finding the original.
    pub fn add_function(&mut self, function: Function) -> FunctionId {
        let name = function.name;
        let is_zombie = function.is_zombie;
        let id = self.functions.push(function);

        if !is_zombie {
            self.function_table.insert(name, id);
        }

        id
    }

    /// Looks a function up, creating an external declaration when it is
    /// missing
    pub fn get_or_declare_function(
        &mut self,
        name: InternedSymbol,
        ty: Rc<SilFunctionType>,
    ) -> FunctionId {
        match self.lookup_function(name) {
            Some(id) => id,
            None => self.add_function(Function::new(name, ty, Linkage::PublicExternal)),
        }
    }

    pub fn live_functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions.enumerate().filter(|(_, f)| !f.is_zombie)
    }

    /// How many `function_ref`s across the module name `name`
    pub fn function_ref_count(&self, name: InternedSymbol) -> usize {
        self.functions
            .iter()
            .map(|function| function.body.function_ref_count(name))
            .chain(
                self.globals
                    .iter()
                    .filter_map(|global| global.initializer.as_ref())
                    .map(|body| body.function_ref_count(name)),
            )
            .sum()
    }

    /// Names referenced from some `function_ref`
    pub fn referenced_functions(&self) -> Vec<InternedSymbol> {
        let mut names = self
            .functions
            .iter()
            .flat_map(|function| function.body.function_refs().map(|(name, _)| *name))
            .collect::<Vec<_>>();
        names.sort_by_key(|name| name.value());
        names.dedup();
        names
    }

    pub fn lookup_global(&self, name: InternedSymbol) -> Option<&Global> {
        self.globals.iter().find(|global| global.name == name)
    }

    pub fn lookup_vtable(&self, class: InternedSymbol) -> Option<&VTable> {
        self.vtables.iter().find(|vtable| vtable.class == class)
    }

    pub fn lookup_default_witness_table(
        &self,
        protocol: InternedSymbol,
    ) -> Option<&DefaultWitnessTable> {
        self.default_witness_tables
            .iter()
            .find(|table| table.protocol == protocol)
    }

    pub fn scope_by_slot(&self, slot: u32) -> Option<ScopeId> {
        self.scopes
            .enumerate()
            .find(|(_, scope)| scope.slot == slot)
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sil::{
        function::InsertPoint,
        instruction::InstKind,
        types::{SilFunctionType, SilType},
    };

    fn thin_void() -> Rc<SilFunctionType> {
        Rc::new(SilFunctionType::thin(Vec::new(), Vec::new()))
    }

    #[test]
    fn zombies_do_not_shadow_the_original() {
        let mut module = Module::new();
        let name: InternedSymbol = "f".into();

        let original = module.add_function(Function::new(name, thin_void(), Linkage::Public));
        let mut zombie = Function::new(name, thin_void(), Linkage::Private);
        zombie.is_zombie = true;
        module.add_function(zombie);

        assert_eq!(module.lookup_function(name), Some(original));
        assert_eq!(module.live_functions().count(), 1);
    }

    #[test]
    fn function_ref_counts_span_the_module() {
        let mut module = Module::new();
        let callee: InternedSymbol = "callee".into();
        let ty = SilType::object(Type::function(SilFunctionType::thin(Vec::new(), Vec::new())));

        for caller in ["a", "b"] {
            let mut function = Function::new(caller.into(), thin_void(), Linkage::Public);
            let entry = function.body.new_block();
            function.body.insert(
                InsertPoint::End(entry),
                InstKind::FunctionRef(callee),
                &[],
                vec![ty.clone()],
            );
            module.add_function(function);
        }

        assert_eq!(module.function_ref_count(callee), 2);
        assert_eq!(module.referenced_functions(), vec![callee]);
    }

    #[test]
    fn linkage_defaults_depend_on_definition() {
        assert_eq!(Linkage::default_for(true), Linkage::Public);
        assert_eq!(Linkage::default_for(false), Linkage::PublicExternal);
        assert_eq!("shared_external".parse::<Linkage>(), Ok(Linkage::SharedExternal));
        assert_eq!(Linkage::HiddenExternal.strip_external(), Linkage::Hidden);
        assert_eq!(Linkage::Shared.as_external(), Linkage::SharedExternal);
        assert!(Linkage::Private.as_external().is_external());
    }
}
