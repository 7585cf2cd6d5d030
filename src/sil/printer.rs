//! Textual output of a module in the syntax the parser reads. Printing a
//! parsed module and parsing the output again gives the same module.

use colored::Colorize;
use hashbrown::HashMap;
use itertools::Itertools;

use crate::{
    config::OptimizationMode,
    intern::InternedSymbol,
    sil::{
        function::{
            BlockId, Body, Function, InlineStrategy, InstId, SerializedKind, ThunkKind,
        },
        instruction::{
            InstKind, KeyPathComponent, KeyPathComponentId, KeyPathPattern,
            LoadOwnership, Opcode, StoreOwnership,
        },
        module::{
            CounterExpr, CounterId, CoverageMap, DebugScope, DefaultWitnessTable, Global, Linkage,
            Module, ScopeParent, VTable, VTableEntryKind, WitnessEntry, WitnessTable,
        },
        types::{SilType, Substitution},
        value::{OwnershipKind, ValueId, ValueKind},
    },
};

/// Prints the whole module with terminal colors
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();

    out.push_str(&format!("{} {}\n\n", "sil_stage".magenta(), module.stage));

    for import in &module.imports {
        out.push_str(&format!("{} {import}\n", "import".magenta()));
    }

    if !module.imports.is_empty() {
        out.push('\n');
    }

    for scope in module.scopes.iter() {
        out.push_str(&print_scope(module, scope));
        out.push('\n');
    }

    if !module.scopes.is_empty() {
        out.push('\n');
    }

    for global in &module.globals {
        out.push_str(&print_global(module, global));
        out.push_str("\n\n");
    }

    for (_, function) in module.live_functions() {
        out.push_str(&print_function(module, function));
        out.push_str("\n\n");
    }

    for vtable in &module.vtables {
        out.push_str(&print_vtable(module, vtable));
        out.push_str("\n\n");
    }

    for table in &module.witness_tables {
        out.push_str(&print_witness_table(table));
        out.push_str("\n\n");
    }

    for table in &module.default_witness_tables {
        out.push_str(&print_default_witness_table(table));
        out.push_str("\n\n");
    }

    for map in &module.coverage_maps {
        out.push_str(&print_coverage_map(map));
        out.push_str("\n\n");
    }

    out
}

/// Same as [`print_module`] without any escape sequences
pub fn print_module_plain(module: &Module) -> String {
    strip_ansi_escapes::strip_str(print_module(module))
}

pub fn print_function(module: &Module, function: &Function) -> String {
    let mut out = format!("{} ", "sil".magenta());

    if function.linkage != Linkage::default_for(function.is_definition()) {
        out.push_str(&format!("{} ", function.linkage));
    }

    out.push_str(&function_attributes(function));
    out.push_str(&format!(
        "{} : {}",
        format!("@{}", function.name).blue(),
        function.lowered_type()
    ));

    if !function.is_definition() {
        return out;
    }

    out.push_str(" {\n");
    out.push_str(&BodyPrinter::new(module, &function.body).print_blocks());
    out.push('}');

    out
}

/// Prints one instruction with the value names its function would use
pub fn print_instruction(module: &Module, body: &Body, inst: InstId) -> String {
    BodyPrinter::new(module, body).instruction(inst)
}

fn function_attributes(function: &Function) -> String {
    let attributes = &function.attributes;
    let mut parts = Vec::new();

    if attributes.transparent {
        parts.push("[transparent]".to_string());
    }

    match attributes.serialized {
        SerializedKind::NotSerialized => {}
        SerializedKind::Serialized => parts.push("[serialized]".to_string()),
        SerializedKind::Serializable => parts.push("[serializable]".to_string()),
    }

    match attributes.thunk {
        ThunkKind::NotThunk => {}
        ThunkKind::Thunk => parts.push("[thunk]".to_string()),
        ThunkKind::ReabstractionThunk => parts.push("[reabstraction_thunk]".to_string()),
    }

    if attributes.global_init {
        parts.push("[global_init]".to_string());
    }

    match attributes.inline {
        InlineStrategy::Default => {}
        InlineStrategy::NoInline => parts.push("[noinline]".to_string()),
        InlineStrategy::AlwaysInline => parts.push("[always_inline]".to_string()),
    }

    match attributes.optimization_mode {
        None => {}
        Some(OptimizationMode::None) => parts.push("[Onone]".to_string()),
        Some(OptimizationMode::Speed) => parts.push("[Ospeed]".to_string()),
        Some(OptimizationMode::Size) => parts.push("[Osize]".to_string()),
    }

    if let Some(effects) = attributes.effects {
        parts.push(format!("[{effects}]"));
    }

    for semantics in &attributes.semantics {
        parts.push(format!("[_semantics {}]", quoted(semantics)));
    }

    for specialization in &attributes.specializations {
        let mut text = format!(
            "[_specialize exported: {}, kind: {}",
            specialization.exported, specialization.kind
        );

        if !specialization.requirements.is_empty() {
            text.push_str(&format!(
                ", where {}",
                specialization.requirements.iter().join(", ")
            ));
        }

        text.push(']');
        parts.push(text);
    }

    if let Some(clang) = &attributes.clang_node {
        parts.push(format!("[clang {clang}]"));
    }

    parts.into_iter().map(|part| format!("{part} ")).collect()
}

fn print_global(module: &Module, global: &Global) -> String {
    let mut out = format!("{} ", "sil_global".magenta());

    if global.linkage != Linkage::default_for(true) {
        out.push_str(&format!("{} ", global.linkage));
    }

    if global.serialized == SerializedKind::Serialized {
        out.push_str("[serialized] ");
    }

    if global.is_let {
        out.push_str("[let] ");
    }

    out.push_str(&format!(
        "{} : {}",
        format!("@{}", global.name).blue(),
        SilType::object(global.ty.clone())
    ));

    if let Some(initializer) = &global.initializer {
        let printer = BodyPrinter::new(module, initializer);
        out.push_str(" = {\n");

        for block in &initializer.block_order {
            for inst in initializer.insts_in(*block) {
                out.push_str(&format!("  {}\n", printer.instruction(inst)));
            }
        }

        out.push('}');
    }

    out
}

fn print_vtable(module: &Module, vtable: &VTable) -> String {
    let mut out = format!("{} ", "sil_vtable".magenta());

    if vtable.serialized == SerializedKind::Serialized {
        out.push_str("[serialized] ");
    }

    out.push_str(&format!("{} {{\n", vtable.class));

    for entry in &vtable.entries {
        out.push_str(&format!("  {}", entry.method));

        match entry.implementation {
            Some(implementation) => {
                out.push_str(": ");
                let implied = module
                    .function_named(implementation.value())
                    .map(|function| function.linkage.strip_external());
                if implied != Some(entry.linkage) {
                    out.push_str(&format!("{} ", entry.linkage));
                }
                out.push_str(&format!("{}", format!("@{implementation}").blue()));
            }
            None => out.push_str(" nil"),
        }

        match entry.kind {
            VTableEntryKind::Normal => {}
            kind => out.push_str(&format!(" [{kind}]")),
        }

        out.push('\n');
    }

    out.push('}');
    out
}

fn print_witness_table(table: &WitnessTable) -> String {
    let mut out = format!("{} ", "sil_witness_table".magenta());

    let default_linkage = if table.is_declaration {
        Linkage::PublicExternal
    } else {
        Linkage::Public
    };

    if table.linkage != default_linkage {
        out.push_str(&format!("{} ", table.linkage));
    }

    if table.serialized == SerializedKind::Serialized {
        out.push_str("[serialized] ");
    }

    if let Some(generics) = &table.generics {
        out.push_str(&format!("{generics} "));
    }

    out.push_str(&table.conformance.to_string());

    if table.is_declaration {
        return out;
    }

    out.push_str(" {\n");

    for entry in &table.entries {
        let text = match entry {
            WitnessEntry::Method {
                requirement,
                witness,
            } => format!(
                "method {requirement}: {}",
                witness.map_or("nil".to_string(), |w| format!("@{w}"))
            ),
            WitnessEntry::AssociatedType { name, ty } => format!("associated_type {name}: {ty}"),
            WitnessEntry::AssociatedTypeProtocol {
                path,
                protocol,
                conformance,
            } => format!(
                "associated_type_protocol ({}: {protocol}): {conformance}",
                path.iter().join(".")
            ),
            WitnessEntry::BaseProtocol {
                protocol,
                conformance,
            } => format!("base_protocol {protocol}: {conformance}"),
        };

        out.push_str(&format!("  {text}\n"));
    }

    for conditional in &table.conditional_conformances {
        out.push_str(&format!(
            "  conditional_conformance ({}: {}): {}\n",
            conditional.subject, conditional.protocol, conditional.conformance
        ));
    }

    out.push('}');
    out
}

fn print_default_witness_table(table: &DefaultWitnessTable) -> String {
    let mut out = format!("{} ", "sil_default_witness_table".magenta());

    if table.linkage != Linkage::Public {
        out.push_str(&format!("{} ", table.linkage));
    }

    out.push_str(&format!("{} {{\n", table.protocol));

    for entry in &table.entries {
        match entry {
            Some((requirement, witness)) => {
                out.push_str(&format!("  method {requirement}: @{witness}\n"))
            }
            None => out.push_str("  no_default\n"),
        }
    }

    out.push('}');
    out
}

fn counter_expr(map: &CoverageMap, counter: CounterId) -> String {
    match map.expressions[counter] {
        CounterExpr::Zero => "zero".to_string(),
        CounterExpr::Counter(id) => id.to_string(),
        CounterExpr::Add(lhs, rhs) => {
            format!("({} + {})", counter_expr(map, lhs), counter_expr(map, rhs))
        }
        CounterExpr::Subtract(lhs, rhs) => {
            format!("({} - {})", counter_expr(map, lhs), counter_expr(map, rhs))
        }
    }
}

fn print_coverage_map(map: &CoverageMap) -> String {
    let mut out = format!(
        "{} {} {} {} {} {{\n",
        "sil_coverage_map".magenta(),
        quoted(map.filename.value()),
        quoted(map.function.value()),
        quoted(&map.pgo_name),
        map.hash
    );

    for region in &map.regions {
        out.push_str(&format!(
            "  {}:{} -> {}:{} : {}\n",
            region.start_line,
            region.start_column,
            region.end_line,
            region.end_column,
            counter_expr(map, region.counter)
        ));
    }

    out.push('}');
    out
}

fn print_scope(module: &Module, scope: &DebugScope) -> String {
    let mut out = format!("{} {} {{ ", "sil_scope".magenta(), scope.slot);

    if let Some(loc) = &scope.loc {
        out.push_str(&format!(
            "loc {}:{}:{} ",
            quoted(loc.file.value()),
            loc.line,
            loc.column
        ));
    }

    match &scope.parent {
        ScopeParent::Scope(parent) => {
            out.push_str(&format!("parent {} ", module.scopes[*parent].slot));
        }
        ScopeParent::Function(name) => {
            let ty = module
                .function_named(name.value())
                .map(|function| function.lowered_type().to_string())
                .unwrap_or_default();
            out.push_str(&format!("parent @{name} : {ty} "));
        }
    }

    if let Some(inlined_at) = scope.inlined_at {
        out.push_str(&format!("inlined_at {} ", module.scopes[inlined_at].slot));
    }

    out.push('}');
    out
}

/// `"..."` with quotes, backslashes and control characters escaped
pub fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');

    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }

    out.push('"');
    out
}

/// Names values and blocks of one body in layout order
struct BodyPrinter<'a> {
    module: &'a Module,
    body: &'a Body,
    values: HashMap<ValueId, usize>,
    blocks: HashMap<BlockId, usize>,
}

impl<'a> BodyPrinter<'a> {
    fn new(module: &'a Module, body: &'a Body) -> Self {
        let mut values = HashMap::new();
        let mut blocks = HashMap::new();

        for (number, block) in body.block_order.iter().enumerate() {
            blocks.insert(*block, number);

            for arg in body.block_args(*block) {
                let next = values.len();
                values.insert(*arg, next);
            }

            for inst in body.insts_in(*block) {
                for result in body.results(inst) {
                    let next = values.len();
                    values.insert(*result, next);
                }
            }
        }

        Self {
            module,
            body,
            values,
            blocks,
        }
    }

    fn print_blocks(&self) -> String {
        let mut out = String::new();

        for (index, block) in self.body.block_order.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }

            let args = self
                .body
                .block_args(*block)
                .iter()
                .map(|arg| {
                    let data = self.body.value(*arg);
                    match data.ownership {
                        OwnershipKind::Any => format!("{} : {}", self.value(*arg), data.ty),
                        ownership => {
                            format!("{} : @{ownership} {}", self.value(*arg), data.ty)
                        }
                    }
                })
                .collect::<Vec<_>>();

            let label = if args.is_empty() {
                format!("{}:", self.block_name(*block))
            } else {
                format!("{}({}):", self.block_name(*block), args.join(", "))
            };

            out.push_str(&format!("{}\n", label.bright_red()));

            for inst in self.body.insts_in(*block) {
                out.push_str(&format!("  {}\n", self.instruction(inst)));
            }
        }

        out
    }

    fn block_name(&self, block: BlockId) -> String {
        match self.blocks.get(&block) {
            Some(number) => format!("bb{number}"),
            None => format!("bb<{block:?}>"),
        }
    }

    fn value(&self, value: ValueId) -> String {
        match self.body.value(value).kind {
            ValueKind::Undef | ValueKind::Placeholder => "undef".to_string(),
            _ => match self.values.get(&value) {
                Some(number) => format!("%{number}"),
                None => "undef".to_string(),
            },
        }
    }

    fn typed(&self, value: ValueId) -> String {
        format!("{} : {}", self.value(value), self.body.value_type(value))
    }

    fn operand(&self, inst: InstId, index: usize) -> String {
        self.body
            .operand_value(inst, index)
            .map(|value| self.value(value))
            .unwrap_or_else(|| "undef".to_string())
    }

    fn typed_operand(&self, inst: InstId, index: usize) -> String {
        self.body
            .operand_value(inst, index)
            .map(|value| self.typed(value))
            .unwrap_or_else(|| "undef".to_string())
    }

    fn operand_type(&self, inst: InstId, index: usize) -> String {
        self.body
            .operand_value(inst, index)
            .map(|value| self.body.value_type(value).to_string())
            .unwrap_or_default()
    }

    fn typed_operands(&self, operands: &[ValueId]) -> String {
        operands.iter().map(|value| self.typed(*value)).join(", ")
    }

    fn result_type(&self, inst: InstId) -> String {
        self.body
            .results(inst)
            .first()
            .map(|result| self.body.value_type(*result).to_string())
            .unwrap_or_default()
    }

    fn destination(&self, block: BlockId, args: &[ValueId]) -> String {
        let name = self.block_name(block).bright_red().to_string();

        if args.is_empty() {
            name
        } else {
            format!("{name}({})", self.typed_operands(args))
        }
    }

    fn substitutions(subs: &[Substitution]) -> String {
        if subs.is_empty() {
            String::new()
        } else {
            format!("<{}>", subs.iter().map(|s| &s.replacement).join(", "))
        }
    }

    /// The full line of an instruction: results, mnemonic, operands and
    /// debug info
    fn instruction(&self, inst: InstId) -> String {
        let data = self.body.inst(inst);

        let results = match data.results.as_slice() {
            [] => String::new(),
            [single] => format!("{} = ", self.value(*single)),
            many => format!("({}) = ", many.iter().map(|r| self.value(*r)).join(", ")),
        };

        let mnemonic: &'static str = data.opcode().into();
        let operands = self.operands_text(inst);

        let mut line = if operands.is_empty() {
            format!("{results}{}", mnemonic.cyan())
        } else {
            format!("{results}{} {operands}", mnemonic.cyan())
        };

        if let Some(loc) = &data.location {
            line.push_str(&format!(
                ", loc {}:{}:{}",
                quoted(loc.file.value()),
                loc.line,
                loc.column
            ));
        }

        if let Some(scope) = data.scope {
            line.push_str(&format!(", scope {}", self.module.scopes[scope].slot));
        }

        line
    }

    fn operands_text(&self, inst: InstId) -> String {
        let body = self.body;
        let data = body.inst(inst);
        let operands = body.operand_values(inst);
        let result = self.result_type(inst);

        match &data.kind {
            InstKind::Simple(opcode) => self.simple_operands(*opcode, inst, &operands),
            InstKind::IntegerLiteral(value) => {
                format!("{result}, {}", value.to_string().purple())
            }
            InstKind::FloatLiteral(bits) => {
                format!("{result}, {}", format!("0x{bits:X}").purple())
            }
            InstKind::StringLiteral {
                encoding, value, ..
            } => format!("{encoding} {}", quoted(value)),
            InstKind::FunctionRef(name) => format!("{} : {result}", format!("@{name}").blue()),
            InstKind::Global {
                opcode: Opcode::AllocGlobal,
                name,
            } => format!("{}", format!("@{name}").blue()),
            InstKind::Global { name, .. } => format!("{} : {result}", format!("@{name}").blue()),
            InstKind::Builtin { name, subs } => format!(
                "{}{}({}) : {result}",
                quoted(name.value()),
                Self::substitutions(subs),
                self.typed_operands(&operands)
            ),
            InstKind::RefCounting { atomic, .. } => {
                let prefix = if *atomic { "" } else { "[nonatomic] " };
                format!("{prefix}{}", self.typed_operand(inst, 0))
            }
            InstKind::Conversion(_) => format!("{} to {result}", self.typed_operand(inst, 0)),
            InstKind::PointerToAddress { strict, invariant } => {
                let mut attributes = String::new();
                if *strict {
                    attributes.push_str("[strict] ");
                }
                if *invariant {
                    attributes.push_str("[invariant] ");
                }
                format!("{} to {attributes}{result}", self.typed_operand(inst, 0))
            }
            InstKind::OwnershipConversion { from, to } => {
                format!("{}, @{from} to @{to}", self.typed_operand(inst, 0))
            }
            InstKind::WithType { opcode, ty } => match opcode {
                Opcode::DeallocExistentialBox | Opcode::RefTailAddr => {
                    format!("{}, {ty}", self.typed_operand(inst, 0))
                }
                Opcode::TailAddr => format!(
                    "{}, {}, {ty}",
                    self.typed_operand(inst, 0),
                    self.typed_operand(inst, 1)
                ),
                Opcode::BindMemory => format!(
                    "{}, {} to {ty}",
                    self.typed_operand(inst, 0),
                    self.typed_operand(inst, 1)
                ),
                _ => format!("{ty} in {}", self.typed_operand(inst, 0)),
            },
            InstKind::AllocStack(var) => {
                let ty = body
                    .results(inst)
                    .first()
                    .map(|r| body.value_type(*r).object_type().to_string())
                    .unwrap_or_default();
                format!("{ty}{var}")
            }
            InstKind::AllocBox(var) => format!("{result}{var}"),
            InstKind::AllocRef {
                dynamic,
                objc,
                on_stack,
                tail_types,
            } => {
                let mut text = String::new();
                if *objc {
                    text.push_str("[objc] ");
                }
                if *on_stack {
                    text.push_str("[stack] ");
                }
                for (index, tail) in tail_types.iter().enumerate() {
                    text.push_str(&format!(
                        "[tail_elems {tail} * {}] ",
                        self.typed_operand(inst, index)
                    ));
                }
                if *dynamic {
                    text.push_str(&format!(
                        "{}, ",
                        self.typed_operand(inst, tail_types.len())
                    ));
                }
                text.push_str(&result);
                text
            }
            InstKind::DeallocRef { on_stack } => {
                let prefix = if *on_stack { "[stack] " } else { "" };
                format!("{prefix}{}", self.typed_operand(inst, 0))
            }
            InstKind::DebugValue { var, .. } => format!("{}{var}", self.typed_operand(inst, 0)),
            InstKind::Load(ownership) => match ownership {
                LoadOwnership::Unqualified => self.typed_operand(inst, 0),
                ownership => format!("[{ownership}] {}", self.typed_operand(inst, 0)),
            },
            InstKind::Store(ownership) => {
                let qualifier = match ownership {
                    StoreOwnership::Unqualified => String::new(),
                    ownership => format!("[{ownership}] "),
                };
                format!(
                    "{} to {qualifier}{}",
                    self.operand(inst, 0),
                    self.typed_operand(inst, 1)
                )
            }
            InstKind::LoadReference { take, .. } => {
                let prefix = if *take { "[take] " } else { "" };
                format!("{prefix}{}", self.typed_operand(inst, 0))
            }
            InstKind::StoreReference { initialization, .. } => {
                let qualifier = if *initialization {
                    "[initialization] "
                } else {
                    ""
                };
                format!(
                    "{} to {qualifier}{}",
                    self.operand(inst, 0),
                    self.typed_operand(inst, 1)
                )
            }
            InstKind::CopyAddr {
                take,
                initialization,
            } => format!(
                "{}{} to {}{}",
                if *take { "[take] " } else { "" },
                self.operand(inst, 0),
                if *initialization {
                    "[initialization] "
                } else {
                    ""
                },
                self.typed_operand(inst, 1)
            ),
            InstKind::MarkUninitialized(kind) => {
                format!("[{kind}] {}", self.typed_operand(inst, 0))
            }
            InstKind::MarkUninitializedBehavior {
                init_subs,
                setter_subs,
            } => format!(
                "{}{}({}) : {}, {}{}({}) : {}",
                self.operand(inst, 0),
                Self::substitutions(init_subs),
                self.operand(inst, 1),
                self.operand_type(inst, 0),
                self.operand(inst, 2),
                Self::substitutions(setter_subs),
                self.operand(inst, 3),
                self.operand_type(inst, 2)
            ),
            InstKind::Access {
                kind,
                enforcement,
                aborting,
                ..
            } => {
                let mut text = String::new();
                if let Some(kind) = kind {
                    text.push_str(&format!("[{kind}] "));
                }
                if let Some(enforcement) = enforcement {
                    text.push_str(&format!("[{enforcement}] "));
                }
                if *aborting {
                    text.push_str("[abort] ");
                }
                text.push_str(&self.typed_operands(&operands));
                text
            }
            InstKind::OpenExistentialAddr(access) => {
                format!("{access} {} to {result}", self.typed_operand(inst, 0))
            }
            InstKind::InitExistential {
                opcode, concrete, ..
            } => match opcode {
                Opcode::InitExistentialAddr => {
                    format!("{}, ${concrete}", self.typed_operand(inst, 0))
                }
                Opcode::InitExistentialValue => {
                    format!("{}, ${concrete}, {result}", self.typed_operand(inst, 0))
                }
                Opcode::InitExistentialRef => {
                    format!("{} : ${concrete}, {result}", self.typed_operand(inst, 0))
                }
                Opcode::AllocExistentialBox => format!("{result}, ${concrete}"),
                _ => format!("{}, {result}", self.typed_operand(inst, 0)),
            },
            InstKind::CastAddr { source, target, .. } => format!(
                "{source} in {} to {target} in {}",
                self.typed_operand(inst, 0),
                self.typed_operand(inst, 1)
            ),
            InstKind::CheckedCastBr {
                exact,
                target,
                success,
                failure,
            } => format!(
                "{}{} to {target}, {}, {}",
                if *exact { "[exact] " } else { "" },
                self.typed_operand(inst, 0),
                self.destination(*success, &[]),
                self.destination(*failure, &[])
            ),
            InstKind::CheckedCastValueBr {
                target,
                success,
                failure,
            } => format!(
                "{} to {target}, {}, {}",
                self.typed_operand(inst, 0),
                self.destination(*success, &[]),
                self.destination(*failure, &[])
            ),
            InstKind::CheckedCastAddrBr {
                consumption,
                source,
                target,
                success,
                failure,
            } => format!(
                "{consumption} {source} in {} to {target} in {}, {}, {}",
                self.typed_operand(inst, 0),
                self.typed_operand(inst, 1),
                self.destination(*success, &[]),
                self.destination(*failure, &[])
            ),
            InstKind::Enum(case) => match operands.first() {
                Some(payload) => format!("{result}, {case}, {}", self.typed(*payload)),
                None => format!("{result}, {case}"),
            },
            InstKind::EnumData { case, .. } => {
                format!("{}, {case}", self.typed_operand(inst, 0))
            }
            InstKind::FieldIndex { index, .. } => {
                format!("{}, {index}", self.typed_operand(inst, 0))
            }
            InstKind::Field { field, .. } => format!("{}, {field}", self.typed_operand(inst, 0)),
            InstKind::Object { tail_count } => {
                let first_tail = operands.len().saturating_sub(*tail_count);
                let elements = operands
                    .iter()
                    .enumerate()
                    .map(|(index, value)| {
                        if index == first_tail && *tail_count > 0 {
                            format!("[tail_elems] {}", self.typed(*value))
                        } else {
                            self.typed(*value)
                        }
                    })
                    .join(", ");
                format!("{result} ({elements})")
            }
            InstKind::SelectEnum {
                cases, has_default, ..
            } => {
                let mut parts = vec![self.typed_operand(inst, 0)];
                for (index, case) in cases.iter().enumerate() {
                    parts.push(format!("case {case}: {}", self.operand(inst, index + 1)));
                }
                if *has_default {
                    parts.push(format!("default {}", self.operand(inst, cases.len() + 1)));
                }
                format!("{} : {result}", parts.join(", "))
            }
            InstKind::SelectValue { has_default } => {
                let case_operands = if *has_default {
                    operands.len().saturating_sub(2)
                } else {
                    operands.len().saturating_sub(1)
                };
                let mut parts = vec![self.typed_operand(inst, 0)];
                for pair in 0..case_operands / 2 {
                    parts.push(format!(
                        "case {}: {}",
                        self.operand(inst, 1 + pair * 2),
                        self.operand(inst, 2 + pair * 2)
                    ));
                }
                if *has_default {
                    parts.push(format!("default {}", self.operand(inst, operands.len() - 1)));
                }
                format!("{} : {result}", parts.join(", "))
            }
            InstKind::Method { member, .. } => {
                format!("{}, {member}, {result}", self.typed_operand(inst, 0))
            }
            InstKind::WitnessMethod { lookup, member, .. } => match operands.first() {
                Some(opened) => format!("${lookup}, {member}, {} : {result}", self.typed(*opened)),
                None => format!("${lookup}, {member} : {result}"),
            },
            InstKind::ObjcProtocol(protocol) => format!("{protocol} : {result}"),
            InstKind::Apply { nothrow, subs } | InstKind::BeginApply { nothrow, subs } => {
                let prefix = if *nothrow { "[nothrow] " } else { "" };
                format!("{prefix}{}", self.call(inst, &operands, subs))
            }
            InstKind::PartialApply {
                callee_guaranteed,
                subs,
            } => {
                let prefix = if *callee_guaranteed {
                    "[callee_guaranteed] "
                } else {
                    ""
                };
                format!("{prefix}{}", self.call(inst, &operands, subs))
            }
            InstKind::TryApply {
                subs,
                normal,
                error,
            } => format!(
                "{}, normal {}, error {}",
                self.call(inst, &operands, subs),
                self.destination(*normal, &[]),
                self.destination(*error, &[])
            ),
            InstKind::KeyPath { pattern, subs } => {
                let mut text = format!("{result}, {}", key_path_pattern(pattern));
                text.push_str(&Self::substitutions(subs));
                if !operands.is_empty() {
                    text.push_str(&format!(
                        " ({})",
                        operands.iter().map(|v| self.value(*v)).join(", ")
                    ));
                }
                text
            }
            InstKind::InitBlockStorageHeader { subs } => format!(
                "{}, invoke {}{} : {}, type {result}",
                self.typed_operand(inst, 0),
                self.operand(inst, 1),
                Self::substitutions(subs),
                self.operand_type(inst, 1)
            ),
            InstKind::Br(dest) => self.destination(*dest, &operands),
            InstKind::CondBr {
                true_dest,
                false_dest,
                true_arg_count,
            } => {
                let true_end = (1 + true_arg_count).min(operands.len());
                format!(
                    "{}, {}, {}",
                    self.operand(inst, 0),
                    self.destination(*true_dest, &operands[1.min(operands.len())..true_end]),
                    self.destination(*false_dest, &operands[true_end..])
                )
            }
            InstKind::SwitchValue { cases, default } => {
                let mut parts = vec![self.typed_operand(inst, 0)];
                for (index, dest) in cases.iter().enumerate() {
                    parts.push(format!(
                        "case {}: {}",
                        self.operand(inst, index + 1),
                        self.destination(*dest, &[])
                    ));
                }
                if let Some(default) = default {
                    parts.push(format!("default {}", self.destination(*default, &[])));
                }
                parts.join(", ")
            }
            InstKind::SwitchEnum { cases, default, .. } => {
                let mut parts = vec![self.typed_operand(inst, 0)];
                for (case, dest) in cases {
                    parts.push(format!("case {case}: {}", self.destination(*dest, &[])));
                }
                if let Some(default) = default {
                    parts.push(format!("default {}", self.destination(*default, &[])));
                }
                parts.join(", ")
            }
            InstKind::DynamicMethodBr {
                member,
                has_method,
                no_method,
            } => format!(
                "{}, {member}, {}, {}",
                self.typed_operand(inst, 0),
                self.destination(*has_method, &[]),
                self.destination(*no_method, &[])
            ),
            InstKind::Yield { resume, unwind } => {
                let yielded = match operands.as_slice() {
                    [single] => self.typed(*single),
                    many => format!("({})", self.typed_operands(many)),
                };
                format!(
                    "{yielded}, resume {}, unwind {}",
                    self.destination(*resume, &[]),
                    self.destination(*unwind, &[])
                )
            }
        }
    }

    fn simple_operands(&self, opcode: Opcode, inst: InstId, operands: &[ValueId]) -> String {
        let result = self.result_type(inst);

        match opcode {
            Opcode::Metatype => result,
            Opcode::ValueMetatype | Opcode::ExistentialMetatype => {
                format!("{result}, {}", self.typed_operand(inst, 0))
            }
            Opcode::Tuple => {
                let labeled = self
                    .body
                    .results(inst)
                    .first()
                    .and_then(|r| self.body.value_type(*r).ty.tuple_elements().map(<[_]>::to_vec))
                    .is_some_and(|elements| elements.iter().any(|e| e.label.is_some()));

                if labeled {
                    format!(
                        "{result} ({})",
                        operands.iter().map(|v| self.value(*v)).join(", ")
                    )
                } else {
                    format!("({})", self.typed_operands(operands))
                }
            }
            Opcode::Struct => format!("{result} ({})", self.typed_operands(operands)),
            Opcode::MarkDependence => format!(
                "{} on {}",
                self.typed_operand(inst, 0),
                self.typed_operand(inst, 1)
            ),
            Opcode::StoreBorrow | Opcode::Assign => format!(
                "{} to {}",
                self.operand(inst, 0),
                self.typed_operand(inst, 1)
            ),
            Opcode::EndBorrow => format!(
                "{} from {} : {}, {}",
                self.operand(inst, 0),
                self.operand(inst, 1),
                self.operand_type(inst, 0),
                self.operand_type(inst, 1)
            ),
            Opcode::AbortApply | Opcode::EndApply => self.operand(inst, 0),
            _ => self.typed_operands(operands),
        }
    }

    fn call(&self, inst: InstId, operands: &[ValueId], subs: &[Substitution]) -> String {
        let args = operands.iter().skip(1).map(|v| self.value(*v)).join(", ");

        format!(
            "{}{}({args}) : {}",
            self.operand(inst, 0),
            Self::substitutions(subs),
            self.operand_type(inst, 0)
        )
    }
}

fn key_path_pattern(pattern: &KeyPathPattern) -> String {
    let mut parts = Vec::new();

    if let Some(objc) = &pattern.objc {
        parts.push(format!("objc {}", quoted(objc)));
    }

    if let Some(root) = &pattern.root {
        parts.push(format!("root ${root}"));
    }

    let accessor = |(name, ty): &(InternedSymbol, SilType)| format!("@{name} : {ty}");

    for component in &pattern.components {
        parts.push(match component {
            KeyPathComponent::StoredProperty { property, ty } => {
                format!("stored_property {property} : ${ty}")
            }
            KeyPathComponent::ComputedProperty {
                ty,
                id,
                getter,
                setter,
            } => {
                let id = match id {
                    KeyPathComponentId::Function(name, ty) => format!("@{name} : {ty}"),
                    KeyPathComponentId::Decl(decl) => decl.to_string(),
                    KeyPathComponentId::Property(decl) => format!("#{decl}"),
                };
                let mut text = format!(
                    "{} ${ty}, id {id}, getter {}",
                    if setter.is_some() {
                        "settable_property"
                    } else {
                        "gettable_property"
                    },
                    accessor(getter)
                );
                if let Some(setter) = setter {
                    text.push_str(&format!(", setter {}", accessor(setter)));
                }
                text
            }
            KeyPathComponent::OptionalChain(ty) => format!("optional_chain : ${ty}"),
            KeyPathComponent::OptionalForce(ty) => format!("optional_force : ${ty}"),
            KeyPathComponent::OptionalWrap(ty) => format!("optional_wrap : ${ty}"),
        });
    }

    let generics = pattern
        .generics
        .as_ref()
        .map(|generics| format!("{generics} "))
        .unwrap_or_default();

    format!("{generics}({})", parts.join("; "))
}
