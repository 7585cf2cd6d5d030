//! The single construction path for instructions. The parser and every
//! rewrite create instructions through a [`Builder`], which links them at its
//! insertion point and stamps them with the current debug location.

use paste::paste;

use crate::{
    intern::InternedSymbol,
    sil::{
        function::{BlockId, Body, InsertPoint, InstId, SourceLoc},
        instruction::{
            DebugVar, InstKind, LoadOwnership, Opcode, StoreOwnership,
        },
        module::ScopeId,
        types::{replacement_types, Conformance, SilType, Substitution, Type, TypeKind},
        value::{OwnershipKind, ValueId},
    },
};

pub struct Builder<'b> {
    pub body: &'b mut Body,
    point: InsertPoint,
    location: Option<SourceLoc>,
    scope: Option<ScopeId>,
}

/// Generates one `create_*` method per single-operand, no-result instruction
macro_rules! unary_builders {
    ($($name:ident => $kind:expr),* $(,)?) => {
        paste! {
            $(
                pub fn [<create_ $name>](&mut self, operand: ValueId) -> InstId {
                    self.create($kind, &[operand], Vec::new())
                }
            )*
        }
    };
}

impl<'b> Builder<'b> {
    pub fn new(body: &'b mut Body, point: InsertPoint) -> Self {
        Self {
            body,
            point,
            location: None,
            scope: None,
        }
    }

    pub fn at_end(body: &'b mut Body, block: BlockId) -> Self {
        Self::new(body, InsertPoint::End(block))
    }

    /// Inserts in front of `inst`, inheriting its debug location
    pub fn before(body: &'b mut Body, inst: InstId) -> Self {
        let location = body.inst(inst).location.clone();
        let scope = body.inst(inst).scope;

        Self {
            body,
            point: InsertPoint::Before(inst),
            location,
            scope,
        }
    }

    pub fn after(body: &'b mut Body, inst: InstId) -> Self {
        let location = body.inst(inst).location.clone();
        let scope = body.inst(inst).scope;

        Self {
            body,
            point: InsertPoint::After(inst),
            location,
            scope,
        }
    }

    pub fn set_insertion_point(&mut self, point: InsertPoint) {
        self.point = point;
    }

    pub fn insertion_point(&self) -> InsertPoint {
        self.point
    }

    pub fn set_debug_location(&mut self, location: Option<SourceLoc>, scope: Option<ScopeId>) {
        self.location = location;
        self.scope = scope;
    }

    pub fn insertion_block(&self) -> BlockId {
        match self.point {
            InsertPoint::End(block) => block,
            InsertPoint::Before(inst) | InsertPoint::After(inst) => self.body.inst(inst).block,
        }
    }

    /// Creates an instruction and links it at the insertion point. Later
    /// instructions go after it.
    pub fn create(
        &mut self,
        kind: InstKind,
        operands: &[ValueId],
        result_types: Vec<SilType>,
    ) -> InstId {
        let inst = self.body.insert(self.point, kind, operands, result_types);

        let data = self.body.inst_mut(inst);
        data.location = self.location.clone();
        data.scope = self.scope;

        if let InsertPoint::After(_) = self.point {
            self.point = InsertPoint::After(inst);
        }

        inst
    }

    /// Creates a single result instruction and returns its result
    pub fn create_value(&mut self, kind: InstKind, operands: &[ValueId], ty: SilType) -> ValueId {
        let inst = self.create(kind, operands, vec![ty]);
        self.body.results(inst)[0]
    }

    pub fn add_block_argument(&mut self, block: BlockId, ty: SilType) -> ValueId {
        self.body.add_block_argument(block, ty, OwnershipKind::Any)
    }

    pub fn value_type(&self, value: ValueId) -> SilType {
        self.body.value_type(value).clone()
    }

    /* Literals and references */

    pub fn create_integer_literal(&mut self, ty: SilType, value: i128) -> ValueId {
        self.create_value(InstKind::IntegerLiteral(value), &[], ty)
    }

    pub fn create_function_ref(&mut self, name: InternedSymbol, ty: SilType) -> ValueId {
        self.create_value(InstKind::FunctionRef(name), &[], ty)
    }

    /* Memory */

    pub fn create_alloc_stack(&mut self, ty: SilType, var: DebugVar) -> ValueId {
        self.create_value(InstKind::AllocStack(var), &[], ty.address_type())
    }

    pub fn create_load(&mut self, address: ValueId, ownership: LoadOwnership) -> ValueId {
        let ty = self.value_type(address).object_type();
        self.create_value(InstKind::Load(ownership), &[address], ty)
    }

    pub fn create_store(
        &mut self,
        value: ValueId,
        address: ValueId,
        ownership: StoreOwnership,
    ) -> InstId {
        self.create(InstKind::Store(ownership), &[value, address], Vec::new())
    }

    pub fn create_copy_addr(
        &mut self,
        source: ValueId,
        dest: ValueId,
        take: bool,
        initialization: bool,
    ) -> InstId {
        self.create(
            InstKind::CopyAddr {
                take,
                initialization,
            },
            &[source, dest],
            Vec::new(),
        )
    }

    unary_builders! {
        dealloc_stack => InstKind::Simple(Opcode::DeallocStack),
        destroy_addr => InstKind::Simple(Opcode::DestroyAddr),
        destroy_value => InstKind::Simple(Opcode::DestroyValue),
        cond_fail => InstKind::Simple(Opcode::CondFail),
        strong_retain => InstKind::RefCounting { opcode: Opcode::StrongRetain, atomic: true },
        strong_release => InstKind::RefCounting { opcode: Opcode::StrongRelease, atomic: true },
        unowned_retain => InstKind::RefCounting { opcode: Opcode::UnownedRetain, atomic: true },
        unowned_release => InstKind::RefCounting { opcode: Opcode::UnownedRelease, atomic: true },
        retain_value => InstKind::RefCounting { opcode: Opcode::RetainValue, atomic: true },
        release_value => InstKind::RefCounting { opcode: Opcode::ReleaseValue, atomic: true },
    }

    /* Conversions and casts */

    pub fn create_conversion(&mut self, opcode: Opcode, operand: ValueId, ty: SilType) -> ValueId {
        self.create_value(InstKind::Conversion(opcode), &[operand], ty)
    }

    pub fn create_upcast(&mut self, operand: ValueId, ty: SilType) -> ValueId {
        self.create_conversion(Opcode::Upcast, operand, ty)
    }

    pub fn create_unconditional_checked_cast(&mut self, operand: ValueId, ty: SilType) -> ValueId {
        self.create_conversion(Opcode::UnconditionalCheckedCast, operand, ty)
    }

    pub fn create_checked_cast_br(
        &mut self,
        operand: ValueId,
        target: SilType,
        success: BlockId,
        failure: BlockId,
    ) -> InstId {
        self.create(
            InstKind::CheckedCastBr {
                exact: false,
                target,
                success,
                failure,
            },
            &[operand],
            Vec::new(),
        )
    }

    pub fn create_metatype(&mut self, ty: SilType) -> ValueId {
        self.create_value(InstKind::Simple(Opcode::Metatype), &[], ty)
    }

    /* Aggregates and existentials */

    pub fn create_init_existential_ref(
        &mut self,
        operand: ValueId,
        concrete: Type,
        conformances: Vec<Conformance>,
        ty: SilType,
    ) -> ValueId {
        self.create_value(
            InstKind::InitExistential {
                opcode: Opcode::InitExistentialRef,
                concrete,
                conformances,
            },
            &[operand],
            ty,
        )
    }

    pub fn create_init_existential_addr(
        &mut self,
        existential: ValueId,
        concrete: Type,
        conformances: Vec<Conformance>,
    ) -> ValueId {
        let ty = SilType::address(concrete.clone());
        self.create_value(
            InstKind::InitExistential {
                opcode: Opcode::InitExistentialAddr,
                concrete,
                conformances,
            },
            &[existential],
            ty,
        )
    }

    pub fn create_alloc_existential_box(
        &mut self,
        existential: SilType,
        concrete: Type,
        conformances: Vec<Conformance>,
    ) -> ValueId {
        self.create_value(
            InstKind::InitExistential {
                opcode: Opcode::AllocExistentialBox,
                concrete,
                conformances,
            },
            &[],
            existential.object_type(),
        )
    }

    pub fn create_project_existential_box(
        &mut self,
        boxed: ValueId,
        concrete: Type,
    ) -> ValueId {
        self.create_value(
            InstKind::WithType {
                opcode: Opcode::ProjectExistentialBox,
                ty: SilType::object(concrete.clone()),
            },
            &[boxed],
            SilType::address(concrete),
        )
    }

    /* Applies */

    /// Calls `callee` and returns the direct result
    pub fn create_apply(
        &mut self,
        callee: ValueId,
        subs: Vec<Substitution>,
        args: &[ValueId],
        nothrow: bool,
    ) -> ValueId {
        let result = match self.value_type(callee).ty.kind() {
            TypeKind::Function(function) => {
                let replacements = replacement_types(&subs);
                function.substitute(&replacements).direct_result_type()
            }
            _ => Type::empty_tuple(),
        };

        let operands = std::iter::once(callee)
            .chain(args.iter().copied())
            .collect::<Vec<_>>();

        self.create_value(
            InstKind::Apply { nothrow, subs },
            &operands,
            SilType::object(result),
        )
    }

    /* Terminators */

    pub fn create_br(&mut self, dest: BlockId, args: &[ValueId]) -> InstId {
        self.create(InstKind::Br(dest), args, Vec::new())
    }

    pub fn create_return(&mut self, value: ValueId) -> InstId {
        self.create(InstKind::Simple(Opcode::Return), &[value], Vec::new())
    }

    pub fn create_unreachable(&mut self) -> InstId {
        self.create(InstKind::Simple(Opcode::Unreachable), &[], Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_after_advances() {
        let mut body = Body::default();
        let entry = body.new_block();

        let mut builder = Builder::at_end(&mut body, entry);
        let zero = builder.create_integer_literal(SilType::object(Type::int(1)), 0);
        let cond_fail = builder.create_cond_fail(zero);
        builder.create_unreachable();

        let mut builder = Builder::after(&mut body, cond_fail);
        let one = builder.create_integer_literal(SilType::object(Type::int(1)), 1);
        builder.create_cond_fail(one);

        let opcodes = body
            .insts_in(entry)
            .map(|inst| body.opcode(inst))
            .collect::<Vec<_>>();
        assert_eq!(
            opcodes,
            vec![
                Opcode::IntegerLiteral,
                Opcode::CondFail,
                Opcode::IntegerLiteral,
                Opcode::CondFail,
                Opcode::Unreachable
            ]
        );
    }

    #[test]
    fn before_inherits_location() {
        let mut body = Body::default();
        let entry = body.new_block();

        let unreachable = Builder::at_end(&mut body, entry).create_unreachable();
        body.inst_mut(unreachable).location = Some(SourceLoc {
            file: "a.swift".into(),
            line: 3,
            column: 7,
        });

        let mut builder = Builder::before(&mut body, unreachable);
        let literal = builder.create_integer_literal(SilType::object(Type::int(8)), 5);
        let inst = body.defining_inst(literal).unwrap();

        assert_eq!(body.inst(inst).location.as_ref().map(|l| l.line), Some(3));
    }
}
