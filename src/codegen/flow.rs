//! Declaraciones, sentencias y control de flujo.
//!
//! Las condiciones nunca producen un valor booleano: se traducen
//! directamente a saltos condicionales hacia una etiqueta, con
//! evaluación en cortocircuito de `&` y `|` entre comparaciones.

use log::debug;

use super::{
    call::passes_as,
    expr::{displacement, fits},
    symbols::{Prototype, Slot, Storage, Variable},
    term::{Place, Term},
    FunctionContext, GenError, Generation, Generator, Locate, RefKind, MAX_PARAMETERS,
};

use crate::{
    arch::{AluOp, Cond, Inst::*, Reg16::*, Reg8::*},
    ast::{
        Arena, BinOp, Element, FunctionDecl, Init, NodeId, NodeKind, Scalar, Shape, StructDecl,
        TypeDesc, VarDecl,
    },
    intern::NameId,
    sink::Sink,
    source::Location,
};

/// Primer parámetro respecto a `IX`: debajo quedan `IX` anterior y la
/// dirección de retorno.
const PARAMS_OFFSET: i16 = 4;

/// Resultado de una comparación.
enum Outcome {
    /// Ambos lados eran constantes.
    Constant(bool),

    /// La comparación se cumple si esta condición de banderas se cumple.
    Flag(Cond),
}

impl<S: Sink> Generator<S> {
    pub(super) fn global(&mut self, arena: &Arena, var: VarDecl, location: &Location) -> Generation<()> {
        self.symbols.check_type(&var.ty, &self.names).at(location)?;
        let size = self.symbols.size_of(&var.ty, &self.names).at(location)?;
        let bytes = initial_bytes(arena, &var, size, location)?;

        let offset = self.cursor;
        let address = self.here();

        let slot = Slot::Global(address);
        let storage = match var.ty.shape {
            Shape::Array(None) => Storage::Reference(slot),
            _ => Storage::Direct(slot),
        };

        let variable = Variable {
            name: var.name,
            ty: var.ty,
            storage,
        };

        self.symbols
            .declare_global(variable, &self.names)
            .at(location)?;

        self.relocs
            .record_known(var.name, offset, &self.names)
            .at(location)?;

        self.mark_line(location);
        self.write_bytes(&bytes)?;

        debug!(
            "var `{}`: {} byte(s) at {:#06x}",
            self.names.text(var.name),
            size,
            address
        );

        Ok(())
    }

    pub(super) fn structure(&mut self, decl: &StructDecl, location: &Location) -> Generation<()> {
        let size = self.symbols.declare_struct(decl, &self.names).at(location)?;
        debug!("struct `{}`: {} byte(s)", self.names.text(decl.name), size);

        Ok(())
    }

    pub(super) fn function(
        &mut self,
        arena: &Arena,
        decl: FunctionDecl,
        location: &Location,
    ) -> Generation<()> {
        let count = decl.params.len();
        if count > MAX_PARAMETERS {
            let name = self.names.text(decl.name).to_owned();
            let limit = MAX_PARAMETERS;
            return Err(GenError::TooManyParameters { name, limit }).at(location);
        }

        for param in &decl.params {
            self.symbols.check_type(&param.ty, &self.names).at(location)?;
        }

        let prototype = Prototype {
            params: decl.params.iter().map(|param| param.ty).collect(),
            returns: decl.returns,
            defined: decl.body.is_some(),
        };

        self.symbols
            .declare_prototype(decl.name, prototype, &self.names)
            .at(location)?;

        self.check_forward_calls(decl.name)?;

        let body = match decl.body {
            Some(body) => body,
            None => return Ok(()),
        };

        self.ensure_runtime()?;

        let entry = self.cursor;
        self.relocs
            .record_known(decl.name, entry, &self.names)
            .at(location)?;

        let mark = self.symbols.locals_mark();
        for (i, param) in decl.params.iter().enumerate() {
            let slot = Slot::Frame(PARAMS_OFFSET + 2 * (count - 1 - i) as i16);
            let storage = if param.ty.is_aggregate() {
                Storage::Reference(slot)
            } else {
                Storage::Direct(slot)
            };

            let variable = Variable {
                name: param.name,
                ty: param.ty,
                storage,
            };

            self.symbols.push_local(variable, &self.names).at(location)?;
        }

        let frame = self.symbols.allocate_locals(arena, body, &self.names)?;

        debug!(
            "fun `{}`: {} parameter(s), {} byte(s) of locals, entry at {:#06x}",
            self.names.text(decl.name),
            count,
            frame,
            self.here()
        );

        self.mark_line(location);
        emit!(self, PushIx, LdIxImm(0), AddIxSp);
        if frame > 0 {
            emit!(self, LdImm16(HL, 0u16.wrapping_sub(frame)), AddHlSp, LdSpHl);
        }

        let epilogue = self.names.fresh();
        self.function = Some(FunctionContext {
            returns: decl.returns,
            epilogue,
        });

        let result = self.statement(arena, body);
        self.function = None;
        self.symbols.truncate_locals(mark);
        result?;

        self.label(epilogue)?;
        emit!(self, LdSpIx, PopIx, Ret);

        Ok(())
    }

    pub(super) fn statement(&mut self, arena: &Arena, node: NodeId) -> Generation<()> {
        let location = &arena[node].location;
        if !matches!(arena[node].kind, NodeKind::Block(_)) {
            self.location = location.clone();
            self.mark_line(location);
        }

        match &arena[node].kind {
            NodeKind::Block(statements) => {
                for &statement in statements {
                    self.statement(arena, statement)?;
                }

                Ok(())
            }

            NodeKind::Var(decl) => match &decl.init {
                None => Ok(()),
                Some(Init::Expr(value)) => {
                    let variable = self.variable(decl.name, location)?;
                    self.assign_variable(arena, &variable, *value, location)
                }

                Some(Init::List(_)) => {
                    Err(GenError::Unsupported("list initializer on a local variable")).at(location)
                }
            },

            NodeKind::Assign { target, value } => self.assign(arena, *target, *value, location),

            NodeKind::Call { callee, args } => {
                self.call(arena, *callee, args, location)?;
                Ok(())
            }

            NodeKind::If { cond, body } => {
                let end = self.names.fresh();
                self.condition(arena, *cond, end, false)?;
                self.statement(arena, *body)?;
                self.label(end)
            }

            NodeKind::IfElse {
                cond,
                then,
                otherwise,
            } => {
                let other = self.names.fresh();
                let end = self.names.fresh();

                self.condition(arena, *cond, other, false)?;
                self.statement(arena, *then)?;
                self.jump_to(end)?;

                self.label(other)?;
                self.statement(arena, *otherwise)?;
                self.label(end)
            }

            NodeKind::While { cond, body } => {
                let top = self.here();
                let end = self.names.fresh();

                self.condition(arena, *cond, end, false)?;
                self.statement(arena, *body)?;
                emit!(self, Jp(top));

                self.label(end)
            }

            NodeKind::Return(value) => self.return_statement(arena, *value, location),

            _ => Err(GenError::Unsupported("expression used as a statement")).at(location),
        }
    }

    fn return_statement(
        &mut self,
        arena: &Arena,
        value: Option<NodeId>,
        location: &Location,
    ) -> Generation<()> {
        let (returns, epilogue) = match &self.function {
            Some(context) => (context.returns, context.epilogue),
            None => return Err(GenError::Unsupported("return outside of a function")).at(location),
        };

        if let Some(value) = value {
            let term = self.evaluate(arena, value)?;
            self.check_store(&term, returns.size(), location)?;

            // Un resultado de un byte queda también extendido en HL
            match returns.size() {
                1 => {
                    self.to_accumulator(term, location)?;
                    emit!(self, LdReg(L, A), LdImm8(H, 0));
                }

                _ => self.to_pair(term, location)?,
            }
        }

        self.jump_to(epilogue)
    }

    fn assign(&mut self, arena: &Arena, target: NodeId, value: NodeId, location: &Location) -> Generation<()> {
        if let NodeKind::Ident(name) = arena[target].kind {
            let variable = self.variable(name, &arena[target].location)?;
            return self.assign_variable(arena, &variable, value, location);
        }

        let (term, _) = self.address(arena, target)?;
        let width = term.width().at(&arena[target].location)?;

        let value = self.evaluate(arena, value)?;
        self.store(term, value, width, location)
    }

    fn assign_variable(
        &mut self,
        arena: &Arena,
        variable: &Variable,
        value: NodeId,
        location: &Location,
    ) -> Generation<()> {
        let (slot, width, value) = match variable.storage {
            Storage::Direct(slot) => {
                let width = Term::new(Place::Stack, variable.ty).width().at(location)?;
                (slot, width, self.evaluate(arena, value)?)
            }

            // Solo los punteros a arreglo se reasignan
            Storage::Reference(slot) if variable.ty.shape == Shape::Array(None) => {
                (slot, 2, self.array_pointer(arena, variable, value)?)
            }

            Storage::Reference(_) => return Err(GenError::InvalidLocation).at(location),
        };

        match slot {
            Slot::Global(address) => {
                let target = Term::new(Place::GlobalIndirect(address), variable.ty);
                self.store(target, value, width, location)
            }

            Slot::Frame(offset) => {
                self.check_store(&value, width, location)?;

                match displacement(offset, width) {
                    Some(low) if width == 1 => {
                        self.to_accumulator(value, location)?;
                        emit!(self, LdToIx(A, low));
                    }

                    Some(low) => {
                        self.to_pair(value, location)?;
                        emit!(self, LdToIx(L, low), LdToIx(H, low + 1));
                    }

                    None => {
                        self.to_pair(value, location)?;
                        emit!(self, Push(HL));
                        self.frame_address(offset)?;
                        emit!(self, Pop(DE), LdToHl(E));

                        if width == 2 {
                            emit!(self, IncHl, LdToHl(D));
                        }
                    }
                }

                Ok(())
            }
        }
    }

    /// Deja en `HL` la dirección de un arreglo que `variable` puede
    /// apuntar.
    fn array_pointer(&mut self, arena: &Arena, variable: &Variable, value: NodeId) -> Generation<Term> {
        let location = &arena[value].location;
        let (array, _) = self.address(arena, value)?;

        if !passes_as(&array.ty, &variable.ty) {
            return Err(self.mismatch(&variable.ty, &array.ty)).at(location);
        }

        match array.place {
            Place::GlobalIndirect(address) => emit!(self, LdImm16(HL, address)),
            Place::Stack => emit!(self, Pop(HL)),
            _ => return Err(GenError::InvalidLocation).at(location),
        }

        Ok(Term::new(Place::RegisterPair, TypeDesc::scalar(Scalar::Word)))
    }

    /// Almacena `value` en la dirección descrita por `target`.
    fn store(&mut self, target: Term, value: Term, width: u16, location: &Location) -> Generation<()> {
        self.check_store(&value, width, location)?;

        match (target.place, width) {
            (Place::GlobalIndirect(address), 1) => {
                self.to_accumulator(value, location)?;
                emit!(self, LdAddrFromA(address));
            }

            (Place::GlobalIndirect(address), _) => {
                self.to_pair(value, location)?;
                emit!(self, LdAddrFromHl(address));
            }

            (Place::Stack, 1) => {
                self.to_accumulator(value, location)?;
                emit!(self, Pop(HL), LdToHl(A));
            }

            (Place::Stack, _) => {
                self.to_pair(value, location)?;
                emit!(self, ExDeHl, Pop(HL), LdToHl(E), IncHl, LdToHl(D));
            }

            _ => return Err(GenError::InvalidLocation).at(location),
        }

        Ok(())
    }

    /// Un valor cabe en un destino de `width` bytes.
    fn check_store(&self, value: &Term, width: u16, location: &Location) -> Generation<()> {
        if let Some(immediate) = value.as_immediate() {
            return fits(immediate, width).at(location);
        }

        let found = value.width().at(location)?;
        if found > width {
            let message = format!("cannot store a {}-byte value in {} byte(s)", found, width);
            return Err(GenError::InvalidSize(message)).at(location);
        }

        Ok(())
    }

    /// Salta a `target` si la condición evalúa a `jump_if`; de lo
    /// contrario continúa en la siguiente instrucción.
    pub(super) fn condition(
        &mut self,
        arena: &Arena,
        node: NodeId,
        target: NameId,
        jump_if: bool,
    ) -> Generation<()> {
        let location = &arena[node].location;

        match &arena[node].kind {
            NodeKind::Paren(inner) if is_condition(arena, *inner) => {
                self.condition(arena, *inner, target, jump_if)
            }

            NodeKind::Binary {
                op: op @ (BinOp::And | BinOp::Or),
                left,
                right,
            } if is_condition(arena, *left) && is_condition(arena, *right) => {
                if (*op == BinOp::And) != jump_if {
                    // Cualquiera de los dos lados decide el salto
                    self.condition(arena, *left, target, jump_if)?;
                    self.condition(arena, *right, target, jump_if)
                } else {
                    let skip = self.names.fresh();
                    self.condition(arena, *left, skip, !jump_if)?;
                    self.condition(arena, *right, target, jump_if)?;
                    self.label(skip)
                }
            }

            NodeKind::Binary { op, left, right } if op.is_comparison() => {
                match self.compare(arena, *op, *left, *right, location)? {
                    Outcome::Constant(outcome) if outcome == jump_if => self.jump_to(target),
                    Outcome::Constant(_) => Ok(()),
                    Outcome::Flag(cond) => {
                        let cond = if jump_if { cond } else { cond.negate() };
                        self.emit_reference(JpCond(cond, 0), target, RefKind::Jump)
                    }
                }
            }

            _ => {
                let term = self.evaluate(arena, node)?;
                if let Some(value) = term.as_immediate() {
                    if (value != 0) == jump_if {
                        self.jump_to(target)?;
                    }

                    return Ok(());
                }

                if term.width().at(location)? == 1 {
                    self.to_accumulator(term, location)?;
                    emit!(self, Alu(AluOp::Or, A));
                } else {
                    self.to_pair(term, location)?;
                    emit!(self, LdReg(A, H), Alu(AluOp::Or, L));
                }

                let cond = if jump_if { Cond::NZ } else { Cond::Z };
                self.emit_reference(JpCond(cond, 0), target, RefKind::Jump)
            }
        }
    }

    fn compare(
        &mut self,
        arena: &Arena,
        op: BinOp,
        left: NodeId,
        right: NodeId,
        location: &Location,
    ) -> Generation<Outcome> {
        let lhs = self.evaluate(arena, left)?;
        let lhs_width = lhs.width().at(&arena[left].location)?;
        let stacked = self.stack_left(lhs, location)?;

        let rhs = self.evaluate(arena, right)?;
        let rhs_width = rhs.width().at(&arena[right].location)?;

        if let (Some(a), Some(b)) = (lhs.as_immediate(), rhs.as_immediate()) {
            let outcome = match op {
                BinOp::Eq => a == b,
                BinOp::Ne => a != b,
                BinOp::Lt => a < b,
                BinOp::Gt => a > b,
                BinOp::Le => a <= b,
                BinOp::Ge => a >= b,
                _ => return Err(GenError::InvalidOpcode(op)).at(location),
            };

            return Ok(Outcome::Constant(outcome));
        }

        self.load_operands(lhs, stacked, rhs, location)?;
        if matches!(op, BinOp::Gt | BinOp::Le) {
            emit!(self, ExDeHl);
        }

        if lhs_width.max(rhs_width) == 1 {
            emit!(self, LdReg(A, L), Alu(AluOp::Cp, E));
        } else {
            emit!(self, Alu(AluOp::Or, A), SbcHlDe);
        }

        let cond = match op {
            BinOp::Eq => Cond::Z,
            BinOp::Ne => Cond::NZ,
            BinOp::Lt | BinOp::Gt => Cond::C,
            BinOp::Ge | BinOp::Le => Cond::NC,
            _ => return Err(GenError::InvalidOpcode(op)).at(location),
        };

        Ok(Outcome::Flag(cond))
    }
}

/// Una comparación, o una combinación con `&` y `|` de comparaciones.
fn is_condition(arena: &Arena, node: NodeId) -> bool {
    match &arena[node].kind {
        NodeKind::Binary { op, .. } if op.is_comparison() => true,
        NodeKind::Binary {
            op: BinOp::And | BinOp::Or,
            left,
            right,
        } => is_condition(arena, *left) && is_condition(arena, *right),

        NodeKind::Paren(inner) => is_condition(arena, *inner),
        _ => false,
    }
}

/// Valor de un inicializador de variable global.
fn constant(arena: &Arena, node: NodeId) -> Generation<u16> {
    match &arena[node].kind {
        NodeKind::Number(value) => Ok(*value),
        NodeKind::Paren(inner) => constant(arena, *inner),
        _ => Err(GenError::ExpectingImmediate).at(&arena[node].location),
    }
}

/// Contenido inicial de una variable global.
fn initial_bytes(arena: &Arena, var: &VarDecl, size: u16, location: &Location) -> Generation<Vec<u8>> {
    let mut bytes = vec![0; size as usize];

    match &var.init {
        None => (),

        Some(Init::Expr(node)) => {
            let scalar = var.ty.as_scalar().ok_or_else(|| {
                GenError::InvalidType(String::from("only scalars take a single initial value"))
            });

            let width = scalar.at(location)?.size();
            let value = constant(arena, *node)?;

            fits(value, width).at(&arena[*node].location)?;
            bytes.copy_from_slice(&value.to_le_bytes()[..width as usize]);
        }

        Some(Init::List(items)) => {
            let (length, scalar) = match (var.ty.shape, var.ty.element) {
                (Shape::Array(Some(length)), Element::Scalar(scalar)) => (length, scalar),
                _ => {
                    let message = String::from("only sized arrays of scalars take an initializer list");
                    return Err(GenError::InvalidType(message)).at(location);
                }
            };

            if items.len() > length as usize {
                let error = GenError::OutOfBounds { index: length, length };
                return Err(error).at(&arena[items[length as usize]].location);
            }

            let width = scalar.size() as usize;
            for (chunk, &item) in bytes.chunks_exact_mut(width).zip(items) {
                let value = constant(arena, item)?;
                fits(value, width as u16).at(&arena[item].location)?;
                chunk.copy_from_slice(&value.to_le_bytes()[..width]);
            }
        }
    }

    Ok(bytes)
}
