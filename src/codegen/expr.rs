//! Evaluación de expresiones.
//!
//! Un operando izquierdo que no es constante se materializa en `HL` y
//! se empuja a la pila antes de evaluar el derecho. El operador aplica
//! sus reglas sobre `HL` (izquierdo) y `DE` (derecho), y el resultado
//! queda en `A` si es de un byte o en `HL` si es de dos.

use super::{
    runtime::MULTIPLY,
    symbols::{Slot, Storage, Variable},
    term::{Place, Term},
    GenError, Generation, Generator, Locate,
};

use crate::{
    arch::{
        AluOp, Cond,
        Inst::{self, *},
        Reg16::*,
        Reg8::*,
    },
    ast::{Arena, BinOp, NodeId, NodeKind, Scalar, TypeDesc},
    sink::Sink,
    source::Location,
};

impl<S: Sink> Generator<S> {
    pub(super) fn evaluate(&mut self, arena: &Arena, node: NodeId) -> Generation<Term> {
        let location = &arena[node].location;

        match &arena[node].kind {
            NodeKind::Number(value) => Ok(Term::immediate(*value)),

            NodeKind::Ident(name) => {
                let variable = self.variable(*name, location)?;
                self.load_variable(&variable, location)
            }

            NodeKind::Index { .. } | NodeKind::Field { .. } => {
                let (term, _) = self.address(arena, node)?;
                self.load_from(term, location)
            }

            NodeKind::Paren(inner) => self.evaluate(arena, *inner),

            NodeKind::Binary { op, .. } if op.is_comparison() => {
                Err(GenError::InvalidOpcode(*op)).at(location)
            }

            NodeKind::Binary { op, left, right } => {
                self.binary(arena, *op, *left, *right, location)
            }

            NodeKind::Call { callee, args } => self.call(arena, *callee, args, location),

            _ => Err(GenError::Unsupported("statement used as a value")).at(location),
        }
    }

    /// Lleva un valor escalar a `A`.
    pub(super) fn to_accumulator(&mut self, term: Term, location: &Location) -> Generation<()> {
        match term.place {
            Place::Immediate(value) => emit!(self, LdImm8(A, value as u8)),
            Place::Accumulator => (),
            Place::RegisterPair => emit!(self, LdReg(A, L)),
            Place::Stack => emit!(self, Pop(HL), LdReg(A, L)),
            Place::GlobalIndirect(address) => {
                term.width().at(location)?;
                emit!(self, LdAFromAddr(address));
            }
        }

        Ok(())
    }

    /// Lleva un valor escalar o una dirección a `HL`, extendiendo con
    /// ceros los valores de un byte.
    pub(super) fn to_pair(&mut self, term: Term, location: &Location) -> Generation<()> {
        match term.place {
            Place::Immediate(value) => emit!(self, LdImm16(HL, value)),
            Place::Accumulator => emit!(self, LdReg(L, A), LdImm8(H, 0)),
            Place::RegisterPair => (),
            Place::Stack => emit!(self, Pop(HL)),
            Place::GlobalIndirect(address) => match term.width().at(location)? {
                1 => emit!(self, LdAFromAddr(address), LdReg(L, A), LdImm8(H, 0)),
                _ => emit!(self, LdHlFromAddr(address)),
            },
        }

        Ok(())
    }

    /// Lee un escalar de la dirección en `HL`.
    pub(super) fn load_indirect(&mut self, width: u16) -> Generation<Place> {
        if width == 1 {
            emit!(self, LdFromHl(A));
            Ok(Place::Accumulator)
        } else {
            emit!(self, LdFromHl(E), IncHl, LdFromHl(D), ExDeHl);
            Ok(Place::RegisterPair)
        }
    }

    /// Deja en `HL` la dirección `IX + offset`.
    pub(super) fn frame_address(&mut self, offset: i16) -> Generation<()> {
        emit!(self, PushIx, Pop(HL));
        if offset != 0 {
            emit!(self, LdImm16(DE, offset as u16), AddHl(DE));
        }

        Ok(())
    }

    fn load_variable(&mut self, variable: &Variable, location: &Location) -> Generation<Term> {
        let width = variable.ty.as_scalar().map(Scalar::size).ok_or_else(|| {
            let name = self.names.text(variable.name).to_owned();
            GenError::InvalidSize(format!("`{}` is an aggregate and cannot be used as a value", name))
        });

        let width = width.at(location)?;
        let place = match variable.storage {
            Storage::Direct(Slot::Global(address)) => Place::GlobalIndirect(address),

            Storage::Direct(Slot::Frame(offset)) => match displacement(offset, width) {
                Some(low) if width == 1 => {
                    emit!(self, LdFromIx(A, low));
                    Place::Accumulator
                }

                Some(low) => {
                    emit!(self, LdFromIx(L, low), LdFromIx(H, low + 1));
                    Place::RegisterPair
                }

                None => {
                    self.frame_address(offset)?;
                    self.load_indirect(width)?
                }
            },

            Storage::Reference(_) => return Err(GenError::InvalidLocation).at(location),
        };

        Ok(Term::new(place, variable.ty))
    }

    /// Lee el escalar cuya dirección describe `term`.
    pub(super) fn load_from(&mut self, term: Term, location: &Location) -> Generation<Term> {
        let width = term.width().at(location)?;

        match term.place {
            Place::GlobalIndirect(_) => Ok(term),
            Place::Stack => {
                emit!(self, Pop(HL));
                let place = self.load_indirect(width)?;
                Ok(Term::new(place, term.ty))
            }

            _ => Err(GenError::InvalidLocation).at(location),
        }
    }

    /// Guarda el operando izquierdo en la pila, salvo que sea constante.
    pub(super) fn stack_left(&mut self, lhs: Term, location: &Location) -> Generation<bool> {
        match lhs.place {
            Place::Immediate(_) => Ok(false),
            _ => {
                self.to_pair(lhs, location)?;
                emit!(self, Push(HL));
                Ok(true)
            }
        }
    }

    /// Deja el operando izquierdo en `HL`.
    fn pop_left(&mut self, lhs: Term, stacked: bool) -> Generation<()> {
        match (stacked, lhs.place) {
            (true, _) => emit!(self, Pop(HL)),
            (false, Place::Immediate(value)) => emit!(self, LdImm16(HL, value)),
            (false, _) => return Err(GenError::InvalidLocation).at(&self.location),
        }

        Ok(())
    }

    /// Deja el operando derecho en `DE` y el izquierdo en `HL`.
    pub(super) fn load_operands(
        &mut self,
        lhs: Term,
        stacked: bool,
        rhs: Term,
        location: &Location,
    ) -> Generation<()> {
        match rhs.place {
            Place::Immediate(value) => emit!(self, LdImm16(DE, value)),
            _ => {
                self.to_pair(rhs, location)?;
                emit!(self, ExDeHl);
            }
        }

        self.pop_left(lhs, stacked)
    }

    fn binary(
        &mut self,
        arena: &Arena,
        op: BinOp,
        left: NodeId,
        right: NodeId,
        location: &Location,
    ) -> Generation<Term> {
        let lhs = self.evaluate(arena, left)?;
        let lhs_width = lhs.width().at(&arena[left].location)?;
        let stacked = self.stack_left(lhs, location)?;

        let rhs = self.evaluate(arena, right)?;
        let rhs_width = rhs.width().at(&arena[right].location)?;

        if let (Some(a), Some(b)) = (lhs.as_immediate(), rhs.as_immediate()) {
            return fold(op, a, b).map(Term::immediate).at(location);
        }

        let width = lhs_width.max(rhs_width);
        let ty = result_type(&lhs, &rhs, width);

        match op {
            BinOp::Shl | BinOp::Shr => self.shift(op, lhs, stacked, rhs, width, ty, location),
            BinOp::Mul => self.multiply(lhs, stacked, rhs, width, ty, location),
            _ => self.arithmetic(op, lhs, stacked, rhs, width, ty, location),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn arithmetic(
        &mut self,
        op: BinOp,
        lhs: Term,
        stacked: bool,
        rhs: Term,
        width: u16,
        ty: TypeDesc,
        location: &Location,
    ) -> Generation<Term> {
        let alu = match op {
            BinOp::Add => AluOp::Add,
            BinOp::Sub => AluOp::Sub,
            BinOp::And => AluOp::And,
            BinOp::Or => AluOp::Or,
            BinOp::Xor => AluOp::Xor,
            _ => return Err(GenError::InvalidOpcode(op)).at(location),
        };

        self.load_operands(lhs, stacked, rhs, location)?;

        if width == 1 {
            emit!(self, LdReg(A, L), Alu(alu, E));
            return Ok(Term::new(Place::Accumulator, ty));
        }

        match alu {
            AluOp::Add => emit!(self, AddHl(DE)),
            AluOp::Sub => emit!(self, Alu(AluOp::Or, A), SbcHlDe),
            _ => emit!(
                self,
                LdReg(A, L),
                Alu(alu, E),
                LdReg(L, A),
                LdReg(A, H),
                Alu(alu, D),
                LdReg(H, A),
            ),
        }

        Ok(Term::new(Place::RegisterPair, ty))
    }

    #[allow(clippy::too_many_arguments)]
    fn shift(
        &mut self,
        op: BinOp,
        lhs: Term,
        stacked: bool,
        rhs: Term,
        width: u16,
        ty: TypeDesc,
        location: &Location,
    ) -> Generation<Term> {
        let step = match op {
            BinOp::Shl => vec![AddHl(HL)],
            _ => vec![Srl(H), Rr(L)],
        };

        match rhs.place {
            Place::Immediate(count) => {
                self.pop_left(lhs, stacked)?;
                for _ in 0..count.min(width * 8) {
                    for &inst in &step {
                        self.emit(inst)?;
                    }
                }
            }

            _ => {
                self.to_pair(rhs, location)?;
                emit!(self, ExDeHl);
                self.pop_left(lhs, stacked)?;

                // Una cuenta de 256 o más vacía el operando igual que 255
                let saturate = LdImm8(E, 0xFF);
                emit!(
                    self,
                    LdReg(A, D),
                    Alu(AluOp::Or, A),
                    JrCond(Cond::Z, saturate.size() as i8),
                    saturate,
                );

                // E cuenta los pasos pendientes; el ciclo termina en cero
                let body: u16 = step.iter().map(Inst::size).sum::<u16>() + DecReg(E).size();
                emit!(self, IncReg(E), DecReg(E), JrCond(Cond::Z, (body + 2) as i8));

                for &inst in &step {
                    self.emit(inst)?;
                }

                emit!(self, DecReg(E), Jr(-((body + 6) as i16) as i8));
            }
        }

        self.word_result(width, ty)
    }

    fn multiply(
        &mut self,
        lhs: Term,
        stacked: bool,
        rhs: Term,
        width: u16,
        ty: TypeDesc,
        location: &Location,
    ) -> Generation<Term> {
        if let Some(power) = power_of_two(&rhs) {
            self.pop_left(lhs, stacked)?;
            self.double(power)?;
        } else if let Some(power) = power_of_two(&lhs) {
            self.to_pair(rhs, location)?;
            self.double(power)?;
        } else {
            self.load_operands(lhs, stacked, rhs, location)?;
            self.call_runtime(MULTIPLY)?;
        }

        self.word_result(width, ty)
    }

    /// Multiplica `HL` por `2^power`.
    pub(super) fn double(&mut self, power: u32) -> Generation<()> {
        for _ in 0..power {
            emit!(self, AddHl(HL));
        }

        Ok(())
    }

    /// Entrega el resultado en `HL`, o en `A` si es de un byte.
    fn word_result(&mut self, width: u16, ty: TypeDesc) -> Generation<Term> {
        if width == 1 {
            emit!(self, LdReg(A, L));
            Ok(Term::new(Place::Accumulator, ty))
        } else {
            Ok(Term::new(Place::RegisterPair, ty))
        }
    }
}

/// Desplazamiento `IX+d` si todo el valor queda a su alcance.
pub(super) fn displacement(offset: i16, width: u16) -> Option<i8> {
    let last = offset.checked_add(width as i16 - 1)?;
    i8::try_from(last).ok()?;
    i8::try_from(offset).ok()
}

/// Verifica que una constante quepa en `width` bytes.
pub(super) fn fits(value: u16, width: u16) -> Result<(), GenError> {
    if width == 1 && value > 0xFF {
        Err(GenError::InvalidSize(format!("{} does not fit in a byte", value)))
    } else {
        Ok(())
    }
}

fn fold(op: BinOp, a: u16, b: u16) -> Result<u16, GenError> {
    let value = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Shl => a.checked_shl(b.into()).unwrap_or(0),
        BinOp::Shr => a.checked_shr(b.into()).unwrap_or(0),
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        _ => return Err(GenError::InvalidOpcode(op)),
    };

    Ok(value)
}

fn power_of_two(term: &Term) -> Option<u32> {
    term.as_immediate()
        .filter(|value| value.is_power_of_two())
        .map(u16::trailing_zeros)
}

/// El tipo del resultado es el del primer operando no constante, ampliado
/// si la operación se hizo a dos bytes.
fn result_type(lhs: &Term, rhs: &Term, width: u16) -> TypeDesc {
    let scalar = [lhs, rhs]
        .into_iter()
        .filter(|term| term.as_immediate().is_none())
        .find_map(|term| term.ty.as_scalar())
        .map(|scalar| match (scalar, width) {
            (Scalar::Byte, 2) => Scalar::Word,
            (Scalar::SByte, 2) => Scalar::SWord,
            (scalar, _) => scalar,
        });

    let scalar = scalar.unwrap_or(if width == 1 { Scalar::Byte } else { Scalar::Word });
    TypeDesc::scalar(scalar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_folding() {
        assert_eq!(fold(BinOp::Add, 0xFFFF, 2).unwrap(), 1);
        assert_eq!(fold(BinOp::Sub, 1, 2).unwrap(), 0xFFFF);
        assert_eq!(fold(BinOp::Mul, 300, 300).unwrap(), 300u16.wrapping_mul(300));
        assert_eq!(fold(BinOp::Shl, 1, 15).unwrap(), 0x8000);
        assert_eq!(fold(BinOp::Shl, 1, 16).unwrap(), 0);
        assert_eq!(fold(BinOp::Shr, 0x8000, 40).unwrap(), 0);
        assert_eq!(fold(BinOp::Xor, 0xF0F0, 0xFF00).unwrap(), 0x0FF0);
        assert!(matches!(fold(BinOp::Lt, 1, 2), Err(GenError::InvalidOpcode(BinOp::Lt))));
    }

    #[test]
    fn ix_displacement_range() {
        assert_eq!(displacement(4, 2), Some(4));
        assert_eq!(displacement(-128, 2), Some(-128));
        assert_eq!(displacement(127, 1), Some(127));
        assert_eq!(displacement(127, 2), None);
        assert_eq!(displacement(-129, 1), None);
    }

    #[test]
    fn result_type_widens() {
        let byte = Term::new(Place::Accumulator, TypeDesc::scalar(Scalar::SByte));
        let word = Term::immediate(0x1234);

        assert_eq!(result_type(&byte, &word, 2), TypeDesc::scalar(Scalar::SWord));
        assert_eq!(result_type(&word, &byte, 1), TypeDesc::scalar(Scalar::SByte));
        assert_eq!(result_type(&word, &word, 2), TypeDesc::scalar(Scalar::Word));
    }
}
