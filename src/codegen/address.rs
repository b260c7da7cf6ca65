//! Evaluación de direcciones.
//!
//! Una expresión que designa memoria (`x`, `v[i]`, `p.campo`) se evalúa
//! a la dirección de su primer byte. Si la dirección es constante queda
//! como [`Place::GlobalIndirect`] y los desplazamientos constantes se
//! pliegan en ella; de lo contrario se calcula en tiempo de ejecución y
//! queda en la pila.

use super::{
    expr::displacement,
    runtime::{BOUNDS, MULTIPLY},
    symbols::{Slot, Storage, Variable},
    term::{Place, Term},
    GenError, Generation, Generator, Locate,
};

use crate::{
    arch::{Inst::*, Reg16::*, Reg8::*},
    ast::{Arena, Element, NodeId, NodeKind, Shape, TypeDesc},
    intern::NameId,
    sink::Sink,
    source::Location,
};

impl<S: Sink> Generator<S> {
    /// Dirección de `node` junto con su longitud si es un arreglo de
    /// longitud conocida.
    pub(super) fn address(&mut self, arena: &Arena, node: NodeId) -> Generation<(Term, Option<u16>)> {
        let location = &arena[node].location;

        match &arena[node].kind {
            NodeKind::Ident(name) => {
                let variable = self.variable(*name, location)?;
                let term = self.variable_address(&variable)?;

                Ok((term, array_length(&variable.ty)))
            }

            NodeKind::Paren(inner) => self.address(arena, *inner),
            NodeKind::Index { base, index } => self.index(arena, *base, *index, location),
            NodeKind::Field { base, field } => self.field(arena, *base, *field, location),

            _ => Err(GenError::InvalidLocation).at(location),
        }
    }

    fn variable_address(&mut self, variable: &Variable) -> Generation<Term> {
        let place = match variable.storage {
            Storage::Direct(Slot::Global(address)) => Place::GlobalIndirect(address),

            Storage::Direct(Slot::Frame(offset)) => {
                self.frame_address(offset)?;
                emit!(self, Push(HL));
                Place::Stack
            }

            Storage::Reference(Slot::Global(address)) => {
                emit!(self, LdHlFromAddr(address), Push(HL));
                Place::Stack
            }

            Storage::Reference(Slot::Frame(offset)) => {
                match displacement(offset, 2) {
                    Some(low) => emit!(self, LdFromIx(L, low), LdFromIx(H, low + 1)),
                    None => {
                        self.frame_address(offset)?;
                        self.load_indirect(2)?;
                    }
                }

                emit!(self, Push(HL));
                Place::Stack
            }
        };

        Ok(Term::new(place, variable.ty))
    }

    fn index(
        &mut self,
        arena: &Arena,
        base: NodeId,
        index: NodeId,
        location: &Location,
    ) -> Generation<(Term, Option<u16>)> {
        let (array, length) = self.address(arena, base)?;
        if !matches!(array.ty.shape, Shape::Array(_)) {
            let found = self.symbols.describe(&array.ty, &self.names);
            return Err(GenError::InvalidType(format!("`{}` cannot be indexed", found))).at(location);
        }

        let element = array.ty.element_type();
        let size = self
            .symbols
            .element_size(element.element, &self.names)
            .at(location)?;

        let index_location = &arena[index].location;
        let subscript = self.evaluate(arena, index)?;

        if let Some(value) = subscript.as_immediate() {
            if let Some(length) = length.filter(|&length| value >= length) {
                let error = GenError::OutOfBounds { index: value, length };
                return Err(error).at(index_location);
            }

            let term = self.offset_address(array, value.wrapping_mul(size), element)?;
            return Ok((term, None));
        }

        subscript.width().at(index_location)?;
        self.to_pair(subscript, index_location)?;

        if let Some(length) = length {
            emit!(self, LdImm16(DE, length));
            self.call_runtime(BOUNDS)?;
        }

        self.scale(size)?;

        match array.place {
            Place::GlobalIndirect(address) => emit!(self, LdImm16(DE, address), AddHl(DE)),
            Place::Stack => emit!(self, Pop(DE), AddHl(DE)),
            _ => return Err(GenError::InvalidLocation).at(location),
        }

        emit!(self, Push(HL));
        Ok((Term::new(Place::Stack, element), None))
    }

    fn field(
        &mut self,
        arena: &Arena,
        base: NodeId,
        field: NameId,
        location: &Location,
    ) -> Generation<(Term, Option<u16>)> {
        let (record, _) = self.address(arena, base)?;

        let name = match (record.ty.shape, record.ty.element) {
            (Shape::Single, Element::Struct(name)) => name,
            _ => {
                let found = self.symbols.describe(&record.ty, &self.names);
                let message = format!("`{}` has no fields", found);
                return Err(GenError::InvalidType(message)).at(location);
            }
        };

        let def = self
            .symbols
            .struct_def(name)
            .ok_or_else(|| GenError::UnknownStruct(self.names.text(name).to_owned()))
            .at(location)?;

        let (offset, ty) = def
            .field(field)
            .map(|field| (field.offset, field.ty))
            .ok_or_else(|| GenError::UnknownField(self.names.text(field).to_owned()))
            .at(location)?;

        let term = self.offset_address(record, offset, ty)?;
        let term = match ty.shape {
            // El campo guarda un puntero a los datos
            Shape::Array(None) => self.dereference(term, location)?,
            _ => term,
        };

        Ok((term, array_length(&ty)))
    }

    /// Suma un desplazamiento constante a una dirección.
    fn offset_address(&mut self, base: Term, offset: u16, ty: TypeDesc) -> Generation<Term> {
        match base.place {
            Place::GlobalIndirect(address) => {
                let place = Place::GlobalIndirect(address.wrapping_add(offset));
                Ok(Term::new(place, ty))
            }

            Place::Stack => {
                if offset != 0 {
                    emit!(self, Pop(HL), LdImm16(DE, offset), AddHl(DE), Push(HL));
                }

                Ok(Term::new(Place::Stack, ty))
            }

            _ => Err(GenError::InvalidLocation).at(&self.location),
        }
    }

    /// Reemplaza la dirección de un puntero por la dirección a la que apunta.
    fn dereference(&mut self, pointer: Term, location: &Location) -> Generation<Term> {
        match pointer.place {
            Place::GlobalIndirect(address) => emit!(self, LdHlFromAddr(address)),
            Place::Stack => {
                emit!(self, Pop(HL));
                self.load_indirect(2)?;
            }

            _ => return Err(GenError::InvalidLocation).at(location),
        }

        emit!(self, Push(HL));
        Ok(Term::new(Place::Stack, pointer.ty))
    }

    /// Multiplica `HL` por el tamaño de un elemento.
    fn scale(&mut self, size: u16) -> Generation<()> {
        if size.is_power_of_two() {
            self.double(size.trailing_zeros())
        } else {
            emit!(self, LdImm16(DE, size));
            self.call_runtime(MULTIPLY)
        }
    }
}

fn array_length(ty: &TypeDesc) -> Option<u16> {
    match ty.shape {
        Shape::Array(length) => length,
        Shape::Single => None,
    }
}
