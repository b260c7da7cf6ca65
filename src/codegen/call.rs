//! Llamadas a funciones.
//!
//! Los argumentos se empujan de izquierda a derecha, una palabra de pila
//! por argumento; los escalares de un byte se extienden con ceros y los
//! agregados se pasan por dirección. Quien llama retira sus argumentos
//! al retornar.
//!
//! Una llamada a una función que aún no se ha declarado se emite de
//! todas formas y su verificación se pospone hasta que aparezca el
//! prototipo. Mientras tanto se asume que la función retorna una
//! palabra en `HL`.

use std::mem;

use log::debug;

use super::{
    expr::fits,
    symbols::Prototype,
    term::{Place, Term},
    GenError, Generation, Generator, Locate, RefKind, MAX_PARAMETERS,
};

use crate::{
    arch::{Inst::*, Reg16::*},
    ast::{Arena, Element, NodeId, NodeKind, Scalar, Shape, TypeDesc},
    intern::NameId,
    sink::Sink,
    source::Location,
};

/// Lo que se sabe de un argumento ya empujado.
#[derive(Copy, Clone, Debug)]
pub(super) enum Argument {
    Immediate(u16),
    Typed(TypeDesc),
}

/// Llamada emitida antes de conocer el prototipo del destino.
pub(super) struct ForwardCall {
    callee: NameId,
    args: Vec<Argument>,
    location: Location,
}

impl<S: Sink> Generator<S> {
    /// Llama a una función y entrega su valor de retorno.
    pub(super) fn call(
        &mut self,
        arena: &Arena,
        callee: NameId,
        args: &[NodeId],
        location: &Location,
    ) -> Generation<Term> {
        let prototype = self.symbols.prototype(callee).cloned();
        match &prototype {
            Some(prototype) => self.check_arity(callee, args.len(), prototype).at(location)?,
            None if args.len() > MAX_PARAMETERS => {
                let name = self.names.text(callee).to_owned();
                let limit = MAX_PARAMETERS;
                return Err(GenError::TooManyParameters { name, limit }).at(location);
            }

            None => (),
        }

        let mut passed = Vec::with_capacity(args.len());
        for (i, &arg) in args.iter().enumerate() {
            let param = prototype.as_ref().map(|prototype| prototype.params[i]);
            let argument = self.argument(arena, arg, param.as_ref())?;

            if let Some(param) = &param {
                self.check_argument(&argument, param).at(&arena[arg].location)?;
            }

            passed.push(argument);
        }

        self.location = location.clone();
        self.emit_reference(Call(0), callee, RefKind::Call)?;

        for _ in args {
            emit!(self, Pop(DE));
        }

        let returns = match prototype {
            Some(prototype) => prototype.returns,
            None => {
                debug!("Forward call to `{}` at {}", self.names.text(callee), location);
                self.forward.push(ForwardCall {
                    callee,
                    args: passed,
                    location: location.clone(),
                });

                Scalar::Word
            }
        };

        let place = match returns.size() {
            1 => Place::Accumulator,
            _ => Place::RegisterPair,
        };

        Ok(Term::new(place, TypeDesc::scalar(returns)))
    }

    /// Verifica las llamadas hacia adelante que esperaban a `name`.
    pub(super) fn check_forward_calls(&mut self, name: NameId) -> Generation<()> {
        let prototype = match self.symbols.prototype(name) {
            Some(prototype) => prototype.clone(),
            None => return Ok(()),
        };

        let (calls, rest): (Vec<_>, Vec<_>) = mem::take(&mut self.forward)
            .into_iter()
            .partition(|call| call.callee == name);

        self.forward = rest;

        for call in calls {
            self.check_arity(name, call.args.len(), &prototype)
                .at(&call.location)?;

            for (argument, param) in call.args.iter().zip(&prototype.params) {
                self.check_argument(argument, param).at(&call.location)?;
            }
        }

        Ok(())
    }

    /// Falla si alguna llamada hacia adelante nunca encontró su destino.
    pub(super) fn check_unresolved_calls(&self) -> Generation<()> {
        match self.forward.first() {
            None => Ok(()),
            Some(call) => {
                let name = self.names.text(call.callee).to_owned();
                Err(GenError::UnknownFunction(name)).at(&call.location)
            }
        }
    }

    /// Empuja un argumento como una palabra de la pila.
    fn argument(&mut self, arena: &Arena, arg: NodeId, param: Option<&TypeDesc>) -> Generation<Argument> {
        let location = &arena[arg].location;
        let aggregate = match param {
            Some(param) => param.is_aggregate(),
            None => self
                .static_type(arena, arg)
                .map_or(false, |ty| ty.is_aggregate()),
        };

        if aggregate {
            let (term, _) = self.address(arena, arg)?;
            match term.place {
                Place::GlobalIndirect(address) => emit!(self, LdImm16(HL, address), Push(HL)),
                Place::Stack => (),
                _ => return Err(GenError::InvalidLocation).at(location),
            }

            return Ok(Argument::Typed(term.ty));
        }

        let term = self.evaluate(arena, arg)?;
        term.width().at(location)?;

        let argument = match term.as_immediate() {
            Some(value) => Argument::Immediate(value),
            None => Argument::Typed(term.ty),
        };

        self.to_pair(term, location)?;
        emit!(self, Push(HL));

        Ok(argument)
    }

    /// Tipo de una expresión que designa memoria, sin emitir código.
    fn static_type(&self, arena: &Arena, node: NodeId) -> Option<TypeDesc> {
        match &arena[node].kind {
            NodeKind::Ident(name) => self.symbols.variable(*name).map(|variable| variable.ty),
            NodeKind::Paren(inner) => self.static_type(arena, *inner),
            NodeKind::Index { base, .. } => self
                .static_type(arena, *base)
                .map(|ty| ty.element_type()),

            NodeKind::Field { base, field } => match self.static_type(arena, *base)?.element {
                Element::Struct(name) => self
                    .symbols
                    .struct_def(name)?
                    .field(*field)
                    .map(|field| field.ty),

                Element::Scalar(_) => None,
            },

            _ => None,
        }
    }

    fn check_arity(&self, callee: NameId, count: usize, prototype: &Prototype) -> Result<(), GenError> {
        let expected = prototype.params.len();

        if count < expected {
            Err(GenError::MissingNode("argument"))
        } else if count > expected {
            let name = self.names.text(callee).to_owned();
            Err(GenError::TooManyParameters {
                name,
                limit: expected,
            })
        } else {
            Ok(())
        }
    }

    /// Una constante sirve para cualquier parámetro escalar en el que
    /// quepa; todo lo demás debe coincidir exactamente.
    fn check_argument(&self, argument: &Argument, param: &TypeDesc) -> Result<(), GenError> {
        match (argument, param.as_scalar()) {
            (Argument::Immediate(value), Some(scalar)) => fits(*value, scalar.size()),
            (Argument::Immediate(value), None) => Err(self.mismatch(param, &Term::immediate(*value).ty)),
            (Argument::Typed(ty), Some(_)) if ty == param => Ok(()),
            (Argument::Typed(ty), None) if passes_as(ty, param) => Ok(()),
            (Argument::Typed(ty), _) => Err(self.mismatch(param, ty)),
        }
    }

    pub(super) fn mismatch(&self, expected: &TypeDesc, found: &TypeDesc) -> GenError {
        GenError::InvalidType(format!(
            "expected `{}`, found `{}`",
            self.symbols.describe(expected, &self.names),
            self.symbols.describe(found, &self.names)
        ))
    }
}

/// Compatibilidad de un agregado con el parámetro que lo recibe.
pub(super) fn passes_as(arg: &TypeDesc, param: &TypeDesc) -> bool {
    arg.element == param.element
        && match (arg.shape, param.shape) {
            (Shape::Single, Shape::Single) => true,
            (Shape::Array(_), Shape::Array(None)) => true,
            (Shape::Array(a), Shape::Array(b)) => a == b,
            _ => false,
        }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_compatibility() {
        let array = |length| TypeDesc {
            shape: Shape::Array(length),
            element: Element::Scalar(Scalar::Byte),
        };

        assert!(passes_as(&array(Some(4)), &array(None)));
        assert!(passes_as(&array(Some(4)), &array(Some(4))));
        assert!(!passes_as(&array(Some(3)), &array(Some(4))));
        assert!(!passes_as(&array(None), &array(Some(4))));
        assert!(!passes_as(&TypeDesc::scalar(Scalar::Byte), &array(None)));
    }
}
