//! Valores en tránsito durante la evaluación de expresiones.

use super::GenError;
use crate::ast::{Scalar, TypeDesc};

/// Dónde reside un valor recién evaluado.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Place {
    /// Constante conocida en tiempo de compilación; aún no hay código.
    Immediate(u16),

    /// Valor de un byte en `A`.
    Accumulator,

    /// Valor de dos bytes, o una dirección, en `HL`.
    RegisterPair,

    /// Dirección empujada a la pila.
    Stack,

    /// El valor vive en memoria, en una dirección absoluta conocida.
    GlobalIndirect(u16),
}

/// Un valor evaluado: dónde está y de qué tipo es.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Term {
    pub place: Place,
    pub ty: TypeDesc,
}

impl Term {
    pub fn new(place: Place, ty: TypeDesc) -> Self {
        Term { place, ty }
    }

    /// Una constante toma el tipo escalar más angosto que la contiene.
    pub fn immediate(value: u16) -> Self {
        let scalar = if value <= 0xFF {
            Scalar::Byte
        } else {
            Scalar::Word
        };

        Term::new(Place::Immediate(value), TypeDesc::scalar(scalar))
    }

    pub fn as_immediate(&self) -> Option<u16> {
        match self.place {
            Place::Immediate(value) => Some(value),
            _ => None,
        }
    }

    /// Ancho en bytes; solo los escalares caben en registros.
    pub fn width(&self) -> Result<u16, GenError> {
        self.ty
            .as_scalar()
            .map(Scalar::size)
            .ok_or_else(|| GenError::InvalidSize(String::from("aggregates cannot be used as values")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Shape;

    #[test]
    fn immediates_pick_narrowest_type() {
        assert_eq!(Term::immediate(255).width().unwrap(), 1);
        assert_eq!(Term::immediate(256).width().unwrap(), 2);
        assert_eq!(Term::immediate(7).as_immediate(), Some(7));
    }

    #[test]
    fn aggregates_have_no_width() {
        let ty = TypeDesc {
            shape: Shape::Array(Some(4)),
            ..TypeDesc::scalar(Scalar::Byte)
        };

        let term = Term::new(Place::Stack, ty);
        assert!(matches!(term.width(), Err(GenError::InvalidSize(_))));
    }
}
