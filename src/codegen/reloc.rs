//! Motor de relocalización.
//!
//! Toda instrucción que nombra una dirección (llamadas, saltos a
//! etiquetas, el salto de entrada) se emite de inmediato con una
//! dirección provisional y se anota como `Unknown`. Cada definición
//! (función, global, etiqueta) se anota como `Known`. Al terminar,
//! [`Relocations::drain_and_patch`] reescribe cada referencia con su
//! dirección final.

use std::{collections::HashMap, mem};

use log::debug;

use super::{GenError, Generation};
use crate::{
    arch::IMAGE_BASE,
    intern::{Interner, NameId},
    sink::Sink,
    source::{Located, Location},
};

/// Qué clase de instrucción hace la referencia.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RefKind {
    Call,
    Jump,
}

/// Una referencia pendiente.
#[derive(Clone, Debug)]
pub struct Reference {
    pub name: NameId,
    pub patch: u16,
    pub kind: RefKind,
    pub location: Location,
}

#[derive(Default)]
pub struct Relocations {
    known: HashMap<NameId, u16>,
    unknown: Vec<Reference>,
}

impl Relocations {
    /// Anota la definición de `name` en el desplazamiento `offset` de la imagen.
    pub fn record_known(&mut self, name: NameId, offset: u16, names: &Interner) -> Result<(), GenError> {
        if self.known.insert(name, offset).is_some() {
            return Err(GenError::DuplicateSymbol(names.text(name).to_owned()));
        }

        Ok(())
    }

    /// Anota que los dos bytes en `patch` deben recibir la dirección de `name`.
    pub fn record_unknown(&mut self, name: NameId, patch: u16, kind: RefKind, location: Location) {
        self.unknown.push(Reference {
            name,
            patch,
            kind,
            location,
        });
    }

    /// Dirección absoluta de un nombre ya definido.
    pub fn resolve(&self, name: NameId, names: &Interner) -> Result<u16, GenError> {
        self.known
            .get(&name)
            .map(|&offset| IMAGE_BASE + offset)
            .ok_or_else(|| GenError::UnknownSymbol(names.text(name).to_owned()))
    }

    /// Referencias aún sin parchar.
    pub fn pending(&self) -> &[Reference] {
        &self.unknown
    }

    /// Parcha toda referencia pendiente y retorna cuántas se resolvieron.
    ///
    /// Una referencia a un nombre nunca definido es un error fatal.
    pub fn drain_and_patch<S: Sink>(&mut self, sink: &mut S, names: &Interner) -> Generation<usize> {
        let unknown = mem::take(&mut self.unknown);
        let count = unknown.len();

        for reference in unknown {
            let address = match self.resolve(reference.name, names) {
                Ok(address) => address,
                Err(_) => {
                    let name = names.text(reference.name).to_owned();
                    let error = match reference.kind {
                        RefKind::Call => GenError::UnknownFunction(name),
                        RefKind::Jump => GenError::UnknownSymbol(name),
                    };

                    return Err(Located::at(error, reference.location));
                }
            };

            sink.write(reference.patch, &address.to_le_bytes())
                .map_err(|error| Located::at(GenError::Io(error), reference.location.clone()))?;
        }

        debug!("Patched {} reference(s) against {} definition(s)", count, self.known.len());
        Ok(count)
    }
}
