//! Internamiento de nombres.
//!
//! Todo identificador del programa, así como toda etiqueta temporal
//! que requiera el generador, se representa con un [`NameId`] estable.
//! Las tablas de símbolos y de relocalización comparan ids y nunca
//! cadenas.

use indexmap::IndexSet;
use std::fmt;

/// Identificador estable de un nombre internado.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameId(u32);

impl fmt::Display for NameId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "#{}", self.0)
    }
}

/// Tabla de nombres internados.
#[derive(Default)]
pub struct Interner {
    names: IndexSet<String>,
    temporaries: u32,
}

impl Interner {
    pub fn new() -> Self {
        Default::default()
    }

    /// Obtiene el id de un nombre, internándolo si aún no existe.
    pub fn intern(&mut self, text: &str) -> NameId {
        match self.names.get_index_of(text) {
            Some(index) => NameId(index as u32),
            None => NameId(self.names.insert_full(text.to_owned()).0 as u32),
        }
    }

    /// Busca un nombre sin internarlo.
    pub fn lookup(&self, text: &str) -> Option<NameId> {
        self.names.get_index_of(text).map(|index| NameId(index as u32))
    }

    /// Texto original de un id.
    pub fn text(&self, id: NameId) -> &str {
        self.names
            .get_index(id.0 as usize)
            .map(String::as_str)
            .unwrap_or("<invalid>")
    }

    /// Crea un nombre temporal nuevo.
    ///
    /// Los temporales incluyen `$`, que nunca forma parte de un
    /// identificador del lenguaje fuente.
    pub fn fresh(&mut self) -> NameId {
        let name = format!("${}", self.temporaries);
        self.temporaries += 1;
        self.intern(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let mut names = Interner::new();

        let a = names.intern("alpha");
        let b = names.intern("beta");
        assert_ne!(a, b);
        assert_eq!(names.intern("alpha"), a);
        assert_eq!(names.text(b), "beta");
        assert_eq!(names.lookup("beta"), Some(b));
        assert_eq!(names.lookup("gamma"), None);
    }

    #[test]
    fn temporaries_never_repeat() {
        let mut names = Interner::new();

        let first = names.fresh();
        let second = names.fresh();
        assert_ne!(first, second);
        assert!(names.text(first).starts_with('$'));
    }
}
