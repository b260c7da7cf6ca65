//! Tablas de símbolos y resolución de tipos.
//!
//! Las variables globales, estructuras y prototipos viven durante toda
//! la compilación. Las variables locales se apilan al entrar a una
//! función y se descartan al salir de ella; dentro de una función no se
//! permite sombrear nombres.

use std::collections::HashMap;

use super::{GenError, Generation, Locate};
use crate::{
    ast::{Arena, Element, NodeId, NodeKind, Scalar, Shape, StructDecl, TypeDesc},
    intern::{Interner, NameId},
};

/// Ubicación del almacenamiento de una variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Dirección absoluta.
    Global(u16),

    /// Desplazamiento con signo respecto a `IX`.
    Frame(i16),
}

/// Clase de almacenamiento.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Storage {
    /// El slot contiene los datos mismos.
    Direct(Slot),

    /// El slot contiene la dirección de los datos: parámetros de
    /// arreglo o estructura y arreglos sin longitud.
    Reference(Slot),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: NameId,
    pub ty: TypeDesc,
    pub storage: Storage,
}

impl Variable {
    /// Cantidad de elementos: 1 para escalares y estructuras, 0 si se
    /// desconoce.
    pub fn length(&self) -> u16 {
        match self.ty.shape {
            Shape::Single => 1,
            Shape::Array(length) => length.unwrap_or(0),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: NameId,
    pub ty: TypeDesc,
    pub offset: u16,
}

#[derive(Clone, Debug)]
pub struct StructDef {
    pub fields: Vec<Field>,
    pub size: u16,
}

impl StructDef {
    pub fn field(&self, name: NameId) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prototype {
    pub params: Vec<TypeDesc>,
    pub returns: Scalar,

    /// Existe un cuerpo para esta función.
    pub defined: bool,
}

#[derive(Default)]
pub struct Symbols {
    globals: HashMap<NameId, Variable>,
    locals: Vec<Variable>,
    structs: HashMap<NameId, StructDef>,
    prototypes: HashMap<NameId, Prototype>,
}

impl Symbols {
    /// Busca primero entre las locales vivas y luego entre las globales.
    pub fn variable(&self, name: NameId) -> Option<&Variable> {
        self.locals
            .iter()
            .rev()
            .find(|variable| variable.name == name)
            .or_else(|| self.globals.get(&name))
    }

    pub fn declare_global(&mut self, variable: Variable, names: &Interner) -> Result<(), GenError> {
        if self.globals.contains_key(&variable.name) {
            return Err(GenError::DuplicateSymbol(names.text(variable.name).to_owned()));
        }

        self.globals.insert(variable.name, variable);
        Ok(())
    }

    pub fn push_local(&mut self, variable: Variable, names: &Interner) -> Result<(), GenError> {
        if self.locals.iter().any(|local| local.name == variable.name) {
            return Err(GenError::DuplicateSymbol(names.text(variable.name).to_owned()));
        }

        self.locals.push(variable);
        Ok(())
    }

    /// Marca la altura actual de la tabla de locales.
    pub fn locals_mark(&self) -> usize {
        self.locals.len()
    }

    /// Descarta las locales registradas después de `mark`.
    pub fn truncate_locals(&mut self, mark: usize) {
        self.locals.truncate(mark);
    }

    pub fn struct_def(&self, name: NameId) -> Option<&StructDef> {
        self.structs.get(&name)
    }

    /// Registra una estructura, dispone sus campos y retorna su tamaño.
    pub fn declare_struct(&mut self, decl: &StructDecl, names: &Interner) -> Result<u16, GenError> {
        if self.structs.contains_key(&decl.name) {
            return Err(GenError::DuplicateSymbol(names.text(decl.name).to_owned()));
        }

        let mut fields: Vec<Field> = Vec::with_capacity(decl.fields.len());
        let mut offset = 0u16;

        for field in &decl.fields {
            if fields.iter().any(|other| other.name == field.name) {
                return Err(GenError::DuplicateSymbol(names.text(field.name).to_owned()));
            }

            self.check_type(&field.ty, names)?;
            let size = self.size_of(&field.ty, names)?;

            fields.push(Field {
                name: field.name,
                ty: field.ty,
                offset,
            });

            offset = offset.checked_add(size).ok_or_else(|| {
                GenError::InvalidSize(format!("struct `{}` is too large", names.text(decl.name)))
            })?;
        }

        self.structs.insert(
            decl.name,
            StructDef {
                fields,
                size: offset,
            },
        );

        Ok(offset)
    }

    /// Registra un prototipo. Un `extern` y su definición deben coincidir.
    pub fn declare_prototype(
        &mut self,
        name: NameId,
        prototype: Prototype,
        names: &Interner,
    ) -> Result<(), GenError> {
        match self.prototypes.get_mut(&name) {
            None => {
                self.prototypes.insert(name, prototype);
                Ok(())
            }

            Some(existing) => {
                if existing.params != prototype.params || existing.returns != prototype.returns {
                    let message = format!("conflicting declarations of `{}`", names.text(name));
                    return Err(GenError::InvalidType(message));
                }

                if existing.defined && prototype.defined {
                    return Err(GenError::DuplicateSymbol(names.text(name).to_owned()));
                }

                existing.defined |= prototype.defined;
                Ok(())
            }
        }
    }

    pub fn prototype(&self, name: NameId) -> Option<&Prototype> {
        self.prototypes.get(&name)
    }

    /// Verifica que un tipo nombrado haya sido declarado.
    pub fn check_type(&self, ty: &TypeDesc, names: &Interner) -> Result<(), GenError> {
        match ty.element {
            Element::Struct(name) if !self.structs.contains_key(&name) => {
                Err(GenError::UnknownStruct(names.text(name).to_owned()))
            }

            _ => Ok(()),
        }
    }

    /// Tamaño en bytes de un elemento.
    pub fn element_size(&self, element: Element, names: &Interner) -> Result<u16, GenError> {
        match element {
            Element::Scalar(scalar) => Ok(scalar.size()),
            Element::Struct(name) => self
                .structs
                .get(&name)
                .map(|def| def.size)
                .ok_or_else(|| GenError::UnknownType(names.text(name).to_owned())),
        }
    }

    /// Tamaño en bytes del almacenamiento de una variable de este tipo.
    ///
    /// Un arreglo sin longitud ocupa solo su puntero.
    pub fn size_of(&self, ty: &TypeDesc, names: &Interner) -> Result<u16, GenError> {
        let element = self.element_size(ty.element, names)?;
        match ty.shape {
            Shape::Single => Ok(element),
            Shape::Array(None) => Ok(2),
            Shape::Array(Some(length)) => length.checked_mul(element).ok_or_else(|| {
                GenError::InvalidSize(format!("array of {} elements is too large", length))
            }),
        }
    }

    /// Representación legible de un tipo.
    pub fn describe(&self, ty: &TypeDesc, names: &Interner) -> String {
        let element = match ty.element {
            Element::Scalar(scalar) => scalar.to_string(),
            Element::Struct(name) => names.text(name).to_owned(),
        };

        match ty.shape {
            Shape::Single => element,
            Shape::Array(None) => format!("array {}", element),
            Shape::Array(Some(length)) => format!("array {} {}", length, element),
        }
    }

    /// Recorre el cuerpo de una función, asigna un desplazamiento
    /// negativo a cada variable local y retorna el tamaño del marco.
    ///
    /// Las locales de bloques anidados comparten el marco de la función.
    pub fn allocate_locals(
        &mut self,
        arena: &Arena,
        body: NodeId,
        names: &Interner,
    ) -> Generation<u16> {
        let mut next = 0i32;
        self.scan_locals(arena, body, &mut next, names)?;

        Ok(-next as u16)
    }

    fn scan_locals(
        &mut self,
        arena: &Arena,
        node: NodeId,
        next: &mut i32,
        names: &Interner,
    ) -> Generation<()> {
        let location = &arena[node].location;
        match &arena[node].kind {
            NodeKind::Block(statements) => {
                for &statement in statements {
                    self.scan_locals(arena, statement, next, names)?;
                }
            }

            NodeKind::If { body, .. } | NodeKind::While { body, .. } => {
                self.scan_locals(arena, *body, next, names)?;
            }

            NodeKind::IfElse {
                then, otherwise, ..
            } => {
                self.scan_locals(arena, *then, next, names)?;
                self.scan_locals(arena, *otherwise, next, names)?;
            }

            NodeKind::Var(decl) => {
                self.check_type(&decl.ty, names).at(location)?;
                *next -= self.size_of(&decl.ty, names).at(location)? as i32;

                if *next < -(i16::MAX as i32) {
                    let message = String::from("local variables exceed the stack frame limit");
                    return Err(GenError::InvalidSize(message)).at(location);
                }

                let slot = Slot::Frame(*next as i16);
                let storage = match decl.ty.shape {
                    Shape::Array(None) => Storage::Reference(slot),
                    _ => Storage::Direct(slot),
                };

                let variable = Variable {
                    name: decl.name,
                    ty: decl.ty,
                    storage,
                };

                self.push_local(variable, names).at(location)?;
            }

            _ => (),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VarDecl;

    fn field(names: &mut Interner, name: &str, ty: TypeDesc) -> VarDecl {
        VarDecl {
            name: names.intern(name),
            ty,
            init: None,
        }
    }

    fn array(length: Option<u16>, element: Element) -> TypeDesc {
        TypeDesc {
            shape: Shape::Array(length),
            element,
        }
    }

    #[test]
    fn struct_size_is_sum_of_fields() {
        let mut names = Interner::new();
        let mut symbols = Symbols::default();

        let inner = StructDecl {
            name: names.intern("Cell"),
            fields: vec![
                field(&mut names, "width", TypeDesc::scalar(Scalar::Byte)),
                field(&mut names, "data", array(Some(3), Element::Scalar(Scalar::Word))),
            ],
        };

        assert_eq!(symbols.declare_struct(&inner, &names).unwrap(), 1 + 3 * 2);

        let cell = names.intern("Cell");
        let outer = StructDecl {
            name: names.intern("Grid"),
            fields: vec![
                field(&mut names, "count", TypeDesc::scalar(Scalar::SWord)),
                field(&mut names, "cells", array(Some(4), Element::Struct(cell))),
                field(&mut names, "spare", array(None, Element::Scalar(Scalar::Byte))),
            ],
        };

        assert_eq!(symbols.declare_struct(&outer, &names).unwrap(), 2 + 4 * 7 + 2);

        let grid = symbols.struct_def(names.intern("Grid")).unwrap();
        let offsets: Vec<_> = grid.fields.iter().map(|field| field.offset).collect();
        assert_eq!(offsets, vec![0, 2, 30]);
    }

    #[test]
    fn unknown_and_duplicate_structs() {
        let mut names = Interner::new();
        let mut symbols = Symbols::default();

        let missing = names.intern("Missing");
        let ty = TypeDesc {
            shape: Shape::Single,
            element: Element::Struct(missing),
        };

        assert!(matches!(symbols.check_type(&ty, &names), Err(GenError::UnknownStruct(_))));
        assert!(matches!(symbols.size_of(&ty, &names), Err(GenError::UnknownType(_))));

        let decl = StructDecl {
            name: names.intern("Pair"),
            fields: vec![
                field(&mut names, "a", TypeDesc::scalar(Scalar::Byte)),
                field(&mut names, "a", TypeDesc::scalar(Scalar::Byte)),
            ],
        };

        assert!(matches!(
            symbols.declare_struct(&decl, &names),
            Err(GenError::DuplicateSymbol(_))
        ));
    }

    #[test]
    fn locals_shadow_globals_until_truncated() {
        let mut names = Interner::new();
        let mut symbols = Symbols::default();
        let x = names.intern("x");

        let global = Variable {
            name: x,
            ty: TypeDesc::scalar(Scalar::Word),
            storage: Storage::Direct(Slot::Global(0x1003)),
        };

        symbols.declare_global(global, &names).unwrap();

        let mark = symbols.locals_mark();
        let local = Variable {
            storage: Storage::Direct(Slot::Frame(-2)),
            ..global
        };

        symbols.push_local(local, &names).unwrap();
        assert_eq!(symbols.variable(x), Some(&local));
        assert!(matches!(
            symbols.push_local(local, &names),
            Err(GenError::DuplicateSymbol(_))
        ));

        symbols.truncate_locals(mark);
        assert_eq!(symbols.variable(x), Some(&global));
    }

    #[test]
    fn extern_then_definition() {
        let mut names = Interner::new();
        let mut symbols = Symbols::default();
        let f = names.intern("f");

        let mut prototype = Prototype {
            params: vec![TypeDesc::scalar(Scalar::Byte)],
            returns: Scalar::Word,
            defined: false,
        };

        symbols.declare_prototype(f, prototype.clone(), &names).unwrap();
        prototype.defined = true;
        symbols.declare_prototype(f, prototype.clone(), &names).unwrap();

        assert!(matches!(
            symbols.declare_prototype(f, prototype.clone(), &names),
            Err(GenError::DuplicateSymbol(_))
        ));

        prototype.returns = Scalar::Byte;
        assert!(matches!(
            symbols.declare_prototype(f, prototype, &names),
            Err(GenError::InvalidType(_))
        ));
    }
}
