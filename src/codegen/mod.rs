//! Generación de código.
//!
//! El generador consume declaraciones de una en una, conforme el
//! parser las produce, y emite código máquina directamente al [`Sink`].
//! No existe una representación intermedia: cada expresión se evalúa a
//! un [`Term`] que describe dónde quedó su valor, y las direcciones que
//! aún no se conocen se resuelven al final mediante [`Relocations`].
//!
//! La imagen resultante inicia con un salto a `main`, seguido de las
//! variables globales y funciones en el orden en que aparecen. La
//! biblioteca de soporte se emite una sola vez, antes del primer cuerpo
//! de función.

use std::io;

use log::{info, trace};
use thiserror::Error;

use crate::{
    arch::{Inst, HEADER_SIZE, IMAGE_BASE},
    ast::{BinOp, DeclKind, Declaration, Scalar},
    error::Diagnostics,
    intern::{Interner, NameId},
    lex::Token,
    parse::Parser,
    sink::Sink,
    source::{Located, Location},
};

mod address;
mod call;
mod expr;
mod flow;
mod reloc;
mod runtime;
mod symbols;
mod term;

pub use reloc::{RefKind, Reference, Relocations};
pub use runtime::{BOUNDS, MULTIPLY};
pub use symbols::{Field, Prototype, Slot, Storage, StructDef, Symbols, Variable};
pub use term::{Place, Term};

/// Cantidad máxima de parámetros de una función.
pub const MAX_PARAMETERS: usize = 16;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GenError {
    #[error("Unknown type `{0}`")]
    UnknownType(String),

    #[error("Unknown struct `{0}`")]
    UnknownStruct(String),

    #[error("Unknown field `{0}`")]
    UnknownField(String),

    #[error("Type mismatch: {0}")]
    InvalidType(String),

    #[error("Index {index} is out of bounds for length {length}")]
    OutOfBounds { index: u16, length: u16 },

    #[error("Unknown function `{0}`")]
    UnknownFunction(String),

    #[error("Unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Missing {0}")]
    MissingNode(&'static str),

    #[error("Expression does not designate a memory location")]
    InvalidLocation,

    #[error("Unsupported construct: {0}")]
    Unsupported(&'static str),

    #[error("Expected a constant value")]
    ExpectingImmediate,

    #[error("Operator `{0}` is not valid in this context")]
    InvalidOpcode(BinOp),

    #[error("Function `{name}` exceeds the limit of {limit} parameters")]
    TooManyParameters { name: String, limit: usize },

    #[error("Unresolved symbol `{0}`")]
    UnknownSymbol(String),

    #[error("Symbol `{0}` is defined more than once")]
    DuplicateSymbol(String),

    #[error("I/O error")]
    Io(#[from] io::Error),
}

pub type Generation<T> = Result<T, Located<GenError>>;

/// Asocia una ubicación a un error de generación.
pub(crate) trait Locate<T> {
    fn at(self, location: &Location) -> Generation<T>;
}

impl<T> Locate<T> for Result<T, GenError> {
    fn at(self, location: &Location) -> Generation<T> {
        self.map_err(|error| Located::at(error, location.clone()))
    }
}

/// Dirección del primer byte generado para una línea fuente.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineAddress {
    pub line: u32,
    pub address: u16,
}

/// Resultado de una compilación exitosa.
pub struct Output<S> {
    pub sink: S,
    pub lines: Vec<LineAddress>,

    /// Tamaño total de la imagen.
    pub size: u16,

    /// Dirección absoluta de `main`.
    pub entry: u16,
}

struct FunctionContext {
    returns: Scalar,
    epilogue: NameId,
}

/// Sesión de generación.
pub struct Generator<S: Sink> {
    sink: S,
    names: Interner,
    symbols: Symbols,
    relocs: Relocations,
    cursor: u16,
    location: Location,
    lines: Vec<LineAddress>,
    runtime: bool,
    function: Option<FunctionContext>,
    forward: Vec<call::ForwardCall>,
}

impl<S: Sink> Generator<S> {
    /// Crea una sesión y escribe el encabezado de la imagen.
    pub fn new(sink: S) -> Generation<Self> {
        let mut generator = Generator {
            sink,
            names: Interner::new(),
            symbols: Symbols::default(),
            relocs: Relocations::default(),
            cursor: 0,
            location: Location::default(),
            lines: Vec::new(),
            runtime: false,
            function: None,
            forward: Vec::new(),
        };

        generator.register_services()?;

        let main = generator.names.intern("main");
        generator.emit_reference(Inst::Jp(0), main, RefKind::Call)?;
        debug_assert_eq!(generator.cursor, HEADER_SIZE);

        Ok(generator)
    }

    pub fn names(&self) -> &Interner {
        &self.names
    }

    /// Los nombres deben internarse en la misma tabla que usa el generador.
    pub fn names_mut(&mut self) -> &mut Interner {
        &mut self.names
    }

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    pub fn relocations(&self) -> &Relocations {
        &self.relocs
    }

    /// Genera una declaración de nivel superior. La arena del
    /// árbol se libera al retornar.
    pub fn declare(&mut self, declaration: Declaration) -> Generation<()> {
        let Declaration {
            arena,
            location,
            kind,
        } = declaration;

        self.location = location.clone();

        match kind {
            DeclKind::Variable(var) => self.global(&arena, var, &location),
            DeclKind::Struct(decl) => self.structure(&decl, &location),
            DeclKind::Function(decl) => self.function(&arena, decl, &location),
        }
    }

    /// Emite la biblioteca de soporte si nadie lo hizo, parcha toda
    /// referencia pendiente y entrega la imagen.
    pub fn finish(mut self) -> Generation<Output<S>> {
        self.ensure_runtime()?;
        self.check_unresolved_calls()?;
        self.relocs.drain_and_patch(&mut self.sink, &self.names)?;

        let main = self.names.intern("main");
        let entry = self.relocs.resolve(main, &self.names).at(&self.location)?;

        info!("Generated {} byte(s), entry point at {:#06x}", self.cursor, entry);

        Ok(Output {
            sink: self.sink,
            lines: self.lines,
            size: self.cursor,
            entry,
        })
    }

    /// Dirección absoluta del siguiente byte a emitir.
    fn here(&self) -> u16 {
        IMAGE_BASE + self.cursor
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Generation<()> {
        let end = self.cursor as usize + bytes.len();
        if end > (u16::MAX - IMAGE_BASE) as usize {
            let message = String::from("program does not fit in the address space");
            return Err(GenError::InvalidSize(message)).at(&self.location);
        }

        self.sink
            .write(self.cursor, bytes)
            .map_err(|error| Located::at(GenError::Io(error), self.location.clone()))?;

        self.cursor = end as u16;
        Ok(())
    }

    fn emit(&mut self, inst: Inst) -> Generation<()> {
        let mut bytes = Vec::with_capacity(4);
        inst.encode(&mut bytes);

        trace!("{:#06x}: {}", self.here(), inst);
        self.write_bytes(&bytes)
    }

    /// Emite una instrucción cuyo operando de dos bytes es la dirección
    /// de `target`, por resolver al final.
    fn emit_reference(&mut self, inst: Inst, target: NameId, kind: RefKind) -> Generation<()> {
        let patch = self.cursor + 1;
        self.relocs
            .record_unknown(target, patch, kind, self.location.clone());

        self.emit(inst)
    }

    fn jump_to(&mut self, target: NameId) -> Generation<()> {
        self.emit_reference(Inst::Jp(0), target, RefKind::Jump)
    }

    /// Coloca una etiqueta en la posición actual.
    fn label(&mut self, name: NameId) -> Generation<()> {
        self.relocs
            .record_known(name, self.cursor, &self.names)
            .at(&self.location)
    }

    fn mark_line(&mut self, location: &Location) {
        let line = location.line();
        if self.lines.last().map(|entry| entry.line) != Some(line) {
            let address = self.here();
            self.lines.push(LineAddress { line, address });
        }
    }

    fn variable(&self, name: NameId, location: &Location) -> Generation<Variable> {
        self.symbols
            .variable(name)
            .copied()
            .ok_or_else(|| GenError::UnknownVariable(self.names.text(name).to_owned()))
            .at(location)
    }
}

/// Compila todas las declaraciones que produzca `parser`.
pub fn generate<I, S>(parser: &mut Parser<I>, sink: S) -> Result<Output<S>, Diagnostics>
where
    I: Iterator<Item = Located<Token>>,
    S: Sink,
{
    let mut generator = Generator::new(sink)?;
    while let Some(declaration) = parser.next_declaration(generator.names_mut())? {
        generator.declare(declaration)?;
    }

    Ok(generator.finish()?)
}
