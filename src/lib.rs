//! Compilador de un lenguaje imperativo pequeño para CPUs de 8 bits
//! compatibles con Z80.
//!
//! # Front end
//! Cada programa deriva de un único archivo de código fuente. Este
//! archivo se somete primero a análisis léxico en [`lex`], de lo cual
//! se obtiene un flujo de tokens. El parser en [`parse`] consume ese
//! flujo y produce una declaración de nivel superior a la vez, cada una
//! con su propia arena de nodos ([`ast`]). Todo nombre se interna en
//! [`intern`].
//!
//! # Back end
//! El generador en [`codegen`] recibe cada declaración apenas se
//! produce y emite código máquina directamente hacia un [`sink::Sink`],
//! sin representación intermedia. Las direcciones hacia adelante se
//! resuelven al final por relocalización. La codificación de
//! instrucciones vive en [`arch`], y [`sim`] permite ejecutar la imagen
//! resultante sin hardware.

#[macro_use]
mod macros;

pub mod arch;
pub mod ast;
pub mod codegen;
pub mod error;
pub mod intern;
pub mod lex;
pub mod listing;
pub mod parse;
pub mod sim;
pub mod sink;
pub mod source;

use std::io::BufRead;

use codegen::Output;
use error::Diagnostics;
use sink::Sink;

/// Compila un programa completo hacia `sink`.
///
/// En caso de error, el contenido de `sink` queda incompleto y no debe
/// usarse.
pub fn compile<R, S>(reader: R, name: &str, sink: S) -> Result<Output<S>, Diagnostics>
where
    R: BufRead,
    S: Sink,
{
    let (start, chars) = source::chars(reader, name);
    let tokens = lex::Lexer::new(start, chars).try_exhaustive()?;

    let mut parser = parse::Parser::new(tokens.into_iter());
    codegen::generate(&mut parser, sink)
}
