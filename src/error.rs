//! Reporte de errores.
//!
//! Cada fase produce sus propios errores envueltos en [`Located`]. Al
//! cruzar hacia [`Diagnostics`] se reducen a su mensaje y ubicación, y
//! así se muestran junto a la línea de código que los originó.

use std::{error::Error, fmt};

use crate::source::{Located, Location};

/// Un mensaje de error con su ubicación.
struct Diagnostic {
    message: String,
    location: Location,
}

impl Diagnostic {
    fn render(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostic { message, location } = self;
        let (start, end) = (location.start(), location.end());

        writeln!(formatter, "error: {}", message)?;
        writeln!(formatter, "  at {}", location)?;

        let number = start.line().to_string();
        let gutter = " ".repeat(number.len());
        let text = location.file().line(start.line());

        writeln!(formatter, "{} |", gutter)?;
        writeln!(formatter, "{} | {}", number, text)?;

        // Rangos de varias líneas solo marcan su primera columna
        let width = if end.line() == start.line() {
            end.column().saturating_sub(start.column()).max(1)
        } else {
            1
        };

        let indent = " ".repeat(start.column().saturating_sub(1) as usize);
        let marks = "^".repeat(width as usize);
        writeln!(formatter, "{} | {}{}", gutter, indent, marks)
    }
}

/// Errores listos para mostrarse al usuario.
pub struct Diagnostics(Vec<Diagnostic>);

impl<E: Error> From<Located<E>> for Diagnostics {
    fn from(error: Located<E>) -> Self {
        Diagnostics::from(vec![error])
    }
}

impl<E: Error> From<Vec<Located<E>>> for Diagnostics {
    fn from(errors: Vec<Located<E>>) -> Self {
        let diagnostics = errors
            .into_iter()
            .map(|error| {
                let message = error.val().to_string();
                Diagnostic {
                    message,
                    location: error.location().clone(),
                }
            })
            .collect();

        Diagnostics(diagnostics)
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diagnostic in &self.0 {
            diagnostic.render(formatter)?;
            writeln!(formatter)?;
        }

        match self.0.len() {
            0 => writeln!(formatter, "No errors were reported"),
            1 => writeln!(formatter, "Compilation failed: 1 error"),
            count => writeln!(formatter, "Compilation failed: {} errors", count),
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, formatter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("Unexpected `{0}`")]
    struct Unexpected(&'static str);

    #[test]
    fn caret_underlines_the_range() {
        let (_, chars) = source::chars("x = foo\n".as_bytes(), "test.sl");
        let chars: Vec<_> = chars.map(Result::unwrap).collect();

        // chars[5] lleva la ubicación de la segunda 'o'
        let location = source::Location::span(chars[3].1.clone(), &chars[5].1);

        let rendered = Diagnostics::from(Located::at(Unexpected("foo"), location)).to_string();
        let expected = "error: Unexpected `foo`\n  \
                        at test.sl:[1:5-1:7]\n  \
                        |\n\
                        1 | x = foo\n  \
                        |     ^^^\n\
                        \n\
                        Compilation failed: 1 error\n";

        assert_eq!(rendered, expected);
    }
}
