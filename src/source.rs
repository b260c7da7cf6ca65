//! Ubicaciones en el código fuente.
//!
//! El programa se lee carácter por carácter. Cada línea completa queda
//! guardada en un [`SourceFile`] compartido por todas las ubicaciones
//! que apuntan a él, así que un diagnóstico puede citar la línea sin
//! volver a abrir el archivo.

use std::{
    cell::RefCell,
    fmt,
    io::{self, BufRead},
    rc::Rc,
    vec,
};

/// Columnas entre paradas de tabulador.
const TAB_WIDTH: u32 = 4;

/// Un carácter leído junto a la ubicación del carácter que le sigue.
pub type SourceChar = io::Result<(char, Location)>;

/// Un valor con la ubicación de donde proviene.
#[derive(Debug, Clone)]
pub struct Located<T> {
    value: T,
    location: Location,
}

impl<T> Located<T> {
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }

    pub fn val(&self) -> &T {
        &self.value
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn split(self) -> (Location, T) {
        (self.location, self.value)
    }
}

/// Rango `[start, end)` de posiciones dentro de un archivo.
#[derive(Clone)]
pub struct Location {
    file: Rc<SourceFile>,
    start: Position,
    end: Position,
}

impl Location {
    fn single(file: Rc<SourceFile>, at: Position) -> Self {
        let end = at.after(' ');
        Location {
            file,
            start: at,
            end,
        }
    }

    /// Cubre desde el inicio de `from` hasta el final de `to`.
    pub fn span(from: Location, to: &Location) -> Self {
        Location {
            end: to.end,
            ..from
        }
    }

    pub fn start(&self) -> Position {
        self.start
    }

    pub fn end(&self) -> Position {
        self.end
    }

    pub fn line(&self) -> u32 {
        self.start.line
    }

    pub fn file(&self) -> &SourceFile {
        &self.file
    }

    /// Un solo carácter, o un rango que cruza líneas.
    fn is_point(&self) -> bool {
        self.start.line != self.end.line || self.end.column <= self.start.column + 1
    }
}

impl Default for Location {
    fn default() -> Self {
        let file = Rc::new(SourceFile::new(String::from("<unknown>")));
        Location::single(file, Position::default())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.file.name;
        if self.is_point() {
            write!(formatter, "{}:{}", name, self.start)
        } else {
            let last = Position {
                column: self.end.column - 1,
                ..self.end
            };

            write!(formatter, "{}:[{}-{}]", name, self.start, last)
        }
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, formatter)
    }
}

/// Línea y columna, ambas desde 1.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    /// Posición que ocupa el carácter siguiente a `c`.
    fn after(self, c: char) -> Position {
        match c {
            '\n' => Position {
                line: self.line + 1,
                column: 1,
            },

            '\t' => Position {
                column: (self.column - 1) / TAB_WIDTH * TAB_WIDTH + TAB_WIDTH + 1,
                ..self
            },

            _ => Position {
                column: self.column + 1,
                ..self
            },
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 1 }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

/// Nombre de un archivo y las líneas que se han leído de él.
pub struct SourceFile {
    name: String,
    lines: RefCell<Vec<String>>,
}

impl SourceFile {
    fn new(name: String) -> Self {
        SourceFile {
            name,
            lines: RefCell::new(Vec::new()),
        }
    }

    /// Texto de la línea `number`, vacío si aún no se ha leído.
    pub fn line(&self, number: u32) -> String {
        let lines = self.lines.borrow();
        number
            .checked_sub(1)
            .and_then(|index| lines.get(index as usize))
            .cloned()
            .unwrap_or_default()
    }
}

/// Flujo de caracteres de un archivo, línea por línea.
///
/// Todo fin de línea se entrega como `'\n'`, incluso si la última línea
/// no lo tiene. Después de un error de E/S el flujo termina.
pub struct Chars<R> {
    reader: Option<R>,
    file: Rc<SourceFile>,
    pending: vec::IntoIter<char>,
    position: Position,
}

impl<R: BufRead> Chars<R> {
    /// Lee la siguiente línea y la guarda. `false` al final de la entrada.
    fn refill(&mut self, reader: &mut R) -> io::Result<bool> {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(false);
        }

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        let mut chars: Vec<char> = line.chars().collect();
        chars.push('\n');

        self.file.lines.borrow_mut().push(line);
        self.pending = chars.into_iter();
        Ok(true)
    }
}

impl<R: BufRead> Iterator for Chars<R> {
    type Item = SourceChar;

    fn next(&mut self) -> Option<SourceChar> {
        loop {
            if let Some(c) = self.pending.next() {
                self.position = self.position.after(c);
                let next = Location::single(Rc::clone(&self.file), self.position);
                return Some(Ok((c, next)));
            }

            let mut reader = self.reader.take()?;
            match self.refill(&mut reader) {
                Ok(true) => self.reader = Some(reader),
                Ok(false) => return None,
                Err(error) => return Some(Err(error)),
            }
        }
    }
}

/// Abre un flujo de caracteres sobre `reader`.
///
/// La ubicación retornada es la del primer carácter.
pub fn chars<R, S>(reader: R, name: S) -> (Location, Chars<R>)
where
    R: BufRead,
    S: Into<String>,
{
    let file = Rc::new(SourceFile::new(name.into()));
    let start = Location::single(Rc::clone(&file), Position::default());

    let chars = Chars {
        reader: Some(reader),
        file,
        pending: Vec::new().into_iter(),
        position: Position::default(),
    };

    (start, chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_recorded_while_read() {
        let (_, chars) = chars("ab\r\n\tc".as_bytes(), "test.sl");
        let chars: Vec<_> = chars.map(Result::unwrap).collect();

        let text: String = chars.iter().map(|(c, _)| c).collect();
        assert_eq!(text, "ab\n\tc\n");

        let (_, after_tab) = &chars[3];
        assert_eq!(after_tab.start().line(), 2);
        assert_eq!(after_tab.start().column(), 5);

        assert_eq!(after_tab.file().line(1), "ab");
        assert_eq!(after_tab.file().line(2), "\tc");
        assert_eq!(after_tab.file().line(3), "");
    }

    #[test]
    fn points_and_ranges_display_differently() {
        let (start, chars) = chars("var x\n".as_bytes(), "test.sl");
        let chars: Vec<_> = chars.map(Result::unwrap).collect();

        assert_eq!(start.to_string(), "test.sl:1:1");

        // chars[1] lleva la ubicación de 'r'
        let var = Location::span(start, &chars[1].1);
        assert_eq!(var.to_string(), "test.sl:[1:1-1:3]");
    }
}
