//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone un flujo de
//! caracteres en unidades léxicas denominadas tokens. Los espacios en
//! blanco y los comentarios se descartan durante esta operación, pero
//! no así los fines de línea: el lenguaje es orientado a líneas, por lo
//! cual cada `'\n'` produce un [`Token::Eol`]. Cada token emitido está
//! asociado a una ubicación en el código fuente original.
//!
//! # Contenido de un token
//! Operadores, puntuación y palabras clave se identifican por lo que son
//! y no incluyen lexemas. Los identificadores sí incluyen su lexema
//! original. Las constantes literales se resuelven a sus valores.
//!
//! # Reglas importantes del lenguaje
//! - Los comentarios inician con `#` y terminan al final de la línea.
//! - Los identificadores tienen un límite de longitud y distinguen
//!   mayúsculas de minúsculas.
//! - Las palabras clave no distinguen mayúsculas de minúsculas, por lo
//!   cual tanto `while` como `WHILE` y `While` resultan en
//!   [`Keyword::While`].
//!
//! # Errores
//! El lexer es capaz de recuperarse parcialmente de condiciones de error,
//! descartando el resto de la línea afectada. Esto permite reportar más de
//! un error por ejecución.

use crate::source::{Located, Location, SourceChar};
use std::{
    fmt::{self, Display},
    iter::Peekable,
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;

// Case-insensitive
pub use unicase::Ascii as NoCase;

/// Literal entero máximo.
const INT_MAX: u32 = u16::MAX as u32;

/// Longitud máxima de un identificador.
const ID_MAX: usize = 32;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Error de E/S originado por el flujo de entrada.
    #[error("I/O error")]
    Input(#[from] std::io::Error),

    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Se esperaba un carácter específico en esta posición.
    #[error("Expected {0:?}")]
    Expected(char),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow, valid range is [0, {INT_MAX}]")]
    IntOverflow,

    /// Identificador demasiado largo.
    #[error("Identifier exceeds {ID_MAX} characters")]
    IdTooLong,
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<str>);

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// Objeto resultante del análisis léxico.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero.
    IntLiteral(u16),

    /// Fin de línea.
    Eol,

    /// `=`, tanto asignación como comparación por igualdad.
    Equal,

    /// `!=`
    NotEqual,

    /// `<`
    Less,

    /// `<=`
    LessEqual,

    /// `>`
    Greater,

    /// `>=`
    GreaterEqual,

    /// `<<`
    ShiftLeft,

    /// `>>`
    ShiftRight,

    /// `,`
    Comma,

    /// `.`
    Period,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `&`
    Ampersand,

    /// `|`
    Pipe,

    /// `^`
    Caret,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `[`
    OpenSquare,

    /// `]`
    CloseSquare,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            IntLiteral(integer) => write!(fmt, "literal `{}`", integer),
            Eol => fmt.write_str("end of line"),
            Equal => fmt.write_str("`=`"),
            NotEqual => fmt.write_str("`!=`"),
            Less => fmt.write_str("`<`"),
            LessEqual => fmt.write_str("`<=`"),
            Greater => fmt.write_str("`>`"),
            GreaterEqual => fmt.write_str("`>=`"),
            ShiftLeft => fmt.write_str("`<<`"),
            ShiftRight => fmt.write_str("`>>`"),
            Comma => fmt.write_str("`,`"),
            Period => fmt.write_str("`.`"),
            Plus => fmt.write_str("`+`"),
            Minus => fmt.write_str("`-`"),
            Times => fmt.write_str("`*`"),
            Ampersand => fmt.write_str("`&`"),
            Pipe => fmt.write_str("`|`"),
            Caret => fmt.write_str("`^`"),
            OpenParen => fmt.write_str("`(`"),
            CloseParen => fmt.write_str("`)`"),
            OpenSquare => fmt.write_str("`[`"),
            CloseSquare => fmt.write_str("`]`"),
        }
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Byte,
    Word,
    SByte,
    SWord,
    Array,
    Var,
    Struct,
    Fun,
    Extern,
    Const,
    If,
    Else,
    While,
    Return,
    End,
}

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Keyword::*;
        let string = match self {
            Byte   => "byte",
            Word   => "word",
            SByte  => "sbyte",
            SWord  => "sword",
            Array  => "array",
            Var    => "var",
            Struct => "struct",
            Fun    => "fun",
            Extern => "extern",
            Const  => "const",
            If     => "if",
            Else   => "else",
            While  => "while",
            Return => "return",
            End    => "end",
        };

        fmt.write_str(string)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        use Keyword::*;

        const KEYWORDS: &[(NoCase<&str>, Keyword)] = &[
            (NoCase::new("byte"),   Byte),
            (NoCase::new("word"),   Word),
            (NoCase::new("sbyte"),  SByte),
            (NoCase::new("sword"),  SWord),
            (NoCase::new("array"),  Array),
            (NoCase::new("var"),    Var),
            (NoCase::new("struct"), Struct),
            (NoCase::new("fun"),    Fun),
            (NoCase::new("extern"), Extern),
            (NoCase::new("const"),  Const),
            (NoCase::new("if"),     If),
            (NoCase::new("else"),   Else),
            (NoCase::new("while"),  While),
            (NoCase::new("return"), Return),
            (NoCase::new("end"),    End),
        ];

        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == NoCase::new(string))
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Máquina de estados para análisis léxico.
///
/// La salida del lexer, así como su siguiente estado, se define a partir
/// de tanto su estado actual como el siguiente carácter encontrado en el
/// flujo de entrada.
pub struct Lexer<S: Iterator<Item = SourceChar>> {
    source: Peekable<S>,
    state: State,
    start: Location,
    next: Location,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado de error.
    Error,

    /// Estado de completitud; siempre emite el token incluido,
    /// consume la entrada actual y pasa a [`State::Start`].
    Complete(Token),

    /// Comentario de línea.
    ///
    /// Este estado emite [`Token::Eol`] al encontrar `'\n'`.
    Comment,

    /// Se encontró `<`: puede seguir `=` o `<`.
    LeftAngle,

    /// Se encontró `>`: puede seguir `=` o `>`.
    RightAngle,

    /// Se encontró `!`, que solo puede formar `!=`.
    Bang,

    /// Constante entera.
    Integer(u32),

    /// Término que puede ser un identificador o una palabra clave.
    Word(String),
}

impl<S: Iterator<Item = SourceChar>> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(start: Location, source: S) -> Self {
        let next = start.clone();
        Lexer {
            source: source.peekable(),
            state: State::Start,
            start,
            next,
        }
    }

    /// Reduce la entrada a sea una secuencia conocida de tokens
    /// infalibles o una secuencia de errores.
    ///
    /// En caso de que ocurra al menos un error, el lexer dejará
    /// de buscar tokens exitosos y comenzará a acumular solamente
    /// errores.
    pub fn try_exhaustive(mut self) -> Result<Vec<Located<Token>>, Vec<Located<LexerError>>> {
        let mut tokens = Vec::new();

        while let Some(result) = self.next() {
            match result {
                Ok(token) => tokens.push(token),
                Err(error) => {
                    drop(tokens);

                    let mut errors = vec![error];
                    errors.extend(self.filter_map(Result::err));

                    return Err(errors);
                }
            }
        }

        Ok(tokens)
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<(Token, Location)>, LexerError> {
        use {State::*, Token::*};

        let mut last_accepted = self.start.clone();
        let token = loop {
            // Se espera un siguiente carácter, fallando si hay error de E/S
            let next_char = match self.source.peek() {
                None => None,
                Some(Ok((c, _))) => Some(*c),
                Some(Err(_)) => match self.source.next() {
                    Some(Err(error)) => break Err(error.into()),
                    _ => None,
                },
            };

            // La posición de origen se mueve junto a la posición
            // siguiente siempre que no se haya encontrado una
            // frontera de token
            if let Start = self.state {
                self.start = self.next.clone();
            }

            // Switch table principal
            match (&mut self.state, next_char) {
                // Se descarta la línea donde ocurrió el error
                (Error, None) => return Ok(None),
                (Error, Some('\n')) => self.state = Start,
                (Error, Some(_)) => (),

                // Tokens triviales
                (Start, None) => return Ok(None),
                (Start, Some('\n')) => self.state = Complete(Eol),
                (Start, Some(',')) => self.state = Complete(Comma),
                (Start, Some('.')) => self.state = Complete(Period),
                (Start, Some('+')) => self.state = Complete(Plus),
                (Start, Some('-')) => self.state = Complete(Minus),
                (Start, Some('*')) => self.state = Complete(Times),
                (Start, Some('&')) => self.state = Complete(Ampersand),
                (Start, Some('|')) => self.state = Complete(Pipe),
                (Start, Some('^')) => self.state = Complete(Caret),
                (Start, Some('=')) => self.state = Complete(Equal),
                (Start, Some('(')) => self.state = Complete(OpenParen),
                (Start, Some(')')) => self.state = Complete(CloseParen),
                (Start, Some('[')) => self.state = Complete(OpenSquare),
                (Start, Some(']')) => self.state = Complete(CloseSquare),
                (Start, Some('<')) => self.state = LeftAngle,
                (Start, Some('>')) => self.state = RightAngle,
                (Start, Some('!')) => self.state = Bang,
                (Start, Some('#')) => self.state = Comment,

                // Identificadores y palabras clave
                (Start, Some(c)) if c.is_ascii_alphabetic() || c == '_' => {
                    self.state = Word(c.to_string())
                }

                // Inicio de una constante numérica, inicialmente cero;
                // el dígito se consume en el estado de constante entera
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer(0);
                    continue;
                }

                // Espacios en blanco y caracteres inesperados
                (Start, Some(c)) if c.is_ascii_whitespace() => (),
                (Start, Some(c)) => break Err(LexerError::BadChar(c)),

                // Emisión retardada de tokens cualesquiera
                (Complete(value), _) => break Ok(std::mem::replace(value, Eol)),

                // Los comentarios terminan con la línea, pero no la consumen
                (Comment, Some('\n')) => self.state = Complete(Eol),
                (Comment, Some(_)) => (),
                (Comment, None) => self.state = Start,

                // Operadores de dos caracteres
                (LeftAngle, Some('=')) => self.state = Complete(LessEqual),
                (LeftAngle, Some('<')) => self.state = Complete(ShiftLeft),
                (LeftAngle, _) => break Ok(Less),
                (RightAngle, Some('=')) => self.state = Complete(GreaterEqual),
                (RightAngle, Some('>')) => self.state = Complete(ShiftRight),
                (RightAngle, _) => break Ok(Greater),
                (Bang, Some('=')) => self.state = Complete(NotEqual),
                (Bang, _) => break Err(LexerError::Expected('=')),

                // Acumulación dígito por dígito de constantes enteras
                (Integer(accumulated), Some(digit)) if digit.is_ascii_digit() => {
                    let digit = digit as u32 - '0' as u32;

                    match accumulated
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(digit))
                        .filter(|&n| n <= INT_MAX)
                    {
                        Some(result) => *accumulated = result,
                        None => break Err(LexerError::IntOverflow),
                    }
                }

                // Si sigue algo que no es un dígito, la constante ha terminado
                (Integer(integer), _) => break Ok(IntLiteral(*integer as u16)),

                // Extensión de términos
                (Word(word), Some(c)) if is_word_char(c) => {
                    if word.len() == ID_MAX {
                        break Err(LexerError::IdTooLong);
                    }

                    word.push(c);
                }

                // Si sigue algo que no puede formar parte del término, ha terminado
                (Word(word), _) => {
                    if let Ok(keyword) = self::Keyword::from_str(word) {
                        break Ok(Keyword(keyword));
                    } else {
                        break Ok(Id(Identifier(Rc::from(std::mem::take(word)))));
                    }
                }
            }

            // Si no hubo `continue`, aquí se consume el carácter que
            // se observó con lookahead anteriormente
            if let Some(Ok((_, next_position))) = self.source.next() {
                last_accepted = std::mem::replace(&mut self.next, next_position);
            }
        };

        token.map(|token| Some((token, last_accepted)))
    }
}

impl<S: Iterator<Item = SourceChar>> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some((token, last_accepted))) => {
                self.state = State::Start;

                let location = Location::span(self.start.clone(), &last_accepted);
                Some(Ok(Located::at(token, location)))
            }

            Err(error) => {
                self.state = State::Error;
                Some(Err(Located::at(error, self.next.clone())))
            }
        }
    }
}

/// Determina si un carácter puede pertenecer a un término.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;

    fn lex(text: &str) -> Vec<Token> {
        let (start, chars) = source::chars(text.as_bytes(), "test.sl");
        Lexer::new(start, chars)
            .try_exhaustive()
            .unwrap()
            .into_iter()
            .map(Located::into_inner)
            .collect()
    }

    fn id(name: &str) -> Token {
        Token::Id(Identifier(Rc::from(name)))
    }

    #[test]
    fn keywords_ignore_case() {
        assert_eq!(
            lex("VAR Byte x"),
            vec![
                Token::Keyword(Keyword::Var),
                Token::Keyword(Keyword::Byte),
                id("x"),
                Token::Eol
            ]
        );
    }

    #[test]
    fn comments_keep_line_ends() {
        assert_eq!(
            lex("a = 1 # comment\n\nb"),
            vec![
                id("a"),
                Token::Equal,
                Token::IntLiteral(1),
                Token::Eol,
                Token::Eol,
                id("b"),
                Token::Eol
            ]
        );
    }

    #[test]
    fn two_character_operators() {
        use Token::*;

        assert_eq!(
            lex("a<=b<<2>c!=d>>1<e>=f"),
            vec![
                id("a"),
                LessEqual,
                id("b"),
                ShiftLeft,
                IntLiteral(2),
                Greater,
                id("c"),
                NotEqual,
                id("d"),
                ShiftRight,
                IntLiteral(1),
                Less,
                id("e"),
                GreaterEqual,
                id("f"),
                Eol
            ]
        );
    }

    #[test]
    fn integer_range() {
        assert_eq!(lex("65535"), vec![Token::IntLiteral(65535), Token::Eol]);

        let (start, chars) = source::chars("65536\nx @\n".as_bytes(), "test.sl");
        let errors = Lexer::new(start, chars).try_exhaustive().unwrap_err();

        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0].val(), LexerError::IntOverflow));
        assert!(matches!(errors[1].val(), LexerError::BadChar('@')));
        assert_eq!(errors[1].location().line(), 2);
    }

    #[test]
    fn token_locations() {
        let (start, chars) = source::chars("  while x\n".as_bytes(), "test.sl");
        let tokens = Lexer::new(start, chars).try_exhaustive().unwrap();

        assert_eq!(tokens[0].location().start().column(), 3);
        assert_eq!(tokens[0].location().line(), 1);
    }
}
