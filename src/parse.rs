//! Análisis sintáctico.
//!
//! El parser es un iterador "pull": cada llamada a
//! [`Parser::next_declaration`] consume los tokens de exactamente una
//! declaración de nivel superior y construye sus nodos en una arena
//! nueva. Las declaraciones `const` se resuelven aquí mismo y nunca
//! llegan al generador.
//!
//! Los bloques anidados (`if`, `else`, `while`) se llevan en una pila
//! explícita de bloques abiertos; ningún estado de anidamiento escapa
//! de una llamada a `next_declaration`.

use std::{collections::HashMap, iter::Peekable, mem};
use thiserror::Error;

use crate::{
    ast::*,
    intern::{Interner, NameId},
    lex::{Identifier, Keyword, Token},
    source::{Located, Location},
};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Expected {0}, none was found instead")]
    MissingToken(Token),

    #[error("Expected identifier, found {0}")]
    ExpectedId(Token),

    #[error("Expected any of `var`, `struct`, `fun`, `extern` or `const`, found {0}")]
    ExpectedDeclaration(Token),

    #[error("Expected a statement, found {0}")]
    ExpectedStatement(Token),

    #[error("Expected a type, found {0}")]
    ExpectedType(Token),

    #[error("Expected an expression, found {0}")]
    ExpectedExpr(Token),

    #[error("Expected an integer constant, found {0}")]
    ExpectedConstant(Token),

    #[error("Comparisons cannot be chained")]
    ChainedComparison,

    #[error("`else` without a matching `if`")]
    ElseWithoutIf,

    #[error("Block is never closed, expected `end`")]
    Unterminated,

    #[error("Initializers are not allowed here")]
    UnexpectedInitializer,

    #[error("Abrupt end of program")]
    UnexpectedEof,
}

type Parse<T> = Result<T, Located<ParserError>>;

/// Parser de declaraciones sobre un flujo de tokens.
pub struct Parser<I: Iterator<Item = Located<Token>>> {
    tokens: Peekable<I>,
    last_known: Location,
    constants: HashMap<NameId, u16>,
}

impl<I: Iterator<Item = Located<Token>>> Parser<I> {
    pub fn new(tokens: I) -> Self {
        Parser {
            tokens: tokens.peekable(),
            last_known: Location::default(),
            constants: HashMap::new(),
        }
    }

    /// Obtiene la siguiente declaración de nivel superior, o `None` al
    /// final del programa.
    pub fn next_declaration(&mut self, names: &mut Interner) -> Parse<Option<Declaration>> {
        Unit {
            parser: self,
            names,
            arena: Arena::default(),
        }
        .declaration()
    }

    fn peek(&mut self) -> Option<&Token> {
        self.tokens.peek().map(Located::val)
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        match self.tokens.next() {
            Some(token) => {
                self.last_known = token.location().clone();
                Ok(token)
            }

            None => self.fail(ParserError::UnexpectedEof),
        }
    }

    /// Consume el siguiente token solo si es igual a `token`.
    fn accept(&mut self, token: &Token) -> bool {
        if self.peek() != Some(token) {
            return false;
        }

        if let Some(token) = self.tokens.next() {
            self.last_known = token.location().clone();
        }

        true
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        match self.next().map(Located::into_inner) {
            Ok(found) if found == token => Ok(()),
            Ok(found) => self.fail(ParserError::UnexpectedToken(token, found)),
            Err(_) => self.fail(ParserError::MissingToken(token)),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    /// Fin de línea obligatorio; el final del archivo también cuenta.
    fn eol(&mut self) -> Parse<()> {
        match self.peek() {
            None => Ok(()),
            Some(_) => self.expect(Token::Eol),
        }
    }

    fn skip_eols(&mut self) {
        while self.accept(&Token::Eol) {}
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Located::at(error, self.last_known.clone()))
    }
}

/// Estado de construcción de una sola declaración.
struct Unit<'p, 'n, I: Iterator<Item = Located<Token>>> {
    parser: &'p mut Parser<I>,
    names: &'n mut Interner,
    arena: Arena,
}

/// Bloque aún abierto dentro de un cuerpo de función.
struct OpenBlock {
    frame: Frame,
    location: Location,
    statements: Vec<NodeId>,
}

#[derive(Copy, Clone)]
enum Frame {
    Body,
    If(NodeId),
    Else { cond: NodeId, then: NodeId },
    While(NodeId),
}

impl<I: Iterator<Item = Located<Token>>> Unit<'_, '_, I> {
    fn declaration(mut self) -> Parse<Option<Declaration>> {
        loop {
            self.parser.skip_eols();
            if self.parser.peek().is_none() {
                return Ok(None);
            }

            let (location, token) = self.parser.next()?.split();
            let kind = match token {
                Token::Keyword(Keyword::Const) => {
                    self.constant()?;
                    continue;
                }

                Token::Keyword(Keyword::Var) => DeclKind::Variable(self.var_decl(true)?),
                Token::Keyword(Keyword::Struct) => DeclKind::Struct(self.structure()?),
                Token::Keyword(Keyword::Fun) => DeclKind::Function(self.function(&location, true)?),

                Token::Keyword(Keyword::Extern) => {
                    self.parser.keyword(Keyword::Fun)?;
                    DeclKind::Function(self.function(&location, false)?)
                }

                other => return self.parser.fail(ParserError::ExpectedDeclaration(other)),
            };

            return Ok(Some(Declaration {
                arena: self.arena,
                location,
                kind,
            }));
        }
    }

    fn constant(&mut self) -> Parse<()> {
        let name = self.id()?;
        let value = self.constant_value()?;
        self.parser.eol()?;

        self.parser.constants.insert(name, value);
        Ok(())
    }

    fn constant_value(&mut self) -> Parse<u16> {
        match self.parser.next()?.into_inner() {
            Token::IntLiteral(value) => Ok(value),
            Token::Id(id) => match self.constant_of(&id) {
                Some(value) => Ok(value),
                None => self.parser.fail(ParserError::ExpectedConstant(Token::Id(id))),
            },

            other => self.parser.fail(ParserError::ExpectedConstant(other)),
        }
    }

    fn constant_of(&self, id: &Identifier) -> Option<u16> {
        self.names
            .lookup(id.as_ref())
            .and_then(|name| self.parser.constants.get(&name))
            .copied()
    }

    fn var_decl(&mut self, allow_init: bool) -> Parse<VarDecl> {
        let (ty, name) = self.typed_name()?;

        let init = if self.parser.accept(&Token::Equal) {
            if !allow_init {
                return self.parser.fail(ParserError::UnexpectedInitializer);
            }

            Some(self.initializer()?)
        } else {
            None
        };

        self.parser.eol()?;
        Ok(VarDecl { name, ty, init })
    }

    fn typed_name(&mut self) -> Parse<(TypeDesc, NameId)> {
        let ty = self.type_desc()?;
        let name = self.id()?;

        Ok((ty, name))
    }

    fn type_desc(&mut self) -> Parse<TypeDesc> {
        let shape = if self.parser.accept(&Token::Keyword(Keyword::Array)) {
            // Un identificador tras `array` es una longitud solo si es constante
            let length = match self.parser.peek().cloned() {
                Some(Token::IntLiteral(_)) => Some(self.constant_value()?),
                Some(Token::Id(id)) if self.constant_of(&id).is_some() => {
                    Some(self.constant_value()?)
                }

                _ => None,
            };

            Shape::Array(length)
        } else {
            Shape::Single
        };

        let element = match self.parser.next()?.into_inner() {
            Token::Keyword(keyword) => match scalar_keyword(keyword) {
                Some(scalar) => Element::Scalar(scalar),
                None => {
                    let found = Token::Keyword(keyword);
                    return self.parser.fail(ParserError::ExpectedType(found));
                }
            },

            Token::Id(id) => Element::Struct(self.names.intern(id.as_ref())),
            other => return self.parser.fail(ParserError::ExpectedType(other)),
        };

        Ok(TypeDesc { shape, element })
    }

    fn initializer(&mut self) -> Parse<Init> {
        if !self.parser.accept(&Token::OpenSquare) {
            return Ok(Init::Expr(self.expr()?));
        }

        // Las listas pueden extenderse por varias líneas
        let mut items = Vec::new();
        loop {
            self.parser.skip_eols();
            if self.parser.accept(&Token::CloseSquare) {
                break Ok(Init::List(items));
            }

            items.push(self.expr()?);
            self.parser.skip_eols();

            if !self.parser.accept(&Token::Comma) {
                self.parser.skip_eols();
                self.parser.expect(Token::CloseSquare)?;
                break Ok(Init::List(items));
            }
        }
    }

    fn structure(&mut self) -> Parse<StructDecl> {
        let name = self.id()?;
        self.parser.eol()?;

        let mut fields = Vec::new();
        loop {
            self.parser.skip_eols();
            if self.parser.peek().is_none() {
                return self.parser.fail(ParserError::Unterminated);
            }

            if self.parser.accept(&Token::Keyword(Keyword::End)) {
                self.parser.eol()?;
                break Ok(StructDecl { name, fields });
            }

            self.parser.keyword(Keyword::Var)?;
            fields.push(self.var_decl(false)?);
        }
    }

    fn function(&mut self, location: &Location, with_body: bool) -> Parse<FunctionDecl> {
        let name = self.id()?;

        self.parser.expect(Token::OpenParen)?;
        let mut params = Vec::new();
        if !self.parser.accept(&Token::CloseParen) {
            loop {
                let (ty, name) = self.typed_name()?;
                params.push(VarDecl {
                    name,
                    ty,
                    init: None,
                });

                if !self.parser.accept(&Token::Comma) {
                    self.parser.expect(Token::CloseParen)?;
                    break;
                }
            }
        }

        let returns = match self.parser.peek() {
            Some(&Token::Keyword(keyword)) => scalar_keyword(keyword),
            _ => None,
        };

        if returns.is_some() {
            self.parser.next()?;
        }

        self.parser.eol()?;
        let body = if with_body {
            Some(self.body(location.clone())?)
        } else {
            None
        };

        Ok(FunctionDecl {
            name,
            params,
            returns: returns.unwrap_or(Scalar::Word),
            body,
        })
    }

    fn body(&mut self, location: Location) -> Parse<NodeId> {
        let mut open = vec![OpenBlock {
            frame: Frame::Body,
            location,
            statements: Vec::new(),
        }];

        loop {
            self.parser.skip_eols();
            if self.parser.peek().is_none() {
                let location = match open.last() {
                    Some(block) => block.location.clone(),
                    None => self.parser.last_known.clone(),
                };

                return Err(Located::at(ParserError::Unterminated, location));
            }

            let (location, token) = self.parser.next()?.split();
            let statement = match token {
                Token::Keyword(Keyword::End) => {
                    self.parser.eol()?;

                    let Some(block) = open.pop() else {
                        return self.parser.fail(ParserError::Unterminated);
                    };

                    let node = self.close(block);
                    match open.last_mut() {
                        Some(parent) => {
                            parent.statements.push(node);
                            continue;
                        }

                        None => return Ok(node),
                    }
                }

                Token::Keyword(Keyword::Else) => {
                    self.parser.eol()?;

                    let block = match open.last_mut() {
                        Some(block) => block,
                        None => return self.parser.fail(ParserError::Unterminated),
                    };

                    let Frame::If(cond) = block.frame else {
                        return Err(Located::at(ParserError::ElseWithoutIf, location));
                    };

                    let statements = mem::take(&mut block.statements);
                    let then = self
                        .arena
                        .alloc(NodeKind::Block(statements), block.location.clone());

                    block.frame = Frame::Else { cond, then };
                    continue;
                }

                Token::Keyword(keyword @ (Keyword::If | Keyword::While)) => {
                    let cond = self.expr()?;
                    self.parser.eol()?;

                    let frame = match keyword {
                        Keyword::If => Frame::If(cond),
                        _ => Frame::While(cond),
                    };

                    open.push(OpenBlock {
                        frame,
                        location,
                        statements: Vec::new(),
                    });

                    continue;
                }

                Token::Keyword(Keyword::Var) => {
                    let decl = self.var_decl(true)?;
                    self.arena.alloc(NodeKind::Var(decl), location)
                }

                Token::Keyword(Keyword::Return) => {
                    let value = match self.parser.peek() {
                        None | Some(Token::Eol) => None,
                        Some(_) => Some(self.expr()?),
                    };

                    self.parser.eol()?;
                    self.arena.alloc(NodeKind::Return(value), location)
                }

                Token::Id(id) => {
                    let statement = self.id_statement(&id, location)?;
                    self.parser.eol()?;
                    statement
                }

                other => return self.parser.fail(ParserError::ExpectedStatement(other)),
            };

            if let Some(block) = open.last_mut() {
                block.statements.push(statement);
            }
        }
    }

    /// Cierra un bloque con `end` y construye su nodo.
    fn close(&mut self, block: OpenBlock) -> NodeId {
        let OpenBlock {
            frame,
            location,
            statements,
        } = block;

        let body = self
            .arena
            .alloc(NodeKind::Block(statements), location.clone());

        let kind = match frame {
            Frame::Body => return body,
            Frame::If(cond) => NodeKind::If { cond, body },
            Frame::While(cond) => NodeKind::While { cond, body },
            Frame::Else { cond, then } => NodeKind::IfElse {
                cond,
                then,
                otherwise: body,
            },
        };

        self.arena.alloc(kind, location)
    }

    /// Asignación o llamada que inicia con un identificador.
    fn id_statement(&mut self, id: &Identifier, location: Location) -> Parse<NodeId> {
        let name = self.names.intern(id.as_ref());
        if self.parser.accept(&Token::OpenParen) {
            return self.call(name, location);
        }

        let target = self.lvalue(name, location)?;
        self.parser.expect(Token::Equal)?;
        let value = self.expr()?;

        let location = Location::span(
            self.arena[target].location.clone(),
            &self.arena[value].location,
        );

        Ok(self.arena.alloc(NodeKind::Assign { target, value }, location))
    }

    /// Argumentos de una llamada, con `(` ya consumido.
    fn call(&mut self, callee: NameId, location: Location) -> Parse<NodeId> {
        let mut args = Vec::new();
        if !self.parser.accept(&Token::CloseParen) {
            loop {
                args.push(self.expr()?);
                if !self.parser.accept(&Token::Comma) {
                    self.parser.expect(Token::CloseParen)?;
                    break;
                }
            }
        }

        let location = Location::span(location, &self.parser.last_known);
        Ok(self.arena.alloc(NodeKind::Call { callee, args }, location))
    }

    fn lvalue(&mut self, name: NameId, location: Location) -> Parse<NodeId> {
        let mut node = self.arena.alloc(NodeKind::Ident(name), location.clone());

        loop {
            let kind = if self.parser.accept(&Token::OpenSquare) {
                let index = self.expr()?;
                self.parser.expect(Token::CloseSquare)?;

                NodeKind::Index { base: node, index }
            } else if self.parser.accept(&Token::Period) {
                let field = self.id()?;
                NodeKind::Field { base: node, field }
            } else {
                break Ok(node);
            };

            let location = Location::span(location.clone(), &self.parser.last_known);
            node = self.arena.alloc(kind, location);
        }
    }

    fn expr(&mut self) -> Parse<NodeId> {
        self.binary(1)
    }

    /// Precedence climbing sobre los operadores binarios.
    fn binary(&mut self, min: u8) -> Parse<NodeId> {
        let mut left = self.primary()?;

        while let Some((op, precedence)) = self.parser.peek().and_then(binary_operator) {
            if precedence < min {
                break;
            }

            self.parser.next()?;
            let right = self.binary(precedence + 1)?;

            let location = Location::span(
                self.arena[left].location.clone(),
                &self.arena[right].location,
            );

            left = self.arena.alloc(NodeKind::Binary { op, left, right }, location);

            let chained = self.parser.peek().and_then(binary_operator);
            if op.is_comparison() && matches!(chained, Some((next, _)) if next.is_comparison()) {
                return self.parser.fail(ParserError::ChainedComparison);
            }
        }

        Ok(left)
    }

    fn primary(&mut self) -> Parse<NodeId> {
        let (location, token) = self.parser.next()?.split();
        match token {
            Token::IntLiteral(value) => Ok(self.arena.alloc(NodeKind::Number(value), location)),

            Token::OpenParen => {
                let inner = self.expr()?;
                self.parser.expect(Token::CloseParen)?;

                let location = Location::span(location, &self.parser.last_known);
                Ok(self.arena.alloc(NodeKind::Paren(inner), location))
            }

            Token::Id(id) => {
                if let Some(value) = self.constant_of(&id) {
                    return Ok(self.arena.alloc(NodeKind::Number(value), location));
                }

                let name = self.names.intern(id.as_ref());
                if self.parser.accept(&Token::OpenParen) {
                    self.call(name, location)
                } else {
                    self.lvalue(name, location)
                }
            }

            other => self.parser.fail(ParserError::ExpectedExpr(other)),
        }
    }

    fn id(&mut self) -> Parse<NameId> {
        match self.parser.next()?.into_inner() {
            Token::Id(id) => Ok(self.names.intern(id.as_ref())),
            other => self.parser.fail(ParserError::ExpectedId(other)),
        }
    }
}

fn scalar_keyword(keyword: Keyword) -> Option<Scalar> {
    match keyword {
        Keyword::Byte => Some(Scalar::Byte),
        Keyword::Word => Some(Scalar::Word),
        Keyword::SByte => Some(Scalar::SByte),
        Keyword::SWord => Some(Scalar::SWord),
        _ => None,
    }
}

/// Operador binario y su precedencia; mayor precedencia liga más fuerte.
fn binary_operator(token: &Token) -> Option<(BinOp, u8)> {
    let operator = match token {
        Token::Pipe => (BinOp::Or, 1),
        Token::Caret => (BinOp::Xor, 2),
        Token::Ampersand => (BinOp::And, 3),
        Token::Equal => (BinOp::Eq, 4),
        Token::NotEqual => (BinOp::Ne, 4),
        Token::Less => (BinOp::Lt, 4),
        Token::Greater => (BinOp::Gt, 4),
        Token::LessEqual => (BinOp::Le, 4),
        Token::GreaterEqual => (BinOp::Ge, 4),
        Token::ShiftLeft => (BinOp::Shl, 5),
        Token::ShiftRight => (BinOp::Shr, 5),
        Token::Plus => (BinOp::Add, 6),
        Token::Minus => (BinOp::Sub, 6),
        Token::Times => (BinOp::Mul, 7),
        _ => return None,
    };

    Some(operator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source};

    fn parse(text: &str) -> (Interner, Parse<Vec<Declaration>>) {
        let (start, chars) = source::chars(text.as_bytes(), "test.sl");
        let tokens = Lexer::new(start, chars).try_exhaustive().unwrap();

        let mut names = Interner::new();
        let mut parser = Parser::new(tokens.into_iter());

        let mut declarations = Vec::new();
        let result = loop {
            match parser.next_declaration(&mut names) {
                Ok(Some(declaration)) => declarations.push(declaration),
                Ok(None) => break Ok(declarations),
                Err(error) => break Err(error),
            }
        };

        (names, result)
    }

    fn statements(declaration: &Declaration) -> &[NodeId] {
        let body = match &declaration.kind {
            DeclKind::Function(FunctionDecl {
                body: Some(body), ..
            }) => *body,
            _ => panic!("not a function"),
        };

        match &declaration.arena[body].kind {
            NodeKind::Block(statements) => statements,
            _ => panic!("function body is not a block"),
        }
    }

    #[test]
    fn globals_and_structs() {
        let (names, result) = parse(
            "const N 4\n\
             var array N byte buf\n\
             var array byte ptr\n\
             struct P\n  var byte x\n  var array 2 word y\nend\n\
             var P p\n",
        );

        let declarations = result.unwrap();
        assert_eq!(declarations.len(), 4);

        match &declarations[0].kind {
            DeclKind::Variable(var) => {
                assert_eq!(names.text(var.name), "buf");
                assert_eq!(var.ty.shape, Shape::Array(Some(4)));
                assert_eq!(var.ty.element, Element::Scalar(Scalar::Byte));
            }

            _ => panic!("expected a variable"),
        }

        match &declarations[1].kind {
            DeclKind::Variable(var) => assert_eq!(var.ty.shape, Shape::Array(None)),
            _ => panic!("expected a variable"),
        }

        match &declarations[2].kind {
            DeclKind::Struct(decl) => {
                assert_eq!(decl.fields.len(), 2);
                assert_eq!(decl.fields[1].ty.shape, Shape::Array(Some(2)));
            }

            _ => panic!("expected a struct"),
        }

        match &declarations[3].kind {
            DeclKind::Variable(var) => {
                assert_eq!(var.ty.element, Element::Struct(names.lookup("P").unwrap()))
            }

            _ => panic!("expected a variable"),
        }
    }

    #[test]
    fn nested_blocks() {
        let (_, result) = parse(
            "fun main()\n\
             \x20 while a < 3\n\
             \x20   if a = 1\n\
             \x20     a = 2\n\
             \x20   else\n\
             \x20     a = 3\n\
             \x20   end\n\
             \x20 end\n\
             \x20 return\n\
             end\n",
        );

        let declarations = result.unwrap();
        let function = &declarations[0];
        let arena = &function.arena;

        let body = statements(function);
        assert_eq!(body.len(), 2);
        assert!(matches!(arena[body[1]].kind, NodeKind::Return(None)));

        let loop_body = match &arena[body[0]].kind {
            NodeKind::While { body, .. } => *body,
            _ => panic!("expected while"),
        };

        let inner = match &arena[loop_body].kind {
            NodeKind::Block(statements) => statements.clone(),
            _ => panic!("expected block"),
        };

        assert_eq!(inner.len(), 1);
        match &arena[inner[0]].kind {
            NodeKind::IfElse { then, otherwise, .. } => {
                assert!(matches!(&arena[*then].kind, NodeKind::Block(s) if s.len() == 1));
                assert!(matches!(&arena[*otherwise].kind, NodeKind::Block(s) if s.len() == 1));
            }

            _ => panic!("expected if-else"),
        }
    }

    #[test]
    fn precedence() {
        let (_, result) = parse("fun f()\n  x = 1 + 2 * 3 << 1 & 7\nend\n");
        let declarations = result.unwrap();
        let arena = &declarations[0].arena;

        let value = match &arena[statements(&declarations[0])[0]].kind {
            NodeKind::Assign { value, .. } => *value,
            _ => panic!("expected assignment"),
        };

        // ((1 + (2 * 3)) << 1) & 7
        let NodeKind::Binary { op, left, .. } = &arena[value].kind else {
            panic!("expected binary");
        };

        assert_eq!(*op, BinOp::And);
        let NodeKind::Binary { op, left, .. } = &arena[*left].kind else {
            panic!("expected binary");
        };

        assert_eq!(*op, BinOp::Shl);
        let NodeKind::Binary { op, right, .. } = &arena[*left].kind else {
            panic!("expected binary");
        };

        assert_eq!(*op, BinOp::Add);
        assert!(matches!(arena[*right].kind, NodeKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn function_signatures() {
        let (names, result) =
            parse("extern fun putc(byte c)\nfun get(array byte v, P p) byte\n  return v[0]\nend\n");

        let declarations = result.unwrap();
        match &declarations[0].kind {
            DeclKind::Function(function) => {
                assert!(function.body.is_none());
                assert_eq!(function.returns, Scalar::Word);
            }

            _ => panic!("expected a function"),
        }

        match &declarations[1].kind {
            DeclKind::Function(function) => {
                assert_eq!(names.text(function.name), "get");
                assert_eq!(function.returns, Scalar::Byte);
                assert_eq!(function.params.len(), 2);
                assert_eq!(function.params[0].ty.shape, Shape::Array(None));
            }

            _ => panic!("expected a function"),
        }
    }

    #[test]
    fn array_initializer_spans_lines() {
        let (_, result) = parse("var array 3 byte t = [\n  1,\n  2,\n  3\n]\nvar byte z\n");
        let declarations = result.unwrap();

        assert_eq!(declarations.len(), 2);
        match &declarations[0].kind {
            DeclKind::Variable(VarDecl {
                init: Some(Init::List(items)),
                ..
            }) => assert_eq!(items.len(), 3),
            _ => panic!("expected an initialized array"),
        }
    }

    #[test]
    fn block_errors() {
        let (_, result) = parse("fun f()\n  else\nend\n");
        assert!(matches!(result.unwrap_err().val(), ParserError::ElseWithoutIf));

        let (_, result) = parse("fun f()\n  while 1\n    x = 1\nend\n");
        let error = result.unwrap_err();
        assert!(matches!(error.val(), ParserError::Unterminated));

        let (_, result) = parse("fun f()\n  if a < b < c\n  end\nend\n");
        assert!(matches!(result.unwrap_err().val(), ParserError::ChainedComparison));
    }
}
