//! Árbol sintáctico.
//!
//! Cada declaración de nivel superior posee su propia [`Arena`] de
//! nodos. Las relaciones entre nodos se expresan con índices
//! ([`NodeId`]) y no con punteros, de modo que descartar una
//! [`Declaration`] libera todos sus nodos de una sola vez.

use std::{fmt, ops::Index};

use crate::{intern::NameId, source::Location};

/// Índice de un nodo dentro de su arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// Almacenamiento de nodos de una declaración.
#[derive(Default, Debug)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    /// Agrega un nodo y retorna su índice.
    pub fn alloc(&mut self, kind: NodeKind, location: Location) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind, location });
        id
    }
}

impl Index<NodeId> for Arena {
    type Output = Node;

    fn index(&self, NodeId(index): NodeId) -> &Node {
        &self.nodes[index as usize]
    }
}

/// Un nodo con su ubicación de origen.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub location: Location,
}

impl Node {
    /// Línea de código fuente que originó el nodo.
    pub fn line(&self) -> u32 {
        self.location.line()
    }
}

#[derive(Debug)]
pub enum NodeKind {
    /// Literal numérico.
    Number(u16),

    /// Referencia a una variable.
    Ident(NameId),

    /// `base[index]`
    Index { base: NodeId, index: NodeId },

    /// `base.field`
    Field { base: NodeId, field: NameId },

    Binary {
        op: BinOp,
        left: NodeId,
        right: NodeId,
    },

    Paren(NodeId),

    Call { callee: NameId, args: Vec<NodeId> },

    /// Declaración de variable local.
    Var(VarDecl),

    Assign { target: NodeId, value: NodeId },

    If { cond: NodeId, body: NodeId },

    IfElse {
        cond: NodeId,
        then: NodeId,
        otherwise: NodeId,
    },

    While { cond: NodeId, body: NodeId },

    /// Secuencia de sentencias.
    Block(Vec<NodeId>),

    Return(Option<NodeId>),
}

/// Operador binario.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinOp {
    /// Determina si el operador es una comparación.
    pub fn is_comparison(self) -> bool {
        use BinOp::*;
        matches!(self, Eq | Ne | Lt | Gt | Le | Ge)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinOp::*;
        let string = match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Shl => "<<",
            Shr => ">>",
            And => "&",
            Or => "|",
            Xor => "^",
            Eq => "=",
            Ne => "!=",
            Lt => "<",
            Gt => ">",
            Le => "<=",
            Ge => ">=",
        };

        fmt.write_str(string)
    }
}

/// Tipo escalar primitivo.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scalar {
    Byte,
    Word,
    SByte,
    SWord,
}

impl Scalar {
    /// Tamaño en bytes.
    pub fn size(self) -> u16 {
        match self {
            Scalar::Byte | Scalar::SByte => 1,
            Scalar::Word | Scalar::SWord => 2,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = match self {
            Scalar::Byte => "byte",
            Scalar::Word => "word",
            Scalar::SByte => "sbyte",
            Scalar::SWord => "sword",
        };

        fmt.write_str(string)
    }
}

/// Tipo de los elementos de una variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Element {
    Scalar(Scalar),
    Struct(NameId),
}

/// Forma de una variable: un solo elemento o un arreglo.
///
/// Un arreglo sin longitud es un puntero a datos ajenos.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    Single,
    Array(Option<u16>),
}

/// Descriptor de tipo.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TypeDesc {
    pub shape: Shape,
    pub element: Element,
}

impl TypeDesc {
    pub fn scalar(scalar: Scalar) -> Self {
        TypeDesc {
            shape: Shape::Single,
            element: Element::Scalar(scalar),
        }
    }

    /// Tipo escalar, si este descriptor corresponde a uno.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match (self.shape, self.element) {
            (Shape::Single, Element::Scalar(scalar)) => Some(scalar),
            _ => None,
        }
    }

    /// Un arreglo o estructura, que se pasa por referencia.
    pub fn is_aggregate(&self) -> bool {
        self.as_scalar().is_none()
    }

    /// Descriptor de un solo elemento de este tipo.
    pub fn element_type(&self) -> TypeDesc {
        TypeDesc {
            shape: Shape::Single,
            element: self.element,
        }
    }
}

/// Declaración de una variable, parámetro o campo.
#[derive(Debug)]
pub struct VarDecl {
    pub name: NameId,
    pub ty: TypeDesc,
    pub init: Option<Init>,
}

/// Inicializador de una variable.
#[derive(Debug)]
pub enum Init {
    Expr(NodeId),
    List(Vec<NodeId>),
}

#[derive(Debug)]
pub struct StructDecl {
    pub name: NameId,
    pub fields: Vec<VarDecl>,
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub name: NameId,
    pub params: Vec<VarDecl>,
    pub returns: Scalar,

    /// Nodo [`NodeKind::Block`] del cuerpo, o `None` para `extern`.
    pub body: Option<NodeId>,
}

#[derive(Debug)]
pub enum DeclKind {
    Variable(VarDecl),
    Struct(StructDecl),
    Function(FunctionDecl),
}

/// Una declaración de nivel superior junto con la arena que la respalda.
#[derive(Debug)]
pub struct Declaration {
    pub arena: Arena,
    pub location: Location,
    pub kind: DeclKind,
}
