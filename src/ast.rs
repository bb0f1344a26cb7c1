//! The syntax tree consumed by the evaluation core.
//!
//! Trees are produced by an external parser; the registry and evaluator only
//! borrow them, so a tree must outlive every registry it is imported into.
//! Every node carries the [`Span`] it was parsed from.

use crate::source::{Source, Span};

/// A parsed manifest or template.
///
/// `parameters` is present for EPP templates with a parameter block; plain
/// manifests leave it `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxTree {
    pub source: Source,
    pub statements: Vec<Expr>,
    pub parameters: Option<Vec<Parameter>>,
}

impl SyntaxTree {
    pub fn new(source: Source, statements: Vec<Expr>) -> SyntaxTree {
        SyntaxTree {
            source,
            statements,
            parameters: None,
        }
    }

    pub fn path(&self) -> &str {
        self.source.path()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `->`
    InEdge,
    /// `~>`
    InEdgeSubscribe,
    /// `<-`
    OutEdge,
    /// `<~`
    OutEdgeSubscribe,
    Assignment,
    Or,
    And,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    Equals,
    NotEquals,
    LeftShift,
    RightShift,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Match,
    NotMatch,
    In,
}

impl core::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            BinaryOp::InEdge => "->",
            BinaryOp::InEdgeSubscribe => "~>",
            BinaryOp::OutEdge => "<-",
            BinaryOp::OutEdgeSubscribe => "<~",
            BinaryOp::Assignment => "=",
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Match => "=~",
            BinaryOp::NotMatch => "!~",
            BinaryOp::In => "in",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    LogicalNot,
    Splat,
}

/// The declaration form of a resource expression: bare, `@` or `@@`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceForm {
    Realized,
    Virtual,
    Exported,
}

/// `=>` assigns; `+>` merges into an existing value (overrides only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeOp {
    Assignment,
    Append,
}

impl core::fmt::Display for AttributeOp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            AttributeOp::Assignment => "=>",
            AttributeOp::Append => "+>",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeExpr {
    pub name_span: Span,
    pub name: String,
    pub op: AttributeOp,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBody {
    pub span: Span,
    pub title: Expr,
    pub attributes: Vec<AttributeExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub span: Span,
    pub name: String,
    pub type_expr: Option<Expr>,
    pub default: Option<Expr>,
}

impl Parameter {
    pub fn new(span: Span, name: &str) -> Parameter {
        Parameter {
            span,
            name: name.to_string(),
            type_expr: None,
            default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub span: Span,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassExpr {
    pub span: Span,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub parent: Option<String>,
    pub body: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefinedTypeExpr {
    pub span: Span,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeMatcher {
    /// A literal hostname, matched case-insensitively.
    Name(String),
    /// A regex over the node name.
    Regex(String),
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeExpr {
    pub span: Span,
    pub matchers: Vec<NodeMatcher>,
    pub body: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Equals,
    NotEquals,
}

/// The predicate of a collector expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Attribute {
        span: Span,
        name: String,
        op: QueryOp,
        value: Box<Expr>,
    },
    And(Box<Query>, Box<Query>),
    Or(Box<Query>, Box<Query>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorKind {
    /// `<| |>` — realizes matching virtual resources.
    All,
    /// `<<| |>>` — collects exported resources.
    Exported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorExpr {
    pub span: Span,
    pub type_name: String,
    pub kind: CollectorKind,
    pub query: Option<Query>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOperand {
    pub op: BinaryOp,
    pub op_span: Span,
    pub operand: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Proposition {
    pub span: Span,
    pub options: Vec<Expr>,
    pub body: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Elsif {
    pub span: Span,
    pub conditional: Expr,
    pub body: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorCase {
    pub span: Span,
    pub option: Expr,
    pub result: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Undef(Span),
    Default(Span),
    Boolean(Span, bool),
    Integer(Span, i64),
    Float(Span, f64),
    String(Span, String),
    Regex(Span, String),
    Variable(Span, String),
    /// A bare word or name; evaluates to a string.
    Name(Span, String),
    /// A TitleCase type reference such as `File` or `Integer`.
    TypeRef(Span, String),
    Array {
        span: Span,
        items: Vec<Expr>,
    },
    Hash {
        span: Span,
        entries: Vec<(Expr, Expr)>,
    },
    /// A flat chain of binary operands; the evaluator applies precedence
    /// climbing over it.
    Operation {
        span: Span,
        first: Box<Expr>,
        rest: Vec<BinaryOperand>,
    },
    Unary {
        span: Span,
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Case {
        span: Span,
        conditional: Box<Expr>,
        propositions: Vec<Proposition>,
    },
    If {
        span: Span,
        conditional: Box<Expr>,
        body: Vec<Expr>,
        elsifs: Vec<Elsif>,
        else_body: Option<Vec<Expr>>,
    },
    Unless {
        span: Span,
        conditional: Box<Expr>,
        body: Vec<Expr>,
        else_body: Option<Vec<Expr>>,
    },
    Selector {
        span: Span,
        operand: Box<Expr>,
        cases: Vec<SelectorCase>,
    },
    Access {
        span: Span,
        operand: Box<Expr>,
        arguments: Vec<Expr>,
    },
    FunctionCall {
        span: Span,
        name: String,
        arguments: Vec<Expr>,
        lambda: Option<Lambda>,
    },
    /// Postfix call form: `$receiver.name(args) |...| { ... }`.
    MethodCall {
        span: Span,
        receiver: Box<Expr>,
        name: String,
        arguments: Vec<Expr>,
        lambda: Option<Lambda>,
    },
    Resource {
        span: Span,
        form: ResourceForm,
        type_expr: Box<Expr>,
        bodies: Vec<ResourceBody>,
    },
    ResourceOverride {
        span: Span,
        reference: Box<Expr>,
        attributes: Vec<AttributeExpr>,
    },
    Class(ClassExpr),
    DefinedType(DefinedTypeExpr),
    Node(NodeExpr),
    Collector(CollectorExpr),
    /// `<%= expr %>` inside an EPP template.
    EppRender {
        span: Span,
        expression: Box<Expr>,
    },
    EppRenderBlock {
        span: Span,
        body: Vec<Expr>,
    },
    /// Literal template text between tags.
    EppRenderString {
        span: Span,
        text: String,
    },
}

impl Expr {
    pub fn span(&self) -> &Span {
        use Expr::*;
        match self {
            Undef(span)
            | Default(span)
            | Boolean(span, _)
            | Integer(span, _)
            | Float(span, _)
            | String(span, _)
            | Regex(span, _)
            | Variable(span, _)
            | Name(span, _)
            | TypeRef(span, _) => span,
            Array { span, .. }
            | Hash { span, .. }
            | Operation { span, .. }
            | Unary { span, .. }
            | Case { span, .. }
            | If { span, .. }
            | Unless { span, .. }
            | Selector { span, .. }
            | Access { span, .. }
            | FunctionCall { span, .. }
            | MethodCall { span, .. }
            | Resource { span, .. }
            | ResourceOverride { span, .. }
            | Collector(CollectorExpr { span, .. })
            | EppRender { span, .. }
            | EppRenderBlock { span, .. }
            | EppRenderString { span, .. } => span,
            Class(c) => &c.span,
            DefinedType(d) => &d.span,
            Node(n) => &n.span,
        }
    }

    pub fn is_splat(&self) -> bool {
        matches!(
            self,
            Expr::Unary {
                op: UnaryOp::Splat,
                ..
            }
        )
    }
}
