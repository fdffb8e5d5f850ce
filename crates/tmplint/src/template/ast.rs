//! directive and expression tree
//!
//! The tree keeps enough structure for static analysis and for the small renderer used by the
//! computed layer. Whitespace trim markers are already applied to [Node::Text] by the scanner.

/// 1-based position of the first character of a construct
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize,
)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Root {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(Text),
    /// `{{ pipeline }}`
    Action(Action),
    If(If),
    Range(Range),
    With(With),
    /// `{{ $x := pipeline }}` or `{{ $x = pipeline }}`
    Bind(Bind),
    Define(Define),
    /// `{{ template "name" pipeline }}`
    Include(Include),
    Comment(Location),
    Break(Location),
    Continue(Location),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    pub text: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub pipeline: Pipeline,
    pub location: Location,
}

/// One `if` or `else if` arm
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// `if $x := pipeline`
    pub variable: Option<String>,
    pub condition: Pipeline,
    pub body: Vec<Node>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct If {
    /// first arm is the `if`, the rest are `else if`
    pub branches: Vec<Branch>,
    pub otherwise: Option<Vec<Node>>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub key: Option<String>,
    pub value: Option<String>,
    pub source: Pipeline,
    pub body: Vec<Node>,
    pub otherwise: Option<Vec<Node>>,
    pub location: Location,
}

/// `with`; an `else with` arm is stored as a nested [With] inside `otherwise`
#[derive(Debug, Clone, PartialEq)]
pub struct With {
    pub variable: Option<String>,
    pub target: Pipeline,
    pub body: Vec<Node>,
    pub otherwise: Option<Vec<Node>>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    pub variable: String,
    /// `:=` declares, `=` reassigns
    pub declare: bool,
    pub pipeline: Pipeline,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Define {
    pub name: String,
    pub body: Vec<Node>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    pub name: String,
    pub data: Option<Pipeline>,
    pub location: Location,
}

/// `a | f b | g`: the result of each stage is passed on to the next
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Expr>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(FieldPath),
    Variable(VariableRef),
    Literal(Literal, Location),
    /// parenthesized
    Pipeline(Box<Pipeline>),
    Call(Call),
    /// anything outside the supported grammar; never resolvable
    Opaque(Opaque),
}

impl Expr {
    pub fn location(&self) -> Location {
        match self {
            Expr::Field(field) => field.location,
            Expr::Variable(var) => var.location,
            Expr::Literal(_, location) => *location,
            Expr::Pipeline(pipeline) => pipeline.location,
            Expr::Call(call) => call.location,
            Expr::Opaque(opaque) => opaque.location,
        }
    }
}

/// `.a.b`, `$x.a.b`, `(pipeline).a`
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    pub base: Base,
    pub steps: Vec<String>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Base {
    /// the implicit context `.`
    Dot,
    /// `$name`, or `$` for the root
    Variable(String),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableRef {
    pub name: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    /// kept as written, chars are stored as their code point
    Number(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub function: String,
    pub args: Vec<Expr>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Opaque {
    pub text: String,
    pub children: Vec<Expr>,
    pub location: Location,
}
