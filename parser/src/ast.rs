//! Syntax tree for the reference front-end language
//!
//! Every node carries a byte-offset [`Span`] into the file it was parsed
//! from; the typed-AST lowering turns these into line/column positions.

/// Byte range in the parsed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// A parsed file
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub module: Option<ModuleDecl>,
    pub imports: Vec<Import>,
    pub items: Vec<Item>,
    pub span: Span,
}

/// `module "path";`
#[derive(Debug, Clone)]
pub struct ModuleDecl {
    pub path: String,
    pub span: Span,
}

/// `import "path" as alias;`
#[derive(Debug, Clone)]
pub struct Import {
    pub path: String,
    pub alias: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Item {
    Type(TypeDecl),
    Function(FunctionDecl),
    Global(GlobalDecl),
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub name: String,
    pub kind: TypeDeclKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypeDeclKind {
    /// `type Name = Other;`
    Alias(TypeExpr),
    /// `type Name { fn method(..) -> ..; }`
    Methods(Vec<MethodDecl>),
}

/// A method signature inside a type declaration
#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Vec<TypeExpr>,
    pub span: Span,
}

/// `fn name(params) -> ret { body }`; a missing body is an external declaration
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Vec<TypeExpr>,
    pub body: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
    pub variadic: bool,
    pub span: Span,
}

/// `var name: Type = value;` at file level
#[derive(Debug, Clone)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypeExprKind {
    Named(String),
    Tuple(Vec<TypeExpr>),
    Slice(Box<TypeExpr>),
    Function {
        params: Vec<TypeExpr>,
        returns: Vec<TypeExpr>,
    },
}

#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

/// Binding position on the left of `let` or in `for .. in`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Ident(String),
    Wildcard,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Let {
        patterns: Vec<(Pattern, Span)>,
        ty: Option<TypeExpr>,
        value: Expr,
    },
    /// `var name: Type;` inside a body
    Var {
        name: String,
        ty: TypeExpr,
    },
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    Expr(Expr),
    If {
        condition: Expr,
        then_block: Block,
        /// Either a `Block` statement or a nested `If`
        else_branch: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Block,
    },
    Loop {
        body: Block,
    },
    For {
        pattern: Pattern,
        iterable: Expr,
        body: Block,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
    },
    Return(Vec<Expr>),
    Defer(Expr),
    Panic(Option<Expr>),
    Break,
    Continue,
    Goto(String),
    Block(Block),
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub values: Vec<Expr>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Add,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Int(i64),
    Str(String),
    Bool(bool),
    Nil,
    Ident(String),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Field {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    FunctionLiteral {
        params: Vec<Param>,
        returns: Vec<TypeExpr>,
        body: Block,
    },
    /// `new Name { field: value }`
    Composite {
        type_name: String,
        fields: Vec<(String, Expr)>,
    },
}
