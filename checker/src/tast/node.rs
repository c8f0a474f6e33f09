//! Typed AST nodes
//!
//! Produced by [`super::ast_lowering`]. Every identifier is resolved to a
//! [`SymbolId`] (or marked unresolved) and every expression carries a
//! [`TypeId`]. Function literals are lifted into their own
//! [`TypedFunction`] and referenced by id from the enclosing body.

use source_map::{FileId, SourceMap, SourceSpan};

use super::id_types::{ExpressionId, FunctionId, StatementId, SymbolId, TypeId};
use super::symbols::SymbolTable;
use super::types::TypeTable;

/// A whole program: the unit every analysis pass reads
#[derive(Debug, Clone)]
pub struct TypedProgram {
    pub files: Vec<TypedFile>,
    /// Indexed by [`FunctionId`]
    pub functions: Vec<TypedFunction>,
    pub symbols: SymbolTable,
    pub types: TypeTable,
    pub source_map: SourceMap,
}

impl TypedProgram {
    pub fn function(&self, id: FunctionId) -> Option<&TypedFunction> {
        self.functions.get(id.index())
    }

    pub fn file(&self, file_id: FileId) -> Option<&TypedFile> {
        self.files.iter().find(|file| file.file_id == file_id)
    }

    /// Functions (declared and literals) that have a body
    pub fn functions_with_bodies(&self) -> impl Iterator<Item = &TypedFunction> {
        self.functions.iter().filter(|f| f.body.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct TypedImport {
    pub path: String,
    pub alias: Option<String>,
    pub span: SourceSpan,
}

impl TypedImport {
    /// Name the import is referred to by: the alias or the last path segment
    pub fn local_name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self.path.rsplit('/').next().unwrap_or(&self.path),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypedFile {
    pub file_id: FileId,
    pub name: String,
    pub module: Option<String>,
    pub imports: Vec<TypedImport>,
    /// Every function whose body lives in this file, literals included
    pub functions: Vec<FunctionId>,
    /// Types declared here; aliases contribute their target
    pub declared_types: Vec<TypeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Declared,
    Literal,
}

#[derive(Debug, Clone)]
pub struct TypedFunction {
    pub id: FunctionId,
    /// Symbol of a declared function; literals have none
    pub symbol: Option<SymbolId>,
    pub name: String,
    pub file_id: FileId,
    pub kind: FunctionKind,
    /// Enclosing function of a literal
    pub parent: Option<FunctionId>,
    pub params: Vec<SymbolId>,
    pub variadic: bool,
    pub results: Vec<TypeId>,
    /// `None` for external declarations
    pub body: Option<TypedBlock>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct TypedBlock {
    pub statements: Vec<TypedStatement>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct TypedStatement {
    pub id: StatementId,
    pub kind: TypedStatementKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum TypedStatementKind {
    /// `let` (declaration) or assignment
    Bind {
        targets: Vec<AssignTarget>,
        value: TypedExpression,
        declaration: bool,
    },
    /// `var x: T;` without initializer
    VarDecl { symbol: SymbolId },
    Expression(TypedExpression),
    If {
        condition: TypedExpression,
        then_block: TypedBlock,
        else_branch: Option<Box<TypedStatement>>,
    },
    While {
        condition: TypedExpression,
        body: TypedBlock,
    },
    Loop {
        body: TypedBlock,
    },
    For {
        binding: Option<SymbolId>,
        iterable: TypedExpression,
        body: TypedBlock,
    },
    Switch {
        discriminant: TypedExpression,
        cases: Vec<TypedSwitchCase>,
        default: Option<TypedBlock>,
    },
    Return(Vec<TypedExpression>),
    Defer(TypedExpression),
    Panic(Option<TypedExpression>),
    Break,
    Continue,
    Goto(String),
    Block(TypedBlock),
}

#[derive(Debug, Clone)]
pub struct TypedSwitchCase {
    pub values: Vec<TypedExpression>,
    pub body: TypedBlock,
    pub span: SourceSpan,
}

/// Left-hand position of a binding statement
#[derive(Debug, Clone)]
pub struct AssignTarget {
    pub kind: AssignTargetKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum AssignTargetKind {
    /// `_`
    Discard,
    Symbol(SymbolId),
    /// Field or index store
    Place(TypedExpression),
}

#[derive(Debug, Clone)]
pub struct TypedExpression {
    pub id: ExpressionId,
    pub kind: TypedExpressionKind,
    pub ty: TypeId,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int(i64),
    Str(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFunction {
    Append,
    Len,
}

impl BuiltinFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "append" => Some(BuiltinFunction::Append),
            "len" => Some(BuiltinFunction::Len),
            _ => None,
        }
    }
}

pub use parser::ast::{BinaryOp, UnaryOp};

#[derive(Debug, Clone)]
pub enum TypedExpressionKind {
    Literal(LiteralValue),
    Variable(SymbolId),
    /// Reference to a declared function
    Function(FunctionId),
    FunctionLiteral(FunctionId),
    Call {
        callee: Box<TypedExpression>,
        args: Vec<TypedExpression>,
    },
    MethodCall {
        receiver: Box<TypedExpression>,
        method: String,
        args: Vec<TypedExpression>,
    },
    Builtin {
        function: BuiltinFunction,
        args: Vec<TypedExpression>,
    },
    Field {
        object: Box<TypedExpression>,
        name: String,
    },
    Index {
        object: Box<TypedExpression>,
        index: Box<TypedExpression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<TypedExpression>,
        right: Box<TypedExpression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<TypedExpression>,
    },
    Composite {
        fields: Vec<(String, TypedExpression)>,
    },
    /// Name nobody declares; typed as unknown
    Unresolved(String),
}

impl TypedBlock {
    /// Visit every expression of the block, statements in order and each
    /// expression before its children
    pub fn visit_expressions<'a>(&'a self, visit: &mut dyn FnMut(&'a TypedExpression)) {
        for statement in &self.statements {
            statement.visit_expressions(visit);
        }
    }
}

impl TypedStatement {
    pub fn visit_expressions<'a>(&'a self, visit: &mut dyn FnMut(&'a TypedExpression)) {
        match &self.kind {
            TypedStatementKind::Bind { targets, value, .. } => {
                value.visit(visit);
                for target in targets {
                    if let AssignTargetKind::Place(place) = &target.kind {
                        place.visit(visit);
                    }
                }
            }
            TypedStatementKind::Expression(expr) | TypedStatementKind::Defer(expr) => expr.visit(visit),
            TypedStatementKind::If {
                condition,
                then_block,
                else_branch,
            } => {
                condition.visit(visit);
                then_block.visit_expressions(visit);
                if let Some(else_branch) = else_branch {
                    else_branch.visit_expressions(visit);
                }
            }
            TypedStatementKind::While { condition, body } => {
                condition.visit(visit);
                body.visit_expressions(visit);
            }
            TypedStatementKind::Loop { body } | TypedStatementKind::Block(body) => {
                body.visit_expressions(visit)
            }
            TypedStatementKind::For { iterable, body, .. } => {
                iterable.visit(visit);
                body.visit_expressions(visit);
            }
            TypedStatementKind::Switch {
                discriminant,
                cases,
                default,
            } => {
                discriminant.visit(visit);
                for case in cases {
                    for value in &case.values {
                        value.visit(visit);
                    }
                    case.body.visit_expressions(visit);
                }
                if let Some(default) = default {
                    default.visit_expressions(visit);
                }
            }
            TypedStatementKind::Return(values) => {
                for value in values {
                    value.visit(visit);
                }
            }
            TypedStatementKind::Panic(value) => {
                if let Some(value) = value {
                    value.visit(visit);
                }
            }
            TypedStatementKind::VarDecl { .. }
            | TypedStatementKind::Break
            | TypedStatementKind::Continue
            | TypedStatementKind::Goto(_) => {}
        }
    }
}

impl TypedExpression {
    /// Symbol this expression names directly
    pub fn as_symbol(&self) -> Option<SymbolId> {
        match self.kind {
            TypedExpressionKind::Variable(symbol) => Some(symbol),
            _ => None,
        }
    }

    /// Innermost variable of a field/index chain (`a.b[0].c` gives `a`)
    pub fn root_symbol(&self) -> Option<SymbolId> {
        match &self.kind {
            TypedExpressionKind::Variable(symbol) => Some(*symbol),
            TypedExpressionKind::Field { object, .. } | TypedExpressionKind::Index { object, .. } => {
                object.root_symbol()
            }
            _ => None,
        }
    }

    /// This expression, then its children recursively
    pub fn visit<'a>(&'a self, visit: &mut dyn FnMut(&'a TypedExpression)) {
        visit(self);
        for child in self.children() {
            child.visit(visit);
        }
    }

    pub fn is_short_circuit(&self) -> bool {
        matches!(
            self.kind,
            TypedExpressionKind::Binary {
                op: BinaryOp::And | BinaryOp::Or,
                ..
            }
        )
    }

    /// Direct sub-expressions in evaluation order; function literal bodies
    /// are separate functions and are not visited
    pub fn children(&self) -> Vec<&TypedExpression> {
        match &self.kind {
            TypedExpressionKind::Literal(_)
            | TypedExpressionKind::Variable(_)
            | TypedExpressionKind::Function(_)
            | TypedExpressionKind::FunctionLiteral(_)
            | TypedExpressionKind::Unresolved(_) => Vec::new(),
            TypedExpressionKind::Call { callee, args } => {
                std::iter::once(callee.as_ref()).chain(args.iter()).collect()
            }
            TypedExpressionKind::MethodCall { receiver, args, .. } => {
                std::iter::once(receiver.as_ref()).chain(args.iter()).collect()
            }
            TypedExpressionKind::Builtin { args, .. } => args.iter().collect(),
            TypedExpressionKind::Field { object, .. } => vec![object.as_ref()],
            TypedExpressionKind::Index { object, index } => vec![object.as_ref(), index.as_ref()],
            TypedExpressionKind::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            TypedExpressionKind::Unary { operand, .. } => vec![operand.as_ref()],
            TypedExpressionKind::Composite { fields } => fields.iter().map(|(_, value)| value).collect(),
        }
    }
}
