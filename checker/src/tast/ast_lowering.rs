//! Lowering from the parser's syntax tree to the typed AST
//!
//! Runs in three passes over all files:
//!
//! 1. type declarations (named types, then aliases, then method sets),
//! 2. top-level values (function signatures and globals),
//! 3. function bodies, lifting every function literal into its own
//!    [`TypedFunction`].
//!
//! Problems are reported as diagnostics; lowering itself never fails; an
//! unresolved name becomes an [`TypedExpressionKind::Unresolved`] node of
//! unknown type.

use diagnostics::frontend::FrontendDiagnostics;
use diagnostics::Diagnostics;
use fxhash::{FxHashMap, FxHashSet};
use indexmap::IndexMap;
use log::{debug, trace};
use parser::ast;
use source_map::{FileId, SourceMap, SourceSpan};

use super::id_types::{ExpressionId, FunctionId, IdGenerator, StatementId, SymbolId, TypeId};
use super::node::*;
use super::symbols::{SymbolKind, SymbolTable};
use super::types::{BuiltinType, MethodSignature, TypeKind, TypeTable};

/// Result of lowering a set of parsed files
#[derive(Debug)]
pub struct LoweringOutput {
    pub program: TypedProgram,
    pub diagnostics: Diagnostics,
}

/// Lower parsed files registered in `source_map` into one program
pub fn lower_program(source_map: SourceMap, files: &[(FileId, ast::SourceFile)]) -> LoweringOutput {
    let mut lowering = AstLowering::new(&source_map, files);
    lowering.declare_types(files);
    lowering.declare_values(files);
    lowering.lower_bodies(files);
    let (typed_files, functions, symbols, types, diagnostics) = lowering.finish();

    debug!(
        "lowered {} files: {} functions, {} symbols, {} types",
        typed_files.len(),
        functions.len(),
        symbols.len(),
        types.len()
    );

    LoweringOutput {
        program: TypedProgram {
            files: typed_files,
            functions,
            symbols,
            types,
            source_map,
        },
        diagnostics,
    }
}

#[derive(Debug, Clone)]
struct FileContext {
    file_id: FileId,
    name: String,
    module: Option<String>,
    imports: Vec<TypedImport>,
}

impl FileContext {
    fn import_path(&self, local_name: &str) -> Option<&str> {
        self.imports
            .iter()
            .find(|import| import.local_name() == local_name)
            .map(|import| import.path.as_str())
    }
}

/// Top-level value visible by name
#[derive(Debug, Clone, Copy)]
enum TopLevel {
    Function(FunctionId),
    Global(SymbolId),
}

#[derive(Debug, Clone)]
struct TopLevelEntry {
    module: Option<String>,
    value: TopLevel,
}

/// Name scopes of one function body being lowered
#[derive(Debug)]
struct Frame {
    function: FunctionId,
    scopes: Vec<FxHashMap<String, SymbolId>>,
    literal_count: usize,
}

struct PendingAlias<'f> {
    name: &'f str,
    target: &'f ast::TypeExpr,
    context: usize,
    span: SourceSpan,
}

struct AstLowering<'a> {
    source_map: &'a SourceMap,
    contexts: Vec<FileContext>,
    current: usize,
    types: TypeTable,
    symbols: SymbolTable,
    functions: Vec<TypedFunction>,
    diagnostics: Diagnostics,
    expression_ids: IdGenerator<ExpressionId>,
    statement_ids: IdGenerator<StatementId>,
    top_level: IndexMap<String, Vec<TopLevelEntry>>,
    declared_type_names: FxHashMap<(Option<String>, String), SourceSpan>,
    file_types: Vec<Vec<TypeId>>,
    /// Declared functions in item order, consumed by the body pass
    declared_functions: Vec<FunctionId>,
    frames: Vec<Frame>,
}

impl<'a> AstLowering<'a> {
    fn new(source_map: &'a SourceMap, files: &[(FileId, ast::SourceFile)]) -> Self {
        let contexts = files
            .iter()
            .map(|(file_id, file)| FileContext {
                file_id: *file_id,
                name: source_map.file_name(*file_id).to_string(),
                module: file.module.as_ref().map(|m| m.path.clone()),
                imports: file
                    .imports
                    .iter()
                    .map(|import| TypedImport {
                        path: import.path.clone(),
                        alias: import.alias.clone(),
                        span: source_map.span(*file_id, import.span.start, import.span.end),
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();
        let file_count = contexts.len();

        Self {
            source_map,
            contexts,
            current: 0,
            types: TypeTable::new(),
            symbols: SymbolTable::new(),
            functions: Vec::new(),
            diagnostics: Diagnostics::new(),
            expression_ids: IdGenerator::new(),
            statement_ids: IdGenerator::new(),
            top_level: IndexMap::new(),
            declared_type_names: FxHashMap::default(),
            file_types: vec![Vec::new(); file_count],
            declared_functions: Vec::new(),
            frames: Vec::new(),
        }
    }

    fn context(&self) -> &FileContext {
        &self.contexts[self.current]
    }

    fn span(&self, span: ast::Span) -> SourceSpan {
        let file_id = self.context().file_id;
        self.source_map.span(file_id, span.start, span.end)
    }

    // =========================================================================
    // Pass 1: types
    // =========================================================================

    fn declare_types(&mut self, files: &[(FileId, ast::SourceFile)]) {
        let mut pending = Vec::new();
        let mut method_sets = Vec::new();

        for (index, (_, file)) in files.iter().enumerate() {
            self.current = index;
            for item in &file.items {
                let ast::Item::Type(decl) = item else {
                    continue;
                };
                let span = self.span(decl.span);
                let key = (self.context().module.clone(), decl.name.clone());
                if let Some(&first) = self.declared_type_names.get(&key) {
                    self.diagnostics
                        .push(FrontendDiagnostics::duplicate_type(span, first, &decl.name));
                    continue;
                }
                self.declared_type_names.insert(key, span);

                match &decl.kind {
                    ast::TypeDeclKind::Methods(methods) => {
                        let file_id = self.context().file_id;
                        let module = self.context().module.clone();
                        let id = self.types.declare_named(
                            &decl.name,
                            module.as_deref(),
                            Some(file_id),
                            Some(span),
                        );
                        self.file_types[index].push(id);
                        method_sets.push((id, methods, index));
                    }
                    ast::TypeDeclKind::Alias(target) => pending.push(PendingAlias {
                        name: &decl.name,
                        target,
                        context: index,
                        span,
                    }),
                }
            }
        }

        self.resolve_aliases(pending);

        for (id, methods, index) in method_sets {
            self.current = index;
            let signatures = methods
                .iter()
                .map(|method| {
                    let (params, variadic) = self.lower_param_types(&method.params);
                    let results = method.returns.iter().map(|r| self.lower_type(r)).collect();
                    MethodSignature {
                        name: method.name.clone(),
                        params,
                        variadic,
                        results,
                    }
                })
                .collect();
            self.types.set_methods(id, signatures);
        }
    }

    /// Declare aliases whose targets are resolvable, repeating until no
    /// progress; whatever is left refers to itself through other aliases
    fn resolve_aliases(&mut self, mut pending: Vec<PendingAlias<'_>>) {
        while !pending.is_empty() {
            let pending_names: FxHashSet<String> =
                pending.iter().map(|alias| alias.name.to_string()).collect();
            let before = pending.len();
            let mut waiting = Vec::new();

            for alias in pending {
                if mentions_any(alias.target, &pending_names) {
                    waiting.push(alias);
                    continue;
                }
                self.current = alias.context;
                let target = self.lower_type(alias.target);
                let module = self.context().module.clone();
                let file_id = self.context().file_id;
                self.types
                    .declare_alias(alias.name, module.as_deref(), target, Some(file_id));
                self.file_types[alias.context].push(target);
                trace!("alias {} -> {}", alias.name, self.types.display(target));
            }

            if waiting.len() == before {
                for alias in &waiting {
                    self.diagnostics
                        .push(FrontendDiagnostics::cyclic_alias(alias.span, alias.name));
                }
                return;
            }
            pending = waiting;
        }
    }

    fn lower_type(&mut self, expr: &ast::TypeExpr) -> TypeId {
        match &expr.kind {
            ast::TypeExprKind::Named(name) => match self.resolve_type_name(name) {
                Some(id) => id,
                None => {
                    let span = self.span(expr.span);
                    self.diagnostics
                        .push(FrontendDiagnostics::unknown_type(span, name));
                    self.types.unknown()
                }
            },
            ast::TypeExprKind::Slice(element) => {
                let element = self.lower_type(element);
                self.types.slice(element)
            }
            ast::TypeExprKind::Tuple(elements) => {
                let elements = elements.iter().map(|e| self.lower_type(e)).collect();
                self.types.tuple(elements)
            }
            ast::TypeExprKind::Function { params, returns } => {
                let params = params.iter().map(|p| self.lower_type(p)).collect();
                let results = returns.iter().map(|r| self.lower_type(r)).collect();
                self.types.function(params, false, results)
            }
        }
    }

    fn resolve_type_name(&self, name: &str) -> Option<TypeId> {
        if let Some(builtin) = BuiltinType::from_name(name) {
            return Some(self.types.builtin(builtin));
        }
        let context = self.context();
        match name.rsplit_once('.') {
            Some((qualifier, base)) => context
                .import_path(qualifier)
                .and_then(|path| self.types.lookup_in_module(base, path))
                .or_else(|| self.types.lookup(base, None)),
            None => self.types.lookup(name, context.module.as_deref()),
        }
    }

    /// Element types of a parameter list and whether the last is variadic
    fn lower_param_types(&mut self, params: &[ast::Param]) -> (Vec<TypeId>, bool) {
        let types = params.iter().map(|p| self.lower_type(&p.ty)).collect();
        let variadic = params.last().map_or(false, |p| p.variadic);
        (types, variadic)
    }

    // =========================================================================
    // Pass 2: top-level values
    // =========================================================================

    fn declare_values(&mut self, files: &[(FileId, ast::SourceFile)]) {
        for (index, (_, file)) in files.iter().enumerate() {
            self.current = index;
            for item in &file.items {
                match item {
                    ast::Item::Function(decl) => {
                        let id = self.declare_function(decl);
                        self.declared_functions.push(id);
                    }
                    ast::Item::Global(decl) => {
                        let ty = match &decl.ty {
                            Some(ty) => self.lower_type(ty),
                            None => self.types.unknown(),
                        };
                        let span = self.span(decl.span);
                        let symbol = self.symbols.add(&decl.name, SymbolKind::Global, ty, span, None);
                        self.register_top_level(&decl.name, TopLevel::Global(symbol));
                    }
                    ast::Item::Type(_) => {}
                }
            }
        }
    }

    fn declare_function(&mut self, decl: &ast::FunctionDecl) -> FunctionId {
        let id = FunctionId::from_raw(self.functions.len() as u32);
        let span = self.span(decl.span);
        let (param_types, variadic) = self.lower_param_types(&decl.params);
        let results: Vec<TypeId> = decl.returns.iter().map(|r| self.lower_type(r)).collect();
        let fn_type = self
            .types
            .function(param_types.clone(), variadic, results.clone());
        let symbol = self
            .symbols
            .add(&decl.name, SymbolKind::Function, fn_type, span, None);
        let params = self.declare_params(id, &decl.params, &param_types);

        self.functions.push(TypedFunction {
            id,
            symbol: Some(symbol),
            name: decl.name.clone(),
            file_id: self.context().file_id,
            kind: FunctionKind::Declared,
            parent: None,
            params,
            variadic,
            results,
            body: None,
            span,
        });
        self.register_top_level(&decl.name, TopLevel::Function(id));
        id
    }

    fn declare_params(
        &mut self,
        function: FunctionId,
        params: &[ast::Param],
        types: &[TypeId],
    ) -> Vec<SymbolId> {
        params
            .iter()
            .zip(types)
            .map(|(param, &ty)| {
                let ty = if param.variadic {
                    self.types.slice(ty)
                } else {
                    ty
                };
                let span = self.span(param.span);
                self.symbols
                    .add(&param.name, SymbolKind::Parameter, ty, span, Some(function))
            })
            .collect()
    }

    fn register_top_level(&mut self, name: &str, value: TopLevel) {
        let module = self.context().module.clone();
        self.top_level
            .entry(name.to_string())
            .or_default()
            .push(TopLevelEntry { module, value });
    }

    // =========================================================================
    // Pass 3: bodies
    // =========================================================================

    fn lower_bodies(&mut self, files: &[(FileId, ast::SourceFile)]) {
        let mut declared = std::mem::take(&mut self.declared_functions).into_iter();
        for (index, (_, file)) in files.iter().enumerate() {
            self.current = index;
            for item in &file.items {
                let ast::Item::Function(decl) = item else {
                    continue;
                };
                let Some(id) = declared.next() else {
                    return;
                };
                if let Some(body) = &decl.body {
                    trace!("lowering body of {}", decl.name);
                    let params = self.functions[id.index()].params.clone();
                    let body = self.lower_function_body(id, &params, body);
                    self.functions[id.index()].body = Some(body);
                }
            }
        }
    }

    fn lower_function_body(
        &mut self,
        function: FunctionId,
        params: &[SymbolId],
        body: &ast::Block,
    ) -> TypedBlock {
        let mut scope = FxHashMap::default();
        for &param in params {
            if let Some(symbol) = self.symbols.get(param) {
                scope.insert(symbol.name.clone(), param);
            }
        }
        self.frames.push(Frame {
            function,
            scopes: vec![scope],
            literal_count: 0,
        });
        let block = self.lower_block(body);
        self.frames.pop();
        block
    }

    fn current_function(&self) -> Option<FunctionId> {
        self.frames.last().map(|frame| frame.function)
    }

    fn push_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.push(FxHashMap::default());
        }
    }

    fn pop_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.pop();
        }
    }

    fn declare_local(&mut self, name: &str, ty: TypeId, span: SourceSpan) -> SymbolId {
        let owner = self.current_function();
        let symbol = self.symbols.add(name, SymbolKind::Local, ty, span, owner);
        if let Some(scope) = self.frames.last_mut().and_then(|f| f.scopes.last_mut()) {
            scope.insert(name.to_string(), symbol);
        }
        symbol
    }

    /// Local, parameter or captured variable visible at this point
    fn lookup_local(&self, name: &str) -> Option<SymbolId> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.scopes.iter().rev())
            .find_map(|scope| scope.get(name).copied())
    }

    fn lookup_top_level(&self, name: &str, module: Option<&str>) -> Option<TopLevel> {
        let entries = self.top_level.get(name)?;
        entries
            .iter()
            .find(|entry| entry.module.as_deref() == module)
            .or_else(|| entries.first())
            .map(|entry| entry.value)
    }

    fn lookup_qualified(&self, path: &str, name: &str) -> Option<TopLevel> {
        self.top_level
            .get(name)?
            .iter()
            .find(|entry| entry.module.as_deref() == Some(path))
            .map(|entry| entry.value)
    }

    fn lower_block(&mut self, block: &ast::Block) -> TypedBlock {
        self.push_scope();
        let statements = block
            .statements
            .iter()
            .map(|stmt| self.lower_statement(stmt))
            .collect();
        self.pop_scope();
        TypedBlock {
            statements,
            span: self.span(block.span),
        }
    }

    fn lower_statement(&mut self, stmt: &ast::Stmt) -> TypedStatement {
        let id = self.statement_ids.next();
        let span = self.span(stmt.span);
        let kind = match &stmt.kind {
            ast::StmtKind::Let {
                patterns,
                ty,
                value,
            } => self.lower_let(patterns, ty.as_ref(), value),
            ast::StmtKind::Var { name, ty } => {
                let ty = self.lower_type(ty);
                let symbol = self.declare_local(name, ty, span);
                TypedStatementKind::VarDecl { symbol }
            }
            ast::StmtKind::Assign { targets, value } => {
                let value = self.lower_expression(value);
                let targets = targets
                    .iter()
                    .map(|target| self.lower_assign_target(target))
                    .collect();
                TypedStatementKind::Bind {
                    targets,
                    value,
                    declaration: false,
                }
            }
            ast::StmtKind::Expr(expr) => TypedStatementKind::Expression(self.lower_expression(expr)),
            ast::StmtKind::If {
                condition,
                then_block,
                else_branch,
            } => TypedStatementKind::If {
                condition: self.lower_expression(condition),
                then_block: self.lower_block(then_block),
                else_branch: else_branch
                    .as_ref()
                    .map(|stmt| Box::new(self.lower_statement(stmt))),
            },
            ast::StmtKind::While { condition, body } => TypedStatementKind::While {
                condition: self.lower_expression(condition),
                body: self.lower_block(body),
            },
            ast::StmtKind::Loop { body } => TypedStatementKind::Loop {
                body: self.lower_block(body),
            },
            ast::StmtKind::For {
                pattern,
                iterable,
                body,
            } => {
                let iterable = self.lower_expression(iterable);
                self.push_scope();
                let binding = match pattern {
                    ast::Pattern::Ident(name) => {
                        let ty = self
                            .types
                            .slice_element(iterable.ty)
                            .unwrap_or(self.types.unknown());
                        Some(self.declare_local(name, ty, span))
                    }
                    ast::Pattern::Wildcard => None,
                };
                let body = self.lower_block(body);
                self.pop_scope();
                TypedStatementKind::For {
                    binding,
                    iterable,
                    body,
                }
            }
            ast::StmtKind::Switch {
                discriminant,
                cases,
                default,
            } => TypedStatementKind::Switch {
                discriminant: self.lower_expression(discriminant),
                cases: cases
                    .iter()
                    .map(|case| TypedSwitchCase {
                        values: case.values.iter().map(|v| self.lower_expression(v)).collect(),
                        body: self.lower_block(&case.body),
                        span: self.span(case.span),
                    })
                    .collect(),
                default: default.as_ref().map(|block| self.lower_block(block)),
            },
            ast::StmtKind::Return(values) => {
                TypedStatementKind::Return(values.iter().map(|v| self.lower_expression(v)).collect())
            }
            ast::StmtKind::Defer(call) => TypedStatementKind::Defer(self.lower_expression(call)),
            ast::StmtKind::Panic(value) => {
                TypedStatementKind::Panic(value.as_ref().map(|v| self.lower_expression(v)))
            }
            ast::StmtKind::Break => TypedStatementKind::Break,
            ast::StmtKind::Continue => TypedStatementKind::Continue,
            ast::StmtKind::Goto(label) => TypedStatementKind::Goto(label.clone()),
            ast::StmtKind::Block(block) => TypedStatementKind::Block(self.lower_block(block)),
        };
        TypedStatement { id, kind, span }
    }

    fn lower_let(
        &mut self,
        patterns: &[(ast::Pattern, ast::Span)],
        annotation: Option<&ast::TypeExpr>,
        value: &ast::Expr,
    ) -> TypedStatementKind {
        // The value is lowered first so `let s = s;` sees the outer `s`
        let value = self.lower_expression(value);
        let annotated = annotation.map(|ty| self.lower_type(ty));
        let positions = if patterns.len() == 1 {
            vec![annotated.unwrap_or(value.ty)]
        } else {
            let mut types = self.types.value_types(value.ty);
            if let Some(ty) = annotated {
                types = vec![ty; patterns.len()];
            }
            types
        };

        let targets = patterns
            .iter()
            .enumerate()
            .map(|(index, (pattern, span))| {
                let span = self.span(*span);
                let kind = match pattern {
                    ast::Pattern::Wildcard => AssignTargetKind::Discard,
                    ast::Pattern::Ident(name) => {
                        let ty = positions.get(index).copied().unwrap_or(self.types.unknown());
                        AssignTargetKind::Symbol(self.declare_local(name, ty, span))
                    }
                };
                AssignTarget { kind, span }
            })
            .collect();

        TypedStatementKind::Bind {
            targets,
            value,
            declaration: true,
        }
    }

    fn lower_assign_target(&mut self, target: &ast::Expr) -> AssignTarget {
        let span = self.span(target.span);
        let kind = match &target.kind {
            ast::ExprKind::Ident(name) if name == "_" => AssignTargetKind::Discard,
            ast::ExprKind::Ident(name) => {
                let context = self.context().module.clone();
                match self.lookup_local(name) {
                    Some(symbol) => AssignTargetKind::Symbol(symbol),
                    None => match self.lookup_top_level(name, context.as_deref()) {
                        Some(TopLevel::Global(symbol)) => AssignTargetKind::Symbol(symbol),
                        _ => AssignTargetKind::Place(self.lower_expression(target)),
                    },
                }
            }
            _ => AssignTargetKind::Place(self.lower_expression(target)),
        };
        AssignTarget { kind, span }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn make(&mut self, kind: TypedExpressionKind, ty: TypeId, span: SourceSpan) -> TypedExpression {
        TypedExpression {
            id: self.expression_ids.next(),
            kind,
            ty,
            span,
        }
    }

    fn lower_expression(&mut self, expr: &ast::Expr) -> TypedExpression {
        let span = self.span(expr.span);
        match &expr.kind {
            ast::ExprKind::Int(value) => {
                let ty = self.types.builtin(BuiltinType::Int);
                self.make(TypedExpressionKind::Literal(LiteralValue::Int(*value)), ty, span)
            }
            ast::ExprKind::Str(value) => {
                let ty = self.types.builtin(BuiltinType::String);
                self.make(
                    TypedExpressionKind::Literal(LiteralValue::Str(value.clone())),
                    ty,
                    span,
                )
            }
            ast::ExprKind::Bool(value) => {
                let ty = self.types.builtin(BuiltinType::Bool);
                self.make(TypedExpressionKind::Literal(LiteralValue::Bool(*value)), ty, span)
            }
            ast::ExprKind::Nil => {
                let ty = self.types.builtin(BuiltinType::Nil);
                self.make(TypedExpressionKind::Literal(LiteralValue::Nil), ty, span)
            }
            ast::ExprKind::Ident(name) => self.lower_identifier(name, span),
            ast::ExprKind::Call { callee, args } => self.lower_call(callee, args, span),
            ast::ExprKind::Field { object, name } => {
                if let Some(resolved) = self.lower_qualified(object, name, span) {
                    return resolved;
                }
                let object = self.lower_expression(object);
                let ty = self.types.unknown();
                self.make(
                    TypedExpressionKind::Field {
                        object: Box::new(object),
                        name: name.clone(),
                    },
                    ty,
                    span,
                )
            }
            ast::ExprKind::Index { object, index } => {
                let object = self.lower_expression(object);
                let index = self.lower_expression(index);
                let ty = self
                    .types
                    .slice_element(object.ty)
                    .unwrap_or(self.types.unknown());
                self.make(
                    TypedExpressionKind::Index {
                        object: Box::new(object),
                        index: Box::new(index),
                    },
                    ty,
                    span,
                )
            }
            ast::ExprKind::Binary { op, left, right } => {
                let left = self.lower_expression(left);
                let right = self.lower_expression(right);
                let ty = match op {
                    BinaryOp::Add | BinaryOp::Sub => left.ty,
                    _ => self.types.builtin(BuiltinType::Bool),
                };
                self.make(
                    TypedExpressionKind::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    ty,
                    span,
                )
            }
            ast::ExprKind::Unary { op, operand } => {
                let operand = self.lower_expression(operand);
                let ty = match op {
                    UnaryOp::Not => self.types.builtin(BuiltinType::Bool),
                    UnaryOp::Neg => operand.ty,
                };
                self.make(
                    TypedExpressionKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    ty,
                    span,
                )
            }
            ast::ExprKind::FunctionLiteral {
                params,
                returns,
                body,
            } => self.lower_function_literal(params, returns, body, span),
            ast::ExprKind::Composite { type_name, fields } => {
                let ty = match self.resolve_type_name(type_name) {
                    Some(ty) => ty,
                    None => {
                        self.diagnostics
                            .push(FrontendDiagnostics::unknown_type(span, type_name));
                        self.types.unknown()
                    }
                };
                let fields = fields
                    .iter()
                    .map(|(name, value)| (name.clone(), self.lower_expression(value)))
                    .collect();
                self.make(TypedExpressionKind::Composite { fields }, ty, span)
            }
        }
    }

    fn lower_identifier(&mut self, name: &str, span: SourceSpan) -> TypedExpression {
        if let Some(symbol) = self.lookup_local(name) {
            let ty = self.symbol_type(symbol);
            return self.make(TypedExpressionKind::Variable(symbol), ty, span);
        }
        let module = self.context().module.clone();
        match self.lookup_top_level(name, module.as_deref()) {
            Some(value) => self.top_level_expression(value, span),
            None => {
                self.diagnostics
                    .push(FrontendDiagnostics::unresolved_name(span, name));
                let ty = self.types.unknown();
                self.make(TypedExpressionKind::Unresolved(name.to_string()), ty, span)
            }
        }
    }

    fn top_level_expression(&mut self, value: TopLevel, span: SourceSpan) -> TypedExpression {
        match value {
            TopLevel::Global(symbol) => {
                let ty = self.symbol_type(symbol);
                self.make(TypedExpressionKind::Variable(symbol), ty, span)
            }
            TopLevel::Function(function) => {
                let ty = self.functions[function.index()]
                    .symbol
                    .map(|symbol| self.symbol_type(symbol))
                    .unwrap_or(self.types.unknown());
                self.make(TypedExpressionKind::Function(function), ty, span)
            }
        }
    }

    fn symbol_type(&self, symbol: SymbolId) -> TypeId {
        self.symbols
            .get(symbol)
            .map(|s| s.ty)
            .unwrap_or(self.types.unknown())
    }

    /// `pkg.name` where `pkg` is an import and not shadowed by a value
    fn lower_qualified(
        &mut self,
        object: &ast::Expr,
        name: &str,
        span: SourceSpan,
    ) -> Option<TypedExpression> {
        let ast::ExprKind::Ident(qualifier) = &object.kind else {
            return None;
        };
        if self.lookup_local(qualifier).is_some() {
            return None;
        }
        let module = self.context().module.clone();
        if self.lookup_top_level(qualifier, module.as_deref()).is_some() {
            return None;
        }
        let path = self.context().import_path(qualifier)?.to_string();
        let resolved = match self.lookup_qualified(&path, name) {
            Some(value) => self.top_level_expression(value, span),
            None => {
                let full_name = format!("{}.{}", qualifier, name);
                self.diagnostics
                    .push(FrontendDiagnostics::unresolved_name(span, &full_name));
                let ty = self.types.unknown();
                self.make(TypedExpressionKind::Unresolved(full_name), ty, span)
            }
        };
        Some(resolved)
    }

    fn lower_call(&mut self, callee: &ast::Expr, args: &[ast::Expr], span: SourceSpan) -> TypedExpression {
        // Method call, unless the receiver is an import qualifier
        if let ast::ExprKind::Field { object, name } = &callee.kind {
            let callee_span = self.span(callee.span);
            if let Some(function) = self.lower_qualified(object, name, callee_span) {
                return self.finish_call(function, args, span);
            }
            let receiver = self.lower_expression(object);
            let args = args.iter().map(|a| self.lower_expression(a)).collect();
            let ty = match self.types.find_method(receiver.ty, name) {
                Some(method) => {
                    let results = method.results.clone();
                    self.types.tuple(results)
                }
                None => self.types.unknown(),
            };
            return self.make(
                TypedExpressionKind::MethodCall {
                    receiver: Box::new(receiver),
                    method: name.clone(),
                    args,
                },
                ty,
                span,
            );
        }

        if let ast::ExprKind::Ident(name) = &callee.kind {
            let module = self.context().module.clone();
            let shadowed = self.lookup_local(name).is_some()
                || self.lookup_top_level(name, module.as_deref()).is_some();
            if let (false, Some(function)) = (shadowed, BuiltinFunction::from_name(name)) {
                let args: Vec<TypedExpression> = args.iter().map(|a| self.lower_expression(a)).collect();
                let ty = match function {
                    BuiltinFunction::Append => args
                        .first()
                        .map(|a| a.ty)
                        .unwrap_or(self.types.unknown()),
                    BuiltinFunction::Len => self.types.builtin(BuiltinType::Int),
                };
                return self.make(TypedExpressionKind::Builtin { function, args }, ty, span);
            }
        }

        let callee = self.lower_expression(callee);
        self.finish_call(callee, args, span)
    }

    fn finish_call(&mut self, callee: TypedExpression, args: &[ast::Expr], span: SourceSpan) -> TypedExpression {
        let args = args.iter().map(|a| self.lower_expression(a)).collect();
        let results = match &callee.kind {
            TypedExpressionKind::Function(function) | TypedExpressionKind::FunctionLiteral(function) => {
                Some(self.functions[function.index()].results.clone())
            }
            _ => match self.types.get(callee.ty) {
                TypeKind::Function { results, .. } => Some(results.clone()),
                _ => None,
            },
        };
        let ty = match results {
            Some(results) => self.types.tuple(results),
            None => self.types.unknown(),
        };
        self.make(
            TypedExpressionKind::Call {
                callee: Box::new(callee),
                args,
            },
            ty,
            span,
        )
    }

    fn lower_function_literal(
        &mut self,
        params: &[ast::Param],
        returns: &[ast::TypeExpr],
        body: &ast::Block,
        span: SourceSpan,
    ) -> TypedExpression {
        let id = FunctionId::from_raw(self.functions.len() as u32);
        let parent = self.current_function();
        let ordinal = match self.frames.last_mut() {
            Some(frame) => {
                frame.literal_count += 1;
                frame.literal_count
            }
            None => 1,
        };
        let name = match parent {
            Some(parent) => format!("{}.func{}", self.functions[parent.index()].name, ordinal),
            None => format!("func{}", ordinal),
        };

        let (param_types, variadic) = self.lower_param_types(params);
        let results: Vec<TypeId> = returns.iter().map(|r| self.lower_type(r)).collect();
        let param_symbols = self.declare_params(id, params, &param_types);
        self.functions.push(TypedFunction {
            id,
            symbol: None,
            name,
            file_id: self.context().file_id,
            kind: FunctionKind::Literal,
            parent,
            params: param_symbols.clone(),
            variadic,
            results: results.clone(),
            body: None,
            span,
        });

        let body = self.lower_function_body(id, &param_symbols, body);
        self.functions[id.index()].body = Some(body);

        let ty = self.types.function(param_types, variadic, results);
        self.make(TypedExpressionKind::FunctionLiteral(id), ty, span)
    }

    fn finish(
        self,
    ) -> (
        Vec<TypedFile>,
        Vec<TypedFunction>,
        SymbolTable,
        TypeTable,
        Diagnostics,
    ) {
        let files = self
            .contexts
            .iter()
            .zip(self.file_types)
            .map(|(context, declared_types)| TypedFile {
                file_id: context.file_id,
                name: context.name.clone(),
                module: context.module.clone(),
                imports: context.imports.clone(),
                functions: self
                    .functions
                    .iter()
                    .filter(|f| f.file_id == context.file_id)
                    .map(|f| f.id)
                    .collect(),
                declared_types,
            })
            .collect();
        (files, self.functions, self.symbols, self.types, self.diagnostics)
    }
}

/// Whether a type expression names any of `names` (directly or as the last
/// segment of a qualified name)
fn mentions_any(expr: &ast::TypeExpr, names: &FxHashSet<String>) -> bool {
    match &expr.kind {
        ast::TypeExprKind::Named(name) => {
            let base = name.rsplit('.').next().unwrap_or(name);
            names.contains(base)
        }
        ast::TypeExprKind::Slice(element) => mentions_any(element, names),
        ast::TypeExprKind::Tuple(elements) => elements.iter().any(|e| mentions_any(e, names)),
        ast::TypeExprKind::Function { params, returns } => params
            .iter()
            .chain(returns.iter())
            .any(|e| mentions_any(e, names)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(sources: &[(&str, &str)]) -> LoweringOutput {
        let mut source_map = SourceMap::new();
        let mut files = Vec::new();
        for (name, text) in sources {
            let file_id = source_map.add_file(*name, *text);
            let file = parser::parse_file(text).expect("test source should parse");
            files.push((file_id, file));
        }
        lower_program(source_map, &files)
    }

    fn function<'p>(program: &'p TypedProgram, name: &str) -> &'p TypedFunction {
        program
            .functions
            .iter()
            .find(|f| f.name == name)
            .expect("function should exist")
    }

    const TRACE: &str = r#"
        module "otel/trace";
        type Span { fn end(); fn name() -> string; }
        type Tracer { fn start(name: string) -> Span; }
        fn tracer() -> Tracer;
    "#;

    #[test]
    fn test_method_call_types_from_method_set() {
        let output = lower(&[
            ("trace.lg", TRACE),
            (
                "app.lg",
                r#"
                import "otel/trace";
                fn run() {
                    let span = trace.tracer().start("run");
                    span.end();
                }
                "#,
            ),
        ]);
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        let program = &output.program;
        let run = function(program, "run");
        let body = run.body.as_ref().expect("body");
        let TypedStatementKind::Bind { targets, value, .. } = &body.statements[0].kind else {
            panic!("expected a binding");
        };
        assert!(matches!(value.kind, TypedExpressionKind::MethodCall { ref method, .. } if method == "start"));
        assert!(program.types.is_known_as(value.ty, "Span"));
        let AssignTargetKind::Symbol(symbol) = targets[0].kind else {
            panic!("expected a symbol target");
        };
        let symbol = program.symbols.get(symbol).expect("symbol");
        assert_eq!(symbol.name, "span");
        assert!(symbol.is_local_to(run.id));
    }

    #[test]
    fn test_alias_resolves_to_target() {
        let output = lower(&[
            ("trace.lg", TRACE),
            (
                "alias.lg",
                r#"
                import "otel/trace" as t;
                type Handle = t.Span;
                fn keep(h: Handle) -> Handle { return h; }
                "#,
            ),
        ]);
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        let program = &output.program;
        let keep = function(program, "keep");
        assert!(program.types.is_known_as(keep.results[0], "Span"));
        assert!(program.types.is_known_as(keep.results[0], "Handle"));
        let alias_file = &program.files[1];
        assert_eq!(alias_file.declared_types, vec![keep.results[0]]);
    }

    #[test]
    fn test_cyclic_alias_is_reported() {
        let output = lower(&[("cycle.lg", "type A = B; type B = A;")]);
        let codes: Vec<_> = output
            .diagnostics
            .iter()
            .filter_map(|d| d.code.clone())
            .collect();
        assert_eq!(codes, vec!["E1003", "E1003"]);
    }

    #[test]
    fn test_duplicate_type_is_reported() {
        let output = lower(&[("dup.lg", "type A { } type A { }")]);
        assert_eq!(output.diagnostics.len(), 1);
        assert!(output.diagnostics.has_errors());
    }

    #[test]
    fn test_function_literal_is_lifted() {
        let output = lower(&[(
            "lit.lg",
            r#"
            fn outer(n: int) {
                let f = fn() -> int { return n; };
                f();
            }
            "#,
        )]);
        let program = &output.program;
        let outer = function(program, "outer");
        let literal = function(program, "outer.func1");
        assert_eq!(literal.kind, FunctionKind::Literal);
        assert_eq!(literal.parent, Some(outer.id));
        // The literal reads the parameter of `outer`
        let body = literal.body.as_ref().expect("body");
        let TypedStatementKind::Return(values) = &body.statements[0].kind else {
            panic!("expected return");
        };
        assert_eq!(values[0].as_symbol(), Some(outer.params[0]));
        assert_eq!(program.files[0].functions, vec![outer.id, literal.id]);
    }

    #[test]
    fn test_shadowing_creates_new_symbol() {
        let output = lower(&[(
            "shadow.lg",
            r#"
            fn f() {
                let x = 1;
                { let x = x; }
            }
            "#,
        )]);
        let program = &output.program;
        let body = function(program, "f").body.as_ref().expect("body");
        let TypedStatementKind::Bind { targets, .. } = &body.statements[0].kind else {
            panic!("expected binding");
        };
        let AssignTargetKind::Symbol(outer) = targets[0].kind else {
            panic!("expected symbol");
        };
        let TypedStatementKind::Block(inner) = &body.statements[1].kind else {
            panic!("expected block");
        };
        let TypedStatementKind::Bind { targets, value, .. } = &inner.statements[0].kind else {
            panic!("expected binding");
        };
        let AssignTargetKind::Symbol(shadow) = targets[0].kind else {
            panic!("expected symbol");
        };
        assert_ne!(outer, shadow);
        assert_eq!(value.as_symbol(), Some(outer));
    }

    #[test]
    fn test_unresolved_name_is_a_warning() {
        let output = lower(&[("u.lg", "fn f() { missing(); }")]);
        assert_eq!(output.diagnostics.len(), 1);
        assert!(!output.diagnostics.has_errors());
    }

    #[test]
    fn test_multi_value_binding_types() {
        let output = lower(&[
            ("trace.lg", TRACE),
            (
                "ctx.lg",
                r#"
                import "otel/trace";
                type Context { }
                fn begin(name: string) -> (Context, trace.Span);
                fn run() {
                    let ctx, span = begin("x");
                    span.end();
                }
                "#,
            ),
        ]);
        assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
        let program = &output.program;
        let body = function(program, "run").body.as_ref().expect("body");
        let TypedStatementKind::Bind { targets, .. } = &body.statements[0].kind else {
            panic!("expected binding");
        };
        let types: Vec<_> = targets
            .iter()
            .map(|t| match t.kind {
                AssignTargetKind::Symbol(s) => program.symbols.get(s).map(|s| s.ty),
                _ => None,
            })
            .collect();
        assert!(program.types.is_known_as(types[0].unwrap(), "Context"));
        assert!(program.types.is_known_as(types[1].unwrap(), "Span"));
    }
}
