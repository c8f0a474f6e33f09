//! Scope model of one function body
//!
//! Scopes live in an arena indexed by [`ScopeId`]; the builder keeps a stack
//! of open scopes while it walks the body. Each scope records the handle
//! bindings introduced directly in it, so a scope's bindings never overlap
//! its parent's, and a shadowing `let` gets a binding of its own.

use fxhash::FxHashMap;
use log::trace;
use smallvec::SmallVec;
use source_map::SourceSpan;

use super::AnalysisInternalError;
use crate::capability::ResolvedCapability;
use crate::tast::node::{
    AssignTarget, AssignTargetKind, TypedBlock, TypedExpression, TypedFunction, TypedStatement,
    TypedStatementKind,
};
use crate::tast::{BindingId, FunctionId, ScopeId, StatementId, SymbolId, TypedProgram};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Function,
    Block,
    Loop,
    Branch,
    SwitchCase,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    /// Bindings introduced directly in this scope
    pub bindings: Vec<BindingId>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseMode {
    None,
    Direct,
    Deferred,
}

/// A local bound to the handle an acquisition returned
#[derive(Debug, Clone)]
pub struct HandleBinding {
    pub id: BindingId,
    /// Resolved symbol; two locals with the same name are distinct
    pub symbol: SymbolId,
    /// Binding statement and target position inside it; a parameter
    /// binding has an invalid statement and its parameter index
    pub statement: StatementId,
    pub position: usize,
    pub declaring_scope: ScopeId,
    pub acquisition_site: SourceSpan,
    pub released: bool,
    pub release_mode: ReleaseMode,
    pub escaped: bool,
    /// Flows into a returned position
    pub returned: bool,
}

#[derive(Debug, Clone)]
pub struct ScopeModel {
    pub function: FunctionId,
    scopes: Vec<Scope>,
    bindings: Vec<HandleBinding>,
    sites: FxHashMap<(StatementId, usize), BindingId>,
    by_symbol: FxHashMap<SymbolId, SmallVec<[BindingId; 2]>>,
}

impl ScopeModel {
    /// Walk `function` and record its scopes and handle bindings
    pub fn build(function: &TypedFunction, program: &TypedProgram, capability: &ResolvedCapability) -> Self {
        let mut builder = ScopeModelBuilder {
            program,
            capability,
            model: ScopeModel {
                function: function.id,
                scopes: Vec::new(),
                bindings: Vec::new(),
                sites: FxHashMap::default(),
                by_symbol: FxHashMap::default(),
            },
            stack: Vec::new(),
        };
        if let Some(body) = &function.body {
            builder.enter(ScopeKind::Function, body.span);
            builder.walk_statements(body);
            builder.exit();
        }
        builder.model
    }

    /// A model whose only binding is parameter `position` of `function`,
    /// for checking what the function does with a handle it is given
    ///
    /// The binding has no acquiring statement; `None` for a bodiless
    /// function or an out-of-range position.
    pub fn for_parameter(function: &TypedFunction, position: usize) -> Option<Self> {
        let symbol = *function.params.get(position)?;
        let body = function.body.as_ref()?;
        let scope = ScopeId::from_raw(0);
        let id = BindingId::from_raw(0);

        let mut by_symbol: FxHashMap<SymbolId, SmallVec<[BindingId; 2]>> = FxHashMap::default();
        by_symbol.entry(symbol).or_default().push(id);
        Some(ScopeModel {
            function: function.id,
            scopes: vec![Scope {
                id: scope,
                kind: ScopeKind::Function,
                parent: None,
                children: Vec::new(),
                bindings: vec![id],
                span: body.span,
            }],
            bindings: vec![HandleBinding {
                id,
                symbol,
                statement: StatementId::invalid(),
                position,
                declaring_scope: scope,
                acquisition_site: function.span,
                released: false,
                release_mode: ReleaseMode::None,
                escaped: false,
                returned: false,
            }],
            sites: FxHashMap::default(),
            by_symbol,
        })
    }

    /// The function scope; `None` for bodiless functions
    pub fn root(&self) -> Option<ScopeId> {
        self.scopes.first().map(|s| s.id)
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.index())
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn bindings(&self) -> &[HandleBinding] {
        &self.bindings
    }

    pub fn binding(&self, id: BindingId) -> Option<&HandleBinding> {
        self.bindings.get(id.index())
    }

    pub fn binding_mut(&mut self, id: BindingId) -> Option<&mut HandleBinding> {
        self.bindings.get_mut(id.index())
    }

    /// Binding created by target `position` of `statement`
    pub fn binding_at(&self, statement: StatementId, position: usize) -> Option<BindingId> {
        self.sites.get(&(statement, position)).copied()
    }

    /// Every binding of `symbol`, in creation order
    pub fn bindings_of(&self, symbol: SymbolId) -> &[BindingId] {
        self.by_symbol
            .get(&symbol)
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Check that every binding hangs off exactly the scope that declares it
    pub fn validate(&self) -> Result<(), AnalysisInternalError> {
        for binding in &self.bindings {
            let owned = self
                .scope(binding.declaring_scope)
                .map_or(false, |scope| scope.bindings.contains(&binding.id));
            if !owned {
                return Err(AnalysisInternalError::BindingWithoutScope {
                    binding: binding.id,
                    site: binding.acquisition_site,
                });
            }
        }
        for scope in &self.scopes {
            if let Some(parent) = scope.parent.and_then(|p| self.scope(p)) {
                if scope.bindings.iter().any(|b| parent.bindings.contains(b)) {
                    return Err(AnalysisInternalError::Invariant(format!(
                        "{} shares a binding with its parent",
                        scope.id
                    )));
                }
            }
        }
        Ok(())
    }
}

struct ScopeModelBuilder<'p> {
    program: &'p TypedProgram,
    capability: &'p ResolvedCapability,
    model: ScopeModel,
    /// Open scopes, innermost last
    stack: Vec<ScopeId>,
}

impl ScopeModelBuilder<'_> {
    fn enter(&mut self, kind: ScopeKind, span: SourceSpan) {
        let id = ScopeId::from_raw(self.model.scopes.len() as u32);
        let parent = self.stack.last().copied();
        if let Some(parent) = parent {
            self.model.scopes[parent.index()].children.push(id);
        }
        self.model.scopes.push(Scope {
            id,
            kind,
            parent,
            children: Vec::new(),
            bindings: Vec::new(),
            span,
        });
        self.stack.push(id);
    }

    fn exit(&mut self) {
        self.stack.pop();
    }

    fn walk_block(&mut self, kind: ScopeKind, block: &TypedBlock) {
        self.enter(kind, block.span);
        self.walk_statements(block);
        self.exit();
    }

    fn walk_statements(&mut self, block: &TypedBlock) {
        for statement in &block.statements {
            self.walk_statement(statement);
        }
    }

    fn walk_statement(&mut self, statement: &TypedStatement) {
        match &statement.kind {
            TypedStatementKind::Bind { targets, value, .. } => {
                self.record_acquisition(statement, targets, value);
            }
            TypedStatementKind::If {
                then_block,
                else_branch,
                ..
            } => {
                self.walk_block(ScopeKind::Branch, then_block);
                if let Some(else_branch) = else_branch {
                    match &else_branch.kind {
                        TypedStatementKind::Block(block) => self.walk_block(ScopeKind::Branch, block),
                        _ => self.walk_statement(else_branch),
                    }
                }
            }
            TypedStatementKind::While { body, .. }
            | TypedStatementKind::Loop { body }
            | TypedStatementKind::For { body, .. } => self.walk_block(ScopeKind::Loop, body),
            TypedStatementKind::Switch { cases, default, .. } => {
                for case in cases {
                    self.walk_block(ScopeKind::SwitchCase, &case.body);
                }
                if let Some(default) = default {
                    self.walk_block(ScopeKind::SwitchCase, default);
                }
            }
            TypedStatementKind::Block(block) => self.walk_block(ScopeKind::Block, block),
            TypedStatementKind::VarDecl { .. }
            | TypedStatementKind::Expression(_)
            | TypedStatementKind::Return(_)
            | TypedStatementKind::Defer(_)
            | TypedStatementKind::Panic(_)
            | TypedStatementKind::Break
            | TypedStatementKind::Continue
            | TypedStatementKind::Goto(_) => {}
        }
    }

    /// Track each local target that receives a handle from an acquisition
    fn record_acquisition(&mut self, statement: &TypedStatement, targets: &[AssignTarget], value: &TypedExpression) {
        if !self.capability.is_acquisition(value, self.program) {
            return;
        }
        let types = &self.program.types;
        let value_types = types.value_types(value.ty);

        for (position, target) in targets.iter().enumerate() {
            let AssignTargetKind::Symbol(symbol_id) = target.kind else {
                continue;
            };
            let Some(symbol) = self.program.symbols.get(symbol_id) else {
                continue;
            };
            // Globals and captured variables are outward: the handle escapes here
            if !symbol.is_local_to(self.model.function) {
                continue;
            }
            let position_type = if targets.len() == 1 {
                Some(value.ty)
            } else {
                value_types.get(position).copied()
            };
            let handle_like = position_type.map_or(false, |ty| self.capability.is_handle_like(ty, types))
                || self.capability.is_handle_like(symbol.ty, types);
            if !handle_like {
                continue;
            }
            let Some(&scope) = self.stack.last() else {
                continue;
            };

            let id = BindingId::from_raw(self.model.bindings.len() as u32);
            trace!("binding {} for `{}` in {}", id, symbol.name, scope);
            self.model.bindings.push(HandleBinding {
                id,
                symbol: symbol_id,
                statement: statement.id,
                position,
                declaring_scope: scope,
                acquisition_site: target.span,
                released: false,
                release_mode: ReleaseMode::None,
                escaped: false,
                returned: false,
            });
            self.model.scopes[scope.index()].bindings.push(id);
            self.model.sites.insert((statement.id, position), id);
            self.model.by_symbol.entry(symbol_id).or_default().push(id);
        }
    }
}
