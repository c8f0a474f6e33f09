//! Escape Classification for Handle Bindings
//!
//! Decides whether a use of a handle hands the release obligation to someone
//! else. Runs once over the whole program before any per-function pass and
//! is read-only afterwards, so the per-function passes can share it.
//!
//! Key features:
//! - Use-site collection for returns, stores and call arguments
//! - Container stores that escape only when the container does
//! - Flow-sensitive parameter summaries for functions that sink a handle
//!   argument
//! - The set of handle-returning functions

use fxhash::{FxHashMap, FxHashSet};
use log::{debug, trace};

use super::lifetime_analyzer::parameter_is_covered;
use crate::capability::ResolvedCapability;
use crate::tast::node::{
    AssignTarget, AssignTargetKind, BuiltinFunction, TypedBlock, TypedExpression,
    TypedExpressionKind, TypedFunction, TypedStatement, TypedStatementKind,
};
use crate::tast::{FunctionId, SymbolId, SymbolKind, TypedProgram};

/// Where a symbol's value goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseSite {
    /// Named by a `return`, directly or as a composite field
    Return,

    /// Stored to a global, a captured variable, or a field/index of a
    /// parameter, global or captured variable
    OutwardStore,

    /// Stored into a local container; escapes if the container does
    ContainerStore { container: SymbolId },

    /// Passed as argument `index` to a function of the program
    Argument { callee: FunctionId, index: usize },
}

/// Uses and releases seen in one function body
#[derive(Debug, Clone, Default)]
pub struct FunctionFlow {
    pub params: Vec<SymbolId>,
    pub variadic: bool,

    /// Symbols this body calls the release method on; nested literals have
    /// flows of their own
    pub released: FxHashSet<SymbolId>,

    /// Literals this body calls directly, `fn() { ... }()`
    pub invoked: Vec<FunctionId>,

    pub uses: FxHashMap<SymbolId, Vec<UseSite>>,
}

#[derive(Debug, Clone, Default)]
pub struct EscapeClassifierStats {
    pub functions_scanned: usize,
    pub use_sites: usize,
    pub sink_parameters: usize,
}

/// Hand-off decisions consulted while turning a function body into events
pub(crate) trait EscapeOracle {
    fn is_escaping(&mut self, use_site: &UseSite) -> bool;

    /// Symbols a call of `function` releases
    fn released_in(&self, function: FunctionId) -> Option<&FxHashSet<SymbolId>>;
}

/// **EscapeClassifier - Interprocedural Hand-off Detection**
///
/// Answers `is_escaping(use_site)` for the lifetime analyzer. Unknown calls
/// (methods, external declarations, calls through function values) produce
/// no use site at all, so they never count as an escape.
#[derive(Debug, Default)]
pub struct EscapeClassifier {
    flows: FxHashMap<FunctionId, FunctionFlow>,

    /// Per function, what calling it releases: its own releases plus those of
    /// the literals it calls directly
    call_releases: FxHashMap<FunctionId, FxHashSet<SymbolId>>,

    /// All uses of a symbol, across every function that mentions it
    uses: FxHashMap<SymbolId, Vec<UseSite>>,

    /// Per function, whether each parameter is released or handed off on
    /// every path through it
    param_summaries: FxHashMap<FunctionId, Vec<bool>>,

    handle_returning: FxHashSet<FunctionId>,

    stats: EscapeClassifierStats,
}

impl EscapeClassifier {
    /// Scan every function of `program`; this is the preliminary pass
    pub fn build(program: &TypedProgram, capability: &ResolvedCapability) -> Self {
        let mut classifier = EscapeClassifier::default();

        for function in &program.functions {
            if function
                .results
                .iter()
                .any(|ty| capability.carries_handle(*ty, &program.types))
            {
                classifier.handle_returning.insert(function.id);
            }
        }

        for function in program.functions_with_bodies() {
            let flow = collect_flow(function, program, capability);
            classifier.stats.functions_scanned += 1;
            for (symbol, sites) in &flow.uses {
                classifier.stats.use_sites += sites.len();
                classifier
                    .uses
                    .entry(*symbol)
                    .or_default()
                    .extend(sites.iter().copied());
            }
            classifier.flows.insert(function.id, flow);
        }

        for id in classifier.flows.keys() {
            let mut released = FxHashSet::default();
            let mut visited = FxHashSet::default();
            collect_call_releases(&classifier.flows, *id, &mut visited, &mut released);
            classifier.call_releases.insert(*id, released);
        }

        let mut summaries = SummaryBuilder {
            program,
            capability,
            flows: &classifier.flows,
            call_releases: &classifier.call_releases,
            uses: &classifier.uses,
            settled: FxHashMap::default(),
            pending: FxHashSet::default(),
            assumed: false,
        };
        let mut param_summaries = FxHashMap::default();
        let mut sink_parameters = 0;
        for function in program.functions_with_bodies() {
            let summary: Vec<bool> = (0..function.params.len())
                .map(|index| summaries.param_sinks(function.id, index))
                .collect();
            sink_parameters += summary.iter().filter(|s| **s).count();
            param_summaries.insert(function.id, summary);
        }
        classifier.param_summaries = param_summaries;
        classifier.stats.sink_parameters = sink_parameters;

        debug!(
            "Escape classifier: {} functions, {} use sites, {} sink parameters, {} handle-returning",
            classifier.stats.functions_scanned,
            classifier.stats.use_sites,
            classifier.stats.sink_parameters,
            classifier.handle_returning.len()
        );
        classifier
    }

    /// Whether `use_site` hands the obligation off
    pub fn is_escaping(&self, use_site: &UseSite) -> bool {
        match use_site {
            UseSite::Return | UseSite::OutwardStore => true,
            UseSite::ContainerStore { container } => {
                let mut visited = FxHashSet::default();
                symbol_escapes(&self.uses, *container, &mut visited, &mut |callee, index| {
                    self.param_escapes(callee, index)
                })
            }
            UseSite::Argument { callee, index } => self.param_escapes(*callee, *index),
        }
    }

    /// Whether argument `index` of `callee` is released or handed off on
    /// every path through `callee`
    pub fn param_escapes(&self, callee: FunctionId, index: usize) -> bool {
        let Some(summary) = self.param_summaries.get(&callee) else {
            return false;
        };
        let variadic = self.flows.get(&callee).map_or(false, |f| f.variadic);
        match summary.get(index) {
            Some(escapes) => *escapes,
            None if variadic => summary.last().copied().unwrap_or(false),
            None => false,
        }
    }

    pub fn is_handle_returning(&self, function: FunctionId) -> bool {
        self.handle_returning.contains(&function)
    }

    pub fn handle_returning(&self) -> &FxHashSet<FunctionId> {
        &self.handle_returning
    }

    pub fn flow(&self, function: FunctionId) -> Option<&FunctionFlow> {
        self.flows.get(&function)
    }

    /// Symbols released by a call of `function`, including the literals it
    /// calls directly
    pub fn released_in(&self, function: FunctionId) -> Option<&FxHashSet<SymbolId>> {
        self.call_releases.get(&function)
    }

    pub fn stats(&self) -> &EscapeClassifierStats {
        &self.stats
    }
}

impl EscapeOracle for &EscapeClassifier {
    fn is_escaping(&mut self, use_site: &UseSite) -> bool {
        (**self).is_escaping(use_site)
    }

    fn released_in(&self, function: FunctionId) -> Option<&FxHashSet<SymbolId>> {
        (**self).released_in(function)
    }
}

/// Own releases of `function` plus those of the literals it invokes, transitively
fn collect_call_releases(
    flows: &FxHashMap<FunctionId, FunctionFlow>,
    function: FunctionId,
    visited: &mut FxHashSet<FunctionId>,
    released: &mut FxHashSet<SymbolId>,
) {
    if !visited.insert(function) {
        return;
    }
    let Some(flow) = flows.get(&function) else {
        return;
    };
    released.extend(flow.released.iter().copied());
    for literal in &flow.invoked {
        collect_call_releases(flows, *literal, visited, released);
    }
}

/// Whether any use of `symbol` hands it off; `param` answers for call
/// arguments
fn symbol_escapes(
    uses: &FxHashMap<SymbolId, Vec<UseSite>>,
    symbol: SymbolId,
    visited: &mut FxHashSet<SymbolId>,
    param: &mut dyn FnMut(FunctionId, usize) -> bool,
) -> bool {
    if !visited.insert(symbol) {
        return false;
    }
    let Some(sites) = uses.get(&symbol) else {
        return false;
    };
    for site in sites {
        let escapes = match *site {
            UseSite::Return | UseSite::OutwardStore => true,
            UseSite::ContainerStore { container } => symbol_escapes(uses, container, visited, param),
            UseSite::Argument { callee, index } => {
                let sinks = param(callee, index);
                if sinks {
                    trace!("{} escapes through argument {} of {}", symbol, index, callee);
                }
                sinks
            }
        };
        if escapes {
            return true;
        }
    }
    false
}

/// Computes parameter summaries on demand during the preliminary pass
///
/// A parameter is a sink when the lifetime dataflow, started with the
/// parameter live at entry, reaches no exit with it still live. Summaries
/// that are still being computed read as "not a sink", so recursive
/// forwarders terminate; a negative result that relied on such an
/// assumption is not cached.
struct SummaryBuilder<'a> {
    program: &'a TypedProgram,
    capability: &'a ResolvedCapability,
    flows: &'a FxHashMap<FunctionId, FunctionFlow>,
    call_releases: &'a FxHashMap<FunctionId, FxHashSet<SymbolId>>,
    uses: &'a FxHashMap<SymbolId, Vec<UseSite>>,
    settled: FxHashMap<(FunctionId, usize), bool>,
    pending: FxHashSet<(FunctionId, usize)>,
    /// Set when a pending summary was read since the flag was last cleared
    assumed: bool,
}

impl SummaryBuilder<'_> {
    fn param_sinks(&mut self, callee: FunctionId, index: usize) -> bool {
        let Some(slot) = self.slot(callee, index) else {
            return false;
        };
        let key = (callee, slot);
        if let Some(&sinks) = self.settled.get(&key) {
            return sinks;
        }
        if !self.pending.insert(key) {
            self.assumed = true;
            return false;
        }

        let outer_assumed = std::mem::replace(&mut self.assumed, false);
        let (program, capability) = (self.program, self.capability);
        let sinks = match program.function(callee) {
            Some(function) => parameter_is_covered(program, capability, function, slot, self),
            None => false,
        };
        self.pending.remove(&key);
        if sinks || !self.assumed {
            self.settled.insert(key, sinks);
        }
        self.assumed |= outer_assumed;
        trace!("parameter {} of {}: sink = {}", slot, callee, sinks);
        sinks
    }

    fn slot(&self, callee: FunctionId, index: usize) -> Option<usize> {
        let flow = self.flows.get(&callee)?;
        if index < flow.params.len() {
            Some(index)
        } else if flow.variadic && !flow.params.is_empty() {
            Some(flow.params.len() - 1)
        } else {
            None
        }
    }
}

impl EscapeOracle for SummaryBuilder<'_> {
    fn is_escaping(&mut self, use_site: &UseSite) -> bool {
        match *use_site {
            UseSite::Return | UseSite::OutwardStore => true,
            UseSite::ContainerStore { container } => {
                let uses = self.uses;
                let mut visited = FxHashSet::default();
                symbol_escapes(uses, container, &mut visited, &mut |callee, index| {
                    self.param_sinks(callee, index)
                })
            }
            UseSite::Argument { callee, index } => self.param_sinks(callee, index),
        }
    }

    fn released_in(&self, function: FunctionId) -> Option<&FxHashSet<SymbolId>> {
        self.call_releases.get(&function)
    }
}

fn collect_flow(function: &TypedFunction, program: &TypedProgram, capability: &ResolvedCapability) -> FunctionFlow {
    let mut collector = FlowCollector {
        function: function.id,
        program,
        capability,
        flow: FunctionFlow {
            params: function.params.clone(),
            variadic: function.variadic,
            ..FunctionFlow::default()
        },
    };
    if let Some(body) = &function.body {
        collector.block(body);
    }
    collector.flow
}

struct FlowCollector<'p> {
    function: FunctionId,
    program: &'p TypedProgram,
    capability: &'p ResolvedCapability,
    flow: FunctionFlow,
}

impl FlowCollector<'_> {
    fn record(&mut self, uses: Vec<(SymbolId, UseSite)>) {
        for (symbol, site) in uses {
            self.flow.uses.entry(symbol).or_default().push(site);
        }
    }

    fn block(&mut self, block: &TypedBlock) {
        for statement in &block.statements {
            self.statement(statement);
        }
    }

    fn statement(&mut self, statement: &TypedStatement) {
        match &statement.kind {
            TypedStatementKind::Bind { targets, value, .. } => {
                self.expression(value);
                let uses = store_uses(self.program, self.function, targets, value);
                self.record(uses);
            }
            TypedStatementKind::VarDecl { .. }
            | TypedStatementKind::Break
            | TypedStatementKind::Continue
            | TypedStatementKind::Goto(_) => {}
            TypedStatementKind::Expression(expr) | TypedStatementKind::Defer(expr) => {
                self.expression(expr)
            }
            TypedStatementKind::Panic(value) => {
                if let Some(value) = value {
                    self.expression(value);
                }
            }
            TypedStatementKind::If {
                condition,
                then_block,
                else_branch,
            } => {
                self.expression(condition);
                self.block(then_block);
                if let Some(else_branch) = else_branch {
                    self.statement(else_branch);
                }
            }
            TypedStatementKind::While { condition, body } => {
                self.expression(condition);
                self.block(body);
            }
            TypedStatementKind::Loop { body } => self.block(body),
            TypedStatementKind::For { iterable, body, .. } => {
                self.expression(iterable);
                self.block(body);
            }
            TypedStatementKind::Switch {
                discriminant,
                cases,
                default,
            } => {
                self.expression(discriminant);
                for case in cases {
                    for value in &case.values {
                        self.expression(value);
                    }
                    self.block(&case.body);
                }
                if let Some(default) = default {
                    self.block(default);
                }
            }
            TypedStatementKind::Return(values) => {
                for value in values {
                    self.expression(value);
                }
                self.record(return_uses(values));
            }
            TypedStatementKind::Block(block) => self.block(block),
        }
    }

    fn expression(&mut self, expr: &TypedExpression) {
        if let Some(symbol) = self.capability.released_symbol(expr) {
            self.flow.released.insert(symbol);
        }
        if let TypedExpressionKind::Call { callee, .. } = &expr.kind {
            if let TypedExpressionKind::FunctionLiteral(literal) = callee.kind {
                self.flow.invoked.push(literal);
            }
        }
        let uses = argument_uses(expr);
        self.record(uses);
        for child in expr.children() {
            self.expression(child);
        }
    }
}

/// Use sites created by a `return` of `values`
pub fn return_uses(values: &[TypedExpression]) -> Vec<(SymbolId, UseSite)> {
    values
        .iter()
        .flat_map(|value| stored_symbols(value, false))
        .map(|symbol| (symbol, UseSite::Return))
        .collect()
}

/// Use sites created by the arguments of `expr` when it calls a function of
/// the program; nested calls are not visited
pub fn argument_uses(expr: &TypedExpression) -> Vec<(SymbolId, UseSite)> {
    let TypedExpressionKind::Call { callee, args } = &expr.kind else {
        return Vec::new();
    };
    let callee = match callee.kind {
        TypedExpressionKind::Function(id) | TypedExpressionKind::FunctionLiteral(id) => id,
        _ => return Vec::new(),
    };
    args.iter()
        .enumerate()
        .filter_map(|(index, arg)| {
            arg.as_symbol()
                .map(|symbol| (symbol, UseSite::Argument { callee, index }))
        })
        .collect()
}

/// Use sites created by binding `value` to `targets` inside `function`
///
/// A plain variable copied into another local is not a use: aliases are not
/// tracked.
pub fn store_uses(
    program: &TypedProgram,
    function: FunctionId,
    targets: &[AssignTarget],
    value: &TypedExpression,
) -> Vec<(SymbolId, UseSite)> {
    // Multi-target bindings take their values from a call's results
    if targets.len() != 1 {
        return Vec::new();
    }
    let is_container_value = matches!(
        value.kind,
        TypedExpressionKind::Composite { .. }
            | TypedExpressionKind::Builtin {
                function: BuiltinFunction::Append,
                ..
            }
    );
    let site = match &targets[0].kind {
        AssignTargetKind::Discard => None,
        AssignTargetKind::Symbol(target) => {
            let local = program
                .symbols
                .get(*target)
                .map_or(false, |symbol| symbol.is_local_to(function));
            if !local {
                Some(UseSite::OutwardStore)
            } else if is_container_value {
                Some(UseSite::ContainerStore { container: *target })
            } else {
                None
            }
        }
        AssignTargetKind::Place(place) => place.root_symbol().and_then(|root| {
            let symbol = program.symbols.get(root)?;
            if symbol.kind == SymbolKind::Parameter || !symbol.is_local_to(function) {
                Some(UseSite::OutwardStore)
            } else {
                Some(UseSite::ContainerStore { container: root })
            }
        }),
    };
    let Some(site) = site else {
        return Vec::new();
    };
    stored_symbols(value, true)
        .into_iter()
        .map(|symbol| (symbol, site))
        .collect()
}

/// Variables whose value `expr` carries: the variable itself, composite
/// fields and, when `appends` is set, the appended elements
fn stored_symbols(expr: &TypedExpression, appends: bool) -> Vec<SymbolId> {
    match &expr.kind {
        TypedExpressionKind::Variable(symbol) => vec![*symbol],
        TypedExpressionKind::Composite { fields } => fields
            .iter()
            .filter_map(|(_, value)| value.as_symbol())
            .collect(),
        TypedExpressionKind::Builtin {
            function: BuiltinFunction::Append,
            args,
        } if appends => args.iter().skip(1).filter_map(|arg| arg.as_symbol()).collect(),
        _ => Vec::new(),
    }
}
