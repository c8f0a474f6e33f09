//! Lifetime Analysis for Handle Bindings
//!
//! Checks that every handle acquired in a function is released, or handed
//! off, on every path to the function's exits.

use std::fmt;

use fxhash::FxHashSet;
use log::{debug, trace};
use source_map::SourceSpan;

use super::escape_analyzer::{argument_uses, return_uses, store_uses, EscapeClassifier, EscapeOracle};
use crate::capability::ResolvedCapability;
use crate::report::{Finding, FindingKind};
use crate::semantic_graph::{
    build_cfg, AnalysisInternalError, CfgBuildError, CfgOp, ControlFlowGraph, DominanceTree,
    ReleaseMode, ScopeModel,
};
use crate::tast::node::{AssignTargetKind, BinaryOp, TypedExpression, TypedExpressionKind, TypedFunction};
use crate::tast::{BindingId, BlockId, FunctionId, SymbolId, TypedProgram};

/// Possible states of one binding at a program point, as a bit set
type BindingStates = u8;

/// Not acquired yet on this path
const UNACQUIRED: BindingStates = 1 << 0;
/// Acquired and still owed a release
const LIVE: BindingStates = 1 << 1;
/// Released or handed off
const COVERED: BindingStates = 1 << 2;

/// What an op does to the tracked bindings, in evaluation order
#[derive(Debug, Clone, Copy)]
enum Event {
    Acquire(BindingId),
    /// Assignment to a tracked symbol that is not an acquisition
    Overwrite(SymbolId),
    Release {
        symbol: SymbolId,
        span: SourceSpan,
        deferred: bool,
    },
    Escape {
        symbol: SymbolId,
        returned: bool,
    },
}

#[derive(Debug, Clone, Copy)]
struct Witness {
    binding: BindingId,
    span: SourceSpan,
    deferred: bool,
}

/// **Lifetime Analyzer - Must-Release Checking**
///
/// ## **Algorithm Overview:**
/// 1. **Lowering**: build the CFG, the dominance tree and the scope model
/// 2. **Events**: turn each op into acquisitions, overwrites, release
///    witnesses and escape witnesses of the tracked symbols
/// 3. **Dataflow**: forward fixpoint over per-binding state sets
///    `{Unacquired, Live, Covered}`, joined by union, in reverse postorder
/// 4. **Reporting**: one replay of every block with the fixed in-states
///    records leaks and witnesses
///
/// A deferred release only counts when it is registered in a block the
/// acquisition dominates. A binding is abandoned when it may still be live
/// at a re-acquisition or an overwrite of its symbol, or at either exit.
pub struct LifetimeAnalyzer<'p> {
    program: &'p TypedProgram,
    capability: &'p ResolvedCapability,
    classifier: &'p EscapeClassifier,
}

/// Result of analyzing one function
#[derive(Debug, Clone)]
pub struct FunctionReport {
    pub function: FunctionId,
    pub findings: Vec<Finding>,
    /// Scope model with the release/escape flags filled in
    pub model: ScopeModel,
    pub stats: LifetimeAnalysisStats,
}

#[derive(Debug, Clone, Default)]
pub struct LifetimeAnalysisStats {
    pub blocks: usize,
    pub bindings: usize,
    pub iterations: usize,
    pub leaks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifetimeAnalysisError {
    Cfg(CfgBuildError),
    Internal(AnalysisInternalError),
}

impl fmt::Display for LifetimeAnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifetimeAnalysisError::Cfg(error) => write!(f, "{}", error),
            LifetimeAnalysisError::Internal(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for LifetimeAnalysisError {}

impl From<CfgBuildError> for LifetimeAnalysisError {
    fn from(error: CfgBuildError) -> Self {
        LifetimeAnalysisError::Cfg(error)
    }
}

impl From<AnalysisInternalError> for LifetimeAnalysisError {
    fn from(error: AnalysisInternalError) -> Self {
        LifetimeAnalysisError::Internal(error)
    }
}

impl<'p> LifetimeAnalyzer<'p> {
    pub fn new(
        program: &'p TypedProgram,
        capability: &'p ResolvedCapability,
        classifier: &'p EscapeClassifier,
    ) -> Self {
        Self {
            program,
            capability,
            classifier,
        }
    }

    pub fn analyze_function(&self, function: &TypedFunction) -> Result<FunctionReport, LifetimeAnalysisError> {
        let cfg = build_cfg(function)?;
        cfg.validate()
            .map_err(|e| AnalysisInternalError::InvalidCfg(e.to_string()))?;

        let mut model = ScopeModel::build(function, self.program, self.capability);
        model.validate()?;

        let mut stats = LifetimeAnalysisStats {
            blocks: cfg.len(),
            bindings: model.bindings().len(),
            ..LifetimeAnalysisStats::default()
        };
        if model.is_empty() {
            return Ok(FunctionReport {
                function: function.id,
                findings: Vec::new(),
                model,
                stats,
            });
        }

        let dominance = DominanceTree::build(&cfg)
            .map_err(|e| AnalysisInternalError::DominanceAnalysisFailed(e.to_string()))?;

        let mut hand_off = self.classifier;
        let (events, acquired_in) = collect_events(
            self.program,
            self.capability,
            &mut hand_off,
            function.id,
            &cfg,
            &model,
        );
        let flow = BindingFlow {
            cfg: &cfg,
            dominance: &dominance,
            model: &model,
            events,
            acquired_in,
            entry_state: UNACQUIRED,
        };
        let (observations, iterations) = flow.run();
        stats.iterations = iterations;

        let findings = self.report(function, &mut model, &observations);
        stats.leaks = findings
            .iter()
            .filter(|f| f.kind == FindingKind::MissingRelease)
            .count();
        debug!(
            "Lifetime analysis of {}: {} bindings, {} blocks, {} iterations, {} leaks",
            function.name, stats.bindings, stats.blocks, stats.iterations, stats.leaks
        );
        Ok(FunctionReport {
            function: function.id,
            findings,
            model,
            stats,
        })
    }

    /// Fill in the binding flags and turn observations into findings
    fn report(&self, function: &TypedFunction, model: &mut ScopeModel, observations: &Observations) -> Vec<Finding> {
        let handle_returning = self.classifier.is_handle_returning(function.id);
        let release = self.capability.release_method();
        let mut findings = Vec::new();

        let ids: Vec<BindingId> = model.bindings().iter().map(|b| b.id).collect();
        for id in ids {
            let index = id.index();
            let witnesses: Vec<&Witness> = observations
                .witnesses
                .iter()
                .filter(|w| w.binding == id)
                .collect();
            let deferred = witnesses.iter().any(|w| w.deferred);
            let Some(binding) = model.binding_mut(id) else {
                continue;
            };
            binding.released = !witnesses.is_empty();
            binding.release_mode = if deferred {
                ReleaseMode::Deferred
            } else if binding.released {
                ReleaseMode::Direct
            } else {
                ReleaseMode::None
            };
            binding.escaped = observations.escaped[index];
            binding.returned = observations.returned[index];

            let name = self.program.symbols.name(binding.symbol).to_string();
            if observations.leaked[index] && !(handle_returning && binding.returned) {
                findings.push(Finding::new(
                    binding.acquisition_site,
                    FindingKind::MissingRelease,
                    format!(
                        "`{}` is not released on every path; call `{}.{}()` before returning",
                        name, name, release
                    ),
                    &function.name,
                ));
            }
            if !deferred {
                let mut seen = FxHashSet::default();
                for witness in witnesses.iter().filter(|w| seen.insert(w.span)) {
                    findings.push(Finding::new(
                        witness.span,
                        FindingKind::PreferDeferredRelease,
                        format!(
                            "`{}.{}()` is called directly; prefer `defer {}.{}()` after the acquisition",
                            name, release, name, release
                        ),
                        &function.name,
                    ));
                }
            }
        }
        findings
    }
}

/// Whether parameter `slot` of `function` is released or handed off on
/// every path from entry to either exit
///
/// Runs the same dataflow as [`LifetimeAnalyzer::analyze_function`] with a
/// single binding for the parameter, live at entry.
pub(crate) fn parameter_is_covered(
    program: &TypedProgram,
    capability: &ResolvedCapability,
    function: &TypedFunction,
    slot: usize,
    hand_off: &mut dyn EscapeOracle,
) -> bool {
    let Some(model) = ScopeModel::for_parameter(function, slot) else {
        return false;
    };
    let Ok(cfg) = build_cfg(function) else {
        return false;
    };
    let Ok(dominance) = DominanceTree::build(&cfg) else {
        return false;
    };
    let (events, _) = collect_events(program, capability, hand_off, function.id, &cfg, &model);
    let flow = BindingFlow {
        cfg: &cfg,
        dominance: &dominance,
        model: &model,
        events,
        acquired_in: vec![Some(cfg.entry)],
        entry_state: LIVE,
    };
    let (observations, _) = flow.run();
    !observations.leaked.iter().any(|leaked| *leaked)
}

/// Events of every block, and the block of each binding's acquisition
fn collect_events(
    program: &TypedProgram,
    capability: &ResolvedCapability,
    hand_off: &mut dyn EscapeOracle,
    function: FunctionId,
    cfg: &ControlFlowGraph<'_>,
    model: &ScopeModel,
) -> (Vec<Vec<Event>>, Vec<Option<BlockId>>) {
    let mut collector = EventCollector {
        program,
        capability,
        hand_off,
        function,
        model,
        events: Vec::new(),
    };
    let mut events = Vec::with_capacity(cfg.len());
    let mut acquired_in = vec![None; model.bindings().len()];
    for block in &cfg.blocks {
        collector.events.clear();
        for op in &block.ops {
            collector.op(op);
        }
        for event in &collector.events {
            if let Event::Acquire(binding) = event {
                acquired_in[binding.index()] = Some(block.id);
            }
        }
        events.push(collector.events.clone());
    }
    (events, acquired_in)
}

/// Turns CFG ops into events over the symbols the scope model tracks
struct EventCollector<'a, 'o> {
    program: &'a TypedProgram,
    capability: &'a ResolvedCapability,
    hand_off: &'a mut (dyn EscapeOracle + 'o),
    function: FunctionId,
    model: &'a ScopeModel,
    events: Vec<Event>,
}

impl EventCollector<'_, '_> {
    fn tracked(&self, symbol: SymbolId) -> bool {
        !self.model.bindings_of(symbol).is_empty()
    }

    fn op(&mut self, op: &CfgOp<'_>) {
        match *op {
            CfgOp::Evaluate(expr) => self.expression(expr, false),
            CfgOp::Bind {
                statement,
                targets,
                value,
            } => {
                self.expression(value, false);
                for (symbol, site) in store_uses(self.program, self.function, targets, value) {
                    if self.tracked(symbol) && self.hand_off.is_escaping(&site) {
                        self.events.push(Event::Escape {
                            symbol,
                            returned: false,
                        });
                    }
                }
                for (position, target) in targets.iter().enumerate() {
                    let AssignTargetKind::Symbol(symbol) = target.kind else {
                        continue;
                    };
                    match self.model.binding_at(statement, position) {
                        Some(binding) => self.events.push(Event::Acquire(binding)),
                        None if self.tracked(symbol) => self.events.push(Event::Overwrite(symbol)),
                        None => {}
                    }
                }
            }
            CfgOp::Defer { call } => self.expression(call, true),
            CfgOp::Return { values, .. } => {
                for value in values {
                    self.expression(value, false);
                }
                for (symbol, _) in return_uses(values) {
                    if self.tracked(symbol) {
                        self.events.push(Event::Escape {
                            symbol,
                            returned: true,
                        });
                    }
                }
            }
            CfgOp::Panic { value, .. } => {
                if let Some(value) = value {
                    self.expression(value, false);
                }
            }
        }
    }

    /// Events of `expr`, children first; `deferred` marks a `defer` call
    fn expression(&mut self, expr: &TypedExpression, deferred: bool) {
        match &expr.kind {
            // The right operand may not run
            TypedExpressionKind::Binary {
                op: BinaryOp::And | BinaryOp::Or,
                left,
                ..
            } => {
                self.expression(left, deferred);
                return;
            }
            TypedExpressionKind::Call { callee, args } => {
                if let TypedExpressionKind::FunctionLiteral(literal) = callee.kind {
                    for arg in args {
                        self.expression(arg, deferred);
                    }
                    self.arguments(expr);
                    self.literal_releases(literal, expr.span, deferred);
                    return;
                }
            }
            _ => {}
        }

        for child in expr.children() {
            self.expression(child, deferred);
        }
        self.arguments(expr);
        if let Some(symbol) = self.capability.released_symbol(expr) {
            if self.tracked(symbol) {
                self.events.push(Event::Release {
                    symbol,
                    span: expr.span,
                    deferred,
                });
            }
        }
    }

    fn arguments(&mut self, expr: &TypedExpression) {
        for (symbol, site) in argument_uses(expr) {
            if self.tracked(symbol) && self.hand_off.is_escaping(&site) {
                trace!("{} escapes at {:?}", symbol, site);
                self.events.push(Event::Escape {
                    symbol,
                    returned: false,
                });
            }
        }
    }

    /// A directly invoked literal releases what its body, and the literals
    /// it invokes in turn, release
    fn literal_releases(&mut self, literal: FunctionId, span: SourceSpan, deferred: bool) {
        let Some(released) = self.hand_off.released_in(literal) else {
            return;
        };
        let mut symbols: Vec<SymbolId> = released
            .iter()
            .copied()
            .filter(|symbol| !self.model.bindings_of(*symbol).is_empty())
            .collect();
        symbols.sort();
        for symbol in symbols {
            self.events.push(Event::Release {
                symbol,
                span,
                deferred,
            });
        }
    }
}

/// What the final replay saw
struct Observations {
    /// Whether to record at all; off while iterating to the fixpoint
    enabled: bool,
    leaked: Vec<bool>,
    escaped: Vec<bool>,
    returned: Vec<bool>,
    witnesses: Vec<Witness>,
}

impl Observations {
    fn new(bindings: usize) -> Self {
        Self {
            enabled: true,
            leaked: vec![false; bindings],
            escaped: vec![false; bindings],
            returned: vec![false; bindings],
            witnesses: Vec::new(),
        }
    }

    fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(0)
        }
    }

    fn leak(&mut self, binding: usize) {
        if self.enabled {
            self.leaked[binding] = true;
        }
    }
}

struct BindingFlow<'a, 'c> {
    cfg: &'a ControlFlowGraph<'c>,
    dominance: &'a DominanceTree,
    model: &'a ScopeModel,
    /// Per block, indexed by block id
    events: Vec<Vec<Event>>,
    /// Block of each binding's acquisition; `None` if it is unreachable
    acquired_in: Vec<Option<BlockId>>,
    /// State of every binding on entry to the function
    entry_state: BindingStates,
}

impl BindingFlow<'_, '_> {
    /// Solve, then replay every block once with the fixed in-states
    fn run(&self) -> (Observations, usize) {
        let (in_states, iterations) = self.solve();
        let mut observations = Observations::new(self.model.bindings().len());
        for &block in self.dominance.reverse_postorder() {
            let mut state = in_states[block.index()].clone();
            self.transfer(block, &mut state, &mut observations);
        }
        (observations, iterations)
    }

    /// In-state of every block at the fixpoint, and the number of rounds
    fn solve(&self) -> (Vec<Vec<BindingStates>>, usize) {
        let width = self.model.bindings().len();
        let mut in_states = vec![vec![0; width]; self.cfg.len()];
        let mut out_states: Vec<Vec<BindingStates>> = vec![vec![0; width]; self.cfg.len()];
        let mut scratch = Observations::disabled();
        let mut iterations = 0;

        let mut changed = true;
        while changed {
            changed = false;
            iterations += 1;
            for &block in self.dominance.reverse_postorder() {
                let mut state = if block == self.cfg.entry {
                    vec![self.entry_state; width]
                } else {
                    vec![0; width]
                };
                for pred in self.cfg.predecessors(block) {
                    for (slot, incoming) in state.iter_mut().zip(&out_states[pred.index()]) {
                        *slot |= *incoming;
                    }
                }
                in_states[block.index()] = state.clone();
                self.transfer(block, &mut state, &mut scratch);
                if state != out_states[block.index()] {
                    out_states[block.index()] = state;
                    changed = true;
                }
            }
        }
        (in_states, iterations)
    }

    fn transfer(&self, block: BlockId, state: &mut [BindingStates], observations: &mut Observations) {
        let events = self.events.get(block.index()).map(Vec::as_slice).unwrap_or(&[]);
        for event in events {
            match *event {
                Event::Acquire(binding) => {
                    let index = binding.index();
                    if state[index] & LIVE != 0 {
                        observations.leak(index);
                    }
                    if let Some(symbol) = self.model.binding(binding).map(|b| b.symbol) {
                        for &other in self.model.bindings_of(symbol) {
                            if other != binding {
                                abandon(state, other.index(), observations);
                            }
                        }
                    }
                    state[index] = LIVE;
                }
                Event::Overwrite(symbol) => {
                    for &binding in self.model.bindings_of(symbol) {
                        abandon(state, binding.index(), observations);
                    }
                }
                Event::Release {
                    symbol,
                    span,
                    deferred,
                } => {
                    for &binding in self.model.bindings_of(symbol) {
                        let index = binding.index();
                        let live = state[index] & LIVE != 0;
                        // Every direct call on an acquired handle is a witness;
                        // a deferred one only if it still covers something
                        let witness = if deferred {
                            live && self.registration_guards(binding, block)
                        } else {
                            state[index] & (LIVE | COVERED) != 0
                        };
                        if !witness {
                            continue;
                        }
                        if observations.enabled {
                            observations.witnesses.push(Witness {
                                binding,
                                span,
                                deferred,
                            });
                        }
                        if live {
                            state[index] = (state[index] & !LIVE) | COVERED;
                        }
                    }
                }
                Event::Escape { symbol, returned } => {
                    for &binding in self.model.bindings_of(symbol) {
                        let index = binding.index();
                        if state[index] & LIVE == 0 {
                            continue;
                        }
                        if observations.enabled {
                            observations.escaped[index] = true;
                            observations.returned[index] |= returned;
                        }
                        state[index] = (state[index] & !LIVE) | COVERED;
                    }
                }
            }
        }

        let is_exit = Some(block) == self.cfg.normal_exit || Some(block) == self.cfg.unwind_exit;
        if is_exit {
            for (index, states) in state.iter().enumerate() {
                if states & LIVE != 0 {
                    observations.leak(index);
                }
            }
        }
    }

    /// A `defer` in `block` covers `binding` only below its acquisition
    fn registration_guards(&self, binding: BindingId, block: BlockId) -> bool {
        match self.acquired_in.get(binding.index()).copied().flatten() {
            Some(acquired) => self.dominance.dominates(acquired, block),
            None => false,
        }
    }
}

/// A live value that is about to be lost leaks
fn abandon(state: &mut [BindingStates], index: usize, observations: &mut Observations) {
    if state[index] & LIVE != 0 {
        observations.leak(index);
        state[index] = (state[index] & !LIVE) | UNACQUIRED;
    }
}
