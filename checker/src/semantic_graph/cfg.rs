//! Control Flow Graph of one function body
//!
//! Blocks hold a list of [`CfgOp`]s that borrow the typed AST they were
//! lowered from, so a graph lives no longer than its [`TypedProgram`].
//!
//! Key properties:
//! - one entry block, a normal exit and an unwind exit (each only present
//!   when some path reaches it)
//! - `defer` registrations are kept in registration order
//! - after [`ControlFlowGraph::remove_unreachable`] every block is reachable
//!   from the entry and block ids are dense
//!
//! [`TypedProgram`]: crate::tast::TypedProgram

use std::fmt;

use smallvec::SmallVec;
use source_map::SourceSpan;

use crate::tast::node::{AssignTarget, TypedExpression};
use crate::tast::{BlockId, FunctionId, StatementId};

/// Successor and predecessor lists; most blocks have at most two
pub type BlockList = SmallVec<[BlockId; 2]>;

/// One operation inside a basic block, in execution order
#[derive(Debug, Clone, Copy)]
pub enum CfgOp<'a> {
    /// Expression evaluated for its effect: an expression statement, a
    /// branch condition, a switch discriminant or a loop iterable
    Evaluate(&'a TypedExpression),

    /// `let` or assignment
    Bind {
        statement: StatementId,
        targets: &'a [AssignTarget],
        value: &'a TypedExpression,
    },

    /// `defer call`; the call runs just before the function exits
    Defer { call: &'a TypedExpression },

    /// `return values`; always the last op of its block
    Return {
        values: &'a [TypedExpression],
        span: SourceSpan,
    },

    /// `panic(value)`; always the last op of its block
    Panic {
        value: Option<&'a TypedExpression>,
        span: SourceSpan,
    },
}

impl CfgOp<'_> {
    pub fn span(&self) -> SourceSpan {
        match self {
            CfgOp::Evaluate(expr) => expr.span,
            CfgOp::Bind { value, .. } => value.span,
            CfgOp::Defer { call } => call.span,
            CfgOp::Return { span, .. } | CfgOp::Panic { span, .. } => *span,
        }
    }
}

/// How control leaves a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// Not terminated yet; only seen while the graph is being built
    Open,

    Goto(BlockId),

    /// Two-way branch on the condition evaluated last in the block
    Branch {
        then_target: BlockId,
        else_target: BlockId,
    },

    /// Multi-way dispatch of a `switch` (case bodies, then default or join)
    Switch { targets: SmallVec<[BlockId; 4]> },

    /// Normal function exit
    Exit,

    /// Unwind exit reached by `panic`
    Unwind,
}

impl Terminator {
    pub fn targets(&self) -> BlockList {
        match self {
            Terminator::Goto(target) => smallvec::smallvec![*target],
            Terminator::Branch {
                then_target,
                else_target,
            } => {
                if then_target == else_target {
                    smallvec::smallvec![*then_target]
                } else {
                    smallvec::smallvec![*then_target, *else_target]
                }
            }
            Terminator::Switch { targets } => {
                let mut unique = BlockList::new();
                for target in targets {
                    if !unique.contains(target) {
                        unique.push(*target);
                    }
                }
                unique
            }
            Terminator::Open | Terminator::Exit | Terminator::Unwind => BlockList::new(),
        }
    }

    fn remap(&mut self, map: &[Option<BlockId>]) {
        let fix = |id: &mut BlockId| {
            if let Some(Some(new_id)) = map.get(id.index()) {
                *id = *new_id;
            }
        };
        match self {
            Terminator::Goto(target) => fix(target),
            Terminator::Branch {
                then_target,
                else_target,
            } => {
                fix(then_target);
                fix(else_target);
            }
            Terminator::Switch { targets } => targets.iter_mut().for_each(fix),
            Terminator::Open | Terminator::Exit | Terminator::Unwind => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasicBlock<'a> {
    pub id: BlockId,
    pub ops: Vec<CfgOp<'a>>,
    pub terminator: Terminator,
    pub successors: BlockList,
    pub predecessors: BlockList,
}

impl<'a> BasicBlock<'a> {
    fn new(id: BlockId) -> Self {
        Self {
            id,
            ops: Vec::new(),
            terminator: Terminator::Open,
            successors: BlockList::new(),
            predecessors: BlockList::new(),
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self.terminator, Terminator::Exit | Terminator::Unwind)
    }
}

/// A `defer` registration
#[derive(Debug, Clone, Copy)]
pub struct DeferredCall<'a> {
    pub block: BlockId,
    pub call: &'a TypedExpression,
}

#[derive(Debug, Clone)]
pub struct ControlFlowGraph<'a> {
    pub function: FunctionId,
    pub blocks: Vec<BasicBlock<'a>>,
    pub entry: BlockId,
    pub normal_exit: Option<BlockId>,
    pub unwind_exit: Option<BlockId>,
    /// In registration order; they run in reverse before either exit
    pub deferred: Vec<DeferredCall<'a>>,
}

impl<'a> ControlFlowGraph<'a> {
    /// Empty graph with just an (open) entry block
    pub fn new(function: FunctionId) -> Self {
        let entry = BlockId::from_raw(0);
        Self {
            function,
            blocks: vec![BasicBlock::new(entry)],
            entry,
            normal_exit: None,
            unwind_exit: None,
            deferred: Vec::new(),
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId::from_raw(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id));
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock<'a>> {
        self.blocks.get(id.index())
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock<'a>> {
        self.blocks.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn push_op(&mut self, block: BlockId, op: CfgOp<'a>) {
        if let Some(block) = self.block_mut(block) {
            block.ops.push(op);
        }
    }

    /// Set the terminator of an open block and wire up its edges
    pub fn terminate(&mut self, block: BlockId, terminator: Terminator) {
        let targets = terminator.targets();
        let Some(bb) = self.block_mut(block) else {
            return;
        };
        if bb.terminator != Terminator::Open {
            return;
        }
        bb.terminator = terminator;
        bb.successors = targets.clone();
        for target in targets {
            if let Some(succ) = self.block_mut(target) {
                if !succ.predecessors.contains(&block) {
                    succ.predecessors.push(block);
                }
            }
        }
    }

    pub fn successors(&self, id: BlockId) -> &[BlockId] {
        self.block(id).map(|b| b.successors.as_slice()).unwrap_or(&[])
    }

    pub fn predecessors(&self, id: BlockId) -> &[BlockId] {
        self.block(id).map(|b| b.predecessors.as_slice()).unwrap_or(&[])
    }

    pub fn exit_blocks(&self) -> impl Iterator<Item = BlockId> {
        self.normal_exit.into_iter().chain(self.unwind_exit)
    }

    pub fn edge_count(&self) -> usize {
        self.blocks.iter().map(|b| b.successors.len()).sum()
    }

    /// Blocks reachable from the entry
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];
        while let Some(id) = stack.pop() {
            match seen.get_mut(id.index()) {
                Some(flag) if !*flag => *flag = true,
                _ => continue,
            }
            stack.extend(self.successors(id).iter().copied());
        }
        seen
    }

    /// Drop unreachable blocks and renumber the rest densely in their
    /// original order. Returns how many blocks were removed.
    pub fn remove_unreachable(&mut self) -> usize {
        let reachable = self.reachable();
        let removed = reachable.iter().filter(|r| !**r).count();
        if removed == 0 {
            return 0;
        }

        let mut map = vec![None; self.blocks.len()];
        let mut next = 0u32;
        for (index, keep) in reachable.iter().enumerate() {
            if *keep {
                map[index] = Some(BlockId::from_raw(next));
                next += 1;
            }
        }
        let remap = |id: BlockId| map.get(id.index()).copied().flatten();

        let blocks = std::mem::take(&mut self.blocks);
        self.blocks = blocks
            .into_iter()
            .zip(reachable.iter())
            .filter(|(_, keep)| **keep)
            .map(|(mut block, _)| {
                block.id = remap(block.id).unwrap_or(block.id);
                block.terminator.remap(&map);
                block.successors = block.successors.iter().filter_map(|&s| remap(s)).collect();
                block.predecessors = block
                    .predecessors
                    .iter()
                    .filter_map(|&p| remap(p))
                    .collect();
                block
            })
            .collect();

        self.entry = remap(self.entry).unwrap_or(self.entry);
        self.normal_exit = self.normal_exit.and_then(remap);
        self.unwind_exit = self.unwind_exit.and_then(remap);
        self.deferred = self
            .deferred
            .iter()
            .filter_map(|d| {
                remap(d.block).map(|block| DeferredCall {
                    block,
                    call: d.call,
                })
            })
            .collect();
        removed
    }

    /// Check edge symmetry, terminators and reachability
    pub fn validate(&self) -> Result<(), CfgValidationError> {
        if self.block(self.entry).is_none() {
            return Err(CfgValidationError::MissingEntryBlock);
        }
        for block in &self.blocks {
            if block.terminator == Terminator::Open {
                return Err(CfgValidationError::OpenBlock { block: block.id });
            }
            for &succ in &block.successors {
                let Some(target) = self.block(succ) else {
                    return Err(CfgValidationError::InvalidSuccessor {
                        block: block.id,
                        successor: succ,
                    });
                };
                if !target.predecessors.contains(&block.id) {
                    return Err(CfgValidationError::InconsistentEdges {
                        from: block.id,
                        to: succ,
                    });
                }
            }
        }
        let unreachable: Vec<BlockId> = self
            .reachable()
            .iter()
            .enumerate()
            .filter(|(_, r)| !**r)
            .map(|(index, _)| BlockId::from_raw(index as u32))
            .collect();
        if !unreachable.is_empty() {
            return Err(CfgValidationError::UnreachableBlocks { blocks: unreachable });
        }
        Ok(())
    }
}

impl fmt::Display for ControlFlowGraph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            write!(f, "bb{}: {} ops ->", block.id.as_raw(), block.ops.len())?;
            match &block.terminator {
                Terminator::Exit => write!(f, " exit")?,
                Terminator::Unwind => write!(f, " unwind")?,
                Terminator::Open => write!(f, " <open>")?,
                _ => {
                    for succ in &block.successors {
                        write!(f, " bb{}", succ.as_raw())?;
                    }
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgValidationError {
    MissingEntryBlock,
    OpenBlock { block: BlockId },
    InvalidSuccessor { block: BlockId, successor: BlockId },
    InconsistentEdges { from: BlockId, to: BlockId },
    UnreachableBlocks { blocks: Vec<BlockId> },
}

impl fmt::Display for CfgValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgValidationError::MissingEntryBlock => write!(f, "CFG missing entry block"),
            CfgValidationError::OpenBlock { block } => {
                write!(f, "Block {} has no terminator", block)
            }
            CfgValidationError::InvalidSuccessor { block, successor } => {
                write!(f, "Block {} references invalid successor {}", block, successor)
            }
            CfgValidationError::InconsistentEdges { from, to } => {
                write!(f, "Edge {} -> {} has no matching predecessor entry", from, to)
            }
            CfgValidationError::UnreachableBlocks { blocks } => {
                write!(f, "CFG contains unreachable blocks: {:?}", blocks)
            }
        }
    }
}

impl std::error::Error for CfgValidationError {}
