//! Dominance Analysis
//!
//! Computes immediate dominators with the iterative algorithm of Cooper,
//! Harvey and Kennedy ("A Simple, Fast Dominance Algorithm"). For the small
//! graphs of single function bodies it converges in two or three passes over
//! the reverse post-order and needs nothing beyond the `idom` array.
//!
//! ## Algorithm Overview
//!
//! 1. **DFS Numbering**: post-order numbers and reverse post-order from entry
//! 2. **Fixpoint**: for every block in RPO, intersect the dominator chains of
//!    its processed predecessors until no `idom` changes
//! 3. **Tree Construction**: children lists from the `idom` array
//!
//! The lifetime analyzer uses [`DominanceTree::dominates`] to decide whether a
//! `defer` registration is guaranteed to follow an acquisition.

use std::fmt;

use super::cfg::ControlFlowGraph;
use crate::tast::BlockId;

/// **Dominance Tree**
///
/// Immediate dominators, tree children and the block orderings computed
/// along the way. Indexed by block id; the graph must have dense ids.
#[derive(Debug, Clone)]
pub struct DominanceTree {
    /// `idom[b]`; the entry is its own immediate dominator
    idom: Vec<Option<BlockId>>,

    /// Children in the dominance tree
    children: Vec<Vec<BlockId>>,

    /// Reverse post-order from the entry (good ordering for forward dataflow)
    reverse_postorder: Vec<BlockId>,

    /// Post-order number of each block
    postorder_number: Vec<usize>,

    entry: BlockId,

    /// Passes the fixpoint loop needed
    pub iterations: usize,
}

/// **Dominance Analysis Errors**
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DominanceError {
    /// CFG has no entry block or is malformed
    InvalidCfg(String),

    /// CFG has blocks the entry cannot reach
    UnreachableBlocks(Vec<BlockId>),
}

impl fmt::Display for DominanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DominanceError::InvalidCfg(msg) => write!(f, "Invalid CFG: {}", msg),
            DominanceError::UnreachableBlocks(blocks) => {
                write!(f, "Unreachable blocks: {:?}", blocks)
            }
        }
    }
}

impl std::error::Error for DominanceError {}

impl DominanceTree {
    /// **Build the dominance tree of `cfg`**
    ///
    /// # Errors
    /// Returns `DominanceError` if the entry is missing or some block is not
    /// reachable from it (run [`ControlFlowGraph::remove_unreachable`] first).
    pub fn build(cfg: &ControlFlowGraph<'_>) -> Result<Self, DominanceError> {
        let n = cfg.len();
        if cfg.block(cfg.entry).is_none() {
            return Err(DominanceError::InvalidCfg(
                "Entry block not found in CFG".to_string(),
            ));
        }

        let (postorder, postorder_number) = Self::compute_postorder(cfg);
        if postorder.len() != n {
            let unreachable = (0..n)
                .filter(|&i| postorder_number[i] == usize::MAX)
                .map(|i| BlockId::from_raw(i as u32))
                .collect();
            return Err(DominanceError::UnreachableBlocks(unreachable));
        }

        let reverse_postorder: Vec<BlockId> = postorder.into_iter().rev().collect();
        let mut tree = Self {
            idom: vec![None; n],
            children: vec![Vec::new(); n],
            reverse_postorder,
            postorder_number,
            entry: cfg.entry,
            iterations: 0,
        };
        tree.compute_idoms(cfg);
        tree.build_children();
        Ok(tree)
    }

    /// **Iterative DFS numbering**
    ///
    /// Blocks the entry cannot reach keep `usize::MAX` as their number.
    fn compute_postorder(cfg: &ControlFlowGraph<'_>) -> (Vec<BlockId>, Vec<usize>) {
        let n = cfg.len();
        let mut visited = vec![false; n];
        let mut number = vec![usize::MAX; n];
        let mut postorder = Vec::with_capacity(n);

        // (block, index of the next successor to visit)
        let mut stack = vec![(cfg.entry, 0usize)];
        visited[cfg.entry.index()] = true;

        while let Some((block, next)) = stack.pop() {
            let successors = cfg.successors(block);
            if let Some(&succ) = successors.get(next) {
                stack.push((block, next + 1));
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            } else {
                number[block.index()] = postorder.len();
                postorder.push(block);
            }
        }
        (postorder, number)
    }

    /// **Cooper-Harvey-Kennedy fixpoint**
    fn compute_idoms(&mut self, cfg: &ControlFlowGraph<'_>) {
        self.idom[self.entry.index()] = Some(self.entry);
        let mut changed = true;
        while changed {
            changed = false;
            self.iterations += 1;
            for &block in self.reverse_postorder.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in cfg.predecessors(block) {
                    if self.idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => self.intersect(pred, current),
                    });
                }
                if new_idom.is_some() && self.idom[block.index()] != new_idom {
                    self.idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }
    }

    /// Walk both dominator chains up to their common ancestor
    fn intersect(&self, a: BlockId, b: BlockId) -> BlockId {
        let mut finger1 = a;
        let mut finger2 = b;
        while finger1 != finger2 {
            while self.postorder_number[finger1.index()] < self.postorder_number[finger2.index()] {
                finger1 = self.idom[finger1.index()].unwrap_or(self.entry);
            }
            while self.postorder_number[finger2.index()] < self.postorder_number[finger1.index()] {
                finger2 = self.idom[finger2.index()].unwrap_or(self.entry);
            }
        }
        finger1
    }

    fn build_children(&mut self) {
        for &block in &self.reverse_postorder {
            if block == self.entry {
                continue;
            }
            if let Some(parent) = self.idom[block.index()] {
                self.children[parent.index()].push(block);
            }
        }
    }

    /// **Check if block `a` dominates block `b`**
    ///
    /// Reflexive: every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom.get(current.index()).copied().flatten() {
                Some(parent) if parent != current => current = parent,
                _ => return false,
            }
        }
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Immediate dominator; `None` for the entry
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.idom
            .get(block.index())
            .copied()
            .flatten()
            .filter(|&parent| parent != block)
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children
            .get(block.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn reverse_postorder(&self) -> &[BlockId] {
        &self.reverse_postorder
    }

    /// Position of each block in reverse post-order
    pub fn rpo_positions(&self) -> Vec<usize> {
        let mut positions = vec![usize::MAX; self.idom.len()];
        for (position, block) in self.reverse_postorder.iter().enumerate() {
            positions[block.index()] = position;
        }
        positions
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }
}
