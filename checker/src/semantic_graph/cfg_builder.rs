//! Builder for constructing Control Flow Graphs from the typed AST
//!
//! Lowers one function body into basic blocks. Conditions and expression
//! statements whose top-level operator is `&&` or `||` are split so the right
//! operand sits in its own, conditionally executed block; short-circuit
//! operators nested deeper stay inside a single op.

use std::fmt;

use log::trace;
use source_map::SourceSpan;

use super::cfg::{CfgOp, ControlFlowGraph, DeferredCall, Terminator};
use crate::tast::node::{
    BinaryOp, TypedBlock, TypedExpression, TypedExpressionKind, TypedFunction, TypedStatement,
    TypedStatementKind, UnaryOp,
};
use crate::tast::BlockId;

/// Why a function body could not be lowered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgBuildError {
    /// A control-flow shape the builder does not model, such as `goto`
    UnsupportedConstruct { construct: String, span: SourceSpan },
    /// The function has no body
    MissingBody,
}

impl fmt::Display for CfgBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgBuildError::UnsupportedConstruct { construct, .. } => {
                write!(f, "unsupported control flow: {}", construct)
            }
            CfgBuildError::MissingBody => write!(f, "function has no body"),
        }
    }
}

impl std::error::Error for CfgBuildError {}

/// Jump targets of an enclosing loop or switch
#[derive(Debug, Clone, Copy)]
struct JumpTargets {
    break_target: BlockId,
    /// `None` for a switch; `continue` goes to the enclosing loop
    continue_target: Option<BlockId>,
}

/// Builder for one function's CFG
pub struct CfgBuilder<'a> {
    cfg: ControlFlowGraph<'a>,
    /// Block receiving new ops; `None` right after a jump
    current: Option<BlockId>,
    jumps: Vec<JumpTargets>,
}

/// Build the CFG of `function`, with unreachable blocks removed
pub fn build_cfg(function: &TypedFunction) -> Result<ControlFlowGraph<'_>, CfgBuildError> {
    let body = function.body.as_ref().ok_or(CfgBuildError::MissingBody)?;
    let mut builder = CfgBuilder {
        cfg: ControlFlowGraph::new(function.id),
        current: None,
        jumps: Vec::new(),
    };
    builder.current = Some(builder.cfg.entry);
    builder.build_block(body)?;

    // Falling off the end is an implicit `return`
    if let Some(current) = builder.current {
        let exit = builder.normal_exit();
        builder.cfg.terminate(current, Terminator::Goto(exit));
    }
    let removed = builder.cfg.remove_unreachable();
    trace!(
        "CFG for {}: {} blocks, {} edges, {} unreachable removed",
        function.name,
        builder.cfg.len(),
        builder.cfg.edge_count(),
        removed
    );
    Ok(builder.cfg)
}

impl<'a> CfgBuilder<'a> {
    /// Current block, starting a fresh (unreachable) one after a jump
    fn current_block(&mut self) -> BlockId {
        match self.current {
            Some(block) => block,
            None => {
                let block = self.cfg.add_block();
                self.current = Some(block);
                block
            }
        }
    }

    fn push(&mut self, op: CfgOp<'a>) {
        let block = self.current_block();
        self.cfg.push_op(block, op);
    }

    /// Terminate the current block with a jump and leave no current block
    fn jump(&mut self, target: BlockId) {
        let block = self.current_block();
        self.cfg.terminate(block, Terminator::Goto(target));
        self.current = None;
    }

    /// Continue in `block`, jumping there from the current block if any
    fn switch_to(&mut self, block: BlockId) {
        if let Some(current) = self.current {
            self.cfg.terminate(current, Terminator::Goto(block));
        }
        self.current = Some(block);
    }

    fn normal_exit(&mut self) -> BlockId {
        match self.cfg.normal_exit {
            Some(exit) => exit,
            None => {
                let exit = self.cfg.add_block();
                self.cfg.terminate(exit, Terminator::Exit);
                self.cfg.normal_exit = Some(exit);
                exit
            }
        }
    }

    fn unwind_exit(&mut self) -> BlockId {
        match self.cfg.unwind_exit {
            Some(exit) => exit,
            None => {
                let exit = self.cfg.add_block();
                self.cfg.terminate(exit, Terminator::Unwind);
                self.cfg.unwind_exit = Some(exit);
                exit
            }
        }
    }

    fn build_block(&mut self, block: &'a TypedBlock) -> Result<(), CfgBuildError> {
        for statement in &block.statements {
            self.build_statement(statement)?;
        }
        Ok(())
    }

    fn build_statement(&mut self, statement: &'a TypedStatement) -> Result<(), CfgBuildError> {
        match &statement.kind {
            TypedStatementKind::Bind { targets, value, .. } => self.push(CfgOp::Bind {
                statement: statement.id,
                targets,
                value,
            }),
            TypedStatementKind::VarDecl { .. } => {}
            TypedStatementKind::Expression(expr) => self.evaluate(expr),
            TypedStatementKind::If {
                condition,
                then_block,
                else_branch,
            } => {
                let then_target = self.cfg.add_block();
                let join = self.cfg.add_block();
                let else_target = match else_branch {
                    Some(_) => self.cfg.add_block(),
                    None => join,
                };
                self.condition(condition, then_target, else_target);

                self.current = Some(then_target);
                self.build_block(then_block)?;
                self.switch_to(join);

                if let Some(else_branch) = else_branch {
                    self.current = Some(else_target);
                    self.build_statement(else_branch)?;
                    self.switch_to(join);
                }
                self.current = Some(join);
            }
            TypedStatementKind::While { condition, body } => {
                let header = self.cfg.add_block();
                let body_block = self.cfg.add_block();
                let after = self.cfg.add_block();
                self.switch_to(header);
                self.condition(condition, body_block, after);
                self.build_loop_body(body, body_block, header, after)?;
            }
            TypedStatementKind::Loop { body } => {
                let header = self.cfg.add_block();
                let after = self.cfg.add_block();
                self.switch_to(header);
                self.build_loop_body(body, header, header, after)?;
            }
            TypedStatementKind::For { iterable, body, .. } => {
                self.push(CfgOp::Evaluate(iterable));
                let header = self.cfg.add_block();
                let body_block = self.cfg.add_block();
                let after = self.cfg.add_block();
                self.switch_to(header);
                self.cfg.terminate(
                    header,
                    Terminator::Branch {
                        then_target: body_block,
                        else_target: after,
                    },
                );
                self.build_loop_body(body, body_block, header, after)?;
            }
            TypedStatementKind::Switch {
                discriminant,
                cases,
                default,
            } => {
                self.push(CfgOp::Evaluate(discriminant));
                for case in cases {
                    for value in &case.values {
                        self.push(CfgOp::Evaluate(value));
                    }
                }
                let dispatch = self.current_block();
                let after = self.cfg.add_block();
                let mut targets = smallvec::SmallVec::new();
                let mut bodies = Vec::new();
                for case in cases {
                    let target = self.cfg.add_block();
                    targets.push(target);
                    bodies.push((target, &case.body));
                }
                if let Some(default) = default {
                    let target = self.cfg.add_block();
                    targets.push(target);
                    bodies.push((target, default));
                } else {
                    targets.push(after);
                }
                self.cfg.terminate(dispatch, Terminator::Switch { targets });

                // `break` leaves the switch; `continue` still targets the loop
                let continue_target = self.jumps.iter().rev().find_map(|j| j.continue_target);
                self.jumps.push(JumpTargets {
                    break_target: after,
                    continue_target,
                });
                for (target, body) in bodies {
                    self.current = Some(target);
                    self.build_block(body)?;
                    self.switch_to(after);
                }
                self.jumps.pop();
                self.current = Some(after);
            }
            TypedStatementKind::Return(values) => {
                self.push(CfgOp::Return {
                    values,
                    span: statement.span,
                });
                let exit = self.normal_exit();
                self.jump(exit);
            }
            TypedStatementKind::Defer(call) => {
                let block = self.current_block();
                self.cfg.push_op(block, CfgOp::Defer { call });
                self.cfg.deferred.push(DeferredCall { block, call });
            }
            TypedStatementKind::Panic(value) => {
                self.push(CfgOp::Panic {
                    value: value.as_ref(),
                    span: statement.span,
                });
                let exit = self.unwind_exit();
                self.jump(exit);
            }
            TypedStatementKind::Break => {
                let target = self
                    .jumps
                    .last()
                    .map(|j| j.break_target)
                    .ok_or_else(|| unsupported("`break` outside of a loop or switch", statement.span))?;
                self.jump(target);
            }
            TypedStatementKind::Continue => {
                let target = self
                    .jumps
                    .iter()
                    .rev()
                    .find_map(|j| j.continue_target)
                    .ok_or_else(|| unsupported("`continue` outside of a loop", statement.span))?;
                self.jump(target);
            }
            TypedStatementKind::Goto(label) => {
                return Err(unsupported(&format!("`goto {}`", label), statement.span));
            }
            TypedStatementKind::Block(block) => self.build_block(block)?,
        }
        Ok(())
    }

    /// Body of a loop entered at `body_block`; the end jumps back to `header`
    fn build_loop_body(
        &mut self,
        body: &'a TypedBlock,
        body_block: BlockId,
        header: BlockId,
        after: BlockId,
    ) -> Result<(), CfgBuildError> {
        self.jumps.push(JumpTargets {
            break_target: after,
            continue_target: Some(header),
        });
        self.current = Some(body_block);
        self.build_block(body)?;
        if self.current.is_some() {
            self.jump(header);
        }
        self.jumps.pop();
        self.current = Some(after);
        Ok(())
    }

    /// Expression statement; a top-level `&&`/`||` becomes a branch
    fn evaluate(&mut self, expr: &'a TypedExpression) {
        match &expr.kind {
            TypedExpressionKind::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                left,
                right,
            } => {
                self.evaluate(left);
                let rhs = self.cfg.add_block();
                let join = self.cfg.add_block();
                let (then_target, else_target) = match op {
                    BinaryOp::And => (rhs, join),
                    _ => (join, rhs),
                };
                let block = self.current_block();
                self.cfg.terminate(
                    block,
                    Terminator::Branch {
                        then_target,
                        else_target,
                    },
                );
                self.current = Some(rhs);
                self.evaluate(right);
                self.switch_to(join);
            }
            _ => self.push(CfgOp::Evaluate(expr)),
        }
    }

    /// Branch to `then_target` when `condition` holds, else to `else_target`
    fn condition(&mut self, condition: &'a TypedExpression, then_target: BlockId, else_target: BlockId) {
        match &condition.kind {
            TypedExpressionKind::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let rhs = self.cfg.add_block();
                self.condition(left, rhs, else_target);
                self.current = Some(rhs);
                self.condition(right, then_target, else_target);
            }
            TypedExpressionKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let rhs = self.cfg.add_block();
                self.condition(left, then_target, rhs);
                self.current = Some(rhs);
                self.condition(right, then_target, else_target);
            }
            TypedExpressionKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.condition(operand, else_target, then_target),
            _ => {
                self.push(CfgOp::Evaluate(condition));
                let block = self.current_block();
                self.cfg.terminate(
                    block,
                    Terminator::Branch {
                        then_target,
                        else_target,
                    },
                );
                self.current = None;
            }
        }
    }
}

fn unsupported(construct: &str, span: SourceSpan) -> CfgBuildError {
    CfgBuildError::UnsupportedConstruct {
        construct: construct.to_string(),
        span,
    }
}
