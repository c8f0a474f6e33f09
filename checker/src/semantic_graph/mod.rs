//! Semantic Graph Construction
//!
//! Turns one typed function into the graphs the release checker runs on.
//!
//! Architecture:
//! ```,ignore
//! TypedFunction → Control Flow Graph → Dominance Tree ┐
//!               → Scope Model (handle bindings)       ├→ Analysis Results
//! TypedProgram  → Escape Classifier (interprocedural) ┘
//! ```

use std::fmt;

use source_map::SourceSpan;

use crate::tast::BindingId;

pub use self::cfg::*;
pub use self::cfg_builder::*;
pub use self::dominance::*;
pub use self::scope_model::*;

pub mod analysis;
pub mod cfg;
pub mod cfg_builder;
pub mod dominance;
pub mod scope_model;

#[cfg(test)]
pub(crate) mod test_support;

/// A broken invariant inside the analysis of one function
///
/// These never come from the analyzed source itself; the engine turns them
/// into an internal-error finding for the function and keeps going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisInternalError {
    /// A handle binding is not owned by any scope
    BindingWithoutScope { binding: BindingId, site: SourceSpan },

    /// The CFG failed validation after construction
    InvalidCfg(String),

    /// Dominance information could not be computed
    DominanceAnalysisFailed(String),

    /// Any other broken invariant
    Invariant(String),
}

impl fmt::Display for AnalysisInternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisInternalError::BindingWithoutScope { binding, .. } => {
                write!(f, "handle binding {} has no declaring scope", binding)
            }
            AnalysisInternalError::InvalidCfg(message) => write!(f, "invalid CFG: {}", message),
            AnalysisInternalError::DominanceAnalysisFailed(message) => {
                write!(f, "dominance analysis failed: {}", message)
            }
            AnalysisInternalError::Invariant(message) => {
                write!(f, "internal invariant violated: {}", message)
            }
        }
    }
}

impl std::error::Error for AnalysisInternalError {}
