//! Analysis Engine and Passes for Semantic Graphs
//!
//! The engine runs a preliminary escape pass over the whole program, then
//! the lifetime analyzer once per function.

pub mod analysis_engine;
pub mod escape_analyzer;
pub mod lifetime_analyzer;

mod analysis_engine_test;
mod escape_analyzer_test;

pub use analysis_engine::{AnalysisEngine, AnalysisMetrics, AnalysisOptions, AnalysisResults};
pub use escape_analyzer::{EscapeClassifier, FunctionFlow, UseSite};
pub use lifetime_analyzer::{FunctionReport, LifetimeAnalysisError, LifetimeAnalyzer};
