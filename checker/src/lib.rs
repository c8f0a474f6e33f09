pub mod capability;
pub mod compilation;
pub mod config;
pub mod error_codes;
pub mod logging;
pub mod report;
pub mod semantic_graph;
pub mod suppression;
pub mod tast;

pub use capability::{AcquirePattern, CapabilityDescriptor, ConfigurationError, ResolvedCapability};
pub use compilation::{CompilationOutput, CompilationUnit, FrontendError};
pub use config::{ConfigOverrides, LeakGuardConfig};
pub use report::{Finding, FindingKind, Reporter};
pub use semantic_graph::analysis::{AnalysisEngine, AnalysisMetrics, AnalysisOptions, AnalysisResults};
pub use suppression::{CommentSuppressions, NoSuppressions, SuppressionLookup};
