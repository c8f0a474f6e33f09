use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rayon::prelude::*;

use crate::capability::{CapabilityDescriptor, ConfigurationError, ResolvedCapability};
use crate::report::{file_may_use_handle, Finding, FindingKind};
use crate::semantic_graph::analysis::escape_analyzer::EscapeClassifier;
use crate::semantic_graph::analysis::lifetime_analyzer::{LifetimeAnalysisError, LifetimeAnalyzer};
use crate::semantic_graph::CfgBuildError;
use crate::tast::{FunctionId, TypedFunction, TypedProgram};

/// **Analysis Engine - Release Checking Pipeline**
///
/// Resolves the capability against the program, runs the preliminary escape
/// pass, then analyzes every function with a body on a rayon pool.
///
/// ```rust,ignore
/// TypedProgram → EscapeClassifier (sequential, read-only afterwards)
///              → per function: CFG + ScopeModel → LifetimeAnalyzer → Findings
/// ```
///
/// One function failing never stops the run: a body that cannot be lowered
/// becomes an `UnsupportedConstruct` notice and a broken invariant becomes an
/// `InternalError` notice.
pub struct AnalysisEngine<'p> {
    program: &'p TypedProgram,
    capability: ResolvedCapability,
    classifier: EscapeClassifier,
    options: AnalysisOptions,
    cancelled: Arc<AtomicBool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// Worker threads; 0 uses rayon's default
    pub jobs: usize,
    /// Skip files that cannot mention the handle type
    pub skip_unrelated_files: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            jobs: 0,
            skip_unrelated_files: true,
        }
    }
}

/// Findings of one run, unsorted and unfiltered
#[derive(Debug, Clone, Default)]
pub struct AnalysisResults {
    pub findings: Vec<Finding>,
    pub metrics: AnalysisMetrics,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisMetrics {
    pub functions_analyzed: usize,
    pub functions_failed: usize,
    pub files_skipped: usize,
    pub cancelled: bool,
    pub total_time: Duration,
}

impl<'p> AnalysisEngine<'p> {
    /// Resolve `descriptor` against `program` and run the preliminary pass
    pub fn new(
        descriptor: CapabilityDescriptor,
        program: &'p TypedProgram,
        options: AnalysisOptions,
    ) -> Result<Self, ConfigurationError> {
        let capability = ResolvedCapability::resolve(descriptor, &program.types)?;
        let classifier = EscapeClassifier::build(program, &capability);
        Ok(Self {
            program,
            capability,
            classifier,
            options,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn capability(&self) -> &ResolvedCapability {
        &self.capability
    }

    pub fn classifier(&self) -> &EscapeClassifier {
        &self.classifier
    }

    /// Setting the flag stops the run before the next function starts
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn run(&self) -> AnalysisResults {
        let start = Instant::now();
        let mut metrics = AnalysisMetrics::default();

        let mut functions: Vec<FunctionId> = Vec::new();
        for file in &self.program.files {
            if self.options.skip_unrelated_files
                && !file_may_use_handle(file, self.program, &self.capability)
            {
                debug!("Skipping {}: no reference to the handle type", file.name);
                metrics.files_skipped += 1;
                continue;
            }
            functions.extend(file.functions.iter().copied());
        }
        let functions: Vec<&TypedFunction> = functions
            .into_iter()
            .filter_map(|id| self.program.function(id))
            .filter(|function| function.body.is_some())
            .collect();

        let outcomes = match self.options.jobs {
            0 => self.analyze_all(&functions),
            jobs => match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
                Ok(pool) => pool.install(|| self.analyze_all(&functions)),
                Err(e) => {
                    warn!("Could not start {} workers ({}); using the global pool", jobs, e);
                    self.analyze_all(&functions)
                }
            },
        };

        let mut findings = Vec::new();
        for outcome in outcomes {
            match outcome {
                FunctionOutcome::Analyzed(mut function_findings) => {
                    metrics.functions_analyzed += 1;
                    findings.append(&mut function_findings);
                }
                FunctionOutcome::Failed(notice) => {
                    metrics.functions_failed += 1;
                    findings.push(notice);
                }
                FunctionOutcome::Cancelled => metrics.cancelled = true,
            }
        }

        metrics.total_time = start.elapsed();
        info!(
            "Analyzed {} functions ({} failed, {} files skipped) in {:?}",
            metrics.functions_analyzed, metrics.functions_failed, metrics.files_skipped, metrics.total_time
        );
        AnalysisResults { findings, metrics }
    }

    /// Per-worker buffers, merged once every function is done
    fn analyze_all(&self, functions: &[&TypedFunction]) -> Vec<FunctionOutcome> {
        functions
            .par_iter()
            .fold(Vec::new, |mut buffer, function| {
                buffer.push(self.analyze_function(function));
                buffer
            })
            .reduce(Vec::new, |mut left, mut right| {
                left.append(&mut right);
                left
            })
    }

    fn analyze_function(&self, function: &TypedFunction) -> FunctionOutcome {
        if self.cancelled.load(Ordering::Relaxed) {
            return FunctionOutcome::Cancelled;
        }
        let analyzer = LifetimeAnalyzer::new(self.program, &self.capability, &self.classifier);
        match analyzer.analyze_function(function) {
            Ok(report) => FunctionOutcome::Analyzed(report.findings),
            Err(LifetimeAnalysisError::Cfg(CfgBuildError::UnsupportedConstruct { construct, span })) => {
                warn!("Skipping {}: unsupported control flow {}", function.name, construct);
                FunctionOutcome::Failed(Finding::new(
                    span,
                    FindingKind::UnsupportedConstruct,
                    format!("`{}` was not checked: it uses {}", function.name, construct),
                    &function.name,
                ))
            }
            Err(e) => {
                error!("Analysis of {} failed: {}", function.name, e);
                FunctionOutcome::Failed(Finding::new(
                    function.span,
                    FindingKind::InternalError,
                    format!("`{}` was not checked: {}", function.name, e),
                    &function.name,
                ))
            }
        }
    }
}

enum FunctionOutcome {
    Analyzed(Vec<Finding>),
    Failed(Finding),
    Cancelled,
}
