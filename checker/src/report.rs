//! Findings and the reporter that finalizes them
//!
//! The reporter deduplicates, drops suppressed findings and orders the rest
//! by file, line, column and kind. Rendering goes through
//! [`diagnostics::Diagnostic`] for text and [`JsonFinding`] for JSON.

use diagnostics::{Diagnostic, DiagnosticBuilder, DiagnosticSeverity, Diagnostics};
use serde::Serialize;
use source_map::{FileId, SourceMap, SourceSpan};

use crate::capability::ResolvedCapability;
use crate::error_codes::{finding_code, format_error_code, get_error_code};
use crate::suppression::SuppressionLookup;
use crate::tast::{TypedFile, TypedProgram};

/// Default checker name matched by `//nolint:<name>`
pub const DEFAULT_CHECKER_NAME: &str = "leakguard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    MissingRelease,
    PreferDeferredRelease,
    UnsupportedConstruct,
    InternalError,
}

impl FindingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FindingKind::MissingRelease => "missing-release",
            FindingKind::PreferDeferredRelease => "prefer-deferred-release",
            FindingKind::UnsupportedConstruct => "unsupported-construct",
            FindingKind::InternalError => "internal-error",
        }
    }

    /// Only a missing release makes a run fail
    pub fn is_correctness(self) -> bool {
        self == FindingKind::MissingRelease
    }

    pub fn severity(self) -> DiagnosticSeverity {
        match self {
            FindingKind::MissingRelease => DiagnosticSeverity::Error,
            FindingKind::PreferDeferredRelease | FindingKind::InternalError => DiagnosticSeverity::Warning,
            FindingKind::UnsupportedConstruct => DiagnosticSeverity::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub span: SourceSpan,
    pub kind: FindingKind,
    pub message: String,
    /// Name of the function the finding is in
    pub function: String,
}

impl Finding {
    pub fn new(span: SourceSpan, kind: FindingKind, message: impl Into<String>, function: &str) -> Self {
        Self {
            span,
            kind,
            message: message.into(),
            function: function.to_string(),
        }
    }

    pub fn file(&self) -> FileId {
        self.span.file_id
    }

    pub fn line(&self) -> usize {
        self.span.start.line
    }

    pub fn column(&self) -> usize {
        self.span.start.column
    }

    fn sort_key(&self) -> (FileId, usize, usize, FindingKind) {
        (self.file(), self.line(), self.column(), self.kind)
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let code = finding_code(self.kind);
        let label = match self.kind {
            FindingKind::MissingRelease => "acquired here",
            FindingKind::PreferDeferredRelease => "released here",
            FindingKind::UnsupportedConstruct => "not supported",
            FindingKind::InternalError => "in this function",
        };
        let mut builder = DiagnosticBuilder::new(self.kind.severity(), &self.message, self.span)
            .code(format_error_code(code))
            .label(self.span, label)
            .note(format!("in function `{}`", self.function));
        if let Some(help) = get_error_code(code).and_then(|c| c.help) {
            builder = builder.help(help);
        }
        builder.build()
    }
}

/// Finalizes raw findings for one checker name
pub struct Reporter<'a> {
    checker_name: String,
    suppressions: &'a dyn SuppressionLookup,
}

impl<'a> Reporter<'a> {
    pub fn new(checker_name: impl Into<String>, suppressions: &'a dyn SuppressionLookup) -> Self {
        Self {
            checker_name: checker_name.into(),
            suppressions,
        }
    }

    pub fn checker_name(&self) -> &str {
        &self.checker_name
    }

    /// Deduplicate by position and kind, drop suppressed findings, sort
    pub fn finalize(&self, mut findings: Vec<Finding>) -> Vec<Finding> {
        findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then_with(|| a.message.cmp(&b.message)));
        findings.dedup_by(|later, earlier| {
            later.kind == earlier.kind && later.file() == earlier.file() && later.span.start == earlier.span.start
        });
        findings.retain(|finding| {
            !self
                .suppressions
                .is_suppressed(finding.file(), finding.line(), &self.checker_name)
        });
        findings
    }
}

pub fn to_diagnostics(findings: &[Finding]) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    for finding in findings {
        diagnostics.push(finding.to_diagnostic());
    }
    diagnostics
}

/// One finding in `--format json` output
#[derive(Debug, Clone, Serialize)]
pub struct JsonFinding<'a> {
    pub file: &'a str,
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
    pub kind: FindingKind,
    pub code: String,
    pub message: &'a str,
    pub function: &'a str,
}

impl<'a> JsonFinding<'a> {
    pub fn new(finding: &'a Finding, source_map: &'a SourceMap) -> Self {
        Self {
            file: source_map.file_name(finding.file()),
            line: finding.line(),
            column: finding.column(),
            end_line: finding.span.end.line,
            end_column: finding.span.end.column,
            kind: finding.kind,
            code: format_error_code(finding_code(finding.kind)),
            message: &finding.message,
            function: &finding.function,
        }
    }
}

pub fn to_json(findings: &[Finding], source_map: &SourceMap) -> serde_json::Result<String> {
    let entries: Vec<JsonFinding<'_>> = findings
        .iter()
        .map(|finding| JsonFinding::new(finding, source_map))
        .collect();
    serde_json::to_string_pretty(&entries)
}

/// Whether `file` could mention the handle at all
///
/// Only a file that neither imports nor lives in the handle's module,
/// declares no handle-like type and has no handle-typed expression can be
/// skipped. Without a known module nothing is skipped.
pub fn file_may_use_handle(file: &TypedFile, program: &TypedProgram, capability: &ResolvedCapability) -> bool {
    let Some(module) = capability.handle_module() else {
        return true;
    };
    if file.module.as_deref() == Some(module) || file.imports.iter().any(|import| import.path == module) {
        return true;
    }
    let types = &program.types;
    if file
        .declared_types
        .iter()
        .any(|ty| capability.is_handle_like(*ty, types))
    {
        return true;
    }

    let mut mentions_handle = false;
    for function in file.functions.iter().filter_map(|id| program.function(*id)) {
        if function
            .results
            .iter()
            .any(|ty| capability.carries_handle(*ty, types))
        {
            return true;
        }
        if let Some(body) = &function.body {
            body.visit_expressions(&mut |expr| {
                mentions_handle |= capability.carries_handle(expr.ty, types);
            });
        }
        if mentions_handle {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suppression::{CommentSuppressions, NoSuppressions};
    use source_map::SourcePosition;

    fn span(file: usize, line: usize, column: usize) -> SourceSpan {
        let start = SourcePosition::new(line, column, 0);
        SourceSpan::new(start, SourcePosition::new(line, column + 4, 0), FileId::new(file))
    }

    fn finding(file: usize, line: usize, column: usize, kind: FindingKind) -> Finding {
        Finding::new(span(file, line, column), kind, "message", "f")
    }

    #[test]
    fn test_findings_are_ordered_and_deduplicated() {
        let reporter = Reporter::new(DEFAULT_CHECKER_NAME, &NoSuppressions);
        let findings = reporter.finalize(vec![
            finding(1, 1, 1, FindingKind::MissingRelease),
            finding(0, 5, 3, FindingKind::PreferDeferredRelease),
            finding(0, 5, 3, FindingKind::MissingRelease),
            finding(0, 5, 3, FindingKind::MissingRelease),
            finding(0, 2, 9, FindingKind::MissingRelease),
        ]);
        let keys: Vec<_> = findings.iter().map(|f| f.sort_key()).collect();
        assert_eq!(
            keys,
            vec![
                (FileId::new(0), 2, 9, FindingKind::MissingRelease),
                (FileId::new(0), 5, 3, FindingKind::MissingRelease),
                (FileId::new(0), 5, 3, FindingKind::PreferDeferredRelease),
                (FileId::new(1), 1, 1, FindingKind::MissingRelease),
            ]
        );
    }

    #[test]
    fn test_suppression_is_matched_by_checker_name() {
        let mut suppressions = CommentSuppressions::default();
        suppressions.add_source(FileId::new(0), "a\nb //nolint:leakguard\nc //nolint:other\n");

        let reporter = Reporter::new(DEFAULT_CHECKER_NAME, &suppressions);
        let findings = reporter.finalize(vec![
            finding(0, 2, 1, FindingKind::MissingRelease),
            finding(0, 3, 1, FindingKind::MissingRelease),
        ]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line(), 3);

        let other = Reporter::new("other", &suppressions);
        let findings = other.finalize(vec![finding(0, 2, 1, FindingKind::MissingRelease)]);
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_diagnostic_rendering() {
        let diagnostic = finding(0, 1, 1, FindingKind::MissingRelease).to_diagnostic();
        assert_eq!(diagnostic.severity, DiagnosticSeverity::Error);
        assert_eq!(diagnostic.code.as_deref(), Some("E3001"));

        let notice = finding(0, 1, 1, FindingKind::UnsupportedConstruct).to_diagnostic();
        assert_eq!(notice.severity, DiagnosticSeverity::Info);
    }

    #[test]
    fn test_json_output() {
        let mut source_map = SourceMap::new();
        source_map.add_file("main.lg", "fn f() {}\n");
        let findings = vec![finding(0, 1, 4, FindingKind::PreferDeferredRelease)];
        let json = to_json(&findings, &source_map).expect("serializes");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value[0]["file"], "main.lg");
        assert_eq!(value[0]["kind"], "prefer-deferred-release");
        assert_eq!(value[0]["code"], "E3002");
        assert_eq!(value[0]["column"], 4);
    }
}
