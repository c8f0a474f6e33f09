//! Diagnostics library for checker and front-end reporting
//!
//! Provides:
//! - Severity levels (Error, Warning, Info, Hint)
//! - Primary/secondary labels and help/note trailers
//! - A builder for assembling diagnostics
//! - A plain or colored terminal formatter with source snippets

use std::fmt;

pub use source_map::{FileId, SourceFile, SourceMap, SourcePosition, SourceSpan};

pub mod frontend;

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
    Hint,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticSeverity::Error => write!(f, "error"),
            DiagnosticSeverity::Warning => write!(f, "warning"),
            DiagnosticSeverity::Info => write!(f, "info"),
            DiagnosticSeverity::Hint => write!(f, "hint"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelStyle {
    Primary,
    Secondary,
}

/// A message attached to a span of code
#[derive(Debug, Clone)]
pub struct Label {
    pub span: SourceSpan,
    pub message: String,
    pub style: LabelStyle,
}

impl Label {
    pub fn primary(span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            style: LabelStyle::Primary,
        }
    }

    pub fn secondary(span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            style: LabelStyle::Secondary,
        }
    }
}

/// A diagnostic message with severity, labels and trailers
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub code: Option<String>,
    pub message: String,
    pub span: SourceSpan,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub help: Vec<String>,
}

/// Collection of diagnostics
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.with_severity(DiagnosticSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.with_severity(DiagnosticSeverity::Warning)
    }

    fn with_severity(&self, severity: DiagnosticSeverity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity == severity)
    }

    /// Order by file, then position, then severity
    pub fn sort(&mut self) {
        self.diagnostics
            .sort_by(|a, b| (a.span, a.severity).cmp(&(b.span, b.severity)));
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.into_iter()
    }
}

/// Builder for creating diagnostics
pub struct DiagnosticBuilder {
    diagnostic: Diagnostic,
}

impl DiagnosticBuilder {
    pub fn new(severity: DiagnosticSeverity, message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            diagnostic: Diagnostic {
                severity,
                code: None,
                message: message.into(),
                span,
                labels: Vec::new(),
                notes: Vec::new(),
                help: Vec::new(),
            },
        }
    }

    pub fn error(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Warning, message, span)
    }

    pub fn info(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Info, message, span)
    }

    pub fn hint(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Hint, message, span)
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.diagnostic.code = Some(code.into());
        self
    }

    pub fn label(mut self, span: SourceSpan, message: impl Into<String>) -> Self {
        self.diagnostic.labels.push(Label::primary(span, message));
        self
    }

    pub fn secondary_label(mut self, span: SourceSpan, message: impl Into<String>) -> Self {
        self.diagnostic.labels.push(Label::secondary(span, message));
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.diagnostic.notes.push(note.into());
        self
    }

    pub fn help(mut self, help_msg: impl Into<String>) -> Self {
        self.diagnostic.help.push(help_msg.into());
        self
    }

    pub fn build(self) -> Diagnostic {
        self.diagnostic
    }
}

const RESET: &str = "\x1b[0m";
const CYAN: &str = "\x1b[96m";

/// Renders diagnostics with a source snippet and an underline
#[derive(Debug, Default)]
pub struct ErrorFormatter {
    use_colors: bool,
}

impl ErrorFormatter {
    pub fn new() -> Self {
        Self { use_colors: false }
    }

    pub fn with_colors() -> Self {
        Self { use_colors: true }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.use_colors {
            format!("{}{}{}", color, text, RESET)
        } else {
            text.to_string()
        }
    }

    fn severity_color(severity: DiagnosticSeverity) -> &'static str {
        match severity {
            DiagnosticSeverity::Error => "\x1b[31m",
            DiagnosticSeverity::Warning => "\x1b[33m",
            DiagnosticSeverity::Info => "\x1b[36m",
            DiagnosticSeverity::Hint => "\x1b[32m",
        }
    }

    pub fn format_diagnostics(&self, diagnostics: &Diagnostics, source_map: &SourceMap) -> String {
        diagnostics
            .iter()
            .map(|diagnostic| self.format_diagnostic(diagnostic, source_map))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn format_diagnostic(&self, diagnostic: &Diagnostic, source_map: &SourceMap) -> String {
        let mut output = String::new();
        let color = Self::severity_color(diagnostic.severity);

        let mut header = diagnostic.severity.to_string();
        if let Some(code) = &diagnostic.code {
            header.push_str(&format!("[{}]", code));
        }
        output.push_str(&self.paint(color, &header));
        output.push_str(": ");
        output.push_str(&diagnostic.message);
        output.push('\n');

        let span = diagnostic.span;
        output.push_str(&format!(
            "  {} {}:{}:{}\n",
            self.paint(CYAN, "-->"),
            source_map.file_name(span.file_id),
            span.start.line,
            span.start.column
        ));

        if let Some(line) = source_map.get_line(span.file_id, span.start.line) {
            let gutter = span.start.line.to_string();
            let pad = " ".repeat(gutter.len());
            let bar = self.paint(CYAN, "|");
            output.push_str(&format!("{} {}\n", pad, bar));
            output.push_str(&format!("{} {} {}\n", self.paint(CYAN, &gutter), bar, line));

            let start_column = span.start.column.max(1);
            let width = if span.end.line == span.start.line && span.end.column > start_column {
                span.end.column - start_column
            } else {
                line.chars().count().saturating_sub(start_column - 1).max(1)
            };
            let underline = self.paint(color, &"^".repeat(width));
            output.push_str(&format!(
                "{} {} {}{}",
                pad,
                bar,
                " ".repeat(start_column - 1),
                underline
            ));
            if let Some(label) = diagnostic
                .labels
                .iter()
                .find(|l| l.style == LabelStyle::Primary)
            {
                output.push(' ');
                output.push_str(&self.paint(color, &label.message));
            }
            output.push('\n');
        }

        for label in diagnostic
            .labels
            .iter()
            .filter(|l| l.style == LabelStyle::Secondary)
        {
            output.push_str(&format!(
                "  {} {}:{}:{}: {}\n",
                self.paint(CYAN, "-->"),
                source_map.file_name(label.span.file_id),
                label.span.start.line,
                label.span.start.column,
                label.message
            ));
        }

        for help_msg in &diagnostic.help {
            output.push_str(&format!("     {}: {}\n", self.paint("\x1b[32m", "help"), help_msg));
        }
        for note in &diagnostic.notes {
            output.push_str(&format!("{}: {}\n", self.paint("\x1b[34m", "note"), note));
        }

        output
    }
}

/// Result type that carries diagnostics on failure
pub type DiagnosticResult<T> = Result<T, Diagnostics>;
