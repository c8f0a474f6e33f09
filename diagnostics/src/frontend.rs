//! Front-end diagnostic builders
//!
//! Helpers for the errors the reference parser and the typed-AST lowering
//! report before any analysis runs.

use crate::{Diagnostic, DiagnosticBuilder, SourceSpan};

/// Provides common front-end diagnostic builders
pub struct FrontendDiagnostics;

impl FrontendDiagnostics {
    /// The parser stopped at a token it could not use
    pub fn unexpected_input(span: SourceSpan, found: &str, expected: &str) -> Diagnostic {
        let found = if found.is_empty() {
            "end of file".to_string()
        } else {
            format!("'{}'", found)
        };
        DiagnosticBuilder::error(format!("unexpected {}", found), span)
            .code("E0001")
            .label(span, format!("expected {}", expected))
            .build()
    }

    /// A name that no scope declares
    pub fn unresolved_name(span: SourceSpan, name: &str) -> Diagnostic {
        DiagnosticBuilder::warning(format!("cannot find value `{}` in this scope", name), span)
            .code("E2001")
            .label(span, "not found")
            .note("the expression is treated as having an unknown type")
            .build()
    }

    /// A type annotation naming a type nobody declares
    pub fn unknown_type(span: SourceSpan, name: &str) -> Diagnostic {
        DiagnosticBuilder::warning(format!("cannot find type `{}`", name), span)
            .code("E1001")
            .label(span, "unknown type")
            .build()
    }

    /// Two declarations of the same type name
    pub fn duplicate_type(span: SourceSpan, first: SourceSpan, name: &str) -> Diagnostic {
        DiagnosticBuilder::error(format!("type `{}` is declared more than once", name), span)
            .code("E1002")
            .label(span, "redeclared here")
            .secondary_label(first, "first declared here")
            .build()
    }

    /// A type alias that eventually refers to itself
    pub fn cyclic_alias(span: SourceSpan, name: &str) -> Diagnostic {
        DiagnosticBuilder::error(format!("type alias `{}` refers to itself", name), span)
            .code("E1003")
            .label(span, "cycle starts here")
            .build()
    }
}
