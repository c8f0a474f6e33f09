//! Parser for the reference front-end language read by the checker
//!
//! A small statically typed language with multi-value returns, `defer`,
//! `panic`, function literals, method-set types and aliases. The grammar
//! is written with `nom` combinators over `&str`.

pub mod ast;
pub mod error;
pub mod grammar;
mod grammar_expr;
mod grammar_stmt;
mod grammar_types;

pub use diagnostics::{Diagnostic, FileId, SourceMap};
pub use error::{ParseFailure, SyntaxError};

use diagnostics::frontend::FrontendDiagnostics;

/// Parse file text into a syntax tree
pub fn parse_file(text: &str) -> Result<ast::SourceFile, ParseFailure> {
    match grammar::source_file(text) {
        Ok((_, file)) => Ok(file),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ParseFailure::from_error(text, e)),
        Err(nom::Err::Incomplete(_)) => Err(ParseFailure {
            offset: text.len(),
            found: String::new(),
            expected: "more input".to_string(),
        }),
    }
}

/// Parse a file registered in `source_map`, reporting failure as a diagnostic
pub fn parse_source(source_map: &SourceMap, file_id: FileId) -> Result<ast::SourceFile, Diagnostic> {
    let text = source_map
        .get_file(file_id)
        .map(|file| file.content.as_str())
        .unwrap_or("");
    parse_file(text).map_err(|failure| {
        let end = (failure.offset + 1).min(text.len());
        let span = source_map.span(file_id, failure.offset, end);
        FrontendDiagnostics::unexpected_input(span, &failure.found, &failure.expected)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Item, TypeDeclKind};

    const SAMPLE: &str = r#"
module "app/handlers";
import "otel/trace" as trace;

type Span { fn end(opts: ...trace.EndOption); }
type Tracer { fn start(ctx: Context, name: string) -> (Context, Span); }
type Handle = Span;

var tracer: Tracer;

fn handle(ctx: Context) -> error {
    let ctx, span = tracer.start(ctx, "handle");
    defer span.end();
    return nil;
}

fn external(ctx: Context);
"#;

    #[test]
    fn test_parse_complete_file() {
        let file = parse_file(SAMPLE).unwrap();
        assert_eq!(file.module.as_ref().map(|m| m.path.as_str()), Some("app/handlers"));
        assert_eq!(file.imports.len(), 1);
        assert_eq!(file.imports[0].alias.as_deref(), Some("trace"));
        assert_eq!(file.items.len(), 6);

        let alias = file.items.iter().any(|item| {
            matches!(item, Item::Type(decl) if matches!(decl.kind, TypeDeclKind::Alias(_)))
        });
        assert!(alias);

        let external = file.items.iter().find_map(|item| match item {
            Item::Function(f) if f.name == "external" => Some(f),
            _ => None,
        });
        assert!(external.map_or(false, |f| f.body.is_none()));
    }

    #[test]
    fn test_failure_points_at_offending_token() {
        let text = "fn f() {\n    let x = ;\n}\n";
        let failure = parse_file(text).unwrap_err();
        assert_eq!(&text[failure.offset..failure.offset + 1], ";");
        assert_eq!(failure.expected, "an expression");
    }

    #[test]
    fn test_parse_source_reports_diagnostic() {
        let mut source_map = SourceMap::new();
        let file_id = source_map.add_file("bad.lg", "fn f() {\n  let = 1;\n}\n");
        let diagnostic = parse_source(&source_map, file_id).unwrap_err();
        assert_eq!(diagnostic.span.start.line, 2);
        assert_eq!(diagnostic.message, "unexpected '='");
        assert_eq!(diagnostic.labels[0].message, "expected a binding name");
    }

    #[test]
    fn test_stray_token_at_top_level() {
        let failure = parse_file("fn f() {}\n}").unwrap_err();
        assert_eq!(failure.expected, "a declaration");
    }
}
