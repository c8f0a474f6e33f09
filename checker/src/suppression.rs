//! Inline suppression directives
//!
//! A finding is suppressed by a comment on its own line:
//!
//! ```text
//! let ctx, span = tracer.start(ctx, "op"); //nolint:leakguard
//! ```
//!
//! `//nolint:a,b` names the checkers it silences; a bare `//nolint` silences
//! every checker on that line.

use fxhash::FxHashMap;
use source_map::{FileId, SourceMap};

/// Answers whether a finding on `line` of `file` is silenced for `checker`
pub trait SuppressionLookup: Sync {
    fn is_suppressed(&self, file: FileId, line: usize, checker: &str) -> bool;
}

/// Lookup that suppresses nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSuppressions;

impl SuppressionLookup for NoSuppressions {
    fn is_suppressed(&self, _file: FileId, _line: usize, _checker: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Directive {
    All,
    Checkers(Vec<String>),
}

/// `//nolint` directives scanned from source text
#[derive(Debug, Default, Clone)]
pub struct CommentSuppressions {
    /// Keyed by file and 1-based line
    directives: FxHashMap<(FileId, usize), Directive>,
}

impl CommentSuppressions {
    pub fn from_source_map(source_map: &SourceMap) -> Self {
        let mut suppressions = Self::default();
        for (file_id, file) in source_map.files() {
            suppressions.add_source(file_id, &file.content);
        }
        suppressions
    }

    pub fn add_source(&mut self, file: FileId, text: &str) {
        for (index, line) in text.lines().enumerate() {
            if let Some(directive) = parse_line(line) {
                self.directives.insert((file, index + 1), directive);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

impl SuppressionLookup for CommentSuppressions {
    fn is_suppressed(&self, file: FileId, line: usize, checker: &str) -> bool {
        match self.directives.get(&(file, line)) {
            Some(Directive::All) => true,
            Some(Directive::Checkers(names)) => names.iter().any(|name| name == checker),
            None => false,
        }
    }
}

/// Merge every `//nolint` on one line
fn parse_line(line: &str) -> Option<Directive> {
    let mut names = Vec::new();
    let mut found = false;
    let mut rest = line;
    while let Some(start) = rest.find("//nolint") {
        rest = &rest[start + "//nolint".len()..];
        match rest.strip_prefix(':') {
            Some(list) => {
                let list = list.split_whitespace().next().unwrap_or("");
                let before = names.len();
                names.extend(
                    list.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string),
                );
                found |= names.len() > before;
            }
            // `//nolintfoo` is not a directive
            None if rest.is_empty() || rest.starts_with(char::is_whitespace) => return Some(Directive::All),
            None => {}
        }
    }
    found.then_some(Directive::Checkers(names))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(text: &str) -> CommentSuppressions {
        let mut suppressions = CommentSuppressions::default();
        suppressions.add_source(FileId::new(0), text);
        suppressions
    }

    #[test]
    fn test_named_directive_only_silences_that_checker() {
        let suppressions = lookup("let a = f(); //nolint:leakguard\n");
        let file = FileId::new(0);
        assert!(suppressions.is_suppressed(file, 1, "leakguard"));
        assert!(!suppressions.is_suppressed(file, 1, "spancheck"));
    }

    #[test]
    fn test_bare_directive_silences_everything() {
        let suppressions = lookup("a();\nb(); //nolint because reasons\n");
        let file = FileId::new(0);
        assert!(!suppressions.is_suppressed(file, 1, "leakguard"));
        assert!(suppressions.is_suppressed(file, 2, "leakguard"));
        assert!(suppressions.is_suppressed(file, 2, "anything"));
    }

    #[test]
    fn test_directive_list_and_explanation() {
        let suppressions = lookup("x(); //nolint:spancheck, leakguard\ny(); //nolint:errcheck,leakguard // ok\n");
        let file = FileId::new(0);
        // Text after the first space is an explanation, not a checker name
        assert!(!suppressions.is_suppressed(file, 1, "leakguard"));
        assert!(suppressions.is_suppressed(file, 1, "spancheck"));
        assert!(suppressions.is_suppressed(file, 2, "leakguard"));
    }

    #[test]
    fn test_directive_is_line_scoped_and_file_scoped() {
        let suppressions = lookup("//nolint:leakguard\nlet a = f();\n");
        assert!(!suppressions.is_suppressed(FileId::new(0), 2, "leakguard"));
        assert!(!suppressions.is_suppressed(FileId::new(1), 1, "leakguard"));
    }

    #[test]
    fn test_lookalikes_are_ignored() {
        let suppressions = lookup("a(); //nolinter\nb(); // nolint:leakguard\n");
        assert!(suppressions.is_empty());
    }
}
