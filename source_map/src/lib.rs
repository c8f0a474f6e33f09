//! Source mapping for multi-file analysis runs
//!
//! Tracks every file handed to the checker, hands out stable [`FileId`]s and
//! converts the byte offsets produced by the parser into 1-based line/column
//! positions used by findings, suppression lookup and rendering.

use std::collections::HashMap;
use std::fmt;

/// A resolved position in a source file (1-based line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
    pub byte_offset: usize,
}

impl SourcePosition {
    pub fn new(line: usize, column: usize, byte_offset: usize) -> Self {
        Self {
            line,
            column,
            byte_offset,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Unique identifier for a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(usize);

impl FileId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

/// A half-open region of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceSpan {
    pub file_id: FileId,
    pub start: SourcePosition,
    pub end: SourcePosition,
}

impl SourceSpan {
    pub fn new(start: SourcePosition, end: SourcePosition, file_id: FileId) -> Self {
        Self {
            file_id,
            start,
            end,
        }
    }

    /// Span used for synthesized nodes that have no text of their own
    pub fn detached(file_id: FileId) -> Self {
        Self::new(SourcePosition::default(), SourcePosition::default(), file_id)
    }

    /// Smallest span covering both spans. Spans from different files keep `self`.
    pub fn to(self, other: SourceSpan) -> SourceSpan {
        if self.file_id != other.file_id {
            return self;
        }
        SourceSpan::new(
            self.start.min(other.start),
            self.end.max(other.end),
            self.file_id,
        )
    }

    pub fn line(&self) -> usize {
        self.start.line
    }
}

/// One source file and its line index
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let mut line_starts = vec![0];
        line_starts.extend(
            content
                .char_indices()
                .filter(|&(_, ch)| ch == '\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            name: name.into(),
            content,
            line_starts,
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Text of a 1-based line without its terminator
    pub fn get_line(&self, line_number: usize) -> Option<&str> {
        let start = *self.line_starts.get(line_number.checked_sub(1)?)?;
        let end = self
            .line_starts
            .get(line_number)
            .copied()
            .unwrap_or(self.content.len());
        Some(self.content[start..end].trim_end_matches(['\n', '\r']))
    }

    /// Resolve a byte offset (clamped to the file length)
    pub fn position_at(&self, offset: usize) -> SourcePosition {
        let offset = offset.min(self.content.len());
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[line_index];
        let column = self.content[line_start..offset].chars().count() + 1;
        SourcePosition::new(line_index + 1, column, offset)
    }
}

/// Every file taking part in one run
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
    by_name: HashMap<String, FileId>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file. Adding a name twice returns the existing id.
    pub fn add_file(&mut self, name: impl Into<String>, content: impl Into<String>) -> FileId {
        let name = name.into();
        if let Some(&existing) = self.by_name.get(&name) {
            return existing;
        }
        let id = FileId(self.files.len());
        self.by_name.insert(name.clone(), id);
        self.files.push(SourceFile::new(name, content));
        id
    }

    pub fn get_file(&self, file_id: FileId) -> Option<&SourceFile> {
        self.files.get(file_id.0)
    }

    pub fn file_by_name(&self, name: &str) -> Option<FileId> {
        self.by_name.get(name).copied()
    }

    pub fn file_name(&self, file_id: FileId) -> &str {
        self.get_file(file_id)
            .map(|file| file.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn get_line(&self, file_id: FileId, line_number: usize) -> Option<&str> {
        self.get_file(file_id)?.get_line(line_number)
    }

    /// Build a span from the parser's byte offsets
    pub fn span(&self, file_id: FileId, start: usize, end: usize) -> SourceSpan {
        match self.get_file(file_id) {
            Some(file) => SourceSpan::new(file.position_at(start), file.position_at(end), file_id),
            None => SourceSpan::detached(file_id),
        }
    }

    pub fn files(&self) -> impl Iterator<Item = (FileId, &SourceFile)> {
        self.files
            .iter()
            .enumerate()
            .map(|(index, file)| (FileId(index), file))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_lookup() {
        let file = SourceFile::new("a.lg", "fn a() {\n  return;\r\n}\n");
        assert_eq!(file.get_line(1), Some("fn a() {"));
        assert_eq!(file.get_line(2), Some("  return;"));
        assert_eq!(file.get_line(3), Some("}"));
        assert_eq!(file.get_line(0), None);
        assert_eq!(file.get_line(9), None);
    }

    #[test]
    fn test_offset_to_position() {
        let file = SourceFile::new("a.lg", "let a = 1;\nlet span = b;\n");
        assert_eq!(file.position_at(0), SourcePosition::new(1, 1, 0));
        let pos = file.position_at(15);
        assert_eq!((pos.line, pos.column), (2, 5));
        // past the end is clamped
        assert_eq!(file.position_at(1_000).byte_offset, file.content.len());
    }

    #[test]
    fn test_same_name_reuses_id() {
        let mut map = SourceMap::new();
        let a = map.add_file("a.lg", "x");
        let b = map.add_file("b.lg", "y");
        assert_ne!(a, b);
        assert_eq!(map.add_file("a.lg", "ignored"), a);
        assert_eq!(map.file_by_name("b.lg"), Some(b));
        assert_eq!(map.file_name(a), "a.lg");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_span_join() {
        let mut map = SourceMap::new();
        let id = map.add_file("a.lg", "abc def ghi");
        let left = map.span(id, 0, 3);
        let right = map.span(id, 8, 11);
        let joined = left.to(right);
        assert_eq!(joined.start.column, 1);
        assert_eq!(joined.end.column, 12);
    }
}
