//! Compilation unit: the set of source files one run checks
//!
//! Files are parsed as they are added. A file that does not parse is
//! reported and left out; lowering then builds one [`TypedProgram`] from
//! every file that did.

use std::fmt;
use std::path::Path;

use diagnostics::{Diagnostic, Diagnostics};
use log::{info, warn};
use parser::ast;
use source_map::{FileId, SourceMap};

use crate::tast::{lower_program, TypedProgram};

/// Extension of source files picked up from directories
pub const SOURCE_EXTENSION: &str = "lg";

/// A file that could not be read or parsed; other files are unaffected
#[derive(Debug, Clone)]
pub enum FrontendError {
    Io { path: String, message: String },
    Parse { file: String, diagnostic: Box<Diagnostic> },
}

impl fmt::Display for FrontendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrontendError::Io { path, message } => write!(f, "failed to read {}: {}", path, message),
            FrontendError::Parse { file, diagnostic } => {
                write!(
                    f,
                    "{}:{}:{}: {}",
                    file, diagnostic.span.start.line, diagnostic.span.start.column, diagnostic.message
                )
            }
        }
    }
}

impl std::error::Error for FrontendError {}

/// Represents a complete compilation unit with multiple source files
#[derive(Default)]
pub struct CompilationUnit {
    source_map: SourceMap,
    /// Files that parsed, in the order they were added
    parsed: Vec<(FileId, ast::SourceFile)>,
    diagnostics: Diagnostics,
    failed_files: usize,
}

/// A lowered program and everything the front-end reported
pub struct CompilationOutput {
    pub program: TypedProgram,
    pub diagnostics: Diagnostics,
    pub failed_files: usize,
}

impl CompilationOutput {
    /// Whether any file failed to parse or lower cleanly
    pub fn has_errors(&self) -> bool {
        self.failed_files > 0 || self.diagnostics.has_errors()
    }
}

impl CompilationUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and parse `source` under `name`
    pub fn add_source(&mut self, name: &str, source: &str) -> Result<FileId, FrontendError> {
        let file_id = self.source_map.add_file(name, source);
        match parser::parse_source(&self.source_map, file_id) {
            Ok(file) => {
                self.parsed.push((file_id, file));
                Ok(file_id)
            }
            Err(diagnostic) => {
                warn!("Skipping {}: {}", name, diagnostic.message);
                self.failed_files += 1;
                self.diagnostics.push(diagnostic.clone());
                Err(FrontendError::Parse {
                    file: name.to_string(),
                    diagnostic: Box::new(diagnostic),
                })
            }
        }
    }

    /// Read and parse a file from disk
    pub fn add_file_from_path(&mut self, path: &Path) -> Result<FileId, FrontendError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            self.failed_files += 1;
            FrontendError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        })?;
        self.add_source(&path.display().to_string(), &source)
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn file_count(&self) -> usize {
        self.parsed.len()
    }

    /// Lower every parsed file into one program
    pub fn lower(self) -> CompilationOutput {
        info!("Lowering {} files", self.parsed.len());
        let output = lower_program(self.source_map, &self.parsed);
        let mut diagnostics = self.diagnostics;
        diagnostics.extend(output.diagnostics);
        CompilationOutput {
            program: output.program,
            diagnostics,
            failed_files: self.failed_files,
        }
    }
}
