//! Parse error type carrying the furthest failure and what was expected there

use std::fmt;

use nom::error::{ContextError, ErrorKind, FromExternalError, ParseError};

/// Error produced by the grammar combinators
///
/// `input` is the unparsed remainder at the failure point; the byte offset
/// is recovered against the full text with [`crate::grammar::position`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError<I> {
    pub input: I,
    pub code: ErrorKind,
    /// Innermost description of what the grammar wanted
    pub expected: Option<&'static str>,
}

impl<I> SyntaxError<I> {
    pub fn new(input: I, code: ErrorKind) -> Self {
        Self {
            input,
            code,
            expected: None,
        }
    }

    pub fn expecting(mut self, what: &'static str) -> Self {
        if self.expected.is_none() {
            self.expected = Some(what);
        }
        self
    }
}

impl<I> ParseError<I> for SyntaxError<I>
where
    I: AsRef<str>,
{
    fn from_error_kind(input: I, kind: ErrorKind) -> Self {
        Self::new(input, kind)
    }

    fn append(_input: I, _kind: ErrorKind, other: Self) -> Self {
        other
    }

    fn or(self, other: Self) -> Self {
        // The shorter remainder made more progress
        let mine = self.input.as_ref().len();
        let theirs = other.input.as_ref().len();
        if theirs < mine || (theirs == mine && self.expected.is_none()) {
            other
        } else {
            self
        }
    }
}

impl<I> ContextError<I> for SyntaxError<I>
where
    I: AsRef<str>,
{
    fn add_context(_input: I, ctx: &'static str, other: Self) -> Self {
        other.expecting(ctx)
    }
}

impl<I, E> FromExternalError<I, E> for SyntaxError<I> {
    fn from_external_error(input: I, kind: ErrorKind, _e: E) -> Self {
        Self::new(input, kind)
    }
}

/// A parse failure resolved against the file text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub offset: usize,
    /// Offending token, empty at end of input
    pub found: String,
    pub expected: String,
}

impl ParseFailure {
    pub(crate) fn from_error(full: &str, error: SyntaxError<&str>) -> Self {
        let offset = full.len() - error.input.len();
        let found = describe_found(error.input);
        let expected = error
            .expected
            .map(str::to_string)
            .unwrap_or_else(|| describe_kind(error.code).to_string());
        Self {
            offset,
            found,
            expected,
        }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {}, found {} at byte {}",
            self.expected,
            if self.found.is_empty() { "end of file" } else { &self.found },
            self.offset
        )
    }
}

impl std::error::Error for ParseFailure {}

fn describe_found(rest: &str) -> String {
    rest.trim_start()
        .chars()
        .take_while(|c| !c.is_whitespace())
        .take(16)
        .collect()
}

fn describe_kind(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Tag => "a token",
        ErrorKind::Digit => "a number",
        ErrorKind::Alpha | ErrorKind::AlphaNumeric => "an identifier",
        ErrorKind::Eof => "end of file",
        _ => "valid syntax",
    }
}
