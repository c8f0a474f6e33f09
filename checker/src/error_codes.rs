//! Error Code Registry for LeakGuard
//!
//! Every diagnostic the tool prints carries one of these codes. Codes are
//! grouped by range so front-end problems, configuration problems and
//! findings never collide.
//!
//! # Error Code Ranges
//!
//! - E0001-E0999: Parser and syntax errors
//! - E1000-E1999: Type declaration errors
//! - E2000-E2999: Name resolution
//! - E3000-E3999: Release findings
//! - E4000-E4999: Analysis notices (functions that were not checked)
//! - E5000-E5999: Configuration errors
//! - E9000-E9999: Internal errors

use std::collections::HashMap;
use std::fmt;

use crate::report::FindingKind;

/// Error code struct containing the numeric code and human-readable description
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// The numeric error code (e.g., 3001)
    pub code: u16,
    /// Human-readable error category
    pub category: &'static str,
    /// Brief description of what this error means
    pub description: &'static str,
    /// Optional help text with suggestions for fixing the error
    pub help: Option<&'static str>,
}

impl ErrorCode {
    pub const fn new(
        code: u16,
        category: &'static str,
        description: &'static str,
        help: Option<&'static str>,
    ) -> Self {
        Self {
            code,
            category,
            description,
            help,
        }
    }

    /// Format the error code as "E{code:04}" (e.g., "E3001")
    pub fn format_code(&self) -> String {
        format!("E{:04}", self.code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.format_code(),
            self.category,
            self.description
        )
    }
}

pub const MISSING_RELEASE: u16 = 3001;
pub const PREFER_DEFERRED_RELEASE: u16 = 3002;
pub const UNSUPPORTED_CONSTRUCT: u16 = 4001;
pub const UNDECLARED_HANDLE_TYPE: u16 = 5001;
pub const MISSING_RELEASE_METHOD: u16 = 5002;
pub const INVALID_CONFIGURATION: u16 = 5003;
pub const INTERNAL_ERROR: u16 = 9001;

/// Code a finding is printed with
pub fn finding_code(kind: FindingKind) -> u16 {
    match kind {
        FindingKind::MissingRelease => MISSING_RELEASE,
        FindingKind::PreferDeferredRelease => PREFER_DEFERRED_RELEASE,
        FindingKind::UnsupportedConstruct => UNSUPPORTED_CONSTRUCT,
        FindingKind::InternalError => INTERNAL_ERROR,
    }
}

/// Registry containing all defined error codes
pub struct ErrorCodeRegistry {
    codes: HashMap<u16, ErrorCode>,
}

impl ErrorCodeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            codes: HashMap::new(),
        };
        registry.register_all_codes();
        registry
    }

    pub fn get(&self, code: u16) -> Option<&ErrorCode> {
        self.codes.get(&code)
    }

    /// Get an error code by its formatted string (e.g., "E3001")
    pub fn get_by_string(&self, code_str: &str) -> Option<&ErrorCode> {
        parse_error_code(code_str).and_then(|code| self.get(code))
    }

    fn register(&mut self, error_code: ErrorCode) {
        self.codes.insert(error_code.code, error_code);
    }

    fn register_all_codes(&mut self) {
        // ===== PARSER ERRORS (E0001-E0999) =====
        self.register(ErrorCode::new(
            1,
            "Parser",
            "Unexpected input",
            Some("The file is skipped; fix the syntax error to have it checked"),
        ));

        // ===== TYPE DECLARATIONS (E1000-E1999) =====
        self.register(ErrorCode::new(
            1001,
            "Type",
            "Unknown type",
            Some("Declare the type or import the module that declares it"),
        ));
        self.register(ErrorCode::new(
            1002,
            "Type",
            "Duplicate type declaration",
            None,
        ));
        self.register(ErrorCode::new(
            1003,
            "Type",
            "Cyclic type alias",
            Some("Point the alias at a declared type"),
        ));

        // ===== NAME RESOLUTION (E2000-E2999) =====
        self.register(ErrorCode::new(
            2001,
            "Resolution",
            "Unresolved name",
            Some("Uses of an unresolved name are never release witnesses"),
        ));

        // ===== RELEASE FINDINGS (E3000-E3999) =====
        self.register(ErrorCode::new(
            MISSING_RELEASE,
            "Release",
            "Handle not released on every path",
            Some("Release the handle with `defer` right after acquiring it"),
        ));
        self.register(ErrorCode::new(
            PREFER_DEFERRED_RELEASE,
            "Release",
            "Handle released directly instead of deferred",
            Some("A deferred release also runs on early returns and panics"),
        ));

        // ===== ANALYSIS NOTICES (E4000-E4999) =====
        self.register(ErrorCode::new(
            UNSUPPORTED_CONSTRUCT,
            "Analysis",
            "Function not checked: unsupported control flow",
            Some("Functions using `goto` are skipped"),
        ));

        // ===== CONFIGURATION (E5000-E5999) =====
        self.register(ErrorCode::new(
            UNDECLARED_HANDLE_TYPE,
            "Configuration",
            "Handle type is not declared",
            None,
        ));
        self.register(ErrorCode::new(
            MISSING_RELEASE_METHOD,
            "Configuration",
            "Handle type has no release method",
            None,
        ));
        self.register(ErrorCode::new(
            INVALID_CONFIGURATION,
            "Configuration",
            "Invalid configuration",
            Some("Check leakguard.toml and the command-line overrides"),
        ));

        // ===== INTERNAL (E9000-E9999) =====
        self.register(ErrorCode::new(
            INTERNAL_ERROR,
            "Internal",
            "Function not checked: internal analysis error",
            Some("Please report this with the function that triggered it"),
        ));
    }

    /// Get all error codes in a specific range
    pub fn get_range(&self, start: u16, end: u16) -> Vec<&ErrorCode> {
        let mut codes: Vec<&ErrorCode> = self
            .codes
            .values()
            .filter(|code| code.code >= start && code.code <= end)
            .collect();
        codes.sort_by_key(|code| code.code);
        codes
    }

    /// Release findings (E3000-E3999)
    pub fn get_finding_codes(&self) -> Vec<&ErrorCode> {
        self.get_range(3000, 3999)
    }

    pub fn is_valid_code(&self, code: u16) -> bool {
        self.codes.contains_key(&code)
    }
}

impl Default for ErrorCodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: std::sync::OnceLock<ErrorCodeRegistry> = std::sync::OnceLock::new();

pub fn error_registry() -> &'static ErrorCodeRegistry {
    REGISTRY.get_or_init(ErrorCodeRegistry::new)
}

pub fn get_error_code(code: u16) -> Option<&'static ErrorCode> {
    error_registry().get(code)
}

/// 3001 -> "E3001"
pub fn format_error_code(code: u16) -> String {
    format!("E{:04}", code)
}

/// "E3001" -> Some(3001)
pub fn parse_error_code(code_str: &str) -> Option<u16> {
    code_str.strip_prefix('E')?.parse::<u16>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_finding_kind_has_a_registered_code() {
        let registry = error_registry();
        for kind in [
            FindingKind::MissingRelease,
            FindingKind::PreferDeferredRelease,
            FindingKind::UnsupportedConstruct,
            FindingKind::InternalError,
        ] {
            assert!(registry.is_valid_code(finding_code(kind)), "{:?}", kind);
        }
    }

    #[test]
    fn test_frontend_codes_are_registered() {
        let registry = ErrorCodeRegistry::new();
        for code in ["E0001", "E1001", "E1002", "E1003", "E2001"] {
            assert!(registry.get_by_string(code).is_some(), "{}", code);
        }
    }

    #[test]
    fn test_finding_range() {
        let registry = ErrorCodeRegistry::new();
        let findings = registry.get_finding_codes();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].format_code(), "E3001");
    }

    #[test]
    fn test_helper_functions() {
        assert_eq!(format_error_code(3001), "E3001");
        assert_eq!(format_error_code(1), "E0001");
        assert_eq!(parse_error_code("E9001"), Some(9001));
        assert_eq!(parse_error_code("9001"), None);
        assert_eq!(parse_error_code("EXYZ"), None);
        assert_eq!(
            get_error_code(MISSING_RELEASE).map(|c| c.category),
            Some("Release")
        );
    }
}
