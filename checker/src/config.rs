//! TOML configuration parsing for `leakguard.toml`.
//!
//! ```toml
//! [checker]
//! name = "leakguard"
//!
//! [capability]
//! acquire = "Tracer.start"
//! handle-type = "Span"
//! handle-module = "otel/trace"
//! release = "end"
//!
//! [analysis]
//! jobs = 4
//! skip-unrelated-files = true
//! ```
//!
//! Every section and key is optional; missing values fall back to the
//! tracing defaults.

use std::path::Path;

use serde::Deserialize;

use crate::capability::{CapabilityDescriptor, ConfigurationError};
use crate::report::DEFAULT_CHECKER_NAME;
use crate::semantic_graph::analysis::AnalysisOptions;

/// File name looked up in the working directory when no `--config` is given
pub const CONFIG_FILE_NAME: &str = "leakguard.toml";

/// The raw TOML structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    checker: Option<CheckerSection>,
    capability: Option<CapabilitySection>,
    analysis: Option<AnalysisSection>,
}

/// `[checker]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CheckerSection {
    /// Name matched by `//nolint:<name>`
    pub name: Option<String>,
}

/// `[capability]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CapabilitySection {
    /// `Type.method` or a bare function/method name
    pub acquire: Option<String>,
    pub handle_type: Option<String>,
    /// Module declaring the handle type; narrows the lookup
    pub handle_module: Option<String>,
    pub release: Option<String>,
}

/// `[analysis]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AnalysisSection {
    /// Worker threads, 0 for the rayon default
    pub jobs: Option<usize>,
    pub skip_unrelated_files: Option<bool>,
}

/// Fully resolved configuration of one run
#[derive(Debug, Clone)]
pub struct LeakGuardConfig {
    pub checker_name: String,
    pub capability: CapabilityDescriptor,
    pub analysis: AnalysisOptions,
}

impl Default for LeakGuardConfig {
    fn default() -> Self {
        Self {
            checker_name: DEFAULT_CHECKER_NAME.to_string(),
            capability: CapabilityDescriptor::default(),
            analysis: AnalysisOptions::default(),
        }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub acquire: Option<String>,
    pub handle_type: Option<String>,
    pub handle_module: Option<String>,
    pub release: Option<String>,
    pub jobs: Option<usize>,
    pub skip_unrelated_files: Option<bool>,
}

impl LeakGuardConfig {
    /// Parse the contents of a `leakguard.toml`
    pub fn parse(content: &str) -> Result<Self, ConfigurationError> {
        Self::parse_with_overrides(content, &ConfigOverrides::default())
    }

    pub fn parse_with_overrides(content: &str, overrides: &ConfigOverrides) -> Result<Self, ConfigurationError> {
        let raw: RawConfig = toml::from_str(content).map_err(|e| ConfigurationError::ConfigFile {
            path: CONFIG_FILE_NAME.to_string(),
            message: e.to_string(),
        })?;
        Self::from_raw(raw, overrides)
    }

    /// Read `path`, or use defaults when it is `None`
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigurationError> {
        let Some(path) = path else {
            return Self::from_raw(RawConfig::default(), overrides);
        };
        let content = std::fs::read_to_string(path).map_err(|e| ConfigurationError::ConfigFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let raw: RawConfig = toml::from_str(&content).map_err(|e| ConfigurationError::ConfigFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_raw(raw, overrides)
    }

    fn from_raw(raw: RawConfig, overrides: &ConfigOverrides) -> Result<Self, ConfigurationError> {
        let defaults = CapabilityDescriptor::default();
        let checker = raw.checker.unwrap_or_default();
        let capability = raw.capability.unwrap_or_default();
        let analysis = raw.analysis.unwrap_or_default();

        let checker_name = checker
            .name
            .unwrap_or_else(|| DEFAULT_CHECKER_NAME.to_string());
        if checker_name.is_empty() || checker_name.contains(|c: char| c == ',' || c.is_whitespace()) {
            return Err(ConfigurationError::InvalidValue {
                key: "checker.name".to_string(),
                message: format!("`{}` cannot be used in a `//nolint` directive", checker_name),
            });
        }

        let acquire = overrides
            .acquire
            .clone()
            .or(capability.acquire)
            .unwrap_or_else(|| defaults.acquire.to_string());
        let handle_type = overrides
            .handle_type
            .clone()
            .or(capability.handle_type)
            .unwrap_or_else(|| defaults.handle_type.clone());
        let release = overrides
            .release
            .clone()
            .or(capability.release)
            .unwrap_or_else(|| defaults.release_method.clone());
        let mut descriptor = CapabilityDescriptor::new(&acquire, &handle_type, &release)?;
        if let Some(module) = overrides.handle_module.clone().or(capability.handle_module) {
            descriptor = descriptor.with_handle_module(module);
        }

        let defaults = AnalysisOptions::default();
        Ok(Self {
            checker_name,
            capability: descriptor,
            analysis: AnalysisOptions {
                jobs: overrides.jobs.or(analysis.jobs).unwrap_or(defaults.jobs),
                skip_unrelated_files: overrides
                    .skip_unrelated_files
                    .or(analysis.skip_unrelated_files)
                    .unwrap_or(defaults.skip_unrelated_files),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::AcquirePattern;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = LeakGuardConfig::parse("").expect("empty config is valid");
        assert_eq!(config.checker_name, "leakguard");
        assert_eq!(config.capability.handle_type, "Span");
        assert_eq!(config.capability.release_method, "end");
        assert_eq!(config.analysis, AnalysisOptions::default());
    }

    #[test]
    fn test_full_file() {
        let config = LeakGuardConfig::parse(
            r#"
            [checker]
            name = "lockcheck"

            [capability]
            acquire = "Mutex.lock"
            handle-type = "Guard"
            handle-module = "sync"
            release = "unlock"

            [analysis]
            jobs = 2
            skip-unrelated-files = false
            "#,
        )
        .expect("valid config");
        assert_eq!(config.checker_name, "lockcheck");
        assert_eq!(
            config.capability.acquire,
            AcquirePattern::Method {
                receiver: "Mutex".to_string(),
                method: "lock".to_string()
            }
        );
        assert_eq!(config.capability.handle_module.as_deref(), Some("sync"));
        assert_eq!(config.analysis.jobs, 2);
        assert!(!config.analysis.skip_unrelated_files);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let overrides = ConfigOverrides {
            release: Some("close".to_string()),
            jobs: Some(8),
            ..ConfigOverrides::default()
        };
        let config = LeakGuardConfig::parse_with_overrides(
            "[capability]\nrelease = \"finish\"\n[analysis]\njobs = 1\n",
            &overrides,
        )
        .expect("valid config");
        assert_eq!(config.capability.release_method, "close");
        assert_eq!(config.analysis.jobs, 8);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let error = LeakGuardConfig::parse("[capability]\nhandle = \"Span\"\n").unwrap_err();
        assert!(matches!(error, ConfigurationError::ConfigFile { .. }));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            LeakGuardConfig::parse("[capability]\nacquire = \"a.b.c\"\n"),
            Err(ConfigurationError::InvalidAcquirePattern(_))
        ));
        assert!(matches!(
            LeakGuardConfig::parse("[checker]\nname = \"two words\"\n"),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_a_configuration_error() {
        let error = LeakGuardConfig::load(
            Some(Path::new("/nonexistent/leakguard.toml")),
            &ConfigOverrides::default(),
        )
        .unwrap_err();
        assert!(error.to_string().contains("/nonexistent/leakguard.toml"));
    }
}
