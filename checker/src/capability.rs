//! Capability descriptor: which call acquires a handle and which method
//! releases it
//!
//! The descriptor is plain data supplied by the embedding tool (config file
//! or constructor). [`ResolvedCapability`] checks it once against the
//! program's type table and answers the structural questions the analyses
//! ask: is this type handle-like, is this call an acquisition, does this call
//! release a symbol.

use std::fmt;
use std::str::FromStr;

use crate::error_codes;
use crate::tast::node::{TypedExpression, TypedExpressionKind};
use crate::tast::{MethodSignature, SymbolId, TypeId, TypeTable, TypedProgram};

/// The call that yields a handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AcquirePattern {
    /// `Type.method`: a method called on a receiver of that type (or an
    /// alias of it), or a function `method` of a module whose last path
    /// segment is `Type`
    Method { receiver: String, method: String },
    /// A bare name: any function or method with that name
    Name(String),
}

impl FromStr for AcquirePattern {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigurationError::InvalidAcquirePattern(s.to_string());
        let is_name = |part: &str| {
            !part.is_empty()
                && part.chars().all(|c| c.is_alphanumeric() || c == '_')
                && !part.starts_with(|c: char| c.is_ascii_digit())
        };
        match s.split_once('.') {
            Some((receiver, method)) if is_name(receiver) && is_name(method) => {
                Ok(AcquirePattern::Method {
                    receiver: receiver.to_string(),
                    method: method.to_string(),
                })
            }
            Some(_) => Err(invalid()),
            None if is_name(s) => Ok(AcquirePattern::Name(s.to_string())),
            None => Err(invalid()),
        }
    }
}

impl fmt::Display for AcquirePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquirePattern::Method { receiver, method } => write!(f, "{}.{}", receiver, method),
            AcquirePattern::Name(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub acquire: AcquirePattern,
    pub handle_type: String,
    /// Module declaring the handle type; looked up by name alone when unset
    pub handle_module: Option<String>,
    pub release_method: String,
}

impl CapabilityDescriptor {
    pub fn new(acquire: &str, handle_type: &str, release_method: &str) -> Result<Self, ConfigurationError> {
        if handle_type.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                key: "handle-type".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if release_method.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                key: "release".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(Self {
            acquire: acquire.parse()?,
            handle_type: handle_type.to_string(),
            handle_module: None,
            release_method: release_method.to_string(),
        })
    }

    /// Tracing spans: `Tracer.start` yields a `Span` released by `end`
    pub fn tracing() -> Self {
        Self {
            acquire: AcquirePattern::Method {
                receiver: "Tracer".to_string(),
                method: "start".to_string(),
            },
            handle_type: "Span".to_string(),
            handle_module: None,
            release_method: "end".to_string(),
        }
    }

    pub fn with_handle_module(mut self, module: impl Into<String>) -> Self {
        self.handle_module = Some(module.into());
        self
    }
}

impl Default for CapabilityDescriptor {
    fn default() -> Self {
        Self::tracing()
    }
}

/// Descriptor checked against a program's types
#[derive(Debug, Clone)]
pub struct ResolvedCapability {
    descriptor: CapabilityDescriptor,
    handle: TypeId,
    handle_module: Option<String>,
    release: MethodSignature,
}

impl ResolvedCapability {
    /// Resolve the handle type and its release method.
    ///
    /// # Errors
    /// `UndeclaredHandleType` when no named type (or alias of one) has the
    /// handle's name, `MissingReleaseMethod` when it lacks the release method.
    pub fn resolve(descriptor: CapabilityDescriptor, types: &TypeTable) -> Result<Self, ConfigurationError> {
        let handle = match &descriptor.handle_module {
            Some(module) => types.lookup_in_module(&descriptor.handle_type, module),
            None => types.lookup(&descriptor.handle_type, None),
        }
        .filter(|&id| types.named(id).is_some())
        .ok_or_else(|| ConfigurationError::UndeclaredHandleType {
            name: descriptor.handle_type.clone(),
            module: descriptor.handle_module.clone(),
        })?;

        let release = types
            .find_method(handle, &descriptor.release_method)
            .cloned()
            .ok_or_else(|| ConfigurationError::MissingReleaseMethod {
                handle_type: descriptor.handle_type.clone(),
                release_method: descriptor.release_method.clone(),
            })?;

        let handle_module = descriptor
            .handle_module
            .clone()
            .or_else(|| types.module_of(handle).map(str::to_string));

        Ok(Self {
            descriptor,
            handle,
            handle_module,
            release,
        })
    }

    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    pub fn handle_type(&self) -> TypeId {
        self.handle
    }

    /// Module that declares the handle type, if any
    pub fn handle_module(&self) -> Option<&str> {
        self.handle_module.as_deref()
    }

    pub fn release_method(&self) -> &str {
        &self.release.name
    }

    /// Structural match: the handle type itself, or any named type with a
    /// method compatible with the release method
    pub fn is_handle_like(&self, ty: TypeId, types: &TypeTable) -> bool {
        if ty == self.handle {
            return true;
        }
        types.named(ty).is_some()
            && types
                .method_set(ty)
                .iter()
                .any(|method| method.is_compatible_with(&self.release))
    }

    /// Whether any value of `ty` (a tuple counts by its elements) is handle-like
    pub fn carries_handle(&self, ty: TypeId, types: &TypeTable) -> bool {
        types
            .value_types(ty)
            .into_iter()
            .any(|value| self.is_handle_like(value, types))
    }

    /// Whether `expr` is a call matching the acquire pattern
    pub fn is_acquisition(&self, expr: &TypedExpression, program: &TypedProgram) -> bool {
        match (&self.descriptor.acquire, &expr.kind) {
            (
                AcquirePattern::Method { receiver, method },
                TypedExpressionKind::MethodCall {
                    receiver: object,
                    method: called,
                    ..
                },
            ) => called == method && program.types.is_known_as(object.ty, receiver),
            (AcquirePattern::Method { receiver, method }, TypedExpressionKind::Call { callee, .. }) => {
                let TypedExpressionKind::Function(function) = callee.kind else {
                    return false;
                };
                let Some(function) = program.function(function) else {
                    return false;
                };
                let module = program
                    .file(function.file_id)
                    .and_then(|file| file.module.as_deref());
                function.name == *method
                    && module.and_then(|m| m.rsplit('/').next()) == Some(receiver.as_str())
            }
            (AcquirePattern::Name(name), TypedExpressionKind::MethodCall { method, .. }) => method == name,
            (AcquirePattern::Name(name), TypedExpressionKind::Call { callee, .. }) => match callee.kind {
                TypedExpressionKind::Function(function) => program
                    .function(function)
                    .map_or(false, |f| f.name == *name),
                _ => false,
            },
            _ => false,
        }
    }

    /// Symbol released by `expr` when it is `x.release(..)`
    pub fn released_symbol(&self, expr: &TypedExpression) -> Option<SymbolId> {
        match &expr.kind {
            TypedExpressionKind::MethodCall {
                receiver, method, ..
            } if *method == self.release.name => receiver.as_symbol(),
            _ => None,
        }
    }
}

/// Invalid capability or configuration; fatal before analysis starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    UndeclaredHandleType {
        name: String,
        module: Option<String>,
    },
    MissingReleaseMethod {
        handle_type: String,
        release_method: String,
    },
    InvalidAcquirePattern(String),
    InvalidValue {
        key: String,
        message: String,
    },
    /// Config file could not be read or parsed
    ConfigFile {
        path: String,
        message: String,
    },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::UndeclaredHandleType { name, module } => match module {
                Some(module) => write!(f, "handle type `{}` is not declared in module \"{}\"", name, module),
                None => write!(f, "handle type `{}` is not declared", name),
            },
            ConfigurationError::MissingReleaseMethod {
                handle_type,
                release_method,
            } => write!(
                f,
                "handle type `{}` has no release method `{}`",
                handle_type, release_method
            ),
            ConfigurationError::InvalidAcquirePattern(pattern) => write!(
                f,
                "invalid acquire pattern `{}` (expected `Type.method` or `name`)",
                pattern
            ),
            ConfigurationError::InvalidValue { key, message } => {
                write!(f, "invalid value for `{}`: {}", key, message)
            }
            ConfigurationError::ConfigFile { path, message } => {
                write!(f, "failed to load {}: {}", path, message)
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

impl ConfigurationError {
    /// Registry code printed with this error
    pub fn code(&self) -> u16 {
        match self {
            ConfigurationError::UndeclaredHandleType { .. } => error_codes::UNDECLARED_HANDLE_TYPE,
            ConfigurationError::MissingReleaseMethod { .. } => error_codes::MISSING_RELEASE_METHOD,
            _ => error_codes::INVALID_CONFIGURATION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tast::BuiltinType;

    fn table() -> (TypeTable, TypeId, TypeId) {
        let mut types = TypeTable::new();
        let span = types.declare_named("Span", Some("otel/trace"), None, None);
        types.set_methods(
            span,
            vec![MethodSignature {
                name: "end".to_string(),
                params: Vec::new(),
                variadic: false,
                results: Vec::new(),
            }],
        );
        let timer = types.declare_named("Timer", Some("metrics"), None, None);
        types.set_methods(
            timer,
            vec![MethodSignature {
                name: "end".to_string(),
                params: Vec::new(),
                variadic: false,
                results: Vec::new(),
            }],
        );
        (types, span, timer)
    }

    #[test]
    fn test_parse_acquire_pattern() {
        assert_eq!(
            "Tracer.start".parse::<AcquirePattern>(),
            Ok(AcquirePattern::Method {
                receiver: "Tracer".to_string(),
                method: "start".to_string()
            })
        );
        assert_eq!("open".parse::<AcquirePattern>(), Ok(AcquirePattern::Name("open".to_string())));
        assert!("a.b.c".parse::<AcquirePattern>().is_err());
        assert!("".parse::<AcquirePattern>().is_err());
        assert!("Tracer.".parse::<AcquirePattern>().is_err());
    }

    #[test]
    fn test_resolve_finds_release_method() {
        let (types, span, _) = table();
        let resolved = ResolvedCapability::resolve(CapabilityDescriptor::tracing(), &types)
            .expect("tracing capability should resolve");
        assert_eq!(resolved.handle_type(), span);
        assert_eq!(resolved.handle_module(), Some("otel/trace"));
        assert_eq!(resolved.release_method(), "end");
    }

    #[test]
    fn test_missing_release_method_is_configuration_error() {
        let (types, _, _) = table();
        let descriptor = CapabilityDescriptor::new("Tracer.start", "Span", "finish").expect("valid descriptor");
        let err = ResolvedCapability::resolve(descriptor, &types).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MissingReleaseMethod {
                handle_type: "Span".to_string(),
                release_method: "finish".to_string()
            }
        );
    }

    #[test]
    fn test_undeclared_handle_type() {
        let (types, _, _) = table();
        let descriptor = CapabilityDescriptor::tracing().with_handle_module("other");
        assert!(matches!(
            ResolvedCapability::resolve(descriptor, &types),
            Err(ConfigurationError::UndeclaredHandleType { .. })
        ));
    }

    #[test]
    fn test_structural_handle_match() {
        let (mut types, span, timer) = table();
        let resolved = ResolvedCapability::resolve(CapabilityDescriptor::tracing(), &types)
            .expect("tracing capability should resolve");
        let string = types.builtin(BuiltinType::String);
        let pair = types.tuple(vec![string, timer]);

        assert!(resolved.is_handle_like(span, &types));
        assert!(resolved.is_handle_like(timer, &types));
        assert!(!resolved.is_handle_like(string, &types));
        assert!(resolved.carries_handle(pair, &types));
    }
}
