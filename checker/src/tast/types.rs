//! Type table for the typed AST
//!
//! Named types carry their method set; aliases resolve to the `TypeId` of
//! their target so that a value typed through an alias is indistinguishable
//! from one typed with the original name. Compound types (tuples, slices,
//! function types) are interned by structure.

use fxhash::FxHashMap;
use indexmap::IndexMap;
use source_map::{FileId, SourceSpan};
use std::fmt;

use super::id_types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    Int,
    String,
    Bool,
    /// Type of the `nil` literal
    Nil,
    Any,
    Error,
    /// Result of a call that returns nothing
    Void,
}

impl BuiltinType {
    pub const ALL: [BuiltinType; 7] = [
        BuiltinType::Int,
        BuiltinType::String,
        BuiltinType::Bool,
        BuiltinType::Nil,
        BuiltinType::Any,
        BuiltinType::Error,
        BuiltinType::Void,
    ];

    /// Builtin named by a type annotation
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(BuiltinType::Int),
            "string" => Some(BuiltinType::String),
            "bool" => Some(BuiltinType::Bool),
            "any" => Some(BuiltinType::Any),
            "error" => Some(BuiltinType::Error),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Int => "int",
            BuiltinType::String => "string",
            BuiltinType::Bool => "bool",
            BuiltinType::Nil => "nil",
            BuiltinType::Any => "any",
            BuiltinType::Error => "error",
            BuiltinType::Void => "()",
        }
    }
}

/// A method in a named type's method set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<TypeId>,
    /// Last parameter accepts any number of arguments
    pub variadic: bool,
    pub results: Vec<TypeId>,
}

impl MethodSignature {
    /// Same name, arity and variadic shape. Parameter types are not compared
    /// so that re-declared option types in another module still match.
    pub fn is_compatible_with(&self, other: &MethodSignature) -> bool {
        self.name == other.name
            && self.params.len() == other.params.len()
            && self.variadic == other.variadic
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedType {
    pub name: String,
    pub module: Option<String>,
    pub methods: Vec<MethodSignature>,
    pub file: Option<FileId>,
    pub span: Option<SourceSpan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Builtin(BuiltinType),
    Named(NamedType),
    Tuple(Vec<TypeId>),
    Slice(TypeId),
    Function {
        params: Vec<TypeId>,
        variadic: bool,
        results: Vec<TypeId>,
    },
    Unknown,
}

/// A `type Name = Target;` declaration
#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub name: String,
    pub module: Option<String>,
    pub target: TypeId,
    pub file: Option<FileId>,
}

/// All types of one program
#[derive(Debug, Clone)]
pub struct TypeTable {
    types: Vec<TypeKind>,
    named: IndexMap<String, Vec<TypeId>>,
    aliases: IndexMap<String, Vec<AliasEntry>>,
    builtins: FxHashMap<BuiltinType, TypeId>,
    interned: FxHashMap<TypeKind, TypeId>,
    unknown: TypeId,
}

impl TypeTable {
    pub fn new() -> Self {
        let mut table = Self {
            types: vec![TypeKind::Unknown],
            named: IndexMap::new(),
            aliases: IndexMap::new(),
            builtins: FxHashMap::default(),
            interned: FxHashMap::default(),
            unknown: TypeId::from_raw(0),
        };
        for builtin in BuiltinType::ALL {
            let id = table.push(TypeKind::Builtin(builtin));
            table.builtins.insert(builtin, id);
        }
        table
    }

    fn push(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId::from_raw(self.types.len() as u32);
        self.types.push(kind);
        id
    }

    fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }
        let id = self.push(kind.clone());
        self.interned.insert(kind, id);
        id
    }

    pub fn unknown(&self) -> TypeId {
        self.unknown
    }

    pub fn builtin(&self, builtin: BuiltinType) -> TypeId {
        self.builtins
            .get(&builtin)
            .copied()
            .unwrap_or(self.unknown)
    }

    /// Declare a named type with an empty method set (filled by [`Self::set_methods`])
    pub fn declare_named(
        &mut self,
        name: &str,
        module: Option<&str>,
        file: Option<FileId>,
        span: Option<SourceSpan>,
    ) -> TypeId {
        let id = self.push(TypeKind::Named(NamedType {
            name: name.to_string(),
            module: module.map(str::to_string),
            methods: Vec::new(),
            file,
            span,
        }));
        self.named.entry(name.to_string()).or_default().push(id);
        id
    }

    pub fn set_methods(&mut self, id: TypeId, methods: Vec<MethodSignature>) {
        if let Some(TypeKind::Named(named)) = self.types.get_mut(id.index()) {
            named.methods = methods;
        }
    }

    pub fn declare_alias(
        &mut self,
        name: &str,
        module: Option<&str>,
        target: TypeId,
        file: Option<FileId>,
    ) {
        self.aliases
            .entry(name.to_string())
            .or_default()
            .push(AliasEntry {
                name: name.to_string(),
                module: module.map(str::to_string),
                target,
                file,
            });
    }

    /// Tuple of `elements`; a single element is the element itself and an
    /// empty tuple is `Void`
    pub fn tuple(&mut self, elements: Vec<TypeId>) -> TypeId {
        match elements.len() {
            0 => self.builtin(BuiltinType::Void),
            1 => elements[0],
            _ => self.intern(TypeKind::Tuple(elements)),
        }
    }

    pub fn slice(&mut self, element: TypeId) -> TypeId {
        self.intern(TypeKind::Slice(element))
    }

    pub fn function(&mut self, params: Vec<TypeId>, variadic: bool, results: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Function {
            params,
            variadic,
            results,
        })
    }

    pub fn get(&self, id: TypeId) -> &TypeKind {
        self.types.get(id.index()).unwrap_or(&TypeKind::Unknown)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Named type or alias called `name`, preferring declarations in `module`
    pub fn lookup(&self, name: &str, module: Option<&str>) -> Option<TypeId> {
        let named = self.named.get(name).map(Vec::as_slice).unwrap_or(&[]);
        let aliases = self.aliases.get(name).map(Vec::as_slice).unwrap_or(&[]);

        if module.is_some() {
            let local_named = named
                .iter()
                .copied()
                .find(|&id| self.module_of(id) == module);
            let local_alias = aliases
                .iter()
                .find(|alias| alias.module.as_deref() == module)
                .map(|alias| alias.target);
            if let Some(id) = local_named.or(local_alias) {
                return Some(id);
            }
        }
        named
            .first()
            .copied()
            .or_else(|| aliases.first().map(|alias| alias.target))
    }

    /// Named type or alias called `name` declared exactly in `module`
    pub fn lookup_in_module(&self, name: &str, module: &str) -> Option<TypeId> {
        let named = self
            .named
            .get(name)
            .and_then(|ids| ids.iter().copied().find(|&id| self.module_of(id) == Some(module)));
        named.or_else(|| {
            self.aliases.get(name).and_then(|entries| {
                entries
                    .iter()
                    .find(|alias| alias.module.as_deref() == Some(module))
                    .map(|alias| alias.target)
            })
        })
    }

    pub fn named(&self, id: TypeId) -> Option<&NamedType> {
        match self.get(id) {
            TypeKind::Named(named) => Some(named),
            _ => None,
        }
    }

    pub fn module_of(&self, id: TypeId) -> Option<&str> {
        self.named(id).and_then(|named| named.module.as_deref())
    }

    /// Every name `id` is known by: its declared name plus aliases of it
    pub fn names_of(&self, id: TypeId) -> Vec<&str> {
        let mut names = Vec::new();
        if let Some(named) = self.named(id) {
            names.push(named.name.as_str());
        }
        for entries in self.aliases.values() {
            for alias in entries {
                if alias.target == id && !names.contains(&alias.name.as_str()) {
                    names.push(alias.name.as_str());
                }
            }
        }
        names
    }

    pub fn is_known_as(&self, id: TypeId, name: &str) -> bool {
        self.names_of(id).contains(&name)
    }

    /// Methods of a named type; other types have none
    pub fn method_set(&self, id: TypeId) -> &[MethodSignature] {
        self.named(id)
            .map(|named| named.methods.as_slice())
            .unwrap_or(&[])
    }

    pub fn find_method(&self, id: TypeId, name: &str) -> Option<&MethodSignature> {
        self.method_set(id).iter().find(|method| method.name == name)
    }

    /// Values a type stands for in a multi-value position
    pub fn value_types(&self, id: TypeId) -> Vec<TypeId> {
        match self.get(id) {
            TypeKind::Tuple(elements) => elements.clone(),
            TypeKind::Builtin(BuiltinType::Void) => Vec::new(),
            _ => vec![id],
        }
    }

    pub fn slice_element(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            TypeKind::Slice(element) => Some(*element),
            _ => None,
        }
    }

    /// Named types in declaration order
    pub fn named_types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.named.values().flatten().copied()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &AliasEntry> {
        self.aliases.values().flatten()
    }

    pub fn display(&self, id: TypeId) -> TypeDisplay<'_> {
        TypeDisplay { table: self, id }
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders a type the way it is written in source
pub struct TypeDisplay<'a> {
    table: &'a TypeTable,
    id: TypeId,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |f: &mut fmt::Formatter<'_>, ids: &[TypeId]| -> fmt::Result {
            for (i, id) in ids.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", self.table.display(*id))?;
            }
            Ok(())
        };
        match self.table.get(self.id) {
            TypeKind::Builtin(builtin) => write!(f, "{}", builtin.name()),
            TypeKind::Named(named) => write!(f, "{}", named.name),
            TypeKind::Tuple(elements) => {
                write!(f, "(")?;
                list(f, elements)?;
                write!(f, ")")
            }
            TypeKind::Slice(element) => write!(f, "[]{}", self.table.display(*element)),
            TypeKind::Function {
                params, results, ..
            } => {
                write!(f, "fn(")?;
                list(f, params)?;
                write!(f, ")")?;
                if !results.is_empty() {
                    write!(f, " -> (")?;
                    list(f, results)?;
                    write!(f, ")")?;
                }
                Ok(())
            }
            TypeKind::Unknown => write!(f, "<unknown>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_table() -> (TypeTable, TypeId) {
        let mut table = TypeTable::new();
        let option = table.declare_named("EndOption", Some("otel/trace"), None, None);
        let span = table.declare_named("Span", Some("otel/trace"), None, None);
        table.set_methods(
            span,
            vec![MethodSignature {
                name: "end".to_string(),
                params: vec![option],
                variadic: true,
                results: Vec::new(),
            }],
        );
        (table, span)
    }

    #[test]
    fn test_alias_resolves_to_target() {
        let (mut table, span) = span_table();
        table.declare_alias("Handle", Some("app"), span, None);
        assert_eq!(table.lookup("Handle", Some("app")), Some(span));
        assert!(table.is_known_as(span, "Handle"));
        assert!(table.is_known_as(span, "Span"));
        assert_eq!(table.find_method(span, "end").map(|m| m.variadic), Some(true));
    }

    #[test]
    fn test_lookup_prefers_module() {
        let (mut table, span) = span_table();
        let local = table.declare_named("Span", Some("app"), None, None);
        assert_eq!(table.lookup("Span", Some("app")), Some(local));
        assert_eq!(table.lookup("Span", None), Some(span));
        assert_eq!(table.lookup_in_module("Span", "otel/trace"), Some(span));
        assert_eq!(table.lookup("Missing", None), None);
    }

    #[test]
    fn test_compound_types_are_interned() {
        let (mut table, span) = span_table();
        let int = table.builtin(BuiltinType::Int);
        let a = table.tuple(vec![int, span]);
        let b = table.tuple(vec![int, span]);
        assert_eq!(a, b);
        assert_eq!(table.tuple(vec![span]), span);
        assert_eq!(table.value_types(a), vec![int, span]);
        assert!(table.value_types(table.builtin(BuiltinType::Void)).is_empty());
        let spans = table.slice(span);
        assert_eq!(table.slice_element(spans), Some(span));
        assert_eq!(table.display(a).to_string(), "(int, Span)");
    }

    #[test]
    fn test_signature_compatibility() {
        let end = MethodSignature {
            name: "end".into(),
            params: vec![TypeId::from_raw(1)],
            variadic: true,
            results: Vec::new(),
        };
        let other_module_end = MethodSignature {
            params: vec![TypeId::from_raw(9)],
            ..end.clone()
        };
        let fixed_end = MethodSignature {
            variadic: false,
            ..end.clone()
        };
        assert!(end.is_compatible_with(&other_module_end));
        assert!(!end.is_compatible_with(&fixed_end));
    }
}
