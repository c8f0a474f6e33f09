//! Symbol table: every resolved name of the program

use source_map::SourceSpan;

use super::id_types::{FunctionId, SymbolId, TypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Local,
    Parameter,
    Global,
    Function,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub ty: TypeId,
    pub span: SourceSpan,
    /// Function whose body declares the symbol; `None` for globals and functions
    pub owner: Option<FunctionId>,
}

impl Symbol {
    /// Local or parameter declared by `function` itself (not captured)
    pub fn is_local_to(&self, function: FunctionId) -> bool {
        matches!(self.kind, SymbolKind::Local | SymbolKind::Parameter)
            && self.owner == Some(function)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        name: &str,
        kind: SymbolKind,
        ty: TypeId,
        span: SourceSpan,
        owner: Option<FunctionId>,
    ) -> SymbolId {
        let id = SymbolId::from_raw(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            id,
            name: name.to_string(),
            kind,
            ty,
            span,
            owner,
        });
        id
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.index())
    }

    /// Update the type once an untyped declaration is inferred
    pub fn set_type(&mut self, id: SymbolId, ty: TypeId) {
        if let Some(symbol) = self.symbols.get_mut(id.index()) {
            symbol.ty = ty;
        }
    }

    pub fn name(&self, id: SymbolId) -> &str {
        self.get(id).map(|s| s.name.as_str()).unwrap_or("<unknown>")
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }
}
