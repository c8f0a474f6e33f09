//! Identifier types for the typed AST and the analysis graphs
//!
//! Each id is a `u32` newtype so symbol, type, block and binding indices
//! can't be mixed up. `u32::MAX` is reserved as the invalid sentinel.

use std::fmt;

/// Common behaviour of all id types
pub trait IdType: Copy + Clone + PartialEq + Eq + std::hash::Hash + fmt::Debug {
    fn from_raw(raw: u32) -> Self;

    fn as_raw(self) -> u32;

    fn is_valid(self) -> bool;

    fn invalid() -> Self;

    /// Position of this id in a dense arena
    fn index(self) -> usize {
        self.as_raw() as usize
    }

    /// Id for the `index`-th element of a dense arena
    fn from_index(index: usize) -> Self {
        Self::from_raw(index as u32)
    }
}

macro_rules! define_id_type {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            pub const fn as_raw(self) -> u32 {
                self.0
            }

            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }

            pub const fn invalid() -> Self {
                Self(u32::MAX)
            }

            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl IdType for $name {
            fn from_raw(raw: u32) -> Self {
                Self::from_raw(raw)
            }

            fn as_raw(self) -> u32 {
                self.as_raw()
            }

            fn is_valid(self) -> bool {
                self.is_valid()
            }

            fn invalid() -> Self {
                Self::invalid()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::invalid()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", stringify!($name), self.0)
                } else {
                    write!(f, "{}(<invalid>)", stringify!($name))
                }
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self::from_raw(raw)
            }
        }
    };
}

define_id_type! {
    /// A resolved name: local, parameter, global or function
    SymbolId
}

define_id_type! {
    /// Entry in the program's type table
    TypeId
}

define_id_type! {
    /// A function body: declared function or function literal
    FunctionId
}

define_id_type! {
    /// Node in a per-function scope tree
    ScopeId
}

define_id_type! {
    /// Basic block in a per-function control-flow graph
    BlockId
}

define_id_type! {
    /// A tracked handle binding within one function pass
    BindingId
}

define_id_type! {
    /// Expression node; unique across the program
    ExpressionId
}

define_id_type! {
    /// Statement node; unique across the program
    StatementId
}

/// Hands out consecutive ids of one kind
#[derive(Debug)]
pub struct IdGenerator<T: IdType> {
    next_id: u32,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: IdType> IdGenerator<T> {
    pub const fn new() -> Self {
        Self {
            next_id: 0,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Next id. Panics once `u32::MAX - 1` ids were handed out.
    pub fn next(&mut self) -> T {
        let raw = self.next_id;
        assert!(
            raw != u32::MAX,
            "ID generator overflow: exhausted all valid IDs for {}",
            std::any::type_name::<T>()
        );
        self.next_id += 1;
        T::from_raw(raw)
    }

    pub fn count(&self) -> u32 {
        self.next_id
    }
}

impl<T: IdType> Default for IdGenerator<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel() {
        assert!(!SymbolId::invalid().is_valid());
        assert!(SymbolId::from_raw(0).is_valid());
        assert_eq!(BlockId::default(), BlockId::invalid());
        assert_eq!(format!("{}", TypeId::invalid()), "TypeId(<invalid>)");
        assert_eq!(format!("{}", ScopeId::from_raw(3)), "ScopeId(3)");
    }

    #[test]
    fn test_generator_is_dense() {
        let mut generator: IdGenerator<BindingId> = IdGenerator::new();
        let ids: Vec<_> = (0..4).map(|_| generator.next()).collect();
        assert_eq!(ids.iter().map(|id| id.index()).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(generator.count(), 4);
        assert_eq!(<BindingId as IdType>::from_index(2), ids[2]);
    }
}
