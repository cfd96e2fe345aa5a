//! Deciding what a call expression calls, before any code for it is emitted.
//!
//! `name(...)` is always a method on the current object. `a.name(...)` is a
//! method on the object held by variable `a` when `a` resolves in the symbol
//! table, and a function or constructor of type `a` when `a` is a known type
//! name. Anything else is an error.
use crate::symbols::{Symbol, SymbolTable};

use super::known_types::KnownTypes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    MethodOnVariable(Symbol),
    StaticOrConstructorOnType(Box<str>),
    ImplicitMethodOnSelf,
}

impl CallTarget {
    /// `None` when `qualifier` is neither a variable nor a known type.
    pub fn resolve(
        qualifier: Option<&str>,
        symbols: &SymbolTable,
        known_types: &KnownTypes,
    ) -> Option<Self> {
        let Some(qualifier) = qualifier else {
            return Some(Self::ImplicitMethodOnSelf);
        };
        if let Some(symbol) = symbols.resolve(qualifier) {
            Some(Self::MethodOnVariable(symbol.clone()))
        } else if known_types.contains(qualifier) {
            Some(Self::StaticOrConstructorOnType(Box::from(qualifier)))
        } else {
            None
        }
    }

    /// Whether the callee receives an object as argument 0.
    pub fn has_receiver(&self) -> bool {
        !matches!(self, Self::StaticOrConstructorOnType(_))
    }
}
