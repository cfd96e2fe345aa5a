//! Two nested scopes mapping names to storage locations.
use core::fmt;
use std::collections::HashMap;

use arbitrary::Arbitrary;

use crate::{lexer::MAX_INTEGER, vm::Segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Arbitrary)]
pub enum SymbolKind {
    Static,
    Field,
    Argument,
    Local,
}

impl SymbolKind {
    pub fn scope(self) -> Scope {
        match self {
            Self::Static | Self::Field => Scope::Class,
            Self::Argument | Self::Local => Scope::Subroutine,
        }
    }

    pub fn segment(self) -> Segment {
        match self {
            Self::Static => Segment::Static,
            Self::Field => Segment::This,
            Self::Argument => Segment::Argument,
            Self::Local => Segment::Local,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Static => "static",
            Self::Field => "field",
            Self::Argument => "argument",
            Self::Local => "local",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Class,
    Subroutine,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Class => "class",
            Self::Subroutine => "subroutine",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: Box<str>,
    pub ty: Box<str>,
    pub kind: SymbolKind,
    /// Position within the segment of `kind`
    pub index: u16,
}

impl Symbol {
    pub fn segment(&self) -> Segment {
        self.kind.segment()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("`{name}` is already defined in {scope} scope")]
    Duplicate { name: Box<str>, scope: Scope },
    #[error("{kind} symbols do not belong in {scope} scope")]
    WrongScope { kind: SymbolKind, scope: Scope },
    #[error("more than {MAX_INTEGER} {kind} symbols")]
    TooMany { kind: SymbolKind },
}

#[derive(Debug, Default, Clone)]
struct ScopeTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<Box<str>, usize>,
}

impl ScopeTable {
    fn get(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&idx| &self.symbols[idx])
    }

    fn clear(&mut self) {
        self.symbols.clear();
        self.by_name.clear();
    }
}

/// Class scope (statics and fields) plus subroutine scope (arguments and
/// locals). Subroutine bindings shadow class bindings of the same name.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    class: ScopeTable,
    subroutine: ScopeTable,
    counts: [u16; 4],
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_class_symbol(
        &mut self,
        name: impl AsRef<str>,
        ty: impl AsRef<str>,
        kind: SymbolKind,
    ) -> Result<&Symbol, SymbolError> {
        self.define_in(Scope::Class, name.as_ref(), ty.as_ref(), kind)
    }

    pub fn define_local_symbol(
        &mut self,
        name: impl AsRef<str>,
        ty: impl AsRef<str>,
        kind: SymbolKind,
    ) -> Result<&Symbol, SymbolError> {
        self.define_in(Scope::Subroutine, name.as_ref(), ty.as_ref(), kind)
    }

    fn define_in(
        &mut self,
        scope: Scope,
        name: &str,
        ty: &str,
        kind: SymbolKind,
    ) -> Result<&Symbol, SymbolError> {
        if kind.scope() != scope {
            return Err(SymbolError::WrongScope { kind, scope });
        }
        let table = match scope {
            Scope::Class => &mut self.class,
            Scope::Subroutine => &mut self.subroutine,
        };
        if table.by_name.contains_key(name) {
            return Err(SymbolError::Duplicate {
                name: Box::from(name),
                scope,
            });
        }

        let index = self.counts[kind.slot()];
        self.counts[kind.slot()] = index
            .checked_add(1)
            .filter(|count| *count <= MAX_INTEGER)
            .ok_or(SymbolError::TooMany { kind })?;
        tracing::trace!(name, ty, %kind, index, "defined symbol");

        table.by_name.insert(Box::from(name), table.symbols.len());
        table.symbols.push(Symbol {
            name: Box::from(name),
            ty: Box::from(ty),
            kind,
            index,
        });
        Ok(&table.symbols[table.symbols.len() - 1])
    }

    /// Looks `name` up in the subroutine scope, then the class scope.
    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        self.subroutine
            .get(name)
            .or_else(|| self.class.get(name))
    }

    pub fn count_of_kind(&self, kind: SymbolKind) -> u16 {
        self.counts[kind.slot()]
    }

    /// Forgets every argument and local, keeping statics and fields.
    pub fn reset_subroutine_scope(&mut self) {
        self.subroutine.clear();
        self.counts[SymbolKind::Argument.slot()] = 0;
        self.counts[SymbolKind::Local.slot()] = 0;
    }
}
