use std::collections::HashSet;

use crate::lexer::{Keyword, Lexer, TokenKind};

/// Type names a dotted call may be qualified with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownTypes {
    names: HashSet<Box<str>>,
}

impl KnownTypes {
    /// Classes provided by the operating system library of the target platform.
    pub const PLATFORM_CLASSES: [&'static str; 8] = [
        "Array", "Keyboard", "Math", "Memory", "Output", "Screen", "String", "Sys",
    ];

    pub fn empty() -> Self {
        Self {
            names: HashSet::new(),
        }
    }

    pub fn platform() -> Self {
        Self::PLATFORM_CLASSES.into_iter().collect()
    }

    /// Returns whether the name was new.
    pub fn insert(&mut self, name: impl Into<Box<str>>) -> bool {
        self.names.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for KnownTypes {
    fn default() -> Self {
        Self::platform()
    }
}

impl<N: Into<Box<str>>> Extend<N> for KnownTypes {
    fn extend<T: IntoIterator<Item = N>>(&mut self, iter: T) {
        self.names.extend(iter.into_iter().map(Into::into));
    }
}

impl<N: Into<Box<str>>> FromIterator<N> for KnownTypes {
    fn from_iter<T: IntoIterator<Item = N>>(iter: T) -> Self {
        let mut known = Self::empty();
        known.extend(iter);
        known
    }
}

/// Primitive types cannot receive method calls.
pub fn is_primitive(ty: &str) -> bool {
    matches!(ty, "int" | "char" | "boolean")
}

/// Reads just far enough into `source` to find the `class <Name>` header.
///
/// Returns `None` when the unit does not start with a class declaration or
/// fails to lex before the name; the full compile reports the real error.
pub fn scan_class_name(source: &str) -> Option<Box<str>> {
    let mut lexer = Lexer::new(source);
    let first = lexer.advance()?.ok()?;
    if first.kind != TokenKind::Keyword(Keyword::Class) {
        return None;
    }
    let name = lexer.advance()?.ok()?;
    (name.kind == TokenKind::Identifier).then_some(name.lexeme)
}
