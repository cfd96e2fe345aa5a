pub mod compiler;
pub mod lexer;
pub mod symbols;
pub mod vm;

pub use compiler::{
    compile, CompilationEngine, CompileError, CompileOptions, CompiledClass, KnownTypes,
    SemanticError, SubroutineInfo, SubroutineKind,
};
pub use lexer::{Keyword, Lexer, LexicalError, Token, TokenKind};
pub use symbols::{Symbol, SymbolError, SymbolKind, SymbolTable};
pub use vm::{CodeEmitter, Instruction};
