//! Compile a Jack class straight into VM instructions,
//! without building a syntax tree first.
//!
//! For example:
//!
//! class Main {
//!     function void main() {
//!         do Output.printInt(1 + 2);
//!         return;
//!     }
//! }
//!
//! compiles to
//!
//! function Main.main 0
//! push constant 1
//! push constant 2
//! add
//! call Output.printInt 1
//! pop temp 0
//! push constant 0
//! return
//!
//! Each `compile_*` method consumes exactly the tokens of its construct and
//! emits the code for it before returning. The first error ends the unit.

pub mod call_site;
pub mod known_types;

use core::fmt;
use std::io;

use tracing::debug;

use crate::{
    lexer::{Keyword, Lexer, LexicalError, Span, Token, TokenKind, MAX_INTEGER},
    symbols::{Scope, Symbol, SymbolError, SymbolKind, SymbolTable},
    vm::{self, ArithmeticOp, CodeEmitter, Instruction, Segment},
};

pub use call_site::CallTarget;
pub use known_types::{is_primitive, scan_class_name, KnownTypes};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SemanticError {
    #[error("undefined variable `{0}`")]
    UndefinedVariable(Box<str>),
    #[error("`{0}` is neither a variable nor a known class")]
    UnknownType(Box<str>),
    #[error("{0} needs an object, but a function has no `this`")]
    NoReceiver(Box<str>),
    #[error("`{callee}` takes {expected} argument(s) but was given {found}")]
    ArgumentCount {
        callee: Box<str>,
        expected: u16,
        found: u16,
    },
    #[error("`{0}` is a method and must be called on an object")]
    MethodWithoutReceiver(Box<str>),
    #[error("`{0}` is not a method and cannot be called on an object")]
    NotAMethod(Box<str>),
    #[error("cannot call `{method}` on `{variable}`, which has primitive type `{ty}`")]
    PrimitiveReceiver {
        variable: Box<str>,
        method: Box<str>,
        ty: Box<str>,
    },
    #[error("`{0}` can reach its end without returning")]
    MissingReturn(Box<str>),
    #[error("void subroutine `{0}` cannot return a value")]
    ValueFromVoid(Box<str>),
    #[error("`{0}` must return a value")]
    MissingReturnValue(Box<str>),
    #[error("expected class `{expected}`, found class `{found}`")]
    ClassNameMismatch { expected: Box<str>, found: Box<str> },
    #[error("character {0:?} has no code in the target character set")]
    UnencodableCharacter(char),
    #[error("string constant is longer than 32767 characters")]
    StringTooLong,
    #[error("more than {MAX_INTEGER} {0}")]
    TooMany(Box<str>),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    Lexical(#[from] LexicalError),
    #[error("expected {expected}, found {found}")]
    Syntax {
        expected: Box<str>,
        found: Box<str>,
        span: Span,
    },
    #[error("{error}")]
    DuplicateSymbol { error: SymbolError, span: Span },
    #[error("{error}")]
    Semantic { error: SemanticError, span: Span },
}

impl CompileError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Lexical(_) => "LexicalError",
            Self::Syntax { .. } => "SyntaxError",
            Self::DuplicateSymbol { .. } => "DuplicateSymbolError",
            Self::Semantic { .. } => "SemanticError",
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::Lexical(error) => error.span.clone(),
            Self::Syntax { span, .. }
            | Self::DuplicateSymbol { span, .. }
            | Self::Semantic { span, .. } => span.clone(),
        }
    }

    fn semantic(error: SemanticError, span: Span) -> Self {
        Self::Semantic { error, span }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubroutineKind {
    Constructor,
    #[default]
    Function,
    Method,
}

impl fmt::Display for SubroutineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Constructor => "constructor",
            Self::Function => "function",
            Self::Method => "method",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubroutineInfo {
    pub name: Box<str>,
    pub kind: SubroutineKind,
    pub return_type: Box<str>,
    /// Declared parameters, not counting the receiver of a method
    pub parameters: u16,
    pub locals: u16,
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub known_types: KnownTypes,
    /// Reject the unit unless it declares this class (batch: the file stem)
    pub expected_class: Option<Box<str>>,
}

/// The finished instruction stream of one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledClass {
    pub name: Box<str>,
    pub instructions: Vec<Instruction>,
    pub subroutines: Vec<SubroutineInfo>,
    pub fields: u16,
    pub statics: u16,
}

impl CompiledClass {
    pub fn to_vm(&self) -> String {
        vm::render(&self.instructions)
    }

    pub fn write_to(&self, out: impl io::Write) -> io::Result<()> {
        let mut emitter = CodeEmitter::new(out);
        emitter.write_all(&self.instructions)?;
        emitter.flush()
    }
}

pub fn compile(source: &str, options: &CompileOptions) -> Result<CompiledClass, CompileError> {
    CompilationEngine::new(source, options.clone())?.compile_class()
}

#[derive(Debug, Default)]
struct Routine {
    name: Box<str>,
    kind: SubroutineKind,
    returns_void: bool,
    labels: u32,
}

pub struct CompilationEngine<'src> {
    lexer: Lexer<'src>,
    current: Option<Token>,
    symbols: SymbolTable,
    known_types: KnownTypes,
    expected_class: Option<Box<str>>,
    class_name: Box<str>,
    subroutines: Vec<SubroutineInfo>,
    routine: Routine,
    output: Vec<Instruction>,
}

impl<'src> CompilationEngine<'src> {
    pub fn new(source: &'src str, options: CompileOptions) -> Result<Self, CompileError> {
        let mut lexer = Lexer::new(source);
        let current = lexer.advance().transpose()?;
        Ok(Self {
            lexer,
            current,
            symbols: SymbolTable::new(),
            known_types: options.known_types,
            expected_class: options.expected_class,
            class_name: Box::default(),
            subroutines: Vec::new(),
            routine: Routine::default(),
            output: Vec::new(),
        })
    }

    // Token handling

    fn bump(&mut self) -> Result<Token, CompileError> {
        let next = self.lexer.advance().transpose()?;
        match std::mem::replace(&mut self.current, next) {
            Some(token) => Ok(token),
            None => Err(self.unexpected("more input")),
        }
    }

    fn unexpected(&self, expected: impl Into<Box<str>>) -> CompileError {
        let (found, span) = match &self.current {
            Some(token) => (token.to_string().into(), token.span.clone()),
            None => {
                let end = self.lexer.source().len();
                (Box::from("end of input"), end..end)
            }
        };
        CompileError::Syntax {
            expected: expected.into(),
            found,
            span,
        }
    }

    fn at_symbol(&self, symbol: char) -> bool {
        self.current.as_ref().is_some_and(|t| t.is_symbol(symbol))
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        self.current.as_ref().is_some_and(|t| t.is_keyword(keyword))
    }

    fn current_keyword(&self) -> Option<Keyword> {
        match self.current.as_ref()?.kind {
            TokenKind::Keyword(keyword) => Some(keyword),
            _ => None,
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<Token, CompileError> {
        if self.at_symbol(symbol) {
            self.bump()
        } else {
            Err(self.unexpected(format!("`{symbol}`")))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Token, CompileError> {
        if self.at_keyword(keyword) {
            self.bump()
        } else {
            Err(self.unexpected(format!("`{keyword}`")))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<Token, CompileError> {
        match &self.current {
            Some(Token {
                kind: TokenKind::Identifier,
                ..
            }) => self.bump(),
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_type(&mut self, allow_void: bool) -> Result<Token, CompileError> {
        match self.current.as_ref().map(|t| t.kind) {
            Some(
                TokenKind::Identifier
                | TokenKind::Keyword(Keyword::Int | Keyword::Char | Keyword::Boolean),
            ) => self.bump(),
            Some(TokenKind::Keyword(Keyword::Void)) if allow_void => self.bump(),
            _ if allow_void => Err(self.unexpected("a return type")),
            _ => Err(self.unexpected("a type")),
        }
    }

    // Emission

    fn emit(&mut self, instruction: Instruction) {
        self.output.push(instruction);
    }

    fn push(&mut self, symbol: &Symbol) {
        self.emit(Instruction::Push(symbol.segment(), symbol.index));
    }

    /// Compiles into a separate buffer, handing the instructions back
    /// instead of appending them.
    fn capture(
        &mut self,
        compile: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<Vec<Instruction>, CompileError> {
        let outer = std::mem::take(&mut self.output);
        let result = compile(self);
        let captured = std::mem::replace(&mut self.output, outer);
        result.map(|()| captured)
    }

    fn next_label(&mut self) -> u32 {
        let label = self.routine.labels;
        self.routine.labels += 1;
        label
    }

    /// Counts that end up as VM operands share the range of integer constants.
    fn count_one_more(&self, count: u16, what: &str, span: &Span) -> Result<u16, CompileError> {
        count
            .checked_add(1)
            .filter(|count| *count <= MAX_INTEGER)
            .ok_or_else(|| CompileError::semantic(SemanticError::TooMany(what.into()), span.clone()))
    }

    fn in_function(&self) -> bool {
        self.routine.kind == SubroutineKind::Function
    }

    fn define(&mut self, name: &Token, ty: &str, kind: SymbolKind) -> Result<(), CompileError> {
        let defined = match kind.scope() {
            Scope::Class => self.symbols.define_class_symbol(&name.lexeme, ty, kind),
            Scope::Subroutine => self.symbols.define_local_symbol(&name.lexeme, ty, kind),
        };
        defined.map(|_| ()).map_err(|error| match error {
            SymbolError::TooMany { kind } => CompileError::semantic(
                SemanticError::TooMany(format!("{kind} symbols").into()),
                name.span.clone(),
            ),
            error => CompileError::DuplicateSymbol {
                error,
                span: name.span.clone(),
            },
        })
    }

    fn resolve_variable(&self, name: &Token) -> Result<Symbol, CompileError> {
        let Some(symbol) = self.symbols.resolve(&name.lexeme) else {
            return Err(CompileError::semantic(
                SemanticError::UndefinedVariable(name.lexeme.clone()),
                name.span.clone(),
            ));
        };
        self.check_field_access(symbol, name)?;
        Ok(symbol.clone())
    }

    fn check_field_access(&self, symbol: &Symbol, name: &Token) -> Result<(), CompileError> {
        if symbol.kind == SymbolKind::Field && self.in_function() {
            return Err(CompileError::semantic(
                SemanticError::NoReceiver(format!("field `{}`", name.lexeme).into()),
                name.span.clone(),
            ));
        }
        Ok(())
    }

    // Program structure

    pub fn compile_class(mut self) -> Result<CompiledClass, CompileError> {
        self.expect_keyword(Keyword::Class)?;
        let name = self.expect_identifier("a class name")?;
        if let Some(expected) = &self.expected_class {
            if *expected != name.lexeme {
                return Err(CompileError::semantic(
                    SemanticError::ClassNameMismatch {
                        expected: expected.clone(),
                        found: name.lexeme.clone(),
                    },
                    name.span,
                ));
            }
        }
        debug!(class = %name.lexeme, "compiling class");
        self.class_name = name.lexeme.clone();
        self.known_types.insert(name.lexeme);

        self.expect_symbol('{')?;
        while let Some(keyword @ (Keyword::Static | Keyword::Field)) = self.current_keyword() {
            self.compile_class_var_dec(keyword)?;
        }
        while let Some(keyword @ (Keyword::Constructor | Keyword::Function | Keyword::Method)) =
            self.current_keyword()
        {
            self.compile_subroutine(keyword)?;
        }
        self.expect_symbol('}')?;
        if self.current.is_some() {
            return Err(self.unexpected("end of input"));
        }

        debug!(
            class = %self.class_name,
            instructions = self.output.len(),
            "compiled class"
        );
        Ok(CompiledClass {
            fields: self.symbols.count_of_kind(SymbolKind::Field),
            statics: self.symbols.count_of_kind(SymbolKind::Static),
            name: self.class_name,
            instructions: self.output,
            subroutines: self.subroutines,
        })
    }

    fn compile_class_var_dec(&mut self, keyword: Keyword) -> Result<(), CompileError> {
        self.bump()?;
        let kind = match keyword {
            Keyword::Static => SymbolKind::Static,
            _ => SymbolKind::Field,
        };
        let ty = self.expect_type(false)?;
        loop {
            let name = self.expect_identifier("a variable name")?;
            self.define(&name, &ty.lexeme, kind)?;
            if !self.at_symbol(',') {
                break;
            }
            self.bump()?;
        }
        self.expect_symbol(';')?;
        Ok(())
    }

    fn compile_subroutine(&mut self, keyword: Keyword) -> Result<(), CompileError> {
        self.bump()?;
        let kind = match keyword {
            Keyword::Constructor => SubroutineKind::Constructor,
            Keyword::Method => SubroutineKind::Method,
            _ => SubroutineKind::Function,
        };
        let return_type = self.expect_type(true)?;
        let name = self.expect_identifier("a subroutine name")?;
        if self.subroutines.iter().any(|s| s.name == name.lexeme) {
            return Err(CompileError::DuplicateSymbol {
                error: SymbolError::Duplicate {
                    name: name.lexeme,
                    scope: Scope::Class,
                },
                span: name.span,
            });
        }
        debug!(%kind, name = %name.lexeme, "compiling subroutine");

        self.symbols.reset_subroutine_scope();
        if kind == SubroutineKind::Method {
            let class_name = self.class_name.clone();
            self.symbols
                .define_local_symbol("this", class_name, SymbolKind::Argument)
                .map_err(|error| CompileError::DuplicateSymbol {
                    error,
                    span: name.span.clone(),
                })?;
        }

        self.expect_symbol('(')?;
        let parameters = self.compile_parameter_list()?;
        self.expect_symbol(')')?;

        // Registered before the body so recursive calls are checked too
        self.subroutines.push(SubroutineInfo {
            name: name.lexeme.clone(),
            kind,
            return_type: return_type.lexeme.clone(),
            parameters,
            locals: 0,
        });
        self.routine = Routine {
            name: name.lexeme,
            kind,
            returns_void: return_type.is_keyword(Keyword::Void),
            labels: 0,
        };
        self.compile_subroutine_body()
    }

    fn compile_parameter_list(&mut self) -> Result<u16, CompileError> {
        let mut count = 0;
        if self.at_symbol(')') {
            return Ok(count);
        }
        loop {
            let ty = self.expect_type(false)?;
            let name = self.expect_identifier("a parameter name")?;
            self.define(&name, &ty.lexeme, SymbolKind::Argument)?;
            count = self.count_one_more(count, "parameters", &name.span)?;
            if !self.at_symbol(',') {
                return Ok(count);
            }
            self.bump()?;
        }
    }

    fn compile_subroutine_body(&mut self) -> Result<(), CompileError> {
        self.expect_symbol('{')?;
        while self.at_keyword(Keyword::Var) {
            self.compile_var_dec()?;
        }

        let locals = self.symbols.count_of_kind(SymbolKind::Local);
        if let Some(info) = self.subroutines.last_mut() {
            info.locals = locals;
        }
        let qualified = format!("{}.{}", self.class_name, self.routine.name);
        self.emit(Instruction::Function(qualified.into(), locals));
        match self.routine.kind {
            SubroutineKind::Constructor => {
                let fields = self.symbols.count_of_kind(SymbolKind::Field);
                self.emit(Instruction::Push(Segment::Constant, fields));
                self.emit(Instruction::Call("Memory.alloc".into(), 1));
                self.emit(Instruction::Pop(Segment::Pointer, 0));
            }
            SubroutineKind::Method => {
                self.emit(Instruction::Push(Segment::Argument, 0));
                self.emit(Instruction::Pop(Segment::Pointer, 0));
            }
            SubroutineKind::Function => {}
        }

        let returns = self.compile_statements()?;
        let close = self.expect_symbol('}')?;
        if !returns {
            return Err(CompileError::semantic(
                SemanticError::MissingReturn(self.routine.name.clone()),
                close.span,
            ));
        }
        Ok(())
    }

    fn compile_var_dec(&mut self) -> Result<(), CompileError> {
        self.expect_keyword(Keyword::Var)?;
        let ty = self.expect_type(false)?;
        loop {
            let name = self.expect_identifier("a variable name")?;
            self.define(&name, &ty.lexeme, SymbolKind::Local)?;
            if !self.at_symbol(',') {
                break;
            }
            self.bump()?;
        }
        self.expect_symbol(';')?;
        Ok(())
    }

    // Statements

    /// Returns whether some statement of the sequence always returns.
    /// Statements after it are unreachable but still compiled.
    fn compile_statements(&mut self) -> Result<bool, CompileError> {
        let mut returns = false;
        loop {
            returns |= match self.current_keyword() {
                Some(Keyword::Let) => {
                    self.compile_let()?;
                    false
                }
                Some(Keyword::If) => self.compile_if()?,
                Some(Keyword::While) => {
                    self.compile_while()?;
                    false
                }
                Some(Keyword::Do) => {
                    self.compile_do()?;
                    false
                }
                Some(Keyword::Return) => {
                    self.compile_return()?;
                    true
                }
                _ => return Ok(returns),
            };
        }
    }

    fn compile_let(&mut self) -> Result<(), CompileError> {
        self.expect_keyword(Keyword::Let)?;
        let name = self.expect_identifier("a variable name")?;
        let target = self.resolve_variable(&name)?;

        if !self.at_symbol('[') {
            self.expect_symbol('=')?;
            self.compile_expression()?;
            self.expect_symbol(';')?;
            self.emit(Instruction::Pop(target.segment(), target.index));
            return Ok(());
        }

        self.bump()?;
        self.push(&target);
        self.compile_expression()?;
        self.expect_symbol(']')?;
        self.emit(Instruction::Arithmetic(ArithmeticOp::Add));
        self.expect_symbol('=')?;
        let value = self.capture(Self::compile_expression)?;
        self.expect_symbol(';')?;

        // The value itself may point `that` elsewhere (`let a[i] = b[j];`),
        // in which case the target address has to wait below it on the stack
        if value.contains(&Instruction::Pop(Segment::Pointer, 1)) {
            self.output.extend(value);
            self.emit(Instruction::Pop(Segment::Temp, 0));
            self.emit(Instruction::Pop(Segment::Pointer, 1));
            self.emit(Instruction::Push(Segment::Temp, 0));
        } else {
            self.emit(Instruction::Pop(Segment::Pointer, 1));
            self.output.extend(value);
        }
        self.emit(Instruction::Pop(Segment::That, 0));
        Ok(())
    }

    fn compile_if(&mut self) -> Result<bool, CompileError> {
        self.expect_keyword(Keyword::If)?;
        self.compile_condition()?;

        let label = self.next_label();
        let else_label: Box<str> = format!("IF_FALSE{label}").into();
        let end_label: Box<str> = format!("IF_END{label}").into();
        self.emit(Instruction::Arithmetic(ArithmeticOp::Not));
        self.emit(Instruction::IfGoto(else_label.clone()));

        let then_returns = self.compile_block()?;
        self.emit(Instruction::Goto(end_label.clone()));
        self.emit(Instruction::Label(else_label));

        let mut else_returns = false;
        if self.at_keyword(Keyword::Else) {
            self.bump()?;
            else_returns = self.compile_block()?;
        }
        self.emit(Instruction::Label(end_label));
        Ok(then_returns && else_returns)
    }

    fn compile_while(&mut self) -> Result<(), CompileError> {
        self.expect_keyword(Keyword::While)?;

        let label = self.next_label();
        let loop_label: Box<str> = format!("WHILE_EXP{label}").into();
        let end_label: Box<str> = format!("WHILE_END{label}").into();
        self.emit(Instruction::Label(loop_label.clone()));

        self.compile_condition()?;
        self.emit(Instruction::Arithmetic(ArithmeticOp::Not));
        self.emit(Instruction::IfGoto(end_label.clone()));

        self.compile_block()?;
        self.emit(Instruction::Goto(loop_label));
        self.emit(Instruction::Label(end_label));
        Ok(())
    }

    fn compile_condition(&mut self) -> Result<(), CompileError> {
        self.expect_symbol('(')?;
        self.compile_expression()?;
        self.expect_symbol(')')?;
        Ok(())
    }

    fn compile_block(&mut self) -> Result<bool, CompileError> {
        self.expect_symbol('{')?;
        let returns = self.compile_statements()?;
        self.expect_symbol('}')?;
        Ok(returns)
    }

    fn compile_do(&mut self) -> Result<(), CompileError> {
        self.expect_keyword(Keyword::Do)?;
        let first = self.expect_identifier("a subroutine call")?;
        self.compile_subroutine_call(first)?;
        self.expect_symbol(';')?;
        self.emit(Instruction::Pop(Segment::Temp, 0));
        Ok(())
    }

    fn compile_return(&mut self) -> Result<(), CompileError> {
        let keyword = self.expect_keyword(Keyword::Return)?;
        if self.at_symbol(';') {
            if !self.routine.returns_void {
                return Err(CompileError::semantic(
                    SemanticError::MissingReturnValue(self.routine.name.clone()),
                    keyword.span,
                ));
            }
            self.emit(Instruction::Push(Segment::Constant, 0));
        } else {
            if self.routine.returns_void {
                let span = self.current.as_ref().map_or(keyword.span, |t| t.span.clone());
                return Err(CompileError::semantic(
                    SemanticError::ValueFromVoid(self.routine.name.clone()),
                    span,
                ));
            }
            self.compile_expression()?;
        }
        self.expect_symbol(';')?;
        self.emit(Instruction::Return);
        Ok(())
    }

    // Expressions

    /// Operators apply strictly left to right, there is no precedence.
    fn compile_expression(&mut self) -> Result<(), CompileError> {
        self.compile_term()?;
        while let Some(op) = self.current_binary_op() {
            self.bump()?;
            self.compile_term()?;
            self.emit(op);
        }
        Ok(())
    }

    fn current_binary_op(&self) -> Option<Instruction> {
        let TokenKind::Symbol(symbol) = self.current.as_ref()?.kind else {
            return None;
        };
        let op = match symbol {
            '+' => ArithmeticOp::Add,
            '-' => ArithmeticOp::Sub,
            '&' => ArithmeticOp::And,
            '|' => ArithmeticOp::Or,
            '<' => ArithmeticOp::Lt,
            '>' => ArithmeticOp::Gt,
            '=' => ArithmeticOp::Eq,
            '*' => return Some(Instruction::Call("Math.multiply".into(), 2)),
            '/' => return Some(Instruction::Call("Math.divide".into(), 2)),
            _ => return None,
        };
        Some(Instruction::Arithmetic(op))
    }

    fn compile_term(&mut self) -> Result<(), CompileError> {
        let Some(token) = self.current.clone() else {
            return Err(self.unexpected("an expression"));
        };
        match token.kind {
            TokenKind::IntConstant(value) => {
                self.bump()?;
                self.emit(Instruction::Push(Segment::Constant, value));
            }
            TokenKind::StringConstant => {
                self.bump()?;
                self.compile_string(&token)?;
            }
            TokenKind::Keyword(Keyword::True) => {
                self.bump()?;
                self.emit(Instruction::Push(Segment::Constant, 0));
                self.emit(Instruction::Arithmetic(ArithmeticOp::Not));
            }
            TokenKind::Keyword(Keyword::False | Keyword::Null) => {
                self.bump()?;
                self.emit(Instruction::Push(Segment::Constant, 0));
            }
            TokenKind::Keyword(Keyword::This) => {
                if self.in_function() {
                    return Err(CompileError::semantic(
                        SemanticError::NoReceiver("`this`".into()),
                        token.span,
                    ));
                }
                self.bump()?;
                self.emit(Instruction::Push(Segment::Pointer, 0));
            }
            TokenKind::Symbol('(') => {
                self.bump()?;
                self.compile_expression()?;
                self.expect_symbol(')')?;
            }
            TokenKind::Symbol(symbol @ ('-' | '~')) => {
                self.bump()?;
                self.compile_term()?;
                let op = match symbol {
                    '-' => ArithmeticOp::Neg,
                    _ => ArithmeticOp::Not,
                };
                self.emit(Instruction::Arithmetic(op));
            }
            TokenKind::Identifier => {
                self.bump()?;
                if self.at_symbol('[') {
                    let array = self.resolve_variable(&token)?;
                    self.bump()?;
                    self.push(&array);
                    self.compile_expression()?;
                    self.expect_symbol(']')?;
                    self.emit(Instruction::Arithmetic(ArithmeticOp::Add));
                    self.emit(Instruction::Pop(Segment::Pointer, 1));
                    self.emit(Instruction::Push(Segment::That, 0));
                } else if self.at_symbol('(') || self.at_symbol('.') {
                    self.compile_subroutine_call(token)?;
                } else {
                    let variable = self.resolve_variable(&token)?;
                    self.push(&variable);
                }
            }
            _ => return Err(self.unexpected("an expression")),
        }
        Ok(())
    }

    fn compile_string(&mut self, token: &Token) -> Result<(), CompileError> {
        let length = u16::try_from(token.lexeme.chars().count())
            .ok()
            .filter(|len| *len <= MAX_INTEGER)
            .ok_or_else(|| {
                CompileError::semantic(SemanticError::StringTooLong, token.span.clone())
            })?;
        self.emit(Instruction::Push(Segment::Constant, length));
        self.emit(Instruction::Call("String.new".into(), 1));
        for c in token.lexeme.chars() {
            let code = u16::try_from(u32::from(c))
                .ok()
                .filter(|code| *code <= MAX_INTEGER)
                .ok_or_else(|| {
                    CompileError::semantic(
                        SemanticError::UnencodableCharacter(c),
                        token.span.clone(),
                    )
                })?;
            self.emit(Instruction::Push(Segment::Constant, code));
            self.emit(Instruction::Call("String.appendChar".into(), 2));
        }
        Ok(())
    }

    /// Compiles a call whose first identifier has already been consumed.
    fn compile_subroutine_call(&mut self, first: Token) -> Result<(), CompileError> {
        let (qualifier, name) = if self.at_symbol('.') {
            self.bump()?;
            let name = self.expect_identifier("a subroutine name")?;
            (Some(first), name)
        } else {
            (None, first)
        };

        let resolved = CallTarget::resolve(
            qualifier.as_ref().map(|q| q.lexeme.as_ref()),
            &self.symbols,
            &self.known_types,
        );
        let Some(target) = resolved else {
            let qualifier = qualifier.unwrap_or_else(|| name.clone());
            return Err(CompileError::semantic(
                SemanticError::UnknownType(qualifier.lexeme),
                qualifier.span,
            ));
        };

        let class = match &target {
            CallTarget::MethodOnVariable(symbol) => symbol.ty.clone(),
            CallTarget::StaticOrConstructorOnType(ty) => ty.clone(),
            CallTarget::ImplicitMethodOnSelf => self.class_name.clone(),
        };
        let callee: Box<str> = format!("{class}.{}", name.lexeme).into();

        // Only subroutines of this class declared earlier in the unit are known
        let signature = (class == self.class_name)
            .then(|| self.subroutines.iter().find(|s| s.name == name.lexeme))
            .flatten()
            .cloned();
        if let Some(signature) = &signature {
            match (signature.kind, target.has_receiver()) {
                (SubroutineKind::Method, false) => {
                    return Err(CompileError::semantic(
                        SemanticError::MethodWithoutReceiver(callee),
                        name.span,
                    ))
                }
                (SubroutineKind::Function | SubroutineKind::Constructor, true) => {
                    return Err(CompileError::semantic(
                        SemanticError::NotAMethod(callee),
                        name.span,
                    ))
                }
                _ => {}
            }
        }

        match &target {
            CallTarget::MethodOnVariable(symbol) => {
                let variable = qualifier.as_ref().unwrap_or(&name);
                if is_primitive(&symbol.ty) {
                    return Err(CompileError::semantic(
                        SemanticError::PrimitiveReceiver {
                            variable: symbol.name.clone(),
                            method: name.lexeme.clone(),
                            ty: symbol.ty.clone(),
                        },
                        variable.span.clone(),
                    ));
                }
                self.check_field_access(symbol, variable)?;
                self.push(symbol);
            }
            CallTarget::ImplicitMethodOnSelf => {
                if self.in_function() {
                    return Err(CompileError::semantic(
                        SemanticError::NoReceiver(
                            format!("method call `{}`", name.lexeme).into(),
                        ),
                        name.span,
                    ));
                }
                self.emit(Instruction::Push(Segment::Pointer, 0));
            }
            CallTarget::StaticOrConstructorOnType(_) => {}
        }

        self.expect_symbol('(')?;
        let arguments = self.compile_expression_list()?;
        self.expect_symbol(')')?;

        if let Some(signature) = signature {
            if signature.parameters != arguments {
                return Err(CompileError::semantic(
                    SemanticError::ArgumentCount {
                        callee,
                        expected: signature.parameters,
                        found: arguments,
                    },
                    name.span,
                ));
            }
        }

        let receiver = u16::from(target.has_receiver());
        let arguments = if receiver == 0 {
            arguments
        } else {
            self.count_one_more(arguments, "arguments", &name.span)?
        };
        self.emit(Instruction::Call(callee, arguments));
        Ok(())
    }

    fn compile_expression_list(&mut self) -> Result<u16, CompileError> {
        let mut count = 0;
        if self.at_symbol(')') {
            return Ok(count);
        }
        loop {
            let start = self.current.as_ref().map(|t| t.span.clone()).unwrap_or_default();
            self.compile_expression()?;
            count = self.count_one_more(count, "arguments", &start)?;
            if !self.at_symbol(',') {
                return Ok(count);
            }
            self.bump()?;
        }
    }
}

#[cfg(test)]
mod tests;
