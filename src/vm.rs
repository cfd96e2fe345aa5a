//! Instructions of the stack machine and their textual form.
//!
//! Every instruction renders to exactly one line:
//!
//! push local 0
//! push constant 2
//! add
//! pop pointer 1
//! call Math.multiply 2
//! function Main.main 3
use core::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    Constant,
    Argument,
    Local,
    Static,
    This,
    That,
    Pointer,
    Temp,
}

impl Segment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::Argument => "argument",
            Self::Local => "local",
            Self::Static => "static",
            Self::This => "this",
            Self::That => "that",
            Self::Pointer => "pointer",
            Self::Temp => "temp",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Neg,
    Eq,
    Gt,
    Lt,
    And,
    Or,
    Not,
}

impl ArithmeticOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Neg => "neg",
            Self::Eq => "eq",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
        }
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Push(Segment, u16),
    Pop(Segment, u16),
    Arithmetic(ArithmeticOp),
    Label(Box<str>),
    Goto(Box<str>),
    IfGoto(Box<str>),
    Call(Box<str>, u16),
    Function(Box<str>, u16),
    Return,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push(segment, index) => write!(f, "push {segment} {index}"),
            Self::Pop(segment, index) => write!(f, "pop {segment} {index}"),
            Self::Arithmetic(op) => write!(f, "{op}"),
            Self::Label(label) => write!(f, "label {label}"),
            Self::Goto(label) => write!(f, "goto {label}"),
            Self::IfGoto(label) => write!(f, "if-goto {label}"),
            Self::Call(name, args) => write!(f, "call {name} {args}"),
            Self::Function(name, locals) => write!(f, "function {name} {locals}"),
            Self::Return => f.write_str("return"),
        }
    }
}

/// Writes instructions one per line. Operands are not checked here.
pub struct CodeEmitter<W> {
    out: W,
}

impl<W: io::Write> CodeEmitter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_instruction(&mut self, instruction: &Instruction) -> io::Result<()> {
        writeln!(self.out, "{instruction}")
    }

    pub fn write_all<'a>(
        &mut self,
        instructions: impl IntoIterator<Item = &'a Instruction>,
    ) -> io::Result<()> {
        for instruction in instructions {
            self.write_instruction(instruction)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Renders a whole instruction stream, newline-terminated.
pub fn render(instructions: &[Instruction]) -> String {
    let mut emitter = CodeEmitter::new(Vec::new());
    // Writing into a Vec cannot fail
    _ = emitter.write_all(instructions);
    String::from_utf8_lossy(&emitter.into_inner()).into_owned()
}
