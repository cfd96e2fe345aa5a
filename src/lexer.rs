use core::fmt;

pub use logos::Span;
use logos::Logos;

fn skip_block_comment(lexer: &mut logos::Lexer<RawToken>) -> Result<(), LexerError> {
    // Block comments end at the first `*/`, an inner `/*` means nothing
    match lexer.remainder().find("*/") {
        Some(end) => {
            lexer.bump(end + 2);
            Ok(())
        }
        None => {
            lexer.bump(lexer.remainder().len());
            Err(LexerError::UnterminatedComment)
        }
    }
}

fn read_string(lexer: &mut logos::Lexer<RawToken>) -> Result<Box<str>, LexerError> {
    let rest = lexer.remainder();
    match rest.find(|c: char| c == '"' || c == '\n') {
        Some(end) if rest[end..].starts_with('"') => {
            let contents = Box::from(&rest[..end]);
            lexer.bump(end + 1);
            Ok(contents)
        }
        Some(end) => {
            lexer.bump(end);
            Err(LexerError::UnterminatedString)
        }
        None => {
            lexer.bump(rest.len());
            Err(LexerError::UnterminatedString)
        }
    }
}

fn read_integer(lexer: &mut logos::Lexer<RawToken>) -> Result<u16, LexerError> {
    let text = lexer.slice();
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LexerError::MalformedInteger(Box::from(text)));
    }
    match text.parse::<u16>() {
        Ok(value) if value <= MAX_INTEGER => Ok(value),
        _ => Err(LexerError::IntegerTooLarge(Box::from(text))),
    }
}

/// Largest integer constant the target machine can represent.
pub const MAX_INTEGER: u16 = 32767;

#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid character")]
    Invalid,
    #[error("unterminated string constant")]
    UnterminatedString,
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("malformed integer constant `{0}`")]
    MalformedInteger(Box<str>),
    #[error("integer constant `{0}` is larger than 32767")]
    IntegerTooLarge(Box<str>),
}

/// A [`LexerError`] together with the source range it was found at.
#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone)]
#[error("{error}")]
pub struct LexicalError {
    pub error: LexerError,
    pub span: Span,
}

/// Tokens as recognised by logos, trivia included.
///
/// Words are not classified here: whether a word is a keyword is decided by
/// [`Lexer`] once its full text is known.
#[derive(Debug, Clone, PartialEq, Eq, Logos)]
#[logos(error = LexerError)]
pub enum RawToken {
    #[regex(r"[ \t\r\n\x0C]+")]
    Whitespace,
    #[regex(r"//[^\n]*")]
    LineComment,
    #[token("/*", skip_block_comment)]
    BlockComment,
    #[token("\"", read_string)]
    String(Box<str>),
    #[regex(r"[0-9][0-9A-Za-z_]*", read_integer)]
    Integer(u16),
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Word,
    #[regex(r"[{}()\[\].,;+\-*/&|<>=~]", |l| l.slice().chars().next())]
    Symbol(char),
}

macro_rules! keywords {
    ($($variant:ident => $text:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Keyword {
            $($variant),*
        }

        impl Keyword {
            pub const ALL: &'static [Keyword] = &[$(Keyword::$variant),*];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Keyword::$variant => $text),*
                }
            }

            pub fn from_word(word: &str) -> Option<Self> {
                match word {
                    $($text => Some(Keyword::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

keywords! {
    Class => "class",
    Constructor => "constructor",
    Function => "function",
    Method => "method",
    Field => "field",
    Static => "static",
    Var => "var",
    Int => "int",
    Char => "char",
    Boolean => "boolean",
    Void => "void",
    True => "true",
    False => "false",
    Null => "null",
    This => "this",
    Let => "let",
    Do => "do",
    If => "if",
    Else => "else",
    While => "while",
    Return => "return",
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword(Keyword),
    Symbol(char),
    Identifier,
    IntConstant(u16),
    StringConstant,
}

impl TokenKind {
    /// Tag name used by the token dump.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Keyword(_) => "keyword",
            Self::Symbol(_) => "symbol",
            Self::Identifier => "identifier",
            Self::IntConstant(_) => "integerConstant",
            Self::StringConstant => "stringConstant",
        }
    }
}

/// A classified token. String constants store their contents without the
/// surrounding quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: Box<str>,
    pub span: Span,
}

impl Token {
    pub fn is_symbol(&self, symbol: char) -> bool {
        self.kind == TokenKind::Symbol(symbol)
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }

    /// The lexeme with `<`, `>`, `&` and `"` replaced by their XML entities.
    pub fn escaped_lexeme(&self) -> String {
        let mut escaped = String::with_capacity(self.lexeme.len());
        for c in self.lexeme.chars() {
            match c {
                '<' => escaped.push_str("&lt;"),
                '>' => escaped.push_str("&gt;"),
                '&' => escaped.push_str("&amp;"),
                '"' => escaped.push_str("&quot;"),
                c => escaped.push(c),
            }
        }
        escaped
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::StringConstant => write!(f, "\"{}\"", self.lexeme),
            _ => write!(f, "`{}`", self.lexeme),
        }
    }
}

/// Pulls classified tokens out of a source text, one at a time, skipping
/// whitespace and comments.
pub struct Lexer<'src> {
    inner: logos::Lexer<'src, RawToken>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            inner: RawToken::lexer(source),
        }
    }

    pub fn source(&self) -> &'src str {
        self.inner.source()
    }

    /// Produces the next token, or `None` once the input is exhausted.
    pub fn advance(&mut self) -> Option<Result<Token, LexicalError>> {
        loop {
            let raw = self.inner.next()?;
            let span = self.inner.span();
            let kind = match raw {
                Ok(RawToken::Word) => match Keyword::from_word(self.inner.slice()) {
                    Some(keyword) => TokenKind::Keyword(keyword),
                    None => TokenKind::Identifier,
                },
                Ok(RawToken::Integer(value)) => TokenKind::IntConstant(value),
                Ok(RawToken::Symbol(symbol)) => TokenKind::Symbol(symbol),
                Ok(RawToken::String(contents)) => {
                    return Some(Ok(Token {
                        kind: TokenKind::StringConstant,
                        lexeme: contents,
                        span,
                    }))
                }
                Ok(RawToken::Whitespace | RawToken::LineComment | RawToken::BlockComment) => {
                    continue
                }
                Err(error) => return Some(Err(LexicalError { error, span })),
            };
            return Some(Ok(Token {
                kind,
                lexeme: Box::from(self.inner.slice()),
                span,
            }));
        }
    }
}

impl<'src> Iterator for Lexer<'src> {
    type Item = Result<Token, LexicalError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance()
    }
}

/// 1-based line and column of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |idx| idx + 1);
    (line, before[line_start..].chars().count() + 1)
}
