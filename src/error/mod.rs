//! Error types for all phases: lexing, parsing, code generation, assembly
//! and VM faults.

use crate::span::Span;
use thiserror::Error;

/// Lexer errors.
#[derive(Debug, Error)]
pub enum LexError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedChar(char, Span),

    #[error("Unterminated string at {0}")]
    UnterminatedString(Span),

    #[error("Invalid escape sequence '\\{0}' at {1}")]
    InvalidEscape(char, Span),

    #[error("Invalid number '{0}' at {1}")]
    InvalidNumber(String, Span),

    #[error("Unterminated comment at {0}")]
    UnterminatedComment(Span),
}

impl LexError {
    pub fn unexpected_char(c: char, span: Span) -> Self {
        Self::UnexpectedChar(c, span)
    }

    pub fn unterminated_string(span: Span) -> Self {
        Self::UnterminatedString(span)
    }

    pub fn invalid_escape(c: char, span: Span) -> Self {
        Self::InvalidEscape(c, span)
    }

    pub fn invalid_number(s: impl Into<String>, span: Span) -> Self {
        Self::InvalidNumber(s.into(), span)
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedChar(_, span) => *span,
            Self::UnterminatedString(span) => *span,
            Self::InvalidEscape(_, span) => *span,
            Self::InvalidNumber(_, span) => *span,
            Self::UnterminatedComment(span) => *span,
        }
    }
}

/// Parser errors.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unexpected token '{found}', expected {expected} at {span}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("Unexpected end of input at {0}")]
    UnexpectedEof(Span),

    #[error("Member path segment must be a bare identifier at {0}")]
    BadMemberPath(Span),

    #[error("{message} at {span}")]
    General { message: String, span: Span },
}

impl ParseError {
    pub fn unexpected_token(
        expected: impl Into<String>,
        found: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::UnexpectedToken {
            expected: expected.into(),
            found: found.into(),
            span,
        }
    }

    pub fn unexpected_eof(span: Span) -> Self {
        Self::UnexpectedEof(span)
    }

    pub fn bad_member_path(span: Span) -> Self {
        Self::BadMemberPath(span)
    }

    pub fn general(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedToken { span, .. } => *span,
            Self::UnexpectedEof(span) => *span,
            Self::BadMemberPath(span) => *span,
            Self::General { span, .. } => *span,
        }
    }

    /// The canonical diagnostic written to the error slot on a failed compile.
    pub fn diagnostic(&self) -> String {
        let span = self.span();
        format!("{}:{}: error: syntax error", span.line, span.column)
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        let span = err.span();
        Self::General {
            message: err.to_string(),
            span,
        }
    }
}

/// Code generator errors. A successful parse never produces these; they
/// guard against walking a malformed tree.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Cannot generate code for {kind} node at line {line}")]
    UnknownNode { kind: String, line: usize },

    #[error("Invalid assignment target at line {line}")]
    InvalidTarget { line: usize },
}

impl CompileError {
    pub fn unknown_node(kind: impl Into<String>, line: usize) -> Self {
        Self::UnknownNode {
            kind: kind.into(),
            line,
        }
    }

    pub fn invalid_target(line: usize) -> Self {
        Self::InvalidTarget { line }
    }
}

/// Assembler errors.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Unknown mnemonic '{name}' on line {line}")]
    UnknownMnemonic { name: String, line: usize },

    #[error("Missing operand for '{name}' on line {line}")]
    MissingOperand { name: String, line: usize },

    #[error("Bad operand on line {line}: {message}")]
    BadOperand { line: usize, message: String },
}

impl AssembleError {
    pub fn unknown_mnemonic(name: impl Into<String>, line: usize) -> Self {
        Self::UnknownMnemonic {
            name: name.into(),
            line,
        }
    }

    pub fn missing_operand(name: impl Into<String>, line: usize) -> Self {
        Self::MissingOperand {
            name: name.into(),
            line,
        }
    }

    pub fn bad_operand(line: usize, message: impl Into<String>) -> Self {
        Self::BadOperand {
            line,
            message: message.into(),
        }
    }
}

/// Run-time faults. The VM never unwinds on these: the dispatch loop
/// formats them into the error slot and switches to the Error mode.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("undefined symbol '{0}'")]
    UndefinedSymbol(String),

    #[error("cannot {action} value of type {holder}")]
    BadHolderType {
        action: &'static str,
        holder: &'static str,
    },

    #[error("call of non-executable value of type {0}")]
    NotCallable(&'static str),

    #[error("{0}")]
    Native(String),
}

impl Fault {
    pub fn bad_holder(action: &'static str, holder: &'static str) -> Self {
        Self::BadHolderType { action, holder }
    }

    pub fn native(message: impl Into<String>) -> Self {
        Self::Native(message.into())
    }
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum RillError {
    #[error("Lex error: {0}")]
    Lex(#[from] LexError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Assemble error: {0}")]
    Assemble(#[from] AssembleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
