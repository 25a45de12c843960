//! Error taxonomy shared by the lexer, parser, and execution engine.
//!
//! | Stage | Type | Effect |
//! |-------|------|--------|
//! | lexing | [`LexError`] | aborts parsing of the whole script |
//! | parsing | [`ParseError`] | the line becomes an invalid statement, reported when the run reaches it |
//! | execution | [`RuntimeError`] | aborts the run; output of earlier lines is kept |

use thiserror::Error;

/// A run of characters no lexical class accepts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("line {line}: cannot tokenize `{rest}`")]
    Unmatched { line: usize, rest: String },
    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },
}

impl LexError {
    pub fn line(&self) -> usize {
        match self {
            LexError::Unmatched { line, .. } | LexError::UnterminatedString { line } => *line,
        }
    }
}

/// No grammar rule matched a line, or an expression left tokens unconsumed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Failure raised while executing a statement.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("cannot cast {from} to {to}")]
    Cast { from: &'static str, to: &'static str },
    #[error("operator `{op}` is not defined for {left} and {right}")]
    Operator {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("operator `{op}` is not defined for {operand}")]
    UnaryOperator { op: &'static str, operand: &'static str },
    #[error("{name} expects {min}..={max} arguments, got {got}")]
    Arity {
        name: String,
        min: usize,
        max: usize,
        got: usize,
    },
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("{0} cannot be used as a map key")]
    InvalidKey(&'static str),
    #[error("no such key `{0}`")]
    MissingKey(String),
    #[error("unknown function `{0}`")]
    MissingFunction(String),
    #[error("`{scope}` needs {expected}, got {got}")]
    NotIterable {
        scope: &'static str,
        expected: &'static str,
        got: &'static str,
    },
    #[error("index {index} out of range for length {len}")]
    Index { index: i64, len: usize },
    #[error("{function}: {message}")]
    Builtin { function: String, message: String },
    #[error("host capability unavailable: {0}")]
    Host(String),
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("invalid regex: {0}")]
    Regex(String),
    #[error("{0}")]
    Invalid(ParseError),
    #[error("`{name}` exceeded the call depth limit of {limit}")]
    Recursion { name: String, limit: usize },
    #[error("branch task failed: {0}")]
    Task(String),
}

impl RuntimeError {
    pub fn builtin(function: &str, message: impl Into<String>) -> Self {
        RuntimeError::Builtin {
            function: function.to_owned(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(e: serde_json::Error) -> Self {
        RuntimeError::Json(e.to_string())
    }
}

impl From<regex::Error> for RuntimeError {
    fn from(e: regex::Error) -> Self {
        RuntimeError::Regex(e.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
