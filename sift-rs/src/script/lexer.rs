//! Line lexer.
//!
//! Each source line is lexed independently into its tab depth (length of the
//! leading whitespace run) and an ordered list of string tokens.  Tokens carry
//! no kind; the grammar decides what a token is by which rule accepts it.
//!
//! Token classes are rules of a [`CharSyntax`], tried in this order at every
//! position:
//!
//! 1. whitespace run (dropped)
//! 2. quoted string (`"..."`, backslash escapes, quotes kept in the token)
//! 3. two-character symbols `:: := >> << <= >= !=`
//! 4. single-character symbols `+ - = / * ! ; \ ( ) [ ] , < > & | : .`
//! 5. number (longest prefix starting with a digit that parses as `f64`)
//! 6. word (`[A-Za-z_$][A-Za-z0-9_$]*`)

use std::sync::OnceLock;

use crate::error::LexError;
use crate::pattern::{CharSyntax, Scan, Verdict};

const TWO_CHAR_SYMBOLS: &[&str] = &["::", ":=", ">>", "<<", "<=", ">=", "!="];
const ONE_CHAR_SYMBOLS: &[&str] = &[
    "+", "-", "=", "/", "*", "!", ";", "\\", "(", ")", "[", "]", ",", "<", ">", "&", "|", ":", ".",
];

/// Which rule produced a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Space,
    Text,
    Symbol,
    Number,
    Word,
}

fn token_rules() -> &'static CharSyntax<TokenClass> {
    static RULES: OnceLock<CharSyntax<TokenClass>> = OnceLock::new();
    RULES.get_or_init(|| {
        CharSyntax::new()
            .rule(
                Scan::Longest {
                    grows: char::is_whitespace,
                    accepts: |_| true,
                },
                TokenClass::Space,
            )
            .rule(Scan::Sequence(quoted), TokenClass::Text)
            .rule(Scan::Literal(TWO_CHAR_SYMBOLS), TokenClass::Symbol)
            .rule(Scan::Literal(ONE_CHAR_SYMBOLS), TokenClass::Symbol)
            .rule(
                Scan::Longest {
                    grows: is_number_char,
                    accepts: accept_number,
                },
                TokenClass::Number,
            )
            .rule(
                Scan::Longest {
                    grows: is_word_char,
                    accepts: accept_word,
                },
                TokenClass::Word,
            )
    })
}

/// One lexed source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexLine {
    pub tab_depth: usize,
    pub tokens: Vec<String>,
    pub text: String,
}

impl LexLine {
    /// Blank and comment lines have no tokens.
    pub fn is_blank(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Lex a single line.  `line` is only used for error reporting.
pub fn lex_line(text: &str, line: usize) -> Result<LexLine, LexError> {
    let body = text.trim_start();
    let tab_depth = text[..text.len() - body.len()].chars().count();
    let mut tokens = Vec::new();

    if !body.starts_with('#') {
        let mut pos = 0;
        while pos < body.len() {
            let rest = &body[pos..];
            let Some((class, len)) = token_rules().first_prefix_match(rest) else {
                return Err(if rest.starts_with('"') {
                    LexError::UnterminatedString { line }
                } else {
                    LexError::Unmatched {
                        line,
                        rest: rest.to_owned(),
                    }
                });
            };
            if *class != TokenClass::Space {
                tokens.push(rest[..len].to_owned());
            }
            pos += len;
        }
    }

    Ok(LexLine {
        tab_depth,
        tokens,
        text: text.to_owned(),
    })
}

/// A quoted string is complete at the first unescaped closing quote.
fn quoted(candidate: &str, next: Option<char>) -> Verdict {
    if !candidate.starts_with('"') {
        return Verdict::Reject;
    }
    if quoted_len(candidate) == Some(candidate.len()) {
        return Verdict::Accept;
    }
    match next {
        None => Verdict::Reject,
        Some(_) => Verdict::Undecided,
    }
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')
}

/// A numeric candidate never ends in `.` (that dot belongs to the next token)
/// and never contains `-` (minus is always its own token).
fn accept_number(candidate: &str) -> bool {
    candidate.starts_with(|c: char| c.is_ascii_digit())
        && !candidate.ends_with('.')
        && !candidate.contains('-')
        && candidate.parse::<f64>().is_ok()
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn accept_word(candidate: &str) -> bool {
    candidate.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_' || c == '$')
}

/// Length of a quoted string including both quotes.
fn quoted_len(rest: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in rest.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// Decode a quoted string token into its text.
pub fn unquote(token: &str) -> Option<String> {
    let inner = token.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Some(out)
}

/// Token predicates used by the grammar tables.
pub fn is_number_token(tok: &str) -> bool {
    accept_number(tok)
}

pub fn is_string_token(tok: &str) -> bool {
    tok.len() >= 2 && tok.starts_with('"') && tok.ends_with('"')
}

pub fn is_word_token(tok: &str) -> bool {
    accept_word(tok) && tok.chars().all(is_word_char)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
