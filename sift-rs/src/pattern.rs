//! Ordered token-pattern matching shared by the lexer-facing grammar tables.
//!
//! Both the statement grammar and the expression-component grammar are built
//! from the same three pieces:
//!
//! | Type | Role |
//! |------|------|
//! | [`SingleMatch`] | one named, optionally skippable positional test |
//! | [`Pattern`] | an ordered list of matches walked with a running cursor |
//! | [`Syntax`] | an ordered list of `(Pattern, Output)` rules; first match wins |
//!
//! The lexer uses the character-level counterpart, [`CharSyntax`], whose rules
//! are [`Scan`]s over the unlexed rest of a line.
//!
//! Rule order inside a [`Syntax`] or [`CharSyntax`] is the only disambiguation
//! mechanism, so more specific rules must be registered before general ones.

use std::fmt;
use std::sync::Arc;

// ── Validators ────────────────────────────────────────────────────────────────

/// Answer from a sequence validator while a candidate slice is being grown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Stop growing; the sequence does not match.
    Reject,
    /// Stop growing; the current candidate is the match.
    Accept,
    /// Keep growing (e.g. brackets are still open).
    Undecided,
}

/// Judges a candidate slice given the token that would follow it.
pub type Validator = Arc<dyn Fn(&[String], Option<&str>) -> Verdict + Send + Sync>;

/// Bracket depth of `tokens`, or `None` when a closer has no matching opener.
pub fn nesting(tokens: &[String]) -> Option<usize> {
    let mut stack: Vec<&str> = Vec::new();
    for tok in tokens {
        match tok.as_str() {
            "(" | "[" => stack.push(tok.as_str()),
            ")" => {
                if stack.pop() != Some("(") {
                    return None;
                }
            }
            "]" => {
                if stack.pop() != Some("[") {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(stack.len())
}

/// Accepts the shortest balanced slice that is immediately followed by `stop`.
pub fn until(stop: &'static str) -> Validator {
    Arc::new(move |candidate, next| match nesting(candidate) {
        None => Verdict::Reject,
        Some(0) if next == Some(stop) => Verdict::Accept,
        Some(_) if next.is_none() => Verdict::Reject,
        Some(_) => Verdict::Undecided,
    })
}

/// Accepts a slice that runs to the end of the tokens with brackets balanced.
pub fn balanced() -> Validator {
    Arc::new(|candidate, next| match (nesting(candidate), next) {
        (None, _) => Verdict::Reject,
        (Some(0), None) => Verdict::Accept,
        (Some(_), None) => Verdict::Reject,
        (Some(_), Some(_)) => Verdict::Undecided,
    })
}

/// Split `tokens` on `sep` wherever it occurs outside brackets.
pub fn split_top_level<'t>(tokens: &'t [String], sep: &str) -> Vec<&'t [String]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, tok) in tokens.iter().enumerate() {
        match tok.as_str() {
            "(" | "[" => depth += 1,
            ")" | "]" => depth = depth.saturating_sub(1),
            t if t == sep && depth == 0 => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts
}

// ── SingleMatch ───────────────────────────────────────────────────────────────

/// What a [`SingleMatch`] tests at the cursor.
#[derive(Clone)]
pub enum Matcher {
    /// Exactly this token.
    Token(&'static str),
    /// Any one of these tokens.
    OneOf(&'static [&'static str]),
    /// A single token accepted by the predicate.
    Test(fn(&str) -> bool),
    /// A greedy-with-validation run of one or more tokens.
    Sequence(Validator),
    /// Every remaining token (at least one).
    Rest,
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Token(t) => write!(f, "Token({t:?})"),
            Matcher::OneOf(ts) => write!(f, "OneOf({ts:?})"),
            Matcher::Test(_) => f.write_str("Test"),
            Matcher::Sequence(_) => f.write_str("Sequence"),
            Matcher::Rest => f.write_str("Rest"),
        }
    }
}

/// One positional test inside a [`Pattern`].
#[derive(Debug, Clone)]
pub struct SingleMatch {
    key: Option<&'static str>,
    matcher: Matcher,
    optional: bool,
}

impl SingleMatch {
    fn new(matcher: Matcher) -> Self {
        Self {
            key: None,
            matcher,
            optional: false,
        }
    }

    pub fn token(tok: &'static str) -> Self {
        Self::new(Matcher::Token(tok))
    }

    pub fn one_of(toks: &'static [&'static str]) -> Self {
        Self::new(Matcher::OneOf(toks))
    }

    pub fn test(pred: fn(&str) -> bool) -> Self {
        Self::new(Matcher::Test(pred))
    }

    pub fn sequence(validator: Validator) -> Self {
        Self::new(Matcher::Sequence(validator))
    }

    pub fn rest() -> Self {
        Self::new(Matcher::Rest)
    }

    /// Record the consumed slice under `key`.
    pub fn key(mut self, key: &'static str) -> Self {
        self.key = Some(key);
        self
    }

    /// A failing optional match consumes nothing instead of failing the pattern.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Number of tokens consumed at `at`, or `None` on failure.
    fn consume(&self, tokens: &[String], at: usize) -> Option<usize> {
        let rest = tokens.get(at..).unwrap_or(&[]);
        match &self.matcher {
            Matcher::Token(t) => (rest.first()?.as_str() == *t).then_some(1),
            Matcher::OneOf(ts) => {
                let first = rest.first()?.as_str();
                ts.iter().any(|t| *t == first).then_some(1)
            }
            Matcher::Test(pred) => pred(rest.first()?.as_str()).then_some(1),
            Matcher::Rest => (!rest.is_empty()).then_some(rest.len()),
            Matcher::Sequence(validator) => {
                for len in 1..=rest.len() {
                    let next = rest.get(len).map(String::as_str);
                    match validator(&rest[..len], next) {
                        Verdict::Reject => return None,
                        Verdict::Accept => return Some(len),
                        Verdict::Undecided => {}
                    }
                }
                None
            }
        }
    }
}

// ── Captures ──────────────────────────────────────────────────────────────────

/// Slices recorded by a successful [`Pattern`] match.
#[derive(Debug, Clone)]
pub struct Captures<'t> {
    slots: Vec<(&'static str, &'t [String])>,
    consumed: usize,
}

impl<'t> Captures<'t> {
    /// The slice captured under `key`, if that match took part.
    pub fn get(&self, key: &str) -> Option<&'t [String]> {
        self.slots
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, slice)| *slice)
    }

    /// The first token captured under `key`.
    pub fn token(&self, key: &str) -> Option<&'t str> {
        self.get(key)?.first().map(String::as_str)
    }

    /// Total tokens consumed, starting at the match position.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

// ── Pattern ───────────────────────────────────────────────────────────────────

/// An ordered list of [`SingleMatch`] entries.
#[derive(Debug, Clone)]
pub struct Pattern {
    matches: Vec<SingleMatch>,
}

impl Pattern {
    pub fn new(matches: Vec<SingleMatch>) -> Self {
        Self { matches }
    }

    /// Match as many entries as the pattern has, starting at `from`.
    ///
    /// A required entry that fails aborts the whole pattern; an optional one
    /// contributes nothing and leaves the cursor where it was.
    pub fn test_partial<'t>(&self, tokens: &'t [String], from: usize) -> Option<Captures<'t>> {
        let mut cursor = from;
        let mut slots = Vec::new();
        for m in &self.matches {
            match m.consume(tokens, cursor) {
                Some(len) => {
                    if let Some(key) = m.key {
                        slots.push((key, &tokens[cursor..cursor + len]));
                    }
                    cursor += len;
                }
                None if m.optional => {}
                None => return None,
            }
        }
        Some(Captures {
            slots,
            consumed: cursor - from,
        })
    }

    /// Like [`test_partial`](Self::test_partial) but every token from `from`
    /// onward must be consumed.
    pub fn test_full<'t>(&self, tokens: &'t [String], from: usize) -> Option<Captures<'t>> {
        self.test_partial(tokens, from)
            .filter(|caps| from + caps.consumed == tokens.len())
    }
}

// ── Syntax ────────────────────────────────────────────────────────────────────

/// An ordered rule table mapping patterns to outputs.
pub struct Syntax<O> {
    rules: Vec<(Pattern, O)>,
}

impl<O> Default for Syntax<O> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<O> Syntax<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule.  Earlier rules take priority.
    pub fn rule(mut self, pattern: Pattern, output: O) -> Self {
        self.rules.push((pattern, output));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule (in registration order) whose pattern matches at `from`.
    pub fn first_partial_match<'s, 't>(
        &'s self,
        tokens: &'t [String],
        from: usize,
    ) -> Option<(&'s O, Captures<'t>)> {
        self.rules
            .iter()
            .find_map(|(p, out)| p.test_partial(tokens, from).map(|caps| (out, caps)))
    }

    /// First rule whose pattern consumes every token from `from` onward.
    pub fn first_full_match<'s, 't>(
        &'s self,
        tokens: &'t [String],
        from: usize,
    ) -> Option<(&'s O, Captures<'t>)> {
        self.rules
            .iter()
            .find_map(|(p, out)| p.test_full(tokens, from).map(|caps| (out, caps)))
    }
}

// ── CharSyntax ────────────────────────────────────────────────────────────────

/// Judges a growing prefix of a line given the character that would follow it.
pub type CharValidator = fn(&str, Option<char>) -> Verdict;

/// How a character-level rule grows a prefix of the text.
#[derive(Clone, Copy)]
pub enum Scan {
    /// One of these literals; earlier entries win.
    Literal(&'static [&'static str]),
    /// Greedy-with-validation growth, one character at a time.
    Sequence(CharValidator),
    /// The longest prefix `accepts` approves, growing while `grows` allows.
    Longest {
        grows: fn(char) -> bool,
        accepts: fn(&str) -> bool,
    },
}

impl fmt::Debug for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scan::Literal(ls) => write!(f, "Literal({ls:?})"),
            Scan::Sequence(_) => f.write_str("Sequence"),
            Scan::Longest { .. } => f.write_str("Longest"),
        }
    }
}

impl Scan {
    /// Byte length of the non-empty prefix of `text` this scan takes.
    pub fn consume(&self, text: &str) -> Option<usize> {
        match *self {
            Scan::Literal(literals) => literals
                .iter()
                .find(|l| text.starts_with(**l))
                .map(|l| l.len()),
            Scan::Sequence(validator) => {
                let mut chars = text.char_indices().peekable();
                while let Some((i, c)) = chars.next() {
                    let end = i + c.len_utf8();
                    let next = chars.peek().map(|&(_, n)| n);
                    match validator(&text[..end], next) {
                        Verdict::Reject => return None,
                        Verdict::Accept => return Some(end),
                        Verdict::Undecided => {}
                    }
                }
                None
            }
            Scan::Longest { grows, accepts } => {
                let mut best = None;
                for (i, c) in text.char_indices() {
                    if !grows(c) {
                        break;
                    }
                    let end = i + c.len_utf8();
                    if accepts(&text[..end]) {
                        best = Some(end);
                    }
                }
                best
            }
        }
    }
}

/// An ordered rule table over characters.  Each rule pairs a [`Scan`] with
/// an output; the first rule that takes a prefix wins.
pub struct CharSyntax<O> {
    rules: Vec<(Scan, O)>,
}

impl<O> Default for CharSyntax<O> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<O> CharSyntax<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule.  Earlier rules take priority.
    pub fn rule(mut self, scan: Scan, output: O) -> Self {
        self.rules.push((scan, output));
        self
    }

    /// First rule (in registration order) that takes a prefix of `text`,
    /// with the prefix's byte length.
    pub fn first_prefix_match(&self, text: &str) -> Option<(&O, usize)> {
        self.rules
            .iter()
            .find_map(|(scan, out)| scan.consume(text).map(|len| (out, len)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
