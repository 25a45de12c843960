//! Statement AST and script-level parser.
//!
//! A script is a sequence of lines.  Every line, including blank and comment
//! lines, yields exactly one [`Statement`] carrying its 1-based line number, so
//! hosts can step and highlight by absolute line.  A line no rule accepts
//! becomes [`StatementKind::Invalid`]; it is reported when a run reaches it.
//!
//! Indentation is turned into a logical depth by counting the strictly
//! shallower tab depths found walking backward through earlier lines.  Only
//! the relative order of tab depths matters, never their literal values.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{LexError, ParseError};
use crate::pattern::{split_top_level, until, Captures, Pattern, SingleMatch, Syntax, Validator, Verdict};
use super::expr::{is_identifier, ExprParser, Expression};
use super::lexer::{lex_line, LexLine};

// ── AST ───────────────────────────────────────────────────────────────────────

/// The six scope-opening keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Map,
    Filter,
    SortBy,
    SumBy,
    Pivot,
    Do,
}

pub const SCOPE_KEYWORDS: &[&str] = &["map", "filter", "sortBy", "sumBy", "pivot", "do"];

impl ScopeKind {
    pub fn from_keyword(kw: &str) -> Option<Self> {
        Some(match kw {
            "map" => ScopeKind::Map,
            "filter" => ScopeKind::Filter,
            "sortBy" => ScopeKind::SortBy,
            "sumBy" => ScopeKind::SumBy,
            "pivot" => ScopeKind::Pivot,
            "do" => ScopeKind::Do,
            _ => return None,
        })
    }

    pub fn keyword(self) -> &'static str {
        match self {
            ScopeKind::Map => "map",
            ScopeKind::Filter => "filter",
            ScopeKind::SortBy => "sortBy",
            ScopeKind::SumBy => "sumBy",
            ScopeKind::Pivot => "pivot",
            ScopeKind::Do => "do",
        }
    }
}

/// `[pre ::] keyword [:: post]`
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeStatement {
    pub kind: ScopeKind,
    /// Produces the value to fan out over; defaults to the ambient stream.
    pub pre: Option<Expression>,
    /// Applied to the collected result after the scope closes.
    pub post: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Arc<Statement>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// Blank line, comment, or a line swallowed by a function body.
    NoOp,
    /// `part >> part >> ...`; only the last part may be a scope.
    Multi(Vec<StatementKind>),
    Exit,
    Scope(ScopeStatement),
    /// `name << expr`
    StoreLocal { name: String, expr: Expression },
    /// `name << <scope>`: the collected result goes to `name` in the parent
    /// branch instead of the ambient stream.
    StoreLocalScoped { name: String, scope: ScopeStatement },
    FunctionDef(Arc<FunctionDef>),
    Expression(Expression),
    Invalid(ParseError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    /// Leading whitespace length as written.
    pub tab_depth: usize,
    /// Logical nesting depth.
    pub depth: usize,
    /// 1-based source line.
    pub line: usize,
}

impl Statement {
    /// The scope this statement opens and, for store-scoped statements, the
    /// local that receives its result.
    pub fn opened_scope(&self) -> Option<(&ScopeStatement, Option<&str>)> {
        match &self.kind {
            StatementKind::Scope(s) => Some((s, None)),
            StatementKind::StoreLocalScoped { name, scope } => Some((scope, Some(name.as_str()))),
            StatementKind::Multi(parts) => match parts.last() {
                Some(StatementKind::Scope(s)) => Some((s, None)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.kind, StatementKind::NoOp | StatementKind::FunctionDef(_))
    }
}

/// A parsed script.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Arc<Statement>>,
    pub functions: Arc<HashMap<String, Arc<FunctionDef>>>,
    /// First line that failed to parse, if any.
    pub diagnostic: Option<ParseError>,
    /// Names stored with `<<`/`:=` anywhere in the script.
    pub locals: BTreeSet<String>,
}

// ── Grammar ───────────────────────────────────────────────────────────────────

type StatementFn = fn(&Grammar, &Captures<'_>) -> Result<StatementKind, String>;

/// Which of the four scope surface forms matched.
#[derive(Debug, Clone, Copy)]
enum ScopeForm {
    PrePost,
    Pre,
    Post,
    Bare,
}

/// Immutable rule tables shared by the statement and expression parsers.
pub struct Grammar {
    statements: Syntax<StatementFn>,
    scopes: Syntax<ScopeForm>,
    expressions: ExprParser,
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

/// A token slice shaped like one of the scope forms.  A top-level `>>`
/// makes the line a chain instead.
fn is_scope_form(tokens: &[String]) -> bool {
    if split_top_level(tokens, ">>").len() > 1 {
        return false;
    }
    let is_kw = |part: &[String]| part.len() == 1 && SCOPE_KEYWORDS.contains(&part[0].as_str());
    let parts = split_top_level(tokens, "::");
    match parts.len() {
        1 => is_kw(parts[0]),
        2 => is_kw(parts[0]) || is_kw(parts[1]),
        3 => is_kw(parts[1]),
        _ => false,
    }
}

/// Accepts the remainder of a line when it is a scope form.
fn scope_form() -> Validator {
    Arc::new(|candidate, next| match next {
        Some(_) => Verdict::Undecided,
        None if is_scope_form(candidate) => Verdict::Accept,
        None => Verdict::Reject,
    })
}

impl Grammar {
    pub fn new() -> Self {
        use SingleMatch as M;
        let p = Pattern::new;
        const STORE: &[&str] = &["<<", ":="];

        // Registration order is the disambiguation order.
        let statements = Syntax::new()
            .rule(p(vec![M::token("exit")]), build_exit as StatementFn)
            .rule(
                p(vec![
                    M::token("function"),
                    M::test(is_identifier).key("name"),
                    M::token("("),
                    M::sequence(until(")")).key("params").optional(),
                    M::token(")"),
                ]),
                build_function,
            )
            .rule(
                p(vec![
                    M::test(is_identifier).key("name"),
                    M::one_of(STORE),
                    M::sequence(scope_form()).key("scope"),
                ]),
                build_store_scoped,
            )
            .rule(
                p(vec![
                    M::test(is_identifier).key("name"),
                    M::one_of(STORE),
                    M::rest().key("expr"),
                ]),
                build_store_local,
            )
            .rule(p(vec![M::sequence(scope_form()).key("scope")]), build_scope)
            .rule(
                p(vec![
                    M::sequence(until(">>")).key("head"),
                    M::token(">>"),
                    M::rest().key("tail"),
                ]),
                build_chain,
            )
            .rule(p(vec![M::rest().key("expr")]), build_expression);

        let kw = || M::one_of(SCOPE_KEYWORDS).key("kw");
        let scopes = Syntax::new()
            .rule(
                p(vec![
                    M::sequence(until("::")).key("pre"),
                    M::token("::"),
                    kw(),
                    M::token("::"),
                    M::rest().key("post"),
                ]),
                ScopeForm::PrePost,
            )
            .rule(
                p(vec![M::sequence(until("::")).key("pre"), M::token("::"), kw()]),
                ScopeForm::Pre,
            )
            .rule(p(vec![kw(), M::token("::"), M::rest().key("post")]), ScopeForm::Post)
            .rule(p(vec![kw()]), ScopeForm::Bare);

        Self {
            statements,
            scopes,
            expressions: ExprParser::new(),
        }
    }

    /// Resolve one non-blank line.
    pub fn statement(&self, tokens: &[String]) -> Result<StatementKind, String> {
        match self.statements.first_full_match(tokens, 0) {
            Some((build, caps)) => build(self, &caps),
            None => Err("no statement form matches this line".into()),
        }
    }

    pub fn expression(&self, tokens: &[String]) -> Result<Expression, String> {
        self.expressions.parse(tokens)
    }

    /// Parse a scope form; `None` when the tokens are not one.
    pub fn scope(&self, tokens: &[String]) -> Option<Result<ScopeStatement, String>> {
        let (form, caps) = self.scopes.first_full_match(tokens, 0)?;
        let kind = caps.token("kw").and_then(ScopeKind::from_keyword)?;
        Some(
            self.scope_parts(*form, &caps)
                .map(|(pre, post)| ScopeStatement { kind, pre, post }),
        )
    }

    fn scope_parts(
        &self,
        form: ScopeForm,
        caps: &Captures<'_>,
    ) -> Result<(Option<Expression>, Option<Expression>), String> {
        let part = |key: &str| caps.get(key).map(|t| self.expression(t)).transpose();
        Ok(match form {
            ScopeForm::PrePost => (part("pre")?, part("post")?),
            ScopeForm::Pre => (part("pre")?, None),
            ScopeForm::Post => (None, part("post")?),
            ScopeForm::Bare => (None, None),
        })
    }
}

// ── Statement builders ────────────────────────────────────────────────────────

fn build_exit(_: &Grammar, _: &Captures<'_>) -> Result<StatementKind, String> {
    Ok(StatementKind::Exit)
}

/// Header only; the body is attached when the indented block ends.
fn build_function(_: &Grammar, caps: &Captures<'_>) -> Result<StatementKind, String> {
    let name = caps.token("name").unwrap_or_default().to_owned();
    let mut params = Vec::new();
    if let Some(list) = caps.get("params") {
        for param in split_top_level(list, ",") {
            match param {
                [p] if is_identifier(p) => params.push(p.clone()),
                _ => return Err(format!("invalid parameter list for `{name}`")),
            }
        }
    }
    Ok(StatementKind::FunctionDef(Arc::new(FunctionDef {
        name,
        params,
        body: Vec::new(),
    })))
}

fn build_store_scoped(grammar: &Grammar, caps: &Captures<'_>) -> Result<StatementKind, String> {
    let name = caps.token("name").unwrap_or_default().to_owned();
    let scope = grammar
        .scope(caps.get("scope").unwrap_or_default())
        .ok_or("expected a scope form")??;
    Ok(StatementKind::StoreLocalScoped { name, scope })
}

fn build_store_local(grammar: &Grammar, caps: &Captures<'_>) -> Result<StatementKind, String> {
    let name = caps.token("name").unwrap_or_default().to_owned();
    let expr = grammar.expression(caps.get("expr").unwrap_or_default())?;
    Ok(StatementKind::StoreLocal { name, expr })
}

fn build_scope(grammar: &Grammar, caps: &Captures<'_>) -> Result<StatementKind, String> {
    let scope = grammar
        .scope(caps.get("scope").unwrap_or_default())
        .ok_or("expected a scope form")??;
    Ok(StatementKind::Scope(scope))
}

fn build_chain(grammar: &Grammar, caps: &Captures<'_>) -> Result<StatementKind, String> {
    let head = caps.get("head").unwrap_or_default();
    let tail = caps.get("tail").unwrap_or_default();
    let mut parts = vec![StatementKind::Expression(grammar.expression(head)?)];
    let rest = split_top_level(tail, ">>");
    let last = rest.len() - 1;
    for (i, part) in rest.into_iter().enumerate() {
        if part.is_empty() {
            return Err("empty chain segment".into());
        }
        match grammar.scope(part) {
            Some(_) if i != last => return Err("only the last chain segment may open a scope".into()),
            Some(scope) => parts.push(StatementKind::Scope(scope?)),
            None => parts.push(StatementKind::Expression(grammar.expression(part)?)),
        }
    }
    Ok(StatementKind::Multi(parts))
}

fn build_expression(grammar: &Grammar, caps: &Captures<'_>) -> Result<StatementKind, String> {
    let expr = grammar.expression(caps.get("expr").unwrap_or_default())?;
    Ok(StatementKind::Expression(expr))
}

// ── ParseContext ──────────────────────────────────────────────────────────────

/// A function definition whose indented body is still being read.
struct Recording {
    /// Index of the header statement in the enclosing list.
    slot: usize,
    tab_depth: usize,
    lines: Vec<(usize, LexLine)>,
}

/// Mutable parser state threaded through every line.
pub struct ParseContext<'g> {
    grammar: &'g Grammar,
    statements: Vec<Statement>,
    /// Scopes left open by the statements parsed so far.
    open_scopes: usize,
    recording: Option<Recording>,
    in_function: bool,
    functions: HashMap<String, Arc<FunctionDef>>,
    locals: BTreeSet<String>,
    diagnostic: Option<ParseError>,
}

impl<'g> ParseContext<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Self {
            grammar,
            statements: Vec::new(),
            open_scopes: 0,
            recording: None,
            in_function: false,
            functions: HashMap::new(),
            locals: BTreeSet::new(),
            diagnostic: None,
        }
    }

    /// Feed one lexed line.
    pub fn push_line(&mut self, line: usize, lexed: LexLine) {
        if let Some(rec) = self.recording.as_mut() {
            if lexed.is_blank() || lexed.tab_depth > rec.tab_depth {
                let tab_depth = lexed.tab_depth;
                rec.lines.push((line, lexed));
                self.statements.push(Statement {
                    kind: StatementKind::NoOp,
                    tab_depth,
                    depth: 0,
                    line,
                });
                return;
            }
            self.finish_function();
        }

        if lexed.is_blank() {
            self.statements.push(Statement {
                kind: StatementKind::NoOp,
                tab_depth: lexed.tab_depth,
                depth: 0,
                line,
            });
            return;
        }

        let depth = self.depth_of(lexed.tab_depth);
        let parsed = if depth > self.open_scopes {
            Err("unexpected indentation".to_owned())
        } else {
            self.grammar.statement(&lexed.tokens)
        };
        let depth = depth.min(self.open_scopes);

        let kind = match parsed {
            Ok(StatementKind::FunctionDef(_)) if self.in_function => {
                self.invalid(line, "function definitions cannot be nested")
            }
            Ok(kind) => kind,
            Err(message) => self.invalid(line, message),
        };

        match &kind {
            StatementKind::StoreLocal { name, .. } | StatementKind::StoreLocalScoped { name, .. } => {
                self.locals.insert(name.clone());
            }
            StatementKind::FunctionDef(_) => {
                self.recording = Some(Recording {
                    slot: self.statements.len(),
                    tab_depth: lexed.tab_depth,
                    lines: Vec::new(),
                });
            }
            _ => {}
        }

        let statement = Statement {
            kind,
            tab_depth: lexed.tab_depth,
            depth,
            line,
        };
        self.open_scopes = depth + usize::from(statement.opened_scope().is_some());
        self.statements.push(statement);
    }

    /// Close any pending function body and produce the program.
    pub fn finish(mut self) -> Program {
        self.finish_function();
        Program {
            statements: self.statements.into_iter().map(Arc::new).collect(),
            functions: Arc::new(self.functions),
            diagnostic: self.diagnostic,
            locals: self.locals,
        }
    }

    fn invalid(&mut self, line: usize, message: impl Into<String>) -> StatementKind {
        let err = ParseError::new(line, message);
        self.note(err.clone());
        StatementKind::Invalid(err)
    }

    fn note(&mut self, err: ParseError) {
        match &self.diagnostic {
            Some(first) if first.line <= err.line => {}
            _ => self.diagnostic = Some(err),
        }
    }

    /// Count strictly shallower tab depths walking backward.
    fn depth_of(&self, tab_depth: usize) -> usize {
        let mut threshold = tab_depth;
        let mut depth = 0;
        for prev in self.statements.iter().rev() {
            if matches!(prev.kind, StatementKind::NoOp) {
                continue;
            }
            if prev.tab_depth < threshold {
                depth += 1;
                threshold = prev.tab_depth;
            }
        }
        depth
    }

    fn finish_function(&mut self) {
        let Some(rec) = self.recording.take() else { return };
        let mut body = ParseContext::new(self.grammar);
        body.in_function = true;
        for (line, lexed) in rec.lines {
            body.push_line(line, lexed);
        }
        let body = body.finish();
        if let Some(err) = body.diagnostic {
            self.note(err);
        }
        self.locals.extend(body.locals);

        let header = &mut self.statements[rec.slot];
        if let StatementKind::FunctionDef(def) = &header.kind {
            let def = Arc::new(FunctionDef {
                name: def.name.clone(),
                params: def.params.clone(),
                body: body.statements,
            });
            self.functions.insert(def.name.clone(), Arc::clone(&def));
            header.kind = StatementKind::FunctionDef(def);
        }
        // The body never opens scopes in the enclosing list.
        self.open_scopes = header.depth;
    }
}

/// Parse a whole script.  Lexing failures abort; grammar failures become
/// [`StatementKind::Invalid`] lines and are summarized in
/// [`Program::diagnostic`].
pub fn parse_script(src: &str) -> Result<Program, LexError> {
    let grammar = Grammar::new();
    let mut ctx = ParseContext::new(&grammar);
    for (i, text) in src.lines().enumerate() {
        ctx.push_line(i + 1, lex_line(text, i + 1)?);
    }
    Ok(ctx.finish())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
