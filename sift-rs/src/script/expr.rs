//! Expression AST, parser, and evaluator.
//!
//! Parsing is two-phase.  Phase 1 walks the token slice and alternates between
//! operand components (matched through the component [`Syntax`]) and binary
//! operator tokens, collecting each into its own list.  Phase 2 folds the two
//! lists into one tree by repeatedly combining around the operator with the
//! lowest priority number (leftmost on ties):
//!
//! | Priority | Operators |
//! |----------|-----------|
//! | 1 | `:` `.` |
//! | 2 | `*` `/` |
//! | 3 | `+` `-` |
//! | 4 | `=` `!=` `<` `>` `<=` `>=` |
//! | 5 | `&` `\|` |
//!
//! `a:f(x)` evaluates `a`, then evaluates `f(x)` with `a` as the ambient
//! stream, which is what makes method-call chaining work.

use std::future::Future;
use std::pin::Pin;

use crate::error::RuntimeError;
use crate::pattern::{split_top_level, until, Captures, Pattern, SingleMatch, Syntax};
use super::lexer::{is_number_token, is_string_token, is_word_token, unquote};
use super::value::Stream;

/// Words the grammar claims for itself.
pub const RESERVED: &[&str] = &[
    "map", "filter", "sortBy", "sumBy", "pivot", "do", "function", "exit", "stream", "index",
    "true", "false",
];

/// A word that may name a variable or function.
pub fn is_identifier(tok: &str) -> bool {
    is_word_token(tok) && !RESERVED.contains(&tok)
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Method,
    Member,
    Mul,
    Div,
    Add,
    Sub,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn from_token(tok: &str) -> Option<Self> {
        Some(match tok {
            ":" => BinaryOp::Method,
            "." => BinaryOp::Member,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "=" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            ">" => BinaryOp::Gt,
            "<=" => BinaryOp::Le,
            ">=" => BinaryOp::Ge,
            "&" => BinaryOp::And,
            "|" => BinaryOp::Or,
            _ => return None,
        })
    }

    /// Lower binds tighter.
    pub fn priority(self) -> u8 {
        match self {
            BinaryOp::Method | BinaryOp::Member => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
            BinaryOp::Add | BinaryOp::Sub => 3,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Gt
            | BinaryOp::Le
            | BinaryOp::Ge => 4,
            BinaryOp::And | BinaryOp::Or => 5,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Method => ":",
            BinaryOp::Member => ".",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Identifier(String),
    Num(f64),
    Text(String),
    Bool(bool),
    /// The ambient stream.
    StreamRef,
    /// The current branch's fan-out index.
    IndexRef,
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Operator {
        left: Box<Expression>,
        op: BinaryOp,
        right: Box<Expression>,
    },
    Call {
        name: String,
        args: Vec<Expression>,
    },
    Array(Vec<Expression>),
    Grouped(Box<Expression>),
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Builds an operand from a matched component.  Receives the full token
/// slice and the index just past the match; returns the operand and the index
/// just past everything it consumed.
type ComponentFn =
    fn(&ExprParser, &[String], &Captures<'_>, usize) -> Result<(Expression, usize), String>;

/// The expression grammar: an ordered component table.
pub struct ExprParser {
    components: Syntax<ComponentFn>,
}

impl Default for ExprParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprParser {
    pub fn new() -> Self {
        use SingleMatch as M;
        let p = Pattern::new;
        // Order matters: calls before bare identifiers, empty forms first.
        let components = Syntax::new()
            .rule(
                p(vec![
                    M::test(is_identifier).key("name"),
                    M::token("("),
                    M::token(")"),
                ]),
                build_call as ComponentFn,
            )
            .rule(
                p(vec![
                    M::test(is_identifier).key("name"),
                    M::token("("),
                    M::sequence(until(")")).key("args"),
                    M::token(")"),
                ]),
                build_call,
            )
            .rule(
                p(vec![
                    M::token("("),
                    M::sequence(until(")")).key("inner"),
                    M::token(")"),
                ]),
                build_grouped,
            )
            .rule(
                p(vec![
                    M::token("["),
                    M::sequence(until("]")).key("items").optional(),
                    M::token("]"),
                ]),
                build_array,
            )
            .rule(p(vec![M::one_of(&["-", "!"]).key("op")]), build_unary)
            .rule(p(vec![M::test(is_number_token).key("lit")]), build_number)
            .rule(p(vec![M::test(is_string_token).key("lit")]), build_text)
            .rule(p(vec![M::one_of(&["true", "false"]).key("lit")]), build_bool)
            .rule(p(vec![M::token("stream")]), build_stream_ref)
            .rule(p(vec![M::token("index")]), build_index_ref)
            .rule(p(vec![M::test(is_identifier).key("name")]), build_identifier);
        Self { components }
    }

    /// Parse a complete expression; every token must be consumed.
    pub fn parse(&self, tokens: &[String]) -> Result<Expression, String> {
        if tokens.is_empty() {
            return Err("expected an expression".into());
        }
        let mut operands = Vec::new();
        let mut operators = Vec::new();
        let mut pos = 0;
        loop {
            let (operand, next) = self.component(tokens, pos)?;
            operands.push(operand);
            pos = next;
            let Some(tok) = tokens.get(pos) else { break };
            let op = BinaryOp::from_token(tok)
                .ok_or_else(|| format!("unexpected token `{tok}`"))?;
            pos += 1;
            if pos == tokens.len() {
                return Err(format!("expected an operand after `{tok}`"));
            }
            operators.push(op);
        }
        reduce(operands, operators)
    }

    /// Parse a comma-separated list (call arguments, array elements).
    pub fn parse_list(&self, tokens: &[String]) -> Result<Vec<Expression>, String> {
        split_top_level(tokens, ",")
            .into_iter()
            .map(|part| self.parse(part))
            .collect()
    }

    /// Match one operand component at `pos`.
    fn component(&self, tokens: &[String], pos: usize) -> Result<(Expression, usize), String> {
        match self.components.first_partial_match(tokens, pos) {
            Some((build, caps)) => build(self, tokens, &caps, pos + caps.consumed()),
            None => Err(match tokens.get(pos) {
                Some(tok) => format!("unexpected token `{tok}`"),
                None => "expected an operand".into(),
            }),
        }
    }
}

/// Phase 2: fold operands and operators into a single tree.
fn reduce(mut operands: Vec<Expression>, mut operators: Vec<BinaryOp>) -> Result<Expression, String> {
    while let Some(lowest) = operators.iter().map(|op| op.priority()).min() {
        let i = operators
            .iter()
            .position(|op| op.priority() == lowest)
            .unwrap_or(0);
        let op = operators.remove(i);
        let right = operands.remove(i + 1);
        let left = std::mem::replace(&mut operands[i], Expression::StreamRef);
        operands[i] = Expression::Operator {
            left: Box::new(left),
            op,
            right: Box::new(right),
        };
    }
    match operands.len() {
        1 => Ok(operands.remove(0)),
        _ => Err("malformed expression".into()),
    }
}

// ── Component builders ────────────────────────────────────────────────────────

fn build_call(
    parser: &ExprParser,
    _: &[String],
    caps: &Captures<'_>,
    end: usize,
) -> Result<(Expression, usize), String> {
    let name = caps.token("name").unwrap_or_default().to_owned();
    let args = match caps.get("args") {
        Some(slice) => parser.parse_list(slice)?,
        None => Vec::new(),
    };
    Ok((Expression::Call { name, args }, end))
}

fn build_grouped(
    parser: &ExprParser,
    _: &[String],
    caps: &Captures<'_>,
    end: usize,
) -> Result<(Expression, usize), String> {
    let inner = parser.parse(caps.get("inner").unwrap_or_default())?;
    Ok((Expression::Grouped(Box::new(inner)), end))
}

fn build_array(
    parser: &ExprParser,
    _: &[String],
    caps: &Captures<'_>,
    end: usize,
) -> Result<(Expression, usize), String> {
    let items = match caps.get("items") {
        Some(slice) => parser.parse_list(slice)?,
        None => Vec::new(),
    };
    Ok((Expression::Array(items), end))
}

fn build_unary(
    parser: &ExprParser,
    tokens: &[String],
    caps: &Captures<'_>,
    end: usize,
) -> Result<(Expression, usize), String> {
    let op = match caps.token("op") {
        Some("-") => UnaryOp::Neg,
        _ => UnaryOp::Not,
    };
    let (operand, next) = parser.component(tokens, end)?;
    Ok((
        Expression::Unary {
            op,
            operand: Box::new(operand),
        },
        next,
    ))
}

fn build_number(
    _: &ExprParser,
    _: &[String],
    caps: &Captures<'_>,
    end: usize,
) -> Result<(Expression, usize), String> {
    let lit = caps.token("lit").unwrap_or_default();
    let n = lit
        .parse::<f64>()
        .map_err(|_| format!("invalid number `{lit}`"))?;
    Ok((Expression::Num(n), end))
}

fn build_text(
    _: &ExprParser,
    _: &[String],
    caps: &Captures<'_>,
    end: usize,
) -> Result<(Expression, usize), String> {
    let lit = caps.token("lit").unwrap_or_default();
    let text = unquote(lit).ok_or_else(|| format!("invalid string `{lit}`"))?;
    Ok((Expression::Text(text), end))
}

fn build_bool(
    _: &ExprParser,
    _: &[String],
    caps: &Captures<'_>,
    end: usize,
) -> Result<(Expression, usize), String> {
    Ok((Expression::Bool(caps.token("lit") == Some("true")), end))
}

fn build_stream_ref(
    _: &ExprParser,
    _: &[String],
    _: &Captures<'_>,
    end: usize,
) -> Result<(Expression, usize), String> {
    Ok((Expression::StreamRef, end))
}

fn build_index_ref(
    _: &ExprParser,
    _: &[String],
    _: &Captures<'_>,
    end: usize,
) -> Result<(Expression, usize), String> {
    Ok((Expression::IndexRef, end))
}

fn build_identifier(
    _: &ExprParser,
    _: &[String],
    caps: &Captures<'_>,
    end: usize,
) -> Result<(Expression, usize), String> {
    let name = caps.token("name").unwrap_or_default().to_owned();
    Ok((Expression::Identifier(name), end))
}

// ── EvalContext ───────────────────────────────────────────────────────────────

/// Boxed evaluation future; boxing breaks the recursion between nested
/// expressions and user-defined function bodies.
pub type EvalFuture<'a> = Pin<Box<dyn Future<Output = Result<Stream, RuntimeError>> + Send + 'a>>;

/// What the evaluator needs from its surroundings.
///
/// The execution engine implements this once per branch; tests use a small
/// in-memory stand-in.
pub trait EvalContext: Send + Sync {
    /// The ambient stream expressions operate on.
    fn stream(&self) -> &Stream;

    /// Position of this branch within its fan-out.
    fn index(&self) -> usize;

    /// Variable lookup, nearest scope first.
    fn lookup(&self, name: &str) -> Option<Stream>;

    /// The same context with a different ambient stream (for `a:f(x)`).
    fn retarget(&self, stream: Stream) -> Box<dyn EvalContext + '_>;

    /// Whether `name` is a function that may be called with no arguments.
    fn callable_without_args(&self, name: &str) -> bool;

    /// Call a user-defined or built-in function against `target`.
    fn call<'a>(&'a self, name: &'a str, target: Stream, args: Vec<Stream>) -> EvalFuture<'a>;
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Evaluate `expr` against `ctx`.
pub fn eval_expr<'a>(expr: &'a Expression, ctx: &'a dyn EvalContext) -> EvalFuture<'a> {
    Box::pin(async move {
        match expr {
            Expression::Num(n) => Ok(Stream::Num(*n)),
            Expression::Text(s) => Ok(Stream::Text(s.clone())),
            Expression::Bool(b) => Ok(Stream::Bool(*b)),
            Expression::StreamRef => Ok(ctx.stream().clone()),
            Expression::IndexRef => Ok(Stream::Num(ctx.index() as f64)),
            Expression::Grouped(inner) => eval_expr(inner, ctx).await,

            Expression::Identifier(name) => match ctx.lookup(name) {
                Some(v) => Ok(v),
                None if ctx.callable_without_args(name) => {
                    ctx.call(name, ctx.stream().clone(), Vec::new()).await
                }
                None => Err(RuntimeError::UnknownIdentifier(name.clone())),
            },

            Expression::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(eval_expr(item, ctx).await?);
                }
                Ok(Stream::Array(out))
            }

            Expression::Unary { op, operand } => {
                let v = eval_expr(operand, ctx).await?;
                match op {
                    UnaryOp::Neg => v.negate(),
                    UnaryOp::Not => v.not(),
                }
            }

            Expression::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval_expr(arg, ctx).await?);
                }
                ctx.call(name, ctx.stream().clone(), values).await
            }

            Expression::Operator { left, op, right } => eval_operator(left, *op, right, ctx).await,
        }
    })
}

async fn eval_operator(
    left: &Expression,
    op: BinaryOp,
    right: &Expression,
    ctx: &dyn EvalContext,
) -> Result<Stream, RuntimeError> {
    match op {
        BinaryOp::Method => {
            let target = eval_expr(left, ctx).await?;
            let inner = ctx.retarget(target);
            eval_expr(right, &*inner).await
        }
        BinaryOp::Member => {
            let container = eval_expr(left, ctx).await?;
            let key = match right {
                Expression::Identifier(name) => Stream::Text(name.clone()),
                other => eval_expr(other, ctx).await?,
            };
            member(&container, &key)
        }
        BinaryOp::And | BinaryOp::Or => {
            let l = eval_expr(left, ctx).await?.cast_bool()?;
            if (op == BinaryOp::And) != l {
                return Ok(Stream::Bool(l));
            }
            Ok(Stream::Bool(eval_expr(right, ctx).await?.cast_bool()?))
        }
        _ => {
            let l = eval_expr(left, ctx).await?;
            let r = eval_expr(right, ctx).await?;
            match op {
                BinaryOp::Add => l.add(&r),
                BinaryOp::Eq => l.equals(&r).map(Stream::Bool),
                BinaryOp::Ne => l.equals(&r).map(|eq| Stream::Bool(!eq)),
                BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                    l.relate(op.symbol(), &r).map(Stream::Bool)
                }
                _ => l.arith(op.symbol(), &r),
            }
        }
    }
}

/// `container.key`: map lookup, or array element for a numeric key.
fn member(container: &Stream, key: &Stream) -> Result<Stream, RuntimeError> {
    match (container, key) {
        (Stream::Map(map), _) => map
            .get(key)
            .cloned()
            .ok_or_else(|| RuntimeError::MissingKey(key.to_string())),
        (Stream::Array(items), Stream::Num(n)) => {
            let i = *n as i64;
            let idx = if i < 0 { items.len() as i64 + i } else { i };
            usize::try_from(idx)
                .ok()
                .and_then(|idx| items.get(idx))
                .cloned()
                .ok_or(RuntimeError::Index {
                    index: i,
                    len: items.len(),
                })
        }
        _ => Err(RuntimeError::Operator {
            op: ".",
            left: container.type_name(),
            right: key.type_name(),
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::lexer::lex_line;
    use crate::script::value::StreamMap;
    use std::collections::HashMap;

    // ── Minimal EvalContext for tests ─────────────────────────────────────────

    struct TestCtx {
        stream: Stream,
        vars: HashMap<String, Stream>,
    }

    impl TestCtx {
        fn new() -> Self {
            TestCtx {
                stream: Stream::default(),
                vars: HashMap::new(),
            }
        }
        fn with(mut self, k: &str, v: Stream) -> Self {
            self.vars.insert(k.into(), v);
            self
        }
        fn on(mut self, stream: Stream) -> Self {
            self.stream = stream;
            self
        }
    }

    impl EvalContext for TestCtx {
        fn stream(&self) -> &Stream {
            &self.stream
        }
        fn index(&self) -> usize {
            0
        }
        fn lookup(&self, name: &str) -> Option<Stream> {
            self.vars.get(name).cloned()
        }
        fn retarget(&self, stream: Stream) -> Box<dyn EvalContext + '_> {
            Box::new(TestCtx {
                stream,
                vars: self.vars.clone(),
            })
        }
        fn callable_without_args(&self, name: &str) -> bool {
            name == "len"
        }
        fn call<'a>(&'a self, name: &'a str, target: Stream, args: Vec<Stream>) -> EvalFuture<'a> {
            Box::pin(async move {
                match (name, &target) {
                    ("len", Stream::Text(s)) => Ok(Stream::Num(s.len() as f64)),
                    ("twice", _) => target.add(&target),
                    ("echo", _) => Ok(args.into_iter().next().unwrap_or_default()),
                    _ => Err(RuntimeError::MissingFunction(name.to_owned())),
                }
            })
        }
    }

    fn parse(src: &str) -> Expression {
        let line = lex_line(src, 1).expect("lex failed");
        ExprParser::new().parse(&line.tokens).expect("parse failed")
    }

    fn parse_err(src: &str) -> String {
        let line = lex_line(src, 1).expect("lex failed");
        ExprParser::new().parse(&line.tokens).unwrap_err()
    }

    async fn eval_ctx(src: &str, ctx: &TestCtx) -> Stream {
        eval_expr(&parse(src), ctx).await.expect("eval failed")
    }

    async fn eval(src: &str) -> Stream {
        eval_ctx(src, &TestCtx::new()).await
    }

    #[tokio::test]
    async fn precedence() {
        assert_eq!(eval("2 + 3 * 4").await, Stream::Num(14.0));
        assert_eq!(eval("(2 + 3) * 4").await, Stream::Num(20.0));
        assert_eq!(eval("1 = 1 & 2 = 3").await, Stream::Bool(false));
        assert_eq!(eval("10 - 4 - 3").await, Stream::Num(3.0));
    }

    #[test]
    fn lowest_priority_folds_first_leftmost() {
        match parse("1 - 2 - 3") {
            Expression::Operator { left, op, .. } => {
                assert_eq!(op, BinaryOp::Sub);
                assert!(matches!(*left, Expression::Operator { op: BinaryOp::Sub, .. }));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[tokio::test]
    async fn unary_minus_by_position() {
        assert_eq!(eval("-5 + 2").await, Stream::Num(-3.0));
        assert_eq!(eval("2 - -3").await, Stream::Num(5.0));
        assert_eq!(eval("!(1 = 2)").await, Stream::Bool(true));
    }

    #[tokio::test]
    async fn literals() {
        assert_eq!(eval("\"a,b\"").await, Stream::from("a,b"));
        assert_eq!(eval("true").await, Stream::Bool(true));
        assert_eq!(eval("[1, \"x\", [ ]]").await, Stream::Array(vec![
            Stream::Num(1.0),
            Stream::from("x"),
            Stream::Array(vec![]),
        ]));
    }

    #[tokio::test]
    async fn stream_and_variables() {
        let ctx = TestCtx::new().on(Stream::Num(4.0)).with("x", Stream::Num(3.0));
        assert_eq!(eval_ctx("stream * x", &ctx).await, Stream::Num(12.0));
        assert_eq!(eval_ctx("index", &ctx).await, Stream::Num(0.0));
    }

    #[tokio::test]
    async fn unknown_identifier_is_an_error() {
        let err = eval_expr(&parse("nope"), &TestCtx::new()).await.unwrap_err();
        assert_eq!(err, RuntimeError::UnknownIdentifier("nope".into()));
    }

    #[tokio::test]
    async fn bare_zero_arg_function() {
        let ctx = TestCtx::new().on(Stream::from("abc"));
        assert_eq!(eval_ctx("len + 1", &ctx).await, Stream::Num(4.0));
    }

    #[tokio::test]
    async fn method_call_retargets() {
        let ctx = TestCtx::new().on(Stream::Num(1.0)).with("s", Stream::from("xy"));
        assert_eq!(eval_ctx("s:twice()", &ctx).await, Stream::from("xyxy"));
        assert_eq!(eval_ctx("s:twice():len", &ctx).await, Stream::Num(4.0));
        assert_eq!(eval_ctx("s:stream", &ctx).await, Stream::from("xy"));
    }

    #[tokio::test]
    async fn call_arguments_split_on_top_level_commas() {
        assert_eq!(eval("echo([1, 2], 3)").await, Stream::from(vec![1i64, 2]));
    }

    #[tokio::test]
    async fn member_access() {
        let mut m = StreamMap::new();
        m.insert(Stream::from("name"), Stream::from("ada")).unwrap();
        let ctx = TestCtx::new()
            .with("row", Stream::Map(m))
            .with("xs", Stream::from(vec![10i64, 20, 30]));
        assert_eq!(eval_ctx("row.name", &ctx).await, Stream::from("ada"));
        assert_eq!(eval_ctx("xs.1 + 1", &ctx).await, Stream::Num(21.0));
        assert_eq!(eval_ctx("xs.(0 - 1)", &ctx).await, Stream::Num(30.0));
    }

    #[tokio::test]
    async fn logical_short_circuit() {
        assert_eq!(eval("1 = 2 & nope").await, Stream::Bool(false));
        assert_eq!(eval("1 = 1 | nope").await, Stream::Bool(true));
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(parse_err("1 2").contains("unexpected token `2`"));
        assert!(parse_err("1 +").contains("expected an operand"));
        assert!(parse_err("f(1").contains("unexpected token `(`"));
        assert!(parse_err("map").contains("unexpected token `map`"));
    }
}
