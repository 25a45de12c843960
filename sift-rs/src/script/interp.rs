//! Execution engine.
//!
//! The engine keeps a tree of [`Branch`]es in an arena.  It starts as a single
//! root holding the input; every scope statement fans each active leaf out
//! into one child per element, and closing the scope folds the children back
//! into their parent and truncates the arena.
//!
//! Each statement line runs as one tokio task per active leaf, joined before
//! the next line starts.  Any failing task aborts its siblings and the run.
//! After every line the engine yields and then checks its [`RunToken`]; a
//! newer run makes the older one return `None`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::RuntimeError;
use super::builtins::{self, call_builtin, check_arity, Host, NoHost};
use super::expr::{eval_expr, EvalContext, EvalFuture};
use super::stmt::{FunctionDef, Program, ScopeKind, ScopeStatement, Statement, StatementKind};
use super::value::{Stream, StreamMap};

/// A variable table.  Shared between tasks, copied on write.
pub type Vars = HashMap<String, Stream>;

/// Nested user-function calls allowed before the run fails.
pub const MAX_CALL_DEPTH: usize = 256;

// ── Run generation ────────────────────────────────────────────────────────────

/// Monotonic run counter shared by every run of one [`Interpreter`].
#[derive(Debug, Clone, Default)]
pub struct RunGeneration(Arc<AtomicU64>);

impl RunGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new run; every earlier token stops being current.
    pub fn begin(&self) -> RunToken {
        let id = self.0.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        RunToken {
            counter: Arc::clone(&self.0),
            id,
        }
    }

    pub fn current(&self) -> u64 {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Identity of one run.
#[derive(Debug, Clone)]
pub struct RunToken {
    counter: Arc<AtomicU64>,
    id: u64,
}

impl RunToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.counter.load(AtomicOrdering::SeqCst) == self.id
    }
}

// ── ProcessResult ─────────────────────────────────────────────────────────────

/// Outcome of a run that was not superseded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub output: Stream,
    /// 1-based line of the last statement executed (0 if none ran).
    pub last_line: usize,
    pub is_complete: bool,
    pub error: Option<String>,
}

// ── Interpreter ───────────────────────────────────────────────────────────────

/// Runs parsed programs against input streams.
pub struct Interpreter {
    host: Arc<dyn Host>,
    generation: RunGeneration,
    globals: Vars,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// An interpreter without host capabilities.
    pub fn new() -> Self {
        Self::with_host(Arc::new(NoHost))
    }

    pub fn with_host(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            generation: RunGeneration::new(),
            globals: Vars::new(),
        }
    }

    /// Bind a global visible to every branch of every run.
    pub fn set_global(&mut self, name: impl Into<String>, value: impl Into<Stream>) {
        self.globals.insert(name.into(), value.into());
    }

    pub fn global(&self, name: &str) -> Option<&Stream> {
        self.globals.get(name)
    }

    pub fn generation(&self) -> &RunGeneration {
        &self.generation
    }

    /// Run `program` against `input`.
    ///
    /// Returns `None` when a newer run started before this one finished.
    /// Errors do not fail the call: the result carries the output of the
    /// lines that completed, the failing line and the message.
    pub async fn process(&self, input: Stream, program: &Program) -> Option<ProcessResult> {
        let token = self.generation.begin();
        info!(run = token.id(), lines = program.statements.len(), "run started");

        let globals = Arc::new(self.globals.clone());
        let env = Arc::new(Env {
            host: Arc::clone(&self.host),
            functions: Arc::clone(&program.functions),
            globals: Arc::clone(&globals),
        });
        let mut machine = Machine::new(env, input, globals, 0);
        let mut last_line = 0;
        let flow = machine
            .run(&program.statements, Some(&token), &mut last_line)
            .await;

        let output = machine.root_stream();
        let result = match flow {
            Ok(Flow::Cancelled) => {
                warn!(run = token.id(), line = last_line, "run superseded");
                return None;
            }
            Ok(Flow::Done) => ProcessResult {
                output,
                last_line,
                is_complete: true,
                error: None,
            },
            Err(e) => ProcessResult {
                output,
                last_line,
                is_complete: false,
                error: Some(match e {
                    RuntimeError::Invalid(parse) => parse.to_string(),
                    other => format!("line {last_line}: {other}"),
                }),
            },
        };
        info!(
            run = token.id(),
            complete = result.is_complete,
            line = result.last_line,
            "run finished"
        );
        Some(result)
    }
}

// ── Branch arena ──────────────────────────────────────────────────────────────

/// Shared by every task of a run.
struct Env {
    host: Arc<dyn Host>,
    functions: Arc<HashMap<String, Arc<FunctionDef>>>,
    globals: Arc<Vars>,
}

/// One execution context.
#[derive(Debug)]
struct Branch {
    stream: Stream,
    locals: Arc<Vars>,
    /// Position within the parent's fan-out.
    index: usize,
    parent: Option<usize>,
    /// The element this branch was fanned out from.
    origin: Stream,
    children: Vec<usize>,
}

/// A scope statement whose block is still executing.
struct OpenScope {
    statement: Arc<Statement>,
    /// Leaves that fanned out when the scope opened.
    parents: Vec<usize>,
    /// Arena length before the children were pushed.
    mark: usize,
}

enum Flow {
    Done,
    Cancelled,
}

/// What one leaf task produced for one statement.
struct LeafOutcome {
    stream: Stream,
    binds: Vec<(String, Stream)>,
    fan_out: Option<Vec<Stream>>,
    exit: bool,
}

struct Machine {
    env: Arc<Env>,
    branches: Vec<Branch>,
    scopes: Vec<OpenScope>,
    leaves: Vec<usize>,
    call_depth: usize,
}

impl Machine {
    fn new(env: Arc<Env>, input: Stream, locals: Arc<Vars>, call_depth: usize) -> Self {
        let root = Branch {
            stream: input.clone(),
            locals,
            index: 0,
            parent: None,
            origin: input,
            children: Vec::new(),
        };
        Self {
            env,
            branches: vec![root],
            scopes: Vec::new(),
            leaves: vec![0],
            call_depth,
        }
    }

    fn root_stream(&self) -> Stream {
        self.branches
            .first()
            .map(|b| b.stream.clone())
            .unwrap_or_default()
    }

    async fn run(
        &mut self,
        statements: &[Arc<Statement>],
        token: Option<&RunToken>,
        last_line: &mut usize,
    ) -> Result<Flow, RuntimeError> {
        for stmt in statements {
            if stmt.is_noop() {
                continue;
            }
            self.close_to(stmt.depth, last_line).await?;
            *last_line = stmt.line;
            if self.step(stmt).await? {
                debug!(line = stmt.line, "exit");
                break;
            }
            tokio::task::yield_now().await;
            if token.is_some_and(|t| !t.is_current()) {
                return Ok(Flow::Cancelled);
            }
        }
        self.close_to(0, last_line).await?;
        Ok(Flow::Done)
    }

    /// Run one statement on every leaf.  Returns `true` on `exit`.
    async fn step(&mut self, stmt: &Arc<Statement>) -> Result<bool, RuntimeError> {
        if let StatementKind::Invalid(e) = &stmt.kind {
            return Err(RuntimeError::Invalid(e.clone()));
        }
        debug!(
            line = stmt.line,
            depth = stmt.depth,
            leaves = self.leaves.len(),
            "statement"
        );

        let mut set = JoinSet::new();
        for (slot, &leaf) in self.leaves.iter().enumerate() {
            let scope = self.leaf_scope(leaf);
            let stmt = Arc::clone(stmt);
            set.spawn(async move {
                let outcome = execute(&stmt.kind, scope).await;
                (slot, outcome)
            });
        }

        let mut outcomes: Vec<Option<LeafOutcome>> = self.leaves.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            let (slot, outcome) = joined.map_err(|e| RuntimeError::Task(e.to_string()))?;
            match outcome {
                Ok(o) => outcomes[slot] = Some(o),
                Err(e) => {
                    set.abort_all();
                    return Err(e);
                }
            }
        }

        let parents = self.leaves.clone();
        let mark = self.branches.len();
        let mut children = Vec::new();
        let mut exit = false;
        for (&leaf, outcome) in parents.iter().zip(outcomes) {
            let Some(outcome) = outcome else { continue };
            exit |= outcome.exit;
            let branch = &mut self.branches[leaf];
            branch.stream = outcome.stream;
            if !outcome.binds.is_empty() {
                let locals = Arc::make_mut(&mut branch.locals);
                locals.extend(outcome.binds);
            }
            for (index, value) in outcome.fan_out.into_iter().flatten().enumerate() {
                let id = self.branches.len();
                self.branches.push(Branch {
                    stream: value.clone(),
                    locals: Arc::default(),
                    index,
                    parent: Some(leaf),
                    origin: value,
                    children: Vec::new(),
                });
                self.branches[leaf].children.push(id);
                children.push(id);
            }
        }

        if let Some((scope, _)) = stmt.opened_scope() {
            debug!(
                line = stmt.line,
                kind = scope.kind.keyword(),
                branches = children.len(),
                "scope opened"
            );
            self.scopes.push(OpenScope {
                statement: Arc::clone(stmt),
                parents,
                mark,
            });
            self.leaves = children;
        }
        Ok(exit)
    }

    /// Close scopes deeper than `depth`.  A failing fold or post expression
    /// is reported against the line that opened the scope.
    async fn close_to(&mut self, depth: usize, last_line: &mut usize) -> Result<(), RuntimeError> {
        while self.scopes.len() > depth {
            let Some(open) = self.scopes.pop() else { break };
            let line = open.statement.line;
            if let Err(e) = self.collect(open).await {
                *last_line = line;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Fold each parent's children back into it.
    async fn collect(&mut self, open: OpenScope) -> Result<(), RuntimeError> {
        let Some((scope, target)) = open.statement.opened_scope() else {
            return Ok(());
        };
        for &parent in &open.parents {
            let children = std::mem::take(&mut self.branches[parent].children);
            let results: Vec<(Stream, Stream)> = children
                .iter()
                .map(|&c| {
                    let child = &mut self.branches[c];
                    (
                        std::mem::take(&mut child.stream),
                        std::mem::take(&mut child.origin),
                    )
                })
                .collect();
            let mut value = fold(scope.kind, results)?;
            if let Some(post) = &scope.post {
                let mut ctx = self.leaf_scope(parent);
                ctx.stream = value;
                value = eval_expr(post, &ctx).await?;
            }
            let branch = &mut self.branches[parent];
            match target {
                None => branch.stream = value,
                Some(name) => {
                    Arc::make_mut(&mut branch.locals).insert(name.to_owned(), value);
                }
            }
        }
        debug!(
            line = open.statement.line,
            kind = scope.kind.keyword(),
            "scope closed"
        );
        self.branches.truncate(open.mark);
        self.leaves = open.parents;
        Ok(())
    }

    /// Evaluation context for `leaf`, with its variable chain nearest first.
    fn leaf_scope(&self, leaf: usize) -> LeafScope {
        let mut vars = Vec::new();
        let mut at = Some(leaf);
        while let Some(id) = at {
            vars.push(Arc::clone(&self.branches[id].locals));
            at = self.branches[id].parent;
        }
        let branch = &self.branches[leaf];
        LeafScope {
            env: Arc::clone(&self.env),
            stream: branch.stream.clone(),
            index: branch.index,
            vars,
            call_depth: self.call_depth,
        }
    }
}

/// Reduce per-child `(result, origin)` pairs for a closing scope.
fn fold(kind: ScopeKind, results: Vec<(Stream, Stream)>) -> Result<Stream, RuntimeError> {
    Ok(match kind {
        ScopeKind::Map => Stream::Array(results.into_iter().map(|(r, _)| r).collect()),
        ScopeKind::Filter => {
            let mut kept = Vec::new();
            for (result, origin) in results {
                if result.cast_bool()? {
                    kept.push(origin);
                }
            }
            Stream::Array(kept)
        }
        ScopeKind::SortBy => {
            let mut pairs = results;
            let mut failure = None;
            pairs.sort_by(|a, b| {
                a.0.compare(&b.0).unwrap_or_else(|e| {
                    failure.get_or_insert(e);
                    Ordering::Equal
                })
            });
            if let Some(e) = failure {
                return Err(e);
            }
            Stream::Array(pairs.into_iter().map(|(_, o)| o).collect())
        }
        ScopeKind::SumBy => results
            .iter()
            .try_fold(Stream::Num(0.0), |acc, (r, _)| acc.add(r))?,
        ScopeKind::Pivot => {
            let mut groups = StreamMap::new();
            for (key, origin) in results {
                groups.push_grouped(key, origin)?;
            }
            Stream::Map(groups)
        }
        ScopeKind::Do => results.into_iter().next().map(|(r, _)| r).unwrap_or_default(),
    })
}

// ── Leaf tasks ────────────────────────────────────────────────────────────────

/// Everything a leaf task needs, owned so the task can be `'static`.
#[derive(Clone)]
struct LeafScope {
    env: Arc<Env>,
    stream: Stream,
    index: usize,
    vars: Vec<Arc<Vars>>,
    call_depth: usize,
}

impl EvalContext for LeafScope {
    fn stream(&self) -> &Stream {
        &self.stream
    }

    fn index(&self) -> usize {
        self.index
    }

    fn lookup(&self, name: &str) -> Option<Stream> {
        self.vars.iter().find_map(|v| v.get(name)).cloned()
    }

    fn retarget(&self, stream: Stream) -> Box<dyn EvalContext + '_> {
        Box::new(LeafScope {
            stream,
            ..self.clone()
        })
    }

    fn callable_without_args(&self, name: &str) -> bool {
        self.env.functions.contains_key(name) || builtins::lookup(name).is_some_and(|b| b.min == 0)
    }

    fn call<'a>(&'a self, name: &'a str, target: Stream, args: Vec<Stream>) -> EvalFuture<'a> {
        Box::pin(async move {
            if let Some(def) = self.env.functions.get(name) {
                check_arity(name, 0, def.params.len(), args.len())?;
                return call_function(
                    Arc::clone(&self.env),
                    Arc::clone(def),
                    target,
                    args,
                    self.call_depth + 1,
                )
                .await;
            }
            let spec = builtins::lookup(name)
                .ok_or_else(|| RuntimeError::MissingFunction(name.to_owned()))?;
            call_builtin(spec, target, args, self.env.host.as_ref()).await
        })
    }
}

/// Execute one statement for one leaf.
async fn execute(kind: &StatementKind, mut scope: LeafScope) -> Result<LeafOutcome, RuntimeError> {
    let mut binds = Vec::new();
    let mut fan_out = None;
    let mut exit = false;
    match kind {
        StatementKind::Expression(expr) => {
            let value = eval_expr(expr, &scope).await?;
            scope.stream = value;
        }
        StatementKind::StoreLocal { name, expr } => {
            let value = eval_expr(expr, &scope).await?;
            binds.push((name.clone(), value));
        }
        StatementKind::Scope(s) | StatementKind::StoreLocalScoped { scope: s, .. } => {
            fan_out = Some(open_scope(s, &scope).await?);
        }
        StatementKind::Multi(parts) => {
            for part in parts {
                match part {
                    StatementKind::Expression(expr) => {
                        let value = eval_expr(expr, &scope).await?;
                        scope.stream = value;
                    }
                    StatementKind::Scope(s) => fan_out = Some(open_scope(s, &scope).await?),
                    _ => {}
                }
            }
        }
        StatementKind::Exit => exit = true,
        StatementKind::Invalid(e) => return Err(RuntimeError::Invalid(e.clone())),
        StatementKind::NoOp | StatementKind::FunctionDef(_) => {}
    }
    Ok(LeafOutcome {
        stream: scope.stream,
        binds,
        fan_out,
        exit,
    })
}

/// Child values for a scope opening on one leaf.
async fn open_scope(scope: &ScopeStatement, ctx: &LeafScope) -> Result<Vec<Stream>, RuntimeError> {
    let value = match &scope.pre {
        Some(pre) => eval_expr(pre, ctx).await?,
        None => ctx.stream.clone(),
    };
    match (scope.kind, value) {
        (ScopeKind::Do, v) => Ok(vec![v]),
        (_, Stream::Array(items)) => Ok(items),
        (ScopeKind::Map, Stream::Map(map)) => Ok(map
            .into_iter()
            .map(|(k, v)| Stream::Array(vec![k, v]))
            .collect()),
        (kind, other) => Err(RuntimeError::NotIterable {
            scope: kind.keyword(),
            expected: if kind == ScopeKind::Map {
                "an array or map"
            } else {
                "an array"
            },
            got: other.type_name(),
        }),
    }
}

/// Run a user function body in a fresh branch tree whose root sees the
/// globals and the parameters, never the caller's locals.
fn call_function(
    env: Arc<Env>,
    def: Arc<FunctionDef>,
    target: Stream,
    args: Vec<Stream>,
    depth: usize,
) -> EvalFuture<'static> {
    Box::pin(async move {
        if depth > MAX_CALL_DEPTH {
            return Err(RuntimeError::Recursion {
                name: def.name.clone(),
                limit: MAX_CALL_DEPTH,
            });
        }
        debug!(function = %def.name, depth, "call");
        let mut locals = (*env.globals).clone();
        let mut args = args.into_iter();
        for param in &def.params {
            locals.insert(param.clone(), args.next().unwrap_or_default());
        }
        let mut machine = Machine::new(env, target, Arc::new(locals), depth);
        let mut last_line = 0;
        machine.run(&def.body, None, &mut last_line).await?;
        Ok(machine.root_stream())
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
