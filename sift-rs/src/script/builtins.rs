//! Built-in functions.
//!
//! Every call targets a stream (the ambient stream, or the left operand of
//! `:`) and receives its already-evaluated arguments.  [`BUILTINS`] is the
//! single source of truth for names and arity; the dispatcher below and the
//! symbol export both read it.
//!
//! Functions that need the outside world (`sideOutput`, `getFiles`,
//! `loadFile`) go through the [`Host`] trait so the engine never touches the
//! file system itself.

use std::future::Future;
use std::pin::Pin;

use regex::Regex;

use crate::error::RuntimeError;
use super::value::{Stream, StreamMap};

type Result<T> = std::result::Result<T, RuntimeError>;

// ── Catalogue ─────────────────────────────────────────────────────────────────

/// Call contract of one built-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinSpec {
    pub name: &'static str,
    pub min: usize,
    pub max: usize,
    pub params: &'static [&'static str],
    pub summary: &'static str,
}

impl BuiltinSpec {
    const fn new(
        name: &'static str,
        min: usize,
        max: usize,
        params: &'static [&'static str],
        summary: &'static str,
    ) -> Self {
        Self {
            name,
            min,
            max,
            params,
            summary,
        }
    }

    /// `name(a, b?)`
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| if i < self.min { (*p).to_owned() } else { format!("{p}?") })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }

    /// Whether the host must supply a capability for this function.
    pub fn needs_host(&self) -> bool {
        matches!(self.name, "sideOutput" | "getFiles" | "loadFile")
    }
}

pub const BUILTINS: &[BuiltinSpec] = &[
    // ── text ──
    BuiltinSpec::new("split", 1, 1, &["separator"], "split text into an array"),
    BuiltinSpec::new("join", 0, 1, &["separator"], "join array elements into text"),
    BuiltinSpec::new(
        "concat",
        1,
        8,
        &["a", "b", "c", "d", "e", "f", "g", "h"],
        "append text or array elements",
    ),
    BuiltinSpec::new("replace", 2, 2, &["find", "with"], "replace every occurrence"),
    BuiltinSpec::new("piece", 2, 2, &["separator", "n"], "n-th (1-based) piece of text"),
    BuiltinSpec::new("at", 1, 1, &["key"], "element by index or key"),
    BuiltinSpec::new("length", 0, 0, &[], "characters, elements or entries"),
    BuiltinSpec::new("contains", 1, 1, &["value"], "substring, element or key test"),
    BuiltinSpec::new("startsWith", 1, 1, &["prefix"], "text prefix test"),
    BuiltinSpec::new("endsWith", 1, 1, &["suffix"], "text suffix test"),
    BuiltinSpec::new("trim", 0, 0, &[], "strip surrounding whitespace"),
    BuiltinSpec::new("trimStart", 0, 0, &[], "strip leading whitespace"),
    BuiltinSpec::new("trimEnd", 0, 0, &[], "strip trailing whitespace"),
    BuiltinSpec::new("toUpper", 0, 0, &[], "upper-case text"),
    BuiltinSpec::new("toLower", 0, 0, &[], "lower-case text"),
    BuiltinSpec::new("toText", 0, 0, &[], "cast to text"),
    // ── numbers ──
    BuiltinSpec::new("modulo", 1, 1, &["divisor"], "floating-point remainder"),
    BuiltinSpec::new("tryParseNum", 0, 1, &["default"], "parse text as a number"),
    BuiltinSpec::new("range", 1, 2, &["start", "end"], "array of numbers [start, end)"),
    // ── collections ──
    BuiltinSpec::new("slice", 1, 2, &["start", "end"], "sub-array or substring"),
    BuiltinSpec::new("flatten", 0, 0, &[], "splice nested arrays one level"),
    BuiltinSpec::new("keys", 0, 0, &[], "map keys as an array"),
    BuiltinSpec::new("values", 0, 0, &[], "map values as an array"),
    BuiltinSpec::new("iif", 3, 3, &["condition", "then", "else"], "choose between two values"),
    // ── formats ──
    BuiltinSpec::new("parseJson", 0, 0, &[], "parse JSON text"),
    BuiltinSpec::new("toJson", 0, 0, &[], "render as JSON text"),
    BuiltinSpec::new("isMatch", 1, 1, &["pattern"], "regular expression test"),
    BuiltinSpec::new("regexReplace", 2, 2, &["pattern", "with"], "regular expression replace"),
    // ── host ──
    BuiltinSpec::new("sideOutput", 0, 1, &["label"], "emit the stream to the host"),
    BuiltinSpec::new("getFiles", 0, 0, &[], "files in the current folder"),
    BuiltinSpec::new("loadFile", 1, 1, &["name"], "contents of a file in the current folder"),
];

/// Look a built-in up by name.
pub fn lookup(name: &str) -> Option<&'static BuiltinSpec> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// Reject argument counts outside `min..=max`.
pub fn check_arity(name: &str, min: usize, max: usize, got: usize) -> Result<()> {
    if got < min || got > max {
        return Err(RuntimeError::Arity {
            name: name.to_owned(),
            min,
            max,
            got,
        });
    }
    Ok(())
}

/// Upper bound on the elements `range` will produce.
pub const MAX_RANGE: usize = 1_000_000;

// ── Host capability ───────────────────────────────────────────────────────────

pub type HostFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, String>> + Send + 'a>>;

/// Capabilities the embedding application may provide.  Every method
/// defaults to "unavailable".
pub trait Host: Send + Sync {
    /// Receive a labelled copy of a stream.
    fn side_output(&self, label: &str, value: &Stream) -> std::result::Result<(), String> {
        let _ = (label, value);
        Err("side output".into())
    }

    /// File names in the current folder.
    fn list_files(&self) -> HostFuture<'_, Vec<String>> {
        Box::pin(async { Err("current folder".into()) })
    }

    /// Contents of a file in the current folder.
    fn load_file<'a>(&'a self, name: &'a str) -> HostFuture<'a, String> {
        let _ = name;
        Box::pin(async { Err("current folder".into()) })
    }
}

/// A host with no capabilities.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHost;

impl Host for NoHost {}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// Call built-in `spec` against `target`.
pub async fn call_builtin(
    spec: &BuiltinSpec,
    target: Stream,
    args: Vec<Stream>,
    host: &dyn Host,
) -> Result<Stream> {
    check_arity(spec.name, spec.min, spec.max, args.len())?;
    let name = spec.name;
    match name {
        "sideOutput" => {
            let label = match args.first() {
                Some(v) => v.cast_text()?,
                None => String::new(),
            };
            host.side_output(&label, &target).map_err(RuntimeError::Host)?;
            Ok(target)
        }
        "getFiles" => {
            let files = host.list_files().await.map_err(RuntimeError::Host)?;
            Ok(Stream::Array(files.into_iter().map(Stream::Text).collect()))
        }
        "loadFile" => {
            let file = text_arg(&args, 0)?;
            let text = host.load_file(&file).await.map_err(RuntimeError::Host)?;
            Ok(Stream::Text(text))
        }
        _ => call_pure(name, target, args),
    }
}

fn call_pure(name: &str, target: Stream, args: Vec<Stream>) -> Result<Stream> {
    Ok(match name {
        // ── Text ─────────────────────────────────────────────────────────────
        "split" => {
            let text = target.cast_text()?;
            let sep = text_arg(&args, 0)?;
            let parts: Vec<Stream> = if sep.is_empty() {
                text.chars().map(|c| Stream::Text(c.to_string())).collect()
            } else {
                text.split(sep.as_str()).map(Stream::from).collect()
            };
            Stream::Array(parts)
        }
        "join" => {
            let sep = match args.first() {
                Some(v) => v.cast_text()?,
                None => String::new(),
            };
            let items = array_target(name, &target)?;
            let texts = items
                .iter()
                .map(Stream::cast_text)
                .collect::<Result<Vec<_>>>()?;
            Stream::Text(texts.join(&sep))
        }
        "concat" => match target {
            Stream::Array(mut items) => {
                for arg in args {
                    match arg {
                        Stream::Array(more) => items.extend(more),
                        other => items.push(other),
                    }
                }
                Stream::Array(items)
            }
            other => {
                let mut out = other.cast_text()?;
                for arg in &args {
                    out.push_str(&arg.cast_text()?);
                }
                Stream::Text(out)
            }
        },
        "replace" => {
            let text = target.cast_text()?;
            let find = text_arg(&args, 0)?;
            let with = text_arg(&args, 1)?;
            if find.is_empty() {
                Stream::Text(text)
            } else {
                Stream::Text(text.replace(&find, &with))
            }
        }
        "piece" => {
            let text = target.cast_text()?;
            let sep = text_arg(&args, 0)?;
            let n = num_arg(&args, 1)? as i64;
            let piece = if n < 1 || sep.is_empty() {
                None
            } else {
                text.split(sep.as_str()).nth((n - 1) as usize)
            };
            Stream::from(piece.unwrap_or_default())
        }
        "at" => at(&target, &args[0])?,
        "length" => {
            let len = match &target {
                Stream::Array(items) => items.len(),
                Stream::Map(map) => map.len(),
                other => other.cast_text()?.chars().count(),
            };
            Stream::Num(len as f64)
        }
        "contains" => Stream::Bool(match &target {
            Stream::Array(items) => items
                .iter()
                .any(|item| item.equals(&args[0]).unwrap_or(false)),
            Stream::Map(map) => map.contains_key(&args[0]),
            other => other.cast_text()?.contains(&text_arg(&args, 0)?),
        }),
        "startsWith" => Stream::Bool(target.cast_text()?.starts_with(&text_arg(&args, 0)?)),
        "endsWith" => Stream::Bool(target.cast_text()?.ends_with(&text_arg(&args, 0)?)),
        "trim" => Stream::from(target.cast_text()?.trim()),
        "trimStart" => Stream::from(target.cast_text()?.trim_start()),
        "trimEnd" => Stream::from(target.cast_text()?.trim_end()),
        "toUpper" => Stream::Text(target.cast_text()?.to_uppercase()),
        "toLower" => Stream::Text(target.cast_text()?.to_lowercase()),
        "toText" => Stream::Text(target.cast_text()?),

        // ── Numbers ──────────────────────────────────────────────────────────
        "modulo" => Stream::Num(target.cast_num()? % num_arg(&args, 0)?),
        "tryParseNum" => {
            let parsed = match &target {
                Stream::Num(n) => Some(*n),
                Stream::Text(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match (parsed, args.into_iter().next()) {
                (Some(n), _) => Stream::Num(n),
                (None, Some(default)) => default,
                (None, None) => target,
            }
        }
        "range" => {
            let (start, end) = match args.get(1) {
                Some(end) => (num_arg(&args, 0)?, end.cast_num()?),
                None => (0.0, num_arg(&args, 0)?),
            };
            let span = (end - start).ceil();
            if !span.is_finite() || span > MAX_RANGE as f64 {
                return Err(RuntimeError::builtin(
                    name,
                    format!("range from {start} to {end} exceeds {MAX_RANGE} elements"),
                ));
            }
            let count = span.max(0.0) as usize;
            Stream::Array((0..count).map(|i| Stream::Num(start + i as f64)).collect())
        }

        // ── Collections ──────────────────────────────────────────────────────
        "slice" => {
            let start = num_arg(&args, 0)? as i64;
            let end = args.get(1).map(Stream::cast_num).transpose()?.map(|n| n as i64);
            match target {
                Stream::Array(items) => {
                    let (a, b) = bounds(start, end, items.len());
                    Stream::Array(items[a..b].to_vec())
                }
                other => {
                    let chars: Vec<char> = other.cast_text()?.chars().collect();
                    let (a, b) = bounds(start, end, chars.len());
                    Stream::Text(chars[a..b].iter().collect())
                }
            }
        }
        "flatten" => {
            let items = array_target(name, &target)?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Stream::Array(inner) => out.extend(inner.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Stream::Array(out)
        }
        "keys" => Stream::Array(map_target(name, &target)?.keys().cloned().collect()),
        "values" => Stream::Array(map_target(name, &target)?.values().cloned().collect()),
        "iif" => {
            let mut args = args.into_iter();
            let cond = args.next().unwrap_or_default().cast_bool()?;
            let then = args.next().unwrap_or_default();
            let otherwise = args.next().unwrap_or_default();
            if cond {
                then
            } else {
                otherwise
            }
        }

        // ── Formats ──────────────────────────────────────────────────────────
        "parseJson" => {
            let value: serde_json::Value = serde_json::from_str(&target.cast_text()?)?;
            Stream::from_json(value)
        }
        "toJson" => Stream::Text(serde_json::to_string(&target)?),
        "isMatch" => {
            let re = Regex::new(&text_arg(&args, 0)?)?;
            Stream::Bool(re.is_match(&target.cast_text()?))
        }
        "regexReplace" => {
            let re = Regex::new(&text_arg(&args, 0)?)?;
            let with = text_arg(&args, 1)?;
            Stream::Text(re.replace_all(&target.cast_text()?, with.as_str()).into_owned())
        }

        _ => return Err(RuntimeError::MissingFunction(name.to_owned())),
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn text_arg(args: &[Stream], idx: usize) -> Result<String> {
    args.get(idx).map(Stream::cast_text).unwrap_or_else(|| Ok(String::new()))
}

fn num_arg(args: &[Stream], idx: usize) -> Result<f64> {
    args.get(idx).map(Stream::cast_num).unwrap_or(Ok(0.0))
}

fn array_target<'a>(name: &str, target: &'a Stream) -> Result<&'a [Stream]> {
    target
        .as_array()
        .ok_or_else(|| RuntimeError::builtin(name, format!("expects an array, got {}", target.type_name())))
}

fn map_target<'a>(name: &str, target: &'a Stream) -> Result<&'a StreamMap> {
    target
        .as_map()
        .ok_or_else(|| RuntimeError::builtin(name, format!("expects a map, got {}", target.type_name())))
}

/// Resolve a possibly negative index against `len`.
fn resolve_index(i: i64, len: usize) -> Option<usize> {
    let idx = if i < 0 { len as i64 + i } else { i };
    usize::try_from(idx).ok().filter(|&idx| idx < len)
}

/// Clamp `start..end` (negative counts from the end) into `0..=len`.
fn bounds(start: i64, end: Option<i64>, len: usize) -> (usize, usize) {
    let clamp = |i: i64| {
        let i = if i < 0 { len as i64 + i } else { i };
        i.clamp(0, len as i64) as usize
    };
    let a = clamp(start);
    let b = end.map_or(len, clamp);
    (a, b.max(a))
}

fn at(target: &Stream, key: &Stream) -> Result<Stream> {
    match target {
        Stream::Map(map) => map
            .get(key)
            .cloned()
            .ok_or_else(|| RuntimeError::MissingKey(key.to_string())),
        Stream::Array(items) => {
            let i = key.cast_num()? as i64;
            resolve_index(i, items.len())
                .map(|idx| items[idx].clone())
                .ok_or(RuntimeError::Index {
                    index: i,
                    len: items.len(),
                })
        }
        other => {
            let chars: Vec<char> = other.cast_text()?.chars().collect();
            let i = key.cast_num()? as i64;
            resolve_index(i, chars.len())
                .map(|idx| Stream::Text(chars[idx].to_string()))
                .ok_or(RuntimeError::Index {
                    index: i,
                    len: chars.len(),
                })
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    async fn call(name: &str, target: impl Into<Stream>, args: Vec<Stream>) -> Result<Stream> {
        let spec = lookup(name).expect("unknown builtin");
        call_builtin(spec, target.into(), args, &NoHost).await
    }

    async fn ok(name: &str, target: impl Into<Stream>, args: Vec<Stream>) -> Stream {
        call(name, target, args).await.expect("builtin failed")
    }

    fn s(v: &str) -> Stream {
        Stream::from(v)
    }

    fn n(v: f64) -> Stream {
        Stream::Num(v)
    }

    #[test]
    fn catalogue_names_are_unique() {
        for (i, b) in BUILTINS.iter().enumerate() {
            assert!(b.min <= b.max, "{}", b.name);
            assert!(b.params.len() >= b.max, "{}", b.name);
            assert!(BUILTINS[i + 1..].iter().all(|o| o.name != b.name), "{}", b.name);
        }
    }

    #[test]
    fn signature_marks_optional_params() {
        assert_eq!(lookup("slice").unwrap().signature(), "slice(start, end?)");
        assert_eq!(lookup("length").unwrap().signature(), "length()");
    }

    #[tokio::test]
    async fn arity_is_enforced() {
        let err = call("split", "a", vec![]).await.unwrap_err();
        assert_eq!(
            err,
            RuntimeError::Arity {
                name: "split".into(),
                min: 1,
                max: 1,
                got: 0
            }
        );
    }

    #[tokio::test]
    async fn split_and_join() {
        assert_eq!(
            ok("split", "a,b,c", vec![s(",")]).await,
            Stream::Array(vec![s("a"), s("b"), s("c")])
        );
        let arr = Stream::from(vec![1i64, 2, 3]);
        assert_eq!(ok("join", arr.clone(), vec![s("-")]).await, s("1-2-3"));
        assert_eq!(ok("join", arr, vec![]).await, s("123"));
    }

    #[tokio::test]
    async fn concat_text_and_arrays() {
        assert_eq!(ok("concat", "a", vec![s("b"), n(1.0)]).await, s("ab1"));
        assert_eq!(
            ok("concat", Stream::from(vec![1i64]), vec![Stream::from(vec![2i64, 3]), n(4.0)]).await,
            Stream::from(vec![1i64, 2, 3, 4])
        );
    }

    #[tokio::test]
    async fn piece_is_one_based() {
        assert_eq!(ok("piece", "a|b|c", vec![s("|"), n(2.0)]).await, s("b"));
        assert_eq!(ok("piece", "a|b|c", vec![s("|"), n(9.0)]).await, s(""));
        assert_eq!(ok("piece", "a|b|c", vec![s("|"), n(0.0)]).await, s(""));
    }

    #[tokio::test]
    async fn at_supports_negative_and_keys() {
        let arr = Stream::from(vec![10i64, 20, 30]);
        assert_eq!(ok("at", arr.clone(), vec![n(-1.0)]).await, n(30.0));
        assert!(call("at", arr, vec![n(3.0)]).await.is_err());
        assert_eq!(ok("at", "xyz", vec![n(1.0)]).await, s("y"));
        let mut m = StreamMap::new();
        m.insert(s("k"), n(1.0)).unwrap();
        assert_eq!(ok("at", Stream::Map(m), vec![s("k")]).await, n(1.0));
    }

    #[tokio::test]
    async fn length_and_contains() {
        assert_eq!(ok("length", "héllo", vec![]).await, n(5.0));
        assert_eq!(ok("length", Stream::from(vec![1i64, 2]), vec![]).await, n(2.0));
        assert_eq!(ok("contains", "hello", vec![s("ell")]).await, Stream::Bool(true));
        assert_eq!(
            ok("contains", Stream::from(vec![1i64, 2]), vec![n(2.0)]).await,
            Stream::Bool(true)
        );
    }

    #[tokio::test]
    async fn text_helpers() {
        assert_eq!(ok("trim", "  a  ", vec![]).await, s("a"));
        assert_eq!(ok("trimStart", "  a  ", vec![]).await, s("a  "));
        assert_eq!(ok("trimEnd", "  a  ", vec![]).await, s("  a"));
        assert_eq!(ok("toUpper", "abc", vec![]).await, s("ABC"));
        assert_eq!(ok("toText", 2.5, vec![]).await, s("2.5"));
        assert_eq!(ok("replace", "a.b.c", vec![s("."), s("/")]).await, s("a/b/c"));
        assert_eq!(ok("startsWith", "abc", vec![s("ab")]).await, Stream::Bool(true));
        assert_eq!(ok("endsWith", "abc", vec![s("ab")]).await, Stream::Bool(false));
    }

    #[tokio::test]
    async fn numeric_helpers() {
        assert_eq!(ok("modulo", 7.0, vec![n(2.0)]).await, n(1.0));
        assert_eq!(ok("tryParseNum", " 42 ", vec![]).await, n(42.0));
        assert_eq!(ok("tryParseNum", "x", vec![n(0.0)]).await, n(0.0));
        assert_eq!(ok("tryParseNum", "x", vec![]).await, s("x"));
        assert_eq!(ok("range", "", vec![n(3.0)]).await, Stream::from(vec![0i64, 1, 2]));
        assert_eq!(ok("range", "", vec![n(2.0), n(4.0)]).await, Stream::from(vec![2i64, 3]));
        assert_eq!(ok("range", "", vec![n(5.0), n(2.0)]).await, Stream::from(Vec::<i64>::new()));
        assert_eq!(ok("range", "", vec![n(0.5), n(2.0)]).await, Stream::from(vec![0.5, 1.5]));
    }

    #[tokio::test]
    async fn range_refuses_unbounded_spans() {
        let big_start = ok("range", "", vec![n(2e16), n(2e16 + 4.0)]).await;
        assert!(matches!(big_start, Stream::Array(items) if items.len() == 4));
        assert!(matches!(
            call("range", "", vec![n(1e300)]).await,
            Err(RuntimeError::Builtin { .. })
        ));
        assert!(matches!(
            call("range", "", vec![n(f64::NAN)]).await,
            Err(RuntimeError::Builtin { .. })
        ));
    }

    #[tokio::test]
    async fn slice_and_flatten() {
        let arr = Stream::from(vec![1i64, 2, 3, 4]);
        assert_eq!(ok("slice", arr.clone(), vec![n(1.0), n(3.0)]).await, Stream::from(vec![2i64, 3]));
        assert_eq!(ok("slice", arr, vec![n(-2.0)]).await, Stream::from(vec![3i64, 4]));
        assert_eq!(ok("slice", "hello", vec![n(1.0), n(-1.0)]).await, s("ell"));
        let nested = Stream::Array(vec![Stream::from(vec![1i64]), n(2.0), Stream::from(vec![3i64])]);
        assert_eq!(ok("flatten", nested, vec![]).await, Stream::from(vec![1i64, 2, 3]));
    }

    #[tokio::test]
    async fn keys_values_and_json() {
        let map = ok("parseJson", r#"{"a":1,"b":[true]}"#, vec![]).await;
        assert_eq!(ok("keys", map.clone(), vec![]).await, Stream::Array(vec![s("a"), s("b")]));
        assert_eq!(
            ok("values", map.clone(), vec![]).await,
            Stream::Array(vec![n(1.0), Stream::Array(vec![Stream::Bool(true)])])
        );
        assert_eq!(ok("toJson", map, vec![]).await, s(r#"{"a":1,"b":[true]}"#));
        assert!(matches!(
            call("parseJson", "{", vec![]).await,
            Err(RuntimeError::Json(_))
        ));
        assert!(call("keys", "x", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn json_objects_keep_document_order() {
        let map = ok("parseJson", r#"{"zeta":1,"alpha":2,"mid":3}"#, vec![]).await;
        assert_eq!(
            ok("keys", map.clone(), vec![]).await,
            Stream::Array(vec![s("zeta"), s("alpha"), s("mid")])
        );
        assert_eq!(ok("toJson", map, vec![]).await, s(r#"{"zeta":1,"alpha":2,"mid":3}"#));
    }

    #[tokio::test]
    async fn iif_chooses() {
        assert_eq!(ok("iif", "", vec![Stream::Bool(true), n(1.0), n(2.0)]).await, n(1.0));
        assert_eq!(ok("iif", "", vec![n(0.0), n(1.0), n(2.0)]).await, n(2.0));
    }

    #[tokio::test]
    async fn regex_helpers() {
        assert_eq!(ok("isMatch", "abc123", vec![s(r"\d+$")]).await, Stream::Bool(true));
        assert_eq!(ok("regexReplace", "a1b22", vec![s(r"\d+"), s("#")]).await, s("a#b#"));
        assert!(matches!(
            call("isMatch", "x", vec![s("(")]).await,
            Err(RuntimeError::Regex(_))
        ));
    }

    #[tokio::test]
    async fn host_functions_need_a_host() {
        assert!(matches!(call("getFiles", "", vec![]).await, Err(RuntimeError::Host(_))));
        assert!(matches!(call("sideOutput", "x", vec![]).await, Err(RuntimeError::Host(_))));
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Stream)>>,
    }

    impl Host for Recorder {
        fn side_output(&self, label: &str, value: &Stream) -> std::result::Result<(), String> {
            self.seen
                .lock()
                .map_err(|e| e.to_string())?
                .push((label.to_owned(), value.clone()));
            Ok(())
        }

        fn list_files(&self) -> HostFuture<'_, Vec<String>> {
            Box::pin(async { Ok(vec!["a.txt".to_owned()]) })
        }
    }

    #[tokio::test]
    async fn host_functions_delegate() {
        let host = Recorder::default();
        let spec = lookup("sideOutput").unwrap();
        let out = call_builtin(spec, s("v"), vec![s("dbg")], &host).await.unwrap();
        assert_eq!(out, s("v"));
        assert_eq!(host.seen.lock().unwrap()[0], ("dbg".to_owned(), s("v")));

        let files = call_builtin(lookup("getFiles").unwrap(), s(""), vec![], &host).await.unwrap();
        assert_eq!(files, Stream::Array(vec![s("a.txt")]));
    }
}
