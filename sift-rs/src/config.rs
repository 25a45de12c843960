//! `siftrc` configuration file parser.
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `set <name>=<value>` or `set <name> <value>` | bind a global |
//! | `output text` / `output json` | pick the output renderer |
//! | `folder <path>` | current folder for `getFiles` / `loadFile` |
//! | Lines starting with `;` or `#` | comment, ignored |
//!
//! Values that read as a number or `true`/`false` are bound as such; anything
//! else (including quoted text) is bound as text.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::script::Stream;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

/// Parsed sift configuration.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Config {
    pub globals: BTreeMap<String, Stream>,
    pub output: OutputFormat,
    pub folder: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.
    ///
    /// Every line is tried; the config keeps whatever parsed and the errors
    /// for the rest are returned alongside it.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            let (cmd, args_str) = line
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((line, ""));
            let tokens = split_args(args_str.trim());

            let result = match cmd {
                "set" => parse_set(&tokens).map(|(name, value)| {
                    config.globals.insert(name, value);
                }),
                "output" => parse_single(cmd, &tokens)
                    .and_then(|t| t.parse::<OutputFormat>())
                    .map(|format| config.output = format),
                "folder" => parse_single(cmd, &tokens)
                    .map(|path| config.folder = Some(PathBuf::from(path))),
                other => Err(format!("unknown directive '{other}'")),
            };
            if let Err(message) = result {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Layer `name=value` bindings from the command line over the file's.
    pub fn apply_bindings<'a>(
        &mut self,
        bindings: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) {
        for (name, value) in bindings {
            self.globals.insert(name.to_owned(), parse_value(value));
        }
    }
}

/// Interpret a raw setting as a number, boolean, or text.
pub fn parse_value(raw: &str) -> Stream {
    match raw {
        "true" => Stream::Bool(true),
        "false" => Stream::Bool(false),
        _ => match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => Stream::Num(n),
            _ => Stream::Text(raw.to_owned()),
        },
    }
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.  A quoted empty string yields an empty token.
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() || quoted {
                    args.push(std::mem::take(&mut cur));
                }
                quoted = false;
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() || quoted {
        args.push(cur);
    }
    args
}

// ── Directives ────────────────────────────────────────────────────────────────

fn parse_set(tokens: &[String]) -> Result<(String, Stream), String> {
    let Some(first) = tokens.first() else {
        return Err("set: requires an argument".into());
    };

    let (name, value) = if let Some((name, value)) = first.split_once('=') {
        let rest = tokens[1..].iter().map(String::as_str);
        let value = std::iter::once(value).chain(rest).collect::<Vec<_>>().join(" ");
        (name.to_owned(), value)
    } else if tokens.len() >= 2 {
        (first.clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("set: missing value for '{first}'"));
    };

    if name.is_empty() {
        return Err("set: variable name cannot be empty".into());
    }
    if !crate::script::expr::is_identifier(&name) {
        return Err(format!("set: '{name}' is not a valid name"));
    }

    Ok((name, parse_value(&value)))
}

fn parse_single<'t>(cmd: &str, tokens: &'t [String]) -> Result<&'t str, String> {
    match tokens {
        [one] => Ok(one.as_str()),
        [] => Err(format!("{cmd}: requires an argument")),
        _ => Err(format!("{cmd}: expects exactly one argument")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // -- split_args -----------------------------------------------------------

    #[test]
    fn split_simple() {
        assert_eq!(split_args("foo bar baz"), ["foo", "bar", "baz"]);
    }

    #[test]
    fn split_quoted_spaces() {
        assert_eq!(split_args(r#""my folder" x"#), ["my folder", "x"]);
    }

    #[test]
    fn split_escaped_quote_inside_quotes() {
        assert_eq!(split_args(r#""say \"hi\"""#), [r#"say "hi""#]);
    }

    #[test]
    fn split_keeps_quoted_empty() {
        assert_eq!(split_args(r#"sep """#), ["sep", ""]);
    }

    // -- set ------------------------------------------------------------------

    #[test]
    fn set_equals_syntax() {
        let (cfg, errs) = Config::load_str("set limit=10");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.globals.get("limit"), Some(&Stream::Num(10.0)));
    }

    #[test]
    fn set_space_syntax_and_bool() {
        let (cfg, errs) = Config::load_str("set verbose true");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.globals.get("verbose"), Some(&Stream::Bool(true)));
    }

    #[test]
    fn set_value_with_spaces_is_text() {
        let (cfg, errs) = Config::load_str("set greeting hello world");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.globals.get("greeting"), Some(&Stream::from("hello world")));
    }

    #[test]
    fn set_rejects_reserved_and_empty_names() {
        let (cfg, errs) = Config::load_str("set map=1\nset =2\nset lonely");
        assert!(cfg.globals.is_empty());
        assert_eq!(errs.iter().map(|e| e.line).collect::<Vec<_>>(), [1, 2, 3]);
    }

    #[test]
    fn non_finite_numbers_stay_text() {
        assert_eq!(parse_value("inf"), Stream::from("inf"));
        assert_eq!(parse_value("NaN"), Stream::from("NaN"));
        assert_eq!(parse_value("-2.5"), Stream::Num(-2.5));
    }

    // -- output / folder ------------------------------------------------------

    #[test]
    fn output_and_folder() {
        let (cfg, errs) = Config::load_str("output json\nfolder \"/tmp/my data\"");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.output, OutputFormat::Json);
        assert_eq!(cfg.folder, Some(PathBuf::from("/tmp/my data")));
    }

    #[test]
    fn bad_output_format_is_error() {
        let (cfg, errs) = Config::load_str("output yaml");
        assert_eq!(cfg.output, OutputFormat::Text);
        assert_eq!(errs[0].to_string(), "line 1: unknown output format 'yaml'");
    }

    // -- Comments & errors ----------------------------------------------------

    #[test]
    fn comments_and_blank_lines_ignored() {
        let (cfg, errs) = Config::load_str(
            ";; comment\n\
             # also a comment\n\
             \n\
             set real=yes",
        );
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.globals.len(), 1);
    }

    #[test]
    fn unknown_directive_is_reported_and_skipped() {
        let (cfg, errs) = Config::load_str("addworld x\nset loaded=yes");
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].line, 1);
        assert!(cfg.globals.contains_key("loaded"));
    }

    #[test]
    fn cli_bindings_override_file() {
        let (mut cfg, _) = Config::load_str("set limit=10");
        cfg.apply_bindings([("limit", "3"), ("name", "x")]);
        assert_eq!(cfg.globals.get("limit"), Some(&Stream::Num(3.0)));
        assert_eq!(cfg.globals.get("name"), Some(&Stream::from("x")));
    }

    #[test]
    fn load_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("siftrc");
        std::fs::write(&path, "set a=1\nbogus\n").unwrap();
        let (cfg, errs) = Config::load_file(&path).unwrap();
        assert_eq!(cfg.globals.get("a"), Some(&Stream::Num(1.0)));
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn realistic_siftrc() {
        let src = "\
;; sift settings\n\
\n\
set separator=\",\"\n\
set limit=25\n\
output json\n\
folder ./data\n\
";
        let (cfg, errs) = Config::load_str(src);
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.globals.get("separator"), Some(&Stream::from(",")));
        assert_eq!(cfg.globals.get("limit"), Some(&Stream::Num(25.0)));
        assert_eq!(cfg.output, OutputFormat::Json);
        assert_eq!(cfg.folder.as_deref(), Some(Path::new("./data")));
    }
}
