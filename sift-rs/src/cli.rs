//! Command-line argument parsing.
//!
//! Usage:
//!   sift [--config FILE] [--no-config] [--set NAME=VALUE]... [--json]
//!        [--folder DIR] [--check] [--symbols] [-v]... <SCRIPT> [INPUT]

use std::path::PathBuf;

use clap::{ArgAction, Parser};

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "sift")]
#[command(about = "Run a sift script over a text input", long_about = None)]
pub struct Cli {
    /// Config file to load instead of the default search.
    #[arg(long, value_name = "FILE", conflicts_with = "no_config")]
    pub config: Option<PathBuf>,

    /// Skip the user config file.
    #[arg(long)]
    pub no_config: bool,

    /// Bind a global, overriding the config file.
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_binding)]
    pub set: Vec<(String, String)>,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,

    /// Current folder for `getFiles` and `loadFile`.
    #[arg(long, value_name = "DIR")]
    pub folder: Option<PathBuf>,

    /// Parse only; report the first failing line.
    #[arg(long, conflicts_with = "symbols")]
    pub check: bool,

    /// Print the symbols visible to the script as JSON.
    #[arg(long)]
    pub symbols: bool,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Script file.
    pub script: PathBuf,

    /// Input file; standard input when omitted.
    pub input: Option<PathBuf>,
}

/// How to choose the user config file.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Search the standard locations (default).
    Search,
    /// `--no-config`.
    Skip,
    /// `--config FILE`.
    Explicit(PathBuf),
}

impl Cli {
    pub fn config_source(&self) -> ConfigSource {
        match (&self.config, self.no_config) {
            (_, true) => ConfigSource::Skip,
            (Some(path), false) => ConfigSource::Explicit(path.clone()),
            (None, false) => ConfigSource::Search,
        }
    }

    /// Default `tracing` filter for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Parse a `NAME=VALUE` binding.
pub fn parse_binding(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    if !crate::script::expr::is_identifier(name) {
        return Err(format!("'{name}' is not a valid name"));
    }
    Ok((name.to_owned(), value.to_owned()))
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Search for the user config file in the standard locations.
/// Returns the first path that exists, or `None`.
pub fn find_user_config() -> Option<PathBuf> {
    let project = directories::ProjectDirs::from("", "", "sift")
        .map(|dirs| dirs.config_dir().join("siftrc"));
    project
        .into_iter()
        .chain(std::iter::once(PathBuf::from("./.siftrc")))
        .find(|p| p.exists())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("sift").chain(args.iter().copied()))
    }

    #[test]
    fn script_only() {
        let a = parse(&["words.sift"]).unwrap();
        assert_eq!(a.script, PathBuf::from("words.sift"));
        assert!(a.input.is_none());
        assert_eq!(a.config_source(), ConfigSource::Search);
        assert_eq!(a.log_filter(), "warn");
    }

    #[test]
    fn script_and_input() {
        let a = parse(&["words.sift", "in.txt"]).unwrap();
        assert_eq!(a.input, Some(PathBuf::from("in.txt")));
    }

    #[test]
    fn script_is_required() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn bool_flags() {
        let a = parse(&["--json", "--check", "s"]).unwrap();
        assert!(a.json && a.check && !a.symbols);
    }

    #[test]
    fn check_conflicts_with_symbols() {
        assert!(parse(&["--check", "--symbols", "s"]).is_err());
    }

    #[test]
    fn config_sources() {
        let a = parse(&["--config", "my.siftrc", "s"]).unwrap();
        assert_eq!(a.config_source(), ConfigSource::Explicit(PathBuf::from("my.siftrc")));
        let a = parse(&["--no-config", "s"]).unwrap();
        assert_eq!(a.config_source(), ConfigSource::Skip);
        assert!(parse(&["--config", "x", "--no-config", "s"]).is_err());
    }

    #[test]
    fn repeated_bindings() {
        let a = parse(&["--set", "limit=3", "--set", "sep=a=b", "s"]).unwrap();
        assert_eq!(
            a.set,
            [("limit".to_owned(), "3".to_owned()), ("sep".to_owned(), "a=b".to_owned())]
        );
    }

    #[test]
    fn bad_binding_is_rejected() {
        assert!(parse(&["--set", "novalue", "s"]).is_err());
        assert!(parse(&["--set", "map=1", "s"]).is_err());
    }

    #[test]
    fn verbosity_counts() {
        assert_eq!(parse(&["-v", "s"]).unwrap().log_filter(), "info");
        assert_eq!(parse(&["-vv", "s"]).unwrap().log_filter(), "debug");
        assert_eq!(parse(&["-vvvv", "s"]).unwrap().log_filter(), "trace");
    }

    #[test]
    fn unknown_flag() {
        assert!(parse(&["-z", "s"]).is_err());
    }
}
