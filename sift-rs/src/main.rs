use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use sift::cli::{find_user_config, Cli, ConfigSource};
use sift::config::{Config, OutputFormat};
use sift::host::FolderHost;
use sift::script::{parse_script, Interpreter, Stream};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli);

    // ── Config ────────────────────────────────────────────────────────────────
    let mut config = match cli.config_source() {
        ConfigSource::Skip => Config::new(),
        ConfigSource::Explicit(path) => load_config(&path)?,
        ConfigSource::Search => match find_user_config() {
            Some(path) => load_config(&path)?,
            None => Config::new(),
        },
    };
    config.apply_bindings(cli.set.iter().map(|(n, v)| (n.as_str(), v.as_str())));
    let output = if cli.json { OutputFormat::Json } else { config.output };

    // ── Script ────────────────────────────────────────────────────────────────
    let source = tokio::fs::read_to_string(&cli.script)
        .await
        .with_context(|| format!("can't read script {}", cli.script.display()))?;
    let program = parse_script(&source)
        .with_context(|| format!("{}", cli.script.display()))?;

    if cli.symbols {
        println!("{}", serde_json::to_string_pretty(&program.symbols())?);
        return Ok(ExitCode::SUCCESS);
    }
    if cli.check {
        return Ok(match &program.diagnostic {
            Some(err) => {
                eprintln!("sift: {}: {err}", cli.script.display());
                ExitCode::FAILURE
            }
            None => ExitCode::SUCCESS,
        });
    }

    // ── Input ─────────────────────────────────────────────────────────────────
    let (input, file_name) = match &cli.input {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("can't read input {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (text, name)
        }
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("can't read standard input")?;
            (text, String::new())
        }
    };

    // ── Run ───────────────────────────────────────────────────────────────────
    let folder = cli
        .folder
        .clone()
        .or_else(|| config.folder.clone())
        .unwrap_or_else(|| ".".into());
    debug!(folder = %folder.display(), "host folder");
    let host = Arc::new(FolderHost::new(folder));

    let mut interp = Interpreter::with_host(host.clone());
    for (name, value) in config.globals {
        interp.set_global(name, value);
    }
    interp.set_global("fileName", file_name);

    let Some(result) = interp.process(Stream::Text(input), &program).await else {
        bail!("run was superseded");
    };

    for (label, value) in host.take_side_outputs() {
        eprintln!("[{label}] {}", render(&value));
    }

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            println!("{}", render(&result.output));
            if let Some(err) = &result.error {
                eprintln!("sift: {err}");
            }
        }
    }

    Ok(if result.is_complete { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Text prints as-is; everything else as JSON.
fn render(value: &Stream) -> String {
    match value {
        Stream::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.verbose > 0 {
        EnvFilter::new(cli.log_filter())
    } else {
        EnvFilter::try_from_env("SIFT_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let (config, errors) = Config::load_file(path)
        .with_context(|| format!("can't read config {}", path.display()))?;
    for err in errors {
        warn!(config = %path.display(), "{err}");
    }
    Ok(config)
}
