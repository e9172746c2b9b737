//! Purpose: `poolside` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits errors on stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr; TTY errors as text.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Version mismatches never change the exit code.
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod command_dispatch;
mod serve;

use poolside::api::{Error, ErrorKind, to_exit_code};

const DEFAULT_BIND: &str = "127.0.0.1:9780";
const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `poolside --help` for usage."));
            }
        },
    };

    command_dispatch::dispatch_command(cli.command)
}

#[derive(Parser)]
#[command(
    name = "poolside",
    version,
    about = "Pooled interpreter contexts over HTTP, with byte-counted responses",
    after_help = r#"EXAMPLES
  $ poolside serve --prelude prelude.json --prewarm 4
  $ curl http://127.0.0.1:9780/v0/globals
  $ poolside versions --terse"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Serve pooled runtime contexts over HTTP (loopback by default)")]
    Serve {
        #[arg(
            long,
            default_value = DEFAULT_BIND,
            help = "Bind address",
            help_heading = "Connection"
        )]
        bind: String,
        #[arg(
            long,
            help = "Allow non-loopback binds",
            help_heading = "Connection"
        )]
        allow_non_loopback: bool,
        #[arg(
            long,
            value_name = "PATH",
            help = "JSON object loaded as initial globals of every new context",
            value_hint = ValueHint::FilePath,
            help_heading = "Contexts"
        )]
        prelude: Option<PathBuf>,
        #[arg(
            long,
            default_value_t = 0,
            help = "Contexts to construct before accepting requests",
            help_heading = "Contexts"
        )]
        prewarm: usize,
        #[arg(
            long,
            default_value_t = DEFAULT_MAX_BODY_BYTES,
            help = "Max request body size in bytes",
            help_heading = "Safety"
        )]
        max_body_bytes: u64,
    },
    #[command(about = "Check compiled-in component versions against their targets")]
    Versions {
        #[arg(long, help = "Mention only the required version on mismatch")]
        terse: bool,
        #[arg(long, help = "Emit a JSON report instead of text lines")]
        json: bool,
        #[arg(long, default_value = "  ", help = "Prefix for each text line")]
        indent: String,
    },
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn parse_bind(bind: &str) -> Result<SocketAddr, Error> {
    bind.parse().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid bind address")
            .with_hint(format!("Use a host:port value like {DEFAULT_BIND}."))
    })
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .next()
        .unwrap_or("invalid arguments")
        .trim_start_matches("error: ")
        .to_string()
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Factory => "context construction failed".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}
