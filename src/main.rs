//! Purpose: `xtlog` CLI entry point.
//! Role: Binary crate root; parses args, builds the store client, emits results on stdout.
//! Invariants: Receipts and status results are JSON; store bodies are printed verbatim.
//! Invariants: Non-interactive errors and notices are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use xtlog::api::{
    ClientConfig, Encoding, Error, ErrorKind, EventSink, Notice, StoreClient, TxReceipt,
    to_exit_code,
};
use xtlog::notice::notice_json;

const DEFAULT_SYNC_TIMEOUT_MS: u64 = 10_000;

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
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
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
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint(clap_error_hint(&err)),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();
    let color_mode = cli.color;
    let client = build_client(&cli)
        .map(|client| client.with_event_sink(Arc::new(StderrNotices { color_mode })))
        .map_err(|err| (err, color_mode))?;

    command_dispatch::dispatch_command(cli.command, &client)
        .map_err(add_transport_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "xtlog",
    version,
    about = "Consistency-aware client for a bitemporal document store",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Writes wait until the store has indexed them, so reads see them.

Mental model:
  - `put` / `evict` submit a transaction and await its indexing
  - `entity` reads the current version (or history) of one document
  - `query` runs a datalog query and keeps the first column of each row
"#,
    after_help = r#"EXAMPLES
  $ echo '{:xt/id "user-1" :name "ada"}' | xtlog put
  $ xtlog entity user-1
  $ xtlog entity user-1 --history --order desc --with-docs
  $ echo '{:find [e] :where [[e :name "ada"]]}' | xtlog query
  $ xtlog evict user-1

ENVIRONMENT
  XTDB_ADDRESS            store address (default http://localhost:3000)
  XTDB_AWAIT_TIMEOUT_MS   await-tx timeout in milliseconds (default 5000)
  RUST_LOG                log filter for stderr diagnostics (default warn)"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Store address (overrides XTDB_ADDRESS)",
        value_hint = ValueHint::Url
    )]
    address: Option<String>,
    #[arg(
        long,
        global = true,
        value_name = "MS",
        help = "Server-side bound for awaiting submitted transactions (overrides XTDB_AWAIT_TIMEOUT_MS)"
    )]
    await_timeout_ms: Option<u64>,
    #[arg(
        long,
        global = true,
        value_name = "MS",
        help = "Per-request transport timeout (default: none)"
    )]
    request_timeout_ms: Option<u64>,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FormatCli {
    Edn,
    Json,
}

impl From<FormatCli> for Encoding {
    fn from(value: FormatCli) -> Self {
        match value {
            FormatCli::Edn => Encoding::Edn,
            FormatCli::Json => Encoding::Json,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OrderCli {
    Asc,
    Desc,
}

impl OrderCli {
    fn as_str(self) -> &'static str {
        match self {
            OrderCli::Asc => "asc",
            OrderCli::Desc => "desc",
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Put documents in one transaction and await indexing",
        long_about = r#"Put documents in one transaction and await indexing.

Input is read from FILE, or stdin when FILE is omitted or `-`.
  edn:  one or more maps, whitespace separated
  json: one object, an array of objects, or one object per line

Every document must carry its identity under `xt/id`."#,
        after_help = r#"EXAMPLES
  $ xtlog put users.edn
  $ xtlog put --format json users.json
  $ echo '{"xt/id": "user-1", "name": "ada"}' | xtlog put --format json

NOTES
  - Prints the receipt: {"tx_id": N, "tx_time": "..."}
  - A failed await is reported as a notice on stderr; the put still succeeds"#
    )]
    Put {
        #[arg(long, value_enum, default_value = "edn", help = "Input encoding")]
        format: FormatCli,
        #[arg(help = "Input file (default: stdin)", value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,
    },
    #[command(
        about = "Evict documents (all versions) by identity",
        after_help = r#"EXAMPLES
  $ xtlog evict user-1
  $ xtlog evict user-1 user-2"#
    )]
    Evict {
        #[arg(required = true, help = "Document identities")]
        ids: Vec<String>,
    },
    #[command(
        about = "Read one document, or its history",
        after_help = r#"EXAMPLES
  $ xtlog entity user-1
  $ xtlog entity user-1 --format json
  $ xtlog entity user-1 --history --order desc --with-docs

NOTES
  - Prints the store's body verbatim
  - An absent document prints `nil` (edn) or `null` (json)"#
    )]
    Entity {
        #[arg(help = "Document identity")]
        id: String,
        #[arg(long, help = "Read the document's version history")]
        history: bool,
        #[arg(
            long,
            value_enum,
            default_value = "asc",
            requires = "history",
            help = "History order"
        )]
        order: OrderCli,
        #[arg(long, requires = "history", help = "Include documents in history entries")]
        with_docs: bool,
        #[arg(long, value_enum, default_value = "edn", help = "Response encoding")]
        format: FormatCli,
    },
    #[command(
        about = "Run a query and keep the first column of each row",
        after_help = r#"EXAMPLES
  $ echo '{:find [(pull e [*])] :where [[e :xt/id]]}' | xtlog query
  $ xtlog query --raw q.edn

NOTES
  - Input is read from FILE, or stdin when FILE is omitted or `-`
  - --raw prints the store's rows untouched"#
    )]
    Query {
        #[arg(long, value_enum, default_value = "edn", help = "Query and result encoding")]
        format: FormatCli,
        #[arg(long, help = "Print result rows without normalization")]
        raw: bool,
        #[arg(help = "Query file (default: stdin)", value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,
    },
    #[command(
        about = "Wait until the store has indexed everything submitted so far",
        after_help = r#"NOTES
  - Retries failed polls until the timeout
  - On timeout, the error message lists every failed attempt"#
    )]
    Sync {
        #[arg(
            long,
            value_name = "MS",
            default_value_t = DEFAULT_SYNC_TIMEOUT_MS,
            help = "Give up after this many milliseconds"
        )]
        timeout_ms: u64,
    },
    #[command(about = "Wait until one transaction is indexed")]
    AwaitTx {
        #[arg(help = "Transaction id from a receipt")]
        tx_id: i64,
    },
}

fn build_client(cli: &Cli) -> Result<StoreClient, Error> {
    let mut config = ClientConfig::from_env()?;
    if let Some(address) = &cli.address {
        config.address = address.clone();
    }
    if let Some(ms) = cli.await_timeout_ms {
        config = config.with_await_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.request_timeout_ms {
        config = config.with_request_timeout(Duration::from_millis(ms));
    }
    StoreClient::with_config(config)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn read_input(file: Option<&PathBuf>) -> Result<Vec<u8>, Error> {
    match file {
        Some(path) if path.as_os_str() != "-" => fs::read(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read input file")
                .with_target(path.display().to_string())
                .with_source(err)
        }),
        _ => {
            if io::stdin().is_terminal() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("no input provided")
                    .with_hint("Pass a FILE, or pipe input on stdin."));
            }
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read stdin")
                    .with_source(err)
            })?;
            Ok(buf)
        }
    }
}

fn receipt_json(receipt: &TxReceipt) -> Value {
    let tx_time = receipt
        .tx_time
        .and_then(|time| time.format(&Rfc3339).ok());
    json!({ "tx_id": receipt.tx_id, "tx_time": tx_time })
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

fn emit_body(body: &[u8]) -> Result<(), Error> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(body)
        .and_then(|()| {
            if body.ends_with(b"\n") {
                Ok(())
            } else {
                stdout.write_all(b"\n")
            }
        })
        .and_then(|()| stdout.flush())
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write output")
                .with_source(err)
        })
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

/// Notices from the client go to stderr next to errors, in the same format.
struct StderrNotices {
    color_mode: ColorMode,
}

impl EventSink for StderrNotices {
    fn notice(&self, notice: Notice) {
        emit_notice(&notice, self.color_mode);
    }
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} ({})", notice.message, notice.op);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn add_transport_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() || err.op().is_none() {
        return err;
    }
    err.with_hint("Is the store running? Check --address or XTDB_ADDRESS.")
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Encoding => "record cannot be encoded".to_string(),
        ErrorKind::Decode => "malformed response".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Protocol => "unexpected response from store".to_string(),
        ErrorKind::Timeout => "timed out".to_string(),
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
    if let Some(op) = err.op() {
        inner.insert("op".to_string(), json!(op));
    }
    if let Some(target) = err.target() {
        inner.insert("target".to_string(), json!(target));
    }
    if let Some(tx_id) = err.tx_id() {
        inner.insert("tx_id".to_string(), json!(tx_id));
    }
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    if let Some(body) = err.body() {
        inner.insert("body".to_string(), json!(body));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(target) = err.target() {
        lines.push(format!(
            "{} {target}",
            colorize_label("target:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(status) = err.status() {
        lines.push(format!(
            "{} {status}",
            colorize_label("status:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(body) = err.body().filter(|body| !body.is_empty()) {
        lines.push(format!(
            "{} {body}",
            colorize_label("body:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `xtlog --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "xtlog") else {
        return "Try `xtlog --help`.".to_string();
    };

    let mut parts = Vec::new();
    for token in tokens.iter().skip(pos + 1) {
        if token.starts_with('-') || token.starts_with('<') || token.starts_with('[') {
            break;
        }
        parts.push(*token);
    }

    if parts.is_empty() {
        return "Try `xtlog --help`.".to_string();
    }
    format!("Try `xtlog {} --help`.", parts.join(" "))
}
