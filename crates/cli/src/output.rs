// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → structured JSON.
// `--json` flag forces JSON output regardless of terminal.

use scout_sync::config::{ConfigError, ENV_ACCESS_TOKEN, ENV_API_KEY, ENV_BACKEND_URL};
use scout_sync::SyncError;

use serde::Serialize;
use std::io::{self, IsTerminal, Write};

use crate::exit_code::{sync_cause, ExitCode};

const ANSI_RED: &str = "\x1b[31m";
const ANSI_RESET: &str = "\x1b[0m";

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Human,
    /// Machine-readable JSON (one object per line).
    Json,
}

impl OutputFormat {
    /// Auto-detect format: JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    /// Testable variant that takes an explicit `is_tty` flag.
    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Write a value to stdout in the selected format.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let mut out = io::stdout().lock();
    write_output(&mut out, format, value, human_fn)?;
    out.flush()
}

/// Write a value to a provided writer.
///
/// - `Human`: calls `human_fn` to produce a human-readable string.
/// - `Json`: serializes `value` as a single JSON line.
pub fn write_output<W, T, F>(
    writer: &mut W,
    format: OutputFormat,
    value: &T,
    human_fn: F,
) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => {
            writeln!(writer, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    let _ = write_error(&mut err, format, code, message, io::stderr().is_terminal());
}

fn write_error<W: Write>(
    writer: &mut W,
    format: OutputFormat,
    code: &str,
    message: &str,
    is_tty: bool,
) -> io::Result<()> {
    match format {
        OutputFormat::Human => {
            let line = if is_tty {
                format!("{ANSI_RED}error:{ANSI_RESET} {message}")
            } else {
                format!("error: {message}")
            };
            writeln!(writer, "{line}")
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            });
            serde_json::to_writer(&mut *writer, &obj).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

/// Print a mapped, actionable error for a command failure.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    print_error(format, code, &message);
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");
    let missing_config = error.chain().any(|cause| cause.downcast_ref::<ConfigError>().is_some());
    if missing_config {
        return (
            "NOT_CONFIGURED",
            format!(
                "{message}. Set {ENV_BACKEND_URL} and {ENV_API_KEY}, or edit ~/.scout/config.toml"
            ),
        );
    }

    match ExitCode::from_error(error) {
        ExitCode::Auth => (
            "AUTH_FAILURE",
            format!("Authentication failed ({message}). Set {ENV_ACCESS_TOKEN} to a valid session token."),
        ),
        ExitCode::Network => ("NETWORK_ERROR", format!("{message}. Check your connection and retry.")),
        ExitCode::Conflict => ("INVALID_STATE", message),
        ExitCode::Usage => ("USAGE", message),
        ExitCode::NotConfigured => ("NOT_CONFIGURED", message),
        _ if is_action_failure(error) => ("ACTION_FAILED", message),
        _ => ("ERROR", message),
    }
}

fn is_action_failure(error: &anyhow::Error) -> bool {
    matches!(sync_cause(error), Some(SyncError::Rpc(_)))
}
