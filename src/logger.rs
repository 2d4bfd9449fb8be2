//! Diagnostics output for the bootstrap binary.
//!
//! Every stage of a bootstrap run (state transitions, endpoint lookups, agent
//! initialization) reports through `tracing`. This module installs the single
//! subscriber that renders those events, either to stderr or to the file named
//! by `[app].log_file`. Key material never reaches it: `WalletKey` prints as
//! `[REDACTED]`.

use std::fs::{self, OpenOptions};
use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::AppError;

/// Install the process-wide subscriber. Fails if one is already set.
///
/// `level` is a level name or an `EnvFilter` directive such as
/// `aries_wallet_bootstrap=debug,reqwest=warn`. When `cli_override` is set
/// (the user passed `-v`), `level` beats `RUST_LOG`; otherwise `RUST_LOG`
/// beats the configured level.
pub fn init(level: &str, cli_override: bool, log_file: Option<&Path>) -> Result<(), AppError> {
    let filter = build_filter(level, cli_override)?;
    let writer = match log_file {
        Some(path) => file_writer(path)?,
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

fn build_filter(level: &str, cli_override: bool) -> Result<EnvFilter, AppError> {
    if !cli_override {
        return EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")));
    }
    EnvFilter::try_new(level).or_else(|level_err| {
        EnvFilter::try_from_default_env().map_err(|env_err| {
            AppError::Logger(format!(
                "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
            ))
        })
    })
}

/// Append-mode log file under the work dir; its directory may not exist yet
/// on a first run.
fn file_writer(path: &Path) -> Result<BoxMakeWriter, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Logger(format!("cannot create log dir '{}': {e}", parent.display()))
        })?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path).map_err(|e| {
        AppError::Logger(format!("failed to open log file '{}': {e}", path.display()))
    })?;
    Ok(BoxMakeWriter::new(file))
}

/// Check a plain level name from `[app].log_level` or `ARIES_LOG_LEVEL`.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}
