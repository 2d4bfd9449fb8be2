//! Aries wallet bootstrap entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (`-v` flags, then `RUST_LOG`, then config)
//!   4. Init logger once
//!   5. Open the preference scope, key vault and trust bundle loader
//!   6. Spawn the bootstrap orchestrator
//!   7. Spawn Ctrl-C → cancel watcher
//!   8. Wait for the terminal state and report it

use std::sync::Arc;

use tracing::{info, warn};

use aries_wallet_bootstrap::agent::local::LocalAgent;
use aries_wallet_bootstrap::bootstrap::{
    AssetDir, BUNDLED_ASSETS, BootstrapClient, BootstrapOrchestrator, BootstrapSettings,
    FilePreferences, KeyVault, ProvisioningRecord, ResourceSource, TrustBundleLoader,
};
use aries_wallet_bootstrap::{config, error, logger};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), error::AppError> {
    // Optional file.
    let _ = dotenvy::dotenv();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("error: {msg}");
            std::process::exit(2);
        }
    };
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    let force_cli_level = args.log_level.is_some();
    // Plain level names are checked up front; directive strings go to EnvFilter as-is.
    if !force_cli_level && !effective_log_level.contains(['=', ',']) {
        logger::parse_level(effective_log_level)?;
    }

    logger::init(effective_log_level, force_cli_level, config.log_file.as_deref())?;

    info!(
        label = %config.label,
        work_dir = %config.work_dir.display(),
        bootstrap_url = %config.bootstrap.base_url,
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let prefs = FilePreferences::open(&config.prefs_dir(), &config.wallet.preference_scope)?;
    let vault = KeyVault::new(Arc::new(prefs));

    let resources: Arc<dyn ResourceSource> = if config.wallet.assets_dir.is_dir() {
        Arc::new(AssetDir::new(&config.wallet.assets_dir))
    } else {
        warn!(
            assets_dir = %config.wallet.assets_dir.display(),
            "assets dir not found, using bundled genesis"
        );
        Arc::new(BUNDLED_ASSETS)
    };
    let trust_bundle = TrustBundleLoader::new(resources, config.files_dir());

    let record = ProvisioningRecord::read(&vault, &trust_bundle, &config.wallet.genesis_resource)?;
    info!(
        wallet_key = record.wallet_key.is_some(),
        trust_bundle_copied = record.trust_bundle_copied,
        "provisioning state"
    );

    let client = BootstrapClient::new(&config.bootstrap.base_url, config.bootstrap.timeout_seconds)?;
    let agent = Arc::new(LocalAgent::new(config.wallet_dir(), config.agent.reuse_connections));

    let orchestrator = BootstrapOrchestrator::new(
        client,
        agent.clone(),
        vault,
        trust_bundle,
        BootstrapSettings::from_config(&config),
    );
    let handle = orchestrator.spawn();

    // Ctrl-C cancels the bootstrap at its next suspension point.
    let ctrlc_token = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, cancelling bootstrap");
            ctrlc_token.cancel();
        }
    });

    let outcome = handle.wait().await?;

    if outcome.newly_provisioned {
        println!("✓ Wallet provisioned");
    }
    println!("✓ Connected to {}", outcome.their_label());
    info!(connections = agent.connections().await.len(), "bootstrap complete");

    Ok(())
}

const USAGE: &str = "\
Usage: aries-wallet-bootstrap [OPTIONS]

Provision the wallet key and trust bundle, open the agent and connect to the
invitation served by the bootstrap endpoint.

Options:
  -h, --help             Print help
  -f, --config <PATH>    Configuration file (default: config/default.toml)
  -v, -vv, -vvv, -vvvv   Log at warn, info, debug or trace, overriding RUST_LOG";

#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    help: bool,
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

/// Parse arguments (without the program name). Unknown arguments are ignored.
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut verbosity = 0u8;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--" => break,
            "-h" | "--help" => cli.help = true,
            "-f" | "--config" => {
                let path = iter.next().ok_or("-f/--config requires a path argument")?;
                cli.config_path = Some(path);
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.len() > 1 && a.starts_with('-') && a[1..].bytes().all(|b| b == b'v') => {
                verbosity = verbosity.saturating_add(u8::try_from(a.len() - 1).unwrap_or(u8::MAX));
            }
            _ => {}
        }
    }

    cli.log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };
    Ok(cli)
}
