//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory (or
//! the path given with `-f`), then applies `ARIES_WORK_DIR`,
//! `ARIES_LOG_LEVEL` and `ARIES_BOOTSTRAP_URL` overrides.
//!
//! Only `[app]` is required; every other section falls back to defaults that
//! reproduce the sample wallet app (implicit pickup, always auto-accept).

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use url::Url;

use crate::agent::{AutoAcceptCredential, AutoAcceptProof, MediatorPickupStrategy};
use crate::error::AppError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Remote bootstrap endpoint settings.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Base URL; requests go to `<base_url>/url?key=<KEY>`.
    pub base_url: Url,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// Key that resolves to the mediator invitation.
    pub mediator_key: String,
    /// Key that resolves to the invitation the agent connects to.
    pub invitation_key: String,
}

/// Wallet provisioning settings.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Name of the preference scope holding the wallet key.
    pub preference_scope: String,
    /// Directory the bundled assets are read from.
    pub assets_dir: PathBuf,
    /// File name of the genesis transactions asset.
    pub genesis_resource: String,
}

/// Protocol policy handed to the agent runtime.
#[derive(Debug, Clone)]
pub struct AgentPolicy {
    pub mediator_pickup_strategy: MediatorPickupStrategy,
    pub auto_accept_credential: AutoAcceptCredential,
    pub auto_accept_proof: AutoAcceptProof,
    /// Return the existing connection when an invitation was already accepted.
    pub reuse_connections: bool,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Display label presented to other agents.
    pub label: String,
    /// Root of all persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub bootstrap: EndpointConfig,
    pub wallet: WalletConfig,
    pub agent: AgentPolicy,
}

impl Config {
    /// Private file storage; the trust bundle is materialized here.
    pub fn files_dir(&self) -> PathBuf {
        self.work_dir.join("files")
    }

    /// Directory holding one JSON file per preference scope.
    pub fn prefs_dir(&self) -> PathBuf {
        self.work_dir.join("shared_prefs")
    }

    /// Root directory of the agent wallet.
    pub fn wallet_dir(&self) -> PathBuf {
        self.work_dir.join("wallet")
    }
}

/// Values that take precedence over the TOML file.
///
/// [`load`] fills this from the environment; tests build it directly instead
/// of mutating process env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub work_dir: Option<String>,
    pub log_level: Option<String>,
    pub bootstrap_url: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            work_dir: env::var("ARIES_WORK_DIR").ok(),
            log_level: env::var("ARIES_LOG_LEVEL").ok(),
            bootstrap_url: env::var("ARIES_BOOTSTRAP_URL").ok(),
        }
    }
}

// ── raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    app: RawApp,
    #[serde(default)]
    bootstrap: RawBootstrap,
    #[serde(default)]
    wallet: RawWallet,
    #[serde(default)]
    agent: RawAgent,
}

#[derive(Deserialize)]
struct RawApp {
    label: String,
    work_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

#[derive(Deserialize)]
struct RawBootstrap {
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_mediator_key")]
    mediator_key: String,
    #[serde(default = "default_invitation_key")]
    invitation_key: String,
}

impl Default for RawBootstrap {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout_seconds(),
            mediator_key: default_mediator_key(),
            invitation_key: default_invitation_key(),
        }
    }
}

#[derive(Deserialize)]
struct RawWallet {
    #[serde(default = "default_preference_scope")]
    preference_scope: String,
    #[serde(default = "default_assets_dir")]
    assets_dir: String,
    #[serde(default = "default_genesis_resource")]
    genesis_resource: String,
}

impl Default for RawWallet {
    fn default() -> Self {
        Self {
            preference_scope: default_preference_scope(),
            assets_dir: default_assets_dir(),
            genesis_resource: default_genesis_resource(),
        }
    }
}

#[derive(Deserialize)]
struct RawAgent {
    #[serde(default)]
    mediator_pickup_strategy: MediatorPickupStrategy,
    #[serde(default)]
    auto_accept_credential: AutoAcceptCredential,
    #[serde(default)]
    auto_accept_proof: AutoAcceptProof,
    #[serde(default = "default_true")]
    reuse_connections: bool,
}

impl Default for RawAgent {
    fn default() -> Self {
        Self {
            mediator_pickup_strategy: MediatorPickupStrategy::default(),
            auto_accept_credential: AutoAcceptCredential::default(),
            auto_accept_proof: AutoAcceptProof::default(),
            reuse_connections: true,
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_base_url() -> String { "http://es6.kr/".to_string() }
fn default_timeout_seconds() -> u64 { 15 }
fn default_mediator_key() -> String { "MEDIATOR_URL".to_string() }
fn default_invitation_key() -> String { "INVITATION_URL".to_string() }
fn default_preference_scope() -> String { "aries-framework-kotlin-sample".to_string() }
fn default_assets_dir() -> String { "assets".to_string() }
fn default_genesis_resource() -> String { "test-genesis.txn".to_string() }
fn default_true() -> bool { true }

// ── loading ───────────────────────────────────────────────────────────────────

/// Load config from `path` (or [`DEFAULT_CONFIG_PATH`]), then apply env overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let path = Path::new(path.unwrap_or(DEFAULT_CONFIG_PATH));
    load_from(path, &Overrides::from_env())
}

/// Load from an explicit path with explicit overrides.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse(&raw, overrides)
        .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
}

fn parse(raw: &str, overrides: &Overrides) -> Result<Config, String> {
    let parsed: RawConfig = toml::from_str(raw).map_err(|e| format!("parse error: {e}"))?;

    let app = parsed.app;
    if app.label.trim().is_empty() {
        return Err("[app].label must not be empty".into());
    }

    let work_dir = expand_home(overrides.work_dir.as_deref().unwrap_or(&app.work_dir));
    let log_level = overrides.log_level.clone().unwrap_or(app.log_level);
    let log_file = app.log_file.map(|f| {
        let path = expand_home(&f);
        if path.is_absolute() { path } else { work_dir.join(path) }
    });

    let b = parsed.bootstrap;
    let base_url_str = overrides.bootstrap_url.as_deref().unwrap_or(&b.base_url);
    let base_url = Url::parse(base_url_str)
        .map_err(|e| format!("invalid bootstrap base_url '{base_url_str}': {e}"))?;
    if b.timeout_seconds == 0 {
        return Err("[bootstrap].timeout_seconds must be greater than zero".into());
    }

    let w = parsed.wallet;
    if w.genesis_resource.contains(['/', '\\']) {
        return Err(format!(
            "[wallet].genesis_resource must be a bare file name, got '{}'",
            w.genesis_resource
        ));
    }

    Ok(Config {
        label: app.label,
        work_dir,
        log_level,
        log_file,
        bootstrap: EndpointConfig {
            base_url,
            timeout_seconds: b.timeout_seconds,
            mediator_key: b.mediator_key,
            invitation_key: b.invitation_key,
        },
        wallet: WalletConfig {
            preference_scope: w.preference_scope,
            assets_dir: expand_home(&w.assets_dir),
            genesis_resource: w.genesis_resource,
        },
        agent: AgentPolicy {
            mediator_pickup_strategy: parsed.agent.mediator_pickup_strategy,
            auto_accept_credential: parsed.agent.auto_accept_credential,
            auto_accept_proof: parsed.agent.auto_accept_proof,
            reuse_connections: parsed.agent.reuse_connections,
        },
    })
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    if path == "~"
        && let Some(home) = dirs::home_dir()
    {
        return home;
    }
    PathBuf::from(path)
}

// ── programmatic construction ──────────────────────────────────────────────────────────────

impl Config {
    /// Config rooted at `work_dir` with sample-app defaults.
    ///
    /// No file or env access; used by tests and embedding hosts.
    pub fn with_work_dir(work_dir: &Path, assets_dir: &Path, base_url: Url) -> Self {
        Self {
            label: "SampleApp".into(),
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            bootstrap: EndpointConfig {
                base_url,
                timeout_seconds: 1,
                mediator_key: default_mediator_key(),
                invitation_key: default_invitation_key(),
            },
            wallet: WalletConfig {
                preference_scope: default_preference_scope(),
                assets_dir: assets_dir.to_path_buf(),
                genesis_resource: default_genesis_resource(),
            },
            agent: AgentPolicy {
                mediator_pickup_strategy: MediatorPickupStrategy::Implicit,
                auto_accept_credential: AutoAcceptCredential::Always,
                auto_accept_proof: AutoAcceptProof::Always,
                reuse_connections: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[app]
label = "SampleApp"
work_dir = "~/.aries-wallet"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_sample_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.label, "SampleApp");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.bootstrap.base_url.as_str(), "http://es6.kr/");
        assert_eq!(cfg.bootstrap.mediator_key, "MEDIATOR_URL");
        assert_eq!(cfg.bootstrap.invitation_key, "INVITATION_URL");
        assert_eq!(cfg.wallet.preference_scope, "aries-framework-kotlin-sample");
        assert_eq!(cfg.wallet.genesis_resource, "test-genesis.txn");
        assert_eq!(cfg.agent.mediator_pickup_strategy, MediatorPickupStrategy::Implicit);
        assert_eq!(cfg.agent.auto_accept_credential, AutoAcceptCredential::Always);
        assert_eq!(cfg.agent.auto_accept_proof, AutoAcceptProof::Always);
        assert!(cfg.agent.reuse_connections);
    }

    #[test]
    fn agent_section_parses_snake_case_policies() {
        let f = write_toml(
            r#"
[app]
label = "Holder"
work_dir = "/tmp/holder"

[agent]
mediator_pickup_strategy = "pick_up_v1"
auto_accept_credential = "never"
auto_accept_proof = "content_approved"
reuse_connections = false
"#,
        );
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.agent.mediator_pickup_strategy, MediatorPickupStrategy::PickUpV1);
        assert_eq!(cfg.agent.auto_accept_credential, AutoAcceptCredential::Never);
        assert_eq!(cfg.agent.auto_accept_proof, AutoAcceptProof::ContentApproved);
        assert!(!cfg.agent.reuse_connections);
    }

    #[test]
    fn overrides_take_precedence() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides {
            work_dir: Some("/tmp/override".into()),
            log_level: Some("debug".into()),
            bootstrap_url: Some("http://localhost:3001/".into()),
        };
        let cfg = load_from(f.path(), &overrides).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/override"));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.bootstrap.base_url.as_str(), "http://localhost:3001/");
    }

    #[test]
    fn relative_log_file_lands_under_work_dir() {
        let f = write_toml(
            r#"
[app]
label = "SampleApp"
work_dir = "/srv/wallet"
log_file = "logs/bootstrap.log"
"#,
        );
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.log_file, Some(PathBuf::from("/srv/wallet/logs/bootstrap.log")));
    }

    #[test]
    fn invalid_base_url_errors() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides { bootstrap_url: Some("not a url".into()), ..Default::default() };
        let err = load_from(f.path(), &overrides).unwrap_err();
        assert!(err.to_string().contains("invalid bootstrap base_url"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let f = write_toml(
            r#"
[app]
label = "SampleApp"
work_dir = "/tmp/x"

[bootstrap]
timeout_seconds = 0
"#,
        );
        assert!(load_from(f.path(), &Overrides::default()).is_err());
    }

    #[test]
    fn genesis_resource_must_be_bare_name() {
        let f = write_toml(
            r#"
[app]
label = "SampleApp"
work_dir = "/tmp/x"

[wallet]
genesis_resource = "../escape.txn"
"#,
        );
        let err = load_from(f.path(), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("bare file name"));
    }

    #[test]
    fn missing_file_errors() {
        let err = load_from(Path::new("/nonexistent/config.toml"), &Overrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("config error"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.aries-wallet");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".aries-wallet"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn derived_dirs_hang_off_work_dir() {
        let base = Url::parse("http://127.0.0.1:9/").unwrap();
        let cfg = Config::with_work_dir(Path::new("/w"), Path::new("/a"), base);
        assert_eq!(cfg.files_dir(), PathBuf::from("/w/files"));
        assert_eq!(cfg.prefs_dir(), PathBuf::from("/w/shared_prefs"));
        assert_eq!(cfg.wallet_dir(), PathBuf::from("/w/wallet"));
    }
}
