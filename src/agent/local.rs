//! Local agent runtime.
//!
//! Keeps just enough wallet state on disk to make the bootstrap sequence
//! meaningful across restarts:
//!
//! ```text
//! <work_dir>/wallet/
//! └── <label-slug>-<label-hash>/
//!     ├── wallet.json        key check + label, written on first open
//!     └── connections.json   accepted connections
//! ```
//!
//! Opening an existing wallet with a different key fails, the way an
//! encrypted store rejects the wrong master key. A wallet directory is open
//! in at most one [`LocalAgent`] per process at a time. Message packing and
//! transports live outside this crate; connections are recorded in the
//! `Requested` state until the inviter's response is processed elsewhere.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex as StdMutex, OnceLock, PoisonError};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::invitation::{Invitation, parse_invitation_url};
use super::{
    AgentSession, AutoAcceptCredential, AutoAcceptProof, BootstrapConfig, Connection,
    ConnectionState, InitGate, MediatorPickupStrategy, OutOfBandRecord, WalletKey,
};
use crate::bootstrap::atomic;
use crate::error::BootstrapError;

const WALLET_META: &str = "wallet.json";
const CONNECTIONS_FILE: &str = "connections.json";
const KEY_CHECK_DOMAIN: &[u8] = b"aries-wallet-bootstrap/key-check/v1";
const PAIRWISE_DOMAIN: &[u8] = b"aries-wallet-bootstrap/pairwise/v1";

#[derive(Debug, Serialize, Deserialize)]
struct WalletMeta {
    key_check: String,
    label: String,
    created_at: DateTime<Utc>,
}

/// Exclusive hold on one wallet directory within this process.
/// Released when dropped.
#[derive(Debug)]
struct WalletClaim {
    dir: PathBuf,
}

fn open_wallets() -> &'static StdMutex<HashSet<PathBuf>> {
    static OPEN_WALLETS: OnceLock<StdMutex<HashSet<PathBuf>>> = OnceLock::new();
    OPEN_WALLETS.get_or_init(Default::default)
}

impl WalletClaim {
    fn acquire(dir: &Path) -> Result<Self, BootstrapError> {
        let mut open = open_wallets().lock().unwrap_or_else(PoisonError::into_inner);
        if !open.insert(dir.to_path_buf()) {
            return Err(BootstrapError::AgentInit(format!(
                "wallet {} is already open in this process",
                dir.display()
            )));
        }
        Ok(Self { dir: dir.to_path_buf() })
    }
}

impl Drop for WalletClaim {
    fn drop(&mut self) {
        open_wallets().lock().unwrap_or_else(PoisonError::into_inner).remove(&self.dir);
    }
}

#[derive(Debug)]
struct OpenWallet {
    _claim: WalletClaim,
    dir: PathBuf,
    key: WalletKey,
    mediator: Invitation,
    pickup_strategy: MediatorPickupStrategy,
    auto_accept_credential: AutoAcceptCredential,
    auto_accept_proof: AutoAcceptProof,
    connections: Vec<Connection>,
}

#[derive(Debug)]
pub struct LocalAgent {
    wallet_root: PathBuf,
    reuse_connections: bool,
    gate: InitGate,
    wallet: Mutex<Option<OpenWallet>>,
}

impl LocalAgent {
    /// `reuse_connections`: accepting an invitation whose `@id` already
    /// produced a connection returns that connection instead of a new one.
    pub fn new(wallet_root: impl Into<PathBuf>, reuse_connections: bool) -> Self {
        Self {
            wallet_root: wallet_root.into(),
            reuse_connections,
            gate: InitGate::new(),
            wallet: Mutex::new(None),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.gate.is_ready()
    }

    pub async fn connections(&self) -> Vec<Connection> {
        self.wallet
            .lock()
            .await
            .as_ref()
            .map(|w| w.connections.clone())
            .unwrap_or_default()
    }

    /// `@id` of the mediator invitation the wallet was opened with.
    pub async fn mediator_invitation_id(&self) -> Option<String> {
        self.wallet.lock().await.as_ref().map(|w| w.mediator.id.clone())
    }
}

impl AgentSession for LocalAgent {
    async fn initialize(&self, config: BootstrapConfig) -> Result<(), BootstrapError> {
        let permit = self.gate.begin()?;

        let genesis_txns = validate_trust_bundle(&config.trust_bundle_path)?;
        let mediator = parse_invitation_url(&config.mediator_invitation_url)
            .map_err(|e| BootstrapError::AgentInit(format!("invalid mediator invitation: {e}")))?;
        if config.pickup_strategy == MediatorPickupStrategy::PickUpV1
            && !mediator.establishes_connection()
        {
            return Err(BootstrapError::AgentInit(
                "pickup v1 needs a mediator invitation with a handshake protocol".into(),
            ));
        }

        let dir = self.wallet_root.join(wallet_dir_name(&config.label));
        fs::create_dir_all(&dir).map_err(|e| {
            BootstrapError::AgentInit(format!("cannot create wallet dir {}: {e}", dir.display()))
        })?;
        let dir = fs::canonicalize(&dir).map_err(|e| {
            BootstrapError::AgentInit(format!("cannot resolve wallet dir {}: {e}", dir.display()))
        })?;
        let claim = WalletClaim::acquire(&dir)?;
        open_or_create_wallet(&dir, &config.wallet_key, &config.label)?;
        let connections = load_connections(&dir)?;

        info!(
            wallet = %dir.display(),
            genesis_txns,
            mediator = %mediator.label.as_deref().unwrap_or(&mediator.id),
            pickup = ?config.pickup_strategy,
            connections = connections.len(),
            "wallet opened"
        );

        *self.wallet.lock().await = Some(OpenWallet {
            _claim: claim,
            dir,
            key: config.wallet_key,
            mediator,
            pickup_strategy: config.pickup_strategy,
            auto_accept_credential: config.auto_accept_credential,
            auto_accept_proof: config.auto_accept_proof,
            connections,
        });
        permit.complete();
        Ok(())
    }

    async fn receive_invitation(
        &self,
        url: &str,
    ) -> Result<(OutOfBandRecord, Option<Connection>), BootstrapError> {
        let invitation = parse_invitation_url(url)?;

        let mut guard = self.wallet.lock().await;
        let wallet = guard
            .as_mut()
            .ok_or_else(|| BootstrapError::Connection("agent is not initialized".into()))?;

        let now = Utc::now();
        let mut record = OutOfBandRecord {
            id: Uuid::new_v4(),
            invitation_id: invitation.id.clone(),
            their_label: invitation.label.clone(),
            reused_connection: false,
            created_at: now,
        };

        if !invitation.establishes_connection() {
            debug!(invitation_id = %invitation.id, "connectionless invitation received");
            return Ok((record, None));
        }

        if self.reuse_connections
            && let Some(existing) =
                wallet.connections.iter().find(|c| c.invitation_id == invitation.id)
        {
            info!(connection_id = %existing.id, "invitation already accepted, reusing connection");
            record.reused_connection = true;
            return Ok((record, Some(existing.clone())));
        }

        let id = Uuid::new_v4();
        let connection = Connection {
            id,
            invitation_id: invitation.id.clone(),
            their_label: invitation.label.clone(),
            my_verkey: pairwise_verkey(&wallet.key, &invitation.id, &id),
            state: ConnectionState::Requested,
            created_at: now,
        };
        wallet.connections.push(connection.clone());
        if let Err(e) = save_connections(&wallet.dir, &wallet.connections) {
            wallet.connections.pop();
            return Err(e);
        }

        debug!(
            connection_id = %connection.id,
            auto_accept_credential = ?wallet.auto_accept_credential,
            auto_accept_proof = ?wallet.auto_accept_proof,
            pickup = ?wallet.pickup_strategy,
            "connection requested"
        );
        Ok((record, Some(connection)))
    }
}

// ── internals ────────────────────────────────────────────────────────────────

/// Filesystem-safe directory name for a wallet label.
///
/// The slug keeps the name readable; the suffix (first 8 hex digits of the
/// label's SHA-256) keeps labels that slug alike apart.
fn wallet_dir_name(label: &str) -> String {
    let label = label.trim();
    let slug: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = match slug.trim_matches('-') {
        "" => "wallet",
        s => s,
    };
    let digest = hex::encode(Sha256::digest(label.as_bytes()));
    format!("{slug}-{}", &digest[..8])
}

/// Every non-blank line must be a JSON object. Returns the transaction count.
fn validate_trust_bundle(path: &Path) -> Result<usize, BootstrapError> {
    let data = fs::read_to_string(path).map_err(|e| {
        BootstrapError::AgentInit(format!("cannot read trust bundle {}: {e}", path.display()))
    })?;
    let mut count = 0;
    for (n, line) in data.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
            BootstrapError::AgentInit(format!("corrupt trust bundle at line {}: {e}", n + 1))
        })?;
        if !value.is_object() {
            return Err(BootstrapError::AgentInit(format!(
                "corrupt trust bundle at line {}: not a transaction",
                n + 1
            )));
        }
        count += 1;
    }
    if count == 0 {
        return Err(BootstrapError::AgentInit("trust bundle is empty".into()));
    }
    Ok(count)
}

fn key_check(key: &WalletKey) -> String {
    let digest = Sha256::new()
        .chain_update(KEY_CHECK_DOMAIN)
        .chain_update(key.as_bytes())
        .finalize();
    hex::encode(digest)
}

fn open_or_create_wallet(dir: &Path, key: &WalletKey, label: &str) -> Result<(), BootstrapError> {
    let meta_path = dir.join(WALLET_META);

    match fs::read_to_string(&meta_path) {
        Ok(data) => {
            let meta: WalletMeta = serde_json::from_str(&data).map_err(|e| {
                BootstrapError::AgentInit(format!("corrupt {}: {e}", meta_path.display()))
            })?;
            if meta.key_check != key_check(key) {
                return Err(BootstrapError::AgentInit(
                    "wallet key does not match the existing wallet".into(),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            let meta = WalletMeta {
                key_check: key_check(key),
                label: label.to_string(),
                created_at: Utc::now(),
            };
            let data = serde_json::to_vec_pretty(&meta)
                .map_err(|e| BootstrapError::AgentInit(format!("serialise wallet meta: {e}")))?;
            atomic::write_atomic(&meta_path, &data).map_err(|e| {
                BootstrapError::AgentInit(format!("cannot write {}: {e}", meta_path.display()))
            })?;
            info!(wallet = %dir.display(), "created new wallet");
            Ok(())
        }
        Err(e) => Err(BootstrapError::AgentInit(format!(
            "cannot read {}: {e}",
            meta_path.display()
        ))),
    }
}

fn load_connections(dir: &Path) -> Result<Vec<Connection>, BootstrapError> {
    let path = dir.join(CONNECTIONS_FILE);
    match fs::read_to_string(&path) {
        Ok(data) => serde_json::from_str(&data).map_err(|e| {
            BootstrapError::AgentInit(format!("corrupt {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(BootstrapError::AgentInit(format!("cannot read {}: {e}", path.display()))),
    }
}

fn save_connections(dir: &Path, connections: &[Connection]) -> Result<(), BootstrapError> {
    let path = dir.join(CONNECTIONS_FILE);
    let data = serde_json::to_vec_pretty(connections)
        .map_err(|e| BootstrapError::Connection(format!("serialise connections: {e}")))?;
    atomic::write_atomic(&path, &data).map_err(|e| {
        BootstrapError::Connection(format!("cannot persist connection to {}: {e}", path.display()))
    })
}

/// Pairwise ed25519 verkey, derived so no extra secret has to be stored.
fn pairwise_verkey(key: &WalletKey, invitation_id: &str, connection_id: &Uuid) -> String {
    let digest = Sha256::new()
        .chain_update(PAIRWISE_DOMAIN)
        .chain_update(key.as_bytes())
        .chain_update(invitation_id.as_bytes())
        .chain_update(connection_id.as_bytes())
        .finalize();
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    let verifying = SigningKey::from_bytes(&seed).verifying_key();
    URL_SAFE_NO_PAD.encode(verifying.to_bytes())
}

// ── tests ─────────────────────────────────────────────────────────────────────
