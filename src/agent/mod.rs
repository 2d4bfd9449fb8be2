//! Agent runtime boundary.
//!
//! The bootstrap sequence only needs three things from the identity agent:
//! a key-generation primitive ([`generate_key`]), a one-shot
//! [`AgentSession::initialize`], and [`AgentSession::receive_invitation`].
//! Everything else the runtime does (DIDComm packing, transports, protocol
//! handlers) stays behind this boundary.
//!
//! [`local::LocalAgent`] is the runtime shipped with the binary; tests inject
//! their own [`AgentSession`] implementations.

pub mod invitation;
pub mod local;

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::BootstrapError;

// ── WalletKey ─────────────────────────────────────────────────────────────────

/// Master key the wallet is encrypted with.
///
/// Redacted in `Debug`, zeroed on drop. The only textual form is
/// [`WalletKey::encode`], which is reserved for the preference store.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct WalletKey(Vec<u8>);

impl WalletKey {
    /// Length of freshly generated keys in bytes.
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Storage encoding (unpadded base64url).
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    /// Inverse of [`WalletKey::encode`]. Empty or undecodable input is a
    /// storage error: the persisted record is corrupt.
    pub fn decode(encoded: &str) -> Result<Self, BootstrapError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| BootstrapError::Storage(format!("stored wallet key is corrupt: {e}")))?;
        if bytes.is_empty() {
            return Err(BootstrapError::Storage("stored wallet key is empty".into()));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WalletKey([REDACTED])")
    }
}

/// Generate a new random wallet key from the OS CSPRNG.
pub fn generate_key() -> WalletKey {
    let mut bytes = vec![0u8; WalletKey::LEN];
    OsRng.fill_bytes(&mut bytes);
    WalletKey(bytes)
}

// ── policy enums ──────────────────────────────────────────────────────────────

/// How queued messages are collected from the mediator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediatorPickupStrategy {
    /// Messages arrive on the connection's return route.
    #[default]
    Implicit,
    /// Explicit pickup protocol v1 polling; needs a mediator that speaks it.
    #[serde(rename = "pick_up_v1")]
    PickUpV1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAcceptCredential {
    #[default]
    Always,
    ContentApproved,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAcceptProof {
    #[default]
    Always,
    ContentApproved,
    Never,
}

// ── BootstrapConfig ───────────────────────────────────────────────────────────

/// Everything [`AgentSession::initialize`] needs. Built fresh every run.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub wallet_key: WalletKey,
    pub trust_bundle_path: PathBuf,
    /// Mediator out-of-band invitation URL, as returned by the bootstrap endpoint.
    pub mediator_invitation_url: String,
    pub pickup_strategy: MediatorPickupStrategy,
    pub label: String,
    pub auto_accept_credential: AutoAcceptCredential,
    pub auto_accept_proof: AutoAcceptProof,
}

// ── records ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Invitation accepted, request prepared for the inviter.
    Requested,
    /// Inviter answered; the connection is usable.
    Complete,
}

/// A connection created by accepting an invitation. Read-only to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    /// `@id` of the invitation this connection came from.
    pub invitation_id: String,
    /// Display label of the remote party, when the invitation carried one.
    pub their_label: Option<String>,
    /// Our pairwise verification key for this connection.
    pub my_verkey: String,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
}

/// Bookkeeping record for one processed out-of-band invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfBandRecord {
    pub id: Uuid,
    pub invitation_id: String,
    pub their_label: Option<String>,
    /// An existing connection was returned instead of creating a new one.
    pub reused_connection: bool,
    pub created_at: DateTime<Utc>,
}

// ── AgentSession ──────────────────────────────────────────────────────────────

/// The identity-agent runtime as seen by the bootstrap orchestrator.
///
/// Futures are `Send` so the orchestrator can run on a spawned tokio task.
pub trait AgentSession: Send + Sync + 'static {
    /// Open the wallet and register protocol policy.
    ///
    /// Implementations must reject a second or concurrent call with
    /// [`BootstrapError::AgentInit`]; [`InitGate`] provides that guard.
    fn initialize(
        &self,
        config: BootstrapConfig,
    ) -> impl Future<Output = Result<(), BootstrapError>> + Send;

    /// Process one out-of-band invitation URL.
    ///
    /// The connection is `None` when the invitation carries no handshake
    /// protocol (connectionless exchange).
    fn receive_invitation(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<(OutOfBandRecord, Option<Connection>), BootstrapError>> + Send;
}

// ── InitGate ──────────────────────────────────────────────────────────────────

const GATE_IDLE: u8 = 0;
const GATE_IN_FLIGHT: u8 = 1;
const GATE_READY: u8 = 2;

/// At-most-once guard around wallet opening.
///
/// [`InitGate::begin`] hands out a single [`InitPermit`]. Completing the
/// permit latches the gate; dropping it uncompleted (the initialization
/// failed) reopens the gate so a later attempt in the same process can retry.
#[derive(Debug, Default)]
pub struct InitGate {
    state: AtomicU8,
}

impl InitGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> Result<InitPermit<'_>, BootstrapError> {
        match self.state.compare_exchange(
            GATE_IDLE,
            GATE_IN_FLIGHT,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(InitPermit { gate: self, completed: false }),
            Err(GATE_IN_FLIGHT) => Err(BootstrapError::AgentInit(
                "wallet initialization already in progress".into(),
            )),
            Err(_) => Err(BootstrapError::AgentInit("agent already initialized".into())),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == GATE_READY
    }
}

/// Exclusive right to run one initialization. See [`InitGate`].
#[derive(Debug)]
pub struct InitPermit<'a> {
    gate: &'a InitGate,
    completed: bool,
}

impl InitPermit<'_> {
    pub fn complete(mut self) {
        self.gate.state.store(GATE_READY, Ordering::Release);
        self.completed = true;
    }
}

impl Drop for InitPermit<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.gate.state.store(GATE_IDLE, Ordering::Release);
        }
    }
}
