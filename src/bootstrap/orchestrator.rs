//! The bootstrap state machine.
//!
//! ```text
//! Idle → FetchingMediatorUrl → OpeningWallet → FetchingInvitationUrl
//!      → EstablishingConnection → Ready
//!                  (any non-terminal state) → Failed(reason)
//! ```
//!
//! The sequence is strictly ordered: key provisioning, trust bundle copy,
//! agent initialization, invitation resolution. Nothing is retried here. A
//! retry is a fresh orchestrator started from `Idle`, which is safe because
//! [`KeyVault`] and [`TrustBundleLoader`] are idempotent.
//!
//! Hosts normally call [`BootstrapOrchestrator::spawn`] and keep the
//! returned [`BootstrapHandle`] to watch progress or await the outcome.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::client::ConfigSource;
use super::key_vault::KeyVault;
use super::trust_bundle::TrustBundleLoader;
use crate::agent::{
    AgentSession, AutoAcceptCredential, AutoAcceptProof, BootstrapConfig, Connection,
    MediatorPickupStrategy, OutOfBandRecord,
};
use crate::config::Config;
use crate::error::BootstrapError;

/// Label logged when the remote party did not announce one.
pub const UNKNOWN_AGENT: &str = "unknown agent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    FetchingMediatorUrl,
    OpeningWallet,
    FetchingInvitationUrl,
    EstablishingConnection,
    Ready,
    Failed(BootstrapError),
}

impl BootstrapState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapState::Ready | BootstrapState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            BootstrapState::Idle => "idle",
            BootstrapState::FetchingMediatorUrl => "fetching_mediator_url",
            BootstrapState::OpeningWallet => "opening_wallet",
            BootstrapState::FetchingInvitationUrl => "fetching_invitation_url",
            BootstrapState::EstablishingConnection => "establishing_connection",
            BootstrapState::Ready => "ready",
            BootstrapState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapState::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Static inputs of one bootstrap run.
#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    pub mediator_key: String,
    pub invitation_key: String,
    pub genesis_resource: String,
    pub label: String,
    pub pickup_strategy: MediatorPickupStrategy,
    pub auto_accept_credential: AutoAcceptCredential,
    pub auto_accept_proof: AutoAcceptProof,
}

impl BootstrapSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mediator_key: config.bootstrap.mediator_key.clone(),
            invitation_key: config.bootstrap.invitation_key.clone(),
            genesis_resource: config.wallet.genesis_resource.clone(),
            label: config.label.clone(),
            pickup_strategy: config.agent.mediator_pickup_strategy,
            auto_accept_credential: config.agent.auto_accept_credential,
            auto_accept_proof: config.agent.auto_accept_proof,
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    /// The wallet key was generated during this run.
    pub newly_provisioned: bool,
    pub trust_bundle_path: PathBuf,
    pub record: OutOfBandRecord,
    pub connection: Option<Connection>,
}

impl BootstrapOutcome {
    pub fn their_label(&self) -> &str {
        self.connection
            .as_ref()
            .and_then(|c| c.their_label.as_deref())
            .unwrap_or(UNKNOWN_AGENT)
    }
}

pub struct BootstrapOrchestrator<C, A> {
    client: C,
    agent: Arc<A>,
    vault: KeyVault,
    trust_bundle: TrustBundleLoader,
    settings: BootstrapSettings,
    state: watch::Sender<BootstrapState>,
}

impl<C: ConfigSource, A: AgentSession> BootstrapOrchestrator<C, A> {
    pub fn new(
        client: C,
        agent: Arc<A>,
        vault: KeyVault,
        trust_bundle: TrustBundleLoader,
        settings: BootstrapSettings,
    ) -> Self {
        let (state, _) = watch::channel(BootstrapState::Idle);
        Self { client, agent, vault, trust_bundle, settings, state }
    }

    pub fn state(&self) -> BootstrapState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    pub fn agent(&self) -> Arc<A> {
        self.agent.clone()
    }

    /// Run the sequence on the current task. Only the first call does work;
    /// later calls fail without touching state.
    pub async fn run(&self) -> Result<BootstrapOutcome, BootstrapError> {
        let started = self.state.send_if_modified(|state| {
            if *state == BootstrapState::Idle {
                *state = BootstrapState::FetchingMediatorUrl;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(BootstrapError::AgentInit(format!(
                "bootstrap already started (state: {})",
                self.state()
            )));
        }
        info!(state = BootstrapState::FetchingMediatorUrl.name(), "bootstrap started");

        let result = self.run_sequence().await;
        match &result {
            Ok(outcome) => {
                info!(
                    their_label = %outcome.their_label(),
                    newly_provisioned = outcome.newly_provisioned,
                    "connected to {}",
                    outcome.their_label()
                );
                self.advance(BootstrapState::Ready);
            }
            Err(e) => self.fail(e.clone()),
        }
        result
    }

    async fn run_sequence(&self) -> Result<BootstrapOutcome, BootstrapError> {
        let mediator_invitation_url = self.client.fetch(&self.settings.mediator_key).await?;

        self.advance(BootstrapState::OpeningWallet);
        let provisioned = self.vault.get_or_create_key()?;

        let resource = &self.settings.genesis_resource;
        // Also heals an install interrupted between key persist and copy.
        let trust_bundle_path =
            if provisioned.first_time || !self.trust_bundle.is_copied(resource) {
                self.trust_bundle.ensure_copied(resource)?
            } else {
                self.trust_bundle.destination(resource)
            };

        self.agent
            .initialize(BootstrapConfig {
                wallet_key: provisioned.key,
                trust_bundle_path: trust_bundle_path.clone(),
                mediator_invitation_url,
                pickup_strategy: self.settings.pickup_strategy,
                label: self.settings.label.clone(),
                auto_accept_credential: self.settings.auto_accept_credential,
                auto_accept_proof: self.settings.auto_accept_proof,
            })
            .await?;
        info!("agent initialized");

        self.advance(BootstrapState::FetchingInvitationUrl);
        let invitation_url = self.client.fetch(&self.settings.invitation_key).await?;

        self.advance(BootstrapState::EstablishingConnection);
        let (record, connection) = self.agent.receive_invitation(&invitation_url).await?;

        Ok(BootstrapOutcome {
            newly_provisioned: provisioned.first_time,
            trust_bundle_path,
            record,
            connection,
        })
    }

    fn advance(&self, next: BootstrapState) {
        info!(state = next.name(), "bootstrap state changed");
        self.state.send_replace(next);
    }

    fn fail(&self, reason: BootstrapError) {
        error!(
            kind = %reason.kind(),
            error = %reason,
            during = self.state.borrow().name(),
            "bootstrap failed"
        );
        self.state.send_replace(BootstrapState::Failed(reason));
    }

    /// Run the sequence on a background tokio task.
    pub fn spawn(self) -> BootstrapHandle<A> {
        let state = self.state.subscribe();
        let agent = self.agent.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                result = self.run() => result,
                _ = token.cancelled() => {
                    self.fail(BootstrapError::Cancelled);
                    Err(BootstrapError::Cancelled)
                }
            }
        });

        BootstrapHandle { state, task, cancel, agent }
    }
}

/// Observer and owner of a spawned bootstrap run.
pub struct BootstrapHandle<A> {
    state: watch::Receiver<BootstrapState>,
    task: JoinHandle<Result<BootstrapOutcome, BootstrapError>>,
    cancel: CancellationToken,
    agent: Arc<A>,
}

impl<A> BootstrapHandle<A> {
    pub fn state(&self) -> BootstrapState {
        self.state.borrow().clone()
    }

    /// A fresh receiver for progress updates.
    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.clone()
    }

    /// The agent session; usable once the state is `Ready`.
    pub fn agent(&self) -> Arc<A> {
        self.agent.clone()
    }

    /// Abort the sequence at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run; for signal handlers and other owners.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> Result<BootstrapOutcome, BootstrapError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(BootstrapError::Cancelled),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}
