//! Full bootstrap against a stub endpoint with the bundled local agent.

mod common;

use std::sync::Arc;

use tempfile::TempDir;
use url::Url;

use aries_wallet_bootstrap::agent::local::LocalAgent;
use aries_wallet_bootstrap::bootstrap::{
    BUNDLED_ASSETS, BootstrapClient, BootstrapHandle, BootstrapOrchestrator, BootstrapSettings,
    BootstrapState, FilePreferences, KeyVault, ProvisioningRecord, TrustBundleLoader,
};
use aries_wallet_bootstrap::config::Config;
use aries_wallet_bootstrap::error::ErrorKind;

use common::{Reply, invitation_url, serve};

/// Wire every collaborator the way the binary does, rooted at `work_dir`.
fn start(work_dir: &TempDir, base: Url, reuse: bool) -> BootstrapHandle<LocalAgent> {
    let mut config = Config::with_work_dir(work_dir.path(), &work_dir.path().join("assets"), base);
    config.agent.reuse_connections = reuse;

    let prefs = FilePreferences::open(&config.prefs_dir(), &config.wallet.preference_scope).unwrap();
    let client =
        BootstrapClient::new(&config.bootstrap.base_url, config.bootstrap.timeout_seconds).unwrap();
    BootstrapOrchestrator::new(
        client,
        Arc::new(LocalAgent::new(config.wallet_dir(), config.agent.reuse_connections)),
        KeyVault::new(Arc::new(prefs)),
        TrustBundleLoader::new(Arc::new(BUNDLED_ASSETS), config.files_dir()),
        BootstrapSettings::from_config(&config),
    )
    .spawn()
}

fn record(work_dir: &TempDir) -> ProvisioningRecord {
    let config = Config::with_work_dir(
        work_dir.path(),
        &work_dir.path().join("assets"),
        Url::parse("http://127.0.0.1:9/").unwrap(),
    );
    let prefs = FilePreferences::open(&config.prefs_dir(), &config.wallet.preference_scope).unwrap();
    ProvisioningRecord::read(
        &KeyVault::new(Arc::new(prefs)),
        &TrustBundleLoader::new(Arc::new(BUNDLED_ASSETS), config.files_dir()),
        &config.wallet.genesis_resource,
    )
    .unwrap()
}

#[tokio::test]
async fn first_run_provisions_and_connects() {
    let work_dir = TempDir::new().unwrap();
    let base = serve([
        ("MEDIATOR_URL", Reply::Value(invitation_url("mediator", Some("Mediator"), true))),
        ("INVITATION_URL", Reply::Value(invitation_url("faber-1", Some("Faber College"), true))),
    ])
    .await;

    let handle = start(&work_dir, base, true);
    let agent = handle.agent();
    let outcome = handle.wait().await.unwrap();

    assert!(outcome.newly_provisioned);
    assert_eq!(outcome.their_label(), "Faber College");
    assert!(agent.is_initialized());
    assert_eq!(agent.connections().await.len(), 1);
    assert!(record(&work_dir).is_provisioned());
}

#[tokio::test]
async fn restart_reuses_key_and_connection() {
    let work_dir = TempDir::new().unwrap();
    let base = serve([
        ("MEDIATOR_URL", Reply::Value(invitation_url("mediator", None, true))),
        ("INVITATION_URL", Reply::Value(invitation_url("faber-1", Some("Faber"), true))),
    ])
    .await;

    let first = start(&work_dir, base.clone(), true).wait().await.unwrap();
    let key_after_first = record(&work_dir).wallet_key;

    let handle = start(&work_dir, base, true);
    let agent = handle.agent();
    let second = handle.wait().await.unwrap();

    assert!(!second.newly_provisioned);
    assert!(second.record.reused_connection);
    assert_eq!(second.connection.unwrap().id, first.connection.unwrap().id);
    assert_eq!(agent.connections().await.len(), 1);
    assert_eq!(record(&work_dir).wallet_key, key_after_first);
}

#[tokio::test]
async fn restart_without_reuse_opens_a_new_connection() {
    let work_dir = TempDir::new().unwrap();
    let base = serve([
        ("MEDIATOR_URL", Reply::Value(invitation_url("mediator", None, true))),
        ("INVITATION_URL", Reply::Value(invitation_url("faber-1", Some("Faber"), true))),
    ])
    .await;

    start(&work_dir, base.clone(), false).wait().await.unwrap();
    let handle = start(&work_dir, base, false);
    let agent = handle.agent();
    let second = handle.wait().await.unwrap();

    assert!(!second.record.reused_connection);
    assert_eq!(agent.connections().await.len(), 2);
}

#[tokio::test]
async fn bad_mediator_invitation_fails_agent_init() {
    let work_dir = TempDir::new().unwrap();
    let base = serve([
        ("MEDIATOR_URL", Reply::Value("https://mediator.example/invite".into())),
        ("INVITATION_URL", Reply::Value(invitation_url("faber-1", None, true))),
    ])
    .await;

    let handle = start(&work_dir, base, true);
    let mut states = handle.subscribe();
    let err = handle.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AgentInit);
    assert!(matches!(*states.borrow_and_update(), BootstrapState::Failed(_)));
    // Key and bundle stay in place for the next attempt.
    assert!(record(&work_dir).is_provisioned());
}

#[tokio::test]
async fn connectionless_invitation_reports_unknown_agent() {
    let work_dir = TempDir::new().unwrap();
    let base = serve([
        ("MEDIATOR_URL", Reply::Value(invitation_url("mediator", None, true))),
        ("INVITATION_URL", Reply::Value(invitation_url("presentation", Some("Verifier"), false))),
    ])
    .await;

    let outcome = start(&work_dir, base, true).wait().await.unwrap();
    assert!(outcome.connection.is_none());
    assert_eq!(outcome.their_label(), "unknown agent");
}
