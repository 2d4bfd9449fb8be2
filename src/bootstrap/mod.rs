//! Bootstrap layer: everything that runs before the agent is usable.
//!
//! - **preferences**: named, durable key-value scopes.
//! - **key_vault**: wallet key generated once, persisted before use.
//! - **trust_bundle**: genesis file materialized once into private storage.
//! - **client**: remote bootstrap endpoint (`MEDIATOR_URL`, `INVITATION_URL`).
//! - **orchestrator**: the state machine sequencing all of the above.
//! - **atomic**: temp-file-and-rename writes shared by the stores.

pub mod atomic;
pub mod client;
pub mod key_vault;
pub mod orchestrator;
pub mod preferences;
pub mod trust_bundle;

pub use client::{BootstrapClient, ConfigSource};
pub use key_vault::{KeyVault, ProvisionedKey, WALLET_KEY_PREF};
pub use orchestrator::{
    BootstrapHandle, BootstrapOrchestrator, BootstrapOutcome, BootstrapSettings, BootstrapState,
};
pub use preferences::{FilePreferences, MemoryPreferences, PreferenceStore};
pub use trust_bundle::{AssetDir, BUNDLED_ASSETS, ResourceSource, StaticAssets, TrustBundleLoader};

use crate::agent::WalletKey;
use crate::error::BootstrapError;

/// Snapshot of what this installation has provisioned so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRecord {
    pub wallet_key: Option<WalletKey>,
    pub trust_bundle_copied: bool,
}

impl ProvisioningRecord {
    /// Read the record without generating or copying anything.
    pub fn read(
        vault: &KeyVault,
        trust_bundle: &TrustBundleLoader,
        resource_name: &str,
    ) -> Result<Self, BootstrapError> {
        Ok(Self {
            wallet_key: vault.stored_key()?,
            trust_bundle_copied: trust_bundle.is_copied(resource_name),
        })
    }

    pub fn is_provisioned(&self) -> bool {
        self.wallet_key.is_some() && self.trust_bundle_copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn record_reflects_key_and_bundle() {
        let dir = TempDir::new().unwrap();
        let vault = KeyVault::new(Arc::new(MemoryPreferences::new()));
        let loader = TrustBundleLoader::new(Arc::new(BUNDLED_ASSETS), dir.path());

        let empty = ProvisioningRecord::read(&vault, &loader, "test-genesis.txn").unwrap();
        assert_eq!(empty.wallet_key, None);
        assert!(!empty.trust_bundle_copied);
        assert!(!empty.is_provisioned());

        let key = vault.get_or_create_key().unwrap().key;
        loader.ensure_copied("test-genesis.txn").unwrap();

        let full = ProvisioningRecord::read(&vault, &loader, "test-genesis.txn").unwrap();
        assert_eq!(full.wallet_key, Some(key));
        assert!(full.is_provisioned());
    }
}
