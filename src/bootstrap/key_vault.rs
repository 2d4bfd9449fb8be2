//! Wallet key provisioning.
//!
//! The key is generated once per installation and stored under
//! [`WALLET_KEY_PREF`] in the app's preference scope. The write completes
//! before the key is handed out, so a crash between generation and
//! persistence just means the next run generates again; no wallet is ever
//! opened with a key that was not durably recorded.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::preferences::PreferenceStore;
use crate::agent::{self, WalletKey};
use crate::error::BootstrapError;

/// Preference entry holding the encoded wallet key.
pub const WALLET_KEY_PREF: &str = "walletKey";

/// Source of fresh wallet keys. Defaults to [`agent::generate_key`].
pub type KeyGenerator = Arc<dyn Fn() -> WalletKey + Send + Sync>;

/// Result of [`KeyVault::get_or_create_key`].
#[derive(Debug, Clone)]
pub struct ProvisionedKey {
    pub key: WalletKey,
    /// `true` when this call generated and persisted the key.
    pub first_time: bool,
}

pub struct KeyVault {
    store: Arc<dyn PreferenceStore>,
    generate: KeyGenerator,
    create_lock: Mutex<()>,
}

impl fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVault").finish_non_exhaustive()
    }
}

impl KeyVault {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self::with_generator(store, Arc::new(agent::generate_key))
    }

    pub fn with_generator(store: Arc<dyn PreferenceStore>, generate: KeyGenerator) -> Self {
        Self { store, generate, create_lock: Mutex::new(()) }
    }

    /// The persisted key, if any. Never generates.
    pub fn stored_key(&self) -> Result<Option<WalletKey>, BootstrapError> {
        self.store
            .get(WALLET_KEY_PREF)?
            .map(|encoded| WalletKey::decode(&encoded))
            .transpose()
    }

    /// Return the persisted key, generating and persisting one on first use.
    pub fn get_or_create_key(&self) -> Result<ProvisionedKey, BootstrapError> {
        // Serialises callers of this vault; `set_if_absent` covers other vaults on the scope.
        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| BootstrapError::Storage("key vault lock poisoned".into()))?;

        if let Some(key) = self.stored_key()? {
            debug!("wallet key found in preferences");
            return Ok(ProvisionedKey { key, first_time: false });
        }

        let key = (self.generate)();
        match self.store.set_if_absent(WALLET_KEY_PREF, &key.encode())? {
            None => {
                info!("generated and persisted new wallet key");
                Ok(ProvisionedKey { key, first_time: true })
            }
            Some(existing) => {
                // Another vault on the same scope persisted first; its key is the wallet's.
                info!("wallet key persisted concurrently by another vault, using it");
                Ok(ProvisionedKey { key: WalletKey::decode(&existing)?, first_time: false })
            }
        }
    }
}
