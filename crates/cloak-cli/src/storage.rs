use std::{path::PathBuf, sync::Arc};

use cloak_content::{ContentStore, EncryptionOrchestrator};
use cloak_core::ContentObserver;
use cloak_crypto::{AesGcmEngine, KeyringProvider};
use color_eyre::Result;
use dirs::data_dir;
use tracing::debug;

use crate::config::Config;

/// Resolve the default managed content directory for Cloak.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("cloak").join("content"))
}

/// Managed directory, honouring the config override.
pub fn content_dir(config: &Config) -> Result<PathBuf> {
    match &config.data_dir {
        Some(root) => Ok(root.clone()),
        None => default_data_dir(),
    }
}

/// Open managed storage with a tracing observer attached.
pub fn open_store(config: &Config) -> Result<Arc<ContentStore>> {
    let root = content_dir(config)?;
    debug!(?root, "opening content store");
    let store = ContentStore::open(root)?;
    store.register_observer(Arc::new(TraceObserver));
    Ok(Arc::new(store))
}

pub fn orchestrator(config: &Config, store: Arc<ContentStore>) -> EncryptionOrchestrator {
    EncryptionOrchestrator::new(store).with_task_timeout(config.task_timeout())
}

/// Production engine keyed from the OS keychain.
pub fn production_engine(config: &Config) -> AesGcmEngine<KeyringProvider> {
    let (service, account) = config.keyring_entry();
    debug!(%service, %account, "using keychain content key");
    AesGcmEngine::new(KeyringProvider::new(service, account))
}

/// Helper for tests: engine with an ephemeral in-memory key.
#[cfg(test)]
pub fn test_engine() -> AesGcmEngine<cloak_crypto::InMemoryKeyProvider> {
    AesGcmEngine::new(cloak_crypto::InMemoryKeyProvider::default())
}

/// Traces every collection change.
struct TraceObserver;

impl ContentObserver for TraceObserver {
    fn content_changed(&self) -> anyhow::Result<()> {
        debug!("managed content changed");
        Ok(())
    }
}
