//! Trust bundle (ledger genesis transactions) materialization.
//!
//! The genesis file ships with the application as a read-only asset and is
//! copied verbatim into private storage the first time it is needed:
//!
//! ```text
//! <work_dir>/files/
//! └── test-genesis.txn
//! ```
//!
//! Existence of the destination file is the idempotence gate, so the copy
//! goes through [`super::atomic::copy_atomic`]: the file only appears once it
//! is complete.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::atomic;
use crate::error::BootstrapError;

/// Read-only bundle of named assets.
pub trait ResourceSource: Send + Sync {
    /// Open `name` for streaming. Missing or unreadable assets are
    /// [`BootstrapError::Resource`].
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, BootstrapError>;
}

/// Assets laid out as plain files under one directory.
#[derive(Debug, Clone)]
pub struct AssetDir {
    root: PathBuf,
}

impl AssetDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceSource for AssetDir {
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, BootstrapError> {
        let path = self.root.join(name);
        let file = fs::File::open(&path).map_err(|e| {
            BootstrapError::Resource(format!("cannot open asset {}: {e}", path.display()))
        })?;
        Ok(Box::new(file))
    }
}

/// Assets compiled into the binary.
#[derive(Debug, Clone, Copy)]
pub struct StaticAssets {
    entries: &'static [(&'static str, &'static [u8])],
}

impl StaticAssets {
    pub const fn new(entries: &'static [(&'static str, &'static [u8])]) -> Self {
        Self { entries }
    }
}

/// The genesis file from `assets/`, embedded for installs without an assets dir.
pub const BUNDLED_ASSETS: StaticAssets = StaticAssets::new(&[(
    "test-genesis.txn",
    include_bytes!("../../assets/test-genesis.txn"),
)]);

impl ResourceSource for StaticAssets {
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, BootstrapError> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, data)| Box::new(io::Cursor::new(*data)) as Box<dyn Read + Send>)
            .ok_or_else(|| BootstrapError::Resource(format!("asset '{name}' is not bundled")))
    }
}

/// Marks read failures so a failed copy can be blamed on the right side.
struct SourceReader {
    inner: Box<dyn Read + Send>,
    failed: bool,
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).inspect_err(|_| self.failed = true)
    }
}

#[derive(Clone)]
pub struct TrustBundleLoader {
    resources: Arc<dyn ResourceSource>,
    dest_dir: PathBuf,
}

impl TrustBundleLoader {
    pub fn new(resources: Arc<dyn ResourceSource>, dest_dir: impl Into<PathBuf>) -> Self {
        Self { resources, dest_dir: dest_dir.into() }
    }

    /// Deterministic destination for `resource_name`.
    pub fn destination(&self, resource_name: &str) -> PathBuf {
        self.dest_dir.join(resource_name)
    }

    /// `true` once the resource has been fully materialized.
    pub fn is_copied(&self, resource_name: &str) -> bool {
        self.destination(resource_name).is_file()
    }

    /// Copy `resource_name` into private storage unless it is already there.
    pub fn ensure_copied(&self, resource_name: &str) -> Result<PathBuf, BootstrapError> {
        if resource_name.is_empty() || resource_name.contains(['/', '\\']) {
            return Err(BootstrapError::Resource(format!(
                "invalid resource name '{resource_name}'"
            )));
        }

        let dest = self.destination(resource_name);
        if dest.is_file() {
            debug!(path = %dest.display(), "trust bundle already present");
            return Ok(dest);
        }

        fs::create_dir_all(&self.dest_dir).map_err(|e| {
            BootstrapError::Storage(format!("cannot create {}: {e}", self.dest_dir.display()))
        })?;

        let mut reader = SourceReader { inner: self.resources.open(resource_name)?, failed: false };
        match atomic::copy_atomic(&mut reader, &dest) {
            Ok(bytes) => {
                info!(path = %dest.display(), bytes, "trust bundle copied");
                Ok(dest)
            }
            Err(e) if reader.failed => Err(BootstrapError::Resource(format!(
                "cannot read asset '{resource_name}': {e}"
            ))),
            Err(e) => Err(BootstrapError::Storage(format!(
                "cannot write {}: {e}",
                dest.display()
            ))),
        }
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const GENESIS: &[u8] = b"{\"reqSignature\":{},\"txn\":{\"type\":\"0\"}}\n";

    struct CountingAssets {
        opens: AtomicUsize,
    }

    impl ResourceSource for CountingAssets {
        fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, BootstrapError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            StaticAssets::new(&[("genesis.txn", GENESIS)]).open(name)
        }
    }

    struct BrokenAsset;

    impl Read for BrokenAsset {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("corrupt archive entry"))
        }
    }

    struct BrokenAssets;

    impl ResourceSource for BrokenAssets {
        fn open(&self, _name: &str) -> Result<Box<dyn Read + Send>, BootstrapError> {
            Ok(Box::new(BrokenAsset))
        }
    }

    #[test]
    fn second_call_skips_the_resource() {
        let dir = TempDir::new().unwrap();
        let assets = Arc::new(CountingAssets { opens: AtomicUsize::new(0) });
        let loader = TrustBundleLoader::new(assets.clone(), dir.path().join("files"));

        let first = loader.ensure_copied("genesis.txn").unwrap();
        let second = loader.ensure_copied("genesis.txn").unwrap();

        assert_eq!(first, second);
        assert_eq!(assets.opens.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(&first).unwrap(), GENESIS);
    }

    #[test]
    fn existing_file_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let loader = TrustBundleLoader::new(
            Arc::new(StaticAssets::new(&[("genesis.txn", GENESIS)])),
            dir.path(),
        );
        fs::write(dir.path().join("genesis.txn"), b"operator supplied").unwrap();
        let path = loader.ensure_copied("genesis.txn").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"operator supplied");
    }

    #[test]
    fn missing_asset_is_resource_error() {
        let dir = TempDir::new().unwrap();
        let loader = TrustBundleLoader::new(Arc::new(AssetDir::new(dir.path().join("assets"))), dir.path());
        let err = loader.ensure_copied("absent.txn").unwrap_err();
        assert!(matches!(err, BootstrapError::Resource(_)));
        assert!(!loader.is_copied("absent.txn"));
    }

    #[test]
    fn unreadable_asset_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let loader = TrustBundleLoader::new(Arc::new(BrokenAssets), dir.path());
        let err = loader.ensure_copied("genesis.txn").unwrap_err();
        assert!(matches!(err, BootstrapError::Resource(_)));
        assert!(!loader.is_copied("genesis.txn"));
        assert!(atomic::stray_temp_files(&loader.destination("genesis.txn")).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_destination_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("files");
        fs::write(&blocker, b"not a directory").unwrap();
        let loader = TrustBundleLoader::new(
            Arc::new(StaticAssets::new(&[("genesis.txn", GENESIS)])),
            &blocker,
        );
        let err = loader.ensure_copied("genesis.txn").unwrap_err();
        assert!(matches!(err, BootstrapError::Storage(_)));
    }

    #[test]
    fn asset_dir_reads_plain_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("genesis.txn"), GENESIS).unwrap();
        let loader = TrustBundleLoader::new(Arc::new(AssetDir::new(dir.path())), dir.path().join("out"));
        let path = loader.ensure_copied("genesis.txn").unwrap();
        assert_eq!(fs::read(path).unwrap(), GENESIS);
    }

    #[test]
    fn bundled_genesis_is_embedded() {
        let mut data = Vec::new();
        BUNDLED_ASSETS.open("test-genesis.txn").unwrap().read_to_end(&mut data).unwrap();
        assert!(!data.is_empty());
    }

    #[test]
    fn path_like_names_rejected() {
        let dir = TempDir::new().unwrap();
        let loader = TrustBundleLoader::new(Arc::new(BUNDLED_ASSETS), dir.path());
        assert!(matches!(loader.ensure_copied("../x"), Err(BootstrapError::Resource(_))));
    }
}
