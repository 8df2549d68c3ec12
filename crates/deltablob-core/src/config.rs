use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DeltaBlobError, DeltaBlobResult};
use crate::types::DEFAULT_CONTAINER;

/// Default signature block size in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 2048;

/// Top-level configuration (loaded from deltablob.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaBlobConfig {
    pub storage: StorageConfig,
    pub delta: DeltaConfig,
    pub log: LogConfig,
}

impl DeltaBlobConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> DeltaBlobResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            DeltaBlobError::InvalidArgument(format!("parsing config {}: {e}", path.display()))
        })
    }
}

/// Which OpenDAL service backs the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local, non-persistent (tests, embedding)
    Memory,
    /// Local filesystem under `root`
    Fs,
    /// S3-compatible object store
    S3,
    /// Azure Blob Storage (account name + shared key)
    Azblob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Root directory of the fs backend
    pub root: PathBuf,
    /// Container used for identifiers without a `/`
    pub default_container: String,
    /// S3 or Azure endpoint. S3 falls back to `http://localhost:8333`,
    /// Azure to `https://{account_name}.blob.core.windows.net`.
    pub endpoint: Option<String>,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// S3 bucket or Azure container holding every blob
    pub bucket: String,
    /// Azure storage account name
    pub account_name: Option<String>,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    /// Signature block size in bytes
    pub block_size: usize,
    /// Check referenced basis blocks against the stored signature on restore
    pub verify_basis: bool,
    /// Key suffix under which a basis blob's signature is persisted
    pub signature_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Fs,
            root: PathBuf::from("/var/lib/deltablob"),
            default_container: DEFAULT_CONTAINER.into(),
            endpoint: None,
            region: "us-east-1".into(),
            bucket: "deltablob".into(),
            account_name: None,
            enforce_tls: false,
        }
    }
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            verify_basis: false,
            signature_suffix: ".sig".into(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
