//! OpenDAL Operator factory for deltablob storage backends

use deltablob_core::config::{BackendKind, StorageConfig};
use deltablob_core::{DeltaBlobError, DeltaBlobResult};
use opendal::Operator;

/// S3 endpoint used when none is configured (local SeaweedFS / MinIO)
pub const DEFAULT_S3_ENDPOINT: &str = "http://localhost:8333";

/// Credentials read from the environment, never from the config file
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub account_key: Option<String>,
}

impl Credentials {
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AZURE_STORAGE_KEY`
    pub fn from_env() -> Self {
        Self {
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
            account_key: std::env::var("AZURE_STORAGE_KEY").ok(),
        }
    }
}

/// Build an operator for the configured backend with credentials from the environment.
pub fn build_operator(cfg: &StorageConfig) -> DeltaBlobResult<Operator> {
    build_operator_with(cfg, &Credentials::from_env())
}

/// Build an operator for the configured backend.
///
/// Any construction failure, including a refused plaintext endpoint, is
/// `NotInitialized`.
pub fn build_operator_with(cfg: &StorageConfig, creds: &Credentials) -> DeltaBlobResult<Operator> {
    let op = match cfg.backend {
        BackendKind::Memory => Operator::new(opendal::services::Memory::default())
            .map_err(not_initialized("memory"))?
            .finish(),
        BackendKind::Fs => {
            let root = cfg.root.to_string_lossy();
            Operator::new(opendal::services::Fs::default().root(&root))
                .map_err(not_initialized("fs"))?
                .finish()
        }
        BackendKind::S3 => {
            let endpoint = cfg.endpoint.as_deref().unwrap_or(DEFAULT_S3_ENDPOINT);
            check_endpoint(endpoint, cfg.enforce_tls)?;

            // opendal 0.55: consuming builders; path-style addressing is the default
            let mut builder = opendal::services::S3::default()
                .endpoint(endpoint)
                .region(&cfg.region)
                .bucket(&cfg.bucket);
            if let Some(key) = &creds.access_key_id {
                builder = builder.access_key_id(key);
            }
            if let Some(secret) = &creds.secret_access_key {
                builder = builder.secret_access_key(secret);
            }
            remote(Operator::new(builder).map_err(not_initialized("s3"))?.finish())
        }
        BackendKind::Azblob => {
            let account = cfg.account_name.as_deref().ok_or_else(|| {
                DeltaBlobError::NotInitialized("azblob backend requires storage.account_name".into())
            })?;
            let key = creds.account_key.as_deref().ok_or_else(|| {
                DeltaBlobError::NotInitialized("azblob backend requires AZURE_STORAGE_KEY".into())
            })?;
            let endpoint = cfg
                .endpoint
                .clone()
                .unwrap_or_else(|| format!("https://{account}.blob.core.windows.net"));
            check_endpoint(&endpoint, cfg.enforce_tls)?;

            let builder = opendal::services::Azblob::default()
                .endpoint(&endpoint)
                .container(&cfg.bucket)
                .account_name(account)
                .account_key(key);
            remote(Operator::new(builder).map_err(not_initialized("azblob"))?.finish())
        }
    };

    tracing::debug!(backend = ?cfg.backend, "storage operator ready");
    Ok(op)
}

/// Logging and retry layers for network backends
fn remote(op: Operator) -> Operator {
    op.layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
}

/// Refuse `http://` when `enforce_tls` is set, warn otherwise.
fn check_endpoint(endpoint: &str, enforce_tls: bool) -> DeltaBlobResult<()> {
    if endpoint.starts_with("http://") {
        if enforce_tls {
            return Err(DeltaBlobError::NotInitialized(format!(
                "endpoint uses plaintext HTTP ({endpoint}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development."
            )));
        }
        tracing::warn!(
            endpoint,
            "storage endpoint uses plaintext HTTP; credentials are transmitted unencrypted. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }
    Ok(())
}

fn not_initialized(service: &'static str) -> impl Fn(opendal::Error) -> DeltaBlobError {
    move |e| DeltaBlobError::NotInitialized(format!("creating OpenDAL {service} operator: {e}"))
}
