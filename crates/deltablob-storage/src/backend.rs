//! Narrow blob capability the version store is built on
//!
//! The store only needs `exists`, `read`, and a create-only `write`. The
//! OpenDAL implementation maps every backend error into [`DeltaBlobError`]
//! here so no `opendal::Error` crosses into the store.

use std::future::Future;

use deltablob_core::{DeltaBlobError, DeltaBlobResult};
use opendal::{ErrorKind, Operator};
use tokio::sync::Mutex;

/// Blob I/O capability injected into [`BlobVersionStore`](crate::BlobVersionStore).
///
/// Paths are `/`-separated `container/key` strings.
pub trait BlobBackend: Send + Sync {
    fn exists(&self, path: &str) -> impl Future<Output = DeltaBlobResult<bool>> + Send;

    /// Fails `NotFound` when nothing is stored at `path`.
    fn read(&self, path: &str) -> impl Future<Output = DeltaBlobResult<Vec<u8>>> + Send;

    /// Fails `AlreadyExists` when `path` already has content, whatever it is.
    /// Of several concurrent writers to one path exactly one succeeds.
    fn write_create_only(
        &self,
        path: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = DeltaBlobResult<()>> + Send;
}

/// [`BlobBackend`] over an OpenDAL [`Operator`]
#[derive(Debug)]
pub struct OpendalBackend {
    op: Operator,
    /// Serialises the exists-then-write fallback when the service has no
    /// conditional write
    create_lock: Mutex<()>,
}

impl OpendalBackend {
    pub fn new(op: Operator) -> Self {
        Self {
            op,
            create_lock: Mutex::new(()),
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    /// Backend rejects the write itself when the path exists
    fn conditional_writes(&self) -> bool {
        self.op.info().full_capability().write_with_if_not_exists
    }
}

impl BlobBackend for OpendalBackend {
    async fn exists(&self, path: &str) -> DeltaBlobResult<bool> {
        self.op.exists(path).await.map_err(|e| map_opendal_error(e, path))
    }

    async fn read(&self, path: &str) -> DeltaBlobResult<Vec<u8>> {
        let buf = self
            .op
            .read(path)
            .await
            .map_err(|e| map_opendal_error(e, path))?;
        Ok(buf.to_vec())
    }

    async fn write_create_only(&self, path: &str, bytes: Vec<u8>) -> DeltaBlobResult<()> {
        if self.conditional_writes() {
            return self
                .op
                .write_with(path, bytes)
                .if_not_exists(true)
                .await
                .map(|_| ())
                .map_err(|e| map_opendal_error(e, path));
        }

        // No server-side condition: re-check under the lock right before writing.
        let _guard = self.create_lock.lock().await;
        if self.exists(path).await? {
            return Err(DeltaBlobError::AlreadyExists(path.to_string()));
        }
        self.op
            .write(path, bytes)
            .await
            .map(|_| ())
            .map_err(|e| map_opendal_error(e, path))
    }
}

/// Translate an OpenDAL error on `path` into the store's error taxonomy.
pub fn map_opendal_error(err: opendal::Error, path: &str) -> DeltaBlobError {
    match err.kind() {
        ErrorKind::NotFound => DeltaBlobError::NotFound(path.to_string()),
        ErrorKind::AlreadyExists | ErrorKind::ConditionNotMatch => {
            DeltaBlobError::AlreadyExists(path.to_string())
        }
        ErrorKind::ConfigInvalid | ErrorKind::Unsupported | ErrorKind::PermissionDenied => {
            DeltaBlobError::NotInitialized(format!("{path}: {err}"))
        }
        // Transport failures (refused connection, DNS, timeouts) surface as
        // temporary `Unexpected` errors once retries are exhausted.
        ErrorKind::Unexpected if err.is_temporary() => {
            DeltaBlobError::NotInitialized(format!("{path}: backend unreachable: {err}"))
        }
        _ => DeltaBlobError::Storage(format!("{path}: {err}")),
    }
}
