//! Create-only blob version store with delta encoding
//!
//! `BlobVersionStore` composes a [`BlobBackend`] with the delta engine. Blob
//! identities are normalised (`key` -> `{default_container}/key`) before they
//! reach the backend, and every write is create-only.

use deltablob_core::config::{DeltaBlobConfig, DeltaConfig};
use deltablob_core::{BlobIdentity, DeltaBlobError, DeltaBlobResult};
use deltablob_delta::{
    decode_delta, decode_signature, encode_delta, encode_signature, DeltaApplier, DeltaBuilder,
    DeltaScript, DeltaStats, Signature, SignatureBuilder,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::{BlobBackend, OpendalBackend};
use crate::operator::build_operator;

pub struct BlobVersionStore<B = OpendalBackend> {
    backend: Option<B>,
    default_container: String,
    delta: DeltaConfig,
    cancel: Option<CancellationToken>,
}

impl BlobVersionStore<OpendalBackend> {
    /// Build the configured OpenDAL backend and attach it.
    pub fn from_config(cfg: &DeltaBlobConfig) -> DeltaBlobResult<Self> {
        let op = build_operator(&cfg.storage)?;
        Ok(Self::new(OpendalBackend::new(op), cfg))
    }
}

impl<B: BlobBackend> BlobVersionStore<B> {
    pub fn new(backend: B, cfg: &DeltaBlobConfig) -> Self {
        let mut store = Self::detached(cfg);
        store.backend = Some(backend);
        store
    }

    /// A store with no backend yet. Pure operations work; blob I/O fails
    /// `NotInitialized` until [`attach`](Self::attach) is called.
    pub fn detached(cfg: &DeltaBlobConfig) -> Self {
        Self {
            backend: None,
            default_container: cfg.storage.default_container.clone(),
            delta: cfg.delta.clone(),
            cancel: None,
        }
    }

    pub fn attach(&mut self, backend: B) {
        info!("storage backend attached");
        self.backend = Some(backend);
    }

    pub fn is_attached(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend(&self) -> DeltaBlobResult<&B> {
        self.backend
            .as_ref()
            .ok_or_else(|| DeltaBlobError::NotInitialized("no storage backend attached".into()))
    }

    /// Abort long-running signature, delta, and apply work once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Normalise a caller-supplied id without touching the backend.
    pub fn identity(&self, id: &str) -> DeltaBlobResult<BlobIdentity> {
        BlobIdentity::parse(id, &self.default_container)
    }

    // ── Blob I/O ─────────────────────────────────────────────────────────

    pub async fn exists(&self, id: &str) -> DeltaBlobResult<bool> {
        let identity = self.identity(id)?;
        self.backend()?.exists(&identity.path()).await
    }

    pub async fn read_blob(&self, id: &str) -> DeltaBlobResult<Vec<u8>> {
        let identity = self.identity(id)?;
        self.read_at(&identity).await
    }

    /// Store `bytes` under `id`. Fails `AlreadyExists` if `id` has content,
    /// even identical content.
    pub async fn write_blob_create_only(
        &self,
        id: &str,
        bytes: Vec<u8>,
    ) -> DeltaBlobResult<BlobIdentity> {
        let identity = self.identity(id)?;
        self.write_at(&identity, bytes).await?;
        Ok(identity)
    }

    async fn read_at(&self, identity: &BlobIdentity) -> DeltaBlobResult<Vec<u8>> {
        let backend = self.backend()?;
        let bytes = backend.read(&identity.path()).await?;
        debug!(blob = %identity, bytes = bytes.len(), "read blob");
        Ok(bytes)
    }

    async fn write_at(&self, identity: &BlobIdentity, bytes: Vec<u8>) -> DeltaBlobResult<()> {
        let backend = self.backend()?;
        let len = bytes.len();
        backend.write_create_only(&identity.path(), bytes).await?;
        info!(blob = %identity, bytes = len, "wrote blob");
        Ok(())
    }

    // ── Delta operations ─────────────────────────────────────────────────

    /// Signature of the blob at `basis_id`.
    pub async fn compute_signature(
        &self,
        basis_id: &str,
        block_size: usize,
    ) -> DeltaBlobResult<Signature> {
        let builder = self.signature_builder(block_size)?;
        let basis = self.read_blob(basis_id).await?;
        builder.build_slice(&basis)
    }

    /// Delta turning the signed basis into `target`.
    pub fn compute_delta(
        &self,
        signature_bytes: &[u8],
        target: &[u8],
    ) -> DeltaBlobResult<DeltaScript> {
        if signature_bytes.is_empty() {
            return Err(DeltaBlobError::EmptyInput("signature"));
        }
        if target.is_empty() {
            return Err(DeltaBlobError::EmptyInput("target"));
        }
        let signature = decode_signature(signature_bytes)?;
        self.build_delta(&signature, target)
    }

    /// Replay an encoded delta against `basis`.
    pub fn apply_delta(&self, basis: &[u8], delta_bytes: &[u8]) -> DeltaBlobResult<Vec<u8>> {
        let script = self.decode_for_apply(basis, delta_bytes)?;
        self.applier().apply_slice(basis, &script)
    }

    /// Like [`apply_delta`](Self::apply_delta), but every copied block must
    /// match its checksum in `signature_bytes`; a changed basis fails
    /// `BasisMismatch`.
    pub fn apply_delta_verified(
        &self,
        basis: &[u8],
        delta_bytes: &[u8],
        signature_bytes: &[u8],
    ) -> DeltaBlobResult<Vec<u8>> {
        let script = self.decode_for_apply(basis, delta_bytes)?;
        if signature_bytes.is_empty() {
            return Err(DeltaBlobError::EmptyInput("signature"));
        }
        let signature = decode_signature(signature_bytes)?;
        self.applier()
            .with_verification(&signature)
            .apply_slice(basis, &script)
    }

    // ── Persisted signatures and deltas ──────────────────────────────────

    /// Identity under which the signature of `basis` is kept
    pub fn signature_identity(&self, basis: &BlobIdentity) -> BlobIdentity {
        basis.with_suffix(&self.delta.signature_suffix)
    }

    /// Compute the basis signature with the configured block size and store it
    /// next to the basis. Returns the signature's identity.
    pub async fn store_signature(&self, basis_id: &str) -> DeltaBlobResult<BlobIdentity> {
        let basis = self.identity(basis_id)?;
        let sig_identity = self.signature_identity(&basis);
        let signature = self
            .compute_signature(basis_id, self.delta.block_size)
            .await?;

        self.write_at(&sig_identity, encode_signature(&signature)).await?;
        info!(
            basis = %basis,
            signature = %sig_identity,
            blocks = signature.blocks().len(),
            "stored signature"
        );
        Ok(sig_identity)
    }

    /// Encode `target` against the basis and store the delta at `delta_id`.
    ///
    /// Uses the stored basis signature, or computes one when none is stored.
    pub async fn store_delta(
        &self,
        basis_id: &str,
        target: &[u8],
        delta_id: &str,
    ) -> DeltaBlobResult<DeltaStats> {
        if target.is_empty() {
            return Err(DeltaBlobError::EmptyInput("target"));
        }
        let basis = self.identity(basis_id)?;
        let delta_identity = self.identity(delta_id)?;

        let signature = match self.read_at(&self.signature_identity(&basis)).await {
            Ok(bytes) => decode_signature(&bytes)?,
            Err(DeltaBlobError::NotFound(_)) => {
                debug!(basis = %basis, "no stored signature, computing one");
                self.compute_signature(basis_id, self.delta.block_size).await?
            }
            Err(e) => return Err(e),
        };

        let script = self.build_delta(&signature, target)?;
        let stats = script.stats();
        self.write_at(&delta_identity, encode_delta(&script)).await?;
        info!(
            basis = %basis,
            delta = %delta_identity,
            copied = stats.copied_bytes,
            inserted = stats.inserted_bytes,
            "stored delta"
        );
        Ok(stats)
    }

    /// Rebuild a version from `basis_id` and `delta_id` and store it at
    /// `output_id`. Returns the number of bytes written.
    ///
    /// With `verify_basis` set, the stored basis signature must exist and
    /// every copied block must still match it.
    pub async fn restore(
        &self,
        basis_id: &str,
        delta_id: &str,
        output_id: &str,
    ) -> DeltaBlobResult<u64> {
        let basis = self.identity(basis_id)?;
        let output = self.identity(output_id)?;

        let basis_bytes = self.read_at(&basis).await?;
        let delta_bytes = self.read_blob(delta_id).await?;

        let rebuilt = if self.delta.verify_basis {
            let sig_bytes = self.read_at(&self.signature_identity(&basis)).await?;
            self.apply_delta_verified(&basis_bytes, &delta_bytes, &sig_bytes)?
        } else {
            self.apply_delta(&basis_bytes, &delta_bytes)?
        };

        let len = rebuilt.len() as u64;
        self.write_at(&output, rebuilt).await?;
        info!(basis = %basis, output = %output, bytes = len, "restored blob");
        Ok(len)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn signature_builder(&self, block_size: usize) -> DeltaBlobResult<SignatureBuilder> {
        let builder = SignatureBuilder::new(block_size)?;
        Ok(match &self.cancel {
            Some(token) => builder.with_cancellation(token.clone()),
            None => builder,
        })
    }

    fn build_delta(&self, signature: &Signature, target: &[u8]) -> DeltaBlobResult<DeltaScript> {
        let builder = DeltaBuilder::new(signature)?;
        let builder = match &self.cancel {
            Some(token) => builder.with_cancellation(token.clone()),
            None => builder,
        };
        builder.build(target)
    }

    fn applier<'s>(&self) -> DeltaApplier<'s> {
        match &self.cancel {
            Some(token) => DeltaApplier::new().with_cancellation(token.clone()),
            None => DeltaApplier::new(),
        }
    }

    fn decode_for_apply(
        &self,
        basis: &[u8],
        delta_bytes: &[u8],
    ) -> DeltaBlobResult<DeltaScript> {
        if basis.is_empty() {
            return Err(DeltaBlobError::EmptyInput("basis"));
        }
        if delta_bytes.is_empty() {
            return Err(DeltaBlobError::EmptyInput("delta"));
        }
        decode_delta(delta_bytes)
    }
}
