use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DeltaBlobError, DeltaBlobResult};

/// Separator between container and key in a blob identifier
pub const SEPARATOR: char = '/';

/// Container used when an identifier carries no explicit container
pub const DEFAULT_CONTAINER: &str = "default";

/// Address of a blob in the backing store: `{container}/{key}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobIdentity {
    pub container: String,
    pub key: String,
}

impl BlobIdentity {
    /// Parse a caller-supplied identifier.
    ///
    /// An identifier without `/` lands in `default_container`. Otherwise the
    /// text before the first `/` is the container and the rest is the key.
    /// Surrounding whitespace is part of the key and is never stripped.
    pub fn parse(id: &str, default_container: &str) -> DeltaBlobResult<Self> {
        if id.trim().is_empty() {
            return Err(DeltaBlobError::InvalidArgument(
                "blob id is empty or whitespace".into(),
            ));
        }

        let (container, key) = match id.split_once(SEPARATOR) {
            Some((container, key)) => (container, key),
            None => (default_container, id),
        };

        if container.is_empty() {
            return Err(DeltaBlobError::InvalidArgument(format!(
                "blob id has an empty container: {id}"
            )));
        }
        if key.is_empty() {
            return Err(DeltaBlobError::InvalidArgument(format!(
                "blob id has an empty key: {id}"
            )));
        }

        Ok(Self {
            container: container.to_string(),
            key: key.to_string(),
        })
    }

    /// Backend path for this identity (always `/`-separated)
    pub fn path(&self) -> String {
        format!("{}{SEPARATOR}{}", self.container, self.key)
    }

    /// Identity in the same container with `suffix` appended to the key
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self {
            container: self.container.clone(),
            key: format!("{}{suffix}", self.key),
        }
    }
}

impl fmt::Display for BlobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.container, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_id_gets_default_container() {
        let id = BlobIdentity::parse("report.bin", DEFAULT_CONTAINER).unwrap();
        assert_eq!(id.container, "default");
        assert_eq!(id.key, "report.bin");
        assert_eq!(id.path(), "default/report.bin");
    }

    #[test]
    fn explicit_container_is_kept() {
        let id = BlobIdentity::parse("archive/2024/report.bin", DEFAULT_CONTAINER).unwrap();
        assert_eq!(id.container, "archive");
        assert_eq!(id.key, "2024/report.bin");
        assert_eq!(id.to_string(), "archive/2024/report.bin");
    }

    #[test]
    fn empty_ids_are_rejected() {
        for bad in ["", "   ", "/key", "container/"] {
            let err = BlobIdentity::parse(bad, DEFAULT_CONTAINER).unwrap_err();
            assert_eq!(err.code(), "InvalidArgument", "input {bad:?}");
        }
    }

    #[test]
    fn suffix_stays_in_container() {
        let id = BlobIdentity::parse("vault/base.img", DEFAULT_CONTAINER).unwrap();
        let sig = id.with_suffix(".sig");
        assert_eq!(sig.path(), "vault/base.img.sig");
    }

    #[test]
    fn surrounding_whitespace_is_significant() {
        let padded = BlobIdentity::parse(" a", DEFAULT_CONTAINER).unwrap();
        let plain = BlobIdentity::parse("a", DEFAULT_CONTAINER).unwrap();
        assert_eq!(padded.key, " a");
        assert_ne!(padded, plain);
        assert_eq!(padded.path(), "default/ a");

        let err = BlobIdentity::parse(" \t\n", DEFAULT_CONTAINER).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn bare_and_prefixed_ids_share_a_path() {
        let bare = BlobIdentity::parse("doc", "box").unwrap();
        let prefixed = BlobIdentity::parse("box/doc", "other").unwrap();
        assert_eq!(bare, prefixed);
        assert_eq!(bare.path(), "box/doc");
    }
}
