use thiserror::Error;

pub type DeltaBlobResult<T> = Result<T, DeltaBlobError>;

#[derive(Debug, Error)]
pub enum DeltaBlobError {
    /// No backend attached, or the backend rejected its configuration.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    #[error("blob not found: {0}")]
    NotFound(String),

    /// Create-only write hit an identity that already has content.
    #[error("blob already exists: {0}")]
    AlreadyExists(String),

    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    #[error("basis mismatch at offset {offset}: {reason}")]
    BasisMismatch { offset: u64, reason: String },

    #[error("delta application failed: {0}")]
    DeltaApplicationFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeltaBlobError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            DeltaBlobError::NotInitialized(_) => "NotInitialized",
            DeltaBlobError::NotFound(_) => "NotFound",
            DeltaBlobError::AlreadyExists(_) => "AlreadyExists",
            DeltaBlobError::EmptyInput(_) => "EmptyInput",
            DeltaBlobError::InvalidArgument(_) => "InvalidArgument",
            DeltaBlobError::InvalidDelta(_) => "InvalidDelta",
            DeltaBlobError::BasisMismatch { .. } => "BasisMismatch",
            DeltaBlobError::DeltaApplicationFailed(_) => "DeltaApplicationFailed",
            DeltaBlobError::Cancelled => "Cancelled",
            DeltaBlobError::Storage(_) => "Storage",
            DeltaBlobError::Io(_) => "Io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DeltaBlobError::NotFound("x".into()).code(), "NotFound");
        assert_eq!(DeltaBlobError::EmptyInput("basis").code(), "EmptyInput");
        assert_eq!(
            DeltaBlobError::BasisMismatch {
                offset: 4,
                reason: "strong checksum".into()
            }
            .code(),
            "BasisMismatch"
        );
        assert_eq!(DeltaBlobError::Cancelled.code(), "Cancelled");
    }

    #[test]
    fn io_errors_convert() {
        let err: DeltaBlobError = std::io::Error::other("disk gone").into();
        assert_eq!(err.code(), "Io");
        assert!(err.to_string().contains("disk gone"));
    }
}
