//! Typed errors for transfer operations.
//!
//! Environmental failures (missing objects, backend rejections, wrong
//! region) are reported through [`TransferError`].  Protocol violations --
//! re-entering the transfer registry in the wrong stage, overshooting a
//! goal counter -- are logic defects and panic instead; see the assertions
//! in `registry.rs` and `goal.rs`.

use thiserror::Error;

/// Errors surfaced by the transfer engine and its backends.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The bucket/object does not exist.  Existence probes map this back
    /// to a boolean; everything else treats it as a real error.
    #[error("object not found: [{bucket}] {key}")]
    NotFound { bucket: String, key: String },

    /// The backend answered with a permanent redirect, which for S3 means
    /// the request was signed for the wrong region.  Distinguished because
    /// it is actionable by the caller.
    #[error("wrong region for bucket [{bucket}]")]
    WrongRegion { bucket: String },

    /// The backend rejected or failed the request.
    #[error("backend {op} failed: {message}")]
    Backend { op: &'static str, message: String },

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl TransferError {
    /// Build a [`TransferError::Backend`] from any displayable SDK error.
    pub fn backend(op: &'static str, err: impl std::fmt::Display) -> Self {
        TransferError::Backend {
            op,
            message: err.to_string(),
        }
    }

    /// True for the not-found/existence-check class of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinguishable() {
        let err = TransferError::NotFound {
            bucket: "b".to_string(),
            key: "k".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!TransferError::backend("put_object", "boom").is_not_found());
    }

    #[test]
    fn backend_error_carries_operation() {
        let err = TransferError::backend("upload_part", "access denied");
        assert_eq!(err.to_string(), "backend upload_part failed: access denied");
    }
}
