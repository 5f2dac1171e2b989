use crate::backend::RowKey;

/// Error taxonomy for store operations.
///
/// Only `StorageUnavailable` is safe to retry blindly; `VersionConflict`
/// requires the caller to re-read and reapply its change first. The store
/// never retries on the caller's behalf.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A batch operation applied some keys but not all. The failed subset is
    /// returned so the caller can retry; every batch step is idempotent, so
    /// retrying the whole operation is also safe.
    #[error("partial failure ({} keys failed): {detail}", failed.len())]
    PartialFailure { failed: Vec<RowKey>, detail: String },

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: String,
        column: String,
        detail: String,
    },
}

impl StoreError {
    /// True only for transient substrate faults.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::VersionConflict(_) => "version_conflict",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::PartialFailure { .. } => "partial_failure",
            Self::CorruptRow { .. } => "corrupt_row",
        }
    }

    pub(crate) fn corrupt(
        table: impl Into<String>,
        column: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::CorruptRow {
            table: table.into(),
            column: column.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(StoreError::StorageUnavailable("timeout".into()).is_retryable());
        assert!(!StoreError::VersionConflict("stale".into()).is_retryable());
        assert!(!StoreError::NotFound("session".into()).is_retryable());
        assert!(!StoreError::PartialFailure {
            failed: vec![],
            detail: "delete".into()
        }
        .is_retryable());
    }

    #[test]
    fn kind_strings() {
        assert_eq!(StoreError::AlreadyExists("s".into()).kind(), "already_exists");
        assert_eq!(
            StoreError::corrupt("state", "state_1", "missing").kind(),
            "corrupt_row"
        );
    }
}
