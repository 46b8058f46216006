/// Convenient result alias for backend operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures raised by a [`StorageBackend`](crate::StorageBackend). These stop
/// at the [`ResultStore`](crate::ResultStore) boundary.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// A stored document could not be encoded or decoded.
    #[error("stored document is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The write would exceed the backend's quota.
    #[error("storage quota exceeded ({needed} bytes needed, quota {quota})")]
    QuotaExceeded {
        /// Size the store would have after the write.
        needed: usize,
        /// Configured quota.
        quota: usize,
    },
    /// The backing store cannot be reached at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
