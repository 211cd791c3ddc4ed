//! Error types for queued operations

/// Outcome of a failed queued operation, as seen through its [`Completion`](crate::Completion)
///
/// The queue itself never fails: these errors only reach the producer that
/// chose to await its own operation.
#[derive(Debug, thiserror::Error)]
pub enum OpError<E> {
    /// The operation returned an error
    #[error("operation failed: {0}")]
    Failed(E),

    /// The operation panicked
    #[error("operation panicked: {0}")]
    Panicked(String),

    /// The queue worker is gone and the operation never ran
    #[error("dispatch queue closed")]
    QueueClosed,
}

impl<E> OpError<E> {
    /// Underlying operation error, if the operation ran and failed
    #[inline]
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}
