use crate::driver::BackoffPolicy;

/// Tuning for an [`UploadSession`](crate::UploadSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Capacity reserved for the session's internal buffer when it opens.
    pub initial_buffer_size: usize,
    /// Timeouts used while waiting on the transport.
    pub backoff: BackoffPolicy,
    /// Emits a trace event for every increment of the wait loop.
    pub logging_enabled: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            initial_buffer_size: 128 * 1024,
            backoff: BackoffPolicy::default(),
            logging_enabled: false,
        }
    }
}
