use thiserror::Error;

/// Top-level error type for the meshrun engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Required run parameters were missing; raised before any
    /// backend call.
    #[error("missing required run parameters: {}", missing.join(", "))]
    Configuration { missing: Vec<String> },
    /// The backend rejected job creation. Carries the raw backend
    /// output alongside the message.
    #[error("job submission rejected: {message}")]
    Submission { message: String, output: String },
    /// The requested server is unknown to the current server list.
    #[error("server '{0}' is not available")]
    ServerUnavailable(String),
    /// Post-success relocation of result files failed. The produced
    /// files are kept; only the forward chain is stopped.
    #[error("failed to relocate {failed} result file(s)")]
    Relocation { failed: usize },
    #[error("backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
