//! Errors raised while assembling the request path.
//!
//! Visitors never see these: they are only produced when a gate or capture is
//! built from configuration, and the caller then serves uncached.

/// Structured errors for the request path.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// An admin-configured regex does not compile.
    #[error("INVALID_PATTERN: {field}: {source}")]
    InvalidPattern { field: &'static str, source: regex::Error },

    #[error(transparent)]
    Core(#[from] fullpage_core::Error),
}

impl GateError {
    pub fn code(&self) -> &'static str {
        match self {
            GateError::InvalidPattern { .. } => "INVALID_PATTERN",
            GateError::Core(e) => e.code(),
        }
    }
}
