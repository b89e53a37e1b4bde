//! Runtime error types for the quarry turn pipeline.
//!
//! All fallible operations return `QuarryResult<T>`. Tool-level failures are
//! not errors here: they travel to the model as `ToolResult::Error` so the
//! conversation can continue.

use thiserror::Error;

/// The unified error type for the quarry runtime.
#[derive(Debug, Error)]
pub enum QuarryError {
    /// No API key is configured for the selected provider. Never retried.
    #[error("missing API key for provider '{provider}'")]
    MissingApiKey { provider: String },

    /// The provider selection cannot be served with the current settings.
    #[error("unsupported provider configuration: {reason}")]
    UnsupportedProvider { reason: String },

    /// The request is unusable before it leaves the process (e.g. no messages).
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The vendor answered with a non-2xx status.
    #[error("{provider} API error: {status} {status_text} - {body}")]
    ProviderHttp {
        provider: String,
        status: u16,
        status_text: String,
        body: String,
    },

    /// The request never got a usable HTTP response.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// The vendor response could not be mapped into a `ChatResponse`.
    #[error("unexpected provider response: {reason}")]
    ProviderResponse { reason: String },

    /// The turn exceeded its wall-clock budget.
    #[error("turn timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The caller cancelled the turn.
    #[error("turn cancelled")]
    Cancelled,

    /// The rate limiter refused to start a turn.
    #[error("rate limit exceeded for '{key}', retry after {retry_after_secs}s")]
    RateLimited { key: String, retry_after_secs: u64 },

    /// The audit sink could not persist an entry.
    ///
    /// Fatal for the turn: a tool call that cannot be audited is not executed.
    #[error("audit write failed: {reason}")]
    AuditWriteFailed { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// A JSON Schema could not be compiled or applied.
    #[error("schema validation error: {reason}")]
    SchemaValidation { reason: String },

    /// An uploaded file was refused at the ingestion boundary.
    #[error("upload rejected: {reason}")]
    UploadRejected { reason: String },

    /// The upload session does not exist or has expired.
    #[error("upload session '{session_id}' not found or expired")]
    SessionNotFound { session_id: String },

    /// A query plan's dependencies form a cycle or name a missing step.
    #[error("invalid query plan: {reason}")]
    PlanCycle { reason: String },
}

impl QuarryError {
    /// Whether a caller may retry the whole turn with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderHttp { status, .. } => {
                *status == 408 || *status == 429 || (500..=599).contains(status)
            }
            Self::Transport { .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// A natural-language summary safe to show end users.
    ///
    /// Vendor bodies and internal details are never included.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingApiKey { .. } | Self::UnsupportedProvider { .. } | Self::ConfigError { .. } => {
                "This agent is not configured correctly yet. Please check its model settings.".to_string()
            }
            Self::ProviderHttp { status: 429, .. } => {
                "The AI service is busy right now. Please try again in a moment.".to_string()
            }
            Self::ProviderHttp { .. } | Self::Transport { .. } | Self::ProviderResponse { .. } => {
                "I couldn't reach the AI service just now. Please try again.".to_string()
            }
            Self::Timeout { .. } => {
                "That question took too long to answer. Try narrowing it down.".to_string()
            }
            Self::Cancelled => "The request was cancelled.".to_string(),
            Self::RateLimited { retry_after_secs, .. } => format!(
                "You're sending messages too quickly. Please wait {} seconds and try again.",
                retry_after_secs
            ),
            Self::UploadRejected { reason } => format!("That file couldn't be used: {}", reason),
            Self::SessionNotFound { .. } => {
                "Your uploaded data has expired. Please upload the file again.".to_string()
            }
            Self::InvalidRequest { .. }
            | Self::AuditWriteFailed { .. }
            | Self::SchemaValidation { .. }
            | Self::PlanCycle { .. } => {
                "Something went wrong while answering. Please try again.".to_string()
            }
        }
    }
}

/// Convenience alias used throughout the quarry crates.
pub type QuarryResult<T> = Result<T, QuarryError>;
