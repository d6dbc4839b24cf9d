/// Shared error type used across all ConvoGate crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("memory: {0}")]
    Memory(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Credits or rate limits exhausted; `hint` tells the caller how to recover.
    #[error("quota: {message}")]
    Quota { message: String, hint: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Cancellation. A normal terminal state, not a failure.
    #[error("stream aborted")]
    StreamAborted,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status code for the user-facing surface.
    pub fn status(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::Json(_) => 400,
            Error::Unauthorized(_) | Error::Auth(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) | Error::SessionNotFound(_) => 404,
            Error::Quota { .. } => 429,
            Error::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Short machine-checkable code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Json(_) | Error::Validation(_) => "validation_error",
            Error::Http(_) | Error::Provider { .. } => "provider_error",
            Error::Timeout(_) => "timeout",
            Error::Memory(_) => "memory_error",
            Error::Config(_) => "config_error",
            Error::Auth(_) | Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::Quota { .. } => "quota_exceeded",
            Error::SessionNotFound(_) => "session_not_found",
            Error::StreamAborted => "stream_aborted",
            Error::Other(_) => "internal_error",
        }
    }

    /// Human-readable message safe to show to end users.
    ///
    /// Provider and transport failures collapse to a generic sentence so
    /// upstream bodies (which may echo headers or keys) never reach the
    /// client.
    pub fn public_message(&self) -> String {
        match self {
            Error::Validation(m)
            | Error::Unauthorized(m)
            | Error::Forbidden(m)
            | Error::NotFound(m) => m.clone(),
            Error::Json(_) => "malformed request body".into(),
            Error::Quota { message, hint } => format!("{message}. {hint}"),
            Error::SessionNotFound(_) => "session not found".into(),
            Error::StreamAborted => "generation stopped".into(),
            Error::Timeout(_) => "the model took too long to respond".into(),
            Error::Http(_) | Error::Provider { .. } => {
                "the model provider failed to produce a response".into()
            }
            Error::Auth(_) => "authentication required".into(),
            _ => "internal error".into(),
        }
    }

    /// Whether a provider call that failed with this error may be retried.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Http(_) => true,
            Error::Provider { message, .. } => {
                message.contains("HTTP 5")
                    || message.contains("HTTP 429")
                    || message.contains("overloaded")
            }
            _ => false,
        }
    }
}
