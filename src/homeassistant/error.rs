use thiserror::Error;

pub type HaResult<T> = std::result::Result<T, HaError>;

#[derive(Debug, Error)]
pub enum HaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Service call {service} failed: {reason}")]
    ServiceCallFailed { service: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
