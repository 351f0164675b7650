//! Error types and conversions

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Token error: {0}")]
    Token(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Backend request failed: {0}")]
    Api(String),

    #[error("Authentication failed")]
    Unauthorized,

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}

/// Terminal outcome of a failed token refresh.
///
/// Cloneable so a single in-flight refresh can settle every waiter with the
/// same failure (the shared refresh future requires `Clone` results).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Token refresh failed: {0}")]
pub struct RefreshError(pub String);

impl RefreshError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
