use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnisyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type UnisyncResult<T> = Result<T, UnisyncError>;

/// Operator-facing classification of a failed stream or run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Credentials invalid or revoked; the tenant has to reconnect.
    UserError,
    /// The provider failed server-side.
    RemoteError,
    /// Platform defect.
    InternalError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::UserError => "USER_ERROR",
            ErrorType::RemoteError => "REMOTE_ERROR",
            ErrorType::InternalError => "INTERNAL_ERROR",
        }
    }

    /// A user error makes every remaining stream of the run pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorType::UserError)
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_type: ErrorType,
    pub error_detail: String,
}

impl ErrorInfo {
    pub fn new(error_type: ErrorType, error_detail: impl Into<String>) -> Self {
        Self {
            error_type,
            error_detail: error_detail.into(),
        }
    }

    pub fn internal(error_detail: impl Into<String>) -> Self {
        Self::new(ErrorType::InternalError, error_detail)
    }
}

impl From<&UnisyncError> for ErrorInfo {
    fn from(err: &UnisyncError) -> Self {
        ErrorInfo::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_serializes_screaming_snake_case() {
        let json = serde_json::to_value(ErrorType::UserError).unwrap();
        assert_eq!(json, serde_json::json!("USER_ERROR"));
        let parsed: ErrorType = serde_json::from_value(serde_json::json!("REMOTE_ERROR")).unwrap();
        assert_eq!(parsed, ErrorType::RemoteError);
    }

    #[test]
    fn only_user_error_is_fatal() {
        assert!(ErrorType::UserError.is_fatal());
        assert!(!ErrorType::RemoteError.is_fatal());
        assert!(!ErrorType::InternalError.is_fatal());
    }

    #[test]
    fn database_errors_classify_as_internal() {
        let err = UnisyncError::Database("connection reset".to_string());
        let info = ErrorInfo::from(&err);
        assert_eq!(info.error_type, ErrorType::InternalError);
        assert_eq!(info.error_detail, "database error: connection reset");
    }
}
