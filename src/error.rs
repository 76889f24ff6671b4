use crate::bus::PublishError;
use crate::cyril::CyrilError;
use crate::directory::DirectoryError;
use crate::domain::ErrorInformation;
use crate::ledger::LedgerError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// FSPIOP error codes the switch emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InternalServerError,
    ValidationError,
    ModifiedRequest,
    TransferIdNotFound,
    TransferExpired,
    PayerInsufficientLiquidity,
    PayeeRejection,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::InternalServerError => "2001",
            ErrorCode::ValidationError => "3100",
            ErrorCode::ModifiedRequest => "3106",
            ErrorCode::TransferIdNotFound => "3208",
            ErrorCode::TransferExpired => "3303",
            ErrorCode::PayerInsufficientLiquidity => "4001",
            ErrorCode::PayeeRejection => "5100",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::InternalServerError => "Internal server error",
            ErrorCode::ValidationError => "Generic validation error",
            ErrorCode::ModifiedRequest => "Modified request",
            ErrorCode::TransferIdNotFound => "Transfer ID not found",
            ErrorCode::TransferExpired => "Transfer expired",
            ErrorCode::PayerInsufficientLiquidity => "Payer FSP insufficient liquidity",
            ErrorCode::PayeeRejection => "Payee rejection",
        }
    }

    /// Error object with an optional detail appended to the description.
    pub fn information(&self, detail: Option<&str>) -> ErrorInformation {
        let error_description = match detail {
            Some(detail) if !detail.is_empty() => format!("{} - {}", self.description(), detail),
            _ => self.description().to_string(),
        };
        ErrorInformation {
            error_code: self.code().to_string(),
            error_description,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.description())
    }
}

/// Top-level error of the transfer state machine.
///
/// Business outcomes (failed validation, limit breach, modified duplicate)
/// are not errors; they come back as `HandlerOutcome` values. What remains
/// here either needs a retry or indicates inconsistent stored state.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Modified request: {0}")]
    ModifiedRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl SwitchError {
    /// Whether redelivering the same message may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SwitchError::Infrastructure(_))
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            SwitchError::Validation(_) => ErrorCode::ValidationError,
            SwitchError::ModifiedRequest(_) => ErrorCode::ModifiedRequest,
            SwitchError::NotFound(_) => ErrorCode::TransferIdNotFound,
            SwitchError::Internal(_) | SwitchError::Infrastructure(_) => {
                ErrorCode::InternalServerError
            }
        }
    }
}

/// Operator endpoints answer with an FSPIOP error body.
impl IntoResponse for SwitchError {
    fn into_response(self) -> Response {
        let status = match &self {
            SwitchError::Validation(_) => StatusCode::BAD_REQUEST,
            SwitchError::ModifiedRequest(_) => StatusCode::CONFLICT,
            SwitchError::NotFound(_) => StatusCode::NOT_FOUND,
            SwitchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SwitchError::Infrastructure(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let detail = match &self {
            SwitchError::Validation(msg)
            | SwitchError::ModifiedRequest(msg)
            | SwitchError::NotFound(msg)
            | SwitchError::Internal(msg)
            | SwitchError::Infrastructure(msg) => msg.clone(),
        };
        let body = Json(json!({ "errorInformation": self.error_code().information(Some(&detail)) }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for SwitchError {
    fn from(err: sqlx::Error) -> Self {
        SwitchError::Infrastructure(err.to_string())
    }
}

impl From<PublishError> for SwitchError {
    fn from(err: PublishError) -> Self {
        SwitchError::Infrastructure(err.to_string())
    }
}

impl From<DirectoryError> for SwitchError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Database(e) => SwitchError::from(e),
        }
    }
}

impl From<LedgerError> for SwitchError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Database(e) => SwitchError::from(e),
            other => SwitchError::Internal(other.to_string()),
        }
    }
}

impl From<CyrilError> for SwitchError {
    fn from(err: CyrilError) -> Self {
        match err {
            CyrilError::Database(e) => SwitchError::from(e),
            CyrilError::Directory(e) => SwitchError::from(e),
            other => SwitchError::Internal(other.to_string()),
        }
    }
}
