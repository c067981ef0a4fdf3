//! Error types for the Wallet Ledger Service

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;
use validator::ValidationErrors;
use zentra_core::ZentraError;
use zentra_lumadb::LumaDbError;

/// Result type alias
pub type Result<T> = std::result::Result<T, WalletError>;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("{0}")]
    Validation(String),

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Decimal, requested: Decimal },

    #[error("Account is frozen")]
    AccountFrozen,

    #[error("Transaction {0} has already been resolved")]
    AlreadyResolved(Uuid),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Investment plan '{0}' not found")]
    PlanNotFound(String),

    #[error("Amount {amount} is outside the {plan} plan range ({range})")]
    AmountOutOfRange {
        plan: String,
        amount: Decimal,
        range: String,
    },

    #[error("Account still holds funds, pending requests or active investments")]
    AccountNotEmpty,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Account is busy, please retry")]
    Unavailable,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WalletError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn amount_too_large() -> Self {
        Self::Validation("Amount is too large".to_string())
    }

    pub fn admin_required() -> Self {
        Self::Forbidden("Admin privileges required".to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::InvalidAmount
            | Self::InsufficientFunds { .. }
            | Self::AmountOutOfRange { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::AccountFrozen => StatusCode::FORBIDDEN,
            Self::NotFound(_) | Self::PlanNotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyResolved(_) | Self::AccountNotEmpty | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::AccountFrozen => "ACCOUNT_FROZEN",
            Self::AlreadyResolved(_) => "ALREADY_RESOLVED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::PlanNotFound(_) => "PLAN_NOT_FOUND",
            Self::AmountOutOfRange { .. } => "AMOUNT_OUT_OF_RANGE",
            Self::AccountNotEmpty => "ACCOUNT_NOT_EMPTY",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Conflict(_) => "CONFLICT",
            Self::Unavailable => "UNAVAILABLE",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<LumaDbError> for WalletError {
    fn from(err: LumaDbError) -> Self {
        WalletError::Storage(err.to_string())
    }
}

impl From<ValidationErrors> for WalletError {
    fn from(errors: ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();
        messages.sort();
        messages.dedup();
        WalletError::Validation(messages.join("; "))
    }
}

impl From<JsonRejection> for WalletError {
    fn from(rejection: JsonRejection) -> Self {
        WalletError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for WalletError {
    fn from(rejection: PathRejection) -> Self {
        WalletError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for WalletError {
    fn from(rejection: QueryRejection) -> Self {
        WalletError::Validation(rejection.body_text())
    }
}

impl From<WalletError> for ZentraError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Storage(msg) => ZentraError::Database(msg),
            WalletError::Unavailable => ZentraError::Unavailable("account lock contention".to_string()),
            WalletError::Unauthorized(msg) => ZentraError::Auth(msg),
            WalletError::Forbidden(msg) => ZentraError::Forbidden(msg),
            WalletError::NotFound(what) => ZentraError::NotFound(what),
            WalletError::Internal(msg) => ZentraError::Internal(msg),
            other => ZentraError::Validation(other.to_string()),
        }
    }
}

impl IntoResponse for WalletError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            WalletError::Storage(_) | WalletError::Internal(_) => {
                tracing::error!("Internal error: {:?}", self);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "message": message,
            "code": self.error_code()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_mapping() {
        assert_eq!(WalletError::InvalidAmount.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            WalletError::InsufficientFunds { available: dec!(0), requested: dec!(1) }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(WalletError::admin_required().status_code(), StatusCode::FORBIDDEN);
        assert_eq!(WalletError::AccountFrozen.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(WalletError::AlreadyResolved(Uuid::nil()).status_code(), StatusCode::CONFLICT);
        assert_eq!(WalletError::PlanNotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(WalletError::Unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(WalletError::Storage("down".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let response = WalletError::Storage("password=hunter2".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_conversion_to_service_error() {
        let err: ZentraError = WalletError::Storage("down".into()).into();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        let err: ZentraError = WalletError::AccountNotEmpty.into();
        assert_eq!(err.status_code(), 400);
    }
}
