use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured error body returned to HTTP callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error kind (e.g. "INVALID_TRANSITION")
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Domain error taxonomy. Every operation returns one of these kinds so
/// callers can branch on the variant rather than parse message strings.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Purchase order {0} already has a pending amendment")]
    AmendmentPending(Uuid),

    #[error("Purchase order {order_id} cannot be amended: {reason}")]
    NotAmendable { order_id: Uuid, reason: String },

    #[error("References already covered by another vendor bill: {references:?}")]
    AlreadyLinked { references: Vec<Uuid> },

    #[error("User {0} already holds an active petty-cash card")]
    DuplicateActiveCard(Uuid),

    #[error("Requested amount {requested} exceeds remaining balance {balance}")]
    AmountExceedsBalance {
        requested: Decimal,
        balance: Decimal,
    },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Company bill {invoice_id} is not payable: {advice}")]
    CompanyBillNotPayable { invoice_id: Uuid, advice: String },

    #[error("Wrong bill type: {0}")]
    WrongBillType(String),

    #[error("Invoice {0} has recorded payments and cannot be deleted")]
    HasPayments(Uuid),

    #[error("Monthly limit {limit} exceeded: approved spend would reach {would_be}")]
    MonthlyLimitExceeded { limit: Decimal, would_be: Decimal },

    #[error("Unauthorized actor: {0}")]
    UnauthorizedActor(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// Machine-readable kind code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ValidationError(_) => "VALIDATION",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AlreadyProcessed(_) => "ALREADY_PROCESSED",
            Self::AmendmentPending(_) => "AMENDMENT_PENDING",
            Self::NotAmendable { .. } => "NOT_AMENDABLE",
            Self::AlreadyLinked { .. } => "ALREADY_LINKED",
            Self::DuplicateActiveCard(_) => "DUPLICATE_ACTIVE_CARD",
            Self::AmountExceedsBalance { .. } => "AMOUNT_EXCEEDS_BALANCE",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::CompanyBillNotPayable { .. } => "COMPANY_BILL_NOT_PAYABLE",
            Self::WrongBillType(_) => "WRONG_BILL_TYPE",
            Self::HasPayments(_) => "HAS_PAYMENTS",
            Self::MonthlyLimitExceeded { .. } => "MONTHLY_LIMIT_EXCEEDED",
            Self::UnauthorizedActor(_) => "UNAUTHORIZED_ACTOR",
            Self::EventError(_) => "EVENT_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::WrongBillType(_)
            | Self::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            Self::AlreadyProcessed(_)
            | Self::AmendmentPending(_)
            | Self::AlreadyLinked { .. }
            | Self::DuplicateActiveCard(_)
            | Self::HasPayments(_) => StatusCode::CONFLICT,
            Self::NotAmendable { .. }
            | Self::AmountExceedsBalance { .. }
            | Self::InsufficientBalance { .. }
            | Self::CompanyBillNotPayable { .. }
            | Self::MonthlyLimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnauthorizedActor(_) => StatusCode::FORBIDDEN,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            code: self.kind().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn business_rule_errors_keep_their_identifiers() {
        let err = ServiceError::AmountExceedsBalance {
            requested: dec!(10.500),
            balance: dec!(8.000),
        };
        assert_eq!(err.kind(), "AMOUNT_EXCEEDS_BALANCE");
        assert!(err.to_string().contains("10.500"));
        assert!(err.to_string().contains("8.000"));
    }

    #[test]
    fn status_codes_separate_conflicts_from_validation() {
        let conflict = ServiceError::AmendmentPending(Uuid::new_v4());
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let transition = ServiceError::InvalidTransition {
            from: "draft".into(),
            to: "sent".into(),
        };
        assert_eq!(transition.status_code(), StatusCode::BAD_REQUEST);

        let forbidden = ServiceError::UnauthorizedActor("not the card assignee".into());
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ServiceError::InternalError("connection pool exhausted".into());
        assert_eq!(err.response_message(), "Internal server error");
    }
}
