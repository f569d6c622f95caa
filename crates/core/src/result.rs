//! Execution results and the error-code taxonomy
//!
//! Business failures never crash a session: the engine folds every
//! categorized error into an `ExecutionResult` that rides a normal
//! `voice:response` to the client.

use serde::{Deserialize, Serialize};

/// Machine-readable failure code, carried on failed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    NotFound,
    CustomerNotFound,
    MultipleCustomers,
    MultiplePendingInvoices,
    DuplicateFound,
    InsufficientStock,
    MissingPhone,
    InvalidOtp,
    AlreadyCancelled,
    OpeningBalanceExists,
    Conflict,
    BusinessLogic,
    ExternalService,
    Database,
    RateLimit,
    Authentication,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::NotFound => "NOT_FOUND",
            Self::CustomerNotFound => "CUSTOMER_NOT_FOUND",
            Self::MultipleCustomers => "MULTIPLE_CUSTOMERS",
            Self::MultiplePendingInvoices => "MULTIPLE_PENDING_INVOICES",
            Self::DuplicateFound => "DUPLICATE_FOUND",
            Self::InsufficientStock => "INSUFFICIENT_STOCK",
            Self::MissingPhone => "MISSING_PHONE",
            Self::InvalidOtp => "INVALID_OTP",
            Self::AlreadyCancelled => "ALREADY_CANCELLED",
            Self::OpeningBalanceExists => "OPENING_BALANCE_EXISTS",
            Self::Conflict => "CONFLICT",
            Self::BusinessLogic => "BUSINESS_LOGIC",
            Self::ExternalService => "EXTERNAL_SERVICE",
            Self::Database => "DATABASE",
            Self::RateLimit => "RATE_LIMIT",
            Self::Authentication => "AUTHENTICATION",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Outcome of one dispatched intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Operator-facing sentence (pre-template; the response generator may
    /// rephrase it in the session language).
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn ok_with(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(code),
        }
    }

    pub fn fail_with(
        code: ErrorCode,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Some(data),
            error: Some(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::CustomerNotFound).unwrap();
        assert_eq!(json, "\"CUSTOMER_NOT_FOUND\"");
    }

    #[test]
    fn failed_result_carries_code() {
        let result = ExecutionResult::fail(ErrorCode::InsufficientStock, "stock kam hai");
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorCode::InsufficientStock));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"], "INSUFFICIENT_STOCK");
        assert!(json.get("data").is_none());
    }
}
