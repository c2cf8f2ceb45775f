//! Domain errors for billing-service.
//!
//! Every variant carries a stable machine-readable code so clients can branch
//! on failures without parsing messages.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("Invoice already exists for order {order_id}")]
    DuplicateInvoice { order_id: Uuid },

    #[error("Order {order_id} has no line items")]
    EmptyOrder { order_id: Uuid },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Payment of {amount} would exceed invoice total {total} (paid {amount_paid})")]
    Overpayment {
        amount: Decimal,
        amount_paid: Decimal,
        total: Decimal,
    },

    #[error("Invoice is {status} and cannot accept this operation")]
    InvoiceNotPayable { status: String },

    #[error("Order cannot transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Conflicting concurrent update, retries exhausted")]
    ConcurrencyConflict,

    #[error(transparent)]
    Infra(#[from] AppError),
}

impl BillingError {
    /// Stable error code surfaced in responses.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::NotFound { .. } => "not_found",
            BillingError::DuplicateInvoice { .. } => "duplicate_invoice",
            BillingError::EmptyOrder { .. } => "empty_order",
            BillingError::InvalidAmount(_) => "invalid_amount",
            BillingError::Overpayment { .. } => "overpayment",
            BillingError::InvoiceNotPayable { .. } => "invoice_not_payable",
            BillingError::InvalidStatusTransition { .. } => "invalid_status_transition",
            BillingError::ConcurrencyConflict => "concurrency_conflict",
            BillingError::Infra(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            BillingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BillingError::DuplicateInvoice { .. } => StatusCode::CONFLICT,
            BillingError::EmptyOrder { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            BillingError::Overpayment { .. } => StatusCode::CONFLICT,
            BillingError::InvoiceNotPayable { .. } => StatusCode::CONFLICT,
            BillingError::InvalidStatusTransition { .. } => StatusCode::BAD_REQUEST,
            BillingError::ConcurrencyConflict => StatusCode::CONFLICT,
            BillingError::Infra(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(err: validator::ValidationErrors) -> Self {
        BillingError::Infra(AppError::ValidationError(err))
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: &'static str,
        }

        crate::services::metrics::ERRORS_TOTAL
            .with_label_values(&[self.code()])
            .inc();

        match self {
            // Infra errors keep the shared envelope (validation details, 5xx).
            BillingError::Infra(err) => err.into_response(),
            other => {
                let body = ErrorResponse {
                    error: other.to_string(),
                    code: other.code(),
                };
                (other.status(), Json(body)).into_response()
            }
        }
    }
}
