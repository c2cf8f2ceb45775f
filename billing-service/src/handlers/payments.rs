//! Payment handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    dtos::{PaymentResponse, RecordPaymentRequest},
    error::BillingError,
    middleware::OwnerContext,
    models::{Payment, PaymentMethod},
    AppState,
};

/// Apply a payment to an invoice. 201 on success, 400 on a non-positive
/// amount, 409 when the payment would exceed the invoice total.
pub async fn record_payment(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), BillingError> {
    let method = PaymentMethod::from_string(&payload.method);

    tracing::info!(
        owner_id = %owner.owner_id,
        invoice_id = %invoice_id,
        amount = %payload.amount,
        method = method.as_str(),
        "Recording payment"
    );

    let (invoice, payment) = state
        .ledger
        .apply_payment(owner.owner_id, invoice_id, payload.amount, method)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PaymentResponse { invoice, payment }),
    ))
}

/// List payments recorded against an invoice.
pub async fn list_payments(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, BillingError> {
    let payments = state.db.list_payments(owner.owner_id, invoice_id).await?;

    Ok(Json(payments))
}
