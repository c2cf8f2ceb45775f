//! Invoice handlers: derivation from orders, retrieval, cancellation, and the
//! overdue sweep.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    dtos::{CreateInvoiceRequest, ListQuery, RefreshOverdueResponse},
    error::BillingError,
    middleware::OwnerContext,
    models::{Invoice, InvoiceStatus, InvoiceWithItems, ListInvoicesFilter},
    services::derivation::DerivationOptions,
    services::store::InvoiceStore,
    AppState,
};

/// Derive the invoice for an order. 201 on success, 404 when the order is
/// missing, 409 when the order is already invoiced, 422 when it has no items.
pub async fn create_invoice(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<CreateInvoiceRequest>>,
) -> Result<(StatusCode, Json<InvoiceWithItems>), BillingError> {
    let Json(payload) = payload.unwrap_or_default();

    let options = DerivationOptions {
        discount: payload.discount,
        tax: payload.tax,
        due_date: payload.due_date,
    };

    let created = state
        .engine
        .create_invoice_from_order(owner.owner_id, order_id, options)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Get an invoice with its items within the owner's scope.
pub async fn get_invoice(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceWithItems>, BillingError> {
    let invoice = state
        .db
        .get_invoice(owner.owner_id, invoice_id)
        .await?
        .ok_or(BillingError::NotFound { entity: "Invoice" })?;

    let items = state
        .db
        .list_invoice_items(owner.owner_id, invoice_id)
        .await?;

    Ok(Json(InvoiceWithItems { invoice, items }))
}

/// List invoices for the owner.
pub async fn list_invoices(
    State(state): State<AppState>,
    owner: OwnerContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Invoice>>, BillingError> {
    let filter = ListInvoicesFilter {
        status: query.status.as_deref().map(InvoiceStatus::from_string),
        customer_id: query.customer_id,
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let invoices = state.db.list_invoices(owner.owner_id, &filter).await?;

    Ok(Json(invoices))
}

/// Soft-cancel an invoice. Invoices with recorded payments cannot be
/// cancelled; invoices are never deleted.
pub async fn cancel_invoice(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, BillingError> {
    tracing::info!(owner_id = %owner.owner_id, invoice_id = %invoice_id, "Cancelling invoice");

    let invoice = state.ledger.cancel_invoice(owner.owner_id, invoice_id).await?;

    Ok(Json(invoice))
}

/// Move the owner's past-due invoices to `overdue`.
pub async fn refresh_overdue(
    State(state): State<AppState>,
    owner: OwnerContext,
) -> Result<Json<RefreshOverdueResponse>, BillingError> {
    let today = chrono::Utc::now().date_naive();
    let moved = state.db.mark_overdue(owner.owner_id, today).await?;

    Ok(Json(RefreshOverdueResponse { moved }))
}
