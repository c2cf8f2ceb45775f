//! Storage contracts consumed by the derivation engine and payment ledger.
//!
//! The engine never talks to SQL directly; it goes through these traits so the
//! business rules can be exercised against a test double. `Database` is the
//! production implementation.

use crate::error::BillingError;
use crate::models::{
    Invoice, InvoiceDraft, InvoiceStatus, InvoiceWithItems, OrderSnapshot, Payment, PaymentDraft,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Read access to orders, scoped by owner.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fetch an order header plus fully materialized items as a consistent
    /// point-in-time view. Returns `None` when the order does not exist or
    /// belongs to another owner.
    async fn get_order(
        &self,
        owner_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<OrderSnapshot>, BillingError>;
}

/// Outcome of a compare-and-set payment commit.
#[derive(Debug)]
pub enum PaymentOutcome {
    /// The payment row was appended and the invoice updated atomically.
    Applied {
        invoice: Invoice,
        payment: Payment,
    },
    /// `amount_paid` no longer matched the expected value; the caller must
    /// reload the invoice and re-validate before retrying.
    Conflict,
}

/// Invoice and payment persistence, scoped by owner.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Fast-path duplicate check. The unique constraint on `order_id` inside
    /// `insert_invoice` remains the actual enforcement mechanism.
    async fn find_invoice_by_order(
        &self,
        owner_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Invoice>, BillingError>;

    /// Persist an invoice and all of its items in a single atomic unit,
    /// assigning the per-owner invoice number. Fails with
    /// [`BillingError::DuplicateInvoice`] when an invoice already exists for
    /// the draft's order.
    async fn insert_invoice(&self, draft: InvoiceDraft)
        -> Result<InvoiceWithItems, BillingError>;

    async fn get_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, BillingError>;

    /// Atomically append a payment and move the invoice to
    /// `(amount_paid + payment.amount, new_status)`, but only if the
    /// invoice's `amount_paid` still equals `expected_amount_paid`. The
    /// invoice's status is re-checked at commit time: a cancellation that
    /// landed after the caller's read fails the commit with
    /// [`BillingError::InvoiceNotPayable`].
    async fn commit_payment(
        &self,
        expected_amount_paid: Decimal,
        new_status: InvoiceStatus,
        payment: PaymentDraft,
    ) -> Result<PaymentOutcome, BillingError>;

    /// Guarded cancellation commit: move the invoice to `cancelled` only
    /// while its status still equals `expected_status`. Returns `None` when
    /// the invoice is missing or its status changed since the caller's read.
    async fn commit_cancel(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        expected_status: InvoiceStatus,
    ) -> Result<Option<Invoice>, BillingError>;

    /// Move the owner's `unpaid`/`partially_paid` invoices with a due date
    /// before `as_of` to `overdue`. Returns the number of invoices moved.
    async fn mark_overdue(&self, owner_id: Uuid, as_of: NaiveDate) -> Result<u64, BillingError>;
}
