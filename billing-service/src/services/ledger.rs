//! Payment ledger: records payments against invoices and keeps
//! `amount_paid`/`status` consistent.
//!
//! The read-modify-write is committed through a compare-and-set on
//! `amount_paid` so the overpayment check stays correct when two payments
//! race on the same invoice. A stale read is retried once with fresh state
//! before surfacing `ConcurrencyConflict`.

use crate::error::BillingError;
use crate::models::{Invoice, InvoiceStatus, Payment, PaymentDraft, PaymentMethod};
use crate::services::metrics::{PAYMENTS_TOTAL, PAYMENT_AMOUNT_TOTAL};
use crate::services::store::{InvoiceStore, PaymentOutcome};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One retry after a conflicting concurrent update.
const CAS_ATTEMPTS: u32 = 2;

/// Applies payments to invoices.
#[derive(Clone)]
pub struct PaymentLedger<S> {
    store: S,
}

impl<S> PaymentLedger<S>
where
    S: InvoiceStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Append a payment to an invoice and recompute its paid status.
    ///
    /// Rejects non-positive amounts, payments against cancelled invoices,
    /// and any payment that would push `amount_paid` past `total`
    /// (overpayments are rejected, never capped).
    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %invoice_id, amount = %amount))]
    pub async fn apply_payment(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<(Invoice, Payment), BillingError> {
        if amount <= Decimal::ZERO {
            return Err(BillingError::InvalidAmount(amount));
        }

        for attempt in 0..CAS_ATTEMPTS {
            let invoice = self
                .store
                .get_invoice(owner_id, invoice_id)
                .await?
                .ok_or(BillingError::NotFound { entity: "Invoice" })?;

            if InvoiceStatus::from_string(&invoice.status) == InvoiceStatus::Cancelled {
                return Err(BillingError::InvoiceNotPayable {
                    status: invoice.status,
                });
            }

            if invoice.amount_paid + amount > invoice.total {
                return Err(BillingError::Overpayment {
                    amount,
                    amount_paid: invoice.amount_paid,
                    total: invoice.total,
                });
            }

            let new_paid = invoice.amount_paid + amount;
            let new_status = if new_paid == invoice.total {
                InvoiceStatus::Paid
            } else {
                InvoiceStatus::PartiallyPaid
            };

            let draft = PaymentDraft {
                invoice_id,
                owner_id,
                amount,
                method,
            };

            match self
                .store
                .commit_payment(invoice.amount_paid, new_status, draft)
                .await?
            {
                PaymentOutcome::Applied { invoice, payment } => {
                    PAYMENTS_TOTAL.with_label_values(&[method.as_str()]).inc();
                    if let Some(amount_f64) = amount.to_f64() {
                        PAYMENT_AMOUNT_TOTAL.inc_by(amount_f64);
                    }

                    info!(
                        payment_id = %payment.payment_id,
                        invoice_number = %invoice.invoice_number,
                        amount = %payment.amount,
                        status = %invoice.status,
                        "Payment applied"
                    );

                    return Ok((invoice, payment));
                }
                PaymentOutcome::Conflict => {
                    warn!(attempt = attempt, "Concurrent payment detected, reloading invoice");
                }
            }
        }

        Err(BillingError::ConcurrencyConflict)
    }

    /// Soft-cancel an invoice. Only invoices without recorded payments
    /// (`unpaid` or `overdue`) can be cancelled; invoices are never deleted.
    /// A payment that lands between the read and the commit surfaces as
    /// `ConcurrencyConflict`.
    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %invoice_id))]
    pub async fn cancel_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, BillingError> {
        let invoice = self
            .store
            .get_invoice(owner_id, invoice_id)
            .await?
            .ok_or(BillingError::NotFound { entity: "Invoice" })?;

        let status = InvoiceStatus::from_string(&invoice.status);
        if !matches!(status, InvoiceStatus::Unpaid | InvoiceStatus::Overdue) {
            return Err(BillingError::InvoiceNotPayable {
                status: invoice.status,
            });
        }

        let cancelled = self
            .store
            .commit_cancel(owner_id, invoice_id, status)
            .await?
            .ok_or(BillingError::ConcurrencyConflict)?;

        info!(invoice_number = %cancelled.invoice_number, "Invoice cancelled");

        Ok(cancelled)
    }
}
