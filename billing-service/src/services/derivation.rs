//! Invoice derivation engine: the one-time conversion of an order into an
//! immutable invoice.
//!
//! Items are copied from the order at derivation time; the invoice is
//! decoupled from the order afterwards. At most one invoice can ever exist
//! per order, enforced by the store's unique constraint on `order_id`.

use crate::error::BillingError;
use crate::models::{InvoiceDraft, InvoiceItemDraft, InvoiceWithItems, OrderSnapshot};
use crate::services::metrics::{INVOICES_TOTAL, INVOICE_AMOUNT_TOTAL};
use crate::services::store::{InvoiceStore, OrderStore};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

/// Optional adjustments supplied by the caller at derivation time.
/// Discount and tax default to zero.
#[derive(Debug, Clone, Default)]
pub struct DerivationOptions {
    pub discount: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
}

/// Computed monetary breakdown for an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Compute `subtotal = sum(quantity * unit_price)` and
/// `total = subtotal - discount + tax` with exact decimal arithmetic.
pub fn compute_totals(
    snapshot: &OrderSnapshot,
    discount: Decimal,
    tax: Decimal,
) -> Result<InvoiceTotals, BillingError> {
    if discount < Decimal::ZERO {
        return Err(BillingError::InvalidAmount(discount));
    }
    if tax < Decimal::ZERO {
        return Err(BillingError::InvalidAmount(tax));
    }

    let subtotal: Decimal = snapshot
        .items
        .iter()
        .map(|item| item.quantity * item.unit_price)
        .sum();
    let total = subtotal - discount + tax;

    if total < Decimal::ZERO {
        return Err(BillingError::InvalidAmount(total));
    }

    Ok(InvoiceTotals {
        subtotal,
        discount,
        tax,
        total,
    })
}

/// Derives invoices from orders.
#[derive(Clone)]
pub struct DerivationEngine<S> {
    store: S,
}

impl<S> DerivationEngine<S>
where
    S: OrderStore + InvoiceStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Create the invoice for an order.
    ///
    /// Fails with `NotFound` when the order is missing or owned by another
    /// tenant, `EmptyOrder` when there is nothing to bill, and
    /// `DuplicateInvoice` when the order was already invoiced. Re-invoking
    /// rejects rather than returning the existing invoice, so a
    /// double-submitting caller can detect its bug.
    #[instrument(skip(self, options), fields(owner_id = %owner_id, order_id = %order_id))]
    pub async fn create_invoice_from_order(
        &self,
        owner_id: Uuid,
        order_id: Uuid,
        options: DerivationOptions,
    ) -> Result<InvoiceWithItems, BillingError> {
        let snapshot = self
            .store
            .get_order(owner_id, order_id)
            .await?
            .ok_or(BillingError::NotFound { entity: "Order" })?;

        if snapshot.items.is_empty() {
            return Err(BillingError::EmptyOrder { order_id });
        }

        // Fast path only; insert_invoice enforces uniqueness under race.
        if self
            .store
            .find_invoice_by_order(owner_id, order_id)
            .await?
            .is_some()
        {
            return Err(BillingError::DuplicateInvoice { order_id });
        }

        let discount = options.discount.unwrap_or(Decimal::ZERO);
        let tax = options.tax.unwrap_or(Decimal::ZERO);
        let totals = compute_totals(&snapshot, discount, tax)?;

        let items = snapshot
            .items
            .iter()
            .map(|item| InvoiceItemDraft {
                product_id: item.product_id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.quantity * item.unit_price,
                sort_order: item.sort_order,
            })
            .collect();

        let draft = InvoiceDraft {
            owner_id,
            order_id,
            customer_id: snapshot.order.customer_id,
            subtotal: totals.subtotal,
            discount: totals.discount,
            tax: totals.tax,
            total: totals.total,
            issue_date: chrono::Utc::now().date_naive(),
            due_date: options.due_date,
            items,
        };

        let created = self.store.insert_invoice(draft).await?;

        INVOICES_TOTAL
            .with_label_values(&[&created.invoice.status])
            .inc();
        if let Some(total_f64) = rust_decimal::prelude::ToPrimitive::to_f64(&created.invoice.total)
        {
            INVOICE_AMOUNT_TOTAL.inc_by(total_f64);
        }

        info!(
            invoice_id = %created.invoice.invoice_id,
            invoice_number = %created.invoice.invoice_number,
            total = %created.invoice.total,
            item_count = created.items.len(),
            "Invoice derived from order"
        );

        Ok(created)
    }
}
