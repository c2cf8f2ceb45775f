//! Shared test harness: an in-memory implementation of the store contracts so
//! the derivation engine and payment ledger can be exercised without a live
//! database. Mirrors the Postgres implementation's semantics, including the
//! unique order constraint and the compare-and-set payment commit.

use async_trait::async_trait;
use billing_service::error::BillingError;
use billing_service::models::{
    format_invoice_number, Invoice, InvoiceDraft, InvoiceItem, InvoiceStatus, InvoiceWithItems,
    Order, OrderItem, OrderSnapshot, Payment, PaymentDraft,
};
use billing_service::services::store::{InvoiceStore, OrderStore, PaymentOutcome};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct StoreState {
    orders: HashMap<Uuid, OrderSnapshot>,
    invoices: HashMap<Uuid, Invoice>,
    invoice_items: HashMap<Uuid, Vec<InvoiceItem>>,
    payments: Vec<Payment>,
    sequences: HashMap<Uuid, i64>,
}

/// In-memory store double. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an order for `owner_id` with `(quantity, unit_price)` items.
    pub fn seed_order(&self, owner_id: Uuid, items: &[(Decimal, Decimal)]) -> Uuid {
        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let total: Decimal = items.iter().map(|(q, p)| q * p).sum();

        let snapshot = OrderSnapshot {
            order: Order {
                order_id,
                owner_id,
                customer_id: Uuid::new_v4(),
                status: "pending".to_string(),
                total,
                created_utc: now,
                updated_utc: now,
            },
            items: items
                .iter()
                .enumerate()
                .map(|(i, (quantity, unit_price))| OrderItem {
                    order_item_id: Uuid::new_v4(),
                    order_id,
                    owner_id,
                    product_id: Uuid::new_v4(),
                    description: format!("seeded item {i}"),
                    quantity: *quantity,
                    unit_price: *unit_price,
                    sort_order: i as i32,
                    created_utc: now,
                })
                .collect(),
        };

        self.inner
            .lock()
            .unwrap()
            .orders
            .insert(order_id, snapshot);
        order_id
    }

    /// Mutate every item price on a seeded order, simulating an order edit
    /// after invoicing.
    pub fn reprice_order(&self, order_id: Uuid, new_price: Decimal) {
        let mut state = self.inner.lock().unwrap();
        if let Some(snapshot) = state.orders.get_mut(&order_id) {
            for item in &mut snapshot.items {
                item.unit_price = new_price;
            }
        }
    }

    /// Number of invoice rows referencing the given order.
    pub fn invoice_count_for_order(&self, order_id: Uuid) -> usize {
        self.inner
            .lock()
            .unwrap()
            .invoices
            .values()
            .filter(|inv| inv.order_id == order_id)
            .count()
    }

    pub fn invoice_items(&self, invoice_id: Uuid) -> Vec<InvoiceItem> {
        self.inner
            .lock()
            .unwrap()
            .invoice_items
            .get(&invoice_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn payment_count(&self, invoice_id: Uuid) -> usize {
        self.inner
            .lock()
            .unwrap()
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .count()
    }

    /// Force an invoice into the given status, bypassing the ledger.
    pub fn set_invoice_status(&self, invoice_id: Uuid, status: InvoiceStatus) {
        let mut state = self.inner.lock().unwrap();
        if let Some(invoice) = state.invoices.get_mut(&invoice_id) {
            invoice.status = status.as_str().to_string();
        }
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn get_order(
        &self,
        owner_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<OrderSnapshot>, BillingError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .orders
            .get(&order_id)
            .filter(|snapshot| snapshot.order.owner_id == owner_id)
            .cloned())
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn find_invoice_by_order(
        &self,
        owner_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Invoice>, BillingError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .invoices
            .values()
            .find(|inv| inv.owner_id == owner_id && inv.order_id == order_id)
            .cloned())
    }

    async fn insert_invoice(
        &self,
        draft: InvoiceDraft,
    ) -> Result<InvoiceWithItems, BillingError> {
        let mut state = self.inner.lock().unwrap();

        // Unique constraint on order_id.
        if state
            .invoices
            .values()
            .any(|inv| inv.order_id == draft.order_id)
        {
            return Err(BillingError::DuplicateInvoice {
                order_id: draft.order_id,
            });
        }

        let seq = state
            .sequences
            .entry(draft.owner_id)
            .and_modify(|s| *s += 1)
            .or_insert(1);
        let invoice_number = format_invoice_number(*seq);

        let invoice_id = Uuid::new_v4();
        let now = Utc::now();

        let invoice = Invoice {
            invoice_id,
            owner_id: draft.owner_id,
            order_id: draft.order_id,
            customer_id: draft.customer_id,
            invoice_number,
            status: InvoiceStatus::Unpaid.as_str().to_string(),
            subtotal: draft.subtotal,
            discount: draft.discount,
            tax: draft.tax,
            total: draft.total,
            amount_paid: Decimal::ZERO,
            issue_date: draft.issue_date,
            due_date: draft.due_date,
            created_utc: now,
            cancelled_utc: None,
        };

        let items: Vec<InvoiceItem> = draft
            .items
            .iter()
            .map(|item| InvoiceItem {
                invoice_item_id: Uuid::new_v4(),
                invoice_id,
                owner_id: draft.owner_id,
                product_id: item.product_id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
                sort_order: item.sort_order,
                created_utc: now,
            })
            .collect();

        state.invoices.insert(invoice_id, invoice.clone());
        state.invoice_items.insert(invoice_id, items.clone());

        Ok(InvoiceWithItems { invoice, items })
    }

    async fn get_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, BillingError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .invoices
            .get(&invoice_id)
            .filter(|inv| inv.owner_id == owner_id)
            .cloned())
    }

    async fn commit_payment(
        &self,
        expected_amount_paid: Decimal,
        new_status: InvoiceStatus,
        payment: PaymentDraft,
    ) -> Result<PaymentOutcome, BillingError> {
        let mut state = self.inner.lock().unwrap();

        let invoice = match state.invoices.get_mut(&payment.invoice_id) {
            Some(inv) if inv.owner_id == payment.owner_id => inv,
            _ => return Err(BillingError::NotFound { entity: "Invoice" }),
        };

        // Commit-time re-check: a cancellation that landed after the
        // caller's read must not be overwritten by a payment.
        if InvoiceStatus::from_string(&invoice.status) == InvoiceStatus::Cancelled {
            return Err(BillingError::InvoiceNotPayable {
                status: invoice.status.clone(),
            });
        }

        if invoice.amount_paid != expected_amount_paid {
            return Ok(PaymentOutcome::Conflict);
        }

        invoice.amount_paid += payment.amount;
        invoice.status = new_status.as_str().to_string();
        let updated = invoice.clone();

        let row = Payment {
            payment_id: Uuid::new_v4(),
            invoice_id: payment.invoice_id,
            owner_id: payment.owner_id,
            amount: payment.amount,
            method: payment.method.as_str().to_string(),
            created_utc: Utc::now(),
        };
        state.payments.push(row.clone());

        Ok(PaymentOutcome::Applied {
            invoice: updated,
            payment: row,
        })
    }

    async fn commit_cancel(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        expected_status: InvoiceStatus,
    ) -> Result<Option<Invoice>, BillingError> {
        let mut state = self.inner.lock().unwrap();

        let Some(invoice) = state
            .invoices
            .get_mut(&invoice_id)
            .filter(|inv| inv.owner_id == owner_id)
        else {
            return Ok(None);
        };

        if invoice.status != expected_status.as_str() {
            return Ok(None);
        }

        invoice.status = InvoiceStatus::Cancelled.as_str().to_string();
        invoice.cancelled_utc = Some(Utc::now());

        Ok(Some(invoice.clone()))
    }

    async fn mark_overdue(&self, owner_id: Uuid, as_of: NaiveDate) -> Result<u64, BillingError> {
        let mut state = self.inner.lock().unwrap();
        let mut moved = 0;

        for invoice in state.invoices.values_mut() {
            if invoice.owner_id != owner_id {
                continue;
            }
            let status = InvoiceStatus::from_string(&invoice.status);
            if !matches!(status, InvoiceStatus::Unpaid | InvoiceStatus::PartiallyPaid) {
                continue;
            }
            if invoice.due_date.is_some_and(|due| due < as_of) {
                invoice.status = InvoiceStatus::Overdue.as_str().to_string();
                moved += 1;
            }
        }

        Ok(moved)
    }
}

type StoreHook = Box<dyn Fn(&MemoryStore) + Send + Sync>;

/// Wrapper around [`MemoryStore`] that fires a hook right before a commit,
/// staging a conflicting write in the window between a service's read and
/// its commit.
pub struct ConflictingStore {
    inner: MemoryStore,
    on_commit_payment: Option<StoreHook>,
    on_commit_cancel: Option<StoreHook>,
}

impl ConflictingStore {
    pub fn before_commit_payment(
        inner: MemoryStore,
        hook: impl Fn(&MemoryStore) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            on_commit_payment: Some(Box::new(hook)),
            on_commit_cancel: None,
        }
    }

    pub fn before_commit_cancel(
        inner: MemoryStore,
        hook: impl Fn(&MemoryStore) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            on_commit_payment: None,
            on_commit_cancel: Some(Box::new(hook)),
        }
    }
}

#[async_trait]
impl InvoiceStore for ConflictingStore {
    async fn find_invoice_by_order(
        &self,
        owner_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Invoice>, BillingError> {
        self.inner.find_invoice_by_order(owner_id, order_id).await
    }

    async fn insert_invoice(&self, draft: InvoiceDraft) -> Result<InvoiceWithItems, BillingError> {
        self.inner.insert_invoice(draft).await
    }

    async fn get_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, BillingError> {
        self.inner.get_invoice(owner_id, invoice_id).await
    }

    async fn commit_payment(
        &self,
        expected_amount_paid: Decimal,
        new_status: InvoiceStatus,
        payment: PaymentDraft,
    ) -> Result<PaymentOutcome, BillingError> {
        if let Some(hook) = &self.on_commit_payment {
            hook(&self.inner);
        }
        self.inner
            .commit_payment(expected_amount_paid, new_status, payment)
            .await
    }

    async fn commit_cancel(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        expected_status: InvoiceStatus,
    ) -> Result<Option<Invoice>, BillingError> {
        if let Some(hook) = &self.on_commit_cancel {
            hook(&self.inner);
        }
        self.inner
            .commit_cancel(owner_id, invoice_id, expected_status)
            .await
    }

    async fn mark_overdue(&self, owner_id: Uuid, as_of: NaiveDate) -> Result<u64, BillingError> {
        self.inner.mark_overdue(owner_id, as_of).await
    }
}
