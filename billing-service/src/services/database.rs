//! Database service for billing-service.
//!
//! Owns the PostgreSQL pool and implements the [`OrderStore`] and
//! [`InvoiceStore`] contracts. Every query is owner-scoped; multi-row writes
//! run inside a single transaction.

use crate::error::BillingError;
use crate::models::{
    format_invoice_number, CreateOrder, Invoice, InvoiceDraft, InvoiceItem, InvoiceStatus,
    InvoiceWithItems, ListInvoicesFilter, ListOrdersFilter, Order, OrderItem, OrderSnapshot,
    OrderStatus, Payment, PaymentDraft,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{InvoiceStore, OrderStore, PaymentOutcome};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, owner_id, order_id, customer_id, invoice_number, \
     status, subtotal, discount, tax, total, amount_paid, issue_date, due_date, \
     created_utc, cancelled_utc";

fn db_err(context: &str, e: impl std::fmt::Display) -> BillingError {
    BillingError::Infra(AppError::DatabaseError(anyhow::anyhow!("{context}: {e}")))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Order Operations
    // -------------------------------------------------------------------------

    /// Create an order with its line items in one transaction. The cached
    /// order total and the per-item price snapshots are fixed here.
    #[instrument(skip(self, input), fields(owner_id = %input.owner_id, item_count = input.items.len()))]
    pub async fn create_order(&self, input: &CreateOrder) -> Result<OrderSnapshot, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_order"])
            .start_timer();

        let total: Decimal = input
            .items
            .iter()
            .map(|item| item.quantity * item.unit_price)
            .sum();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin transaction", e))?;

        let order_id = Uuid::new_v4();
        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (order_id, owner_id, customer_id, status, total)
            VALUES ($1, $2, $3, 'pending', $4)
            RETURNING order_id, owner_id, customer_id, status, total, created_utc, updated_utc
            "#,
        )
        .bind(order_id)
        .bind(input.owner_id)
        .bind(input.customer_id)
        .bind(total)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to create order", e))?;

        let mut items = Vec::with_capacity(input.items.len());
        for (i, item) in input.items.iter().enumerate() {
            let inserted = sqlx::query_as::<_, OrderItem>(
                r#"
                INSERT INTO order_items (order_item_id, order_id, owner_id, product_id, description, quantity, unit_price, sort_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING order_item_id, order_id, owner_id, product_id, description, quantity, unit_price, sort_order, created_utc
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(order_id)
            .bind(input.owner_id)
            .bind(item.product_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(i as i32)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_err("Failed to create order item", e))?;
            items.push(inserted);
        }

        tx.commit()
            .await
            .map_err(|e| db_err("Failed to commit order", e))?;

        timer.observe_duration();

        info!(order_id = %order.order_id, total = %order.total, "Order created");

        Ok(OrderSnapshot { order, items })
    }

    /// List orders for an owner.
    #[instrument(skip(self, filter), fields(owner_id = %owner_id))]
    pub async fn list_orders(
        &self,
        owner_id: Uuid,
        filter: &ListOrdersFilter,
    ) -> Result<Vec<Order>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_orders"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, owner_id, customer_id, status, total, created_utc, updated_utc
            FROM orders
            WHERE owner_id = $1
              AND ($2::varchar IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR customer_id = $3)
              AND ($4::uuid IS NULL OR order_id > $4)
            ORDER BY order_id
            LIMIT $5
            "#,
        )
        .bind(owner_id)
        .bind(&status_str)
        .bind(filter.customer_id)
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to list orders", e))?;

        timer.observe_duration();

        Ok(orders)
    }

    /// Apply a guarded order status transition.
    #[instrument(skip(self), fields(owner_id = %owner_id, order_id = %order_id))]
    pub async fn update_order_status(
        &self,
        owner_id: Uuid,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<Option<Order>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_order_status"])
            .start_timer();

        let existing = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, owner_id, customer_id, status, total, created_utc, updated_utc
            FROM orders
            WHERE owner_id = $1 AND order_id = $2
            "#,
        )
        .bind(owner_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get order", e))?;

        let Some(existing) = existing else {
            return Ok(None);
        };

        let current = OrderStatus::from_string(&existing.status);
        if !current.can_transition_to(new_status) {
            return Err(BillingError::InvalidStatusTransition {
                from: existing.status,
                to: new_status.as_str().to_string(),
            });
        }

        // The status guard in the WHERE clause makes the transition safe
        // against a concurrent update of the same order.
        let order = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = $3, updated_utc = NOW()
            WHERE owner_id = $1 AND order_id = $2 AND status = $4
            RETURNING order_id, owner_id, customer_id, status, total, created_utc, updated_utc
            "#,
        )
        .bind(owner_id)
        .bind(order_id)
        .bind(new_status.as_str())
        .bind(current.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to update order status", e))?;

        timer.observe_duration();

        match order {
            Some(order) => {
                info!(order_id = %order.order_id, status = %order.status, "Order status updated");
                Ok(Some(order))
            }
            None => Err(BillingError::ConcurrencyConflict),
        }
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// List invoices for an owner.
    #[instrument(skip(self, filter), fields(owner_id = %owner_id))]
    pub async fn list_invoices(
        &self,
        owner_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE owner_id = $1
              AND ($2::varchar IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR customer_id = $3)
              AND ($4::uuid IS NULL OR invoice_id > $4)
            ORDER BY invoice_id
            LIMIT $5
            "#
        ))
        .bind(owner_id)
        .bind(&status_str)
        .bind(filter.customer_id)
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to list invoices", e))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Get the line items of an invoice.
    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %invoice_id))]
    pub async fn list_invoice_items(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceItem>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoice_items"])
            .start_timer();

        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT invoice_item_id, invoice_id, owner_id, product_id, description,
                quantity, unit_price, line_total, sort_order, created_utc
            FROM invoice_items
            WHERE owner_id = $1 AND invoice_id = $2
            ORDER BY sort_order, created_utc
            "#,
        )
        .bind(owner_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to list invoice items", e))?;

        timer.observe_duration();

        Ok(items)
    }

    /// List payments recorded against an invoice.
    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %invoice_id))]
    pub async fn list_payments(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, invoice_id, owner_id, amount, method, created_utc
            FROM payments
            WHERE owner_id = $1 AND invoice_id = $2
            ORDER BY created_utc
            "#,
        )
        .bind(owner_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to list payments", e))?;

        timer.observe_duration();

        Ok(payments)
    }

}

#[async_trait]
impl OrderStore for Database {
    /// Read the order header and items inside one transaction so the
    /// snapshot is a consistent point-in-time view.
    async fn get_order(
        &self,
        owner_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<OrderSnapshot>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin transaction", e))?;

        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, owner_id, customer_id, status, total, created_utc, updated_utc
            FROM orders
            WHERE owner_id = $1 AND order_id = $2
            "#,
        )
        .bind(owner_id)
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to get order", e))?;

        let Some(order) = order else {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(None);
        };

        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT order_item_id, order_id, owner_id, product_id, description,
                quantity, unit_price, sort_order, created_utc
            FROM order_items
            WHERE owner_id = $1 AND order_id = $2
            ORDER BY sort_order, created_utc
            "#,
        )
        .bind(owner_id)
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to get order items", e))?;

        tx.commit()
            .await
            .map_err(|e| db_err("Failed to commit read", e))?;

        timer.observe_duration();

        Ok(Some(OrderSnapshot { order, items }))
    }
}

#[async_trait]
impl InvoiceStore for Database {
    async fn find_invoice_by_order(
        &self,
        owner_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Invoice>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_invoice_by_order"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE owner_id = $1 AND order_id = $2
            "#
        ))
        .bind(owner_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to find invoice by order", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Insert the invoice and its items atomically, assigning the next
    /// per-owner invoice number inside the same transaction. The unique
    /// constraint on `order_id` is the serialization point for duplicate
    /// derivation attempts.
    async fn insert_invoice(
        &self,
        draft: InvoiceDraft,
    ) -> Result<InvoiceWithItems, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin transaction", e))?;

        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_sequences (owner_id, next_seq)
            VALUES ($1, 1)
            ON CONFLICT (owner_id) DO UPDATE SET next_seq = invoice_sequences.next_seq + 1
            RETURNING next_seq
            "#,
        )
        .bind(draft.owner_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to allocate invoice number", e))?;

        let invoice_id = Uuid::new_v4();
        let invoice_number = format_invoice_number(seq);

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (
                invoice_id, owner_id, order_id, customer_id, invoice_number, status,
                subtotal, discount, tax, total, amount_paid, issue_date, due_date
            )
            VALUES ($1, $2, $3, $4, $5, 'unpaid', $6, $7, $8, $9, 0, $10, $11)
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice_id)
        .bind(draft.owner_id)
        .bind(draft.order_id)
        .bind(draft.customer_id)
        .bind(&invoice_number)
        .bind(draft.subtotal)
        .bind(draft.discount)
        .bind(draft.tax)
        .bind(draft.total)
        .bind(draft.issue_date)
        .bind(draft.due_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                BillingError::DuplicateInvoice {
                    order_id: draft.order_id,
                }
            }
            _ => db_err("Failed to insert invoice", e),
        })?;

        let mut items = Vec::with_capacity(draft.items.len());
        for item in &draft.items {
            let inserted = sqlx::query_as::<_, InvoiceItem>(
                r#"
                INSERT INTO invoice_items (invoice_item_id, invoice_id, owner_id, product_id, description, quantity, unit_price, line_total, sort_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING invoice_item_id, invoice_id, owner_id, product_id, description, quantity, unit_price, line_total, sort_order, created_utc
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(draft.owner_id)
            .bind(item.product_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.line_total)
            .bind(item.sort_order)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_err("Failed to insert invoice item", e))?;
            items.push(inserted);
        }

        tx.commit()
            .await
            .map_err(|e| db_err("Failed to commit invoice", e))?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            order_id = %invoice.order_id,
            "Invoice persisted"
        );

        Ok(InvoiceWithItems { invoice, items })
    }

    async fn get_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE owner_id = $1 AND invoice_id = $2
            "#
        ))
        .bind(owner_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to get invoice", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Row-locked compare-and-set: the invoice row is locked with
    /// `FOR UPDATE`, re-checked against the expected `amount_paid` and for a
    /// cancellation that landed after the caller's read, and the payment
    /// insert plus invoice update commit together or not at all.
    async fn commit_payment(
        &self,
        expected_amount_paid: Decimal,
        new_status: InvoiceStatus,
        payment: PaymentDraft,
    ) -> Result<PaymentOutcome, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_payment"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin transaction", e))?;

        let current: Option<(Decimal, String)> = sqlx::query_as(
            r#"
            SELECT amount_paid, status
            FROM invoices
            WHERE owner_id = $1 AND invoice_id = $2
            FOR UPDATE
            "#,
        )
        .bind(payment.owner_id)
        .bind(payment.invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to lock invoice", e))?;

        let Some((current_paid, current_status)) = current else {
            tx.rollback().await.ok();
            return Err(BillingError::NotFound { entity: "Invoice" });
        };

        if InvoiceStatus::from_string(&current_status) == InvoiceStatus::Cancelled {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Err(BillingError::InvoiceNotPayable {
                status: current_status,
            });
        }

        if current_paid != expected_amount_paid {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(PaymentOutcome::Conflict);
        }

        let inserted = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (payment_id, invoice_id, owner_id, amount, method)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING payment_id, invoice_id, owner_id, amount, method, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment.invoice_id)
        .bind(payment.owner_id)
        .bind(payment.amount)
        .bind(payment.method.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to insert payment", e))?;

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET amount_paid = amount_paid + $3, status = $4
            WHERE owner_id = $1 AND invoice_id = $2 AND status <> 'cancelled'
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(payment.owner_id)
        .bind(payment.invoice_id)
        .bind(payment.amount)
        .bind(new_status.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to update invoice", e))?;

        let Some(invoice) = invoice else {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(PaymentOutcome::Conflict);
        };

        tx.commit()
            .await
            .map_err(|e| db_err("Failed to commit payment", e))?;

        timer.observe_duration();

        Ok(PaymentOutcome::Applied {
            invoice,
            payment: inserted,
        })
    }

    /// Guarded single-statement cancel: the status equality in the WHERE
    /// clause makes the transition safe against a concurrent payment.
    async fn commit_cancel(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        expected_status: InvoiceStatus,
    ) -> Result<Option<Invoice>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_cancel"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = 'cancelled', cancelled_utc = NOW()
            WHERE owner_id = $1 AND invoice_id = $2 AND status = $3
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(owner_id)
        .bind(invoice_id)
        .bind(expected_status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to cancel invoice", e))?;

        timer.observe_duration();

        if let Some(ref inv) = invoice {
            info!(invoice_id = %inv.invoice_id, "Invoice cancelled");
        }

        Ok(invoice)
    }

    /// Mark past-due invoices overdue. Returns the number of invoices moved.
    async fn mark_overdue(&self, owner_id: Uuid, as_of: NaiveDate) -> Result<u64, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_overdue"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'overdue'
            WHERE owner_id = $1
              AND status IN ('unpaid', 'partially_paid')
              AND due_date IS NOT NULL
              AND due_date < $2
            "#,
        )
        .bind(owner_id)
        .bind(as_of)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to mark invoices overdue", e))?;

        timer.observe_duration();

        let moved = result.rows_affected();
        if moved > 0 {
            info!(moved = moved, "Invoices marked overdue");
        }

        Ok(moved)
    }
}
