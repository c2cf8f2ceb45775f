//! Domain models for billing-service.

mod invoice;
mod order;
mod payment;

pub use invoice::{
    format_invoice_number, Invoice, InvoiceDraft, InvoiceItem, InvoiceItemDraft, InvoiceStatus,
    InvoiceWithItems, ListInvoicesFilter, INVOICE_NUMBER_PREFIX,
};
pub use order::{
    CreateOrder, CreateOrderItem, ListOrdersFilter, Order, OrderItem, OrderSnapshot, OrderStatus,
};
pub use payment::{Payment, PaymentDraft, PaymentMethod};
