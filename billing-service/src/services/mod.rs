//! Services module for billing-service.

pub mod database;
pub mod derivation;
pub mod ledger;
pub mod metrics;
pub mod store;

pub use database::Database;
pub use derivation::{compute_totals, DerivationEngine, DerivationOptions, InvoiceTotals};
pub use ledger::PaymentLedger;
pub use metrics::{get_metrics, init_metrics};
pub use store::{InvoiceStore, OrderStore, PaymentOutcome};
