//! Races on derivation and payment application.
//!
//! These drive the same compare-and-set and unique-constraint paths the
//! Postgres store relies on, via the in-memory double.

mod common;

use billing_service::error::BillingError;
use billing_service::models::PaymentMethod;
use billing_service::services::store::InvoiceStore;
use billing_service::services::{DerivationEngine, DerivationOptions, PaymentLedger};
use common::MemoryStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn concurrent_derivations_yield_exactly_one_invoice() {
    let store = MemoryStore::new();
    let owner = Uuid::new_v4();
    let order_id = store.seed_order(owner, &[(dec!(2), dec!(10.00))]);
    let engine = DerivationEngine::new(store.clone());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_invoice_from_order(owner, order_id, DerivationOptions::default())
                .await
        }));
    }

    let mut successes = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(BillingError::DuplicateInvoice { .. }) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(duplicates, 15);
    assert_eq!(store.invoice_count_for_order(order_id), 1);
}

#[tokio::test]
async fn racing_partial_payments_cannot_overpay() {
    let store = MemoryStore::new();
    let owner = Uuid::new_v4();
    let order_id = store.seed_order(owner, &[(dec!(1), dec!(100.00))]);
    let created = DerivationEngine::new(store.clone())
        .create_invoice_from_order(owner, order_id, DerivationOptions::default())
        .await
        .unwrap();
    let invoice_id = created.invoice.invoice_id;
    let ledger = PaymentLedger::new(store.clone());

    // Two 60.00 payments on a 100.00 invoice: at most one can land.
    let mut handles = Vec::new();
    for _ in 0..2 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .apply_payment(owner, invoice_id, dec!(60.00), PaymentMethod::Card)
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(BillingError::Overpayment { .. }) | Err(BillingError::ConcurrencyConflict) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    let invoice = store.get_invoice(owner, invoice_id).await.unwrap().unwrap();
    assert_eq!(invoice.amount_paid, dec!(60.00));
    assert_eq!(invoice.status, "partially_paid");
}

#[tokio::test]
async fn many_racing_payments_keep_amount_paid_within_total() {
    let store = MemoryStore::new();
    let owner = Uuid::new_v4();
    let order_id = store.seed_order(owner, &[(dec!(1), dec!(100.00))]);
    let created = DerivationEngine::new(store.clone())
        .create_invoice_from_order(owner, order_id, DerivationOptions::default())
        .await
        .unwrap();
    let invoice_id = created.invoice.invoice_id;
    let ledger = PaymentLedger::new(store.clone());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .apply_payment(owner, invoice_id, dec!(10.00), PaymentMethod::Cash)
                .await
        }));
    }

    let mut applied = Decimal::ZERO;
    let mut successes = 0usize;
    for handle in handles {
        match handle.await.unwrap() {
            Ok((invoice, payment)) => {
                applied += payment.amount;
                successes += 1;
                assert!(invoice.amount_paid <= invoice.total);
            }
            Err(BillingError::Overpayment { .. }) | Err(BillingError::ConcurrencyConflict) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let invoice = store.get_invoice(owner, invoice_id).await.unwrap().unwrap();
    assert!(invoice.amount_paid <= invoice.total);
    assert_eq!(invoice.amount_paid, applied);
    assert_eq!(store.payment_count(invoice_id), successes);
}
