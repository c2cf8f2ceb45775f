//! Request/response DTOs for billing-service.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::{Invoice, OrderStatus, Payment};

fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("must_be_positive"));
    }
    Ok(())
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("must_be_non_negative"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    #[validate(nested)]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    #[validate(custom(function = validate_positive))]
    pub quantity: Decimal,
    #[validate(custom(function = validate_non_negative))]
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Optional adjustments for invoice derivation; all default when the request
/// carries no body.
#[derive(Debug, Default, Deserialize)]
pub struct CreateInvoiceRequest {
    pub discount: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount: Decimal,
    pub method: String,
}

/// Updated invoice plus the appended payment row.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub invoice: Invoice,
    pub payment: Payment,
}

#[derive(Debug, Serialize)]
pub struct RefreshOverdueResponse {
    pub moved: u64,
}

/// Cursor-paged list query parameters.
#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub status: Option<String>,
    pub customer_id: Option<Uuid>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}
