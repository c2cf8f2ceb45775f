//! Order handlers. All operations are scoped to the owner from the request
//! context.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CreateOrderRequest, ListQuery, UpdateOrderStatusRequest},
    error::BillingError,
    middleware::OwnerContext,
    models::{CreateOrder, CreateOrderItem, ListOrdersFilter, Order, OrderSnapshot, OrderStatus},
    services::store::OrderStore,
    AppState,
};

/// Create an order with its line items. Unit prices are snapshotted here and
/// never change afterwards.
pub async fn create_order(
    State(state): State<AppState>,
    owner: OwnerContext,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderSnapshot>), BillingError> {
    payload.validate()?;

    let input = CreateOrder {
        owner_id: owner.owner_id,
        customer_id: payload.customer_id,
        items: payload
            .items
            .into_iter()
            .map(|item| CreateOrderItem {
                product_id: item.product_id,
                description: item.description,
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect(),
    };

    tracing::info!(
        owner_id = %owner.owner_id,
        customer_id = %input.customer_id,
        item_count = input.items.len(),
        "Creating order"
    );

    let snapshot = state.db.create_order(&input).await?;

    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Get an order with its items within the owner's scope.
pub async fn get_order(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderSnapshot>, BillingError> {
    let snapshot = state
        .db
        .get_order(owner.owner_id, order_id)
        .await?
        .ok_or(BillingError::NotFound { entity: "Order" })?;

    Ok(Json(snapshot))
}

/// List orders for the owner.
pub async fn list_orders(
    State(state): State<AppState>,
    owner: OwnerContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Order>>, BillingError> {
    let filter = ListOrdersFilter {
        status: query.status.as_deref().map(OrderStatus::from_string),
        customer_id: query.customer_id,
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let orders = state.db.list_orders(owner.owner_id, &filter).await?;

    Ok(Json(orders))
}

/// Apply a status transition to an order.
pub async fn update_order_status(
    State(state): State<AppState>,
    owner: OwnerContext,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<Json<Order>, BillingError> {
    tracing::info!(
        owner_id = %owner.owner_id,
        order_id = %order_id,
        new_status = payload.status.as_str(),
        "Updating order status"
    );

    let order = state
        .db
        .update_order_status(owner.owner_id, order_id, payload.status)
        .await?
        .ok_or(BillingError::NotFound { entity: "Order" })?;

    Ok(Json(order))
}
