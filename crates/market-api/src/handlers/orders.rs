//! Order creation, lookup, and status transitions.
//!
//! Every mutation writes its outbox event in the same transaction as the
//! order row. The handlers validate, delegate to the domain layer, and map
//! domain errors onto the HTTP error contract.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use market_core::{
    models::{AGGREGATE_TYPE_ORDER, EVENT_ORDER_CREATED, EVENT_ORDER_STATUS_CHANGED},
    CoreError, Order, OrderId, OrderItem, OrderStatus, OutboxEvent,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    ApiError, ERROR_INTERNAL, ERROR_INVALID_STATUS_TRANSITION, ERROR_ORDER_NOT_FOUND,
    ERROR_VALIDATION,
};
use crate::server::AppState;

/// Request body for order creation.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Store placing the order.
    pub store_id: String,
    /// Line items. Must be non-empty.
    pub items: Vec<OrderItemRequest>,
}

/// One line item in an order creation request.
#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    /// Product display name.
    pub product_name: String,
    /// Units ordered.
    pub quantity: i32,
    /// Price per unit.
    pub unit_price: Decimal,
    /// Per-unit discount.
    #[serde(default)]
    pub discount: Decimal,
    /// Per-unit tax.
    #[serde(default)]
    pub tax: Decimal,
}

/// Request body for a status transition.
#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    /// Requested status.
    pub status: OrderStatus,
}

/// Order representation returned by the API.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    /// Order identifier.
    pub id: Uuid,
    /// Owning store.
    pub store_id: String,
    /// Current status.
    pub status: OrderStatus,
    /// Sum of line totals.
    pub total_amount: Decimal,
    /// Line items.
    pub items: Vec<OrderItemResponse>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Line item representation returned by the API.
#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    /// Product display name.
    pub product_name: String,
    /// Units ordered.
    pub quantity: i32,
    /// Price per unit.
    pub unit_price: Decimal,
    /// Per-unit discount.
    pub discount: Decimal,
    /// Per-unit tax.
    pub tax: Decimal,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.0,
            store_id: order.store_id,
            status: order.status,
            total_amount: order.total_amount,
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_name: item.product_name,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    discount: item.discount,
                    tax: item.tax,
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

impl CreateOrderRequest {
    /// Validates the request and builds the domain order.
    pub fn into_order(self, now: DateTime<Utc>) -> Result<Order, String> {
        if self.store_id.trim().is_empty() {
            return Err("store_id is required".to_string());
        }
        if self.items.is_empty() {
            return Err("order must contain at least one item".to_string());
        }
        for item in &self.items {
            if item.product_name.trim().is_empty() {
                return Err("item product_name is required".to_string());
            }
            if item.quantity <= 0 {
                return Err("item quantity must be positive".to_string());
            }
            if item.unit_price < Decimal::ZERO
                || item.discount < Decimal::ZERO
                || item.tax < Decimal::ZERO
            {
                return Err("item amounts must not be negative".to_string());
            }
        }

        let items = self
            .items
            .into_iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                product_name: item.product_name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount: item.discount,
                tax: item.tax,
            })
            .collect();

        Ok(Order::new(self.store_id, items, now))
    }
}

/// Creates an order and queues its `order.created` event.
#[instrument(name = "create_order", skip(state, request))]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Response {
    let now = state.clock.now();
    let order = match request.into_order(now) {
        Ok(order) => order,
        Err(message) => {
            warn!(%message, "rejected order creation request");
            return ApiError::response(StatusCode::BAD_REQUEST, ERROR_VALIDATION, message);
        },
    };

    let payload = match serde_json::to_value(&order) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "failed to serialize order snapshot");
            return ApiError::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ERROR_INTERNAL,
                "failed to serialize order",
            );
        },
    };
    let event = OutboxEvent::new(
        order.id.0,
        AGGREGATE_TYPE_ORDER,
        EVENT_ORDER_CREATED,
        payload,
        state.outbox_max_retries,
        now,
    );

    if let Err(e) = state.storage.create_order_with_event(&order, &event).await {
        error!(error = %e, "failed to persist order");
        return ApiError::response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERROR_INTERNAL,
            "failed to persist order",
        );
    }

    info!(order_id = %order.id, store_id = %order.store_id, "order created");
    (StatusCode::CREATED, Json(OrderResponse::from(order))).into_response()
}

/// Fetches an order by id.
#[instrument(name = "get_order", skip(state))]
pub async fn get_order(State(state): State<AppState>, Path(order_id): Path<Uuid>) -> Response {
    match state.storage.orders.find_by_id(OrderId(order_id)).await {
        Ok(Some(order)) => (StatusCode::OK, Json(OrderResponse::from(order))).into_response(),
        Ok(None) => ApiError::response(
            StatusCode::NOT_FOUND,
            ERROR_ORDER_NOT_FOUND,
            format!("order {order_id} not found"),
        ),
        Err(e) => {
            error!(error = %e, "failed to load order");
            ApiError::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ERROR_INTERNAL,
                "failed to load order",
            )
        },
    }
}

/// Applies a status transition and queues its outbox event.
///
/// A request outside the state machine is rejected with 400 and mutates
/// nothing; in particular, no outbox event is recorded.
#[instrument(name = "update_order_status", skip(state, request))]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Response {
    let order = match state.storage.orders.find_by_id(OrderId(order_id)).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            return ApiError::response(
                StatusCode::NOT_FOUND,
                ERROR_ORDER_NOT_FOUND,
                format!("order {order_id} not found"),
            );
        },
        Err(e) => {
            error!(error = %e, "failed to load order");
            return ApiError::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ERROR_INTERNAL,
                "failed to load order",
            );
        },
    };

    let new_status = match order.status.transition_to(request.status) {
        Ok(status) => status,
        Err(e @ CoreError::InvalidTransition { .. }) => {
            warn!(order_id = %order.id, error = %e, "rejected status transition");
            return ApiError::response(
                StatusCode::BAD_REQUEST,
                ERROR_INVALID_STATUS_TRANSITION,
                e.to_string(),
            );
        },
        Err(e) => {
            error!(error = %e, "unexpected transition error");
            return ApiError::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ERROR_INTERNAL,
                "failed to update order",
            );
        },
    };

    let now = state.clock.now();
    let mut updated = order.clone();
    updated.status = new_status;
    updated.updated_at = Some(now);

    let payload = match serde_json::to_value(&updated) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "failed to serialize order snapshot");
            return ApiError::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ERROR_INTERNAL,
                "failed to serialize order",
            );
        },
    };
    let event = OutboxEvent::new(
        updated.id.0,
        AGGREGATE_TYPE_ORDER,
        EVENT_ORDER_STATUS_CHANGED,
        payload,
        state.outbox_max_retries,
        now,
    );

    if let Err(e) =
        state.storage.update_order_status_with_event(&order, new_status, now, &event).await
    {
        error!(error = %e, "failed to persist status transition");
        return ApiError::response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERROR_INTERNAL,
            "failed to update order",
        );
    }

    info!(
        order_id = %updated.id,
        from = %order.status,
        to = %new_status,
        "order status updated"
    );
    (StatusCode::OK, Json(OrderResponse::from(updated))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: i32, unit_price: &str) -> OrderItemRequest {
        OrderItemRequest {
            product_name: "widget".to_string(),
            quantity,
            unit_price: unit_price.parse().unwrap(),
            discount: Decimal::ZERO,
            tax: Decimal::ZERO,
        }
    }

    #[test]
    fn valid_request_builds_order_with_total() {
        let request = CreateOrderRequest {
            store_id: "store-1".to_string(),
            items: vec![item(2, "10.00"), item(1, "5.00")],
        };

        let order = request.into_order(Utc::now()).expect("valid request");

        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.total_amount, "25.00".parse::<Decimal>().unwrap());
        assert_eq!(order.items.len(), 2);
    }

    #[test]
    fn blank_store_id_rejected() {
        let request = CreateOrderRequest { store_id: "  ".to_string(), items: vec![item(1, "1")] };
        assert!(request.into_order(Utc::now()).is_err());
    }

    #[test]
    fn empty_items_rejected() {
        let request = CreateOrderRequest { store_id: "store-1".to_string(), items: vec![] };
        assert!(request.into_order(Utc::now()).is_err());
    }

    #[test]
    fn non_positive_quantity_rejected() {
        let request =
            CreateOrderRequest { store_id: "store-1".to_string(), items: vec![item(0, "1")] };
        assert!(request.into_order(Utc::now()).is_err());
    }
}
