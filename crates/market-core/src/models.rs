//! Marketplace domain models and strongly-typed identifiers.
//!
//! Defines the order aggregate, the outbox event record, webhook
//! subscriptions, and newtype ID wrappers for compile-time type safety.
//! Status enums carry their transition rules; illegal transitions are
//! rejected before any state is touched.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Aggregate type tag recorded on outbox events for orders.
pub const AGGREGATE_TYPE_ORDER: &str = "order";

/// Event type raised when an order is created.
pub const EVENT_ORDER_CREATED: &str = "order.created";

/// Event type raised when an order's status changes.
pub const EVENT_ORDER_STATUS_CHANGED: &str = "order.status_changed";

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(Self(uuid))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

uuid_id! {
    /// Strongly-typed order identifier.
    OrderId
}

uuid_id! {
    /// Strongly-typed outbox event identifier.
    OutboxEventId
}

uuid_id! {
    /// Strongly-typed webhook subscription identifier.
    WebhookId
}

/// Order lifecycle status.
///
/// Transitions are strictly controlled:
///
/// ```text
/// Created -> Paid | Canceled
/// Paid    -> Shipped | Canceled
/// Shipped -> Completed
/// Completed, Canceled: terminal
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order placed, payment outstanding.
    Created,
    /// Payment confirmed.
    Paid,
    /// Handed to the carrier.
    Shipped,
    /// Delivered and settled. Terminal.
    Completed,
    /// Canceled before completion. Terminal.
    Canceled,
}

impl OrderStatus {
    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Paid | Self::Canceled)
                | (Self::Paid, Self::Shipped | Self::Canceled)
                | (Self::Shipped, Self::Completed)
        )
    }

    /// Validates a transition, returning the new status or the rejection.
    pub fn transition_to(self, next: OrderStatus) -> Result<OrderStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Paid => write!(f, "PAID"),
            Self::Shipped => write!(f, "SHIPPED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "PAID" => Ok(Self::Paid),
            "SHIPPED" => Ok(Self::Shipped),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELED" => Ok(Self::Canceled),
            _ => Err(CoreError::InvalidInput(format!("unknown order status: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for OrderStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for OrderStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(|e: CoreError| e.to_string().into())
    }
}

/// Line item within an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    /// Unique identifier for this line item.
    pub id: Uuid,
    /// Product display name.
    pub product_name: String,
    /// Units ordered. Always positive.
    pub quantity: i32,
    /// Price per unit before adjustments.
    pub unit_price: Decimal,
    /// Per-unit discount.
    pub discount: Decimal,
    /// Per-unit tax.
    pub tax: Decimal,
}

impl OrderItem {
    /// Line total: `(unit_price - discount + tax) * quantity`.
    pub fn total(&self) -> Decimal {
        (self.unit_price - self.discount + self.tax) * Decimal::from(self.quantity)
    }
}

/// Order aggregate.
///
/// Owned exclusively by the business-mutation path. The delivery pipeline
/// only reads it to build event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique identifier for this order.
    pub id: OrderId,
    /// Store that placed the order. Webhook subscriptions match on this.
    pub store_id: String,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Sum of all line totals.
    pub total_amount: Decimal,
    /// Line items.
    pub items: Vec<OrderItem>,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
    /// When the order was last updated.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Builds a new order in `Created` status from validated parts.
    pub fn new(store_id: String, items: Vec<OrderItem>, now: DateTime<Utc>) -> Self {
        let total_amount = items.iter().map(OrderItem::total).sum();
        Self {
            id: OrderId::new(),
            store_id,
            status: OrderStatus::Created,
            total_amount,
            items,
            created_at: now,
            updated_at: None,
        }
    }
}

/// Outbox event status.
///
/// Rows move forward only; `Sent`, `Failed`, and `WebhookNotRegistered`
/// are terminal. `Pending` recurs across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting to be claimed by a processor cycle.
    Pending,
    /// Claimed by a worker, dispatch in flight.
    Processing,
    /// Delivered to every active subscriber. Terminal.
    Sent,
    /// Retries exhausted, dead-lettered. Terminal.
    Failed,
    /// No active webhook for the owning store. Terminal.
    WebhookNotRegistered,
}

impl OutboxStatus {
    /// Whether this status ends the row's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::WebhookNotRegistered)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
            Self::WebhookNotRegistered => write!(f, "webhook_not_registered"),
        }
    }
}

impl sqlx::Type<PgDb> for OutboxStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for OutboxStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "webhook_not_registered" => Ok(Self::WebhookNotRegistered),
            _ => Err(format!("invalid outbox status: {s}").into()),
        }
    }
}

/// Outbox event record.
///
/// Created in the same transaction as the order mutation it describes and
/// never deleted afterwards; the table doubles as an audit trail. Status
/// and retry bookkeeping are mutated only by the outbox processor.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxEvent {
    /// Unique identifier for this event.
    pub id: OutboxEventId,
    /// Identity of the aggregate the event describes.
    pub aggregate_id: Uuid,
    /// Aggregate type tag, e.g. `order`.
    pub aggregate_type: String,
    /// Event type, e.g. `order.created`.
    pub event_type: String,
    /// Point-in-time snapshot of the aggregate at mutation time.
    pub payload: sqlx::types::Json<serde_json::Value>,
    /// Current processing status.
    pub status: OutboxStatus,
    /// Number of failed dispatch attempts so far.
    pub retry_count: i32,
    /// Retry ceiling before the row is dead-lettered.
    pub max_retries: i32,
    /// Earliest time the next attempt may run. `None` means immediately.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// When a worker last claimed the row. Drives stale-claim reclaim.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the row was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the row reached a terminal state.
    pub processed_at: Option<DateTime<Utc>>,
    /// Detail of the most recent failure, kept for diagnosis.
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// Builds a pending outbox event for an aggregate snapshot.
    pub fn new(
        aggregate_id: Uuid,
        aggregate_type: &str,
        event_type: &str,
        payload: serde_json::Value,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutboxEventId::new(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: event_type.to_string(),
            payload: sqlx::types::Json(payload),
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            last_attempt_at: None,
            created_at: now,
            processed_at: None,
            last_error: None,
        }
    }
}

/// Webhook subscription.
///
/// Immutable after creation except for the `active` flag. Inactive
/// webhooks receive no events.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Webhook {
    /// Unique identifier for this subscription.
    pub id: WebhookId,
    /// Stores whose events this subscription receives. Never empty.
    pub store_ids: Vec<String>,
    /// Destination for event pushes. http or https.
    pub callback_url: String,
    /// Shared secret sent as the `Authorization` header.
    pub token: String,
    /// Whether the subscription currently receives events.
    pub active: bool,
    /// When the subscription was registered.
    pub created_at: DateTime<Utc>,
    /// When the subscription was last changed.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Webhook {
    /// Builds a validated, active webhook subscription.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when `store_ids` is empty or the
    /// callback URL is blank or not http/https.
    pub fn new(
        store_ids: Vec<String>,
        callback_url: String,
        token: String,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        if store_ids.is_empty() || store_ids.iter().any(|s| s.trim().is_empty()) {
            return Err(CoreError::InvalidInput(
                "webhook must subscribe to at least one store".to_string(),
            ));
        }
        if callback_url.trim().is_empty() {
            return Err(CoreError::InvalidInput("callback URL is required".to_string()));
        }
        if !callback_url.starts_with("http://") && !callback_url.starts_with("https://") {
            return Err(CoreError::InvalidInput(format!(
                "invalid callback URL format: {callback_url}"
            )));
        }

        Ok(Self {
            id: WebhookId::new(),
            store_ids,
            callback_url,
            token,
            active: true,
            created_at: now,
            updated_at: None,
        })
    }
}
