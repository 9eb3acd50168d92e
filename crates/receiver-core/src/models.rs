//! Receiver domain models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed ingested-event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Snapshot reconciliation status of an ingested event.
///
/// ```text
/// SnapshotPending -> SnapshotProcessed
///                 -> SnapshotFailed (after max retries)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Recorded, authoritative snapshot not yet pulled.
    SnapshotPending,
    /// Snapshot materialized. Terminal.
    SnapshotProcessed,
    /// Retries exhausted or order permanently missing. Terminal.
    SnapshotFailed,
}

impl EventStatus {
    /// Whether this status ends the event's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SnapshotProcessed | Self::SnapshotFailed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SnapshotPending => write!(f, "snapshot_pending"),
            Self::SnapshotProcessed => write!(f, "snapshot_processed"),
            Self::SnapshotFailed => write!(f, "snapshot_failed"),
        }
    }
}

impl sqlx::Type<PgDb> for EventStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "snapshot_pending" => Ok(Self::SnapshotPending),
            "snapshot_processed" => Ok(Self::SnapshotProcessed),
            "snapshot_failed" => Ok(Self::SnapshotFailed),
            _ => Err(format!("invalid event status: {s}").into()),
        }
    }
}

/// Ingested order event.
///
/// Created once per idempotency key; duplicate pushes are acknowledged
/// without a second row. Status and retry bookkeeping are mutated only by
/// the snapshot reconciliation processor.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,
    /// Caller-supplied key recognizing duplicate deliveries.
    pub idempotency_key: String,
    /// Event type, e.g. `order.created`.
    pub event_type: String,
    /// Order identity on the marketplace side.
    pub order_id: String,
    /// Store that owns the order.
    pub store_id: String,
    /// Current reconciliation status.
    pub status: EventStatus,
    /// Number of failed snapshot attempts so far.
    pub retry_count: i32,
    /// Earliest time the next attempt may run. `None` means immediately.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Authoritative order snapshot, once pulled.
    pub snapshot: Option<sqlx::types::Json<serde_json::Value>>,
    /// When the push was ingested.
    pub received_at: DateTime<Utc>,
    /// When the event reached a terminal state.
    pub processed_at: Option<DateTime<Utc>>,
    /// Detail of the most recent failure, kept for diagnosis.
    pub last_error: Option<String>,
}

impl Event {
    /// Builds a pending event from an ingested push.
    pub fn new(
        idempotency_key: String,
        event_type: String,
        order_id: String,
        store_id: String,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            idempotency_key,
            event_type,
            order_id,
            store_id,
            status: EventStatus::SnapshotPending,
            retry_count: 0,
            next_retry_at: None,
            snapshot: None,
            received_at,
            processed_at: None,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_starts_pending() {
        let event = Event::new(
            "key-1".to_string(),
            "order.created".to_string(),
            "order-1".to_string(),
            "store-1".to_string(),
            Utc::now(),
        );

        assert_eq!(event.status, EventStatus::SnapshotPending);
        assert_eq!(event.retry_count, 0);
        assert!(event.snapshot.is_none());
        assert!(!event.status.is_terminal());
    }

    #[test]
    fn terminal_statuses() {
        assert!(EventStatus::SnapshotProcessed.is_terminal());
        assert!(EventStatus::SnapshotFailed.is_terminal());
        assert!(!EventStatus::SnapshotPending.is_terminal());
    }
}
