use seatflip_shared::{MoneyError, ReservationId};
use std::fmt;
use std::time::Duration;

/// Which backing system an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Cache,
    Durable,
    Gateway,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreKind::Cache => "reservation cache",
            StoreKind::Durable => "durable store",
            StoreKind::Gateway => "broadcast gateway",
        };
        f.write_str(name)
    }
}

/// Failure reported by an adapter (Redis, Postgres, Kafka, SSE hub, ...).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cache error: {0}")]
    Cache(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{operation}: no durable record for {reservation_id}")]
    MissingRecord {
        operation: &'static str,
        reservation_id: ReservationId,
    },

    #[error("broadcast error: {0}")]
    Gateway(String),

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Errors surfaced to callers of the cart lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{store} unavailable: {source}")]
    StoreUnavailable {
        store: StoreKind,
        #[source]
        source: StoreError,
    },

    #[error("partial write on {reservation_id}: {succeeded} committed but {failed} failed: {source}")]
    PartialWriteInconsistency {
        reservation_id: ReservationId,
        succeeded: StoreKind,
        failed: StoreKind,
        #[source]
        source: StoreError,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("expiry watcher stopped: {0}")]
    WatcherStopped(String),
}

impl CartError {
    pub fn cache(source: StoreError) -> Self {
        CartError::StoreUnavailable {
            store: StoreKind::Cache,
            source,
        }
    }

    pub fn durable(source: StoreError) -> Self {
        CartError::StoreUnavailable {
            store: StoreKind::Durable,
            source,
        }
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            CartError::ReservationNotFound(_) => "reservation_not_found",
            CartError::Validation(_) => "validation_error",
            CartError::StoreUnavailable { .. } => "store_unavailable",
            CartError::PartialWriteInconsistency { .. } => "partial_write_inconsistency",
            CartError::Conflict(_) => "conflict",
            CartError::WatcherStopped(_) => "watcher_stopped",
        }
    }
}

impl From<MoneyError> for CartError {
    fn from(err: MoneyError) -> Self {
        CartError::Validation(format!("ticket_total: {}", err))
    }
}

pub type CartResult<T> = Result<T, CartError>;
