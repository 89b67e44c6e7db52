use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::events::EventPayload;
use super::money::{Money, MoneyError};
use crate::pii::Masked;

/// Key of a reservation, both in the cache and in the `carts` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(String);

impl ReservationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for carts posted without one.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReservationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ReservationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The reservation payload stored in the cache while a listing is claimable.
///
/// Field names on the wire follow the browser extension's cart format.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartSnapshot {
    #[serde(rename = "uuid")]
    pub reservation_id: ReservationId,
    #[serde(default)]
    pub tab_id: i64,
    #[serde(default)]
    pub stock_type: String,
    #[serde(default)]
    pub event_date: String,
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub event_venue: String,
    #[serde(default)]
    pub seat_info: String,
    #[serde(default)]
    pub ticket_info: String,
    #[serde(default)]
    pub ticket_price: String,
    #[serde(default)]
    pub ticket_total: String,
    #[serde(rename = "buy", default)]
    pub bought: bool,
    /// Bumped on every cache rewrite; compare-and-swap token.
    #[serde(default)]
    pub version: u64,
}

impl CartSnapshot {
    pub fn parsed_total(&self) -> Result<Money, MoneyError> {
        self.ticket_total.parse()
    }

    /// Human-readable listing fields announced on the public channel.
    pub fn listing_payload(&self) -> EventPayload {
        EventPayload::from([
            ("buy".to_string(), self.bought.to_string()),
            ("uuid".to_string(), self.reservation_id.to_string()),
            ("event_date".to_string(), self.event_date.clone()),
            ("event_name".to_string(), self.event_name.clone()),
            ("event_venue".to_string(), self.event_venue.clone()),
            ("seat_info".to_string(), self.seat_info.clone()),
            ("ticket_info".to_string(), self.ticket_info.clone()),
            ("ticket_price".to_string(), self.ticket_price.clone()),
            ("ticket_total".to_string(), self.ticket_total.clone()),
            ("stock_type".to_string(), self.stock_type.clone()),
        ])
    }
}

/// The user a cart is produced for. Only used to route purchase confirmations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwningUser {
    pub id: String,
    #[serde(default)]
    pub email: Masked<String>,
}

impl OwningUser {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: Masked(email.into()),
        }
    }
}

/// Row of the `carts` table: the durable mirror of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DurableCartRecord {
    pub snapshot: CartSnapshot,
    pub total: Money,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl DurableCartRecord {
    pub fn bought(&self) -> bool {
        self.snapshot.bought
    }
}
