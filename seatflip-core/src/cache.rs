use async_trait::async_trait;
use seatflip_shared::{CartSnapshot, ReservationId};
use std::time::Duration;

use crate::error::StoreError;

/// Result of a conditional rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Replaced,
    /// The entry expired (or never existed) before the write.
    Missing,
    /// Someone else rewrote the entry since it was read.
    VersionMismatch,
}

/// TTL-bound store of claimable reservations, keyed by reservation id.
///
/// Entries are only ever removed by their TTL elapsing.
#[async_trait]
pub trait ReservationCache: Send + Sync {
    /// Write `snapshot`, replacing any entry with the same id, expiring after `ttl`.
    async fn put_with_ttl(&self, snapshot: &CartSnapshot, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, id: &ReservationId) -> Result<Option<CartSnapshot>, StoreError>;

    /// Atomically replace the entry if its stored `version` still equals
    /// `expected_version`. The remaining TTL is left untouched.
    async fn replace_keep_ttl(
        &self,
        snapshot: &CartSnapshot,
        expected_version: u64,
    ) -> Result<CasOutcome, StoreError>;

    /// Remaining time-to-live, `None` when the entry is gone.
    async fn ttl(&self, id: &ReservationId) -> Result<Option<Duration>, StoreError>;

    /// Every reservation id currently in the cache.
    async fn keys(&self) -> Result<Vec<ReservationId>, StoreError>;
}

/// Stream of reservation ids whose cache entry has just expired.
#[async_trait]
pub trait ExpiryNotifications: Send {
    /// Waits for the next expired id. `Ok(None)` means the channel closed.
    async fn next_expired(&mut self) -> Result<Option<ReservationId>, StoreError>;
}
