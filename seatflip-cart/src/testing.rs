//! In-memory implementations of the cart ports.
//!
//! Used by the unit tests in this crate and by the API integration tests.
//! Time is measured with `tokio::time::Instant`, so tests running on a paused
//! clock can move reservations toward expiry with `tokio::time::advance`.

use async_trait::async_trait;
use chrono::Utc;
use seatflip_core::{
    BroadcastGateway, CasOutcome, DurableCartStore, ExpiryNotifications, ReservationCache,
    StoreError,
};
use seatflip_shared::{
    CartSnapshot, DurableCartRecord, EventPayload, Money, OwningUser, PushEvent, ReservationId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Reservation cache
// ============================================================================

struct CachedEntry {
    raw: String,
    deadline: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<ReservationId, CachedEntry>,
    expired_tx: Option<ExpirySender>,
    unavailable: bool,
}

impl CacheState {
    fn live(&self, id: &ReservationId, now: Instant) -> Option<&CachedEntry> {
        self.entries.get(id).filter(|e| e.deadline > now)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Cache("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Cache double storing JSON values with a deadline per key.
///
/// Entries past their deadline read as absent; `expire_due` evicts them and
/// emits an expiry notification for each, like Redis keyspace events.
#[derive(Clone, Default)]
pub struct InMemoryReservationCache {
    state: Arc<Mutex<CacheState>>,
}

impl InMemoryReservationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache wired to an expiry notification channel.
    pub fn with_expiry_notifications() -> (Self, ChannelExpiryNotifications) {
        let (tx, notifications) = ChannelExpiryNotifications::channel();
        let cache = Self::new();
        lock(&cache.state).expired_tx = Some(tx);
        (cache, notifications)
    }

    /// Evict every entry whose TTL elapsed and notify about each.
    pub fn expire_due(&self) -> Vec<ReservationId> {
        let now = Instant::now();
        let mut state = lock(&self.state);
        let mut due: Vec<ReservationId> = state
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();

        for id in &due {
            state.entries.remove(id);
            if let Some(tx) = &state.expired_tx {
                tx.send_expired(id.clone());
            }
        }
        due
    }

    /// Drop the notification sender so the receiving side observes a closed channel.
    pub fn close_notifications(&self) {
        lock(&self.state).expired_tx = None;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    /// Store a raw value, bypassing serialization.
    pub fn insert_raw(&self, id: &ReservationId, raw: &str, ttl: Duration) {
        lock(&self.state).entries.insert(
            id.clone(),
            CachedEntry {
                raw: raw.to_string(),
                deadline: Instant::now() + ttl,
            },
        );
    }

    pub fn contains(&self, id: &ReservationId) -> bool {
        lock(&self.state).live(id, Instant::now()).is_some()
    }
}

#[async_trait]
impl ReservationCache for InMemoryReservationCache {
    async fn put_with_ttl(&self, snapshot: &CartSnapshot, ttl: Duration) -> Result<(), StoreError> {
        let raw = serde_json::to_string(snapshot)?;
        let mut state = lock(&self.state);
        state.check()?;
        state.entries.insert(
            snapshot.reservation_id.clone(),
            CachedEntry {
                raw,
                deadline: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &ReservationId) -> Result<Option<CartSnapshot>, StoreError> {
        let state = lock(&self.state);
        state.check()?;
        match state.live(id, Instant::now()) {
            Some(entry) => Ok(Some(serde_json::from_str(&entry.raw)?)),
            None => Ok(None),
        }
    }

    async fn replace_keep_ttl(
        &self,
        snapshot: &CartSnapshot,
        expected_version: u64,
    ) -> Result<CasOutcome, StoreError> {
        let raw = serde_json::to_string(snapshot)?;
        let now = Instant::now();
        let mut state = lock(&self.state);
        state.check()?;

        let Some(current) = state.live(&snapshot.reservation_id, now) else {
            return Ok(CasOutcome::Missing);
        };
        let stored: CartSnapshot = serde_json::from_str(&current.raw)?;
        if stored.version != expected_version {
            return Ok(CasOutcome::VersionMismatch);
        }

        if let Some(entry) = state.entries.get_mut(&snapshot.reservation_id) {
            entry.raw = raw;
        }
        Ok(CasOutcome::Replaced)
    }

    async fn ttl(&self, id: &ReservationId) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        let state = lock(&self.state);
        state.check()?;
        Ok(state
            .live(id, now)
            .map(|e| e.deadline.saturating_duration_since(now)))
    }

    async fn keys(&self) -> Result<Vec<ReservationId>, StoreError> {
        let now = Instant::now();
        let state = lock(&self.state);
        state.check()?;
        let mut keys: Vec<ReservationId> = state
            .entries
            .iter()
            .filter(|(_, e)| e.deadline > now)
            .map(|(id, _)| id.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// Expiry notifications
// ============================================================================

/// Sending half of [`ChannelExpiryNotifications`].
#[derive(Clone)]
pub struct ExpirySender {
    tx: mpsc::UnboundedSender<Result<ReservationId, StoreError>>,
}

impl ExpirySender {
    pub fn send_expired(&self, id: ReservationId) {
        let _ = self.tx.send(Ok(id));
    }

    /// Simulate a broken subscription.
    pub fn send_error(&self, message: &str) {
        let _ = self.tx.send(Err(StoreError::Cache(message.to_string())));
    }
}

pub struct ChannelExpiryNotifications {
    rx: mpsc::UnboundedReceiver<Result<ReservationId, StoreError>>,
}

impl ChannelExpiryNotifications {
    pub fn channel() -> (ExpirySender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ExpirySender { tx }, Self { rx })
    }
}

#[async_trait]
impl ExpiryNotifications for ChannelExpiryNotifications {
    async fn next_expired(&mut self) -> Result<Option<ReservationId>, StoreError> {
        match self.rx.recv().await {
            Some(Ok(id)) => Ok(Some(id)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Durable store
// ============================================================================

#[derive(Default)]
struct StoreState {
    carts: HashMap<ReservationId, DurableCartRecord>,
    writes: usize,
    fail_inserts: bool,
    fail_updates: bool,
    fail_reads: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryCartStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: &ReservationId) -> Option<DurableCartRecord> {
        lock(&self.state).carts.get(id).cloned()
    }

    /// Number of successful inserts and updates.
    pub fn write_count(&self) -> usize {
        lock(&self.state).writes
    }

    pub fn fail_inserts(&self, fail: bool) {
        lock(&self.state).fail_inserts = fail;
    }

    pub fn fail_updates(&self, fail: bool) {
        lock(&self.state).fail_updates = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    /// Overwrite the stored `bought` flag without counting a write.
    pub fn force_bought(&self, id: &ReservationId, bought: bool) {
        if let Some(record) = lock(&self.state).carts.get_mut(id) {
            record.snapshot.bought = bought;
        }
    }
}

#[async_trait]
impl DurableCartStore for InMemoryCartStore {
    async fn insert_cart(
        &self,
        snapshot: &CartSnapshot,
        total: Money,
        owner: &OwningUser,
    ) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if state.fail_inserts {
            return Err(StoreError::Timeout {
                operation: "insert_cart",
                timeout: Duration::from_secs(3),
            });
        }
        state.carts.insert(
            snapshot.reservation_id.clone(),
            DurableCartRecord {
                snapshot: snapshot.clone(),
                total,
                user_id: owner.id.clone(),
                created_at: Utc::now(),
            },
        );
        state.writes += 1;
        Ok(())
    }

    async fn update_cart_bought(&self, id: &ReservationId, bought: bool) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if state.fail_updates {
            return Err(StoreError::Database("connection reset".to_string()));
        }
        let Some(record) = state.carts.get_mut(id) else {
            return Err(StoreError::MissingRecord {
                operation: "update_cart_bought",
                reservation_id: id.clone(),
            });
        };
        record.snapshot.bought = bought;
        state.writes += 1;
        Ok(())
    }

    async fn get_owning_user_id(&self, id: &ReservationId) -> Result<Option<String>, StoreError> {
        let state = lock(&self.state);
        if state.fail_reads {
            return Err(StoreError::Database("connection reset".to_string()));
        }
        Ok(state.carts.get(id).map(|r| r.user_id.clone()))
    }

    async fn get_cart(&self, id: &ReservationId) -> Result<Option<DurableCartRecord>, StoreError> {
        let state = lock(&self.state);
        if state.fail_reads {
            return Err(StoreError::Database("connection reset".to_string()));
        }
        Ok(state.carts.get(id).cloned())
    }
}

// ============================================================================
// Broadcast gateway
// ============================================================================

#[derive(Default)]
struct GatewayState {
    events: Vec<PushEvent>,
    failing: bool,
    fail_next: usize,
}

/// Gateway double that records every accepted event.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PushEvent> {
        lock(&self.state).events.clone()
    }

    pub fn events_named(&self, event: &str) -> Vec<PushEvent> {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| e.event == event)
            .cloned()
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    /// Reject only the next `count` publishes.
    pub fn fail_next(&self, count: usize) {
        lock(&self.state).fail_next = count;
    }
}

#[async_trait]
impl BroadcastGateway for RecordingGateway {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn publish(&self, channel: &str, event: &str, payload: &EventPayload) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if state.failing {
            return Err(StoreError::Gateway("gateway unreachable".to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(StoreError::Gateway("gateway unreachable".to_string()));
        }
        state.events.push(PushEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            data: payload.clone(),
        });
        Ok(())
    }
}
