use seatflip_core::{
    BroadcastGateway, CartError, CartResult, CasOutcome, DurableCartStore, ReservationCache,
    StoreError, StoreKind,
};
use seatflip_shared::{CartEvent, CartSnapshot, ChannelNames, EventPayload, Money, OwningUser, ReservationId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_RESERVATION_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub reservation_ttl: Duration,
    pub channels: ChannelNames,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            reservation_ttl: DEFAULT_RESERVATION_TTL,
            channels: ChannelNames::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProduceAck {
    pub reservation_id: ReservationId,
    pub ticket_total: Money,
    pub ttl_seconds: u64,
    /// Whether the `produce` announcement reached the gateway.
    pub notified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumeAck {
    pub reservation_id: ReservationId,
    pub bought: bool,
    /// Whether the owner was sent a purchase confirmation.
    pub notified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    /// Cache and durable store already agree.
    InSync,
    /// The cache entry was rewritten from the durable record.
    Rewritten,
    /// No cache entry left to repair.
    Expired,
}

/// Orchestrates the cart lifecycle across the reservation cache, the durable
/// store and the broadcast gateway.
///
/// Built once at startup; clones share the same clients.
#[derive(Clone)]
pub struct CartController {
    cache: Arc<dyn ReservationCache>,
    store: Arc<dyn DurableCartStore>,
    gateway: Arc<dyn BroadcastGateway>,
    settings: ControllerSettings,
}

impl CartController {
    pub fn new(
        cache: Arc<dyn ReservationCache>,
        store: Arc<dyn DurableCartStore>,
        gateway: Arc<dyn BroadcastGateway>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            cache,
            store,
            gateway,
            settings,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Create a reservation: cache write, durable insert, public announcement.
    ///
    /// An existing reservation with the same id is overwritten.
    pub async fn produce(&self, snapshot: CartSnapshot, owner: &OwningUser) -> CartResult<ProduceAck> {
        let total = validate_new_cart(&snapshot)?;
        let id = snapshot.reservation_id.clone();
        let ttl = self.settings.reservation_ttl;

        self.cache
            .put_with_ttl(&snapshot, ttl)
            .await
            .map_err(CartError::cache)?;
        debug!(reservation_id = %id, ttl_seconds = ttl.as_secs(), "Reservation cached");

        if let Err(source) = self.store.insert_cart(&snapshot, total, owner).await {
            error!(reservation_id = %id, error = %source, "Durable insert failed after cache write");
            return Err(CartError::PartialWriteInconsistency {
                reservation_id: id,
                succeeded: StoreKind::Cache,
                failed: StoreKind::Durable,
                source,
            });
        }

        let notified = self
            .announce(&self.settings.channels.public, CartEvent::Produce, snapshot.listing_payload())
            .await;

        info!(reservation_id = %id, owner = %owner.id, total = %total, "Cart produced");
        Ok(ProduceAck {
            reservation_id: id,
            ticket_total: total,
            ttl_seconds: ttl.as_secs(),
            notified,
        })
    }

    /// Attempt to finalize a reservation.
    ///
    /// The cache rewrite is conditional on the version read in the same call,
    /// so of two racing buyers only one gets past the cache.
    pub async fn consume(&self, id: &ReservationId, buy: bool) -> CartResult<ConsumeAck> {
        if id.is_blank() {
            return Err(CartError::Validation("reservation id is required".to_string()));
        }

        let current = self
            .cache
            .get(id)
            .await
            .map_err(CartError::cache)?
            .ok_or_else(|| CartError::ReservationNotFound(id.clone()))?;

        if buy && current.bought {
            return Err(CartError::Conflict(format!("reservation {} is already bought", id)));
        }

        let expected_version = current.version;
        let mut next = current;
        next.bought = buy;
        next.version = expected_version + 1;

        match self
            .cache
            .replace_keep_ttl(&next, expected_version)
            .await
            .map_err(CartError::cache)?
        {
            CasOutcome::Replaced => {}
            CasOutcome::Missing => return Err(CartError::ReservationNotFound(id.clone())),
            CasOutcome::VersionMismatch => {
                warn!(reservation_id = %id, expected_version, "Concurrent purchase attempt lost the race");
                return Err(CartError::Conflict(format!(
                    "reservation {} was modified concurrently",
                    id
                )));
            }
        }

        if let Err(source) = self.store.update_cart_bought(id, buy).await {
            error!(reservation_id = %id, error = %source, "Durable update failed after cache rewrite");
            return Err(CartError::PartialWriteInconsistency {
                reservation_id: id.clone(),
                succeeded: StoreKind::Cache,
                failed: StoreKind::Durable,
                source,
            });
        }

        let notified = if buy { self.confirm_purchase(&next).await } else { false };

        info!(reservation_id = %id, bought = buy, "Cart consumed");
        Ok(ConsumeAck {
            reservation_id: id.clone(),
            bought: buy,
            notified,
        })
    }

    /// Point-in-time listing of every cached reservation.
    ///
    /// Entries that expire between the key scan and the fetch are skipped.
    pub async fn list_reservations(&self) -> CartResult<Vec<CartSnapshot>> {
        let ids = self.reservation_ids().await?;
        let mut rows = Vec::with_capacity(ids.len());

        for id in ids {
            match self.cache.get(&id).await {
                Ok(Some(snapshot)) => rows.push(snapshot),
                Ok(None) => debug!(reservation_id = %id, "Reservation expired during listing"),
                Err(StoreError::Codec(e)) => {
                    warn!(reservation_id = %id, error = %e, "Skipping undecodable reservation")
                }
                Err(e) => return Err(CartError::cache(e)),
            }
        }

        Ok(rows)
    }

    pub async fn reservation_ids(&self) -> CartResult<Vec<ReservationId>> {
        self.cache.keys().await.map_err(CartError::cache)
    }

    /// Re-derive the cache's `bought` flag from the durable record.
    ///
    /// Idempotent. Expired reservations are never recreated.
    pub async fn repair(&self, id: &ReservationId) -> CartResult<RepairOutcome> {
        let record = self
            .store
            .get_cart(id)
            .await
            .map_err(CartError::durable)?
            .ok_or_else(|| CartError::ReservationNotFound(id.clone()))?;

        let Some(cached) = self.cache.get(id).await.map_err(CartError::cache)? else {
            return Ok(RepairOutcome::Expired);
        };

        if cached.bought == record.bought() {
            return Ok(RepairOutcome::InSync);
        }

        let expected_version = cached.version;
        let mut next = cached;
        next.bought = record.bought();
        next.version = expected_version + 1;

        match self
            .cache
            .replace_keep_ttl(&next, expected_version)
            .await
            .map_err(CartError::cache)?
        {
            CasOutcome::Replaced => {
                info!(reservation_id = %id, bought = next.bought, "Cache entry repaired from durable record");
                Ok(RepairOutcome::Rewritten)
            }
            CasOutcome::Missing => Ok(RepairOutcome::Expired),
            CasOutcome::VersionMismatch => Err(CartError::Conflict(format!(
                "reservation {} changed during repair",
                id
            ))),
        }
    }

    async fn confirm_purchase(&self, snapshot: &CartSnapshot) -> bool {
        let id = &snapshot.reservation_id;
        let owner = match self.store.get_owning_user_id(id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                warn!(reservation_id = %id, "No owning user recorded, purchase confirmation dropped");
                return false;
            }
            Err(e) => {
                warn!(reservation_id = %id, error = %e, "Owner lookup failed, purchase confirmation dropped");
                return false;
            }
        };

        let payload = EventPayload::from([("message".to_string(), snapshot.tab_id.to_string())]);
        let channel = self.settings.channels.private_for(&owner);
        self.announce(&channel, CartEvent::Bought, payload).await
    }

    async fn announce(&self, channel: &str, event: CartEvent, payload: EventPayload) -> bool {
        match self.gateway.publish(channel, event.as_str(), &payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(channel, event = %event, error = %e, "Broadcast failed");
                false
            }
        }
    }
}

fn validate_new_cart(snapshot: &CartSnapshot) -> CartResult<Money> {
    if snapshot.reservation_id.is_blank() {
        return Err(CartError::Validation("reservation id is required".to_string()));
    }
    if snapshot.event_name.trim().is_empty() {
        return Err(CartError::Validation("event_name is required".to_string()));
    }
    if snapshot.bought {
        return Err(CartError::Validation(
            "a new reservation cannot already be bought".to_string(),
        ));
    }
    Ok(snapshot.parsed_total()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryCartStore, InMemoryReservationCache, RecordingGateway};
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        controller: CartController,
        cache: InMemoryReservationCache,
        store: InMemoryCartStore,
        gateway: RecordingGateway,
    }

    fn harness() -> Harness {
        let cache = InMemoryReservationCache::new();
        let store = InMemoryCartStore::new();
        let gateway = RecordingGateway::new();
        let controller = CartController::new(
            Arc::new(cache.clone()),
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            ControllerSettings::default(),
        );
        Harness {
            controller,
            cache,
            store,
            gateway,
        }
    }

    fn cart(id: &str, total: &str, tab_id: i64) -> CartSnapshot {
        CartSnapshot {
            reservation_id: ReservationId::new(id),
            tab_id,
            stock_type: "MOBILE".to_string(),
            event_date: "Sat Nov 14 2026".to_string(),
            event_name: "Night Show".to_string(),
            event_venue: "Arena".to_string(),
            seat_info: "Sec 101 Row C Seats 3-4".to_string(),
            ticket_info: "2 tickets".to_string(),
            ticket_price: "$60.25".to_string(),
            ticket_total: total.to_string(),
            bought: false,
            version: 0,
        }
    }

    fn owner() -> OwningUser {
        OwningUser::new("user-42", "buyer@example.com")
    }

    #[tokio::test]
    async fn test_produce_then_read_returns_input() {
        let h = harness();
        let input = cart("abc-1", "$120.50", 7);

        h.controller.produce(input.clone(), &owner()).await.unwrap();

        let cached = h.cache.get(&input.reservation_id).await.unwrap().unwrap();
        assert_eq!(cached, input);
        assert!(!cached.bought);

        let record = h.store.record(&input.reservation_id).unwrap();
        assert_eq!(record.user_id, "user-42");
        assert_eq!(record.total.cents(), 12050);
        assert!(!record.bought());
    }

    #[tokio::test]
    async fn test_purchase_scenario_routes_confirmation_to_owner() {
        let h = harness();
        let id = ReservationId::new("abc-1");

        let ack = h.controller.produce(cart("abc-1", "$120.50", 7), &owner()).await.unwrap();
        assert_eq!(ack.ticket_total.to_string(), "120.50");
        assert_eq!(ack.ttl_seconds, 600);
        assert!(ack.notified);

        let produced = h.gateway.events_named("produce");
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].channel, "public-channel");
        assert_eq!(produced[0].data["uuid"], "abc-1");
        assert_eq!(produced[0].data["ticket_total"], "$120.50");
        assert!(!produced[0].data.values().any(|v| v.contains("buyer@example.com")));

        let ack = h.controller.consume(&id, true).await.unwrap();
        assert!(ack.bought);
        assert!(ack.notified);

        let bought = h.gateway.events_named("bought");
        assert_eq!(bought.len(), 1);
        assert_eq!(bought[0].channel, "private-channel-user-42");
        assert_eq!(bought[0].data["message"], "7");
        assert!(h
            .gateway
            .events()
            .iter()
            .filter(|e| e.channel == "public-channel")
            .all(|e| e.event != "bought"));
    }

    #[tokio::test]
    async fn test_consume_unknown_reservation_writes_nothing() {
        let h = harness();
        let writes_before = h.store.write_count();

        let result = h.controller.consume(&ReservationId::new("missing"), true).await;

        assert_matches!(result, Err(CartError::ReservationNotFound(id)) if id.as_str() == "missing");
        assert_eq!(h.store.write_count(), writes_before);
        assert!(h.gateway.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_preserves_remaining_ttl() {
        let h = harness();
        let input = cart("abc-1", "$120.50", 7);
        h.controller.produce(input.clone(), &owner()).await.unwrap();

        tokio::time::advance(Duration::from_secs(240)).await;
        h.controller.consume(&input.reservation_id, true).await.unwrap();

        let remaining = h.cache.ttl(&input.reservation_id).await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(360));
        assert!(remaining >= Duration::from_secs(359));
    }

    #[tokio::test]
    async fn test_consume_agrees_across_stores() {
        let h = harness();
        let input = cart("abc-1", "$120.50", 7);
        h.controller.produce(input.clone(), &owner()).await.unwrap();

        h.controller.consume(&input.reservation_id, true).await.unwrap();

        let cached = h.cache.get(&input.reservation_id).await.unwrap().unwrap();
        assert!(cached.bought);
        assert_eq!(cached.version, 1);
        assert!(h.store.record(&input.reservation_id).unwrap().bought());
    }

    #[tokio::test]
    async fn test_malformed_total_is_rejected_before_any_write() {
        let h = harness();

        let result = h.controller.produce(cart("abc-3", "$12.3.4", 1), &owner()).await;

        assert_matches!(result, Err(CartError::Validation(_)));
        assert!(!h.cache.contains(&ReservationId::new("abc-3")));
        assert_eq!(h.store.write_count(), 0);
        assert!(h.gateway.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let h = harness();

        let mut unnamed = cart("abc-3", "$10", 1);
        unnamed.event_name = " ".to_string();
        assert_matches!(
            h.controller.produce(unnamed, &owner()).await,
            Err(CartError::Validation(_))
        );

        assert_matches!(
            h.controller.produce(cart("", "$10", 1), &owner()).await,
            Err(CartError::Validation(_))
        );

        let mut already_bought = cart("abc-4", "$10", 1);
        already_bought.bought = true;
        assert_matches!(
            h.controller.produce(already_bought, &owner()).await,
            Err(CartError::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_cache_outage_aborts_produce_cleanly() {
        let h = harness();
        h.cache.set_unavailable(true);

        let result = h.controller.produce(cart("abc-5", "$10", 1), &owner()).await;

        assert_matches!(
            result,
            Err(CartError::StoreUnavailable { store: StoreKind::Cache, .. })
        );
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_durable_insert_failure_is_partial_write() {
        let h = harness();
        h.store.fail_inserts(true);
        let input = cart("abc-6", "$10", 1);

        let result = h.controller.produce(input.clone(), &owner()).await;

        assert_matches!(
            result,
            Err(CartError::PartialWriteInconsistency {
                succeeded: StoreKind::Cache,
                failed: StoreKind::Durable,
                ref reservation_id,
                ..
            }) if reservation_id.as_str() == "abc-6"
        );
        // not rolled back
        assert!(h.cache.contains(&input.reservation_id));
        assert!(h.gateway.events().is_empty());
    }

    #[tokio::test]
    async fn test_durable_update_failure_is_partial_write() {
        let h = harness();
        let input = cart("abc-7", "$10", 1);
        h.controller.produce(input.clone(), &owner()).await.unwrap();
        h.store.fail_updates(true);

        let result = h.controller.consume(&input.reservation_id, true).await;

        assert_matches!(
            result,
            Err(CartError::PartialWriteInconsistency {
                succeeded: StoreKind::Cache,
                failed: StoreKind::Durable,
                ..
            })
        );
        assert!(h.cache.get(&input.reservation_id).await.unwrap().unwrap().bought);
        assert!(!h.store.record(&input.reservation_id).unwrap().bought());
        assert!(h.gateway.events_named("bought").is_empty());
    }

    #[tokio::test]
    async fn test_consume_without_durable_row_is_partial_write() {
        let h = harness();
        let input = cart("abc-13", "$10", 1);
        h.store.fail_inserts(true);
        let _ = h.controller.produce(input.clone(), &owner()).await;
        h.store.fail_inserts(false);

        let result = h.controller.consume(&input.reservation_id, true).await;

        assert_matches!(
            result,
            Err(CartError::PartialWriteInconsistency {
                succeeded: StoreKind::Cache,
                failed: StoreKind::Durable,
                source: StoreError::MissingRecord { .. },
                ..
            })
        );
        assert!(h.store.record(&input.reservation_id).is_none());
        assert!(h.gateway.events_named("bought").is_empty());
    }

    #[tokio::test]
    async fn test_second_buyer_after_purchase_gets_conflict() {
        let h = harness();
        let input = cart("abc-8", "$10", 1);
        h.controller.produce(input.clone(), &owner()).await.unwrap();

        h.controller.consume(&input.reservation_id, true).await.unwrap();
        let second = h.controller.consume(&input.reservation_id, true).await;

        assert_matches!(second, Err(CartError::Conflict(msg)) if msg.contains("already bought"));
        assert_eq!(h.gateway.events_named("bought").len(), 1);
    }

    /// Cache that lets a rival buyer commit between the caller's read and
    /// its compare-and-swap, once armed.
    struct RivalBuyerCache {
        inner: InMemoryReservationCache,
        armed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ReservationCache for RivalBuyerCache {
        async fn put_with_ttl(&self, snapshot: &CartSnapshot, ttl: Duration) -> Result<(), StoreError> {
            self.inner.put_with_ttl(snapshot, ttl).await
        }

        async fn get(&self, id: &ReservationId) -> Result<Option<CartSnapshot>, StoreError> {
            let read = self.inner.get(id).await?;
            if let Some(seen) = &read {
                if self.armed.swap(false, Ordering::SeqCst) {
                    let mut rival = seen.clone();
                    rival.bought = true;
                    rival.version = seen.version + 1;
                    let outcome = self.inner.replace_keep_ttl(&rival, seen.version).await?;
                    assert_eq!(outcome, CasOutcome::Replaced);
                }
            }
            Ok(read)
        }

        async fn replace_keep_ttl(
            &self,
            snapshot: &CartSnapshot,
            expected_version: u64,
        ) -> Result<CasOutcome, StoreError> {
            self.inner.replace_keep_ttl(snapshot, expected_version).await
        }

        async fn ttl(&self, id: &ReservationId) -> Result<Option<Duration>, StoreError> {
            self.inner.ttl(id).await
        }

        async fn keys(&self) -> Result<Vec<ReservationId>, StoreError> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn test_buyer_losing_cas_race_gets_conflict() {
        let cache = InMemoryReservationCache::new();
        let racing = Arc::new(RivalBuyerCache {
            inner: cache.clone(),
            armed: AtomicBool::new(false),
        });
        let store = InMemoryCartStore::new();
        let gateway = RecordingGateway::new();
        let controller = CartController::new(
            racing.clone(),
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            ControllerSettings::default(),
        );
        let input = cart("abc-14", "$10", 1);
        controller.produce(input.clone(), &owner()).await.unwrap();
        let writes_before = store.write_count();

        racing.armed.store(true, Ordering::SeqCst);
        let result = controller.consume(&input.reservation_id, true).await;

        assert_matches!(result, Err(CartError::Conflict(msg)) if msg.contains("modified concurrently"));
        // the loser touches neither the durable store nor the owner's channel
        assert_eq!(store.write_count(), writes_before);
        assert!(gateway.events_named("bought").is_empty());
        let cached = cache.get(&input.reservation_id).await.unwrap().unwrap();
        assert!(cached.bought);
        assert_eq!(cached.version, 1);
    }

    #[tokio::test]
    async fn test_stale_version_is_refused_by_cache() {
        let h = harness();
        let input = cart("abc-9", "$10", 1);
        h.controller.produce(input.clone(), &owner()).await.unwrap();

        let stale = h.cache.get(&input.reservation_id).await.unwrap().unwrap();
        h.controller.consume(&input.reservation_id, false).await.unwrap();

        let mut late = stale.clone();
        late.bought = true;
        late.version = stale.version + 1;
        let outcome = h.cache.replace_keep_ttl(&late, stale.version).await.unwrap();
        assert_eq!(outcome, CasOutcome::VersionMismatch);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_produce() {
        let h = harness();
        h.gateway.set_failing(true);

        let ack = h.controller.produce(cart("abc-10", "$10", 1), &owner()).await.unwrap();

        assert!(!ack.notified);
        assert!(h.store.record(&ack.reservation_id).is_some());
    }

    #[tokio::test]
    async fn test_owner_lookup_failure_keeps_purchase() {
        let h = harness();
        let input = cart("abc-11", "$10", 1);
        h.controller.produce(input.clone(), &owner()).await.unwrap();
        h.store.fail_reads(true);

        let ack = h.controller.consume(&input.reservation_id, true).await.unwrap();

        assert!(ack.bought);
        assert!(!ack.notified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_skips_expired_and_garbage_entries() {
        let h = harness();
        h.controller.produce(cart("live", "$10", 1), &owner()).await.unwrap();
        h.cache.insert_raw(&ReservationId::new("short"), "{\"uuid\":\"short\"}", Duration::from_secs(5));
        h.cache.insert_raw(&ReservationId::new("garbage"), "not json", Duration::from_secs(600));

        tokio::time::advance(Duration::from_secs(10)).await;
        let rows = h.controller.list_reservations().await.unwrap();

        let ids: Vec<&str> = rows.iter().map(|r| r.reservation_id.as_str()).collect();
        assert_eq!(ids, vec!["live"]);
    }

    #[tokio::test]
    async fn test_repair_rewrites_cache_from_durable_record() {
        let h = harness();
        let input = cart("abc-12", "$10", 1);
        h.controller.produce(input.clone(), &owner()).await.unwrap();
        h.store.force_bought(&input.reservation_id, true);

        let outcome = h.controller.repair(&input.reservation_id).await.unwrap();
        assert_eq!(outcome, RepairOutcome::Rewritten);
        assert!(h.cache.get(&input.reservation_id).await.unwrap().unwrap().bought);

        let again = h.controller.repair(&input.reservation_id).await.unwrap();
        assert_eq!(again, RepairOutcome::InSync);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repair_never_resurrects_expired_reservations() {
        let h = harness();
        let input = cart("abc-13", "$10", 1);
        h.controller.produce(input.clone(), &owner()).await.unwrap();

        tokio::time::advance(Duration::from_secs(601)).await;
        h.cache.expire_due();

        let outcome = h.controller.repair(&input.reservation_id).await.unwrap();
        assert_eq!(outcome, RepairOutcome::Expired);
        assert!(!h.cache.contains(&input.reservation_id));
    }

    #[tokio::test]
    async fn test_repair_requires_durable_record() {
        let h = harness();
        let result = h.controller.repair(&ReservationId::new("ghost")).await;
        assert_matches!(result, Err(CartError::ReservationNotFound(_)));
    }
}
