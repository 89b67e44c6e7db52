use seatflip_core::{BroadcastGateway, CartError, CartResult, DurableCartStore, ExpiryNotifications, StoreError};
use seatflip_shared::{CartEvent, EventPayload, ReservationId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Background task turning cache expiry notifications into `expired-row`
/// announcements on the public channel.
///
/// The cache value is already gone when a notification arrives, so the
/// announcement is enriched from the durable copy of the cart instead.
pub struct ExpiryWatcher {
    notifications: Box<dyn ExpiryNotifications>,
    announcer: ExpiryAnnouncer,
    processed: u64,
}

struct ExpiryAnnouncer {
    store: Arc<dyn DurableCartStore>,
    gateway: Arc<dyn BroadcastGateway>,
    public_channel: String,
}

impl ExpiryWatcher {
    pub fn new(
        notifications: Box<dyn ExpiryNotifications>,
        store: Arc<dyn DurableCartStore>,
        gateway: Arc<dyn BroadcastGateway>,
        public_channel: impl Into<String>,
    ) -> Self {
        Self {
            notifications,
            announcer: ExpiryAnnouncer {
                store,
                gateway,
                public_channel: public_channel.into(),
            },
            processed: 0,
        }
    }

    pub fn spawn(self) -> JoinHandle<CartResult<()>> {
        tokio::spawn(self.run())
    }

    /// Process notifications one at a time until the channel fails.
    ///
    /// Only returns on a receive error or a closed channel; both mean the
    /// process no longer sees expiries.
    pub async fn run(mut self) -> CartResult<()> {
        info!(channel = %self.announcer.public_channel, "Expiry watcher started");

        loop {
            let id = match self.notifications.next_expired().await {
                Ok(Some(id)) => id,
                Ok(None) => {
                    error!(processed = self.processed, "Expiry notification channel closed");
                    return Err(CartError::WatcherStopped("notification channel closed".to_string()));
                }
                Err(e) => {
                    error!(processed = self.processed, error = %e, "Expiry notification channel failed");
                    return Err(CartError::WatcherStopped(e.to_string()));
                }
            };

            self.processed += 1;
            if let Err(e) = self.announcer.announce_expired(&id).await {
                warn!(reservation_id = %id, error = %e, "Failed to announce expired reservation");
            }
        }
    }
}

impl ExpiryAnnouncer {
    async fn announce_expired(&self, id: &ReservationId) -> Result<(), StoreError> {
        let mut payload = EventPayload::from([("del".to_string(), id.to_string())]);

        match self.store.get_cart(id).await {
            Ok(Some(record)) => {
                payload.insert("event_name".to_string(), record.snapshot.event_name.clone());
                payload.insert("seat_info".to_string(), record.snapshot.seat_info.clone());
                payload.insert("ticket_total".to_string(), record.total.to_string());
                payload.insert("bought".to_string(), record.bought().to_string());
            }
            Ok(None) => debug!(reservation_id = %id, "No durable copy for expired reservation"),
            Err(e) => warn!(reservation_id = %id, error = %e, "Durable lookup for expired reservation failed"),
        }

        self.gateway
            .publish(&self.public_channel, CartEvent::ExpiredRow.as_str(), &payload)
            .await?;
        debug!(reservation_id = %id, "Expired reservation announced");
        Ok(())
    }
}
