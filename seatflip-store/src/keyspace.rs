use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use redis::{Msg, RedisError};
use seatflip_core::{ExpiryNotifications, StoreError};
use seatflip_shared::ReservationId;
use std::pin::Pin;
use tracing::{debug, info};

use crate::app_config::RedisConfig;

type MessageStream = Pin<Box<dyn Stream<Item = Msg> + Send>>;

/// Subscription to Redis `expired` keyevents for reservation keys.
///
/// Keys outside the configured prefix are skipped, so the listener can share
/// a database with unrelated data.
pub struct RedisExpiryListener {
    messages: MessageStream,
    key_prefix: String,
}

impl RedisExpiryListener {
    /// Subscribe to expiries in the database `config.url` selects.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str()).map_err(cache_err)?;
        let db = selected_db(&client).await?;

        let mut pubsub = client.get_async_pubsub().await.map_err(cache_err)?;
        let channel = format!("__keyevent@{}__:expired", db);
        pubsub.psubscribe(&channel).await.map_err(cache_err)?;
        info!(channel = %channel, "Subscribed to expired keyevents");

        Ok(Self {
            messages: Box::pin(pubsub.into_on_message()),
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn reservation_id(&self, key: &str) -> Option<ReservationId> {
        key.strip_prefix(self.key_prefix.as_str())
            .filter(|id| !id.is_empty())
            .map(ReservationId::from)
    }
}

fn cache_err(e: RedisError) -> StoreError {
    StoreError::Cache(e.to_string())
}

/// Database index of a fresh connection from `client`, as the server reports it.
async fn selected_db(client: &redis::Client) -> Result<u32, StoreError> {
    let mut conn = client.get_multiplexed_async_connection().await.map_err(cache_err)?;
    let info: String = redis::cmd("CLIENT")
        .arg("INFO")
        .query_async(&mut conn)
        .await
        .map_err(cache_err)?;

    parse_client_db(&info)
        .ok_or_else(|| StoreError::Cache(format!("CLIENT INFO has no db field: {}", info.trim())))
}

fn parse_client_db(info: &str) -> Option<u32> {
    info.split_whitespace()
        .find_map(|field| field.strip_prefix("db="))
        .and_then(|db| db.parse().ok())
}

#[async_trait]
impl ExpiryNotifications for RedisExpiryListener {
    async fn next_expired(&mut self) -> Result<Option<ReservationId>, StoreError> {
        while let Some(msg) = self.messages.next().await {
            let key: String = msg.get_payload().map_err(cache_err)?;

            match self.reservation_id(&key) {
                Some(id) => return Ok(Some(id)),
                None => debug!(key = %key, "Ignoring expiry of unrelated key"),
            }
        }
        // Stream ends when the pubsub connection drops.
        Ok(None)
    }
}
