use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError};
use seatflip_core::{CasOutcome, ReservationCache, StoreError};
use seatflip_shared::{CartSnapshot, ReservationId};
use std::time::Duration;
use tracing::{debug, info};

use crate::app_config::RedisConfig;

const SCAN_BATCH: usize = 100;

// Set-if-unchanged: rewrite only when the stored snapshot still carries the
// version the caller read. KEEPTTL leaves the reservation window alone.
// Returns 1 replaced, 0 version mismatch, -1 missing.
const REPLACE_KEEP_TTL: &str = r#"
    local current = redis.call("GET", KEYS[1])
    if not current then
        return -1
    end
    local stored = cjson.decode(current)
    if tonumber(stored["version"] or 0) ~= tonumber(ARGV[1]) then
        return 0
    end
    redis.call("SET", KEYS[1], ARGV[2], "KEEPTTL")
    return 1
"#;

fn cache_err(e: RedisError) -> StoreError {
    StoreError::Cache(e.to_string())
}

/// Redis-backed reservation cache.
///
/// Holds one multiplexed connection for the lifetime of the process; each
/// call works on a cheap clone of it.
#[derive(Clone)]
pub struct RedisClient {
    conn: MultiplexedConnection,
    key_prefix: String,
    replace_script: redis::Script,
}

impl RedisClient {
    pub async fn new(config: &RedisConfig) -> Result<Self, RedisError> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url = %config.url, key_prefix = %config.key_prefix, "Connected to Redis");

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            replace_script: redis::Script::new(REPLACE_KEEP_TTL),
        })
    }

    /// Ask Redis to publish `expired` keyevents; they are off by default.
    pub async fn enable_expiry_notifications(&self) -> Result<(), RedisError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Ex")
            .query_async(&mut conn)
            .await?;
        info!("Redis expired keyevent notifications enabled");
        Ok(())
    }

    fn key(&self, id: &ReservationId) -> String {
        format!("{}{}", self.key_prefix, id)
    }
}

#[async_trait]
impl ReservationCache for RedisClient {
    async fn put_with_ttl(&self, snapshot: &CartSnapshot, ttl: Duration) -> Result<(), StoreError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Err(StoreError::Cache("reservation ttl must be at least 1ms".to_string()));
        }
        let mut conn = self.conn.clone();
        let key = self.key(&snapshot.reservation_id);
        let value = serde_json::to_string(snapshot)?;

        conn.pset_ex::<_, _, ()>(&key, value, millis)
            .await
            .map_err(cache_err)?;
        debug!(key = %key, ttl_ms = millis, "Reservation stored");
        Ok(())
    }

    async fn get(&self, id: &ReservationId) -> Result<Option<CartSnapshot>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(id)).await.map_err(cache_err)?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn replace_keep_ttl(
        &self,
        snapshot: &CartSnapshot,
        expected_version: u64,
    ) -> Result<CasOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(snapshot)?;

        let outcome: i64 = self
            .replace_script
            .key(self.key(&snapshot.reservation_id))
            .arg(expected_version)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(cache_err)?;

        Ok(match outcome {
            1 => CasOutcome::Replaced,
            0 => CasOutcome::VersionMismatch,
            _ => CasOutcome::Missing,
        })
    }

    async fn ttl(&self, id: &ReservationId) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let millis: i64 = redis::cmd("PTTL")
            .arg(self.key(id))
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;

        // -2: no such key, -1: no expiry set
        Ok(match millis {
            m if m >= 0 => Some(Duration::from_millis(m as u64)),
            _ => None,
        })
    }

    async fn keys(&self) -> Result<Vec<ReservationId>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut ids = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(cache_err)?;

            ids.extend(batch.into_iter().filter_map(|key| {
                key.strip_prefix(self.key_prefix.as_str())
                    .map(ReservationId::from)
            }));

            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
