use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub reservation: ReservationConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Upper bound for a single durable store operation.
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub migrate: bool,
}

impl DatabaseConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Also selects the database; the expiry listener follows it.
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Issue `CONFIG SET notify-keyspace-events` on startup. Managed Redis
    /// offerings often reject CONFIG; turn this off there and configure it
    /// out of band.
    #[serde(default = "default_true")]
    pub configure_notifications: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    pub ttl_seconds: u64,
}

impl ReservationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    pub public_channel: String,
    pub private_channel_prefix: String,
    pub sse_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            public_channel: "public-channel".to_string(),
            private_channel_prefix: "private-channel-".to_string(),
            sse_capacity: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    /// Mirror broadcasts to Kafka only when set.
    pub brokers: Option<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: None,
            topic: default_topic(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReconcileConfig {
    pub interval_seconds: Option<u64>,
}

fn default_max_connections() -> u32 { 5 }
fn default_op_timeout_ms() -> u64 { 3000 }
fn default_true() -> bool { true }
fn default_key_prefix() -> String { "cart:".to_string() }
fn default_topic() -> String { "seatflip.broadcast".to_string() }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `SEATFLIP__REDIS__URL=redis://cache:6379`
            .add_source(config::Environment::with_prefix("SEATFLIP").separator("__"))
            .build()?;

        let config: Config = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.reservation.ttl_seconds == 0 {
            return Err(config::ConfigError::Message(
                "reservation.ttl_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let raw = r#"
            [server]
            port = 8080

            [database]
            url = "postgres://localhost/seatflip"

            [redis]
            url = "redis://127.0.0.1/"

            [reservation]
            ttl_seconds = 600
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.database.op_timeout(), Duration::from_secs(3));
        assert!(config.database.migrate);
        assert_eq!(config.redis.key_prefix, "cart:");
        assert_eq!(config.reservation.ttl(), Duration::from_secs(600));
        assert_eq!(config.broadcast.public_channel, "public-channel");
        assert!(config.kafka.brokers.is_none());
        assert!(config.reconcile.interval_seconds.is_none());
    }

    #[test]
    fn test_zero_reservation_ttl_is_rejected() {
        let raw = r#"
            [server]
            port = 8080

            [database]
            url = "postgres://localhost/seatflip"

            [redis]
            url = "redis://127.0.0.1/"

            [reservation]
            ttl_seconds = 0
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ttl_seconds"));
    }
}
