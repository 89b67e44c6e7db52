use anyhow::Context;
use seatflip_api::{app, AppState, SseHub};
use seatflip_cart::{CartController, ControllerSettings, ExpiryWatcher, Reconciler};
use seatflip_core::{BroadcastGateway, FanoutGateway};
use seatflip_shared::ChannelNames;
use seatflip_store::app_config::Config;
use seatflip_store::{DbClient, KafkaBroadcastGateway, PostgresCartRepository, RedisClient, RedisExpiryListener};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "seatflip_api=debug,seatflip_cart=debug,seatflip_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting SeatFlip API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    if config.database.migrate {
        db.migrate().await.context("Failed to run migrations")?;
    }
    let store = Arc::new(PostgresCartRepository::new(db.pool.clone(), config.database.op_timeout()));

    // Redis
    let cache = RedisClient::new(&config.redis)
        .await
        .context("Failed to connect to Redis")?;
    if config.redis.configure_notifications {
        cache
            .enable_expiry_notifications()
            .await
            .context("Failed to enable keyspace notifications")?;
    }
    let expiries = RedisExpiryListener::connect(&config.redis)
        .await
        .context("Failed to subscribe to expiry notifications")?;

    // Broadcast: SSE hub, plus a Kafka mirror when brokers are configured
    let hub = SseHub::new(config.broadcast.sse_capacity);
    let mut targets: Vec<Arc<dyn BroadcastGateway>> = vec![Arc::new(hub.clone())];
    if let Some(brokers) = &config.kafka.brokers {
        let kafka = KafkaBroadcastGateway::new(brokers, config.kafka.topic.clone())
            .context("Failed to create Kafka producer")?;
        targets.push(Arc::new(kafka));
        tracing::info!(topic = %config.kafka.topic, "Mirroring broadcasts to Kafka");
    }
    let fanout = FanoutGateway::new(targets);
    tracing::info!(targets = fanout.len(), "Broadcast gateway ready");
    let gateway: Arc<dyn BroadcastGateway> = Arc::new(fanout);

    let channels = ChannelNames {
        public: config.broadcast.public_channel.clone(),
        private_prefix: config.broadcast.private_channel_prefix.clone(),
    };
    let controller = CartController::new(
        Arc::new(cache),
        store.clone(),
        gateway.clone(),
        ControllerSettings {
            reservation_ttl: config.reservation.ttl(),
            channels: channels.clone(),
        },
    );

    let watcher = ExpiryWatcher::new(Box::new(expiries), store, gateway, channels.public).spawn();

    if let Some(seconds) = config.reconcile.interval_seconds {
        Reconciler::new(controller.clone(), Duration::from_secs(seconds)).spawn();
    }

    let app = app(AppState { controller, hub });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // A dead expiry watcher is fatal: exit and let the supervisor restart us.
    tokio::select! {
        served = axum::serve(listener, app).into_future() => {
            served.context("HTTP server failed")?;
        }
        stopped = watcher => {
            match stopped {
                Ok(Ok(())) => tracing::warn!("Expiry watcher exited"),
                Ok(Err(e)) => anyhow::bail!(e),
                Err(e) => anyhow::bail!("Expiry watcher panicked: {}", e),
            }
        }
    }

    Ok(())
}
