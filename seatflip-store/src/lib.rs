pub mod app_config;
pub mod cart_repo;
pub mod database;
pub mod events;
pub mod keyspace;
pub mod redis_repo;

pub use cart_repo::PostgresCartRepository;
pub use database::DbClient;
pub use events::KafkaBroadcastGateway;
pub use keyspace::RedisExpiryListener;
pub use redis_repo::RedisClient;
