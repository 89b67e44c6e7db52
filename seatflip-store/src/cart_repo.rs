use async_trait::async_trait;
use seatflip_core::{DurableCartStore, StoreError};
use seatflip_shared::{CartSnapshot, DurableCartRecord, Money, OwningUser, ReservationId};
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Postgres mirror of produced carts (`carts` table).
///
/// Every statement is bounded by `op_timeout`; an elapsed timeout surfaces as
/// [`StoreError::Timeout`] so callers can tell a slow database from a failing one.
pub struct PostgresCartRepository {
    pool: PgPool,
    op_timeout: Duration,
}

impl PostgresCartRepository {
    pub fn new(pool: PgPool, op_timeout: Duration) -> Self {
        Self { pool, op_timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(|e| StoreError::Database(e.to_string())),
            Err(_) => Err(StoreError::Timeout {
                operation,
                timeout: self.op_timeout,
            }),
        }
    }
}

// Internal struct for type-safe querying
#[derive(sqlx::FromRow)]
struct CartRow {
    id: String,
    tab_id: i64,
    stock_type: String,
    event_date: String,
    event_name: String,
    event_venue: String,
    seat_info: String,
    ticket_info: String,
    ticket_price: String,
    ticket_total: String,
    ticket_total_cents: i64,
    bought: bool,
    user_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<CartRow> for DurableCartRecord {
    fn from(row: CartRow) -> Self {
        Self {
            snapshot: CartSnapshot {
                reservation_id: ReservationId::from(row.id),
                tab_id: row.tab_id,
                stock_type: row.stock_type,
                event_date: row.event_date,
                event_name: row.event_name,
                event_venue: row.event_venue,
                seat_info: row.seat_info,
                ticket_info: row.ticket_info,
                ticket_price: row.ticket_price,
                ticket_total: row.ticket_total,
                bought: row.bought,
                version: 0,
            },
            total: Money::from_cents(row.ticket_total_cents),
            user_id: row.user_id,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl DurableCartStore for PostgresCartRepository {
    async fn insert_cart(
        &self,
        snapshot: &CartSnapshot,
        total: Money,
        owner: &OwningUser,
    ) -> Result<(), StoreError> {
        // A re-produced id replaces the earlier row; last write wins.
        let query = sqlx::query(
            r#"
            INSERT INTO carts (
                id, tab_id, stock_type, event_date, event_name, event_venue,
                seat_info, ticket_info, ticket_price, ticket_total, ticket_total_cents,
                bought, user_id, user_email
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                tab_id = EXCLUDED.tab_id,
                stock_type = EXCLUDED.stock_type,
                event_date = EXCLUDED.event_date,
                event_name = EXCLUDED.event_name,
                event_venue = EXCLUDED.event_venue,
                seat_info = EXCLUDED.seat_info,
                ticket_info = EXCLUDED.ticket_info,
                ticket_price = EXCLUDED.ticket_price,
                ticket_total = EXCLUDED.ticket_total,
                ticket_total_cents = EXCLUDED.ticket_total_cents,
                bought = EXCLUDED.bought,
                user_id = EXCLUDED.user_id,
                user_email = EXCLUDED.user_email,
                created_at = NOW()
            "#,
        )
        .bind(snapshot.reservation_id.as_str())
        .bind(snapshot.tab_id)
        .bind(&snapshot.stock_type)
        .bind(&snapshot.event_date)
        .bind(&snapshot.event_name)
        .bind(&snapshot.event_venue)
        .bind(&snapshot.seat_info)
        .bind(&snapshot.ticket_info)
        .bind(&snapshot.ticket_price)
        .bind(&snapshot.ticket_total)
        .bind(total.cents())
        .bind(snapshot.bought)
        .bind(&owner.id)
        .bind(owner.email.expose().as_str())
        .execute(&self.pool);

        self.bounded("insert_cart", query).await?;
        debug!(reservation_id = %snapshot.reservation_id, "Cart row written");
        Ok(())
    }

    async fn update_cart_bought(&self, id: &ReservationId, bought: bool) -> Result<(), StoreError> {
        let query = sqlx::query("UPDATE carts SET bought = $1 WHERE id = $2")
            .bind(bought)
            .bind(id.as_str())
            .execute(&self.pool);

        let result = self.bounded("update_cart_bought", query).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRecord {
                operation: "update_cart_bought",
                reservation_id: id.clone(),
            });
        }
        debug!(reservation_id = %id, bought, "Cart row updated");
        Ok(())
    }

    async fn get_owning_user_id(&self, id: &ReservationId) -> Result<Option<String>, StoreError> {
        let query = sqlx::query_scalar::<_, String>("SELECT user_id FROM carts WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool);

        self.bounded("get_owning_user_id", query).await
    }

    async fn get_cart(&self, id: &ReservationId) -> Result<Option<DurableCartRecord>, StoreError> {
        let query = sqlx::query_as::<_, CartRow>(
            r#"
            SELECT id, tab_id, stock_type, event_date, event_name, event_venue,
                   seat_info, ticket_info, ticket_price, ticket_total, ticket_total_cents,
                   bought, user_id, created_at
            FROM carts
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool);

        Ok(self.bounded("get_cart", query).await?.map(DurableCartRecord::from))
    }
}
