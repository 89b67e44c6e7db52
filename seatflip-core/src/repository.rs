use async_trait::async_trait;
use seatflip_shared::{CartSnapshot, DurableCartRecord, Money, OwningUser, ReservationId};

use crate::error::StoreError;

/// Relational mirror of every cart ever produced.
#[async_trait]
pub trait DurableCartStore: Send + Sync {
    async fn insert_cart(
        &self,
        snapshot: &CartSnapshot,
        total: Money,
        owner: &OwningUser,
    ) -> Result<(), StoreError>;

    async fn update_cart_bought(&self, id: &ReservationId, bought: bool) -> Result<(), StoreError>;

    async fn get_owning_user_id(&self, id: &ReservationId) -> Result<Option<String>, StoreError>;

    async fn get_cart(&self, id: &ReservationId) -> Result<Option<DurableCartRecord>, StoreError>;
}
