pub mod broadcast;
pub mod cache;
pub mod error;
pub mod repository;

pub use broadcast::{BroadcastGateway, FanoutGateway};
pub use cache::{CasOutcome, ExpiryNotifications, ReservationCache};
pub use error::{CartError, CartResult, StoreError, StoreKind};
pub use repository::DurableCartStore;
