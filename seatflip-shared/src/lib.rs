pub mod models;
pub mod pii;

pub use models::cart::{CartSnapshot, DurableCartRecord, OwningUser, ReservationId};
pub use models::events::{CartEvent, ChannelNames, EventPayload, PushEvent};
pub use models::money::{Money, MoneyError};
pub use pii::Masked;
