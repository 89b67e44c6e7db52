pub mod cart;
pub mod events;
pub mod money;
