use seatflip_cart::CartController;

use crate::stream::SseHub;

#[derive(Clone)]
pub struct AppState {
    pub controller: CartController,
    pub hub: SseHub,
}
