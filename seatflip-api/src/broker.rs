use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use seatflip_shared::{CartSnapshot, OwningUser, ReservationId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Envelope posted by the browser extension.
#[derive(Debug, Deserialize)]
pub struct BrokerRequest {
    pub action: String,
    pub cart: Option<CartSnapshot>,
    pub buy: Option<BuyRequest>,
    pub user: Option<OwningUser>,
}

#[derive(Debug, Deserialize)]
pub struct BuyRequest {
    pub buy: bool,
    pub uuid: ReservationId,
}

#[derive(Debug, Serialize)]
pub struct BrokerResponse {
    pub error: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BrokerResponse {
    fn accepted(message: impl Into<String>, data: impl Serialize) -> Result<Self, AppError> {
        let data = serde_json::to_value(data).map_err(anyhow::Error::from)?;
        Ok(Self {
            error: false,
            message: message.into(),
            data: Some(data),
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new().route("/broker", post(handle_broker))
}

async fn handle_broker(
    State(state): State<AppState>,
    Json(req): Json<BrokerRequest>,
) -> Result<(StatusCode, Json<BrokerResponse>), AppError> {
    let response = match req.action.as_str() {
        "cart" => {
            let cart = req
                .cart
                .ok_or_else(|| AppError::BadRequest("action 'cart' requires a cart".to_string()))?;
            let user = req
                .user
                .ok_or_else(|| AppError::BadRequest("action 'cart' requires a user".to_string()))?;

            let ack = state.controller.produce(cart, &user).await?;
            info!(reservation_id = %ack.reservation_id, notified = ack.notified, "Cart produced");
            BrokerResponse::accepted("cart reserved", ack)?
        }
        "buy" => {
            let buy = req
                .buy
                .ok_or_else(|| AppError::BadRequest("action 'buy' requires a buy payload".to_string()))?;

            let ack = state.controller.consume(&buy.uuid, buy.buy).await?;
            info!(reservation_id = %ack.reservation_id, bought = ack.bought, "Cart consumed");
            BrokerResponse::accepted("cart updated", ack)?
        }
        other => return Err(AppError::BadRequest(format!("unknown action '{}'", other))),
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}
