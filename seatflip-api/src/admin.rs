use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use seatflip_cart::RepairOutcome;
use seatflip_shared::{CartSnapshot, ReservationId};
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReservationListResponse {
    pub count: usize,
    pub reservations: Vec<CartSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct RepairResponse {
    pub reservation_id: ReservationId,
    pub outcome: RepairOutcome,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/reservations", get(list_reservations))
        .route("/admin/reservations/{id}/repair", post(repair_reservation))
}

/// Every live reservation currently in the cache.
async fn list_reservations(
    State(state): State<AppState>,
) -> Result<Json<ReservationListResponse>, AppError> {
    let reservations = state.controller.list_reservations().await?;
    Ok(Json(ReservationListResponse {
        count: reservations.len(),
        reservations,
    }))
}

async fn repair_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RepairResponse>, AppError> {
    let reservation_id = ReservationId::from(id);
    let outcome = state.controller.repair(&reservation_id).await?;
    Ok(Json(RepairResponse {
        reservation_id,
        outcome,
    }))
}
