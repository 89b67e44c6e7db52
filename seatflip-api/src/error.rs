use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use seatflip_core::CartError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Cart(CartError),
    BadRequest(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message, data) = match self {
            AppError::Cart(err) => {
                let status = match &err {
                    CartError::ReservationNotFound(_) => StatusCode::NOT_FOUND,
                    CartError::Validation(_) => StatusCode::BAD_REQUEST,
                    CartError::Conflict(_) => StatusCode::CONFLICT,
                    CartError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    CartError::PartialWriteInconsistency { .. } | CartError::WatcherStopped(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status.is_server_error() {
                    tracing::error!(kind = err.kind(), error = %err, "Cart operation failed");
                }
                let data = match &err {
                    CartError::PartialWriteInconsistency {
                        reservation_id,
                        succeeded,
                        failed,
                        ..
                    } => Some(json!({
                        "reservation_id": reservation_id,
                        "succeeded": succeeded,
                        "failed": failed,
                    })),
                    _ => None,
                };
                (status, err.kind(), err.to_string(), data)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg, None),
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal Server Error".to_string(),
                    None,
                )
            }
        };

        let mut body = json!({
            "error": true,
            "kind": kind,
            "message": message,
        });
        if let Some(data) = data {
            body["data"] = data;
        }

        (status, Json(body)).into_response()
    }
}

impl From<CartError> for AppError {
    fn from(err: CartError) -> Self {
        AppError::Cart(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Anyhow(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatflip_core::{StoreError, StoreKind};
    use seatflip_shared::ReservationId;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CartError::ReservationNotFound(ReservationId::new("x")), StatusCode::NOT_FOUND),
            (CartError::Validation("empty".into()), StatusCode::BAD_REQUEST),
            (CartError::Conflict("taken".into()), StatusCode::CONFLICT),
            (
                CartError::cache(StoreError::Cache("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CartError::PartialWriteInconsistency {
                    reservation_id: ReservationId::new("x"),
                    succeeded: StoreKind::Cache,
                    failed: StoreKind::Durable,
                    source: StoreError::Database("down".into()),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).into_response().status(), expected);
        }
    }
}
