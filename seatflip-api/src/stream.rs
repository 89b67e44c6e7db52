use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::{Stream, StreamExt};
use seatflip_core::{BroadcastGateway, StoreError};
use seatflip_shared::{EventPayload, PushEvent};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::state::AppState;

/// In-process fan-out of broadcast events to connected SSE clients.
///
/// Every subscriber sees every event and filters by channel. Publishing with
/// no subscribers is not an error; nobody is listening yet.
#[derive(Clone)]
pub struct SseHub {
    tx: broadcast::Sender<PushEvent>,
}

impl SseHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl BroadcastGateway for SseHub {
    fn name(&self) -> &'static str {
        "sse"
    }

    async fn publish(&self, channel: &str, event: &str, payload: &EventPayload) -> Result<(), StoreError> {
        let push = PushEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            data: payload.clone(),
        };
        match self.tx.send(push) {
            Ok(receivers) => debug!(channel = %channel, event = %event, receivers, "Event pushed"),
            Err(_) => debug!(channel = %channel, event = %event, "No SSE subscribers"),
        }
        Ok(())
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/channels/{channel}/stream", get(channel_stream))
}

async fn channel_stream(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    debug!(channel = %channel, "SSE subscriber connected");
    let rx = state.hub.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let channel = channel.clone();
        async move {
            match result {
                Ok(push) if push.channel == channel => {
                    Some(Event::default().event(push.event).json_data(&push.data))
                }
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(channel = %channel, skipped, "SSE subscriber lagged, events dropped");
                    None
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
