use async_trait::async_trait;
use seatflip_shared::EventPayload;
use std::sync::Arc;
use tracing::warn;

use crate::error::StoreError;

/// Publish/subscribe fan-out to connected clients.
#[async_trait]
pub trait BroadcastGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, channel: &str, event: &str, payload: &EventPayload) -> Result<(), StoreError>;
}

/// Publishes to several gateways at once.
///
/// A publish succeeds when at least one target accepted it; failing targets
/// are logged. With no targets every publish is a no-op.
#[derive(Clone, Default)]
pub struct FanoutGateway {
    targets: Vec<Arc<dyn BroadcastGateway>>,
}

impl FanoutGateway {
    pub fn new(targets: Vec<Arc<dyn BroadcastGateway>>) -> Self {
        Self { targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl BroadcastGateway for FanoutGateway {
    fn name(&self) -> &'static str {
        "fanout"
    }

    async fn publish(&self, channel: &str, event: &str, payload: &EventPayload) -> Result<(), StoreError> {
        let mut delivered = false;
        let mut last_error = None;

        for target in &self.targets {
            match target.publish(channel, event, payload).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!(gateway = target.name(), channel, event, error = %e, "Broadcast target rejected event");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !delivered => Err(e),
            _ => Ok(()),
        }
    }
}
