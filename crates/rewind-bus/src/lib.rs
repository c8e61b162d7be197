//! Event bus carrying results from background work to the presentation layer.

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use rewind_types::{events::SystemEvent, RewindError, Result};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: SystemEvent) -> Result<()>;
    fn subscribe(&self) -> BoxStream<'static, SystemEvent>;
}

/// In-process bus backed by a broadcast channel.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(bus_error("bus capacity must be greater than zero"));
        }
        let (tx, _) = broadcast::channel(capacity);
        Ok(Self { tx })
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, event: SystemEvent) -> Result<()> {
        if self.tx.send(event).is_err() {
            debug!("Event dropped: no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, SystemEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move {
                match event {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!("Subscriber lagged, {skipped} events skipped");
                        None
                    }
                }
            })
            .boxed()
    }
}

pub fn bus_error(message: impl Into<String>) -> RewindError {
    RewindError::Bus(message.into())
}
