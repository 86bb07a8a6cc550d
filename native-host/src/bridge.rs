//! Forwards pipeline events to the outbound message queue.

use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc};

use scenecraft::PipelineEvent;

use crate::messaging::OutboundMessage;

impl From<PipelineEvent> for OutboundMessage {
    fn from(event: PipelineEvent) -> Self {
        match event {
            PipelineEvent::Status(status) => OutboundMessage::Status { status },
            PipelineEvent::Render {
                destination,
                message,
            } => OutboundMessage::Render {
                tab_id: destination.tab_id,
                image_url: message.image_url,
                prompt: message.prompt,
                stats: message.stats,
            },
        }
    }
}

/// Runs until the broadcaster closes or the outbound queue is gone.
pub async fn run_event_bridge(
    mut events: broadcast::Receiver<PipelineEvent>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if outbound.send(event.into()).is_err() {
                    debug!("Outbound queue closed, stopping event bridge");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event bridge lagged, missed {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("Pipeline events closed, stopping event bridge");
                break;
            }
        }
    }
}
