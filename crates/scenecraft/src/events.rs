//! Status and render events emitted by the orchestrator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::destination::Destination;

/// Badge state shown to the user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StatusSignal {
    Idle,
    Busy,
    MissingKey,
    Error,
}

impl std::fmt::Display for StatusSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusSignal::Idle => write!(f, "idle"),
            StatusSignal::Busy => write!(f, "busy"),
            StatusSignal::MissingKey => write!(f, "missing-key"),
            StatusSignal::Error => write!(f, "error"),
        }
    }
}

/// Stage timings in milliseconds. `llm_ms` is absent for regenerations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RenderStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_ms: Option<u64>,
    pub image_gen_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RenderMessage {
    pub image_url: String,
    pub prompt: String,
    pub stats: RenderStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Status(StatusSignal),
    Render {
        destination: Destination,
        message: RenderMessage,
    },
}

/// Fans pipeline events out to every subscriber.
#[derive(Clone)]
pub struct PipelineEvents {
    sender: Arc<broadcast::Sender<PipelineEvent>>,
}

impl PipelineEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn status(&self, signal: StatusSignal) {
        self.send(PipelineEvent::Status(signal));
    }

    pub fn render(&self, destination: Destination, message: RenderMessage) {
        self.send(PipelineEvent::Render {
            destination,
            message,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for PipelineEvents {
    fn default() -> Self {
        Self::new(64)
    }
}
