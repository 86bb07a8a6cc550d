//! Dispatches inbound messages onto the orchestrator.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use scenecraft::config::validate_settings;
use scenecraft::{Destination, GenerationRequest, Orchestrator, PipelineOutcome};

use crate::messaging::{InboundMessage, OutboundMessage};

pub struct Host {
    orchestrator: Arc<Orchestrator>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    tasks: JoinSet<PipelineOutcome>,
}

impl Host {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        Self {
            orchestrator,
            outbound,
            tasks: JoinSet::new(),
        }
    }

    /// Pipeline runs are spawned so the read loop keeps draining stdin while
    /// a generation is in flight; overlapping triggers hit the busy guard.
    pub fn handle(&mut self, message: InboundMessage) {
        self.reap();
        match message {
            InboundMessage::ElementsChanged {
                tab_id,
                url,
                elements,
            } => {
                let orchestrator = self.orchestrator.clone();
                let request = GenerationRequest::new(elements);
                let destination = Destination::new(tab_id, url);
                self.tasks.spawn(async move {
                    orchestrator.on_elements_changed(request, destination).await
                });
            }
            InboundMessage::Regenerate { tabs } => {
                let orchestrator = self.orchestrator.clone();
                self.tasks
                    .spawn(async move { orchestrator.on_regenerate_requested(&tabs).await });
            }
            InboundMessage::SettingsChanged { settings } => match validate_settings(&settings) {
                Ok(()) => {
                    info!("Settings updated (image model {})", settings.image.model);
                    self.orchestrator.settings().replace(*settings);
                }
                Err(e) => {
                    warn!("Rejected settings update: {}", e);
                    self.reply(OutboundMessage::Error {
                        message: e.to_string(),
                    });
                }
            },
            InboundMessage::Ping => self.reply(OutboundMessage::Pong),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for in-flight runs and their trace uploads.
    pub async fn shutdown(mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            log_outcome(joined);
        }
        self.orchestrator.drain_traces().await;
    }

    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            log_outcome(joined);
        }
    }

    fn reply(&self, message: OutboundMessage) {
        if self.outbound.send(message).is_err() {
            debug!("Outbound queue closed, dropping reply");
        }
    }
}

fn log_outcome(joined: Result<PipelineOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(PipelineOutcome::Rendered(message)) => {
            debug!("Run rendered in {} ms", message.stats.total_ms)
        }
        Ok(outcome) => debug!("Run finished: {:?}", outcome),
        Err(e) => warn!("Pipeline task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenecraft::config::Settings;
    use scenecraft::{GameElement, PipelineEvent, PipelineEvents, SharedSettings, StatusSignal};

    fn host() -> (Host, mpsc::UnboundedReceiver<OutboundMessage>, Arc<Orchestrator>) {
        let orchestrator = Arc::new(
            Orchestrator::from_settings(
                SharedSettings::new(Settings::default()),
                PipelineEvents::default(),
            )
            .unwrap(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        (Host::new(orchestrator.clone(), tx), rx, orchestrator)
    }

    #[tokio::test]
    async fn test_ping_answers_pong() {
        let (mut host, mut rx, _) = host();
        host.handle(InboundMessage::Ping);
        assert_eq!(rx.recv().await.unwrap(), OutboundMessage::Pong);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let (mut host, mut rx, orchestrator) = host();
        let mut settings = Settings::default();
        settings.image.model = "fal:flux-dev".to_string();
        settings.timing.poll_interval_ms = 0;

        host.handle(InboundMessage::SettingsChanged {
            settings: Box::new(settings),
        });

        assert!(matches!(rx.recv().await.unwrap(), OutboundMessage::Error { .. }));
        assert_ne!(orchestrator.settings().snapshot().image.model, "fal:flux-dev");
    }

    #[tokio::test]
    async fn test_valid_settings_applied() {
        let (mut host, mut rx, orchestrator) = host();
        let mut settings = Settings::default();
        settings.image.model = "fal:flux-dev".to_string();

        host.handle(InboundMessage::SettingsChanged {
            settings: Box::new(settings),
        });

        assert_eq!(orchestrator.settings().snapshot().image.model, "fal:flux-dev");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_elements_without_keys_report_missing_key() {
        let (mut host, _rx, orchestrator) = host();
        let mut events = orchestrator.events().subscribe();

        host.handle(InboundMessage::ElementsChanged {
            tab_id: 7,
            url: "https://neal.fun/infinite-craft/".to_string(),
            elements: vec![GameElement::new("1", "Fire")],
        });
        assert_eq!(host.in_flight(), 1);
        host.shutdown().await;

        assert_eq!(
            events.recv().await.unwrap(),
            PipelineEvent::Status(StatusSignal::Busy)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            PipelineEvent::Status(StatusSignal::MissingKey)
        );
        assert!(!orchestrator.is_generating());
    }
}
