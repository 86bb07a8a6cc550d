//! Orchestrator wired to in-process fakes.
//!
//! Every collaborator records what it was asked to do, so tests can assert
//! which network calls would have been issued.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{broadcast, Notify};

use scenecraft::config::{Settings, TraceSettings};
use scenecraft::image::ImageInliner;
use scenecraft::secrets::SecretSource;
use scenecraft::trace::{CallEnd, CallStart};
use scenecraft::{
    Collaborators, Destination, GameElement, GenerationError, GenerationRequest, ImageGenerator,
    ImageResult, MemoryPromptStore, Orchestrator, PipelineEvent, PipelineEvents, PromptGenerator,
    PromptResult, ProviderKind, SharedSettings, TokenUsage, TraceConnector, TraceError,
    TraceTransport, Tracer,
};

pub const GAME_URL: &str = "https://neal.fun/infinite-craft/";

/// Scripted answer of a fake provider.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Fail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptCall {
    pub texts: Vec<String>,
    pub model: String,
    pub previous_prompt: String,
}

#[derive(Default)]
pub struct FakePrompts {
    pub calls: Mutex<Vec<PromptCall>>,
    replies: Mutex<VecDeque<Reply>>,
    /// When set, every call waits for one notification before answering.
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakePrompts {
    pub fn reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<PromptCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PromptGenerator for FakePrompts {
    async fn generate(
        &self,
        request: &GenerationRequest,
        api_key: &SecretString,
        model: &str,
        previous_prompt: &str,
    ) -> Result<PromptResult, GenerationError> {
        assert!(!api_key.expose_secret().is_empty());
        self.calls.lock().unwrap().push(PromptCall {
            texts: request.texts().map(str::to_string).collect(),
            model: model.to_string(),
            previous_prompt: previous_prompt.to_string(),
        });

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Ok("Steam rises over a quiet lake.".to_string()));
        match reply {
            Reply::Ok(prompt) => Ok(PromptResult {
                prompt,
                model: model.to_string(),
                usage: Some(TokenUsage {
                    prompt_tokens: 120,
                    completion_tokens: 40,
                    total_tokens: 160,
                }),
            }),
            Reply::Fail(message) => Err(GenerationError::upstream("openai", message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCall {
    pub prompt: String,
    pub model_id: String,
}

pub struct FakeImages {
    kind: ProviderKind,
    pub calls: Mutex<Vec<ImageCall>>,
    replies: Mutex<VecDeque<Reply>>,
}

impl FakeImages {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
        }
    }

    pub fn reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<ImageCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(
        &self,
        prompt: &str,
        api_key: &SecretString,
        model_id: &str,
    ) -> Result<ImageResult, GenerationError> {
        assert!(!api_key.expose_secret().is_empty());
        self.calls.lock().unwrap().push(ImageCall {
            prompt: prompt.to_string(),
            model_id: model_id.to_string(),
        });
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Ok("https://img/x.jpg".to_string()));
        match reply {
            Reply::Ok(url) => Ok(ImageResult::from_url(url)),
            Reply::Fail(message) => Err(GenerationError::upstream(self.kind.name(), message)),
        }
    }
}

/// Records every trace call; optionally rejects or stalls all of them.
#[derive(Default)]
pub struct RecordingTransport {
    pub starts: Mutex<Vec<CallStart>>,
    pub ends: Mutex<Vec<CallEnd>>,
    pub fail: bool,
    /// When set, every call waits for a notification before recording.
    stall: Option<Arc<Notify>>,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Calls hang until the returned gate is notified.
    pub fn stalled() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let transport = Self {
            stall: Some(gate.clone()),
            ..Self::default()
        };
        (transport, gate)
    }

    async fn wait_for_gate(&self) {
        if let Some(gate) = &self.stall {
            gate.notified().await;
        }
    }

    pub fn starts(&self) -> Vec<CallStart> {
        self.starts.lock().unwrap().clone()
    }

    pub fn ends(&self) -> Vec<CallEnd> {
        self.ends.lock().unwrap().clone()
    }

    pub fn start_named(&self, op_name: &str) -> Option<CallStart> {
        self.starts().into_iter().find(|s| s.op_name == op_name)
    }

    pub fn end_for(&self, id: &str) -> Option<CallEnd> {
        self.ends().into_iter().find(|e| e.id == id)
    }
}

#[async_trait]
impl TraceTransport for RecordingTransport {
    async fn call_start(&self, start: &CallStart) -> Result<(), TraceError> {
        self.wait_for_gate().await;
        if self.fail {
            return Err(TraceError::Rejected {
                operation: "call/start",
                message: "503 Service Unavailable".to_string(),
            });
        }
        self.starts.lock().unwrap().push(start.clone());
        Ok(())
    }

    async fn call_end(&self, end: &CallEnd) -> Result<(), TraceError> {
        self.wait_for_gate().await;
        if self.fail {
            return Err(TraceError::Rejected {
                operation: "call/end",
                message: "503 Service Unavailable".to_string(),
            });
        }
        self.ends.lock().unwrap().push(end.clone());
        Ok(())
    }
}

pub struct FakeConnector {
    transport: Arc<RecordingTransport>,
    pub connects: AtomicUsize,
}

impl TraceConnector for FakeConnector {
    fn connect(&self, settings: &TraceSettings) -> Tracer {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !settings.api_key.is_configured() {
            return Tracer::disabled();
        }
        Tracer::new(self.transport.clone(), settings.project_id())
    }
}

/// Pretends to download the image.
pub struct FakeInliner;

#[async_trait]
impl ImageInliner for FakeInliner {
    async fn inline(&self, image: &ImageResult) -> Result<ImageResult, GenerationError> {
        let mut inline = image.clone();
        inline.base64 = Some("AAAA".to_string());
        Ok(inline)
    }
}

/// Settings with every credential present and Replicate selected.
pub fn valid_settings() -> Settings {
    let mut settings = Settings::default();
    settings.prompt.api_key = SecretSource::direct("sk-test");
    settings.image.replicate = SecretSource::direct("r8_test");
    settings.image.fal = SecretSource::direct("fal_test");
    settings.trace.api_key = SecretSource::direct("wandb-test");
    settings.trace.entity = Some("team".to_string());
    settings
}

pub fn elements(texts: &[&str]) -> GenerationRequest {
    GenerationRequest::new(
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| GameElement::new((i + 1).to_string(), *text)),
    )
}

pub fn game_tab() -> Destination {
    Destination::new(7, GAME_URL)
}

pub struct TestHarness {
    pub orchestrator: Arc<Orchestrator>,
    pub prompts: Arc<FakePrompts>,
    pub replicate: Arc<FakeImages>,
    pub fal: Arc<FakeImages>,
    pub store: Arc<MemoryPromptStore>,
    pub transport: Arc<RecordingTransport>,
    pub connector: Arc<FakeConnector>,
    pub events: broadcast::Receiver<PipelineEvent>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(valid_settings(), MemoryPromptStore::new(), RecordingTransport::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::build(settings, MemoryPromptStore::new(), RecordingTransport::default())
    }

    pub fn build(
        settings: Settings,
        store: MemoryPromptStore,
        transport: RecordingTransport,
    ) -> Self {
        let prompts = Arc::new(FakePrompts::default());
        let replicate = Arc::new(FakeImages::new(ProviderKind::Replicate));
        let fal = Arc::new(FakeImages::new(ProviderKind::Fal));
        let store = Arc::new(store);
        let transport = Arc::new(transport);
        let connector = Arc::new(FakeConnector {
            transport: transport.clone(),
            connects: AtomicUsize::new(0),
        });

        let collaborators = Collaborators {
            prompts: prompts.clone(),
            images: scenecraft::ImageProviders::new(replicate.clone(), fal.clone()),
            store: store.clone(),
            trace: connector.clone(),
            inliner: Arc::new(FakeInliner),
        };
        let events = PipelineEvents::default();
        let receiver = events.subscribe();
        let orchestrator = Arc::new(Orchestrator::new(
            SharedSettings::new(settings),
            collaborators,
            events,
        ));

        Self {
            orchestrator,
            prompts,
            replicate,
            fal,
            store,
            transport,
            connector,
            events: receiver,
        }
    }

    /// Everything emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
