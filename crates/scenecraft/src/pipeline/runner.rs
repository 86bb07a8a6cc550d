use std::sync::{Arc, Mutex};

use chrono::Utc;
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{Settings, SharedSettings};
use crate::destination::{resolve_destination, Destination, TabSnapshot};
use crate::elements::GenerationRequest;
use crate::error::{GenerationError, ScenecraftError, TraceError};
use crate::events::{PipelineEvents, RenderMessage, RenderStats, StatusSignal};
use crate::http::create_http_client;
use crate::image::{HttpInliner, ImageInliner, ImageModel, ImageProviders, ImageResult};
use crate::prompt::{OpenAiPromptClient, PromptGenerator, PromptResult};
use crate::secrets::is_present;
use crate::storage::{FilePromptStore, MemoryPromptStore, PromptStore};
use crate::trace::{
    usage_summary, SpanContext, SpanOutcome, TraceConnector, Tracer, WeaveConnector,
};

use super::state::{PipelineState, Rejection};
use super::trace_job::{RootOutcome, StageRecord, TraceJob};

const ROOT_SPAN: &str = "generate_background";
const REGENERATE_SPAN: &str = "regenerate_image";
const PROMPT_SPAN: &str = "generate_prompt";
const IMAGE_SPAN: &str = "generate_image";

/// How one trigger ended. Callers never see an error; failures are reported
/// through the status signal and summarized here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Rendered(RenderMessage),
    /// Inside the debounce window of the last accepted trigger.
    Debounced,
    /// Another generation is in flight.
    Busy,
    /// Nothing to generate from.
    Empty,
    MissingKey,
    /// No tab matches the page pattern.
    NoDestination,
    Failed(String),
}

/// External services the orchestrator drives.
pub struct Collaborators {
    pub prompts: Arc<dyn PromptGenerator>,
    pub images: ImageProviders,
    pub store: Arc<dyn PromptStore>,
    pub trace: Arc<dyn TraceConnector>,
    pub inliner: Arc<dyn ImageInliner>,
}

impl Collaborators {
    /// Production clients sharing one HTTP client.
    pub fn from_settings(settings: &Settings) -> Result<Self, ScenecraftError> {
        let http = create_http_client().map_err(|e| GenerationError::Network {
            provider: "http-client",
            source: e,
        })?;
        let store: Arc<dyn PromptStore> = match settings.storage.resolve_state_dir() {
            Some(dir) => Arc::new(FilePromptStore::new(dir)),
            None => {
                warn!("No state directory available, last prompt will not survive restarts");
                Arc::new(MemoryPromptStore::new())
            }
        };
        Ok(Self {
            prompts: Arc::new(OpenAiPromptClient::new(
                http.clone(),
                settings.prompt.base_url.clone(),
            )),
            images: ImageProviders::from_settings(http.clone(), &settings.timing),
            store,
            trace: Arc::new(WeaveConnector::new(http.clone())),
            inliner: Arc::new(HttpInliner::new(http)),
        })
    }
}

/// Owns the generation state and sequences prompt generation, image
/// generation, rendering and tracing for both entry points.
pub struct Orchestrator {
    settings: SharedSettings,
    collaborators: Collaborators,
    events: PipelineEvents,
    state: PipelineState,
    tracer: OnceCell<Tracer>,
    trace_tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct ImageStage {
    result: Result<ImageResult, GenerationError>,
    record: StageRecord,
    elapsed_ms: u64,
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn exception(e: &GenerationError) -> String {
    format!("{}: {}", e.kind(), e)
}

impl Orchestrator {
    pub fn new(settings: SharedSettings, collaborators: Collaborators, events: PipelineEvents) -> Self {
        Self {
            settings,
            collaborators,
            events,
            state: PipelineState::new(),
            tracer: OnceCell::new(),
            trace_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_settings(
        settings: SharedSettings,
        events: PipelineEvents,
    ) -> Result<Self, ScenecraftError> {
        let collaborators = Collaborators::from_settings(&settings.snapshot())?;
        Ok(Self::new(settings, collaborators, events))
    }

    pub fn events(&self) -> &PipelineEvents {
        &self.events
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn is_generating(&self) -> bool {
        self.state.is_generating()
    }

    pub fn last_prompt(&self) -> String {
        self.state.last_prompt()
    }

    /// Waits for every background trace upload started so far.
    pub async fn drain_traces(&self) {
        let handles: Vec<JoinHandle<()>> = match self.trace_tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Trace task ended abnormally: {}", e);
            }
        }
    }

    /// New elements appeared on the page.
    pub async fn on_elements_changed(
        &self,
        request: GenerationRequest,
        destination: Destination,
    ) -> PipelineOutcome {
        if request.is_empty() {
            debug!("No elements to generate from");
            return PipelineOutcome::Empty;
        }
        let settings = self.settings.snapshot();
        let accepted_at = Instant::now();
        let _guard = match self.state.try_accept(accepted_at, settings.timing.debounce()) {
            Ok(guard) => guard,
            Err(rejection) => {
                debug!("Trigger rejected: {:?}", rejection);
                return match rejection {
                    Rejection::Debounced => PipelineOutcome::Debounced,
                    Rejection::Busy => PipelineOutcome::Busy,
                };
            }
        };
        self.events.status(StatusSignal::Busy);

        let span = info_span!(
            "generate_background",
            tab_id = destination.tab_id,
            elements = request.len()
        );
        self.generate(settings, request, destination, accepted_at)
            .instrument(span)
            .await
    }

    /// Re-renders the last prompt into the matching tab, e.g. after the image
    /// model changed.
    pub async fn on_regenerate_requested(&self, tabs: &[TabSnapshot]) -> PipelineOutcome {
        let prompt = self.load_last_prompt().await;
        if prompt.is_empty() {
            debug!("No previous prompt, nothing to regenerate");
            return PipelineOutcome::Empty;
        }
        let settings = self.settings.snapshot();
        let Some(destination) = resolve_destination(tabs, &settings.page.url_pattern) else {
            warn!(
                "No open tab matches {}, skipping regeneration",
                settings.page.url_pattern
            );
            return PipelineOutcome::NoDestination;
        };
        self.regenerate(settings, prompt, destination).await
    }

    async fn regenerate(
        &self,
        settings: Settings,
        prompt: String,
        destination: Destination,
    ) -> PipelineOutcome {
        let Some(_guard) = self.state.try_lock() else {
            debug!("Regeneration rejected: generation in flight");
            return PipelineOutcome::Busy;
        };
        let accepted_at = Instant::now();
        self.events.status(StatusSignal::Busy);

        let span = info_span!("regenerate_image", tab_id = destination.tab_id);
        async move {
            let model = match ImageModel::parse(&settings.image.model) {
                Ok(model) => model,
                Err(e) => return self.fail(e),
            };
            let image_key = settings.image_key(model.provider).resolve_or_empty();
            if !is_present(&image_key) {
                return self.missing_key(model.provider.name());
            }

            let tracer = self.tracer(&settings).await;
            let root = tracer.open(REGENERATE_SPAN, None);
            let root_start = self.start_root(
                &tracer,
                &root,
                json!({ "prompt": prompt, "imageModel": settings.image.model }),
            );

            let stage = self
                .run_image_stage(&settings, &model, &image_key, &prompt)
                .await;
            match stage.result {
                Ok(image) => {
                    let message = RenderMessage {
                        image_url: image.url.clone(),
                        prompt: prompt.clone(),
                        stats: RenderStats {
                            llm_ms: None,
                            image_gen_ms: stage.elapsed_ms,
                            total_ms: elapsed_ms(accepted_at),
                        },
                    };
                    self.events.render(destination, message.clone());
                    self.spawn_trace(TraceJob {
                        tracer,
                        root,
                        root_start,
                        stages: vec![stage.record],
                        outcome: RootOutcome::Rendered {
                            prompt,
                            image,
                            summary: None,
                        },
                    });
                    info!("Regenerated scene in {} ms", message.stats.total_ms);
                    self.events.status(StatusSignal::Idle);
                    PipelineOutcome::Rendered(message)
                }
                Err(e) => {
                    let message = exception(&e);
                    self.spawn_trace(TraceJob {
                        tracer,
                        root,
                        root_start,
                        stages: vec![stage.record],
                        outcome: RootOutcome::Failed(message),
                    });
                    self.fail(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn generate(
        &self,
        settings: Settings,
        request: GenerationRequest,
        destination: Destination,
        accepted_at: Instant,
    ) -> PipelineOutcome {
        let prompt_key = settings.prompt.api_key.resolve_or_empty();
        if !is_present(&prompt_key) {
            return self.missing_key("prompt");
        }
        let model = match ImageModel::parse(&settings.image.model) {
            Ok(model) => model,
            Err(e) => return self.fail(e),
        };
        let image_key = settings.image_key(model.provider).resolve_or_empty();
        if !is_present(&image_key) {
            return self.missing_key(model.provider.name());
        }

        let previous = self.load_last_prompt().await;
        let texts: Vec<&str> = request.texts().collect();

        let tracer = self.tracer(&settings).await;
        let root = tracer.open(ROOT_SPAN, None);
        let mut root_inputs = json!({ "elements": texts });
        if !previous.is_empty() {
            root_inputs["previousPrompt"] = json!(previous);
        }
        let root_start = self.start_root(&tracer, &root, root_inputs);
        let mut stages = Vec::with_capacity(2);

        // Stage 1: prompt
        let prompt_inputs = json!({
            "elements": texts,
            "previousPrompt": previous,
            "model": settings.prompt.model,
        });
        let llm_started_at = Utc::now();
        let llm_clock = Instant::now();
        let prompt_result = self
            .collaborators
            .prompts
            .generate(&request, &prompt_key, &settings.prompt.model, &previous)
            .instrument(info_span!(
                "prompt",
                model = %settings.prompt.model,
                continuing = !previous.is_empty()
            ))
            .await;
        let llm_ms = elapsed_ms(llm_clock);

        let PromptResult {
            prompt,
            model: prompt_model,
            usage,
        } = match prompt_result {
            Ok(result) => result,
            Err(e) => {
                let message = exception(&e);
                stages.push(StageRecord {
                    name: PROMPT_SPAN,
                    started_at: llm_started_at,
                    ended_at: Utc::now(),
                    inputs: prompt_inputs,
                    outcome: SpanOutcome::Exception(message.clone()),
                    summary: None,
                });
                self.spawn_trace(TraceJob {
                    tracer,
                    root,
                    root_start,
                    stages,
                    outcome: RootOutcome::Failed(message),
                });
                return self.fail(e);
            }
        };
        let summary = usage.as_ref().map(|u| usage_summary(&prompt_model, u));
        stages.push(StageRecord {
            name: PROMPT_SPAN,
            started_at: llm_started_at,
            ended_at: Utc::now(),
            inputs: prompt_inputs,
            outcome: SpanOutcome::Output(json!({ "prompt": prompt, "model": prompt_model })),
            summary: summary.clone(),
        });

        self.state.set_last_prompt(&prompt);
        if let Err(e) = self.collaborators.store.save(&prompt).await {
            warn!("Failed to persist last prompt: {}", e);
        }

        // Stage 2: image
        let stage = self
            .run_image_stage(&settings, &model, &image_key, &prompt)
            .await;
        stages.push(stage.record);
        match stage.result {
            Ok(image) => {
                let message = RenderMessage {
                    image_url: image.url.clone(),
                    prompt: prompt.clone(),
                    stats: RenderStats {
                        llm_ms: Some(llm_ms),
                        image_gen_ms: stage.elapsed_ms,
                        total_ms: elapsed_ms(accepted_at),
                    },
                };
                self.events.render(destination, message.clone());
                self.spawn_trace(TraceJob {
                    tracer,
                    root,
                    root_start,
                    stages,
                    outcome: RootOutcome::Rendered {
                        prompt,
                        image,
                        summary,
                    },
                });
                info!(
                    "Rendered scene in {} ms (prompt {} ms, image {} ms)",
                    message.stats.total_ms, llm_ms, message.stats.image_gen_ms
                );
                self.events.status(StatusSignal::Idle);
                PipelineOutcome::Rendered(message)
            }
            Err(e) => {
                let message = exception(&e);
                self.spawn_trace(TraceJob {
                    tracer,
                    root,
                    root_start,
                    stages,
                    outcome: RootOutcome::Failed(message),
                });
                self.fail(e)
            }
        }
    }

    async fn run_image_stage(
        &self,
        settings: &Settings,
        model: &ImageModel,
        api_key: &SecretString,
        prompt: &str,
    ) -> ImageStage {
        let inputs = json!({
            "prompt": prompt,
            "model": settings.image.model,
            "provider": model.provider.name(),
        });
        let started_at = Utc::now();
        let clock = Instant::now();
        let result = self
            .collaborators
            .images
            .for_kind(model.provider)
            .generate(prompt, api_key, &settings.image.model)
            .instrument(info_span!("image", provider = model.provider.name()))
            .await;
        let elapsed_ms = elapsed_ms(clock);

        let outcome = match &result {
            Ok(image) => SpanOutcome::Output(json!({
                "url": crate::sanitize::abbreviate_url(&image.url),
                "imageType": image.image_type,
            })),
            Err(e) => SpanOutcome::Exception(exception(e)),
        };
        ImageStage {
            result,
            record: StageRecord {
                name: IMAGE_SPAN,
                started_at,
                ended_at: Utc::now(),
                inputs,
                outcome,
                summary: None,
            },
            elapsed_ms,
        }
    }

    /// Memory first, then the durable store on a cold start.
    async fn load_last_prompt(&self) -> String {
        let cached = self.state.last_prompt();
        if !cached.is_empty() {
            return cached;
        }
        match self.collaborators.store.load().await {
            Ok(Some(prompt)) => {
                debug!("Restored last prompt from storage");
                self.state.set_last_prompt(&prompt);
                prompt
            }
            Ok(None) => String::new(),
            Err(e) => {
                warn!("Failed to load last prompt: {}", e);
                String::new()
            }
        }
    }

    /// The process tracer, connected on first use and never rebuilt.
    async fn tracer(&self, settings: &Settings) -> Tracer {
        self.tracer
            .get_or_init(|| async { self.collaborators.trace.connect(&settings.trace) })
            .await
            .clone()
    }

    fn start_root(
        &self,
        tracer: &Tracer,
        root: &SpanContext,
        inputs: Value,
    ) -> JoinHandle<Result<(), TraceError>> {
        let tracer = tracer.clone();
        let root = root.clone();
        tokio::spawn(async move { tracer.send_start(&root, &inputs).await })
    }

    fn spawn_trace(&self, job: TraceJob) {
        if !job.tracer.is_enabled() {
            return;
        }
        let handle = job.spawn(self.collaborators.inliner.clone());
        match self.trace_tasks.lock() {
            Ok(mut tasks) => {
                tasks.retain(|task| !task.is_finished());
                tasks.push(handle);
            }
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }

    fn missing_key(&self, provider: &str) -> PipelineOutcome {
        warn!("Missing API key for {}", provider);
        self.events.status(StatusSignal::MissingKey);
        PipelineOutcome::MissingKey
    }

    fn fail(&self, e: GenerationError) -> PipelineOutcome {
        error!("Generation failed: {}", e);
        self.events.status(StatusSignal::Error);
        PipelineOutcome::Failed(e.to_string())
    }
}
