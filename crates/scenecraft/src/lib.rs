pub mod config;
pub mod destination;
pub mod elements;
pub mod error;
pub mod events;
pub mod http;
pub mod image;
pub mod logging;
pub mod pipeline;
pub mod prompt;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod trace;

pub use config::{load_settings, resolve_config_path, Settings, SharedSettings};
pub use destination::{resolve_destination, Destination, TabSnapshot};
pub use elements::{GameElement, GenerationRequest};
pub use error::{
    ConfigError, GenerationError, Result, ScenecraftError, StorageError, TraceError,
};
pub use events::{PipelineEvent, PipelineEvents, RenderMessage, RenderStats, StatusSignal};
pub use image::{ImageGenerator, ImageModel, ImageProviders, ImageResult, ImageType, ProviderKind};
pub use pipeline::{Collaborators, Orchestrator, PipelineOutcome};
pub use prompt::{PromptGenerator, PromptResult, TokenUsage};
pub use secrets::{resolve_secret, SecretError, SecretSource};
pub use storage::{FilePromptStore, MemoryPromptStore, PromptStore};
pub use trace::{TraceConnector, TraceTransport, Tracer};
