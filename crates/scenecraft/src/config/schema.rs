use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::image::ProviderKind;
use crate::secrets::SecretSource;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub prompt: PromptSettings,
    #[serde(default)]
    pub image: ImageSettings,
    #[serde(default)]
    pub trace: TraceSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub page: PageSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Credential source for the given image provider.
    pub fn image_key(&self, provider: ProviderKind) -> &SecretSource {
        match provider {
            ProviderKind::Replicate => &self.image.replicate,
            ProviderKind::Fal => &self.image.fal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSettings {
    #[serde(flatten)]
    pub api_key: SecretSource,
    #[serde(default = "default_prompt_model")]
    pub model: String,
    #[serde(default = "default_prompt_base_url")]
    pub base_url: String,
}

fn default_prompt_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_prompt_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            api_key: SecretSource::default(),
            model: default_prompt_model(),
            base_url: default_prompt_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSettings {
    /// Selected image model; the `replicate:` / `fal:` tag picks the provider.
    #[serde(default = "default_image_model")]
    pub model: String,
    #[serde(default)]
    pub replicate: SecretSource,
    #[serde(default)]
    pub fal: SecretSource,
}

fn default_image_model() -> String {
    "replicate:black-forest-labs/flux-schnell".to_string()
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            model: default_image_model(),
            replicate: SecretSource::default(),
            fal: SecretSource::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSettings {
    #[serde(flatten)]
    pub api_key: SecretSource,
    /// Team (entity) that owns the trace project.
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default = "default_trace_project")]
    pub project: String,
    #[serde(default = "default_trace_base_url")]
    pub base_url: String,
}

fn default_trace_project() -> String {
    "scenecraft".to_string()
}

fn default_trace_base_url() -> String {
    "https://trace.wandb.ai".to_string()
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            api_key: SecretSource::default(),
            entity: None,
            project: default_trace_project(),
            base_url: default_trace_base_url(),
        }
    }
}

impl TraceSettings {
    /// `<entity>/<project>`, or just the project when no team is set.
    pub fn project_id(&self) -> String {
        match self.entity.as_deref().map(str::trim) {
            Some(entity) if !entity.is_empty() => format!("{}/{}", entity, self.project),
            _ => self.project.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_replicate_max_polls")]
    pub replicate_max_polls: u32,
    #[serde(default = "default_fal_max_polls")]
    pub fal_max_polls: u32,
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_replicate_max_polls() -> u32 {
    20
}

fn default_fal_max_polls() -> u32 {
    40
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            replicate_max_polls: default_replicate_max_polls(),
            fal_max_polls: default_fal_max_polls(),
        }
    }
}

impl TimingSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_polls(&self, provider: ProviderKind) -> u32 {
        match provider {
            ProviderKind::Replicate => self.replicate_max_polls,
            ProviderKind::Fal => self.fal_max_polls,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    /// Directory for durable state; defaults to the platform data dir.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl StorageSettings {
    pub fn resolve_state_dir(&self) -> Option<PathBuf> {
        self.state_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("scenecraft")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSettings {
    /// Glob matched against tab URLs when a regeneration needs a target tab.
    #[serde(default = "default_url_pattern")]
    pub url_pattern: String,
}

fn default_url_pattern() -> String {
    "https://neal.fun/infinite-craft*".to_string()
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            url_pattern: default_url_pattern(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    #[serde(default)]
    pub format: LogFormat,
}
