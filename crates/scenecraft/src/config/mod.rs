pub mod loader;
pub mod schema;

use std::sync::{Arc, RwLock};

pub use loader::{
    load_settings, load_settings_from_str, load_settings_from_yaml, resolve_config_path,
    validate_settings, CONFIG_ENV_VAR,
};
pub use schema::{
    ImageSettings, LogFormat, LoggingSettings, PageSettings, PromptSettings, Settings,
    StorageSettings, TimingSettings, TraceSettings,
};

/// Settings snapshot shared between the host and the orchestrator.
///
/// Readers take a clone per invocation, so an update never changes the
/// settings of a generation that is already running.
#[derive(Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> Settings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, settings: Settings) {
        match self.inner.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_visible_to_later_snapshots() {
        let shared = SharedSettings::new(Settings::default());
        let before = shared.snapshot();

        let mut updated = Settings::default();
        updated.image.model = "fal:flux-pro".to_string();
        shared.replace(updated);

        assert_eq!(before.image.model, "replicate:black-forest-labs/flux-schnell");
        assert_eq!(shared.snapshot().image.model, "fal:flux-pro");
    }
}
