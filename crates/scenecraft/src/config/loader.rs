use std::path::{Path, PathBuf};

use crate::config::schema::Settings;
use crate::error::ConfigError;
use crate::image::ImageModel;

/// Env var naming an explicit settings file.
pub const CONFIG_ENV_VAR: &str = "SCENECRAFT_CONFIG";

const CONFIG_FILE_NAME: &str = "scenecraft.json";

/// Picks the settings file: explicit path, then `SCENECRAFT_CONFIG`, then the
/// platform config dir.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|dir| dir.join("scenecraft").join(CONFIG_FILE_NAME))
}

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
        load_settings_from_yaml(&content)
    } else {
        load_settings_from_str(&content)
    }
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn load_settings_from_yaml(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_yaml::from_str(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    let timing = &settings.timing;
    if timing.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "timing.pollIntervalMs must be greater than zero".to_string(),
        });
    }
    if timing.replicate_max_polls == 0 || timing.fal_max_polls == 0 {
        return Err(ConfigError::Validation {
            message: "poll ceilings must be greater than zero".to_string(),
        });
    }

    ImageModel::parse(&settings.image.model).map_err(|e| ConfigError::Validation {
        message: e.to_string(),
    })?;

    if settings.prompt.model.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "prompt.model must not be empty".to_string(),
        });
    }

    if let Err(e) = glob::Pattern::new(&settings.page.url_pattern) {
        return Err(ConfigError::Validation {
            message: format!("Invalid page.urlPattern: {}", e),
        });
    }

    Ok(())
}
