//! Durable storage for the last generated scene prompt.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;

pub const LAST_PROMPT_FILE: &str = "last_prompt.json";

#[async_trait]
pub trait PromptStore: Send + Sync {
    /// The stored prompt, or `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<String>, StorageError>;
    async fn save(&self, prompt: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPrompt {
    prompt: String,
    updated_at: DateTime<Utc>,
}

/// Keeps the prompt in `<state_dir>/last_prompt.json`.
pub struct FilePromptStore {
    state_dir: PathBuf,
}

impl FilePromptStore {
    pub fn new<P: AsRef<Path>>(state_dir: P) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.state_dir.join(LAST_PROMPT_FILE)
    }
}

#[async_trait]
impl PromptStore for FilePromptStore {
    async fn load(&self) -> Result<Option<String>, StorageError> {
        let path = self.path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::ReadFile { path, source: e }),
        };
        let stored: StoredPrompt = serde_json::from_str(&content)
            .map_err(|e| StorageError::Corrupt { path, source: e })?;
        Ok(Some(stored.prompt).filter(|p| !p.trim().is_empty()))
    }

    /// Writes a temp file next to the target, then renames it over the
    /// target so readers never see a partial file.
    async fn save(&self, prompt: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: self.state_dir.clone(),
                source: e,
            })?;

        let path = self.path();
        let tmp_path = self
            .state_dir
            .join(format!("{}.{}.tmp", LAST_PROMPT_FILE, std::process::id()));
        let stored = StoredPrompt {
            prompt: prompt.to_string(),
            updated_at: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&stored).map_err(|e| StorageError::Corrupt {
            path: path.clone(),
            source: e,
        })?;

        tokio::fs::write(&tmp_path, &content)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: tmp_path.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        debug!("Saved last prompt to {}", path.display());
        Ok(())
    }
}

/// In-process store for tests and runs without a state directory.
#[derive(Default)]
pub struct MemoryPromptStore {
    prompt: Mutex<Option<String>>,
}

impl MemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Mutex::new(Some(prompt.into())),
        }
    }

    pub fn current(&self) -> Option<String> {
        match self.prompt.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl PromptStore for MemoryPromptStore {
    async fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.current())
    }

    async fn save(&self, prompt: &str) -> Result<(), StorageError> {
        match self.prompt.lock() {
            Ok(mut guard) => *guard = Some(prompt.to_string()),
            Err(poisoned) => *poisoned.into_inner() = Some(prompt.to_string()),
        }
        Ok(())
    }
}
