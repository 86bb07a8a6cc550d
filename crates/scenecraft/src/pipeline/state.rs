//! Process-wide generation state: the busy flag, the debounce clock and the
//! cached last prompt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Why a trigger was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Debounced,
    Busy,
}

#[derive(Default)]
pub struct PipelineState {
    generating: AtomicBool,
    last_update: Mutex<Option<Instant>>,
    last_prompt: Mutex<String>,
}

/// Holds the busy flag; dropping it clears the flag on every exit path.
#[must_use]
pub struct GenerationGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    /// Debounce check, then busy check. On acceptance the busy flag is set
    /// and the debounce clock restarts at `now`. Both checks and both
    /// updates happen under one lock.
    pub fn try_accept(
        &self,
        now: Instant,
        debounce: Duration,
    ) -> Result<GenerationGuard<'_>, Rejection> {
        let mut last_update = match self.last_update.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(last) = *last_update {
            if now.saturating_duration_since(last) < debounce {
                return Err(Rejection::Debounced);
            }
        }
        let guard = self.try_lock().ok_or(Rejection::Busy)?;
        *last_update = Some(now);
        Ok(guard)
    }

    /// Busy check only; the debounce clock is neither read nor updated.
    pub fn try_lock(&self) -> Option<GenerationGuard<'_>> {
        self.generating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GenerationGuard {
                flag: &self.generating,
            })
    }

    pub fn last_prompt(&self) -> String {
        match self.last_prompt.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_last_prompt(&self, prompt: &str) {
        match self.last_prompt.lock() {
            Ok(mut guard) => *guard = prompt.to_string(),
            Err(poisoned) => *poisoned.into_inner() = prompt.to_string(),
        }
    }
}
