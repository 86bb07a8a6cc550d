//! Game elements reported by the page and the request built from them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A crafted element as seen on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameElement {
    pub id: String,
    pub text: String,
    /// Elements the user is currently dragging are not yet part of the scene.
    #[serde(default, skip_serializing)]
    pub dragging: bool,
}

impl GameElement {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            dragging: false,
        }
    }
}

/// Ordered element list handed to one pipeline invocation.
///
/// Deduplicated by `text` (first occurrence wins), page order preserved,
/// dragged or blank elements dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GenerationRequest {
    elements: Vec<GameElement>,
}

impl GenerationRequest {
    pub fn new(elements: impl IntoIterator<Item = GameElement>) -> Self {
        let mut seen = HashSet::new();
        let elements = elements
            .into_iter()
            .filter(|e| !e.dragging)
            .filter_map(|mut e| {
                let trimmed = e.text.trim();
                if trimmed.is_empty() || !seen.insert(trimmed.to_string()) {
                    return None;
                }
                e.text = trimmed.to_string();
                Some(e)
            })
            .collect();
        Self { elements }
    }

    pub fn elements(&self) -> &[GameElement] {
        &self.elements
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(|e| e.text.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }
}

impl From<Vec<GameElement>> for GenerationRequest {
    fn from(elements: Vec<GameElement>) -> Self {
        Self::new(elements)
    }
}
