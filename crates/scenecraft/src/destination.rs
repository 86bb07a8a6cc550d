//! Where a rendered image is sent.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Browser tab that receives a render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub tab_id: i64,
    pub url: String,
}

impl Destination {
    pub fn new(tab_id: i64, url: impl Into<String>) -> Self {
        Self {
            tab_id,
            url: url.into(),
        }
    }
}

/// One open tab as reported by the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub active: bool,
}

/// Picks the tab a regeneration renders into: the active tab matching
/// `url_pattern`, else the first matching tab.
pub fn resolve_destination(tabs: &[TabSnapshot], url_pattern: &str) -> Option<Destination> {
    let pattern = match Pattern::new(url_pattern) {
        Ok(pattern) => pattern,
        Err(e) => {
            warn!("Invalid page pattern '{}': {}", url_pattern, e);
            return None;
        }
    };
    let matching = || tabs.iter().filter(|tab| pattern.matches(&tab.url));
    matching()
        .find(|tab| tab.active)
        .or_else(|| matching().next())
        .map(|tab| Destination::new(tab.id, tab.url.clone()))
}
