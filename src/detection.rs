use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

use crate::mealie::ApiError;

/// What the server said about a page the last time we asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionOutcome {
    Recipe,
    NotRecipe,
    Timeout,
    HttpError,
}

impl DetectionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionOutcome::Recipe => "recipe",
            DetectionOutcome::NotRecipe => "not-recipe",
            DetectionOutcome::Timeout => "timeout",
            DetectionOutcome::HttpError => "http-error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionCacheEntry {
    pub outcome: DetectionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub checked_at: DateTime<Utc>,
}

impl DetectionCacheEntry {
    pub fn new(outcome: DetectionOutcome) -> Self {
        Self {
            outcome,
            status: None,
            checked_at: Utc::now(),
        }
    }

    pub fn http_error(status: Option<u16>) -> Self {
        Self {
            outcome: DetectionOutcome::HttpError,
            status,
            checked_at: Utc::now(),
        }
    }

    /// Folds a probe result into a cacheable entry. Transport failures with
    /// no HTTP status land as `HttpError` without one.
    pub fn from_probe(result: &Result<bool, ApiError>) -> Self {
        match result {
            Ok(true) => Self::new(DetectionOutcome::Recipe),
            Ok(false) => Self::new(DetectionOutcome::NotRecipe),
            Err(ApiError::Timeout) => Self::new(DetectionOutcome::Timeout),
            Err(ApiError::Http { status, .. }) => Self::http_error(Some(*status)),
            Err(_) => Self::http_error(None),
        }
    }
}

/// Drops query and fragment and trims the trailing path slash so visits to
/// cosmetic variants of one page share a cache slot.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized.set_query(None);

    let mut path = normalized.path().to_owned();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    normalized.set_path(&path);
    normalized.to_string()
}

/// In-memory map of recent probe outcomes keyed by normalized page URL.
/// Entries live until invalidated or the process restarts.
pub struct DetectionCache {
    entries: Mutex<HashMap<String, DetectionCacheEntry>>,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set(&self, url: &Url, entry: DetectionCacheEntry) {
        self.entries.lock().await.insert(normalize_url(url), entry);
    }

    pub async fn get(&self, url: &Url) -> Option<DetectionCacheEntry> {
        self.entries.lock().await.get(&normalize_url(url)).cloned()
    }

    pub async fn invalidate(&self, url: &Url) {
        self.entries.lock().await.remove(&normalize_url(url));
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

impl Default for DetectionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_query_fragment_and_trailing_slash() {
        let url = Url::parse("https://example.com/recipes/pancakes/?utm=x#steps").unwrap();
        assert_eq!(normalize_url(&url), "https://example.com/recipes/pancakes");

        let root = Url::parse("https://example.com/").unwrap();
        assert_eq!(normalize_url(&root), "https://example.com/");
    }

    #[tokio::test]
    async fn variants_of_one_page_share_a_slot() {
        let cache = DetectionCache::new();
        let canonical = Url::parse("https://example.com/recipes/pie").unwrap();
        let variant = Url::parse("https://example.com/recipes/pie/?ref=feed#top").unwrap();

        cache
            .set(&canonical, DetectionCacheEntry::new(DetectionOutcome::Recipe))
            .await;

        let hit = cache.get(&variant).await.unwrap();
        assert_eq!(hit.outcome, DetectionOutcome::Recipe);

        cache.invalidate(&variant).await;
        assert!(cache.get(&canonical).await.is_none());
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let cache = DetectionCache::new();
        let url = Url::parse("https://example.com/a").unwrap();
        cache
            .set(&url, DetectionCacheEntry::new(DetectionOutcome::NotRecipe))
            .await;
        cache.clear().await;
        assert!(cache.get(&url).await.is_none());
    }

    #[test]
    fn probe_results_map_to_outcomes() {
        let recipe = DetectionCacheEntry::from_probe(&Ok(true));
        assert_eq!(recipe.outcome, DetectionOutcome::Recipe);
        assert_eq!(recipe.status, None);

        let miss = DetectionCacheEntry::from_probe(&Ok(false));
        assert_eq!(miss.outcome, DetectionOutcome::NotRecipe);

        let timeout = DetectionCacheEntry::from_probe(&Err(ApiError::Timeout));
        assert_eq!(timeout.outcome, DetectionOutcome::Timeout);

        let http = DetectionCacheEntry::from_probe(&Err(ApiError::Http {
            status: 500,
            message: Some("boom".to_string()),
        }));
        assert_eq!(http.outcome, DetectionOutcome::HttpError);
        assert_eq!(http.status, Some(500));

        let transport =
            DetectionCacheEntry::from_probe(&Err(ApiError::Transport("dns".to_string())));
        assert_eq!(transport.outcome, DetectionOutcome::HttpError);
        assert_eq!(transport.status, None);
    }
}
