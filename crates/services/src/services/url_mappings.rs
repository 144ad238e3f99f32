use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utils_core::text::random_base36;

const SHORT_ID_LEN: usize = 6;

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// A short id pointing at an original (usually storage) URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlMapping {
    pub short_id: String,
    pub original_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// In-memory short id table. Clones share the same map; nothing is persisted
/// and entries only go away through `remove` or `cleanup_expired`.
#[derive(Clone, Default)]
pub struct UrlMappingStore {
    mappings: Arc<DashMap<String, UrlMapping>>,
}

impl UrlMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn add(&self, original_url: impl Into<String>, metadata: Option<Value>) -> UrlMapping {
        let original_url = original_url.into();
        loop {
            let short_id = random_base36(SHORT_ID_LEN);
            // Entry API so a colliding id is never overwritten.
            if let Entry::Vacant(slot) = self.mappings.entry(short_id.clone()) {
                let mapping = UrlMapping {
                    short_id,
                    original_url,
                    created_at: Utc::now(),
                    metadata,
                };
                slot.insert(mapping.clone());
                tracing::debug!(short_id = %mapping.short_id, "Added URL mapping");
                return mapping;
            }
        }
    }

    pub fn get(&self, short_id: &str) -> Option<UrlMapping> {
        self.mappings.get(short_id).map(|entry| entry.clone())
    }

    pub fn original_url(&self, short_id: &str) -> Option<String> {
        self.mappings
            .get(short_id)
            .map(|entry| entry.original_url.clone())
    }

    /// All mappings, oldest first.
    pub fn all(&self) -> Vec<UrlMapping> {
        let mut mappings: Vec<UrlMapping> = self
            .mappings
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        mappings.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        mappings
    }

    pub fn contains_url(&self, original_url: &str) -> bool {
        self.mappings
            .iter()
            .any(|entry| entry.original_url == original_url)
    }

    /// Replace the metadata of an existing mapping.
    pub fn update_metadata(&self, short_id: &str, metadata: Option<Value>) -> Option<UrlMapping> {
        let mut entry = self.mappings.get_mut(short_id)?;
        entry.metadata = metadata;
        Some(entry.clone())
    }

    pub fn remove(&self, short_id: &str) -> Option<UrlMapping> {
        self.mappings.remove(short_id).map(|(_, mapping)| mapping)
    }

    /// Drop mappings older than `max_age`, returning how many were removed.
    pub fn cleanup_expired(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let before = self.mappings.len();
        self.mappings.retain(|_, mapping| mapping.created_at >= cutoff);
        let removed = before.saturating_sub(self.mappings.len());
        if removed > 0 {
            tracing::info!(removed, "Removed expired URL mappings");
        }
        removed
    }

    #[cfg(test)]
    fn backdate(&self, short_id: &str, age: chrono::Duration) {
        if let Some(mut entry) = self.mappings.get_mut(short_id) {
            entry.created_at = Utc::now() - age;
        }
    }
}
