use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use moka::future::Cache;
use serde_json::Value;
use uuid::Uuid;

/// Cache key for assistant responses. Suggestions and briefings are
/// personal to a member within a space, so both ids participate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssistCacheKey {
    pub user_id: Uuid,
    pub space_id: Uuid,
}

/// Short-lived cache for assistant suggestions.
///
/// A hit is returned before any rate limit or budget check runs; cached
/// responses cost nothing, so they consume nothing.
#[derive(Clone)]
pub struct SuggestionCache {
    cache: Cache<AssistCacheKey, Arc<Value>>,
}

impl SuggestionCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &AssistCacheKey) -> Option<Arc<Value>> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: AssistCacheKey, payload: Arc<Value>) {
        self.cache.insert(key, payload).await;
    }

    pub async fn invalidate(&self, key: &AssistCacheKey) {
        self.cache.invalidate(key).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

/// A cached briefing tagged with the local date it was computed for.
#[derive(Clone)]
pub struct BriefingEntry {
    pub computed_on: NaiveDate,
    pub payload: Arc<Value>,
}

/// Cache for morning briefings.
///
/// The TTL outlives the briefing window, so entries are additionally tagged
/// with their local date; yesterday's briefing is never served today even
/// if the entry is still resident.
#[derive(Clone)]
pub struct BriefingCache {
    cache: Cache<AssistCacheKey, BriefingEntry>,
}

impl BriefingCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get_for_date(&self, key: &AssistCacheKey, date: NaiveDate) -> Option<Arc<Value>> {
        match self.cache.get(key).await {
            Some(entry) if entry.computed_on == date => Some(entry.payload),
            _ => None,
        }
    }

    pub async fn insert(&self, key: AssistCacheKey, date: NaiveDate, payload: Arc<Value>) {
        self.cache
            .insert(
                key,
                BriefingEntry {
                    computed_on: date,
                    payload,
                },
            )
            .await;
    }
}
