pub mod config;
pub mod limiter;
pub mod middleware;
pub mod store;

pub use config::{FailPolicy, LimitClass, LimitClassConfig, LimitClassStore, RateLimitSettings};
pub use limiter::FallbackRateLimiter;
pub use middleware::{rate_limit_middleware, ClassLimiter};
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore, WindowCount};

use axum::http::{HeaderMap, HeaderValue};
use std::net::IpAddr;
use uuid::Uuid;

/// The party a limit class is counted against: the client address before a
/// session exists, the user id once one does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Ip(IpAddr),
    User(Uuid),
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Ip(addr) => write!(f, "ip:{addr}"),
            Subject::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Composite counter key. Ephemeral; lives only as long as its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub class: LimitClass,
    pub subject: Subject,
}

impl RateLimitKey {
    pub fn storage_key(&self) -> String {
        format!("rl:{}:{}", self.class, self.subject)
    }
}

/// Headers returned with rate limit information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    pub reset: u64,               // Unix timestamp
    pub retry_after: Option<u32>, // Seconds
}

impl RateLimitHeaders {
    /// Metadata for a class with no limit configured.
    pub fn unlimited() -> Self {
        Self {
            limit: 0,
            remaining: 0,
            reset: 0,
            retry_after: None,
        }
    }

    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        // Number-to-string conversions always produce valid header values.
        if let Ok(value) = HeaderValue::from_str(&self.limit.to_string()) {
            headers.insert("X-RateLimit-Limit", value);
        }

        if let Ok(value) = HeaderValue::from_str(&self.remaining.to_string()) {
            headers.insert("X-RateLimit-Remaining", value);
        }

        if let Ok(value) = HeaderValue::from_str(&self.reset.to_string()) {
            headers.insert("X-RateLimit-Reset", value);
        }

        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                headers.insert("Retry-After", value);
            }
        }

        headers
    }
}

/// Result of a rate limit check.
#[derive(Debug)]
pub enum RateLimitDecision {
    Allow(RateLimitHeaders),
    Deny(RateLimitHeaders),
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allow(_))
    }

    pub fn headers(&self) -> &RateLimitHeaders {
        match self {
            RateLimitDecision::Allow(h) | RateLimitDecision::Deny(h) => h,
        }
    }

    pub fn into_headers(self) -> RateLimitHeaders {
        match self {
            RateLimitDecision::Allow(h) | RateLimitDecision::Deny(h) => h,
        }
    }
}

/// Counters for limiter behavior, exported for operational visibility.
#[derive(Debug, Default)]
pub struct RateLimiterMetrics {
    pub primary_checks: std::sync::atomic::AtomicU64,
    pub fallback_checks: std::sync::atomic::AtomicU64,
    pub backend_errors: std::sync::atomic::AtomicU64,
    pub denials: std::sync::atomic::AtomicU64,
}

impl RateLimiterMetrics {
    pub fn record_primary_check(&self) {
        self.primary_checks
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn record_fallback_check(&self) {
        self.fallback_checks
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn record_backend_error(&self) {
        self.backend_errors
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn record_denial(&self) {
        self.denials
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}
