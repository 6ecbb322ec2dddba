use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{Local, NaiveDateTime};
use serde_json::Value;
use uuid::Uuid;

use crate::assist::{AssistCacheKey, BriefingCache, BudgetAccountant, SuggestionCache, UsageSample};
use crate::authz::{AuthorizationGuard, Membership};
use crate::config::BriefingWindow;
use crate::error::{Error, ErrorDetails};
use crate::rate_limit::{
    FallbackRateLimiter, LimitClass, RateLimitDecision, RateLimitHeaders, Subject,
};
use crate::session::Principal;

/// Time source for window and budget decisions. Production uses the
/// system's local clock; tests pin a fixed instant and advance it by hand.
#[derive(Clone)]
pub enum Clock {
    System,
    Fixed(Arc<RwLock<NaiveDateTime>>),
}

impl Clock {
    pub fn fixed(now: NaiveDateTime) -> Self {
        Clock::Fixed(Arc::new(RwLock::new(now)))
    }

    pub fn now(&self) -> NaiveDateTime {
        match self {
            Clock::System => Local::now().naive_local(),
            Clock::Fixed(instant) => {
                #[expect(clippy::expect_used)]
                let instant = instant.read().expect("RwLock poisoned");
                *instant
            }
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Clock::Fixed(instant) = self {
            #[expect(clippy::expect_used)]
            let mut instant = instant.write().expect("RwLock poisoned");
            *instant = now;
        }
    }
}

/// A granted admission: the caller's membership (when a space was involved)
/// and the rate limit headers to attach to the response.
#[derive(Debug)]
pub struct Admission {
    pub membership: Option<Membership>,
    pub headers: RateLimitHeaders,
}

/// Result of an assistant operation that went through the controller.
#[derive(Debug)]
pub struct AssistOutcome {
    pub payload: Arc<Value>,
    pub cached: bool,
    /// Absent on cache hits; no limit was consumed.
    pub headers: Option<RateLimitHeaders>,
}

/// What a briefing computation hands back: the payload and what it cost.
pub struct BriefingOutput {
    pub payload: Value,
    pub tokens_spent: u64,
}

#[derive(Debug, Default)]
pub struct AdmissionMetrics {
    pub suggestion_cache_hits: AtomicU64,
    pub briefing_cache_hits: AtomicU64,
    pub briefings_served: AtomicU64,
}

/// Composes the admission checks every protected operation goes through.
///
/// Plain operations run the canonical order: rate limit, then membership,
/// then tier gates. Assistant reads invert the front of the pipeline:
/// membership is verified first so a revoked member can never read a warm
/// cache entry, then the cache is consulted before the rate limiter, so a
/// cache hit consumes neither a rate limit unit nor budget.
pub struct AdmissionController {
    limiter: Arc<FallbackRateLimiter>,
    guard: AuthorizationGuard,
    accountant: BudgetAccountant,
    suggestions: SuggestionCache,
    briefings: BriefingCache,
    briefing_window: BriefingWindow,
    metrics: Arc<AdmissionMetrics>,
}

impl AdmissionController {
    pub fn new(
        limiter: Arc<FallbackRateLimiter>,
        guard: AuthorizationGuard,
        accountant: BudgetAccountant,
        suggestions: SuggestionCache,
        briefings: BriefingCache,
        briefing_window: BriefingWindow,
    ) -> Self {
        Self {
            limiter,
            guard,
            accountant,
            suggestions,
            briefings,
            briefing_window,
            metrics: Arc::new(AdmissionMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<AdmissionMetrics> {
        self.metrics.clone()
    }

    async fn check_rate(
        &self,
        class: LimitClass,
        principal: &Principal,
    ) -> Result<RateLimitHeaders, Error> {
        match self
            .limiter
            .allow(class, Subject::User(principal.user_id))
            .await?
        {
            RateLimitDecision::Allow(headers) => Ok(headers),
            RateLimitDecision::Deny(headers) => {
                Err(Error::new(ErrorDetails::RateLimitExceeded { class, headers }))
            }
        }
    }

    /// Admission for an operation with no space involved.
    pub async fn admit(&self, class: LimitClass, principal: &Principal) -> Result<Admission, Error> {
        let headers = self.check_rate(class, principal).await?;
        Ok(Admission {
            membership: None,
            headers,
        })
    }

    /// Admission for an operation on a space: rate limit, then membership.
    pub async fn admit_space_op(
        &self,
        class: LimitClass,
        principal: &Principal,
        space_id: Uuid,
    ) -> Result<Admission, Error> {
        let headers = self.check_rate(class, principal).await?;
        let membership = self
            .guard
            .verify_space_access(principal.user_id, space_id)
            .await?;
        Ok(Admission {
            membership: Some(membership),
            headers,
        })
    }

    /// Serves assistant suggestions: membership, cache, rate limit, feature
    /// gate, compute, cache store. The budget is not checked; suggestion
    /// cost is negligible and a denial here would be all friction.
    pub async fn suggestions<F, Fut>(
        &self,
        principal: &Principal,
        space_id: Uuid,
        compute: F,
    ) -> Result<AssistOutcome, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, Error>>,
    {
        self.guard
            .verify_space_access(principal.user_id, space_id)
            .await?;

        let key = AssistCacheKey {
            user_id: principal.user_id,
            space_id,
        };
        if let Some(payload) = self.suggestions.get(&key).await {
            self.metrics
                .suggestion_cache_hits
                .fetch_add(1, Ordering::Relaxed);
            return Ok(AssistOutcome {
                payload,
                cached: true,
                headers: None,
            });
        }

        let headers = self.check_rate(LimitClass::Assistant, principal).await?;
        self.accountant
            .validate_ai_access(principal, Some(space_id), false, Local::now().naive_local())
            .await?;

        let payload = Arc::new(compute().await?);
        self.suggestions.insert(key, Arc::clone(&payload)).await;
        Ok(AssistOutcome {
            payload,
            cached: false,
            headers: Some(headers),
        })
    }

    /// Serves the morning briefing: membership, time window, space setting,
    /// cache, rate limit, budget, compute, usage commit, cache store.
    pub async fn morning_briefing<F, Fut>(
        &self,
        principal: &Principal,
        space_id: Uuid,
        briefing_enabled: bool,
        now: NaiveDateTime,
        compute: F,
    ) -> Result<AssistOutcome, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<BriefingOutput, Error>>,
    {
        self.guard
            .verify_space_access(principal.user_id, space_id)
            .await?;

        if !self.briefing_window.contains(now.time()) {
            return Err(Error::new(ErrorDetails::BriefingUnavailable));
        }
        if !briefing_enabled {
            return Err(Error::new(ErrorDetails::BriefingDisabled));
        }

        let key = AssistCacheKey {
            user_id: principal.user_id,
            space_id,
        };
        let today = now.date();
        if let Some(payload) = self.briefings.get_for_date(&key, today).await {
            self.metrics
                .briefing_cache_hits
                .fetch_add(1, Ordering::Relaxed);
            return Ok(AssistOutcome {
                payload,
                cached: true,
                headers: None,
            });
        }

        let headers = self.check_rate(LimitClass::Assistant, principal).await?;
        self.accountant
            .validate_ai_access(principal, Some(space_id), true, now)
            .await?;

        let output = compute().await?;
        self.accountant.record_usage(UsageSample {
            user_id: principal.user_id,
            space_id: Some(space_id),
            tokens: output.tokens_spent,
            recorded_on: today,
        });
        self.metrics.briefings_served.fetch_add(1, Ordering::Relaxed);

        let payload = Arc::new(output.payload);
        self.briefings
            .insert(key, today, Arc::clone(&payload))
            .await;
        Ok(AssistOutcome {
            payload,
            cached: false,
            headers: Some(headers),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assist::MemoryUsageStore;
    use crate::authz::MemorySpaceStore;
    use crate::config::AssistantConfig;
    use crate::rate_limit::{LimitClassStore, RateLimitSettings};
    use crate::tier::Tier;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::time::Duration;

    fn controller(spaces: Arc<MemorySpaceStore>) -> AdmissionController {
        let limiter = Arc::new(FallbackRateLimiter::new(
            LimitClassStore::new(RateLimitSettings::default()),
            None,
        ));
        let assistant = AssistantConfig::default();
        AdmissionController::new(
            limiter,
            AuthorizationGuard::new(spaces),
            BudgetAccountant::new(Arc::new(MemoryUsageStore::new())),
            SuggestionCache::new(assistant.cache_capacity, Duration::from_secs(600)),
            BriefingCache::new(assistant.cache_capacity, Duration::from_secs(21_600)),
            assistant.briefing_window,
        )
    }

    fn principal(tier: Tier) -> Principal {
        Principal {
            user_id: Uuid::now_v7(),
            email: "ada@example.com".to_string(),
            tier,
        }
    }

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 30)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_suggestions_cache_hit_skips_rate_limit() {
        let spaces = Arc::new(MemorySpaceStore::new());
        let p = principal(Tier::Free);
        let space = spaces.create_space("Maple House", p.user_id);
        let controller = controller(spaces);

        let first = controller
            .suggestions(&p, space.id, || async { Ok(json!({"n": 1})) })
            .await
            .unwrap();
        assert!(!first.cached);
        assert!(first.headers.is_some());

        let second = controller
            .suggestions(&p, space.id, || async {
                panic!("compute must not run on a cache hit")
            })
            .await
            .unwrap();
        assert!(second.cached);
        assert!(second.headers.is_none());
        assert_eq!(second.payload, first.payload);
    }

    #[tokio::test]
    async fn test_membership_checked_before_cache() {
        let spaces = Arc::new(MemorySpaceStore::new());
        let p = principal(Tier::Free);
        let space = spaces.create_space("Maple House", p.user_id);
        let controller = controller(spaces.clone());

        controller
            .suggestions(&p, space.id, || async { Ok(json!({"n": 1})) })
            .await
            .unwrap();

        // Membership gone; the warm cache entry must not leak.
        spaces.remove_member(space.id, p.user_id);
        let err = controller
            .suggestions(&p, space.id, || async { Ok(json!({"n": 2})) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ACCESS_DENIED");
    }

    #[tokio::test]
    async fn test_briefing_outside_window_unavailable() {
        let spaces = Arc::new(MemorySpaceStore::new());
        let p = principal(Tier::Free);
        let space = spaces.create_space("Maple House", p.user_id);
        let controller = controller(spaces);

        let err = controller
            .morning_briefing(&p, space.id, true, at(14), || async {
                Ok(BriefingOutput {
                    payload: json!({}),
                    tokens_spent: 0,
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BRIEFING_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_briefing_disabled_inside_window() {
        let spaces = Arc::new(MemorySpaceStore::new());
        let p = principal(Tier::Free);
        let space = spaces.create_space("Maple House", p.user_id);
        let controller = controller(spaces);

        let err = controller
            .morning_briefing(&p, space.id, false, at(8), || async {
                Ok(BriefingOutput {
                    payload: json!({}),
                    tokens_spent: 0,
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BRIEFING_DISABLED");
    }

    #[tokio::test]
    async fn test_briefing_cached_for_the_day() {
        let spaces = Arc::new(MemorySpaceStore::new());
        let p = principal(Tier::Free);
        let space = spaces.create_space("Maple House", p.user_id);
        let controller = controller(spaces);

        let first = controller
            .morning_briefing(&p, space.id, true, at(7), || async {
                Ok(BriefingOutput {
                    payload: json!({"briefing": "good morning"}),
                    tokens_spent: 800,
                })
            })
            .await
            .unwrap();
        assert!(!first.cached);

        let second = controller
            .morning_briefing(&p, space.id, true, at(9), || async {
                panic!("compute must not run on a cache hit")
            })
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(
            controller.metrics().briefing_cache_hits.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_fixed_clock_advances() {
        let clock = Clock::fixed(at(8));
        assert_eq!(clock.now(), at(8));
        clock.set(at(14));
        assert_eq!(clock.now(), at(14));
    }
}
