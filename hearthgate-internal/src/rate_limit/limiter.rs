use std::sync::Arc;

use crate::error::Error;
use crate::rate_limit::config::{FailPolicy, LimitClass, LimitClassConfig, LimitClassStore};
use crate::rate_limit::store::{unix_timestamp, CounterStore, MemoryCounterStore, WindowCount};
use crate::rate_limit::{
    RateLimitDecision, RateLimitHeaders, RateLimitKey, RateLimiterMetrics, Subject,
};

/// Rate limiter with a shared primary store and a process-local fallback.
///
/// Every admission decision goes through the primary when one is configured.
/// When the primary errors, the class's fail policy decides what happens
/// next: `Open` degrades to the local fallback counters (requests keep
/// flowing, limits enforced per-instance), `Closed` propagates the error and
/// the request is rejected. Recovery is automatic; there is no circuit state
/// to reset, the next request simply tries the primary again.
pub struct FallbackRateLimiter {
    classes: LimitClassStore,
    primary: Option<Arc<dyn CounterStore>>,
    fallback: MemoryCounterStore,
    metrics: Arc<RateLimiterMetrics>,
}

impl FallbackRateLimiter {
    pub fn new(classes: LimitClassStore, primary: Option<Arc<dyn CounterStore>>) -> Self {
        Self {
            classes,
            primary,
            fallback: MemoryCounterStore::new(),
            metrics: Arc::new(RateLimiterMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<RateLimiterMetrics> {
        self.metrics.clone()
    }

    pub fn class_config(&self, class: LimitClass) -> Arc<LimitClassConfig> {
        self.classes.class_config(class)
    }

    /// Checks and consumes one unit for `subject` under `class`.
    ///
    /// The unit is consumed even when the decision is a denial; fixed-window
    /// counting does not distinguish admitted from rejected attempts.
    pub async fn allow(
        &self,
        class: LimitClass,
        subject: Subject,
    ) -> Result<RateLimitDecision, Error> {
        let config = self.classes.class_config(class);
        if !self.classes.is_enabled() || !config.enabled {
            return Ok(RateLimitDecision::Allow(RateLimitHeaders::unlimited()));
        }

        let key = RateLimitKey { class, subject };
        let counted = match &self.primary {
            Some(primary) => {
                self.metrics.record_primary_check();
                match primary.increment(&key, config.window()).await {
                    Ok(counted) => counted,
                    Err(e) => {
                        self.metrics.record_backend_error();
                        match config.fail_policy {
                            FailPolicy::Open => {
                                tracing::warn!(
                                    class = class.as_str(),
                                    error = %e,
                                    "Rate limit backend unavailable; using local fallback"
                                );
                                self.fallback_increment(&key, &config).await?
                            }
                            FailPolicy::Closed => return Err(e),
                        }
                    }
                }
            }
            None => self.fallback_increment(&key, &config).await?,
        };

        Ok(self.decide(class, &config, counted))
    }

    async fn fallback_increment(
        &self,
        key: &RateLimitKey,
        config: &LimitClassConfig,
    ) -> Result<WindowCount, Error> {
        self.metrics.record_fallback_check();
        self.fallback.increment(key, config.window()).await
    }

    fn decide(
        &self,
        class: LimitClass,
        config: &LimitClassConfig,
        counted: WindowCount,
    ) -> RateLimitDecision {
        if counted.count <= config.limit {
            RateLimitDecision::Allow(RateLimitHeaders {
                limit: config.limit,
                remaining: config.limit.saturating_sub(counted.count),
                reset: counted.reset_at,
                retry_after: None,
            })
        } else {
            self.metrics.record_denial();
            tracing::debug!(
                class = class.as_str(),
                count = counted.count,
                limit = config.limit,
                "Rate limit exceeded"
            );
            let retry_after = counted.reset_at.saturating_sub(unix_timestamp());
            RateLimitDecision::Deny(RateLimitHeaders {
                limit: config.limit,
                remaining: 0,
                reset: counted.reset_at,
                retry_after: Some(u32::try_from(retry_after).unwrap_or(u32::MAX)),
            })
        }
    }
}
