use std::sync::Arc;
use std::time::Duration;

use crate::admission::{AdmissionController, Clock};
use crate::assist::{
    BriefingCache, BudgetAccountant, MemoryUsageStore, RedisUsageStore, SuggestionCache, UsageStore,
};
use crate::authz::{AuthorizationGuard, MemorySpaceStore};
use crate::config::Config;
use crate::error::Error;
use crate::rate_limit::{
    CounterStore, FallbackRateLimiter, LimitClassStore, RedisCounterStore,
};
use crate::session::SessionStore;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub sessions: SessionStore,
    pub spaces: Arc<MemorySpaceStore>,
    pub limiter: Arc<FallbackRateLimiter>,
    pub admission: Arc<AdmissionController>,
    pub clock: Clock,
}

pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    /// Builds production state. A Redis URL (config file or
    /// `HEARTHGATE_REDIS_URL`) selects the shared stores; without one the
    /// gateway runs on process-local counters.
    pub async fn new(config: Config) -> Result<Self, Error> {
        let url = config
            .redis
            .url
            .clone()
            .or_else(|| std::env::var("HEARTHGATE_REDIS_URL").ok());

        let (primary, usage): (Option<Arc<dyn CounterStore>>, Arc<dyn UsageStore>) = match url {
            Some(url) => {
                let timeout = config.redis.timeout();
                let counters = RedisCounterStore::connect(&url, timeout).await?;
                let usage = RedisUsageStore::connect(&url, timeout).await?;
                tracing::info!("Connected to Redis counter store");
                (Some(Arc::new(counters)), Arc::new(usage))
            }
            None => {
                tracing::warn!(
                    "No Redis URL configured; rate limits and budgets are per-instance"
                );
                (None, Arc::new(MemoryUsageStore::new()))
            }
        };

        Ok(Self::with_stores(config, primary, usage, Clock::System))
    }

    /// Builds state over explicit stores and clock. Tests use this to
    /// inject counting stores, pre-seeded usage, and a fixed clock.
    pub fn with_stores(
        config: Config,
        primary: Option<Arc<dyn CounterStore>>,
        usage: Arc<dyn UsageStore>,
        clock: Clock,
    ) -> Self {
        let classes = LimitClassStore::new(config.rate_limits.clone());
        let limiter = Arc::new(FallbackRateLimiter::new(classes, primary));
        let spaces = Arc::new(MemorySpaceStore::new());

        let assistant = &config.assistant;
        let admission = Arc::new(AdmissionController::new(
            Arc::clone(&limiter),
            AuthorizationGuard::new(spaces.clone()),
            BudgetAccountant::new(usage),
            SuggestionCache::new(
                assistant.cache_capacity,
                Duration::from_secs(assistant.suggestion_ttl_secs),
            ),
            BriefingCache::new(
                assistant.cache_capacity,
                Duration::from_secs(assistant.briefing_ttl_secs),
            ),
            assistant.briefing_window,
        ));

        Self {
            config: Arc::new(config),
            sessions: SessionStore::new(),
            spaces,
            limiter,
            admission,
            clock,
        }
    }
}
