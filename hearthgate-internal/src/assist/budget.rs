use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{Error, ErrorDetails};
use crate::session::Principal;
use crate::tier::{self, Feature, Tier};

const COMMIT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Assistant token ceilings for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub daily_tokens: u64,
    pub monthly_tokens: u64,
}

pub fn token_budget(tier: Tier) -> TokenBudget {
    let limits = tier::feature_limits(tier);
    TokenBudget {
        daily_tokens: limits.daily_tokens,
        monthly_tokens: limits.monthly_tokens,
    }
}

/// Accounting period for usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetPeriod {
    Day,
    Month,
}

impl BudgetPeriod {
    pub fn describe(&self) -> &'static str {
        match self {
            BudgetPeriod::Day => "daily",
            BudgetPeriod::Month => "monthly",
        }
    }

    fn key_suffix(&self, date: NaiveDate) -> String {
        match self {
            BudgetPeriod::Day => date.format("%Y%m%d").to_string(),
            BudgetPeriod::Month => date.format("%Y%m").to_string(),
        }
    }
}

/// One completed assistant operation's token spend.
#[derive(Debug, Clone, Copy)]
pub struct UsageSample {
    pub user_id: Uuid,
    pub space_id: Option<Uuid>,
    pub tokens: u64,
    pub recorded_on: NaiveDate,
}

/// Persistent per-user token usage counters.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn tokens_used(
        &self,
        user_id: Uuid,
        period: BudgetPeriod,
        date: NaiveDate,
    ) -> Result<u64, Error>;

    /// Adds a sample to both the daily and monthly counter for its date.
    async fn record(&self, sample: &UsageSample) -> Result<(), Error>;
}

fn usage_key(user_id: Uuid, period: BudgetPeriod, date: NaiveDate) -> String {
    format!("ai_usage:{user_id}:{}", period.key_suffix(date))
}

// Counters outlive their period slightly so late recordings still land.
const DAILY_KEY_TTL_SECS: u64 = 2 * 86_400;
const MONTHLY_KEY_TTL_SECS: u64 = 35 * 86_400;

/// Redis-backed usage counters.
pub struct RedisUsageStore {
    conn: redis::aio::MultiplexedConnection,
    timeout: Duration,
}

impl RedisUsageStore {
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, Error> {
        let client = redis::Client::open(url).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to create Redis client: {e}"),
            })
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Config {
                    message: format!("Failed to get Redis connection: {e}"),
                })
            })?;
        Ok(Self {
            conn,
            timeout: op_timeout,
        })
    }
}

#[async_trait]
impl UsageStore for RedisUsageStore {
    async fn tokens_used(
        &self,
        user_id: Uuid,
        period: BudgetPeriod,
        date: NaiveDate,
    ) -> Result<u64, Error> {
        let mut conn = self.conn.clone();
        let key = usage_key(user_id, period, date);
        let read: Result<Result<Option<u64>, redis::RedisError>, _> =
            timeout(self.timeout, redis::cmd("GET").arg(&key).query_async(&mut conn)).await;
        match read {
            Ok(Ok(value)) => Ok(value.unwrap_or(0)),
            Ok(Err(e)) => Err(Error::new(ErrorDetails::Store {
                message: format!("Failed to read usage counter {key}: {e}"),
            })),
            Err(_) => Err(Error::new(ErrorDetails::Store {
                message: format!(
                    "Usage counter read timed out after {}ms",
                    self.timeout.as_millis()
                ),
            })),
        }
    }

    async fn record(&self, sample: &UsageSample) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let daily = usage_key(sample.user_id, BudgetPeriod::Day, sample.recorded_on);
        let monthly = usage_key(sample.user_id, BudgetPeriod::Month, sample.recorded_on);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .incr(&daily, sample.tokens)
            .expire(&daily, i64::try_from(DAILY_KEY_TTL_SECS).unwrap_or(i64::MAX))
            .incr(&monthly, sample.tokens)
            .expire(
                &monthly,
                i64::try_from(MONTHLY_KEY_TTL_SECS).unwrap_or(i64::MAX),
            );

        let write: Result<Result<(), redis::RedisError>, _> =
            timeout(self.timeout, pipe.query_async(&mut conn)).await;
        match write {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::new(ErrorDetails::Store {
                message: format!("Failed to record usage for {}: {e}", sample.user_id),
            })),
            Err(_) => Err(Error::new(ErrorDetails::Store {
                message: format!(
                    "Usage recording timed out after {}ms",
                    self.timeout.as_millis()
                ),
            })),
        }
    }
}

/// In-memory usage counters, used when no Redis URL is configured and as a
/// test double.
#[derive(Default)]
pub struct MemoryUsageStore {
    counters: DashMap<String, u64>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-loads a counter, for constructing exhausted-budget states.
    pub fn seed(&self, user_id: Uuid, period: BudgetPeriod, date: NaiveDate, tokens: u64) {
        self.counters.insert(usage_key(user_id, period, date), tokens);
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn tokens_used(
        &self,
        user_id: Uuid,
        period: BudgetPeriod,
        date: NaiveDate,
    ) -> Result<u64, Error> {
        Ok(self
            .counters
            .get(&usage_key(user_id, period, date))
            .map(|v| *v)
            .unwrap_or(0))
    }

    async fn record(&self, sample: &UsageSample) -> Result<(), Error> {
        for period in [BudgetPeriod::Day, BudgetPeriod::Month] {
            *self
                .counters
                .entry(usage_key(sample.user_id, period, sample.recorded_on))
                .or_insert(0) += sample.tokens;
        }
        Ok(())
    }
}

/// Budget state at the moment of a pre-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetStatus {
    pub tokens_used_today: u64,
    pub tokens_used_this_month: u64,
    pub budget: TokenBudget,
    pub day_resets_at: u64,
    pub month_resets_at: u64,
}

impl BudgetStatus {
    /// The exhausted dimension, daily checked first. `None` means headroom
    /// remains on both.
    pub fn exhausted(&self) -> Option<BudgetPeriod> {
        if self.tokens_used_today >= self.budget.daily_tokens {
            Some(BudgetPeriod::Day)
        } else if self.tokens_used_this_month >= self.budget.monthly_tokens {
            Some(BudgetPeriod::Month)
        } else {
            None
        }
    }
}

/// Result of an assistant access validation.
#[derive(Debug, Clone, Copy)]
pub struct AiAccess {
    pub tier: Tier,
    /// Present only when the budget was actually checked.
    pub budget: Option<BudgetStatus>,
}

#[derive(Debug, Default)]
pub struct BudgetMetrics {
    pub checks: AtomicU64,
    pub denials: AtomicU64,
    pub commit_failures: AtomicU64,
}

/// Advisory token-budget accounting for assistant operations.
///
/// The pre-check reads counters before the work runs; the commit lands after
/// the work succeeds and is fire-and-forget. Two requests passing the
/// pre-check concurrently can jointly overshoot the budget by one
/// operation's worth of tokens; the budget is a cost control, not a
/// quota guarantee, and the next pre-check sees the combined total.
pub struct BudgetAccountant {
    usage: Arc<dyn UsageStore>,
    metrics: Arc<BudgetMetrics>,
}

impl BudgetAccountant {
    pub fn new(usage: Arc<dyn UsageStore>) -> Self {
        Self {
            usage,
            metrics: Arc::new(BudgetMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<BudgetMetrics> {
        self.metrics.clone()
    }

    pub async fn check_budget(
        &self,
        user_id: Uuid,
        tier: Tier,
        now: NaiveDateTime,
    ) -> Result<BudgetStatus, Error> {
        self.metrics.checks.fetch_add(1, Ordering::Relaxed);
        let date = now.date();
        let tokens_used_today = self
            .usage
            .tokens_used(user_id, BudgetPeriod::Day, date)
            .await?;
        let tokens_used_this_month = self
            .usage
            .tokens_used(user_id, BudgetPeriod::Month, date)
            .await?;
        Ok(BudgetStatus {
            tokens_used_today,
            tokens_used_this_month,
            budget: token_budget(tier),
            day_resets_at: next_day_start(date)?,
            month_resets_at: next_month_start(date)?,
        })
    }

    /// Feature gate plus optional budget pre-check for one assistant
    /// operation. Suggestions skip the budget (their cost is negligible);
    /// briefings check it.
    pub async fn validate_ai_access(
        &self,
        principal: &Principal,
        space_id: Option<Uuid>,
        check_budget: bool,
        now: NaiveDateTime,
    ) -> Result<AiAccess, Error> {
        tier::require_feature(principal.tier, Feature::Assistant)?;

        if !check_budget {
            return Ok(AiAccess {
                tier: principal.tier,
                budget: None,
            });
        }

        let status = self.check_budget(principal.user_id, principal.tier, now).await?;
        if let Some(period) = status.exhausted() {
            self.metrics.denials.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                user_id = %principal.user_id,
                space_id = ?space_id,
                period = period.describe(),
                "Assistant budget exhausted"
            );
            let (used, budget, resets_at) = match period {
                BudgetPeriod::Day => (
                    status.tokens_used_today,
                    status.budget.daily_tokens,
                    status.day_resets_at,
                ),
                BudgetPeriod::Month => (
                    status.tokens_used_this_month,
                    status.budget.monthly_tokens,
                    status.month_resets_at,
                ),
            };
            return Err(Error::new(ErrorDetails::BudgetExceeded {
                tier: principal.tier,
                used,
                budget,
                period,
                resets_at,
            }));
        }

        Ok(AiAccess {
            tier: principal.tier,
            budget: Some(status),
        })
    }

    /// Commits a sample without blocking the response. A failed write gets
    /// one delayed retry; if that also fails the sample is logged and
    /// dropped. The user is never failed for it.
    pub fn record_usage(&self, sample: UsageSample) {
        let usage = Arc::clone(&self.usage);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let Err(first) = usage.record(&sample).await else {
                return;
            };
            tracing::debug!(
                user_id = %sample.user_id,
                error = %first,
                "Usage commit failed, retrying"
            );
            tokio::time::sleep(COMMIT_RETRY_DELAY).await;
            if let Err(e) = usage.record(&sample).await {
                metrics.commit_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    user_id = %sample.user_id,
                    tokens = sample.tokens,
                    error = %e,
                    "Failed to record assistant token usage"
                );
            }
        });
    }
}

fn next_day_start(date: NaiveDate) -> Result<u64, Error> {
    let next = date.succ_opt().ok_or_else(|| {
        Error::new(ErrorDetails::InternalError {
            message: "Date out of range computing daily reset".to_string(),
        })
    })?;
    let midnight = next.and_hms_opt(0, 0, 0).ok_or_else(|| {
        Error::new(ErrorDetails::InternalError {
            message: "Invalid midnight computing daily reset".to_string(),
        })
    })?;
    Ok(u64::try_from(midnight.and_utc().timestamp()).unwrap_or(0))
}

fn next_month_start(date: NaiveDate) -> Result<u64, Error> {
    let first = date.with_day(1).ok_or_else(|| {
        Error::new(ErrorDetails::InternalError {
            message: "Invalid first-of-month computing monthly reset".to_string(),
        })
    })?;
    let next = first.checked_add_months(Months::new(1)).ok_or_else(|| {
        Error::new(ErrorDetails::InternalError {
            message: "Date out of range computing monthly reset".to_string(),
        })
    })?;
    let midnight = next.and_hms_opt(0, 0, 0).ok_or_else(|| {
        Error::new(ErrorDetails::InternalError {
            message: "Invalid midnight computing monthly reset".to_string(),
        })
    })?;
    Ok(u64::try_from(midnight.and_utc().timestamp()).unwrap_or(0))
}
