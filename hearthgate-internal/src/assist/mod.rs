pub mod budget;
pub mod cache;

pub use budget::{
    token_budget, AiAccess, BudgetAccountant, BudgetPeriod, BudgetStatus, MemoryUsageStore,
    RedisUsageStore, TokenBudget, UsageSample, UsageStore,
};
pub use cache::{AssistCacheKey, BriefingCache, BriefingEntry, SuggestionCache};
