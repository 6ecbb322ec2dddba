use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Named limit classes. Each externally reachable route is counted under
/// exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitClass {
    /// Session issuance / login attempts, keyed per client IP.
    Auth,
    /// General protected API traffic, keyed per user.
    Api,
    /// Assistant reads (suggestions, briefing), keyed per user.
    Assistant,
    /// Location-sharing writes, keyed per user.
    Location,
}

impl LimitClass {
    pub const ALL: [LimitClass; 4] = [
        LimitClass::Auth,
        LimitClass::Api,
        LimitClass::Assistant,
        LimitClass::Location,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::Auth => "auth",
            LimitClass::Api => "api",
            LimitClass::Assistant => "assistant",
            LimitClass::Location => "location",
        }
    }
}

impl std::fmt::Display for LimitClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a class does when the counter store is unreachable.
///
/// This is an explicit per-class policy, not a blanket behavior. `Open`
/// degrades to the process-local window counter; `Closed` surfaces a 500
/// to the caller instead of guessing. Every shipped class defaults to
/// `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    #[default]
    Open,
    Closed,
}

/// Fixed-window configuration for one limit class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitClassConfig {
    /// Requests admitted per window.
    pub limit: u32,
    /// Window length in seconds.
    pub window_secs: u64,
    #[serde(default)]
    pub fail_policy: FailPolicy,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl LimitClassConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Built-in class ceilings, overridable from the config file.
pub fn default_class_config(class: LimitClass) -> LimitClassConfig {
    let (limit, window_secs) = match class {
        LimitClass::Auth => (10, 3600),
        LimitClass::Api => (300, 60),
        LimitClass::Assistant => (20, 3600),
        LimitClass::Location => (120, 60),
    };
    LimitClassConfig {
        limit,
        window_secs,
        fail_policy: FailPolicy::default(),
        enabled: true,
    }
}

/// `[rate_limits]` section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-class overrides; classes not named here use the defaults.
    #[serde(default)]
    pub classes: HashMap<LimitClass, LimitClassConfig>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            classes: HashMap::new(),
        }
    }
}

/// Store for the per-class configurations, hot-swappable at runtime.
#[derive(Clone)]
pub struct LimitClassStore {
    configs: Arc<DashMap<LimitClass, Arc<LimitClassConfig>>>,
    settings: Arc<ArcSwap<RateLimitSettings>>,
}

impl LimitClassStore {
    pub fn new(settings: RateLimitSettings) -> Self {
        let configs = Arc::new(DashMap::new());
        let store = Self {
            configs,
            settings: Arc::new(ArcSwap::from_pointee(settings.clone())),
        };
        store.seed(&settings);
        store
    }

    fn seed(&self, settings: &RateLimitSettings) {
        for class in LimitClass::ALL {
            let config = settings
                .classes
                .get(&class)
                .cloned()
                .unwrap_or_else(|| default_class_config(class));
            self.configs.insert(class, Arc::new(config));
        }
    }

    pub fn class_config(&self, class: LimitClass) -> Arc<LimitClassConfig> {
        self.configs
            .get(&class)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_else(|| Arc::new(default_class_config(class)))
    }

    pub fn update_class_config(&self, class: LimitClass, config: LimitClassConfig) {
        self.configs.insert(class, Arc::new(config));
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.load().enabled
    }

    pub fn update_settings(&self, settings: RateLimitSettings) {
        self.seed(&settings);
        self.settings.store(Arc::new(settings));
    }
}
