use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};

/// Subscription tier of a user. The tier caps how many spaces they can own,
/// how large each space can grow, and which features they can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Family,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Family => "family",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full limit table for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub max_spaces: u32,
    pub max_members_per_space: u32,
    pub can_use_location: bool,
    pub can_use_assistant: bool,
    pub daily_tokens: u64,
    pub monthly_tokens: u64,
}

const FREE_LIMITS: TierLimits = TierLimits {
    max_spaces: 3,
    max_members_per_space: 5,
    can_use_location: false,
    can_use_assistant: true,
    daily_tokens: 20_000,
    monthly_tokens: 300_000,
};

const PRO_LIMITS: TierLimits = TierLimits {
    max_spaces: 10,
    max_members_per_space: 20,
    can_use_location: true,
    can_use_assistant: true,
    daily_tokens: 150_000,
    monthly_tokens: 3_000_000,
};

const FAMILY_LIMITS: TierLimits = TierLimits {
    max_spaces: 5,
    max_members_per_space: 12,
    can_use_location: true,
    can_use_assistant: true,
    daily_tokens: 100_000,
    monthly_tokens: 2_000_000,
};

pub const fn feature_limits(tier: Tier) -> &'static TierLimits {
    match tier {
        Tier::Free => &FREE_LIMITS,
        Tier::Pro => &PRO_LIMITS,
        Tier::Family => &FAMILY_LIMITS,
    }
}

/// A countable ceiling subject to live-count enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountLimit {
    MaxSpaces,
    MaxMembersPerSpace,
}

impl CountLimit {
    pub fn ceiling(&self, tier: Tier) -> u32 {
        let limits = feature_limits(tier);
        match self {
            CountLimit::MaxSpaces => limits.max_spaces,
            CountLimit::MaxMembersPerSpace => limits.max_members_per_space,
        }
    }

    pub fn denial_code(&self) -> &'static str {
        match self {
            CountLimit::MaxSpaces => "SPACE_LIMIT_REACHED",
            CountLimit::MaxMembersPerSpace => "MEMBER_LIMIT_REACHED",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            CountLimit::MaxSpaces => "spaces",
            CountLimit::MaxMembersPerSpace => "members per space",
        }
    }
}

/// Outcome of a count check, kept even on the allowed path so handlers can
/// report headroom if they want to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountCheck {
    pub allowed: bool,
    pub limit: u32,
}

/// Checks whether one more of `which` fits under `tier`'s ceiling, given the
/// count observed right now. Counts are always taken live at decision time,
/// never cached; deleting a resource frees its slot immediately.
pub fn check_count_limit(current: u32, tier: Tier, which: CountLimit) -> CountCheck {
    let limit = which.ceiling(tier);
    CountCheck {
        allowed: current < limit,
        limit,
    }
}

pub fn require_count_within_limit(current: u32, tier: Tier, which: CountLimit) -> Result<(), Error> {
    let check = check_count_limit(current, tier, which);
    if check.allowed {
        Ok(())
    } else {
        Err(Error::new(ErrorDetails::TierLimitReached {
            tier,
            limit: which,
            current,
            max: check.limit,
        }))
    }
}

/// A feature gated on-or-off per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    LocationSharing,
    Assistant,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::LocationSharing => "location_sharing",
            Feature::Assistant => "assistant",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Feature::LocationSharing => "Location sharing",
            Feature::Assistant => "AI assistant",
        }
    }

    pub fn enabled_for(&self, tier: Tier) -> bool {
        let limits = feature_limits(tier);
        match self {
            Feature::LocationSharing => limits.can_use_location,
            Feature::Assistant => limits.can_use_assistant,
        }
    }
}

pub fn require_feature(tier: Tier, feature: Feature) -> Result<(), Error> {
    if feature.enabled_for(tier) {
        Ok(())
    } else {
        Err(Error::new(ErrorDetails::FeatureDisabled { tier, feature }))
    }
}
