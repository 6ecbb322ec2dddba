use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::assist::budget::BudgetPeriod;
use crate::rate_limit::{LimitClass, RateLimitHeaders};
use crate::tier::{CountLimit, Feature, Tier};

/// Gateway error type.
///
/// Every denial produced by the admission layer is one of these; none of
/// them is allowed to propagate as a panic or a generic error page. The
/// struct member is private so construction goes through [`Error::new`],
/// which logs the error at its variant's level.
#[derive(Debug, PartialEq)]
pub struct Error(Box<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Box::new(details))
    }

    pub fn new_without_logging(details: ErrorDetails) -> Self {
        Error(Box::new(details))
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    pub fn get_owned_details(self) -> ErrorDetails {
        *self.0
    }

    /// Stable machine-readable reason code for the response body.
    pub fn code(&self) -> &'static str {
        self.0.code()
    }

    pub fn log(&self) {
        self.0.log();
    }

    /// Build the JSON response body for this error.
    ///
    /// Denials that are actionable by the client (tier limits, budget)
    /// carry structured fields so UIs can render an upgrade prompt without
    /// string-matching the message.
    pub fn to_response_json(&self) -> (StatusCode, Value) {
        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        match self.get_details() {
            ErrorDetails::TierLimitReached {
                tier,
                current,
                max,
                ..
            } => {
                body["currentCount"] = json!(current);
                body["limit"] = json!(max);
                body["tier"] = json!(tier);
            }
            ErrorDetails::FeatureDisabled { tier, feature } => {
                body["tier"] = json!(tier);
                body["feature"] = json!(feature.as_str());
            }
            ErrorDetails::BudgetExceeded {
                tier,
                used,
                budget,
                resets_at,
                ..
            } => {
                body["tier"] = json!(tier);
                body["tokensUsed"] = json!(used);
                body["tokenBudget"] = json!(budget);
                body["resetsAt"] = json!(resets_at);
            }
            ErrorDetails::RateLimitExceeded { headers, .. } => {
                body["resetAt"] = json!(headers.reset);
            }
            _ => {}
        }
        (self.status_code(), body)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, PartialEq)]
pub enum ErrorDetails {
    /// Too many requests within the window of a limit class. Recoverable
    /// by the caller after `headers.reset`.
    RateLimitExceeded {
        class: LimitClass,
        headers: RateLimitHeaders,
    },
    /// Membership check failed. Space-not-found takes the same variant so
    /// the response never reveals whether the space exists.
    AccessDenied,
    /// A numeric tier ceiling was hit (e.g. max spaces for the tier).
    TierLimitReached {
        tier: Tier,
        limit: CountLimit,
        current: u32,
        max: u32,
    },
    /// A boolean capability is not available for the tier.
    FeatureDisabled { tier: Tier, feature: Feature },
    /// The assistant token budget for the period is spent. Distinct from
    /// rate limiting so clients can message the two differently.
    BudgetExceeded {
        tier: Tier,
        used: u64,
        budget: u64,
        period: BudgetPeriod,
        resets_at: u64,
    },
    /// Morning briefing requested outside its local-time window.
    BriefingUnavailable,
    /// Morning briefing disabled in the space's settings.
    BriefingDisabled,
    Unauthenticated {
        message: String,
    },
    /// The rate-limit counter store is unreachable. Only surfaced for
    /// fail-closed limit classes; fail-open classes degrade silently.
    BackendUnavailable {
        message: String,
    },
    /// Persistence (membership or usage store) failure.
    Store {
        message: String,
    },
    Config {
        message: String,
    },
    InternalError {
        message: String,
    },
}

impl ErrorDetails {
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::RateLimitExceeded { .. } => tracing::Level::INFO,
            ErrorDetails::AccessDenied => tracing::Level::WARN,
            ErrorDetails::TierLimitReached { .. } => tracing::Level::INFO,
            ErrorDetails::FeatureDisabled { .. } => tracing::Level::INFO,
            ErrorDetails::BudgetExceeded { .. } => tracing::Level::WARN,
            ErrorDetails::BriefingUnavailable => tracing::Level::DEBUG,
            ErrorDetails::BriefingDisabled => tracing::Level::DEBUG,
            ErrorDetails::Unauthenticated { .. } => tracing::Level::WARN,
            ErrorDetails::BackendUnavailable { .. } => tracing::Level::WARN,
            ErrorDetails::Store { .. } => tracing::Level::ERROR,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::InternalError { .. } => tracing::Level::ERROR,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ErrorDetails::AccessDenied => StatusCode::FORBIDDEN,
            ErrorDetails::TierLimitReached { .. } => StatusCode::FORBIDDEN,
            ErrorDetails::FeatureDisabled { .. } => StatusCode::FORBIDDEN,
            ErrorDetails::BudgetExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ErrorDetails::BriefingUnavailable => StatusCode::NOT_FOUND,
            ErrorDetails::BriefingDisabled => StatusCode::FORBIDDEN,
            ErrorDetails::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            ErrorDetails::BackendUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ErrorDetails::RateLimitExceeded { .. } => "RATE_LIMITED",
            ErrorDetails::AccessDenied => "ACCESS_DENIED",
            ErrorDetails::TierLimitReached { limit, .. } => limit.denial_code(),
            ErrorDetails::FeatureDisabled { .. } => "FEATURE_DISABLED",
            ErrorDetails::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            ErrorDetails::BriefingUnavailable => "BRIEFING_UNAVAILABLE",
            ErrorDetails::BriefingDisabled => "BRIEFING_DISABLED",
            ErrorDetails::Unauthenticated { .. } => "UNAUTHENTICATED",
            ErrorDetails::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            ErrorDetails::Store { .. } => "INTERNAL_ERROR",
            ErrorDetails::Config { .. } => "INTERNAL_ERROR",
            ErrorDetails::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Log the error using the `tracing` library.
    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            tracing::Level::INFO => tracing::info!("{self}"),
            tracing::Level::DEBUG => tracing::debug!("{self}"),
            tracing::Level::TRACE => tracing::trace!("{self}"),
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::RateLimitExceeded { class, .. } => {
                write!(f, "Rate limit exceeded for `{class}` requests")
            }
            // One fixed sentence for every authorization failure, so the
            // body is byte-identical whether the space is missing or the
            // caller simply is not a member.
            ErrorDetails::AccessDenied => {
                write!(f, "You do not have access to this space")
            }
            ErrorDetails::TierLimitReached {
                tier,
                limit,
                current,
                max,
            } => {
                write!(
                    f,
                    "The {tier} tier allows {max} {}; you currently have {current}",
                    limit.describe()
                )
            }
            ErrorDetails::FeatureDisabled { tier, feature } => {
                write!(
                    f,
                    "{} is not available on the {tier} tier",
                    feature.display_name()
                )
            }
            ErrorDetails::BudgetExceeded {
                tier,
                used,
                budget,
                period,
                ..
            } => {
                write!(
                    f,
                    "Assistant token budget exhausted for the {tier} tier: {used} of {budget} {} tokens used",
                    period.describe()
                )
            }
            ErrorDetails::BriefingUnavailable => {
                write!(f, "The morning briefing is not available at this time of day")
            }
            ErrorDetails::BriefingDisabled => {
                write!(f, "The morning briefing is disabled for this space")
            }
            ErrorDetails::Unauthenticated { message } => {
                write!(f, "{message}")
            }
            ErrorDetails::BackendUnavailable { message } => {
                write!(f, "Rate limit backend unavailable: {message}")
            }
            ErrorDetails::Store { message } => {
                write!(f, "Storage error: {message}")
            }
            ErrorDetails::Config { message } => {
                write!(f, "{message}")
            }
            ErrorDetails::InternalError { message } => {
                write!(f, "Internal error: {message}")
            }
        }
    }
}

impl IntoResponse for Error {
    /// Convert into an Axum response with the stable JSON body shape.
    /// Rate-limit denials additionally carry the standard quota headers.
    fn into_response(self) -> Response {
        let (status_code, body) = self.to_response_json();
        let mut response = (status_code, Json(body)).into_response();
        if let ErrorDetails::RateLimitExceeded { headers, .. } = self.get_owned_details() {
            response.headers_mut().extend(headers.to_header_map());
        }
        response
    }
}
