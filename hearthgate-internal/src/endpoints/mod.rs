pub mod assistant;
pub mod session;
pub mod spaces;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::rate_limit::{rate_limit_middleware, ClassLimiter, LimitClass};
use crate::session::require_session;
use crate::state::AppStateData;

/// Builds the gateway router.
///
/// Session issuance is rate limited per client IP under the auth class.
/// Space routes resolve the session first and enforce their limits inside
/// the handlers, where the admission controller sequences membership, count
/// and rate checks. Assistant routes likewise, so cached responses bypass
/// the limiter entirely.
pub fn router(state: AppStateData) -> Router {
    let auth_limiter = ClassLimiter::new(state.limiter.clone(), LimitClass::Auth);

    let sessions = Router::new()
        .route("/v1/sessions", post(session::create_session))
        .route_layer(middleware::from_fn_with_state(
            auth_limiter,
            rate_limit_middleware,
        ));

    let protected = Router::new()
        .route("/v1/spaces", post(spaces::create_space))
        .route("/v1/spaces/{space_id}/members", post(spaces::add_member))
        .route(
            "/v1/spaces/{space_id}/members/{user_id}",
            delete(spaces::remove_member),
        )
        .route("/v1/spaces/{space_id}/location", post(spaces::record_location))
        .route(
            "/v1/spaces/{space_id}/assistant/suggestions",
            get(assistant::suggestions),
        )
        .route(
            "/v1/spaces/{space_id}/assistant/briefing",
            get(assistant::morning_briefing),
        )
        .route(
            "/v1/spaces/{space_id}/settings/briefing",
            put(spaces::set_briefing_enabled),
        )
        .route_layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            require_session,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(sessions)
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}
