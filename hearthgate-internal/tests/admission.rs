//! End-to-end admission tests over the full router: sessions, tier
//! ceilings, membership revocation, rate limiting, and the assistant
//! stack with a fixed clock and counting stores.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::Router;
use chrono::{NaiveDate, NaiveDateTime};
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use hearthgate_internal::admission::Clock;
use hearthgate_internal::assist::{BudgetPeriod, MemoryUsageStore, UsageStore};
use hearthgate_internal::config::Config;
use hearthgate_internal::endpoints;
use hearthgate_internal::error::Error;
use hearthgate_internal::rate_limit::{
    CounterStore, LimitClass, LimitClassConfig, MemoryCounterStore, RateLimitKey, WindowCount,
};
use hearthgate_internal::state::AppStateData;

/// Primary counter store that tracks how many increments it served, so
/// tests can assert which operations consumed a rate limit unit.
struct CountingCounterStore {
    inner: MemoryCounterStore,
    calls: AtomicU64,
}

impl CountingCounterStore {
    fn new() -> Self {
        Self {
            inner: MemoryCounterStore::new(),
            calls: AtomicU64::new(0),
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CounterStore for CountingCounterStore {
    async fn increment(&self, key: &RateLimitKey, window: Duration) -> Result<WindowCount, Error> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.inner.increment(key, window).await
    }
}

struct Harness {
    router: Router,
    state: AppStateData,
    counters: Arc<CountingCounterStore>,
    usage: Arc<MemoryUsageStore>,
}

fn morning(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 8, 30)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn harness_with(config: Config, now: NaiveDateTime) -> Harness {
    let counters = Arc::new(CountingCounterStore::new());
    let usage = Arc::new(MemoryUsageStore::new());
    let state = AppStateData::with_stores(
        config,
        Some(Arc::clone(&counters) as Arc<dyn CounterStore>),
        Arc::clone(&usage) as Arc<dyn UsageStore>,
        Clock::fixed(now),
    );
    let router = endpoints::router(state.clone());
    Harness {
        router,
        state,
        counters,
        usage,
    }
}

fn harness() -> Harness {
    harness_with(Config::default(), morning(8))
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<axum::body::Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    router.clone().oneshot(request).await.unwrap()
}

async fn read_json(response: Response<axum::body::Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn read_bytes(response: Response<axum::body::Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Creates a session and returns (token, user_id).
async fn create_session(router: &Router, email: &str, tier: &str) -> (String, Uuid) {
    create_session_for(router, email, tier, None).await
}

async fn create_session_for(
    router: &Router,
    email: &str,
    tier: &str,
    user_id: Option<Uuid>,
) -> (String, Uuid) {
    let mut body = json!({"email": email, "tier": tier});
    if let Some(user_id) = user_id {
        body["user_id"] = json!(user_id);
    }
    let response = send(router, Method::POST, "/v1/sessions", None, Some(body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let token = body["token"].as_str().unwrap().to_string();
    let user_id = body["user_id"].as_str().unwrap().parse().unwrap();
    (token, user_id)
}

async fn create_space(router: &Router, token: &str, name: &str) -> Response<axum::body::Body> {
    send(
        router,
        Method::POST,
        "/v1/spaces",
        Some(token),
        Some(json!({"name": name})),
    )
    .await
}

#[tokio::test]
async fn test_free_tier_space_ceiling_enforced_live() {
    let h = harness();

    let (token, _) = create_session(&h.router, "ada@example.com", "free").await;
    for name in ["Maple House", "Lake Cabin", "City Flat"] {
        let response = create_space(&h.router, &token, name).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = create_space(&h.router, &token, "One Too Many").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = read_json(response).await;
    assert_eq!(body["code"], "SPACE_LIMIT_REACHED");
    assert_eq!(body["currentCount"], 3);
    assert_eq!(body["limit"], 3);
    assert_eq!(body["tier"], "free");

    // A pro user is not constrained by the free ceiling.
    let (pro_token, _) = create_session(&h.router, "grace@example.com", "pro").await;
    let response = create_space(&h.router, &pro_token, "Fourth Space").await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_deleting_a_space_frees_its_slot() {
    let h = harness();
    let (token, user_id) = create_session(&h.router, "ada@example.com", "free").await;

    let mut space_ids = Vec::new();
    for name in ["A", "B", "C"] {
        let response = create_space(&h.router, &token, name).await;
        let body = read_json(response).await;
        space_ids.push(body["id"].as_str().unwrap().parse::<Uuid>().unwrap());
    }
    assert_eq!(
        create_space(&h.router, &token, "D").await.status(),
        StatusCode::FORBIDDEN
    );

    h.state.spaces.delete_space(space_ids[0]);
    assert_eq!(h.state.spaces.owned_space_count(user_id), 2);
    assert_eq!(
        create_space(&h.router, &token, "D").await.status(),
        StatusCode::CREATED
    );
}

#[tokio::test]
async fn test_revoked_member_denied_like_nonexistent_space() {
    let h = harness();
    let (owner_token, _) = create_session(&h.router, "ada@example.com", "free").await;
    let (member_token, member_id) =
        create_session(&h.router, "grace@example.com", "free").await;

    let response = create_space(&h.router, &owner_token, "Maple House").await;
    let space = read_json(response).await;
    let space_id: Uuid = space["id"].as_str().unwrap().parse().unwrap();

    let response = send(
        &h.router,
        Method::POST,
        &format!("/v1/spaces/{space_id}/members"),
        Some(&owner_token),
        Some(json!({"user_id": member_id})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let suggestions_uri = format!("/v1/spaces/{space_id}/assistant/suggestions");
    let response = send(&h.router, Method::GET, &suggestions_uri, Some(&member_token), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Revoke and retry; the cached suggestion from a minute ago must not
    // leak past the membership check.
    let response = send(
        &h.router,
        Method::DELETE,
        &format!("/v1/spaces/{space_id}/members/{member_id}"),
        Some(&owner_token),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let revoked = send(&h.router, Method::GET, &suggestions_uri, Some(&member_token), None).await;
    assert_eq!(revoked.status(), StatusCode::FORBIDDEN);

    let ghost = send(
        &h.router,
        Method::GET,
        &format!("/v1/spaces/{}/assistant/suggestions", Uuid::now_v7()),
        Some(&member_token),
        None,
    )
    .await;
    assert_eq!(ghost.status(), StatusCode::FORBIDDEN);

    // Byte-identical denials: nothing reveals whether the space exists.
    assert_eq!(read_bytes(revoked).await, read_bytes(ghost).await);
}

#[tokio::test]
async fn test_location_sharing_gated_by_tier() {
    let h = harness();
    let ping = json!({"latitude": 59.437, "longitude": 24.7536});

    let (free_token, _) = create_session(&h.router, "ada@example.com", "free").await;
    let response = create_space(&h.router, &free_token, "Maple House").await;
    let space = read_json(response).await;
    let uri = format!("/v1/spaces/{}/location", space["id"].as_str().unwrap());

    let response = send(&h.router, Method::POST, &uri, Some(&free_token), Some(ping.clone())).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = read_json(response).await;
    assert_eq!(body["code"], "FEATURE_DISABLED");
    assert_eq!(body["feature"], "location_sharing");
    assert_eq!(body["tier"], "free");

    let (pro_token, _) = create_session(&h.router, "grace@example.com", "pro").await;
    let response = create_space(&h.router, &pro_token, "Lake Cabin").await;
    let space = read_json(response).await;
    let uri = format!("/v1/spaces/{}/location", space["id"].as_str().unwrap());

    let response = send(&h.router, Method::POST, &uri, Some(&pro_token), Some(ping)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_rate_limit_denial_and_headers() {
    let mut config = Config::default();
    config.rate_limits.classes.insert(
        LimitClass::Api,
        LimitClassConfig {
            limit: 2,
            window_secs: 60,
            fail_policy: Default::default(),
            enabled: true,
        },
    );
    let h = harness_with(config, morning(8));
    let (token, _) = create_session(&h.router, "grace@example.com", "pro").await;

    let first = create_space(&h.router, &token, "A").await;
    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(first.headers()["X-RateLimit-Limit"], "2");
    assert_eq!(first.headers()["X-RateLimit-Remaining"], "1");

    let second = create_space(&h.router, &token, "B").await;
    assert_eq!(second.headers()["X-RateLimit-Remaining"], "0");

    let third = create_space(&h.router, &token, "C").await;
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(third.headers().contains_key("Retry-After"));
    let body = read_json(third).await;
    assert_eq!(body["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn test_briefing_window_and_setting() {
    let h = harness_with(Config::default(), morning(14));
    let (token, _) = create_session(&h.router, "ada@example.com", "free").await;
    let response = create_space(&h.router, &token, "Maple House").await;
    let space = read_json(response).await;
    let space_id = space["id"].as_str().unwrap().to_string();
    let briefing_uri = format!("/v1/spaces/{space_id}/assistant/briefing");

    // Afternoon: the briefing does not exist as far as clients can tell.
    let response = send(&h.router, Method::GET, &briefing_uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(response).await["code"], "BRIEFING_UNAVAILABLE");

    // Inside the window but disabled for the space.
    h.state.clock.set(morning(8));
    let response = send(
        &h.router,
        Method::PUT,
        &format!("/v1/spaces/{space_id}/settings/briefing"),
        Some(&token),
        Some(json!({"enabled": false})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&h.router, Method::GET, &briefing_uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(read_json(response).await["code"], "BRIEFING_DISABLED");
}

#[tokio::test]
async fn test_briefing_cache_hit_consumes_nothing() {
    let h = harness();
    let (token, user_id) = create_session(&h.router, "ada@example.com", "free").await;
    let response = create_space(&h.router, &token, "Maple House").await;
    let space = read_json(response).await;
    let uri = format!(
        "/v1/spaces/{}/assistant/briefing",
        space["id"].as_str().unwrap()
    );

    let calls_before = h.counters.calls();
    let first = send(&h.router, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(first.status(), StatusCode::OK);
    let body = read_json(first).await;
    assert_eq!(body["cached"], false);
    assert_eq!(h.counters.calls(), calls_before + 1);

    // The successful briefing commits usage in the background; give the
    // spawned task a moment to land.
    let mut spent = 0;
    for _ in 0..50 {
        spent = h
            .usage
            .tokens_used(user_id, BudgetPeriod::Day, morning(8).date())
            .await
            .unwrap();
        if spent > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(spent > 0);

    // Second call the same morning: served from cache, no rate limit unit
    // consumed, no further usage recorded.
    let second = send(&h.router, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(second.status(), StatusCode::OK);
    let body = read_json(second).await;
    assert_eq!(body["cached"], true);
    assert_eq!(h.counters.calls(), calls_before + 1);
}

#[tokio::test]
async fn test_budget_exhaustion_and_daily_reset() {
    let h = harness();
    let user_id = Uuid::now_v7();
    h.usage
        .seed(user_id, BudgetPeriod::Day, morning(8).date(), 20_000);

    let (token, _) =
        create_session_for(&h.router, "ada@example.com", "free", Some(user_id)).await;
    let response = create_space(&h.router, &token, "Maple House").await;
    let space = read_json(response).await;
    let uri = format!(
        "/v1/spaces/{}/assistant/briefing",
        space["id"].as_str().unwrap()
    );

    let response = send(&h.router, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = read_json(response).await;
    assert_eq!(body["code"], "BUDGET_EXCEEDED");
    assert_eq!(body["tokensUsed"], 20_000);
    assert_eq!(body["tokenBudget"], 20_000);
    assert!(body["resetsAt"].as_u64().unwrap() > 0);

    // Next morning the daily counter is a different key and the briefing
    // goes through.
    h.state.clock.set(
        NaiveDate::from_ymd_opt(2026, 8, 31)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap(),
    );
    let response = send(&h.router, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unauthenticated_requests_rejected() {
    let h = harness();

    let response = send(&h.router, Method::POST, "/v1/spaces", None, Some(json!({"name": "X"}))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &h.router,
        Method::POST,
        "/v1/spaces",
        Some("hearth_not_a_real_token"),
        Some(json!({"name": "X"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_member_ceiling_counts_owner() {
    let h = harness();
    let (token, _) = create_session(&h.router, "ada@example.com", "free").await;
    let response = create_space(&h.router, &token, "Maple House").await;
    let space = read_json(response).await;
    let members_uri = format!("/v1/spaces/{}/members", space["id"].as_str().unwrap());

    // Free tier allows 5 members per space; the owner occupies one slot.
    for _ in 0..4 {
        let response = send(
            &h.router,
            Method::POST,
            &members_uri,
            Some(&token),
            Some(json!({"user_id": Uuid::now_v7()})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    let response = send(
        &h.router,
        Method::POST,
        &members_uri,
        Some(&token),
        Some(json!({"user_id": Uuid::now_v7()})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = read_json(response).await;
    assert_eq!(body["code"], "MEMBER_LIMIT_REACHED");
    assert_eq!(body["currentCount"], 5);
    assert_eq!(body["limit"], 5);
}
