use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{Error, ErrorDetails};
use crate::rate_limit::config::LimitClass;
use crate::rate_limit::limiter::FallbackRateLimiter;
use crate::rate_limit::{RateLimitDecision, Subject};
use crate::session::Principal;

/// A rate limiter bound to one limit class, for attaching as route-layer
/// state. Cloning is cheap; the limiter itself is shared.
#[derive(Clone)]
pub struct ClassLimiter {
    limiter: Arc<FallbackRateLimiter>,
    class: LimitClass,
}

impl ClassLimiter {
    pub fn new(limiter: Arc<FallbackRateLimiter>, class: LimitClass) -> Self {
        Self { limiter, class }
    }
}

/// Axum middleware enforcing the class limit for each request.
///
/// The subject is the authenticated user when a `Principal` extension is
/// present (session middleware runs outside this layer), otherwise the
/// client IP. Successful responses carry the standard rate limit headers;
/// denials become a 429 with `Retry-After`.
pub async fn rate_limit_middleware(
    State(class_limiter): State<ClassLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    let subject = subject_for(&request);
    match class_limiter
        .limiter
        .allow(class_limiter.class, subject)
        .await?
    {
        RateLimitDecision::Allow(headers) => {
            let mut response = next.run(request).await;
            response.headers_mut().extend(headers.to_header_map());
            Ok(response)
        }
        RateLimitDecision::Deny(headers) => Err(Error::new(ErrorDetails::RateLimitExceeded {
            class: class_limiter.class,
            headers,
        })),
    }
}

fn subject_for(request: &Request) -> Subject {
    if let Some(principal) = request.extensions().get::<Principal>() {
        return Subject::User(principal.user_id);
    }
    Subject::Ip(client_ip(request))
}

fn client_ip(request: &Request) -> IpAddr {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(ip) = forwarded
            .split(',')
            .next()
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
        {
            return ip;
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
