use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, ErrorDetails};
use crate::tier::Tier;

/// The authenticated caller, resolved once per request and carried as a
/// request extension from the session middleware inward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub tier: Tier,
}

/// Hashes a session token for storage. Tokens are never kept in plaintext;
/// lookup re-hashes the presented token.
pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// In-memory session registry mapping hashed bearer tokens to principals.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Principal>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: &str, principal: Principal) {
        #[expect(clippy::expect_used)]
        let mut sessions = self.sessions.write().expect("RwLock poisoned");
        sessions.insert(hash_session_token(token), principal);
    }

    pub fn revoke(&self, token: &str) {
        #[expect(clippy::expect_used)]
        let mut sessions = self.sessions.write().expect("RwLock poisoned");
        sessions.remove(&hash_session_token(token));
    }

    pub fn resolve(&self, token: &str) -> Option<Principal> {
        #[expect(clippy::expect_used)]
        let sessions = self.sessions.read().expect("RwLock poisoned");
        sessions.get(&hash_session_token(token)).cloned()
    }
}

/// Axum middleware requiring a valid bearer session.
///
/// On success the resolved `Principal` is inserted as a request extension;
/// downstream layers and handlers read it from there rather than resolving
/// again.
pub async fn require_session(
    State(sessions): State<SessionStore>,
    mut request: Request,
    next: Next,
) -> Result<Response, Error> {
    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            Error::new(ErrorDetails::Unauthenticated {
                message: "Missing bearer token".to_string(),
            })
        })?;

    let principal = sessions.resolve(token).ok_or_else(|| {
        Error::new(ErrorDetails::Unauthenticated {
            message: "Invalid or expired session".to_string(),
        })
    })?;

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
