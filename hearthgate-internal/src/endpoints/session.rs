use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::session::Principal;
use crate::state::AppStateData;
use crate::tier::Tier;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub email: String,
    #[serde(default)]
    pub tier: Tier,
    /// Caller-supplied id keeps a user stable across sessions; omitted for
    /// a fresh identity.
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub token: String,
    pub user_id: Uuid,
}

/// Issues a bearer session. Identity verification lives upstream of this
/// gateway; this endpoint trusts its input and exists so the admission
/// stack has sessions to resolve.
pub async fn create_session(
    State(state): State<AppStateData>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, Error> {
    let user_id = request.user_id.unwrap_or_else(Uuid::now_v7);
    let token = format!("hearth_{}", Uuid::now_v7().simple());

    state.sessions.insert(
        &token,
        Principal {
            user_id,
            email: request.email,
            tier: request.tier,
        },
    );

    tracing::debug!(user_id = %user_id, tier = %request.tier, "Session issued");
    Ok(Json(CreateSessionResponse { token, user_id }))
}
