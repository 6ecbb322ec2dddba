use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::authz::SpaceRole;
use crate::error::{Error, ErrorDetails};
use crate::rate_limit::LimitClass;
use crate::session::Principal;
use crate::state::AppStateData;
use crate::tier::{self, CountLimit, Feature};

#[derive(Debug, Deserialize)]
pub struct CreateSpaceRequest {
    pub name: String,
}

/// Creates a space owned by the caller. The tier's space ceiling is checked
/// against a live count of owned spaces, after rate limiting.
pub async fn create_space(
    State(state): State<AppStateData>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CreateSpaceRequest>,
) -> Result<Response, Error> {
    let admission = state.admission.admit(LimitClass::Api, &principal).await?;

    let owned = state.spaces.owned_space_count(principal.user_id);
    tier::require_count_within_limit(owned, principal.tier, CountLimit::MaxSpaces)?;

    let space = state.spaces.create_space(&request.name, principal.user_id);
    tracing::info!(space_id = %space.id, owner = %principal.user_id, "Space created");

    let mut response = (StatusCode::CREATED, Json(space)).into_response();
    response
        .headers_mut()
        .extend(admission.headers.to_header_map());
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    #[serde(default = "default_member_role")]
    pub role: SpaceRole,
}

fn default_member_role() -> SpaceRole {
    SpaceRole::Member
}

/// Adds a member to a space. Requires a managing role; the member ceiling
/// comes from the caller's tier and is checked against a live roster count.
pub async fn add_member(
    State(state): State<AppStateData>,
    Extension(principal): Extension<Principal>,
    Path(space_id): Path<Uuid>,
    Json(request): Json<AddMemberRequest>,
) -> Result<Response, Error> {
    let admission = state
        .admission
        .admit_space_op(LimitClass::Api, &principal, space_id)
        .await?;

    if !admission
        .membership
        .as_ref()
        .is_some_and(|m| m.role.can_manage())
    {
        return Err(Error::new(ErrorDetails::AccessDenied));
    }

    let current = state.spaces.member_count(space_id);
    tier::require_count_within_limit(current, principal.tier, CountLimit::MaxMembersPerSpace)?;

    state
        .spaces
        .add_member(space_id, request.user_id, request.role);
    tracing::info!(space_id = %space_id, user_id = %request.user_id, "Member added");

    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .extend(admission.headers.to_header_map());
    Ok(response)
}

/// Removes a member. Managers can remove anyone; members can remove
/// themselves (leaving the space).
pub async fn remove_member(
    State(state): State<AppStateData>,
    Extension(principal): Extension<Principal>,
    Path((space_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, Error> {
    let admission = state
        .admission
        .admit_space_op(LimitClass::Api, &principal, space_id)
        .await?;

    let can_manage = admission
        .membership
        .as_ref()
        .is_some_and(|m| m.role.can_manage());
    if !can_manage && user_id != principal.user_id {
        return Err(Error::new(ErrorDetails::AccessDenied));
    }

    state.spaces.remove_member(space_id, user_id);
    tracing::info!(space_id = %space_id, user_id = %user_id, "Member removed");

    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .extend(admission.headers.to_header_map());
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct LocationUpdateRequest {
    pub latitude: f64,
    pub longitude: f64,
}

/// Accepts a location ping from a member. Location sharing is a paid
/// feature; the gate runs after membership and rate limiting so the denial
/// reveals nothing to non-members.
pub async fn record_location(
    State(state): State<AppStateData>,
    Extension(principal): Extension<Principal>,
    Path(space_id): Path<Uuid>,
    Json(request): Json<LocationUpdateRequest>,
) -> Result<Response, Error> {
    let admission = state
        .admission
        .admit_space_op(LimitClass::Location, &principal, space_id)
        .await?;

    tier::require_feature(principal.tier, Feature::LocationSharing)?;

    tracing::debug!(
        space_id = %space_id,
        user_id = %principal.user_id,
        latitude = request.latitude,
        longitude = request.longitude,
        "Location recorded"
    );

    let mut response = StatusCode::ACCEPTED.into_response();
    response
        .headers_mut()
        .extend(admission.headers.to_header_map());
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct BriefingSettingRequest {
    pub enabled: bool,
}

/// Toggles the space's morning briefing. Requires a managing role.
pub async fn set_briefing_enabled(
    State(state): State<AppStateData>,
    Extension(principal): Extension<Principal>,
    Path(space_id): Path<Uuid>,
    Json(request): Json<BriefingSettingRequest>,
) -> Result<Response, Error> {
    let admission = state
        .admission
        .admit_space_op(LimitClass::Api, &principal, space_id)
        .await?;

    if !admission
        .membership
        .as_ref()
        .is_some_and(|m| m.role.can_manage())
    {
        return Err(Error::new(ErrorDetails::AccessDenied));
    }

    if !state.spaces.set_briefing_enabled(space_id, request.enabled) {
        return Err(Error::new(ErrorDetails::AccessDenied));
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    response
        .headers_mut()
        .extend(admission.headers.to_header_map());
    Ok(response)
}
