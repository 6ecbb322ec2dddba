use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;
use uuid::Uuid;

use crate::admission::BriefingOutput;
use crate::error::Error;
use crate::session::Principal;
use crate::state::AppStateData;

/// Serves contextual suggestions for a space. Generation here is a
/// deterministic placeholder; in deployment it calls out to the model
/// backend. The admission controller owns the surrounding checks either
/// way.
pub async fn suggestions(
    State(state): State<AppStateData>,
    Extension(principal): Extension<Principal>,
    Path(space_id): Path<Uuid>,
) -> Result<Response, Error> {
    let space_name = state
        .spaces
        .space(space_id)
        .map(|s| s.name)
        .unwrap_or_default();

    let outcome = state
        .admission
        .suggestions(&principal, space_id, || async move {
            Ok(json!({
                "space": space_name,
                "suggestions": [
                    "Review this week's shared shopping list",
                    "Three chores are unassigned for the weekend",
                ],
            }))
        })
        .await?;

    let body = json!({
        "cached": outcome.cached,
        "data": *outcome.payload,
    });
    let mut response = Json(body).into_response();
    if let Some(headers) = &outcome.headers {
        response.headers_mut().extend(headers.to_header_map());
    }
    Ok(response)
}

/// Serves the morning briefing for a space, inside the morning window only.
pub async fn morning_briefing(
    State(state): State<AppStateData>,
    Extension(principal): Extension<Principal>,
    Path(space_id): Path<Uuid>,
) -> Result<Response, Error> {
    let now = state.clock.now();
    let briefing_enabled = state.spaces.briefing_enabled(space_id);
    let space_name = state
        .spaces
        .space(space_id)
        .map(|s| s.name)
        .unwrap_or_default();

    let outcome = state
        .admission
        .morning_briefing(&principal, space_id, briefing_enabled, now, || async move {
            let payload = json!({
                "space": space_name,
                "date": now.date().to_string(),
                "briefing": "Good morning. Two events today and one overdue chore.",
            });
            // Rough token estimate until the model backend reports usage.
            let tokens_spent = payload.to_string().len() as u64 / 4;
            Ok(BriefingOutput {
                payload,
                tokens_spent,
            })
        })
        .await?;

    let body = json!({
        "cached": outcome.cached,
        "data": *outcome.payload,
    });
    let mut response = Json(body).into_response();
    if let Some(headers) = &outcome.headers {
        response.headers_mut().extend(headers.to_header_map());
    }
    Ok(response)
}
