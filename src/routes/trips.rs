use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::JsonBody;
use crate::{
    auth::AuthUser,
    error::AppError,
    models::{
        membership::{MemberList, MembershipStatus},
        trip::{InvitePreview, NewTrip, Trip, TripChanges, TripDetails, TripSummary},
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/trips", post(create_trip))
        .route("/trips/discover", get(discover))
        .route("/join/:code", get(invite_preview).post(join_by_code))
        .route("/trip/join", post(join_trip))
        .route(
            "/trip/:trip_id",
            get(trip_details).put(update_trip).delete(delete_trip),
        )
        .route("/trip/:trip_id/members", get(list_members))
        .route(
            "/trip/:trip_id/members/:membership_id/approve",
            post(approve_member),
        )
        .route(
            "/trip/:trip_id/members/:membership_id",
            delete(remove_member),
        )
        .route("/trip/:trip_id/leave", post(leave_trip))
}

async fn create_trip(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    WithRejection(Json(input), _): JsonBody<NewTrip>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.trips.create(&user.id, input).await?))
}

async fn discover(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<TripSummary>>, AppError> {
    Ok(Json(state.trips.list_discoverable(&user.id).await?))
}

async fn invite_preview(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(code): Path<String>,
) -> Result<Json<InvitePreview>, AppError> {
    Ok(Json(state.trips.invite_preview(&code, &user.id).await?))
}

#[derive(Serialize)]
struct JoinResponse {
    status: MembershipStatus,
    #[serde(rename = "tripId", skip_serializing_if = "Option::is_none")]
    trip_id: Option<String>,
}

async fn join_by_code(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(code): Path<String>,
) -> Result<Json<JoinResponse>, AppError> {
    let (trip, status) = state.members.request_join_by_code(&code, &user.id).await?;
    Ok(Json(JoinResponse {
        status,
        trip_id: Some(trip.id),
    }))
}

#[derive(Deserialize)]
struct JoinForm {
    #[serde(rename = "tripId", default)]
    trip_id: Option<String>,
}

async fn join_trip(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    WithRejection(Json(form), _): JsonBody<JoinForm>,
) -> Result<Json<JoinResponse>, AppError> {
    let trip_id = form
        .trip_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Trip ID is required"))?;
    let status = state.members.request_join(&trip_id, &user.id).await?;
    Ok(Json(JoinResponse {
        status,
        trip_id: None,
    }))
}

async fn trip_details(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(trip_id): Path<String>,
) -> Result<Json<TripDetails>, AppError> {
    Ok(Json(state.trips.details(&trip_id, &user.id).await?))
}

async fn update_trip(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(trip_id): Path<String>,
    WithRejection(Json(changes), _): JsonBody<TripChanges>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.trips.update(&trip_id, &user.id, changes).await?))
}

async fn delete_trip(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(trip_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.trips.delete(&trip_id, &user.id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn list_members(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(trip_id): Path<String>,
) -> Result<Json<MemberList>, AppError> {
    Ok(Json(state.members.list_members(&trip_id, &user.id).await?))
}

async fn approve_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((trip_id, membership_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    state
        .members
        .approve(&trip_id, &membership_id, &user.id)
        .await?;
    Ok(Json(json!({ "status": MembershipStatus::Approved })))
}

/// Rejects a pending request or removes an approved member; both delete the row.
async fn remove_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((trip_id, membership_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    state
        .members
        .dismiss(&trip_id, &membership_id, &user.id)
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn leave_trip(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(trip_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.members.leave(&trip_id, &user.id).await?;
    Ok(Json(json!({ "success": true })))
}
