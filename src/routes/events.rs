use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::{
    auth::AuthUser,
    error::AppError,
    services::{membership::require_access, notifier::Update},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/trip/:trip_id/events", get(trip_events))
}

/// Live change feed for one trip. Each event names the collection that
/// changed; clients re-read it. `resync` means re-read everything.
async fn trip_events(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(trip_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    require_access(&state.db, &trip_id, &user.id).await?;

    let subscription = state.notifier.subscribe(trip_id.clone());
    debug!(trip_id, user_id = %user.id, "viewer subscribed");

    let stream = subscription.into_stream().map(|update| match update {
        Update::Change(event) => Event::default().event(event.kind.name()).json_data(&event),
        Update::Resync => Ok(Event::default().event("resync").data("resync")),
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
