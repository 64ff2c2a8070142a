use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use serde_json::{json, Value};

use super::JsonBody;
use crate::{
    auth::AuthUser,
    error::AppError,
    models::{
        folder::Folder,
        task::{PackingRecord, Progress, Task, TaskFields, TaskWithPackers},
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/trip/:trip_id/folders",
            get(list_folders).post(add_folder),
        )
        .route(
            "/trip/:trip_id/folders/:folder_id",
            put(rename_folder).delete(delete_folder),
        )
        .route("/trip/:trip_id/tasks", get(list_tasks).post(add_task))
        .route("/trip/:trip_id/progress", get(progress))
        .route("/task/:task_id", put(edit_task).delete(delete_task))
        .route("/task/:task_id/packed", post(toggle_packed))
        .route("/task/:task_id/packers", get(packers))
}

#[derive(Deserialize)]
struct FolderForm {
    #[serde(default)]
    name: Option<String>,
}

// A missing name is validated by the service after the access check.
impl FolderForm {
    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

async fn list_folders(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(trip_id): Path<String>,
) -> Result<Json<Vec<Folder>>, AppError> {
    Ok(Json(state.packing.list_folders(&trip_id, &user.id).await?))
}

async fn add_folder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(trip_id): Path<String>,
    WithRejection(Json(form), _): JsonBody<FolderForm>,
) -> Result<Json<Folder>, AppError> {
    let folder = state
        .packing
        .add_folder(&trip_id, form.name(), &user.id)
        .await?;
    Ok(Json(folder))
}

async fn rename_folder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((trip_id, folder_id)): Path<(String, String)>,
    WithRejection(Json(form), _): JsonBody<FolderForm>,
) -> Result<Json<Folder>, AppError> {
    let folder = state
        .packing
        .rename_folder(&trip_id, &folder_id, form.name(), &user.id)
        .await?;
    Ok(Json(folder))
}

async fn delete_folder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((trip_id, folder_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    state
        .packing
        .delete_folder(&trip_id, &folder_id, &user.id)
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(trip_id): Path<String>,
) -> Result<Json<Vec<TaskWithPackers>>, AppError> {
    Ok(Json(state.packing.list_tasks(&trip_id, &user.id).await?))
}

async fn add_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(trip_id): Path<String>,
    WithRejection(Json(fields), _): JsonBody<TaskFields>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.packing.add_task(&trip_id, fields, &user.id).await?))
}

async fn progress(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(trip_id): Path<String>,
) -> Result<Json<Progress>, AppError> {
    Ok(Json(state.packing.progress(&trip_id, &user.id).await?))
}

async fn edit_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(task_id): Path<String>,
    WithRejection(Json(fields), _): JsonBody<TaskFields>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.packing.edit_task(&task_id, fields, &user.id).await?))
}

async fn delete_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.packing.delete_task(&task_id, &user.id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn toggle_packed(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let packed = state
        .packing
        .toggle_packed(&task_id, &user.id, &user.username)
        .await?;
    Ok(Json(json!({ "packed": packed })))
}

async fn packers(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<Vec<PackingRecord>>, AppError> {
    Ok(Json(state.packing.packers(&task_id, &user.id).await?))
}
