use crate::api::models::{ExtensionSourceRequest, ExtensionsListResponse};
use crate::core::error::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use super::AppState;

/// Handler for GET /api/extensions - List loaded extensions
pub async fn list_extensions(State(state): State<AppState>) -> impl IntoResponse {
    let extensions = state.dispatcher.list_extensions().await;
    Json(ExtensionsListResponse::from(extensions))
}

/// Handler for POST /api/extensions - Load an extension from source text
pub async fn load_extension(
    State(state): State<AppState>,
    Json(req): Json<ExtensionSourceRequest>,
) -> Result<impl IntoResponse> {
    let metadata = state.dispatcher.load_extension(req.code).await?;
    Ok((StatusCode::CREATED, Json(metadata)))
}

/// Handler for GET /api/extensions/:id - Get extension metadata
pub async fn get_extension(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let metadata = state.dispatcher.get_extension(&id).await?;
    Ok(Json(metadata))
}

/// Handler for PUT /api/extensions/:id - Replace an extension's source
pub async fn reload_extension(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExtensionSourceRequest>,
) -> Result<impl IntoResponse> {
    let metadata = state.dispatcher.reload_extension(&id, req.code).await?;
    Ok(Json(metadata))
}

/// Handler for DELETE /api/extensions/:id - Unload an extension
pub async fn unload_extension(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.dispatcher.unload_extension(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
