use crate::api::models::{DetailsRequest, DiscoverRequest, ImagesRequest, SearchRequest, SourcesRequest};
use crate::core::error::Result;
use crate::extension::{ContentKind, ContentQuery};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use super::AppState;

/// Handler for POST /api/anime/:id/search
pub async fn search_anime(
    state: State<AppState>,
    id: Path<String>,
    req: Json<SearchRequest>,
) -> Result<impl IntoResponse> {
    search(ContentKind::Anime, state, id, req).await
}

/// Handler for POST /api/manga/:id/search
pub async fn search_manga(
    state: State<AppState>,
    id: Path<String>,
    req: Json<SearchRequest>,
) -> Result<impl IntoResponse> {
    search(ContentKind::Manga, state, id, req).await
}

/// Handler for POST /api/anime/:id/discover
pub async fn discover_anime(
    state: State<AppState>,
    id: Path<String>,
    req: Json<DiscoverRequest>,
) -> Result<impl IntoResponse> {
    discover(ContentKind::Anime, state, id, req).await
}

/// Handler for POST /api/manga/:id/discover
pub async fn discover_manga(
    state: State<AppState>,
    id: Path<String>,
    req: Json<DiscoverRequest>,
) -> Result<impl IntoResponse> {
    discover(ContentKind::Manga, state, id, req).await
}

/// Handler for POST /api/anime/:id/details
pub async fn get_anime_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DetailsRequest>,
) -> Result<impl IntoResponse> {
    let details = state.dispatcher.get_anime_details(&id, &req.id).await?;
    Ok(Json(details))
}

/// Handler for POST /api/manga/:id/details
pub async fn get_manga_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DetailsRequest>,
) -> Result<impl IntoResponse> {
    let details = state
        .dispatcher
        .get_manga_details(&id, &req.id, req.allow_adult)
        .await?;
    Ok(Json(details))
}

/// Handler for POST /api/anime/:id/sources
pub async fn get_video_sources(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SourcesRequest>,
) -> Result<impl IntoResponse> {
    let sources = state.dispatcher.get_video_sources(&id, &req.episode_id).await?;
    Ok(Json(sources))
}

/// Handler for POST /api/manga/:id/images
pub async fn get_chapter_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ImagesRequest>,
) -> Result<impl IntoResponse> {
    let images = state.dispatcher.get_chapter_images(&id, &req.chapter_id).await?;
    Ok(Json(images))
}

async fn search(
    kind: ContentKind,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<crate::extension::SearchPage>> {
    let query = ContentQuery::from(req);
    Ok(Json(state.dispatcher.search(kind, &id, &query).await?))
}

async fn discover(
    kind: ContentKind,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DiscoverRequest>,
) -> Result<Json<crate::extension::SearchPage>> {
    let query = ContentQuery::from(req);
    Ok(Json(state.dispatcher.discover(kind, &id, &query).await?))
}
