use axum::{
    routing::{get, post},
    Router,
};
use crate::api::handlers::{self, AppState};

/// Build the command routes
pub fn build_api_routes(state: AppState) -> Router {
    Router::new()
        // Extension management
        .route(
            "/api/extensions",
            get(handlers::list_extensions).post(handlers::load_extension),
        )
        .route(
            "/api/extensions/:id",
            get(handlers::get_extension)
                .put(handlers::reload_extension)
                .delete(handlers::unload_extension),
        )
        // Anime
        .route("/api/anime/:id/search", post(handlers::search_anime))
        .route("/api/anime/:id/discover", post(handlers::discover_anime))
        .route("/api/anime/:id/details", post(handlers::get_anime_details))
        .route("/api/anime/:id/sources", post(handlers::get_video_sources))
        // Manga
        .route("/api/manga/:id/search", post(handlers::search_manga))
        .route("/api/manga/:id/discover", post(handlers::discover_manga))
        .route("/api/manga/:id/details", post(handlers::get_manga_details))
        .route("/api/manga/:id/images", post(handlers::get_chapter_images))
        .with_state(state)
}
