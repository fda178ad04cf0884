//! Command Dispatcher
//!
//! The command surface a presentation layer talks to. Each command resolves the
//! extension, checks the operation against its content kind and capability set
//! before touching script code, runs the call through the context pool and
//! normalizes the result.

use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::bridge::{CapabilityBridge, HttpFetcher, ReqwestFetcher};
use super::content::{ChapterImages, ContentQuery, MediaDetails, SearchPage, VideoSources};
use super::normalizer;
use super::pool::{ContextPool, ContextSlot};
use super::registry::ExtensionRegistry;
use super::types::{Capability, ContentKind, ExtensionMetadata};
use crate::core::config::RuntimeConfig;
use crate::core::error::{KaguraError, Result};

pub struct Dispatcher {
    registry: ExtensionRegistry,
    pool: ContextPool,
}

impl Dispatcher {
    /// Build a dispatcher whose bridge fetches over the network.
    ///
    /// `handle` must belong to the host's multi-threaded runtime.
    pub fn new(config: &RuntimeConfig, handle: Handle) -> Result<Self> {
        let fetcher = ReqwestFetcher::new(config)
            .map_err(|e| KaguraError::ConfigError(format!("HTTP client: {}", e)))?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher), handle))
    }

    pub fn with_fetcher(config: &RuntimeConfig, fetcher: Arc<dyn HttpFetcher>, handle: Handle) -> Self {
        let bridge = CapabilityBridge::new(fetcher, handle, config.fetch_timeout());
        Self {
            registry: ExtensionRegistry::new(),
            pool: ContextPool::new(bridge, config.context_policy, config.call_timeout())
                .with_max_heap_bytes(config.max_heap_bytes),
        }
    }

    /// `loadExtension`: evaluate `code` and register it under a new id
    pub async fn load_extension(&self, code: String) -> Result<ExtensionMetadata> {
        validate_code(&code)?;
        let id = Uuid::new_v4().to_string();

        let slot = self.pool.load(id, code).await.map_err(|e| match e {
            // a failed load is never registered, so its id means nothing to the caller
            KaguraError::ExtensionLoad { message, .. } => KaguraError::ExtensionLoad {
                extension_id: None,
                message,
            },
            other => other,
        })?;

        Ok(self.registry.register(slot).await)
    }

    /// Replace the extension at a previously returned id with new source text
    pub async fn reload_extension(&self, id: &str, code: String) -> Result<ExtensionMetadata> {
        validate_code(&code)?;
        if !self.registry.contains(id).await {
            return Err(KaguraError::ExtensionNotFound(id.to_string()));
        }

        let slot = self.pool.load(id.to_string(), code).await?;
        self.registry.replace(slot).await
    }

    pub async fn unload_extension(&self, id: &str) -> Result<()> {
        self.registry.remove(id).await
    }

    pub async fn get_extension(&self, id: &str) -> Result<ExtensionMetadata> {
        Ok(self.registry.get(id).await?.metadata())
    }

    pub async fn list_extensions(&self) -> Vec<ExtensionMetadata> {
        self.registry.list().await
    }

    /// Load every `*.js` file directly inside `dir`, skipping ones that fail
    pub async fn preload_dir(&self, dir: &Path) -> Result<Vec<ExtensionMetadata>> {
        let mut scripts = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "js") {
                scripts.push(path.to_path_buf());
            }
        }

        let mut loaded = Vec::with_capacity(scripts.len());
        for path in scripts {
            let code = match tokio::fs::read_to_string(&path).await {
                Ok(code) => code,
                Err(e) => {
                    warn!(path = %path.display(), "Failed to read extension: {}", e);
                    continue;
                }
            };
            match self.load_extension(code).await {
                Ok(metadata) => {
                    info!(path = %path.display(), extension_id = %metadata.id, "Preloaded extension");
                    loaded.push(metadata);
                }
                Err(e) => warn!(path = %path.display(), "Skipping extension: {}", e),
            }
        }

        info!(dir = %dir.display(), count = loaded.len(), "Preload finished");
        Ok(loaded)
    }

    /// `searchAnime` / `searchManga`
    pub async fn search(&self, kind: ContentKind, id: &str, query: &ContentQuery) -> Result<SearchPage> {
        let operation = command_name(kind, "searchAnime", "searchManga");
        validate_page(query.page)?;
        let text = query
            .query
            .as_deref()
            .ok_or_else(|| KaguraError::InvalidRequest("search requires a query".into()))?;

        let args = vec![json!(text), json!(query.page), json!(query.allow_adult)];
        let (slot, raw) = self.call(id, operation, kind, Capability::Search, args).await?;
        normalizer::search_page(&raw).map_err(|message| violation(&slot, operation, message))
    }

    /// `discoverAnime` / `discoverManga`
    pub async fn discover(&self, kind: ContentKind, id: &str, query: &ContentQuery) -> Result<SearchPage> {
        let operation = command_name(kind, "discoverAnime", "discoverManga");
        validate_page(query.page)?;

        let args = vec![
            json!(query.page),
            json!(query.sort_type),
            json!(query.genres),
            json!(query.allow_adult),
        ];
        let (slot, raw) = self.call(id, operation, kind, Capability::Discover, args).await?;
        normalizer::search_page(&raw).map_err(|message| violation(&slot, operation, message))
    }

    /// `getAnimeDetails` / `getMangaDetails`
    pub async fn get_details(
        &self,
        kind: ContentKind,
        id: &str,
        media_id: &str,
        allow_adult: bool,
    ) -> Result<MediaDetails> {
        let operation = command_name(kind, "getAnimeDetails", "getMangaDetails");
        validate_id("id", media_id)?;

        let args = vec![json!(media_id), json!(allow_adult)];
        let (slot, raw) = self.call(id, operation, kind, Capability::GetDetails, args).await?;
        normalizer::media_details(&raw, kind).map_err(|message| violation(&slot, operation, message))
    }

    pub async fn search_anime(&self, id: &str, query: &str, page: u32, allow_adult: bool) -> Result<SearchPage> {
        self.search(ContentKind::Anime, id, &ContentQuery::search(query, page, allow_adult))
            .await
    }

    pub async fn search_manga(&self, id: &str, query: &str, page: u32, allow_adult: bool) -> Result<SearchPage> {
        self.search(ContentKind::Manga, id, &ContentQuery::search(query, page, allow_adult))
            .await
    }

    pub async fn discover_anime(
        &self,
        id: &str,
        page: u32,
        sort_type: Option<String>,
        genres: Vec<String>,
        allow_adult: bool,
    ) -> Result<SearchPage> {
        let query = ContentQuery::discover(page, sort_type, genres, allow_adult);
        self.discover(ContentKind::Anime, id, &query).await
    }

    pub async fn discover_manga(
        &self,
        id: &str,
        page: u32,
        sort_type: Option<String>,
        genres: Vec<String>,
        allow_adult: bool,
    ) -> Result<SearchPage> {
        let query = ContentQuery::discover(page, sort_type, genres, allow_adult);
        self.discover(ContentKind::Manga, id, &query).await
    }

    pub async fn get_anime_details(&self, id: &str, media_id: &str) -> Result<MediaDetails> {
        self.get_details(ContentKind::Anime, id, media_id, false).await
    }

    pub async fn get_manga_details(&self, id: &str, media_id: &str, allow_adult: bool) -> Result<MediaDetails> {
        self.get_details(ContentKind::Manga, id, media_id, allow_adult)
            .await
    }

    /// `getVideoSources`: anime extensions only
    pub async fn get_video_sources(&self, id: &str, episode_id: &str) -> Result<VideoSources> {
        let operation = "getVideoSources";
        validate_id("episodeId", episode_id)?;

        let args = vec![json!(episode_id)];
        let (slot, raw) = self
            .call(id, operation, ContentKind::Anime, Capability::ResolveSources, args)
            .await?;
        normalizer::video_sources(&raw).map_err(|message| violation(&slot, operation, message))
    }

    /// `getChapterImages`: manga extensions only
    pub async fn get_chapter_images(&self, id: &str, chapter_id: &str) -> Result<ChapterImages> {
        let operation = "getChapterImages";
        validate_id("chapterId", chapter_id)?;

        let args = vec![json!(chapter_id)];
        let (slot, raw) = self
            .call(id, operation, ContentKind::Manga, Capability::ResolveChapterImages, args)
            .await?;
        normalizer::chapter_images(&raw).map_err(|message| violation(&slot, operation, message))
    }

    /// Unload everything; used on shutdown
    pub async fn shutdown(&self) {
        self.registry.clear().await;
    }

    /// Resolve the slot, check the operation is allowed for it, then invoke
    async fn call(
        &self,
        id: &str,
        operation: &str,
        kind: ContentKind,
        capability: Capability,
        args: Vec<Value>,
    ) -> Result<(Arc<ContextSlot>, Value)> {
        let slot = self.registry.get(id).await?;
        let manifest = slot.manifest();

        if manifest.kind != kind || !manifest.supports(capability) {
            return Err(KaguraError::UnsupportedOperation {
                extension_id: id.to_string(),
                operation: operation.to_string(),
                kind: manifest.kind.to_string(),
            });
        }

        let raw = self.pool.invoke(&slot, operation, capability, args).await?;
        Ok((slot, raw))
    }
}

fn command_name(kind: ContentKind, anime: &'static str, manga: &'static str) -> &'static str {
    match kind {
        ContentKind::Anime => anime,
        ContentKind::Manga => manga,
    }
}

fn violation(slot: &ContextSlot, operation: &str, message: String) -> KaguraError {
    warn!(extension_id = %slot.id(), operation, "Contract violation: {}", message);
    KaguraError::ContractViolation {
        extension_id: slot.id().to_string(),
        operation: operation.to_string(),
        message,
    }
}

fn validate_code(code: &str) -> Result<()> {
    if code.trim().is_empty() {
        return Err(KaguraError::InvalidRequest("extension code is empty".into()));
    }
    Ok(())
}

fn validate_page(page: u32) -> Result<()> {
    if page == 0 {
        return Err(KaguraError::InvalidRequest("page is 1-indexed".into()));
    }
    Ok(())
}

fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(KaguraError::InvalidRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}
