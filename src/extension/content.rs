//! Canonical content model
//!
//! Provider-agnostic entities produced by the normalizer. Field names on the
//! wire are camelCase to match what the presentation layer consumes.

use serde::{Deserialize, Serialize};

/// Caller-constructed query for `search` and `discover`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_type: Option<String>,
    /// 1-indexed
    pub page: u32,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub allow_adult: bool,
}

impl ContentQuery {
    pub fn search(query: impl Into<String>, page: u32, allow_adult: bool) -> Self {
        Self {
            query: Some(query.into()),
            sort_type: None,
            page,
            genres: Vec::new(),
            allow_adult,
        }
    }

    pub fn discover(
        page: u32,
        sort_type: Option<String>,
        genres: Vec<String>,
        allow_adult: bool,
    ) -> Self {
        Self {
            query: None,
            sort_type,
            page,
            genres,
            allow_adult,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default)]
    pub genres: Vec<String>,
}

/// One page of `search` / `discover` results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub results: Vec<SearchResultItem>,
    /// Exactly what the plugin declared
    pub has_next_page: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    pub number: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub number: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Ordered units of a title, by content kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaEntries {
    Episodes { episodes: Vec<Episode> },
    Chapters { chapters: Vec<Chapter> },
}

impl MediaEntries {
    pub fn len(&self) -> usize {
        match self {
            MediaEntries::Episodes { episodes } => episodes.len(),
            MediaEntries::Chapters { chapters } => chapters.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDetails {
    #[serde(flatten)]
    pub item: SearchResultItem,
    #[serde(flatten)]
    pub entries: MediaEntries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSource {
    pub url: String,
    pub quality: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtitle {
    pub url: String,
    pub language: String,
    pub label: String,
}

/// Resolved playable sources for one episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSources {
    pub sources: Vec<VideoSource>,
    #[serde(default)]
    pub subtitles: Vec<Subtitle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterImage {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Resolved page images for one chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterImages {
    pub images: Vec<ChapterImage>,
}
