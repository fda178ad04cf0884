//! Content Contract Normalizer
//!
//! Turns raw plugin output into canonical content. A wrong top-level shape is a
//! hard failure; an item missing a required field is dropped. Optional fields
//! of the wrong type are treated as absent. Nothing is coerced.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

use super::content::{
    Chapter, ChapterImage, ChapterImages, Episode, MediaDetails, MediaEntries, SearchPage,
    SearchResultItem, Subtitle, VideoSource, VideoSources,
};
use super::types::ContentKind;

/// Why a response failed the top-level shape check
pub type Violation = String;

/// Normalize a `search` / `discover` response: `{results: [..], hasNextPage: bool}`
pub fn search_page(raw: &Value) -> Result<SearchPage, Violation> {
    let obj = expect_object(raw, "response")?;
    let items = expect_array(obj, "results")?;
    let has_next_page = obj
        .get("hasNextPage")
        .and_then(Value::as_bool)
        .ok_or_else(|| "'hasNextPage' must be a boolean".to_string())?;

    let mut seen = HashSet::new();
    let results: Vec<SearchResultItem> = items
        .iter()
        .filter_map(|item| item.as_object().and_then(search_item))
        .filter(|item| seen.insert(item.id.clone()))
        .collect();

    log_dropped("results", items.len(), results.len());
    Ok(SearchPage {
        results,
        has_next_page,
    })
}

/// Normalize a `getDetails` response for an extension of `kind`
pub fn media_details(raw: &Value, kind: ContentKind) -> Result<MediaDetails, Violation> {
    let obj = expect_object(raw, "response")?;
    let item = search_item(obj)
        .ok_or_else(|| "details must carry a non-empty 'id' and 'title'".to_string())?;

    let entries = match kind {
        ContentKind::Anime => {
            let raw_entries = optional_array(obj, "episodes")?;
            let episodes: Vec<Episode> = raw_entries
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|e| {
                    Some(Episode {
                        id: required_string(e, "id")?,
                        number: e.get("number")?.as_f64()?,
                        title: optional_string(e, "title"),
                        thumbnail: optional_string(e, "thumbnail"),
                    })
                })
                .collect();
            log_dropped("episodes", raw_entries.len(), episodes.len());
            MediaEntries::Episodes { episodes }
        }
        ContentKind::Manga => {
            let raw_entries = optional_array(obj, "chapters")?;
            let chapters: Vec<Chapter> = raw_entries
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|c| {
                    Some(Chapter {
                        id: required_string(c, "id")?,
                        number: c.get("number")?.as_f64()?,
                        title: optional_string(c, "title"),
                    })
                })
                .collect();
            log_dropped("chapters", raw_entries.len(), chapters.len());
            MediaEntries::Chapters { chapters }
        }
    };

    Ok(MediaDetails { item, entries })
}

/// Normalize a `resolveSources` response: `{sources: [..], subtitles?: [..]}`
pub fn video_sources(raw: &Value) -> Result<VideoSources, Violation> {
    let obj = expect_object(raw, "response")?;
    let raw_sources = expect_array(obj, "sources")?;
    let raw_subtitles = optional_array(obj, "subtitles")?;

    let sources: Vec<VideoSource> = raw_sources
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|s| {
            Some(VideoSource {
                url: required_string(s, "url")?,
                quality: required_string(s, "quality")?,
                source_type: required_string(s, "type")?,
                server: optional_string(s, "server"),
            })
        })
        .collect();

    let subtitles: Vec<Subtitle> = raw_subtitles
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|s| {
            Some(Subtitle {
                url: required_string(s, "url")?,
                language: required_string(s, "language")?,
                label: required_string(s, "label")?,
            })
        })
        .collect();

    log_dropped("sources", raw_sources.len(), sources.len());
    log_dropped("subtitles", raw_subtitles.len(), subtitles.len());
    Ok(VideoSources { sources, subtitles })
}

/// Normalize a `resolveChapterImages` response: `{images: [..]}`
pub fn chapter_images(raw: &Value) -> Result<ChapterImages, Violation> {
    let obj = expect_object(raw, "response")?;
    let raw_images = expect_array(obj, "images")?;

    let images: Vec<ChapterImage> = raw_images
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|i| {
            Some(ChapterImage {
                url: required_string(i, "url")?,
                page: i
                    .get("page")
                    .and_then(Value::as_u64)
                    .and_then(|p| u32::try_from(p).ok()),
            })
        })
        .collect();

    log_dropped("images", raw_images.len(), images.len());
    Ok(ChapterImages { images })
}

fn search_item(obj: &Map<String, Value>) -> Option<SearchResultItem> {
    Some(SearchResultItem {
        id: required_string(obj, "id")?,
        title: required_string(obj, "title")?,
        cover_url: optional_string(obj, "coverUrl"),
        description: optional_string(obj, "description"),
        year: obj
            .get("year")
            .and_then(Value::as_i64)
            .and_then(|y| i32::try_from(y).ok()),
        status: optional_string(obj, "status"),
        rating: obj.get("rating").and_then(Value::as_f64),
        genres: obj
            .get("genres")
            .and_then(Value::as_array)
            .map(|genres| {
                genres
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

fn expect_object<'a>(raw: &'a Value, what: &str) -> Result<&'a Map<String, Value>, Violation> {
    raw.as_object()
        .ok_or_else(|| format!("{} must be an object, got {}", what, type_name(raw)))
}

fn expect_array<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], Violation> {
    match obj.get(key) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(format!("'{}' must be an array, got {}", key, type_name(other))),
        None => Err(format!("missing '{}'", key)),
    }
}

/// Absent or null is an empty list; anything else must be an array
fn optional_array<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], Violation> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(format!("'{}' must be an array, got {}", key, type_name(other))),
    }
}

fn required_string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn log_dropped(what: &str, before: usize, after: usize) {
    if after < before {
        debug!("Dropped {} malformed {} entr{}", before - after, what, if before - after == 1 { "y" } else { "ies" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_search_page_wrong_top_level_shape() {
        assert!(search_page(&json!({"results": "not-an-array"})).is_err());
        assert!(search_page(&json!({"results": []})).is_err());
        assert!(search_page(&json!({"results": [], "hasNextPage": "yes"})).is_err());
        assert!(search_page(&json!([])).is_err());
        assert!(search_page(&Value::Null).is_err());
    }

    #[test]
    fn test_search_page_drops_item_without_id() {
        let page = search_page(&json!({"results": [{"title": "x"}], "hasNextPage": true})).unwrap();
        assert!(page.results.is_empty());
        assert!(page.has_next_page);
    }

    #[test]
    fn test_search_page_defaults_and_strict_types() {
        let page = search_page(&json!({
            "results": [
                {"id": "a", "title": "Alpha", "year": "2020", "rating": 8.5, "genres": ["Action", 3, null]},
                {"id": "b", "title": "Beta", "year": 1999, "coverUrl": 42},
                {"id": "", "title": "Empty id"},
                {"id": 7, "title": "Numeric id"},
                "not an object"
            ],
            "hasNextPage": false
        }))
        .unwrap();

        assert_eq!(page.results.len(), 2);
        let alpha = &page.results[0];
        assert_eq!(alpha.year, None);
        assert_eq!(alpha.rating, Some(8.5));
        assert_eq!(alpha.genres, vec!["Action".to_string()]);

        let beta = &page.results[1];
        assert_eq!(beta.year, Some(1999));
        assert_eq!(beta.cover_url, None);
        assert!(beta.genres.is_empty());
    }

    #[test]
    fn test_search_page_keeps_first_duplicate() {
        let page = search_page(&json!({
            "results": [{"id": "a", "title": "First"}, {"id": "a", "title": "Second"}],
            "hasNextPage": false
        }))
        .unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].title, "First");
    }

    #[test]
    fn test_media_details_by_kind() {
        let raw = json!({
            "id": "show",
            "title": "Show",
            "episodes": [{"id": "e1", "number": 1}, {"id": "e2"}, {"number": 3}],
            "chapters": [{"id": "c1", "number": 1}]
        });

        let anime = media_details(&raw, ContentKind::Anime).unwrap();
        assert_eq!(anime.item.id, "show");
        match anime.entries {
            MediaEntries::Episodes { episodes } => {
                assert_eq!(episodes.len(), 1);
                assert_eq!(episodes[0].id, "e1");
            }
            other => panic!("unexpected {:?}", other),
        }

        let manga = media_details(&raw, ContentKind::Manga).unwrap();
        assert_eq!(manga.entries.len(), 1);
    }

    #[test]
    fn test_media_details_violations() {
        assert!(media_details(&json!({"title": "no id"}), ContentKind::Anime).is_err());
        assert!(media_details(&json!({"id": "x", "title": "t", "episodes": "none"}), ContentKind::Anime).is_err());

        let empty = media_details(&json!({"id": "x", "title": "t"}), ContentKind::Manga).unwrap();
        assert!(empty.entries.is_empty());
    }

    #[test]
    fn test_video_sources() {
        let sources = video_sources(&json!({
            "sources": [
                {"url": "https://cdn.test/a.m3u8", "quality": "720p", "type": "hls", "server": "main"},
                {"url": "https://cdn.test/b.mp4", "quality": "480p"}
            ]
        }))
        .unwrap();
        assert_eq!(sources.sources.len(), 1);
        assert_eq!(sources.sources[0].server.as_deref(), Some("main"));
        assert!(sources.subtitles.is_empty());

        assert!(video_sources(&json!({"subtitles": []})).is_err());
        assert!(video_sources(&json!({"sources": [], "subtitles": {}})).is_err());
    }

    #[test]
    fn test_chapter_images() {
        let images = chapter_images(&json!({
            "images": [{"url": "https://img.test/1.jpg", "page": 1}, {"url": "https://img.test/2.jpg", "page": -2}, {"page": 3}]
        }))
        .unwrap();
        assert_eq!(images.images.len(), 2);
        assert_eq!(images.images[0].page, Some(1));
        assert_eq!(images.images[1].page, None);

        assert!(chapter_images(&json!({"images": null})).is_err());
    }

    fn arb_item() -> impl Strategy<Value = Value> {
        let id = prop_oneof![
            Just(Value::Null),
            Just(json!("")),
            Just(json!(12)),
            "[a-d]{1,2}".prop_map(Value::from),
        ];
        let title = prop_oneof![Just(Value::Null), "[a-z ]{0,6}".prop_map(Value::from)];
        (id, title).prop_map(|(id, title)| {
            let mut obj = Map::new();
            if !id.is_null() {
                obj.insert("id".into(), id);
            }
            if !title.is_null() {
                obj.insert("title".into(), title);
            }
            Value::Object(obj)
        })
    }

    proptest! {
        #[test]
        fn prop_surviving_items_have_unique_non_empty_ids(
            items in prop::collection::vec(arb_item(), 0..20),
            has_next in any::<bool>(),
        ) {
            let page = search_page(&json!({"results": items, "hasNextPage": has_next})).unwrap();

            prop_assert_eq!(page.has_next_page, has_next);
            let mut seen = HashSet::new();
            for item in &page.results {
                prop_assert!(!item.id.trim().is_empty());
                prop_assert!(seen.insert(item.id.clone()));
            }
        }
    }
}
