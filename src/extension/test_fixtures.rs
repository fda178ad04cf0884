//! Extension scripts shared by the runtime tests

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::bridge::{BridgeError, FetchRequest, FetchResponse, HttpFetcher};

/// Anime provider that lists its catalogue through `fetch`
pub const ANIME_EXTENSION: &str = r#"
const extension = {
  id: "fixture.anime",
  name: "Fixture Anime",
  version: "1.0.0",
  type: "anime",
  baseUrl: "https://anime.test",

  search(query, page, allowAdult) {
    const res = JSON.parse(fetch(`${this.baseUrl}/search?q=${encodeURIComponent(query)}&page=${page}`));
    const data = JSON.parse(res.body);
    return {
      results: data.items.map((item) => ({ id: item.slug, title: item.name, genres: item.genres })),
      hasNextPage: page < 2,
    };
  },

  discover(page, sortType, genres, allowAdult) {
    return this.search(sortType || "popular", page, allowAdult);
  },

  getDetails(id, allowAdult) {
    return {
      id,
      title: `Title ${id}`,
      year: 2020,
      episodes: [
        { id: `${id}-1`, number: 1 },
        { id: `${id}-2`, number: 2, title: "Second" },
        { number: 3 },
      ],
    };
  },

  async resolveSources(episodeId) {
    await Promise.resolve();
    return {
      sources: [{ url: `https://cdn.anime.test/${episodeId}.m3u8`, quality: "1080p", type: "hls" }],
      subtitles: [{ url: `https://cdn.anime.test/${episodeId}.vtt`, language: "en", label: "English" }],
    };
  },
};
"#;

/// Manga provider written as a CommonJS-style module
pub const MANGA_EXTENSION: &str = r#"
module.exports = {
  name: "Fixture Manga",
  version: "0.3.0",
  type: "manga",
  language: "ja",

  search(query, page) {
    return { results: [{ id: "m1", title: `Manga ${query}` }], hasNextPage: false };
  },
  discover(page) {
    return { results: [], hasNextPage: false };
  },
  getDetails(id) {
    return { id, title: "Manga", chapters: [{ id: "c1", number: 1 }, { id: "c2", number: 1.5 }] };
  },
  resolveChapterImages(chapterId) {
    return { images: [{ url: `https://img.test/${chapterId}/1.jpg`, page: 1 }, { page: 2 }] };
  },
};
"#;

/// Throws synchronously from `search`, rejects from `discover`
pub const THROWING_EXTENSION: &str = r#"
const extension = {
  name: "Throwing",
  version: "1.0.0",
  type: "anime",
  search() { throw new TypeError("provider layout changed"); },
  discover() { return Promise.reject(new Error("rejected")); },
  getDetails() { return fetch("https://unreachable.test/"); },
  resolveSources() { return null; },
};
"#;

/// Keeps module-level state across calls
pub const COUNTER_EXTENSION: &str = r#"
let calls = 0;
const extension = {
  name: "Counter",
  version: "1.0.0",
  type: "anime",
  search() { calls += 1; return { results: [{ id: `call-${calls}`, title: "c" }], hasNextPage: false }; },
  discover() { return { results: [], hasNextPage: false }; },
  getDetails(id) { return { id, title: "t" }; },
  resolveSources() { return { sources: [] }; },
};
"#;

/// `search` never returns
pub const HANGING_EXTENSION: &str = r#"
const extension = {
  name: "Hanging",
  version: "1.0.0",
  type: "anime",
  search() { while (true) {} },
  discover() { return { results: [], hasNextPage: false }; },
  getDetails(id) { return { id, title: "t" }; },
  resolveSources() { return { sources: [] }; },
};
"#;

/// `search` allocates until the heap ceiling is hit
pub const ALLOCATING_EXTENSION: &str = r#"
const extension = {
  name: "Allocating",
  version: "1.0.0",
  type: "anime",
  search() {
    const hoard = [];
    while (true) hoard.push(new Array(1000000).fill(1.5));
  },
  discover() { return { results: [], hasNextPage: false }; },
  getDetails(id) { return { id, title: "t" }; },
  resolveSources() { return { sources: [] }; },
};
"#;

/// Fetches in a loop while the script is still being evaluated
pub const FETCH_LOOP_SCRIPT: &str = r#"
while (true) { fetch("https://tick.test/"); }
"#;

/// Returns malformed shapes
pub const MALFORMED_EXTENSION: &str = r#"
const extension = {
  name: "Malformed",
  version: "1.0.0",
  type: "anime",
  search() { return { results: "not-an-array" }; },
  discover() { return { results: [{ title: "x" }], hasNextPage: true }; },
  getDetails(id) { return { id, title: "t", episodes: "none" }; },
  resolveSources() { return { sources: [{ url: "https://cdn.test/a" }] }; },
};
"#;

/// Canned catalogue for the anime fixture
pub struct CatalogueFetcher;

#[async_trait]
impl HttpFetcher for CatalogueFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, BridgeError> {
        if request.url.contains("unreachable") {
            return Err(BridgeError::Connection("connection refused".into()));
        }
        Ok(FetchResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: r#"{"items":[
                {"slug":"a","name":"Alpha","genres":["Action",7]},
                {"slug":"b","name":"Beta"},
                {"slug":"a","name":"Alpha again"},
                {"name":"No slug"}
            ]}"#
            .into(),
            error: None,
        })
    }
}

/// Answers like `CatalogueFetcher`, after a delay
pub struct SlowFetcher(pub Duration);

#[async_trait]
impl HttpFetcher for SlowFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, BridgeError> {
        tokio::time::sleep(self.0).await;
        CatalogueFetcher.fetch(request).await
    }
}

/// Counts the requests it answers
#[derive(Clone, Default)]
pub struct CountingFetcher(pub Arc<AtomicUsize>);

impl CountingFetcher {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpFetcher for CountingFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, BridgeError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        CatalogueFetcher.fetch(request).await
    }
}
