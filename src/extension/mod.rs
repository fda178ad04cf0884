//! Extension runtime
//!
//! This module hosts untrusted content-provider scripts and exposes them
//! through a typed command surface:
//! - Capability bridge giving scripts a synchronous `fetch` over async I/O
//! - Execution context pool with serialize and recreate policies
//! - Content contract normalizer for untrusted plugin output
//! - Registry of loaded extensions and the command dispatcher on top of it

pub mod bridge;
pub mod content;
pub mod dispatcher;
pub mod js_bindings;
pub mod js_runtime;
pub mod normalizer;
pub mod pool;
pub mod registry;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use bridge::{BridgeError, CapabilityBridge, FetchRequest, FetchResponse, HttpFetcher, ReqwestFetcher};
pub use content::{
    Chapter, ChapterImage, ChapterImages, ContentQuery, Episode, MediaDetails, MediaEntries, SearchPage,
    SearchResultItem, Subtitle, VideoSource, VideoSources,
};
pub use dispatcher::Dispatcher;
pub use pool::{ContextPool, ContextSlot};
pub use registry::ExtensionRegistry;
pub use types::{Capability, ContentKind, ExtensionId, ExtensionManifest, ExtensionMetadata, SlotState, StatsSnapshot};
