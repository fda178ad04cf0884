//! Extension type definitions
//!
//! Identity, content kind, capability set and lifecycle state of a loaded
//! extension, plus the metadata view handed out by the registry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};

/// Registry key of a loaded extension
pub type ExtensionId = String;

/// Which kind of content a provider serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Anime,
    Manga,
}

impl ContentKind {
    /// The resolution method this kind must implement
    pub fn resolution_capability(self) -> Capability {
        match self {
            ContentKind::Anime => Capability::ResolveSources,
            ContentKind::Manga => Capability::ResolveChapterImages,
        }
    }

    /// Every capability an extension of this kind must implement
    pub fn required_capabilities(self) -> [Capability; 4] {
        [
            Capability::Search,
            Capability::Discover,
            Capability::GetDetails,
            self.resolution_capability(),
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Anime => "anime",
            ContentKind::Manga => "manga",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anime" => Ok(ContentKind::Anime),
            "manga" => Ok(ContentKind::Manga),
            other => Err(format!("type must be 'anime' or 'manga', got '{}'", other)),
        }
    }
}

/// A method an extension script can implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Search,
    Discover,
    GetDetails,
    ResolveSources,
    ResolveChapterImages,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Search,
        Capability::Discover,
        Capability::GetDetails,
        Capability::ResolveSources,
        Capability::ResolveChapterImages,
    ];

    /// Name of the method on the script's `extension` object
    pub fn method_name(self) -> &'static str {
        match self {
            Capability::Search => "search",
            Capability::Discover => "discover",
            Capability::GetDetails => "getDetails",
            Capability::ResolveSources => "resolveSources",
            Capability::ResolveChapterImages => "resolveChapterImages",
        }
    }

    pub fn from_method_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.method_name() == name)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method_name())
    }
}

/// What a script declares about itself once evaluated
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    /// Identifier the plugin author declared, if any
    pub source_id: Option<String>,
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub language: String,
    pub base_url: String,
    pub capabilities: BTreeSet<Capability>,
}

impl ExtensionManifest {
    /// Build a manifest from the declaration object produced by the script.
    ///
    /// Expects `{id?, name, version, type, language?, baseUrl?, methods: [..]}`.
    pub fn from_declaration(declaration: &Value) -> Result<Self, String> {
        let obj = declaration
            .as_object()
            .ok_or_else(|| "extension declaration is not an object".to_string())?;

        let required = |key: &str| -> Result<String, String> {
            match obj.get(key) {
                Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
                Some(Value::String(_)) => Err(format!("'{}' must not be empty", key)),
                Some(_) => Err(format!("'{}' must be a string", key)),
                None => Err(format!("missing required field '{}'", key)),
            }
        };
        let optional = |key: &str| -> Result<Option<String>, String> {
            match obj.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(format!("'{}' must be a string", key)),
            }
        };

        let name = required("name")?;
        let version = required("version")?;
        let kind: ContentKind = required("type")?.parse()?;
        let language = optional("language")?.unwrap_or_else(|| "en".to_string());
        let base_url = optional("baseUrl")?.unwrap_or_default();
        let source_id = optional("id")?.filter(|id| !id.is_empty());

        let capabilities: BTreeSet<Capability> = obj
            .get("methods")
            .and_then(Value::as_array)
            .map(|methods| {
                methods
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(Capability::from_method_name)
                    .collect()
            })
            .unwrap_or_default();

        let missing: Vec<&str> = kind
            .required_capabilities()
            .iter()
            .filter(|c| !capabilities.contains(c))
            .map(|c| c.method_name())
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "{} extension is missing required method(s): {}",
                kind,
                missing.join(", ")
            ));
        }

        Ok(Self {
            source_id,
            name,
            version,
            kind,
            language,
            base_url,
            capabilities,
        })
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Lifecycle state of a context slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SlotState {
    Unloaded = 0,
    Loading = 1,
    Ready = 2,
    Executing = 3,
    Failed = 4,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SlotState::Loading,
            2 => SlotState::Ready,
            3 => SlotState::Executing,
            4 => SlotState::Failed,
            _ => SlotState::Unloaded,
        }
    }
}

/// Lock-free cell holding a [`SlotState`]
#[derive(Debug)]
pub struct AtomicSlotState(AtomicU8);

impl AtomicSlotState {
    pub fn new(state: SlotState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> SlotState {
        SlotState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store a new state, returning the previous one
    pub fn set(&self, state: SlotState) -> SlotState {
        SlotState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }
}

/// Call counters for one extension
#[derive(Debug, Default)]
pub struct SlotStats {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    timed_out_calls: AtomicU64,
    last_call_timestamp: AtomicI64,
}

impl SlotStats {
    pub fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.successful_calls.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_failure(&self, timed_out: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timed_out_calls.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
    }

    fn touch(&self) {
        self.last_call_timestamp
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_call_timestamp.load(Ordering::Relaxed);
        StatsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            timed_out_calls: self.timed_out_calls.load(Ordering::Relaxed),
            last_call_timestamp: (last != 0).then_some(last),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub timed_out_calls: u64,
    pub last_call_timestamp: Option<i64>,
}

/// Metadata view of a loaded extension. Never carries live context handles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionMetadata {
    pub id: ExtensionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub language: String,
    pub base_url: String,
    pub capabilities: BTreeSet<Capability>,
    pub state: SlotState,
    pub generation: u64,
    pub source_hash: String,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
    pub stats: StatsSnapshot,
}
