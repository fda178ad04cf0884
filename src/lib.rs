//! Kagura Extension Runtime
//!
//! This library hosts untrusted JavaScript content-provider plugins in
//! isolated script contexts and exposes their capabilities to a presentation
//! layer through a typed command surface.

pub mod api;
pub mod core;
pub mod extension;

// Re-export commonly used types
pub use api::ApiServer;
pub use crate::core::{Config, KaguraError};
pub use extension::{ContentKind, Dispatcher, ExtensionMetadata};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
