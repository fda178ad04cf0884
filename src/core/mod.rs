//! Core application layer
//!
//! This module provides the ambient pieces shared by the runtime and the
//! command surface:
//! - Configuration management
//! - Structured logging system
//! - Error handling and type system

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, ContextPolicy, RuntimeConfig};
pub use error::{ErrorResponse, KaguraError, Result};
pub use logging::Logger;
