pub mod content;
pub mod extensions;

pub use content::*;
pub use extensions::*;

use crate::extension::Dispatcher;
use std::sync::Arc;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}
