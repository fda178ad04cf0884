use crate::extension::ExtensionMetadata;
use serde::{Deserialize, Serialize};

// Extension management API models

/// Body of `POST /api/extensions` and `PUT /api/extensions/:id`
#[derive(Debug, Deserialize)]
pub struct ExtensionSourceRequest {
    /// Plugin script text
    pub code: String,
}

/// Response for the extension list
#[derive(Debug, Serialize)]
pub struct ExtensionsListResponse {
    pub extensions: Vec<ExtensionMetadata>,
    pub total: usize,
}

impl From<Vec<ExtensionMetadata>> for ExtensionsListResponse {
    fn from(extensions: Vec<ExtensionMetadata>) -> Self {
        Self {
            total: extensions.len(),
            extensions,
        }
    }
}
