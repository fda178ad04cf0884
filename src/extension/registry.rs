//! Extension Registry
//!
//! Process-wide directory of loaded extensions. The map is the only structure
//! mutated by concurrent callers; every mutation goes through its `RwLock`.
//! Slots are handed out as `Arc`s so a call in flight is unaffected by a
//! concurrent unload or reload.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::pool::ContextSlot;
use super::types::{ExtensionId, ExtensionMetadata};
use crate::core::error::{KaguraError, Result};

#[derive(Default)]
pub struct ExtensionRegistry {
    slots: RwLock<HashMap<ExtensionId, Arc<ContextSlot>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly loaded slot under its own id
    pub async fn register(&self, slot: Arc<ContextSlot>) -> ExtensionMetadata {
        let metadata = slot.metadata();
        self.slots.write().await.insert(slot.id().to_string(), slot);
        info!(extension_id = %metadata.id, name = %metadata.name, "Extension registered");
        metadata
    }

    /// Swap the slot at an existing id, shutting the previous one down
    pub async fn replace(&self, slot: Arc<ContextSlot>) -> Result<ExtensionMetadata> {
        let metadata = slot.metadata();
        let previous = {
            let mut slots = self.slots.write().await;
            let entry = slots
                .get_mut(slot.id())
                .ok_or_else(|| KaguraError::ExtensionNotFound(slot.id().to_string()))?;
            std::mem::replace(entry, slot)
        };
        previous.shutdown();
        info!(extension_id = %metadata.id, version = %metadata.version, "Extension reloaded");
        Ok(metadata)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let slot = self
            .slots
            .write()
            .await
            .remove(id)
            .ok_or_else(|| KaguraError::ExtensionNotFound(id.to_string()))?;
        slot.shutdown();
        info!(extension_id = %id, "Extension unloaded");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Arc<ContextSlot>> {
        self.slots
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| KaguraError::ExtensionNotFound(id.to_string()))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.slots.read().await.contains_key(id)
    }

    /// Metadata for every loaded extension, oldest first
    pub async fn list(&self) -> Vec<ExtensionMetadata> {
        let mut all: Vec<ExtensionMetadata> = self
            .slots
            .read()
            .await
            .values()
            .map(|slot| slot.metadata())
            .collect();
        all.sort_by(|a, b| a.loaded_at.cmp(&b.loaded_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    /// Drop every slot, terminating their contexts
    pub async fn clear(&self) {
        let drained: Vec<Arc<ContextSlot>> = self.slots.write().await.drain().map(|(_, s)| s).collect();
        for slot in &drained {
            slot.shutdown();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "All extensions unloaded");
        }
    }
}
