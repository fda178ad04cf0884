//! Execution Context Pool
//!
//! Owns the script contexts behind every loaded extension. Two policies:
//!
//! - `serialize`: one long-lived context per extension behind a FIFO mutex.
//!   Calls to one extension queue; calls to different extensions run in parallel.
//! - `recreate`: a fresh context is spawned from the source text for every call
//!   and torn down afterwards.
//!
//! Every call carries a deadline covering (re)initialization, script execution
//! and any bridge fetches it makes. On expiry the context is terminated, the
//! slot is marked `Failed` and the caller gets `ExtensionTimeout`. A failed slot
//! is reinitialized lazily on its next call.
//!
//! The slot state is `Executing` while any call is in flight. Under `recreate`
//! several calls can overlap; only the last one to finish settles the state, so
//! a timed-out call does not flip the slot to `Failed` under a sibling that is
//! still running.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::bridge::CapabilityBridge;
use super::js_runtime::ScriptError;
use super::types::{
    AtomicSlotState, Capability, ExtensionId, ExtensionManifest, ExtensionMetadata, SlotState,
    SlotStats,
};
use super::worker::ContextHandle;
use crate::core::config::ContextPolicy;
use crate::core::error::{KaguraError, Result};

/// Exception name the glue gives bridge failures
const NETWORK_BRIDGE_ERROR: &str = "NetworkBridgeError";

/// Heap ceiling per context unless configured otherwise
pub const DEFAULT_MAX_HEAP_BYTES: usize = 256 * 1024 * 1024;

/// One loaded extension: its source, declaration and execution context
pub struct ContextSlot {
    id: ExtensionId,
    source: Arc<str>,
    source_hash: String,
    manifest: ExtensionManifest,
    loaded_at: chrono::DateTime<chrono::Utc>,
    state: AtomicSlotState,
    generation: AtomicU64,
    stats: SlotStats,
    in_flight: AtomicUsize,
    /// Live context under the serialize policy; always `None` under recreate
    context: Mutex<Option<ContextHandle>>,
}

impl ContextSlot {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    pub fn state(&self) -> SlotState {
        self.state.get()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn metadata(&self) -> ExtensionMetadata {
        ExtensionMetadata {
            id: self.id.clone(),
            source_id: self.manifest.source_id.clone(),
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            kind: self.manifest.kind,
            language: self.manifest.language.clone(),
            base_url: self.manifest.base_url.clone(),
            capabilities: self.manifest.capabilities.clone(),
            state: self.state(),
            generation: self.generation(),
            source_hash: self.source_hash.clone(),
            loaded_at: self.loaded_at,
            stats: self.stats.snapshot(),
        }
    }

    fn transition(&self, to: SlotState) {
        // an unloaded slot never comes back, even if a late call finishes on it
        if self.state.get() == SlotState::Unloaded {
            return;
        }
        let from = self.state.set(to);
        if from != to {
            debug!(extension_id = %self.id, from = ?from, to = ?to, "Slot state changed");
        }
    }

    /// Release the live context. A call still in flight keeps the context
    /// until it returns; it is terminated when the last reference drops.
    pub fn shutdown(&self) {
        if let Ok(mut context) = self.context.try_lock() {
            context.take();
        }
        self.transition(SlotState::Unloaded);
    }
}

/// One call in flight on a slot.
///
/// Dropping it ends the call; the slot takes the settled state only when no
/// other call is still running. A call abandoned by its caller settles `Ready`.
struct InFlight<'a> {
    slot: &'a ContextSlot,
    settled: SlotState,
}

impl<'a> InFlight<'a> {
    fn enter(slot: &'a ContextSlot) -> Self {
        slot.in_flight.fetch_add(1, Ordering::AcqRel);
        Self {
            slot,
            settled: SlotState::Ready,
        }
    }

    fn settle(mut self, state: SlotState) {
        self.settled = state;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.slot.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.slot.transition(self.settled);
        }
    }
}

/// Hex SHA-256 of an extension's source text
pub fn source_hash(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

pub struct ContextPool {
    bridge: CapabilityBridge,
    policy: ContextPolicy,
    call_timeout: Duration,
    max_heap_bytes: usize,
}

impl ContextPool {
    pub fn new(bridge: CapabilityBridge, policy: ContextPolicy, call_timeout: Duration) -> Self {
        Self {
            bridge,
            policy,
            call_timeout,
            max_heap_bytes: DEFAULT_MAX_HEAP_BYTES,
        }
    }

    pub fn with_max_heap_bytes(mut self, max_heap_bytes: usize) -> Self {
        self.max_heap_bytes = max_heap_bytes;
        self
    }

    /// Evaluate `source` in a new context and build a `Ready` slot for it.
    ///
    /// Under the serialize policy the context is kept for subsequent calls.
    pub async fn load(&self, id: ExtensionId, source: String) -> Result<Arc<ContextSlot>> {
        let source: Arc<str> = source.into();
        let started = Instant::now();
        debug!(extension_id = %id, "Loading extension");

        let spawned = tokio::time::timeout(
            self.call_timeout,
            ContextHandle::spawn(id.clone(), source.clone(), self.bridge.clone(), self.max_heap_bytes),
        )
        .await;

        let handle = match spawned {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(KaguraError::ExtensionLoad {
                    extension_id: Some(id),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(KaguraError::ExtensionLoad {
                    extension_id: Some(id),
                    message: format!(
                        "script did not finish evaluating within {}ms",
                        self.call_timeout.as_millis()
                    ),
                })
            }
        };

        let manifest = handle.manifest().clone();
        let kept = match self.policy {
            ContextPolicy::Serialize => Some(handle),
            ContextPolicy::Recreate => None,
        };

        let slot = Arc::new(ContextSlot {
            source_hash: source_hash(&source),
            id,
            source,
            manifest,
            loaded_at: chrono::Utc::now(),
            state: AtomicSlotState::new(SlotState::Ready),
            generation: AtomicU64::new(1),
            stats: SlotStats::default(),
            in_flight: AtomicUsize::new(0),
            context: Mutex::new(kept),
        });

        info!(
            extension_id = %slot.id,
            name = %slot.manifest.name,
            kind = %slot.manifest.kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Extension loaded"
        );
        Ok(slot)
    }

    /// Run `capability` on the slot's context under the configured policy and
    /// return the raw value the plugin produced
    pub async fn invoke(
        &self,
        slot: &ContextSlot,
        operation: &str,
        capability: Capability,
        args: Vec<Value>,
    ) -> Result<Value> {
        match self.policy {
            ContextPolicy::Serialize => {
                let mut context = slot.context.lock().await;
                self.call_in(slot, &mut context, operation, capability, args)
                    .await
            }
            ContextPolicy::Recreate => {
                let mut fresh = None;
                self.call_in(slot, &mut fresh, operation, capability, args)
                    .await
            }
        }
    }

    async fn call_in(
        &self,
        slot: &ContextSlot,
        context: &mut Option<ContextHandle>,
        operation: &str,
        capability: Capability,
        args: Vec<Value>,
    ) -> Result<Value> {
        let started = Instant::now();
        let call = InFlight::enter(slot);

        let outcome = tokio::time::timeout(self.call_timeout, async {
            if context.is_none() {
                *context = Some(self.spawn_context(slot).await?);
            }
            let handle = context
                .as_ref()
                .ok_or_else(|| ScriptError::Crashed("no context available".into()))?;
            slot.transition(SlotState::Executing);
            handle.invoke(capability, args).await
        })
        .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(value)) => {
                call.settle(SlotState::Ready);
                slot.stats.record_success();
                debug!(extension_id = %slot.id, operation, elapsed_ms, "Extension call completed");
                Ok(value)
            }
            Ok(Err(ScriptError::Exception { name, message })) => {
                call.settle(SlotState::Ready);
                slot.stats.record_failure(false);
                warn!(extension_id = %slot.id, operation, elapsed_ms, "Extension threw {}: {}", name, message);

                if name == NETWORK_BRIDGE_ERROR {
                    Err(KaguraError::NetworkBridge {
                        extension_id: slot.id.clone(),
                        operation: operation.to_string(),
                        message,
                    })
                } else {
                    Err(KaguraError::ExtensionRuntime {
                        extension_id: slot.id.clone(),
                        operation: operation.to_string(),
                        message: format!("{}: {}", name, message),
                    })
                }
            }
            Ok(Err(e)) => {
                context.take();
                call.settle(SlotState::Failed);
                slot.stats.record_failure(false);
                warn!(extension_id = %slot.id, operation, elapsed_ms, "Extension context failed: {}", e);

                Err(KaguraError::ExtensionRuntime {
                    extension_id: slot.id.clone(),
                    operation: operation.to_string(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                if let Some(handle) = context.take() {
                    handle.terminate();
                }
                call.settle(SlotState::Failed);
                slot.stats.record_failure(true);
                warn!(
                    extension_id = %slot.id,
                    operation,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "Extension call timed out, context terminated"
                );

                Err(KaguraError::ExtensionTimeout {
                    extension_id: slot.id.clone(),
                    operation: operation.to_string(),
                    timeout_ms: self.call_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Create a new context generation for `slot` from its source text
    async fn spawn_context(&self, slot: &ContextSlot) -> std::result::Result<ContextHandle, ScriptError> {
        // per-call contexts under recreate are not a slot re-initialization
        if self.policy == ContextPolicy::Serialize {
            slot.transition(SlotState::Loading);
        }
        let handle = ContextHandle::spawn(
            slot.id.clone(),
            slot.source.clone(),
            self.bridge.clone(),
            self.max_heap_bytes,
        )
        .await?;
        let generation = slot.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(extension_id = %slot.id, generation, "Context created");
        Ok(handle)
    }
}
