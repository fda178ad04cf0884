//! Context worker thread
//!
//! A `JsRuntime` is not `Send`, so every script context runs on a dedicated OS
//! thread with its own current-thread Tokio runtime. The rest of the host talks
//! to it through a command channel and can interrupt it at any time through the
//! isolate's thread-safe handle.

use deno_core::v8;
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::bridge::CapabilityBridge;
use super::js_bindings::BridgeContext;
use super::js_runtime::{ScriptContext, ScriptError};
use super::types::{Capability, ExtensionId, ExtensionManifest};

/// Command sent to a context worker thread
enum ContextCommand {
    Invoke {
        capability: Capability,
        args: Vec<Value>,
        resp: oneshot::Sender<Result<Value, ScriptError>>,
    },
}

/// Interrupts a context: releases a blocked bridge call and terminates script execution
#[derive(Clone)]
struct Interrupt {
    isolate: v8::IsolateHandle,
    cancel: CancellationToken,
}

impl Interrupt {
    fn fire(&self) {
        self.cancel.cancel();
        self.isolate.terminate_execution();
    }
}

type Booted = Result<v8::IsolateHandle, ScriptError>;

/// Interrupts a worker that is still starting unless disarmed.
///
/// Owns the boot channel, so a spawn future dropped after the worker published
/// its isolate handle but before that handle was read still stops the worker.
struct StartupGuard {
    cancel: CancellationToken,
    booted: oneshot::Receiver<Booted>,
    isolate: Option<v8::IsolateHandle>,
    armed: bool,
}

impl StartupGuard {
    async fn booted(&mut self) -> Result<(), ScriptError> {
        let isolate = (&mut self.booted)
            .await
            .map_err(|_| ScriptError::Crashed("worker exited during startup".into()))??;
        self.isolate = Some(isolate);
        Ok(())
    }

    fn disarm(mut self) -> Result<Interrupt, ScriptError> {
        self.armed = false;
        let isolate = self
            .isolate
            .take()
            .ok_or_else(|| ScriptError::Crashed("worker never published its isolate".into()))?;
        Ok(Interrupt {
            isolate,
            cancel: self.cancel.clone(),
        })
    }
}

impl Drop for StartupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cancel.cancel();
        let isolate = self
            .isolate
            .take()
            .or_else(|| self.booted.try_recv().ok().and_then(Result::ok));
        if let Some(isolate) = isolate {
            isolate.terminate_execution();
        }
    }
}

/// Owning handle to one live script context.
///
/// Dropping the handle stops the worker: any running call is terminated and the
/// thread exits once its channel closes.
pub struct ContextHandle {
    tx: mpsc::Sender<ContextCommand>,
    interrupt: Interrupt,
    manifest: ExtensionManifest,
}

impl ContextHandle {
    /// Start a worker thread, evaluate `source` in it and read its declaration
    pub async fn spawn(
        extension_id: ExtensionId,
        source: Arc<str>,
        bridge: CapabilityBridge,
        max_heap_bytes: usize,
    ) -> Result<Self, ScriptError> {
        let (tx, mut rx) = mpsc::channel::<ContextCommand>(8);
        let (booted_tx, booted_rx) = oneshot::channel::<Booted>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<ExtensionManifest, ScriptError>>();
        let cancel = CancellationToken::new();

        let worker_cancel = cancel.clone();
        let stopped = cancel.clone();
        let thread_id = extension_id.clone();
        let short_id: String = extension_id.chars().take(8).collect();

        thread::Builder::new()
            .name(format!("kagura-ext-{}", short_id))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = booted_tx.send(Err(ScriptError::Crashed(format!(
                            "failed to create worker runtime: {}",
                            e
                        ))));
                        return;
                    }
                };

                let local = tokio::task::LocalSet::new();
                local.block_on(&rt, async move {
                    let bridge = BridgeContext {
                        extension_id: thread_id.clone(),
                        bridge,
                        cancel: worker_cancel,
                    };
                    let mut context = match ScriptContext::new(bridge, max_heap_bytes) {
                        Ok(context) => context,
                        Err(e) => {
                            let _ = booted_tx.send(Err(e));
                            return;
                        }
                    };
                    if booted_tx.send(Ok(context.isolate_handle())).is_err() || stopped.is_cancelled() {
                        return;
                    }

                    let loaded = context.load(&source);
                    let failed = loaded.is_err();
                    if ready_tx.send(loaded).is_err() || failed {
                        return;
                    }

                    debug!(extension_id = %thread_id, "Context worker ready");

                    while let Some(command) = rx.recv().await {
                        match command {
                            ContextCommand::Invoke {
                                capability,
                                args,
                                resp,
                            } => {
                                if stopped.is_cancelled() {
                                    let _ = resp.send(Err(ScriptError::Crashed(
                                        "context was terminated".into(),
                                    )));
                                    break;
                                }

                                let result = context.invoke(capability, args).await;
                                let crashed = matches!(result, Err(ScriptError::Crashed(_)));
                                if let Err(ScriptError::Crashed(reason)) = &result {
                                    error!(extension_id = %thread_id, operation = %capability, "Context crashed: {}", reason);
                                }
                                let _ = resp.send(result);
                                if crashed {
                                    break;
                                }
                            }
                        }
                    }

                    debug!(extension_id = %thread_id, "Context worker exiting");
                });
            })
            .map_err(|e| ScriptError::Crashed(format!("failed to spawn worker thread: {}", e)))?;

        let mut guard = StartupGuard {
            cancel,
            booted: booted_rx,
            isolate: None,
            armed: true,
        };
        guard.booted().await?;

        let manifest = ready_rx
            .await
            .map_err(|_| ScriptError::Crashed("worker exited during load".into()))??;

        info!(extension_id = %extension_id, name = %manifest.name, "Context started");
        Ok(Self {
            tx,
            interrupt: guard.disarm()?,
            manifest,
        })
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    pub async fn invoke(&self, capability: Capability, args: Vec<Value>) -> Result<Value, ScriptError> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(ContextCommand::Invoke {
                capability,
                args,
                resp,
            })
            .await
            .map_err(|_| ScriptError::Crashed("context worker has exited".into()))?;

        rx.await
            .map_err(|_| ScriptError::Crashed("context worker dropped the call".into()))?
    }

    /// Stop whatever the context is doing; the context is unusable afterwards
    pub fn terminate(&self) {
        self.interrupt.fire();
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}
