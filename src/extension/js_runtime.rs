//! Script context
//!
//! Wraps one `deno_core::JsRuntime` holding one extension's script. Not `Send`:
//! a `ScriptContext` lives and dies on the worker thread that created it.

use deno_core::{v8, JsRuntime};
use serde::Deserialize;
use std::cell::Cell;
use std::rc::Rc;
use serde_json::Value;
use tracing::debug;

use super::js_bindings::{create_runtime, BridgeContext, DESCRIBE_FN, INVOKE_FN, TAKE_FN};
use super::types::{Capability, ExtensionManifest};

/// Failure of a load or a call inside a script context
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// Parse error, top-level throw or invalid declaration
    #[error("{0}")]
    Load(String),

    /// Uncaught exception or rejected promise from plugin code
    #[error("{name}: {message}")]
    Exception { name: String, message: String },

    /// The context can no longer be used
    #[error("context crashed: {0}")]
    Crashed(String),
}

/// What `__kagura_take` reports after a call
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Settled {
    Success { json: String },
    Error { name: String, message: String },
    Pending,
    Idle,
}

pub struct ScriptContext {
    runtime: JsRuntime,
    max_heap_bytes: usize,
    /// Set once the isolate came close to its heap ceiling and was terminated
    heap_exhausted: Rc<Cell<bool>>,
}

impl ScriptContext {
    pub fn new(bridge: BridgeContext, max_heap_bytes: usize) -> Result<Self, ScriptError> {
        let mut runtime =
            create_runtime(bridge, max_heap_bytes).map_err(|e| ScriptError::Crashed(format!("{:#}", e)))?;

        let heap_exhausted = Rc::new(Cell::new(false));
        let exhausted = heap_exhausted.clone();
        let isolate = runtime.v8_isolate().thread_safe_handle();
        runtime.add_near_heap_limit_callback(move |current_limit, _initial_limit| {
            exhausted.set(true);
            isolate.terminate_execution();
            // room for the termination to unwind instead of aborting the process
            current_limit * 2
        });

        Ok(Self {
            runtime,
            max_heap_bytes,
            heap_exhausted,
        })
    }

    /// Reason to report once script execution stopped without a result
    fn terminated(&self) -> String {
        if self.heap_exhausted.get() {
            format!("heap limit of {} bytes reached", self.max_heap_bytes)
        } else {
            "execution terminated".to_string()
        }
    }

    /// Thread-safe handle used to interrupt running script code
    pub fn isolate_handle(&mut self) -> v8::IsolateHandle {
        self.runtime.v8_isolate().thread_safe_handle()
    }

    /// Evaluate the extension source and read back its declaration
    pub fn load(&mut self, source: &str) -> Result<ExtensionManifest, ScriptError> {
        if let Err(e) = self.runtime.execute_script("<extension>", source.to_string().into()) {
            let reason = if self.heap_exhausted.get() { self.terminated() } else { e.to_string() };
            return Err(ScriptError::Load(reason));
        }

        let declaration = self
            .eval_string("<describe>", DESCRIBE_FN)
            .map_err(|e| ScriptError::Load(e.to_string()))?;
        let declaration: Value = serde_json::from_str(&declaration)
            .map_err(|e| ScriptError::Load(format!("unreadable declaration: {}", e)))?;

        let manifest = ExtensionManifest::from_declaration(&declaration).map_err(ScriptError::Load)?;
        debug!(name = %manifest.name, kind = %manifest.kind, "Extension script evaluated");
        Ok(manifest)
    }

    /// Call `capability` with positional `args`, driving the event loop until
    /// the call settles. Returns the raw JSON the method produced.
    pub async fn invoke(&mut self, capability: Capability, args: Vec<Value>) -> Result<Value, ScriptError> {
        let args_json = serde_json::to_string(&args)
            .map_err(|e| ScriptError::Crashed(format!("unserializable arguments: {}", e)))?;

        let started = {
            let scope = &mut self.runtime.handle_scope();
            let context = scope.get_current_context();
            let global = context.global(scope);

            let invoke_name = v8::String::new(scope, INVOKE_FN)
                .ok_or_else(|| ScriptError::Crashed("failed to allocate string".into()))?;
            let invoke_fn = global
                .get(scope, invoke_name.into())
                .and_then(|value| v8::Local::<v8::Function>::try_from(value).ok())
                .ok_or_else(|| ScriptError::Crashed(format!("{} is not installed", INVOKE_FN)))?;

            let method = v8::String::new(scope, capability.method_name())
                .ok_or_else(|| ScriptError::Crashed("failed to allocate string".into()))?;
            let args_str = v8::String::new(scope, &args_json)
                .ok_or_else(|| ScriptError::Crashed("failed to allocate string".into()))?;
            let args_val = v8::json::parse(scope, args_str)
                .ok_or_else(|| ScriptError::Crashed("failed to parse arguments in V8".into()))?;

            let recv = v8::undefined(scope).into();
            // the glue catches every exception, so no result means termination
            invoke_fn.call(scope, recv, &[method.into(), args_val]).is_some()
        };
        if !started {
            return Err(ScriptError::Crashed(self.terminated()));
        }

        if let Err(e) = self.runtime.run_event_loop(Default::default()).await {
            let reason = if self.heap_exhausted.get() { self.terminated() } else { e.to_string() };
            return Err(ScriptError::Crashed(reason));
        }

        let settled = self
            .eval_string("<take>", TAKE_FN)
            .map_err(|e| ScriptError::Crashed(e.to_string()))?;
        let settled: Settled = serde_json::from_str(&settled)
            .map_err(|e| ScriptError::Crashed(format!("unreadable call state: {}", e)))?;

        match settled {
            Settled::Success { json } => serde_json::from_str(&json)
                .map_err(|e| ScriptError::Crashed(format!("unreadable result: {}", e))),
            Settled::Error { name, message } => Err(ScriptError::Exception { name, message }),
            Settled::Pending => Err(ScriptError::Exception {
                name: "Error".into(),
                message: format!("{} returned a promise that never settled", capability),
            }),
            Settled::Idle => Err(ScriptError::Crashed("call was never started".into())),
        }
    }

    /// Call a zero-argument glue function and return its string result
    fn eval_string(&mut self, name: &'static str, function: &str) -> anyhow::Result<String> {
        let result = self
            .runtime
            .execute_script(name, format!("{}()", function).into())?;
        let scope = &mut self.runtime.handle_scope();
        let local = v8::Local::new(scope, result);
        let string = local
            .to_string(scope)
            .ok_or_else(|| anyhow::anyhow!("{} returned a non-string value", function))?;
        Ok(string.to_rust_string_lossy(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::bridge::CapabilityBridge;
    use crate::extension::test_fixtures::{self, CatalogueFetcher};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn context(host: &tokio::runtime::Runtime) -> ScriptContext {
        let bridge = CapabilityBridge::new(
            Arc::new(CatalogueFetcher),
            host.handle().clone(),
            Duration::from_secs(5),
        );
        ScriptContext::new(
            BridgeContext {
                extension_id: "test-ext".into(),
                bridge,
                cancel: CancellationToken::new(),
            },
            64 * 1024 * 1024,
        )
        .unwrap()
    }

    fn host() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn local() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_load_reads_manifest() {
        let host = host();
        let mut ctx = context(&host);
        let manifest = ctx.load(test_fixtures::ANIME_EXTENSION).unwrap();

        assert_eq!(manifest.name, "Fixture Anime");
        assert_eq!(manifest.base_url, "https://anime.test");
        assert!(manifest.supports(Capability::ResolveSources));
    }

    #[test]
    fn test_load_rejects_syntax_error() {
        let host = host();
        let mut ctx = context(&host);
        let err = ctx.load("const extension = {").unwrap_err();
        assert!(matches!(err, ScriptError::Load(_)));
    }

    #[test]
    fn test_load_rejects_missing_methods() {
        let host = host();
        let mut ctx = context(&host);
        let err = ctx
            .load(r#"const extension = { name: "x", version: "1", type: "anime", search() {} };"#)
            .unwrap_err();
        match err {
            ScriptError::Load(message) => assert!(message.contains("discover"), "{}", message),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_load_rejects_script_without_extension() {
        let host = host();
        let mut ctx = context(&host);
        let err = ctx.load("const answer = 42;").unwrap_err();
        assert!(matches!(err, ScriptError::Load(_)));
    }

    #[test]
    fn test_invoke_sync_method_uses_bridge() {
        let host = host();
        let mut ctx = context(&host);
        ctx.load(test_fixtures::ANIME_EXTENSION).unwrap();

        let result = local()
            .block_on(ctx.invoke(Capability::Search, vec![json!("alpha"), json!(1), json!(false)]))
            .unwrap();

        assert_eq!(result["results"][0]["id"], "a");
        assert_eq!(result["results"][0]["title"], "Alpha");
        assert_eq!(result["hasNextPage"], true);
    }

    #[test]
    fn test_invoke_async_method() {
        let host = host();
        let mut ctx = context(&host);
        ctx.load(test_fixtures::ANIME_EXTENSION).unwrap();

        let result = local()
            .block_on(ctx.invoke(Capability::ResolveSources, vec![json!("ep-1")]))
            .unwrap();
        assert_eq!(result["sources"][0]["url"], "https://cdn.anime.test/ep-1.m3u8");
    }

    #[test]
    fn test_invoke_reports_exception_name_and_message() {
        let host = host();
        let mut ctx = context(&host);
        ctx.load(test_fixtures::THROWING_EXTENSION).unwrap();

        let rt = local();
        let err = rt
            .block_on(ctx.invoke(Capability::Search, vec![json!("x"), json!(1), json!(false)]))
            .unwrap_err();
        assert_eq!(
            err,
            ScriptError::Exception {
                name: "TypeError".into(),
                message: "provider layout changed".into()
            }
        );

        // rejected promises surface the same way, and the context stays usable
        let err = rt
            .block_on(ctx.invoke(Capability::Discover, vec![json!(1), json!(null), json!([]), json!(false)]))
            .unwrap_err();
        assert!(matches!(err, ScriptError::Exception { ref message, .. } if message == "rejected"));
    }

    #[test]
    fn test_heap_exhaustion_crashes_the_context() {
        let host = host();
        let mut ctx = context(&host);
        ctx.load(test_fixtures::ALLOCATING_EXTENSION).unwrap();

        let err = local()
            .block_on(ctx.invoke(Capability::Search, vec![json!("q"), json!(1), json!(false)]))
            .unwrap_err();
        match err {
            ScriptError::Crashed(reason) => assert!(reason.contains("heap limit"), "{}", reason),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_state_persists_within_one_context() {
        let host = host();
        let mut ctx = context(&host);
        ctx.load(test_fixtures::COUNTER_EXTENSION).unwrap();

        let rt = local();
        let args = || vec![json!("q"), json!(1), json!(false)];
        rt.block_on(ctx.invoke(Capability::Search, args())).unwrap();
        let second = rt.block_on(ctx.invoke(Capability::Search, args())).unwrap();
        assert_eq!(second["results"][0]["id"], "call-2");
    }
}
