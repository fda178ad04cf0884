//! Script-engine bootstrap
//!
//! Registers the bridge ops on a fresh `JsRuntime` and installs the glue every
//! extension script runs against:
//! - `fetch(url, options)`, a blocking call serviced by the Capability Bridge
//! - a frozen `console` routed into `tracing`
//! - `module`/`exports` for scripts written as CommonJS-style modules
//! - describe/invoke/take helpers the host calls between scripts
//!
//! Once the glue has captured the ops, every global that a bare V8 context does
//! not have and the glue did not define is deleted. That removes `Deno`,
//! `__bootstrap` and anything else the engine bootstrap leaves behind, so plugin
//! code can reach nothing but the glue and language built-ins.

use anyhow::{Context, Result};
use deno_core::{op2, v8, Extension, JsRuntime, Op, OpState, RuntimeOptions};
use std::borrow::Cow;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bridge::{CapabilityBridge, FetchRequest};
use super::types::ExtensionId;
use crate::core::logging::PLUGIN_LOG_TARGET;

/// Global used by the host to read an extension's declaration
pub const DESCRIBE_FN: &str = "__kagura_describe";
/// Global used by the host to start a method call
pub const INVOKE_FN: &str = "__kagura_invoke";
/// Global used by the host to collect a settled call
pub const TAKE_FN: &str = "__kagura_take";

/// Globals the glue installs on top of the language built-ins
pub const GLUE_GLOBALS: &[&str] = &[
    "console",
    "fetch",
    "NetworkBridgeError",
    "module",
    "exports",
    DESCRIBE_FN,
    INVOKE_FN,
    TAKE_FN,
];

/// Per-context state the ops read from `OpState`
pub struct BridgeContext {
    pub extension_id: ExtensionId,
    pub bridge: CapabilityBridge,
    /// Fired when the context is being torn down mid-call
    pub cancel: CancellationToken,
}

#[op2]
#[string]
fn op_bridge_fetch(
    state: &mut OpState,
    #[serde] request: FetchRequest,
) -> Result<String, anyhow::Error> {
    let ctx = state.borrow::<BridgeContext>();
    debug!(extension_id = %ctx.extension_id, url = %request.url, "fetch");

    let response = ctx.bridge.fetch_blocking(request, &ctx.cancel)?;
    serde_json::to_string(&response).context("Failed to serialize fetch response")
}

#[op2(fast)]
fn op_console(state: &mut OpState, #[string] level: &str, #[string] message: &str) {
    let extension_id = state.borrow::<BridgeContext>().extension_id.as_str();
    match level {
        "error" => error!(target: PLUGIN_LOG_TARGET, extension_id, "{}", message),
        "warn" => warn!(target: PLUGIN_LOG_TARGET, extension_id, "{}", message),
        "debug" => debug!(target: PLUGIN_LOG_TARGET, extension_id, "{}", message),
        _ => info!(target: PLUGIN_LOG_TARGET, extension_id, "{}", message),
    }
}

const BOOTSTRAP_JS: &str = r#"
((ops) => {
  "use strict";

  const fetchOp = ops.op_bridge_fetch;
  const consoleOp = ops.op_console;

  const define = (name, value) =>
    Object.defineProperty(globalThis, name, {
      value,
      writable: false,
      enumerable: false,
      configurable: false,
    });

  const format = (args) =>
    args
      .map((arg) => {
        if (typeof arg === "string") return arg;
        if (arg instanceof Error) return `${arg.name}: ${arg.message}`;
        try {
          return JSON.stringify(arg);
        } catch (_) {
          return String(arg);
        }
      })
      .join(" ");

  define(
    "console",
    Object.freeze({
      log: (...args) => consoleOp("info", format(args)),
      info: (...args) => consoleOp("info", format(args)),
      debug: (...args) => consoleOp("debug", format(args)),
      warn: (...args) => consoleOp("warn", format(args)),
      error: (...args) => consoleOp("error", format(args)),
    }),
  );

  class NetworkBridgeError extends Error {
    constructor(message) {
      super(message);
      this.name = "NetworkBridgeError";
    }
  }
  define("NetworkBridgeError", NetworkBridgeError);

  define("fetch", function fetch(url, options) {
    const opts = options || {};
    const headers = {};
    if (opts.headers && typeof opts.headers === "object") {
      for (const [key, value] of Object.entries(opts.headers)) {
        headers[key] = String(value);
      }
    }
    const request = {
      url: String(url),
      method: opts.method ? String(opts.method) : "GET",
      headers,
    };
    if (opts.body !== undefined && opts.body !== null) {
      request.body = typeof opts.body === "string" ? opts.body : JSON.stringify(opts.body);
    }
    try {
      return fetchOp(request);
    } catch (e) {
      throw new NetworkBridgeError(e && e.message ? e.message : String(e));
    }
  });

  globalThis.module = { exports: {} };
  globalThis.exports = globalThis.module.exports;

  const METHODS = ["search", "discover", "getDetails", "resolveSources", "resolveChapterImages"];

  const resolveExtension = () => {
    if (typeof extension === "object" && extension !== null) return extension;
    const exported = globalThis.module && globalThis.module.exports;
    if (exported && typeof exported === "object") {
      if (exported.extension && typeof exported.extension === "object") return exported.extension;
      if (exported.default && typeof exported.default === "object") return exported.default;
      if ("name" in exported) return exported;
    }
    return null;
  };

  define("__kagura_describe", () => {
    const ext = resolveExtension();
    if (ext === null) {
      throw new Error("script does not define an 'extension' object");
    }
    return JSON.stringify({
      id: ext.id,
      name: ext.name,
      version: ext.version,
      type: ext.type,
      language: ext.language,
      baseUrl: ext.baseUrl,
      methods: METHODS.filter((m) => typeof ext[m] === "function"),
    });
  });

  let settled = { status: "idle" };

  const settleErr = (e) => {
    settled = {
      status: "error",
      name: e && e.name ? String(e.name) : "Error",
      message: e && e.message !== undefined ? String(e.message) : String(e),
    };
  };

  const settleOk = (value) => {
    try {
      settled = { status: "success", json: JSON.stringify(value === undefined ? null : value) };
    } catch (e) {
      settleErr(e);
    }
  };

  define("__kagura_invoke", (method, args) => {
    settled = { status: "pending" };
    try {
      const ext = resolveExtension();
      if (ext === null || typeof ext[method] !== "function") {
        throw new TypeError(`extension does not implement ${method}`);
      }
      const result = ext[method].apply(ext, args);
      if (result !== null && typeof result === "object" && typeof result.then === "function") {
        result.then(settleOk, settleErr);
      } else {
        settleOk(result);
      }
    } catch (e) {
      settleErr(e);
    }
  });

  define("__kagura_take", () => {
    const out = JSON.stringify(settled);
    settled = { status: "idle" };
    return out;
  });
})(Deno.core.ops);
"#;

/// Create a runtime with the bridge ops registered, the glue installed and
/// everything else stripped from the global object.
///
/// `max_heap_bytes` caps the isolate's heap; the caller decides what happens
/// when a script approaches it (see `ScriptContext::new`).
pub fn create_runtime(context: BridgeContext, max_heap_bytes: usize) -> Result<JsRuntime> {
    let ext = Extension {
        name: "kagura_bridge",
        ops: Cow::Borrowed(&[op_bridge_fetch::DECL, op_console::DECL]),
        ..Default::default()
    };

    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![ext],
        create_params: Some(v8::CreateParams::default().heap_limits(0, max_heap_bytes)),
        ..Default::default()
    });
    runtime.op_state().borrow_mut().put(context);

    let mut keep = builtin_globals(&mut runtime)?;
    keep.extend(GLUE_GLOBALS.iter().map(|name| name.to_string()));

    runtime
        .execute_script("<kagura_bootstrap>", BOOTSTRAP_JS.to_string().into())
        .context("Failed to install extension bindings")?;

    let lockdown = format!(
        "((keep) => {{ for (const name of Object.getOwnPropertyNames(globalThis)) {{ if (!keep.has(name)) delete globalThis[name]; }} }})(new Set({}));",
        serde_json::to_string(&keep).context("Failed to encode global allowlist")?
    );
    runtime
        .execute_script("<kagura_lockdown>", lockdown.into())
        .context("Failed to lock down extension globals")?;

    Ok(runtime)
}

/// Own global names of a bare V8 context created in `runtime`'s isolate
pub(crate) fn builtin_globals(runtime: &mut JsRuntime) -> Result<Vec<String>> {
    let scope = &mut runtime.handle_scope();
    let bare = v8::Context::new(scope);
    let scope = &mut v8::ContextScope::new(scope, bare);

    let code = v8::String::new(scope, "JSON.stringify(Object.getOwnPropertyNames(globalThis))")
        .context("Failed to allocate string")?;
    let names = v8::Script::compile(scope, code, None)
        .and_then(|script| script.run(scope))
        .context("Failed to list built-in globals")?;
    let names = names.to_rust_string_lossy(scope);

    serde_json::from_str(&names).context("Failed to read built-in globals")
}
