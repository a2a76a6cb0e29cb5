//! The sandbox itself: one QuickJS context per plugin, a fixed set of
//! reserved host callbacks, and the guest façade script that wraps them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use rquickjs::{Context, Function, Runtime};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::SandboxError;
use super::host_bridge::HostBridge;
use super::state::SandboxState;

const FACADE_SCRIPT: &str = include_str!("facade.js");
const MAX_LOG_MESSAGE: usize = 2000;

lazy_static! {
    static ref FUNCTION_NAME_RE: Regex = Regex::new(r"^[\w.]+$").unwrap();
}

/// Per-sandbox construction parameters.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub memory_limit_bytes: usize,
    pub eval_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 128 * 1024 * 1024,
            eval_timeout: Duration::from_secs(5),
        }
    }
}

/// The QuickJS runtime/context pair plus everything its host callbacks
/// close over. Lives entirely on whatever blocking thread last touched it;
/// `Sandbox` shuttles ownership of this in and out of `spawn_blocking`
/// calls so the `async fn`s above it never hold it across an await point.
struct Engine {
    runtime: Runtime,
    context: Context,
}

// Safety note: a QuickJS Runtime/Context pair is only ever touched from
// the single blocking-pool thread executing the current `spawn_blocking`
// call at any given time; `Sandbox` never shares `Engine` across tasks
// concurrently.
unsafe impl Send for Engine {}

impl Engine {
    fn new(
        plugin_id: String,
        bridge: Arc<dyn HostBridge>,
        tokio_handle: tokio::runtime::Handle,
        config: &SandboxConfig,
    ) -> Result<Self, SandboxError> {
        let runtime = Runtime::new().map_err(|e| SandboxError::Eval(e.to_string()))?;
        runtime.set_memory_limit(config.memory_limit_bytes);
        let context = Context::full(&runtime).map_err(|e| SandboxError::Eval(e.to_string()))?;

        install_host_functions(&context, plugin_id, bridge, tokio_handle)
            .map_err(|e| SandboxError::Eval(e.to_string()))?;

        context
            .with(|ctx| ctx.eval::<(), _>(FACADE_SCRIPT))
            .map_err(|e| SandboxError::Eval(e.to_string()))?;

        Ok(Self { runtime, context })
    }

    fn eval_source(&self, source: &str) -> Result<Value, SandboxError> {
        self.context.with(|ctx| {
            let value: rquickjs::Value = ctx.eval(source).map_err(|e| SandboxError::Eval(e.to_string()))?;
            js_to_json(&ctx, &value)
        })
    }

    /// Looks up `globalThis[name]` and calls it with the single decoded
    /// JSON value as its sole argument. Capability parameters are
    /// declared as a named-field map in the manifest (`ActionParam`), so
    /// guest entry points always receive one params object (or the `[]`
    /// `Invocation::args()` uses for a plain data-source sync) rather
    /// than having arguments spread across positional parameters.
    fn invoke_function(&self, name: &str, args_json: &str) -> Result<Value, SandboxError> {
        if !FUNCTION_NAME_RE.is_match(name) {
            return Err(SandboxError::InvalidFunctionName(name.to_string()));
        }
        self.context.with(|ctx| {
            let globals = ctx.globals();
            let func: Function = globals
                .get(name)
                .map_err(|_| SandboxError::FunctionNotFound(name.to_string()))?;

            let args: Value = serde_json::from_str(args_json)?;
            let js_args = json_to_js(&ctx, &args).map_err(|e| SandboxError::Eval(e.to_string()))?;

            let result: rquickjs::Value = func
                .call((js_args,))
                .map_err(|e| SandboxError::Eval(e.to_string()))?;
            let settled = self.drain_if_promise(result)?;
            js_to_json(&ctx, &settled)
        })
    }

    /// Entry points commonly return a promise chained off a `devrig.*`
    /// host call (whose executor resolves synchronously, but whose
    /// `.then` reactions run as microtasks). Drive the runtime's job
    /// queue until the promise settles rather than handing back an
    /// unresolved promise object.
    fn drain_if_promise<'js>(&self, value: rquickjs::Value<'js>) -> Result<rquickjs::Value<'js>, SandboxError> {
        let Some(promise) = value.as_promise() else {
            return Ok(value);
        };
        loop {
            match promise.state() {
                rquickjs::PromiseState::Pending => {
                    if !self
                        .runtime
                        .execute_pending_job()
                        .map_err(|e| SandboxError::Eval(e.to_string()))?
                    {
                        return Err(SandboxError::Eval(
                            "guest promise never settled: no host bridge should suspend indefinitely".into(),
                        ));
                    }
                }
                rquickjs::PromiseState::Resolved => {
                    return promise.result().ok_or_else(|| {
                        SandboxError::Eval("resolved promise carried no value".into())
                    })?.map_err(|e| SandboxError::Eval(e.to_string()));
                }
                rquickjs::PromiseState::Rejected => {
                    let reason: rquickjs::Result<rquickjs::Value> = promise.result().unwrap_or(Ok(rquickjs::Value::new_undefined(promise.ctx().clone())));
                    let message = reason
                        .ok()
                        .and_then(|v| v.as_string().map(|s| s.to_string().unwrap_or_default()))
                        .unwrap_or_else(|| "guest promise rejected".to_string());
                    return Err(SandboxError::Eval(message));
                }
            }
        }
    }
}

/// A single plugin's isolated JS execution context, per spec.md §4.D.
pub struct Sandbox {
    plugin_id: String,
    state: SandboxState,
    engine: Option<Engine>,
    bridge: Arc<dyn HostBridge>,
    tokio_handle: tokio::runtime::Handle,
    config: SandboxConfig,
    disposed: Arc<AtomicBool>,
    /// monotonic logical counter, bumped on every dispatch; used by the
    /// plugin manager's LRU pool rather than wall-clock time so eviction
    /// order stays deterministic under test.
    pub last_accessed: u64,
}

impl Sandbox {
    pub fn new(plugin_id: String, bridge: Arc<dyn HostBridge>, config: SandboxConfig) -> Self {
        Self {
            plugin_id,
            state: SandboxState::Constructed,
            engine: None,
            bridge,
            tokio_handle: tokio::runtime::Handle::current(),
            config,
            disposed: Arc::new(AtomicBool::new(false)),
            last_accessed: 0,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// Install host functions and evaluate the façade script, reaching
    /// `initialized`.
    pub async fn initialize(&mut self) -> Result<(), SandboxError> {
        if self.state != SandboxState::Constructed {
            return Ok(());
        }
        let plugin_id = self.plugin_id.clone();
        let bridge = self.bridge.clone();
        let handle = self.tokio_handle.clone();
        let config = self.config.clone();

        let engine = tokio::task::spawn_blocking(move || Engine::new(plugin_id, bridge, handle, &config))
            .await
            .map_err(|e| SandboxError::Eval(format!("engine construction panicked: {e}")))??;

        self.engine = Some(engine);
        self.state = SandboxState::Initialized;
        Ok(())
    }

    /// Evaluate an arbitrary script fragment (used to load plugin source
    /// before invoking named functions within it).
    pub async fn eval(&mut self, source: String) -> Result<Value, SandboxError> {
        self.run(move |engine| engine.eval_source(&source)).await
    }

    /// Call a guest-defined function by name with JSON-encoded arguments,
    /// returning its JSON-encoded result. Arguments and results transit as
    /// copies; no live object references cross the boundary.
    pub async fn invoke(&mut self, name: String, args_json: String) -> Result<Value, SandboxError> {
        self.run(move |engine| engine.invoke_function(&name, &args_json)).await
    }

    async fn run<F>(&mut self, f: F) -> Result<Value, SandboxError>
    where
        F: FnOnce(&Engine) -> Result<Value, SandboxError> + Send + 'static,
    {
        if self.state == SandboxState::Disposed || self.state == SandboxState::Evicted {
            return Err(SandboxError::Disposed);
        }
        if self.state == SandboxState::Constructed {
            return Err(SandboxError::NotInitialized);
        }
        let mut engine = self.engine.take().ok_or(SandboxError::NotInitialized)?;
        self.state = SandboxState::Active;

        let task = tokio::task::spawn_blocking(move || {
            let result = f(&engine);
            (engine, result)
        });

        match tokio::time::timeout(self.config.eval_timeout, task).await {
            Ok(Ok((engine, result))) => {
                self.engine = Some(engine);
                self.state = SandboxState::Initialized;
                result
            }
            Ok(Err(join_err)) => {
                warn!(plugin_id = %self.plugin_id, error = %join_err, "sandbox task panicked");
                Err(SandboxError::Eval(format!("engine task panicked: {join_err}")))
            }
            Err(_elapsed) => {
                // The blocking task is still running somewhere in the pool
                // with no way to interrupt QuickJS from here; we simply
                // stop waiting for it and treat the sandbox as gone. Its
                // Engine, if the task ever finishes, is dropped with the
                // JoinHandle's output and never rejoins self.engine.
                warn!(plugin_id = %self.plugin_id, "sandbox eval exceeded timeout, abandoning engine");
                self.state = SandboxState::Disposed;
                Err(SandboxError::Timeout)
            }
        }
    }

    /// Idempotent disposal. Safe to call on an already-disposed or
    /// never-initialized sandbox.
    pub fn dispose(&mut self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(plugin_id = %self.plugin_id, "disposing sandbox");
        self.engine = None;
        self.state = SandboxState::Disposed;
    }

    pub fn mark_evicted(&mut self) {
        self.dispose();
        self.state = SandboxState::Evicted;
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn install_host_functions(
    context: &Context,
    plugin_id: String,
    bridge: Arc<dyn HostBridge>,
    tokio_handle: tokio::runtime::Handle,
) -> rquickjs::Result<()> {
    context.with(|ctx| {
        let globals = ctx.globals();

        {
            let plugin_id = plugin_id.clone();
            let bridge = bridge.clone();
            globals.set(
                "__hostLog",
                Function::new(ctx.clone(), move |level: String, msg: String| {
                    let level = clamp_log_level(&level);
                    let msg: String = msg.chars().take(MAX_LOG_MESSAGE).collect();
                    bridge.log(&plugin_id, level, &msg);
                })?,
            )?;
        }

        {
            let plugin_id = plugin_id.clone();
            let bridge = bridge.clone();
            globals.set(
                "__hostEmitEvent",
                Function::new(ctx.clone(), move |name: String, data_json: String| {
                    let data: Value = serde_json::from_str(&data_json).unwrap_or(Value::Null);
                    bridge.emit_event(&plugin_id, &name, data);
                })?,
            )?;
        }

        bind_blocking_call(&ctx, &globals, "__hostFetch", {
            let plugin_id = plugin_id.clone();
            let bridge = bridge.clone();
            let handle = tokio_handle.clone();
            move |args: Vec<String>| {
                let url = args.first().cloned().unwrap_or_default();
                let opts: Value = args
                    .get(1)
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(Value::Null);
                handle.block_on(bridge.fetch(&plugin_id, &url, opts))
            }
        })?;

        bind_blocking_call(&ctx, &globals, "__hostGetSecret", {
            let plugin_id = plugin_id.clone();
            let bridge = bridge.clone();
            let handle = tokio_handle.clone();
            move |args: Vec<String>| {
                let key = args.first().cloned().unwrap_or_default();
                handle
                    .block_on(bridge.get_secret(&plugin_id, &key))
                    .map(|opt| opt.map(Value::String).unwrap_or(Value::Null))
            }
        })?;

        bind_blocking_call(&ctx, &globals, "__hostStoreItems", {
            let plugin_id = plugin_id.clone();
            let bridge = bridge.clone();
            let handle = tokio_handle.clone();
            move |args: Vec<String>| {
                let items: Value = args
                    .first()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(Value::Array(vec![]));
                handle.block_on(bridge.store_items(&plugin_id, items))?;
                Ok(Value::Null)
            }
        })?;

        bind_blocking_call(&ctx, &globals, "__hostQueryItems", {
            let plugin_id = plugin_id.clone();
            let bridge = bridge.clone();
            let handle = tokio_handle.clone();
            move |args: Vec<String>| {
                let filter: Value = args
                    .first()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(Value::Object(Default::default()));
                handle.block_on(bridge.query_items(&plugin_id, filter))
            }
        })?;

        bind_blocking_call(&ctx, &globals, "__hostMarkRead", {
            let plugin_id = plugin_id.clone();
            let bridge = bridge.clone();
            let handle = tokio_handle.clone();
            move |args: Vec<String>| {
                let ids: Value = args
                    .first()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(Value::Array(vec![]));
                handle.block_on(bridge.mark_read(&plugin_id, ids))?;
                Ok(Value::Null)
            }
        })?;

        bind_blocking_call(&ctx, &globals, "__hostArchive", {
            let plugin_id = plugin_id.clone();
            let bridge = bridge.clone();
            let handle = tokio_handle.clone();
            move |args: Vec<String>| {
                let ids: Value = args
                    .first()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(Value::Array(vec![]));
                handle.block_on(bridge.archive(&plugin_id, ids))?;
                Ok(Value::Null)
            }
        })?;

        bind_blocking_call(&ctx, &globals, "__hostRequestAI", {
            let plugin_id = plugin_id.clone();
            let bridge = bridge.clone();
            let handle = tokio_handle.clone();
            move |args: Vec<String>| {
                let op = args.first().cloned().unwrap_or_default();
                let params: Value = args
                    .get(1)
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(Value::Object(Default::default()));
                handle.block_on(bridge.request_ai(&plugin_id, &op, params))
            }
        })?;

        Ok(())
    })
}

/// Bind a host call whose guest-visible contract is "returns a JSON
/// string, or throws". `f` runs on the blocking thread already executing
/// QuickJS, and itself blocks on the async bridge call via the captured
/// tokio handle — legal because this thread is never the async reactor
/// thread, only a `spawn_blocking` worker.
fn bind_blocking_call<F>(
    ctx: &rquickjs::Ctx<'_>,
    globals: &rquickjs::Object<'_>,
    name: &str,
    f: F,
) -> rquickjs::Result<()>
where
    F: Fn(Vec<String>) -> Result<Value, SandboxError> + Send + 'static,
{
    let func = Function::new(
        ctx.clone(),
        move |ctx: rquickjs::Ctx<'_>, rest: rquickjs::function::Rest<String>| -> rquickjs::Result<String> {
            match f(rest.0) {
                Ok(value) => Ok(serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string())),
                // A real thrown exception, not a sentinel string: the
                // façade's promise executor catches it and rejects.
                Err(err) => Err(ctx.throw(rquickjs::Value::from_string(
                    rquickjs::String::from_str(ctx.clone(), &err.to_string())?,
                ))),
            }
        },
    )?;
    globals.set(name, func)?;
    Ok(())
}

fn clamp_log_level(level: &str) -> &'static str {
    match level {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

fn js_to_json(ctx: &rquickjs::Ctx<'_>, value: &rquickjs::Value) -> Result<Value, SandboxError> {
    if value.is_undefined() || value.is_null() {
        return Ok(Value::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Some(n) = value.as_float() {
        return Ok(serde_json::json!(n));
    }
    if let Some(s) = value.as_string() {
        return Ok(Value::String(s.to_string().unwrap_or_default()));
    }
    // Objects/arrays: round-trip through the engine's own JSON.stringify
    // rather than walking rquickjs::Value by hand.
    let global_json: rquickjs::Object = ctx
        .globals()
        .get("JSON")
        .map_err(|e| SandboxError::Eval(e.to_string()))?;
    let stringify: Function = global_json
        .get("stringify")
        .map_err(|e| SandboxError::Eval(e.to_string()))?;
    let text: Option<String> = stringify
        .call((value.clone(),))
        .map_err(|e| SandboxError::Eval(e.to_string()))?;
    match text {
        Some(text) => serde_json::from_str(&text).map_err(SandboxError::from),
        // JSON.stringify returns undefined for functions/symbols; the
        // guest-visible contract for those is null, not an error.
        None => Ok(Value::Null),
    }
}

fn json_to_js<'js>(ctx: &rquickjs::Ctx<'js>, value: &Value) -> rquickjs::Result<rquickjs::Value<'js>> {
    let json_text = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    let global_json: rquickjs::Object = ctx.globals().get("JSON")?;
    let parse: Function = global_json.get("parse")?;
    parse.call((json_text,))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBridge;

    #[async_trait::async_trait]
    impl HostBridge for NullBridge {
        async fn fetch(&self, _plugin_id: &str, _url: &str, _opts: Value) -> Result<Value, SandboxError> {
            Err(SandboxError::PermissionDenied("network access denied".into()))
        }
        async fn get_secret(&self, _plugin_id: &str, _key: &str) -> Result<Option<String>, SandboxError> {
            Ok(None)
        }
        async fn store_items(&self, _plugin_id: &str, _items: Value) -> Result<(), SandboxError> {
            Ok(())
        }
        async fn query_items(&self, _plugin_id: &str, _filter: Value) -> Result<Value, SandboxError> {
            Ok(Value::Array(vec![]))
        }
        async fn mark_read(&self, _plugin_id: &str, _ids: Value) -> Result<(), SandboxError> {
            Ok(())
        }
        async fn archive(&self, _plugin_id: &str, _ids: Value) -> Result<(), SandboxError> {
            Ok(())
        }
        async fn request_ai(&self, _plugin_id: &str, _op: &str, _params: Value) -> Result<Value, SandboxError> {
            Ok(Value::Null)
        }
        fn emit_event(&self, _plugin_id: &str, _name: &str, _data: Value) {}
        fn log(&self, _plugin_id: &str, _level: &str, _message: &str) {}
    }

    #[tokio::test]
    async fn rejects_invalid_function_names() {
        let mut sandbox = Sandbox::new(
            "gmail".to_string(),
            Arc::new(NullBridge),
            SandboxConfig::default(),
        );
        sandbox.initialize().await.unwrap();
        let err = sandbox
            .invoke("); process.exit(1); (".to_string(), "[]".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidFunctionName(_)));
    }

    #[tokio::test]
    async fn invokes_a_guest_function_with_a_single_params_object() {
        let mut sandbox = Sandbox::new(
            "gmail".to_string(),
            Arc::new(NullBridge),
            SandboxConfig::default(),
        );
        sandbox.initialize().await.unwrap();
        // Entry points are declared with named parameters in the manifest
        // (see `ActionParam`), so the decoded JSON arrives as one object,
        // not spread across positional parameters.
        sandbox
            .eval("function action_archive(args) { return args.count * 2; }".to_string())
            .await
            .unwrap();
        let result = sandbox
            .invoke(
                "action_archive".to_string(),
                serde_json::json!({"count": 21}).to_string(),
            )
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(42));

        // A second, unrelated parameter is never materialized — confirms
        // the call is not spreading array elements positionally.
        sandbox
            .eval("function sees_one_arg(a, b) { return b === undefined; }".to_string())
            .await
            .unwrap();
        let result = sandbox
            .invoke(
                "sees_one_arg".to_string(),
                serde_json::json!([1, 2]).to_string(),
            )
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(true));
    }

    #[tokio::test]
    async fn invoke_returns_object_results_like_a_sync_entry_point() {
        let mut sandbox = Sandbox::new(
            "gmail".to_string(),
            Arc::new(NullBridge),
            SandboxConfig::default(),
        );
        sandbox.initialize().await.unwrap();
        sandbox
            .eval(
                "function sync() { return { itemsSynced: 3, items: [{externalId: 'e1'}] }; }"
                    .to_string(),
            )
            .await
            .unwrap();
        let result = sandbox
            .invoke("sync".to_string(), "[]".to_string())
            .await
            .unwrap();
        assert_eq!(result["itemsSynced"], serde_json::json!(3));
        assert_eq!(result["items"][0]["externalId"], serde_json::json!("e1"));
    }

    #[tokio::test]
    async fn disposal_is_idempotent_and_rejects_further_calls() {
        let mut sandbox = Sandbox::new(
            "gmail".to_string(),
            Arc::new(NullBridge),
            SandboxConfig::default(),
        );
        sandbox.initialize().await.unwrap();
        sandbox.dispose();
        sandbox.dispose();
        let err = sandbox.eval("1 + 1".to_string()).await.unwrap_err();
        assert!(matches!(err, SandboxError::Disposed));
    }
}
