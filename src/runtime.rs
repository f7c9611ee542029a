//! SSR Runtime - executes component code in a sandboxed V8 isolate.
//!
//! One `JsRuntime` per sandbox worker. The runtime is booted once with the
//! `ssr_runtime` extension and a component bundle, then serves render calls
//! until it is dropped. Nothing here is `Send`; the worker thread in
//! `sandbox.rs` owns the isolate for its whole life.

use crate::error::SandboxError;
use crate::loader::BundleLoader;
use crate::markup::{self, Node};
use crate::ops::{ssr_runtime, ConsoleOutput};
use crate::props::Props;
use crate::sandbox::{RenderRequest, RenderResult};
use anyhow::{anyhow, Error};
use deno_core::{
    v8, JsRuntime, ModuleLoader, ModuleSpecifier, NoopModuleLoader, PollEventLoopOptions,
    RuntimeOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pages evaluated when no bundle directory is configured.
const BUILTIN_COMPONENTS: &str = include_str!("components.js");

/// Configuration for the SSR sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory holding the component bundle (None = built-in pages)
    pub bundle_dir: Option<String>,
    /// Entry module inside `bundle_dir`
    pub entry: String,
    /// Maximum heap size in bytes (default: 64MB, None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Maximum time for a single render in milliseconds (None = unlimited)
    pub timeout_ms: Option<u64>,
    /// Number of isolates rendering in parallel
    pub workers: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            bundle_dir: None,
            entry: String::from("app.js"),
            max_heap_size: Some(64 * 1024 * 1024), // 64MB default
            timeout_ms: Some(5_000),
            workers: 1,
        }
    }
}

/// Set when the isolate hit its heap limit. An exhausted isolate is not reused.
#[derive(Debug, Clone, Default)]
pub struct HeapExhausted(Arc<AtomicBool>);

/// Whether the runtime ran out of heap since it was created.
pub fn heap_exhausted(runtime: &mut JsRuntime) -> bool {
    runtime
        .op_state()
        .borrow()
        .try_borrow::<HeapExhausted>()
        .is_some_and(|flag| flag.0.load(Ordering::SeqCst))
}

/// Create a sandboxed JS runtime with the render extension installed.
pub fn create_runtime(config: &SandboxConfig) -> Result<JsRuntime, Error> {
    let module_loader: Rc<dyn ModuleLoader> = match &config.bundle_dir {
        Some(dir) => Rc::new(BundleLoader::new(dir)?),
        None => Rc::new(NoopModuleLoader),
    };

    // Configure V8 heap limits if specified
    let create_params = config
        .max_heap_size
        .map(|max_bytes| v8::Isolate::create_params().heap_limits(0, max_bytes));

    let mut runtime = JsRuntime::new(RuntimeOptions {
        module_loader: Some(module_loader),
        extensions: vec![ssr_runtime::init_ops_and_esm()],
        create_params,
        ..Default::default()
    });

    let exhausted = HeapExhausted::default();
    if config.max_heap_size.is_some() {
        let isolate = runtime.v8_isolate().thread_safe_handle();
        let flag = exhausted.clone();
        runtime.add_near_heap_limit_callback(move |current, initial| {
            tracing::warn!(
                current_mb = current / (1024 * 1024),
                initial_mb = initial / (1024 * 1024),
                "sandbox isolate near heap limit, terminating render"
            );
            // Stop the script and give V8 headroom to unwind; the worker
            // discards this isolate afterwards.
            flag.0.store(true, Ordering::SeqCst);
            isolate.terminate_execution();
            current * 2
        });
    }

    runtime.op_state().borrow_mut().put(ConsoleOutput::default());
    runtime.op_state().borrow_mut().put(exhausted);

    Ok(runtime)
}

/// Evaluate the component bundle (or the built-in pages) into the runtime.
pub async fn load_components(runtime: &mut JsRuntime, config: &SandboxConfig) -> Result<(), Error> {
    match &config.bundle_dir {
        Some(dir) => {
            let entry = Path::new(dir).join(&config.entry);
            let entry = entry
                .canonicalize()
                .map_err(|e| anyhow!("Invalid bundle entry '{}': {}", entry.display(), e))?;
            let specifier = ModuleSpecifier::from_file_path(&entry)
                .map_err(|_| anyhow!("Failed to create module specifier for '{}'", entry.display()))?;

            let module_id = runtime.load_main_es_module(&specifier).await?;
            let evaluation = runtime.mod_evaluate(module_id);
            runtime
                .run_event_loop(PollEventLoopOptions::default())
                .await?;
            evaluation.await?;
        }
        None => {
            runtime.execute_script("<ssr-components>", BUILTIN_COMPONENTS)?;
        }
    }

    let registered = runtime.execute_script("<ssr-components>", "SSR.components().length")?;
    let count = {
        let scope = &mut runtime.handle_scope();
        let local = v8::Local::new(scope, &registered);
        local.uint32_value(scope).unwrap_or(0)
    };
    if count == 0 {
        return Err(anyhow!("Component bundle registered no components"));
    }
    tracing::info!(components = count, "sandbox components loaded");

    Ok(())
}

/// Create a runtime and load components into it.
pub async fn boot(config: &SandboxConfig) -> Result<JsRuntime, Error> {
    let mut runtime = create_runtime(config)?;
    load_components(&mut runtime, config).await?;
    Ok(runtime)
}

#[derive(Serialize)]
struct CallContext<'a> {
    path: &'a str,
    query: &'a BTreeMap<String, String>,
    props: &'a Props,
}

/// What the bootstrap's render entry returns (as a JSON string).
#[derive(Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    node: Option<Node>,
    #[serde(default)]
    css: String,
    #[serde(default)]
    js: String,
    #[serde(default)]
    data: Props,
}

/// Execute one render call and convert its output to a `RenderResult`.
///
/// The render context (path, query, props) travels as arguments of a single
/// call; the bootstrap clears it again before returning.
pub async fn execute_render(
    runtime: &mut JsRuntime,
    request: &RenderRequest,
) -> Result<RenderResult, SandboxError> {
    let component = serde_json::to_string(request.component())
        .map_err(|e| SandboxError::Serialization(e.to_string()))?;
    let context = serde_json::to_string(&CallContext {
        path: request.path(),
        query: request.query(),
        props: request.props(),
    })
    .map_err(|e| SandboxError::Serialization(e.to_string()))?;

    let render_code = format!(
        "globalThis.__ssr_internal_render__({}, {})",
        component, context
    );

    let outcome = run_render(runtime, render_code).await;

    // Console output belongs to this call only
    let console = std::mem::take(runtime.op_state().borrow_mut().borrow_mut::<ConsoleOutput>());
    if !console.is_empty() {
        console.emit(request.component());
    }

    let raw = outcome?;
    let envelope: Envelope = serde_json::from_str(&raw)
        .map_err(|e| SandboxError::Serialization(format!("Malformed render output: {}", e)))?;

    if !envelope.ok {
        let message = envelope.message.unwrap_or_else(|| "unknown failure".to_string());
        return Err(match envelope.kind.as_deref() {
            Some("not_found") => SandboxError::ComponentNotFound(request.component().to_string()),
            Some("serialization") => SandboxError::Serialization(message),
            _ => SandboxError::Render(message),
        });
    }

    let html = match &envelope.node {
        Some(node) => markup::render_to_string(node).map_err(SandboxError::Serialization)?,
        None => String::new(),
    };

    Ok(RenderResult {
        html,
        css: envelope.css,
        js: envelope.js,
        data: envelope.data,
        error: None,
    })
}

async fn run_render(runtime: &mut JsRuntime, render_code: String) -> Result<String, SandboxError> {
    let result = runtime
        .execute_script("<ssr>", render_code)
        .map_err(|e| SandboxError::Render(e.to_string()))?;

    // Run event loop to settle async components
    runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await
        .map_err(|e| SandboxError::Render(e.to_string()))?;

    let scope = &mut runtime.handle_scope();
    let local = v8::Local::new(scope, &result);

    if let Ok(promise) = v8::Local::<v8::Promise>::try_from(local) {
        match promise.state() {
            v8::PromiseState::Fulfilled => {
                let value = promise.result(scope);
                if value.is_string() {
                    Ok(value.to_rust_string_lossy(scope))
                } else {
                    Err(SandboxError::Serialization(
                        "Render entry must resolve to a string".to_string(),
                    ))
                }
            }
            v8::PromiseState::Rejected => {
                let exception = promise.result(scope);
                Err(SandboxError::Render(format!(
                    "Render function threw: {}",
                    exception.to_rust_string_lossy(scope)
                )))
            }
            v8::PromiseState::Pending => Err(SandboxError::Render(
                "Render function returned unresolved promise".to_string(),
            )),
        }
    } else if local.is_string() {
        Ok(local.to_rust_string_lossy(scope))
    } else {
        Err(SandboxError::Serialization(
            "Render entry must return a string".to_string(),
        ))
    }
}
