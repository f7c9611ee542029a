//! Script sandbox: a pool of isolates serving render calls.
//!
//! A V8 isolate is neither `Send` nor reentrant, so each one lives on its own
//! worker thread and drains a job queue one render at a time. That queue is
//! the critical section. With `workers = 1` every render in the process is
//! serialized through a single isolate; more workers trade memory for
//! parallelism.
//!
//! ## Timeouts
//!
//! A caller that stops waiting cannot by itself stop V8. When a render
//! outlives `timeout_ms` the caller asks the isolate to terminate, but only
//! if its own job is still the one executing. The worker then throws the
//! isolate away and boots a fresh one before taking the next job, so nothing
//! an abandoned call did can leak into later renders.

use crate::error::SandboxError;
use crate::props::{sanitize_props, Props};
use crate::runtime::{self, SandboxConfig};
use async_trait::async_trait;
use deno_core::v8;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Jobs waiting per worker before `render` applies backpressure.
const QUEUE_DEPTH: usize = 64;

/// Input of one render call. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    component: String,
    props: Props,
    path: String,
    query: BTreeMap<String, String>,
}

impl RenderRequest {
    pub fn new(component: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            props: Props::new(),
            path: path.into(),
            query: BTreeMap::new(),
        }
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.props = props;
        self
    }

    pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }
}

/// Output of one render call.
///
/// When `error` is set, the other fields carry no usable content.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderResult {
    pub html: String,
    pub css: String,
    pub js: String,
    pub data: Props,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RenderResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Anything that turns a [`RenderRequest`] into markup.
#[async_trait]
pub trait ComponentRenderer: Send + Sync {
    async fn render(&self, request: RenderRequest) -> Result<RenderResult, SandboxError>;
}

struct Job {
    id: u64,
    request: RenderRequest,
    reply: oneshot::Sender<Result<RenderResult, SandboxError>>,
}

/// State shared between a worker thread and the callers feeding it.
#[derive(Default)]
struct WorkerState {
    isolate: Option<v8::IsolateHandle>,
    in_flight: Option<u64>,
    terminated: bool,
}

struct Worker {
    jobs: mpsc::Sender<Job>,
    state: Arc<Mutex<WorkerState>>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Terminate the running script if it is still job `id`.
    fn terminate(&self, id: u64) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if state.in_flight != Some(id) {
            return false;
        }
        if let Some(isolate) = &state.isolate {
            isolate.terminate_execution();
            state.terminated = true;
            return true;
        }
        false
    }
}

/// Handle to the isolate pool. Cheap to share behind an `Arc`.
pub struct ScriptSandbox {
    workers: Vec<Worker>,
    next_worker: AtomicUsize,
    next_job: AtomicU64,
    timeout: Option<Duration>,
}

impl ScriptSandbox {
    /// Boot `config.workers` isolates and load the component bundle into each.
    ///
    /// Fails if any isolate cannot load its baseline scripts. Callers are
    /// expected to keep serving without SSR in that case.
    pub async fn start(config: SandboxConfig) -> Result<Self, SandboxError> {
        let count = config.workers.max(1);
        let mut workers = Vec::with_capacity(count);

        for index in 0..count {
            let (jobs_tx, jobs_rx) = mpsc::channel(QUEUE_DEPTH);
            let (ready_tx, ready_rx) = oneshot::channel();
            let state = Arc::new(Mutex::new(WorkerState::default()));

            let worker_state = Arc::clone(&state);
            let worker_config = config.clone();
            let thread = std::thread::Builder::new()
                .name(format!("ssr-sandbox-{}", index))
                .spawn(move || run_worker(worker_config, jobs_rx, worker_state, ready_tx))
                .map_err(|e| SandboxError::Startup(format!("Failed to spawn worker: {}", e)))?;

            workers.push(Worker {
                jobs: jobs_tx,
                state,
                thread: Some(thread),
            });

            match ready_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(SandboxError::Startup(
                        "Worker exited during startup".to_string(),
                    ))
                }
            }
        }

        tracing::info!(workers = count, timeout_ms = ?config.timeout_ms, "script sandbox ready");

        Ok(Self {
            workers,
            next_worker: AtomicUsize::new(0),
            next_job: AtomicU64::new(1),
            timeout: config.timeout_ms.map(Duration::from_millis),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Render `request.component()` with the request's props, path and query.
    pub async fn render(&self, request: RenderRequest) -> Result<RenderResult, SandboxError> {
        sanitize_props(request.props())
            .map_err(|e| SandboxError::Serialization(e.to_string()))?;

        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let worker = &self.workers[index];
        let id = self.next_job.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        worker
            .jobs
            .send(Job {
                id,
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SandboxError::Unavailable)?;

        let Some(limit) = self.timeout else {
            return reply_rx.await.map_err(|_| SandboxError::Unavailable)?;
        };

        match tokio::time::timeout(limit, reply_rx).await {
            Ok(reply) => reply.map_err(|_| SandboxError::Unavailable)?,
            Err(_) => {
                let terminated = worker.terminate(id);
                tracing::warn!(job = id, worker = index, terminated, "render timed out");
                Err(SandboxError::Timeout(limit))
            }
        }
    }

    /// Close the job queues and wait for every worker thread to finish.
    pub async fn shutdown(mut self) {
        let threads: Vec<_> = self
            .workers
            .drain(..)
            .filter_map(|mut worker| worker.thread.take())
            .collect();

        let joined = tokio::task::spawn_blocking(move || {
            for thread in threads {
                let _ = thread.join();
            }
        })
        .await;

        if joined.is_err() {
            tracing::warn!("sandbox worker join failed");
        }
        tracing::info!("script sandbox stopped");
    }
}

#[async_trait]
impl ComponentRenderer for ScriptSandbox {
    async fn render(&self, request: RenderRequest) -> Result<RenderResult, SandboxError> {
        ScriptSandbox::render(self, request).await
    }
}

fn run_worker(
    config: SandboxConfig,
    mut jobs: mpsc::Receiver<Job>,
    state: Arc<Mutex<WorkerState>>,
    ready: oneshot::Sender<Result<(), SandboxError>>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(SandboxError::Startup(e.to_string())));
            return;
        }
    };

    let mut isolate = match rt.block_on(runtime::boot(&config)) {
        Ok(js) => Some(js),
        Err(e) => {
            tracing::error!(error = %e, "sandbox failed to load baseline scripts");
            let _ = ready.send(Err(SandboxError::Startup(e.to_string())));
            return;
        }
    };
    publish_isolate(&state, isolate.as_mut());
    let _ = ready.send(Ok(()));

    while let Some(job) = jobs.blocking_recv() {
        if job.reply.is_closed() {
            tracing::debug!(job = job.id, "caller gave up before render started");
            continue;
        }

        if isolate.is_none() {
            isolate = reboot(&rt, &config, &state);
        }
        let Some(js) = isolate.as_mut() else {
            let _ = job.reply.send(Err(SandboxError::Unavailable));
            continue;
        };

        set_in_flight(&state, Some(job.id));
        let mut result = rt.block_on(runtime::execute_render(js, &job.request));
        let terminated = set_in_flight(&state, None);
        let exhausted = runtime::heap_exhausted(js);
        if exhausted {
            result = Err(SandboxError::Render("Render exceeded the heap limit".to_string()));
        }

        if terminated || exhausted {
            // Drop the old isolate before creating its replacement
            drop(isolate.take());
            publish_isolate(&state, None);
            isolate = reboot(&rt, &config, &state);
        }

        let _ = job.reply.send(result);
    }

    tracing::debug!("sandbox worker exiting");
}

/// Boot a replacement isolate. On failure the worker stays without one and
/// the next job tries again.
fn reboot(
    rt: &tokio::runtime::Runtime,
    config: &SandboxConfig,
    state: &Mutex<WorkerState>,
) -> Option<deno_core::JsRuntime> {
    match rt.block_on(runtime::boot(config)) {
        Ok(mut js) => {
            publish_isolate(state, Some(&mut js));
            tracing::info!("sandbox isolate recreated");
            Some(js)
        }
        Err(e) => {
            tracing::error!(error = %e, "sandbox isolate could not be recreated");
            None
        }
    }
}

fn publish_isolate(state: &Mutex<WorkerState>, js: Option<&mut deno_core::JsRuntime>) {
    if let Ok(mut state) = state.lock() {
        state.isolate = js.map(|js| js.v8_isolate().thread_safe_handle());
    }
}

/// Marks the running job and returns whether the previous one was terminated.
fn set_in_flight(state: &Mutex<WorkerState>, job: Option<u64>) -> bool {
    match state.lock() {
        Ok(mut state) => {
            state.in_flight = job;
            std::mem::take(&mut state.terminated)
        }
        Err(_) => false,
    }
}
