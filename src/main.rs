//! Rexo SSR CLI
//!
//! Single-shot mode:
//!   rexo-ssr [--config <file>] <path> [props-json]
//!
//! Server mode (persistent process, reads from stdin):
//!   rexo-ssr [--config <file>] --server
//!
//! Protocol (server mode):
//!   Request (stdin, one JSON object per line):
//!     {"path":"/dashboard","userId":1,"headers":{"Accept":"text/html"}}
//!
//!   Response (stdout):
//!     Status:200
//!     Content-Type:text/html; charset=utf-8
//!     Length:1234
//!
//!     <!DOCTYPE html>...
//!
//!   Paths the renderer does not own answer `Status:404`; when the sandbox
//!   failed to start every request answers `Status:503`.

use anyhow::{anyhow, Result};
use rexo_ssr::cache::{self, CacheSweeper};
use rexo_ssr::{
    init_logging, AppConfig, ConfigLoader, DataFetcher, MemoryUserStore, PageCache, PageRequest, Props,
    RenderResponse, Renderer, RequestClassifier, RequestContext, RequestHeaders, ScriptSandbox, UserId,
    UserStore,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

fn print_usage() {
    eprintln!("Rexo SSR - server-side rendering for Rexo pages");
    eprintln!();
    eprintln!("Single-shot mode:");
    eprintln!("  rexo-ssr [--config <file>] <path> [props-json]");
    eprintln!();
    eprintln!("Server mode (persistent process):");
    eprintln!("  rexo-ssr [--config <file>] --server");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  rexo-ssr / '{{\"title\":\"Hello\"}}'");
    eprintln!("  echo '{{\"path\":\"/about\"}}' | rexo-ssr --server");
}

/// One server-mode request line.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    path: String,
    #[serde(default)]
    component: Option<String>,
    #[serde(default)]
    props: Props,
    #[serde(default)]
    query: BTreeMap<String, String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    user_id: Option<u64>,
}

impl WireRequest {
    fn into_parts(self) -> (PageRequest, RequestContext) {
        let mut request = PageRequest::new(self.path)
            .with_query(self.query)
            .with_props(self.props);
        if let Some(component) = self.component {
            request = request.with_component(component);
        }
        let context = RequestContext {
            headers: self.headers.into_iter().collect(),
            user: self.user_id.map(UserId),
        };
        (request, context)
    }
}

/// Everything that has to be torn down in order on exit.
struct App {
    renderer: Renderer,
    sandbox: Option<Arc<ScriptSandbox>>,
    sweeper: Option<CacheSweeper>,
}

impl App {
    async fn build(config: &AppConfig) -> Result<Self> {
        let users: Arc<dyn UserStore> = match &config.data.users_file {
            Some(path) => Arc::new(MemoryUserStore::from_json_file(path)?),
            None => Arc::new(MemoryUserStore::new()),
        };

        let handle = cache::connect(&config.cache).await;
        let page_cache = PageCache::from_config(handle.store, &config.cache);

        let mut renderer = Renderer::new(DataFetcher::new(users), config.render.clone())?
            .with_classifier(RequestClassifier::new(&config.classifier))
            .with_fetch_timeout(Duration::from_millis(config.data.fetch_timeout_ms))
            .with_cache(page_cache);

        // Degraded mode: without a sandbox only API traffic is served
        let sandbox = match ScriptSandbox::start(config.sandbox.clone()).await {
            Ok(sandbox) => {
                let sandbox = Arc::new(sandbox);
                renderer = renderer.with_sandbox(sandbox.clone());
                Some(sandbox)
            }
            Err(e) => {
                tracing::error!(error = %e, "SSR disabled: sandbox failed to start");
                None
            }
        };

        Ok(Self {
            renderer,
            sandbox,
            sweeper: handle.sweeper,
        })
    }

    async fn respond(&self, request: &PageRequest, context: &RequestContext) -> RenderResponse {
        if let Some(response) = self.renderer.handle(request, context).await {
            return response;
        }
        if self.renderer.ssr_enabled() {
            plain(404, format!("Not handled by SSR: {}", request.path))
        } else {
            plain(503, "SSR is disabled".to_string())
        }
    }

    async fn shutdown(self) {
        drop(self.renderer);
        if let Some(sandbox) = self.sandbox {
            match Arc::try_unwrap(sandbox) {
                Ok(sandbox) => sandbox.shutdown().await,
                Err(_) => tracing::warn!("sandbox still shared at shutdown"),
            }
        }
        if let Some(sweeper) = self.sweeper {
            sweeper.stop().await;
        }
    }
}

fn plain(status: u16, body: String) -> RenderResponse {
    RenderResponse {
        status,
        headers: vec![("Content-Type".to_string(), "text/plain; charset=utf-8".to_string())],
        body,
    }
}

/// Render one path and print the body
async fn run_single_shot(config: &AppConfig, path: &str, props_json: Option<&str>) -> Result<()> {
    let props: Props = match props_json {
        Some(json) => serde_json::from_str(json).map_err(|e| anyhow!("Invalid props JSON: {}", e))?,
        None => Props::new(),
    };

    let app = App::build(config).await?;
    let request = PageRequest::new(path).with_props(props);
    let context = RequestContext {
        headers: RequestHeaders::new().with("Accept", "text/html"),
        user: None,
    };

    let response = app.respond(&request, &context).await;
    app.shutdown().await;

    println!("{}", response.body);
    if response.status >= 400 {
        return Err(anyhow!("Render failed with status {}", response.status));
    }
    Ok(())
}

/// Serve requests from stdin until it closes
async fn run_server(config: &AppConfig) -> Result<()> {
    let app = App::build(config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    tracing::info!(ssr_enabled = app.renderer.ssr_enabled(), "server ready, reading from stdin");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WireRequest>(line) {
            Ok(wire) => {
                let (request, context) = wire.into_parts();
                app.respond(&request, &context).await
            }
            Err(e) => plain(400, format!("Invalid request JSON: {}", e)),
        };
        write_response(&mut stdout, &response)?;
    }

    tracing::info!("stdin closed, shutting down");
    app.shutdown().await;
    Ok(())
}

/// Write response in length-prefixed protocol
fn write_response(stdout: &mut std::io::Stdout, response: &RenderResponse) -> Result<()> {
    let mut out = stdout.lock();
    writeln!(out, "Status:{}", response.status)?;
    writeln!(out, "Content-Type:{}", response.content_type().unwrap_or("text/plain"))?;
    writeln!(out, "Length:{}", response.body.len())?;
    writeln!(out)?;
    write!(out, "{}", response.body)?;
    out.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_usage();
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(index) = args.iter().position(|arg| arg == "--config") {
        if index + 1 >= args.len() {
            print_usage();
            return Err(anyhow!("--config requires a file argument"));
        }
        let path = args.remove(index + 1);
        args.remove(index);
        loader = loader.with_config_path(path);
    }

    let config = loader.load()?;
    init_logging(&config.logging)?;
    match loader.config_file()? {
        Some(path) => tracing::info!(path = %path.display(), "configuration loaded"),
        None => tracing::info!("configuration loaded from defaults and environment"),
    }

    match args.first().map(String::as_str) {
        Some("--server") => run_server(&config).await,
        Some(path) => run_single_shot(&config, path, args.get(1).map(String::as_str)).await,
        None => {
            print_usage();
            Err(anyhow!("Missing required arguments"))
        }
    }
}
