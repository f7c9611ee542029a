//! Request orchestration.
//!
//! [`Renderer`] classifies a request, loads page data under a deadline,
//! merges it with the caller's props, asks the sandbox for markup and wraps
//! the result either in the document template or in a JSON envelope.
//!
//! Only template failures fail a request. Data fetch problems fall back to
//! default page data, cache problems are misses, and sandbox failures show
//! up as an inline error block (full page) or `success: false` (fragment).

use crate::cache::PageCache;
use crate::classify::{RenderMode, RequestClassifier, RequestHeaders};
use crate::data::{component_for, fetch_with_timeout, DataFetcher, PageData, UserId, ROUTES};
use crate::error::{SandboxError, TemplateError};
use crate::markup::escape_html;
use crate::props::{merge_props, PropValue, Props};
use crate::sandbox::{ComponentRenderer, RenderRequest, RenderResult};
use crate::template::{hydration_json, Bindings, DocumentTemplate};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const CACHE_STATUS_HEADER: &str = "X-SSR-Cache";

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Extensions served by the static file handler, never rendered.
const STATIC_EXTENSIONS: &[&str] = &[
    ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2", ".ttf",
    ".eot", ".pdf", ".zip", ".mp4", ".mp3",
];

/// Rendering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// `<meta name="keywords">` of every page
    pub keywords: String,
    /// Cache-Control of successful full-page responses
    pub cache_control: String,
    /// Document template file (None = built-in)
    pub template_path: Option<String>,
    /// Title used when page data is unavailable
    pub default_title: String,
    /// Description used when page data is unavailable
    pub default_description: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            keywords: String::from("rexo,react,rust,ssr,fullstack"),
            cache_control: String::from("public, max-age=300"),
            template_path: None,
            default_title: String::from("Rexo"),
            default_description: String::from("基于 Rust + React 的全栈研发框架"),
        }
    }
}

/// What the transport asks to render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRequest {
    pub path: String,
    pub query: BTreeMap<String, String>,
    /// Component override; the route table decides when unset.
    pub component: Option<String>,
    /// Caller props, winning over page data on collision.
    pub props: Props,
}

impl PageRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.props = props;
        self
    }
}

/// Per-request inputs resolved by the transport.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub headers: RequestHeaders,
    /// Identity resolved by the auth layer, if any.
    pub user: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RenderResponse {
    fn new(status: u16, content_type: &str, body: String) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body,
        }
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// First header named `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }
}

/// Body of a fragment response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FragmentData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentData {
    pub html: String,
    pub css: String,
    pub js: String,
    pub data: Props,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Bypass => "BYPASS",
        }
    }
}

/// Outcome of the shared part of both render modes.
struct Rendered {
    props: Props,
    result: Result<RenderResult, SandboxError>,
    /// Page data is the fallback; the page must not be cached.
    degraded: bool,
}

pub struct Renderer {
    sandbox: Option<Arc<dyn ComponentRenderer>>,
    fetcher: DataFetcher,
    classifier: RequestClassifier,
    cache: Option<PageCache>,
    template: DocumentTemplate,
    fetch_timeout: Duration,
    config: RenderConfig,
}

impl Renderer {
    /// A renderer without sandbox or cache. SSR stays disabled until
    /// [`Renderer::with_sandbox`] is called.
    pub fn new(fetcher: DataFetcher, config: RenderConfig) -> Result<Self, TemplateError> {
        let template = DocumentTemplate::load(config.template_path.as_deref())?;
        Ok(Self {
            sandbox: None,
            fetcher,
            classifier: RequestClassifier::default(),
            cache: None,
            template,
            fetch_timeout: Duration::from_secs(3),
            config,
        })
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn ComponentRenderer>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_cache(mut self, cache: PageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_classifier(mut self, classifier: RequestClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// False when the sandbox failed to start; only API traffic is served then.
    pub fn ssr_enabled(&self) -> bool {
        self.sandbox.is_some()
    }

    /// Render `request` in the mode its headers ask for.
    ///
    /// Returns `None` for requests this renderer does not own (API and
    /// static asset paths, or everything while SSR is disabled).
    pub async fn handle(&self, request: &PageRequest, context: &RequestContext) -> Option<RenderResponse> {
        if !self.ssr_enabled() || is_passthrough(&request.path) {
            return None;
        }

        let (mode, reason) = self.classifier.decide(&context.headers);
        tracing::debug!(path = %request.path, ?mode, ?reason, "request classified");

        let response = match mode {
            RenderMode::Fragment => self.render_fragment(request, context).await,
            RenderMode::FullPage => match self.render_page(request, context).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(path = %request.path, error = %e, "document template failed");
                    let body = format!("Template rendering failed: {}", e);
                    RenderResponse::new(500, "text/plain; charset=utf-8", body)
                }
            },
        };
        Some(response)
    }

    /// Full HTML document. Only a template failure is an error.
    pub async fn render_page(
        &self,
        request: &PageRequest,
        context: &RequestContext,
    ) -> Result<RenderResponse, TemplateError> {
        let cache = self.cache.as_ref().filter(|_| is_cacheable(request));

        if let Some(cache) = cache {
            if let Some(body) = cache.get_page(&request.path, context.user).await {
                return Ok(self.page_response(200, body, CacheStatus::Hit));
            }
        }

        let Rendered { props, result, degraded } = self.render_component(request, context).await;

        let title = text_prop(&props, "title")
            .unwrap_or(self.config.default_title.as_str())
            .to_string();
        let description = text_prop(&props, "description")
            .unwrap_or(self.config.default_description.as_str())
            .to_string();

        let (status, rendered, hydration) = match result {
            Ok(result) => {
                let hydration = merge_props(props, &result.data);
                (200, Ok(result), hydration)
            }
            Err(e) => {
                let status = if e.is_fatal() { 503 } else { 200 };
                (status, Err(e), props)
            }
        };

        let data = hydration_json(&hydration).map_err(|e| TemplateError::Render(e.to_string()))?;
        let (html, css, js) = match &rendered {
            Ok(result) => (result.html.clone(), result.css.clone(), result.js.clone()),
            Err(e) => (error_fragment(e), String::new(), String::new()),
        };

        let bindings = Bindings::new()
            .set("title", title)
            .set("description", description)
            .set("keywords", self.config.keywords.clone())
            .set("html", html)
            .set("css", css)
            .set("js", js)
            .set("data", data)
            .set("path", request.path.clone())
            .set("timestamp", Utc::now().timestamp().to_string());
        let body = self.template.render(&bindings)?;

        if rendered.is_err() || degraded {
            return Ok(RenderResponse::new(status, HTML_CONTENT_TYPE, body)
                .with_header("Cache-Control", "no-store")
                .with_header(CACHE_STATUS_HEADER, CacheStatus::Bypass.as_str()));
        }

        let cache_status = match cache {
            Some(cache) => {
                cache.set_page(&request.path, context.user, &body).await;
                CacheStatus::Miss
            }
            None => CacheStatus::Bypass,
        };
        Ok(self.page_response(status, body, cache_status))
    }

    /// JSON envelope for client-side navigation. Never fails.
    pub async fn render_fragment(&self, request: &PageRequest, context: &RequestContext) -> RenderResponse {
        let Rendered { props, result, .. } = self.render_component(request, context).await;

        let (status, envelope) = match result {
            Ok(result) => (
                200,
                FragmentEnvelope {
                    success: true,
                    data: Some(FragmentData {
                        data: merge_props(props, &result.data),
                        html: result.html,
                        css: result.css,
                        js: result.js,
                    }),
                    error: None,
                },
            ),
            Err(e) => (
                500,
                FragmentEnvelope {
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                },
            ),
        };

        let body = serde_json::to_string(&envelope).unwrap_or_else(|e| {
            tracing::error!(error = %e, "fragment envelope not serializable");
            String::from(r#"{"success":false,"error":"Serialization error"}"#)
        });
        RenderResponse::new(status, JSON_CONTENT_TYPE, body).with_header("Cache-Control", "private, no-cache")
    }

    /// Page data for `path` from the data cache or the fetcher, bounded by
    /// the fetch timeout. Falls back to default data, which is never cached.
    pub async fn load_page_data(&self, path: &str, user: Option<UserId>) -> PageData {
        self.page_data(path, user).await.0
    }

    /// Like [`Renderer::load_page_data`], also telling whether the fallback
    /// was used.
    async fn page_data(&self, path: &str, user: Option<UserId>) -> (PageData, bool) {
        if let Some(cache) = &self.cache {
            if let Some(data) = cache.get_data(path, user).await {
                return (data, false);
            }
        }

        match fetch_with_timeout(self.fetch_timeout, self.fetcher.fetch_page_data(path, user)).await {
            Ok(data) => {
                if let Some(cache) = &self.cache {
                    cache.set_data(path, user, &data).await;
                }
                (data, false)
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "page data unavailable, using defaults");
                let data = PageData::fallback(path, &self.config.default_title, &self.config.default_description);
                (data, true)
            }
        }
    }

    /// Forget every cached page and page data entry of `user`.
    pub async fn invalidate_user(&self, user: UserId) {
        if let Some(cache) = &self.cache {
            cache.invalidate_user(user, ROUTES.iter().map(|route| route.path)).await;
            tracing::debug!(user = %user, "user cache entries invalidated");
        }
    }

    async fn render_component(&self, request: &PageRequest, context: &RequestContext) -> Rendered {
        let (data, degraded) = self.page_data(&request.path, context.user).await;
        let props = merge_props(data.into_props(), &request.props);

        let Some(sandbox) = &self.sandbox else {
            return Rendered {
                props,
                result: Err(SandboxError::Unavailable),
                degraded,
            };
        };

        let component = request
            .component
            .clone()
            .unwrap_or_else(|| component_for(&request.path).to_string());
        let render = RenderRequest::new(component.clone(), request.path.clone())
            .with_props(props.clone())
            .with_query(request.query.clone());

        let result = match sandbox.render(render).await {
            Ok(RenderResult { error: Some(message), .. }) => Err(SandboxError::Render(message)),
            other => other,
        };
        if let Err(e) = &result {
            tracing::warn!(component = %component, path = %request.path, kind = e.kind(), error = %e, "render failed");
        }

        Rendered { props, result, degraded }
    }

    fn page_response(&self, status: u16, body: String, cache_status: CacheStatus) -> RenderResponse {
        RenderResponse::new(status, HTML_CONTENT_TYPE, body)
            .with_header("Cache-Control", self.config.cache_control.clone())
            .with_header(CACHE_STATUS_HEADER, cache_status.as_str())
    }
}

/// API routes and static assets belong to other handlers.
pub fn is_passthrough(path: &str) -> bool {
    path.starts_with("/api/") || STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Pages depend on their query and on explicit props, neither of which is
/// part of the page key.
fn is_cacheable(request: &PageRequest) -> bool {
    request.query.is_empty() && request.props.is_empty()
}

fn text_prop<'a>(props: &'a Props, key: &str) -> Option<&'a str> {
    props.get(key).and_then(PropValue::as_str)
}

/// Visible error block shown in place of the page body.
fn error_fragment(error: &SandboxError) -> String {
    format!(
        "<div class=\"ssr-error\" role=\"alert\" data-ssr-error=\"{}\"><h2>页面渲染失败</h2><p>{}</p></div>",
        error.kind(),
        escape_html(&error.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::data::{MemoryUserStore, UserRecord, UserStore};
    use crate::error::FetchError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Renders `<div>{pageType}</div>` and echoes the props it saw.
    #[derive(Default)]
    struct EchoRenderer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ComponentRenderer for EchoRenderer {
        async fn render(&self, request: RenderRequest) -> Result<RenderResult, SandboxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let page_type = text_prop(request.props(), "pageType").unwrap_or("none");
            let mut data = Props::new();
            data.insert("renderedBy".into(), request.component().into());
            Ok(RenderResult {
                html: format!("<div>{}</div>", page_type),
                css: String::new(),
                js: String::new(),
                data,
                error: None,
            })
        }
    }

    struct FailingRenderer(SandboxError);

    #[async_trait]
    impl ComponentRenderer for FailingRenderer {
        async fn render(&self, _request: RenderRequest) -> Result<RenderResult, SandboxError> {
            Err(self.0.clone())
        }
    }

    struct SlowUsers;

    #[async_trait]
    impl UserStore for SlowUsers {
        async fn find_user(&self, _id: UserId) -> Result<Option<UserRecord>, FetchError> {
            std::future::pending().await
        }
    }

    fn renderer(sandbox: Arc<dyn ComponentRenderer>) -> Renderer {
        let fetcher = DataFetcher::new(Arc::new(MemoryUserStore::new()));
        Renderer::new(fetcher, RenderConfig::default())
            .unwrap()
            .with_sandbox(sandbox)
    }

    fn browser() -> RequestContext {
        RequestContext {
            headers: RequestHeaders::new().with("Accept", "text/html").with("User-Agent", "Mozilla/5.0"),
            user: None,
        }
    }

    fn xhr() -> RequestContext {
        RequestContext {
            headers: RequestHeaders::new().with("Accept", "application/json"),
            user: None,
        }
    }

    fn memory_cache() -> PageCache {
        PageCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(60), Duration::from_secs(60))
    }

    #[test]
    fn test_passthrough_paths() {
        assert!(is_passthrough("/api/users"));
        assert!(is_passthrough("/assets/app.js"));
        assert!(is_passthrough("/logo.svg"));
        assert!(is_passthrough("/fonts/inter.woff2"));
        assert!(!is_passthrough("/"));
        assert!(!is_passthrough("/about"));
        assert!(!is_passthrough("/apiary"));
    }

    #[tokio::test]
    async fn test_home_page_scenario() {
        let renderer = renderer(Arc::new(EchoRenderer::default()));
        let response = renderer.handle(&PageRequest::new("/"), &browser()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.content_type(), Some("text/html; charset=utf-8"));
        assert_eq!(response.header("cache-control"), Some("public, max-age=300"));
        assert!(response.body.contains("<div>home</div>"));
        assert!(response.body.contains("<title>Rexo - 全栈 React 研发框架</title>"));
        assert!(response.body.contains("\"pageType\":\"home\""));
        assert!(response.body.contains("\"renderedBy\":\"HomePage\""));
    }

    #[tokio::test]
    async fn test_fragment_success_envelope() {
        let renderer = renderer(Arc::new(EchoRenderer::default()));
        let response = renderer.handle(&PageRequest::new("/about"), &xhr()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.content_type(), Some("application/json"));
        let envelope: FragmentEnvelope = serde_json::from_str(&response.body).unwrap();
        assert!(envelope.success);
        let data = envelope.data.unwrap();
        assert_eq!(data.html, "<div>about</div>");
        assert_eq!(data.data["pageType"].as_str(), Some("about"));
    }

    #[tokio::test]
    async fn test_fragment_failure_envelope() {
        let failing = FailingRenderer(SandboxError::Render("boom".into()));
        let response = renderer(Arc::new(failing))
            .handle(&PageRequest::new("/"), &xhr())
            .await
            .unwrap();

        assert_eq!(response.status, 500);
        let envelope: FragmentEnvelope = serde_json::from_str(&response.body).unwrap();
        assert!(!envelope.success);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.error.as_deref(), Some("Render error: boom"));
    }

    #[tokio::test]
    async fn test_full_page_failure_shows_error_block() {
        let failing = FailingRenderer(SandboxError::Render("<b>bad</b> props".into()));
        let response = renderer(Arc::new(failing))
            .handle(&PageRequest::new("/about"), &browser())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert!(response.body.contains("class=\"ssr-error\""));
        assert!(response.body.contains("data-ssr-error=\"render_error\""));
        assert!(response.body.contains("&lt;b&gt;bad&lt;/b&gt; props"));
        assert!(response.body.contains("<title>关于 Rexo</title>"));
        assert_eq!(response.header("cache-control"), Some("no-store"));
    }

    #[tokio::test]
    async fn test_fatal_sandbox_failure_is_503() {
        let response = renderer(Arc::new(FailingRenderer(SandboxError::Unavailable)))
            .render_page(&PageRequest::new("/"), &browser())
            .await
            .unwrap();
        assert_eq!(response.status, 503);
        assert!(response.body.contains("ssr-error"));
    }

    #[tokio::test]
    async fn test_disabled_and_passthrough_are_not_handled() {
        let fetcher = DataFetcher::new(Arc::new(MemoryUserStore::new()));
        let disabled = Renderer::new(fetcher, RenderConfig::default()).unwrap();
        assert!(!disabled.ssr_enabled());
        assert!(disabled.handle(&PageRequest::new("/"), &browser()).await.is_none());

        let enabled = renderer(Arc::new(EchoRenderer::default()));
        assert!(enabled.handle(&PageRequest::new("/api/users"), &browser()).await.is_none());
        assert!(enabled.handle(&PageRequest::new("/main.css"), &browser()).await.is_none());
    }

    #[tokio::test]
    async fn test_explicit_props_win_over_page_data() {
        let mut props = Props::new();
        props.insert("pageType".into(), "custom".into());
        let response = renderer(Arc::new(EchoRenderer::default()))
            .handle(&PageRequest::new("/").with_props(props), &xhr())
            .await
            .unwrap();

        let envelope: FragmentEnvelope = serde_json::from_str(&response.body).unwrap();
        assert_eq!(envelope.data.unwrap().html, "<div>custom</div>");
    }

    #[tokio::test]
    async fn test_page_cache_hit_skips_sandbox() {
        let echo = Arc::new(EchoRenderer::default());
        let renderer = renderer(echo.clone()).with_cache(memory_cache());

        let first = renderer.handle(&PageRequest::new("/"), &browser()).await.unwrap();
        assert_eq!(first.header(CACHE_STATUS_HEADER), Some("MISS"));

        let second = renderer.handle(&PageRequest::new("/"), &browser()).await.unwrap();
        assert_eq!(second.header(CACHE_STATUS_HEADER), Some("HIT"));
        assert_eq!(second.body, first.body);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);

        let mut query = BTreeMap::new();
        query.insert("tab".into(), "2".into());
        let third = renderer
            .handle(&PageRequest::new("/").with_query(query), &browser())
            .await
            .unwrap();
        assert_eq!(third.header(CACHE_STATUS_HEADER), Some("BYPASS"));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_user_drops_cached_pages() {
        let echo = Arc::new(EchoRenderer::default());
        let renderer = renderer(echo.clone()).with_cache(memory_cache());
        let context = RequestContext {
            user: Some(UserId(5)),
            ..browser()
        };

        renderer.handle(&PageRequest::new("/dashboard"), &context).await.unwrap();
        renderer.invalidate_user(UserId(5)).await;
        let again = renderer.handle(&PageRequest::new("/dashboard"), &context).await.unwrap();

        assert_eq!(again.header(CACHE_STATUS_HEADER), Some("MISS"));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_data_falls_back_and_is_not_cached() {
        let cache = memory_cache();
        let renderer = Renderer::new(DataFetcher::new(Arc::new(SlowUsers)), RenderConfig::default())
            .unwrap()
            .with_sandbox(Arc::new(EchoRenderer::default()))
            .with_cache(cache.clone())
            .with_fetch_timeout(Duration::from_millis(50));

        let data = renderer.load_page_data("/dashboard", Some(UserId(1))).await;
        assert_eq!(data.page_type(), Some("unknown"));
        assert_eq!(data.title(), Some("Rexo"));
        assert!(cache.get_data("/dashboard", Some(UserId(1))).await.is_none());
    }

    #[tokio::test]
    async fn test_fallback_page_is_not_cached() {
        let cache = memory_cache();
        let echo = Arc::new(EchoRenderer::default());
        let renderer = Renderer::new(DataFetcher::new(Arc::new(SlowUsers)), RenderConfig::default())
            .unwrap()
            .with_sandbox(echo.clone())
            .with_cache(cache.clone())
            .with_fetch_timeout(Duration::from_millis(30));
        let context = RequestContext {
            user: Some(UserId(1)),
            ..browser()
        };

        let first = renderer.handle(&PageRequest::new("/dashboard"), &context).await.unwrap();
        assert_eq!(first.status, 200);
        assert!(first.body.contains("<div>unknown</div>"));
        assert_eq!(first.header(CACHE_STATUS_HEADER), Some("BYPASS"));
        assert_eq!(first.header("cache-control"), Some("no-store"));
        assert!(cache.get_page("/dashboard", Some(UserId(1))).await.is_none());

        let second = renderer.handle(&PageRequest::new("/dashboard"), &context).await.unwrap();
        assert_eq!(second.header(CACHE_STATUS_HEADER), Some("BYPASS"));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_template_failure_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("document.html");
        std::fs::write(&path, "<html>{{ html | safe }}{{ nope }}</html>").unwrap();

        let cache = memory_cache();
        let config = RenderConfig {
            template_path: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let renderer = Renderer::new(DataFetcher::new(Arc::new(MemoryUserStore::new())), config)
            .unwrap()
            .with_sandbox(Arc::new(EchoRenderer::default()))
            .with_cache(cache.clone());

        let response = renderer.handle(&PageRequest::new("/about"), &browser()).await.unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(response.content_type(), Some("text/plain; charset=utf-8"));
        assert!(response.body.starts_with("Template rendering failed"));
        assert!(cache.get_page("/about", None).await.is_none());
    }

    #[tokio::test]
    async fn test_page_data_is_cached() {
        let cache = memory_cache();
        let renderer = renderer(Arc::new(EchoRenderer::default())).with_cache(cache.clone());

        let data = renderer.load_page_data("/about", None).await;
        assert_eq!(cache.get_data("/about", None).await, Some(data));
    }
}
