//! # Rexo SSR
//!
//! Server-side rendering for Rexo pages on a sandboxed deno_core runtime.
//!
//! A request flows through [`RequestClassifier`] (full page or JSON
//! fragment), [`DataFetcher`] (route-keyed page data under a deadline), the
//! [`ScriptSandbox`] (component code in V8) and back out through the
//! [`Renderer`], which owns caching and response assembly.
//!
//! ## Sandbox guarantees
//!
//! - **No filesystem access**: only the bundle directory is readable
//! - **No network access**: remote, `data:` and `blob:` imports are blocked
//! - **No environment access**: `process.env`, `Deno.env` don't exist
//! - **Bounded**: renders are time-limited and the heap is capped
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rexo_ssr::{DataFetcher, MemoryUserStore, PageRequest, RenderConfig, Renderer,
//!     RequestContext, SandboxConfig, ScriptSandbox};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sandbox = ScriptSandbox::start(SandboxConfig::default()).await?;
//!     let fetcher = DataFetcher::new(Arc::new(MemoryUserStore::new()));
//!     let renderer = Renderer::new(fetcher, RenderConfig::default())?
//!         .with_sandbox(Arc::new(sandbox));
//!
//!     if let Some(response) = renderer.handle(&PageRequest::new("/"), &RequestContext::default()).await {
//!         println!("{}", response.body);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod classify;
pub mod config;
pub mod data;
pub mod error;
mod loader;
pub mod markup;
mod ops;
pub mod props;
pub mod render;
mod runtime;
pub mod sandbox;
pub mod telemetry;
pub mod template;

pub use cache::{CacheBackend, CacheConfig, CacheLookup, CacheStore, MemoryCache, PageCache, RedisCache};
pub use classify::{ClassifierConfig, RenderMode, RequestClassifier, RequestHeaders};
pub use config::{AppConfig, ConfigLoader};
pub use data::{DataFetcher, MemoryUserStore, PageData, UserId, UserProjection, UserStore};
pub use error::SandboxError;
pub use loader::BundleLoader;
pub use props::{PropValue, Props};
pub use render::{FragmentEnvelope, PageRequest, RenderConfig, RenderResponse, Renderer, RequestContext};
pub use runtime::SandboxConfig;
pub use sandbox::{ComponentRenderer, RenderRequest, RenderResult, ScriptSandbox};
pub use telemetry::{init_logging, LoggingConfig};
