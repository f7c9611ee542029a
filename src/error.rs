//! Error taxonomy for the rendering pipeline.
//!
//! Each layer owns its error type. Only [`TemplateError`] is fatal for a
//! request; the renderer absorbs the others into degraded responses.

use std::time::Duration;
use thiserror::Error;

/// Failures raised by the script sandbox.
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Render timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Failed to start sandbox: {0}")]
    Startup(String),

    #[error("Sandbox is unavailable")]
    Unavailable,
}

impl SandboxError {
    /// Short machine-readable label, used in error markup and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ComponentNotFound(_) => "component_not_found",
            Self::Render(_) => "render_error",
            Self::Serialization(_) => "serialization_error",
            Self::Timeout(_) => "timeout",
            Self::Startup(_) => "startup",
            Self::Unavailable => "unavailable",
        }
    }

    /// Fatal failures mean the sandbox cannot serve any request right now.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Startup(_))
    }
}

/// Failures raised by the data layer. Never fatal for a render.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Data fetch timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("User {0} not found")]
    NotFound(u64),

    #[error("Data fetch failed: {0}")]
    Failed(String),
}

/// Failures raised by a cache backend. Callers treat them as misses.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Document assembly failures. Fatal for the request (500).
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template binding '{0}' is missing")]
    MissingBinding(&'static str),

    #[error("Template binding '{0}' must be a string")]
    InvalidBinding(&'static str),

    #[error("Template rendering failed: {0}")]
    Render(String),
}

impl From<tera::Error> for TemplateError {
    fn from(err: tera::Error) -> Self {
        // tera keeps the useful part ("Variable `x` not found") in the source chain
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Render(message)
    }
}

/// Props rejected before they reach the sandbox.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropsError {
    #[error("Prototype pollution attempt: '{0}' key is forbidden in props")]
    ForbiddenKey(String),

    #[error("Props nesting too deep (max {0} levels)")]
    TooDeep(usize),
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
