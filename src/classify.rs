//! Full page or fragment?
//!
//! Client-side navigation asks for JSON and gets a fragment; crawlers,
//! prerender services and ordinary browsers get a complete document.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    FullPage,
    Fragment,
}

/// Why the classifier picked a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    AcceptsJson,
    Crawler,
    Prerender,
    Default,
}

/// Request headers with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders(HashMap<String, String>);

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

/// Classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// User-agent substrings that identify crawlers (case-insensitive)
    pub crawler_signatures: Vec<String>,
    /// Header whose presence marks a prerender request
    pub prerender_header: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            crawler_signatures: ["bot", "crawler", "spider", "googlebot", "bingbot", "baiduspider"]
                .into_iter()
                .map(String::from)
                .collect(),
            prerender_header: String::from("X-Prerender"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestClassifier {
    signatures: Vec<String>,
    prerender_header: String,
}

impl RequestClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            signatures: config
                .crawler_signatures
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            prerender_header: config.prerender_header.clone(),
        }
    }

    pub fn classify(&self, headers: &RequestHeaders) -> RenderMode {
        self.decide(headers).0
    }

    /// Mode plus the rule that produced it, checked in priority order.
    pub fn decide(&self, headers: &RequestHeaders) -> (RenderMode, Reason) {
        if headers
            .get("accept")
            .is_some_and(|accept| accept.to_ascii_lowercase().contains("application/json"))
        {
            return (RenderMode::Fragment, Reason::AcceptsJson);
        }

        if let Some(agent) = headers.get("user-agent") {
            let agent = agent.to_lowercase();
            if self.signatures.iter().any(|sig| agent.contains(sig.as_str())) {
                return (RenderMode::FullPage, Reason::Crawler);
            }
        }

        if headers
            .get(&self.prerender_header)
            .is_some_and(|value| !value.is_empty())
        {
            return (RenderMode::FullPage, Reason::Prerender);
        }

        (RenderMode::FullPage, Reason::Default)
    }
}

impl Default for RequestClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}
