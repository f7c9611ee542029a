//! HTML document template for full-page responses.
//!
//! Bindings are checked before tera runs, so a page is either complete or
//! not rendered at all. `html`, `css`, `js` and `data` are inserted raw; the
//! caller is responsible for them being safe in their position (the sandbox
//! escapes markup, [`hydration_json`] escapes the data blob).

use crate::error::TemplateError;
use crate::props::Props;
use std::collections::BTreeMap;
use std::path::Path;
use tera::{Context, Tera};

const TEMPLATE_NAME: &str = "document.html";
const BUILTIN_TEMPLATE: &str = include_str!("../templates/document.html");

/// Keys every document render must bind.
pub const REQUIRED_BINDINGS: &[&str] = &[
    "title",
    "description",
    "keywords",
    "html",
    "css",
    "js",
    "data",
    "path",
    "timestamp",
];

/// Values for one document render.
#[derive(Debug, Clone, Default)]
pub struct Bindings(BTreeMap<&'static str, serde_json::Value>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.0.insert(key, serde_json::Value::String(value.into()));
        self
    }

    /// Bind a non-string value. Rendering rejects it for required keys.
    pub fn set_value(mut self, key: &'static str, value: serde_json::Value) -> Self {
        self.0.insert(key, value);
        self
    }

    /// Every required key present and bound to a string.
    pub fn validate(&self) -> Result<(), TemplateError> {
        for key in REQUIRED_BINDINGS {
            match self.0.get(key) {
                None => return Err(TemplateError::MissingBinding(key)),
                Some(serde_json::Value::String(_)) => {}
                Some(_) => return Err(TemplateError::InvalidBinding(key)),
            }
        }
        Ok(())
    }
}

pub struct DocumentTemplate {
    tera: Tera,
}

impl DocumentTemplate {
    /// The template compiled into the binary.
    pub fn builtin() -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, BUILTIN_TEMPLATE)?;
        Ok(Self { tera })
    }

    /// A template read from disk, with the same bindings as the built-in one.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        tera.add_template_file(path.as_ref(), Some(TEMPLATE_NAME))?;
        tracing::info!(path = %path.as_ref().display(), "loaded document template");
        Ok(Self { tera })
    }

    /// Built-in template unless `path` is set.
    pub fn load(path: Option<&str>) -> Result<Self, TemplateError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::builtin(),
        }
    }

    pub fn render(&self, bindings: &Bindings) -> Result<String, TemplateError> {
        bindings.validate()?;

        let mut context = Context::new();
        for (key, value) in &bindings.0 {
            context.insert(*key, value);
        }
        Ok(self.tera.render(TEMPLATE_NAME, &context)?)
    }
}

/// Serialize `data` as JSON that can sit inside an inline `<script>`.
pub fn hydration_json(data: &Props) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(data)?;
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Bindings {
        Bindings::new()
            .set("title", "Rexo")
            .set("description", "SSR <demo>")
            .set("keywords", "rexo,ssr")
            .set("html", "<div>home</div>")
            .set("css", "")
            .set("js", "")
            .set("data", "{\"pageType\":\"home\"}")
            .set("path", "/")
            .set("timestamp", "1700000000")
    }

    #[test]
    fn test_builtin_document() {
        let html = DocumentTemplate::builtin().unwrap().render(&complete()).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Rexo</title>"));
        assert!(html.contains("<div>home</div>"));
        assert!(html.contains("window.__SSR_DATA__ = {\"pageType\":\"home\"};"));
        // Text bindings are escaped, raw ones are not
        assert!(html.contains("SSR &lt;demo&gt;"));
        assert!(!html.contains("<style>"));
    }

    #[test]
    fn test_optional_assets_rendered_when_present() {
        let bindings = complete().set("css", ".a{color:red}").set("js", "boot()");
        let html = DocumentTemplate::builtin().unwrap().render(&bindings).unwrap();
        assert!(html.contains("<style>.a{color:red}</style>"));
        assert!(html.contains("<script>boot()</script>"));
    }

    #[test]
    fn test_missing_binding_is_rejected() {
        let mut bindings = complete();
        bindings.0.remove("keywords");
        let err = DocumentTemplate::builtin().unwrap().render(&bindings).unwrap_err();
        assert!(matches!(err, TemplateError::MissingBinding("keywords")));
    }

    #[test]
    fn test_non_string_binding_is_rejected() {
        let bindings = complete().set_value("title", serde_json::json!(42));
        assert!(matches!(bindings.validate(), Err(TemplateError::InvalidBinding("title"))));
    }

    #[test]
    fn test_template_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "<h1>{{ title }}</h1>{{ html | safe }}").unwrap();

        let template = DocumentTemplate::load(path.to_str()).unwrap();
        assert_eq!(template.render(&complete()).unwrap(), "<h1>Rexo</h1><div>home</div>");
    }

    #[test]
    fn test_broken_template_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.html");
        std::fs::write(&path, "{% if %}").unwrap();
        assert!(DocumentTemplate::from_file(&path).is_err());
    }

    #[test]
    fn test_hydration_json_is_script_safe() {
        let mut data = Props::new();
        data.insert("bio".into(), "</script><script>alert(1)</script> & \u{2028}".into());
        let json = hydration_json(&data).unwrap();

        assert!(!json.contains('<'));
        assert!(!json.contains('>'));
        assert!(!json.contains('&'));
        assert!(json.contains("\\u003c/script\\u003e"));
        assert!(json.contains("\\u2028"));

        let back: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back["bio"], "</script><script>alert(1)</script> & \u{2028}");
    }
}
