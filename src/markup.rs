//! Node tree to HTML serialization.
//!
//! Component code resolves its element tree inside the isolate (function
//! components are called there) and hands back plain JSON. This module turns
//! that JSON into markup on the Rust side, escaping attribute values and
//! text. Anything that is not a well-formed tree is a serialization error.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Elements that never have children or a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Same bound as the resolver in `bootstrap.js`.
const MAX_DEPTH: usize = 60;

/// A resolved node as produced by the bootstrap's tree resolver.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Empty,
    Text(String),
    Number(serde_json::Number),
    List(Vec<Node>),
    Raw {
        #[serde(rename = "__html")]
        html: String,
    },
    Element {
        #[serde(rename = "type")]
        tag: String,
        #[serde(default)]
        props: Map<String, Value>,
        #[serde(default)]
        children: Vec<Node>,
    },
}

/// Serialize a node tree to HTML.
pub fn render_to_string(node: &Node) -> Result<String, String> {
    let mut out = String::new();
    write_node(node, &mut out, 0)?;
    Ok(out)
}

fn write_node(node: &Node, out: &mut String, depth: usize) -> Result<(), String> {
    if depth > MAX_DEPTH {
        return Err(format!("Node tree deeper than {} levels", MAX_DEPTH));
    }

    match node {
        Node::Empty => {}
        Node::Text(text) => escape_text(text, out),
        Node::Number(n) => out.push_str(&n.to_string()),
        Node::List(items) => {
            for item in items {
                write_node(item, out, depth + 1)?;
            }
        }
        Node::Raw { html } => out.push_str(html),
        Node::Element {
            tag,
            props,
            children,
        } => {
            if !is_valid_name(tag) {
                return Err(format!("Invalid element name '{}'", tag));
            }

            out.push('<');
            out.push_str(tag);
            let inner_html = write_attributes(props, out)?;
            out.push('>');

            if VOID_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str()) {
                return Ok(());
            }

            match inner_html {
                Some(html) => out.push_str(&html),
                None => {
                    for child in children {
                        write_node(child, out, depth + 1)?;
                    }
                }
            }

            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
    Ok(())
}

/// Writes attributes and returns `dangerouslySetInnerHTML` content if present.
fn write_attributes(props: &Map<String, Value>, out: &mut String) -> Result<Option<String>, String> {
    let mut inner_html = None;

    for (key, value) in props {
        if key == "dangerouslySetInnerHTML" {
            inner_html = value
                .get("__html")
                .and_then(Value::as_str)
                .map(str::to_string);
            continue;
        }

        let name = match key.as_str() {
            "className" => "class",
            "htmlFor" => "for",
            other => other,
        };
        if !is_valid_name(name) {
            return Err(format!("Invalid attribute name '{}'", name));
        }

        let rendered = match value {
            Value::Null | Value::Bool(false) => continue,
            Value::Bool(true) => {
                out.push(' ');
                out.push_str(name);
                continue;
            }
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Object(style) if name == "style" => style_to_string(style),
            Value::Array(items) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
            Value::Object(_) => value.to_string(),
        };

        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attribute(&rendered, out);
        out.push('"');
    }

    Ok(inner_html)
}

fn style_to_string(style: &Map<String, Value>) -> String {
    let mut css = String::new();
    for (property, value) in style {
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        for ch in property.chars() {
            if ch.is_ascii_uppercase() {
                css.push('-');
                css.push(ch.to_ascii_lowercase());
            } else {
                css.push(ch);
            }
        }
        css.push(':');
        css.push_str(&value);
        css.push(';');
    }
    css
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

/// Escape `value` for use in text or a quoted attribute.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    escape_attribute(value, &mut out);
    out
}

fn escape_attribute(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}
