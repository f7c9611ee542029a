//! Typed props passed into component render calls.
//!
//! Props arrive from several places (route defaults, fetched page data,
//! caller overrides) and are merged before a render. Values are a closed
//! set of JSON-compatible variants so the sandbox boundary never sees
//! anything it cannot serialize.
//!
//! Before props enter the isolate they are sanitized: keys like `__proto__`
//! that could pollute `Object.prototype` inside component code are refused.

use crate::error::PropsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum recursion depth for nested maps/lists
const MAX_DEPTH: usize = 32;

/// Keys that could be used for prototype pollution
const DANGEROUS_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Ordered mapping of prop names to values.
pub type Props = BTreeMap<String, PropValue>;

/// A single prop value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<PropValue>),
    Map(Props),
}

impl PropValue {
    /// Convert any serializable value (e.g. a user projection) into a prop.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(value)?)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Props> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Props> for PropValue {
    fn from(value: Props) -> Self {
        Self::Map(value)
    }
}

impl From<Vec<PropValue>> for PropValue {
    fn from(value: Vec<PropValue>) -> Self {
        Self::List(value)
    }
}

/// Merge `overrides` on top of `base`. On key collisions the override wins;
/// nested maps are replaced wholesale, not deep-merged.
pub fn merge_props(mut base: Props, overrides: &Props) -> Props {
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
    base
}

/// Recursively check props, erroring if dangerous keys are found.
///
/// # Errors
/// Returns an error if:
/// - A dangerous key (`__proto__`, `constructor`, `prototype`) is found
/// - Nesting depth exceeds MAX_DEPTH (32)
pub fn sanitize_props(props: &Props) -> Result<(), PropsError> {
    sanitize_map(props, 0)
}

fn sanitize_map(map: &Props, depth: usize) -> Result<(), PropsError> {
    if depth > MAX_DEPTH {
        return Err(PropsError::TooDeep(MAX_DEPTH));
    }

    for (key, value) in map {
        if DANGEROUS_KEYS.contains(&key.as_str()) {
            return Err(PropsError::ForbiddenKey(key.clone()));
        }
        sanitize_value(value, depth + 1)?;
    }
    Ok(())
}

fn sanitize_value(value: &PropValue, depth: usize) -> Result<(), PropsError> {
    if depth > MAX_DEPTH {
        return Err(PropsError::TooDeep(MAX_DEPTH));
    }

    match value {
        PropValue::Map(map) => sanitize_map(map, depth),
        PropValue::List(items) => items
            .iter()
            .try_for_each(|item| sanitize_value(item, depth + 1)),
        // Primitives are safe
        _ => Ok(()),
    }
}
