//! Format normalizer for catalogue documents.
//!
//! Catalogue data arrives in two isomorphic syntaxes: XML, where every child
//! collection is wrapped in a plural element holding singular items, and a
//! flat JSON form where the plural key maps straight to an array. Both parse
//! into the same normalized record (a `serde_json::Value` tree) and both can
//! be written back from it. Normalization is schema driven: collections the
//! owning kind may not hold are stripped, text keys become one-string arrays,
//! and attribute strings are coerced to booleans and numbers.

mod json;
mod xml;

use crate::catalog::identity::NodeKind;
use crate::catalog::schema;
use anyhow::{Context, Result};
use serde_json::{Map, Number, Value};
use std::fs;
use std::path::Path;

/// Normalized nested-record tree produced by [`parse`].
pub type Record = Value;

/// Input/output syntax of a catalogue document.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Syntax {
    Xml,
    Json,
}

impl Syntax {
    /// Pick the syntax from a file extension (`.cat`, `.gst`, `.xml`, `.json`).
    pub fn from_extension(ext: &str) -> Result<Self, FormatError> {
        match ext.to_ascii_lowercase().as_str() {
            "cat" | "gst" | "xml" => Ok(Syntax::Xml),
            "json" => Ok(Syntax::Json),
            other => Err(FormatError::UnsupportedSyntax(other.to_string())),
        }
    }
}

/// Structural failures raised while normalizing or writing a document.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("unsupported catalogue syntax '{0}'")]
    UnsupportedSyntax(String),
    #[error("invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document has neither a catalogue nor a gameSystem root")]
    MissingRoot,
    #[error("malformed <{parent}>: {detail}")]
    Malformed { parent: String, detail: String },
    #[error("unable to write XML: {0}")]
    Write(String),
}

impl FormatError {
    pub(crate) fn malformed(parent: impl Into<String>, detail: impl Into<String>) -> Self {
        FormatError::Malformed {
            parent: parent.into(),
            detail: detail.into(),
        }
    }
}

/// Parse raw bytes in `syntax` into a normalized record.
///
/// The result always has exactly one root key, `catalogue` or `gameSystem`.
/// Anything that cannot be normalized is an error; partial records are never
/// returned.
pub fn parse(bytes: &[u8], syntax: Syntax) -> Result<Record, FormatError> {
    match syntax {
        Syntax::Xml => xml::parse(bytes),
        Syntax::Json => json::parse(bytes),
    }
}

/// Read and parse a catalogue file, choosing the syntax from its extension.
pub fn parse_path(path: &Path) -> Result<Record> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let syntax = Syntax::from_extension(ext)
        .with_context(|| format!("reading {}", path.display()))?;
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let record = parse(&bytes, syntax).with_context(|| format!("parsing {}", path.display()))?;
    Ok(record)
}

/// Write a normalized record back out in `syntax`.
pub fn serialize(record: &Record, syntax: Syntax) -> Result<Vec<u8>, FormatError> {
    match syntax {
        Syntax::Xml => xml::serialize(record),
        Syntax::Json => json::serialize(record),
    }
}

/// Split a normalized record into its document kind and root object.
pub fn root_of(record: &Record) -> Option<(NodeKind, &Map<String, Value>)> {
    let obj = record.as_object()?;
    ["gameSystem", "catalogue"].iter().find_map(|key| {
        let kind = NodeKind::from_root_key(key)?;
        obj.get(*key)?.as_object().map(|root| (kind, root))
    })
}

/// Coerce an attribute string: booleans and canonical numbers become typed.
///
/// Reference-valued keys stay strings, as do numeric-looking values with a
/// leading `+`.
pub fn coerce_attribute(key: &str, raw: &str) -> Value {
    if schema::is_string_key(key) {
        return Value::String(raw.to_string());
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    numeric_value(raw).unwrap_or_else(|| Value::String(raw.to_string()))
}

fn numeric_value(raw: &str) -> Option<Value> {
    if raw.is_empty() || raw.starts_with('+') {
        return None;
    }
    if !raw.chars().any(|c| c.is_ascii_digit())
        || !raw
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | 'e' | 'E'))
    {
        return None;
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    let float = raw.parse::<f64>().ok()?;
    Number::from_f64(float).map(Value::Number)
}

/// Render a scalar attribute value as attribute text.
pub(crate) fn attribute_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Collapse any accepted text shape into the one-string array form.
pub(crate) fn text_array(parent: &str, key: &str, value: &Value) -> Result<Value, FormatError> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => {
            let mut joined = String::new();
            for item in items {
                match item {
                    Value::String(s) => joined.push_str(s),
                    Value::Object(obj) => match obj.get(schema::TEXT_CONTENT_KEY) {
                        Some(Value::String(s)) => joined.push_str(s),
                        _ => {
                            let detail = format!("{key} holds nested records");
                            return Err(FormatError::malformed(parent, detail));
                        }
                    },
                    _ => {
                        let detail = format!("{key} holds non-text items");
                        return Err(FormatError::malformed(parent, detail));
                    }
                }
            }
            joined
        }
        Value::Object(obj) => match obj.get(schema::TEXT_CONTENT_KEY) {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(FormatError::malformed(parent, format!("{key} holds nested records"))),
        },
        Value::Null => String::new(),
    };
    Ok(Value::Array(vec![Value::String(text)]))
}

/// First string of a one-string text array, or a bare string.
pub fn text_of(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Array(items) => items.first().and_then(Value::as_str),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_booleans_and_numbers() {
        assert_eq!(coerce_attribute("hidden", "true"), json!(true));
        assert_eq!(coerce_attribute("value", "3"), json!(3));
        assert_eq!(coerce_attribute("value", "0.5"), json!(0.5));
        assert_eq!(coerce_attribute("value", "-1"), json!(-1));
        assert_eq!(coerce_attribute("value", "+1"), json!("+1"));
        assert_eq!(coerce_attribute("value", "1-2"), json!("1-2"));
        assert_eq!(coerce_attribute("value", "inf"), json!("inf"));
    }

    #[test]
    fn reference_keys_stay_strings() {
        assert_eq!(coerce_attribute("id", "1234"), json!("1234"));
        assert_eq!(coerce_attribute("targetId", "true"), json!("true"));
    }

    #[test]
    fn text_shapes_collapse_to_one_string_array() {
        assert_eq!(text_array("rule", "description", &json!("a")).unwrap(), json!(["a"]));
        assert_eq!(
            text_array("rule", "description", &json!(["a", "b"])).unwrap(),
            json!(["ab"])
        );
        assert_eq!(
            text_array("rule", "description", &json!({"$text": "c"})).unwrap(),
            json!(["c"])
        );
        assert!(text_array("rule", "description", &json!({"rule": []})).is_err());
    }

    #[test]
    fn extension_selects_syntax() {
        assert_eq!(Syntax::from_extension("gst").unwrap(), Syntax::Xml);
        assert_eq!(Syntax::from_extension("JSON").unwrap(), Syntax::Json);
        assert!(matches!(
            Syntax::from_extension("catz"),
            Err(FormatError::UnsupportedSyntax(_))
        ));
    }
}
