//! Flat JSON syntax: plural keys map directly to arrays of records.
//!
//! The reader also accepts the wrapped shape (`{"profiles": {"profile": [..]}}`)
//! that generic XML-to-JSON converters emit, so either JSON flavour
//! normalizes to the same record.

use super::{FormatError, Record, coerce_attribute, text_array};
use crate::catalog::identity::NodeKind;
use crate::catalog::schema;
use serde_json::{Map, Value};

pub(super) fn parse(bytes: &[u8]) -> Result<Record, FormatError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let obj = value.as_object().ok_or(FormatError::MissingRoot)?;
    for key in ["gameSystem", "catalogue"] {
        let Some(root) = obj.get(key) else {
            continue;
        };
        let kind = NodeKind::from_root_key(key).ok_or(FormatError::MissingRoot)?;
        let root = root
            .as_object()
            .ok_or_else(|| FormatError::malformed(key, "root is not an object"))?;
        let mut out = Map::new();
        out.insert(key.to_string(), Value::Object(normalize_object(kind, root)?));
        return Ok(Value::Object(out));
    }
    Err(FormatError::MissingRoot)
}

pub(super) fn serialize(record: &Record) -> Result<Vec<u8>, FormatError> {
    Ok(serde_json::to_vec_pretty(record)?)
}

/// Normalize one record of `kind`, recursing into its allowed collections.
pub(super) fn normalize_object(
    kind: NodeKind,
    obj: &Map<String, Value>,
) -> Result<Map<String, Value>, FormatError> {
    let mut out = Map::new();
    for (key, value) in obj {
        if schema::is_text_key(key) {
            out.insert(key.clone(), text_array(kind.as_str(), key, value)?);
            continue;
        }
        if key == schema::TEXT_CONTENT_KEY {
            if let Some(text) = super::attribute_text(value) {
                out.insert(key.clone(), Value::String(text));
            }
            continue;
        }
        if let Some(container) = schema::container_for_key(key) {
            let Some(child_kind) = schema::child_kind(kind, key) else {
                continue;
            };
            let items = unwrap_items(kind, container.wrapper, key, value)?;
            let mut normalized = Vec::with_capacity(items.len());
            for item in items {
                let item = item.as_object().ok_or_else(|| {
                    FormatError::malformed(kind.as_str(), format!("{key} holds a non-record item"))
                })?;
                normalized.push(Value::Object(normalize_object(child_kind, item)?));
            }
            out.insert(key.clone(), Value::Array(normalized));
            continue;
        }
        match value {
            Value::String(s) => {
                out.insert(key.clone(), coerce_attribute(key, s));
            }
            Value::Bool(_) | Value::Number(_) => {
                out.insert(key.clone(), value.clone());
            }
            // Unknown collections and nulls are not part of the model.
            Value::Array(_) | Value::Object(_) | Value::Null => {}
        }
    }
    Ok(out)
}

fn unwrap_items<'a>(
    kind: NodeKind,
    wrapper: &str,
    key: &str,
    value: &'a Value,
) -> Result<Vec<&'a Value>, FormatError> {
    match value {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Object(obj) => match obj.get(wrapper) {
            Some(Value::Array(items)) => Ok(items.iter().collect()),
            Some(item @ Value::Object(_)) => Ok(vec![item]),
            _ => Err(FormatError::malformed(
                kind.as_str(),
                format!("{key} must wrap <{wrapper}> items"),
            )),
        },
        Value::Null => Ok(Vec::new()),
        _ => Err(FormatError::malformed(
            kind.as_str(),
            format!("{key} is not a collection"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_disallowed_collections_and_coerces_attributes() {
        let raw = json!({
            "catalogue": {
                "id": "cat", "name": "Cat", "revision": "3", "library": "false",
                "selectionEntries": [{
                    "id": "e1", "name": "Unit", "hidden": "false",
                    "characteristics": [{"name": "stray"}],
                    "costs": [{"name": "pts", "typeId": "pts", "value": "15"}]
                }],
                "unknownThing": [{"id": "x"}]
            }
        });
        let record = parse(raw.to_string().as_bytes()).unwrap();
        let cat = &record["catalogue"];
        assert_eq!(cat["revision"], json!(3));
        assert_eq!(cat["library"], json!(false));
        assert!(cat.get("unknownThing").is_none());
        let entry = &cat["selectionEntries"][0];
        assert!(entry.get("characteristics").is_none());
        assert_eq!(entry["costs"][0]["value"], json!(15));
        assert_eq!(entry["costs"][0]["typeId"], json!("pts"));
    }

    #[test]
    fn accepts_wrapped_collections() {
        let raw = json!({
            "gameSystem": {
                "id": "gs", "name": "GS",
                "sharedRules": {"rule": {"id": "r1", "name": "Rule", "description": "text"}}
            }
        });
        let record = parse(raw.to_string().as_bytes()).unwrap();
        let rule = &record["gameSystem"]["sharedRules"][0];
        assert_eq!(rule["id"], json!("r1"));
        assert_eq!(rule["description"], json!(["text"]));
    }

    #[test]
    fn rejects_missing_root_and_bad_nesting() {
        assert!(matches!(
            parse(br#"{"roster": {}}"#),
            Err(FormatError::MissingRoot)
        ));
        let bad = json!({"catalogue": {"id": "c", "name": "c", "selectionEntries": "oops"}});
        assert!(matches!(
            parse(bad.to_string().as_bytes()),
            Err(FormatError::Malformed { .. })
        ));
    }
}
