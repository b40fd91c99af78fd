//! Envelope validation for normalized catalogue records.
//!
//! The normalizer guarantees shape per kind; this schema pins the contract
//! the node model relies on before typing a tree: exactly one document root,
//! documents carry an id and name, links always carry a target id, and
//! collections only hold records. The schema ships with the crate and is
//! compiled once per process.

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::sync::OnceLock;

const RECORD_SCHEMA: &str = include_str!("../schema/catalogue_record.schema.json");

static RAW_SCHEMA: OnceLock<Value> = OnceLock::new();
static COMPILED_SCHEMA: OnceLock<JSONSchema> = OnceLock::new();

/// Version key declared by the bundled schema.
pub fn record_schema_version() -> Result<&'static str> {
    raw_schema()?
        .get("schema_version")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("catalogue record schema missing schema_version"))
}

/// Validate a normalized record, joining every violation into one error.
pub fn validate_record(record: &Value) -> Result<()> {
    let schema = compiled_schema()?;
    if let Err(errors) = schema.validate(record) {
        let details = errors
            .map(|err| format!("{}: {}", err.instance_path, err))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("catalogue record failed schema validation:\n{details}");
    }
    Ok(())
}

fn raw_schema() -> Result<&'static Value> {
    if let Some(raw) = RAW_SCHEMA.get() {
        return Ok(raw);
    }
    let parsed: Value =
        serde_json::from_str(RECORD_SCHEMA).context("parsing catalogue record schema")?;
    Ok(RAW_SCHEMA.get_or_init(|| parsed))
}

fn compiled_schema() -> Result<&'static JSONSchema> {
    if let Some(compiled) = COMPILED_SCHEMA.get() {
        return Ok(compiled);
    }
    let raw = raw_schema()?;
    let compiled = JSONSchema::compile(raw)
        .map_err(|err| anyhow!("compiling catalogue record schema: {err}"))?;
    Ok(COMPILED_SCHEMA.get_or_init(|| compiled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_minimal_documents() {
        validate_record(&json!({"gameSystem": {"id": "gs", "name": "GS"}})).unwrap();
        validate_record(&json!({
            "catalogue": {
                "id": "c", "name": "C", "gameSystemId": "gs",
                "catalogueLinks": [{"id": "l", "targetId": "other", "type": "catalogue"}],
                "selectionEntries": [{"id": "e", "name": "E", "hidden": false}]
            }
        }))
        .unwrap();
    }

    #[test]
    fn rejects_links_without_targets_and_missing_ids() {
        let err = validate_record(&json!({
            "catalogue": {"id": "c", "name": "C", "entryLinks": [{"id": "l"}]}
        }))
        .expect_err("link without targetId must fail");
        assert!(err.to_string().contains("schema validation"));

        assert!(validate_record(&json!({"catalogue": {"name": "C"}})).is_err());
        assert!(validate_record(&json!({"catalogue": {"id": "c", "name": "C"}, "x": {}})).is_err());
    }

    #[test]
    fn exposes_schema_version() {
        assert_eq!(record_schema_version().unwrap(), "catalogue_record_v1");
    }
}
