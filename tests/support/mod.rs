#![allow(dead_code)]

use anyhow::{Context, Result};
use catalogue_graph::{DiagnosticKind, Graph, NodeId, Settings};
use serde_json::{Value, json};

/// Game system with two categories, one force template and a shared
/// upgrade every catalogue can link to.
pub fn game_system() -> Value {
    json!({"gameSystem": {
        "id": "gs", "name": "Skirmish", "revision": 1,
        "costTypes": [{"id": "pts", "name": "Points"}],
        "profileTypes": [{"id": "stats", "name": "Stats"}],
        "categoryEntries": [
            {"id": "hq", "name": "HQ"},
            {"id": "troops", "name": "Troops"}
        ],
        "forceEntries": [{
            "id": "patrol", "name": "Patrol",
            "categoryLinks": [
                {"id": "patrol-hq", "name": "HQ", "targetId": "hq"},
                {"id": "patrol-troops", "name": "Troops", "targetId": "troops"}
            ]
        }],
        "sharedRules": [{"id": "deep", "name": "Deep Strike"}],
        "sharedSelectionEntries": [{"id": "blade", "name": "Blade", "type": "upgrade"}]
    }})
}

/// Catalogue A: a unit with a roster-scoped minimum and a link into the
/// game system.
pub fn catalogue_a() -> Value {
    json!({"catalogue": {
        "id": "cat-a", "name": "Alpha Legion", "gameSystemId": "gs", "revision": 3,
        "selectionEntries": [
            {
                "id": "u1", "name": "Warband", "type": "unit",
                "categoryLinks": [{"id": "u1-troops", "name": "Troops", "targetId": "troops", "primary": true}],
                "constraints": [
                    {"id": "c1", "type": "min", "value": 1, "field": "selections", "scope": "roster"}
                ],
                "entryLinks": [{"id": "u1-blade", "name": "Blade", "targetId": "blade", "type": "selectionEntry"}],
                "infoLinks": [{"id": "u1-deep", "name": "Deep Strike", "targetId": "deep", "type": "rule"}],
                "costs": [{"name": "Points", "typeId": "pts", "value": 60}]
            },
            {
                "id": "boss", "name": "Champion", "type": "model",
                "categoryLinks": [{"id": "boss-hq", "name": "HQ", "targetId": "hq", "primary": true}],
                "constraints": [
                    {"id": "boss-max", "type": "max", "value": 1, "field": "selections", "scope": "roster"}
                ]
            }
        ]
    }})
}

/// Catalogue B imports A (root entries included) and redeclares `u1`.
pub fn catalogue_b() -> Value {
    json!({"catalogue": {
        "id": "cat-b", "name": "Beta Host", "gameSystemId": "gs",
        "catalogueLinks": [
            {"id": "b-to-a", "name": "Alpha Legion", "targetId": "cat-a", "type": "catalogue", "importRootEntries": true}
        ],
        "selectionEntries": [
            {"id": "u1", "name": "Local Warband", "type": "unit"}
        ]
    }})
}

/// Insert every record, then process the last one.
pub fn processed(records: &[Value], settings: Settings) -> Result<(Graph, NodeId)> {
    let mut graph = Graph::new(settings);
    let mut last = None;
    for record in records {
        last = Some(graph.insert_document(record, None)?);
    }
    let root = last.context("at least one record is required")?;
    graph.process(root)?;
    Ok((graph, root))
}

/// Node with `id` declared inside the document at `root`.
pub fn node_by_id(graph: &Graph, root: NodeId, id: &str) -> NodeId {
    graph
        .catalogue_state(root)
        .and_then(|state| state.index().lookup(graph, id))
        .unwrap_or_else(|| panic!("no node '{id}' in {root}"))
}

pub fn diagnostic_kinds(graph: &Graph, node: NodeId) -> Vec<DiagnosticKind> {
    graph[node].diagnostics().iter().map(|d| d.kind).collect()
}

pub fn object(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}
