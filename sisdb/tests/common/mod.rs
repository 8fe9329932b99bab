//! Shared test helpers for sisdb tests.

#![allow(dead_code)]

use serde_json::{json, Map, Value};
use sisdb::client::memory::MemoryClient;
use sisdb::{SchemaDescriptor, SisDb, SisDbConfig};
use std::rc::Rc;

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a filter map from a JSON object literal.
pub fn q(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("filter must be a JSON object, got {other}"),
    }
}

/// Builds a schema descriptor from a name and a JSON definition.
pub fn schema(name: &str, definition: Value) -> SchemaDescriptor {
    SchemaDescriptor::new(name, q(definition)).with_extra("owner", json!(["sisdb"]))
}

/// A fresh in-memory service plus a registry connected to it.
pub fn connect() -> (MemoryClient, SisDb) {
    connect_with(SisDbConfig::default())
}

pub fn connect_with(config: SisDbConfig) -> (MemoryClient, SisDb) {
    init_tracing();
    let client = MemoryClient::new();
    let db = SisDb::connect_with_config(Rc::new(client.clone()), config).expect("connect");
    (client, db)
}

/// The two schemas used by most entity tests: `ref_sisdb_schema` and
/// `test_sisdb_schema`, the latter referencing the former.
pub fn connect_with_test_schemas() -> (MemoryClient, SisDb) {
    let (client, db) = connect();
    db.update_schema(ref_schema()).expect("ref schema");
    db.update_schema(test_schema()).expect("test schema");
    (client, db)
}

pub fn ref_schema() -> SchemaDescriptor {
    schema(
        "ref_sisdb_schema",
        json!({
            "ref_name": "String",
            "type": "Number"
        }),
    )
}

pub fn test_schema() -> SchemaDescriptor {
    schema(
        "test_sisdb_schema",
        json!({
            "name": "String",
            "living": "Boolean",
            "age": { "type": "Number", "min": 18, "max": 65 },
            "born": "Date",
            "mixed": "Mixed",
            "nested": {
                "stuff": { "type": "String", "lowercase": true, "trim": true }
            },
            "reference": { "type": "ObjectId", "ref": "ref_sisdb_schema" },
            "refs": [{ "type": "ObjectId", "ref": "ref_sisdb_schema" }],
            "tags": ["String"],
            "parts": [{ "label": "String", "qty": "Number" }],
            "enumField": { "type": "String", "enum": ["ONE", "OF", "THESE", "VALUES", "ONLY"] }
        }),
    )
}
