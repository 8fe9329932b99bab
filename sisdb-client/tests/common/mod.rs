//! Shared test helpers for sisdb-client tests.

#![allow(dead_code)]

use serde_json::{json, Map, Value};
use sisdb_client::memory::MemoryClient;
use sisdb_client::{Record, SchemaDescriptor, SisClient};

/// Unwraps a JSON object literal.
pub fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A client with a `hosts` schema and a `racks` schema whose `host` field
/// references `hosts`.
pub fn client_with_schemas() -> MemoryClient {
    let client = MemoryClient::new();
    client
        .schemas()
        .create(&SchemaDescriptor::new(
            "hosts",
            obj(json!({ "hostname": "String", "cpus": "Number", "tags": ["String"] })),
        ))
        .expect("create hosts");
    client
        .schemas()
        .create(&SchemaDescriptor::new(
            "racks",
            obj(json!({
                "label": "String",
                "host": { "type": "ObjectId", "ref": "hosts" },
                "spares": [{ "type": "ObjectId", "ref": "hosts" }]
            })),
        ))
        .expect("create racks");
    client
}

/// Creates one `hosts` record and returns it as stored.
pub fn add_host(client: &MemoryClient, hostname: &str, cpus: i64) -> Record {
    let response = client
        .entities("hosts")
        .create(sisdb_client::Records::One(obj(
            json!({ "hostname": hostname, "cpus": cpus }),
        )))
        .expect("create host");
    match response.result {
        sisdb_client::Records::One(record) => record,
        other => panic!("expected one record, got {other:?}"),
    }
}

pub fn id_of(record: &Record) -> String {
    record["_id"].as_str().expect("record id").to_string()
}
