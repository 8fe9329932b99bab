use crate::error::ClientResult;
use crate::endpoint::QueryParams;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A schema as stored by the schema service.
///
/// `definition` maps field names to type specifications, which may be a
/// type tag (`"String"`), a list, or a nested mapping. Any other keys the
/// service returns (`owner`, timestamps, …) are kept in `extra` so that a
/// descriptor pushed back to the service round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub name: String,
    #[serde(default)]
    pub definition: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SchemaDescriptor {
    /// Creates a descriptor with no extra keys.
    pub fn new(name: impl Into<String>, definition: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            definition,
            extra: Map::new(),
        }
    }

    /// Adds an extra top-level key (e.g. `owner`).
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Parses a descriptor from its JSON representation.
    pub fn from_value(value: Value) -> ClientResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Returns the descriptor as JSON.
    pub fn to_value(&self) -> ClientResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// The schema half of the data service (`client.schemas`).
pub trait SchemaService {
    /// Fetches every schema visible to the client.
    fn fetch_all(&self, params: Option<&QueryParams>) -> ClientResult<Vec<SchemaDescriptor>>;

    /// Creates a schema and returns the stored descriptor.
    fn create(&self, descriptor: &SchemaDescriptor) -> ClientResult<SchemaDescriptor>;

    /// Replaces the schema called `name` and returns the stored descriptor.
    fn update(&self, name: &str, descriptor: &SchemaDescriptor) -> ClientResult<SchemaDescriptor>;

    /// Deletes the schema called `name`.
    fn delete(&self, name: &str) -> ClientResult<()>;
}
