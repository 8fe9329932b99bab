//! In-memory data service.
//!
//! [`MemoryClient`] implements the full client contract over process-local
//! state. Cloned handles share that state, so a test can keep one handle
//! for inspection while SisDb owns another.

use crate::endpoint::{
    BulkDeleteResponse, CreateResponse, DataEndpoint, Page, PageMeta, QueryParams, Record, Records,
};
use crate::error::{ClientError, ClientResult};
use crate::schema::{SchemaDescriptor, SchemaService};
use crate::{ApiVersion, SisClient};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::{RefCell, RefMut};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::debug;
use uuid::Uuid;

/// Fields stamped by the service; never taken from a client payload.
const SERVER_MANAGED: [&str; 5] = ["_id", "_created_at", "_updated_at", "_created_by", "_updated_by"];

/// Configuration for the in-memory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// API version reported to SisDb.
    pub version: ApiVersion,
    /// User name recorded in `_created_by`/`_updated_by`.
    pub user: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            version: ApiVersion::new(1, 1),
            user: "sisdb".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    schemas: BTreeMap<String, SchemaDescriptor>,
    /// schema name → (record id → record). Ids are UUID v7, so id order is
    /// creation order.
    records: HashMap<String, BTreeMap<String, Record>>,
    requests: usize,
    fail_next: Option<ClientError>,
}

/// An in-memory data service client.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    config: MemoryConfig,
    state: Rc<RefCell<MemoryState>>,
    schemas: MemorySchemas,
}

impl MemoryClient {
    /// Creates an empty service with the default configuration.
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Creates an empty service with a custom configuration.
    pub fn with_config(config: MemoryConfig) -> Self {
        let state = Rc::new(RefCell::new(MemoryState::default()));
        Self {
            schemas: MemorySchemas {
                state: state.clone(),
            },
            config,
            state,
        }
    }

    /// Number of requests served so far (schema and record calls).
    pub fn request_count(&self) -> usize {
        self.state.borrow().requests
    }

    /// Makes the next request fail with `error` instead of being served.
    pub fn fail_next(&self, error: ClientError) {
        self.state.borrow_mut().fail_next = Some(error);
    }

    /// Number of records stored for a schema.
    pub fn record_count(&self, schema: &str) -> usize {
        self.state
            .borrow()
            .records
            .get(schema)
            .map_or(0, BTreeMap::len)
    }

    /// Snapshot of a stored record, bypassing the request counter.
    pub fn stored_record(&self, schema: &str, id: &str) -> Option<Record> {
        self.state
            .borrow()
            .records
            .get(schema)
            .and_then(|records| records.get(id))
            .cloned()
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SisClient for MemoryClient {
    fn version(&self) -> ApiVersion {
        self.config.version
    }

    fn schemas(&self) -> &dyn SchemaService {
        &self.schemas
    }

    fn entities(&self, schema: &str) -> Box<dyn DataEndpoint> {
        Box::new(MemoryEndpoint {
            schema: schema.to_string(),
            user: self.config.user.clone(),
            state: self.state.clone(),
        })
    }
}

/// Counts a request and honors injected failures.
fn begin<'a>(state: &'a RefCell<MemoryState>, op: &str) -> ClientResult<RefMut<'a, MemoryState>> {
    let mut state = state.borrow_mut();
    state.requests += 1;
    debug!(op, request = state.requests, "memory service request");
    match state.fail_next.take() {
        Some(err) => Err(err),
        None => Ok(state),
    }
}

// ── Schemas ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct MemorySchemas {
    state: Rc<RefCell<MemoryState>>,
}

impl SchemaService for MemorySchemas {
    fn fetch_all(&self, params: Option<&QueryParams>) -> ClientResult<Vec<SchemaDescriptor>> {
        let state = begin(&self.state, "schemas.fetch_all")?;
        let filter = params.and_then(|p| p.q.as_ref());
        let mut result = Vec::with_capacity(state.schemas.len());
        for descriptor in state.schemas.values() {
            let matched = match filter {
                Some(q) => match descriptor.to_value()? {
                    Value::Object(fields) => matches_filter(&fields, q),
                    _ => false,
                },
                None => true,
            };
            if matched {
                result.push(descriptor.clone());
            }
        }
        Ok(result)
    }

    fn create(&self, descriptor: &SchemaDescriptor) -> ClientResult<SchemaDescriptor> {
        let mut state = begin(&self.state, "schemas.create")?;
        if state.schemas.contains_key(&descriptor.name) {
            return Err(ClientError::Conflict(format!(
                "schema {} already exists",
                descriptor.name
            )));
        }
        state
            .schemas
            .insert(descriptor.name.clone(), descriptor.clone());
        state.records.entry(descriptor.name.clone()).or_default();
        Ok(descriptor.clone())
    }

    fn update(&self, name: &str, descriptor: &SchemaDescriptor) -> ClientResult<SchemaDescriptor> {
        let mut state = begin(&self.state, "schemas.update")?;
        let stored = state
            .schemas
            .get_mut(name)
            .ok_or_else(|| ClientError::NotFound(format!("schema {name}")))?;
        let mut updated = descriptor.clone();
        updated.name = name.to_string();
        *stored = updated.clone();
        Ok(updated)
    }

    fn delete(&self, name: &str) -> ClientResult<()> {
        let mut state = begin(&self.state, "schemas.delete")?;
        if state.schemas.remove(name).is_none() {
            return Err(ClientError::NotFound(format!("schema {name}")));
        }
        state.records.remove(name);
        Ok(())
    }
}

// ── Records ──────────────────────────────────────────────────────

/// Data endpoint for one schema of a [`MemoryClient`].
#[derive(Debug, Clone)]
pub struct MemoryEndpoint {
    schema: String,
    user: String,
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryEndpoint {
    fn stamp_new(&self, mut record: Record) -> Record {
        let now = chrono::Utc::now().timestamp_millis();
        for key in SERVER_MANAGED {
            record.remove(key);
        }
        record.insert("_id".into(), Value::String(Uuid::now_v7().simple().to_string()));
        record.insert("_created_at".into(), Value::from(now));
        record.insert("_updated_at".into(), Value::from(now));
        record.insert("_created_by".into(), Value::String(self.user.clone()));
        record.insert("_updated_by".into(), Value::String(self.user.clone()));
        record
    }

    fn listing(&self, state: &MemoryState, params: &QueryParams) -> ClientResult<Vec<Record>> {
        let records = state
            .records
            .get(&self.schema)
            .ok_or_else(|| ClientError::NotFound(format!("schema {}", self.schema)))?;
        let mut rows: Vec<Record> = records
            .values()
            .filter(|r| params.q.as_ref().is_none_or(|q| matches_filter(r, q)))
            .cloned()
            .collect();

        let keys = params.sort_keys();
        if !keys.is_empty() {
            rows.sort_by(|a, b| compare_records(a, b, &keys));
        }

        if params.populate == Some(true) {
            if let Some(descriptor) = state.schemas.get(&self.schema) {
                for row in &mut rows {
                    populate(state, &descriptor.definition, row);
                }
            }
        }
        Ok(rows)
    }
}

impl DataEndpoint for MemoryEndpoint {
    fn get(&self, id: &str) -> ClientResult<Record> {
        let state = begin(&self.state, "entities.get")?;
        state
            .records
            .get(&self.schema)
            .and_then(|records| records.get(id))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{} {id}", self.schema)))
    }

    fn create(&self, records: Records) -> ClientResult<CreateResponse> {
        let mut state = begin(&self.state, "entities.create")?;
        if !state.schemas.contains_key(&self.schema) {
            return Err(ClientError::NotFound(format!("schema {}", self.schema)));
        }
        let table = state.records.entry(self.schema.clone()).or_default();
        let mut store = |record: Record| {
            let record = self.stamp_new(record);
            if let Some(Value::String(id)) = record.get("_id") {
                table.insert(id.clone(), record.clone());
            }
            record
        };
        let result = match records {
            Records::One(record) => Records::One(store(record)),
            Records::Many(batch) => Records::Many(batch.into_iter().map(&mut store).collect()),
        };
        Ok(CreateResponse {
            result,
            errors: Vec::new(),
        })
    }

    fn update(&self, id: &str, record: &Record) -> ClientResult<Record> {
        let mut state = begin(&self.state, "entities.update")?;
        let stored = state
            .records
            .get_mut(&self.schema)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| ClientError::NotFound(format!("{} {id}", self.schema)))?;
        for (key, value) in record {
            if !SERVER_MANAGED.contains(&key.as_str()) {
                stored.insert(key.clone(), value.clone());
            }
        }
        stored.insert(
            "_updated_at".into(),
            Value::from(chrono::Utc::now().timestamp_millis()),
        );
        stored.insert("_updated_by".into(), Value::String(self.user.clone()));
        Ok(stored.clone())
    }

    fn delete(&self, id: &str) -> ClientResult<()> {
        let mut state = begin(&self.state, "entities.delete")?;
        state
            .records
            .get_mut(&self.schema)
            .and_then(|records| records.remove(id))
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("{} {id}", self.schema)))
    }

    fn delete_bulk(&self, q: &Map<String, Value>) -> ClientResult<BulkDeleteResponse> {
        let mut state = begin(&self.state, "entities.delete_bulk")?;
        let records = state
            .records
            .get_mut(&self.schema)
            .ok_or_else(|| ClientError::NotFound(format!("schema {}", self.schema)))?;
        let doomed: Vec<String> = records
            .iter()
            .filter(|(_, record)| matches_filter(record, q))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            records.remove(id);
        }
        Ok(BulkDeleteResponse {
            success: doomed,
            errors: Vec::new(),
        })
    }

    fn fetch_page(&self, params: &QueryParams) -> ClientResult<Page> {
        let state = begin(&self.state, "entities.fetch_page")?;
        let rows = self.listing(&state, params)?;
        let total_count = rows.len() as u64;
        let offset = params.offset.unwrap_or(0);
        let results = rows
            .into_iter()
            .skip(offset)
            .take(params.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(Page {
            results,
            meta: PageMeta { total_count },
        })
    }

    fn fetch_all(&self, params: &QueryParams) -> ClientResult<Vec<Record>> {
        let state = begin(&self.state, "entities.fetch_all")?;
        self.listing(&state, params)
    }
}

// ── Matching, ordering, population ───────────────────────────────

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Top-level equality match. `null` matches an absent key; a scalar matches
/// an array containing it.
fn matches_filter(record: &Record, q: &Map<String, Value>) -> bool {
    q.iter().all(|(key, expected)| match record.get(key) {
        None | Some(Value::Null) => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
    })
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(_) => 4,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_records(a: &Record, b: &Record, keys: &[&str]) -> Ordering {
    for key in keys {
        let (field, descending) = match key.strip_prefix('-') {
            Some(field) => (field, true),
            None => (*key, false),
        };
        let ordering = compare_values(a.get(field), b.get(field));
        let ordering = if descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Returns `(target schema, is_list)` when a type spec declares a reference.
fn reference_target(spec: &Value) -> Option<(&str, bool)> {
    match spec {
        Value::Object(fields) => match fields.get("type") {
            Some(Value::String(tag)) if tag.eq_ignore_ascii_case("objectid") => fields
                .get("ref")
                .and_then(Value::as_str)
                .map(|target| (target, false)),
            Some(Value::Array(inner)) => inner
                .first()
                .and_then(reference_target)
                .filter(|(_, is_list)| !is_list)
                .map(|(target, _)| (target, true)),
            _ => None,
        },
        Value::Array(inner) => inner
            .first()
            .and_then(reference_target)
            .filter(|(_, is_list)| !is_list)
            .map(|(target, _)| (target, true)),
        _ => None,
    }
}

fn lookup(state: &MemoryState, schema: &str, value: &Value) -> Option<Value> {
    let id = value.as_str()?;
    state
        .records
        .get(schema)
        .and_then(|records| records.get(id))
        .map(|record| Value::Object(record.clone()))
}

fn populate(state: &MemoryState, definition: &Map<String, Value>, row: &mut Record) {
    for (field, spec) in definition {
        let Some((target, is_list)) = reference_target(spec) else {
            continue;
        };
        let Some(value) = row.get_mut(field) else {
            continue;
        };
        if is_list {
            if let Value::Array(items) = value {
                for item in items.iter_mut() {
                    if let Some(resolved) = lookup(state, target, item) {
                        *item = resolved;
                    }
                }
            }
        } else if let Some(resolved) = lookup(state, target, value) {
            *value = resolved;
        }
    }
}
