//! Per-schema data endpoint contract and its wire types.

use crate::error::ClientResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw record as it travels on the wire: `_id`, user fields and the
/// implicit metadata fields.
pub type Record = Map<String, Value>;

/// One record or a batch of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Records {
    One(Record),
    Many(Vec<Record>),
}

impl Records {
    /// Number of records carried.
    pub fn len(&self) -> usize {
        match self {
            Records::One(_) => 1,
            Records::Many(records) => records.len(),
        }
    }

    /// Returns true when a batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens into a list.
    pub fn into_vec(self) -> Vec<Record> {
        match self {
            Records::One(record) => vec![record],
            Records::Many(records) => records,
        }
    }
}

/// Reply to a create call. `result` mirrors the shape of the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub result: Records,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
}

/// Reply to a bulk delete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkDeleteResponse {
    #[serde(default)]
    pub success: Vec<String>,
    #[serde(default)]
    pub errors: Vec<Value>,
}

/// Listing parameters understood by the data service.
///
/// `sort` is the comma-joined list of sort keys, `-field` meaning
/// descending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populate: Option<bool>,
}

impl QueryParams {
    /// Parameters carrying only a filter.
    pub fn filter(q: Map<String, Value>) -> Self {
        Self {
            q: Some(q),
            ..Self::default()
        }
    }

    /// Splits the `sort` parameter into its keys.
    pub fn sort_keys(&self) -> Vec<&str> {
        self.sort
            .as_deref()
            .map(|s| s.split(',').map(str::trim).filter(|k| !k.is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Envelope metadata of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    #[serde(rename = "totalCount")]
    pub total_count: u64,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub results: Vec<Record>,
    pub meta: PageMeta,
}

impl Page {
    /// Total number of records matching the filter, ignoring pagination.
    pub fn total_count(&self) -> u64 {
        self.meta.total_count
    }

    /// Number of rows on this page.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if this page carries no rows.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterates the rows of this page.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.results.iter()
    }
}

impl IntoIterator for Page {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// CRUD and listing for the records of one schema (`client.entities(name)`).
pub trait DataEndpoint {
    /// Fetches one record by id.
    fn get(&self, id: &str) -> ClientResult<Record>;

    /// Creates one record or a batch.
    fn create(&self, records: Records) -> ClientResult<CreateResponse>;

    /// Applies a (partial) record to the record with the given id and returns
    /// the stored result.
    fn update(&self, id: &str, record: &Record) -> ClientResult<Record>;

    /// Deletes one record.
    fn delete(&self, id: &str) -> ClientResult<()>;

    /// Deletes every record matching `q`.
    fn delete_bulk(&self, q: &Map<String, Value>) -> ClientResult<BulkDeleteResponse>;

    /// Fetches a single page.
    fn fetch_page(&self, params: &QueryParams) -> ClientResult<Page>;

    /// Fetches every matching record, ignoring `limit`/`offset`.
    fn fetch_all(&self, params: &QueryParams) -> ClientResult<Vec<Record>>;
}
