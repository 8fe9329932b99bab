//! Fluent queries over the records of one entity type.
//!
//! A [`Query`] accumulates filter, sort and pagination parameters and
//! caches what it fetched until one of them changes.

use crate::entity::Entity;
use crate::error::{SisDbError, SisDbResult};
use crate::schema::EntityType;
use serde_json::{Map, Value};
use sisdb_client::{BulkDeleteResponse, DataEndpoint, QueryParams};
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// One or more sort keys; `-field` sorts descending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortKeys(Vec<String>);

impl SortKeys {
    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for SortKeys {
    fn from(key: &str) -> Self {
        Self(vec![key.to_string()])
    }
}

impl From<String> for SortKeys {
    fn from(key: String) -> Self {
        Self(vec![key])
    }
}

impl From<Vec<String>> for SortKeys {
    fn from(keys: Vec<String>) -> Self {
        Self(keys)
    }
}

impl From<Vec<&str>> for SortKeys {
    fn from(keys: Vec<&str>) -> Self {
        Self(keys.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for SortKeys {
    fn from(keys: [&str; N]) -> Self {
        Self(keys.into_iter().map(str::to_string).collect())
    }
}

/// A query over one entity type.
pub struct Query {
    entity_type: Rc<EntityType>,
    endpoint: Box<dyn DataEndpoint>,
    filter: Option<Map<String, Value>>,
    sort: Vec<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    populate: Option<bool>,
    window: usize,
    cache: Option<Vec<Entity>>,
    full_scan: bool,
    count: Option<u64>,
}

impl Query {
    pub(crate) fn new(entity_type: Rc<EntityType>, endpoint: Box<dyn DataEndpoint>, window: usize) -> Self {
        Self {
            entity_type,
            endpoint,
            filter: None,
            sort: Vec::new(),
            limit: None,
            offset: None,
            populate: None,
            window,
            cache: None,
            full_scan: false,
            count: None,
        }
    }

    pub fn entity_type(&self) -> &Rc<EntityType> {
        &self.entity_type
    }

    // ── Parameters ───────────────────────────────────────────────

    /// Merges `q` into the pending filter.
    pub fn filter(&mut self, q: Map<String, Value>) -> &mut Self {
        if q.is_empty() {
            return self;
        }
        self.filter.get_or_insert_with(Map::new).extend(q);
        self.invalidate();
        self
    }

    /// Appends sort keys.
    pub fn sort(&mut self, keys: impl Into<SortKeys>) -> &mut Self {
        self.sort.extend(keys.into().into_inner());
        self.invalidate();
        self
    }

    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self.invalidate_page();
        self
    }

    pub fn offset(&mut self, offset: usize) -> &mut Self {
        self.offset = Some(offset);
        self.invalidate_page();
        self
    }

    /// Asks the service to expand references in the returned rows.
    pub fn populate(&mut self, populate: bool) -> &mut Self {
        self.populate = Some(populate);
        self.invalidate();
        self
    }

    /// Clears every parameter.
    pub fn reset(&mut self) -> &mut Self {
        self.filter = None;
        self.sort.clear();
        self.limit = None;
        self.offset = None;
        self.populate = None;
        self.invalidate();
        self
    }

    /// The parameters a paginated fetch would send.
    pub fn params(&self) -> QueryParams {
        QueryParams {
            q: self.filter.clone(),
            limit: self.limit,
            offset: self.offset,
            sort: (!self.sort.is_empty()).then(|| self.sort.join(",")),
            populate: self.populate,
        }
    }

    fn invalidate(&mut self) {
        self.cache = None;
        self.full_scan = false;
        self.count = None;
    }

    /// Full-scan rows do not depend on limit and offset, so they survive.
    fn invalidate_page(&mut self) {
        if !self.full_scan {
            self.cache = None;
        }
        self.count = None;
    }

    // ── Execution ────────────────────────────────────────────────

    /// Number of records matching the filter, ignoring pagination.
    pub fn count(&mut self) -> SisDbResult<u64> {
        if let Some(count) = self.count {
            debug!(schema = self.entity_type.name(), count, "count cache hit");
            return Ok(count);
        }
        let params = QueryParams {
            q: self.filter.clone(),
            limit: Some(1),
            ..QueryParams::default()
        };
        let count = self.endpoint.fetch_page(&params)?.total_count();
        self.count = Some(count);
        Ok(count)
    }

    /// Every matching record. Without limit and offset this is a full scan;
    /// with either set it is the current page.
    pub fn all_items(&mut self) -> SisDbResult<&mut [Entity]> {
        if self.limit.is_some() || self.offset.is_some() {
            return self.page();
        }
        if self.full_scan && self.cache.is_some() {
            debug!(schema = self.entity_type.name(), "full scan cache hit");
        } else {
            let params = QueryParams {
                limit: None,
                offset: None,
                ..self.params()
            };
            let rows = self.endpoint.fetch_all(&params)?;
            let items: Vec<Entity> = rows
                .into_iter()
                .map(|row| self.entity_type.from_server(row))
                .collect();
            debug!(schema = self.entity_type.name(), rows = items.len(), "full scan");
            self.count = Some(items.len() as u64);
            self.cache = Some(items);
            self.full_scan = true;
        }
        Ok(self.cache.as_deref_mut().unwrap_or_default())
    }

    /// One page of records: `limit` rows (the page window when unset)
    /// starting at `offset`. A cached full scan is sliced instead of
    /// fetching again.
    pub fn page(&mut self) -> SisDbResult<&mut [Entity]> {
        let start = self.offset.unwrap_or(0);
        let len = self.limit.unwrap_or(self.window);

        if self.full_scan && self.cache.is_some() {
            debug!(schema = self.entity_type.name(), start, len, "page served from full scan");
            let items = self.cache.as_deref_mut().unwrap_or_default();
            let start = start.min(items.len());
            let end = start.saturating_add(len).min(items.len());
            return Ok(&mut items[start..end]);
        }

        if self.cache.is_none() {
            let params = QueryParams {
                limit: Some(len),
                ..self.params()
            };
            let page = self.endpoint.fetch_page(&params)?;
            self.count = Some(page.total_count());
            let items: Vec<Entity> = page
                .into_iter()
                .map(|row| self.entity_type.from_server(row))
                .collect();
            debug!(schema = self.entity_type.name(), rows = items.len(), "page fetched");
            self.cache = Some(items);
            self.full_scan = false;
        }
        Ok(self.cache.as_deref_mut().unwrap_or_default())
    }

    /// The single record matching the filter merged with `q`.
    ///
    /// Returns `None` when nothing matches and a query error when the
    /// service returns more than one row for a one-row request.
    pub fn find_one(&mut self, q: Option<Map<String, Value>>) -> SisDbResult<Option<Entity>> {
        if let Some(q) = q {
            self.filter(q);
        }
        let params = QueryParams {
            limit: Some(1),
            ..self.params()
        };
        let page = self.endpoint.fetch_page(&params)?;
        match page.len() {
            0 => Ok(None),
            1 => Ok(page.into_iter().next().map(|row| self.entity_type.from_server(row))),
            n => Err(SisDbError::Query(format!(
                "find_one on `{}` returned {n} rows",
                self.entity_type.name()
            ))),
        }
    }

    /// Deletes every record matching `q`.
    pub fn bulk_delete(&mut self, q: Map<String, Value>) -> SisDbResult<BulkDeleteResponse> {
        let response = self.endpoint.delete_bulk(&q)?;
        debug!(
            schema = self.entity_type.name(),
            deleted = response.success.len(),
            errors = response.errors.len(),
            "bulk delete"
        );
        self.invalidate();
        Ok(response)
    }

    /// Iterates [`all_items`](Self::all_items).
    pub fn iter(&mut self) -> SisDbResult<std::slice::Iter<'_, Entity>> {
        let items: &[Entity] = self.all_items()?;
        Ok(items.iter())
    }

    /// Consumes the query, returning [`all_items`](Self::all_items).
    pub fn into_items(mut self) -> SisDbResult<Vec<Entity>> {
        Ok(self.all_items()?.to_vec())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("schema", &self.entity_type.name())
            .field("filter", &self.filter)
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("populate", &self.populate)
            .field("cached", &self.cache.as_ref().map(Vec::len))
            .field("full_scan", &self.full_scan)
            .finish()
    }
}
