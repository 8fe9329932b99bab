mod common;

use common::{connect_with, q, schema};
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};
use sisdb::client::memory::MemoryClient;
use sisdb::client::{
    BulkDeleteResponse, ClientError, ClientResult, CreateResponse, DataEndpoint, Page, QueryParams,
    Record, Records, SchemaService, SisClient,
};
use sisdb::{ApiVersion, EntityType, SisDb, SisDbConfig, SisDbError, SortKeys};
use std::rc::Rc;

/// `hosts`: five records, cpus 1, 2, 2, 3, 4 across racks r1 and r2.
fn hosts_with(config: SisDbConfig) -> (MemoryClient, SisDb, Rc<EntityType>) {
    let (client, db) = connect_with(config);
    let ty = db
        .update_schema(schema(
            "hosts",
            json!({ "hostname": "String", "cpus": "Number", "rack": "String" }),
        ))
        .unwrap();
    client
        .entities("hosts")
        .create(Records::Many(vec![
            q(json!({ "hostname": "h0", "cpus": 1, "rack": "r1" })),
            q(json!({ "hostname": "h1", "cpus": 2, "rack": "r1" })),
            q(json!({ "hostname": "h2", "cpus": 2, "rack": "r2" })),
            q(json!({ "hostname": "h3", "cpus": 3, "rack": "r2" })),
            q(json!({ "hostname": "h4", "cpus": 4, "rack": "r2" })),
        ]))
        .unwrap();
    (client, db, ty)
}

fn hosts() -> (MemoryClient, SisDb, Rc<EntityType>) {
    hosts_with(SisDbConfig::default())
}

fn windowed(page_window: usize) -> (MemoryClient, SisDb, Rc<EntityType>) {
    hosts_with(SisDbConfig {
        page_window,
        ..SisDbConfig::default()
    })
}

fn cpus(items: &[sisdb::Entity]) -> Vec<i64> {
    items
        .iter()
        .map(|e| e.peek("cpus").and_then(|v| v.as_i64()).unwrap())
        .collect()
}

// ── Parameters ───────────────────────────────────────────────────

#[test]
fn filters_merge_and_sorts_append() {
    let (_client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query
        .filter(q(json!({ "rack": "r2" })))
        .filter(q(json!({ "cpus": 2 })))
        .sort("cpus")
        .sort(["-hostname"])
        .populate(true);

    let params = query.params();
    assert_eq!(params.q, Some(q(json!({ "rack": "r2", "cpus": 2 }))));
    assert_eq!(params.sort.as_deref(), Some("cpus,-hostname"));
    assert_eq!(params.populate, Some(true));
    assert_eq!(params.limit, None);

    query.reset();
    assert_eq!(query.params(), QueryParams::default());
}

#[test]
fn sort_keys_conversions() {
    assert_eq!(SortKeys::from("a").into_inner(), vec!["a"]);
    assert_eq!(SortKeys::from(String::from("-b")).into_inner(), vec!["-b"]);
    assert_eq!(SortKeys::from(vec!["a", "-b"]).into_inner(), vec!["a", "-b"]);
    assert_eq!(SortKeys::from(vec![String::from("c")]).into_inner(), vec!["c"]);
    assert_eq!(SortKeys::from(["x", "y"]).into_inner(), vec!["x", "y"]);
}

// ── Count ────────────────────────────────────────────────────────

#[test]
fn count_is_cached() {
    let (client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    assert_eq!(query.count().unwrap(), 5);

    let before = client.request_count();
    assert_eq!(query.count().unwrap(), 5);
    assert_eq!(client.request_count(), before);
}

#[test]
fn filter_invalidates_count() {
    let (client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query.count().unwrap();

    let before = client.request_count();
    query.filter(q(json!({ "cpus": 2 })));
    assert_eq!(query.count().unwrap(), 2);
    assert_eq!(client.request_count(), before + 1);
}

#[test]
fn empty_filter_keeps_cache() {
    let (client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query.count().unwrap();

    let before = client.request_count();
    query.filter(Map::new());
    query.count().unwrap();
    assert_eq!(client.request_count(), before);
}

#[test]
fn count_ignores_pagination() {
    let (_client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query.limit(1).offset(3);
    assert_eq!(query.count().unwrap(), 5);
}

#[test]
fn client_failure_is_passed_through() {
    let (client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    client.fail_next(ClientError::Transport("timed out".into()));
    assert!(matches!(
        query.count(),
        Err(SisDbError::Client(ClientError::Transport(_)))
    ));
    assert_eq!(query.count().unwrap(), 5);
}

// ── Full scans and pages ─────────────────────────────────────────

#[test]
fn all_items_scans_once() {
    let (client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    assert_eq!(query.all_items().unwrap().len(), 5);

    let before = client.request_count();
    assert_eq!(query.all_items().unwrap().len(), 5);
    assert_eq!(query.count().unwrap(), 5);
    assert_eq!(client.request_count(), before);
}

#[test]
fn all_items_honors_filter_and_sort() {
    let (_client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query.sort("-cpus");
    assert_eq!(cpus(query.all_items().unwrap()), vec![4, 3, 2, 2, 1]);

    query.filter(q(json!({ "rack": "r1" })));
    let items = query.all_items().unwrap();
    assert_eq!(cpus(items), vec![2, 1]);
    assert!(items.iter().all(|e| !e.has_changes() && e.is_persisted()));
}

#[test]
fn limit_and_offset_select_a_page() {
    let (client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query.sort("cpus").limit(2).offset(1);

    let before = client.request_count();
    assert_eq!(cpus(query.all_items().unwrap()), vec![2, 2]);
    assert_eq!(client.request_count(), before + 1);

    // the page reply carried the total
    assert_eq!(query.count().unwrap(), 5);
    assert_eq!(client.request_count(), before + 1);
}

#[test]
fn page_without_limit_uses_the_window() {
    let (client, _db, ty) = windowed(2);
    let mut query = ty.objects().unwrap();
    query.sort("cpus");

    let before = client.request_count();
    assert_eq!(cpus(query.page().unwrap()), vec![1, 2]);
    assert_eq!(query.page().unwrap().len(), 2);
    assert_eq!(client.request_count(), before + 1);
}

#[test]
fn pages_are_sliced_from_a_full_scan() {
    let (client, _db, ty) = windowed(2);
    let mut query = ty.objects().unwrap();
    query.sort("cpus");
    query.all_items().unwrap();

    let before = client.request_count();
    assert_eq!(cpus(query.page().unwrap()), vec![1, 2]);
    query.offset(2);
    assert_eq!(cpus(query.page().unwrap()), vec![2, 3]);
    query.offset(4).limit(10);
    assert_eq!(cpus(query.page().unwrap()), vec![4]);
    query.offset(9);
    assert!(query.page().unwrap().is_empty());
    assert_eq!(client.request_count(), before);
}

#[test]
fn changing_the_limit_refetches_the_page() {
    let (client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query.limit(1);
    assert_eq!(query.page().unwrap().len(), 1);

    let before = client.request_count();
    query.limit(3);
    assert_eq!(query.page().unwrap().len(), 3);
    assert_eq!(client.request_count(), before + 1);
}

#[test]
fn reset_returns_to_a_full_scan() {
    let (_client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query.limit(1);
    assert_eq!(query.all_items().unwrap().len(), 1);
    query.reset();
    assert_eq!(query.all_items().unwrap().len(), 5);
}

#[test]
fn iteration_and_into_items() {
    let (_client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query.filter(q(json!({ "rack": "r2" })));
    let names: Vec<String> = query
        .iter()
        .unwrap()
        .map(|e| e.peek("hostname").and_then(|v| v.as_str()).unwrap().to_string())
        .collect();
    assert_eq!(names.len(), 3);

    let items = query.into_items().unwrap();
    assert_eq!(items.len(), 3);
}

#[test]
fn cached_entities_can_be_edited_and_saved() {
    let (client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query.filter(q(json!({ "hostname": "h0" })));

    let items = query.all_items().unwrap();
    items[0].set("cpus", 99).unwrap();
    assert!(items[0].is_changed("cpus"));
    items[0].save().unwrap();

    let id = items[0].id().unwrap().to_string();
    assert_eq!(client.stored_record("hosts", &id).unwrap()["cpus"], json!(99));
}

// ── find_one and bulk_delete ─────────────────────────────────────

#[test]
fn find_one_returns_zero_or_one() {
    let (_client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    assert!(query.find_one(Some(q(json!({ "hostname": "nope" })))).unwrap().is_none());

    let mut query = ty.objects().unwrap();
    let mut found = query
        .find_one(Some(q(json!({ "hostname": "h3" }))))
        .unwrap()
        .expect("h3");
    assert_eq!(found.get("cpus").unwrap().as_i64(), Some(3));
    assert!(!found.has_changes());
    assert_eq!(query.params().q, Some(q(json!({ "hostname": "h3" }))));
}

#[test]
fn find_one_uses_the_existing_filter() {
    let (_client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query.filter(q(json!({ "rack": "r1" }))).sort("-cpus");
    let found = query.find_one(None).unwrap().expect("one row");
    assert_eq!(found.peek("hostname").and_then(|v| v.as_str()), Some("h1"));
}

/// Forwards to a memory client but ignores `limit` on paged fetches.
struct UnboundedClient {
    inner: MemoryClient,
}

struct UnboundedEndpoint(Box<dyn DataEndpoint>);

impl SisClient for UnboundedClient {
    fn version(&self) -> ApiVersion {
        self.inner.version()
    }

    fn schemas(&self) -> &dyn SchemaService {
        self.inner.schemas()
    }

    fn entities(&self, schema: &str) -> Box<dyn DataEndpoint> {
        Box::new(UnboundedEndpoint(self.inner.entities(schema)))
    }
}

impl DataEndpoint for UnboundedEndpoint {
    fn get(&self, id: &str) -> ClientResult<Record> {
        self.0.get(id)
    }

    fn create(&self, records: Records) -> ClientResult<CreateResponse> {
        self.0.create(records)
    }

    fn update(&self, id: &str, record: &Record) -> ClientResult<Record> {
        self.0.update(id, record)
    }

    fn delete(&self, id: &str) -> ClientResult<()> {
        self.0.delete(id)
    }

    fn delete_bulk(&self, q: &Map<String, Value>) -> ClientResult<BulkDeleteResponse> {
        self.0.delete_bulk(q)
    }

    fn fetch_page(&self, params: &QueryParams) -> ClientResult<Page> {
        self.0.fetch_page(&QueryParams {
            limit: None,
            ..params.clone()
        })
    }

    fn fetch_all(&self, params: &QueryParams) -> ClientResult<Vec<Record>> {
        self.0.fetch_all(params)
    }
}

#[test]
fn find_one_rejects_several_rows() {
    let (memory, _db, _ty) = hosts();
    let db = SisDb::connect(Rc::new(UnboundedClient { inner: memory })).unwrap();
    let hosts = db.entity_type("hosts").unwrap();

    let err = hosts
        .objects()
        .unwrap()
        .find_one(Some(q(json!({ "cpus": 2 }))))
        .unwrap_err();
    assert!(matches!(err, SisDbError::Query(_)));
    assert!(err.to_string().contains("returned 2 rows"));

    let mut query = hosts.objects().unwrap();
    assert!(query.find_one(Some(q(json!({ "hostname": "h4" })))).unwrap().is_some());
}

#[test]
fn bulk_delete_invalidates_cached_results() {
    let (client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    assert_eq!(query.count().unwrap(), 5);

    let response = query.bulk_delete(q(json!({ "rack": "r1" }))).unwrap();
    assert_eq!(response.success.len(), 2);
    assert!(response.errors.is_empty());
    assert_eq!(query.count().unwrap(), 3);
    assert_eq!(client.record_count("hosts"), 3);
}

#[test]
fn query_debug_names_the_schema() {
    let (_client, _db, ty) = hosts();
    let mut query = ty.objects().unwrap();
    query.limit(3);
    let debug = format!("{query:?}");
    assert!(debug.contains("hosts"));
    assert!(debug.contains("limit: Some(3)"));
    assert_eq!(query.entity_type().name(), "hosts");
}
