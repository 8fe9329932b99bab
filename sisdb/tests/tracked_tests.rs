mod common;

use common::{connect_with_test_schemas, q};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use sisdb::client::memory::MemoryClient;
use sisdb::{Entity, FieldValue, SisDb, TrackedList, TrackedMap};

fn loaded(data: Value) -> (MemoryClient, SisDb, Entity) {
    let (client, db) = connect_with_test_schemas();
    let e = db.entity_type("test_sisdb_schema").unwrap().from_server(q(data));
    (client, db, e)
}

fn changed(e: &Entity) -> Vec<String> {
    e.changed_fields().into_iter().collect()
}

// ── TrackedMap ───────────────────────────────────────────────────

#[test]
fn map_reads_never_mark() {
    let (_client, _db, mut e) = loaded(json!({ "mixed": { "a": 1, "b": [1, 2] } }));
    let map = e.map_mut("mixed").unwrap();
    assert_eq!(map.get("a"), Some(&json!(1)));
    assert!(map.contains_key("b"));
    assert_eq!(map.len(), 2);
    assert_eq!(map.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
    assert_eq!(map.iter().count(), 2);
    assert!(!e.has_changes());
}

#[test]
fn map_insert_marks_owner_field() {
    let (_client, _db, mut e) = loaded(json!({ "mixed": { "a": 1 } }));
    e.map_mut("mixed").unwrap().insert("b", json!(2));
    assert_eq!(changed(&e), vec!["mixed"]);
    assert_eq!(e.to_saved_value(true), json!({ "mixed": { "a": 1, "b": 2 } }));
}

#[test]
fn every_map_mutator_marks() {
    let edits: [fn(&mut TrackedMap); 5] = [
        |m: &mut TrackedMap| {
            m.remove("a");
        },
        |m: &mut TrackedMap| m.clear(),
        |m: &mut TrackedMap| m.extend([("c".to_string(), json!(3))]),
        |m: &mut TrackedMap| m.retain(|k, _| k.as_str() != "a"),
        |m: &mut TrackedMap| {
            if let Some(v) = m.get_mut("a") {
                *v = json!(10);
            }
        },
    ];
    for (i, edit) in edits.into_iter().enumerate() {
        let (_client, _db, mut e) = loaded(json!({ "mixed": { "a": 1 } }));
        edit(e.map_mut("mixed").unwrap());
        assert!(e.is_changed("mixed"), "edit #{i} was not tracked");
    }
}

#[test]
fn map_get_mut_on_missing_key_is_not_an_edit() {
    let (_client, _db, mut e) = loaded(json!({ "mixed": { "a": 1 } }));
    assert!(e.map_mut("mixed").unwrap().get_mut("zzz").is_none());
    assert!(!e.has_changes());
}

#[test]
fn map_mut_installs_an_empty_mapping() {
    let (_client, _db, mut e) = loaded(json!({}));
    assert!(e.map_mut("mixed").unwrap().is_empty());
    assert!(!e.has_changes());

    e.map_mut("mixed").unwrap().insert("k", json!("v"));
    assert!(e.is_changed("mixed"));
}

#[test]
fn map_mut_on_non_mixed_field_fails() {
    let (_client, _db, mut e) = loaded(json!({ "name": "x" }));
    assert!(e.map_mut("name").unwrap_err().is_conversion());
}

// ── TrackedList ──────────────────────────────────────────────────

#[test]
fn list_push_marks_once() {
    let (_client, _db, mut e) = loaded(json!({ "tags": ["a"] }));
    let tags = e.list_mut("tags").unwrap();
    tags.push("b").unwrap();
    tags.push("c").unwrap();
    assert_eq!(changed(&e), vec!["tags"]);
    assert_eq!(e.to_saved_value(true), json!({ "tags": ["a", "b", "c"] }));
}

#[test]
fn list_elements_are_coerced() {
    let (_client, _db, mut e) = loaded(json!({ "tags": [1, true] }));
    let tags = e.list_mut("tags").unwrap();
    assert_eq!(tags.get(0).unwrap(), Some(&FieldValue::from("1")));
    assert_eq!(tags.get(1).unwrap().and_then(FieldValue::as_str), Some("true"));
    assert_eq!(tags.get(5).unwrap(), None);

    tags.push(7).unwrap();
    assert_eq!(tags.peek(2).and_then(FieldValue::as_str), Some("7"));
}

#[test]
fn rejected_element_leaves_list_untouched() {
    let (_client, db) = connect_with_test_schemas();
    let ty = db
        .update_schema(common::schema("scores", json!({ "values": ["Number"] })))
        .unwrap();
    let mut e = ty.from_server(q(json!({ "values": [1, 2] })));

    let values = e.list_mut("values").unwrap();
    assert!(values.push("many").unwrap_err().is_conversion());
    assert!(values.extend(["3", "four"]).unwrap_err().is_conversion());
    assert_eq!(values.len(), 2);
    assert!(!e.has_changes());
}

#[test]
fn every_list_mutator_marks() {
    let edits: [fn(&mut TrackedList); 10] = [
        |l: &mut TrackedList| l.insert(0, "z").unwrap(),
        |l: &mut TrackedList| {
            l.set(0, "z").unwrap();
        },
        |l: &mut TrackedList| l.extend(["y", "z"]).unwrap(),
        |l: &mut TrackedList| {
            l.remove(0);
        },
        |l: &mut TrackedList| {
            l.pop();
        },
        |l: &mut TrackedList| {
            l.remove_item(&"a".into());
        },
        |l: &mut TrackedList| l.clear(),
        |l: &mut TrackedList| l.retain(|v| v.as_str() != Some("a")),
        |l: &mut TrackedList| l.reverse(),
        |l: &mut TrackedList| l.sort_by(|a, b| a.as_str().cmp(&b.as_str())),
    ];
    for (i, edit) in edits.into_iter().enumerate() {
        let (_client, _db, mut e) = loaded(json!({ "tags": ["a", "b"] }));
        edit(e.list_mut("tags").unwrap());
        assert!(e.is_changed("tags"), "edit #{i} was not tracked");
    }
}

#[test]
fn removals_that_remove_nothing_are_not_edits() {
    let (_client, _db, mut e) = loaded(json!({ "tags": ["a"], "mixed": { "k": 1 } }));

    let tags = e.list_mut("tags").unwrap();
    assert_eq!(tags.remove(5), None);
    assert!(!tags.remove_item(&"nope".into()));
    assert_eq!(tags.len(), 1);
    assert_eq!(e.map_mut("mixed").unwrap().remove("missing"), None);
    assert!(!e.has_changes());

    let (_client, _db, mut empty) = loaded(json!({ "tags": [] }));
    assert_eq!(empty.list_mut("tags").unwrap().pop(), None);
    assert!(!empty.has_changes());

    // the same calls do mark once they hit something
    let tags = e.list_mut("tags").unwrap();
    assert_eq!(tags.pop(), Some(FieldValue::from("a")));
    assert_eq!(changed(&e), vec!["tags"]);
}

#[test]
fn list_edits_round_trip_through_storage() {
    let (_client, _db, mut e) = loaded(json!({ "tags": ["b", "a", "c"] }));
    let tags = e.list_mut("tags").unwrap();
    tags.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    assert!(tags.remove_item(&"c".into()));
    assert!(!tags.remove_item(&"nope".into()));
    tags.insert(0, "first").unwrap();
    assert_eq!(e.to_saved_value(true), json!({ "tags": ["first", "a", "b"] }));
}

#[test]
fn missing_list_reads_empty() {
    let (_client, _db, mut e) = loaded(json!({}));
    assert!(e.get("tags").unwrap().as_list().unwrap().is_empty());
    assert!(!e.has_changes());
}

#[test]
fn list_of_embedded_documents_reports_to_list_field() {
    let (_client, _db, mut e) = loaded(json!({ "parts": [{ "label": "disk", "qty": 2 }] }));
    let parts = e.list_mut("parts").unwrap();
    let part = parts.entity_mut(0).unwrap().expect("embedded part");
    assert!(part.is_embedded());
    part.set("qty", "3").unwrap();

    assert_eq!(changed(&e), vec!["parts"]);
    assert_eq!(
        e.to_saved_value(true),
        json!({ "parts": [{ "label": "disk", "qty": 3 }] })
    );
}

#[test]
fn list_of_mixed_values_yields_tracked_maps() {
    let (_client, db) = connect_with_test_schemas();
    let ty = db
        .update_schema(common::schema("bags", json!({ "items": [] })))
        .unwrap();
    let mut e = ty.from_server(q(json!({ "items": [{ "a": 1 }, 2] })));

    let items = e.list_mut("items").unwrap();
    assert!(items.map_mut(1).unwrap().is_none());
    items.map_mut(0).unwrap().expect("mapping").insert("b", json!(2));
    assert!(e.is_changed("items"));
}

// ── Ownership ────────────────────────────────────────────────────

#[test]
fn cloned_entity_tracks_its_own_changes() {
    let (_client, _db, mut e) = loaded(json!({ "mixed": { "a": 1 }, "tags": ["x"] }));
    e.get("mixed").unwrap();
    e.get("tags").unwrap();

    let mut copy = e.clone();
    copy.map_mut("mixed").unwrap().insert("b", json!(2));
    copy.list_mut("tags").unwrap().push("y").unwrap();

    assert_eq!(changed(&copy), vec!["mixed", "tags"]);
    assert!(!e.has_changes());
}

#[test]
#[should_panic(expected = "owning entity was dropped")]
fn container_outliving_its_entity_panics_on_edit() {
    let (_client, db) = connect_with_test_schemas();
    let ty = db.entity_type("test_sisdb_schema").unwrap();
    let mut tags = {
        let mut e = ty.new_entity();
        e.list_mut("tags").unwrap().clone()
    };
    let _ = tags.push("late");
}

#[test]
fn container_outliving_its_entity_can_still_be_read() {
    let (_client, db) = connect_with_test_schemas();
    let ty = db.entity_type("test_sisdb_schema").unwrap();
    let tags = {
        let mut e = ty.from_server(q(json!({ "tags": ["a"] })));
        e.list_mut("tags").unwrap().clone()
    };
    assert_eq!(tags.len(), 1);
    assert!(tags.contains(&"a".into()));
}
