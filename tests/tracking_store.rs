use invite_merge::model::TrackingRecord;
use invite_merge::tracking::TrackingStore;
use std::fs;

#[test]
fn marking_twice_keeps_one_entry_last_write_wins() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let path = temp.path().join("nested").join("sent.json");
    let mut store = TrackingStore::load(&path);

    store
        .mark_processed("Anna <anna@example.org>", TrackingRecord::email("anna@example.org"))
        .expect("first write");
    store
        .mark_processed("Anna <anna@example.org>", TrackingRecord::email("ANNA@example.org"))
        .expect("second write");

    let reloaded = TrackingStore::load(&path);
    assert_eq!(reloaded.len(), 1);
    let ids: Vec<&String> = reloaded.records().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["Anna <anna@example.org>"]);
    assert_eq!(
        reloaded
            .get("Anna <anna@example.org>")
            .and_then(|r| r.email.as_deref()),
        Some("ANNA@example.org")
    );
}

#[test]
fn unparsable_file_loads_empty_and_is_backed_up() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let path = temp.path().join("tracking.json");
    fs::write(&path, "{ not json").expect("write corrupt file");

    let mut store = TrackingStore::load(&path);
    assert!(store.is_empty());

    store
        .mark_processed("Anna", TrackingRecord::output("out/Invitation - Anna.png"))
        .expect("rewrite");

    let backup = temp.path().join("tracking.json.corrupt");
    assert_eq!(
        fs::read_to_string(backup).expect("backup exists"),
        "{ not json"
    );
    let reloaded = TrackingStore::load(&path);
    assert!(reloaded.was_processed("Anna"));
}

#[test]
fn non_utf8_file_is_backed_up_before_rewrite() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let path = temp.path().join("tracking.json");
    let original: &[u8] = b"{\"Old\": \xff\xfe}";
    fs::write(&path, original).expect("write non-utf8 file");

    let mut store = TrackingStore::load(&path);
    assert!(store.is_empty());
    store
        .mark_processed("Anna", TrackingRecord::output("out/Invitation - Anna.png"))
        .expect("rewrite");

    let backup = temp.path().join("tracking.json.corrupt");
    assert_eq!(fs::read(backup).expect("backup exists"), original);
    assert!(TrackingStore::load(&path).was_processed("Anna"));
}

#[test]
fn file_format_is_a_flat_json_object() {
    let temp = tempfile::tempdir().expect("failed creating tempdir");
    let path = temp.path().join("tracking.json");
    let mut store = TrackingStore::load(&path);
    store
        .mark_processed("Ben Ode", TrackingRecord::output("out/Invitation - Ben Ode.png"))
        .expect("write");

    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("valid json");
    let record = &value["Ben Ode"];
    assert_eq!(record["output"], "out/Invitation - Ben Ode.png");
    assert!(record["timestamp"].as_str().is_some_and(|t| t.len() == 19));
    assert!(record.get("email").is_none());
}
