//! Tests for the collection API and the collection-records reload pass.

use metarepo_index::MemoryIndex;
use metarepo_repository::{
    fields, PutCollectionErrorCode, RepositoryConfig, RepositoryManager,
};
use std::sync::Arc;

fn setup() -> (tempfile::TempDir, Arc<RepositoryManager>) {
    let dir = tempfile::tempdir().unwrap();
    let config = RepositoryConfig::new(dir.path());
    let manager = Arc::new(RepositoryManager::new(config, Arc::new(MemoryIndex::new())).unwrap());
    (dir, manager)
}

#[test]
fn test_put_collection_creates_set_and_descriptor() {
    let (_dir, rm) = setup();

    let id = rm
        .put_collection("dcc", "adn", "DCC Collection", Some("Community records"), None)
        .unwrap();
    assert_eq!(id, "dcc");

    // The collection of collections is bootstrapped alongside.
    assert!(rm.is_set_configured("collect"));
    assert!(rm.is_set_configured("dcc"));

    let set = rm.set_info("dcc").unwrap();
    assert_eq!(set.format(), "adn");
    assert_eq!(set.name(), "DCC Collection");
    assert!(set.is_enabled());
    assert!(set
        .directory()
        .ends_with(std::path::Path::new("adn/dcc")));

    // The descriptor record is searchable by key.
    let doc = rm.get_record("dcc").unwrap();
    assert_eq!(doc.first(fields::KEY), Some("dcc"));
    assert_eq!(doc.first(fields::FORMAT_OF_RECORDS), Some("adn"));
}

#[test]
fn test_put_collection_validation_codes() {
    let (_dir, rm) = setup();

    let err = rm
        .put_collection("bad key", "adn", "Title", None, None)
        .unwrap_err();
    assert_eq!(err.code, PutCollectionErrorCode::BadKey);

    let err = rm
        .put_collection("dcc", "bad format", "Title", None, None)
        .unwrap_err();
    assert_eq!(err.code, PutCollectionErrorCode::BadFormatSpecifier);

    let err = rm.put_collection("dcc", "adn", "  ", None, None).unwrap_err();
    assert_eq!(err.code, PutCollectionErrorCode::BadTitle);

    let err = rm
        .put_collection("dcc", "adn", "Title", None, Some("<unclosed"))
        .unwrap_err();
    assert_eq!(err.code, PutCollectionErrorCode::BadAdditionalMetadata);
}

#[test]
fn test_put_collection_updates_existing() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();

    let id = rm
        .put_collection("dcc", "adn", "Renamed Collection", Some("New description"), None)
        .unwrap();
    assert_eq!(id, "dcc");

    let set = rm.set_info("dcc").unwrap();
    assert_eq!(set.name(), "Renamed Collection");
    assert_eq!(set.description(), "New description");

    // Only one descriptor record for the key.
    let doc = rm.get_record("dcc").unwrap();
    assert_eq!(doc.first(fields::TITLE), Some("Renamed Collection"));
}

#[test]
fn test_put_collection_format_change_rejected() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();

    let err = rm
        .put_collection("dcc", "oai_dc", "DCC Collection", None, None)
        .unwrap_err();
    assert_eq!(
        err.code,
        PutCollectionErrorCode::CollectionExistsInAnotherFormat
    );
}

#[test]
fn test_delete_collection_removes_everything() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();
    rm.put_record(
        "<record><id>REC-1</id><title>One</title></record>",
        "adn",
        "dcc",
        None,
        true,
    )
    .unwrap();

    let set_dir = rm.set_info("dcc").unwrap().directory().to_path_buf();
    assert!(set_dir.exists());

    assert!(rm.delete_collection("dcc").unwrap());
    assert!(!rm.is_set_configured("dcc"));
    assert!(!set_dir.exists());
    assert!(rm.get_record("dcc").is_none());
    assert!(rm.get_record("REC-1").is_none());

    // A second delete is a no-op, not an error.
    assert!(!rm.delete_collection("dcc").unwrap());
}

#[test]
fn test_collect_set_cannot_be_deleted() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();

    let err = rm.delete_collection("collect").unwrap_err();
    assert!(err.to_string().contains("managed internally"));
    assert!(rm.is_set_configured("collect"));
}

#[test]
fn test_load_collection_records_discovers_and_removes_sets() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();

    // Drop a descriptor record into the collection-records directory by
    // hand, the way an external editor would.
    let manual = rm.collection_records_dir().join("comet.xml");
    std::fs::write(
        &manual,
        "<collectionRecord>\n  <id>comet</id>\n  <key format=\"oai_dc\">comet</key>\n  \
         <title>COMET Modules</title>\n  <description>Training modules</description>\n  \
         <accessionStatus>accessioned</accessionStatus>\n</collectionRecord>\n",
    )
    .unwrap();

    rm.load_collection_records(false).unwrap();
    assert!(rm.is_set_configured("comet"));
    let set = rm.set_info("comet").unwrap();
    assert_eq!(set.format(), "oai_dc");
    assert_eq!(set.name(), "COMET Modules");

    // Existing sets survive the reload untouched.
    assert!(rm.is_set_configured("dcc"));
    assert!(rm.is_set_configured("collect"));

    // Removing the record removes the set on the next reload.
    std::fs::remove_file(&manual).unwrap();
    rm.load_collection_records(false).unwrap();
    assert!(!rm.is_set_configured("comet"));
    assert!(rm.is_set_configured("dcc"));
}

#[test]
fn test_load_collection_records_preserves_enabled_flag() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();

    let uid = rm.set_info("dcc").unwrap().unique_id();
    rm.disable_set(uid).unwrap();
    assert!(rm.is_set_disabled("dcc"));

    rm.load_collection_records(false).unwrap();
    assert!(rm.is_set_disabled("dcc"));
}

#[test]
fn test_set_counts() {
    let (_dir, rm) = setup();
    rm.put_collection("dcc", "adn", "DCC Collection", None, None)
        .unwrap();
    rm.put_record(
        "<record><id>REC-1</id><title>One</title></record>",
        "adn",
        "dcc",
        None,
        true,
    )
    .unwrap();
    rm.put_record(
        "<record><id>REC-2</id><title>Two</title></record>",
        "adn",
        "dcc",
        None,
        true,
    )
    .unwrap();

    let counts = rm.set_counts("dcc").unwrap();
    assert_eq!(counts.num_indexed, 2);
    assert_eq!(counts.num_files, 2);
    assert_eq!(counts.num_errors, 0);
    assert_eq!(counts.num_deleted, 0);

    assert!(rm.set_counts("nosuch").is_none());
}
