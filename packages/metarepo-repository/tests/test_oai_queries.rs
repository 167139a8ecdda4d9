//! Tests for the OAI query engine: discoverability, sets, formats and
//! date-range handling.

use metarepo_index::MemoryIndex;
use metarepo_repository::{
    fields, DeletedRecordPolicy, Granularity, OAIErrorCode, RepositoryConfig, RepositoryManager,
    RuleClause, SetDefinition,
};
use std::sync::Arc;

fn setup() -> (tempfile::TempDir, Arc<RepositoryManager>) {
    let dir = tempfile::tempdir().unwrap();
    let config = RepositoryConfig::new(dir.path());
    let manager = Arc::new(RepositoryManager::new(config, Arc::new(MemoryIndex::new())).unwrap());
    (dir, manager)
}

fn record_xml(id: &str, title: &str) -> String {
    format!("<record><id>{}</id><title>{}</title></record>", id, title)
}

// Two collections with one record each, plus the collect bootstrap.
fn seeded() -> (tempfile::TempDir, Arc<RepositoryManager>) {
    let (dir, rm) = setup();
    rm.put_collection("abc", "adn", "ABC Collection", None, None)
        .unwrap();
    rm.put_collection("xyz", "adn", "XYZ Collection", None, None)
        .unwrap();
    rm.put_record(&record_xml("REC-A", "Ocean currents"), "adn", "abc", None, true)
        .unwrap();
    rm.put_record(&record_xml("REC-X", "Mountain building"), "adn", "xyz", None, true)
        .unwrap();
    (dir, rm)
}

fn ids(docs: &[Arc<metarepo_index::Document>]) -> Vec<&str> {
    docs.iter().filter_map(|d| d.first(fields::ID)).collect()
}

#[test]
fn test_oai_query_returns_records_of_requested_format() {
    let (_dir, rm) = seeded();

    let results = rm.oai_query_results("adn", None, None, None).unwrap();
    let ids = ids(&results);
    assert!(ids.contains(&"REC-A"));
    assert!(ids.contains(&"REC-X"));

    // No conversion reaches oai_dc, so the request matches nothing.
    assert!(rm.oai_query_results("oai_dc", None, None, None).unwrap().is_empty());

    // Registering the conversion opens the format up.
    rm.add_format_conversion("adn", "oai_dc");
    let results = rm.oai_query_results("oai_dc", None, None, None).unwrap();
    assert!(ids_contains(&results, "REC-A"));
}

fn ids_contains(docs: &[Arc<metarepo_index::Document>], id: &str) -> bool {
    docs.iter().any(|d| d.first(fields::ID) == Some(id))
}

#[test]
fn test_disabled_sets_are_subtracted_from_oai() {
    let (_dir, rm) = seeded();

    let uid = rm.set_info("xyz").unwrap().unique_id();
    rm.disable_set(uid).unwrap();

    let results = rm.oai_query_results("adn", None, None, None).unwrap();
    assert!(ids_contains(&results, "REC-A"));
    assert!(!ids_contains(&results, "REC-X"));

    // get_record_oai honors discoverability too.
    assert!(rm.get_record_oai("REC-A").is_some());
    assert!(rm.get_record_oai("REC-X").is_none());
}

#[test]
fn test_odl_star_excludes_tombstones_standard_query_keeps_them() {
    let dir = tempfile::tempdir().unwrap();
    let config = RepositoryConfig::new(dir.path()).with_tombstones(true);
    let rm = Arc::new(RepositoryManager::new(config, Arc::new(MemoryIndex::new())).unwrap());

    rm.put_collection("abc", "adn", "ABC Collection", None, None)
        .unwrap();
    rm.put_record(&record_xml("REC-1", "Live"), "adn", "abc", None, true)
        .unwrap();
    rm.put_record(&record_xml("REC-2", "Doomed"), "adn", "abc", None, true)
        .unwrap();
    rm.delete_record("REC-2").unwrap();

    // The standard OAI corpus keeps tombstones, boosted to the bottom.
    let results = rm.oai_query_results("adn", None, None, None).unwrap();
    assert!(ids_contains(&results, "REC-2"));
    let rec1_pos = results
        .iter()
        .position(|d| d.first(fields::ID) == Some("REC-1"))
        .unwrap();
    let rec2_pos = results
        .iter()
        .position(|d| d.first(fields::ID) == Some("REC-2"))
        .unwrap();
    assert!(rec1_pos < rec2_pos);

    // ODL '*' requests only non-deleted records.
    let results = rm
        .odl_query_results("adn", None, None, None, Some("*"))
        .unwrap();
    assert!(ids_contains(&results, "REC-1"));
    assert!(!ids_contains(&results, "REC-2"));

    assert_eq!(rm.deleted_record_policy(), DeletedRecordPolicy::Transient);
}

#[test]
fn test_default_policy_advertises_no_deletions() {
    let (_dir, rm) = setup();
    assert_eq!(rm.deleted_record_policy(), DeletedRecordPolicy::No);
}

#[test]
fn test_odl_raw_query_restricts_results() {
    let (_dir, rm) = seeded();

    let results = rm
        .odl_query_results("adn", None, None, None, Some("ocean"))
        .unwrap();
    assert!(ids_contains(&results, "REC-A"));
    assert!(!ids_contains(&results, "REC-X"));

    // Malformed queries are protocol errors.
    let err = rm
        .odl_query_results("adn", None, None, None, Some("(ocean"))
        .unwrap_err();
    assert_eq!(err.code, OAIErrorCode::BadArgument);

    // An empty ODL query matches nothing.
    assert!(rm
        .odl_query_results("adn", None, None, None, Some("  "))
        .unwrap()
        .is_empty());
}

#[test]
fn test_set_restriction_uses_compiled_definitions() {
    let (_dir, rm) = seeded();

    rm.set_definition(SetDefinition {
        set_spec: "oceanset".to_string(),
        name: "Ocean Set".to_string(),
        include: vec![RuleClause::Term("ocean".to_string())],
        ..Default::default()
    })
    .unwrap();

    let results = rm
        .oai_query_results("adn", Some("oceanset"), None, None)
        .unwrap();
    assert!(ids_contains(&results, "REC-A"));
    assert!(!ids_contains(&results, "REC-X"));

    // An unknown set matches nothing rather than erroring.
    assert!(rm
        .oai_query_results("adn", Some("nosuch"), None, None)
        .unwrap()
        .is_empty());

    assert_eq!(rm.sets_for_record("REC-A"), vec!["oceanset".to_string()]);
    assert!(rm.sets_for_record("REC-X").is_empty());
}

#[test]
fn test_exclude_only_definition_is_catch_all_with_exclusion() {
    let (_dir, rm) = seeded();

    rm.set_definition(SetDefinition {
        set_spec: "notmountains".to_string(),
        name: "Everything but mountains".to_string(),
        exclude: vec![RuleClause::Term("mountain".to_string())],
        ..Default::default()
    })
    .unwrap();

    let in_set = rm.num_records_in_set("notmountains").unwrap();
    // Catch-all matches every live record except REC-X (the two
    // descriptor records and the master record included).
    assert!(in_set >= 3);

    let results = rm
        .oai_query_results("adn", Some("notmountains"), None, None)
        .unwrap();
    assert!(ids_contains(&results, "REC-A"));
    assert!(!ids_contains(&results, "REC-X"));

    assert!(rm.num_records_in_set("nosuchset").is_none());
}

#[test]
fn test_equal_from_and_until_matches_that_day() {
    let (_dir, rm) = seeded();
    rm.admin().set_granularity(Granularity::Day);

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let results = rm
        .oai_query_results("adn", None, Some(&today), Some(&today))
        .unwrap();
    assert!(ids_contains(&results, "REC-A"));

    // A past day with equal bounds matches nothing.
    let results = rm
        .oai_query_results("adn", None, Some("2001-01-01"), Some("2001-01-01"))
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_mismatched_granularity_is_rejected() {
    let (_dir, rm) = seeded();

    let err = rm
        .oai_query_results("adn", None, Some("2024-06-01"), Some("2024-06-02T00:00:00Z"))
        .unwrap_err();
    assert_eq!(err.code, OAIErrorCode::BadArgument);

    let err = rm
        .oai_query_results("adn", None, Some("junk-date!"), None)
        .unwrap_err();
    assert_eq!(err.code, OAIErrorCode::BadArgument);
}

#[test]
fn test_oai_filter_query_blocks_records() {
    let (_dir, rm) = seeded();

    rm.set_oai_filter_query(Some("collection:abc")).unwrap();
    let results = rm.oai_query_results("adn", None, None, None).unwrap();
    assert!(!ids_contains(&results, "REC-A"));
    assert!(ids_contains(&results, "REC-X"));

    rm.set_oai_filter_query(None).unwrap();
    let results = rm.oai_query_results("adn", None, None, None).unwrap();
    assert!(ids_contains(&results, "REC-A"));
}

#[test]
fn test_provider_disabled_returns_nothing_for_standard_requests() {
    let (_dir, rm) = seeded();

    rm.admin().set_provider_enabled(false);
    assert!(rm.oai_query_results("adn", None, None, None).unwrap().is_empty());

    // ODL search is unaffected by the provider flag.
    let results = rm
        .odl_query_results("adn", None, None, None, Some("*"))
        .unwrap();
    assert!(!results.is_empty());
}

#[test]
fn test_identify_accessors() {
    let (_dir, rm) = seeded();

    rm.set_repository_name("Test Digital Library");
    rm.set_repository_identifier("example.org");
    assert_eq!(rm.repository_name(), "Test Digital Library");
    assert_eq!(rm.protocol_version(), "2.0");
    assert_eq!(rm.admin().oai_id_prefix(), "oai:example.org:");

    // Earliest datestamp is formatted at the configured granularity.
    rm.admin().set_granularity(Granularity::Day);
    let stamp = rm.earliest_datestamp();
    assert_eq!(stamp.len(), 10);
}

#[test]
fn test_list_sets_and_metadata_formats() {
    let (_dir, rm) = seeded();

    rm.set_definition(
        SetDefinition::new("oceanset", "Ocean Set").include_terms("ocean"),
    )
    .unwrap();

    let sets = rm.list_sets();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].set_spec, "oceanset");
    assert_eq!(sets[0].name, "Ocean Set");

    rm.add_format_conversion("adn", "oai_dc");
    rm.admin()
        .set_metadata_namespace("oai_dc", "http://www.openarchives.org/OAI/2.0/oai_dc/");

    let formats = rm.list_metadata_formats(None);
    let prefixes: Vec<&str> = formats.iter().map(|f| f.prefix.as_str()).collect();
    assert!(prefixes.contains(&"adn"));
    assert!(prefixes.contains(&"oai_dc"));

    let oai_dc = formats.iter().find(|f| f.prefix == "oai_dc").unwrap();
    assert_eq!(
        oai_dc.namespace,
        "http://www.openarchives.org/OAI/2.0/oai_dc/"
    );

    // Per-record listing follows the record's native format.
    let formats = rm.list_metadata_formats(Some("REC-A"));
    let prefixes: Vec<&str> = formats.iter().map(|f| f.prefix.as_str()).collect();
    assert_eq!(prefixes, ["adn", "oai_dc"]);

    assert!(rm.list_metadata_formats(Some("NO-SUCH")).is_empty());
}

#[test]
fn test_num_discoverable_resources_tracks_changes() {
    let (_dir, rm) = seeded();

    let before = rm.num_discoverable_resources();
    assert!(before >= 5); // master + 2 descriptors + 2 records

    rm.put_record(&record_xml("REC-B", "Another"), "adn", "abc", None, true)
        .unwrap();
    assert_eq!(rm.num_discoverable_resources(), before + 1);

    let uid = rm.set_info("xyz").unwrap().unique_id();
    rm.disable_set(uid).unwrap();
    assert!(rm.num_discoverable_resources() < before + 1);
}
