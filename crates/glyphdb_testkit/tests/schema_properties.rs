//! Schema parsing and migration properties.

use glyphdb_core::schema::{base_schema, parse_schema};
use glyphdb_core::{ErrorKind, Predicate, Record};
use glyphdb_testkit::prelude::*;
use proptest::prelude::*;

fn migration(version: u64, table: &str) -> String {
    format!(
        "MIGRATION: {version}\nNAME: add_{table}\nUP:\nTABLE: {table}\nlabel: text unique\nDOWN:\nDROP TABLE: {table}\n"
    )
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn parsing_is_deterministic(text in schema_text_strategy()) {
        let first = parse_schema(&text).unwrap();
        let second = parse_schema(&text).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.database.as_deref(), Some("generated"));
        prop_assert_eq!(first.tables.len(), text.matches("TABLE: ").count());
    }

    #[test]
    fn compiled_tables_follow_declarations(text in schema_text_strategy()) {
        let (database, tables) = base_schema(Some(&text)).unwrap();
        let (_, again) = base_schema(Some(&text)).unwrap();
        prop_assert_eq!(database.as_str(), "generated");
        prop_assert_eq!(&tables, &again);

        let parsed = parse_schema(&text).unwrap();
        for def in &parsed.tables {
            prop_assert!(tables.iter().any(|t| t.name() == def.name));
        }
    }
}

#[test]
fn malformed_schema_is_rejected() {
    for text in ["title: text", "TABLE: t\na: text\na: integer", "TABLE: t\na: nonsense_token"] {
        let err = parse_schema(text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{text}");
    }
}

#[test]
fn migrations_are_monotonic() {
    let engine = TestEngine::memory();
    assert_eq!(engine.schema_version().unwrap(), 0);
    for (version, table) in [(1, "tags"), (2, "labels"), (3, "colors")] {
        assert_eq!(engine.migrate(&migration(version, table)).unwrap(), version);
    }
    assert_eq!(engine.schema_version().unwrap(), 3);

    let err = engine.migrate(&migration(2, "again")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!engine.snapshot().contains("again"));

    let fresh = TestEngine::memory();
    fresh.migrate(&migration(1, "tags")).unwrap();
    let err = fresh.migrate(&migration(3, "colors")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(fresh.schema_version().unwrap(), 1);
}

#[test]
fn failing_script_leaves_version_unchanged() {
    let engine = TestEngine::memory();
    engine.migrate(&migration(1, "tags")).unwrap();
    let bad = "MIGRATION: 2\nNAME: broken\nUP:\nTABLE: extra\nlabel: text\nDROP TABLE: nowhere\n";
    assert!(engine.migrate(bad).is_err());
    assert_eq!(engine.schema_version().unwrap(), 1);
    assert!(!engine.snapshot().contains("extra"));
}

#[test]
fn rollback_and_reapply() {
    let engine = TestEngine::memory();
    engine.migrate(&migration(1, "tags")).unwrap();
    engine.create("tags", Record::new().with("label", "x")).unwrap();

    let reverted = engine.rollback().unwrap();
    assert_eq!(reverted.version, 1);
    assert_eq!(engine.schema_version().unwrap(), 0);
    assert!(!engine.snapshot().contains("tags"));

    engine.migrate(&migration(1, "tags")).unwrap();
    assert!(engine.find("tags", &Predicate::new()).unwrap().is_empty());
    assert_eq!(engine.applied_migrations().unwrap().len(), 1);

    let engine = engine.reopen();
    assert_eq!(engine.schema_version().unwrap(), 1);
}
