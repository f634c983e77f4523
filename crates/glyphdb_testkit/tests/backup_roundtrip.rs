//! Backup and restore through the engine.

use glyphdb_core::schema::builtin::{BACKUPS, RESTORE_PROTECTED};
use glyphdb_core::{ErrorKind, Predicate, Query, Record, RecordId};
use glyphdb_testkit::prelude::*;
use proptest::prelude::*;

fn notes(engine: &TestEngine) -> Vec<Record> {
    engine.query(&Query::new().from("notes")).unwrap()
}

proptest! {
    #![proptest_config(PropTestConfig { cases: 12, max_shrink_iters: 50 }.to_proptest_config())]

    #[test]
    fn restore_brings_back_the_snapshot(before in notes_strategy(10), after in notes_strategy(10)) {
        let engine = TestEngine::memory();
        let auth = engine.user("ada", "pw");
        for note in &before {
            engine.create("notes", note.clone()).unwrap();
        }
        engine.track_glyph_usage(&auth, "code").unwrap();
        let saved = notes(&engine);
        let info = engine.backup(&auth, "nightly").unwrap();
        let snapshot = engine
            .read_backup_artifact(&info.artifact_path)
            .unwrap()
            .open(&auth)
            .unwrap();

        engine.delete("notes", &Predicate::new().ne("title", "zzz")).unwrap();
        for note in &after {
            engine.create("notes", note.clone()).unwrap();
        }
        engine.track_glyph_usage(&auth, "code").unwrap();
        engine.login("ada", "pw", serde_json::Value::Null).unwrap();

        let report = engine.restore(&auth, info.id).unwrap();
        prop_assert_eq!(report.records, snapshot.record_count());
        prop_assert_eq!(notes(&engine), saved);
        for table in &snapshot.tables {
            let rows = engine.query(&Query::new().from(table.name.as_str())).unwrap();
            prop_assert_eq!(&rows, &table.rows, "table {}", table.name);
        }
    }
}

#[test]
fn engine_owned_tables_are_not_exported() {
    let engine = TestEngine::memory();
    let auth = engine.user("ada", "pw");
    let info = engine.backup(&auth, "plain").unwrap();
    let snapshot = engine
        .read_backup_artifact(&info.artifact_path)
        .unwrap()
        .open(&auth)
        .unwrap();
    for owned in RESTORE_PROTECTED {
        assert!(snapshot.tables.iter().all(|t| t.name != *owned), "{owned} exported");
    }

    let explicit = TestEngine::with_config(fast_config().export_tables(["sessions"]));
    let auth = explicit.user("ada", "pw");
    assert_eq!(explicit.backup(&auth, "x").unwrap_err().kind(), ErrorKind::Validation);
}

#[test]
fn restore_accepts_forward_references() {
    let engine = TestEngine::with_config(fast_config().schema(
        "TABLE: child\nparent_id: integer foreign_key(parent.id)\nTABLE: parent\nname: text\n",
    ));
    let auth = engine.user("ada", "pw");
    let parent = engine.create("parent", Record::new().with("name", "p")).unwrap();
    engine
        .create("child", Record::new().with("parent_id", parent.id().unwrap()))
        .unwrap();
    let info = engine.backup(&auth, "fk").unwrap();

    let report = engine.restore(&auth, info.id).unwrap();
    assert_eq!(report.records, 2);
    assert_eq!(engine.query(&Query::new().from("child")).unwrap().len(), 1);
    assert_eq!(engine.query(&Query::new().from("parent")).unwrap().len(), 1);
}

#[test]
fn restore_accepts_self_references_to_later_rows() {
    let engine = TestEngine::with_config(fast_config().schema(
        "TABLE: nodes\nlabel: text\nparent_id: integer foreign_key(nodes.id)\n",
    ));
    let auth = engine.user("ada", "pw");
    let first = engine.create("nodes", Record::new().with("label", "leaf")).unwrap();
    let second = engine.create("nodes", Record::new().with("label", "root")).unwrap();
    engine
        .update(
            "nodes",
            &Record::new().with("parent_id", second.id().unwrap()),
            &Predicate::id(first.id().unwrap()),
        )
        .unwrap();
    let saved = engine.query(&Query::new().from("nodes")).unwrap();
    let info = engine.backup(&auth, "tree").unwrap();

    engine.restore(&auth, info.id).unwrap();
    assert_eq!(engine.query(&Query::new().from("nodes")).unwrap(), saved);
}

#[test]
fn artifact_matches_the_stored_backup() {
    let engine = TestEngine::memory();
    let auth = engine.user("ada", "pw");
    engine.create("notes", Record::new().with("title", "a")).unwrap();
    let info = engine.backup(&auth, "weekly").unwrap();

    assert!(info.artifact_path.starts_with("backups"));
    assert!(info.artifact_path.to_string_lossy().ends_with(".glbk"));
    let artifact = engine.read_backup_artifact(&info.artifact_path).unwrap();
    assert_eq!(artifact.created, info.created);
    assert_eq!(artifact.ciphertext.len(), info.size);

    let snapshot = artifact.open(&auth).unwrap();
    assert_eq!(snapshot.database, "glyphdb");
    assert!(snapshot.tables.iter().any(|t| t.name == "notes" && t.rows.len() == 1));
    assert!(snapshot.tables.iter().all(|t| t.name != BACKUPS));
}

#[test]
fn restore_failures_are_classified() {
    let engine = TestEngine::memory();
    let ada = engine.user("ada", "pw");
    let bob = engine.user("bob", "pw");
    let info = engine.backup(&ada, "mine").unwrap();

    let missing = engine.restore(&ada, RecordId::new(999)).unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    let foreign = engine.restore(&bob, info.id).unwrap_err();
    assert_eq!(foreign.kind(), ErrorKind::Auth);

    engine
        .transaction([BACKUPS], |tx| {
            let row = tx.get(BACKUPS, info.id)?.unwrap();
            let mut ciphertext = row.bytes("ciphertext").unwrap().to_vec();
            ciphertext[20] ^= 0xFF;
            tx.update_record(BACKUPS, info.id, &Record::new().with("ciphertext", ciphertext))
        })
        .unwrap();
    let tampered = engine.restore(&ada, info.id).unwrap_err();
    assert_eq!(tampered.kind(), ErrorKind::Integrity);
}

#[test]
fn checksum_is_checked_before_decryption() {
    let engine = TestEngine::memory();
    let ada = engine.user("ada", "pw");
    let info = engine.backup(&ada, "mine").unwrap();
    engine
        .update(
            BACKUPS,
            &Record::new().with("checksum", "00"),
            &Predicate::id(info.id),
        )
        .unwrap();
    let err = engine.restore(&ada, info.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert!(err.to_string().contains("checksum"));
}

#[test]
fn newer_snapshot_is_refused() {
    let engine = TestEngine::memory();
    let ada = engine.user("ada", "pw");
    engine
        .migrate("MIGRATION: 1\nNAME: tags\nUP:\nTABLE: tags\nlabel: text\nDOWN:\nDROP TABLE: tags\n")
        .unwrap();
    let info = engine.backup(&ada, "v1").unwrap();
    engine.rollback().unwrap();

    let err = engine.restore(&ada, info.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn export_set_is_configurable() {
    let engine = TestEngine::with_config(fast_config().schema(NOTES_SCHEMA).export_tables(["notes"]));
    let ada = engine.user("ada", "pw");
    let info = engine.backup(&ada, "notes-only").unwrap();
    let snapshot = engine
        .read_backup_artifact(&info.artifact_path)
        .unwrap()
        .open(&ada)
        .unwrap();
    assert_eq!(snapshot.tables.len(), 1);

    let bad = TestEngine::with_config(fast_config().export_tables(["nowhere"]));
    let auth = bad.user("ada", "pw");
    assert_eq!(bad.backup(&auth, "x").unwrap_err().kind(), ErrorKind::Validation);
}

#[test]
fn rejected_backup_row_writes_no_artifact() {
    let engine = TestEngine::with_config(
        fast_config().schema("TABLE: backups\nname: text not_null\nuser_id: integer not_null\nlabel: text not_null\n"),
    );
    let ada = engine.user("ada", "pw");
    let err = engine.backup(&ada, "x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let artifact = engine.backup_dir().join(format!("x_{START_TIME}.glbk"));
    assert!(!engine.fs.exists(&artifact));
}
