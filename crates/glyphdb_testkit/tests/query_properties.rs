//! Query evaluator properties checked against direct evaluation.

use glyphdb_core::{Direction, Predicate, Query, Record, RecordId, Value};
use glyphdb_testkit::prelude::*;
use proptest::prelude::*;

fn seeded(notes: &[Record]) -> (TestEngine, Vec<Record>) {
    let engine = TestEngine::memory();
    let stored = engine
        .transaction(["notes"], |tx| {
            notes
                .iter()
                .map(|note| tx.create("notes", note.clone()))
                .collect::<Result<Vec<_>, _>>()
        })
        .unwrap();
    (engine, stored)
}

fn ids(rows: &[Record]) -> Vec<RecordId> {
    rows.iter().filter_map(Record::id).collect()
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn created_rows_are_found_by_id(notes in notes_strategy(12)) {
        let (engine, stored) = seeded(&notes);
        for row in &stored {
            let id = row.id().unwrap();
            let found = engine.find("notes", &Predicate::id(id)).unwrap();
            prop_assert_eq!(found, vec![row.clone()]);
        }
    }

    #[test]
    fn predicates_are_conjunctions(
        notes in notes_strategy(16),
        clauses in prop::collection::vec(naive_clause_strategy(), 0..3),
    ) {
        let (engine, stored) = seeded(&notes);
        let predicate = clauses.iter().fold(Predicate::new(), |p, c| c.apply(p));

        let expected: Vec<RecordId> = stored
            .iter()
            .filter(|row| clauses.iter().all(|c| c.holds(row)))
            .filter_map(Record::id)
            .collect();
        let actual = engine.find("notes", &predicate).unwrap();
        prop_assert_eq!(ids(&actual), expected);

        // One where clause per call gives the same answer.
        let split = clauses
            .iter()
            .fold(Query::new().from("notes"), |q, c| q.filter(c.apply(Predicate::new())));
        prop_assert_eq!(ids(&engine.query(&split).unwrap()), ids(&actual));
    }

    #[test]
    fn ordering_is_stable_both_ways(notes in notes_strategy(16), desc in any::<bool>()) {
        let (engine, stored) = seeded(&notes);
        let direction = if desc { Direction::Desc } else { Direction::Asc };
        let rows = engine
            .query(&Query::new().from("notes").order_by("rank", direction))
            .unwrap();

        let mut expected = stored.clone();
        expected.sort_by(|a, b| {
            let (x, y) = (a.get_or_null("rank"), b.get_or_null("rank"));
            if desc { y.cmp(x) } else { x.cmp(y) }
        });
        prop_assert_eq!(ids(&rows), ids(&expected));
    }

    #[test]
    fn offset_then_limit_is_a_window(notes in notes_strategy(16), offset in 0usize..20, limit in 0usize..20) {
        let (engine, _) = seeded(&notes);
        let base = Query::new().from("notes").order_by("title", Direction::Asc);
        let all = engine.query(&base).unwrap();
        let window = engine.query(&base.offset(offset).limit(limit)).unwrap();

        let expected: Vec<Record> = all.into_iter().skip(offset).take(limit).collect();
        prop_assert_eq!(window, expected);
    }
}

#[test]
fn builders_never_mutate_the_receiver() {
    let base = Query::new().from("notes");
    let narrowed = base.filter(Predicate::new().eq("tag", "red")).limit(1);
    assert_ne!(base, narrowed);
    assert_eq!(base, Query::new().from("notes"));
}

#[test]
fn json_predicates_match_builder_predicates() {
    let engine = TestEngine::memory();
    for (title, rank) in [("a", 1), ("b", 2), ("c", 3)] {
        engine
            .create("notes", Record::new().with("title", title).with("rank", rank))
            .unwrap();
    }
    let json = serde_json::json!({"rank": {"$gt": 1, "$lt": 3}});
    let parsed = Predicate::from_json(&json).unwrap();
    let built = Predicate::new().gt("rank", 1).lt("rank", 3);
    assert_eq!(engine.find("notes", &parsed).unwrap(), engine.find("notes", &built).unwrap());

    let like = Predicate::from_json(&serde_json::json!({"title": {"$like": "%b%"}})).unwrap();
    assert_eq!(engine.find("notes", &like).unwrap().len(), 1);

    let err = Predicate::from_json(&serde_json::json!({"rank": {"$near": 1}})).unwrap_err();
    assert_eq!(err.kind(), glyphdb_core::ErrorKind::Validation);
}

#[test]
fn join_merges_first_match() {
    let engine = TestEngine::memory();
    let ada = engine.user("ada", "pw");
    engine
        .create("notes", Record::new().with("title", "mine").with("owner_id", ada.user_id()))
        .unwrap();
    engine.create("notes", Record::new().with("title", "orphan")).unwrap();

    let rows = engine
        .query(
            &Query::new()
                .from("notes")
                .order_by("title", Direction::Asc)
                .join("users", "owner_id", "id"),
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].text("username"), Some("ada"));
    assert_eq!(rows[1].get("username"), None);
    assert_eq!(rows[1].get_or_null("owner_id"), &Value::Null);
}
