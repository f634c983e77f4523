//! Vault secrecy, session lifetimes and serialized counters.

use glyphdb_core::schema::builtin::{API_KEYS, USAGE_STATS, USERS};
use glyphdb_core::vault::provider_glyph;
use glyphdb_core::{ErrorKind, Predicate, Record};
use glyphdb_testkit::prelude::*;
use std::thread;
use std::time::Duration;

#[test]
fn ciphertext_never_contains_the_secret() {
    let engine = TestEngine::memory();
    let auth = engine.user("ada", "pw");
    let secret = "sk-live-0123456789abcdef";
    let glyph = engine.store_credential(&auth, "OpenAI", secret).unwrap();
    assert_eq!(glyph, provider_glyph("openai"));

    let rows = engine.find(API_KEYS, &Predicate::new()).unwrap();
    assert_eq!(rows.len(), 1);
    let ciphertext = rows[0].bytes("ciphertext").unwrap();
    assert!(!ciphertext
        .windows(secret.len())
        .any(|w| w == secret.as_bytes()));
    assert!(!format!("{:?}", rows[0]).contains(secret));

    assert_eq!(engine.get_credential(&auth, &glyph).unwrap().as_str(), secret);
}

#[test]
fn storing_again_rotates_the_secret() {
    let engine = TestEngine::memory();
    let auth = engine.user("ada", "pw");
    let glyph = engine.store_credential(&auth, "mistral", "old").unwrap();
    engine.store_credential(&auth, "mistral", "new").unwrap();
    assert_eq!(engine.find(API_KEYS, &Predicate::new()).unwrap().len(), 1);
    assert_eq!(engine.get_credential(&auth, &glyph).unwrap().as_str(), "new");
}

#[test]
fn unauthenticated_access_is_refused() {
    let engine = TestEngine::memory();
    let ada = engine.user("ada", "pw");
    let bob = engine.user("bob", "pw");
    let glyph = engine.store_credential(&ada, "anthropic", "secret").unwrap();

    assert_eq!(engine.get_credential(&bob, &glyph).unwrap_err().kind(), ErrorKind::Auth);

    engine.clock.advance(Duration::from_secs(8 * 24 * 60 * 60));
    assert_eq!(engine.validate_session(ada.token()).unwrap_err().kind(), ErrorKind::Auth);
    assert_eq!(engine.get_credential(&ada, &glyph).unwrap_err().kind(), ErrorKind::Auth);
    assert_eq!(
        engine.store_credential(&ada, "anthropic", "x").unwrap_err().kind(),
        ErrorKind::Auth
    );

    let again = engine.login("ada", "pw", serde_json::Value::Null).unwrap();
    assert_eq!(engine.get_credential(&again, &glyph).unwrap().as_str(), "secret");
}

#[test]
fn sessions_survive_reopen_but_keys_do_not() {
    let engine = TestEngine::memory();
    let auth = engine.user("ada", "pw");
    let glyph = engine.store_credential(&auth, "gemma", "g").unwrap();

    let engine = engine.reopen();
    assert!(engine.validate_session(auth.token()).is_ok());
    let resumed = engine.resume_session(auth.token(), "pw").unwrap();
    assert_eq!(engine.get_credential(&resumed, &glyph).unwrap().as_str(), "g");
    assert_eq!(
        engine.resume_session(auth.token(), "wrong").unwrap_err().kind(),
        ErrorKind::Auth
    );
}

#[test]
fn unique_email_admits_one_writer() {
    let test = TestEngine::memory();
    let engine = &test.engine;
    let outcomes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = ["ada", "bob"]
            .into_iter()
            .map(|name| {
                s.spawn(move || {
                    engine.create(
                        USERS,
                        Record::new()
                            .with("glyph", format!("⟁{name}"))
                            .with("username", name)
                            .with("email", "same@example.com")
                            .with("password_hash", "x"),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let err = outcomes.into_iter().find_map(Result::err).unwrap();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(engine.find(USERS, &Predicate::new()).unwrap().len(), 1);
}

#[test]
fn concurrent_counters_lose_nothing() {
    const THREADS: usize = 8;
    const CALLS: usize = 10;

    let test = TestEngine::memory();
    let auth = test.user("ada", "pw");
    let engine = &test.engine;
    let glyph = engine.store_credential(&auth, "deepseek", "k").unwrap();

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..CALLS {
                    engine.get_credential(&auth, &glyph).unwrap();
                    engine.track_glyph_usage(&auth, "code").unwrap();
                }
            });
        }
    });

    let total = (THREADS * CALLS) as i64;
    let key = &engine.find(API_KEYS, &Predicate::new()).unwrap()[0];
    assert_eq!(key.integer("usage_count"), Some(total));
    assert!(key.integer("last_used").is_some());
    let stats = engine.find(USAGE_STATS, &Predicate::new()).unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].integer("count"), Some(total));
}

#[test]
fn logout_and_purge() {
    let engine = TestEngine::memory();
    let auth = engine.user("ada", "pw");
    engine.logout(auth.token()).unwrap();
    assert_eq!(engine.validate_session(auth.token()).unwrap_err().kind(), ErrorKind::Auth);
    assert!(engine.resume_session(auth.token(), "pw").is_err());
    assert_eq!(engine.purge_expired_sessions().unwrap(), 1);
    assert_eq!(engine.logout(auth.token()).unwrap_err().kind(), ErrorKind::Auth);
}
