//! User accounts and login sessions.
//!
//! A session is a `sessions` row keyed by a random UUID token. It is valid
//! while `now < expires`; logout moves `expires` to now and keeps the row.
//! Expired rows are only removed by [`purge_expired_sessions`].
//!
//! Logging in yields an [`AuthSession`], the only place the user's master
//! key exists. It is never written anywhere.

use crate::clock::{duration_millis, Clock};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::indexer::glyph_for;
use crate::query::{Predicate, Query};
use crate::schema::builtin::{SESSIONS, USERS};
use crate::store::Catalog;
use crate::transaction::{Scope, TransactionManager};
use crate::types::{RecordId, Timestamp};
use crate::value::{Record, Value};
use crate::vault::{derive_key, hash_password, verify_password, EncryptionKey};
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

/// An authenticated session holding the user's master key.
#[derive(Clone)]
pub struct AuthSession {
    token: String,
    user_id: RecordId,
    username: String,
    user_glyph: String,
    expires: Timestamp,
    key: EncryptionKey,
}

impl AuthSession {
    /// Returns the session token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the user id.
    #[must_use]
    pub fn user_id(&self) -> RecordId {
        self.user_id
    }

    /// Returns the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the user glyph.
    #[must_use]
    pub fn user_glyph(&self) -> &str {
        &self.user_glyph
    }

    /// Returns the expiry timestamp recorded at login.
    #[must_use]
    pub fn expires(&self) -> Timestamp {
        self.expires
    }

    /// Returns the master key.
    #[must_use]
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("expires", &self.expires)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

fn bad_login() -> CoreError {
    CoreError::auth("invalid username or password")
}

fn user_by_name(catalog: &Catalog, username: &str) -> CoreResult<Option<Record>> {
    Ok(Query::new()
        .from(USERS)
        .filter(Predicate::new().eq("username", username))
        .execute(catalog)?
        .into_iter()
        .next())
}

/// Returns the session row for `token` if it is still valid at `now`.
///
/// # Errors
///
/// Returns an auth error if the token is unknown or expired.
pub fn live_session(catalog: &Catalog, token: &str, now: Timestamp) -> CoreResult<Record> {
    let session = Query::new()
        .from(SESSIONS)
        .filter(Predicate::new().eq("token", token))
        .execute(catalog)?
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::auth("unknown session"))?;
    if session.integer("expires").unwrap_or(Timestamp::MIN) <= now {
        return Err(CoreError::auth("session expired"));
    }
    Ok(session)
}

/// Checks that `auth` still refers to a live session.
///
/// # Errors
///
/// Returns an auth error if the session was logged out, expired or
/// belongs to another user.
pub fn ensure_live(catalog: &Catalog, auth: &AuthSession, now: Timestamp) -> CoreResult<()> {
    let session = live_session(catalog, &auth.token, now)?;
    if session.integer("user_id") != Some(auth.user_id.as_i64()) {
        return Err(CoreError::auth("session belongs to another user"));
    }
    Ok(())
}

/// Creates a user account and returns its row without the password hash.
///
/// # Errors
///
/// Returns a validation error for an empty username or password and a
/// conflict error if the username is taken.
pub fn register_user(
    tm: &TransactionManager,
    config: &Config,
    username: &str,
    password: &str,
) -> CoreResult<Record> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(CoreError::validation("username and password must not be empty"));
    }
    let hash = hash_password(password, config.kdf)?;
    let glyph = glyph_for(username);

    let mut user = tm.run(Scope::tables([USERS]), |tx| {
        tx.create(
            USERS,
            Record::new()
                .with("username", username)
                .with("glyph", glyph.as_str())
                .with("password_hash", hash),
        )
    })?;
    user.remove("password_hash");
    info!(user = %username, "user registered");
    Ok(user)
}

/// Verifies credentials, persists a new session and derives the master key.
///
/// # Errors
///
/// Returns an auth error for an unknown user, a wrong password or an
/// inactive account, and a validation error for metadata holding floats.
pub fn login(
    tm: &TransactionManager,
    config: &Config,
    username: &str,
    password: &str,
    metadata: serde_json::Value,
) -> CoreResult<AuthSession> {
    let user = user_by_name(&tm.snapshot(), username.trim())?.ok_or_else(bad_login)?;
    if user.get("active") == Some(&Value::Bool(false)) {
        return Err(CoreError::auth("account is disabled"));
    }
    let hash = user.text("password_hash").unwrap_or_default();
    if !verify_password(password, hash) {
        return Err(bad_login());
    }
    let user_id = user.id().ok_or_else(bad_login)?;
    let user_glyph = user.text("glyph").unwrap_or_default().to_string();
    let key = derive_key(password, &user_glyph, config.kdf)?;

    let metadata = Value::try_from(metadata)?;
    let token = Uuid::new_v4().to_string();
    let ttl = duration_millis(config.session_ttl);
    let session = tm.run(Scope::tables([SESSIONS]), |tx| {
        let now = tx.now();
        tx.create(
            SESSIONS,
            Record::new()
                .with("token", token.as_str())
                .with("user_id", user_id)
                .with("created", now)
                .with("expires", now.saturating_add(ttl))
                .with("metadata", metadata),
        )
    })?;

    info!(user = %username, "login");
    Ok(AuthSession {
        token,
        user_id,
        username: user.text("username").unwrap_or_default().to_string(),
        user_glyph,
        expires: session.integer("expires").unwrap_or_default(),
        key,
    })
}

/// Re-derives the master key for a still-valid session.
///
/// # Errors
///
/// Returns an auth error if the session is not live or the password does
/// not match its user.
pub fn resume_session(
    tm: &TransactionManager,
    config: &Config,
    token: &str,
    password: &str,
) -> CoreResult<AuthSession> {
    let catalog = tm.snapshot();
    let session = live_session(&catalog, token, tm.clock().now())?;
    let user_id = session
        .integer("user_id")
        .and_then(|id| u64::try_from(id).ok())
        .map(RecordId::new)
        .ok_or_else(|| CoreError::auth("session has no user"))?;
    let user = catalog
        .table(USERS)?
        .get(user_id)
        .cloned()
        .ok_or_else(|| CoreError::auth("session user no longer exists"))?;
    if !verify_password(password, user.text("password_hash").unwrap_or_default()) {
        return Err(bad_login());
    }

    let user_glyph = user.text("glyph").unwrap_or_default().to_string();
    let key = derive_key(password, &user_glyph, config.kdf)?;
    debug!(user_id = %user_id, "session resumed");
    Ok(AuthSession {
        token: token.to_string(),
        user_id,
        username: user.text("username").unwrap_or_default().to_string(),
        user_glyph,
        expires: session.integer("expires").unwrap_or_default(),
        key,
    })
}

/// Ends a session by moving its expiry to now. The row is kept.
///
/// # Errors
///
/// Returns an auth error if the token is unknown.
pub fn logout(tm: &TransactionManager, token: &str) -> CoreResult<()> {
    tm.run(Scope::tables([SESSIONS]), |tx| {
        let now = tx.now();
        let changed = tx.update(
            SESSIONS,
            &Record::new().with("expires", now),
            &Predicate::new().eq("token", token),
        )?;
        if changed == 0 {
            return Err(CoreError::auth("unknown session"));
        }
        Ok(())
    })?;
    debug!("session closed");
    Ok(())
}

/// Deletes every session whose expiry has passed. Returns how many.
///
/// # Errors
///
/// Returns a storage error if the commit fails.
pub fn purge_expired_sessions(tm: &TransactionManager) -> CoreResult<usize> {
    let purged = tm.run(Scope::tables([SESSIONS]), |tx| {
        // expires <= now
        let cutoff = tx.now().saturating_add(1);
        tx.delete(SESSIONS, &Predicate::new().lt("expires", cutoff))
    })?;
    if purged > 0 {
        info!(purged, "expired sessions purged");
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::KdfParams;
    use crate::schema::base_schema;
    use crate::store::Journal;
    use crate::ErrorKind;
    use glyphdb_storage::InMemoryBackend;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (TransactionManager, Config, Arc<ManualClock>) {
        let (database, tables) = base_schema(None).unwrap();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let tm = TransactionManager::new(
            Catalog::new(database, tables),
            Journal::new(Box::new(InMemoryBackend::new()), false),
            dyn_clock,
        );
        let config = Config::new()
            .kdf(KdfParams::new(8, 1, 1))
            .session_ttl(Duration::from_secs(60));
        (tm, config, clock)
    }

    #[test]
    fn register_and_login() {
        let (tm, config, _) = setup();
        let user = register_user(&tm, &config, "ada", "pw").unwrap();
        assert!(user.get("password_hash").is_none());
        assert_eq!(user.text("glyph"), Some(glyph_for("ada").as_str()));

        let auth = login(&tm, &config, "ada", "pw", serde_json::json!({"client": "cli"})).unwrap();
        assert_eq!(auth.user_id(), user.id().unwrap());
        assert_eq!(auth.expires(), 1_000_000 + 60_000);
        assert!(format!("{auth:?}").contains("REDACTED"));
        assert!(live_session(&tm.snapshot(), auth.token(), 1_000_000).is_ok());
    }

    #[test]
    fn duplicate_username_conflicts() {
        let (tm, config, _) = setup();
        register_user(&tm, &config, "ada", "pw").unwrap();
        let err = register_user(&tm, &config, "ada", "other").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn bad_credentials_are_auth_errors() {
        let (tm, config, _) = setup();
        register_user(&tm, &config, "ada", "pw").unwrap();
        for (user, pw) in [("ada", "nope"), ("bob", "pw")] {
            let err = login(&tm, &config, user, pw, serde_json::Value::Null).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Auth);
        }
    }

    #[test]
    fn expiry_logout_and_purge() {
        let (tm, config, clock) = setup();
        register_user(&tm, &config, "ada", "pw").unwrap();
        let first = login(&tm, &config, "ada", "pw", serde_json::Value::Null).unwrap();
        let second = login(&tm, &config, "ada", "pw", serde_json::Value::Null).unwrap();

        logout(&tm, first.token()).unwrap();
        let err = live_session(&tm.snapshot(), first.token(), clock.now()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(resume_session(&tm, &config, second.token(), "pw").is_ok());
        assert_eq!(
            resume_session(&tm, &config, second.token(), "bad").unwrap_err().kind(),
            ErrorKind::Auth
        );

        clock.advance(Duration::from_secs(61));
        assert!(live_session(&tm.snapshot(), second.token(), clock.now()).is_err());
        assert_eq!(tm.snapshot().table(SESSIONS).unwrap().len(), 2);

        assert_eq!(purge_expired_sessions(&tm).unwrap(), 2);
        assert!(tm.snapshot().table(SESSIONS).unwrap().is_empty());
    }

    #[test]
    fn resumed_key_matches_login_key() {
        let (tm, config, _) = setup();
        register_user(&tm, &config, "ada", "pw").unwrap();
        let auth = login(&tm, &config, "ada", "pw", serde_json::Value::Null).unwrap();
        let resumed = resume_session(&tm, &config, auth.token(), "pw").unwrap();
        assert_eq!(auth.key().as_bytes(), resumed.key().as_bytes());
    }
}
