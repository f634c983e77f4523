//! Encrypted provider credentials and usage counters.

use crate::clock::day_of;
use crate::error::{CoreError, CoreResult};
use crate::query::Predicate;
use crate::schema::builtin::{API_KEYS, USAGE_STATS};
use crate::session::{ensure_live, AuthSession};
use crate::transaction::{Scope, Transaction, TransactionManager};
use crate::types::RecordId;
use crate::value::Record;
use crate::vault::crypto::{CryptoManager, KeyPurpose};
use tracing::debug;
use zeroize::Zeroizing;

/// Glyph used for providers missing from [`PROVIDERS`].
pub const CUSTOM_PROVIDER_GLYPH: &str = "⚡⚙️";

/// Known providers and their glyphs.
pub const PROVIDERS: &[(&str, &str)] = &[
    ("openai", "⚡▣"),
    ("anthropic", "⚡◈"),
    ("deepseek", "⚡⟁"),
    ("mistral", "⚡🌀"),
    ("gemma", "⚡💎"),
];

/// Returns the glyph of a provider name (case-insensitive).
#[must_use]
pub fn provider_glyph(provider: &str) -> &'static str {
    let name = provider.trim().to_ascii_lowercase();
    PROVIDERS
        .iter()
        .find(|(known, _)| *known == name)
        .map_or(CUSTOM_PROVIDER_GLYPH, |&(_, glyph)| glyph)
}

fn aad(user_id: RecordId, glyph: &str) -> Vec<u8> {
    format!("api_keys:{user_id}:{glyph}").into_bytes()
}

fn key_row(tx: &Transaction, user_id: RecordId, glyph: &str) -> CoreResult<Option<Record>> {
    Ok(tx
        .find(
            API_KEYS,
            &Predicate::new()
                .eq("user_id", user_id)
                .eq("provider_glyph", glyph),
        )?
        .into_iter()
        .next())
}

/// Encrypts and stores `secret` for `provider`, replacing any previous
/// secret of the same provider glyph. Returns the provider glyph.
///
/// # Errors
///
/// Returns an auth error if the session is no longer live.
pub fn store_credential(
    tm: &TransactionManager,
    auth: &AuthSession,
    provider: &str,
    secret: &str,
) -> CoreResult<String> {
    let glyph = provider_glyph(provider);
    let crypto = CryptoManager::new(&auth.key().subkey(KeyPurpose::Credentials)?);
    let ciphertext = crypto.encrypt_data(secret.as_bytes(), &aad(auth.user_id(), glyph))?;

    tm.run(Scope::tables([API_KEYS]), |tx| {
        ensure_live(tx.catalog(), auth, tx.now())?;
        let fields = Record::new()
            .with("provider", provider.trim())
            .with("ciphertext", ciphertext);
        match key_row(tx, auth.user_id(), glyph)?.and_then(|r| r.id()) {
            Some(id) => {
                tx.update_record(API_KEYS, id, &fields)?;
            }
            None => {
                let mut row = fields;
                row.insert("user_id", auth.user_id());
                row.insert("provider_glyph", glyph);
                tx.create(API_KEYS, row)?;
            }
        }
        Ok(())
    })?;

    debug!(user_id = %auth.user_id(), provider = glyph, "credential stored");
    Ok(glyph.to_string())
}

/// Decrypts the secret stored under `glyph`, counting the use.
///
/// The counter increment and `last_used` update happen in the same write
/// scope as the read, so concurrent calls never lose an increment.
///
/// # Errors
///
/// - auth error: session not live, or nothing stored under `glyph`
/// - integrity error: the ciphertext does not open under this user's key
pub fn get_credential(
    tm: &TransactionManager,
    auth: &AuthSession,
    glyph: &str,
) -> CoreResult<Zeroizing<String>> {
    let crypto = CryptoManager::new(&auth.key().subkey(KeyPurpose::Credentials)?);

    tm.run(Scope::tables([API_KEYS]), |tx| {
        ensure_live(tx.catalog(), auth, tx.now())?;
        let row = key_row(tx, auth.user_id(), glyph)?
            .ok_or_else(|| CoreError::auth(format!("no credential stored for {glyph}")))?;
        let id = row
            .id()
            .ok_or_else(|| CoreError::integrity("credential row has no id"))?;
        let ciphertext = row
            .bytes("ciphertext")
            .ok_or_else(|| CoreError::integrity("credential row has no ciphertext"))?;

        let plaintext = Zeroizing::new(crypto.decrypt_data(ciphertext, &aad(auth.user_id(), glyph))?);
        let secret = std::str::from_utf8(&plaintext)
            .map_err(|_| CoreError::integrity("credential is not valid UTF-8"))?;
        let secret = Zeroizing::new(secret.to_string());

        let now = tx.now();
        let uses = row.integer("usage_count").unwrap_or(0);
        tx.update_record(
            API_KEYS,
            id,
            &Record::new()
                .with("usage_count", uses.saturating_add(1))
                .with("last_used", now),
        )?;
        Ok(secret)
    })
}

/// Increments today's usage counter of `glyph_type` for the session user
/// and returns the new count.
///
/// # Errors
///
/// Returns an auth error if the session is no longer live.
pub fn track_glyph_usage(
    tm: &TransactionManager,
    auth: &AuthSession,
    glyph_type: &str,
) -> CoreResult<i64> {
    tm.run(Scope::tables([USAGE_STATS]), |tx| {
        let now = tx.now();
        ensure_live(tx.catalog(), auth, now)?;
        let day = day_of(now)?;
        let existing = tx
            .find(
                USAGE_STATS,
                &Predicate::new()
                    .eq("user_id", auth.user_id())
                    .eq("day", day.as_str())
                    .eq("glyph_type", glyph_type),
            )?
            .into_iter()
            .next();

        match existing.as_ref().and_then(|row| row.id().map(|id| (id, row))) {
            Some((id, row)) => {
                let count = row.integer("count").unwrap_or(0).saturating_add(1);
                tx.update_record(USAGE_STATS, id, &Record::new().with("count", count))?;
                Ok(count)
            }
            None => {
                tx.create(
                    USAGE_STATS,
                    Record::new()
                        .with("user_id", auth.user_id())
                        .with("day", day)
                        .with("glyph_type", glyph_type)
                        .with("count", 1),
                )?;
                Ok(1)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_table() {
        assert_eq!(provider_glyph("OpenAI"), "⚡▣");
        assert_eq!(provider_glyph("anthropic"), "⚡◈");
        assert_eq!(provider_glyph("deepseek"), "⚡⟁");
        assert_eq!(provider_glyph("mistral"), "⚡🌀");
        assert_eq!(provider_glyph("gemma"), "⚡💎");
        assert_eq!(provider_glyph("my-llm"), CUSTOM_PROVIDER_GLYPH);
    }

    #[test]
    fn aad_binds_user_and_glyph() {
        assert_ne!(aad(RecordId::new(1), "⚡▣"), aad(RecordId::new(2), "⚡▣"));
        assert_ne!(aad(RecordId::new(1), "⚡▣"), aad(RecordId::new(1), "⚡◈"));
    }
}
