//! Password hashing and master key derivation with Argon2id.

use crate::config::KdfParams;
use crate::error::{CoreError, CoreResult};
use crate::vault::crypto::{EncryptionKey, KEY_SIZE};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

const MASTER_SALT_DOMAIN: &[u8] = b"glyphdb/master-key/v1";

fn argon2(params: KdfParams) -> CoreResult<Argon2<'static>> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CoreError::key_derivation_failed(format!("bad Argon2 parameters: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Derives the master key of a user.
///
/// The salt is a SHA-256 of the user glyph, so the key depends on both
/// the password and the identity and can be re-derived at every login
/// without storing anything.
///
/// # Errors
///
/// Returns a key derivation error for invalid parameters.
pub fn derive_key(password: &str, user_glyph: &str, params: KdfParams) -> CoreResult<EncryptionKey> {
    let salt = Sha256::new()
        .chain_update(MASTER_SALT_DOMAIN)
        .chain_update(user_glyph.as_bytes())
        .finalize();

    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    argon2(params)?
        .hash_password_into(password.as_bytes(), &salt, &mut *out)
        .map_err(|e| CoreError::key_derivation_failed(e.to_string()))?;
    EncryptionKey::from_bytes(&*out)
}

/// Hashes a password into a PHC string with a fresh random salt.
///
/// # Errors
///
/// Returns a key derivation error for invalid parameters.
pub fn hash_password(password: &str, params: KdfParams) -> CoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    argon2(params)?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CoreError::key_derivation_failed(e.to_string()))
}

/// Checks a password against a PHC string. Parameters come from the
/// string itself. An unparseable hash never verifies.
#[must_use]
pub fn verify_password(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc)
        .is_ok_and(|hash| Argon2::default().verify_password(password.as_bytes(), &hash).is_ok())
}
