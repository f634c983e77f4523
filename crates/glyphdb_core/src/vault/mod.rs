//! Secret vault: password hashing, master keys and encrypted credentials.
//!
//! ## Security model
//!
//! - passwords are stored as Argon2id PHC strings with a random salt
//! - the master key is Argon2id(password, SHA-256(user glyph)) and lives
//!   only inside an [`AuthSession`](crate::AuthSession)
//! - credentials and backups use independent HKDF subkeys of the master key
//! - every ciphertext is AES-256-GCM with a random nonce; credentials are
//!   bound to their owner and provider glyph as associated data
//! - plaintext secrets are returned in [`Zeroizing`](zeroize::Zeroizing)
//!   buffers and never logged

mod credentials;
mod crypto;
mod kdf;

pub use credentials::{
    get_credential, provider_glyph, store_credential, track_glyph_usage, CUSTOM_PROVIDER_GLYPH,
    PROVIDERS,
};
pub use crypto::{CryptoManager, EncryptionKey, KeyPurpose, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use kdf::{derive_key, hash_password, verify_password};
