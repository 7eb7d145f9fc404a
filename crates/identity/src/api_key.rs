//! Key generation, hashing and constant-time verification.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use once_cell::sync::Lazy;
use rand::RngCore;
use shared::error::CommonError;

pub const CLIENT_KEY_PREFIX: &str = "amb_sk";
pub const ADMIN_KEY_PREFIX: &str = "amb_ak";
pub const RECOVERY_TOKEN_PREFIX: &str = "amb_rt";

const RANDOM_BYTES_LEN: usize = 36;
const PREFIX_INDEX_LEN: usize = 8;

/// Argon2id tuned to `{memory=19,456 KiB, time=2, parallelism=1}`.
fn argon2() -> Argon2<'static> {
    let params = argon2::Params::new(19_456, 2, 1, None)
        .expect("argon2 params within documented bounds");
    Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
}

/// A generated secret plus everything needed to store and later verify it.
pub struct GeneratedKey {
    /// The full secret, returned to the caller exactly once.
    pub plaintext: String,
    /// First 8 characters of the random (base64url) suffix, used as a
    /// non-secret index so lookup doesn't require scanning every row.
    pub prefix_index: String,
    pub hash: String,
}

fn generate(label: &str) -> GeneratedKey {
    let mut bytes = [0u8; RANDOM_BYTES_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    let suffix = URL_SAFE_NO_PAD.encode(bytes);
    let plaintext = format!("{label}_{suffix}");
    let prefix_index = suffix.chars().take(PREFIX_INDEX_LEN).collect();
    let hash = hash_secret(&plaintext);
    GeneratedKey {
        plaintext,
        prefix_index,
        hash,
    }
}

pub fn generate_client_key() -> GeneratedKey {
    generate(CLIENT_KEY_PREFIX)
}

pub fn generate_admin_key() -> GeneratedKey {
    generate(ADMIN_KEY_PREFIX)
}

pub fn generate_recovery_token() -> GeneratedKey {
    generate(RECOVERY_TOKEN_PREFIX)
}

pub fn hash_secret(secret: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    argon2()
        .hash_password(secret.as_bytes(), &salt)
        .expect("argon2 hashing of a bounded secret never fails")
        .to_string()
}

pub fn verify_secret(secret: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    argon2().verify_password(secret.as_bytes(), &parsed).is_ok()
}

/// A pre-computed hash of a value nobody will ever present, verified
/// against on every authentication miss so that a nonexistent client and a
/// wrong-password client take the same Argon2id latency.
static DUMMY_HASH: Lazy<String> = Lazy::new(|| hash_secret("dummy-key-for-constant-time-padding"));

pub fn verify_against_dummy() {
    let _ = verify_secret("this-will-never-match", &DUMMY_HASH);
}

/// Validates the structural shape of an API key (`amb_sk_<43 base64url
/// chars>`) without touching the database.
pub fn is_well_formed_client_key(candidate: &str) -> bool {
    is_well_formed(candidate, CLIENT_KEY_PREFIX)
}

pub fn is_well_formed_admin_key(candidate: &str) -> bool {
    is_well_formed(candidate, ADMIN_KEY_PREFIX)
}

pub fn is_well_formed_recovery_token(candidate: &str) -> bool {
    is_well_formed(candidate, RECOVERY_TOKEN_PREFIX)
}

fn is_well_formed(candidate: &str, label: &str) -> bool {
    let Some(suffix) = candidate.strip_prefix(&format!("{label}_")) else {
        return false;
    };
    // 36 raw bytes, base64url-no-pad encoded, is always 48 characters.
    suffix.len() == 48 && suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let key = generate_client_key();
            assert!(seen.insert(key.plaintext));
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn prefix_index_matches_suffix_head() {
        let key = generate_client_key();
        let suffix = key.plaintext.strip_prefix("amb_sk_").unwrap();
        assert_eq!(key.prefix_index, suffix[..8]);
    }

    #[test]
    fn hash_roundtrips() {
        let key = generate_client_key();
        assert!(verify_secret(&key.plaintext, &key.hash));
        assert!(!verify_secret("wrong", &key.hash));
    }

    #[test]
    fn well_formed_check_rejects_garbage() {
        assert!(is_well_formed_client_key(&generate_client_key().plaintext));
        assert!(!is_well_formed_client_key("amb_sk_short"));
        assert!(!is_well_formed_client_key("amb_ak_wrongprefixbutcorrectlengthxxxxxxxxxxxxxxxxx"));
    }
}
