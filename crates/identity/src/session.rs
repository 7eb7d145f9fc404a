//! Session issuance/verification with a rotatable HMAC secret.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Duration as ChronoDuration;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use shared::error::CommonError;
use shared::primitives::{WrappedChronoDateTime, WrappedUuidV4};

use crate::model::{SessionStatus, UserSession};

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_SECRET_FILE_NAME: &str = ".session-secret";
pub const SESSION_SECRET_MIN_LEN: usize = 32;
pub const COMMUNITY_TIER_TTL_SECS: i64 = 3_600;

/// Holds the live session-HMAC secret behind an `ArcSwap` so verification
/// (hot path) never blocks on rotation (rare, admin-triggered).
pub struct SessionSecret(ArcSwap<Vec<u8>>);

impl SessionSecret {
    pub fn new(secret: Vec<u8>) -> Self {
        Self(ArcSwap::from_pointee(secret))
    }

    pub fn current(&self) -> Arc<Vec<u8>> {
        self.0.load_full()
    }

    pub fn rotate(&self, new_secret: Vec<u8>) {
        self.0.store(Arc::new(new_secret));
    }

    pub fn session_secret_path(data_dir: &Path) -> PathBuf {
        data_dir.join(SESSION_SECRET_FILE_NAME)
    }

    /// Loads the secret from `ADMIN_SESSION_SECRET` if set,
    /// else from `<dataDir>/.session-secret`, generating and persisting a
    /// fresh one (mode 0600) on first run.
    pub fn load_or_init(data_dir: &Path) -> Result<Self, CommonError> {
        if let Ok(env_secret) = std::env::var("ADMIN_SESSION_SECRET") {
            if env_secret.len() < SESSION_SECRET_MIN_LEN {
                return Err(CommonError::InvalidFormat {
                    msg: format!(
                        "ADMIN_SESSION_SECRET must be at least {SESSION_SECRET_MIN_LEN} characters"
                    ),
                });
            }
            return Ok(Self::new(env_secret.into_bytes()));
        }

        let path = Self::session_secret_path(data_dir);
        if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(CommonError::from)?;
            return Ok(Self::new(contents.trim().as_bytes().to_vec()));
        }

        std::fs::create_dir_all(data_dir).map_err(CommonError::from)?;
        let mut bytes = [0u8; 48];
        rand::thread_rng().fill_bytes(&mut bytes);
        let secret = hex_encode(&bytes);
        vault_write_key_file(&path, &secret)?;
        Ok(Self::new(secret.into_bytes()))
    }

    /// Rotates the live secret and persists it to disk. Previously-issued sessions stop verifying
    /// immediately; callers should treat this as forcing re-login.
    pub fn rotate_and_persist(&self, data_dir: &Path) -> Result<(), CommonError> {
        let mut bytes = [0u8; 48];
        rand::thread_rng().fill_bytes(&mut bytes);
        let secret = hex_encode(&bytes);
        vault_write_key_file(&Self::session_secret_path(data_dir), &secret)?;
        self.rotate(secret.into_bytes());
        Ok(())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn vault_write_key_file(path: &Path, contents: &str) -> Result<(), CommonError> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(CommonError::from)?;
        file.write_all(contents.as_bytes()).map_err(CommonError::from)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, contents).map_err(CommonError::from)?;
    }
    Ok(())
}

fn signing_payload(session_id: &str, user_id: &str, issued_at: &str, expires_at: &str) -> String {
    format!("{session_id}|{user_id}|{issued_at}|{expires_at}")
}

fn sign(secret: &[u8], payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex_encode(&mac.finalize().into_bytes())
}

/// Issues a new session for `user_id`, optionally scoped to a `client_id`,
/// expiring `ttl_secs` from now.
pub fn issue_session(
    secret: &SessionSecret,
    user_id: WrappedUuidV4,
    client_id: Option<WrappedUuidV4>,
    ttl_secs: i64,
) -> UserSession {
    let issued_at = WrappedChronoDateTime::now();
    let expires_at =
        WrappedChronoDateTime::new(*issued_at.get_inner() + ChronoDuration::seconds(ttl_secs));
    let session_id = WrappedUuidV4::new();

    let payload = signing_payload(
        &session_id.to_string(),
        &user_id.to_string(),
        &issued_at.to_string(),
        &expires_at.to_string(),
    );
    let hmac_signature = sign(&secret.current(), &payload);

    UserSession {
        session_id,
        user_id,
        client_id,
        status: SessionStatus::Active,
        issued_at,
        expires_at,
        hmac_signature,
    }
}

/// Verifies `session`'s HMAC against the currently-live secret and checks
/// expiry. Constant-time comparison guards against signature-forgery
/// timing attacks.
pub fn verify_session(secret: &SessionSecret, session: &UserSession) -> bool {
    let payload = signing_payload(
        &session.session_id.to_string(),
        &session.user_id.to_string(),
        &session.issued_at.to_string(),
        &session.expires_at.to_string(),
    );
    let expected = sign(&secret.current(), &payload);
    if !constant_time_eq(expected.as_bytes(), session.hmac_signature.as_bytes()) {
        return false;
    }
    *session.expires_at.get_inner() > chrono::Utc::now()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Regenerates `session_id` (and the signature that binds to it) on
/// privilege elevation, guarding against session fixation.
pub fn rotate_session_id(secret: &SessionSecret, session: &UserSession) -> UserSession {
    let new_id = WrappedUuidV4::new();
    let payload = signing_payload(
        &new_id.to_string(),
        &session.user_id.to_string(),
        &session.issued_at.to_string(),
        &session.expires_at.to_string(),
    );
    UserSession {
        session_id: new_id,
        hmac_signature: sign(&secret.current(), &payload),
        ..session.clone()
    }
}

/// Refreshes `expires_at` (and the signature covering it) while keeping
/// `session_id` fixed, for the heartbeat endpoint. Unlike
/// [`rotate_session_id`] this never changes identity, so it carries none of
/// the session-fixation concerns that motivate rotation on login.
pub fn extend_session(secret: &SessionSecret, session: &UserSession, ttl_secs: i64) -> UserSession {
    let expires_at =
        WrappedChronoDateTime::new(chrono::Utc::now() + ChronoDuration::seconds(ttl_secs));
    let payload = signing_payload(
        &session.session_id.to_string(),
        &session.user_id.to_string(),
        &session.issued_at.to_string(),
        &expires_at.to_string(),
    );
    UserSession {
        expires_at,
        hmac_signature: sign(&secret.current(), &payload),
        ..session.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_session_verifies() {
        let secret = SessionSecret::new(b"test-secret-at-least-32-bytes-long".to_vec());
        let session = issue_session(&secret, WrappedUuidV4::new(), None, 3600);
        assert!(verify_session(&secret, &session));
    }

    #[test]
    fn rotated_secret_invalidates_old_sessions() {
        let secret = SessionSecret::new(b"test-secret-at-least-32-bytes-long".to_vec());
        let session = issue_session(&secret, WrappedUuidV4::new(), None, 3600);
        secret.rotate(b"a-completely-different-secret-value".to_vec());
        assert!(!verify_session(&secret, &session));
    }

    #[test]
    fn expired_session_fails_verification() {
        let secret = SessionSecret::new(b"test-secret-at-least-32-bytes-long".to_vec());
        let session = issue_session(&secret, WrappedUuidV4::new(), None, -10);
        assert!(!verify_session(&secret, &session));
    }

    #[test]
    fn session_id_rotation_changes_identity_but_keeps_user() {
        let secret = SessionSecret::new(b"test-secret-at-least-32-bytes-long".to_vec());
        let user_id = WrappedUuidV4::new();
        let session = issue_session(&secret, user_id.clone(), None, 3600);
        let rotated = rotate_session_id(&secret, &session);
        assert_ne!(session.session_id.to_string(), rotated.session_id.to_string());
        assert_eq!(rotated.user_id.to_string(), user_id.to_string());
        assert!(verify_session(&secret, &rotated));
    }
}
