//! The credential vault service itself: per-user encrypt/decrypt and the
//! five-step master key rotation protocol (spec 4.2).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use shared::error::CommonError;
use tokio::sync::RwLock;

use crate::cipher;
use crate::master_key::{MasterKey, master_key_path, write_key_file};
use crate::subkey::derive_subkey;

/// Implemented by whatever crate owns the `user_mcp_credentials` table, so
/// the vault can drive a rotation without depending on the gateway crate's
/// schema or database handle. The repository is responsible for the
/// transaction boundary; the vault only supplies the re-encryption closure.
#[async_trait::async_trait]
pub trait CredentialRowRepositoryLike: Send + Sync {
    /// Runs `reencrypt_row` over every stored credential row inside a
    /// single transaction. `reencrypt_row` is given `(user_salt,
    /// old_ciphertext)` and must return the new ciphertext; any row
    /// failing to re-encrypt aborts and rolls back the whole transaction,
    /// leaving every row's old ciphertext untouched.
    async fn reencrypt_all_rows(
        &self,
        reencrypt_row: &(dyn Fn(&[u8], &[u8]) -> Result<Vec<u8>, CommonError> + Sync),
    ) -> Result<(), CommonError>;
}

pub struct CredentialVault {
    data_dir: PathBuf,
    master_key: Arc<RwLock<MasterKey>>,
}

impl CredentialVault {
    pub fn new(data_dir: impl Into<PathBuf>, master_key: MasterKey) -> Self {
        Self {
            data_dir: data_dir.into(),
            master_key: Arc::new(RwLock::new(master_key)),
        }
    }

    pub fn load_or_init(data_dir: impl AsRef<Path>) -> Result<Self, CommonError> {
        let data_dir = data_dir.as_ref();
        let master_key = crate::master_key::load_or_init(data_dir)?;
        Ok(Self::new(data_dir, master_key))
    }

    /// Encrypts `plaintext` under the subkey derived for `user_salt` from
    /// the currently live master key.
    pub async fn encrypt(&self, user_salt: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CommonError> {
        let master = self.master_key.read().await;
        let subkey = derive_subkey(master.as_bytes(), user_salt);
        cipher::encrypt(&subkey, plaintext)
    }

    pub async fn decrypt(&self, user_salt: &[u8], blob: &[u8]) -> Result<Vec<u8>, CommonError> {
        let master = self.master_key.read().await;
        let subkey = derive_subkey(master.as_bytes(), user_salt);
        cipher::decrypt(&subkey, blob)
    }

    /// Re-encrypts `blob` (currently under the live master key) so that it
    /// would decrypt under `new_master_key` instead. Used internally by
    /// [`Self::rotate_master_key`]; exposed for tests.
    fn reencrypt_with(
        old_master: &MasterKey,
        new_master: &MasterKey,
        user_salt: &[u8],
        blob: &[u8],
    ) -> Result<Vec<u8>, CommonError> {
        let old_subkey = derive_subkey(old_master.as_bytes(), user_salt);
        let plaintext = cipher::decrypt(&old_subkey, blob)?;
        let new_subkey = derive_subkey(new_master.as_bytes(), user_salt);
        cipher::encrypt(&new_subkey, &plaintext)
    }

    /// Runs the full master-key rotation protocol:
    ///
    /// 1. write the new key to `credential_master_key.tmp` (mode 0600)
    /// 2. re-encrypt every credential row inside one DB transaction
    /// 3. on commit, atomically rename the tmp file onto the live path
    /// 4. swap the in-memory live key, dropping (and zeroizing) the old one
    ///
    /// Any failure before step 3 deletes the tmp file; the caller's
    /// transaction rollback (inside `repo.reencrypt_all_rows`) leaves every
    /// row's ciphertext exactly as it was.
    pub async fn rotate_master_key(
        &self,
        new_master_key: MasterKey,
        repo: &dyn CredentialRowRepositoryLike,
    ) -> Result<(), CommonError> {
        let tmp_path = master_key_path(&self.data_dir).with_extension("tmp");
        write_key_file(&tmp_path, &new_master_key.to_hex())?;

        let old_master = self.master_key.read().await.clone();
        let reencrypt_row = |user_salt: &[u8], old_ciphertext: &[u8]| {
            Self::reencrypt_with(&old_master, &new_master_key, user_salt, old_ciphertext)
        };

        if let Err(e) = repo.reencrypt_all_rows(&reencrypt_row).await {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        let live_path = master_key_path(&self.data_dir);
        std::fs::rename(&tmp_path, &live_path).map_err(CommonError::from)?;

        let mut live = self.master_key.write().await;
        *live = new_master_key;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeRow {
        user_salt: Vec<u8>,
        ciphertext: Vec<u8>,
    }

    struct FakeRepo {
        rows: Mutex<Vec<FakeRow>>,
    }

    #[async_trait::async_trait]
    impl CredentialRowRepositoryLike for FakeRepo {
        async fn reencrypt_all_rows(
            &self,
            reencrypt_row: &(dyn Fn(&[u8], &[u8]) -> Result<Vec<u8>, CommonError> + Sync),
        ) -> Result<(), CommonError> {
            let mut rows = self.rows.lock().unwrap();
            for row in rows.iter_mut() {
                row.ciphertext = reencrypt_row(&row.user_salt, &row.ciphertext)?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn encrypt_decrypt_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::load_or_init(dir.path()).unwrap();
        let blob = vault.encrypt(b"user-salt", b"api-token-123").await.unwrap();
        let plaintext = vault.decrypt(b"user-salt", &blob).await.unwrap();
        assert_eq!(plaintext, b"api-token-123");
    }

    #[tokio::test]
    async fn rotation_preserves_decryptability_under_new_key() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::load_or_init(dir.path()).unwrap();
        let salt = b"user-salt".to_vec();
        let ciphertext = vault.encrypt(&salt, b"secret").await.unwrap();

        let repo = FakeRepo {
            rows: Mutex::new(vec![FakeRow {
                user_salt: salt.clone(),
                ciphertext: ciphertext.clone(),
            }]),
        };

        let new_key = MasterKey::generate();
        vault.rotate_master_key(new_key, &repo).await.unwrap();

        let rotated_ciphertext = repo.rows.lock().unwrap()[0].ciphertext.clone();
        let plaintext = vault.decrypt(&salt, &rotated_ciphertext).await.unwrap();
        assert_eq!(plaintext, b"secret");

        assert!(vault.decrypt(&salt, &ciphertext).await.is_err());
    }

    #[tokio::test]
    async fn rotation_failure_leaves_master_key_unchanged() {
        struct FailingRepo;
        #[async_trait::async_trait]
        impl CredentialRowRepositoryLike for FailingRepo {
            async fn reencrypt_all_rows(
                &self,
                _reencrypt_row: &(dyn Fn(&[u8], &[u8]) -> Result<Vec<u8>, CommonError> + Sync),
            ) -> Result<(), CommonError> {
                Err(CommonError::Internal {
                    source: anyhow::anyhow!("simulated failure mid-rotation"),
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::load_or_init(dir.path()).unwrap();
        let salt = b"user-salt".to_vec();
        let ciphertext = vault.encrypt(&salt, b"secret").await.unwrap();

        let result = vault.rotate_master_key(MasterKey::generate(), &FailingRepo).await;
        assert!(result.is_err());
        assert!(!master_key_path(dir.path()).with_extension("tmp").exists());

        let plaintext = vault.decrypt(&salt, &ciphertext).await.unwrap();
        assert_eq!(plaintext, b"secret");
    }
}
