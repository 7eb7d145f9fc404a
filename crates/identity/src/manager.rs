//! Admin-key lifecycle orchestration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use shared::error::CommonError;
use shared::primitives::{WrappedChronoDateTime, WrappedUuidV4};

use crate::api_key::{self, GeneratedKey};
use crate::model::AdminKey;
use crate::repository::AdminKeyRepositoryLike;

pub const RECOVERY_TOKEN_FILE_NAME: &str = ".recovery-token";

fn recovery_token_path(data_dir: &Path) -> PathBuf {
    data_dir.join(RECOVERY_TOKEN_FILE_NAME)
}

fn write_recovery_token_file(data_dir: &Path, plaintext: &str) -> Result<(), CommonError> {
    std::fs::create_dir_all(data_dir).map_err(CommonError::from)?;
    let path = recovery_token_path(data_dir);
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o400)
            .open(&path)
            .map_err(CommonError::from)?;
        file.write_all(plaintext.as_bytes()).map_err(CommonError::from)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(&path, plaintext).map_err(CommonError::from)?;
    }
    Ok(())
}

pub struct AdminKeyManager {
    repo: Arc<dyn AdminKeyRepositoryLike>,
    data_dir: PathBuf,
}

impl AdminKeyManager {
    pub fn new(repo: Arc<dyn AdminKeyRepositoryLike>, data_dir: PathBuf) -> Self {
        Self { repo, data_dir }
    }

    /// `generateAdminKey(dataDir)`. Refuses if an active admin key already
    /// exists — first-boot bootstrapping only, use `factory_reset` to
    /// forcibly replace one.
    pub async fn generate(&self) -> Result<GeneratedKey, CommonError> {
        if self.repo.get_active().await?.is_some() {
            return Err(CommonError::Conflict {
                msg: "an active admin key already exists".to_string(),
            });
        }

        let admin_key = api_key::generate_admin_key();
        let recovery_token = api_key::generate_recovery_token();
        write_recovery_token_file(&self.data_dir, &recovery_token.plaintext)?;

        let row = AdminKey {
            id: WrappedUuidV4::new(),
            key_hash: admin_key.hash.clone(),
            recovery_token_hash: recovery_token.hash.clone(),
            is_active: true,
            created_at: WrappedChronoDateTime::now(),
            rotated_at: None,
        };
        self.repo.insert(&row).await?;

        Ok(admin_key)
    }

    /// `recoverAdminKey(recovery_token, source_ip)`. Preserves the row's
    /// `id`; only `key_hash`/`rotated_at` change. `source_ip` is the
    /// caller's responsibility to pass into the audit event this produces,
    /// not persisted here.
    pub async fn recover(&self, recovery_token: &str) -> Result<GeneratedKey, CommonError> {
        let mut active = self.active_or_not_found().await?;

        if !api_key::verify_secret(recovery_token, &active.recovery_token_hash) {
            return Err(CommonError::InvalidCredentials {
                msg: "invalid recovery token".to_string(),
            });
        }

        let new_admin_key = api_key::generate_admin_key();
        active.key_hash = new_admin_key.hash.clone();
        active.rotated_at = Some(WrappedChronoDateTime::now());
        self.repo.update(&active).await?;

        Ok(new_admin_key)
    }

    /// `rotateAdminKey(admin_key, recovery_token)`. Requires both current
    /// secrets; replaces both, and rewrites the recovery-token file so the
    /// old token stops working.
    pub async fn rotate(
        &self,
        current_admin_key: &str,
        current_recovery_token: &str,
    ) -> Result<(GeneratedKey, GeneratedKey), CommonError> {
        let mut active = self.active_or_not_found().await?;

        if !api_key::verify_secret(current_admin_key, &active.key_hash)
            || !api_key::verify_secret(current_recovery_token, &active.recovery_token_hash)
        {
            return Err(CommonError::InvalidCredentials {
                msg: "invalid admin key or recovery token".to_string(),
            });
        }

        let new_admin_key = api_key::generate_admin_key();
        let new_recovery_token = api_key::generate_recovery_token();
        write_recovery_token_file(&self.data_dir, &new_recovery_token.plaintext)?;

        active.key_hash = new_admin_key.hash.clone();
        active.recovery_token_hash = new_recovery_token.hash.clone();
        active.rotated_at = Some(WrappedChronoDateTime::now());
        self.repo.update(&active).await?;

        Ok((new_admin_key, new_recovery_token))
    }

    /// `factoryResetAdminKey(dataDir)`. Deactivates every existing row
    /// (kept for audit) and inserts a fresh active one.
    pub async fn factory_reset(&self) -> Result<GeneratedKey, CommonError> {
        self.repo.deactivate_all().await?;

        let admin_key = api_key::generate_admin_key();
        let recovery_token = api_key::generate_recovery_token();
        write_recovery_token_file(&self.data_dir, &recovery_token.plaintext)?;

        let row = AdminKey {
            id: WrappedUuidV4::new(),
            key_hash: admin_key.hash.clone(),
            recovery_token_hash: recovery_token.hash.clone(),
            is_active: true,
            created_at: WrappedChronoDateTime::now(),
            rotated_at: None,
        };
        self.repo.insert(&row).await?;

        Ok(admin_key)
    }

    /// Verifies an `X-Admin-Key` header value against the active row.
    pub async fn verify(&self, candidate: &str) -> Result<AdminKey, CommonError> {
        if !api_key::is_well_formed_admin_key(candidate) {
            return Err(CommonError::InvalidFormat {
                msg: "malformed X-Admin-Key".to_string(),
            });
        }

        let active = match self.repo.get_active().await? {
            Some(active) => active,
            None => {
                api_key::verify_against_dummy();
                return Err(CommonError::InvalidCredentials {
                    msg: "invalid admin key".to_string(),
                });
            }
        };

        if !api_key::verify_secret(candidate, &active.key_hash) {
            return Err(CommonError::InvalidCredentials {
                msg: "invalid admin key".to_string(),
            });
        }

        Ok(active)
    }

    async fn active_or_not_found(&self) -> Result<AdminKey, CommonError> {
        self.repo.get_active().await?.ok_or_else(|| CommonError::NotFound {
            msg: "no active admin key".to_string(),
            lookup_id: "admin_key:active".to_string(),
            source: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct InMemoryAdminKeyRepo(Mutex<Vec<AdminKey>>);

    #[async_trait]
    impl AdminKeyRepositoryLike for InMemoryAdminKeyRepo {
        async fn get_active(&self) -> Result<Option<AdminKey>, CommonError> {
            Ok(self.0.lock().iter().find(|k| k.is_active).cloned())
        }

        async fn get_by_id(&self, id: &WrappedUuidV4) -> Result<AdminKey, CommonError> {
            self.0
                .lock()
                .iter()
                .find(|k| k.id == *id)
                .cloned()
                .ok_or_else(|| CommonError::NotFound {
                    msg: "not found".to_string(),
                    lookup_id: id.to_string(),
                    source: None,
                })
        }

        async fn insert(&self, key: &AdminKey) -> Result<(), CommonError> {
            self.0.lock().push(key.clone());
            Ok(())
        }

        async fn update(&self, key: &AdminKey) -> Result<(), CommonError> {
            let mut rows = self.0.lock();
            if let Some(existing) = rows.iter_mut().find(|k| k.id == key.id) {
                *existing = key.clone();
            }
            Ok(())
        }

        async fn deactivate_all(&self) -> Result<(), CommonError> {
            for key in self.0.lock().iter_mut() {
                key.is_active = false;
            }
            Ok(())
        }
    }

    fn manager() -> (AdminKeyManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(InMemoryAdminKeyRepo::default());
        (AdminKeyManager::new(repo, dir.path().to_path_buf()), dir)
    }

    #[tokio::test]
    async fn generate_then_verify_roundtrips() {
        let (manager, _dir) = manager();
        let key = manager.generate().await.unwrap();
        let verified = manager.verify(&key.plaintext).await.unwrap();
        assert!(verified.is_active);
    }

    #[tokio::test]
    async fn generate_twice_conflicts() {
        let (manager, _dir) = manager();
        manager.generate().await.unwrap();
        assert!(matches!(manager.generate().await, Err(CommonError::Conflict { .. })));
    }

    #[tokio::test]
    async fn recover_preserves_row_id_and_issues_new_key() {
        let (manager, _dir) = manager();
        let admin_key = manager.generate().await.unwrap();
        let recovery_path = recovery_token_path(&_dir.path().to_path_buf());
        let recovery_token = std::fs::read_to_string(recovery_path).unwrap();

        let recovered = manager.recover(&recovery_token).await.unwrap();
        assert_ne!(admin_key.plaintext, recovered.plaintext);
        assert!(manager.verify(&recovered.plaintext).await.is_ok());
        assert!(manager.verify(&admin_key.plaintext).await.is_err());
    }

    #[tokio::test]
    async fn factory_reset_deactivates_prior_keys() {
        let (manager, _dir) = manager();
        let first = manager.generate().await.unwrap();
        let second = manager.factory_reset().await.unwrap();

        assert!(manager.verify(&first.plaintext).await.is_err());
        assert!(manager.verify(&second.plaintext).await.is_ok());
    }
}
