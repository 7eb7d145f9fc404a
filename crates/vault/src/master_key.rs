//! Master key file management and rotation (spec 4.2).
//!
//! The master key lives at `<dataDir>/credential_master_key` as 64 hex
//! characters (32 bytes), mode 0600. It is read once at startup and held
//! only in memory from then on; rotation never leaves the live key
//! unreadable on disk for longer than the atomic rename takes.

use std::path::{Path, PathBuf};

use shared::error::CommonError;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const MASTER_KEY_FILE_NAME: &str = "credential_master_key";

#[derive(Clone, ZeroizeOnDrop)]
pub struct MasterKey(#[zeroize(drop)] Box<[u8; 32]>);

impl MasterKey {
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = Box::new([0u8; 32]);
        rand::thread_rng().fill_bytes(bytes.as_mut());
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CommonError> {
        let hex_str = hex_str.trim();
        if hex_str.len() != 64 {
            return Err(CommonError::InvalidFormat {
                msg: "master key must be exactly 64 hex characters (32 bytes)".to_string(),
            });
        }
        let mut bytes = Box::new([0u8; 32]);
        for (i, byte) in bytes.iter_mut().enumerate() {
            let hi = hex_str.as_bytes()[i * 2];
            let lo = hex_str.as_bytes()[i * 2 + 1];
            *byte = (hex_digit(hi)? << 4) | hex_digit(lo)?;
        }
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

fn hex_digit(c: u8) -> Result<u8, CommonError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(CommonError::InvalidFormat {
            msg: "master key contains non-hex characters".to_string(),
        }),
    }
}

pub fn master_key_path(data_dir: &Path) -> PathBuf {
    data_dir.join(MASTER_KEY_FILE_NAME)
}

/// Loads the master key from `<dataDir>/credential_master_key`, generating
/// and persisting a new one on first run.
pub fn load_or_init(data_dir: &Path) -> Result<MasterKey, CommonError> {
    let path = master_key_path(data_dir);
    if path.exists() {
        let contents = std::fs::read_to_string(&path).map_err(CommonError::from)?;
        return MasterKey::from_hex(&contents);
    }

    std::fs::create_dir_all(data_dir).map_err(CommonError::from)?;
    let key = MasterKey::generate();
    write_key_file(&path, &key.to_hex())?;
    Ok(key)
}

/// Writes `contents` to `path` with mode 0600, replacing any existing file.
pub fn write_key_file(path: &Path, contents: &str) -> Result<(), CommonError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(CommonError::from)?;
        use std::io::Write;
        file.write_all(contents.as_bytes())
            .map_err(CommonError::from)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, contents).map_err(CommonError::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let key = MasterKey::generate();
        let hex = key.to_hex();
        let parsed = MasterKey::from_hex(&hex).unwrap();
        assert_eq!(key.as_bytes(), parsed.as_bytes());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(MasterKey::from_hex("abcd").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        let bad = "z".repeat(64);
        assert!(MasterKey::from_hex(&bad).is_err());
    }

    #[test]
    fn load_or_init_persists_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_init(dir.path()).unwrap();
        let second = load_or_init(dir.path()).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }
}
