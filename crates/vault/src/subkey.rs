//! Per-user subkey derivation (spec 4.2).
//!
//! Every credential is encrypted under a key derived from the live master
//! key and the owning user's `vault_salt`, never under the master key
//! directly. This means a single leaked subkey can decrypt exactly one
//! user's credentials.

use hkdf::Hkdf;
use sha2::Sha256;

pub const SUBKEY_INFO: &[u8] = b"vault/v1";

/// Derives a 32-byte AES-256 subkey from the master key and a user's salt.
pub fn derive_subkey(master_key: &[u8; 32], user_salt: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(user_salt), master_key);
    let mut out = [0u8; 32];
    hk.expand(SUBKEY_INFO, &mut out)
        .expect("32 is a valid Sha256 HKDF output length");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_derive_same_subkey() {
        let master = [7u8; 32];
        let salt = b"user-salt-a";
        assert_eq!(derive_subkey(&master, salt), derive_subkey(&master, salt));
    }

    #[test]
    fn different_salts_derive_different_subkeys() {
        let master = [7u8; 32];
        assert_ne!(
            derive_subkey(&master, b"user-a"),
            derive_subkey(&master, b"user-b")
        );
    }

    #[test]
    fn different_master_keys_derive_different_subkeys() {
        let salt = b"user-salt-a";
        assert_ne!(
            derive_subkey(&[1u8; 32], salt),
            derive_subkey(&[2u8; 32], salt)
        );
    }
}
