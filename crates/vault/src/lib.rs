pub mod cipher;
pub mod master_key;
pub mod router;
pub mod subkey;
pub mod vault;

pub use master_key::MasterKey;
pub use vault::{CredentialRowRepositoryLike, CredentialVault};
