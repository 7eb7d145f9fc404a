//! Environment-variable configuration.
//!
//! YAML/TOML catalog-declaration parsing is explicitly out of scope: the catalog is managed entirely through the admin HTTP API. This
//! module only configures the process itself.

use std::path::PathBuf;

use shared::error::CommonError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub listen_addr: String,
    pub db_path: PathBuf,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    /// Loads `.env`/`.env.secrets` (non-production convenience) and reads
    /// the process configuration from the environment.
    pub fn load() -> Result<Self, CommonError> {
        shared::env::load_optional_env_files();

        let data_dir = PathBuf::from(env_or("AMBASSADOR_DATA_DIR", "./data"));
        let listen_addr = env_or("AMBASSADOR_LISTEN_ADDR", "127.0.0.1:8787");
        let db_path = data_dir.join("ambassador.db");

        Ok(Self {
            data_dir,
            listen_addr,
            db_path,
        })
    }

    /// A `libsql://...?mode=local` URL, the scheme `shared::libsql`'s
    /// `ConnectionType` parser expects (see `establish_db_connection`).
    pub fn db_url(&self) -> Result<url::Url, CommonError> {
        std::fs::create_dir_all(&self.data_dir).map_err(CommonError::from)?;
        let mut conn_url = url::Url::parse(&format!("libsql://{}", self.db_path.display()))
            .map_err(CommonError::from)?;
        conn_url.query_pairs_mut().append_pair("mode", "local");
        Ok(conn_url)
    }
}
