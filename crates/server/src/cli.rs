//! CLI surface: argument parsing is intentionally a single `serve` command
//! plus the process exit-code contract.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ambassador", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Starts the HTTP gateway and runs until it receives a shutdown signal.
    Serve,
}

/// Process exit codes: 0 success, 1 generic error, 2 misconfiguration,
/// 3 database migration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GenericError = 1,
    Misconfiguration = 2,
    MigrationFailure = 3,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Classifies a top-level startup failure into its exit code.
    /// `CommonError::SqliteError`/`LibsqlMigrationError` surface
    /// from `establish_db_connection`'s migration step; everything env/path
    /// related surfaces as `InvalidFormat`/`IoError`/`UrlParseError` out of
    /// `AppConfig::load`.
    pub fn for_error(err: &shared::error::CommonError) -> Self {
        use shared::error::CommonError;
        match err {
            CommonError::SqliteError { .. } | CommonError::LibsqlMigrationError { .. } => {
                ExitCode::MigrationFailure
            }
            CommonError::InvalidFormat { .. } | CommonError::IoError { .. } | CommonError::UrlParseError { .. } => {
                ExitCode::Misconfiguration
            }
            _ => ExitCode::GenericError,
        }
    }
}
