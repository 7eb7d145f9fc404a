pub mod adapters;
pub mod command;
pub mod crypto;
pub mod env;
pub mod envelope;
pub mod error;
pub mod libsql;
pub mod logging;
pub mod primitives;
pub mod subsystem;
pub mod test_utils;

// re-export paste for the macros
pub use paste;
