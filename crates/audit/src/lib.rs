pub mod buffer;
pub mod event;
pub mod repository;

pub use buffer::{AuditBuffer, AuditBufferConfig, AuditSinkLike, AuditStats, RepositorySink};
pub use event::{AuditEvent, AuditEventBuilder, EventType, ResponseSummary, Severity};
pub use repository::{AuditRepositoryLike, SqliteAuditRepository};

pub fn load_sql_migrations() -> shared::libsql::Migrations<'static> {
    shared_macros::load_sql_migrations!("migrations")
}
