pub mod application;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod infrastructure;
pub mod schema;
pub mod shutdown;

use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub use application::tailer::{OutboxTailer, TailerConfig};
pub use application::worker::{SearchSyncWorker, WorkerOptions};
pub use config::AppConfig;
pub use db::{create_pool, DbPool};
pub use shutdown::Shutdown;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Run any pending Diesel migrations against the pool's database.
pub fn run_migrations(pool: &DbPool) -> Result<(), BoxError> {
    let mut conn = pool.get()?;
    let applied = conn.run_pending_migrations(MIGRATIONS)?;
    if !applied.is_empty() {
        log::info!("Applied {} database migration(s)", applied.len());
    }
    Ok(())
}
