//! Persistence layer for the reelgen orchestrator.
//!
//! Provides the `tasks` table model, the [`TaskRepo`] repository, the
//! narrow [`TaskStore`] contract the engine consumes, and the
//! sqlx/Postgres implementation of that contract.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;
pub mod store;

pub use models::task::{NewTask, TaskFilter, TaskPatch, TaskRecord};
pub use repositories::TaskRepo;
pub use store::{PgTaskStore, StoreError, TaskStore};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Apply pending migrations from the embedded `migrations/` directory.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
