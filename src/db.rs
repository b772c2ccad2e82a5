//! PostgreSQL pool setup, embedded migrations and constraint checks.

use crate::config::Config;
use sqlx::{
    ConnectOptions, Pool, Postgres,
    postgres::{PgConnectOptions, PgPoolOptions},
};

/// Pool shared by the API handlers, the task worker and the scheduler.
pub type DbPool = Pool<Postgres>;

/// Open the cosmos pool. Statement logging stays on only with `SQL_DEBUG`.
///
/// # Errors
///
/// Fails when `DATABASE_URL` (or the assembled `POSTGRES_*` URL) does not parse
/// or the first connection is refused.
pub async fn create_pool(config: &Config) -> Result<DbPool, sqlx::Error> {
    let mut options: PgConnectOptions = config.database_url().parse()?;
    if !config.sql_debug {
        options = options.disable_statement_logging();
    }

    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect_with(options)
        .await
}

/// Apply the schema migrations embedded from `migrations/`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// True when the error is a unique-constraint violation (SQLSTATE 23505).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
