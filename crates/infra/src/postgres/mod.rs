//! Postgres adapters for provisioning state and its collaborators.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any | `Backend` |
//! | RowNotFound | N/A | `NotFound` |
//! | Other (pool closed, I/O, decode) | N/A | `Backend` |

mod collaborators;
mod store;

pub use collaborators::{
    PostgresExternalDirectory, PostgresRoleCatalogs, PostgresSecretSource, PostgresUserDirectory,
};
pub use store::PostgresProvisioningStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use forgeops_provisioning::StoreError;

const SCHEMA: &str = include_str!("../../migrations/0001_provisioning.sql");

/// Open a connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Apply the schema. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    Ok(())
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("{operation}: row not found")),
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code() {
                Some(code) if code.as_ref() == "23505" => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        other => StoreError::Backend(format!("{operation}: {other}")),
    }
}

pub(crate) fn decode_error(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("failed to decode {what}: {err}"))
}
