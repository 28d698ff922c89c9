use std::path::Path;

use sqlx::{migrate::Migrator, sqlite::SqlitePoolOptions, Pool, Sqlite};
use tokio::fs;

use crate::CubicleResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Migrator for the port allocation database
pub static PORT_DB_MIGRATOR: Migrator = sqlx::migrate!("lib/management/migrations/ports");

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Initializes a new SQLite database if it doesn't already exist at the specified path.
///
/// ## Arguments
///
/// * `db_path` - Path where the SQLite database file should be created
/// * `migrator` - SQLx migrator containing database schema migrations to run
pub async fn init_db(
    db_path: impl AsRef<Path>,
    migrator: &Migrator,
) -> CubicleResult<Pool<Sqlite>> {
    let db_path = db_path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    // Create an empty database file if it doesn't exist
    if !db_path.exists() {
        fs::File::create(&db_path).await?;
    }

    let pool = get_db_pool(db_path).await?;

    // Run migrations
    migrator.run(&pool).await?;

    Ok(pool)
}

/// Creates and returns a connection pool for SQLite database operations.
///
/// sqlx connections wait on a locked database for up to five seconds before failing with
/// `SQLITE_BUSY`, so concurrent allocations queue up behind each other.
pub async fn get_db_pool(db_path: impl AsRef<Path>) -> CubicleResult<Pool<Sqlite>> {
    let db_path = db_path.as_ref();
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await?;

    Ok(pool)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_port_db() -> CubicleResult<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("nested").join("ports.db");

        init_db(&db_path, &PORT_DB_MIGRATOR).await?;
        assert!(db_path.exists());

        let pool = get_db_pool(&db_path).await?;
        let tables = sqlx::query("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(&pool)
            .await?;

        let table_names: Vec<String> = tables
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        assert!(
            table_names.contains(&"port_allocations".to_string()),
            "port_allocations table not found"
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_init_db_is_repeatable() -> CubicleResult<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("ports.db");

        init_db(&db_path, &PORT_DB_MIGRATOR).await?;
        init_db(&db_path, &PORT_DB_MIGRATOR).await?;

        Ok(())
    }
}
