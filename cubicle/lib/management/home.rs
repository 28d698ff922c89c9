use std::path::PathBuf;

use crate::{config::CubicleConfig, CubicleResult};

use super::{init_db, PORT_DB_MIGRATOR};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Prepares the cubicle home of `config`: the home and log directories and a migrated port
/// allocation database. Safe to run on an already initialized home.
///
/// Returns the path of the port allocation database.
pub async fn init_home(config: &CubicleConfig) -> CubicleResult<PathBuf> {
    let home = config.get_home();
    tokio::fs::create_dir_all(home).await?;
    tokio::fs::create_dir_all(config.log_dir()).await?;

    let db_path = config.port_db_path();
    let pool = init_db(&db_path, &PORT_DB_MIGRATOR).await?;
    pool.close().await;

    tracing::info!(home = %home.display(), db = %db_path.display(), "cubicle home initialized");
    Ok(db_path)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
