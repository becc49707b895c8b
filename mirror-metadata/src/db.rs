use crate::error::{MetadataError, Result};
use fs2::FileExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the metadata database, initialising it on first run.
///
/// An existing file is opened as-is and never re-initialised. When no file
/// exists the schema is created exactly once. The existence check and the
/// initialisation both happen under an exclusive lock on `<db>.lock`, so a
/// concurrent starter either initialises or sees a finished store. A failed
/// initialisation removes the half-created database so the service never
/// runs against it.
#[instrument(fields(db_path = %db_path.display()))]
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let lock_path = lock_path(db_path);
    let lock = tokio::task::spawn_blocking(move || acquire_init_lock(&lock_path))
        .await
        .map_err(|e| MetadataError::Initialization(format!("lock task failed: {e}")))??;

    if db_path.exists() {
        drop(lock);
        info!("Opening existing metadata store");
        return connect(db_path, false).await;
    }

    info!("Creating `crate` and `update_history` tables");
    let result = initialize(db_path).await;
    drop(lock);

    match result {
        Ok(pool) => {
            info!("Metadata store initialised");
            Ok(pool)
        }
        Err(e) => {
            remove_database_files(db_path);
            Err(MetadataError::Initialization(e.to_string()))
        }
    }
}

/// Run database migrations
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;

    Ok(())
}

async fn initialize(db_path: &Path) -> Result<SqlitePool> {
    let pool = connect(db_path, true).await?;
    if let Err(e) = run_migrations(&pool).await {
        pool.close().await;
        return Err(e);
    }
    Ok(pool)
}

async fn connect(db_path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    Ok(pool)
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn acquire_init_lock(lock_path: &Path) -> Result<File> {
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)?;

    lock_file.lock_exclusive().map_err(|e| {
        MetadataError::Initialization(format!(
            "Failed to acquire lock {}: {}",
            lock_path.display(),
            e
        ))
    })?;

    Ok(lock_file)
}

fn remove_database_files(db_path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(suffix);
        let path = PathBuf::from(name);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove partially initialised database");
            }
        }
    }
}
