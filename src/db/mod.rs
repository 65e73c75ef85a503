use rusqlite::Connection;
use std::path::Path;
use tokio::task;
use crate::error::{Result, PlaygraphError};

pub mod migrate;

// WAL for readers during a long batch, NORMAL sync for speed, foreign keys for bridge integrity
const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA temp_store = MEMORY; \
     PRAGMA cache_size = -65536; \
     PRAGMA wal_autocheckpoint = 1000;";

/// Database connection wrapper
pub struct Db {
    path: std::path::PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Open a new database connection with the pipeline pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        open_with_pragmas(&self.path)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = open_with_pragmas(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| PlaygraphError::InvalidInput(format!("blocking database task failed: {}", e)))?
    }
}

fn open_with_pragmas(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(PlaygraphError::Database)?;
    conn.execute_batch(CONNECTION_PRAGMAS)?;
    Ok(conn)
}

/// Check whether a table (or view) exists in the schema
pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Fail with `MissingTable` unless every named input table exists
pub fn require_tables(conn: &Connection, names: &[&str]) -> Result<()> {
    for name in names {
        if !table_exists(conn, name)? {
            return Err(PlaygraphError::MissingTable(name.to_string()));
        }
    }
    Ok(())
}

/// Open a migrated database in a temp dir for tests.
#[cfg(test)]
pub(crate) fn test_connection() -> (Connection, tempfile::TempDir) {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let mut conn = open_with_pragmas(&db_path).unwrap();
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    migrate::run_migrations(&mut conn, &migrations_dir).unwrap();
    (conn, temp_dir)
}
