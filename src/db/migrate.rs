use rusqlite::{Connection, params};
use std::fs;
use std::path::Path;
use crate::error::{Result, PlaygraphError};

/// Migration metadata
struct Migration {
    version: u32,
    name: String,
    sql: String,
}

/// Create schema_migrations table if it doesn't exist
fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get list of applied migrations
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(PlaygraphError::Database)?;
    Ok(names)
}

/// Load migration files from migrations directory, ordered by version
fn load_migrations(migrations_dir: &Path) -> Result<Vec<Migration>> {
    let mut migrations = Vec::new();

    let entries = fs::read_dir(migrations_dir).map_err(PlaygraphError::Io)?;

    let files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    for entry in files {
        let path = entry.path();
        let filename = path.file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PlaygraphError::Config("Invalid migration filename".to_string()))?;

        // "002_canonical_graph.sql" -> 2
        let version_str = filename
            .split('_')
            .next()
            .ok_or_else(|| PlaygraphError::Config(format!("Invalid migration filename: {}", filename)))?;
        let version: u32 = version_str.parse()
            .map_err(|_| PlaygraphError::Config(format!("Invalid migration version: {}", version_str)))?;

        let sql = fs::read_to_string(&path).map_err(PlaygraphError::Io)?;
        let name = filename.trim_end_matches(".sql").to_string();

        migrations.push(Migration { version, name, sql });
    }

    migrations.sort_by_key(|m| m.version);

    Ok(migrations)
}

/// Run all pending migrations, each in its own transaction
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<()> {
    ensure_migrations_table(conn)?;

    let applied = get_applied_migrations(conn)?;
    let migrations = load_migrations(migrations_dir)?;

    for migration in migrations {
        if applied.contains(&migration.name) {
            log::debug!("Migration {} already applied, skipping", migration.name);
            continue;
        }

        log::info!("Applying migration: {} (version {})", migration.name, migration.version);

        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql).map_err(|e| {
            PlaygraphError::Config(format!("Failed to execute migration {}: {}", migration.name, e))
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;

        log::info!("Migration {} applied successfully", migration.name);
    }

    log::debug!("All migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(conn: &Connection, sql: &str) -> Vec<String> {
        conn.prepare(sql)
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            .unwrap()
    }

    #[test]
    fn test_migration_tracking() {
        let temp_dir = TempDir::new().unwrap();
        let conn = Connection::open(temp_dir.path().join("test.db")).unwrap();

        ensure_migrations_table(&conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![1, "001_test"],
        ).unwrap();

        let applied = get_applied_migrations(&conn).unwrap();
        assert!(applied.contains(&"001_test".to_string()));
    }

    #[test]
    fn test_load_migrations_sorted_by_version() {
        let temp_dir = TempDir::new().unwrap();
        let migrations_dir = temp_dir.path().join("migrations");
        fs::create_dir(&migrations_dir).unwrap();
        fs::write(migrations_dir.join("010_later.sql"), "CREATE TABLE later (id INTEGER);").unwrap();
        fs::write(migrations_dir.join("002_first.sql"), "CREATE TABLE first (id INTEGER);").unwrap();
        fs::write(migrations_dir.join("notes.txt"), "ignored").unwrap();

        let migrations = load_migrations(&migrations_dir).unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version, 2);
        assert_eq!(migrations[1].version, 10);
    }

    #[test]
    fn test_full_migration_schema() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        run_migrations(&mut conn, &migrations_dir).unwrap();
        // second pass is a no-op
        run_migrations(&mut conn, &migrations_dir).unwrap();

        let tables = names(&conn, "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name");
        for expected in [
            "raw_entities",
            "raw_relations",
            "raw_plays",
            "raw_show_hosts",
            "entities",
            "triples",
            "bridge_records",
            "identity_quarantine",
            "pipeline_runs",
            "phase_checkpoints",
            "relation_type_reports",
            "triple_rejections",
            "stage_frozen_relation_types",
            "schema_migrations",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
        }

        let indexes = names(&conn, "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'");
        assert!(indexes.contains(&"idx_triples_subject".to_string()));
        assert!(indexes.contains(&"idx_triples_object".to_string()));
        assert!(indexes.contains(&"idx_triples_predicate".to_string()));

        let views = names(&conn, "SELECT name FROM sqlite_master WHERE type='view'");
        assert!(views.contains(&"entity_artist".to_string()));
        assert!(views.contains(&"entity_contribution".to_string()));
        assert!(views.contains(&"entity_show".to_string()));

        let play_columns = names(&conn, "SELECT name FROM pragma_table_info('raw_plays')");
        assert!(play_columns.contains(&"show_ref".to_string()));

        assert_eq!(get_applied_migrations(&conn).unwrap().len(), 5);
    }
}
