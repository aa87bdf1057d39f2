//! Schema migrations for the SQLite engine.
//!
//! A version table records which batches have been applied; every batch uses
//! `IF NOT EXISTS` so re-running is harmless.

use tokio_rusqlite::{Connection, params};

use crate::Error;

/// (version, SQL), applied in order.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../../migrations/001_entries.sql"))];

/// Bring the schema up to the newest version.
pub async fn run(db: &Connection) -> Result<(), Error> {
    db.call(|sql| -> Result<(), Error> {
        sql.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                installed_at INTEGER NOT NULL
            );",
        )?;

        let installed: i64 =
            sql.query_row("SELECT IFNULL(MAX(version), 0) FROM schema_version", [], |row| row.get(0))?;
        let pending = MIGRATIONS.iter().filter(|(version, _)| *version > installed);

        for (version, batch) in pending {
            sql.execute_batch(batch).map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
            sql.execute(
                "INSERT INTO schema_version (version, installed_at) VALUES (?1, ?2)",
                params![version, chrono::Utc::now().timestamp()],
            )?;
            tracing::debug!(version, "schema upgraded");
        }
        Ok(())
    })
    .await
    .map_err(Error::from)
}
