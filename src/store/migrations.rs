//! Ticket schema migrations.
//!
//! Applied versions are recorded in `schema_versions`; only newer ones run.

use libsql::{Connection, params};
use tracing::{debug, info};

use crate::error::DatabaseError;

/// One schema step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version; append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "ticket_registry",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                ticket_number TEXT NOT NULL,
                old_ticket_numbers TEXT NOT NULL DEFAULT '{}',
                legal_date TEXT,
                expiration_date TEXT,
                update_date TEXT,
                description TEXT NOT NULL DEFAULT '',
                map_url TEXT,
                full_ticket TEXT NOT NULL,
                active_status INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tickets_number ON tickets(ticket_number);
            CREATE INDEX IF NOT EXISTS idx_tickets_expiration ON tickets(expiration_date);
        "#,
    },
    Migration {
        version: 2,
        name: "ticket_projects",
        sql: r#"
            ALTER TABLE tickets ADD COLUMN project_id INTEGER;
            CREATE INDEX IF NOT EXISTS idx_tickets_project ON tickets(project_id);
        "#,
    },
];

/// Bring the schema up to the latest version.
///
/// Versions at or below the recorded maximum are never re-run.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("version table: {e}")))?;

    let applied = schema_version(conn).await?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > applied);

    let mut latest = applied;
    for migration in pending {
        apply(conn, migration).await?;
        latest = migration.version;
    }

    if latest != applied {
        info!(from = applied, to = latest, "Ticket schema upgraded");
    } else {
        debug!(version = applied, "Ticket schema up to date");
    }
    Ok(())
}

async fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: libsql::Error| {
        DatabaseError::Migration(format!("V{} {}: {e}", migration.version, migration.name))
    };

    debug!(version = migration.version, name = migration.name, "Applying migration");
    conn.execute_batch(migration.sql).await.map_err(failed)?;
    conn.execute(
        "INSERT INTO schema_versions (version, name) VALUES (?1, ?2)",
        params![migration.version, migration.name],
    )
    .await
    .map_err(failed)?;
    Ok(())
}

/// Highest applied version; 0 on a fresh database.
pub async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let read_err = |e: libsql::Error| DatabaseError::Migration(format!("schema version: {e}"));

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_versions", ())
        .await
        .map_err(read_err)?;
    match rows.next().await.map_err(read_err)? {
        Some(row) => row.get::<i64>(0).map_err(read_err),
        None => Ok(0),
    }
}
