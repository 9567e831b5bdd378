//! libSQL backend: async `TicketStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::TicketStore;
use crate::tickets::model::STORAGE_DATE_FORMAT;
use crate::tickets::{TicketHistory, TicketPatch, TicketRecord};

/// libSQL ticket store.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlTicketStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlTicketStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Ticket database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests and dry runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_date(s: Option<String>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(&s, STORAGE_DATE_FORMAT).ok())
}

fn date_value(date: Option<NaiveDate>) -> libsql::Value {
    match date {
        Some(d) => libsql::Value::Text(d.format(STORAGE_DATE_FORMAT).to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn history_json(history: &TicketHistory) -> Result<String, DatabaseError> {
    history
        .to_json()
        .map_err(|e| DatabaseError::Serialization(format!("old_ticket_numbers: {e}")))
}

/// Map a libsql Row to a TicketRecord.
///
/// Column order matches TICKET_COLUMNS.
fn row_to_ticket(row: &libsql::Row) -> Result<TicketRecord, DatabaseError> {
    let query_err = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let id_str: String = row.get(0).map_err(query_err)?;
    let ticket_number: String = row.get(2).map_err(query_err)?;
    let history_str: String = row.get(3).map_err(query_err)?;
    let created_str: String = row.get(11).map_err(query_err)?;
    let updated_str: String = row.get(12).map_err(query_err)?;

    let old_ticket_numbers = TicketHistory::from_json(&history_str).map_err(|e| {
        DatabaseError::Serialization(format!(
            "old_ticket_numbers for ticket {ticket_number}: {e}"
        ))
    })?;

    Ok(TicketRecord {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Serialization(format!("ticket id {id_str}: {e}")))?,
        project_id: row.get::<i64>(1).ok(),
        ticket_number,
        legal_date: parse_date(row.get(4).ok()),
        expiration_date: parse_date(row.get(5).ok()),
        update_date: parse_date(row.get(6).ok()),
        description: row.get(7).map_err(query_err)?,
        map_url: row.get(8).ok(),
        full_text: row.get(9).map_err(query_err)?,
        active_status: row.get::<i64>(10).map_err(query_err)? != 0,
        old_ticket_numbers,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Turn a patch into `SET` assignments and their positional values.
fn patch_assignments(
    patch: &TicketPatch,
) -> Result<(Vec<&'static str>, Vec<libsql::Value>), DatabaseError> {
    let mut columns = Vec::new();
    let mut values = Vec::new();

    if let Some(number) = &patch.ticket_number {
        columns.push("ticket_number");
        values.push(libsql::Value::Text(number.clone()));
    }
    if let Some(history) = &patch.old_ticket_numbers {
        columns.push("old_ticket_numbers");
        values.push(libsql::Value::Text(history_json(history)?));
    }
    if let Some(date) = patch.legal_date {
        columns.push("legal_date");
        values.push(date_value(date));
    }
    if let Some(date) = patch.expiration_date {
        columns.push("expiration_date");
        values.push(date_value(date));
    }
    if let Some(date) = patch.update_date {
        columns.push("update_date");
        values.push(date_value(date));
    }
    if let Some(description) = &patch.description {
        columns.push("description");
        values.push(libsql::Value::Text(description.clone()));
    }
    if let Some(map_url) = &patch.map_url {
        columns.push("map_url");
        values.push(opt_text(map_url.as_deref()));
    }
    if let Some(full_text) = &patch.full_text {
        columns.push("full_ticket");
        values.push(libsql::Value::Text(full_text.clone()));
    }
    if let Some(active) = patch.active_status {
        columns.push("active_status");
        values.push(libsql::Value::Integer(i64::from(active)));
    }

    Ok((columns, values))
}

// ── Trait implementation ────────────────────────────────────────────

const TICKET_COLUMNS: &str = "id, project_id, ticket_number, old_ticket_numbers, legal_date, expiration_date, update_date, description, map_url, full_ticket, active_status, created_at, updated_at";

#[async_trait]
impl TicketStore for LibSqlTicketStore {
    async fn find(&self, ticket_number: &str) -> Result<Option<TicketRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TICKET_COLUMNS} FROM tickets WHERE ticket_number = ?1
                     ORDER BY created_at ASC, rowid ASC LIMIT 1"
                ),
                params![ticket_number],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_ticket(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find: {e}"))),
        }
    }

    async fn insert(&self, record: &TicketRecord) -> Result<(), DatabaseError> {
        let history = history_json(&record.old_ticket_numbers)?;
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO tickets ({TICKET_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                record.id.to_string(),
                match record.project_id {
                    Some(id) => libsql::Value::Integer(id),
                    None => libsql::Value::Null,
                },
                record.ticket_number.clone(),
                history,
                date_value(record.legal_date),
                date_value(record.expiration_date),
                date_value(record.update_date),
                record.description.clone(),
                opt_text(record.map_url.as_deref()),
                record.full_text.clone(),
                i64::from(record.active_status),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert: {e}")))?;

        debug!(id = %record.id, ticket = %record.ticket_number, "Ticket inserted into DB");
        Ok(())
    }

    async fn update(&self, id: &Uuid, patch: &TicketPatch) -> Result<u64, DatabaseError> {
        if patch.is_empty() {
            return Ok(0);
        }

        let (columns, mut values) = patch_assignments(patch)?;
        let mut assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{col} = ?{}", i + 1))
            .collect();

        values.push(libsql::Value::Text(Utc::now().to_rfc3339()));
        assignments.push(format!("updated_at = ?{}", values.len()));
        values.push(libsql::Value::Text(id.to_string()));

        let sql = format!(
            "UPDATE tickets SET {} WHERE id = ?{}",
            assignments.join(", "),
            values.len()
        );

        let changed = self
            .conn()
            .execute(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("update: {e}")))?;

        debug!(id = %id, changed, "Ticket updated in DB");
        Ok(changed)
    }

    async fn list(&self) -> Result<Vec<TicketRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {TICKET_COLUMNS} FROM tickets ORDER BY created_at ASC, rowid ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list: {e}")))?;

        let mut tickets = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_ticket(&row) {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => {
                    warn!("Skipping ticket row: {e}");
                }
            }
        }
        Ok(tickets)
    }
}
