//! Ticket data model: persisted records, renumbering history, and patches.

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Format of the live date columns (`legal_date`, `update_date`, `expiration_date`).
pub const STORAGE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Format of dates inside the history blob. Readers of the registry expect
/// this, so it differs from [`STORAGE_DATE_FORMAT`] on purpose.
pub const DISPLAY_DATE_FORMAT: &str = "%m/%d/%Y";

/// A ticket as stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    /// Surrogate row ID. Lookups go through `ticket_number`.
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    /// Current ticket number.
    pub ticket_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_date: Option<NaiveDate>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_url: Option<String>,
    /// Verbatim ticket text the record was last built from.
    pub full_text: String,
    pub active_status: bool,
    /// Superseded ticket numbers, oldest first.
    pub old_ticket_numbers: TicketHistory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketRecord {
    /// Create an active record with an empty history.
    pub fn new(ticket_number: impl Into<String>, full_text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: None,
            ticket_number: ticket_number.into(),
            legal_date: None,
            expiration_date: None,
            update_date: None,
            description: String::new(),
            map_url: None,
            full_text: full_text.into(),
            active_status: true,
            old_ticket_numbers: TicketHistory::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Snapshot this record's dates for archiving under its current number.
    pub fn history_snapshot(&self) -> HistorySnapshot {
        HistorySnapshot::new(self.legal_date, self.update_date, self.expiration_date)
    }
}

/// Dates a ticket carried when its number was superseded.
///
/// Each value is `MM/DD/YYYY`, or empty when the date was unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    #[serde(default)]
    pub legal_date: String,
    #[serde(default)]
    pub update_date: String,
    #[serde(default)]
    pub expiration_date: String,
}

impl HistorySnapshot {
    pub fn new(
        legal_date: Option<NaiveDate>,
        update_date: Option<NaiveDate>,
        expiration_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            legal_date: display_date(legal_date),
            update_date: display_date(update_date),
            expiration_date: display_date(expiration_date),
        }
    }
}

fn display_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format(DISPLAY_DATE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Ordered mapping from superseded ticket number to its last known dates.
///
/// Entries are only ever added; insertion order is preserved so the blob
/// reads oldest-first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketHistory(IndexMap<String, HistorySnapshot>);

impl TicketHistory {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Merge one entry, keeping every existing one.
    ///
    /// Re-archiving a number already present refreshes its snapshot in place.
    pub fn merge(&mut self, ticket_number: impl Into<String>, snapshot: HistorySnapshot) {
        self.0.insert(ticket_number.into(), snapshot);
    }

    pub fn get(&self, ticket_number: &str) -> Option<&HistorySnapshot> {
        self.0.get(ticket_number)
    }

    pub fn contains(&self, ticket_number: &str) -> bool {
        self.0.contains_key(ticket_number)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Serialize to the JSON text blob stored in `old_ticket_numbers`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse the stored blob.
    ///
    /// Blank text and the legacy empty list `[]` read as an empty history.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::new());
        }
        // Deserialize straight into the IndexMap: going through `Value`
        // would reorder keys alphabetically.
        match serde_json::from_str::<Self>(raw) {
            Ok(history) => Ok(history),
            Err(e) => match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
                Ok(items) if items.is_empty() => Ok(Self::new()),
                _ => Err(e),
            },
        }
    }
}

/// Partial update applied to an existing record.
///
/// `None` leaves a column alone. The nested options on nullable columns
/// distinguish "leave alone" from "clear".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketPatch {
    pub ticket_number: Option<String>,
    pub legal_date: Option<Option<NaiveDate>>,
    pub expiration_date: Option<Option<NaiveDate>>,
    pub update_date: Option<Option<NaiveDate>>,
    pub description: Option<String>,
    pub map_url: Option<Option<String>>,
    pub full_text: Option<String>,
    pub active_status: Option<bool>,
    /// Replaces the whole history blob.
    pub old_ticket_numbers: Option<TicketHistory>,
}

impl TicketPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
