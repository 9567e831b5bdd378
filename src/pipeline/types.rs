//! Shared types for the ticket ingest pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::mail::MessageRef;

// ── Extraction result ───────────────────────────────────────────────

/// Structured fields pulled from one ticket notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketFields {
    /// Current ticket number.
    pub ticket_number: String,
    /// Superseded number, present only on renumbering notices.
    pub old_ticket_number: Option<String>,
    pub legal_date: Option<NaiveDate>,
    /// "Good Thru" date.
    pub expiration_date: Option<NaiveDate>,
    /// "Update By" date.
    pub update_date: Option<NaiveDate>,
    /// Location and work-type fragments joined with `" - "`.
    pub description: String,
    pub map_url: Option<String>,
    /// Verbatim notice text.
    pub full_text: String,
    pub active_status: bool,
}

impl TicketFields {
    /// A renumbering notice carries the number it replaces.
    pub fn is_update(&self) -> bool {
        self.old_ticket_number.is_some()
    }
}

// ── Reconcile outcome ───────────────────────────────────────────────

/// Why a ticket was left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No readable part of the message carried the sender marker.
    NoTicketBody,
    /// Fields carried no ticket number.
    MissingTicketNumber,
    /// Renumbering refers to a ticket the registry doesn't have.
    OriginalNotFound,
    /// A record with this number already exists.
    Duplicate,
    /// Renumbering names the same number on both sides.
    SelfRenumbering,
    /// The new number is already one of the record's superseded numbers.
    NumberAlreadyInHistory,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoTicketBody => "no forwarded ticket body",
            Self::MissingTicketNumber => "no ticket number",
            Self::OriginalNotFound => "original ticket not found",
            Self::Duplicate => "duplicate ticket",
            Self::SelfRenumbering => "old and new ticket numbers match",
            Self::NumberAlreadyInHistory => "new number already in ticket history",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// What reconciling one ticket did to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Inserted { ticket_number: String },
    Updated { from: String, to: String },
    Skipped { reason: SkipReason },
}

impl ReconcileOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Inserted { .. } => "inserted",
            Self::Updated { .. } => "updated",
            Self::Skipped { .. } => "skipped",
        }
    }
}

// ── Batch report ────────────────────────────────────────────────────

/// Result of processing one message in a batch.
#[derive(Debug)]
pub struct MessageOutcome {
    pub message: MessageRef,
    pub result: Result<ReconcileOutcome, PipelineError>,
}

/// Summary of one batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<MessageOutcome>,
}

impl BatchReport {
    pub fn record(&mut self, message: MessageRef, result: Result<ReconcileOutcome, PipelineError>) {
        match &result {
            Ok(ReconcileOutcome::Inserted { .. }) => self.inserted += 1,
            Ok(ReconcileOutcome::Updated { .. }) => self.updated += 1,
            Ok(ReconcileOutcome::Skipped { .. }) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
        self.outcomes.push(MessageOutcome { message, result });
    }

    /// Messages seen in this run.
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}
