//! Reconciliation: merge extracted ticket fields into the registry.
//!
//! New numbers are inserted once. A renumbering notice renames the existing
//! record and archives the superseded number with the dates it carried.
//! The rename is written to that one record by id; other records that share
//! either number keep their own history.
//!
//! The history update is a read-modify-write of the whole blob: a concurrent
//! writer touching the same record between `find` and `update` loses its
//! change. Replaying a renumbering is not idempotent either; see the
//! `replaying_batch_duplicates_history` integration test.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::ReconcileError;
use crate::pipeline::types::{ReconcileOutcome, SkipReason, TicketFields};
use crate::store::TicketStore;
use crate::tickets::{TicketPatch, TicketRecord};

/// Applies extracted tickets to a `TicketStore`.
pub struct Reconciler {
    store: Arc<dyn TicketStore>,
    /// Project assigned to inserted tickets.
    project_id: Option<i64>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self {
            store,
            project_id: None,
        }
    }

    pub fn with_project_id(mut self, project_id: Option<i64>) -> Self {
        self.project_id = project_id;
        self
    }

    /// Decide insert vs. renumber vs. skip for one ticket and apply it.
    pub async fn reconcile(
        &self,
        fields: &TicketFields,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if fields.ticket_number.trim().is_empty() {
            return Ok(ReconcileOutcome::skipped(SkipReason::MissingTicketNumber));
        }

        match fields.old_ticket_number.as_deref() {
            Some(old) => self.renumber(old, fields).await,
            None => self.insert_new(fields).await,
        }
    }

    async fn renumber(
        &self,
        old: &str,
        fields: &TicketFields,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let new = fields.ticket_number.as_str();
        if old == new {
            warn!(ticket = new, "Renumbering notice names the same ticket twice");
            return Ok(ReconcileOutcome::skipped(SkipReason::SelfRenumbering));
        }

        let Some(existing) = self.find(old).await? else {
            warn!(old_ticket = old, ticket = new, "Could not find original ticket");
            return Ok(ReconcileOutcome::skipped(SkipReason::OriginalNotFound));
        };

        if existing.old_ticket_numbers.contains(new) {
            warn!(
                old_ticket = old,
                ticket = new,
                "New number already archived on this ticket"
            );
            return Ok(ReconcileOutcome::skipped(SkipReason::NumberAlreadyInHistory));
        }

        // Allowed, since replaying a batch re-runs renumberings onto a number
        // that is already live, but worth a warning: two records now share it.
        if let Some(holder) = self.find(new).await?
            && holder.id != existing.id
        {
            warn!(
                old_ticket = old,
                ticket = new,
                record = %existing.id,
                holder = %holder.id,
                "New number already belongs to another live ticket"
            );
        }

        let mut history = existing.old_ticket_numbers.clone();
        history.merge(existing.ticket_number.clone(), existing.history_snapshot());

        let patch = TicketPatch {
            ticket_number: Some(new.to_string()),
            old_ticket_numbers: Some(history),
            legal_date: Some(fields.legal_date),
            expiration_date: Some(fields.expiration_date),
            update_date: Some(fields.update_date),
            description: Some(fields.description.clone()),
            map_url: Some(fields.map_url.clone()),
            full_text: Some(fields.full_text.clone()),
            active_status: None,
        };

        let changed = self
            .store
            .update(&existing.id, &patch)
            .await
            .map_err(|source| ReconcileError::Persist {
                key: old.to_string(),
                source,
            })?;
        if changed == 0 {
            return Err(ReconcileError::RecordVanished {
                key: old.to_string(),
                id: existing.id,
            });
        }

        info!(
            from = old,
            to = new,
            archived = %existing.ticket_number,
            "Ticket renumbered"
        );
        Ok(ReconcileOutcome::Updated {
            from: old.to_string(),
            to: new.to_string(),
        })
    }

    async fn insert_new(&self, fields: &TicketFields) -> Result<ReconcileOutcome, ReconcileError> {
        let number = fields.ticket_number.as_str();
        if self.find(number).await?.is_some() {
            info!(ticket = number, "Ticket already exists in registry");
            return Ok(ReconcileOutcome::skipped(SkipReason::Duplicate));
        }

        let record = new_record(fields, self.project_id);
        self.store
            .insert(&record)
            .await
            .map_err(|source| ReconcileError::Persist {
                key: number.to_string(),
                source,
            })?;

        info!(ticket = number, id = %record.id, "Inserted new ticket");
        Ok(ReconcileOutcome::Inserted {
            ticket_number: number.to_string(),
        })
    }

    async fn find(&self, key: &str) -> Result<Option<TicketRecord>, ReconcileError> {
        self.store
            .find(key)
            .await
            .map_err(|source| ReconcileError::Lookup {
                key: key.to_string(),
                source,
            })
    }
}

/// Build a fresh record from extracted fields. History starts empty and the
/// renumbering fields are not carried over.
fn new_record(fields: &TicketFields, project_id: Option<i64>) -> TicketRecord {
    let mut record = TicketRecord::new(fields.ticket_number.clone(), fields.full_text.clone());
    record.project_id = project_id;
    record.legal_date = fields.legal_date;
    record.expiration_date = fields.expiration_date;
    record.update_date = fields.update_date;
    record.description = fields.description.clone();
    record.map_url = fields.map_url.clone();
    record.active_status = fields.active_status;
    record
}
