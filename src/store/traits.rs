//! `TicketStore` trait: the narrow persistence interface the reconciler uses.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::tickets::{TicketPatch, TicketRecord};

/// Ticket storage looked up by current ticket number.
///
/// Lookups are exact matches. Several records may share a number (the
/// registry has no uniqueness constraint); `find` returns the oldest.
/// Writes target one record by id, so a patch built from a `find` result
/// never touches a different record that shares its number.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Look up a record by its current ticket number.
    async fn find(&self, ticket_number: &str) -> Result<Option<TicketRecord>, DatabaseError>;

    /// Insert a new record.
    async fn insert(&self, record: &TicketRecord) -> Result<(), DatabaseError>;

    /// Apply a patch to the record with surrogate id `id`.
    /// Returns the number of rows changed (0 if the record is gone).
    async fn update(&self, id: &Uuid, patch: &TicketPatch) -> Result<u64, DatabaseError>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<TicketRecord>, DatabaseError>;
}
