//! Ticket ingest pipeline.
//!
//! Every candidate message flows through:
//! 1. `MailSource::search()` / `fetch()`: mailbox I/O
//! 2. `body::resolve()`: locate the forwarded notice in the MIME tree
//! 3. `extractor::extract()`: fixed-label rules, no I/O
//! 4. `Reconciler::reconcile()`: insert, renumber or skip
//!
//! `BatchProcessor` drives one pass and returns a `BatchReport`.

pub mod batch;
pub mod body;
pub mod extractor;
pub mod reconciler;
pub mod types;

pub use batch::BatchProcessor;
pub use reconciler::Reconciler;
pub use types::{BatchReport, ReconcileOutcome, SkipReason, TicketFields};
