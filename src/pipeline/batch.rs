//! Batch driver: one pass over the mailbox.
//!
//! Each run:
//! 1. `MailSource::search()` for messages mentioning the sender address
//! 2. `fetch()` each match and resolve the forwarded body
//! 3. `extract()` ticket fields from the body
//! 4. `Reconciler::reconcile()` against the registry
//!
//! Messages are handled strictly in search order, so a renumbering notice
//! sees the insert that preceded it in the same batch. A failure on one
//! message is recorded in the report and the run moves on. Messages with no
//! forwarded notice in them are counted as skipped and only logged at debug.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::mail::{MailSource, MessageRef, SearchFilter};
use crate::pipeline::body;
use crate::pipeline::extractor;
use crate::pipeline::reconciler::Reconciler;
use crate::pipeline::types::{BatchReport, ReconcileOutcome, SkipReason};

/// Default mailbox searched when none is configured.
pub const DEFAULT_MAILBOX: &str = "INBOX";

pub struct BatchProcessor {
    source: Arc<dyn MailSource>,
    reconciler: Reconciler,
    /// Sender address marking where the forwarded notice starts.
    sentinel: String,
    mailbox: String,
}

impl BatchProcessor {
    pub fn new(
        source: Arc<dyn MailSource>,
        reconciler: Reconciler,
        sentinel: impl Into<String>,
    ) -> Self {
        Self {
            source,
            reconciler,
            sentinel: sentinel.into(),
            mailbox: DEFAULT_MAILBOX.to_string(),
        }
    }

    pub fn with_mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = mailbox.into();
        self
    }

    /// Process every matching message once.
    ///
    /// Returns `Err` only when the search itself fails.
    pub async fn run_once(&self) -> Result<BatchReport, PipelineError> {
        let filter = SearchFilter::new(self.mailbox.clone(), self.sentinel.clone());
        let messages = match self.source.search(&filter).await {
            Ok(messages) => messages,
            Err(e) => {
                error!(mailbox = %self.mailbox, "Mail search failed: {e}");
                self.close_source().await;
                return Err(PipelineError::Search(e));
            }
        };

        info!(
            mailbox = %self.mailbox,
            count = messages.len(),
            "Found candidate ticket messages"
        );

        let mut report = BatchReport::default();
        for message in messages {
            let result = self.process_message(&message).await;
            match &result {
                Ok(outcome @ ReconcileOutcome::Skipped { reason }) => {
                    debug!(message = %message, outcome = outcome.label(), %reason, "Message skipped");
                }
                Ok(outcome) => {
                    debug!(message = %message, outcome = outcome.label(), "Message processed");
                }
                Err(e) => {
                    warn!(message = %message, "Message failed: {e}");
                }
            }
            report.record(message, result);
        }

        self.close_source().await;

        info!(
            total = report.total(),
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "Batch complete"
        );
        Ok(report)
    }

    async fn process_message(
        &self,
        message: &MessageRef,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let fetched = self
            .source
            .fetch(message)
            .await
            .map_err(|source| PipelineError::Fetch {
                id: message.to_string(),
                source,
            })?;

        let Some(resolved) = body::resolve(&fetched.body, &self.sentinel) else {
            return Ok(ReconcileOutcome::skipped(SkipReason::NoTicketBody));
        };

        let fields = extractor::extract(&resolved.body)?;
        debug!(
            message = %message,
            part = %resolved.content_type,
            ticket = %fields.ticket_number,
            old_ticket = fields.old_ticket_number.as_deref().unwrap_or(""),
            subject = fetched.header("subject").unwrap_or(""),
            "Resolved ticket notice"
        );

        Ok(self.reconciler.reconcile(&fields).await?)
    }

    async fn close_source(&self) {
        if let Err(e) = self.source.close().await {
            warn!("Failed to close mail session: {e}");
        }
    }
}
