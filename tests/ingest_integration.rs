//! End-to-end tests for the ingest pipeline.
//!
//! A scripted mailbox serves raw RFC 822 messages, parsed with the same
//! code the IMAP source uses, into a `BatchProcessor` backed by a real
//! libSQL store.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use bluestakes_ingest::error::{MailError, PipelineError};
use bluestakes_ingest::mail::imap::parse_rfc822;
use bluestakes_ingest::mail::{FetchedMessage, MailSource, MessageRef, SearchFilter};
use bluestakes_ingest::pipeline::{BatchProcessor, ReconcileOutcome, Reconciler, SkipReason};
use bluestakes_ingest::store::{LibSqlTicketStore, TicketStore};

const SENDER: &str = "noreply@bluestakes.org";

/// Mailbox holding raw messages, searched by substring.
struct ScriptedMailbox {
    messages: Vec<(String, Vec<u8>)>,
    broken: Mutex<Vec<String>>,
}

impl ScriptedMailbox {
    fn new(messages: Vec<Vec<u8>>) -> Self {
        Self {
            messages: messages
                .into_iter()
                .enumerate()
                .map(|(i, raw)| ((i + 1).to_string(), raw))
                .collect(),
            broken: Mutex::new(Vec::new()),
        }
    }

    /// Make `fetch` fail for one message id.
    fn break_fetch(self, id: &str) -> Self {
        self.broken.lock().unwrap().push(id.to_string());
        self
    }
}

#[async_trait]
impl MailSource for ScriptedMailbox {
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<MessageRef>, MailError> {
        Ok(self
            .messages
            .iter()
            .filter(|(_, raw)| String::from_utf8_lossy(raw).contains(&filter.text))
            .map(|(id, _)| MessageRef(id.clone()))
            .collect())
    }

    async fn fetch(&self, message: &MessageRef) -> Result<FetchedMessage, MailError> {
        if self.broken.lock().unwrap().iter().any(|id| id == message.as_str()) {
            return Err(MailError::Protocol("BAD fetch".into()));
        }
        let (id, raw) = self
            .messages
            .iter()
            .find(|(id, _)| id == message.as_str())
            .ok_or_else(|| MailError::Protocol(format!("no message {message}")))?;
        parse_rfc822(id, raw)
    }
}

fn forwarded_email(notice: &str) -> Vec<u8> {
    format!(
        "From: Field Office <office@example.com>\r\n\
         To: tickets@example.com\r\n\
         Subject: Fwd: Blue Stakes notice\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
         \r\n\
         --outer\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         ---------- Forwarded message ---------\r\n\
         From: <{SENDER}>\r\n\
         {notice}\r\n\
         --outer\r\n\
         Content-Type: application/pdf\r\n\
         Content-Disposition: attachment; filename=\"map.pdf\"\r\n\
         \r\n\
         %PDF-1.4 {SENDER}\r\n\
         --outer--\r\n"
    )
    .into_bytes()
}

fn new_ticket(number: &str, legal: &str) -> Vec<u8> {
    forwarded_email(&format!(
        "Ticket : {number}\r\n\
         Legal date: {legal}\r\n\
         Good Thru : 06/03/24\r\n\
         State: UT   Cnty: SALT   Place: SANDY\r\n\
         Street: 100 MAIN ST\r\n\
         Work type: Excavation\r\n\
         View ticket info at: https://example.org/t/{number}\r\n"
    ))
}

fn renumbered_ticket(number: &str, old: &str) -> Vec<u8> {
    forwarded_email(&format!(
        "Ticket : {number}\r\n\
         Old Ticket: {old}\r\n\
         Legal date: 06/10/24\r\n\
         Update By : 06/20/24\r\n\
         State: UT\r\n\
         Work type: Boring\r\n"
    ))
}

fn unrelated_email() -> Vec<u8> {
    b"From: someone@example.com\r\n\
      Subject: lunch\r\n\
      Content-Type: text/plain\r\n\
      \r\n\
      See you at noon.\r\n"
        .to_vec()
}

async fn pipeline(mailbox: ScriptedMailbox) -> (Arc<LibSqlTicketStore>, BatchProcessor) {
    let store = Arc::new(LibSqlTicketStore::new_memory().await.unwrap());
    let reconciler = Reconciler::new(store.clone()).with_project_id(Some(1));
    let processor = BatchProcessor::new(Arc::new(mailbox), reconciler, SENDER);
    (store, processor)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn new_ticket_lands_in_registry() {
    let mailbox = ScriptedMailbox::new(vec![unrelated_email(), new_ticket("A1", "05/09/24")]);
    let (store, processor) = pipeline(mailbox).await;

    let report = processor.run_once().await.unwrap();
    assert_eq!(report.total(), 1);
    assert_eq!(report.inserted, 1);

    let record = store.find("A1").await.unwrap().unwrap();
    assert_eq!(record.legal_date, Some(date(2024, 5, 9)));
    assert_eq!(record.expiration_date, Some(date(2024, 6, 3)));
    assert_eq!(record.update_date, None);
    assert_eq!(
        record.description,
        "UT - SALT - SANDY - 100 MAIN ST - Work: Excavation"
    );
    assert_eq!(record.map_url.as_deref(), Some("https://example.org/t/A1"));
    assert_eq!(record.project_id, Some(1));
    assert!(record.full_text.contains("Ticket : A1"));
    assert!(!record.full_text.contains("%PDF"));
    assert!(record.old_ticket_numbers.is_empty());
}

#[tokio::test]
async fn renumbering_carries_history_forward() {
    let mailbox = ScriptedMailbox::new(vec![
        new_ticket("A1", "05/09/24"),
        renumbered_ticket("A2", "A1"),
    ]);
    let (store, processor) = pipeline(mailbox).await;

    let report = processor.run_once().await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.updated, 1);

    let records = store.list().await.unwrap();
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.ticket_number, "A2");
    assert_eq!(record.legal_date, Some(date(2024, 6, 10)));
    assert_eq!(record.update_date, Some(date(2024, 6, 20)));
    assert_eq!(record.description, "UT - Work: Boring");
    assert_eq!(record.map_url, None);

    let snap = record.old_ticket_numbers.get("A1").unwrap();
    assert_eq!(snap.legal_date, "05/09/2024");
    assert_eq!(snap.expiration_date, "06/03/2024");
    assert_eq!(snap.update_date, "");
}

#[tokio::test]
async fn renumbering_unknown_ticket_is_skipped() {
    let mailbox = ScriptedMailbox::new(vec![renumbered_ticket("B2", "B1")]);
    let (store, processor) = pipeline(mailbox).await;

    let report = processor.run_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(matches!(
        report.outcomes[0].result,
        Ok(ReconcileOutcome::Skipped {
            reason: SkipReason::OriginalNotFound
        })
    ));
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_message_does_not_stop_the_batch() {
    let mailbox = ScriptedMailbox::new(vec![
        new_ticket("A1", "05/09/24"),
        new_ticket("A2", "05/10/24"),
        new_ticket("A3", "05/11/24"),
    ])
    .break_fetch("2");
    let (store, processor) = pipeline(mailbox).await;

    let report = processor.run_once().await.unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed, 1);
    assert!(matches!(
        report.outcomes[1].result,
        Err(PipelineError::Fetch { ref id, .. }) if id == "2"
    ));
    assert!(store.find("A2").await.unwrap().is_none());
    assert!(store.find("A3").await.unwrap().is_some());
}

#[tokio::test]
async fn rerunning_new_tickets_is_idempotent() {
    let (store, processor) = pipeline(ScriptedMailbox::new(vec![new_ticket("A1", "05/09/24")])).await;

    processor.run_once().await.unwrap();
    let second = processor.run_once().await.unwrap();

    assert_eq!(second.skipped, 1);
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn replaying_batch_duplicates_history() {
    let (store, processor) = pipeline(ScriptedMailbox::new(vec![
        new_ticket("A1", "05/09/24"),
        renumbered_ticket("A2", "A1"),
    ]))
    .await;

    processor.run_once().await.unwrap();
    let replay = processor.run_once().await.unwrap();

    // A1 no longer exists, so the insert is fresh and the renumbering applies
    // to the new record as well.
    assert_eq!(replay.inserted, 1);
    assert_eq!(replay.updated, 1);

    let records = store.list().await.unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.ticket_number, "A2");
        assert!(record.old_ticket_numbers.contains("A1"));
        assert_eq!(record.old_ticket_numbers.len(), 1);
    }
}

#[tokio::test]
async fn registry_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("tickets.db");

    {
        let store = Arc::new(LibSqlTicketStore::new_local(&path).await.unwrap());
        let processor = BatchProcessor::new(
            Arc::new(ScriptedMailbox::new(vec![new_ticket("A1", "05/09/24")])),
            Reconciler::new(store),
            SENDER,
        );
        processor.run_once().await.unwrap();
    }

    let store = Arc::new(LibSqlTicketStore::new_local(&path).await.unwrap());
    let processor = BatchProcessor::new(
        Arc::new(ScriptedMailbox::new(vec![renumbered_ticket("A2", "A1")])),
        Reconciler::new(store.clone()),
        SENDER,
    );
    let report = processor.run_once().await.unwrap();
    assert_eq!(report.updated, 1);
    assert!(store.find("A2").await.unwrap().unwrap().old_ticket_numbers.contains("A1"));
}
