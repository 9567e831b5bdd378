use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use bluestakes_ingest::config::{IngestConfig, MailConfig};
use bluestakes_ingest::mail::ImapMailSource;
use bluestakes_ingest::pipeline::{BatchProcessor, Reconciler};
use bluestakes_ingest::store::{LibSqlTicketStore, TicketStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    let ingest = IngestConfig::from_env().context("loading ingest config")?;
    let mail = MailConfig::from_env().context("loading IMAP config")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %ingest.db_path.display(),
        host = %mail.imap_host,
        mailbox = %mail.mailbox,
        "Starting Blue Stakes ingest"
    );

    let store: Arc<dyn TicketStore> = Arc::new(
        LibSqlTicketStore::new_local(&ingest.db_path)
            .await
            .with_context(|| format!("opening database at {}", ingest.db_path.display()))?,
    );

    let mailbox = mail.mailbox.clone();
    let source = Arc::new(ImapMailSource::new(mail));
    let reconciler = Reconciler::new(store).with_project_id(ingest.project_id);
    let processor = BatchProcessor::new(source, reconciler, ingest.sentinel).with_mailbox(mailbox);

    let report = processor.run_once().await.context("ticket batch failed")?;

    info!(
        inserted = report.inserted,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        total = report.total(),
        "Ingest finished"
    );
    Ok(())
}
