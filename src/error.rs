//! Error types for the ticket ingest.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail source errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed for {username}")]
    Auth { username: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("Failed to parse message {id}")]
    Parse { id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mail task failed: {0}")]
    Task(String),
}

/// Field extraction failures. Soft: the message is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("no ticket number found in message body")]
    MissingTicketNumber,
}

/// Store failures raised while reconciling one ticket.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("lookup of ticket {key} failed: {source}")]
    Lookup {
        key: String,
        #[source]
        source: DatabaseError,
    },

    #[error("persisting ticket {key} failed: {source}")]
    Persist {
        key: String,
        #[source]
        source: DatabaseError,
    },

    #[error("ticket {key} (record {id}) was gone by the time it was renumbered")]
    RecordVanished { key: String, id: uuid::Uuid },
}

/// Batch pipeline errors.
///
/// Only `Search` aborts a run; everything else is recorded against the
/// message that produced it.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Mail search failed: {0}")]
    Search(#[source] MailError),

    #[error("Fetching message {id} failed: {source}")]
    Fetch {
        id: String,
        #[source]
        source: MailError,
    },

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Reconcile failed: {0}")]
    Reconcile(#[from] ReconcileError),
}
