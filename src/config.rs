//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Address Blue Stakes notices are sent from. Forwarded mail carries it in
/// the quoted header block, which marks where the ticket text starts.
pub const DEFAULT_SENTINEL: &str = "noreply@bluestakes.org";

/// Project new tickets are filed under unless configured otherwise.
pub const DEFAULT_PROJECT_ID: i64 = 1;

/// Ingest pipeline configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Sender marker used to find forwarded ticket text.
    pub sentinel: String,
    /// Path to the ticket database file.
    pub db_path: PathBuf,
    /// Project assigned to newly inserted tickets.
    pub project_id: Option<i64>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
            db_path: PathBuf::from("./data/bluestakes.db"),
            project_id: Some(DEFAULT_PROJECT_ID),
        }
    }
}

impl IngestConfig {
    /// Build config from environment variables, falling back to defaults.
    ///
    /// `INGEST_PROJECT_ID=none` leaves new tickets unassigned.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sentinel = std::env::var("BLUESTAKES_SENDER")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.sentinel);

        let db_path = std::env::var("INGEST_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let project_id = match std::env::var("INGEST_PROJECT_ID") {
            Ok(raw) if raw.eq_ignore_ascii_case("none") => None,
            Ok(raw) => Some(raw.trim().parse::<i64>().map_err(|e| {
                ConfigError::InvalidValue {
                    key: "INGEST_PROJECT_ID".into(),
                    message: e.to_string(),
                }
            })?),
            Err(_) => defaults.project_id,
        };

        Ok(Self {
            sentinel,
            db_path,
            project_id,
        })
    }
}

/// IMAP mail source configuration.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
    /// Socket read timeout.
    pub timeout: Duration,
}

impl MailConfig {
    /// Build config from environment variables. `IMAP_HOST` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = std::env::var("IMAP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("IMAP_HOST".into()))?;

        let imap_port: u16 = std::env::var("IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("IMAP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("IMAP_PASSWORD").unwrap_or_default());

        let mailbox = std::env::var("IMAP_MAILBOX").unwrap_or_else(|_| "INBOX".to_string());

        let timeout_secs: u64 = std::env::var("IMAP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            imap_host,
            imap_port,
            username,
            password,
            mailbox,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ingest_config() {
        let config = IngestConfig::default();
        assert_eq!(config.sentinel, "noreply@bluestakes.org");
        assert_eq!(config.project_id, Some(1));
        assert!(config.db_path.ends_with("bluestakes.db"));
    }

    #[test]
    fn mail_config_requires_host() {
        // SAFETY: This test runs in isolation; no other thread reads IMAP_HOST concurrently.
        unsafe { std::env::remove_var("IMAP_HOST") };
        let err = MailConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "IMAP_HOST"));
    }
}
