//! Mail sources: where forwarded ticket notices come from.
//!
//! The pipeline only needs two operations: search for candidate messages
//! and fetch one message's MIME tree. `ImapMailSource` implements them over
//! raw IMAP; tests script their own sources.

pub mod imap;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::MailError;

pub use imap::ImapMailSource;

/// Which messages to consider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    /// Mailbox/folder to search.
    pub mailbox: String,
    /// Text that must appear somewhere in the message (headers or body).
    pub text: String,
}

impl SearchFilter {
    pub fn new(mailbox: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            mailbox: mailbox.into(),
            text: text.into(),
        }
    }
}

/// Opaque handle to one message in the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef(pub String);

impl MessageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One node of a message's MIME tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Part {
    /// Transfer-decoded content, for leaf parts.
    pub inline_data: Option<Vec<u8>>,
    /// Part is a file attachment (disposition or filename present).
    pub is_attachment: bool,
    /// Declared `type/subtype`, lowercase.
    pub content_type: String,
    pub children: Vec<Part>,
}

impl Part {
    /// A `text/plain` leaf.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            inline_data: Some(body.into().into_bytes()),
            content_type: "text/plain".into(),
            ..Default::default()
        }
    }

    /// A leaf with arbitrary bytes and content type.
    pub fn leaf(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            inline_data: Some(data),
            content_type: content_type.into(),
            ..Default::default()
        }
    }

    /// A multipart container.
    pub fn multipart(subtype: &str, children: Vec<Part>) -> Self {
        Self {
            content_type: format!("multipart/{subtype}"),
            children,
            ..Default::default()
        }
    }

    pub fn as_attachment(mut self) -> Self {
        self.is_attachment = true;
        self
    }

    pub fn is_image(&self) -> bool {
        self.content_type.to_ascii_lowercase().starts_with("image/")
    }
}

/// A fetched message: selected headers plus the MIME tree.
#[derive(Debug, Clone, Default)]
pub struct FetchedMessage {
    /// Lowercase header name → value (`from`, `subject`, `message-id`, `date`).
    pub headers: IndexMap<String, String>,
    pub body: Part,
}

impl FetchedMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Source of candidate ticket messages.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// List messages matching the filter.
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<MessageRef>, MailError>;

    /// Fetch one message found by `search`.
    async fn fetch(&self, message: &MessageRef) -> Result<FetchedMessage, MailError>;

    /// End any open session. Default: nothing to close.
    async fn close(&self) -> Result<(), MailError> {
        Ok(())
    }
}
