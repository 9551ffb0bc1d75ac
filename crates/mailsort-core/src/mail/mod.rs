//! Mailbox access
//!
//! The pipelines reach the mailbox through [`MailSource`]. Unread mail is
//! pulled one message at a time through a [`MailCursor`]; the full mailbox is
//! returned newest first for the indexer.

mod imap;
mod rate_limiter;

use async_trait::async_trait;
use mail_builder::MessageBuilder;

use crate::error::{Error, Result};
use crate::models::Email;

pub use self::imap::{parse_message, ImapMailSource};
pub use rate_limiter::GlobalRateLimiter;

/// A reply draft to be stored in the drafts folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Message-ID of the email being answered
    pub in_reply_to: Option<String>,
}

impl Draft {
    /// Render as an RFC 5322 message sent from `from`
    pub fn to_rfc5322(&self, from: &str) -> Result<String> {
        let mut builder = MessageBuilder::new()
            .from(from)
            .to(self.to.as_str())
            .subject(self.subject.as_str())
            .text_body(self.body.as_str());

        if let Some(id) = &self.in_reply_to {
            let id = id.trim_matches(|c| c == '<' || c == '>');
            builder = builder.in_reply_to(id).references(id);
        }

        builder
            .write_to_string()
            .map_err(|e| Error::Imap(format!("Failed to render draft: {}", e)))
    }
}

/// Pull-based sequence of emails
///
/// Each call to `next_email` fetches and decodes one message; `Ok(None)`
/// signals exhaustion. The underlying connection is released on exhaustion or
/// on `close`, whichever comes first.
#[async_trait]
pub trait MailCursor: Send {
    async fn next_email(&mut self) -> Result<Option<Email>>;

    /// Release the connection; later calls to `next_email` return `Ok(None)`
    async fn close(&mut self);
}

/// Mailbox operations used by the pipelines
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Cursor over unseen mail; fetching does not mark anything seen
    async fn unread(&self) -> Result<Box<dyn MailCursor>>;

    /// Every email in the mailbox, newest first
    async fn fetch_all(&self) -> Result<Vec<Email>>;

    /// Move an email to another folder
    async fn move_to(&self, email: &Email, folder: &str) -> Result<()>;

    /// Store a reply draft
    async fn create_draft(&self, draft: &Draft) -> Result<()>;
}
