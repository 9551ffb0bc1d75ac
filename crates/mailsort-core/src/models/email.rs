//! Email data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Display name (e.g., "John Doe")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Email address (e.g., "john@example.com")
    pub address: String,
}

impl Address {
    /// Create a new address with just an email
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    /// Create a new address with name and email
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "\"{}\" <{}>", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Join an address list the way header text renders it
fn format_addresses(addrs: &[Address]) -> String {
    addrs
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// An email message as fetched from the mailbox
///
/// Immutable once fetched. `id` is stable across runs (`imap-<uid>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    /// Protocol-native identifier, `imap-<uid>`
    pub id: String,

    /// IMAP UID the identifier is derived from
    pub uid: u32,

    /// RFC 5322 Message-ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// From address (first mailbox of the header)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,

    #[serde(default)]
    pub to: Vec<Address>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<Address>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<Address>,

    /// Subject line (empty when the header is missing)
    pub subject: String,

    /// Plain text body
    pub text: String,

    /// Date header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

impl Email {
    /// Identifier used for a given IMAP UID
    pub fn id_for_uid(uid: u32) -> String {
        format!("imap-{}", uid)
    }

    /// Sender address, if the From header resolved to a non-empty mailbox
    pub fn sender_address(&self) -> Option<&str> {
        self.from
            .as_ref()
            .map(|a| a.address.trim())
            .filter(|a| !a.is_empty())
    }

    /// Date as Unix epoch milliseconds (the representation stored in vector metadata)
    pub fn date_millis(&self) -> Option<i64> {
        self.date.map(|d| d.timestamp_millis())
    }

    /// Canonical text form: labeled headers then body, separated by a blank line
    ///
    /// This exact string is chunked, embedded and stored as `content` metadata.
    pub fn canonical_text(&self) -> String {
        let from = self.from.as_ref().map(|a| a.to_string()).unwrap_or_default();
        let date = self.date.map(|d| d.to_rfc2822()).unwrap_or_default();

        format!(
            "From: {}\nTo: {}\nCC: {}\nBCC: {}\nDate: {}\nSubject: {}\n\n{}",
            from,
            format_addresses(&self.to),
            format_addresses(&self.cc),
            format_addresses(&self.bcc),
            date,
            self.subject,
            self.text
        )
    }
}

/// Sort emails newest first; emails without a date sort last
pub fn sort_newest_first(emails: &mut [Email]) {
    emails.sort_by(|a, b| b.date.cmp(&a.date));
}
