//! IMAP mail source with password authentication
//!
//! Every operation group (search and fetch, move, append) opens its own
//! session and logs out when the group ends, whether it succeeded or not.

use std::collections::VecDeque;
use std::time::Duration;

use async_imap::Client as ImapClientAsync;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use chrono::DateTime;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info, warn};

use super::{Draft, GlobalRateLimiter, MailCursor, MailSource};
use crate::config::{secret_from_env, MailConfig};
use crate::error::{Error, Result};
use crate::models::{sort_newest_first, Address, Email};

/// Retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 1000;
const MAX_RETRY_DELAY_MS: u64 = 30000;

/// Fetch attributes; PEEK leaves the \Seen flag alone
const FETCH_ITEMS: &str = "(UID BODY.PEEK[])";

/// Flags set on appended drafts
const DRAFT_FLAGS: &str = "(\\Draft)";

/// Type alias for the IMAP session with our TLS stream
type ImapSession =
    async_imap::Session<async_native_tls::TlsStream<tokio_util::compat::Compat<TcpStream>>>;

/// Parse a raw RFC 5322 message into an Email
pub fn parse_message(uid: u32, raw: &[u8]) -> Result<Email> {
    let parsed = mail_parser::MessageParser::default()
        .parse(raw)
        .ok_or_else(|| Error::InvalidEmailFormat(format!("Failed to parse message {}", uid)))?;

    let convert = |addr: &mail_parser::Addr| {
        addr.address().map(|email| Address {
            name: addr.name().map(|s| s.to_string()),
            address: email.to_string(),
        })
    };

    let from = parsed
        .from()
        .and_then(|addrs| addrs.first())
        .and_then(convert);

    let list = |addrs: Option<&mail_parser::Address>| -> Vec<Address> {
        addrs
            .map(|addrs| addrs.iter().filter_map(convert).collect())
            .unwrap_or_default()
    };

    let date = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0));

    Ok(Email {
        id: Email::id_for_uid(uid),
        uid,
        message_id: parsed.message_id().map(|s| s.to_string()),
        from,
        to: list(parsed.to()),
        cc: list(parsed.cc()),
        bcc: list(parsed.bcc()),
        subject: parsed.subject().unwrap_or_default().to_string(),
        text: parsed
            .body_text(0)
            .map(|s| s.to_string())
            .unwrap_or_default(),
        date,
    })
}

/// Parse every fetched message, skipping the ones that cannot be decoded
fn parse_fetches(fetches: Vec<async_imap::error::Result<async_imap::types::Fetch>>) -> Vec<Email> {
    let mut emails = Vec::new();
    let mut parse_errors = 0;

    for result in fetches {
        let fetch = match result {
            Ok(fetch) => fetch,
            Err(e) => {
                parse_errors += 1;
                debug!("Error in fetch stream: {:?}", e);
                continue;
            }
        };

        let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
            continue;
        };

        match parse_message(uid, body) {
            Ok(email) => emails.push(email),
            Err(e) => {
                parse_errors += 1;
                debug!("Failed to parse email {}: {}", uid, e);
            }
        }
    }

    if parse_errors > 0 {
        warn!("Skipped {} emails due to parse errors", parse_errors);
    }
    emails
}

/// IMAP mail source for a single mailbox
pub struct ImapMailSource {
    host: String,
    port: u16,
    username: String,
    password: String,
    mailbox: String,
    drafts_folder: String,
    auth_timeout: Duration,
    fetch_batch_size: usize,
    rate_limiter: GlobalRateLimiter,
}

impl ImapMailSource {
    /// Build from config, reading the password from the configured environment variable
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let password = secret_from_env("mail.password_env", &config.password_env)?;
        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password,
            mailbox: config.mailbox.clone(),
            drafts_folder: config.drafts_folder.clone(),
            auth_timeout: Duration::from_millis(config.auth_timeout_ms),
            fetch_batch_size: config.fetch_batch_size.max(1),
            rate_limiter: GlobalRateLimiter::new(config.rate_limit_per_second),
        })
    }

    /// Connect with retry for transient failures
    async fn connect_with_retry(&self) -> Result<ImapSession> {
        let mut last_error = None;
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;

        for attempt in 1..=MAX_RETRIES {
            match self.connect().await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_transient() => {
                    warn!(
                        "IMAP connection attempt {}/{} to {} failed: {}",
                        attempt, MAX_RETRIES, self.host, e
                    );
                    last_error = Some(e);

                    if attempt < MAX_RETRIES {
                        info!("Retrying in {}ms...", delay_ms);
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Imap("Connection failed after retries".to_string())))
    }

    /// Open TLS, read the greeting and log in
    async fn connect(&self) -> Result<ImapSession> {
        self.rate_limiter.wait().await;

        debug!("Connecting to {}:{}", self.host, self.port);
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| Error::ConnectionFailed {
                host: self.host.clone(),
                reason: e.to_string(),
            })?;

        let tls = TlsConnector::new();
        let tls_stream = tls
            .connect(self.host.as_str(), tcp.compat())
            .await
            .map_err(|e| Error::ConnectionFailed {
                host: self.host.clone(),
                reason: e.to_string(),
            })?;

        let mut client = ImapClientAsync::new(tls_stream);

        // The greeting must be consumed before the first command
        match client.read_response().await {
            Some(Ok(_greeting)) => {}
            Some(Err(e)) => {
                return Err(Error::ConnectionFailed {
                    host: self.host.clone(),
                    reason: format!("failed to read greeting: {:?}", e),
                })
            }
            None => {
                return Err(Error::ConnectionFailed {
                    host: self.host.clone(),
                    reason: "unexpected end of stream, expected greeting".to_string(),
                })
            }
        }

        let session = tokio::time::timeout(
            self.auth_timeout,
            client.login(&self.username, &self.password),
        )
        .await
        .map_err(|_| Error::ConnectionFailed {
            host: self.host.clone(),
            reason: format!("authentication timed out after {:?}", self.auth_timeout),
        })?
        .map_err(|(e, _)| Error::Imap(format!("Authentication failed: {:?}", e)))?;

        info!("Connected to {} as {}", self.host, self.username);
        Ok(session)
    }

    async fn select(&self, session: &mut ImapSession) -> Result<()> {
        self.rate_limiter.wait().await;
        session
            .select(&self.mailbox)
            .await
            .map_err(|e| Error::Imap(format!("Failed to select {}: {:?}", self.mailbox, e)))?;
        Ok(())
    }

    async fn search(&self, session: &mut ImapSession, query: &str) -> Result<Vec<u32>> {
        self.rate_limiter.wait().await;
        let uids = session
            .uid_search(query)
            .await
            .map_err(|e| Error::Imap(format!("Search {} failed: {:?}", query, e)))?;
        Ok(uids.into_iter().collect())
    }

    async fn fetch_all_in_session(&self, session: &mut ImapSession) -> Result<Vec<Email>> {
        self.select(session).await?;

        let mut uids = self.search(session, "ALL").await?;
        uids.sort_by(|a, b| b.cmp(a));
        info!("Found {} emails in {}", uids.len(), self.mailbox);

        let mut emails = Vec::with_capacity(uids.len());
        for batch in uids.chunks(self.fetch_batch_size) {
            let uid_set = batch
                .iter()
                .map(|u| u.to_string())
                .collect::<Vec<_>>()
                .join(",");

            self.rate_limiter.wait().await;
            let fetches: Vec<_> = session
                .uid_fetch(&uid_set, FETCH_ITEMS)
                .await
                .map_err(|e| Error::Imap(format!("Fetch failed: {:?}", e)))?
                .collect()
                .await;

            emails.extend(parse_fetches(fetches));
            debug!("Fetched {}/{} emails", emails.len(), uids.len());
        }

        sort_newest_first(&mut emails);
        Ok(emails)
    }

    async fn move_in_session(
        &self,
        session: &mut ImapSession,
        uid: u32,
        folder: &str,
    ) -> Result<()> {
        self.select(session).await?;
        self.rate_limiter.wait().await;
        session
            .uid_mv(uid.to_string(), folder)
            .await
            .map_err(|e| Error::Imap(format!("Move of {} to {} failed: {:?}", uid, folder, e)))
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn unread(&self) -> Result<Box<dyn MailCursor>> {
        let mut session = self.connect_with_retry().await?;

        let search = async {
            self.select(&mut session).await?;
            self.search(&mut session, "UNSEEN").await
        }
        .await;

        let mut uids = match search {
            Ok(uids) => uids,
            Err(e) => {
                session.logout().await.ok();
                return Err(e);
            }
        };
        uids.sort_unstable();
        info!("Found {} unread emails in {}", uids.len(), self.mailbox);

        Ok(Box::new(ImapUnreadCursor {
            session: Some(session),
            pending: uids.into(),
            rate_limiter: self.rate_limiter.clone(),
        }))
    }

    async fn fetch_all(&self) -> Result<Vec<Email>> {
        let mut session = self.connect_with_retry().await?;
        let result = self.fetch_all_in_session(&mut session).await;
        session.logout().await.ok();
        result
    }

    async fn move_to(&self, email: &Email, folder: &str) -> Result<()> {
        let mut session = self.connect_with_retry().await?;
        let result = self.move_in_session(&mut session, email.uid, folder).await;
        session.logout().await.ok();

        if result.is_ok() {
            info!("Moved {} to {}", email.id, folder);
        }
        result
    }

    async fn create_draft(&self, draft: &Draft) -> Result<()> {
        let raw = draft.to_rfc5322(&self.username)?;

        let mut session = self.connect_with_retry().await?;
        self.rate_limiter.wait().await;
        let result = session
            .append(&self.drafts_folder, Some(DRAFT_FLAGS), None, raw.as_bytes())
            .await
            .map_err(|e| {
                Error::Imap(format!("Append to {} failed: {:?}", self.drafts_folder, e))
            });
        session.logout().await.ok();

        if result.is_ok() {
            info!("Created draft to {} in {}", draft.to, self.drafts_folder);
        }
        result
    }
}

/// Cursor over unseen UIDs; fetches one message per call
struct ImapUnreadCursor {
    session: Option<ImapSession>,
    pending: VecDeque<u32>,
    rate_limiter: GlobalRateLimiter,
}

impl ImapUnreadCursor {
    async fn fetch_one(session: &mut ImapSession, uid: u32) -> Result<Option<Email>> {
        let fetches: Vec<_> = session
            .uid_fetch(uid.to_string(), FETCH_ITEMS)
            .await
            .map_err(|e| Error::Imap(format!("Fetch of {} failed: {:?}", uid, e)))?
            .collect()
            .await;

        Ok(parse_fetches(fetches).into_iter().next())
    }
}

#[async_trait]
impl MailCursor for ImapUnreadCursor {
    async fn next_email(&mut self) -> Result<Option<Email>> {
        loop {
            let Some(session) = self.session.as_mut() else {
                return Ok(None);
            };

            let Some(uid) = self.pending.pop_front() else {
                self.close().await;
                return Ok(None);
            };

            self.rate_limiter.wait().await;
            match Self::fetch_one(session, uid).await {
                Ok(Some(email)) => return Ok(Some(email)),
                Ok(None) => {
                    warn!("Unread message {} could not be decoded, skipping", uid);
                }
                Err(e) => {
                    self.close().await;
                    return Err(e);
                }
            }
        }
    }

    async fn close(&mut self) {
        self.pending.clear();
        if let Some(mut session) = self.session.take() {
            session.logout().await.ok();
            debug!("Unread cursor closed");
        }
    }
}
