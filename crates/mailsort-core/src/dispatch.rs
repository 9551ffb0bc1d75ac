//! Category to action dispatch
//!
//! Every category maps to exactly one mailbox mutation: a move or a reply
//! draft. The mapping is a single exhaustive match in [`route`], so a new
//! category does not compile until it is given an action.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::llm::Answerer;
use crate::mail::{Draft, MailSource};
use crate::models::{Category, Email};

/// Folder spam is moved to
pub const SPAM_FOLDER: &str = "Deleted";

/// Folder distributor inquiries are moved to
pub const DISTRIBUTOR_FOLDER: &str = "Distributor Participation Inquiries";

/// Reply to a quote request for one part
pub const SINGLE_PART_ACK: &str =
    "Thank you for your request for a single part. We will get back to you shortly with a quote.";

/// Reply to a quote request for several parts
pub const MULTI_PART_ACK: &str = "Thank you for your request for multiple parts. Our team will review your request and get back to you with a quote.";

/// How a category is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Move the email to a folder
    Move(&'static str),
    /// Draft a reply with fixed text
    Acknowledge(&'static str),
    /// Draft a reply with text from the answerer
    Answer,
}

/// The dispatch table
pub fn route(category: Category) -> Route {
    match category {
        Category::Spam => Route::Move(SPAM_FOLDER),
        Category::DistributorInquiry => Route::Move(DISTRIBUTOR_FOLDER),
        Category::QuoteRequestSingle => Route::Acknowledge(SINGLE_PART_ACK),
        Category::QuoteRequestMulti => Route::Acknowledge(MULTI_PART_ACK),
        Category::GeneralInquiry => Route::Answer,
    }
}

/// The mailbox mutation performed for one email
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DispatchAction {
    MoveTo {
        folder: String,
    },
    CreateDraft {
        to: String,
        subject: String,
        body: String,
    },
}

/// Why the admission filter turned an email away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingSubject,
    MissingText,
    MissingSender,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Rejection::MissingSubject => "missing subject",
            Rejection::MissingText => "missing text",
            Rejection::MissingSender => "missing sender address",
        };
        f.write_str(reason)
    }
}

/// Admission filter: subject, text and a sender address must all be present
///
/// Returns the sender address of an admitted email.
pub fn admit(email: &Email) -> std::result::Result<&str, Rejection> {
    if email.subject.trim().is_empty() {
        return Err(Rejection::MissingSubject);
    }
    if email.text.trim().is_empty() {
        return Err(Rejection::MissingText);
    }
    email.sender_address().ok_or(Rejection::MissingSender)
}

/// Subject line of a reply
pub fn reply_subject(subject: &str) -> String {
    format!("Re: {}", subject)
}

/// Turns a categorized email into its one mailbox mutation
pub struct Dispatcher {
    mail: Arc<dyn MailSource>,
    answerer: Arc<dyn Answerer>,
}

impl Dispatcher {
    pub fn new(mail: Arc<dyn MailSource>, answerer: Arc<dyn Answerer>) -> Self {
        Self { mail, answerer }
    }

    /// Decide the action for an email without touching the mailbox
    pub async fn plan(&self, email: &Email, category: Category) -> Result<DispatchAction> {
        let reply = |body: String| -> Result<DispatchAction> {
            let to = email.sender_address().ok_or_else(|| {
                Error::InvalidEmailFormat(format!("{} has no sender address", email.id))
            })?;
            Ok(DispatchAction::CreateDraft {
                to: to.to_string(),
                subject: reply_subject(&email.subject),
                body,
            })
        };

        match route(category) {
            Route::Move(folder) => Ok(DispatchAction::MoveTo {
                folder: folder.to_string(),
            }),
            Route::Acknowledge(text) => reply(text.to_string()),
            Route::Answer => {
                let body = self.answerer.answer(&email.subject, &email.text).await?;
                reply(body)
            }
        }
    }

    /// Carry out a planned action
    pub async fn execute(&self, email: &Email, action: &DispatchAction) -> Result<()> {
        match action {
            DispatchAction::MoveTo { folder } => self.mail.move_to(email, folder).await,
            DispatchAction::CreateDraft { to, subject, body } => {
                let draft = Draft {
                    to: to.clone(),
                    subject: subject.clone(),
                    body: body.clone(),
                    in_reply_to: email.message_id.clone(),
                };
                self.mail.create_draft(&draft).await
            }
        }
    }

    /// Plan and execute the action for a categorized email
    pub async fn dispatch(&self, email: &Email, category: Category) -> Result<DispatchAction> {
        let action = self.plan(email, category).await?;
        debug!("{} ({}) -> {:?}", email.id, category, action);

        self.execute(email, &action).await?;
        info!("Dispatched {} as {}", email.id, category);
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{email, RecordingAnswerer, RecordingMailSource};

    fn dispatcher(mail: &Arc<RecordingMailSource>) -> (Dispatcher, Arc<RecordingAnswerer>) {
        let answerer = Arc::new(RecordingAnswerer::new("We ship worldwide."));
        (Dispatcher::new(mail.clone(), answerer.clone()), answerer)
    }

    #[test]
    fn test_route_table() {
        assert_eq!(route(Category::Spam), Route::Move("Deleted"));
        assert_eq!(
            route(Category::DistributorInquiry),
            Route::Move("Distributor Participation Inquiries")
        );
        assert_eq!(route(Category::QuoteRequestSingle), Route::Acknowledge(SINGLE_PART_ACK));
        assert_eq!(route(Category::QuoteRequestMulti), Route::Acknowledge(MULTI_PART_ACK));
        assert_eq!(route(Category::GeneralInquiry), Route::Answer);
    }

    #[tokio::test]
    async fn test_every_category_performs_exactly_one_mutation() {
        for category in Category::ALL {
            let mail = Arc::new(RecordingMailSource::new());
            let (dispatcher, _) = dispatcher(&mail);
            let e = email(1, "Subject", "Body", Some("bob@example.com"));

            dispatcher.dispatch(&e, category).await.unwrap();

            let mutations = mail.moves().len() + mail.drafts().len();
            assert_eq!(mutations, 1, "category {} made {} mutations", category, mutations);
        }
    }

    #[tokio::test]
    async fn test_spam_is_moved_to_deleted() {
        let mail = Arc::new(RecordingMailSource::new());
        let (dispatcher, answerer) = dispatcher(&mail);
        let e = email(7, "Free money now!!!", "Click here", Some("spam@example.com"));

        let action = dispatcher.dispatch(&e, Category::Spam).await.unwrap();

        assert_eq!(
            action,
            DispatchAction::MoveTo {
                folder: "Deleted".to_string()
            }
        );
        assert_eq!(mail.moves(), vec![(7, "Deleted".to_string())]);
        assert!(mail.drafts().is_empty());
        assert!(answerer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_quote_gets_fixed_acknowledgment() {
        let mail = Arc::new(RecordingMailSource::new());
        let (dispatcher, answerer) = dispatcher(&mail);
        let e = email(8, "Need LM317T", "Please quote 100 pcs", Some("bob@example.com"));

        dispatcher
            .dispatch(&e, Category::QuoteRequestSingle)
            .await
            .unwrap();

        let drafts = mail.drafts();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].to, "bob@example.com");
        assert_eq!(drafts[0].subject, "Re: Need LM317T");
        assert_eq!(drafts[0].body, SINGLE_PART_ACK);
        assert!(mail.moves().is_empty());
        assert!(answerer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_general_inquiry_uses_answerer_text() {
        let mail = Arc::new(RecordingMailSource::new());
        let (dispatcher, answerer) = dispatcher(&mail);
        let e = email(9, "Shipping?", "Do you ship to Canada?", Some("amy@example.com"));

        dispatcher
            .dispatch(&e, Category::GeneralInquiry)
            .await
            .unwrap();

        assert_eq!(
            answerer.calls(),
            vec![("Shipping?".to_string(), "Do you ship to Canada?".to_string())]
        );
        let drafts = mail.drafts();
        assert_eq!(drafts[0].body, "We ship worldwide.");
        assert_eq!(drafts[0].subject, "Re: Shipping?");
    }

    #[tokio::test]
    async fn test_answerer_failure_creates_no_draft() {
        let mail = Arc::new(RecordingMailSource::new());
        let answerer = Arc::new(RecordingAnswerer::failing());
        let dispatcher = Dispatcher::new(mail.clone(), answerer);
        let e = email(9, "Shipping?", "Do you ship to Canada?", Some("amy@example.com"));

        assert!(dispatcher
            .dispatch(&e, Category::GeneralInquiry)
            .await
            .is_err());
        assert!(mail.drafts().is_empty());
    }

    #[test]
    fn test_admission_filter() {
        assert_eq!(
            admit(&email(1, "Hi", "Body", Some("a@example.com"))),
            Ok("a@example.com")
        );
        assert_eq!(
            admit(&email(1, "  ", "Body", Some("a@example.com"))),
            Err(Rejection::MissingSubject)
        );
        assert_eq!(
            admit(&email(1, "Hi", "\n", Some("a@example.com"))),
            Err(Rejection::MissingText)
        );
        assert_eq!(admit(&email(1, "Hi", "Body", None)), Err(Rejection::MissingSender));
        assert_eq!(
            admit(&email(1, "Hi", "Body", Some(" "))),
            Err(Rejection::MissingSender)
        );
    }

    #[test]
    fn test_reply_subject() {
        assert_eq!(reply_subject("Quote"), "Re: Quote");
    }
}
