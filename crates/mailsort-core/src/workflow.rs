//! Dispatch workflow over unread mail
//!
//! Unread emails are pulled one at a time. Each one goes through the
//! admission filter, classification and dispatch before the next is fetched.
//! A progress record is sent after classification, before the action runs.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::dispatch::{admit, Dispatcher};
use crate::error::Result;
use crate::llm::{Answerer, Classifier};
use crate::mail::{MailCursor, MailSource};
use crate::models::{Category, Email};

/// Sent once per admitted email, right after it is classified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchProgress {
    pub email_id: String,
    pub subject: String,
    pub category: Category,
}

/// Summary of one dispatch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Unread emails pulled from the mailbox
    pub seen: usize,
    /// Emails turned away by the admission filter
    pub skipped: usize,
    pub classified: usize,
    pub actioned: usize,
    /// Emails whose classification or action failed
    pub failed: usize,
}

/// Classify-and-dispatch pipeline
pub struct DispatchWorkflow {
    mail: Arc<dyn MailSource>,
    classifier: Arc<dyn Classifier>,
    dispatcher: Dispatcher,
}

impl DispatchWorkflow {
    pub fn new(
        mail: Arc<dyn MailSource>,
        classifier: Arc<dyn Classifier>,
        answerer: Arc<dyn Answerer>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(mail.clone(), answerer),
            mail,
            classifier,
        }
    }

    /// Single pass over unread mail
    ///
    /// A dropped progress receiver does not stop the run.
    pub async fn run(&self, progress: mpsc::Sender<DispatchProgress>) -> Result<DispatchReport> {
        let mut cursor = self.mail.unread().await?;
        let mut report = DispatchReport::default();

        let result = self.drain(cursor.as_mut(), &progress, &mut report).await;
        cursor.close().await;
        result?;

        info!(
            "Dispatch finished: {} seen, {} skipped, {} actioned, {} failed",
            report.seen, report.skipped, report.actioned, report.failed
        );
        Ok(report)
    }

    async fn drain(
        &self,
        cursor: &mut dyn MailCursor,
        progress: &mpsc::Sender<DispatchProgress>,
        report: &mut DispatchReport,
    ) -> Result<()> {
        while let Some(email) = cursor.next_email().await? {
            report.seen += 1;
            self.process(&email, progress, report).await;
        }
        Ok(())
    }

    async fn process(
        &self,
        email: &Email,
        progress: &mpsc::Sender<DispatchProgress>,
        report: &mut DispatchReport,
    ) {
        if let Err(reason) = admit(email) {
            debug!("Skipping {}: {}", email.id, reason);
            report.skipped += 1;
            return;
        }

        let category = match self.classifier.classify(&email.subject, &email.text).await {
            Ok(category) => category,
            Err(e) => {
                error!("Failed to classify {}: {}", email.id, e);
                report.failed += 1;
                return;
            }
        };
        report.classified += 1;

        let record = DispatchProgress {
            email_id: email.id.clone(),
            subject: email.subject.clone(),
            category,
        };
        if progress.send(record).await.is_err() {
            debug!("Progress receiver dropped");
        }

        match self.dispatcher.dispatch(email, category).await {
            Ok(_) => report.actioned += 1,
            Err(e) => {
                error!("Failed to dispatch {} as {}: {}", email.id, category, e);
                report.failed += 1;
            }
        }
    }
}
